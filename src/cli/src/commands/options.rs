//! `ova-import options` command.

use clap::Args;
use ova_import_core::config::ImportConfig;
use ova_import_runtime::options_template;

#[derive(Args)]
pub struct OptionsArgs {
    /// Archive path or http(s) URL
    pub location: String,
}

pub async fn execute(
    args: OptionsArgs,
    config: &ImportConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let archive = super::open_archive(&args.location, config)?;
    let descriptor = super::read_descriptor(&archive).await?;
    let template = options_template(&descriptor);
    println!("{}", template.to_json_pretty()?);
    Ok(())
}
