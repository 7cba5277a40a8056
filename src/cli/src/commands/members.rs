//! `ova-import members` command.

use clap::Args;
use ova_import_core::config::ImportConfig;

use crate::output;

#[derive(Args)]
pub struct MembersArgs {
    /// Archive path or http(s) URL
    pub location: String,

    /// Print members as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    args: MembersArgs,
    config: &ImportConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let archive = super::open_archive(&args.location, config)?;
    let members = archive.list().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&members)?);
        return Ok(());
    }

    let table = output::table(
        &["NAME", "SIZE"],
        members
            .iter()
            .map(|m| vec![m.name.clone(), output::format_size(m.size)]),
    );
    println!("{table}");
    Ok(())
}
