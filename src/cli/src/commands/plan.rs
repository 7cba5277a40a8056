//! `ova-import plan` command.
//!
//! Builds the import spec offline: networks are not looked up on an
//! endpoint, each binding simply names its target.

use std::path::PathBuf;

use clap::Args;
use ova_import_core::config::ImportConfig;
use ova_import_core::options::ImportOptions;
use ova_import_runtime::{IdentityNetworks, ImportSpec, ImportSpecBuilder};

use crate::output;

#[derive(Args)]
pub struct PlanArgs {
    /// Archive path or http(s) URL
    pub location: String,

    /// Options document (JSON, as printed by `ova-import options`)
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Entity name, overriding the options and the descriptor
    #[arg(long)]
    pub name: Option<String>,

    /// Print the import spec as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: PlanArgs, config: &ImportConfig) -> Result<(), Box<dyn std::error::Error>> {
    let spec = build_spec(&args, config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&spec)?);
        return Ok(());
    }

    let summary = output::table(
        &["FIELD", "VALUE"],
        [
            vec!["Name", spec.entity_name.as_str()],
            vec!["Deployment", output::or_dash(&spec.deployment_option)],
            vec!["Disk provisioning", output::or_dash(&spec.disk_provisioning)],
            vec!["IP allocation", output::or_dash(&spec.ip_allocation_policy)],
            vec!["IP protocol", output::or_dash(&spec.ip_protocol)],
            vec!["Locale", spec.locale.as_str()],
        ],
    );
    println!("{summary}");

    if !spec.property_mapping.is_empty() {
        let properties = output::table(
            &["PROPERTY", "VALUE"],
            spec.property_mapping
                .iter()
                .map(|kv| vec![kv.key.as_str(), kv.value.as_str()]),
        );
        println!("\n{properties}");
    }

    if !spec.network_mapping.is_empty() {
        let networks = output::table(
            &["NETWORK", "TARGET"],
            spec.network_mapping
                .iter()
                .map(|b| vec![b.name.as_str(), b.network.value.as_str()]),
        );
        println!("\n{networks}");
    }

    Ok(())
}

async fn build_spec(
    args: &PlanArgs,
    config: &ImportConfig,
) -> Result<ImportSpec, Box<dyn std::error::Error>> {
    let options = match &args.options {
        Some(path) => ImportOptions::from_json(&std::fs::read_to_string(path)?)?,
        None => ImportOptions::default(),
    };

    let archive = super::open_archive(&args.location, config)?;
    let descriptor = super::read_descriptor(&archive).await?;

    let spec = ImportSpecBuilder::new(&options)
        .entity_name(args.name.clone().unwrap_or_default())
        .locale(&config.deploy.locale)
        .build(&descriptor, &IdentityNetworks)
        .await?;
    Ok(spec)
}
