//! CLI command definitions and dispatch.

mod members;
mod options;
mod plan;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ova_import_core::config::ImportConfig;
use ova_import_runtime::{
    ByteSource, HttpFetcher, TapeArchive, VirtualSystemDescriptor, DESCRIPTOR_PATTERN,
};

/// OVA Import - inspect virtual appliance archives and plan imports.
#[derive(Parser)]
#[command(name = "ova-import", version, about)]
pub struct Cli {
    /// Configuration file (YAML, or JSON by extension)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Accept invalid TLS certificates when fetching remote archives
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// List the members of an appliance archive
    Members(members::MembersArgs),
    /// Print an options template for an appliance
    Options(options::OptionsArgs),
    /// Build the import spec an appliance would be submitted with
    Plan(plan::PlanArgs),
}

impl Cli {
    /// Load the configuration named by `--config` (or defaults), then
    /// apply environment and flag overrides.
    pub fn load_config(&self) -> Result<ImportConfig, Box<dyn std::error::Error>> {
        let config = match &self.config {
            Some(path) => ImportConfig::load(path)?,
            None => ImportConfig::default(),
        };
        let mut config = config.with_env();
        if self.insecure {
            config.transport.insecure = true;
        }
        Ok(config)
    }
}

/// Open an archive location with local and HTTP(S) access.
pub(crate) fn open_archive(
    location: &str,
    config: &ImportConfig,
) -> Result<TapeArchive, Box<dyn std::error::Error>> {
    let fetcher = HttpFetcher::new(&config.transport)?;
    let source = ByteSource::with_fetcher(Arc::new(fetcher));
    Ok(TapeArchive::new(location, source))
}

/// Read and parse the OVF descriptor of an archive.
pub(crate) async fn read_descriptor(
    archive: &TapeArchive,
) -> Result<VirtualSystemDescriptor, Box<dyn std::error::Error>> {
    let (member, bytes) = archive.read_member(DESCRIPTOR_PATTERN).await?;
    tracing::debug!(member = %member, size = bytes.len(), "Read OVF descriptor");
    Ok(VirtualSystemDescriptor::parse(&bytes)?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: ImportConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Members(args) => members::execute(args, &config).await,
        Command::Options(args) => options::execute(args, &config).await,
        Command::Plan(args) => plan::execute(args, &config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_plan_with_global_flags() {
        let cli = Cli::try_parse_from([
            "ova-import",
            "plan",
            "appliance.ova",
            "--name",
            "web-01",
            "--insecure",
        ])
        .unwrap();
        assert!(cli.insecure);
        match cli.command {
            Command::Plan(args) => {
                assert_eq!(args.location, "appliance.ova");
                assert_eq!(args.name.as_deref(), Some("web-01"));
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn test_insecure_flag_overrides_config() {
        let cli = Cli::try_parse_from(["ova-import", "--insecure", "members", "x.ova"]).unwrap();
        let config = cli.load_config().unwrap();
        assert!(config.transport.insecure);
    }

    #[test]
    fn test_load_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("import.yaml");
        std::fs::write(&path, "deploy:\n  locale: DE\nlog_level: debug\n").unwrap();

        let cli = Cli::try_parse_from([
            "ova-import",
            "--config",
            path.to_str().unwrap(),
            "options",
            "x.ova",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.deploy.locale, "DE");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from([
            "ova-import",
            "--config",
            "/nonexistent/import.yaml",
            "members",
            "x.ova",
        ])
        .unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_location_is_required() {
        assert!(Cli::try_parse_from(["ova-import", "members"]).is_err());
    }
}
