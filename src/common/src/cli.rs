use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that only inspect configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Pick the log filter for the given flags.
    ///
    /// `RUST_LOG` wins when neither flag is set.
    pub fn log_filter(args: &CommonArgs) -> EnvFilter {
        if args.quiet {
            EnvFilter::new("warn")
        } else if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
    }

    /// Initialize logging based on CLI arguments
    pub fn init_logging(args: &CommonArgs) {
        tracing_subscriber::fmt()
            .with_env_filter(log_filter(args))
            .with_writer(std::io::stderr)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("spanstore configuration:");
            println!("========================");
            println!("Database DSN: {}", crate::store::redact_dsn(&config.database.dsn));
            println!(
                "Default project: {}",
                config.projects.default_project_name
            );
            println!(
                "Session delete chunk size: {}",
                config.projects.session_delete_chunk_size
            );
            println!("Cascade mode: {:?}", config.projects.cascade);
            println!("Event queue: {}", config.events.queue.queue_type);
            println!("Publish attempts: {}", config.events.publish_attempts);
            println!("Publish backoff: {:?}", config.events.publish_backoff);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate()?;
        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle the configuration-only commands
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn test_common_args_parse_flags() {
        let cli = TestCli::parse_from(["spanstore", "--config", "custom.toml", "-v"]);
        assert_eq!(cli.common.config, Some(PathBuf::from("custom.toml")));
        assert!(cli.common.verbose);
        assert!(!cli.common.quiet);
    }

    #[test]
    fn test_quiet_wins_over_verbose() {
        let args = CommonArgs {
            config: None,
            verbose: true,
            quiet: true,
        };
        assert_eq!(utils::log_filter(&args).to_string(), "warn");
    }
}
