// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dutrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dutrun",
    version,
    about = "Run a test pipeline against a fleet of devices under test.",
    long_about = None
)]
pub struct CliArgs {
    /// Job descriptor to run (JSON or YAML).
    #[arg(long, value_name = "PATH")]
    pub descriptor: String,

    /// Descriptor format (json, yaml).
    ///
    /// If omitted, it is inferred from the descriptor's file extension.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Name the job is submitted under.
    #[arg(long, value_name = "NAME", default_value = "cli")]
    pub requestor: String,

    /// Path to the engine config file (TOML).
    ///
    /// Default: `Dutrun.toml` in the current working directory. A missing
    /// default file means built-in defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DUTRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the pipeline, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["dutrun", "--descriptor", "job.yaml"]).unwrap();
        assert_eq!(args.descriptor, "job.yaml");
        assert_eq!(args.requestor, "cli");
        assert!(args.config.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn descriptor_is_required() {
        assert!(CliArgs::try_parse_from(["dutrun"]).is_err());
    }
}
