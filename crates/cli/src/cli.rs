use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clipdeck_core::PriorityLevel;

/// Priority-aware media probing.
///
/// Runs files through the admission pipeline so interactive requests are
/// served ahead of background work, then reports what was found.
#[derive(Parser, Debug)]
#[command(name = "clipdeck", about = "Priority-aware media probing pipeline")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/clipdeck/config.toml)
    #[arg(long, global = true, env = "CLIPDECK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe image files for format and dimensions
    Probe(ProbeArgs),
    /// Print the resolved configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Files to probe
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,

    /// Priority for every file: background, utility, userInitiated, userInteractive
    #[arg(long, short, default_value = "userInitiated")]
    pub priority: PriorityLevel,

    /// Skip the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print pipeline metrics as JSON when done
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Also write the resolved config to the config path
    #[arg(long)]
    pub write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_with_priority() {
        let args = CliArgs::parse_from([
            "clipdeck",
            "probe",
            "a.png",
            "b.gif",
            "--priority",
            "user-interactive",
            "--no-cache",
        ]);
        match args.command {
            Command::Probe(probe) => {
                assert_eq!(probe.files.len(), 2);
                assert_eq!(probe.priority, PriorityLevel::UserInteractive);
                assert!(probe.no_cache);
                assert!(!probe.metrics);
            }
            other => panic!("expected probe, got {other:?}"),
        }
    }

    #[test]
    fn probe_defaults_to_user_initiated() {
        let args = CliArgs::parse_from(["clipdeck", "probe", "a.png"]);
        let Command::Probe(probe) = args.command else {
            panic!("expected probe");
        };
        assert_eq!(probe.priority, PriorityLevel::UserInitiated);
    }

    #[test]
    fn config_flag_is_global() {
        let args = CliArgs::parse_from(["clipdeck", "config", "--config", "custom.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(args.command, Command::Config(ConfigArgs { write: false })));
    }
}
