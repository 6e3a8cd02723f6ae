//! Command-line interface for the `agentmesh` binary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use am_domain::config::{Config, ConfigSeverity};
use am_domain::error::Result;

#[derive(Debug, Parser)]
#[command(name = "agentmesh", about = "Multi-agent orchestration core", version)]
pub struct Cli {
    /// Config file path (default: $AGENTMESH_CONFIG, then ./agentmesh.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway server (the default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Resolve and load the configuration. Missing file = built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("AGENTMESH_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let default = PathBuf::from("agentmesh.toml");
            default.exists().then_some(default)
        });

    match path {
        Some(path) => Config::load(&path).map(|config| (config, Some(path))),
        None => Ok((Config::default(), None)),
    }
}

/// Print validation issues; returns whether the config is usable.
pub fn validate(config: &Config, path: Option<&Path>) -> bool {
    match path {
        Some(path) => println!("validating {}", path.display()),
        None => println!("validating built-in defaults (no config file found)"),
    }

    let issues = config.validate();
    if issues.is_empty() {
        println!("configuration OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}

/// Print the effective configuration as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_defaults_without_file() {
        let (config, path) = load_config(None).unwrap();
        assert!(path.is_none() || path.unwrap().exists());
        assert_eq!(config.agent_client.max_retries, 3);
    }

    #[test]
    fn load_config_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[server]\nport = 9999\n").unwrap();
        let (config, path) = load_config(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(path.as_deref(), Some(file.path()));
    }

    #[test]
    fn load_config_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[server\nport = oops").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
