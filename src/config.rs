//! Runtime settings: JSON config file with command-line overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Optional values as read from `config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub strategy: Option<String>,
    pub file: Option<String>,
    pub spread: Option<f64>,
    pub size: Option<u32>,
    pub risk: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path, error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path, error = %e, "config file not readable, using defaults");
                Self::default()
            }
        }
    }
}

/// Fully resolved settings after applying `--flag value` overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub strategy: String,
    pub file: String,
    /// Arbitrage spread threshold.
    pub spread: f64,
    /// Arbitrage order size.
    pub size: u32,
    /// Max loss (negative threshold).
    pub risk: f64,
}

impl Settings {
    pub fn resolve(config: FileConfig, args: &[String]) -> Self {
        let overrides = parse_flags(args);
        let lookup = |key: &str| overrides.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        let strategy = lookup("strategy")
            .or(config.strategy)
            .unwrap_or_default();
        let file = lookup("file").or(config.file).unwrap_or_default();
        let spread = lookup("spread")
            .and_then(|v| v.parse().ok())
            .or(config.spread)
            .unwrap_or(0.02);
        let size = lookup("size")
            .and_then(|v| v.parse().ok())
            .or(config.size)
            .unwrap_or(10);
        let risk = lookup("risk")
            .and_then(|v| v.parse().ok())
            .or(config.risk)
            .unwrap_or(-500.0);

        Self {
            strategy,
            file,
            spread,
            size,
            risk,
        }
    }
}

/// Collects `--name value` pairs; anything else is ignored.
fn parse_flags(args: &[String]) -> Vec<(String, String)> {
    let mut flags = Vec::new();
    let mut i = 0;
    while i + 1 < args.len() {
        if let Some(name) = args[i].strip_prefix("--") {
            flags.push((name.to_string(), args[i + 1].clone()));
            i += 2;
        } else {
            i += 1;
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_when_nothing_provided() {
        let settings = Settings::resolve(FileConfig::default(), &[]);
        assert_eq!(settings.strategy, "");
        assert_eq!(settings.spread, 0.02);
        assert_eq!(settings.size, 10);
        assert_eq!(settings.risk, -500.0);
    }

    #[test]
    fn test_config_file_values_apply() {
        let config = FileConfig {
            strategy: Some("momentum".to_string()),
            file: Some("ticks.csv".to_string()),
            spread: Some(0.1),
            size: Some(5),
            risk: Some(-100.0),
        };
        let settings = Settings::resolve(config, &[]);
        assert_eq!(settings.strategy, "momentum");
        assert_eq!(settings.file, "ticks.csv");
        assert_eq!(settings.spread, 0.1);
        assert_eq!(settings.size, 5);
        assert_eq!(settings.risk, -100.0);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let config = FileConfig {
            strategy: Some("momentum".to_string()),
            risk: Some(-100.0),
            ..FileConfig::default()
        };
        let settings = Settings::resolve(
            config,
            &args(&["--strategy", "arbitrage", "--risk", "-250.5", "--size", "20"]),
        );
        assert_eq!(settings.strategy, "arbitrage");
        assert_eq!(settings.risk, -250.5);
        assert_eq!(settings.size, 20);
    }

    #[test]
    fn test_unparsable_override_falls_back() {
        let settings = Settings::resolve(FileConfig::default(), &args(&["--size", "lots"]));
        assert_eq!(settings.size, 10);
    }

    #[test]
    fn test_stray_arguments_ignored() {
        let settings = Settings::resolve(
            FileConfig::default(),
            &args(&["positional", "--strategy", "marketmaker"]),
        );
        assert_eq!(settings.strategy, "marketmaker");
    }
}
