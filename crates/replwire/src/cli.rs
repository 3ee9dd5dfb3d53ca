//! Command-line options.

use std::path::PathBuf;

use anyhow::{bail, Context};

use replwire_core::ReplwireConfig;

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_ENV: &str = "REPLWIRE_CONFIG";

/// Parsed command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// YAML config path
    pub config: Option<PathBuf>,
    /// Print the version and exit
    pub version: bool,
}

impl CliOptions {
    /// Parse arguments (without the program name), falling back to
    /// `REPLWIRE_CONFIG` for the config path.
    pub fn parse<I>(args: I, env_config: Option<String>) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().context("--config needs a path")?;
                    options.config = Some(PathBuf::from(path));
                }
                "--version" | "-V" => options.version = true,
                other => match other.strip_prefix("--config=") {
                    Some(path) => options.config = Some(PathBuf::from(path)),
                    None => bail!("unknown argument: {other}"),
                },
            }
        }
        if options.config.is_none() {
            options.config = env_config.filter(|p| !p.trim().is_empty()).map(PathBuf::from);
        }
        Ok(options)
    }

    /// Load and validate the configuration, or defaults when no path is set.
    pub fn load_config(&self) -> anyhow::Result<ReplwireConfig> {
        let config = match &self.config {
            Some(path) => ReplwireConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ReplwireConfig::default(),
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_flag_wins_over_env() {
        let options = CliOptions::parse(
            args(&["--config", "/etc/replwire.yaml"]),
            Some("/tmp/other.yaml".to_string()),
        )
        .unwrap();
        assert_eq!(options.config, Some(PathBuf::from("/etc/replwire.yaml")));
    }

    #[test]
    fn test_env_fallback() {
        let options = CliOptions::parse(args(&[]), Some("/tmp/r.yaml".to_string())).unwrap();
        assert_eq!(options.config, Some(PathBuf::from("/tmp/r.yaml")));
        let options = CliOptions::parse(args(&[]), None).unwrap();
        assert_eq!(options.config, None);
    }

    #[test]
    fn test_equals_form_and_version() {
        let options = CliOptions::parse(args(&["--config=a.yaml", "-V"]), None).unwrap();
        assert_eq!(options.config, Some(PathBuf::from("a.yaml")));
        assert!(options.version);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(CliOptions::parse(args(&["--config"]), None).is_err());
        assert!(CliOptions::parse(args(&["--headless"]), None).is_err());
    }

    #[test]
    fn test_load_defaults_without_path() {
        let config = CliOptions::default().load_config().unwrap();
        assert_eq!(config.session.name, "console");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let options = CliOptions {
            config: Some(PathBuf::from("/nonexistent/replwire.yaml")),
            version: false,
        };
        assert!(options.load_config().is_err());
    }
}
