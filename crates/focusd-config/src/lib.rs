//! # focusd configuration
//!
//! YAML-based configuration with sensible defaults and validation. The
//! blocklist can live inline in the config (`blockedDomains`) or in a
//! separate YAML file (`blocklistPath`); the inline list wins when it is
//! non-empty.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("blocklist unavailable at {path}: {source}")]
    BlocklistUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main focusd configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Inline blocklist; takes precedence over `blocklist_path` when
    /// non-empty.
    pub blocked_domains: Vec<String>,

    /// Path to a YAML blocklist file of shape `{domains: [..]}`.
    /// `~` is expanded.
    pub blocklist_path: String,

    /// Cadence of the periodic IP-drop refresh, in minutes.
    pub refresh_interval_minutes: u64,

    /// Glob pattern locating the USB key file.
    pub usb_key_path: String,

    /// Path to the expected token digest file (sha256sum format).
    pub token_hash_path: PathBuf,

    /// Where the dnsmasq sinkhole configuration is written.
    pub dnsmasq_config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocked_domains: Vec::new(),
            blocklist_path: "~/.config/focusd/blocklist.yml".to_string(),
            refresh_interval_minutes: 60,
            usb_key_path: "/run/media/*/FOCUSD/focusd.key".to_string(),
            token_hash_path: PathBuf::from("/etc/focusd/token.sha256"),
            dnsmasq_config_path: PathBuf::from("/run/focusd/dnsmasq.conf"),
        }
    }
}

/// Shape of the standalone blocklist file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlocklistFile {
    /// Domains to block.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;

        if config.blocklist_path.is_empty() {
            config.blocklist_path = Config::default().blocklist_path;
        }
        config.blocklist_path = expand_tilde(&config.blocklist_path);

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.blocklist_path = expand_tilde(&config.blocklist_path);
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_minutes < 1 {
            return Err(ConfigError::InvalidValue {
                field: "refreshIntervalMinutes".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.usb_key_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "usbKeyPath".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        if self.token_hash_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tokenHashPath".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        if self.dnsmasq_config_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dnsmasqConfigPath".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Loads the effective blocklist.
    ///
    /// The inline `blockedDomains` list wins when non-empty; otherwise the
    /// blocklist file is read. An empty list from either source is valid —
    /// nothing is blocked, but the data plane still runs.
    pub fn load_blocklist(&self) -> Result<Vec<String>> {
        if !self.blocked_domains.is_empty() {
            return Ok(self.blocked_domains.clone());
        }

        let path = PathBuf::from(&self.blocklist_path);
        let content =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::BlocklistUnavailable {
                path: path.clone(),
                source,
            })?;

        let file: BlocklistFile = serde_yaml::from_str(&content)?;
        Ok(file.domains)
    }

    /// Returns the refresh interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes * 60)
    }
}

/// Expands a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_string();
    };

    match dirs::home_dir() {
        Some(home) => {
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            home.join(rest).to_string_lossy().into_owned()
        }
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_interval_minutes, 60);
        assert_eq!(config.refresh_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_documented_keys() {
        let yaml = r#"
blockedDomains:
  - youtube.com
  - reddit.com
refreshIntervalMinutes: 15
usbKeyPath: "/media/*/KEY/focusd.key"
tokenHashPath: "/etc/focusd/token.sha256"
dnsmasqConfigPath: "/run/focusd/dnsmasq.conf"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.blocked_domains, vec!["youtube.com", "reddit.com"]);
        assert_eq!(config.refresh_interval_minutes, 15);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = Config::from_yaml("refreshIntervalMinutes: 5").unwrap();
        assert_eq!(config.refresh_interval_minutes, 5);
        assert_eq!(config.usb_key_path, Config::default().usb_key_path);
        assert!(config.blocked_domains.is_empty());
    }

    #[test]
    fn zero_refresh_interval_rejected() {
        let err = Config::from_yaml("refreshIntervalMinutes: 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "refreshIntervalMinutes"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Config::from_file("/nonexistent/focusd.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn inline_blocklist_wins() {
        let config = Config {
            blocked_domains: vec!["youtube.com".to_string()],
            blocklist_path: "/nonexistent/blocklist.yml".to_string(),
            ..Config::default()
        };
        assert_eq!(config.load_blocklist().unwrap(), vec!["youtube.com"]);
    }

    #[test]
    fn blocklist_file_read_when_inline_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "domains:\n  - example.com\n  - news.ycombinator.com").unwrap();

        let config = Config {
            blocklist_path: file.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        assert_eq!(
            config.load_blocklist().unwrap(),
            vec!["example.com", "news.ycombinator.com"]
        );
    }

    #[test]
    fn empty_blocklist_file_is_valid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "domains: []").unwrap();

        let config = Config {
            blocklist_path: file.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        assert!(config.load_blocklist().unwrap().is_empty());
    }

    #[test]
    fn missing_blocklist_file_is_unavailable() {
        let config = Config {
            blocklist_path: "/nonexistent/blocklist.yml".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.load_blocklist(),
            Err(ConfigError::BlocklistUnavailable { .. })
        ));
    }

    #[test]
    fn tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_tilde("~/.config/focusd/blocklist.yml");
            assert!(expanded.starts_with(home.to_string_lossy().as_ref()));
            assert!(expanded.ends_with(".config/focusd/blocklist.yml"));
        }
        assert_eq!(expand_tilde("/etc/focusd"), "/etc/focusd");
    }

    #[test]
    fn yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.refresh_interval_minutes, config.refresh_interval_minutes);
        assert_eq!(parsed.usb_key_path, config.usb_key_path);
    }
}
