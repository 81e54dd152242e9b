use log::warn;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ValidationError;

pub const ENV_REMOTE_URL: &str = "GAUNTLET_REMOTE_URL";
pub const ENV_REMOTE_ANON_KEY: &str = "GAUNTLET_REMOTE_ANON_KEY";
pub const ENV_REMOTE_SERVICE_KEY: &str = "GAUNTLET_REMOTE_SERVICE_KEY";
pub const ENV_PROJECT_ID: &str = "GAUNTLET_PROJECT_ID";
pub const ENV_PROVIDER: &str = "GAUNTLET_PROVIDER";
pub const ENV_DEFAULT_PRIVACY: &str = "GAUNTLET_DEFAULT_PRIVACY";
pub const ENV_AUTO_SHARE: &str = "GAUNTLET_AUTO_SHARE";
pub const ENV_AUTO_IMPORT: &str = "GAUNTLET_AUTO_IMPORT";
pub const ENV_SYNC_INTERVAL_MS: &str = "GAUNTLET_SYNC_INTERVAL_MS";

/// Which persistence provider the fleet runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Local,
    Remote,
    Hybrid,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "remote" => Ok(ProviderKind::Remote),
            "hybrid" => Ok(ProviderKind::Hybrid),
            other => Err(format!("unknown provider kind '{}'", other)),
        }
    }
}

/// Default sharing level for newly stored memory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    #[default]
    Private,
    Team,
    Public,
}

impl FromStr for PrivacyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(PrivacyLevel::Private),
            "team" => Ok(PrivacyLevel::Team),
            "public" => Ok(PrivacyLevel::Public),
            other => Err(format!("unknown privacy level '{}'", other)),
        }
    }
}

/// Fleet-wide configuration resolved from environment variables.
///
/// Unset variables fall back to defaults; unparsable values are logged and
/// ignored rather than failing startup. `validate` catches the combinations
/// that cannot work at all (remote/hybrid without credentials).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    pub remote_url: Option<String>,
    pub remote_anon_key: Option<String>,
    pub remote_service_key: Option<String>,
    pub project_id: Option<String>,
    pub provider: ProviderKind,
    pub default_privacy: PrivacyLevel,
    pub auto_share: bool,
    pub auto_import: bool,
    pub sync_interval_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_anon_key: None,
            remote_service_key: None,
            project_id: None,
            provider: ProviderKind::Local,
            default_privacy: PrivacyLevel::Private,
            auto_share: false,
            auto_import: false,
            sync_interval_ms: 30_000,
        }
    }
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.remote_url = read_var(ENV_REMOTE_URL);
        config.remote_anon_key = read_var(ENV_REMOTE_ANON_KEY);
        config.remote_service_key = read_var(ENV_REMOTE_SERVICE_KEY);
        config.project_id = read_var(ENV_PROJECT_ID);

        if let Some(raw) = read_var(ENV_PROVIDER) {
            match raw.parse() {
                Ok(kind) => config.provider = kind,
                Err(e) => warn!("{}: {}, keeping {:?}", ENV_PROVIDER, e, config.provider),
            }
        }
        if let Some(raw) = read_var(ENV_DEFAULT_PRIVACY) {
            match raw.parse() {
                Ok(level) => config.default_privacy = level,
                Err(e) => warn!(
                    "{}: {}, keeping {:?}",
                    ENV_DEFAULT_PRIVACY, e, config.default_privacy
                ),
            }
        }
        if let Some(raw) = read_var(ENV_AUTO_SHARE) {
            config.auto_share = parse_bool(&raw, ENV_AUTO_SHARE, config.auto_share);
        }
        if let Some(raw) = read_var(ENV_AUTO_IMPORT) {
            config.auto_import = parse_bool(&raw, ENV_AUTO_IMPORT, config.auto_import);
        }
        if let Some(raw) = read_var(ENV_SYNC_INTERVAL_MS) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.sync_interval_ms = ms,
                _ => warn!(
                    "{}: '{}' is not a positive integer, keeping {}",
                    ENV_SYNC_INTERVAL_MS, raw, config.sync_interval_ms
                ),
            }
        }

        config
    }

    /// Whether the configuration names a reachable remote store.
    pub fn has_remote(&self) -> bool {
        self.remote_url.is_some() && self.remote_anon_key.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.provider {
            ProviderKind::Local => Ok(()),
            ProviderKind::Remote | ProviderKind::Hybrid => {
                if self.has_remote() {
                    Ok(())
                } else {
                    Err(ValidationError::Configuration(format!(
                        "{:?} provider requires {} and {}",
                        self.provider, ENV_REMOTE_URL, ENV_REMOTE_ANON_KEY
                    )))
                }
            }
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(raw: &str, name: &str, default: bool) -> bool {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!("{}: '{}' is not a boolean, keeping {}", name, other, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.provider, ProviderKind::Local);
        assert_eq!(config.default_privacy, PrivacyLevel::Private);
        assert_eq!(config.sync_interval_ms, 30_000);
        assert!(!config.has_remote());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("hybrid".parse::<ProviderKind>().unwrap(), ProviderKind::Hybrid);
        assert_eq!("LOCAL".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!("cloud".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_privacy_level_parsing() {
        assert_eq!("team".parse::<PrivacyLevel>().unwrap(), PrivacyLevel::Team);
        assert!("secret".parse::<PrivacyLevel>().is_err());
    }

    #[test]
    fn test_hybrid_requires_credentials() {
        let config = FleetConfig {
            provider: ProviderKind::Hybrid,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FleetConfig {
            provider: ProviderKind::Hybrid,
            remote_url: Some("https://remote.example.com".to_string()),
            remote_anon_key: Some("anon".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", "X", false));
        assert!(parse_bool("1", "X", false));
        assert!(!parse_bool("off", "X", true));
        // Unparsable input keeps the default.
        assert!(parse_bool("maybe", "X", true));
    }
}
