//! Configuration loading and persistence.
//!
//! Settings live in `config.json` in the config directory. Environment
//! variables override the file. Credentials are never stored here; they go
//! through [`crate::credentials`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::constants::{PUSH_MAX_RECONNECT_ATTEMPTS, PUSH_PATH};
use crate::push::{http_to_ws_scheme, PushConfig};
use crate::session::AccountPolicy;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the courier client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend.
    pub server_url: String,
    /// Push endpoint. Derived from `server_url` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_url: Option<String>,
    /// Timeout in seconds for each HTTP call.
    pub request_timeout_secs: u64,
    /// Timeout in seconds for one credential renewal attempt.
    pub renewal_timeout_secs: u64,
    /// Consecutive failed push connection attempts before giving up.
    pub push_max_reconnect_attempts: u32,
    /// Roles that may not hold a session.
    pub disallowed_roles: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            push_url: None,
            request_timeout_secs: crate::constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            renewal_timeout_secs: crate::constants::RENEWAL_TIMEOUT.as_secs(),
            push_max_reconnect_attempts: PUSH_MAX_RECONNECT_ATTEMPTS,
            disallowed_roles: Vec::new(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `COURIER_CONFIG_DIR` wins; otherwise the platform config dir
    /// (macOS: ~/Library/Application Support/courier).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("COURIER_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("courier")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `config.json` from `dir` without environment overrides.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Apply `COURIER_*` overrides read through `lookup`. Unparseable numbers
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("COURIER_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(push_url) = lookup("COURIER_PUSH_URL") {
            self.push_url = Some(push_url);
        }

        if let Some(timeout) = lookup("COURIER_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.request_timeout_secs = secs;
            }
        }

        if let Some(timeout) = lookup("COURIER_RENEWAL_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.renewal_timeout_secs = secs;
            }
        }

        if let Some(roles) = lookup("COURIER_DISALLOWED_ROLES") {
            self.disallowed_roles = roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Persists the configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the configuration to `dir/config.json` (owner read/write only).
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Push endpoint: `push_url`, else `server_url` with a ws scheme and
    /// `/push` appended.
    pub fn push_url(&self) -> String {
        self.push_url.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                http_to_ws_scheme(self.server_url.trim_end_matches('/')),
                PUSH_PATH
            )
        })
    }

    /// HTTP call timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Renewal attempt timeout.
    pub fn renewal_timeout(&self) -> Duration {
        Duration::from_secs(self.renewal_timeout_secs)
    }

    /// Push channel settings.
    pub fn push_config(&self) -> PushConfig {
        PushConfig {
            max_reconnect_attempts: self.push_max_reconnect_attempts,
            ..PushConfig::new(self.push_url())
        }
    }

    /// Account policy built from `disallowed_roles`.
    pub fn account_policy(&self) -> AccountPolicy {
        AccountPolicy::deny_roles(self.disallowed_roles.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::credentials::Profile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.renewal_timeout(), Duration::from_secs(15));
        assert_eq!(config.push_url(), "ws://localhost:3000/push");
    }

    #[test]
    fn test_push_url_follows_server_scheme() {
        let config = Config {
            server_url: "https://api.example.com/".into(),
            ..Config::default()
        };
        assert_eq!(config.push_url(), "wss://api.example.com/push");
        assert_eq!(config.push_config().url, "wss://api.example.com/push");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COURIER_SERVER_URL", "https://staging.example.com"),
            ("COURIER_REQUEST_TIMEOUT", "3"),
            ("COURIER_RENEWAL_TIMEOUT", "not-a-number"),
            ("COURIER_DISALLOWED_ROLES", "guest, kiosk,,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.server_url, "https://staging.example.com");
        assert_eq!(config.request_timeout_secs, 3);
        assert_eq!(config.renewal_timeout_secs, 15);
        assert_eq!(config.disallowed_roles, vec!["guest", "kiosk"]);
        assert!(!config
            .account_policy()
            .permits(&Profile::new("1").with_role("kiosk")));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            server_url: "https://example.com".into(),
            push_url: Some("wss://push.example.com/ws".into()),
            disallowed_roles: vec!["guest".into()],
            ..Config::default()
        };
        config.save_to(dir.path()).unwrap();

        assert_eq!(Config::load_from(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_missing_file_yields_defaults_and_partial_file_fills_in() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(dir.path()).unwrap(), Config::default());

        fs::write(dir.path().join("config.json"), r#"{"server_url":"https://x.test"}"#).unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.server_url, "https://x.test");
        assert_eq!(config.push_max_reconnect_attempts, PUSH_MAX_RECONNECT_ATTEMPTS);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{not json").unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }
}
