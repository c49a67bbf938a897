//! Node configuration, layered with Figment.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `./spendguard.toml`, or the file named by `SPENDGUARD_CONFIG`
//! 3. `SPENDGUARD_*` environment variables

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use spendguard_core::{Role, User};
use spendguard_insight::{GeminiConfig, GeminiProvider, InsightProvider, ScriptedProvider};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "spendguard.toml";

/// Full node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,

    /// Default tracing filter; `RUST_LOG` wins when set.
    pub log_level: String,

    pub provider: ProviderConfig,

    /// User directory. Requests identify themselves with `x-user-id`.
    pub users: Vec<User>,

    /// Start with store writes disabled.
    pub sandbox_on_start: bool,

    /// Intake sessions older than this are dropped, submitted or not.
    pub intake_session_ttl_secs: u64,
}

impl NodeConfig {
    pub fn intake_session_ttl(&self) -> Duration {
        Duration::from_secs(self.intake_session_ttl_secs)
    }
}

/// Which extraction backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    Scripted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Scripted,
            api_key: None,
            model: spendguard_insight::gemini::DEFAULT_MODEL.to_string(),
            base_url: spendguard_insight::gemini::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    /// Build the configured provider.
    pub fn build(&self) -> spendguard_core::Result<Arc<dyn InsightProvider>> {
        match self.kind {
            ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::demo())),
            ProviderKind::Gemini => {
                let mut config = GeminiConfig::new(self.api_key.clone().unwrap_or_default());
                config.model = self.model.clone();
                config.base_url = self.base_url.clone();
                config.timeout = Duration::from_secs(self.timeout_secs);
                Ok(Arc::new(GeminiProvider::new(config)?))
            }
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let user = |id: &str, name: &str, role: Role| User {
            id: id.to_string(),
            display_name: name.to_string(),
            organization: "demo".to_string(),
            role,
        };
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            log_level: "info".to_string(),
            provider: ProviderConfig::default(),
            users: vec![
                user("submitter", "Sam Submitter", Role::Submitter),
                user("reviewer", "Riley Reviewer", Role::Reviewer),
                user("viewer", "Vic Viewer", Role::Viewer),
            ],
            sandbox_on_start: false,
            intake_session_ttl_secs: 3600,
        }
    }
}

/// Load configuration from the default file (or `SPENDGUARD_CONFIG`) and the environment.
pub fn load_config() -> Result<NodeConfig, figment::Error> {
    let path = std::env::var_os("SPENDGUARD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_config_from_path(&path)
}

/// Load configuration from a specific file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<NodeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NodeConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Load configuration from TOML text only.
pub fn load_config_from_str(toml_content: &str) -> Result<NodeConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(NodeConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// `SPENDGUARD_PROVIDER_API_KEY` maps to `provider.api_key`, not `provider.api.key`.
fn env_provider() -> Env {
    Env::prefixed("SPENDGUARD_")
        .ignore(&["config"])
        .map(|key| key.as_str().replacen("provider_", "provider.", 1).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_scripted_provider() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Scripted);
        assert_eq!(config.users.len(), 3);
        assert!(!config.sandbox_on_start);
        assert_eq!(config.intake_session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_toml_overrides() {
        let config = load_config_from_str(
            r#"
bind_addr = "127.0.0.1:8080"
sandbox_on_start = true
intake_session_ttl_secs = 600

[provider]
kind = "gemini"
api_key = "k"
timeout_secs = 5

[[users]]
id = "ada"
display_name = "Ada"
organization = "acme"
role = "reviewer"
"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert!(config.sandbox_on_start);
        assert_eq!(config.intake_session_ttl_secs, 600);
        assert_eq!(config.provider.kind, ProviderKind::Gemini);
        assert_eq!(config.provider.model, spendguard_insight::gemini::DEFAULT_MODEL);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].role, Role::Reviewer);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(load_config_from_str("bind_adr = \"x\"").is_err());
    }

    #[test]
    fn test_gemini_without_key_fails_to_build() {
        let provider = ProviderConfig {
            kind: ProviderKind::Gemini,
            ..ProviderConfig::default()
        };
        assert!(provider.build().is_err());
    }
}
