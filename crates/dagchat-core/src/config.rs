use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Top-level config (dagchat.toml + DAGCHAT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagchatConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for DagchatConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Paths for the two stores. Conversation headers are relational rows;
/// message nodes are document-shaped and live in their own file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_metadata_path")]
    pub metadata_path: String,
    #[serde(default = "default_nodes_path")]
    pub nodes_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            metadata_path: default_metadata_path(),
            nodes_path: default_nodes_path(),
        }
    }
}

/// Per-provider credential slots. Each slot falls back to the provider's
/// conventional environment variables when absent from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub deepseek: Option<ProviderEntry>,
    pub qwen: Option<ProviderEntry>,
    pub kimi: Option<ProviderEntry>,
    pub glm: Option<ProviderEntry>,
}

/// Credentials and endpoint for a single upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    /// Base URL without trailing slash. Auto-filled per provider when unset.
    pub base_url: Option<String>,
}

impl ProvidersConfig {
    /// Resolve `(api_key, base_url)` for a provider slot: config value,
    /// then the named env vars, then the built-in base URL.
    /// Returns `None` when no API key can be found anywhere.
    pub fn resolve(
        entry: &Option<ProviderEntry>,
        key_env: &str,
        url_env: &str,
        default_url: &str,
    ) -> Option<(String, String)> {
        let entry = entry.clone().unwrap_or_default();
        let api_key = entry
            .api_key
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(key_env).ok().filter(|k| !k.is_empty()))?;
        let base_url = entry
            .base_url
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var(url_env).ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| default_url.to_string());
        Some((api_key, base_url.trim_end_matches('/').to_string()))
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_metadata_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dagchat/metadata.db", home)
}
fn default_nodes_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dagchat/nodes.db", home)
}

impl DagchatConfig {
    /// Load config from a TOML file with DAGCHAT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.dagchat/dagchat.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DagchatConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DAGCHAT_").split("_"))
            .extract()
            .map_err(|e| crate::error::DagchatError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.dagchat/dagchat.toml", home)
}
