//! Provider registry — resolves a requested model string to an adapter
//! instance. Lookup is case-insensitive and containment-based so model
//! variants (`"deepseek-chat"`, `"Qwen-Plus"`) match their vendor slot.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use dagchat_core::config::ProvidersConfig;

use crate::deepseek::DeepSeekProvider;
use crate::glm::GlmProvider;
use crate::kimi::KimiProvider;
use crate::provider::{ModelProvider, ProviderError};
use crate::qwen::QwenProvider;

/// A well-known upstream vendor slot.
pub struct KnownProvider {
    /// Short identifier matched against requested model strings.
    pub id: &'static str,
    /// Human-readable display name for the models endpoint.
    pub display_name: &'static str,
    /// API key env var consulted when the config slot is empty.
    pub key_env: &'static str,
    /// Base URL env var consulted when the config slot is empty.
    pub url_env: &'static str,
    /// Base URL without trailing slash, used when nothing else is set.
    pub default_base_url: &'static str,
}

pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        id: "deepseek",
        display_name: "DeepSeek",
        key_env: "DEEPSEEK_API_KEY",
        url_env: "DEEPSEEK_API_BASE_URL",
        default_base_url: "https://api.deepseek.com",
    },
    KnownProvider {
        id: "qwen",
        display_name: "Qwen",
        key_env: "QWEN_API_KEY",
        url_env: "QWEN_API_BASE_URL",
        default_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
    },
    KnownProvider {
        id: "kimi",
        display_name: "Kimi",
        key_env: "KIMI_API_KEY",
        url_env: "KIMI_API_BASE_URL",
        default_base_url: "https://api.moonshot.cn/v1",
    },
    KnownProvider {
        id: "glm",
        display_name: "GLM",
        key_env: "GLM_API_KEY",
        url_env: "GLM_API_BASE_URL",
        default_base_url: "https://open.bigmodel.cn/api/paas/v4",
    },
];

/// Process-wide adapter registry with lazy instantiation.
///
/// Instances are cached per normalized model string. The cache is
/// write-once per name; racing creations are acceptable (one wins, the
/// loser's instance is discarded).
pub struct ProviderRegistry {
    config: ProvidersConfig,
    instances: DashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new(config: ProvidersConfig) -> Self {
        Self {
            config,
            instances: DashMap::new(),
        }
    }

    /// Resolve a requested model string to an adapter instance, creating
    /// and caching it on first use. Returns `None` for unknown models and
    /// for adapters whose construction fails (missing credentials).
    pub fn get(&self, model_name: &str) -> Option<Arc<dyn ModelProvider>> {
        let normalized = model_name.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if let Some(instance) = self.instances.get(&normalized) {
            return Some(instance.clone());
        }

        let known = KNOWN_PROVIDERS
            .iter()
            .find(|p| normalized.contains(p.id))?;

        match self.build(known) {
            Ok(instance) => {
                info!(provider = known.id, model = %model_name, "created provider instance");
                self.instances.insert(normalized, instance.clone());
                Some(instance)
            }
            Err(e) => {
                error!(provider = known.id, error = %e, "provider construction failed");
                None
            }
        }
    }

    fn build(&self, known: &KnownProvider) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let slot = match known.id {
            "deepseek" => &self.config.deepseek,
            "qwen" => &self.config.qwen,
            "kimi" => &self.config.kimi,
            "glm" => &self.config.glm,
            other => {
                warn!(provider = other, "no config slot for provider");
                &None
            }
        };

        let (api_key, base_url) =
            ProvidersConfig::resolve(slot, known.key_env, known.url_env, known.default_base_url)
                .ok_or_else(|| ProviderError::MissingCredentials(known.id.to_string()))?;

        let instance: Arc<dyn ModelProvider> = match known.id {
            "deepseek" => Arc::new(DeepSeekProvider::new(api_key, base_url)?),
            "qwen" => Arc::new(QwenProvider::new(api_key, base_url)?),
            "kimi" => Arc::new(KimiProvider::new(api_key, base_url)?),
            "glm" => Arc::new(GlmProvider::new(api_key, base_url)?),
            other => return Err(ProviderError::MissingCredentials(other.to_string())),
        };
        Ok(instance)
    }
}
