pub mod deepseek;
pub mod glm;
pub mod kimi;
pub mod openai_compat;
pub mod provider;
pub mod qwen;
pub mod registry;

pub use provider::{ModelProvider, ProviderError, StreamEvent};
pub use registry::{ProviderRegistry, KNOWN_PROVIDERS};
