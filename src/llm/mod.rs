//! LLM 层：推理服务客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

use crate::config::AppConfig;
use crate::core::AgentError;

/// 根据配置选择推理服务后端（openai / deepseek / mock）
///
/// 缺少 API Key 或 provider 未知属于配置故障，构造阶段直接失败，不回退到 Mock。
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;

    match provider.as_str() {
        "openai" => {
            let api_key = cfg
                .llm
                .resolve_api_key("OPENAI_API_KEY")
                .ok_or_else(|| AgentError::ConfigError("OPENAI_API_KEY is required for provider openai".to_string()))?;
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &api_key,
                timeout,
            )))
        }
        "deepseek" => {
            let api_key = cfg
                .llm
                .resolve_api_key("DEEPSEEK_API_KEY")
                .ok_or_else(|| AgentError::ConfigError("DEEPSEEK_API_KEY is required for provider deepseek".to_string()))?;
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Ok(Arc::new(create_deepseek_client(Some(&cfg.llm.model), &api_key, timeout)))
        }
        "mock" => {
            tracing::warn!("Using Mock LLM, responses are echoes");
            Ok(Arc::new(MockLlmClient))
        }
        other => Err(AgentError::ConfigError(format!("unknown llm provider: {other}"))),
    }
}
