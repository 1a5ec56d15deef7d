//! LLM 客户端抽象
//!
//! 所有推理服务后端（OpenAI 兼容 / DeepSeek / Mock / Scripted）实现 LlmClient::complete。
//! Planner、Verifier 与基于 LLM 的能力后端都只依赖这个 trait。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 推理服务调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
