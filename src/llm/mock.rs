//! Mock LLM 客户端（用于测试与本地演练，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息
//! - ScriptedLlmClient：按顺序返回预设回复，并记录收到的 prompt，便于断言 Planner / Verifier 的行为

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(format!("Echo from Mock: {}", last_user(messages)))
    }
}

/// 预设回复客户端：队列耗尽后返回 fallback（未设置时返回 ApiError）
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 队列耗尽后一直返回该回复
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// 追加一次失败的调用
    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    /// 已收到的 User prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user(messages).to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::ApiError("scripted replies exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let reply = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("hello")])
            .await
            .unwrap();
        assert_eq!(reply, "Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order_then_fallback() {
        let llm = ScriptedLlmClient::new(["one", "two"]).with_fallback("rest");
        let msgs = [Message::user("q")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "one");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "two");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "rest");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_exhausted_without_fallback_errors() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new());
        let err = llm.complete(&[Message::user("q")]).await.unwrap_err();
        assert!(matches!(err, LlmError::ApiError(_)));
    }
}
