//! 基于推理服务的能力后端
//!
//! 每个能力一个 system prompt，查询作为 User 消息发给同一个 LlmClient。
//! prompt 可由 `[capabilities]` 配置中的文件覆盖。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::{CapabilityBackend, CapabilityRegistry};
use crate::config::CapabilitiesSection;
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::pev::Capability;

const LOOKUP_PROMPT: &str = "You are a documentation lookup assistant for cloud engineering. \
Answer from official documentation, be precise, and cite the documents or pages you rely on. \
If the documentation does not cover the question, say so instead of guessing.";

const DESIGN_GUIDANCE_PROMPT: &str = "You are a cloud solution architect. \
Give design guidance and best-practice recommendations, name the trade-offs, \
and relate each recommendation to reliability, security, cost, operations or performance.";

const CODE_GENERATION_PROMPT: &str = "You are a senior cloud engineer. \
Produce working code, CLI commands or infrastructure-as-code templates in fenced code blocks, \
followed by a short explanation of parameters and prerequisites.";

/// 内置 system prompt
pub fn default_prompt(capability: Capability) -> &'static str {
    match capability {
        Capability::Lookup => LOOKUP_PROMPT,
        Capability::DesignGuidance => DESIGN_GUIDANCE_PROMPT,
        Capability::CodeGeneration => CODE_GENERATION_PROMPT,
    }
}

/// 推理服务驱动的能力后端
pub struct LlmCapability {
    capability: Capability,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmCapability {
    pub fn new(capability: Capability, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            capability,
            llm,
            system_prompt: default_prompt(capability).to_string(),
        }
    }

    pub fn with_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }
}

#[async_trait]
impl CapabilityBackend for LlmCapability {
    fn capability(&self) -> Capability {
        self.capability
    }

    fn description(&self) -> &str {
        match self.capability {
            Capability::Lookup => "Documentation lookup with citations",
            Capability::DesignGuidance => "Architecture and best-practice guidance",
            Capability::CodeGeneration => "Code, CLI and infrastructure template generation",
        }
    }

    async fn invoke(&self, query: &str) -> Result<String, String> {
        let messages = [
            Message::system(self.system_prompt.clone()),
            Message::user(query),
        ];
        self.llm.complete(&messages).await.map_err(|e| e.to_string())
    }
}

fn prompt_override(section: &CapabilitiesSection, capability: Capability) -> Option<&Path> {
    match capability {
        Capability::Lookup => section.lookup_prompt.as_deref(),
        Capability::DesignGuidance => section.design_guidance_prompt.as_deref(),
        Capability::CodeGeneration => section.code_generation_prompt.as_deref(),
    }
}

/// 为三个能力各注册一个 LlmCapability；配置的 prompt 文件不可读属于配置故障
pub fn llm_registry(
    llm: Arc<dyn LlmClient>,
    section: &CapabilitiesSection,
) -> Result<CapabilityRegistry, AgentError> {
    let mut registry = CapabilityRegistry::new();
    for capability in Capability::ALL {
        let mut backend = LlmCapability::new(capability, llm.clone());
        if let Some(path) = prompt_override(section, capability) {
            let prompt = std::fs::read_to_string(path).map_err(|e| {
                AgentError::ConfigError(format!(
                    "cannot read {capability} prompt {}: {e}",
                    path.display()
                ))
            })?;
            tracing::info!("Loaded {} prompt from {}", capability, path.display());
            backend = backend.with_prompt(prompt);
        }
        registry.register(backend);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use std::io::Write;
    use std::sync::Mutex;

    /// 记录收到的 system prompt
    #[derive(Default)]
    struct SystemRecorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for SystemRecorder {
        async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
            if let Some(first) = messages.first() {
                self.seen.lock().unwrap().push(first.content.clone());
            }
            Ok("ok".to_string())
        }
    }

    #[tokio::test]
    async fn test_invoke_sends_query_to_llm() {
        let llm = Arc::new(ScriptedLlmClient::new(["answer with citations"]));
        let cap = LlmCapability::new(Capability::Lookup, llm.clone());
        assert_eq!(cap.invoke("what is vnet").await.unwrap(), "answer with citations");
        assert_eq!(llm.prompts(), vec!["what is vnet".to_string()]);
    }

    #[tokio::test]
    async fn test_llm_error_becomes_string() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let cap = LlmCapability::new(Capability::CodeGeneration, llm);
        let err = cap.invoke("x").await.unwrap_err();
        assert!(err.contains("exhausted"));
    }

    #[tokio::test]
    async fn test_registry_covers_all_capabilities_with_prompt_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "custom design prompt").unwrap();
        let section = CapabilitiesSection {
            design_guidance_prompt: Some(file.path().to_path_buf()),
            ..CapabilitiesSection::default()
        };

        let llm = Arc::new(SystemRecorder::default());
        let registry = llm_registry(llm.clone(), &section).unwrap();
        assert!(registry.missing().is_empty());
        assert_eq!(registry.capabilities().len(), 3);

        registry.invoke(Capability::DesignGuidance, "q").await.unwrap();
        registry.invoke(Capability::Lookup, "q").await.unwrap();
        let seen = llm.seen.lock().unwrap().clone();
        assert_eq!(seen[0], "custom design prompt");
        assert_eq!(seen[1], default_prompt(Capability::Lookup));
    }

    #[test]
    fn test_unreadable_prompt_is_config_error() {
        let section = CapabilitiesSection {
            lookup_prompt: Some("/nonexistent/pev/lookup.md".into()),
            ..CapabilitiesSection::default()
        };
        let err = llm_registry(Arc::new(ScriptedLlmClient::new(["x"])), &section).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }
}
