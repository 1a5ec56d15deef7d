//! 编排器构建器：统一的初始化逻辑
//!
//! CLI、HTTP 服务与测试共用同一套装配：配置校验 → 推理服务客户端 → 能力注册表 → 编排器。
//! 未显式提供的组件按配置创建。

use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{llm_registry, CapabilityRegistry};
use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::pev::{Executor, PevBudget, Planner, Verifier};

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<CapabilityRegistry>,
    budget: Option<PevBudget>,
    step_timeout: Option<Duration>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
            budget: None,
            step_timeout: None,
        }
    }

    /// 使用指定的推理服务客户端（不再按 `[llm]` 创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 使用指定的能力注册表（不再创建基于推理服务的默认后端）
    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_budget(mut self, budget: PevBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = Some(step_timeout);
        self
    }

    /// 构建编排器；配置非法、缺少 API Key 或有能力未注册时失败
    pub fn build(self) -> Result<Orchestrator, AgentError> {
        self.config.validate()?;

        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config)?,
        };
        let registry = match self.registry {
            Some(registry) => registry,
            None => llm_registry(llm.clone(), &self.config.capabilities)?,
        };
        let missing = registry.missing();
        if !missing.is_empty() {
            return Err(AgentError::ConfigError(format!(
                "no backend registered for capabilities: {missing:?}"
            )));
        }

        let step_timeout = self
            .step_timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.pev.step_timeout_secs));
        let budget = self
            .budget
            .unwrap_or_else(|| PevBudget::from_section(&self.config.pev));

        for (capability, description) in registry.descriptions() {
            tracing::debug!("Capability {}: {}", capability, description);
        }
        tracing::info!(
            "Orchestrator ready: capabilities {:?}, step timeout {:?}, max sessions {}",
            registry.capabilities(),
            step_timeout,
            self.config.app.max_sessions
        );

        Ok(Orchestrator::new(
            Planner::new(llm.clone()),
            Executor::with_timeout(Arc::new(registry), step_timeout),
            Verifier::new(llm),
            budget,
            self.config.app.max_sessions,
        ))
    }
}
