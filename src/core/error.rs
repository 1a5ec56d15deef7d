//! 编排错误类型
//!
//! 与 PEV 循环配合：可恢复的故障（格式错误的输出、步骤失败、预算耗尽）在各组件内部消化，
//! 只有规划故障会中断当前迭代；配置故障在构造阶段直接失败。

use thiserror::Error;

use crate::llm::LlmError;
use crate::pev::PlanError;

/// 编排过程中可能出现的错误（配置、推理服务、解析、计划结构、能力调用）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// 推理服务的回复中找不到任何 JSON 对象
    #[error("No JSON object found in response: {0}")]
    NoJsonObject(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Step timeout: {0}")]
    StepTimeout(String),

    #[error("Capability failed: {0}")]
    CapabilityFailed(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
}

impl AgentError {
    /// 是否属于规划故障（当前迭代无法继续，由 PEV 循环做尽力而为的收尾）
    pub fn is_planning_fault(&self) -> bool {
        matches!(
            self,
            AgentError::NoJsonObject(_)
                | AgentError::JsonParseError(_)
                | AgentError::InvalidPlan(_)
                | AgentError::LlmError(_)
        )
    }
}
