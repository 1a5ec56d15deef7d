//! 核心编排层：错误类型、会话缓存、编排器及其构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use builder::OrchestratorBuilder;
pub use error::AgentError;
pub use orchestrator::{
    escalation_request, AgentResponse, ExecutionStepDetail, HumanEscalationRequest, Orchestrator,
    ScoreDetails,
};
pub use session::{Session, SessionCache, SessionId, SessionInfo, TurnRecord};
