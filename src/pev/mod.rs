//! PEV 编排核心：分类、规划、执行、校验与主循环
//!
//! - classifier：查询 → 类别与处理配置
//! - planner / json / normalize：推理服务输出 → 严格的 Plan
//! - executor：DAG 分波并发执行
//! - verifier：三维评分与决策重推导
//! - loop_：迭代与时间预算下的 Plan → Execute → Verify

pub mod classifier;
pub mod executor;
pub mod json;
pub mod loop_;
pub mod normalize;
pub mod planner;
pub mod types;
pub mod verifier;

pub use classifier::{classify, CategoryConfig, QueryCategory};
pub use executor::Executor;
pub use loop_::{Attempt, LoopExit, PevBudget, PevLoop, PevOutcome};
pub use planner::Planner;
pub use types::{
    Capability, Complexity, Decision, ExecutionResult, Issue, Plan, PlanError, Score, Severity,
    Step, StepResult, StepStatus, VerificationResult, ACCEPT_THRESHOLD,
};
pub use verifier::{finalize, Verifier};
