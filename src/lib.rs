//! PEV Agent - Plan-Execute-Verify 编排核心
//!
//! 模块划分：
//! - **capabilities**: 能力后端接口、注册表与基于推理服务的默认实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话缓存、编排器与构建器
//! - **llm**: 推理服务客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **pev**: 分类、规划、DAG 执行、校验与主循环

pub mod capabilities;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pev;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{AgentError, AgentResponse, Orchestrator, OrchestratorBuilder};
pub use crate::pev::{classify, Capability, QueryCategory};
