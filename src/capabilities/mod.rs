//! 能力层：能力后端 trait、按枚举分派的注册表、基于推理服务的默认后端

pub mod llm_backed;
pub mod registry;

pub use llm_backed::{default_prompt, llm_registry, LlmCapability};
pub use registry::{CapabilityBackend, CapabilityRegistry};
