//! 能力注册表
//!
//! 所有能力后端实现 CapabilityBackend（capability / description / invoke），由 CapabilityRegistry
//! 按枚举注册与查找；Executor 在调用时加超时并统一转为失败的 StepResult。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::pev::Capability;

/// 能力后端 trait：文本进、文本出
#[async_trait]
pub trait CapabilityBackend: Send + Sync {
    /// 该后端负责的能力
    fn capability(&self) -> Capability;

    fn description(&self) -> &str {
        ""
    }

    /// 调用能力；失败原因以字符串返回
    async fn invoke(&self, query: &str) -> Result<String, String>;
}

/// 能力注册表：按 Capability 存储 Arc<dyn CapabilityBackend>，在编排器构造时一次性建立
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    backends: HashMap<Capability, Arc<dyn CapabilityBackend>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut caps: Vec<&Capability> = self.backends.keys().collect();
        caps.sort();
        f.debug_struct("CapabilityRegistry")
            .field("backends", &caps)
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册后端；同一能力重复注册时后者覆盖前者
    pub fn register(&mut self, backend: impl CapabilityBackend + 'static) {
        self.register_arc(Arc::new(backend));
    }

    pub fn register_arc(&mut self, backend: Arc<dyn CapabilityBackend>) {
        let capability = backend.capability();
        if self.backends.insert(capability, backend).is_some() {
            tracing::warn!("Capability backend for {} replaced", capability);
        }
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn CapabilityBackend>> {
        self.backends.get(&capability).cloned()
    }

    pub async fn invoke(&self, capability: Capability, query: &str) -> Result<String, String> {
        let backend = self
            .get(capability)
            .ok_or_else(|| format!("No backend registered for capability: {capability}"))?;
        backend.invoke(query).await
    }

    /// 已注册的能力（按枚举顺序）
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.backends.contains_key(c))
            .collect()
    }

    /// 尚未注册的能力
    pub fn missing(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| !self.backends.contains_key(c))
            .collect()
    }

    /// 返回 (name, description) 列表
    pub fn descriptions(&self) -> Vec<(Capability, String)> {
        self.capabilities()
            .into_iter()
            .filter_map(|c| self.backends.get(&c).map(|b| (c, b.description().to_string())))
            .collect()
    }
}
