//! 会话缓存
//!
//! 有容量上限的 LRU：HashMap 存会话，BTreeMap<访问序号, id> 记录最近使用顺序。
//! 每个操作（查找 / 插入 / 淘汰 / 移到最近）在同一把 tokio Mutex 内完成。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::pev::{ExecutionResult, Plan, QueryCategory, VerificationResult};

pub type SessionId = String;

/// 单个会话：轮次与上一轮的计划 / 结果 / 校验
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub turn_count: u32,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub updated_at: i64,
    pub category: Option<QueryCategory>,
    pub fast_path: bool,
    /// 上一轮实际执行的 PEV 迭代次数（快速路径为 1）
    pub last_iterations: u32,
    pub last_plan: Option<Plan>,
    pub last_result: Option<ExecutionResult>,
    pub last_verification: Option<VerificationResult>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            turn_count: 1,
            created_at: now,
            updated_at: now,
            category: None,
            fast_path: false,
            last_iterations: 0,
            last_plan: None,
            last_result: None,
            last_verification: None,
        }
    }

    pub fn has_context(&self) -> bool {
        self.last_result.is_some()
    }
}

/// 一轮结束时写回会话的内容
#[derive(Debug, Clone)]
pub struct TurnRecord {
    /// begin_turn 返回的轮次
    pub turn_count: u32,
    pub category: QueryCategory,
    pub fast_path: bool,
    pub iterations_used: u32,
    pub plan: Option<Plan>,
    pub result: Option<ExecutionResult>,
    pub verification: Option<VerificationResult>,
}

/// 会话概要（对外查询用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub turn_count: u32,
    pub has_context: bool,
    pub active: bool,
}

#[derive(Default)]
struct LruState {
    sessions: HashMap<SessionId, (u64, Session)>,
    /// 访问序号 → 会话 id，最小序号即最久未使用
    order: BTreeMap<u64, SessionId>,
    tick: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// 移到最近使用位置
    fn touch(&mut self, id: &str) -> Option<&mut Session> {
        let tick = self.next_tick();
        let (old_tick, session) = self.sessions.get_mut(id)?;
        self.order.remove(&*old_tick);
        *old_tick = tick;
        self.order.insert(tick, id.to_string());
        session.updated_at = chrono::Utc::now().timestamp_millis();
        Some(session)
    }

    /// 插入新会话，达到容量时先淘汰最久未使用的
    fn insert(&mut self, session: Session, capacity: usize) {
        while self.sessions.len() >= capacity {
            let Some((_, evicted)) = self.order.pop_first() else {
                break;
            };
            self.sessions.remove(&evicted);
            tracing::debug!("Evicted least recently used session {}", evicted);
        }
        let tick = self.next_tick();
        self.order.insert(tick, session.id.clone());
        self.sessions.insert(session.id.clone(), (tick, session));
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((tick, _)) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }
}

/// 有容量上限的 LRU 会话缓存，由编排器实例持有
pub struct SessionCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 开始一轮：无 id 时生成新 UUID；已有会话轮次 +1 并移到最近；未知 id 以轮次 1 新建
    pub async fn begin_turn(&self, session_id: Option<&str>) -> (SessionId, u32) {
        let mut state = self.state.lock().await;
        let requested = session_id.map(str::trim).filter(|id| !id.is_empty());

        if let Some(id) = requested {
            if let Some(session) = state.touch(id) {
                session.turn_count += 1;
                return (session.id.clone(), session.turn_count);
            }
        }

        let id = requested
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        state.insert(Session::new(id.clone()), self.capacity);
        tracing::info!("Created session {}", id);
        (id, 1)
    }

    /// 写回本轮结果；会话在本轮期间被淘汰时按原轮次重新插入
    pub async fn complete_turn(&self, session_id: &str, record: TurnRecord) {
        let mut state = self.state.lock().await;
        if state.touch(session_id).is_none() {
            tracing::debug!("Session {} was evicted mid-turn, restoring", session_id);
            state.insert(Session::new(session_id.to_string()), self.capacity);
        }
        if let Some((_, session)) = state.sessions.get_mut(session_id) {
            session.turn_count = session.turn_count.max(record.turn_count);
            session.category = Some(record.category);
            session.fast_path = record.fast_path;
            session.last_iterations = record.iterations_used;
            session.last_plan = record.plan;
            session.last_result = record.result;
            session.last_verification = record.verification;
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let state = self.state.lock().await;
        state.sessions.get(session_id).map(|(_, s)| s.clone())
    }

    pub async fn info(&self, session_id: &str) -> Option<SessionInfo> {
        let state = self.state.lock().await;
        state.sessions.get(session_id).map(|(_, s)| SessionInfo {
            session_id: s.id.clone(),
            turn_count: s.turn_count,
            has_context: s.has_context(),
            active: true,
        })
    }

    pub async fn clear(&self, session_id: &str) -> bool {
        let removed = self.state.lock().await.remove(session_id);
        if removed {
            tracing::info!("Cleared session {}", session_id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_id_mints_uuid() {
        let cache = SessionCache::new(10);
        let (id, turn) = cache.begin_turn(None).await;
        assert_eq!(turn, 1);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let (blank, _) = cache.begin_turn(Some("  ")).await;
        assert_ne!(blank, id);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_existing_session_increments_turn() {
        let cache = SessionCache::new(10);
        assert_eq!(cache.begin_turn(Some("abc")).await, ("abc".to_string(), 1));
        assert_eq!(cache.begin_turn(Some("abc")).await, ("abc".to_string(), 2));
        assert_eq!(cache.begin_turn(Some("abc")).await.1, 3);
    }

    #[tokio::test]
    async fn test_lru_eviction_and_touch() {
        let cache = SessionCache::new(3);
        for id in ["a", "b", "c"] {
            cache.begin_turn(Some(id)).await;
        }
        // 访问 a 后，b 成为最久未使用
        cache.begin_turn(Some("a")).await;
        cache.begin_turn(Some("d")).await;

        assert_eq!(cache.len().await, 3);
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());

        cache.begin_turn(Some("e")).await;
        assert!(cache.get("c").await.is_none());
        assert!(cache.get("a").await.is_some());
    }

    #[tokio::test]
    async fn test_complete_turn_and_info() {
        let cache = SessionCache::new(2);
        let (id, _) = cache.begin_turn(None).await;
        let info = cache.info(&id).await.unwrap();
        assert!(!info.has_context);
        assert!(info.active);

        cache
            .complete_turn(
                &id,
                TurnRecord {
                    turn_count: 1,
                    category: QueryCategory::Factual,
                    fast_path: true,
                    iterations_used: 1,
                    plan: None,
                    result: Some(ExecutionResult {
                        plan_summary: "fast".to_string(),
                        step_results: vec![],
                        final_output: "x".to_string(),
                        capabilities_used: Default::default(),
                        total_duration: Default::default(),
                        success: true,
                    }),
                    verification: None,
                },
            )
            .await;
        let session = cache.get(&id).await.unwrap();
        assert!(session.fast_path);
        assert_eq!(session.category, Some(QueryCategory::Factual));
        assert!(cache.info(&id).await.unwrap().has_context);
    }

    #[tokio::test]
    async fn test_evicted_session_restored_with_its_turn() {
        let cache = SessionCache::new(1);
        cache.begin_turn(Some("a")).await;
        let (_, turn) = cache.begin_turn(Some("a")).await;
        assert_eq!(turn, 2);
        // 本轮进行中 a 被 b 挤出
        cache.begin_turn(Some("b")).await;
        assert!(cache.get("a").await.is_none());

        cache
            .complete_turn(
                "a",
                TurnRecord {
                    turn_count: turn,
                    category: QueryCategory::Architecture,
                    fast_path: false,
                    iterations_used: 2,
                    plan: None,
                    result: None,
                    verification: None,
                },
            )
            .await;
        let session = cache.get("a").await.unwrap();
        assert_eq!(session.turn_count, 2);
        assert_eq!(session.last_iterations, 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.begin_turn(Some("a")).await.1, 3);
    }

    #[tokio::test]
    async fn test_clear_session() {
        let cache = SessionCache::new(2);
        cache.begin_turn(Some("x")).await;
        assert!(cache.clear("x").await);
        assert!(!cache.clear("x").await);
        assert!(cache.info("x").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_turns_never_exceed_capacity() {
        let cache = Arc::new(SessionCache::new(5));
        let handles: Vec<_> = (0..40)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.begin_turn(Some(&format!("s{}", i % 8))).await;
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len().await, 5);
    }
}
