//! 编排器集成测试：预设回复的推理服务 + 桩能力后端，走完整的分类 → 快速路径 / PEV → 会话流程

use std::sync::Arc;

use async_trait::async_trait;
use pev_agent::capabilities::{CapabilityBackend, CapabilityRegistry};
use pev_agent::config::AppConfig;
use pev_agent::llm::ScriptedLlmClient;
use pev_agent::{Capability, Orchestrator, OrchestratorBuilder, QueryCategory};

struct Stub {
    capability: Capability,
    fail: bool,
}

#[async_trait]
impl CapabilityBackend for Stub {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn invoke(&self, _query: &str) -> Result<String, String> {
        if self.fail {
            Err(format!("{} backend unavailable", self.capability))
        } else {
            Ok(format!("{} answer", self.capability))
        }
    }
}

fn registry(failing: &[Capability]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for capability in Capability::ALL {
        registry.register(Stub {
            capability,
            fail: failing.contains(&capability),
        });
    }
    registry
}

fn orchestrator(replies: Vec<String>, failing: &[Capability]) -> (Orchestrator, Arc<ScriptedLlmClient>) {
    let llm = Arc::new(ScriptedLlmClient::new(replies));
    let orchestrator = OrchestratorBuilder::new(AppConfig::default())
        .with_llm(llm.clone())
        .with_registry(registry(failing))
        .build()
        .unwrap();
    (orchestrator, llm)
}

const DESIGN_PLAN: &str = r#"```json
{"summary": "Review AKS hardening", "rationale": "single guidance step",
 "steps": [{"step_number": 1, "capability": "design-guidance", "query": "AKS security baseline"}]}
```"#;

const HOWTO_PLAN: &str = r#"{"summary": "Find the setting, then script it", "steps": [
  {"step_number": 1, "capability": "lookup", "query": "diagnostic settings options"},
  {"step_number": 2, "capability": "code-generation", "query": "cli commands", "depends_on": [1]}
]}"#;

fn verdict(score: f64, decision: &str) -> String {
    format!(r#"{{"score": {score}, "decision": "{decision}", "issues": [], "summary": "scored {score}"}}"#)
}

#[tokio::test]
async fn test_factual_query_takes_fast_path() {
    let (orchestrator, llm) = orchestrator(vec![], &[]);
    let response = orchestrator.run("What is Azure Cosmos DB", None).await;

    assert_eq!(response.category, QueryCategory::Factual);
    assert_eq!(response.content, "lookup answer");
    assert_eq!(response.capabilities_used, vec![Capability::Lookup]);
    assert_eq!(response.iterations_used, 1);
    assert_eq!(response.verification_score, None);
    assert!(!response.requires_human_review);
    assert_eq!(
        response.plan_summary.as_deref(),
        Some("Fast path: direct lookup call (factual query)")
    );
    assert_eq!(response.execution_steps.len(), 1);
    assert_eq!(response.execution_steps[0].status, "completed");
    assert_eq!(response.turn_count, 1);
    // 快速路径不经过 Planner / Verifier
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_fast_path_failure_requires_review() {
    let (orchestrator, _) = orchestrator(vec![], &[Capability::Lookup]);
    let response = orchestrator.run("Define RBAC", None).await;

    assert!(response.requires_human_review);
    assert!(response.content.contains("lookup backend unavailable"));
    assert_eq!(response.execution_steps[0].status, "failed");
}

#[tokio::test]
async fn test_architecture_query_accepted_by_verifier() {
    let (orchestrator, llm) = orchestrator(vec![DESIGN_PLAN.to_string(), verdict(0.9, "accept")], &[]);
    let response = orchestrator.run("Best practices for securing AKS", None).await;

    assert_eq!(response.category, QueryCategory::Architecture);
    assert_eq!(response.iterations_used, 1);
    assert_eq!(response.verification_score, Some(0.9));
    assert!(!response.requires_human_review);
    assert_eq!(response.capabilities_used, vec![Capability::DesignGuidance]);
    assert_eq!(response.plan_summary.as_deref(), Some("Review AKS hardening"));
    assert_eq!(response.content, "## Step 1: design-guidance\n\ndesign-guidance answer");
    let details = response.score_details.unwrap();
    assert_eq!(details.correctness, 0.9);
    assert_eq!(llm.call_count(), 2);
}

#[tokio::test]
async fn test_howto_query_below_threshold_requires_review() {
    let (orchestrator, _) = orchestrator(vec![HOWTO_PLAN.to_string(), verdict(0.6, "retry")], &[]);
    let response = orchestrator.run("How do I enable diagnostics logging", None).await;

    assert_eq!(response.category, QueryCategory::Howto);
    // howto 类只允许一轮
    assert_eq!(response.iterations_used, 1);
    assert!(response.requires_human_review);
    assert_eq!(
        response.capabilities_used,
        vec![Capability::Lookup, Capability::CodeGeneration]
    );
    let statuses: Vec<&str> = response.execution_steps.iter().map(|s| s.status.as_str()).collect();
    assert_eq!(statuses, ["completed", "completed"]);
}

#[tokio::test]
async fn test_failed_dependency_marks_downstream_not_executed() {
    let (orchestrator, _) = orchestrator(
        vec![HOWTO_PLAN.to_string(), verdict(0.3, "retry")],
        &[Capability::Lookup],
    );
    let response = orchestrator.run("How do I enable diagnostics logging", None).await;

    let statuses: Vec<&str> = response.execution_steps.iter().map(|s| s.status.as_str()).collect();
    assert_eq!(statuses, ["failed", "not_executed"]);
    assert!(response.capabilities_used.is_empty());
    assert!(response.requires_human_review);
    assert!(response.content.contains("lookup backend unavailable"));
}

#[tokio::test]
async fn test_planner_garbage_still_returns_response() {
    let (orchestrator, _) = orchestrator(vec!["I cannot plan this".to_string()], &[]);
    let response = orchestrator.run("How do I enable diagnostics logging", None).await;

    assert_eq!(response.category, QueryCategory::Howto);
    assert!(response.requires_human_review);
    assert!(response.content.starts_with("I could not complete this request"));
    assert_eq!(response.verification_score, None);
    assert!(response.execution_steps.is_empty());
}

#[tokio::test]
async fn test_verifier_failure_returns_unverified_output() {
    let (orchestrator, _) = orchestrator(
        vec![DESIGN_PLAN.to_string(), "no verdict today".to_string()],
        &[],
    );
    let response = orchestrator.run("Best practices for securing AKS", None).await;

    assert!(response.requires_human_review);
    assert_eq!(response.verification_score, None);
    assert_eq!(response.content, "## Step 1: design-guidance\n\ndesign-guidance answer");
}

#[tokio::test]
async fn test_session_turns_and_escalation_package() {
    let (orchestrator, _) = orchestrator(
        vec![DESIGN_PLAN.to_string(), verdict(0.4, "escalate")],
        &[],
    );
    let first = orchestrator.run("What is Azure Cosmos DB", Some("team-a")).await;
    assert_eq!(first.session_id, "team-a");
    assert_eq!(first.turn_count, 1);

    let second = orchestrator.run("Best practices for securing AKS", Some("team-a")).await;
    assert_eq!(second.turn_count, 2);
    assert!(second.requires_human_review);

    let info = orchestrator.session_info("team-a").await.unwrap();
    assert_eq!(info.turn_count, 2);
    assert!(info.has_context);

    let request = orchestrator
        .escalation_for_session("team-a", "Best practices for securing AKS")
        .await
        .unwrap();
    assert_eq!(request.last_score, 0.4);
    // 交接包记录的是 PEV 迭代数，而不是会话轮次
    assert_eq!(request.iterations_attempted, second.iterations_used);
    assert_eq!(request.iterations_attempted, 1);
    assert_eq!(request.partial_result, second.content);

    assert!(orchestrator.clear_session("team-a").await);
    assert!(orchestrator.session_info("team-a").await.is_none());
    assert_eq!(orchestrator.active_sessions().await, 0);
}

#[tokio::test]
async fn test_quick_verify_through_orchestrator() {
    let (orchestrator, _) = orchestrator(vec!["0.92".to_string()], &[]);
    let (score, passed) = orchestrator
        .verifier()
        .quick_verify("What is Azure Cosmos DB", "A globally distributed database")
        .await
        .unwrap();
    assert_eq!(score, 0.92);
    assert!(passed);
}
