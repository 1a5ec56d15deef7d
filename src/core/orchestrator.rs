//! 编排器：主控状态机
//!
//! 每个查询：会话解析 → 分类 → 快速路径（单次能力调用）或 PEV 循环 → 组装响应 → 写回会话。
//! 调用方总会拿到结构化响应；质量或置信度不足时通过 `requires_human_review` 标记。

use std::time::Instant;

use serde::Serialize;

use crate::core::session::{SessionCache, SessionId, SessionInfo, TurnRecord};
use crate::pev::{
    classify, Attempt, Capability, ExecutionResult, Executor, Issue, PevBudget, PevLoop,
    PevOutcome, Plan, Planner, QueryCategory, StepResult, VerificationResult, Verifier,
    ACCEPT_THRESHOLD,
};

/// 步骤输出预览最大字符数
pub const OUTPUT_PREVIEW_CHARS: usize = 500;

/// 单步详情
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStepDetail {
    pub step_number: u32,
    pub capability: Capability,
    pub query: String,
    /// completed / failed / not_executed
    pub status: String,
    pub output_preview: String,
}

/// 分数明细
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreDetails {
    pub overall: f64,
    pub correctness: f64,
    pub completeness: f64,
    pub consistency: f64,
}

/// 编排器返回给调用方的响应
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub content: String,
    pub category: QueryCategory,
    pub capabilities_used: Vec<Capability>,
    /// 快速路径上为 None
    pub verification_score: Option<f64>,
    pub iterations_used: u32,
    pub requires_human_review: bool,
    pub plan_summary: Option<String>,
    pub plan_rationale: Option<String>,
    pub execution_steps: Vec<ExecutionStepDetail>,
    pub score_details: Option<ScoreDetails>,
    pub session_id: SessionId,
    pub turn_count: u32,
    pub processing_time_ms: u64,
}

/// 人工复核交接包
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumanEscalationRequest {
    pub query: String,
    pub partial_result: String,
    pub issues: Vec<Issue>,
    pub iterations_attempted: u32,
    pub last_score: f64,
}

/// 打包人工复核所需信息（纯数据变换，不自动触发）
pub fn escalation_request(
    query: &str,
    result: &ExecutionResult,
    verification: &VerificationResult,
    iterations: u32,
) -> HumanEscalationRequest {
    HumanEscalationRequest {
        query: query.to_string(),
        partial_result: result.final_output.clone(),
        issues: verification.issues.clone(),
        iterations_attempted: iterations,
        last_score: verification.score.overall,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(OUTPUT_PREVIEW_CHARS).collect()
}

/// 计划中每一步的详情；未执行的步骤标记为 not_executed
fn step_details(plan: &Plan, result: &ExecutionResult) -> Vec<ExecutionStepDetail> {
    plan.steps
        .iter()
        .map(|step| {
            let (status, output) = match result.result_for(step.step_number) {
                Some(r) if r.is_completed() => ("completed", r.output.as_str()),
                Some(r) => ("failed", r.error.as_deref().unwrap_or("")),
                None => ("not_executed", ""),
            };
            ExecutionStepDetail {
                step_number: step.step_number,
                capability: step.capability,
                query: step.query.clone(),
                status: status.to_string(),
                output_preview: preview(output),
            }
        })
        .collect()
}

/// 拼接输出为空时（所有步骤失败）改为说明失败原因
fn content_from(result: &ExecutionResult) -> String {
    if !result.final_output.trim().is_empty() {
        return result.final_output.clone();
    }
    let errors: Vec<String> = result
        .step_results
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| format!("step {}: {e}", r.step_number)))
        .collect();
    if errors.is_empty() {
        "No output was produced for this request.".to_string()
    } else {
        format!("No output was produced for this request. {}", errors.join("; "))
    }
}

/// 主控编排器：持有 Planner / Executor / Verifier 与会话缓存
pub struct Orchestrator {
    planner: Planner,
    executor: Executor,
    verifier: Verifier,
    budget: PevBudget,
    sessions: SessionCache,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("budget", &self.budget)
            .field("step_timeout", &self.executor.step_timeout())
            .field("max_sessions", &self.sessions.capacity())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        executor: Executor,
        verifier: Verifier,
        budget: PevBudget,
        max_sessions: usize,
    ) -> Self {
        Self {
            planner,
            executor,
            verifier,
            budget,
            sessions: SessionCache::new(max_sessions),
        }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// 处理一个查询
    pub async fn run(&self, query: &str, session_id: Option<&str>) -> AgentResponse {
        let start = Instant::now();
        let (session_id, turn_count) = self.sessions.begin_turn(session_id).await;
        let category = classify(query);
        tracing::info!(
            "Session {} turn {}: query classified as {}",
            session_id,
            turn_count,
            category
        );

        let mut response = if category.config().skip_pev {
            self.fast_path(query, category, &session_id, turn_count).await
        } else {
            self.pev_path(query, category, &session_id, turn_count).await
        };

        response.session_id = session_id;
        response.turn_count = turn_count;
        response.processing_time_ms = start.elapsed().as_millis() as u64;
        let (_, _, total_tokens) = self.planner.token_usage();
        tracing::info!(
            "Query finished in {} ms: {} iteration(s), review required: {}, tokens so far: {}",
            response.processing_time_ms,
            response.iterations_used,
            response.requires_human_review,
            total_tokens
        );
        response
    }

    /// 快速路径：直接调用类别默认能力，不规划不校验
    async fn fast_path(
        &self,
        query: &str,
        category: QueryCategory,
        session_id: &str,
        turn_count: u32,
    ) -> AgentResponse {
        let capability = category
            .config()
            .default_capability
            .unwrap_or(Capability::Lookup);
        tracing::info!("Fast path: direct {} call", capability);

        let step = self.executor.execute_single(capability, query).await;
        let completed = step.is_completed();
        let content = if completed {
            step.output.clone()
        } else {
            format!(
                "The {capability} capability could not answer this request: {}",
                step.error.as_deref().unwrap_or("unknown error")
            )
        };

        let detail = ExecutionStepDetail {
            step_number: 1,
            capability,
            query: query.to_string(),
            status: if completed { "completed" } else { "failed" }.to_string(),
            output_preview: preview(if completed {
                &step.output
            } else {
                step.error.as_deref().unwrap_or("")
            }),
        };
        let result = fast_path_result(capability, category, step);

        self.sessions
            .complete_turn(
                session_id,
                TurnRecord {
                    turn_count,
                    category,
                    fast_path: true,
                    iterations_used: 1,
                    plan: None,
                    result: Some(result),
                    verification: None,
                },
            )
            .await;

        AgentResponse {
            content,
            category,
            capabilities_used: vec![capability],
            verification_score: None,
            iterations_used: 1,
            requires_human_review: !completed,
            plan_summary: Some(format!("Fast path: direct {capability} call ({category} query)")),
            plan_rationale: Some(format!(
                "Query classified as {category} - bypassed PEV for efficiency"
            )),
            execution_steps: vec![detail],
            score_details: None,
            session_id: String::new(),
            turn_count: 0,
            processing_time_ms: 0,
        }
    }

    async fn pev_path(
        &self,
        query: &str,
        category: QueryCategory,
        session_id: &str,
        turn_count: u32,
    ) -> AgentResponse {
        let outcome = PevLoop::new(&self.planner, &self.executor, &self.verifier, self.budget)
            .run(query, category)
            .await;
        let threshold = category.config().threshold.unwrap_or(ACCEPT_THRESHOLD);
        let requires_human_review = outcome.requires_human_review(threshold);
        tracing::info!(
            "PEV loop finished after {:?}: exit {:?}, {} iteration(s)",
            outcome.elapsed,
            outcome.exit,
            outcome.iterations
        );
        if let Some(fault) = &outcome.fault {
            tracing::warn!("PEV loop ended by fault: {}", fault);
        }

        let response = assemble(&outcome, category, requires_human_review);

        let iterations_used = outcome.iterations;
        let (plan, result, verification) = match outcome {
            PevOutcome {
                best: Some(Attempt {
                    plan,
                    result,
                    verification,
                }),
                ..
            } => (Some(plan), Some(result), Some(verification)),
            PevOutcome {
                unverified: Some((plan, result)),
                ..
            } => (Some(plan), Some(result), None),
            _ => (None, None, None),
        };
        self.sessions
            .complete_turn(
                session_id,
                TurnRecord {
                    turn_count,
                    category,
                    fast_path: false,
                    iterations_used,
                    plan,
                    result,
                    verification,
                },
            )
            .await;

        response
    }

    /// 打包人工复核交接信息；会话没有校验结果时返回 None
    pub async fn escalation_for_session(&self, session_id: &str, query: &str) -> Option<HumanEscalationRequest> {
        let session = self.sessions.get(session_id).await?;
        let result = session.last_result.as_ref()?;
        let verification = session.last_verification.as_ref()?;
        Some(escalation_request(
            query,
            result,
            verification,
            session.last_iterations,
        ))
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id).await
    }

    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.info(session_id).await
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.len().await
    }
}

fn fast_path_result(capability: Capability, category: QueryCategory, step: StepResult) -> ExecutionResult {
    let success = step.is_completed();
    let final_output = crate::pev::executor::format_final_output(std::slice::from_ref(&step));
    ExecutionResult {
        plan_summary: format!("Fast path: direct {capability} call ({category} query)"),
        total_duration: step.duration,
        capabilities_used: if success {
            [capability].into_iter().collect()
        } else {
            Default::default()
        },
        final_output,
        step_results: vec![step],
        success,
    }
}

/// PEV 结果 → 响应；优先使用最佳一轮，其次未校验的执行结果
fn assemble(outcome: &PevOutcome, category: QueryCategory, requires_human_review: bool) -> AgentResponse {
    let mut response = AgentResponse {
        content: String::new(),
        category,
        capabilities_used: Vec::new(),
        verification_score: None,
        iterations_used: outcome.iterations,
        requires_human_review,
        plan_summary: None,
        plan_rationale: None,
        execution_steps: Vec::new(),
        score_details: None,
        session_id: String::new(),
        turn_count: 0,
        processing_time_ms: 0,
    };

    let executed = match (&outcome.best, &outcome.unverified) {
        (Some(best), _) => {
            let score = best.verification.score;
            response.verification_score = Some(score.overall);
            response.score_details = Some(ScoreDetails {
                overall: score.overall,
                correctness: score.correctness,
                completeness: score.completeness,
                consistency: score.consistency,
            });
            Some((&best.plan, &best.result))
        }
        (None, Some((plan, result))) => Some((plan, result)),
        (None, None) => None,
    };

    match executed {
        Some((plan, result)) => {
            response.content = content_from(result);
            response.capabilities_used = result.capabilities_used.iter().copied().collect();
            response.plan_summary = Some(plan.summary.clone());
            response.plan_rationale = Some(plan.rationale.clone());
            response.execution_steps = step_details(plan, result);
        }
        None => {
            response.content = format!(
                "I could not complete this request: {}",
                outcome.fault.as_deref().unwrap_or("no plan could be produced")
            );
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pev::{Complexity, Decision, Score, Severity, Step, StepStatus};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn step_result(n: u32, status: StepStatus, output: &str, error: Option<&str>) -> StepResult {
        StepResult {
            step_number: n,
            capability: Capability::Lookup,
            status,
            output: output.to_string(),
            error: error.map(str::to_string),
            duration: Duration::ZERO,
        }
    }

    fn plan3() -> Plan {
        Plan {
            summary: "three".to_string(),
            steps: vec![
                Step::new(1, Capability::Lookup, "a"),
                Step::new(2, Capability::Lookup, "b"),
                Step::new(3, Capability::Lookup, "c").depends_on([2]),
            ],
            complexity: Complexity::Moderate,
            rationale: "r".to_string(),
        }
    }

    fn result_of(steps: Vec<StepResult>, output: &str) -> ExecutionResult {
        ExecutionResult {
            plan_summary: "three".to_string(),
            step_results: steps,
            final_output: output.to_string(),
            capabilities_used: BTreeSet::from([Capability::Lookup]),
            total_duration: Duration::ZERO,
            success: false,
        }
    }

    #[test]
    fn test_step_details_statuses_and_preview() {
        let long = "x".repeat(800);
        let result = result_of(
            vec![
                step_result(1, StepStatus::Completed, &long, None),
                step_result(2, StepStatus::Failed, "", Some("timed out")),
            ],
            "",
        );
        let details = step_details(&plan3(), &result);
        assert_eq!(details.len(), 3);
        assert_eq!(details[0].status, "completed");
        assert_eq!(details[0].output_preview.chars().count(), OUTPUT_PREVIEW_CHARS);
        assert_eq!(details[1].status, "failed");
        assert_eq!(details[1].output_preview, "timed out");
        assert_eq!(details[2].status, "not_executed");
    }

    #[test]
    fn test_content_reports_failures_when_empty() {
        let result = result_of(
            vec![step_result(1, StepStatus::Failed, "", Some("backend down"))],
            "",
        );
        let content = content_from(&result);
        assert!(content.starts_with("No output was produced"));
        assert!(content.contains("step 1: backend down"));
    }

    #[test]
    fn test_escalation_request_packages_fields() {
        let result = result_of(vec![], "partial answer");
        let verification = VerificationResult {
            score: Score::new(0.4, 0.4, 0.4),
            decision: Decision::Escalate,
            issues: vec![Issue {
                category: "correctness".to_string(),
                description: "unsafe command".to_string(),
                severity: Severity::Critical,
                suggestion: "remove --force".to_string(),
            }],
            feedback: String::new(),
            summary: "needs review".to_string(),
        };
        let request = escalation_request("delete rg", &result, &verification, 2);
        assert_eq!(
            request,
            HumanEscalationRequest {
                query: "delete rg".to_string(),
                partial_result: "partial answer".to_string(),
                issues: verification.issues.clone(),
                iterations_attempted: 2,
                last_score: 0.4,
            }
        );
    }
}
