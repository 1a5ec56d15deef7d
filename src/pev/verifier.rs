//! Verifier：对执行结果做三维评分并给出 accept / retry / escalate
//!
//! 评分委托给推理服务，输出经 `json` 提取、`normalize` 纠正后由 [`finalize`] 本地重算 overall 与决策：
//! 分数是决策的唯一依据，推理服务给出的 overall / decision 只作参考。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::pev::json::parse_json_object;
use crate::pev::normalize::{normalize_verification, DEFAULT_SCORE};
use crate::pev::types::{
    round2, Decision, ExecutionResult, Plan, VerificationResult, ACCEPT_THRESHOLD,
};

/// 送去评分的输出最大字符数
const MAX_OUTPUT_CHARS: usize = 8000;
/// quick_verify 送去评分的回复最大字符数
const QUICK_VERIFY_CHARS: usize = 2000;

const VERIFIER_SYSTEM_PROMPT: &str = r#"You are the quality reviewer of a cloud engineering assistant.
Score how well the response answers the user's query on three dimensions between 0.0 and 1.0:
- correctness: technically accurate, no invented services, parameters or commands
- completeness: every part of the query is addressed
- consistency: the parts of the response agree with each other and with the plan

Respond with a single JSON object and nothing else:
{
  "score": {"correctness": 0.0, "completeness": 0.0, "consistency": 0.0, "overall": 0.0},
  "decision": "accept | retry | escalate",
  "issues": [
    {"category": "correctness", "description": "...", "severity": "critical | major | minor", "suggestion": "..."}
  ],
  "feedback_for_replanning": "what the next plan must change, empty when accepting",
  "summary": "one sentence verdict"
}

Use "escalate" only when a human must review the answer (unsafe, destructive or unverifiable content)."#;

/// 由分数重算 overall 与决策；对已 finalize 的结果再次调用是无操作
pub fn finalize(mut verification: VerificationResult) -> VerificationResult {
    let score = &mut verification.score;
    score.correctness = score.correctness.clamp(0.0, 1.0);
    score.completeness = score.completeness.clamp(0.0, 1.0);
    score.consistency = score.consistency.clamp(0.0, 1.0);

    let expected = score.expected_overall();
    if !score.overall.is_finite() || (score.overall - expected).abs() > 0.01 {
        tracing::debug!(
            "Overriding reported overall {:.3} with computed {:.3}",
            score.overall,
            expected
        );
        score.overall = round2(expected);
    }
    score.overall = score.overall.clamp(0.0, 1.0);

    verification.decision = Decision::derive(verification.decision, score.overall);
    verification
}

/// 评分器：持有推理服务客户端
pub struct Verifier {
    llm: Arc<dyn LlmClient>,
}

impl Verifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 完整评分
    pub async fn verify(
        &self,
        query: &str,
        plan: &Plan,
        result: &ExecutionResult,
        iteration: u32,
    ) -> Result<VerificationResult, AgentError> {
        let failed: Vec<String> = result
            .step_results
            .iter()
            .filter(|r| !r.is_completed())
            .map(|r| {
                format!(
                    "step {}: {}",
                    r.step_number,
                    r.error.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        let unexecuted = plan.steps.len().saturating_sub(result.step_results.len());
        let output: String = result.final_output.chars().take(MAX_OUTPUT_CHARS).collect();

        let prompt = format!(
            "USER QUERY: {query}\n\
             ITERATION: {iteration}\n\
             PLAN: {}\n\
             STEPS: {} planned, {} executed, {} failed, {} not executed\n\
             FAILURES: {}\n\n\
             RESPONSE TO EVALUATE:\n{output}",
            plan.summary,
            plan.steps.len(),
            result.step_results.len(),
            failed.len(),
            unexecuted,
            if failed.is_empty() { "none".to_string() } else { failed.join("; ") },
        );

        let messages = [Message::system(VERIFIER_SYSTEM_PROMPT), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await?;
        let map = parse_json_object(&raw)?;
        let verification = finalize(normalize_verification(&map));

        tracing::info!(
            "Verification iteration {}: overall {:.2}, decision {:?}, {} issue(s)",
            iteration,
            verification.score.overall,
            verification.decision,
            verification.issues.len()
        );
        Ok(verification)
    }

    /// 降级评分：只要一个 0~1 的数字；无法解析时为 0.5
    pub async fn quick_verify(&self, query: &str, response: &str) -> Result<(f64, bool), AgentError> {
        let truncated: String = response.chars().take(QUICK_VERIFY_CHARS).collect();
        let prompt = format!(
            "Rate this response on a scale of 0.0 to 1.0 for how well it answers the query.\n\n\
             QUERY: {query}\n\nRESPONSE:\n{truncated}\n\n\
             Respond with just a number."
        );
        let raw = self.llm.complete(&[Message::user(prompt)]).await?;
        let score = parse_rating(&raw).unwrap_or(DEFAULT_SCORE).clamp(0.0, 1.0);
        Ok((score, score >= ACCEPT_THRESHOLD))
    }
}

/// 取回复中的第一个数字
fn parse_rating(raw: &str) -> Option<f64> {
    raw.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|part| part.chars().any(|c| c.is_ascii_digit()))
        .find_map(|part| part.trim_matches('.').parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
