//! Executor：按依赖 DAG 分波执行计划
//!
//! 每一波取出依赖已全部完成的步骤，用 `join_all` 并发执行，每步单独施加超时；
//! 超时或能力失败记为 failed 的 StepResult，不影响同波其他步骤。
//! 没有可执行步骤但仍有剩余时停止，剩余步骤不出现在结果中。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::capabilities::CapabilityRegistry;
use crate::core::AgentError;
use crate::pev::types::{Capability, ExecutionResult, Plan, Step, StepResult, StepStatus};

/// 步骤输出段之间的分隔
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// 计划执行器：持有能力注册表与单步超时
pub struct Executor {
    registry: Arc<CapabilityRegistry>,
    step_timeout: Duration,
}

impl Executor {
    pub fn new(registry: Arc<CapabilityRegistry>, step_timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(step_timeout_secs))
    }

    pub fn with_timeout(registry: Arc<CapabilityRegistry>, step_timeout: Duration) -> Self {
        Self {
            registry,
            step_timeout,
        }
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// 执行整个计划，结果按 step_number 排序
    pub async fn execute(&self, plan: &Plan, original_query: &str) -> ExecutionResult {
        let start = Instant::now();
        let mut remaining: BTreeSet<u32> = plan.steps.iter().map(|s| s.step_number).collect();
        let mut results: BTreeMap<u32, StepResult> = BTreeMap::new();
        let mut wave = 0usize;

        while !remaining.is_empty() {
            let ready: Vec<&Step> = remaining
                .iter()
                .filter_map(|n| plan.step(*n))
                .filter(|step| {
                    step.depends_on
                        .iter()
                        .all(|dep| results.get(dep).is_some_and(|r| r.is_completed()))
                })
                .collect();

            if ready.is_empty() {
                tracing::error!(
                    "Execution blocked: steps {:?} have unsatisfied dependencies",
                    remaining
                );
                break;
            }

            wave += 1;
            let numbers: Vec<u32> = ready.iter().map(|s| s.step_number).collect();
            tracing::info!("Executing wave {} with steps {:?}", wave, numbers);

            // 先在当前结果上构造 prompt，再并发执行
            let jobs: Vec<(u32, Capability, String)> = ready
                .iter()
                .map(|step| {
                    let context: Vec<&str> = step
                        .depends_on
                        .iter()
                        .filter_map(|dep| results.get(dep))
                        .map(|r| r.output.as_str())
                        .collect();
                    (
                        step.step_number,
                        step.capability,
                        build_step_prompt(original_query, step, &context),
                    )
                })
                .collect();

            let wave_results = join_all(
                jobs.into_iter()
                    .map(|(number, capability, prompt)| self.run_step(number, capability, prompt)),
            )
            .await;

            for result in wave_results {
                remaining.remove(&result.step_number);
                results.insert(result.step_number, result);
            }
        }

        let step_results: Vec<StepResult> = results.into_values().collect();
        let success = step_results.len() == plan.steps.len()
            && step_results.iter().all(StepResult::is_completed);
        let capabilities_used = step_results
            .iter()
            .filter(|r| r.is_completed())
            .map(|r| r.capability)
            .collect();

        ExecutionResult {
            plan_summary: plan.summary.clone(),
            final_output: format_final_output(&step_results),
            step_results,
            capabilities_used,
            total_duration: start.elapsed(),
            success,
        }
    }

    /// 快速路径：直接调用单个能力，超时规则与计划步骤一致
    pub async fn execute_single(&self, capability: Capability, query: &str) -> StepResult {
        self.run_step(1, capability, query.to_string()).await
    }

    /// 单步执行：施加超时，输出一行 JSON 审计日志
    async fn run_step(&self, step_number: u32, capability: Capability, prompt: String) -> StepResult {
        let start = Instant::now();
        let outcome = timeout(self.step_timeout, self.registry.invoke(capability, &prompt)).await;
        let duration = start.elapsed();

        let (status, output, error, label) = match outcome {
            Ok(Ok(output)) => (StepStatus::Completed, output, None, "ok"),
            Ok(Err(e)) => {
                let err = AgentError::CapabilityFailed(format!(
                    "step {step_number} ({capability}): {e}"
                ));
                (StepStatus::Failed, String::new(), Some(err.to_string()), "error")
            }
            Err(_) => {
                let err = AgentError::StepTimeout(format!(
                    "step {step_number} ({capability}) timed out after {:?}",
                    self.step_timeout
                ));
                (StepStatus::Failed, String::new(), Some(err.to_string()), "timeout")
            }
        };

        let audit = serde_json::json!({
            "event": "step_audit",
            "step": step_number,
            "capability": capability.as_str(),
            "ok": status == StepStatus::Completed,
            "outcome": label,
            "duration_ms": duration.as_millis() as u64,
            "prompt_preview": prompt.chars().take(200).collect::<String>(),
        });
        tracing::info!(audit = %audit.to_string(), "step");

        StepResult {
            step_number,
            capability,
            status,
            output,
            error,
            duration,
        }
    }
}

/// 步骤 prompt：原始查询、步骤查询与期望输出，以及已完成依赖的输出
pub fn build_step_prompt(original_query: &str, step: &Step, dependency_outputs: &[&str]) -> String {
    let mut prompt = format!(
        "Execute this step from the plan:\n\
         ORIGINAL USER QUERY: {original_query}\n\
         STEP {}: Use the **{}** capability\n\
         QUERY: {}\n\
         EXPECTED OUTPUT: {}",
        step.step_number, step.capability, step.query, step.expected_output
    );
    if !dependency_outputs.is_empty() {
        prompt.push_str("\n\nCONTEXT FROM PREVIOUS STEPS:\n");
        prompt.push_str(&dependency_outputs.join("\n---\n"));
    }
    prompt
}

/// 拼接已完成步骤的输出（调用方保证按步骤号排序）
pub fn format_final_output(results: &[StepResult]) -> String {
    results
        .iter()
        .filter(|r| r.is_completed())
        .map(|r| format!("## Step {}: {}\n\n{}", r.step_number, r.capability, r.output))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}
