//! PEV 主循环
//!
//! Plan → Execute → Verify，受类别迭代上限与累计时间预算约束，跟踪 overall 最高的一轮。
//! 规划故障（无 JSON、计划图非法、纠正后仍超预算、推理服务失败）结束循环，按已有结果尽力收尾。

use std::time::{Duration, Instant};

use crate::config::PevSection;
use crate::core::AgentError;
use crate::pev::classifier::QueryCategory;
use crate::pev::executor::Executor;
use crate::pev::planner::Planner;
use crate::pev::types::{
    Decision, ExecutionResult, Plan, PlanError, VerificationResult, ACCEPT_THRESHOLD,
};
use crate::pev::verifier::Verifier;

/// 时间预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PevBudget {
    pub loop_timeout: Duration,
    /// complex 类别使用更长的预算
    pub complex_timeout: Duration,
    /// 剩余预算低于该值时不再启动新迭代
    pub estimated_iteration: Duration,
}

impl PevBudget {
    pub fn from_section(section: &PevSection) -> Self {
        Self {
            loop_timeout: Duration::from_secs(section.loop_timeout_secs),
            complex_timeout: Duration::from_secs(section.complex_timeout_secs),
            estimated_iteration: Duration::from_secs(section.estimated_iteration_secs),
        }
    }

    pub fn for_category(&self, category: QueryCategory) -> Duration {
        match category {
            QueryCategory::Complex => self.complex_timeout,
            _ => self.loop_timeout,
        }
    }
}

impl Default for PevBudget {
    fn default() -> Self {
        Self::from_section(&PevSection::default())
    }
}

/// 循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Accepted,
    EarlyAccepted,
    ThresholdMet,
    Escalated,
    IterationCap,
    /// 剩余预算不足一次迭代
    InsufficientTime,
    BudgetExhausted,
    PlanningFault,
}

/// 一轮完整的计划、执行与校验
#[derive(Debug, Clone)]
pub struct Attempt {
    pub plan: Plan,
    pub result: ExecutionResult,
    pub verification: VerificationResult,
}

/// 循环结果
#[derive(Debug, Clone)]
pub struct PevOutcome {
    pub iterations: u32,
    /// overall 最高的一轮（严格大于才替换）
    pub best: Option<Attempt>,
    /// 已执行但校验失败的最后一轮，没有 best 时作为兜底内容
    pub unverified: Option<(Plan, ExecutionResult)>,
    pub exit: LoopExit,
    pub timeout_reached: bool,
    pub fault: Option<String>,
    pub elapsed: Duration,
}

impl PevOutcome {
    /// escalate、低于类别阈值、预算耗尽或没有任何校验结果时需要人工复核
    pub fn requires_human_review(&self, threshold: f64) -> bool {
        match &self.best {
            None => true,
            Some(best) => {
                best.verification.decision == Decision::Escalate
                    || best.verification.score.overall < threshold
                    || self.timeout_reached
            }
        }
    }
}

/// 一次 PEV 循环所需的组件（借用编排器持有的实例）
pub struct PevLoop<'a> {
    planner: &'a Planner,
    executor: &'a Executor,
    verifier: &'a Verifier,
    budget: PevBudget,
}

impl<'a> PevLoop<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a Executor,
        verifier: &'a Verifier,
        budget: PevBudget,
    ) -> Self {
        Self {
            planner,
            executor,
            verifier,
            budget,
        }
    }

    /// 规划并校验计划图；超预算时发起一次带明确指令的纠正
    async fn plan(
        &self,
        query: &str,
        category: QueryCategory,
        previous: Option<&Plan>,
        feedback: &str,
    ) -> Result<Plan, AgentError> {
        let max_steps = category.config().max_plan_steps;
        let plan = match previous {
            None => self.planner.create_plan(query, max_steps, category).await?,
            Some(prev) => {
                self.planner
                    .refine_plan(query, feedback, prev, max_steps, category)
                    .await?
            }
        };

        match plan.validate(max_steps) {
            Ok(()) => Ok(plan),
            Err(PlanError::ExceedsBudget { steps, max }) => {
                tracing::warn!("Plan has {} steps, budget is {}; asking for a smaller plan", steps, max);
                let instruction = format!(
                    "The plan has {steps} steps but at most {max} are allowed. \
                     Merge or drop steps so the plan has no more than {max} steps. \
                     Keep every part of the user query covered."
                );
                let corrected = self
                    .planner
                    .refine_plan(query, &instruction, &plan, max_steps, category)
                    .await?;
                corrected.validate(max_steps)?;
                Ok(corrected)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn run(&self, query: &str, category: QueryCategory) -> PevOutcome {
        let start = Instant::now();
        let config = category.config();
        let threshold = config.threshold.unwrap_or(ACCEPT_THRESHOLD);
        let early_accept = config.early_accept_threshold.unwrap_or(ACCEPT_THRESHOLD);
        let budget = self.budget.for_category(category);

        let mut iteration = 0u32;
        let mut best: Option<Attempt> = None;
        let mut unverified = None;
        let mut previous_plan: Option<Plan> = None;
        let mut feedback = String::new();
        let mut exit = LoopExit::IterationCap;
        let mut timeout_reached = false;
        let mut fault = None;

        while iteration < config.max_iterations {
            let elapsed = start.elapsed();
            if elapsed >= budget {
                tracing::warn!("PEV budget of {:?} exhausted after {} iteration(s)", budget, iteration);
                timeout_reached = true;
                exit = LoopExit::BudgetExhausted;
                break;
            }
            if iteration > 0 && budget - elapsed < self.budget.estimated_iteration {
                tracing::info!(
                    "Skipping iteration {}: {:?} left, estimate is {:?}",
                    iteration + 1,
                    budget - elapsed,
                    self.budget.estimated_iteration
                );
                exit = LoopExit::InsufficientTime;
                break;
            }

            iteration += 1;
            tracing::info!("PEV iteration {}/{} ({})", iteration, config.max_iterations, category);

            let plan = match self
                .plan(query, category, previous_plan.as_ref(), &feedback)
                .await
            {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!("Planning failed in iteration {}: {}", iteration, e);
                    fault = Some(e.to_string());
                    exit = LoopExit::PlanningFault;
                    break;
                }
            };

            let result = self.executor.execute(&plan, query).await;

            let verification = match self.verifier.verify(query, &plan, &result, iteration).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Verification failed in iteration {}: {}", iteration, e);
                    fault = Some(e.to_string());
                    unverified = Some((plan, result));
                    exit = LoopExit::PlanningFault;
                    break;
                }
            };

            let overall = verification.score.overall;
            let decision = verification.decision;
            let next_feedback = verification.retry_feedback().to_string();

            if best
                .as_ref()
                .map_or(true, |b| overall > b.verification.score.overall)
            {
                best = Some(Attempt {
                    plan: plan.clone(),
                    result,
                    verification,
                });
            }
            previous_plan = Some(plan);

            if decision == Decision::Accept {
                exit = LoopExit::Accepted;
                break;
            }
            if overall >= early_accept {
                exit = LoopExit::EarlyAccepted;
                break;
            }
            if overall >= threshold {
                exit = LoopExit::ThresholdMet;
                break;
            }
            if decision == Decision::Escalate {
                exit = LoopExit::Escalated;
                break;
            }
            if start.elapsed() >= budget {
                tracing::warn!("PEV budget of {:?} exhausted after {} iteration(s)", budget, iteration);
                timeout_reached = true;
                exit = LoopExit::BudgetExhausted;
                break;
            }

            feedback = next_feedback;
        }

        tracing::info!(
            "PEV loop finished: {:?} after {} iteration(s), best overall {:?}",
            exit,
            iteration,
            best.as_ref().map(|b| b.verification.score.overall)
        );

        PevOutcome {
            iterations: iteration,
            best,
            unverified,
            exit,
            timeout_reached,
            fault,
            elapsed: start.elapsed(),
        }
    }
}
