//! PEV 类型定义
//!
//! 能力枚举、计划（Step / Plan）、执行结果、评分与校验结果

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::AgentError;

/// 接受阈值：overall 达到该值即判定为 accept
pub const ACCEPT_THRESHOLD: f64 = 0.8;

/// 评分权重：正确性 / 完整性 / 一致性
pub const CORRECTNESS_WEIGHT: f64 = 0.4;
pub const COMPLETENESS_WEIGHT: f64 = 0.35;
pub const CONSISTENCY_WEIGHT: f64 = 0.25;

/// 能力（封闭枚举，执行器按枚举分派到对应后端）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// 文档检索 / 事实问答
    Lookup,
    /// 架构与最佳实践建议
    DesignGuidance,
    /// 代码、CLI、IaC 模板生成
    CodeGeneration,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::Lookup,
        Capability::DesignGuidance,
        Capability::CodeGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Lookup => "lookup",
            Capability::DesignGuidance => "design-guidance",
            Capability::CodeGeneration => "code-generation",
        }
    }

    /// 宽松解析：接受 kebab / 下划线 / 空格写法以及旧工具名（research / architecture / code）
    pub fn parse_lenient(raw: &str) -> Option<Capability> {
        let key = raw.trim().to_lowercase().replace(['_', ' '], "-");
        match key.as_str() {
            "lookup" | "research" | "search" | "docs" => Some(Capability::Lookup),
            "design-guidance" | "architecture" | "design" => Some(Capability::DesignGuidance),
            "code-generation" | "code" | "codegen" => Some(Capability::CodeGeneration),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::parse_lenient(s).ok_or_else(|| AgentError::UnknownCapability(s.to_string()))
    }
}

/// 计划复杂度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// 按步骤数推断：≤2 simple，≤4 moderate，否则 complex
    pub fn from_step_count(count: usize) -> Self {
        match count {
            0..=2 => Complexity::Simple,
            3..=4 => Complexity::Moderate,
            _ => Complexity::Complex,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "simple" | "low" => Some(Complexity::Simple),
            "moderate" | "medium" => Some(Complexity::Moderate),
            "complex" | "high" => Some(Complexity::Complex),
            _ => None,
        }
    }
}

/// 计划中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 计划内唯一，从 1 开始
    pub step_number: u32,
    pub capability: Capability,
    pub query: String,
    pub expected_output: String,
    pub depends_on: BTreeSet<u32>,
}

impl Step {
    pub fn new(step_number: u32, capability: Capability, query: impl Into<String>) -> Self {
        Self {
            step_number,
            capability,
            query: query.into(),
            expected_output: "Step output".to_string(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = u32>) -> Self {
        self.depends_on.extend(deps);
        self
    }
}

/// 计划图校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("plan has {steps} steps, budget is {max}")]
    ExceedsBudget { steps: usize, max: usize },

    #[error("duplicate step number {0}")]
    DuplicateStep(u32),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: u32, dependency: u32 },

    #[error("dependency cycle among steps {0:?}")]
    Cycle(Vec<u32>),
}

/// 计划：步骤列表 + 摘要 / 复杂度 / 理由
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    pub steps: Vec<Step>,
    pub complexity: Complexity,
    pub rationale: String,
}

impl Plan {
    pub fn step(&self, step_number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    /// 校验计划：非空、不超预算、步骤号唯一、依赖存在且无环
    pub fn validate(&self, max_steps: usize) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.steps.len() > max_steps {
            return Err(PlanError::ExceedsBudget {
                steps: self.steps.len(),
                max: max_steps,
            });
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_number) {
                return Err(PlanError::DuplicateStep(step.step_number));
            }
        }
        for step in &self.steps {
            if let Some(dep) = step.depends_on.iter().find(|d| !seen.contains(d)) {
                return Err(PlanError::UnknownDependency {
                    step: step.step_number,
                    dependency: *dep,
                });
            }
        }

        // 入度表拓扑排序，剩余未出队的节点即在环上（或依赖环上节点）
        let mut in_degree: HashMap<u32, usize> = self
            .steps
            .iter()
            .map(|s| (s.step_number, s.depends_on.len()))
            .collect();
        let mut queue: VecDeque<u32> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0usize;
        while let Some(done) = queue.pop_front() {
            visited += 1;
            for step in self.steps.iter().filter(|s| s.depends_on.contains(&done)) {
                if let Some(d) = in_degree.get_mut(&step.step_number) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(step.step_number);
                    }
                }
            }
        }
        if visited < self.steps.len() {
            let mut stuck: Vec<u32> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(n, _)| n)
                .collect();
            stuck.sort_unstable();
            return Err(PlanError::Cycle(stuck));
        }
        Ok(())
    }
}

/// 步骤执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// 单步执行结果（每次执行每步恰好一条）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_number: u32,
    pub capability: Capability,
    pub status: StepStatus,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
}

impl StepResult {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// 一次计划执行的汇总结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_summary: String,
    /// 按 step_number 升序
    pub step_results: Vec<StepResult>,
    /// 已完成步骤输出按步骤号拼接
    pub final_output: String,
    pub capabilities_used: BTreeSet<Capability>,
    pub total_duration: Duration,
    /// 计划中每一步都已完成时为 true
    pub success: bool,
}

impl ExecutionResult {
    pub fn result_for(&self, step_number: u32) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_number == step_number)
    }
}

/// 三维评分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub correctness: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub overall: f64,
}

impl Score {
    /// 由三个维度构造，overall 按权重计算
    pub fn new(correctness: f64, completeness: f64, consistency: f64) -> Self {
        let mut score = Self {
            correctness: correctness.clamp(0.0, 1.0),
            completeness: completeness.clamp(0.0, 1.0),
            consistency: consistency.clamp(0.0, 1.0),
            overall: 0.0,
        };
        score.overall = round2(score.expected_overall());
        score
    }

    /// 0.4 * correctness + 0.35 * completeness + 0.25 * consistency
    pub fn expected_overall(&self) -> f64 {
        CORRECTNESS_WEIGHT * self.correctness
            + COMPLETENESS_WEIGHT * self.completeness
            + CONSISTENCY_WEIGHT * self.consistency
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 校验决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Retry,
    Escalate,
}

impl Decision {
    /// 以分数为准重新推导决策：达到阈值即 accept；低于阈值的 accept 降级为 retry；escalate 原样保留
    pub fn derive(proposed: Decision, overall: f64) -> Decision {
        if overall >= ACCEPT_THRESHOLD {
            Decision::Accept
        } else if proposed == Decision::Accept {
            Decision::Retry
        } else {
            proposed
        }
    }
}

/// 问题严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn parse(raw: &str) -> Severity {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "high" | "blocker" => Severity::Critical,
            "major" | "medium" => Severity::Major,
            _ => Severity::Minor,
        }
    }
}

/// 校验发现的问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub suggestion: String,
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub score: Score,
    pub decision: Decision,
    pub issues: Vec<Issue>,
    /// 供下一轮 refine 使用的反馈
    pub feedback: String,
    pub summary: String,
}

impl VerificationResult {
    /// 下一轮重规划携带的反馈：feedback 为空时退回 summary
    pub fn retry_feedback(&self) -> &str {
        if self.feedback.trim().is_empty() {
            &self.summary
        } else {
            &self.feedback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(steps: Vec<Step>) -> Plan {
        Plan {
            summary: "test".to_string(),
            steps,
            complexity: Complexity::Simple,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_capability_lenient_parsing() {
        assert_eq!(Capability::parse_lenient("research"), Some(Capability::Lookup));
        assert_eq!(
            Capability::parse_lenient("design_guidance"),
            Some(Capability::DesignGuidance)
        );
        assert_eq!(Capability::parse_lenient("Architecture"), Some(Capability::DesignGuidance));
        assert_eq!(Capability::parse_lenient("code"), Some(Capability::CodeGeneration));
        assert_eq!(Capability::parse_lenient("weather"), None);
        assert!(matches!(
            "weather".parse::<Capability>(),
            Err(AgentError::UnknownCapability(_))
        ));
        assert_eq!(
            serde_json::to_string(&Capability::CodeGeneration).unwrap(),
            "\"code-generation\""
        );
    }

    #[test]
    fn test_complexity_from_step_count() {
        assert_eq!(Complexity::from_step_count(1), Complexity::Simple);
        assert_eq!(Complexity::from_step_count(2), Complexity::Simple);
        assert_eq!(Complexity::from_step_count(3), Complexity::Moderate);
        assert_eq!(Complexity::from_step_count(4), Complexity::Moderate);
        assert_eq!(Complexity::from_step_count(5), Complexity::Complex);
    }

    #[test]
    fn test_validate_accepts_diamond() {
        let p = plan(vec![
            Step::new(1, Capability::Lookup, "a"),
            Step::new(2, Capability::Lookup, "b").depends_on([1]),
            Step::new(3, Capability::DesignGuidance, "c").depends_on([1]),
            Step::new(4, Capability::CodeGeneration, "d").depends_on([2, 3]),
        ]);
        assert_eq!(p.validate(4), Ok(()));
        assert_eq!(
            p.validate(3),
            Err(PlanError::ExceedsBudget { steps: 4, max: 3 })
        );
    }

    #[test]
    fn test_validate_rejects_bad_graphs() {
        assert_eq!(plan(vec![]).validate(3), Err(PlanError::Empty));

        let dup = plan(vec![
            Step::new(1, Capability::Lookup, "a"),
            Step::new(1, Capability::Lookup, "b"),
        ]);
        assert_eq!(dup.validate(3), Err(PlanError::DuplicateStep(1)));

        let unknown = plan(vec![Step::new(1, Capability::Lookup, "a").depends_on([7])]);
        assert_eq!(
            unknown.validate(3),
            Err(PlanError::UnknownDependency { step: 1, dependency: 7 })
        );

        let cyclic = plan(vec![
            Step::new(1, Capability::Lookup, "a"),
            Step::new(2, Capability::Lookup, "b").depends_on([3]),
            Step::new(3, Capability::Lookup, "c").depends_on([2]),
        ]);
        assert_eq!(cyclic.validate(3), Err(PlanError::Cycle(vec![2, 3])));
    }

    #[test]
    fn test_score_weights() {
        let s = Score::new(1.0, 0.0, 0.0);
        assert!((s.overall - 0.4).abs() < 1e-9);
        let s = Score::new(0.9, 0.8, 0.6);
        assert!((s.overall - 0.79).abs() < 1e-9);
        let s = Score::new(2.0, -1.0, 0.5);
        assert_eq!(s.correctness, 1.0);
        assert_eq!(s.completeness, 0.0);
    }

    #[test]
    fn test_decision_derive_is_idempotent() {
        for proposed in [Decision::Accept, Decision::Retry, Decision::Escalate] {
            for overall in [0.0, 0.5, 0.79, 0.8, 0.95] {
                let once = Decision::derive(proposed, overall);
                assert_eq!(Decision::derive(once, overall), once);
                assert_eq!(once == Decision::Accept, overall >= ACCEPT_THRESHOLD);
            }
        }
        assert_eq!(Decision::derive(Decision::Escalate, 0.3), Decision::Escalate);
        assert_eq!(Decision::derive(Decision::Accept, 0.3), Decision::Retry);
        assert_eq!(Decision::derive(Decision::Retry, 0.85), Decision::Accept);
    }

    #[test]
    fn test_retry_feedback_falls_back_to_summary() {
        let mut v = VerificationResult {
            score: Score::new(0.5, 0.5, 0.5),
            decision: Decision::Retry,
            issues: vec![],
            feedback: "  ".to_string(),
            summary: "missing CLI example".to_string(),
        };
        assert_eq!(v.retry_feedback(), "missing CLI example");
        v.feedback = "add az commands".to_string();
        assert_eq!(v.retry_feedback(), "add az commands");
    }
}
