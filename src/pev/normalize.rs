//! 松散 JSON → 严格类型的字段级纠正（纯函数，与网络调用分离）
//!
//! 推理服务会改字段名、漏字段、把数字写成字符串；这里逐字段接受同义键并补默认值。

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::pev::types::{
    Capability, Complexity, Decision, Issue, Plan, Score, Severity, Step, VerificationResult,
};

/// 缺省分数（维度缺失或无法解析时）
pub const DEFAULT_SCORE: f64 = 0.5;

const SUMMARY_KEYS: &[&str] = &["summary", "description", "title", "plan_summary", "overview"];
const COMPLEXITY_KEYS: &[&str] = &["estimated_complexity", "complexity"];
const RATIONALE_KEYS: &[&str] = &["rationale", "explanation", "reasoning"];
const STEPS_KEYS: &[&str] = &["steps", "plan_steps", "actions", "tasks"];

const STEP_NUMBER_KEYS: &[&str] = &["step_number", "number", "step", "id"];
const STEP_QUERY_KEYS: &[&str] = &["query", "action", "instruction", "task", "description"];
const STEP_EXPECTED_KEYS: &[&str] = &["expected_output", "expected", "output", "deliverables"];
const STEP_DEPENDS_KEYS: &[&str] = &["depends_on", "dependencies", "requires"];
const STEP_CAPABILITY_KEYS: &[&str] = &["capability", "tool", "agent"];

const SCORE_KEYS: &[&str] = &["score", "scores"];
const CORRECTNESS_KEYS: &[&str] = &["correctness", "accuracy"];
const COMPLETENESS_KEYS: &[&str] = &["completeness", "coverage"];
const CONSISTENCY_KEYS: &[&str] = &["consistency", "coherence"];
const OVERALL_KEYS: &[&str] = &["overall", "overall_score", "total_score"];
const DECISION_KEYS: &[&str] = &["decision", "verdict", "result"];
const ISSUES_KEYS: &[&str] = &["issues", "problems", "concerns"];
const FEEDBACK_KEYS: &[&str] = &[
    "feedback_for_replanning",
    "retry_feedback",
    "feedback",
    "suggestions",
    "recommendation",
];
const VERIFY_SUMMARY_KEYS: &[&str] = &["summary", "evaluation", "rationale", "explanation", "reason"];

/// 第一个存在且非 null 的同义键
fn first_value<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

/// 字符串 / 数字 / 布尔转文本；空串视为缺失
fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(as_text)
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(as_text)
}

/// 字符串中的所有数字串："s1" → [1]，"step 2, 3" → [2, 3]
pub fn digits_in(raw: &str) -> Vec<u32> {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

fn as_step_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => digits_in(s).into_iter().next(),
        _ => None,
    }
}

/// 依赖：数组（数字或字符串）或单个值
pub fn normalize_depends_on(value: Option<&Value>) -> BTreeSet<u32> {
    let mut deps = BTreeSet::new();
    let Some(value) = value else {
        return deps;
    };
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for item in items {
        match item {
            Value::String(s) => deps.extend(digits_in(s)),
            other => deps.extend(as_step_number(other)),
        }
    }
    deps
}

/// 单步纠正；`index` 为 0 起的位置，用于缺省步骤号
pub fn normalize_step(value: &Value, index: usize, original_query: &str) -> Option<Step> {
    let default_number = u32::try_from(index + 1).unwrap_or(u32::MAX);
    let obj = match value {
        Value::Object(obj) => obj,
        Value::String(s) if !s.trim().is_empty() => {
            return Some(Step::new(default_number, Capability::Lookup, s.trim()));
        }
        _ => return None,
    };

    let step_number = first_value(obj, STEP_NUMBER_KEYS)
        .and_then(as_step_number)
        .unwrap_or(default_number);
    let capability = text_field(obj, STEP_CAPABILITY_KEYS)
        .and_then(|raw| Capability::parse_lenient(&raw))
        .unwrap_or(Capability::Lookup);
    let query = text_field(obj, STEP_QUERY_KEYS).unwrap_or_else(|| original_query.to_string());
    let expected_output =
        text_field(obj, STEP_EXPECTED_KEYS).unwrap_or_else(|| "Step output".to_string());
    let depends_on = normalize_depends_on(first_value(obj, STEP_DEPENDS_KEYS));

    Some(Step {
        step_number,
        capability,
        query,
        expected_output,
        depends_on,
    })
}

/// 计划纠正：同义键映射 + 缺省值
///
/// 没有步骤时合成一个 lookup 步骤，以原始查询为内容。
pub fn normalize_plan(map: &Map<String, Value>, original_query: &str) -> Plan {
    let mut steps: Vec<Step> = match first_value(map, STEPS_KEYS) {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| normalize_step(v, i, original_query))
            .collect(),
        _ => Vec::new(),
    };

    if steps.is_empty() {
        steps.push(Step {
            step_number: 1,
            capability: Capability::Lookup,
            query: original_query.to_string(),
            expected_output: "Information about the query".to_string(),
            depends_on: BTreeSet::new(),
        });
    }

    let summary = text_field(map, SUMMARY_KEYS)
        .unwrap_or_else(|| format!("Execute plan for: {original_query}"));
    let complexity = text_field(map, COMPLEXITY_KEYS)
        .and_then(|raw| Complexity::parse(&raw))
        .unwrap_or_else(|| Complexity::from_step_count(steps.len()));
    let rationale = text_field(map, RATIONALE_KEYS)
        .unwrap_or_else(|| "Plan created based on query analysis".to_string());

    Plan {
        summary,
        steps,
        complexity,
        rationale,
    }
}

/// 分数值：数字、数字字符串，或带 value / score / rating 的对象
pub fn safe_float(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        Value::Object(obj) => ["value", "score", "rating"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(safe_float),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn float_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| map.get(*k)).find_map(safe_float)
}

fn has_dimensions(map: &Map<String, Value>) -> bool {
    [CORRECTNESS_KEYS, COMPLETENESS_KEYS, CONSISTENCY_KEYS]
        .iter()
        .any(|keys| float_field(map, keys).is_some())
}

fn score_from_dimensions(dims: &Map<String, Value>, overall: Option<f64>) -> Score {
    let dim = |keys: &[&str]| float_field(dims, keys).unwrap_or(DEFAULT_SCORE).clamp(0.0, 1.0);
    let mut score = Score::new(dim(CORRECTNESS_KEYS), dim(COMPLETENESS_KEYS), dim(CONSISTENCY_KEYS));
    if let Some(reported) = overall {
        score.overall = reported;
    }
    score
}

fn broadcast(value: f64) -> Score {
    let v = value.clamp(0.0, 1.0);
    let mut score = Score::new(v, v, v);
    score.overall = value;
    score
}

/// 分数纠正；返回的 overall 保留上报值（可能不一致），由 `verifier::finalize` 重算
pub fn normalize_score(map: &Map<String, Value>) -> Score {
    let top_overall = float_field(map, OVERALL_KEYS);
    match first_value(map, SCORE_KEYS) {
        Some(Value::Object(inner)) if has_dimensions(inner) => {
            score_from_dimensions(inner, float_field(inner, OVERALL_KEYS).or(top_overall))
        }
        Some(other) if safe_float(other).is_some() && !has_dimensions(map) => {
            broadcast(safe_float(other).unwrap_or(DEFAULT_SCORE))
        }
        _ if has_dimensions(map) => score_from_dimensions(map, top_overall),
        _ => match top_overall {
            Some(overall) => broadcast(overall),
            None => Score::new(DEFAULT_SCORE, DEFAULT_SCORE, DEFAULT_SCORE),
        },
    }
}

/// 决策同义词：accept / pass / approved → accept；escalate / human → escalate；其余 retry
pub fn normalize_decision(map: &Map<String, Value>) -> Decision {
    let Some(raw) = text_field(map, DECISION_KEYS) else {
        return Decision::Retry;
    };
    let raw = raw.to_lowercase();
    if raw.contains("accept") || raw.contains("pass") || raw.contains("approv") {
        Decision::Accept
    } else if raw.contains("escalat") || raw.contains("human") {
        Decision::Escalate
    } else {
        Decision::Retry
    }
}

fn normalize_issue(value: &Value) -> Option<Issue> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(Issue {
            category: "general".to_string(),
            description: s.trim().to_string(),
            severity: Severity::Minor,
            suggestion: String::new(),
        }),
        Value::Object(obj) => {
            let description = text_field(obj, &["description", "issue", "problem", "message"])?;
            Some(Issue {
                category: text_field(obj, &["category", "type", "dimension"])
                    .unwrap_or_else(|| "general".to_string()),
                description,
                severity: text_field(obj, &["severity", "priority"])
                    .map(|s| Severity::parse(&s))
                    .unwrap_or(Severity::Minor),
                suggestion: text_field(obj, &["suggestion", "fix", "recommendation"])
                    .unwrap_or_default(),
            })
        }
        _ => None,
    }
}

/// 问题列表：对象数组、字符串数组或单个字符串
pub fn normalize_issues(map: &Map<String, Value>) -> Vec<Issue> {
    match first_value(map, ISSUES_KEYS) {
        Some(Value::Array(items)) => items.iter().filter_map(normalize_issue).collect(),
        Some(single) => normalize_issue(single).into_iter().collect(),
        None => Vec::new(),
    }
}

/// 校验结果纠正（未做分数与决策的最终推导）
pub fn normalize_verification(map: &Map<String, Value>) -> VerificationResult {
    VerificationResult {
        score: normalize_score(map),
        decision: normalize_decision(map),
        issues: normalize_issues(map),
        feedback: text_field(map, FEEDBACK_KEYS).unwrap_or_default(),
        summary: text_field(map, VERIFY_SUMMARY_KEYS)
            .unwrap_or_else(|| "Verification completed".to_string()),
    }
}
