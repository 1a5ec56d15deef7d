//! 推理服务结构化输出的 JSON 提取
//!
//! 第一阶段：去掉 markdown 代码块，截取第一个括号平衡的 `{...}` 对象（感知字符串字面量），
//! 解析为松散的 `serde_json::Map`。字段级的纠正在 `normalize` 中完成。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::core::AgentError;

static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn fence_re() -> Option<&'static Regex> {
    FENCE_RE
        .get_or_init(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").ok())
        .as_ref()
}

/// 返回代码块内的内容；没有代码块时原样返回
pub fn strip_code_fence(raw: &str) -> &str {
    fence_re()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
}

/// 从首个 `{` 起按深度配对，字符串内的括号与转义不计入
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 截取第一个平衡的 JSON 对象文本；代码块优先，代码块内没有对象时再查全文
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let fenced = strip_code_fence(raw);
    balanced_object(fenced).or_else(|| balanced_object(raw))
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

/// 提取并解析为 JSON 对象
///
/// - 找不到对象：`NoJsonObject`
/// - 对象文本非法或顶层不是对象：`JsonParseError`
pub fn parse_json_object(raw: &str) -> Result<Map<String, Value>, AgentError> {
    let text = extract_json_object(raw).ok_or_else(|| AgentError::NoJsonObject(preview(raw)))?;
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AgentError::JsonParseError(format!(
            "expected object, got {}",
            preview(&other.to_string())
        ))),
        Err(e) => Err(AgentError::JsonParseError(e.to_string())),
    }
}
