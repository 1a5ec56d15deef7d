//! Planner：把查询拆成能力调用的 DAG 计划
//!
//! 调用推理服务得到 JSON 计划，经 `json` 提取、`normalize` 纠正为严格的 [`Plan`]。
//! Planner 不截断超预算的计划，由 PEV 循环通过 `Plan::validate` 发现并发起一次纠正性 refine。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::pev::classifier::QueryCategory;
use crate::pev::json::parse_json_object;
use crate::pev::normalize::normalize_plan;
use crate::pev::types::Plan;

const PLANNER_SYSTEM_PROMPT: &str = r#"You are the planning component of a cloud engineering assistant.
Break the user's request into a small plan of capability calls.

Available capabilities:
- lookup: documentation lookup and factual answers with citations
- design-guidance: architecture and best-practice recommendations
- code-generation: code, CLI commands and infrastructure-as-code templates

Respond with a single JSON object and nothing else:
{
  "summary": "one sentence describing the plan",
  "estimated_complexity": "simple | moderate | complex",
  "rationale": "why these steps",
  "steps": [
    {
      "step_number": 1,
      "capability": "lookup",
      "query": "what this step must find or produce",
      "expected_output": "what a good result looks like",
      "depends_on": []
    }
  ]
}

Rules:
- step_number starts at 1 and is unique.
- depends_on lists earlier step numbers whose output this step needs; steps without dependencies run in parallel.
- Never exceed the maximum number of steps you are given."#;

/// Planner：持有推理服务客户端，负责 create_plan / refine_plan
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 推理服务累计 token 用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    fn constraints(max_steps: usize, category: QueryCategory) -> String {
        let mut text = format!(
            "QUERY CATEGORY: {category}\nMAXIMUM STEPS: {max_steps}\n"
        );
        if let Some(cap) = category.config().default_capability {
            text.push_str(&format!("PREFERRED CAPABILITY: {cap}\n"));
        }
        text
    }

    async fn request_plan(
        &self,
        prompt: String,
        query: &str,
    ) -> Result<Plan, AgentError> {
        tracing::debug!(
            "Planner prompt: {}",
            prompt.chars().take(200).collect::<String>()
        );
        let messages = [Message::system(PLANNER_SYSTEM_PROMPT), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await?;
        let map = parse_json_object(&raw)?;
        let plan = normalize_plan(&map, query);
        tracing::info!(
            "Plan ready: {} step(s), complexity {:?}",
            plan.steps.len(),
            plan.complexity
        );
        Ok(plan)
    }

    /// 首轮规划
    pub async fn create_plan(
        &self,
        query: &str,
        max_steps: usize,
        category: QueryCategory,
    ) -> Result<Plan, AgentError> {
        let prompt = format!(
            "Create an execution plan for this request.\n\nUSER QUERY: {query}\n{}",
            Self::constraints(max_steps, category)
        );
        self.request_plan(prompt, query).await
    }

    /// 带反馈的重规划：附上上一轮计划与校验反馈
    pub async fn refine_plan(
        &self,
        query: &str,
        feedback: &str,
        previous_plan: &Plan,
        max_steps: usize,
        category: QueryCategory,
    ) -> Result<Plan, AgentError> {
        let previous = serde_json::to_string_pretty(previous_plan)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        let prompt = format!(
            "Revise the previous plan so the result addresses the feedback.\n\n\
             USER QUERY: {query}\n{}\nPREVIOUS PLAN:\n{previous}\n\nFEEDBACK:\n{feedback}",
            Self::constraints(max_steps, category)
        );
        self.request_plan(prompt, query).await
    }
}
