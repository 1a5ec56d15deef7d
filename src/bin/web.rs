//! PEV Agent HTTP 服务
//!
//! 启动: cargo run --bin pev-web --features web
//! 监听地址见 `[api].bind`，可用 PEV_WEB_BIND 覆盖

#![cfg(feature = "web")]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use pev_agent::config::{load_config, ApiSection};
use pev_agent::core::{AgentResponse, ExecutionStepDetail, ScoreDetails};
use pev_agent::{classify, observability, Capability, Orchestrator, OrchestratorBuilder, QueryCategory};

/// 查询内容最大字符数
const MAX_CONTENT_CHARS: usize = 10_000;

struct AppState {
    orchestrator: Arc<Orchestrator>,
    request_timeout: Duration,
    complex_timeout: Duration,
}

impl AppState {
    fn new(orchestrator: Orchestrator, api: &ApiSection) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            request_timeout: Duration::from_secs(api.request_timeout_secs),
            complex_timeout: Duration::from_secs(api.complex_timeout_secs),
        }
    }

    fn timeout_for(&self, category: QueryCategory) -> Duration {
        if category == QueryCategory::Complex {
            self.complex_timeout
        } else {
            self.request_timeout
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    content: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    content: String,
    processing_time_ms: u64,
    session_id: String,
    capabilities_used: Vec<Capability>,
    turn_count: u32,
    verification_score: Option<f64>,
    iterations_used: u32,
    requires_human_review: bool,
    plan_summary: Option<String>,
    plan_rationale: Option<String>,
    execution_steps: Vec<ExecutionStepDetail>,
    score_details: Option<ScoreDetails>,
    query_category: QueryCategory,
}

impl From<AgentResponse> for QueryResponse {
    fn from(r: AgentResponse) -> Self {
        Self {
            content: r.content,
            processing_time_ms: r.processing_time_ms,
            session_id: r.session_id,
            capabilities_used: r.capabilities_used,
            turn_count: r.turn_count,
            verification_score: r.verification_score,
            iterations_used: r.iterations_used,
            requires_human_review: r.requires_human_review,
            plan_summary: r.plan_summary,
            plan_rationale: r.plan_rationale,
            execution_steps: r.execution_steps,
            score_details: r.score_details,
            query_category: r.category,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error_code,
            message: message.into(),
        }),
    )
        .into_response()
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent/query", post(api_query))
        .route("/agent/health", get(api_health))
        .route(
            "/agent/sessions/:id",
            get(api_session_get).delete(api_session_delete),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None)?;
    observability::init(&cfg.log);

    let api = cfg.api.clone();
    let orchestrator = OrchestratorBuilder::new(cfg).build()?;
    let state = Arc::new(AppState::new(orchestrator, &api));

    let bind = std::env::var("PEV_WEB_BIND").unwrap_or(api.bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("PEV Agent API: http://{}", bind);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn api_query(State(state): State<Arc<AppState>>, Json(req): Json<QueryRequest>) -> Response {
    let length = req.content.chars().count();
    if req.content.trim().is_empty() || length > MAX_CONTENT_CHARS {
        return error_response(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("content must be 1 to {MAX_CONTENT_CHARS} characters, got {length}"),
        );
    }

    let timeout = state.timeout_for(classify(&req.content));
    let orchestrator = Arc::clone(&state.orchestrator);
    let mut handle = tokio::spawn(async move {
        orchestrator
            .run(&req.content, req.session_id.as_deref())
            .await
    });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(response)) => Json(QueryResponse::from(response)).into_response(),
        Ok(Err(e)) => {
            tracing::error!("query task failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "the request could not be processed",
            )
        }
        Err(_) => {
            handle.abort();
            tracing::warn!("query exceeded request timeout of {:?}", timeout);
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "REQUEST_TIMEOUT",
                format!("request exceeded {}s", timeout.as_secs()),
            )
        }
    }
}

async fn api_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "active_sessions": state.orchestrator.active_sessions().await,
    }))
}

async fn api_session_get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.orchestrator.session_info(&id).await {
        Some(info) => Json(info).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", format!("session {id} not found")),
    }
}

async fn api_session_delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if state.orchestrator.clear_session(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "NOT_FOUND", format!("session {id} not found"))
    }
}
