//! # 执行器内嵌RPC服务
//!
//! 面向调度中心的五个接口：`beat`、`idleBeat`、`run`、`kill`、`log`。
//! 访问令牌在中间件层校验，未通过的请求直接拒绝。

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::warn;

use jobhive_core::constants::ACCESS_TOKEN_HEADER;
use jobhive_core::{IdleBeatRequest, KillRequest, LogRequest, LogResult, Response, TriggerRequest};

use crate::executor::ExecutorService;

#[derive(Clone)]
pub struct EmbedServerState {
    pub service: Arc<ExecutorService>,
    pub access_token: String,
}

pub fn create_router(state: EmbedServerState) -> Router {
    Router::new()
        .route("/beat", post(handle_beat))
        .route("/idleBeat", post(handle_idle_beat))
        .route("/run", post(handle_run))
        .route("/kill", post(handle_kill))
        .route("/log", post(handle_log))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            check_access_token,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn check_access_token(
    State(state): State<EmbedServerState>,
    request: Request,
    next: Next,
) -> axum::response::Response {
    let token = request
        .headers()
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if token != state.access_token {
        warn!(path = %request.uri().path(), "访问令牌校验失败");
        return Json(Response::<String>::of_fail("访问令牌校验失败")).into_response();
    }
    next.run(request).await
}

async fn handle_beat() -> Json<Response<String>> {
    Json(Response::of_success())
}

async fn handle_idle_beat(
    State(state): State<EmbedServerState>,
    Json(req): Json<IdleBeatRequest>,
) -> Json<Response<String>> {
    Json(state.service.idle_beat(req).await)
}

async fn handle_run(
    State(state): State<EmbedServerState>,
    Json(req): Json<TriggerRequest>,
) -> Json<Response<String>> {
    Json(state.service.run(req).await)
}

async fn handle_kill(
    State(state): State<EmbedServerState>,
    Json(req): Json<KillRequest>,
) -> Json<Response<String>> {
    Json(state.service.kill(req).await)
}

async fn handle_log(
    State(state): State<EmbedServerState>,
    Json(req): Json<LogRequest>,
) -> Json<Response<LogResult>> {
    Json(state.service.read_log(req).await)
}
