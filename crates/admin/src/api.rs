//! # 调度中心openapi
//!
//! 面向执行器的三个入站接口：`callback`、`registry`、`registryRemove`。
//! 访问令牌在中间件层校验，未通过的请求不会触达业务逻辑。

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::warn;

use jobhive_core::constants::ACCESS_TOKEN_HEADER;
use jobhive_core::{CallbackRequest, RegistryRequest, Response};

use crate::complete::JobCompleteService;
use crate::registry::RegistryService;

#[derive(Clone)]
pub struct OpenApiState {
    pub complete: Arc<JobCompleteService>,
    pub registry: Arc<RegistryService>,
    pub access_token: String,
}

pub fn create_router(state: OpenApiState) -> Router {
    Router::new()
        .route("/api/callback", post(handle_callback))
        .route("/api/registry", post(handle_registry))
        .route("/api/registryRemove", post(handle_registry_remove))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            check_access_token,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 访问令牌校验中间件
async fn check_access_token(
    State(state): State<OpenApiState>,
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

async fn handle_callback(
    State(state): State<OpenApiState>,
    Json(batch): Json<Vec<CallbackRequest>>,
) -> Json<Response<String>> {
    Json(state.complete.handle_callbacks(batch).await)
}

async fn handle_registry(
    State(state): State<OpenApiState>,
    Json(req): Json<RegistryRequest>,
) -> Json<Response<String>> {
    match state.registry.registry(req).await {
        Ok(()) => Json(Response::of_success()),
        Err(e) => Json(Response::of_fail(e.to_string())),
    }
}

async fn handle_registry_remove(
    State(state): State<OpenApiState>,
    Json(req): Json<RegistryRequest>,
) -> Json<Response<String>> {
    match state.registry.registry_remove(req).await {
        Ok(()) => Json(Response::of_success()),
        Err(e) => Json(Response::of_fail(e.to_string())),
    }
}
