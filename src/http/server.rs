use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use http::{
    Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_http::{classify::ServerErrorsFailureClass, timeout::TimeoutLayer};
use tracing::Span;

use crate::errors::HttpError;
use crate::http::{
    context::WebContext,
    errors::ApiError,
    handle_service_info::handle_service_info,
    handle_tasks::{handle_create_task, handle_get_task, handle_list_tasks, handle_task_action},
    middleware_auth::resolve_user,
};

/// Routes are mounted both at the root and below the GA4GH base path, so
/// clients configured with either form of the proxy URL work.
pub const API_BASE_PATH: &str = "/ga4gh/tes/v1";

fn api_routes(web_context: &WebContext) -> Router<WebContext> {
    let task_routes = Router::new()
        .route("/tasks", post(handle_create_task).get(handle_list_tasks))
        .route(
            "/tasks/{id}",
            get(handle_get_task).post(handle_task_action),
        )
        .layer(middleware::from_fn_with_state(
            web_context.clone(),
            resolve_user,
        ));

    Router::new()
        .route("/service-info", get(handle_service_info))
        .merge(task_routes)
}

async fn handle_not_found() -> ApiError {
    HttpError::NotFound {
        details: "no such endpoint".to_string(),
    }
    .into()
}

pub fn build_router(web_context: WebContext) -> Router {
    let router = Router::new()
        .merge(api_routes(&web_context))
        .nest(API_BASE_PATH, api_routes(&web_context))
        .fallback(handle_not_found);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &http::Request<_>| {
            let trace_id = request
                .headers()
                .get("x-trace-id")
                .and_then(|h| h.to_str().ok())
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                trace_id = %trace_id,
                request_id = %uuid::Uuid::new_v4(),
            )
        })
        .on_request(|request: &http::Request<_>, _span: &Span| {
            tracing::info!(
                "started processing request {} {}",
                request.method(),
                request.uri().path()
            );
        })
        .on_response(
            |response: &http::Response<_>, latency: Duration, _span: &Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis(),
                    "finished processing request"
                );
            },
        )
        .on_failure(
            |err: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                tracing::error!(
                    error = ?err,
                    latency_ms = latency.as_millis(),
                    "request failed"
                );
            },
        );

    // Creation may run three bounded backend calls per candidate.
    let request_timeout = *web_context.config.http_client_timeout.as_ref()
        * (3 * web_context.config.tes.service_list.len() as u32 + 1);

    router
        .layer((trace_layer, TimeoutLayer::new(request_timeout.max(Duration::from_secs(30)))))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE]),
        )
        .with_state(web_context)
}
