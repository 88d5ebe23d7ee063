use axum::{
    Extension,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    errors::HttpError,
    forwarding::TaskView,
    http::{
        WebContext, auth::parse_basic_auth, errors::ApiError, middleware_auth::CurrentUser,
    },
};

const CANCEL_ACTION: &str = ":cancel";

#[derive(Debug, Deserialize)]
pub(super) struct ListTasksQuery {
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
    pub view: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ViewQuery {
    pub view: Option<String>,
}

fn parse_view(view: Option<&str>) -> Result<TaskView, ApiError> {
    match view {
        None | Some("") => Ok(TaskView::default()),
        Some(view) => Ok(view.parse::<TaskView>()?),
    }
}

fn bad_request(details: String) -> ApiError {
    HttpError::BadRequest { details }.into()
}

pub(super) async fn handle_create_task(
    State(context): State<WebContext>,
    Extension(user): Extension<CurrentUser>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|e| bad_request(e.body_text()))?;
    let basic_auth = parse_basic_auth(&headers)?;

    let response = context
        .task_runs
        .create_task(payload, basic_auth, user.0)
        .await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

pub(super) async fn handle_list_tasks(
    State(context): State<WebContext>,
    Extension(user): Extension<CurrentUser>,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    let view = parse_view(query.view.as_deref())?;

    let response = context
        .task_runs
        .list_tasks(query.page_size, query.page_token, view, user.id())
        .await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

pub(super) async fn handle_get_task(
    State(context): State<WebContext>,
    Extension(user): Extension<CurrentUser>,
    Path(task_id): Path<String>,
    query: Result<Query<ViewQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;
    let view = parse_view(query.view.as_deref())?;

    let task = context
        .task_runs
        .get_task(&task_id, view, user.id())
        .await?;
    Ok((StatusCode::OK, Json(task)).into_response())
}

/// `POST /tasks/{id}:cancel`. The path segment arrives whole, so the action
/// suffix is split off here; any other action is not found.
pub(super) async fn handle_task_action(
    State(context): State<WebContext>,
    Extension(user): Extension<CurrentUser>,
    Path(segment): Path<String>,
) -> Result<Response, ApiError> {
    let task_id = segment
        .strip_suffix(CANCEL_ACTION)
        .filter(|task_id| !task_id.is_empty())
        .ok_or_else(|| {
            ApiError::from(HttpError::NotFound {
                details: format!("no action at /tasks/{}", segment),
            })
        })?;

    let response = context.task_runs.cancel_task(task_id, user.id()).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}
