use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use crate::http::{WebContext, errors::ApiError};

pub(super) async fn handle_service_info(
    State(context): State<WebContext>,
) -> Result<Response, ApiError> {
    let service_info = context.service_info.get().await?;
    Ok((StatusCode::OK, Json(service_info)).into_response())
}
