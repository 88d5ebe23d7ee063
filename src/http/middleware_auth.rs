use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::{auth::bearer_token, context::WebContext, errors::ApiError};

/// Identity of the caller, `None` when authorization is disabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CurrentUser(pub Option<String>);

impl CurrentUser {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Resolve the caller before task handlers run.
///
/// With authorization required, a request without a valid token is
/// rejected here and never reaches the store.
pub(super) async fn resolve_user(
    State(web_context): State<WebContext>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = &web_context.config.auth;
    let user = if auth.required {
        let token = bearer_token(request.headers(), auth)?;
        Some(web_context.token_validator.validate(&token).await?)
    } else {
        None
    };

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
