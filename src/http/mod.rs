//! HTTP API of the proxy.
//!
//! The GA4GH TES task endpoints plus `GET /service-info`, served by axum.
//! Every route is reachable at the root and below `/ga4gh/tes/v1`.
//!
//! - `POST /tasks` creates and forwards a task, answering `{"id"}`
//! - `GET /tasks` lists tasks with `page_size`, `page_token` and `view`
//! - `GET /tasks/{id}` returns one task in the requested `view`
//! - `POST /tasks/{id}:cancel` cancels a task
//! - `GET /service-info` returns the service metadata
//!
//! Errors are answered as `{"message", "code"}`, see [`errors::ApiError`].

pub(crate) mod auth;

/// HTTP context and application state management.
pub mod context;

pub mod errors;
pub(crate) mod handle_service_info;
pub(crate) mod handle_tasks;
pub mod middleware_auth;

/// HTTP server configuration and setup.
pub mod server;

pub use auth::TokenValidator;
pub use context::*;
pub use server::*;
