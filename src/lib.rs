//! # protes
//!
//! protes is a proxy for GA4GH Task Execution Service (TES) instances. Clients
//! submit a task once; the proxy ranks the configured backend instances,
//! forwards the task to the first one that accepts it, and tracks the remote
//! execution in the background so clients can query a single, unified task
//! view.
//!
//! ## Architecture Overview
//!
//! ### Ranking
//! - A pipeline of **middlewares** annotates each submission with an ordered
//!   list of candidate backends
//! - Pipeline slots run in order; each slot holds fallback alternatives
//! - Built-in rankers: `distance` (great-circle distance between input
//!   locations and backends) and `random`
//!
//! ### Forwarding
//! - Submissions are stored under a freshly generated task id, then offered to
//!   the ranked backends one at a time until one accepts
//! - Credentials in input/output URLs are stripped unless the backend is Funnel
//! - The client receives the task id as soon as a backend accepts
//!
//! ### Tracking
//! - Accepted tasks are handed to a worker pool through a queue adapter
//! - Trackers poll their backend until the task finishes, mirroring state
//!   changes into the task document
//! - Cancelling a task also stops its tracker
//!
//! ## Configuration
//!
//! The service is configured via environment variables. Key variables include:
//! - `TES_SERVICE_LIST`: comma-separated base URLs of the backend instances
//! - `MIDDLEWARES`: ranking pipeline, e.g. `distance,random`
//! - `POLLING_WAIT_SECS` / `POLLING_ATTEMPTS`: tracker cadence and failure budget
//! - `AUTH_REQUIRED`: require bearer tokens and scope tasks to their owner
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-protes-<domain>-<number> <message>: <details>`
//!
//! ## Examples
//!
//! ```rust,ignore
//! use protes::{config::Config, forwarding::TaskRuns};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::new()?;
//!
//!     // Set up storage, the ranking pipeline and the tracking queue
//!     // ... setup code ...
//!
//!     let task_runs = TaskRuns::new(store, pipeline, queue, registry, http_client, settings);
//!     let created = task_runs.create_task(payload, basic_auth, None).await?;
//!     println!("submitted {}", created.id);
//!
//!     Ok(())
//! }
//! ```

/// Configuration management for the proxy.
///
/// Loads every setting from environment variables once at start-up and
/// validates it before any component is built.
pub mod config;

pub(crate) mod constants;

pub mod errors;

/// Task submission, listing, lookup and cancellation.
pub mod forwarding;

/// HTTP server and the TES API endpoints.
pub mod http;

/// Ranking middlewares and the pipeline that runs them.
pub mod middleware;

/// TES wire types and the persisted task document.
pub mod models;

/// Queue adapter abstractions between forwarding and the tracker pool.
pub mod queue_adapter;

pub mod service_info;

pub mod states;

/// Storage layer abstractions and implementations.
///
/// Task documents and the service-info document, behind traits so the
/// backing store can be replaced.
pub mod storage;

/// Background task management: the tracker pool and its lifecycle helpers.
pub mod tasks;

pub mod tes_client;

#[cfg(test)]
pub mod test_helpers;
