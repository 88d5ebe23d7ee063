//! Test helper utilities for protes tests
//!
//! Environment setup for configuration tests and fixtures shared by the
//! storage, forwarding and tracking tests.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::json;

use crate::models::{BasicAuth, DbDocument, TesEndpoint, TesTask};
use crate::states::TesState;

// Test environment mutex to prevent concurrent environment variable modification.
// Tests hold the guard themselves; the helpers below do not lock.
pub static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const TEST_VARS: &[(&str, &str)] = &[(
    "TES_SERVICE_LIST",
    "https://tes-a.example.org,https://tes-b.example.org",
)];

/// Setup test environment with required variables
pub fn setup_test_env() {
    unsafe {
        for (name, value) in TEST_VARS {
            std::env::set_var(name, value);
        }
    }
}

/// Clean up test environment
pub fn cleanup_test_env() {
    unsafe {
        for (name, _) in TEST_VARS {
            std::env::remove_var(name);
        }
    }
}

/// Stored document for a task in `state`, not yet forwarded anywhere.
pub fn create_test_document(task_id: &str, worker_id: &str, state: TesState) -> DbDocument {
    DbDocument {
        task: TesTask {
            id: Some(task_id.to_string()),
            state,
            executors: serde_json::from_value(json!([
                {"image": "alpine", "command": ["echo", "hello"]}
            ]))
            .unwrap_or_default(),
            ..Default::default()
        },
        task_original: json!({
            "executors": [{"image": "alpine", "command": ["echo", "hello"]}]
        }),
        user_id: None,
        worker_id: worker_id.to_string(),
        basic_auth: BasicAuth::default(),
        tes_endpoint: TesEndpoint::default(),
    }
}
