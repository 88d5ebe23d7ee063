//! TES task states and the groupings used for control decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesState {
    #[default]
    Unknown,
    Queued,
    Initializing,
    Running,
    Paused,
    Complete,
    ExecutorError,
    SystemError,
    Canceled,
}

/// States that carry no information about remote progress.
pub const UNDEFINED: &[TesState] = &[TesState::Unknown];

/// States from which a client may cancel.
pub const CANCELABLE: &[TesState] = &[
    TesState::Initializing,
    TesState::Paused,
    TesState::Queued,
    TesState::Running,
];

pub const UNFINISHED: &[TesState] = &[
    TesState::Initializing,
    TesState::Paused,
    TesState::Queued,
    TesState::Running,
    TesState::Unknown,
];

/// Terminal states; once reached the record is never changed by tracking.
pub const FINISHED: &[TesState] = &[
    TesState::Complete,
    TesState::Canceled,
    TesState::ExecutorError,
    TesState::SystemError,
];

impl TesState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TesState::Unknown => "UNKNOWN",
            TesState::Queued => "QUEUED",
            TesState::Initializing => "INITIALIZING",
            TesState::Running => "RUNNING",
            TesState::Paused => "PAUSED",
            TesState::Complete => "COMPLETE",
            TesState::ExecutorError => "EXECUTOR_ERROR",
            TesState::SystemError => "SYSTEM_ERROR",
            TesState::Canceled => "CANCELED",
        }
    }

    pub fn is_finished(&self) -> bool {
        FINISHED.contains(self)
    }

    pub fn is_cancelable(&self) -> bool {
        CANCELABLE.contains(self)
    }

    pub fn is_unfinished(&self) -> bool {
        UNFINISHED.contains(self)
    }

    pub fn is_undefined(&self) -> bool {
        UNDEFINED.contains(self)
    }
}

impl fmt::Display for TesState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TesState {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "UNKNOWN" => Ok(TesState::Unknown),
            "QUEUED" => Ok(TesState::Queued),
            "INITIALIZING" => Ok(TesState::Initializing),
            "RUNNING" => Ok(TesState::Running),
            "PAUSED" => Ok(TesState::Paused),
            "COMPLETE" => Ok(TesState::Complete),
            "EXECUTOR_ERROR" => Ok(TesState::ExecutorError),
            "SYSTEM_ERROR" => Ok(TesState::SystemError),
            "CANCELED" => Ok(TesState::Canceled),
            other => Err(StorageError::InvalidState {
                state: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groupings_partition_states() {
        let all = [
            TesState::Unknown,
            TesState::Queued,
            TesState::Initializing,
            TesState::Running,
            TesState::Paused,
            TesState::Complete,
            TesState::ExecutorError,
            TesState::SystemError,
            TesState::Canceled,
        ];
        for state in all {
            assert_ne!(
                state.is_finished(),
                state.is_unfinished(),
                "{state} must be either finished or unfinished"
            );
        }
        assert!(TesState::Unknown.is_undefined());
        assert!(!TesState::Unknown.is_cancelable());
    }

    #[test]
    fn test_parse_round_trip_and_rejects_typos() {
        assert_eq!(
            "EXECUTOR_ERROR".parse::<TesState>().unwrap(),
            TesState::ExecutorError
        );
        assert_eq!(TesState::SystemError.to_string(), "SYSTEM_ERROR");

        let err = "COMPLETED".parse::<TesState>().unwrap_err();
        assert!(err.to_string().contains("error-protes-storage-4"));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&TesState::Canceled).unwrap();
        assert_eq!(json, "\"CANCELED\"");
        let state: TesState = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(state, TesState::Paused);
    }
}
