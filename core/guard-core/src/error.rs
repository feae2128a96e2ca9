//! Error types for sleepguard-core operations.

use std::path::PathBuf;

/// All errors that can occur while starting, running, or stopping the guard.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Callback slot {0} already in use")]
    SlotBusy(usize),

    #[error("No free callback slot among candidates {0:?}")]
    SlotsExhausted(Vec<usize>),

    #[error("Event bus registration failed: {0}")]
    Registration(String),

    #[error("Observer worker failed to start: {source}")]
    WorkerSpawn {
        #[source]
        source: std::io::Error,
    },

    #[error("Observer worker did not exit within {timeout_ms} ms; abandoning it")]
    WorkerJoinTimedOut { timeout_ms: u64 },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using GuardError.
pub type Result<T> = std::result::Result<T, GuardError>;
