//! Error types for Stowaway.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Caller input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Path validation error: {0}")]
    NothingToSave(String),

    // Remote store errors
    #[error("Unable to reserve cache with key {key}, another job may be creating this cache")]
    ReservationConflict { key: String },

    #[error("Cache service responded with {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    // Local archive errors
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Cache size of ~{size} bytes is over the {limit} bytes limit, not saving cache")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("{program} failed with exit code {exit_code:?}: {stderr}")]
    Process {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// How a pipeline treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Caller input defect. Always propagated.
    Validation,
    /// Another job already claimed the key. Expected, swallowed.
    ReservationConflict,
    /// Network, codec, process or disk failure. Swallowed.
    Infrastructure,
}

impl Error {
    /// Classify this error for the save/restore failure policy.
    pub fn class(&self) -> FailureClass {
        match self {
            Error::Validation(_) | Error::NothingToSave(_) => FailureClass::Validation,
            Error::ReservationConflict { .. } => FailureClass::ReservationConflict,
            Error::Http { .. }
            | Error::Network(_)
            | Error::Archive(_)
            | Error::ArchiveTooLarge { .. }
            | Error::Process { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Internal(_) => FailureClass::Infrastructure,
        }
    }

    /// Whether the error must reach the caller unmodified.
    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::Validation
    }
}
