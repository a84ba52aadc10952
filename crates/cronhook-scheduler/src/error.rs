use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule text is empty or not a valid cadence expression.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// A job with the same title already exists.
    #[error("Job already exists: {title}")]
    DuplicateJob { title: String },

    /// A stored row could not be decoded (bad timestamp, unknown status tag).
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The store is unavailable (lock poisoned, backend down).
    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
