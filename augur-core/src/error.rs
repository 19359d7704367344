use thiserror::Error;
use uuid::Uuid;

/// Failures that cross the core's boundary.
///
/// Per-response predictor failures never appear here; they are folded into
/// the result set as sentinel values.
#[derive(Error, Debug)]
pub enum AugurError {
    #[error("Form not found: {0}")]
    NotFound(Uuid),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Prediction batch cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
