use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record with the given key exists in the collection.
    #[error("{collection} record not found: {key}")]
    NotFound { collection: String, key: String },
}

impl From<StoreError> for spinpost_core::SpinpostError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { collection, key } => {
                spinpost_core::SpinpostError::NotFound(format!("{collection}/{key}"))
            }
            other => spinpost_core::SpinpostError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
