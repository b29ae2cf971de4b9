use permissions::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("version conflict on {id}")]
    Conflict { id: String },

    #[error("{id} is still referenced by {referenced_by} record(s)")]
    InUse { id: String, referenced_by: usize },

    #[error("{id} already exists")]
    AlreadyExists { id: String },

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { kind, id } => StoreError::NotFound { kind, id },
            Error::Conflict { id } => StoreError::Conflict { id },
            Error::InUse { id, .. } => StoreError::InUse { id },
            Error::AlreadyExists { id } => StoreError::AlreadyExists { id },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
