use thiserror::Error;

/// Failure reported by a Grant Store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store data inconsistent: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

pub type AuthzResult<T> = Result<T, AuthzError>;

impl AuthzError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AuthzError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn storage(operation: &'static str, source: StoreError) -> Self {
        AuthzError::Storage { operation, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthzError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AuthzError::Conflict(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, AuthzError::Storage { .. })
    }
}

/// Wraps store failures with the name of the operation that issued the call.
pub trait StoreResultExt<T> {
    fn during(self, operation: &'static str) -> AuthzResult<T>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn during(self, operation: &'static str) -> AuthzResult<T> {
        self.map_err(|source| AuthzError::storage(operation, source))
    }
}
