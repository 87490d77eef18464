use flockview_core_types::{FlockError, ScopeKey};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("scope already tracked: {0}")]
    DuplicateScope(ScopeKey),
    #[error("parent scope not tracked for {0}")]
    OrphanScope(ScopeKey),
    #[error("scope not tracked: {0}")]
    NotFound(ScopeKey),
    #[error("session closed")]
    SessionClosed,
    #[error("document rejected: {0}")]
    InvalidDocument(String),
}

impl RegistryError {
    pub fn into_flock_error(self, detail: impl Into<String>) -> FlockError {
        let message = format!("{}: {}", self, detail.into());
        match self {
            RegistryError::DuplicateScope(_) | RegistryError::OrphanScope(_) => {
                FlockError::invariant(message)
            }
            RegistryError::SessionClosed => FlockError::Cancelled,
            _ => FlockError::new(message),
        }
    }
}

impl From<RegistryError> for FlockError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::DuplicateScope(_) | RegistryError::OrphanScope(_) => {
                FlockError::invariant(value.to_string())
            }
            RegistryError::SessionClosed => FlockError::Cancelled,
            other => FlockError::new(other.to_string()),
        }
    }
}
