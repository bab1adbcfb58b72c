use shared::types::ServiceIdentity;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failures surfaced by registry operations. None are retried or masked.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Service already registered: {0}")]
    DuplicateIdentity(ServiceIdentity),

    #[error("Unknown version tag: {0}")]
    InvalidVersionTag(String),

    #[error("Identity {given} does not match registered service {existing}")]
    IdentityMismatch {
        existing: ServiceIdentity,
        given: ServiceIdentity,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl RegistryError {
    pub fn not_found(what: impl ToString) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn storage(msg: impl ToString) -> Self {
        Self::StorageUnavailable(msg.to_string())
    }

    /// Stable label used in API error bodies
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::DuplicateIdentity(_) => "duplicate_identity",
            Self::InvalidVersionTag(_) => "invalid_version_tag",
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::InvalidInput(_) => "invalid_input",
            Self::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage(e)
    }
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::storage(format!("store task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(RegistryError::not_found("x").kind(), "not_found");
        assert_eq!(
            RegistryError::DuplicateIdentity(ServiceIdentity::new("a", "1")).kind(),
            "duplicate_identity"
        );
        assert_eq!(RegistryError::storage("down").kind(), "storage_unavailable");
    }

    #[test]
    fn test_sqlite_error_is_storage_failure() {
        let err: RegistryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, RegistryError::StorageUnavailable(_)));
    }
}
