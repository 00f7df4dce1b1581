//! Error taxonomy shared by every layer of the backend.
//!
//! Storage backends translate driver errors into these categories at their
//! boundary; the RPC surface maps each category onto exactly one status code.
//! Nothing above the persistence layer ever sees SQL or driver types.

use thiserror::Error;

/// Backend error categories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed request: empty required field, length bound exceeded.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Short human-readable description, safe to return to the caller.
        message: String,
    },

    /// Missing, invalid or expired session; wrong credentials on login.
    ///
    /// Carries no detail so that a missing user and a bad password are
    /// indistinguishable to the caller.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Mutation of a resource owned by another user.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Generic description; never names the owning user.
        message: String,
    },

    /// Resource already exists.
    #[error("already exists: {resource}")]
    AlreadyExists {
        /// Name of the conflicting resource.
        resource: String,
    },

    /// Resource not found.
    #[error("not found: {resource}")]
    NotFound {
        /// Name of the missing resource.
        resource: String,
    },

    /// Persistence backend unreachable. Connection detail is logged, not
    /// surfaced.
    #[error("service unavailable")]
    Unavailable,

    /// Unexpected defect. The original cause is logged with context and the
    /// caller receives a generic message.
    #[error("internal error")]
    Internal {
        /// Diagnostic detail for the log line, never for the wire.
        message: String,
    },
}

impl Error {
    /// Convenience constructor for [`Error::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::PermissionDenied`].
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Error::PermissionDenied {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::AlreadyExists`].
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Error::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(resource: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
        }
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_carries_no_detail() {
        assert_eq!(Error::Unauthenticated.to_string(), "unauthenticated");
    }

    #[test]
    fn internal_detail_stays_out_of_display() {
        let err = Error::internal("connection pool exhausted at 10.0.0.3");
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn invalid_argument_is_caller_visible() {
        let err = Error::invalid_argument("comment content must not be empty");
        assert!(err.to_string().contains("must not be empty"));
    }
}
