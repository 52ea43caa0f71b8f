use std::sync::Arc;

use thiserror::Error;

/// Boxed collaborator error shared between single-flight waiters
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{context}: {source}")]
    Upstream {
        context: String,
        #[source]
        source: SharedSource,
    },

    #[error("Canceled: {0}")]
    Canceled(String),

    /// The user has no credentials bound for the requested vendor backend
    #[error("Vendor not bound: {0}")]
    VendorNotBound(String),

    /// The vendor path resolved to something that cannot be played (e.g. a directory)
    #[error("Not playable: {0}")]
    NotPlayable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification preserved across the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidOperation,
    ResourceExhausted,
    UpstreamFailure,
    Canceled,
}

impl Error {
    /// Wrap a collaborator (storage/vendor) failure with operation context
    pub fn upstream<E>(context: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream {
            context: context.into(),
            source: Arc::new(err),
        }
    }

    /// Attach operation context to a failed collaborator call
    ///
    /// Errors that already carry a taxonomy kind other than upstream failure
    /// pass through unchanged, so callers can still match on them.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Self::Internal(_) | Self::Upstream { .. } => Self::upstream(context, self),
            other => other,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::VendorNotBound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::InvalidOperation(_) | Self::NotPlayable(_) => ErrorKind::InvalidOperation,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Upstream { .. } | Self::Internal(_) => ErrorKind::UpstreamFailure,
            Self::Canceled(_) => ErrorKind::Canceled,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
