//! Repository error taxonomy.
//!
//! # Invariants
//! - Callers branch on [`ErrorKind`], never on message text.
//! - Only [`ErrorKind::NotFound`] is ever retried, and only under backoff.

use crate::context::{ContextField, MissingContext};
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Message-independent error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingContext,
    Validation,
    NotFound,
    Conflict,
    Storage,
    Codec,
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingContext => "missing_context",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
            Self::Codec => "codec",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum RepoError {
    /// A required identity field is absent from the context.
    MissingContext(ContextField),
    /// Input rejected before touching storage (e.g. zero id).
    Validation(String),
    NotFound,
    /// Optimistic-lock failure or duplicate key.
    Conflict(String),
    /// Store failure, tagged with the repository operation.
    Storage {
        op: &'static str,
        source: StoreError,
    },
    /// Entity could not be converted to or from its document form.
    Codec(serde_json::Error),
    /// The context deadline passed before the call completed.
    DeadlineExceeded,
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingContext(_) => ErrorKind::MissingContext,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Codec(_) => ErrorKind::Codec,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    pub(crate) fn storage(op: &'static str) -> impl FnOnce(StoreError) -> RepoError {
        move |source| RepoError::Storage { op, source }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContext(field) => write!(f, "{}", MissingContext(*field)),
            Self::Validation(message) => write!(f, "validation failed: {message}"),
            Self::NotFound => write!(f, "record not found"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::Storage { op, source } => write!(f, "{op} failed: {source}"),
            Self::Codec(err) => write!(f, "entity codec failed: {err}"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source),
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MissingContext> for RepoError {
    fn from(value: MissingContext) -> Self {
        Self::MissingContext(value.0)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, RepoError};
    use crate::context::{ContextField, MissingContext};
    use crate::store::StoreError;
    use std::error::Error;

    #[test]
    fn kinds_ignore_message_text() {
        let a = RepoError::Conflict("stale".to_string());
        let b = RepoError::Conflict("duplicate key".to_string());
        assert_eq!(a.kind(), b.kind());
        assert!(a.is(ErrorKind::Conflict));
        assert!(!a.is(ErrorKind::NotFound));
    }

    #[test]
    fn missing_context_message_names_field() {
        let err: RepoError = MissingContext(ContextField::TenantId).into();
        assert!(err.is(ErrorKind::MissingContext));
        assert_eq!(err.to_string(), "there is no tenant_id in context");
    }

    #[test]
    fn storage_error_keeps_source() {
        let err = RepoError::storage("find")(StoreError::Poisoned);
        assert_eq!(err.kind().as_str(), "storage");
        assert!(err.to_string().starts_with("find failed"));
        assert!(err.source().is_some());
    }
}
