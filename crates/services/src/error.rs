//! Shared error types for the services crate.

use std::time::Duration;

use thiserror::Error;

use lms_core::ValidationError;
use lms_core::model::{CourseError, LessonError, ProfileError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Coarse classification callers branch on (redirect, retry, show message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Validation,
    NotFound,
    Conflict,
    PermissionDenied,
    Transient,
    Internal,
}

/// Errors emitted by the course, enrollment, progress, analytics and profile
/// services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("no active session")]
    NoSession,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("already enrolled in this course")]
    AlreadyEnrolled,
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("background task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NoSession => ErrorKind::Unauthenticated,
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) | ServiceError::Storage(StorageError::NotFound) => {
                ErrorKind::NotFound
            }
            ServiceError::AlreadyEnrolled
            | ServiceError::Conflict(_)
            | ServiceError::Storage(StorageError::Conflict) => ErrorKind::Conflict,
            ServiceError::PermissionDenied(_)
            | ServiceError::Storage(StorageError::PermissionDenied(_)) => {
                ErrorKind::PermissionDenied
            }
            ServiceError::Timeout(_) | ServiceError::Storage(StorageError::Connection(_)) => {
                ErrorKind::Transient
            }
            ServiceError::Task(_) | ServiceError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// True when retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        ServiceError::PermissionDenied(reason.into())
    }
}

impl From<CourseError> for ServiceError {
    fn from(e: CourseError) -> Self {
        ServiceError::Validation(e.into())
    }
}

impl From<LessonError> for ServiceError {
    fn from(e: LessonError) -> Self {
        ServiceError::Validation(e.into())
    }
}

impl From<ProfileError> for ServiceError {
    fn from(e: ProfileError) -> Self {
        ServiceError::Validation(e.into())
    }
}

/// Errors from reading `LMS_*` configuration.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key} value: {raw}")]
    Invalid { key: &'static str, raw: String },
    #[error("unknown backend {0:?} (expected sqlite or rest)")]
    UnknownBackend(String),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
