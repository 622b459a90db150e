use thiserror::Error;

use crate::model::{CourseError, LessonError, ProfileError};

/// Any domain validation failure, raised before a write is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}
