use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, LessonId};
use crate::model::media::{MediaUrl, MediaUrlError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("lesson title cannot be empty")]
    EmptyTitle,

    #[error("invalid lesson video: {0}")]
    InvalidVideo(#[source] MediaUrlError),
}

/// Unvalidated lesson form input.
///
/// `order_index` of `None` appends the lesson after the current last one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LessonDraft {
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub order_index: Option<u32>,
}

impl LessonDraft {
    /// Validate the draft into a lesson at `order_index`.
    ///
    /// # Errors
    ///
    /// Returns `LessonError` for a blank title or a malformed video reference.
    pub fn validate(
        self,
        course_id: CourseId,
        order_index: u32,
        now: DateTime<Utc>,
    ) -> Result<Lesson, LessonError> {
        let video_url =
            MediaUrl::parse_optional(self.video_url.as_deref()).map_err(LessonError::InvalidVideo)?;
        Lesson::from_persisted(
            LessonId::generate(),
            course_id,
            self.title,
            self.content,
            video_url,
            order_index,
            now,
            now,
        )
    }
}

/// A single unit of course content; `order_index` is unique within its course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    id: LessonId,
    course_id: CourseId,
    title: String,
    content: String,
    video_url: Option<MediaUrl>,
    order_index: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Lesson {
    /// Rebuilds a lesson from stored fields.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::EmptyTitle` if the title is blank.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: LessonId,
        course_id: CourseId,
        title: impl Into<String>,
        content: impl Into<String>,
        video_url: Option<MediaUrl>,
        order_index: u32,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, LessonError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(LessonError::EmptyTitle);
        }
        Ok(Self {
            id,
            course_id,
            title: title.trim().to_owned(),
            content: content.into(),
            video_url,
            order_index,
            created_at,
            updated_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn video_url(&self) -> Option<&MediaUrl> {
        self.video_url.as_ref()
    }

    #[must_use]
    pub fn order_index(&self) -> u32 {
        self.order_index
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
