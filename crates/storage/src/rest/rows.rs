//! Wire shapes of the hosted tables.

use chrono::{DateTime, Utc};
use lms_core::analytics::CourseTally;
use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, LessonProgress,
    LessonProgressId, MediaUrl, Percent, Price, Profile, Role, UserId,
};
use serde::{Deserialize, Serialize};

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn media(raw: Option<&str>) -> Result<Option<MediaUrl>, StorageError> {
    MediaUrl::parse_optional(raw).map_err(ser)
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ProfileRow {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProfileRow {
    pub fn into_profile(self) -> Result<Profile, StorageError> {
        let role = Role::from_stored(self.role.as_deref()).map_err(ser)?;
        Ok(Profile::from_persisted(
            self.id,
            self.email,
            self.full_name,
            role,
            self.created_at,
        ))
    }
}

impl From<&Profile> for ProfileRow {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id(),
            email: p.email().to_owned(),
            full_name: p.full_name().map(ToOwned::to_owned),
            role: Some(p.role().as_str().to_owned()),
            created_at: p.created_at(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CourseRow {
    pub id: CourseId,
    pub instructor_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CourseRow {
    pub fn into_course(self) -> Result<Course, StorageError> {
        Course::from_persisted(
            self.id,
            self.instructor_id,
            self.title,
            self.description.unwrap_or_default(),
            Price::from_amount(self.price).map_err(ser)?,
            media(self.image_url.as_deref())?,
            self.is_published,
            self.created_at,
            self.updated_at.unwrap_or(self.created_at),
        )
        .map_err(ser)
    }
}

impl From<&Course> for CourseRow {
    fn from(c: &Course) -> Self {
        Self {
            id: c.id(),
            instructor_id: c.instructor_id(),
            title: c.title().to_owned(),
            description: Some(c.description().to_owned()),
            image_url: c.image_url().map(|u| u.as_str().to_owned()),
            price: c.price().amount(),
            is_published: c.is_published(),
            created_at: c.created_at(),
            updated_at: Some(c.updated_at()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountRow {
    pub count: u64,
}

/// `select=id,title,created_at,enrollments(count)`
#[derive(Debug, Deserialize)]
pub(crate) struct CourseTallyRow {
    pub id: CourseId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub enrollments: Vec<CountRow>,
}

impl From<CourseTallyRow> for CourseTally {
    fn from(row: CourseTallyRow) -> Self {
        Self {
            course_id: row.id,
            title: row.title,
            created_at: row.created_at,
            enrollments: row.enrollments.iter().map(|c| c.count).sum(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LessonRow {
    pub id: LessonId,
    pub course_id: CourseId,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LessonRow {
    pub fn into_lesson(self) -> Result<Lesson, StorageError> {
        let order_index = u32::try_from(self.order_index).map_err(|_| {
            StorageError::Serialization(format!("order_index out of range: {}", self.order_index))
        })?;
        Lesson::from_persisted(
            self.id,
            self.course_id,
            self.title,
            self.content.unwrap_or_default(),
            media(self.video_url.as_deref())?,
            order_index,
            self.created_at,
            self.updated_at.unwrap_or(self.created_at),
        )
        .map_err(ser)
    }
}

impl From<&Lesson> for LessonRow {
    fn from(l: &Lesson) -> Self {
        Self {
            id: l.id(),
            course_id: l.course_id(),
            title: l.title().to_owned(),
            content: Some(l.content().to_owned()),
            video_url: l.video_url().map(|u| u.as_str().to_owned()),
            order_index: i64::from(l.order_index()),
            created_at: l.created_at(),
            updated_at: Some(l.updated_at()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdRow<T> {
    pub id: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EnrollmentRow {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: i64,
}

impl EnrollmentRow {
    pub fn into_enrollment(self) -> Enrollment {
        let progress = u32::try_from(self.progress.max(0)).unwrap_or(u32::MAX);
        Enrollment::from_persisted(
            self.id,
            self.user_id,
            self.course_id,
            self.enrolled_at,
            Percent::clamped(progress),
        )
    }
}

impl From<&Enrollment> for EnrollmentRow {
    fn from(e: &Enrollment) -> Self {
        Self {
            id: e.id(),
            user_id: e.student_id(),
            course_id: e.course_id(),
            enrolled_at: e.enrolled_at(),
            progress: i64::from(e.progress().value()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LessonProgressRow {
    pub id: LessonProgressId,
    pub user_id: UserId,
    pub lesson_id: LessonId,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<LessonProgressRow> for LessonProgress {
    fn from(row: LessonProgressRow) -> Self {
        Self {
            id: row.id,
            student_id: row.user_id,
            lesson_id: row.lesson_id,
            completed: row.completed,
            completed_at: row.completed_at,
        }
    }
}

impl From<&LessonProgress> for LessonProgressRow {
    fn from(p: &LessonProgress) -> Self {
        Self {
            id: p.id,
            user_id: p.student_id,
            lesson_id: p.lesson_id,
            completed: p.completed,
            completed_at: p.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletedRow {
    pub lesson_id: LessonId,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProgressPatch {
    pub progress: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthUserRow {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_row_accepts_hosted_shape() {
        let json = r#"{
            "id": "6f1c1f2e-93a4-4c61-8d5e-5b8e1b8f0b11",
            "instructor_id": "0b0f7c53-5f3c-4c7d-a4b8-0d3f7b3e2a10",
            "title": "  Rust basics ",
            "description": null,
            "image_url": "",
            "price": 19.99,
            "is_published": true,
            "created_at": "2024-03-01T10:00:00+00:00"
        }"#;
        let row: CourseRow = serde_json::from_str(json).unwrap();
        let course = row.into_course().unwrap();
        assert_eq!(course.title(), "Rust basics");
        assert_eq!(course.price().cents(), 1999);
        assert!(course.image_url().is_none());
        assert_eq!(course.updated_at(), course.created_at());
    }

    #[test]
    fn tally_sums_nested_count() {
        let json = r#"{
            "id": "6f1c1f2e-93a4-4c61-8d5e-5b8e1b8f0b11",
            "title": "Rust",
            "created_at": "2024-03-01T10:00:00Z",
            "enrollments": [{"count": 7}]
        }"#;
        let row: CourseTallyRow = serde_json::from_str(json).unwrap();
        assert_eq!(CourseTally::from(row).enrollments, 7);
    }

    #[test]
    fn profile_without_role_is_student() {
        let json = r#"{
            "id": "0b0f7c53-5f3c-4c7d-a4b8-0d3f7b3e2a10",
            "email": "ana@example.com",
            "full_name": null,
            "role": null,
            "created_at": "2024-03-01T10:00:00Z"
        }"#;
        let row: ProfileRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.into_profile().unwrap().role(), Role::Student);
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let json = r#"{
            "id": "6f1c1f2e-93a4-4c61-8d5e-5b8e1b8f0b11",
            "user_id": "0b0f7c53-5f3c-4c7d-a4b8-0d3f7b3e2a10",
            "course_id": "1a2b3c4d-93a4-4c61-8d5e-5b8e1b8f0b11",
            "enrolled_at": "2024-03-01T10:00:00Z",
            "progress": 140
        }"#;
        let row: EnrollmentRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.into_enrollment().progress(), Percent::FULL);
    }
}
