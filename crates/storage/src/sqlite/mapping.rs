use chrono::{DateTime, Utc};
use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, LessonProgress,
    LessonProgressId, MediaUrl, Percent, Price, Profile, Role, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Map driver errors, turning constraint violations into domain outcomes.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StorageError::Conflict;
        }
        if db.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn parse_id<T>(row: &SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(ser)?;
    raw.parse::<T>().map_err(ser)
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn count_from_row(row: &SqliteRow) -> Result<u64, StorageError> {
    let n: i64 = row.try_get("n").map_err(ser)?;
    i64_to_u64("count", n)
}

fn media(raw: Option<String>) -> Result<Option<MediaUrl>, StorageError> {
    MediaUrl::parse_optional(raw.as_deref()).map_err(ser)
}

pub(crate) fn profile_from_row(row: &SqliteRow) -> Result<Profile, StorageError> {
    let id: UserId = parse_id(row, "id")?;
    let role_raw: Option<String> = row.try_get("role").map_err(ser)?;
    let role = Role::from_stored(role_raw.as_deref()).map_err(ser)?;
    Ok(Profile::from_persisted(
        id,
        row.try_get::<String, _>("email").map_err(ser)?,
        row.try_get::<Option<String>, _>("full_name").map_err(ser)?,
        role,
        row.try_get::<DateTime<Utc>, _>("created_at").map_err(ser)?,
    ))
}

pub(crate) fn course_from_row(row: &SqliteRow) -> Result<Course, StorageError> {
    let id: CourseId = parse_id(row, "id")?;
    let instructor_id: UserId = parse_id(row, "instructor_id")?;
    let price_cents: i64 = row.try_get("price_cents").map_err(ser)?;
    Course::from_persisted(
        id,
        instructor_id,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("description").map_err(ser)?,
        Price::from_cents(i64_to_u64("price_cents", price_cents)?),
        media(row.try_get("image_url").map_err(ser)?)?,
        row.try_get::<bool, _>("is_published").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("updated_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn lesson_from_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    let id: LessonId = parse_id(row, "id")?;
    let course_id: CourseId = parse_id(row, "course_id")?;
    let order_index: i64 = row.try_get("order_index").map_err(ser)?;
    let order_index = u32::try_from(order_index)
        .map_err(|_| StorageError::Serialization(format!("order_index out of range: {order_index}")))?;
    Lesson::from_persisted(
        id,
        course_id,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("content").map_err(ser)?,
        media(row.try_get("video_url").map_err(ser)?)?,
        order_index,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("updated_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn enrollment_from_row(row: &SqliteRow) -> Result<Enrollment, StorageError> {
    let id: EnrollmentId = parse_id(row, "id")?;
    let student_id: UserId = parse_id(row, "user_id")?;
    let course_id: CourseId = parse_id(row, "course_id")?;
    let progress: i64 = row.try_get("progress").map_err(ser)?;
    let progress = u32::try_from(progress)
        .map_err(|_| StorageError::Serialization(format!("progress out of range: {progress}")))?;
    Ok(Enrollment::from_persisted(
        id,
        student_id,
        course_id,
        row.try_get("enrolled_at").map_err(ser)?,
        Percent::clamped(progress),
    ))
}

pub(crate) fn lesson_progress_from_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    let id: LessonProgressId = parse_id(row, "id")?;
    Ok(LessonProgress {
        id,
        student_id: parse_id(row, "user_id")?,
        lesson_id: parse_id(row, "lesson_id")?,
        completed: row.try_get("completed").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}
