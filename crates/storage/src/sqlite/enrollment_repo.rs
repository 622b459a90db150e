use chrono::{DateTime, Utc};
use lms_core::model::{CourseId, Enrollment, EnrollmentId, Percent, UserId};

use super::SqliteRepository;
use super::mapping::{count_from_row, db_err, enrollment_from_row};
use crate::repository::{EnrollmentRepository, StorageError};

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO enrollments (id, user_id, course_id, enrolled_at, progress)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(enrollment.id().to_string())
        .bind(enrollment.student_id().to_string())
        .bind(enrollment.course_id().to_string())
        .bind(enrollment.enrolled_at())
        .bind(i64::from(enrollment.progress().value()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, course_id, enrolled_at, progress
            FROM enrollments
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(student_id.to_string())
        .bind(course_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn enrollments_for_student(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, course_id, enrolled_at, progress
            FROM enrollments
            WHERE user_id = ?1
            ORDER BY enrolled_at ASC, id ASC
            ",
        )
        .bind(student_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn enrollments_since(&self, since: DateTime<Utc>) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, course_id, enrolled_at, progress
            FROM enrollments
            WHERE enrolled_at >= ?1
            ORDER BY enrolled_at ASC
            ",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn recent_enrollments(&self, limit: u32) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, course_id, enrolled_at, progress
            FROM enrollments
            ORDER BY enrolled_at DESC, id ASC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn count_enrollments(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM enrollments")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        count_from_row(&row)
    }

    async fn set_cached_progress(
        &self,
        id: EnrollmentId,
        progress: Percent,
    ) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE enrollments SET progress = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(i64::from(progress.value()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
