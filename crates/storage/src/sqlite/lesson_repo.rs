use lms_core::model::{CourseId, Lesson, LessonId};

use super::SqliteRepository;
use super::mapping::{count_from_row, db_err, lesson_from_row, parse_id};
use crate::repository::{LessonRepository, StorageError};

#[async_trait::async_trait]
impl LessonRepository for SqliteRepository {
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO lessons (id, course_id, title, content, video_url, order_index, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(lesson.id().to_string())
        .bind(lesson.course_id().to_string())
        .bind(lesson.title())
        .bind(lesson.content())
        .bind(lesson.video_url().map(|u| u.as_str().to_owned()))
        .bind(i64::from(lesson.order_index()))
        .bind(lesson.created_at())
        .bind(lesson.updated_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, course_id, title, content, video_url, order_index, created_at, updated_at
            FROM lessons WHERE id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(lesson_from_row).transpose()
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, course_id, title, content, video_url, order_index, created_at, updated_at
            FROM lessons
            WHERE course_id = ?1
            ORDER BY order_index ASC
            ",
        )
        .bind(course_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(lesson_from_row).collect()
    }

    async fn lesson_ids_for_course(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<LessonId>, StorageError> {
        let rows = sqlx::query("SELECT id FROM lessons WHERE course_id = ?1 ORDER BY order_index ASC")
            .bind(course_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(|row| parse_id(row, "id")).collect()
    }

    async fn count_lessons(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM lessons")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        count_from_row(&row)
    }
}
