use lms_core::model::{EnrollmentId, LessonId, LessonProgress, Percent, UserId};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::SqliteRepository;
use super::mapping::{db_err, lesson_progress_from_row, parse_id};
use crate::repository::{LessonProgressRepository, ProgressPersistence, StorageError};

#[async_trait::async_trait]
impl LessonProgressRepository for SqliteRepository {
    async fn get_lesson_progress(
        &self,
        student_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, lesson_id, completed, completed_at
            FROM lesson_progress
            WHERE user_id = ?1 AND lesson_id = ?2
            ",
        )
        .bind(student_id.to_string())
        .bind(lesson_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(lesson_progress_from_row).transpose()
    }

    async fn completed_lessons(
        &self,
        student_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonId>, StorageError> {
        if lesson_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT lesson_id FROM lesson_progress WHERE completed = 1 AND user_id = ",
        );
        qb.push_bind(student_id.to_string());
        qb.push(" AND lesson_id IN (");
        let mut list = qb.separated(", ");
        for id in lesson_ids {
            list.push_bind(id.to_string());
        }
        list.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(|row| parse_id(row, "lesson_id")).collect()
    }
}

#[async_trait::async_trait]
impl ProgressPersistence for SqliteRepository {
    async fn record_progress(
        &self,
        progress: &LessonProgress,
        enrollment_id: EnrollmentId,
    ) -> Result<Percent, StorageError> {
        // the upsert comes first so the transaction holds the write lock
        // before it counts
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r"
            INSERT INTO lesson_progress (id, user_id, lesson_id, completed, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                completed = excluded.completed,
                completed_at = excluded.completed_at
            ",
        )
        .bind(progress.id.to_string())
        .bind(progress.student_id.to_string())
        .bind(progress.lesson_id.to_string())
        .bind(progress.completed)
        .bind(progress.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let row = sqlx::query(
            r"
            SELECT COUNT(l.id) AS total, COUNT(lp.id) AS done
            FROM enrollments e
            JOIN lessons l ON l.course_id = e.course_id
            LEFT JOIN lesson_progress lp
                ON lp.lesson_id = l.id AND lp.user_id = e.user_id AND lp.completed = 1
            WHERE e.id = ?1
            ",
        )
        .bind(enrollment_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let total: i64 = row.try_get("total").map_err(db_err)?;
        let done: i64 = row.try_get("done").map_err(db_err)?;
        let percent = Percent::of(
            u64::try_from(done).unwrap_or(0),
            u64::try_from(total).unwrap_or(0),
        );

        let res = sqlx::query("UPDATE enrollments SET progress = ?2 WHERE id = ?1")
            .bind(enrollment_id.to_string())
            .bind(i64::from(percent.value()))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            // dropping the transaction rolls back the progress row
            return Err(StorageError::NotFound);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(percent)
    }
}
