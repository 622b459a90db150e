use lms_core::analytics::CourseTally;
use lms_core::model::{Course, CourseId};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::SqliteRepository;
use super::mapping::{count_from_row, course_from_row, db_err, parse_id, ser, u64_to_i64};
use crate::repository::{CourseFilter, CourseRepository, StorageError};

const COURSE_COLUMNS: &str = "id, instructor_id, title, description, image_url, price_cents, is_published, created_at, updated_at";

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO courses (id, instructor_id, title, description, image_url, price_cents, is_published, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(course.id().to_string())
        .bind(course.instructor_id().to_string())
        .bind(course.title())
        .bind(course.description())
        .bind(course.image_url().map(|u| u.as_str().to_owned()))
        .bind(u64_to_i64("price_cents", course.price().cents())?)
        .bind(course.is_published())
        .bind(course.created_at())
        .bind(course.updated_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_course(&self, course: &Course) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE courses
            SET title = ?2, description = ?3, image_url = ?4, price_cents = ?5,
                is_published = ?6, updated_at = ?7
            WHERE id = ?1
            ",
        )
        .bind(course.id().to_string())
        .bind(course.title())
        .bind(course.description())
        .bind(course.image_url().map(|u| u.as_str().to_owned()))
        .bind(u64_to_i64("price_cents", course.price().cents())?)
        .bind(course.is_published())
        .bind(course.updated_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let row = sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(course_from_row).transpose()
    }

    async fn get_courses(&self, ids: &[CourseId]) -> Result<Vec<Course>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id IN ("));
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(id.to_string());
        }
        list.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(course_from_row).collect()
    }

    async fn list_courses(&self, filter: CourseFilter, limit: u32) -> Result<Vec<Course>, StorageError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COURSE_COLUMNS} FROM courses WHERE 1 = 1"));
        if let Some(instructor) = filter.instructor_id {
            qb.push(" AND instructor_id = ").push_bind(instructor.to_string());
        }
        if filter.published_only {
            qb.push(" AND is_published = 1");
        }
        qb.push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(i64::from(limit));

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(course_from_row).collect()
    }

    async fn count_courses(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM courses")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        count_from_row(&row)
    }

    async fn enrollment_tallies(&self) -> Result<Vec<CourseTally>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT c.id, c.title, c.created_at, COUNT(e.id) AS n
            FROM courses c
            LEFT JOIN enrollments e ON e.course_id = c.id
            GROUP BY c.id, c.title, c.created_at
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(CourseTally {
                    course_id: parse_id(row, "id")?,
                    title: row.try_get("title").map_err(ser)?,
                    created_at: row.try_get("created_at").map_err(ser)?,
                    enrollments: count_from_row(row)?,
                })
            })
            .collect()
    }
}
