use lms_core::model::{Profile, Role, UserId};
use sqlx::{QueryBuilder, Sqlite};

use super::SqliteRepository;
use super::mapping::{count_from_row, db_err, profile_from_row};
use crate::repository::{ProfileRepository, StorageError};

#[async_trait::async_trait]
impl ProfileRepository for SqliteRepository {
    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO profiles (id, email, full_name, role, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                full_name = excluded.full_name,
                role = excluded.role
            ",
        )
        .bind(profile.id().to_string())
        .bind(profile.email())
        .bind(profile.full_name())
        .bind(profile.role().as_str())
        .bind(profile.created_at())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_profile(&self, id: UserId) -> Result<Option<Profile>, StorageError> {
        let row = sqlx::query(
            "SELECT id, email, full_name, role, created_at FROM profiles WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(profile_from_row).transpose()
    }

    async fn get_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, email, full_name, role, created_at FROM profiles WHERE id IN (",
        );
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(id.to_string());
        }
        list.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn count_profiles(&self, role: Role) -> Result<u64, StorageError> {
        // a missing role counts as student
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM profiles WHERE COALESCE(NULLIF(LOWER(TRIM(role)), ''), 'student') = ?1",
        )
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        count_from_row(&row)
    }
}
