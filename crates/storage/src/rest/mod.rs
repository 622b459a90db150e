//! Hosted backend speaking `PostgREST` conventions over HTTPS.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::analytics::CourseTally;
use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, LessonProgress, Percent,
    Profile, Role, UserId,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::repository::{
    AuthIdentity, AuthProvider, CourseFilter, CourseRepository, EnrollmentRepository,
    LessonProgressRepository, LessonRepository, ProfileRepository, ProgressPersistence, Storage,
    StorageError,
};

mod query;
mod rows;

pub use query::{Order, RestQuery, error_for_status, parse_content_range_total};
use rows::{
    AuthUserRow, CompletedRow, CourseRow, CourseTallyRow, EnrollmentRow, IdRow, LessonProgressRow,
    LessonRow, ProfileRow, ProgressPatch,
};

const COURSE_COLUMNS: &str =
    "id,instructor_id,title,description,image_url,price,is_published,created_at,updated_at";
const LESSON_COLUMNS: &str =
    "id,course_id,title,content,video_url,order_index,created_at,updated_at";
const ENROLLMENT_COLUMNS: &str = "id,user_id,course_id,enrolled_at,progress";
const PROFILE_COLUMNS: &str = "id,email,full_name,role,created_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub base_url: String,
    pub anon_key: String,
}

/// Repository backed by a hosted `PostgREST` + auth service.
///
/// Row-level security applies with the current access token, falling back to
/// the anon key when nobody is signed in.
#[derive(Clone)]
pub struct RestRepository {
    client: Client,
    config: Arc<RestConfig>,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestRepository {
    #[must_use]
    pub fn new(config: RestConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Use `token` as the bearer for subsequent requests.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    fn token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self.token().unwrap_or_else(|| self.config.anon_key.clone());
        builder
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    fn table(&self, table: &str) -> String {
        self.url(&format!("rest/v1/{table}"))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StorageError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(%status, body = %body, "rest request failed");
        Err(error_for_status(status, &body))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &RestQuery,
    ) -> Result<Vec<T>, StorageError> {
        let response = self
            .send(self.client.get(self.table(table)).query(query.pairs()))
            .await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: RestQuery,
    ) -> Result<Option<T>, StorageError> {
        let mut rows = self.select::<T>(table, &query.limit(1)).await?;
        Ok(rows.pop())
    }

    async fn count(&self, table: &str, query: RestQuery) -> Result<u64, StorageError> {
        let response = self
            .send(
                self.client
                    .get(self.table(table))
                    .query(query.limit(1).pairs())
                    .header("Prefer", "count=exact"),
            )
            .await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StorageError::Serialization("missing content-range total".into()))
    }

    async fn insert<B: Serialize + Sync>(&self, table: &str, body: &B) -> Result<(), StorageError> {
        self.send(
            self.client
                .post(self.table(table))
                .header("Prefer", "return=minimal")
                .json(body),
        )
        .await?;
        Ok(())
    }

    async fn upsert<B: Serialize + Sync>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> Result<(), StorageError> {
        self.send(
            self.client
                .post(self.table(table))
                .query(&[("on_conflict", on_conflict)])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(body),
        )
        .await?;
        Ok(())
    }

    /// PATCH rows matching `query`; `NotFound` when nothing matched.
    async fn update<B: Serialize + Sync>(
        &self,
        table: &str,
        query: &RestQuery,
        body: &B,
    ) -> Result<(), StorageError> {
        let response = self
            .send(
                self.client
                    .patch(self.table(table))
                    .query(query.pairs())
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .await?;
        let touched: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if touched.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

impl Storage {
    /// Build a `Storage` against the hosted backend; the returned repository
    /// also serves as the auth provider.
    #[must_use]
    pub fn rest(config: RestConfig) -> (Self, RestRepository) {
        let repo = RestRepository::new(config);
        let storage = Self::from_repository(repo.clone(), Arc::new(repo.clone()));
        (storage, repo)
    }
}

#[async_trait]
impl AuthProvider for RestRepository {
    async fn current_identity(&self) -> Result<Option<AuthIdentity>, StorageError> {
        if self.token().is_none() {
            return Ok(None);
        }
        let result = self.send(self.client.get(self.url("auth/v1/user"))).await;
        let response = match result {
            Ok(response) => response,
            // an expired or revoked token is simply no session
            Err(StorageError::PermissionDenied(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let user: AuthUserRow = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Some(AuthIdentity {
            user_id: user.id,
            email: user.email.unwrap_or_default(),
        }))
    }

    async fn sign_out(&self) -> Result<(), StorageError> {
        if self.token().is_some() {
            let result = self.send(self.client.post(self.url("auth/v1/logout"))).await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "remote sign-out failed; clearing local token");
            }
        }
        self.set_access_token(None);
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for RestRepository {
    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        self.upsert("profiles", "id", &ProfileRow::from(profile)).await
    }

    async fn get_profile(&self, id: UserId) -> Result<Option<Profile>, StorageError> {
        let row: Option<ProfileRow> = self
            .select_one("profiles", RestQuery::select(PROFILE_COLUMNS).eq("id", id))
            .await?;
        row.map(ProfileRow::into_profile).transpose()
    }

    async fn get_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<ProfileRow> = self
            .select(
                "profiles",
                &RestQuery::select(PROFILE_COLUMNS).in_list("id", ids),
            )
            .await?;
        rows.into_iter().map(ProfileRow::into_profile).collect()
    }

    async fn count_profiles(&self, role: Role) -> Result<u64, StorageError> {
        self.count("profiles", RestQuery::select("id").eq("role", role.as_str()))
            .await
    }
}

#[async_trait]
impl CourseRepository for RestRepository {
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError> {
        self.insert("courses", &CourseRow::from(course)).await
    }

    async fn update_course(&self, course: &Course) -> Result<(), StorageError> {
        self.update(
            "courses",
            &RestQuery::default().eq("id", course.id()),
            &CourseRow::from(course),
        )
        .await
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let row: Option<CourseRow> = self
            .select_one("courses", RestQuery::select(COURSE_COLUMNS).eq("id", id))
            .await?;
        row.map(CourseRow::into_course).transpose()
    }

    async fn get_courses(&self, ids: &[CourseId]) -> Result<Vec<Course>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<CourseRow> = self
            .select("courses", &RestQuery::select(COURSE_COLUMNS).in_list("id", ids))
            .await?;
        rows.into_iter().map(CourseRow::into_course).collect()
    }

    async fn list_courses(&self, filter: CourseFilter, limit: u32) -> Result<Vec<Course>, StorageError> {
        let mut query = RestQuery::select(COURSE_COLUMNS);
        if let Some(instructor) = filter.instructor_id {
            query = query.eq("instructor_id", instructor);
        }
        if filter.published_only {
            query = query.eq("is_published", true);
        }
        let query = query.order("created_at", Order::Desc).limit(limit);
        let rows: Vec<CourseRow> = self.select("courses", &query).await?;
        rows.into_iter().map(CourseRow::into_course).collect()
    }

    async fn count_courses(&self) -> Result<u64, StorageError> {
        self.count("courses", RestQuery::select("id")).await
    }

    async fn enrollment_tallies(&self) -> Result<Vec<CourseTally>, StorageError> {
        let rows: Vec<CourseTallyRow> = self
            .select(
                "courses",
                &RestQuery::select("id,title,created_at,enrollments(count)"),
            )
            .await?;
        Ok(rows.into_iter().map(CourseTally::from).collect())
    }
}

#[async_trait]
impl LessonRepository for RestRepository {
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        self.insert("lessons", &LessonRow::from(lesson)).await
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row: Option<LessonRow> = self
            .select_one("lessons", RestQuery::select(LESSON_COLUMNS).eq("id", id))
            .await?;
        row.map(LessonRow::into_lesson).transpose()
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let rows: Vec<LessonRow> = self
            .select(
                "lessons",
                &RestQuery::select(LESSON_COLUMNS)
                    .eq("course_id", course_id)
                    .order("order_index", Order::Asc),
            )
            .await?;
        rows.into_iter().map(LessonRow::into_lesson).collect()
    }

    async fn lesson_ids_for_course(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<LessonId>, StorageError> {
        let rows: Vec<IdRow<LessonId>> = self
            .select(
                "lessons",
                &RestQuery::select("id")
                    .eq("course_id", course_id)
                    .order("order_index", Order::Asc),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    async fn count_lessons(&self) -> Result<u64, StorageError> {
        self.count("lessons", RestQuery::select("id")).await
    }
}

#[async_trait]
impl EnrollmentRepository for RestRepository {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError> {
        self.insert("enrollments", &EnrollmentRow::from(enrollment))
            .await
    }

    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let row: Option<EnrollmentRow> = self
            .select_one(
                "enrollments",
                RestQuery::select(ENROLLMENT_COLUMNS)
                    .eq("user_id", student_id)
                    .eq("course_id", course_id),
            )
            .await?;
        Ok(row.map(EnrollmentRow::into_enrollment))
    }

    async fn enrollments_for_student(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let rows: Vec<EnrollmentRow> = self
            .select(
                "enrollments",
                &RestQuery::select(ENROLLMENT_COLUMNS)
                    .eq("user_id", student_id)
                    .order("enrolled_at", Order::Asc),
            )
            .await?;
        Ok(rows.into_iter().map(EnrollmentRow::into_enrollment).collect())
    }

    async fn enrollments_since(&self, since: DateTime<Utc>) -> Result<Vec<Enrollment>, StorageError> {
        let rows: Vec<EnrollmentRow> = self
            .select(
                "enrollments",
                &RestQuery::select(ENROLLMENT_COLUMNS)
                    .gte("enrolled_at", since.to_rfc3339())
                    .order("enrolled_at", Order::Asc),
            )
            .await?;
        Ok(rows.into_iter().map(EnrollmentRow::into_enrollment).collect())
    }

    async fn recent_enrollments(&self, limit: u32) -> Result<Vec<Enrollment>, StorageError> {
        let rows: Vec<EnrollmentRow> = self
            .select(
                "enrollments",
                &RestQuery::select(ENROLLMENT_COLUMNS)
                    .order("enrolled_at", Order::Desc)
                    .limit(limit),
            )
            .await?;
        Ok(rows.into_iter().map(EnrollmentRow::into_enrollment).collect())
    }

    async fn count_enrollments(&self) -> Result<u64, StorageError> {
        self.count("enrollments", RestQuery::select("id")).await
    }

    async fn set_cached_progress(
        &self,
        id: EnrollmentId,
        progress: Percent,
    ) -> Result<(), StorageError> {
        self.update(
            "enrollments",
            &RestQuery::default().eq("id", id),
            &ProgressPatch {
                progress: i64::from(progress.value()),
            },
        )
        .await
    }
}

#[async_trait]
impl LessonProgressRepository for RestRepository {
    async fn get_lesson_progress(
        &self,
        student_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let row: Option<LessonProgressRow> = self
            .select_one(
                "lesson_progress",
                RestQuery::select("id,user_id,lesson_id,completed,completed_at")
                    .eq("user_id", student_id)
                    .eq("lesson_id", lesson_id),
            )
            .await?;
        Ok(row.map(LessonProgress::from))
    }

    async fn completed_lessons(
        &self,
        student_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonId>, StorageError> {
        if lesson_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<CompletedRow> = self
            .select(
                "lesson_progress",
                &RestQuery::select("lesson_id")
                    .eq("user_id", student_id)
                    .eq("completed", true)
                    .in_list("lesson_id", lesson_ids),
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.lesson_id).collect())
    }
}

#[async_trait]
impl ProgressPersistence for RestRepository {
    /// The progress row is written first, then the course is recounted and
    /// the cache patched. These are separate requests: a failure part way, or
    /// a concurrent write landing between the recount and the patch, leaves a
    /// stale cache that reconciliation rewrites.
    async fn record_progress(
        &self,
        progress: &LessonProgress,
        enrollment_id: EnrollmentId,
    ) -> Result<Percent, StorageError> {
        self.upsert(
            "lesson_progress",
            "user_id,lesson_id",
            &LessonProgressRow::from(progress),
        )
        .await?;

        let lesson = self
            .get_lesson(progress.lesson_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        let lesson_ids = self.lesson_ids_for_course(lesson.course_id()).await?;
        let done = self
            .completed_lessons(progress.student_id, &lesson_ids)
            .await?;
        let percent = Percent::of(
            u64::try_from(done.len()).unwrap_or(u64::MAX),
            u64::try_from(lesson_ids.len()).unwrap_or(u64::MAX),
        );

        self.set_cached_progress(enrollment_id, percent).await?;
        Ok(percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RestRepository {
        RestRepository::new(RestConfig {
            base_url: "https://example.supabase.co/".into(),
            anon_key: "anon".into(),
        })
    }

    #[test]
    fn builds_table_urls() {
        let r = repo();
        assert_eq!(
            r.table("enrollments"),
            "https://example.supabase.co/rest/v1/enrollments"
        );
        assert_eq!(r.url("auth/v1/user"), "https://example.supabase.co/auth/v1/user");
    }

    #[tokio::test]
    async fn no_token_means_no_identity() {
        let r = repo();
        assert!(r.current_identity().await.unwrap().is_none());
        r.sign_out().await.unwrap();
        assert!(r.token().is_none());
    }

    #[test]
    fn access_token_round_trips() {
        let r = repo();
        r.set_access_token(Some("jwt".into()));
        assert_eq!(r.token().as_deref(), Some("jwt"));
        let clone = r.clone();
        clone.set_access_token(None);
        assert!(r.token().is_none());
    }
}
