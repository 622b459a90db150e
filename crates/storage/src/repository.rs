use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::analytics::CourseTally;
use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, LessonProgress, Percent,
    Profile, Role, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// True for failures that may succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

/// The authenticated identity as reported by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: UserId,
    pub email: String,
}

/// Optional filters for course listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourseFilter {
    pub instructor_id: Option<UserId>,
    pub published_only: bool,
}

impl CourseFilter {
    #[must_use]
    pub fn published() -> Self {
        Self {
            instructor_id: None,
            published_only: true,
        }
    }

    #[must_use]
    pub fn by_instructor(instructor_id: UserId) -> Self {
        Self {
            instructor_id: Some(instructor_id),
            published_only: false,
        }
    }

    #[must_use]
    pub fn matches(&self, course: &Course) -> bool {
        self.instructor_id.is_none_or(|id| course.instructor_id() == id)
            && (!self.published_only || course.is_published())
    }
}

/// Auth-session lookup.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The current identity, or `None` when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the auth backend cannot be reached.
    async fn current_identity(&self) -> Result<Option<AuthIdentity>, StorageError>;

    /// Drop the current session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the auth backend rejects the request.
    async fn sign_out(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Insert or update a profile by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the profile cannot be stored.
    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StorageError>;

    /// Fetch a profile by user id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing row is `Ok(None)`.
    async fn get_profile(&self, id: UserId) -> Result<Option<Profile>, StorageError>;

    /// Fetch the profiles among `ids` that exist, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StorageError>;

    /// Count profiles holding `role`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_profiles(&self, role: Role) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Insert a new course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id already exists.
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError>;

    /// Update a course's mutable fields by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course does not exist.
    async fn update_course(&self, course: &Course) -> Result<(), StorageError>;

    /// Fetch a course by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing row is `Ok(None)`.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    /// Fetch the courses among `ids` that exist, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_courses(&self, ids: &[CourseId]) -> Result<Vec<Course>, StorageError>;

    /// List courses matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_courses(&self, filter: CourseFilter, limit: u32) -> Result<Vec<Course>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_courses(&self) -> Result<u64, StorageError>;

    /// Every course with its enrollment count.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn enrollment_tallies(&self) -> Result<Vec<CourseTally>, StorageError>;
}

#[async_trait]
pub trait LessonRepository: Send + Sync {
    /// Insert a new lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the course already has a lesson at
    /// the same ordering index, `StorageError::NotFound` if the course is missing.
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing row is `Ok(None)`.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// Lessons of a course ordered by `order_index`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError>;

    /// Just the lesson ids of a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn lesson_ids_for_course(&self, course_id: CourseId)
    -> Result<Vec<LessonId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_lessons(&self) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Insert a new enrollment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the student is already enrolled in
    /// the course.
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing row is `Ok(None)`.
    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError>;

    /// A student's enrollments, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn enrollments_for_student(&self, student_id: UserId)
    -> Result<Vec<Enrollment>, StorageError>;

    /// Enrollments with `enrolled_at >= since`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn enrollments_since(&self, since: DateTime<Utc>) -> Result<Vec<Enrollment>, StorageError>;

    /// Newest enrollments first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn recent_enrollments(&self, limit: u32) -> Result<Vec<Enrollment>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_enrollments(&self) -> Result<u64, StorageError>;

    /// Overwrite the cached progress percentage of one enrollment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment does not exist.
    async fn set_cached_progress(
        &self,
        id: EnrollmentId,
        progress: Percent,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait LessonProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing row is `Ok(None)`.
    async fn get_lesson_progress(
        &self,
        student_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError>;

    /// Ids among `lesson_ids` the student has completed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn completed_lessons(
        &self,
        student_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonId>, StorageError>;
}

/// Writes lesson progress together with the enrollment's cached percentage.
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    /// Upsert `progress` (keyed by student and lesson), recount the
    /// student's completed lessons in the enrollment's course after the
    /// write, and store the result as the enrollment's cached progress,
    /// atomically where the backend supports it. Returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrollment is missing, or other
    /// storage errors.
    async fn record_progress(
        &self,
        progress: &LessonProgress,
        enrollment_id: EnrollmentId,
    ) -> Result<Percent, StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct Tables {
    profiles: HashMap<UserId, Profile>,
    courses: HashMap<CourseId, Course>,
    lessons: HashMap<LessonId, Lesson>,
    enrollments: HashMap<EnrollmentId, Enrollment>,
    progress: HashMap<(UserId, LessonId), LessonProgress>,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Enforces the same uniqueness rules as the SQL schema.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[async_trait]
impl ProfileRepository for InMemoryRepository {
    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        self.lock()?.profiles.insert(profile.id(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, id: UserId) -> Result<Option<Profile>, StorageError> {
        Ok(self.lock()?.profiles.get(&id).cloned())
    }

    async fn get_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StorageError> {
        let guard = self.lock()?;
        let wanted: HashSet<&UserId> = ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| guard.profiles.get(id).cloned())
            .collect())
    }

    async fn count_profiles(&self, role: Role) -> Result<u64, StorageError> {
        let guard = self.lock()?;
        Ok(count(guard.profiles.values().filter(|p| p.role() == role).count()))
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.courses.contains_key(&course.id()) {
            return Err(StorageError::Conflict);
        }
        guard.courses.insert(course.id(), course.clone());
        Ok(())
    }

    async fn update_course(&self, course: &Course) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .courses
            .get_mut(&course.id())
            .ok_or(StorageError::NotFound)?;
        *slot = course.clone();
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }

    async fn get_courses(&self, ids: &[CourseId]) -> Result<Vec<Course>, StorageError> {
        let guard = self.lock()?;
        let wanted: HashSet<&CourseId> = ids.iter().collect();
        Ok(wanted
            .into_iter()
            .filter_map(|id| guard.courses.get(id).cloned())
            .collect())
    }

    async fn list_courses(&self, filter: CourseFilter, limit: u32) -> Result<Vec<Course>, StorageError> {
        let guard = self.lock()?;
        let mut courses: Vec<Course> = guard
            .courses
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        courses.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        courses.truncate(limit as usize);
        Ok(courses)
    }

    async fn count_courses(&self) -> Result<u64, StorageError> {
        Ok(count(self.lock()?.courses.len()))
    }

    async fn enrollment_tallies(&self) -> Result<Vec<CourseTally>, StorageError> {
        let guard = self.lock()?;
        let mut per_course: HashMap<CourseId, u64> = HashMap::new();
        for e in guard.enrollments.values() {
            *per_course.entry(e.course_id()).or_default() += 1;
        }
        Ok(guard
            .courses
            .values()
            .map(|c| CourseTally {
                course_id: c.id(),
                title: c.title().to_owned(),
                created_at: c.created_at(),
                enrollments: per_course.get(&c.id()).copied().unwrap_or(0),
            })
            .collect())
    }
}

#[async_trait]
impl LessonRepository for InMemoryRepository {
    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&lesson.course_id()) {
            return Err(StorageError::NotFound);
        }
        let clash = guard.lessons.values().any(|l| {
            l.id() == lesson.id()
                || (l.course_id() == lesson.course_id() && l.order_index() == lesson.order_index())
        });
        if clash {
            return Err(StorageError::Conflict);
        }
        guard.lessons.insert(lesson.id(), lesson.clone());
        Ok(())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        Ok(self.lock()?.lessons.get(&id).cloned())
    }

    async fn lessons_for_course(&self, course_id: CourseId) -> Result<Vec<Lesson>, StorageError> {
        let guard = self.lock()?;
        let mut lessons: Vec<Lesson> = guard
            .lessons
            .values()
            .filter(|l| l.course_id() == course_id)
            .cloned()
            .collect();
        lessons.sort_by_key(Lesson::order_index);
        Ok(lessons)
    }

    async fn lesson_ids_for_course(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<LessonId>, StorageError> {
        let lessons = self.lessons_for_course(course_id).await?;
        Ok(lessons.iter().map(Lesson::id).collect())
    }

    async fn count_lessons(&self) -> Result<u64, StorageError> {
        Ok(count(self.lock()?.lessons.len()))
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.courses.contains_key(&enrollment.course_id()) {
            return Err(StorageError::NotFound);
        }
        let duplicate = guard.enrollments.values().any(|e| {
            e.id() == enrollment.id()
                || (e.student_id() == enrollment.student_id()
                    && e.course_id() == enrollment.course_id())
        });
        if duplicate {
            return Err(StorageError::Conflict);
        }
        guard.enrollments.insert(enrollment.id(), enrollment.clone());
        Ok(())
    }

    async fn get_enrollment(
        &self,
        student_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>, StorageError> {
        Ok(self
            .lock()?
            .enrollments
            .values()
            .find(|e| e.student_id() == student_id && e.course_id() == course_id)
            .cloned())
    }

    async fn enrollments_for_student(
        &self,
        student_id: UserId,
    ) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.lock()?;
        let mut found: Vec<Enrollment> = guard
            .enrollments
            .values()
            .filter(|e| e.student_id() == student_id)
            .cloned()
            .collect();
        found.sort_by_key(Enrollment::enrolled_at);
        Ok(found)
    }

    async fn enrollments_since(&self, since: DateTime<Utc>) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.lock()?;
        let mut found: Vec<Enrollment> = guard
            .enrollments
            .values()
            .filter(|e| e.enrolled_at() >= since)
            .cloned()
            .collect();
        found.sort_by_key(Enrollment::enrolled_at);
        Ok(found)
    }

    async fn recent_enrollments(&self, limit: u32) -> Result<Vec<Enrollment>, StorageError> {
        let guard = self.lock()?;
        let mut found: Vec<Enrollment> = guard.enrollments.values().cloned().collect();
        found.sort_by(|a, b| b.enrolled_at().cmp(&a.enrolled_at()));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn count_enrollments(&self) -> Result<u64, StorageError> {
        Ok(count(self.lock()?.enrollments.len()))
    }

    async fn set_cached_progress(
        &self,
        id: EnrollmentId,
        progress: Percent,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let enrollment = guard.enrollments.get_mut(&id).ok_or(StorageError::NotFound)?;
        enrollment.set_progress(progress);
        Ok(())
    }
}

#[async_trait]
impl LessonProgressRepository for InMemoryRepository {
    async fn get_lesson_progress(
        &self,
        student_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        Ok(self.lock()?.progress.get(&(student_id, lesson_id)).cloned())
    }

    async fn completed_lessons(
        &self,
        student_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonId>, StorageError> {
        let guard = self.lock()?;
        Ok(lesson_ids
            .iter()
            .filter(|id| {
                guard
                    .progress
                    .get(&(student_id, **id))
                    .is_some_and(|p| p.completed)
            })
            .copied()
            .collect())
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryRepository {
    async fn record_progress(
        &self,
        progress: &LessonProgress,
        enrollment_id: EnrollmentId,
    ) -> Result<Percent, StorageError> {
        // one guard for the write and the recount
        let mut guard = self.lock()?;
        let (student_id, course_id) = guard
            .enrollments
            .get(&enrollment_id)
            .map(|e| (e.student_id(), e.course_id()))
            .ok_or(StorageError::NotFound)?;
        guard
            .progress
            .insert((progress.student_id, progress.lesson_id), progress.clone());

        let lesson_ids: Vec<LessonId> = guard
            .lessons
            .values()
            .filter(|l| l.course_id() == course_id)
            .map(Lesson::id)
            .collect();
        let done = lesson_ids
            .iter()
            .filter(|id| {
                guard
                    .progress
                    .get(&(student_id, **id))
                    .is_some_and(|p| p.completed)
            })
            .count();
        let percent = Percent::of(count(done), count(lesson_ids.len()));

        if let Some(enrollment) = guard.enrollments.get_mut(&enrollment_id) {
            enrollment.set_progress(percent);
        }
        Ok(percent)
    }
}

/// Auth provider holding a locally set identity; used by the in-memory and
/// `SQLite` backends, which have no auth service of their own.
#[derive(Clone, Default)]
pub struct LocalAuth {
    identity: Arc<Mutex<Option<AuthIdentity>>>,
}

impl LocalAuth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signed_in(identity: AuthIdentity) -> Self {
        let auth = Self::default();
        auth.sign_in(identity);
        auth
    }

    pub fn sign_in(&self, identity: AuthIdentity) {
        if let Ok(mut guard) = self.identity.lock() {
            *guard = Some(identity);
        }
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn current_identity(&self) -> Result<Option<AuthIdentity>, StorageError> {
        let guard = self
            .identity
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn sign_out(&self) -> Result<(), StorageError> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// The data access gateway: every repository behind a trait object so
/// backends can be swapped.
#[derive(Clone)]
pub struct Storage {
    pub auth: Arc<dyn AuthProvider>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub courses: Arc<dyn CourseRepository>,
    pub lessons: Arc<dyn LessonRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub lesson_progress: Arc<dyn LessonProgressRepository>,
    pub progress_writes: Arc<dyn ProgressPersistence>,
}

impl Storage {
    /// Every repository backed by one shared in-memory store, nobody signed in.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new(), Arc::new(LocalAuth::new()))
    }

    /// Bundle a single type that implements every repository trait.
    pub fn from_repository<R>(repo: R, auth: Arc<dyn AuthProvider>) -> Self
    where
        R: ProfileRepository
            + CourseRepository
            + LessonRepository
            + EnrollmentRepository
            + LessonProgressRepository
            + ProgressPersistence
            + Clone
            + 'static,
    {
        Self {
            auth,
            profiles: Arc::new(repo.clone()),
            courses: Arc::new(repo.clone()),
            lessons: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            lesson_progress: Arc::new(repo.clone()),
            progress_writes: Arc::new(repo),
        }
    }

    /// Replace the auth provider.
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }
}
