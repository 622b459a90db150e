use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{Capability, CourseId, Enrollment, LessonId, LessonProgress, UserId};
use lms_core::progress::{CourseProgress, ProgressSummary};
use storage::repository::{
    CourseRepository, EnrollmentRepository, LessonProgressRepository, LessonRepository,
    ProgressPersistence,
};
use tokio::task::JoinSet;

use crate::Clock;
use crate::deadline::within;
use crate::error::ServiceError;
use crate::session::Session;

/// Title shown for enrollments whose course row is gone.
pub const UNTITLED_COURSE: &str = "Untitled course";

/// Computes per-course and overall progress from lesson completion rows.
///
/// Lesson progress is authoritative; the percentage stored on each
/// enrollment is a cache this service keeps in step.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    lessons: Arc<dyn LessonRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    lesson_progress: Arc<dyn LessonProgressRepository>,
    writes: Arc<dyn ProgressPersistence>,
    timeout: Duration,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        lessons: Arc<dyn LessonRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        lesson_progress: Arc<dyn LessonProgressRepository>,
        writes: Arc<dyn ProgressPersistence>,
        timeout: Duration,
    ) -> Self {
        Self {
            clock,
            courses,
            lessons,
            enrollments,
            lesson_progress,
            writes,
            timeout,
        }
    }

    /// Progress for every course the student is enrolled in, in enrollment
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if any gateway call fails or times out; the
    /// remaining per-course lookups are cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn aggregate(&self, student: UserId) -> Result<Vec<CourseProgress>, ServiceError> {
        let rows = self.compute_all(student).await?;
        Ok(rows.into_iter().map(|(_, progress)| progress).collect())
    }

    /// Per-course progress plus overall totals.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if any gateway call fails or times out.
    pub async fn dashboard(&self, student: UserId) -> Result<ProgressSummary, ServiceError> {
        let courses = self.aggregate(student).await?;
        Ok(ProgressSummary::from_courses(courses))
    }

    /// Mark one lesson done (or not done) for the session's user and return
    /// the course's recomputed progress.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for an unknown lesson,
    /// `ServiceError::PermissionDenied` when the user is not enrolled in the
    /// lesson's course, or storage failures.
    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    pub async fn set_lesson_completed(
        &self,
        session: &Session,
        lesson_id: LessonId,
        completed: bool,
    ) -> Result<CourseProgress, ServiceError> {
        session.require(Capability::TrackProgress)?;
        let student = session.user_id;

        let lesson = within(self.timeout, self.lessons.get_lesson(lesson_id))
            .await?
            .ok_or(ServiceError::NotFound("lesson"))?;
        let course_id = lesson.course_id();
        let enrollment = within(self.timeout, self.enrollments.get_enrollment(student, course_id))
            .await?
            .ok_or_else(|| ServiceError::denied("not enrolled in this course"))?;

        let mut row = within(
            self.timeout,
            self.lesson_progress.get_lesson_progress(student, lesson_id),
        )
        .await?
        .unwrap_or_else(|| LessonProgress::new(student, lesson_id));
        row.mark(completed, self.clock.now());

        let stored = within(
            self.timeout,
            self.writes.record_progress(&row, enrollment.id()),
        )
        .await?;

        // counts are read after the write
        let lesson_ids = within(self.timeout, self.lessons.lesson_ids_for_course(course_id)).await?;
        let done = within(
            self.timeout,
            self.lesson_progress.completed_lessons(student, &lesson_ids),
        )
        .await?;
        let title = self.course_title(course_id).await?;
        let progress = CourseProgress::compute(course_id, title, &lesson_ids, &done);
        if progress.progress != stored {
            tracing::debug!(
                course = %course_id,
                %stored,
                recounted = %progress.progress,
                "progress changed concurrently"
            );
        }
        tracing::info!(
            course = %course_id,
            lesson = %lesson_id,
            completed,
            progress = %stored,
            "lesson progress recorded"
        );
        Ok(progress)
    }

    /// Rewrite every cached enrollment percentage that disagrees with the
    /// lesson rows. Returns how many were rewritten.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if any gateway call fails or times out.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, student: UserId) -> Result<u32, ServiceError> {
        let mut rewritten = 0;
        for (enrollment, progress) in self.compute_all(student).await? {
            if enrollment.progress() == progress.progress {
                continue;
            }
            within(
                self.timeout,
                self.enrollments
                    .set_cached_progress(enrollment.id(), progress.progress),
            )
            .await?;
            tracing::debug!(
                course = %enrollment.course_id(),
                cached = %enrollment.progress(),
                actual = %progress.progress,
                "rewrote stale progress"
            );
            rewritten += 1;
        }
        Ok(rewritten)
    }

    async fn course_title(&self, course_id: CourseId) -> Result<String, ServiceError> {
        let course = within(self.timeout, self.courses.get_course(course_id)).await?;
        Ok(course.map_or_else(|| UNTITLED_COURSE.to_owned(), |c| c.title().to_owned()))
    }

    /// Fan out one task per enrollment; dropping the returned future aborts
    /// whatever is still running.
    async fn compute_all(
        &self,
        student: UserId,
    ) -> Result<Vec<(Enrollment, CourseProgress)>, ServiceError> {
        let enrollments =
            within(self.timeout, self.enrollments.enrollments_for_student(student)).await?;
        if enrollments.is_empty() {
            return Ok(Vec::new());
        }

        let course_ids: Vec<CourseId> = enrollments.iter().map(Enrollment::course_id).collect();
        let titles: HashMap<CourseId, String> =
            within(self.timeout, self.courses.get_courses(&course_ids))
                .await?
                .into_iter()
                .map(|c| (c.id(), c.title().to_owned()))
                .collect();

        let mut tasks = JoinSet::new();
        for (idx, course_id) in course_ids.iter().copied().enumerate() {
            let lessons = Arc::clone(&self.lessons);
            let lesson_progress = Arc::clone(&self.lesson_progress);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let lesson_ids =
                    within(timeout, lessons.lesson_ids_for_course(course_id)).await?;
                let done =
                    within(timeout, lesson_progress.completed_lessons(student, &lesson_ids))
                        .await?;
                Ok::<_, ServiceError>((idx, lesson_ids, done))
            });
        }

        let mut computed: Vec<Option<CourseProgress>> = vec![None; enrollments.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, lesson_ids, done) =
                joined.map_err(|e| ServiceError::Task(e.to_string()))??;
            let course_id = course_ids[idx];
            let title = titles
                .get(&course_id)
                .map_or(UNTITLED_COURSE, String::as_str);
            computed[idx] = Some(CourseProgress::compute(course_id, title, &lesson_ids, &done));
        }

        enrollments
            .into_iter()
            .zip(computed)
            .map(|(enrollment, progress)| {
                progress
                    .map(|p| (enrollment, p))
                    .ok_or_else(|| ServiceError::Task("missing course result".into()))
            })
            .collect()
    }
}
