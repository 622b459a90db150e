use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{Capability, Course, CourseDraft, CourseId, Lesson, LessonDraft};
use serde::Serialize;
use storage::repository::{
    CourseFilter, CourseRepository, EnrollmentRepository, LessonRepository, StorageError,
};

use crate::Clock;
use crate::deadline::within;
use crate::enrollment_service::enrolled_courses;
use crate::error::ServiceError;
use crate::session::Session;

/// A course page: the course, its ordered lessons and whether the viewer is
/// enrolled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseDetail {
    pub course: Course,
    pub lessons: Vec<Lesson>,
    pub is_enrolled: bool,
}

/// Course authoring and browsing.
#[derive(Clone)]
pub struct CourseService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    lessons: Arc<dyn LessonRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    timeout: Duration,
}

impl CourseService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        lessons: Arc<dyn LessonRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            clock,
            courses,
            lessons,
            enrollments,
            timeout,
        }
    }

    /// Create an unpublished course owned by the session's user.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::PermissionDenied` without the create-course
    /// capability, `ServiceError::Validation` for a blank title, bad price or
    /// bad image URL (nothing is written), or storage failures.
    #[tracing::instrument(skip(self, session, draft), fields(user = %session.user_id))]
    pub async fn create_course(
        &self,
        session: &Session,
        draft: CourseDraft,
    ) -> Result<Course, ServiceError> {
        session.require(Capability::CreateCourse)?;
        let course = draft.validate(session.user_id, self.clock.now())?;
        within(self.timeout, self.courses.insert_course(&course)).await?;
        tracing::info!(course = %course.id(), title = course.title(), "course created");
        Ok(course)
    }

    /// Append a lesson, or place it at the draft's explicit index.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for an unknown course,
    /// `ServiceError::PermissionDenied` unless the caller owns it,
    /// `ServiceError::Conflict` when the index is taken.
    #[tracing::instrument(skip(self, session, draft), fields(user = %session.user_id))]
    pub async fn add_lesson(
        &self,
        session: &Session,
        course_id: CourseId,
        draft: LessonDraft,
    ) -> Result<Lesson, ServiceError> {
        let course = self.owned_course(session, course_id).await?;

        let order_index = match draft.order_index {
            Some(idx) => idx,
            None => {
                let existing =
                    within(self.timeout, self.lessons.lessons_for_course(course.id())).await?;
                existing
                    .iter()
                    .map(|l| l.order_index().saturating_add(1))
                    .max()
                    .unwrap_or(0)
            }
        };

        let lesson = draft.validate(course.id(), order_index, self.clock.now())?;
        match within(self.timeout, self.lessons.insert_lesson(&lesson)).await {
            Ok(()) => {}
            Err(ServiceError::Storage(StorageError::Conflict)) => {
                return Err(ServiceError::Conflict("lesson order index already used"));
            }
            Err(e) => return Err(e),
        }
        tracing::info!(course = %course.id(), lesson = %lesson.id(), order_index, "lesson added");
        Ok(lesson)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for an unknown course or
    /// `ServiceError::PermissionDenied` unless the caller owns it.
    pub async fn set_published(
        &self,
        session: &Session,
        course_id: CourseId,
        published: bool,
    ) -> Result<Course, ServiceError> {
        let mut course = self.owned_course(session, course_id).await?;
        if course.is_published() != published {
            course.set_published(published, self.clock.now());
            within(self.timeout, self.courses.update_course(&course)).await?;
        }
        Ok(course)
    }

    /// Course page data. Unpublished courses are only visible to their owner
    /// and to roles that may view all courses.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` when the course is absent or hidden.
    pub async fn course_detail(
        &self,
        course_id: CourseId,
        viewer: Option<&Session>,
    ) -> Result<CourseDetail, ServiceError> {
        let course = within(self.timeout, self.courses.get_course(course_id))
            .await?
            .ok_or(ServiceError::NotFound("course"))?;
        let privileged = viewer
            .is_some_and(|s| course.is_owned_by(s.user_id) || s.can(Capability::ViewAllCourses));
        if !course.is_published() && !privileged {
            return Err(ServiceError::NotFound("course"));
        }

        let lessons = within(self.timeout, self.lessons.lessons_for_course(course_id)).await?;
        let is_enrolled = match viewer {
            Some(s) => within(self.timeout, self.enrollments.get_enrollment(s.user_id, course_id))
                .await?
                .is_some(),
            None => false,
        };

        Ok(CourseDetail {
            course,
            lessons,
            is_enrolled,
        })
    }

    /// Published courses, newest first.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if the listing fails or times out.
    pub async fn list_published(&self, limit: u32) -> Result<Vec<Course>, ServiceError> {
        within(
            self.timeout,
            self.courses.list_courses(CourseFilter::published(), limit),
        )
        .await
    }

    /// The "my courses" page: every course for roles that may view all
    /// courses, own courses for course managers (both newest first),
    /// otherwise enrolled courses in enrollment order.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if a lookup fails or times out.
    pub async fn my_courses(&self, session: &Session) -> Result<Vec<Course>, ServiceError> {
        let filter = if session.can(Capability::ViewAllCourses) {
            CourseFilter::default()
        } else if session.can(Capability::ManageOwnCourses) {
            CourseFilter::by_instructor(session.user_id)
        } else {
            return enrolled_courses(
                self.courses.as_ref(),
                self.enrollments.as_ref(),
                session.user_id,
                self.timeout,
            )
            .await;
        };
        within(self.timeout, self.courses.list_courses(filter, u32::MAX)).await
    }

    async fn owned_course(
        &self,
        session: &Session,
        course_id: CourseId,
    ) -> Result<Course, ServiceError> {
        session.require(Capability::ManageOwnCourses)?;
        let course = within(self.timeout, self.courses.get_course(course_id))
            .await?
            .ok_or(ServiceError::NotFound("course"))?;
        if !course.is_owned_by(session.user_id) {
            return Err(ServiceError::denied("only the course owner may change it"));
        }
        Ok(course)
    }
}
