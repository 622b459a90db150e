use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{Capability, Course, CourseId, Enrollment, UserId};
use storage::repository::{CourseRepository, EnrollmentRepository, ProfileRepository, StorageError};

use crate::Clock;
use crate::deadline::within;
use crate::error::ServiceError;
use crate::profile_service::ensure_profile;
use crate::session::Session;

/// Enrollment creation and lookups.
#[derive(Clone)]
pub struct EnrollmentService {
    clock: Clock,
    profiles: Arc<dyn ProfileRepository>,
    courses: Arc<dyn CourseRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    timeout: Duration,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(
        clock: Clock,
        profiles: Arc<dyn ProfileRepository>,
        courses: Arc<dyn CourseRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            clock,
            profiles,
            courses,
            enrollments,
            timeout,
        }
    }

    /// Enroll the session's user in `course_id` at 0% progress, creating
    /// their profile first if it is missing.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::AlreadyEnrolled` when an enrollment exists (also
    /// when a concurrent insert wins the race), `ServiceError::NotFound` for
    /// an unknown course, `ServiceError::PermissionDenied` for an unpublished
    /// course the caller does not own.
    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    pub async fn enroll(
        &self,
        session: &Session,
        course_id: CourseId,
    ) -> Result<Enrollment, ServiceError> {
        session.require(Capability::Enroll)?;
        let student = session.user_id;

        let course = within(self.timeout, self.courses.get_course(course_id))
            .await?
            .ok_or(ServiceError::NotFound("course"))?;
        if !course.is_published() && !course.is_owned_by(student) {
            return Err(ServiceError::denied("course is not published"));
        }

        if self.is_enrolled(student, course_id).await? {
            return Err(ServiceError::AlreadyEnrolled);
        }
        ensure_profile(self.profiles.as_ref(), session, self.clock, self.timeout).await?;

        let enrollment = Enrollment::new(student, course_id, self.clock.now());
        match within(self.timeout, self.enrollments.insert_enrollment(&enrollment)).await {
            Ok(()) => {}
            Err(ServiceError::Storage(StorageError::Conflict)) => {
                return Err(ServiceError::AlreadyEnrolled);
            }
            // the course vanished between the read and the insert
            Err(ServiceError::Storage(StorageError::NotFound)) => {
                return Err(ServiceError::NotFound("course"));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(course = %course_id, enrollment = %enrollment.id(), "enrolled");
        Ok(enrollment)
    }

    /// # Errors
    ///
    /// Returns `ServiceError` if the lookup fails or times out.
    pub async fn is_enrolled(
        &self,
        student: UserId,
        course_id: CourseId,
    ) -> Result<bool, ServiceError> {
        let existing =
            within(self.timeout, self.enrollments.get_enrollment(student, course_id)).await?;
        Ok(existing.is_some())
    }

    /// Courses the student is enrolled in, in enrollment order.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if a lookup fails or times out.
    pub async fn enrolled_courses(&self, student: UserId) -> Result<Vec<Course>, ServiceError> {
        enrolled_courses(
            self.courses.as_ref(),
            self.enrollments.as_ref(),
            student,
            self.timeout,
        )
        .await
    }
}

/// Enrollments joined to their courses service-side; rows whose course is
/// gone are skipped.
pub(crate) async fn enrolled_courses(
    courses: &dyn CourseRepository,
    enrollments: &dyn EnrollmentRepository,
    student: UserId,
    timeout: Duration,
) -> Result<Vec<Course>, ServiceError> {
    let rows = within(timeout, enrollments.enrollments_for_student(student)).await?;
    let ids: Vec<CourseId> = rows.iter().map(Enrollment::course_id).collect();
    let mut by_id: HashMap<CourseId, Course> = within(timeout, courses.get_courses(&ids))
        .await?
        .into_iter()
        .map(|c| (c.id(), c))
        .collect();
    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::model::{CourseDraft, Percent, Role};
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::Storage;

    fn session(role: Role) -> Session {
        Session {
            user_id: UserId::generate(),
            email: "u@example.com".into(),
            role,
        }
    }

    fn service(storage: &Storage) -> EnrollmentService {
        EnrollmentService::new(
            fixed_clock(),
            Arc::clone(&storage.profiles),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrollments),
            Duration::from_secs(5),
        )
    }

    async fn course(storage: &Storage, owner: UserId, published: bool) -> Course {
        let mut course = CourseDraft::titled("Rust").validate(owner, fixed_now()).unwrap();
        course.set_published(published, fixed_now());
        storage.courses.insert_course(&course).await.unwrap();
        course
    }

    #[tokio::test]
    async fn enroll_twice_is_already_enrolled() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let student = session(Role::Student);
        let c = course(&storage, UserId::generate(), true).await;

        let enrollment = svc.enroll(&student, c.id()).await.unwrap();
        assert_eq!(enrollment.progress(), Percent::ZERO);
        assert_eq!(enrollment.enrolled_at(), fixed_now());
        let profile = storage.profiles.get_profile(student.user_id).await.unwrap();
        assert_eq!(profile.map(|p| p.role()), Some(Role::Student));

        let err = svc.enroll(&student, c.id()).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyEnrolled));
        assert_eq!(storage.enrollments.count_enrollments().await.unwrap(), 1);
        assert!(svc.is_enrolled(student.user_id, c.id()).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_enrolls_leave_one_row() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let student = session(Role::Student);
        let c = course(&storage, UserId::generate(), true).await;

        let (a, b) = tokio::join!(svc.enroll(&student, c.id()), svc.enroll(&student, c.id()));
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(storage.enrollments.count_enrollments().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_and_unpublished_courses() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let student = session(Role::Student);

        let err = svc.enroll(&student, CourseId::generate()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound("course")));

        let hidden = course(&storage, UserId::generate(), false).await;
        let err = svc.enroll(&student, hidden.id()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        let admin = session(Role::Admin);
        let open = course(&storage, UserId::generate(), true).await;
        assert!(matches!(
            svc.enroll(&admin, open.id()).await,
            Err(ServiceError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn owner_may_enroll_in_own_draft() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let instructor = session(Role::Instructor);
        let draft = course(&storage, instructor.user_id, false).await;
        svc.enroll(&instructor, draft.id()).await.unwrap();
        let mine = svc.enrolled_courses(instructor.user_id).await.unwrap();
        assert_eq!(mine, vec![draft]);
    }
}
