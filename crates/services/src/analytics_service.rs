use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lms_core::analytics::{
    CourseShare, MonthBucket, PlatformCounts, history_start, monthly_histogram, top_courses,
};
use lms_core::model::{Capability, CourseId, EnrollmentId, Role, UserId};
use serde::Serialize;
use storage::repository::{
    CourseRepository, EnrollmentRepository, LessonRepository, ProfileRepository,
};

use crate::Clock;
use crate::deadline::within;
use crate::error::ServiceError;
use crate::progress_service::UNTITLED_COURSE;
use crate::session::Session;

const UNKNOWN_STUDENT: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentEnrollment {
    pub enrollment_id: EnrollmentId,
    pub student_name: String,
    pub student_email: String,
    pub course_title: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsReport {
    pub counts: PlatformCounts,
    pub monthly_enrollments: Vec<MonthBucket>,
    pub top_courses: Vec<CourseShare>,
    pub recent_enrollments: Vec<RecentEnrollment>,
}

/// Platform-wide reporting for instructors and admins.
#[derive(Clone)]
pub struct AnalyticsService {
    clock: Clock,
    profiles: Arc<dyn ProfileRepository>,
    courses: Arc<dyn CourseRepository>,
    lessons: Arc<dyn LessonRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    timeout: Duration,
    top_n: usize,
    recent_n: u32,
}

impl AnalyticsService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Clock,
        profiles: Arc<dyn ProfileRepository>,
        courses: Arc<dyn CourseRepository>,
        lessons: Arc<dyn LessonRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        timeout: Duration,
        top_n: usize,
        recent_n: u32,
    ) -> Self {
        Self {
            clock,
            profiles,
            courses,
            lessons,
            enrollments,
            timeout,
            top_n,
            recent_n,
        }
    }

    /// Build the analytics page.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::PermissionDenied` without the view-analytics
    /// capability, or the first failing gateway call.
    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    pub async fn report(&self, session: &Session) -> Result<AnalyticsReport, ServiceError> {
        session.require(Capability::ViewAnalytics)?;
        let now = self.clock.now();

        let (counts, monthly_enrollments, tallies, recent_enrollments) = tokio::try_join!(
            self.counts(),
            self.monthly(now),
            within(self.timeout, self.courses.enrollment_tallies()),
            self.recent(),
        )?;

        Ok(AnalyticsReport {
            top_courses: top_courses(tallies, counts.students, self.top_n),
            counts,
            monthly_enrollments,
            recent_enrollments,
        })
    }

    /// # Errors
    ///
    /// Returns the first failing count.
    pub async fn counts(&self) -> Result<PlatformCounts, ServiceError> {
        let (students, courses, lessons, enrollments) = tokio::try_join!(
            within(self.timeout, self.profiles.count_profiles(Role::Student)),
            within(self.timeout, self.courses.count_courses()),
            within(self.timeout, self.lessons.count_lessons()),
            within(self.timeout, self.enrollments.count_enrollments()),
        )?;
        Ok(PlatformCounts {
            students,
            courses,
            lessons,
            enrollments,
        })
    }

    async fn monthly(&self, now: DateTime<Utc>) -> Result<Vec<MonthBucket>, ServiceError> {
        let rows = within(
            self.timeout,
            self.enrollments.enrollments_since(history_start(now)),
        )
        .await?;
        Ok(monthly_histogram(now, rows.iter().map(|e| e.enrolled_at())))
    }

    async fn recent(&self) -> Result<Vec<RecentEnrollment>, ServiceError> {
        let rows = within(self.timeout, self.enrollments.recent_enrollments(self.recent_n)).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let student_ids: Vec<UserId> = rows.iter().map(|e| e.student_id()).collect();
        let course_ids: Vec<CourseId> = rows.iter().map(|e| e.course_id()).collect();
        let (profiles, courses) = tokio::try_join!(
            within(self.timeout, self.profiles.get_profiles(&student_ids)),
            within(self.timeout, self.courses.get_courses(&course_ids)),
        )?;
        let profiles: HashMap<_, _> = profiles.into_iter().map(|p| (p.id(), p)).collect();
        let titles: HashMap<_, _> = courses
            .into_iter()
            .map(|c| (c.id(), c.title().to_owned()))
            .collect();

        Ok(rows
            .into_iter()
            .map(|e| {
                let profile = profiles.get(&e.student_id());
                RecentEnrollment {
                    enrollment_id: e.id(),
                    student_name: profile
                        .and_then(|p| p.full_name())
                        .unwrap_or(UNKNOWN_STUDENT)
                        .to_owned(),
                    student_email: profile.map(|p| p.email().to_owned()).unwrap_or_default(),
                    course_title: titles
                        .get(&e.course_id())
                        .cloned()
                        .unwrap_or_else(|| UNTITLED_COURSE.to_owned()),
                    enrolled_at: e.enrolled_at(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Months;
    use lms_core::model::{Course, CourseDraft, Enrollment, LessonDraft, Profile};
    use lms_core::time::utc_date;
    use storage::repository::Storage;

    struct Fixture {
        storage: Storage,
        service: AnalyticsService,
        instructor: Session,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let storage = Storage::in_memory();
        let service = AnalyticsService::new(
            Clock::fixed(now),
            Arc::clone(&storage.profiles),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.enrollments),
            Duration::from_secs(5),
            5,
            5,
        );
        Fixture {
            storage,
            service,
            instructor: Session {
                user_id: UserId::generate(),
                email: "i@example.com".into(),
                role: Role::Instructor,
            },
        }
    }

    impl Fixture {
        async fn student(&self, name: &str) -> Profile {
            let p = Profile::new(
                UserId::generate(),
                format!("{}@example.com", name.to_lowercase()),
                Some(name.to_owned()),
                Role::Student,
                utc_date(2023, 1, 1),
            )
            .unwrap();
            self.storage.profiles.upsert_profile(&p).await.unwrap();
            p
        }

        async fn course(&self, title: &str, created: DateTime<Utc>) -> Course {
            let c = CourseDraft::titled(title)
                .validate(self.instructor.user_id, created)
                .unwrap();
            self.storage.courses.insert_course(&c).await.unwrap();
            c
        }

        async fn enroll(&self, student: &Profile, course: &Course, at: DateTime<Utc>) {
            self.storage
                .enrollments
                .insert_enrollment(&Enrollment::new(student.id(), course.id(), at))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn students_are_denied() {
        let f = fixture(utc_date(2024, 3, 15));
        let student = Session {
            role: Role::Student,
            ..f.instructor.clone()
        };
        assert!(matches!(
            f.service.report(&student).await,
            Err(ServiceError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn empty_platform_reports_zeroes() {
        let f = fixture(utc_date(2024, 3, 15));
        let report = f.service.report(&f.instructor).await.unwrap();
        assert_eq!(report.counts, PlatformCounts::default());
        assert_eq!(report.monthly_enrollments.len(), 6);
        assert!(report.monthly_enrollments.iter().all(|b| b.count == 0));
        assert!(report.top_courses.is_empty());
        assert!(report.recent_enrollments.is_empty());
    }

    #[tokio::test]
    async fn report_counts_ranks_and_buckets() {
        let now = utc_date(2024, 3, 15);
        let f = fixture(now);
        let ana = f.student("Ana").await;
        let bo = f.student("Bo").await;
        let old = f.course("Old", utc_date(2023, 1, 1)).await;
        let new = f.course("New", utc_date(2024, 1, 1)).await;
        let draft = LessonDraft {
            title: "Intro".into(),
            ..Default::default()
        };
        f.storage
            .lessons
            .insert_lesson(&draft.validate(old.id(), 0, utc_date(2023, 1, 1)).unwrap())
            .await
            .unwrap();

        f.enroll(&ana, &old, utc_date(2024, 3, 1)).await;
        f.enroll(&bo, &old, utc_date(2024, 1, 10)).await;
        f.enroll(&ana, &new, utc_date(2023, 12, 24)).await;
        // outside the window
        f.enroll(&bo, &new, now.checked_sub_months(Months::new(7)).unwrap()).await;

        let report = f.service.report(&f.instructor).await.unwrap();
        assert_eq!(
            report.counts,
            PlatformCounts {
                students: 2,
                courses: 2,
                lessons: 1,
                enrollments: 4,
            }
        );

        let by_label: Vec<(&str, u32)> = report
            .monthly_enrollments
            .iter()
            .map(|b| (b.label, b.count))
            .collect();
        assert_eq!(
            by_label,
            [
                ("Oct", 0),
                ("Nov", 0),
                ("Dec", 1),
                ("Jan", 1),
                ("Feb", 0),
                ("Mar", 1)
            ]
        );

        // tie on two enrollments: newer course first
        assert_eq!(report.top_courses[0].title, "New");
        assert_eq!(report.top_courses[0].share_percent, 100);
        assert_eq!(report.top_courses[1].title, "Old");

        let recent = &report.recent_enrollments[0];
        assert_eq!(recent.student_name, "Ana");
        assert_eq!(recent.student_email, "ana@example.com");
        assert_eq!(recent.course_title, "Old");
    }
}
