use std::sync::Arc;

use lms_core::model::{CourseDraft, LessonDraft, Percent, Profile, Role, UserId};
use lms_core::time::fixed_now;
use services::{AppServices, AuthHandle, Clock, ErrorKind, LmsConfig, ServiceError};
use storage::repository::{AuthIdentity, LocalAuth, Storage};

struct World {
    app: AppServices,
    storage: Storage,
    local: LocalAuth,
}

async fn world(name: &str) -> World {
    let local = LocalAuth::new();
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let storage = Storage::sqlite_with_auth(&url, Arc::new(local.clone()))
        .await
        .expect("sqlite");
    let app = AppServices::new(
        storage.clone(),
        AuthHandle::Local(local.clone()),
        Clock::fixed(fixed_now()),
        &LmsConfig::default(),
    );
    World { app, storage, local }
}

impl World {
    async fn account(&self, email: &str, role: Role) -> AuthIdentity {
        let id = UserId::generate();
        let profile = Profile::new(id, email, None, role, fixed_now()).unwrap();
        self.storage.profiles.upsert_profile(&profile).await.unwrap();
        AuthIdentity {
            user_id: id,
            email: email.to_owned(),
        }
    }

    async fn sign_in(&self, who: &AuthIdentity) -> services::Session {
        self.local.sign_in(who.clone());
        self.app.session().refresh().await.expect("session")
    }

    fn lesson(title: &str) -> LessonDraft {
        LessonDraft {
            title: title.into(),
            ..Default::default()
        }
    }
}

#[tokio::test]
async fn instructor_publishes_and_student_progresses() {
    let w = world("memdb_flow").await;
    let instructor_id = w.account("instructor@example.com", Role::Instructor).await;
    let student_id = w.account("student@example.com", Role::Student).await;

    let instructor = w.sign_in(&instructor_id).await;
    let courses = w.app.courses();
    let course = courses
        .create_course(&instructor, CourseDraft::titled("Intro to Rust"))
        .await
        .unwrap();
    let first = courses
        .add_lesson(&instructor, course.id(), World::lesson("Ownership"))
        .await
        .unwrap();
    courses
        .add_lesson(&instructor, course.id(), World::lesson("Borrowing"))
        .await
        .unwrap();
    courses.set_published(&instructor, course.id(), true).await.unwrap();

    let student = w.sign_in(&student_id).await;
    assert_eq!(student.role, Role::Student);
    let enrollments = w.app.enrollments();
    enrollments.enroll(&student, course.id()).await.unwrap();
    let again = enrollments.enroll(&student, course.id()).await.unwrap_err();
    assert!(matches!(again, ServiceError::AlreadyEnrolled));
    assert_eq!(again.kind(), ErrorKind::Conflict);

    let progress = w
        .app
        .progress()
        .set_lesson_completed(&student, first.id(), true)
        .await
        .unwrap();
    assert_eq!(progress.completed_lessons, 1);
    assert_eq!(progress.progress, Percent::clamped(50));

    let dashboard = w.app.progress().dashboard(student.user_id).await.unwrap();
    assert_eq!(dashboard.overall, Percent::clamped(50));
    assert_eq!(dashboard.courses[0].course_title, "Intro to Rust");

    let detail = courses.course_detail(course.id(), Some(&student)).await.unwrap();
    assert!(detail.is_enrolled);
    assert_eq!(detail.lessons.len(), 2);
    assert_eq!(detail.lessons[0].title(), "Ownership");

    let denied = w.app.analytics().report(&student).await.unwrap_err();
    assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

    let instructor = w.sign_in(&instructor_id).await;
    let report = w.app.analytics().report(&instructor).await.unwrap();
    assert_eq!(report.counts.students, 1);
    assert_eq!(report.counts.enrollments, 1);
    assert_eq!(report.top_courses[0].share_percent, 100);
    assert_eq!(report.recent_enrollments[0].student_email, "student@example.com");

    w.app.session().sign_out().await.unwrap();
    assert!(matches!(
        w.app.session().require(),
        Err(ServiceError::NoSession)
    ));
}

#[tokio::test]
async fn reconcile_repairs_stale_cache_on_sqlite() {
    let w = world("memdb_reconcile").await;
    let instructor_id = w.account("t@example.com", Role::Instructor).await;
    let student_id = w.account("s@example.com", Role::Student).await;

    let instructor = w.sign_in(&instructor_id).await;
    let mut course_ids = Vec::new();
    for title in ["A", "B", "C"] {
        let course = w
            .app
            .courses()
            .create_course(&instructor, CourseDraft::titled(title))
            .await
            .unwrap();
        w.app
            .courses()
            .add_lesson(&instructor, course.id(), World::lesson("Only"))
            .await
            .unwrap();
        w.app
            .courses()
            .set_published(&instructor, course.id(), true)
            .await
            .unwrap();
        course_ids.push(course.id());
    }

    let student = w.sign_in(&student_id).await;
    for id in &course_ids {
        w.app.enrollments().enroll(&student, *id).await.unwrap();
    }

    let stale = w
        .storage
        .enrollments
        .get_enrollment(student.user_id, course_ids[1])
        .await
        .unwrap()
        .unwrap();
    w.storage
        .enrollments
        .set_cached_progress(stale.id(), Percent::FULL)
        .await
        .unwrap();

    let progress = w.app.progress();
    assert_eq!(progress.reconcile(student.user_id).await.unwrap(), 1);
    let summary = progress.dashboard(student.user_id).await.unwrap();
    assert_eq!(summary.courses.len(), 3);
    assert_eq!(summary.overall, Percent::ZERO);
    assert_eq!(summary.completed_courses, 0);

    let mine = w.app.courses().my_courses(&student).await.unwrap();
    assert_eq!(mine.len(), 3);
}

#[tokio::test]
async fn signed_in_student_without_profile_can_enroll_on_sqlite() {
    let w = world("memdb_no_profile").await;
    let instructor_id = w.account("t@example.com", Role::Instructor).await;
    let instructor = w.sign_in(&instructor_id).await;
    let courses = w.app.courses();
    let course = courses
        .create_course(&instructor, CourseDraft::titled("Rust"))
        .await
        .unwrap();
    let lesson = courses
        .add_lesson(&instructor, course.id(), World::lesson("Only"))
        .await
        .unwrap();
    courses.set_published(&instructor, course.id(), true).await.unwrap();

    // identity known to auth, no profile row yet
    let newcomer = AuthIdentity {
        user_id: UserId::generate(),
        email: "new@example.com".into(),
    };
    let student = w.sign_in(&newcomer).await;
    assert_eq!(student.role, Role::Student);

    let enrollment = w.app.enrollments().enroll(&student, course.id()).await.unwrap();
    assert_eq!(enrollment.course_id(), course.id());
    let profile = w
        .storage
        .profiles
        .get_profile(newcomer.user_id)
        .await
        .unwrap()
        .expect("profile created on enroll");
    assert_eq!(profile.email(), "new@example.com");
    assert_eq!(profile.role(), Role::Student);

    let progress = w
        .app
        .progress()
        .set_lesson_completed(&student, lesson.id(), true)
        .await
        .unwrap();
    assert_eq!(progress.progress, Percent::FULL);
}
