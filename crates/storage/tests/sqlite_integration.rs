use chrono::Duration;
use lms_core::model::{
    Course, CourseDraft, Enrollment, EnrollmentId, LessonDraft, LessonId, LessonProgress, Percent,
    Profile, Role, UserId,
};
use lms_core::time::fixed_now;
use storage::repository::{
    CourseFilter, CourseRepository, EnrollmentRepository, LessonProgressRepository,
    LessonRepository, ProfileRepository, ProgressPersistence, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn repo(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

async fn profile(repo: &SqliteRepository, email: &str, role: Role) -> Profile {
    let p = Profile::new(UserId::generate(), email, None, role, fixed_now()).unwrap();
    repo.upsert_profile(&p).await.unwrap();
    p
}

async fn course(repo: &SqliteRepository, owner: UserId, title: &str) -> Course {
    let mut c = CourseDraft::titled(title).validate(owner, fixed_now()).unwrap();
    c.set_published(true, fixed_now());
    repo.insert_course(&c).await.unwrap();
    c
}

fn lesson_draft(title: &str) -> LessonDraft {
    LessonDraft {
        title: title.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn sqlite_roundtrip_courses_and_ordered_lessons() {
    let repo = repo("memdb_courses").await;
    let instructor = profile(&repo, "t@example.com", Role::Instructor).await;
    let c = course(&repo, instructor.id(), "Rust").await;

    for (idx, title) in [(2, "Third"), (0, "First"), (1, "Second")] {
        let lesson = lesson_draft(title).validate(c.id(), idx, fixed_now()).unwrap();
        repo.insert_lesson(&lesson).await.unwrap();
    }

    let fetched = repo.get_course(c.id()).await.unwrap().expect("course");
    assert_eq!(fetched, c);

    let titles: Vec<String> = repo
        .lessons_for_course(c.id())
        .await
        .unwrap()
        .iter()
        .map(|l| l.title().to_owned())
        .collect();
    assert_eq!(titles, ["First", "Second", "Third"]);
    assert_eq!(repo.lesson_ids_for_course(c.id()).await.unwrap().len(), 3);

    let mine = repo
        .list_courses(CourseFilter::by_instructor(instructor.id()), 10)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn sqlite_enforces_uniqueness_and_foreign_keys() {
    let repo = repo("memdb_unique").await;
    let instructor = profile(&repo, "t@example.com", Role::Instructor).await;
    let student = profile(&repo, "s@example.com", Role::Student).await;
    let c = course(&repo, instructor.id(), "Rust").await;

    repo.insert_enrollment(&Enrollment::new(student.id(), c.id(), fixed_now()))
        .await
        .unwrap();
    let dup = repo
        .insert_enrollment(&Enrollment::new(student.id(), c.id(), fixed_now()))
        .await;
    assert!(matches!(dup, Err(StorageError::Conflict)));
    assert_eq!(repo.count_enrollments().await.unwrap(), 1);

    let first = lesson_draft("A").validate(c.id(), 0, fixed_now()).unwrap();
    let clash = lesson_draft("B").validate(c.id(), 0, fixed_now()).unwrap();
    repo.insert_lesson(&first).await.unwrap();
    assert!(matches!(
        repo.insert_lesson(&clash).await,
        Err(StorageError::Conflict)
    ));

    let orphan = CourseDraft::titled("Ghost")
        .validate(instructor.id(), fixed_now())
        .unwrap();
    let missing = repo
        .insert_enrollment(&Enrollment::new(student.id(), orphan.id(), fixed_now()))
        .await;
    assert!(matches!(missing, Err(StorageError::NotFound)));
}

#[tokio::test]
async fn sqlite_record_progress_is_atomic() {
    let repo = repo("memdb_progress").await;
    let instructor = profile(&repo, "t@example.com", Role::Instructor).await;
    let student = profile(&repo, "s@example.com", Role::Student).await;
    let c = course(&repo, instructor.id(), "Rust").await;
    let first = lesson_draft("A").validate(c.id(), 0, fixed_now()).unwrap();
    let second = lesson_draft("B").validate(c.id(), 1, fixed_now()).unwrap();
    repo.insert_lesson(&first).await.unwrap();
    repo.insert_lesson(&second).await.unwrap();
    let enrollment = Enrollment::new(student.id(), c.id(), fixed_now());
    repo.insert_enrollment(&enrollment).await.unwrap();

    let mut progress = LessonProgress::new(student.id(), first.id());
    progress.mark(true, fixed_now());

    // unknown enrollment rolls the progress row back
    let err = repo.record_progress(&progress, EnrollmentId::generate()).await;
    assert!(matches!(err, Err(StorageError::NotFound)));
    assert!(
        repo.get_lesson_progress(student.id(), first.id())
            .await
            .unwrap()
            .is_none()
    );

    assert_eq!(
        repo.record_progress(&progress, enrollment.id()).await.unwrap().value(),
        50
    );
    let mut other = LessonProgress::new(student.id(), second.id());
    other.mark(true, fixed_now());
    assert_eq!(
        repo.record_progress(&other, enrollment.id()).await.unwrap(),
        Percent::FULL
    );
    let stored = repo
        .get_enrollment(student.id(), c.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.progress(), Percent::FULL);

    // second write for the same lesson updates in place
    let mut undone = progress.clone();
    undone.mark(false, fixed_now());
    undone.id = lms_core::model::LessonProgressId::generate();
    assert_eq!(
        repo.record_progress(&undone, enrollment.id()).await.unwrap().value(),
        50
    );
    let completed = repo
        .completed_lessons(student.id(), &[first.id(), second.id(), LessonId::generate()])
        .await
        .unwrap();
    assert_eq!(completed, vec![second.id()]);
}

#[tokio::test]
async fn sqlite_analytics_queries() {
    let repo = repo("memdb_analytics").await;
    let instructor = profile(&repo, "t@example.com", Role::Instructor).await;
    let a = profile(&repo, "a@example.com", Role::Student).await;
    let b = profile(&repo, "b@example.com", Role::Student).await;
    let popular = course(&repo, instructor.id(), "Popular").await;
    let quiet = course(&repo, instructor.id(), "Quiet").await;

    let older = Enrollment::new(a.id(), popular.id(), fixed_now() - Duration::days(90));
    let newer = Enrollment::new(b.id(), popular.id(), fixed_now() - Duration::days(1));
    repo.insert_enrollment(&older).await.unwrap();
    repo.insert_enrollment(&newer).await.unwrap();

    assert_eq!(repo.count_profiles(Role::Student).await.unwrap(), 2);
    assert_eq!(repo.count_profiles(Role::Instructor).await.unwrap(), 1);
    assert_eq!(repo.count_courses().await.unwrap(), 2);

    let mut tallies = repo.enrollment_tallies().await.unwrap();
    tallies.sort_by_key(|t| std::cmp::Reverse(t.enrollments));
    assert_eq!(tallies[0].course_id, popular.id());
    assert_eq!(tallies[0].enrollments, 2);
    assert_eq!(tallies[1].course_id, quiet.id());
    assert_eq!(tallies[1].enrollments, 0);

    let recent = repo.recent_enrollments(1).await.unwrap();
    assert_eq!(recent[0].id(), newer.id());

    let since = repo
        .enrollments_since(fixed_now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(since.len(), 1);

    let profiles = repo.get_profiles(&[a.id(), b.id(), UserId::generate()]).await.unwrap();
    assert_eq!(profiles.len(), 2);
}
