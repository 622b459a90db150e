use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use lms_core::model::{
    Course, CourseId, Enrollment, EnrollmentId, Lesson, LessonId, LessonProgress,
    LessonProgressId, Percent, Price, Profile, Role, UserId,
};
use lms_core::progress::CourseProgress;
use storage::repository::{Storage, StorageError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    students: u32,
    lessons_per_course: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidStudents { raw: String },
    InvalidLessons { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidStudents { raw } => write!(f, "invalid --students value: {raw}"),
            ArgsError::InvalidLessons { raw } => write!(f, "invalid --lessons value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("LMS_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut students = std::env::var("LMS_SEED_STUDENTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(6);
        let mut lessons_per_course = std::env::var("LMS_SEED_LESSONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(4);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--students" => {
                    let value = require_value(&mut args, "--students")?;
                    students = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidStudents { raw: value.clone() })?;
                }
                "--lessons" => {
                    let value = require_value(&mut args, "--lessons")?;
                    lessons_per_course = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidLessons { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            students,
            lessons_per_course,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --students <n>            Number of demo students (default: 6)");
    eprintln!("  --lessons <n>             Lessons per course (default: 4)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  LMS_DB_URL, LMS_SEED_STUDENTS, LMS_SEED_LESSONS, RUST_LOG");
}

// Stable ids so reseeding the same database is a no-op.
fn seeded(namespace: u128, n: u32) -> Uuid {
    Uuid::from_u128((namespace << 64) | u128::from(n))
}

const NS_PROFILE: u128 = 0x1;
const NS_COURSE: u128 = 0x2;
const NS_LESSON: u128 = 0x3;
const NS_ENROLLMENT: u128 = 0x4;
const NS_PROGRESS: u128 = 0x5;

/// `Ok(true)` when inserted, `Ok(false)` when the row already existed.
fn inserted(result: Result<(), StorageError>) -> Result<bool, StorageError> {
    match result {
        Ok(()) => Ok(true),
        Err(StorageError::Conflict) => Ok(false),
        Err(e) => Err(e),
    }
}

const CATALOG: [(&str, &str, f64, bool); 3] = [
    ("Rust fundamentals", "Ownership, borrowing and the type system.", 0.0, true),
    ("Async services", "Tokio, tasks and structured concurrency.", 49.0, true),
    ("Storage engines", "Pages, logs and indexes from scratch.", 79.5, false),
];

#[allow(clippy::too_many_lines)]
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);
    let since = |months: u32| now.checked_sub_months(Months::new(months)).unwrap_or(now);

    let instructor = Profile::new(
        UserId::new(seeded(NS_PROFILE, 0)),
        "instructor@example.com",
        Some("Ines Instructor".into()),
        Role::Instructor,
        since(8),
    )?;
    let admin = Profile::new(
        UserId::new(seeded(NS_PROFILE, 1)),
        "admin@example.com",
        Some("Ada Admin".into()),
        Role::Admin,
        since(8),
    )?;
    storage.profiles.upsert_profile(&instructor).await?;
    storage.profiles.upsert_profile(&admin).await?;

    let mut students = Vec::new();
    for i in 0..args.students {
        let student = Profile::new(
            UserId::new(seeded(NS_PROFILE, 100 + i)),
            format!("student{i}@example.com"),
            Some(format!("Student {}", i + 1)),
            Role::Student,
            since(7),
        )?;
        storage.profiles.upsert_profile(&student).await?;
        students.push(student);
    }

    let mut courses = Vec::new();
    for (ci, (title, description, price, published)) in (0u32..).zip(CATALOG) {
        let mut course = Course::new(
            CourseId::new(seeded(NS_COURSE, ci)),
            instructor.id(),
            title,
            description,
            Price::from_amount(price)?,
            None,
            since(7) + Duration::days(i64::from(ci)),
        )?;
        course.set_published(published, course.created_at());
        if inserted(storage.courses.insert_course(&course).await)? {
            tracing::info!(course = %course.id(), title, "seeded course");
        }

        let mut lesson_ids = Vec::new();
        for li in 0..args.lessons_per_course {
            let lesson = Lesson::from_persisted(
                LessonId::new(seeded(NS_LESSON, ci * 1000 + li)),
                course.id(),
                format!("{title}: part {}", li + 1),
                format!("Notes for part {} of {title}.", li + 1),
                None,
                li,
                course.created_at(),
                course.created_at(),
            )?;
            inserted(storage.lessons.insert_lesson(&lesson).await)?;
            lesson_ids.push(lesson.id());
        }
        courses.push((course, lesson_ids));
    }

    let mut enrollments = 0u32;
    for (si, student) in (0u32..).zip(&students) {
        for (ci, (course, lesson_ids)) in (0u32..).zip(&courses) {
            // every student takes the first course, every other student the second
            if !course.is_published() || (ci > 0 && si % 2 == 1) {
                continue;
            }
            let enrolled_at = since(si % 6) + Duration::hours(i64::from(ci));
            let key = si * 100 + ci;
            let enrollment = Enrollment::from_persisted(
                EnrollmentId::new(seeded(NS_ENROLLMENT, key)),
                student.id(),
                course.id(),
                enrolled_at,
                Percent::ZERO,
            );
            if !inserted(storage.enrollments.insert_enrollment(&enrollment).await)? {
                continue;
            }
            enrollments += 1;

            let done = usize::try_from(si).unwrap_or(0) % (lesson_ids.len() + 1);
            let completed = &lesson_ids[..done];
            let expected =
                CourseProgress::compute(course.id(), course.title(), lesson_ids, completed);
            let mut stored = Percent::ZERO;
            for (li, lesson_id) in (0u32..).zip(completed) {
                let row = LessonProgress {
                    id: LessonProgressId::new(seeded(NS_PROGRESS, key * 1000 + li)),
                    student_id: student.id(),
                    lesson_id: *lesson_id,
                    completed: true,
                    completed_at: Some(enrolled_at + Duration::days(i64::from(li) + 1)),
                };
                stored = storage
                    .progress_writes
                    .record_progress(&row, enrollment.id())
                    .await?;
            }
            if stored != expected.progress {
                tracing::warn!(
                    enrollment = %enrollment.id(),
                    %stored,
                    expected = %expected.progress,
                    "seeded progress disagrees with lesson rows"
                );
            }
        }
    }

    println!(
        "Seeded {} students, {} courses and {} new enrollments into {}",
        students.len(),
        courses.len(),
        enrollments,
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage=info,seed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
