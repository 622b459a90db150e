mod course;
mod enrollment;
mod ids;
mod lesson;
mod lesson_progress;
mod media;
mod percent;
mod profile;

pub use ids::{CourseId, EnrollmentId, LessonId, LessonProgressId, ParseIdError, UserId};

pub use course::{Course, CourseDraft, CourseError, Price, PriceError};
pub use enrollment::Enrollment;
pub use lesson::{Lesson, LessonDraft, LessonError};
pub use lesson_progress::LessonProgress;
pub use media::{MediaUrl, MediaUrlError};
pub use percent::Percent;
pub use profile::{Capability, Profile, ProfileError, Role};
