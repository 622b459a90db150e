use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{CourseId, EnrollmentId, UserId};
use crate::model::percent::Percent;

/// Links one student to one course; unique per (student, course).
///
/// `progress` is a cached copy of the percentage derived from lesson progress.
/// It is rewritten together with lesson progress and never read as the source
/// of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    id: EnrollmentId,
    student_id: UserId,
    course_id: CourseId,
    enrolled_at: DateTime<Utc>,
    progress: Percent,
}

impl Enrollment {
    /// A fresh enrollment at 0%.
    #[must_use]
    pub fn new(student_id: UserId, course_id: CourseId, enrolled_at: DateTime<Utc>) -> Self {
        Self::from_persisted(
            EnrollmentId::generate(),
            student_id,
            course_id,
            enrolled_at,
            Percent::ZERO,
        )
    }

    #[must_use]
    pub fn from_persisted(
        id: EnrollmentId,
        student_id: UserId,
        course_id: CourseId,
        enrolled_at: DateTime<Utc>,
        progress: Percent,
    ) -> Self {
        Self {
            id,
            student_id,
            course_id,
            enrolled_at,
            progress,
        }
    }

    #[must_use]
    pub fn id(&self) -> EnrollmentId {
        self.id
    }

    #[must_use]
    pub fn student_id(&self) -> UserId {
        self.student_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    #[must_use]
    pub fn progress(&self) -> Percent {
        self.progress
    }

    pub fn set_progress(&mut self, progress: Percent) {
        self.progress = progress;
    }
}
