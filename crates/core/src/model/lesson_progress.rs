use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{LessonId, LessonProgressId, UserId};

/// Per-student, per-lesson completion flag; unique per (student, lesson).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub id: LessonProgressId,
    pub student_id: UserId,
    pub lesson_id: LessonId,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    #[must_use]
    pub fn new(student_id: UserId, lesson_id: LessonId) -> Self {
        Self {
            id: LessonProgressId::generate(),
            student_id,
            lesson_id,
            completed: false,
            completed_at: None,
        }
    }

    /// Set the completion flag. Completing stamps `now` unless already
    /// completed; un-completing clears the timestamp.
    pub fn mark(&mut self, completed: bool, now: DateTime<Utc>) {
        match (self.completed, completed) {
            (false, true) => self.completed_at = Some(now),
            (_, false) => self.completed_at = None,
            (true, true) => {}
        }
        self.completed = completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn mark_complete_stamps_once() {
        let mut p = LessonProgress::new(UserId::generate(), LessonId::generate());
        p.mark(true, fixed_now());
        p.mark(true, fixed_now() + chrono::Duration::days(1));
        assert!(p.completed);
        assert_eq!(p.completed_at, Some(fixed_now()));
    }

    #[test]
    fn unmark_clears_timestamp() {
        let mut p = LessonProgress::new(UserId::generate(), LessonId::generate());
        p.mark(true, fixed_now());
        p.mark(false, fixed_now());
        assert!(!p.completed);
        assert_eq!(p.completed_at, None);
    }
}
