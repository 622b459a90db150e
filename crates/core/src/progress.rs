//! Progress math shared by every consumer.
//!
//! All percentages are derived from lesson progress; nothing here touches
//! storage.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{CourseId, LessonId, Percent};

/// Completion of one enrolled course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub course_id: CourseId,
    pub course_title: String,
    pub total_lessons: u32,
    pub completed_lessons: u32,
    pub progress: Percent,
}

impl CourseProgress {
    /// Count completed lessons against the course's lesson set.
    ///
    /// Completed ids outside `lessons` are ignored and duplicates count once,
    /// so `completed_lessons <= total_lessons` always holds.
    #[must_use]
    pub fn compute(
        course_id: CourseId,
        course_title: impl Into<String>,
        lessons: &[LessonId],
        completed: &[LessonId],
    ) -> Self {
        let lesson_set: HashSet<LessonId> = lessons.iter().copied().collect();
        let done: HashSet<LessonId> = completed
            .iter()
            .copied()
            .filter(|id| lesson_set.contains(id))
            .collect();

        let total = u32::try_from(lesson_set.len()).unwrap_or(u32::MAX);
        let completed = u32::try_from(done.len()).unwrap_or(u32::MAX);

        Self {
            course_id,
            course_title: course_title.into(),
            total_lessons: total,
            completed_lessons: completed,
            progress: Percent::of(u64::from(completed), u64::from(total)),
        }
    }

    #[must_use]
    pub fn remaining_lessons(&self) -> u32 {
        self.total_lessons - self.completed_lessons
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }
}

/// Unweighted, rounded mean of per-course percentages; 0 for an empty slice.
///
/// Every course counts once regardless of how many lessons it has.
#[must_use]
pub fn mean_percent(values: impl IntoIterator<Item = Percent>) -> Percent {
    let (sum, count) = values
        .into_iter()
        .fold((0_u64, 0_u64), |(sum, count), p| (sum + u64::from(p.value()), count + 1));
    if count == 0 {
        return Percent::ZERO;
    }
    // round half up: (2*sum + count) / (2*count)
    let mean = (2 * sum + count) / (2 * count);
    Percent::clamped(u32::try_from(mean).unwrap_or(100))
}

/// Per-course rows plus the overall figure a progress page renders.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub courses: Vec<CourseProgress>,
    pub overall: Percent,
    pub completed_courses: u32,
    pub total_lessons: u32,
    pub completed_lessons: u32,
}

impl ProgressSummary {
    #[must_use]
    pub fn from_courses(courses: Vec<CourseProgress>) -> Self {
        let overall = mean_percent(courses.iter().map(|c| c.progress));
        let completed_courses =
            u32::try_from(courses.iter().filter(|c| c.is_complete()).count()).unwrap_or(u32::MAX);
        let total_lessons = courses.iter().map(|c| c.total_lessons).sum();
        let completed_lessons = courses.iter().map(|c| c.completed_lessons).sum();
        Self {
            courses,
            overall,
            completed_courses,
            total_lessons,
            completed_lessons,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lessons(n: usize) -> Vec<LessonId> {
        (0..n).map(|_| LessonId::generate()).collect()
    }

    #[test]
    fn zero_lessons_is_zero_percent() {
        let p = CourseProgress::compute(CourseId::generate(), "Empty", &[], &[]);
        assert_eq!(p.total_lessons, 0);
        assert_eq!(p.completed_lessons, 0);
        assert_eq!(p.progress, Percent::ZERO);
    }

    #[test]
    fn ignores_foreign_and_duplicate_completions() {
        let ls = lessons(4);
        let foreign = LessonId::generate();
        let p = CourseProgress::compute(
            CourseId::generate(),
            "Rust",
            &ls,
            &[ls[0], ls[0], ls[1], foreign],
        );
        assert_eq!(p.completed_lessons, 2);
        assert_eq!(p.total_lessons, 4);
        assert_eq!(p.progress.value(), 50);
        assert_eq!(p.remaining_lessons(), 2);
    }

    #[test]
    fn mean_is_unweighted() {
        // 1/1 lesson done and 0/10 done average to 50, not 9
        let small = lessons(1);
        let big = lessons(10);
        let a = CourseProgress::compute(CourseId::generate(), "A", &small, &small);
        let b = CourseProgress::compute(CourseId::generate(), "B", &big, &[]);
        let summary = ProgressSummary::from_courses(vec![a, b]);
        assert_eq!(summary.overall.value(), 50);
        assert_eq!(summary.completed_courses, 1);
        assert_eq!(summary.total_lessons, 11);
        assert_eq!(summary.completed_lessons, 1);
    }

    #[test]
    fn mean_rounds_half_up() {
        let values = [Percent::clamped(33), Percent::clamped(34)];
        assert_eq!(mean_percent(values).value(), 34);
        assert_eq!(mean_percent([]).value(), 0);
    }

    #[test]
    fn empty_summary_is_zero() {
        let summary = ProgressSummary::from_courses(Vec::new());
        assert!(summary.is_empty());
        assert_eq!(summary.overall, Percent::ZERO);
    }
}
