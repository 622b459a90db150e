//! Platform-wide counters, the monthly enrollment histogram and course ranking.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::model::CourseId;
use crate::time::months_before;

/// Number of calendar months the enrollment histogram covers, current month included.
pub const HISTORY_MONTHS: u32 = 6;

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Enrollments falling in one calendar month-of-year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthBucket {
    /// 1-based month of year.
    pub month: u32,
    pub label: &'static str,
    pub count: u32,
}

/// Earliest enrollment date considered by the histogram.
#[must_use]
pub fn history_start(now: DateTime<Utc>) -> DateTime<Utc> {
    months_before(now, HISTORY_MONTHS)
}

/// Bucket enrollment dates into the trailing `HISTORY_MONTHS` calendar months,
/// oldest first and ending with the month of `now`.
///
/// A date lands in a bucket when its month-of-year matches, whatever the year.
/// Callers pass dates already restricted to `history_start(now)..`.
#[must_use]
pub fn monthly_histogram(
    now: DateTime<Utc>,
    dates: impl IntoIterator<Item = DateTime<Utc>>,
) -> Vec<MonthBucket> {
    let mut counts = [0_u32; 12];
    for date in dates {
        counts[date.month0() as usize] += 1;
    }

    let current = now.month0();
    (0..HISTORY_MONTHS)
        .rev()
        .map(|back| {
            let idx = ((current + 12 - back) % 12) as usize;
            MonthBucket {
                month: idx as u32 + 1,
                label: MONTH_LABELS[idx],
                count: counts[idx],
            }
        })
        .collect()
}

/// Totals shown at the top of the analytics page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlatformCounts {
    pub students: u64,
    pub courses: u64,
    pub lessons: u64,
    pub enrollments: u64,
}

/// Enrollment count for one course, as fetched from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseTally {
    pub course_id: CourseId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub enrollments: u64,
}

/// A ranked course and its enrollments as a share of all students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseShare {
    pub course_id: CourseId,
    pub title: String,
    pub enrollments: u64,
    /// `round(100 * enrollments / students)`; 0 when there are no students.
    pub share_percent: u64,
}

/// `round(100 * part / whole)` with halves rounded up, 0 when `whole` is zero.
///
/// Unlike `Percent::of` this is not capped: a course can enroll non-students.
#[must_use]
pub fn share_percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return 0;
    }
    let rounded = (200 * u128::from(part) + u128::from(whole)) / (2 * u128::from(whole));
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

/// The `limit` most-enrolled courses; ties go to the newer course.
#[must_use]
pub fn top_courses(mut tallies: Vec<CourseTally>, total_students: u64, limit: usize) -> Vec<CourseShare> {
    tallies.sort_by(|a, b| {
        b.enrollments
            .cmp(&a.enrollments)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    tallies
        .into_iter()
        .take(limit)
        .map(|t| CourseShare {
            share_percent: share_percent(t.enrollments, total_students),
            course_id: t.course_id,
            title: t.title,
            enrollments: t.enrollments,
        })
        .collect()
}
