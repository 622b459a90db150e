use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole-number percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(u8);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const FULL: Percent = Percent(100);

    /// Builds a percentage, saturating anything above 100.
    #[must_use]
    pub fn clamped(value: u32) -> Self {
        // min(100) keeps the cast lossless
        #[allow(clippy::cast_possible_truncation)]
        Self(value.min(100) as u8)
    }

    /// `round(100 * part / whole)` with halves rounded up; `0` when `whole` is zero.
    ///
    /// `part` is capped at `whole`, so the result never exceeds 100.
    #[must_use]
    pub fn of(part: u64, whole: u64) -> Self {
        if whole == 0 {
            return Self::ZERO;
        }
        let part = part.min(whole);
        let rounded = (200 * u128::from(part) + u128::from(whole)) / (2 * u128::from(whole));
        Self::clamped(u32::try_from(rounded).unwrap_or(100))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_complete(self) -> bool {
        self.0 == 100
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_whole_is_zero() {
        assert_eq!(Percent::of(0, 0), Percent::ZERO);
        assert_eq!(Percent::of(3, 0), Percent::ZERO);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(Percent::of(1, 3).value(), 33);
        assert_eq!(Percent::of(2, 3).value(), 67);
        assert_eq!(Percent::of(1, 8).value(), 13);
        assert_eq!(Percent::of(1, 200).value(), 1);
    }

    #[test]
    fn part_is_capped_at_whole() {
        assert_eq!(Percent::of(7, 5), Percent::FULL);
    }

    #[test]
    fn clamped_saturates() {
        assert_eq!(Percent::clamped(250), Percent::FULL);
        assert_eq!(Percent::clamped(42).to_string(), "42%");
    }
}
