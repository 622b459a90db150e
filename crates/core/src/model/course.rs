use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{CourseId, UserId};
use crate::model::media::{MediaUrl, MediaUrlError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error("price must be a finite number")]
    NotFinite,

    #[error("price cannot be negative")]
    Negative,

    #[error("price is too large")]
    TooLarge,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error("invalid course image: {0}")]
    InvalidImage(#[source] MediaUrlError),
}

//
// ─── PRICE ─────────────────────────────────────────────────────────────────────
//

/// Non-negative course price held in whole cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub const FREE: Price = Price(0);

    #[must_use]
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Converts a decimal amount (e.g. `19.99`) into a price, rounding to the nearest cent.
    ///
    /// # Errors
    ///
    /// Returns `PriceError` for NaN/infinite, negative or out-of-range amounts.
    pub fn from_amount(amount: f64) -> Result<Self, PriceError> {
        if !amount.is_finite() {
            return Err(PriceError::NotFinite);
        }
        if amount < 0.0 {
            return Err(PriceError::Negative);
        }
        let cents = (amount * 100.0).round();
        // 2^53 is the largest integer f64 represents exactly
        if cents > 9_007_199_254_740_992.0 {
            return Err(PriceError::TooLarge);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Self(cents as u64))
    }

    #[must_use]
    pub fn cents(self) -> u64 {
        self.0
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn amount(self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[must_use]
    pub fn is_free(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Unvalidated course form input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CourseDraft {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub image_url: Option<String>,
}

impl CourseDraft {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Validate the draft and build an unpublished course owned by `instructor_id`.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` if the title is blank, the price is invalid or the
    /// image reference is not an absolute URL.
    pub fn validate(self, instructor_id: UserId, now: DateTime<Utc>) -> Result<Course, CourseError> {
        Course::new(
            CourseId::generate(),
            instructor_id,
            self.title,
            self.description,
            Price::from_amount(self.price)?,
            MediaUrl::parse_optional(self.image_url.as_deref()).map_err(CourseError::InvalidImage)?,
            now,
        )
    }
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// A course owned by a single instructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    id: CourseId,
    instructor_id: UserId,
    title: String,
    description: String,
    image_url: Option<MediaUrl>,
    price: Price,
    is_published: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Course {
    /// Creates a new unpublished course.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` if the title is empty or whitespace-only.
    pub fn new(
        id: CourseId,
        instructor_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        price: Price,
        image_url: Option<MediaUrl>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        Self::from_persisted(
            id,
            instructor_id,
            title,
            description,
            price,
            image_url,
            false,
            created_at,
            created_at,
        )
    }

    /// Rebuilds a course from stored fields.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::EmptyTitle` if the stored title is blank.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: CourseId,
        instructor_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        price: Price,
        image_url: Option<MediaUrl>,
        is_published: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let title = title.into();
        let title = title.trim();
        if title.is_empty() {
            return Err(CourseError::EmptyTitle);
        }

        Ok(Self {
            id,
            instructor_id,
            title: title.to_owned(),
            description: description.into().trim().to_owned(),
            image_url,
            price,
            is_published,
            created_at,
            updated_at,
        })
    }

    /// Toggle publication, bumping `updated_at`.
    pub fn set_published(&mut self, published: bool, now: DateTime<Utc>) {
        self.is_published = published;
        self.updated_at = now;
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
    }

    #[must_use]
    pub fn instructor_id(&self) -> UserId {
        self.instructor_id
    }

    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.instructor_id == user
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn image_url(&self) -> Option<&MediaUrl> {
        self.image_url.as_ref()
    }

    #[must_use]
    pub fn price(&self) -> Price {
        self.price
    }

    #[must_use]
    pub fn is_published(&self) -> bool {
        self.is_published
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn draft_rejects_blank_titles() {
        for title in ["", "   "] {
            let err = CourseDraft::titled(title)
                .validate(UserId::generate(), fixed_now())
                .unwrap_err();
            assert_eq!(err, CourseError::EmptyTitle);
        }
    }

    #[test]
    fn draft_builds_unpublished_trimmed_course() {
        let instructor = UserId::generate();
        let course = CourseDraft {
            title: "  Rust for Beginners ".into(),
            description: " ownership, borrowing ".into(),
            price: 19.99,
            image_url: Some(String::new()),
        }
        .validate(instructor, fixed_now())
        .unwrap();

        assert_eq!(course.title(), "Rust for Beginners");
        assert_eq!(course.description(), "ownership, borrowing");
        assert_eq!(course.price().cents(), 1999);
        assert!(course.image_url().is_none());
        assert!(!course.is_published());
        assert!(course.is_owned_by(instructor));
        assert_eq!(course.created_at(), course.updated_at());
    }

    #[test]
    fn draft_rejects_negative_price_and_bad_image() {
        let mut draft = CourseDraft::titled("Rust");
        draft.price = -1.0;
        assert_eq!(
            draft.clone().validate(UserId::generate(), fixed_now()).unwrap_err(),
            CourseError::Price(PriceError::Negative)
        );

        draft.price = 0.0;
        draft.image_url = Some("not a url".into());
        assert!(matches!(
            draft.validate(UserId::generate(), fixed_now()),
            Err(CourseError::InvalidImage(_))
        ));
    }

    #[test]
    fn price_rejects_nan() {
        assert_eq!(Price::from_amount(f64::NAN), Err(PriceError::NotFinite));
    }

    #[test]
    fn price_formats_cents() {
        let price = Price::from_amount(12.5).unwrap();
        assert_eq!(price.to_string(), "12.50");
        assert!((price.amount() - 12.5).abs() < f64::EPSILON);
        assert!(Price::FREE.is_free());
    }

    #[test]
    fn set_published_bumps_updated_at() {
        let mut course = CourseDraft::titled("Rust")
            .validate(UserId::generate(), fixed_now())
            .unwrap();
        let later = fixed_now() + chrono::Duration::hours(1);
        course.set_published(true, later);
        assert!(course.is_published());
        assert_eq!(course.updated_at(), later);
        assert_eq!(course.created_at(), fixed_now());
    }
}
