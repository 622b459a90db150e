use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error type for parsing an ID from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn value(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|_| ParseIdError {
                    kind: stringify!($name),
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identity of an authenticated user; doubles as the profile key.
    UserId
);
uuid_id!(
    /// Unique identifier for a Course
    CourseId
);
uuid_id!(
    /// Unique identifier for a Lesson
    LessonId
);
uuid_id!(
    /// Unique identifier for an Enrollment
    EnrollmentId
);
uuid_id!(
    /// Unique identifier for a lesson progress row
    LessonProgressId
);

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "6f1c2a7e-2b7a-4c55-9d4e-0f3b1a2c3d4e";

    #[test]
    fn course_id_display_matches_uuid() {
        let id: CourseId = RAW.parse().unwrap();
        assert_eq!(id.to_string(), RAW);
    }

    #[test]
    fn ids_parse_with_surrounding_whitespace() {
        let id: LessonId = format!("  {RAW} ").parse().unwrap();
        assert_eq!(id.value(), Uuid::parse_str(RAW).unwrap());
    }

    #[test]
    fn invalid_id_names_the_kind() {
        let err = "not-a-uuid".parse::<EnrollmentId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse EnrollmentId from string");
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(UserId::generate(), UserId::generate());
    }

    #[test]
    fn debug_names_the_kind() {
        let id: UserId = RAW.parse().unwrap();
        assert_eq!(format!("{id:?}"), format!("UserId({RAW})"));
    }
}
