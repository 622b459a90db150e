use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::UserId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProfileError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("profile email cannot be empty")]
    EmptyEmail,
}

//
// ─── ROLES & CAPABILITIES ──────────────────────────────────────────────────────
//

/// Closed set of account roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Instructor,
    Admin,
}

/// Something a role may or may not be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    BrowseCourses,
    Enroll,
    TrackProgress,
    EditOwnProfile,
    CreateCourse,
    ManageOwnCourses,
    ViewAnalytics,
    ViewAllCourses,
    ManageUsers,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Instructor, Role::Admin];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }

    /// Role stored on a profile row; a missing or blank value means student.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::UnknownRole` for unrecognised values.
    pub fn from_stored(raw: Option<&str>) -> Result<Self, ProfileError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Role::Student),
            Some(value) => value.parse(),
        }
    }

    /// The single capability table every role gate consults.
    #[must_use]
    pub fn allows(self, capability: Capability) -> bool {
        use Capability as C;
        match self {
            Role::Student => matches!(
                capability,
                C::BrowseCourses | C::Enroll | C::TrackProgress | C::EditOwnProfile
            ),
            Role::Instructor => matches!(
                capability,
                C::BrowseCourses
                    | C::Enroll
                    | C::TrackProgress
                    | C::EditOwnProfile
                    | C::CreateCourse
                    | C::ManageOwnCourses
                    | C::ViewAnalytics
            ),
            Role::Admin => !matches!(capability, C::Enroll | C::TrackProgress),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            other => Err(ProfileError::UnknownRole(other.to_owned())),
        }
    }
}

//
// ─── PROFILE ───────────────────────────────────────────────────────────────────
//

/// Account profile keyed by the auth identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    id: UserId,
    email: String,
    full_name: Option<String>,
    role: Role,
    created_at: DateTime<Utc>,
}

impl Profile {
    /// # Errors
    ///
    /// Returns `ProfileError::EmptyEmail` if the email is blank.
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        full_name: Option<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ProfileError> {
        let email = email.into().trim().to_owned();
        if email.is_empty() {
            return Err(ProfileError::EmptyEmail);
        }
        Ok(Self {
            id,
            email,
            full_name: normalize_name(full_name),
            role,
            created_at,
        })
    }

    /// Profile mirroring an auth identity on first sign-in. The email is
    /// taken as given: accounts without one (phone sign-in) get an empty
    /// email.
    #[must_use]
    pub fn for_identity(
        id: UserId,
        email: impl Into<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::from_persisted(id, email.into(), None, role, created_at)
    }

    /// Rebuild a stored profile without re-validating it.
    #[must_use]
    pub fn from_persisted(
        id: UserId,
        email: String,
        full_name: Option<String>,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email: email.trim().to_owned(),
            full_name: normalize_name(full_name),
            role,
            created_at,
        }
    }

    pub fn set_full_name(&mut self, full_name: Option<String>) {
        self.full_name = normalize_name(full_name);
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Full name when set, otherwise the email.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn normalize_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_owned()).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn missing_role_defaults_to_student() {
        assert_eq!(Role::from_stored(None).unwrap(), Role::Student);
        assert_eq!(Role::from_stored(Some(" ")).unwrap(), Role::Student);
        assert_eq!(Role::from_stored(Some("Instructor")).unwrap(), Role::Instructor);
        assert!(Role::from_stored(Some("owner")).is_err());
    }

    #[test]
    fn capability_table() {
        assert!(Role::Student.allows(Capability::Enroll));
        assert!(!Role::Student.allows(Capability::CreateCourse));
        assert!(!Role::Student.allows(Capability::ViewAnalytics));

        assert!(Role::Instructor.allows(Capability::CreateCourse));
        assert!(Role::Instructor.allows(Capability::ViewAnalytics));
        assert!(!Role::Instructor.allows(Capability::ManageUsers));
        assert!(!Role::Instructor.allows(Capability::ViewAllCourses));

        assert!(Role::Admin.allows(Capability::ManageUsers));
        assert!(Role::Admin.allows(Capability::ViewAllCourses));
        assert!(!Role::Admin.allows(Capability::Enroll));
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn profile_normalizes_name() {
        let mut p = Profile::new(
            UserId::generate(),
            " ana@example.com ",
            Some("  ".into()),
            Role::Student,
            fixed_now(),
        )
        .unwrap();
        assert_eq!(p.email(), "ana@example.com");
        assert_eq!(p.full_name(), None);
        assert_eq!(p.display_name(), "ana@example.com");

        p.set_full_name(Some(" Ana Ruiz ".into()));
        assert_eq!(p.display_name(), "Ana Ruiz");
    }

    #[test]
    fn profile_rejects_blank_email() {
        let err = Profile::new(UserId::generate(), "", None, Role::Admin, fixed_now()).unwrap_err();
        assert_eq!(err, ProfileError::EmptyEmail);
    }

    #[test]
    fn identity_profile_accepts_missing_email() {
        let p = Profile::for_identity(UserId::generate(), "", Role::Student, fixed_now());
        assert_eq!(p.email(), "");
        assert_eq!(p.full_name(), None);
        assert_eq!(p.role(), Role::Student);
    }
}
