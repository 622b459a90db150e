use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{Capability, Profile, Role, UserId};
use storage::repository::ProfileRepository;

use crate::Clock;
use crate::deadline::within;
use crate::error::ServiceError;
use crate::session::Session;

#[derive(Clone)]
pub struct ProfileService {
    clock: Clock,
    profiles: Arc<dyn ProfileRepository>,
    timeout: Duration,
}

impl ProfileService {
    #[must_use]
    pub fn new(clock: Clock, profiles: Arc<dyn ProfileRepository>, timeout: Duration) -> Self {
        Self {
            clock,
            profiles,
            timeout,
        }
    }

    /// The session user's profile, created on first access.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` on storage failures.
    pub async fn me(&self, session: &Session) -> Result<Profile, ServiceError> {
        ensure_profile(self.profiles.as_ref(), session, self.clock, self.timeout).await
    }

    /// Set or clear the display name; blank clears it.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` on storage failures.
    #[tracing::instrument(skip(self, session, full_name), fields(user = %session.user_id))]
    pub async fn update_full_name(
        &self,
        session: &Session,
        full_name: Option<String>,
    ) -> Result<Profile, ServiceError> {
        session.require(Capability::EditOwnProfile)?;
        let mut profile = self.me(session).await?;
        profile.set_full_name(full_name);
        within(self.timeout, self.profiles.upsert_profile(&profile)).await?;
        Ok(profile)
    }

    /// Change another account's role.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::PermissionDenied` without the manage-users
    /// capability, `ServiceError::NotFound` for an unknown user.
    #[tracing::instrument(skip(self, session), fields(admin = %session.user_id))]
    pub async fn set_role(
        &self,
        session: &Session,
        user: UserId,
        role: Role,
    ) -> Result<Profile, ServiceError> {
        session.require(Capability::ManageUsers)?;
        let mut profile = within(self.timeout, self.profiles.get_profile(user))
            .await?
            .ok_or(ServiceError::NotFound("profile"))?;
        if profile.role() != role {
            profile.set_role(role);
            within(self.timeout, self.profiles.upsert_profile(&profile)).await?;
            tracing::info!(%user, %role, "role changed");
        }
        Ok(profile)
    }
}

/// Load the session user's profile, writing one from the session when the
/// row is missing. Rows owned by the user (enrollments, lesson progress)
/// reference it.
pub(crate) async fn ensure_profile(
    profiles: &dyn ProfileRepository,
    session: &Session,
    clock: Clock,
    timeout: Duration,
) -> Result<Profile, ServiceError> {
    if let Some(profile) = within(timeout, profiles.get_profile(session.user_id)).await? {
        return Ok(profile);
    }
    let profile = Profile::for_identity(
        session.user_id,
        session.email.clone(),
        session.role,
        clock.now(),
    );
    within(timeout, profiles.upsert_profile(&profile)).await?;
    tracing::info!(user = %session.user_id, "created missing profile");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::time::fixed_clock;
    use storage::repository::Storage;

    fn session(role: Role) -> Session {
        Session {
            user_id: UserId::generate(),
            email: "user@example.com".into(),
            role,
        }
    }

    fn service(storage: &Storage) -> ProfileService {
        ProfileService::new(
            fixed_clock(),
            Arc::clone(&storage.profiles),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn me_bootstraps_missing_profile() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let me = session(Role::Student);
        let profile = svc.me(&me).await.unwrap();
        assert_eq!(profile.email(), "user@example.com");
        assert_eq!(profile.display_name(), "user@example.com");
        assert!(storage.profiles.get_profile(me.user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn account_without_email_still_gets_a_profile() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let me = Session {
            email: String::new(),
            ..session(Role::Student)
        };
        let profile = svc.me(&me).await.unwrap();
        assert_eq!(profile.email(), "");

        let named = svc
            .update_full_name(&me, Some("Ana".into()))
            .await
            .unwrap();
        assert_eq!(named.display_name(), "Ana");
        let stored = storage.profiles.get_profile(me.user_id).await.unwrap().unwrap();
        assert_eq!(stored.full_name(), Some("Ana"));
    }

    #[tokio::test]
    async fn full_name_is_trimmed_and_blank_clears() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let me = session(Role::Student);

        let named = svc
            .update_full_name(&me, Some("  Ana Lima ".into()))
            .await
            .unwrap();
        assert_eq!(named.full_name(), Some("Ana Lima"));

        let cleared = svc.update_full_name(&me, Some("   ".into())).await.unwrap();
        assert_eq!(cleared.full_name(), None);
    }

    #[tokio::test]
    async fn only_admins_change_roles() {
        let storage = Storage::in_memory();
        let svc = service(&storage);
        let student = session(Role::Student);
        svc.me(&student).await.unwrap();

        let err = svc
            .set_role(&student, student.user_id, Role::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        let admin = session(Role::Admin);
        let promoted = svc
            .set_role(&admin, student.user_id, Role::Instructor)
            .await
            .unwrap();
        assert_eq!(promoted.role(), Role::Instructor);

        assert!(matches!(
            svc.set_role(&admin, UserId::generate(), Role::Student).await,
            Err(ServiceError::NotFound("profile"))
        ));
    }
}
