use std::sync::Arc;
use std::time::Duration;

use lms_core::model::{Capability, Role, UserId};
use serde::Serialize;
use storage::repository::{AuthProvider, ProfileRepository, StorageError};
use tokio::sync::watch;

use crate::deadline::within;
use crate::error::ServiceError;

/// The signed-in user as seen by services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
}

impl Session {
    #[must_use]
    pub fn can(&self, capability: Capability) -> bool {
        self.role.allows(capability)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::PermissionDenied` when the role lacks `capability`.
    pub fn require(&self, capability: Capability) -> Result<(), ServiceError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(ServiceError::denied(format!(
                "{} may not {capability:?}",
                self.role
            )))
        }
    }
}

/// Turns the auth identity plus profile row into a `Session`.
#[derive(Clone)]
pub struct SessionResolver {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileRepository>,
    timeout: Duration,
}

impl SessionResolver {
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            auth,
            profiles,
            timeout,
        }
    }

    /// Resolve the current session; `None` when nobody is signed in or the
    /// lookup failed. Failures are logged, never raised.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self) -> Option<Session> {
        let identity = match within(self.timeout, self.auth.current_identity()).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "auth lookup failed; treating as signed out");
                return None;
            }
        };

        let role = match within(self.timeout, self.profiles.get_profile(identity.user_id)).await {
            Ok(Some(profile)) => profile.role(),
            Ok(None) => Role::default(),
            // unreadable role column: least privilege
            Err(ServiceError::Storage(StorageError::Serialization(reason))) => {
                tracing::warn!(user = %identity.user_id, %reason, "unreadable profile; defaulting role");
                Role::default()
            }
            Err(e) => {
                tracing::warn!(user = %identity.user_id, error = %e, "profile lookup failed");
                return None;
            }
        };

        Some(Session {
            user_id: identity.user_id,
            email: identity.email,
            role,
        })
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        within(self.timeout, self.auth.sign_out()).await
    }
}

/// Process-wide session state with a single subscription point.
#[derive(Clone)]
pub struct SessionContext {
    resolver: SessionResolver,
    current: Arc<watch::Sender<Option<Session>>>,
}

impl SessionContext {
    #[must_use]
    pub fn new(resolver: SessionResolver) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            resolver,
            current: Arc::new(tx),
        }
    }

    /// Re-resolve and publish the session.
    pub async fn refresh(&self) -> Option<Session> {
        let session = self.resolver.resolve().await;
        self.current.send_replace(session.clone());
        session
    }

    /// The last published session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NoSession` when nobody is signed in.
    pub fn require(&self) -> Result<Session, ServiceError> {
        self.current().ok_or(ServiceError::NoSession)
    }

    /// Sign out remotely and publish `None`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if the auth backend rejects the request; the
    /// local session is cleared either way.
    pub async fn sign_out(&self) -> Result<(), ServiceError> {
        let result = self.resolver.sign_out().await;
        self.current.send_replace(None);
        result
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lms_core::model::Profile;
    use lms_core::time::fixed_now;
    use storage::repository::{AuthIdentity, LocalAuth, Storage};

    struct Unreachable;

    #[async_trait]
    impl AuthProvider for Unreachable {
        async fn current_identity(&self) -> Result<Option<AuthIdentity>, StorageError> {
            Err(StorageError::Connection("connection refused".into()))
        }

        async fn sign_out(&self) -> Result<(), StorageError> {
            Err(StorageError::Connection("connection refused".into()))
        }
    }

    fn identity() -> AuthIdentity {
        AuthIdentity {
            user_id: UserId::generate(),
            email: "ana@example.com".into(),
        }
    }

    fn context(auth: &LocalAuth, storage: &Storage) -> SessionContext {
        SessionContext::new(SessionResolver::new(
            Arc::new(auth.clone()),
            Arc::clone(&storage.profiles),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn no_identity_means_no_session() {
        let storage = Storage::in_memory();
        let ctx = context(&LocalAuth::new(), &storage);
        assert!(ctx.refresh().await.is_none());
        assert!(matches!(ctx.require(), Err(ServiceError::NoSession)));
    }

    #[tokio::test]
    async fn auth_outage_reads_as_signed_out() {
        let storage = Storage::in_memory();
        let ctx = SessionContext::new(SessionResolver::new(
            Arc::new(Unreachable),
            Arc::clone(&storage.profiles),
            Duration::from_secs(1),
        ));
        assert!(ctx.refresh().await.is_none());
        assert!(ctx.sign_out().await.is_err());
    }

    #[tokio::test]
    async fn missing_profile_defaults_to_student() {
        let storage = Storage::in_memory();
        let who = identity();
        let ctx = context(&LocalAuth::signed_in(who.clone()), &storage);
        let session = ctx.refresh().await.unwrap();
        assert_eq!(session.user_id, who.user_id);
        assert_eq!(session.role, Role::Student);
    }

    #[tokio::test]
    async fn role_comes_from_profile() {
        let storage = Storage::in_memory();
        let who = identity();
        let profile =
            Profile::new(who.user_id, &who.email, None, Role::Instructor, fixed_now()).unwrap();
        storage.profiles.upsert_profile(&profile).await.unwrap();

        let ctx = context(&LocalAuth::signed_in(who), &storage);
        let session = ctx.refresh().await.unwrap();
        assert_eq!(session.role, Role::Instructor);
        assert!(session.can(Capability::CreateCourse));
        assert!(session.require(Capability::ManageUsers).is_err());
    }

    #[tokio::test]
    async fn subscribers_see_sign_in_and_out() {
        let storage = Storage::in_memory();
        let auth = LocalAuth::signed_in(identity());
        let ctx = context(&auth, &storage);
        let mut rx = ctx.subscribe();

        ctx.refresh().await;
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        ctx.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
        assert!(ctx.current().is_none());
        assert!(ctx.refresh().await.is_none());
    }
}
