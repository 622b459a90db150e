use std::sync::Arc;

use storage::repository::{AuthProvider, LocalAuth, Storage};
use storage::rest::RestRepository;

use crate::Clock;
use crate::analytics_service::AnalyticsService;
use crate::config::{Backend, LmsConfig};
use crate::course_service::CourseService;
use crate::enrollment_service::EnrollmentService;
use crate::error::AppServicesError;
use crate::profile_service::ProfileService;
use crate::progress_service::ProgressService;
use crate::session::{SessionContext, SessionResolver};

/// Handle for signing in against whichever auth backend is configured.
#[derive(Clone)]
pub enum AuthHandle {
    /// Identity set in-process (`SQLite` and in-memory backends).
    Local(LocalAuth),
    /// Bearer token for the hosted backend.
    Rest(RestRepository),
}

/// Assembles app-facing services over one `Storage`.
#[derive(Clone)]
pub struct AppServices {
    auth: AuthHandle,
    session: SessionContext,
    progress: Arc<ProgressService>,
    enrollments: Arc<EnrollmentService>,
    courses: Arc<CourseService>,
    analytics: Arc<AnalyticsService>,
    profiles: Arc<ProfileService>,
}

impl AppServices {
    /// Connect the configured backend and build services.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if `SQLite` initialization fails.
    pub async fn from_config(config: &LmsConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let (storage, auth) = match &config.backend {
            Backend::Sqlite { url } => {
                let local = LocalAuth::new();
                let storage = Storage::sqlite_with_auth(url, Arc::new(local.clone())).await?;
                (storage, AuthHandle::Local(local))
            }
            Backend::Rest(rest) => {
                let (storage, repo) = Storage::rest(rest.clone());
                (storage, AuthHandle::Rest(repo))
            }
        };
        tracing::info!(backend = auth.name(), "services ready");
        Ok(Self::new(storage, auth, clock, config))
    }

    /// Build services over an in-memory store; for tests and demos.
    #[must_use]
    pub fn in_memory(clock: Clock, config: &LmsConfig) -> Self {
        let local = LocalAuth::new();
        let storage = Storage::in_memory().with_auth(Arc::new(local.clone()));
        Self::new(storage, AuthHandle::Local(local), clock, config)
    }

    #[must_use]
    pub fn new(storage: Storage, auth: AuthHandle, clock: Clock, config: &LmsConfig) -> Self {
        let timeout = config.request_timeout;
        let session = SessionContext::new(SessionResolver::new(
            Arc::clone(&storage.auth),
            Arc::clone(&storage.profiles),
            timeout,
        ));
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.lesson_progress),
            Arc::clone(&storage.progress_writes),
            timeout,
        ));
        let enrollments = Arc::new(EnrollmentService::new(
            clock,
            Arc::clone(&storage.profiles),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrollments),
            timeout,
        ));
        let courses = Arc::new(CourseService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.enrollments),
            timeout,
        ));
        let analytics = Arc::new(AnalyticsService::new(
            clock,
            Arc::clone(&storage.profiles),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.enrollments),
            timeout,
            config.top_courses,
            config.recent_enrollments,
        ));
        let profiles = Arc::new(ProfileService::new(
            clock,
            Arc::clone(&storage.profiles),
            timeout,
        ));

        Self {
            auth,
            session,
            progress,
            enrollments,
            courses,
            analytics,
            profiles,
        }
    }

    #[must_use]
    pub fn auth(&self) -> &AuthHandle {
        &self.auth
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn enrollments(&self) -> Arc<EnrollmentService> {
        Arc::clone(&self.enrollments)
    }

    #[must_use]
    pub fn courses(&self) -> Arc<CourseService> {
        Arc::clone(&self.courses)
    }

    #[must_use]
    pub fn analytics(&self) -> Arc<AnalyticsService> {
        Arc::clone(&self.analytics)
    }

    #[must_use]
    pub fn profiles(&self) -> Arc<ProfileService> {
        Arc::clone(&self.profiles)
    }
}

impl AuthHandle {
    fn name(&self) -> &'static str {
        match self {
            AuthHandle::Local(_) => "local",
            AuthHandle::Rest(_) => "rest",
        }
    }

    #[must_use]
    pub fn provider(&self) -> Arc<dyn AuthProvider> {
        match self {
            AuthHandle::Local(local) => Arc::new(local.clone()),
            AuthHandle::Rest(repo) => Arc::new(repo.clone()),
        }
    }
}
