#![forbid(unsafe_code)]

pub mod analytics_service;
pub mod app_services;
pub mod config;
pub mod course_service;
pub mod deadline;
pub mod enrollment_service;
pub mod error;
pub mod profile_service;
pub mod progress_service;
pub mod session;

pub use lms_core::Clock;

pub use analytics_service::{AnalyticsReport, AnalyticsService, RecentEnrollment};
pub use app_services::{AppServices, AuthHandle};
pub use config::{Backend, LmsConfig};
pub use course_service::{CourseDetail, CourseService};
pub use enrollment_service::EnrollmentService;
pub use error::{AppServicesError, ConfigError, ErrorKind, ServiceError};
pub use profile_service::ProfileService;
pub use progress_service::{ProgressService, UNTITLED_COURSE};
pub use session::{Session, SessionContext, SessionResolver};
