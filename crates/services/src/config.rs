use std::env;
use std::time::Duration;

use storage::rest::RestConfig;

use crate::deadline::DEFAULT_REQUEST_TIMEOUT;
use crate::error::ConfigError;

pub const DEFAULT_DB_URL: &str = "sqlite:lms.sqlite3";
pub const DEFAULT_TOP_COURSES: usize = 5;
pub const DEFAULT_RECENT_ENROLLMENTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Sqlite { url: String },
    Rest(RestConfig),
}

/// Runtime settings, read from `LMS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmsConfig {
    pub backend: Backend,
    pub request_timeout: Duration,
    pub top_courses: usize,
    pub recent_enrollments: u32,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite {
                url: DEFAULT_DB_URL.to_owned(),
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            top_courses: DEFAULT_TOP_COURSES,
            recent_enrollments: DEFAULT_RECENT_ENROLLMENTS,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, raw })
    })
    .transpose()
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.filter(|v| !v.trim().is_empty())
}

impl LmsConfig {
    /// Read from the process environment, loading `.env` first when present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unparseable values or an incomplete REST setup.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unparseable values or an incomplete REST setup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend = match non_blank(lookup("LMS_BACKEND"))
            .map(|b| b.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("sqlite") => Backend::Sqlite {
                url: non_blank(lookup("LMS_DB_URL")).unwrap_or_else(|| DEFAULT_DB_URL.to_owned()),
            },
            Some("rest") => Backend::Rest(RestConfig {
                base_url: non_blank(lookup("LMS_REST_URL"))
                    .ok_or(ConfigError::Missing("LMS_REST_URL"))?,
                anon_key: non_blank(lookup("LMS_REST_ANON_KEY"))
                    .ok_or(ConfigError::Missing("LMS_REST_ANON_KEY"))?,
            }),
            Some(other) => return Err(ConfigError::UnknownBackend(other.to_owned())),
        };

        let request_timeout = parse::<u64>("LMS_REQUEST_TIMEOUT_MS", lookup("LMS_REQUEST_TIMEOUT_MS"))?
            .map_or(defaults.request_timeout, Duration::from_millis);
        let top_courses = parse("LMS_TOP_COURSES", lookup("LMS_TOP_COURSES"))?
            .unwrap_or(defaults.top_courses);
        let recent_enrollments = parse("LMS_RECENT_ENROLLMENTS", lookup("LMS_RECENT_ENROLLMENTS"))?
            .unwrap_or(defaults.recent_enrollments);

        Ok(Self {
            backend,
            request_timeout,
            top_courses,
            recent_enrollments,
        })
    }
}
