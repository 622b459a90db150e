use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaUrlError {
    #[error("media reference is not an absolute URL: {0}")]
    NotAbsolute(String),

    #[error("media reference must use http or https: {0}")]
    UnsupportedScheme(String),
}

//
// ─── MEDIA URL ─────────────────────────────────────────────────────────────────
//

/// Absolute http(s) reference to an image or video hosted elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaUrl(Url);

impl MediaUrl {
    /// Parses a media reference.
    ///
    /// # Errors
    ///
    /// Returns `MediaUrlError` if the value is not an absolute http(s) URL.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, MediaUrlError> {
        let raw = raw.as_ref().trim();
        let url = Url::parse(raw).map_err(|_| MediaUrlError::NotAbsolute(raw.to_owned()))?;
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            _ => Err(MediaUrlError::UnsupportedScheme(raw.to_owned())),
        }
    }

    /// Parses an optional form field; blank input means "no media".
    ///
    /// # Errors
    ///
    /// Returns `MediaUrlError` if a non-blank value fails to parse.
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, MediaUrlError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => Self::parse(value).map(Some),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for MediaUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl TryFrom<String> for MediaUrl {
    type Error = MediaUrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MediaUrl> for String {
    fn from(value: MediaUrl) -> Self {
        value.0.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_optional_is_none() {
        assert_eq!(MediaUrl::parse_optional(None).unwrap(), None);
        assert_eq!(MediaUrl::parse_optional(Some("   ")).unwrap(), None);
    }

    #[test]
    fn parses_https_reference() {
        let url = MediaUrl::parse(" https://cdn.example.com/rust.png ").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/rust.png");
    }

    #[test]
    fn rejects_relative_and_non_http() {
        assert!(matches!(
            MediaUrl::parse("images/rust.png"),
            Err(MediaUrlError::NotAbsolute(_))
        ));
        assert!(matches!(
            MediaUrl::parse("file:///tmp/rust.png"),
            Err(MediaUrlError::UnsupportedScheme(_))
        ));
    }
}
