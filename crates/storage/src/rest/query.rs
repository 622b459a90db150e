use std::fmt::Display;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::repository::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

/// Query-string builder for `PostgREST` table endpoints.
///
/// Filters are kept in insertion order so the produced URL is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestQuery {
    pairs: Vec<(String, String)>,
}

impl RestQuery {
    #[must_use]
    pub fn select(columns: &str) -> Self {
        Self {
            pairs: vec![("select".to_owned(), columns.to_owned())],
        }
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Display) -> Self {
        self.pairs.push((column.to_owned(), format!("eq.{value}")));
        self
    }

    #[must_use]
    pub fn gte(mut self, column: &str, value: impl Display) -> Self {
        self.pairs.push((column.to_owned(), format!("gte.{value}")));
        self
    }

    /// `column=in.(a,b,c)`; values are double-quoted so reserved characters
    /// survive.
    #[must_use]
    pub fn in_list<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        let joined = values
            .into_iter()
            .map(|v| format!("\"{}\"", v.to_string().replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(",");
        self.pairs.push((column.to_owned(), format!("in.({joined})")));
        self
    }

    /// Append an ordering; repeated calls add secondary keys.
    #[must_use]
    pub fn order(mut self, column: &str, order: Order) -> Self {
        let term = format!("{column}.{}", order.as_str());
        if let Some((_, existing)) = self.pairs.iter_mut().find(|(k, _)| k == "order") {
            existing.push(',');
            existing.push_str(&term);
        } else {
            self.pairs.push(("order".to_owned(), term));
        }
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.pairs.push(("limit".to_owned(), limit.to_string()));
        self
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Total row count from a `Content-Range` header such as `0-24/3573` or `*/0`.
#[must_use]
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
}

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Map a non-success response to a `StorageError`.
#[must_use]
pub fn error_for_status(status: StatusCode, body: &str) -> StorageError {
    let parsed: Option<PostgrestErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.as_deref());
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| body.trim().to_owned());

    match code {
        Some(UNIQUE_VIOLATION) => return StorageError::Conflict,
        Some(FOREIGN_KEY_VIOLATION) => return StorageError::NotFound,
        _ => {}
    }
    match status {
        StatusCode::CONFLICT => StorageError::Conflict,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::PermissionDenied(message),
        StatusCode::NOT_FOUND => StorageError::NotFound,
        s => StorageError::Connection(format!("status {s}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filters_in_order() {
        let q = RestQuery::select("id,title")
            .eq("user_id", "abc")
            .gte("enrolled_at", "2024-01-01T00:00:00+00:00")
            .order("enrolled_at", Order::Desc)
            .order("id", Order::Asc)
            .limit(5);
        let pairs: Vec<(&str, &str)> = q
            .pairs()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("select", "id,title"),
                ("user_id", "eq.abc"),
                ("enrolled_at", "gte.2024-01-01T00:00:00+00:00"),
                ("order", "enrolled_at.desc,id.asc"),
                ("limit", "5"),
            ]
        );
    }

    #[test]
    fn in_list_quotes_values() {
        let q = RestQuery::select("id").in_list("id", ["a", "b,c"]);
        assert_eq!(q.pairs()[1].1, r#"in.("a","b,c")"#);
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn maps_error_statuses() {
        let dup = r#"{"code":"23505","message":"duplicate key value"}"#;
        assert!(matches!(
            error_for_status(StatusCode::BAD_REQUEST, dup),
            StorageError::Conflict
        ));
        assert!(matches!(
            error_for_status(StatusCode::CONFLICT, ""),
            StorageError::Conflict
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, r#"{"message":"JWT expired"}"#),
            StorageError::PermissionDenied(m) if m == "JWT expired"
        ));
        assert!(matches!(
            error_for_status(StatusCode::NOT_FOUND, ""),
            StorageError::NotFound
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_GATEWAY, "upstream"),
            StorageError::Connection(_)
        ));
    }
}
