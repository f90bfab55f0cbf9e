/// Search request validation
///
/// Requests arrive from the request layer as loosely typed JSON values; this
/// module turns them into a typed `SearchParams` or an `InvalidInput` error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ClassifiedsError;

/// Raw search request as received from the request layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query. Absent, null, or blank means "no query".
    #[serde(default)]
    pub query: Option<Value>,
    /// 1-indexed page number (default: 1). Numeric strings are accepted.
    #[serde(default)]
    pub page_no: Option<Value>,
}

/// Validated search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    /// Normalized query (trimmed, lower-cased); None when no query was given.
    pub query: Option<String>,
    pub page: u32,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SearchRequest {
            query: Some(Value::String(query.into())),
            page_no: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_no = Some(Value::from(page));
        self
    }

    pub fn validate(&self) -> Result<SearchParams, ClassifiedsError> {
        let query = match &self.query {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => normalize_query(s),
            Some(_) => {
                return Err(ClassifiedsError::invalid("query", "Search query must be a string."));
            }
        };

        let page = match &self.page_no {
            None | Some(Value::Null) => 1,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(n) => validate_page(n)?,
                None => return Err(bad_page(n)),
            },
            Some(Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(n) => validate_page(n)?,
                Err(_) => return Err(bad_page(s)),
            },
            Some(other) => return Err(bad_page(other)),
        };

        Ok(SearchParams { query, page })
    }
}

impl SearchParams {
    pub fn browse(page: u32) -> Self {
        SearchParams { query: None, page }
    }
}

/// Trim and lower-case a query; empty after trimming means no query.
pub fn normalize_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Check a 1-indexed page number.
pub fn validate_page(page: i64) -> Result<u32, ClassifiedsError> {
    if page < 1 {
        return Err(ClassifiedsError::invalid(
            "page_no",
            format!("Page number must be a positive integer, got {}.", page),
        ));
    }
    u32::try_from(page).map_err(|_| {
        ClassifiedsError::invalid("page_no", format!("Page number {} is out of range.", page))
    })
}

fn bad_page(value: impl std::fmt::Display) -> ClassifiedsError {
    ClassifiedsError::invalid(
        "page_no",
        format!("Page number must be a positive integer, got {}.", value),
    )
}
