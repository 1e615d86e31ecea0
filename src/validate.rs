//! Request parameter validation.
//!
//! Presence is checked before well-formedness, in a fixed field order, so
//! a request missing several fields always reports the same one first.

use crate::identifier::AssetId;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Missing(field) | ValidationError::Invalid { field, .. } => field,
        }
    }
}

/// Parameters of a retrieval request, all present and well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    pub id: AssetId,
    pub width: u32,
    pub height: u32,
}

/// Validate `uuid`, `width` and `height` from a query string.
pub fn retrieval_params(query: &HashMap<String, String>) -> Result<RetrievalParams, ValidationError> {
    let raw_id = required(query, "uuid")?;
    let raw_width = required(query, "width")?;
    let raw_height = required(query, "height")?;

    let id = raw_id.parse::<AssetId>().map_err(|e| ValidationError::Invalid {
        field: "uuid",
        reason: e.to_string(),
    })?;
    Ok(RetrievalParams {
        id,
        width: dimension("width", raw_width)?,
        height: dimension("height", raw_height)?,
    })
}

fn required<'a>(
    query: &'a HashMap<String, String>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    query
        .get(field)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ValidationError::Missing(field))
}

/// A positive pixel count.
fn dimension(field: &'static str, raw: &str) -> Result<u32, ValidationError> {
    let invalid = |reason: String| ValidationError::Invalid { field, reason };
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(format!("'{raw}' is not a positive integer ({e})")))?;
    if value < 1 {
        return Err(invalid("must be at least 1".into()));
    }
    Ok(value)
}
