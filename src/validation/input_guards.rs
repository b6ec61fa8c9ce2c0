//! Attribute guards for incoming JSON:API documents
//!
//! Each guard checks one attribute and reports a [`ValidationError`] that
//! knows the JSON pointer of the offending attribute, so the error document
//! can point the client at it.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("email regex")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("url regex"));

/// Validation error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Required attribute is missing, empty or whitespace-only
    #[error("{field} is required")]
    Required { field: String },

    /// Attribute is shorter or longer than allowed
    #[error("{field} must be between {min} and {max} characters")]
    Length {
        field: String,
        min: usize,
        max: usize,
    },

    /// Attribute does not match the expected format
    #[error("{field} is not a valid {expected}")]
    Format { field: String, expected: String },

    /// Attribute value is not one of the allowed values
    #[error("{field} must be one of: {allowed}")]
    NotAllowed { field: String, allowed: String },

    /// Numeric attribute outside range
    #[error("{field} value {value} is outside valid range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Two dates are in the wrong order
    #[error("{field} cannot be before {other}")]
    DateOrder { field: String, other: String },

    /// Related resource is missing or of the wrong type
    #[error("relationship {field}: {reason}")]
    Relationship { field: String, reason: String },
}

impl ValidationError {
    /// JSON pointer of the offending member in the request document
    pub fn pointer(&self) -> String {
        match self {
            ValidationError::Relationship { field, .. } => {
                format!("/data/relationships/{field}")
            }
            ValidationError::Required { field }
            | ValidationError::Length { field, .. }
            | ValidationError::Format { field, .. }
            | ValidationError::NotAllowed { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::DateOrder { field, .. } => format!("/data/attributes/{field}"),
        }
    }
}

pub fn validate_required<'a>(field: &str, value: Option<&'a str>) -> ValidationResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::Required {
            field: field.to_string(),
        }),
    }
}

pub fn validate_length(field: &str, value: &str, min: usize, max: usize) -> ValidationResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::Length {
            field: field.to_string(),
            min,
            max,
        });
    }
    Ok(())
}

pub fn validate_email(field: &str, value: &str) -> ValidationResult<()> {
    if EMAIL_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Format {
            field: field.to_string(),
            expected: "email address".to_string(),
        })
    }
}

pub fn validate_url(field: &str, value: &str) -> ValidationResult<()> {
    if URL_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Format {
            field: field.to_string(),
            expected: "http(s) URL".to_string(),
        })
    }
}

pub fn validate_range(field: &str, value: i64, min: i64, max: i64) -> ValidationResult<i64> {
    if value < min || value > max {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        })
    } else {
        Ok(value)
    }
}

/// `later` must not precede `earlier` when both are present
pub fn validate_date_order(
    field: &str,
    later: Option<DateTime<Utc>>,
    other: &str,
    earlier: Option<DateTime<Utc>>,
) -> ValidationResult<()> {
    match (later, earlier) {
        (Some(later), Some(earlier)) if later < earlier => Err(ValidationError::DateOrder {
            field: field.to_string(),
            other: other.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Storage keys are relative, slash separated, and never climb out of their prefix
pub fn validate_object_key(field: &str, key: &str) -> ValidationResult<()> {
    let bad = key.is_empty()
        || key.len() > 512
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..");
    if bad {
        Err(ValidationError::Format {
            field: field.to_string(),
            expected: "relative object key".to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn required_rejects_blank() {
        assert!(validate_required("name", Some("Drill")).is_ok());
        assert!(validate_required("name", Some("   ")).is_err());
        assert!(validate_required("name", None).is_err());
    }

    #[test]
    fn email_format() {
        assert!(validate_email("email", "ada@example.com").is_ok());
        assert!(validate_email("email", "ada.lovelace+tools@sub.example.co").is_ok());
        assert!(validate_email("email", "ada@").is_err());
        assert!(validate_email("email", "not an email").is_err());
    }

    #[test]
    fn url_format() {
        assert!(validate_url("website", "https://acme.test/catalog").is_ok());
        assert!(validate_url("website", "ftp://acme.test").is_err());
    }

    #[test]
    fn date_order() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = validate_date_order("endDate", Some(end), "startDate", Some(start))
            .expect_err("end before start");
        assert_eq!(err.pointer(), "/data/attributes/endDate");
        assert!(validate_date_order("endDate", None, "startDate", Some(start)).is_ok());
    }

    #[test]
    fn object_keys_stay_relative() {
        assert!(validate_object_key("key", "invoices/2024/a.pdf").is_ok());
        assert!(validate_object_key("key", "/etc/passwd").is_err());
        assert!(validate_object_key("key", "a/../../b").is_err());
        assert!(validate_object_key("key", "a//b").is_err());
    }

    #[test]
    fn relationship_pointer() {
        let err = ValidationError::Relationship {
            field: "equipment".into(),
            reason: "missing".into(),
        };
        assert_eq!(err.pointer(), "/data/relationships/equipment");
    }
}
