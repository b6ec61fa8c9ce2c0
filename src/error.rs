//! Error handling for the JSON:API surface
//!
//! Module-level failures are `thiserror` enums close to where they happen
//! (`StoreError`, `MappingError`, `SerializationError`, `ValidationError`,
//! `AuthError`, `RegistryError`). Everything that reaches a handler is turned
//! into an [`ApiError`], which carries an [`ErrorCode`] and renders as a
//! JSON:API error document with the matching HTTP status.

use crate::auth::AuthError;
use crate::graph::StoreError;
use crate::jsonapi::{JSON_API_CONTENT_TYPE, SerializationError};
use crate::mapper::MappingError;
use crate::metrics::METRICS;
use crate::registry::RegistryError;
use crate::validation::{ValidationError, Violations};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Application error codes, each bound to one HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request body is not a valid JSON:API document
    MalformedDocument,
    /// A query parameter is unknown or has an invalid value
    InvalidParameter,
    /// Attribute validation failed
    ValidationFailed,
    /// No or invalid credentials
    Unauthenticated,
    /// Authenticated but not allowed
    Forbidden,
    /// Resource does not exist (or is outside the caller's company)
    NotFound,
    /// Document type/id mismatch, uniqueness or state conflict
    Conflict,
    /// Graph store failure
    StoreFailure,
    /// A query row could not be mapped to an entity
    MappingFailure,
    /// An entity could not be serialised
    SerializationFailure,
    /// Anything else
    Internal,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MalformedDocument
            | ErrorCode::InvalidParameter => StatusCode::BAD_REQUEST,
            ErrorCode::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::StoreFailure
            | ErrorCode::MappingFailure
            | ErrorCode::SerializationFailure
            | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedDocument => "malformed_document",
            ErrorCode::InvalidParameter => "invalid_parameter",
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::StoreFailure => "store_failure",
            ErrorCode::MappingFailure => "mapping_failure",
            ErrorCode::SerializationFailure => "serialization_failure",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorCode::MalformedDocument => "Malformed document",
            ErrorCode::InvalidParameter => "Invalid query parameter",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::Unauthenticated => "Authentication required",
            ErrorCode::Forbidden => "Forbidden",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Conflict => "Conflict",
            ErrorCode::StoreFailure
            | ErrorCode::MappingFailure
            | ErrorCode::SerializationFailure
            | ErrorCode::Internal => "Internal server error",
        }
    }

    /// Server-side codes hide their detail from clients
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// API ERROR
// =============================================================================

/// Where in the request the error originates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// JSON pointer into the request document
    Pointer(String),
    /// Name of the offending query parameter
    Parameter(String),
}

/// A single entry in a JSON:API `errors` array
#[derive(Debug, Clone, Serialize)]
pub struct ErrorObject {
    pub id: String,
    pub status: String,
    pub code: ErrorCode,
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorDocument {
    errors: Vec<ErrorObject>,
}

/// Main error type returned by services and handlers
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub detail: String,
    pub error_id: String,
    pub source: Option<ErrorSource>,
    /// Additional per-field problems reported together with the main one
    pub violations: Vec<(ErrorSource, String)>,
}

impl ApiError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            error_id: Self::generate_error_id(),
            source: None,
            violations: Vec::new(),
        }
    }

    pub fn builder(code: ErrorCode) -> ErrorBuilder {
        ErrorBuilder::new(code)
    }

    pub fn not_found(resource_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{resource_type} '{id}' does not exist"),
        )
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, detail)
    }

    pub fn unauthenticated(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedDocument, detail)
    }

    pub fn invalid_parameter(parameter: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::builder(ErrorCode::InvalidParameter)
            .detail(detail)
            .parameter(parameter)
            .build()
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, detail)
    }

    fn generate_error_id() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_millis();
        format!("err_{:x}_{:x}", timestamp, count)
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    fn error_objects(&self) -> Vec<ErrorObject> {
        let status = self.status().as_u16().to_string();
        let detail = if self.code.is_server_error() {
            None
        } else {
            Some(self.detail.clone())
        };

        let mut objects = vec![ErrorObject {
            id: self.error_id.clone(),
            status: status.clone(),
            code: self.code,
            title: self.code.title(),
            detail,
            source: self.source.clone(),
        }];

        for (idx, (source, detail)) in self.violations.iter().enumerate() {
            objects.push(ErrorObject {
                id: format!("{}_{}", self.error_id, idx + 1),
                status: status.clone(),
                code: self.code,
                title: self.code.title(),
                detail: Some(detail.clone()),
                source: Some(source.clone()),
            });
        }

        objects
    }

    /// Render as a JSON:API error document
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(ErrorDocument {
            errors: self.error_objects(),
        })
        .unwrap_or_else(|_| serde_json::json!({ "errors": [] }))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.detail)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        METRICS.record_error(self.code);
        if self.code.is_server_error() {
            tracing::error!(error_id = %self.error_id, code = %self.code, detail = %self.detail, "request failed");
        } else {
            tracing::debug!(error_id = %self.error_id, code = %self.code, detail = %self.detail, "request rejected");
        }

        let body = self.to_document().to_string();
        (
            self.status(),
            [(header::CONTENT_TYPE, JSON_API_CONTENT_TYPE)],
            body,
        )
            .into_response()
    }
}

// =============================================================================
// ERROR BUILDER
// =============================================================================

pub struct ErrorBuilder {
    error: ApiError,
}

impl ErrorBuilder {
    fn new(code: ErrorCode) -> Self {
        Self {
            error: ApiError::new(code, code.title()),
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.error.detail = detail.into();
        self
    }

    /// Point at an attribute of the request document
    pub fn attribute(self, name: &str) -> Self {
        self.pointer(format!("/data/attributes/{name}"))
    }

    pub fn pointer(mut self, pointer: impl Into<String>) -> Self {
        self.error.source = Some(ErrorSource::Pointer(pointer.into()));
        self
    }

    pub fn parameter(mut self, parameter: impl Into<String>) -> Self {
        self.error.source = Some(ErrorSource::Parameter(parameter.into()));
        self
    }

    pub fn violation(mut self, source: ErrorSource, detail: impl Into<String>) -> Self {
        self.error.violations.push((source, detail.into()));
        self
    }

    pub fn build(self) -> ApiError {
        self.error
    }
}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidIdentifier { .. } => {
                ApiError::new(ErrorCode::InvalidParameter, err.to_string())
            }
            other => ApiError::new(ErrorCode::StoreFailure, other.to_string()),
        }
    }
}

impl From<MappingError> for ApiError {
    fn from(err: MappingError) -> Self {
        ApiError::new(ErrorCode::MappingFailure, err.to_string())
    }
}

impl From<SerializationError> for ApiError {
    fn from(err: SerializationError) -> Self {
        ApiError::new(ErrorCode::SerializationFailure, err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownResource(_) => ApiError::new(ErrorCode::NotFound, err.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::builder(ErrorCode::ValidationFailed)
            .detail(err.to_string())
            .pointer(err.pointer())
            .build()
    }
}

impl From<Violations> for ApiError {
    fn from(violations: Violations) -> Self {
        let mut errors = violations.into_inner().into_iter();
        let Some(first) = errors.next() else {
            return ApiError::new(ErrorCode::ValidationFailed, "validation failed");
        };
        let mut builder = ApiError::builder(ErrorCode::ValidationFailed)
            .detail(first.to_string())
            .pointer(first.pointer());
        for err in errors {
            builder = builder.violation(ErrorSource::Pointer(err.pointer()), err.to_string());
        }
        builder.build()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::MissingToken
            | AuthError::InvalidToken(_)
            | AuthError::WrongTokenKind
            | AuthError::InactiveUser => ApiError::unauthenticated(err.to_string()),
            AuthError::RegistrationDisabled => ApiError::forbidden(err.to_string()),
            AuthError::PasswordHash(_) | AuthError::Signing(_) => {
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(format!("{err:#}"))
    }
}
