use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};

use super::JSON_API_CONTENT_TYPE;
use super::document::Document;

/// A JSON:API document with its status and headers
#[derive(Debug)]
pub struct JsonApiResponse {
    status: StatusCode,
    body: Option<String>,
    location: Option<String>,
    etag: bool,
}

impl JsonApiResponse {
    fn with_document(status: StatusCode, document: &Document) -> Self {
        let body = serde_json::to_string(document).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode document");
            r#"{"errors":[{"status":"500","title":"Internal server error"}]}"#.to_string()
        });
        Self {
            status,
            body: Some(body),
            location: None,
            etag: false,
        }
    }

    /// `200 OK` with a weak ETag over the body
    pub fn ok(document: &Document) -> Self {
        let mut response = Self::with_document(StatusCode::OK, document);
        response.etag = true;
        response
    }

    pub fn created(document: &Document, location: Option<String>) -> Self {
        let mut response = Self::with_document(StatusCode::CREATED, document);
        response.location = location;
        response
    }

    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: None,
            location: None,
            etag: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn weak_etag(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let hex: String = digest[..12].iter().map(|b| format!("{b:02x}")).collect();
    format!("W/\"{hex}\"")
}

impl IntoResponse for JsonApiResponse {
    fn into_response(self) -> Response {
        let Some(body) = self.body else {
            return self.status.into_response();
        };

        let etag = self.etag.then(|| weak_etag(&body));
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, JSON_API_CONTENT_TYPE)],
            body,
        )
            .into_response();

        let headers = response.headers_mut();
        if let Some(value) = etag.and_then(|tag| HeaderValue::from_str(&tag).ok()) {
            headers.insert(header::ETAG, value);
        }
        if let Some(location) = self.location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            headers.insert(header::LOCATION, location);
        }
        response
    }
}
