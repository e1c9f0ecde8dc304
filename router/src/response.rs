//! Lambda proxy response -> HTTP response, plus the gateway's own error responses.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;

use crate::serde_ext::de_u16_or_string;

fn default_status_code() -> u16 {
    200
}

/// What a proxy-integrated function returns.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    #[serde(default = "default_status_code", deserialize_with = "de_u16_or_string")]
    pub status_code: u16,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub multi_value_headers: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// A fully-formed response ready to hand back to axum.
#[derive(Debug)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    /// `{"message": ...}` JSON body, the shape the cloud gateway uses for its own errors.
    pub fn message(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "message": message }).to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(body),
        }
    }

    pub fn not_found() -> Self {
        Self::message(StatusCode::NOT_FOUND, "Missing Authentication Token")
    }

    pub fn no_integration() -> Self {
        Self::message(
            StatusCode::BAD_GATEWAY,
            "No function defined for resource method",
        )
    }

    pub fn internal_error() -> Self {
        Self::message(StatusCode::BAD_GATEWAY, "Internal server error")
    }

    pub fn bad_request_body() -> Self {
        Self::message(StatusCode::BAD_REQUEST, "Could not read request body")
    }

    pub fn payload_too_large() -> Self {
        Self::message(StatusCode::PAYLOAD_TOO_LARGE, "Request Too Long")
    }

    /// Parse a function's output as a proxy response.
    pub fn from_function_output(payload: &[u8]) -> anyhow::Result<Self> {
        let parsed: ProxyResponse = serde_json::from_slice(payload)?;
        build_response_parts(parsed)
    }
}

fn build_response_parts(resp: ProxyResponse) -> anyhow::Result<GatewayResponse> {
    let status = StatusCode::from_u16(resp.status_code)?;

    let mut headers = HeaderMap::new();
    for (k, values) in resp.multi_value_headers.unwrap_or_default() {
        let name = HeaderName::from_bytes(k.as_bytes())?;
        for v in values {
            headers.append(name.clone(), HeaderValue::from_str(&v)?);
        }
    }
    // Single-value headers override multi-value ones of the same name.
    for (k, v) in resp.headers.unwrap_or_default() {
        let name = HeaderName::from_bytes(k.as_bytes())?;
        headers.insert(name, HeaderValue::from_str(&v)?);
    }

    let body = resp.body.unwrap_or_default();
    let body = if resp.is_base64_encoded {
        Bytes::from(STANDARD.decode(body.as_bytes())?)
    } else {
        Bytes::from(body)
    };

    Ok(GatewayResponse {
        status,
        headers,
        body,
    })
}

impl axum::response::IntoResponse for GatewayResponse {
    fn into_response(self) -> axum::response::Response {
        let mut res = axum::response::Response::new(axum::body::Body::from(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}
