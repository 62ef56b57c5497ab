//! Gateway error taxonomy and HTTP response mapping.
//!
//! Every failure mode the gateway can surface to a caller is a variant of
//! [`GatewayError`]. The bulkhead and engine layers produce typed outcomes;
//! this module maps them to HTTP statuses and JSON bodies at the edge, so
//! handlers simply return `Result<HttpResponse, GatewayError>`.

use actix_web::http::header;
use actix_web::HttpResponse;
use serde_json::json;

/// Errors surfaced by the gateway, mapped onto HTTP statuses at the edge.
///
/// # Status mapping
///
/// | Variant | Status |
/// |---|---|
/// | `RouteNotFound` | 404 |
/// | `ApiDisabled` | 503 |
/// | `Auth` | 401 |
/// | `CapacityExceeded` | 429 + `Retry-After` |
/// | `CircuitOpen` | 429 + `Retry-After` |
/// | `Timeout` | 504 |
/// | `Upstream` | 502 |
/// | `BadRequest` | 400 |
/// | `Storage` | 503 |
/// | `Internal` | 500 |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route for {service}{path}")]
    RouteNotFound { service: String, path: String },

    #[error("api {service}.{api} is disabled")]
    ApiDisabled { service: String, api: String },

    #[error("authentication required: {message}")]
    Auth { message: String },

    #[error("concurrency limit reached for {service}.{api}")]
    CapacityExceeded {
        service: String,
        api: String,
        retry_after_ms: u64,
    },

    #[error("circuit open for {service}.{api}")]
    CircuitOpen {
        service: String,
        api: String,
        retry_after_ms: u64,
    },

    #[error("upstream did not complete within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("upstream failure: {message}")]
    Upstream {
        message: String,
        status: Option<u16>,
    },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("storage failure: {message}")]
    Storage { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Short machine-readable kind, used in JSON error bodies and trace logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "not_found",
            GatewayError::ApiDisabled { .. } => "api_disabled",
            GatewayError::Auth { .. } => "auth",
            GatewayError::CapacityExceeded { .. } => "capacity_exceeded",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Upstream { .. } => "upstream",
            GatewayError::BadRequest { .. } => "bad_request",
            GatewayError::Storage { .. } => "storage",
            GatewayError::Internal { .. } => "internal",
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::CapacityExceeded { retry_after_ms, .. }
            | GatewayError::CircuitOpen { retry_after_ms, .. } => {
                // Round up so a 500ms hint does not become "retry now".
                Some((retry_after_ms + 999) / 1000)
            }
            _ => None,
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::ApiDisabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Auth { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Some(secs) = self.retry_after_secs() {
            builder.insert_header((header::RETRY_AFTER, secs.to_string()));
        }
        builder.json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn capacity_errors_carry_retry_after() {
        let err = GatewayError::CircuitOpen {
            service: "payments".into(),
            api: "order".into(),
            retry_after_ms: 1500,
        };
        let resp = err.error_response();
        assert_eq!(resp.status().as_u16(), 429);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = GatewayError::Timeout { timeout_ms: 500 };
        assert_eq!(err.status_code().as_u16(), 504);
        assert_eq!(err.kind(), "timeout");
    }
}
