//! API middleware

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request logging middleware
pub async fn logging(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    debug!("Request: {} {}", method, uri);

    let response = next.run(req).await;

    info!("Response: {} {} -> {}", method, uri, response.status());

    Ok(response)
}

/// Authentication error response
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub message: String,
}

/// Checks bearer tokens against the daemon's token.
#[derive(Clone)]
pub struct TokenValidator {
    token: Arc<str>,
}

impl TokenValidator {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self { token: token.into() }
    }

    /// Compares every byte so the time taken does not depend on where the
    /// first mismatch is.
    pub fn validate(&self, candidate: &str) -> bool {
        let expected = self.token.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected.iter().zip(candidate).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

/// Authentication middleware
pub async fn auth(validator: TokenValidator, req: Request, next: Next) -> Result<Response, impl IntoResponse> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if let Some(token) = token {
        if validator.validate(token) {
            return Ok(next.run(req).await);
        }
    }

    warn!(uri = %req.uri(), "Rejected request without a valid token");
    Err((
        StatusCode::UNAUTHORIZED,
        [(
            axum::http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"ghh mother-ship\""),
        )],
        Json(AuthErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: "Invalid or missing token".to_string(),
        }),
    ))
}
