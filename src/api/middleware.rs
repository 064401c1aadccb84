//! API Middleware
//!
//! Client context, caller identity and request logging. Authentication
//! happens upstream; this layer trusts `X-Request-User-Id`.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{client_ip, ClientContext, User};
use crate::error::AppError;
use crate::store::LedgerStore;

use super::AppState;

pub const REQUEST_USER_HEADER: &str = "x-request-user-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Caller resolved from `X-Request-User-Id`
#[derive(Debug, Clone)]
pub struct RequestUser(pub User);

// =========================================================================
// Client context
// =========================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Build the client context for a request
pub fn client_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientContext {
    let mut context =
        ClientContext::new().with_user_agent(header_str(headers, "user-agent").unwrap_or_default());

    if let Some(ip) = client_ip(header_str(headers, "x-forwarded-for"), peer.map(|p| p.ip())) {
        context = context.with_ip(ip);
    }
    if let Some(id) =
        header_str(headers, CORRELATION_ID_HEADER).and_then(|s| Uuid::parse_str(s.trim()).ok())
    {
        context = context.with_correlation_id(id);
    }
    context.ensure_correlation_id();
    context
}

/// Attach a [`ClientContext`] to every request and echo the correlation id
pub async fn context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let mut context = client_context(request.headers(), peer);
    let correlation_id = context.ensure_correlation_id();

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

// =========================================================================
// Caller identity
// =========================================================================

/// Resolve `X-Request-User-Id` into a [`RequestUser`] extension.
///
/// Requests without the header pass through; routes that need a caller
/// reject them. An id that does not resolve is rejected here.
pub async fn identity_middleware<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(raw) = header_str(request.headers(), REQUEST_USER_HEADER) {
        let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            AppError::InvalidRequest("Invalid X-Request-User-Id header format".to_string())
        })?;

        let user = state.store.find_user(user_id).await?.ok_or(AppError::Unauthorized)?;
        request.extensions_mut().insert(RequestUser(user));
    }

    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let context = request.extensions().get::<ClientContext>();
    let correlation_id = context.and_then(|c| c.correlation_id);
    let client_ip = context.and_then(|c| c.ip_address);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = ?correlation_id,
        client_ip = ?client_ip,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
