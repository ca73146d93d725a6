//! Layers applied to every route: panic recovery, browser security headers
//! and a sanity check on query strings.

use std::any::Any;

use axum::{
    extract::{Query, Request},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, warn};

use crate::audit::sanitize_path;
use crate::error::AppError;

/// Longest query value accepted, in bytes.
pub const MAX_QUERY_VALUE_LEN: usize = 1000;

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("referrer-policy", "no-referrer"),
    ("x-xss-protection", "0"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("x-dns-prefetch-control", "off"),
    ("x-permitted-cross-domain-policies", "none"),
];

/// Panic recovery sits innermost so its 500 still passes the header layers.
pub fn harden(router: Router) -> Router {
    let router = router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(validate_query));
    SECURITY_HEADERS
        .iter()
        .fold(router, |router, &(name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
}

/// A panicking handler becomes a plain internal error; the payload is logged
/// and never sent.
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into());
    error!(panic = %detail, "request handler panicked");
    AppError::Internal(anyhow::anyhow!("request handler panicked")).into_response()
}

/// Rejects query values carrying CR/LF or exceeding [`MAX_QUERY_VALUE_LEN`].
async fn validate_query(req: Request, next: Next) -> Result<Response, AppError> {
    if req.uri().query().is_some() {
        let path = sanitize_path(req.uri().path());
        let Ok(Query(params)) = Query::<Vec<(String, String)>>::try_from_uri(req.uri()) else {
            warn!(path = %path, "undecodable query string");
            return Err(AppError::validation("invalid input detected"));
        };
        for (_, value) in &params {
            if value.contains(['\r', '\n']) {
                warn!(path = %path, "query value with line break");
                return Err(AppError::validation("invalid input detected"));
            }
            if value.len() > MAX_QUERY_VALUE_LEN {
                warn!(path = %path, "query value too long");
                return Err(AppError::validation("input exceeds maximum length"));
            }
        }
    }
    Ok(next.run(req).await)
}
