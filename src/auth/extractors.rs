use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
    Json,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::audit::{sanitize_path, AuditEvent, AuditKind};
use crate::auth::jwt::TokenError;
use crate::auth::rate_limit::RateLimitDecision;
use crate::error::{AppError, INVALID_REQUEST_DATA};
use crate::state::AppState;

pub const MISSING_CREDENTIALS: &str = "authentication required";
pub const BAD_AUTH_FORMAT: &str = "invalid authorization format";
pub const BAD_TOKEN: &str = "invalid or expired token";

/// Identity taken from a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// Client address for audit events and rate limiting: the peer address when
/// the server was started with connect info. The first `X-Forwarded-For` hop
/// takes precedence only when the deployment trusts its proxy.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    fn from_parts(
        headers: &HeaderMap,
        extensions: &axum::http::Extensions,
        trust_proxy: bool,
    ) -> Self {
        let forwarded = trust_proxy
            .then(|| headers.get("x-forwarded-for"))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = || {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };
        ClientIp(forwarded.or_else(peer))
    }

    fn of_request(state: &AppState, req: &Request) -> Self {
        Self::from_parts(req.headers(), req.extensions(), state.config.trust_proxy)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp::from_parts(
            &parts.headers,
            &parts.extensions,
            state.config.trust_proxy,
        ))
    }
}

/// `Json` whose rejections use the error envelope. The parse error itself is
/// only logged, since serde messages echo parts of the body.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                debug!(status = %rejection.status(), reason = %rejection, "request body rejected");
                Err(AppError::validation(INVALID_REQUEST_DATA))
            }
        }
    }
}

/// Splits `Bearer <token>`; anything else is a format error.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if scheme != "Bearer" || token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    ip: Option<&str>,
) -> Result<AuthUser, AppError> {
    let deny = |reason: &'static str| {
        warn!(path = %sanitize_path(path), reason, "session rejected");
        state.audit.record(AuditEvent::new(
            AuditKind::AccessDenied,
            "anonymous",
            ip,
            &format!("{}: {reason}", sanitize_path(path)),
        ));
        AppError::Unauthenticated(reason)
    };

    let Some(header) = headers.get(AUTHORIZATION) else {
        return Err(deny(MISSING_CREDENTIALS));
    };
    let token = header
        .to_str()
        .ok()
        .and_then(bearer_token)
        .ok_or_else(|| deny(BAD_AUTH_FORMAT))?;

    match state.keys.verify(token) {
        Ok(claims) => Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.username,
            is_admin: claims.is_admin,
        }),
        Err(TokenError::Expired) => {
            state.audit.record(AuditEvent::new(
                AuditKind::SessionExpired,
                "anonymous",
                ip,
                &sanitize_path(path),
            ));
            Err(deny(BAD_TOKEN))
        }
        Err(_) => Err(deny(BAD_TOKEN)),
    }
}

/// Session gate: verifies the bearer token and stores the [`AuthUser`] in the
/// request extensions for handlers further down.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = ClientIp::of_request(&state, &req);
    let user = authenticate(&state, req.headers(), req.uri().path(), ip.as_deref())?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Admin gate. Mount inside [`require_session`].
pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = ClientIp::of_request(&state, &req);
    let path = sanitize_path(req.uri().path());
    let user = match req.extensions().get::<AuthUser>() {
        Some(user) => user.clone(),
        None => authenticate(&state, req.headers(), req.uri().path(), ip.as_deref())?,
    };

    if !user.is_admin {
        warn!(user_id = user.user_id, path = %path, "admin access denied");
        state.audit.record(AuditEvent::new(
            AuditKind::AccessDenied,
            &user.username,
            ip.as_deref(),
            &format!("{path}: admin access required"),
        ));
        return Err(AppError::Forbidden);
    }

    state.audit.record(AuditEvent::new(
        AuditKind::AdminAction,
        &user.username,
        ip.as_deref(),
        &format!("{} {path}", req.method()),
    ));
    Ok(next.run(req).await)
}

/// Spends one unit of the caller's request budget.
pub async fn limit_by_ip(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = ClientIp::of_request(&state, &req);
    if state.limiter.check_ip(ip.as_deref()) == RateLimitDecision::Limited {
        let path = sanitize_path(req.uri().path());
        warn!(path = %path, "rate limit exceeded");
        state.audit.record(AuditEvent::new(
            AuditKind::RateLimitExceeded,
            "anonymous",
            ip.as_deref(),
            &format!("{path}: rate limit exceeded"),
        ));
        return Err(AppError::RateLimited);
    }
    Ok(next.run(req).await)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }
        let ip = ClientIp::from_request_parts(parts, state).await.unwrap_or_default();
        authenticate(state, &parts.headers, parts.uri.path(), ip.as_deref())
    }
}
