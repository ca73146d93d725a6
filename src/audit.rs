//! Security audit events.
//!
//! Events carry already-sanitized fields: identifiers are hashed, IPv4
//! addresses masked, CR/LF removed. Sinks must not fail the caller.

use std::fmt;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    AuthSuccess,
    AuthFailed,
    SessionCreated,
    SessionExpired,
    Logout,
    AccessDenied,
    AdminAction,
    ValidationFailure,
    PasswordResetRequested,
    PasswordResetTokenExpired,
    PasswordResetInvalidToken,
    PasswordResetCompleted,
    RateLimitExceeded,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::AuthSuccess => "AUTH_SUCCESS",
            AuditKind::AuthFailed => "AUTH_FAILED",
            AuditKind::SessionCreated => "SESSION_CREATED",
            AuditKind::SessionExpired => "SESSION_EXPIRED",
            AuditKind::Logout => "LOGOUT",
            AuditKind::AccessDenied => "ACCESS_DENIED",
            AuditKind::AdminAction => "ADMIN_ACTION",
            AuditKind::ValidationFailure => "VALIDATION_FAILURE",
            AuditKind::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            AuditKind::PasswordResetTokenExpired => "PASSWORD_RESET_TOKEN_EXPIRED",
            AuditKind::PasswordResetInvalidToken => "PASSWORD_RESET_INVALID_TOKEN",
            AuditKind::PasswordResetCompleted => "PASSWORD_RESET_SUCCESS",
            AuditKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub user_hash: String,
    pub ip: String,
    pub details: String,
}

impl AuditEvent {
    /// Builds an event from raw values, sanitizing each of them.
    pub fn new(kind: AuditKind, user: &str, ip: Option<&str>, details: &str) -> Self {
        Self {
            kind,
            user_hash: hash_identifier(user),
            ip: ip.map(mask_ip).unwrap_or_else(|| "unknown".into()),
            details: strip_crlf(details),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes events through `tracing` under the `security` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "security",
            event = %event.kind,
            user = %event.user_hash,
            ip = %event.ip,
            details = %event.details,
            "audit"
        );
    }
}

pub fn hash_identifier(identifier: &str) -> String {
    if identifier.is_empty() || identifier == "anonymous" {
        return "anonymous".into();
    }
    let digest = Sha256::digest(identifier.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("user_{}", hex)
}

/// Keeps the first two IPv4 octets; anything else is reduced to a marker.
pub fn mask_ip(ip: &str) -> String {
    if ip.is_empty() {
        return "unknown".into();
    }
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() == 4 {
        return format!("{}.{}.x.x", parts[0], parts[1]);
    }
    "ip_present".into()
}

pub fn strip_crlf(input: &str) -> String {
    input.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Collapses a request path to its first two segments so ids never reach the log.
pub fn sanitize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() > 3 {
        format!("{}/*", parts[..3].join("/"))
    } else {
        strip_crlf(path)
    }
}

#[cfg(test)]
pub use self::recording::RecordingAuditSink;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_identifier_is_stable_and_short() {
        let a = hash_identifier("alice");
        assert_eq!(a, hash_identifier("alice"));
        assert!(a.starts_with("user_"));
        assert_eq!(a.len(), "user_".len() + 8);
        assert_ne!(a, hash_identifier("bob"));
        assert_eq!(hash_identifier(""), "anonymous");
        assert_eq!(hash_identifier("anonymous"), "anonymous");
    }

    #[test]
    fn mask_ip_hides_host_part() {
        assert_eq!(mask_ip("192.168.10.42"), "192.168.x.x");
        assert_eq!(mask_ip("::1"), "ip_present");
        assert_eq!(mask_ip(""), "unknown");
    }

    #[test]
    fn event_fields_are_sanitized() {
        let ev = AuditEvent::new(
            AuditKind::AuthFailed,
            "alice",
            Some("10.0.0.7"),
            "bad\r\nINJECTED line",
        );
        assert_eq!(ev.details, "badINJECTED line");
        assert_eq!(ev.ip, "10.0.x.x");
        assert!(!ev.user_hash.contains("alice"));
    }

    #[test]
    fn sanitize_path_drops_ids() {
        assert_eq!(sanitize_path("/api/admin/users/17"), "/api/admin/*");
        assert_eq!(sanitize_path("/api/profile"), "/api/profile");
    }
}
