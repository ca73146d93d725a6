use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::auth::extractors::AuthUser;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{check_password_policy, Hasher};
use crate::auth::repo::{StoreError, UserStore};
use crate::auth::repo_types::PublicUser;
use crate::auth::reset::{ResetError, ResetTokenStore};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, INVALID_RESET_TOKEN};
use crate::mail::Mailer;

pub const MAX_USERNAME_LEN: usize = 50;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() < 255 && EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Registration, login and password-reset rules over injected stores.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    resets: Arc<dyn ResetTokenStore>,
    mailer: Arc<dyn Mailer>,
    audit: Arc<dyn AuditSink>,
    hasher: Hasher,
    keys: JwtKeys,
    reset_base_url: String,
    mail_timeout: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        resets: Arc<dyn ResetTokenStore>,
        mailer: Arc<dyn Mailer>,
        audit: Arc<dyn AuditSink>,
        hasher: Hasher,
        keys: JwtKeys,
        config: &AppConfig,
    ) -> Self {
        Self {
            users,
            resets,
            mailer,
            audit,
            hasher,
            keys,
            reset_base_url: config.reset.base_url.trim_end_matches('/').to_string(),
            mail_timeout: config.mail_timeout(),
        }
    }

    fn audit(&self, kind: AuditKind, user: &str, ip: Option<&str>, details: &str) {
        self.audit.record(AuditEvent::new(kind, user, ip, details));
    }

    async fn hash_password(&self, plain: &str) -> AppResult<String> {
        let hasher = self.hasher.clone();
        let plain = plain.to_string();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .context("password hashing task failed")??;
        Ok(hash)
    }

    /// `None` means the user was unknown; the dummy hash is verified instead
    /// and the result is always a mismatch.
    async fn verify_password(&self, plain: &str, hash: Option<&str>) -> AppResult<bool> {
        let hasher = self.hasher.clone();
        let plain = plain.to_string();
        let hash = hash.map(str::to_string);
        let verified = tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&plain, &hash),
            None => {
                hasher.verify_dummy(&plain);
                Ok(false)
            }
        })
        .await
        .context("password verification task failed")??;
        Ok(verified)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        ip: Option<&str>,
    ) -> AppResult<PublicUser> {
        let username = username.trim();
        let email = normalize_email(email);

        if let Err(msg) = validate_registration(username, &email, password) {
            warn!(reason = %msg, "registration rejected");
            self.audit(AuditKind::ValidationFailure, username, ip, &format!("register: {msg}"));
            return Err(AppError::Validation(msg));
        }

        let hash = self.hash_password(password).await?;
        let user = match self.users.create(username, &email, &hash).await {
            Ok(u) => u,
            Err(StoreError::Duplicate) => {
                warn!("registration collided with an existing account");
                self.audit(AuditKind::AuthFailed, username, ip, "register: duplicate account");
                return Err(AppError::Conflict);
            }
            Err(e) => {
                error!(error = %e, "create user failed");
                return Err(e.into());
            }
        };

        info!(user_id = user.id, "user registered");
        self.audit(AuditKind::AuthSuccess, &user.username, ip, "registered");
        Ok(user.into())
    }

    /// `identifier` is matched against the username as given and against the
    /// email in normalized form.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        ip: Option<&str>,
    ) -> AppResult<(String, PublicUser)> {
        let user = self
            .users
            .find_by_username_or_email(identifier, &normalize_email(identifier))
            .await
            .map_err(|e| {
                error!(error = %e, "login lookup failed");
                AppError::from(e)
            })?;

        let verified = match self
            .verify_password(password, user.as_ref().map(|u| u.password_hash.as_str()))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                // An unreadable stored hash fails the login like a bad password.
                error!(error = %e, "password verification failed");
                false
            }
        };

        let mut user = match user {
            Some(u) if verified => u,
            _ => {
                warn!("login rejected");
                self.audit(AuditKind::AuthFailed, identifier, ip, "invalid credentials");
                return Err(AppError::AuthorizationFailed);
            }
        };

        if let Err(e) = self.users.touch_last_login(user.id).await {
            warn!(error = %e, user_id = user.id, "failed to update last login");
        }
        user.last_login = Some(OffsetDateTime::now_utc());

        let token = self.keys.issue(user.id, &user.username, user.is_admin)?;

        info!(user_id = user.id, "user logged in");
        self.audit(AuditKind::AuthSuccess, &user.username, ip, "login");
        self.audit(AuditKind::SessionCreated, &user.username, ip, "session token issued");
        Ok((token, user.into()))
    }

    pub async fn profile(&self, user_id: i64) -> AppResult<PublicUser> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound("user not found"))?;
        Ok(user.into())
    }

    /// Sessions are stateless; logging out only leaves an audit trail.
    pub fn logout(&self, user: &AuthUser, ip: Option<&str>) {
        info!(user_id = user.user_id, "user logged out");
        self.audit(AuditKind::Logout, &user.username, ip, "logout");
    }

    /// Unknown emails succeed silently. A token whose mail cannot be delivered
    /// is discarded before the error is returned.
    pub async fn request_password_reset(&self, email: &str, ip: Option<&str>) -> AppResult<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AppError::validation("valid email address is required"));
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            info!("password reset requested for unknown email");
            self.audit(AuditKind::PasswordResetRequested, &email, ip, "unknown email");
            return Ok(());
        };

        let token = self.resets.issue(&user.email).await;
        let link = format!("{}/reset-password.html?token={}", self.reset_base_url, token);

        let sent = tokio::time::timeout(
            self.mail_timeout,
            self.mailer.send_password_reset(&user.email, &link),
        )
        .await;
        let failure = match sent {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(anyhow::Error::new(e).context("sending password reset mail")),
            Err(_) => Some(anyhow::anyhow!(
                "password reset mail timed out after {:?}",
                self.mail_timeout
            )),
        };
        if let Some(err) = failure {
            self.resets.discard(&user.email, &token).await;
            error!(error = %err, user_id = user.id, "password reset mail not delivered");
            return Err(AppError::Internal(err));
        }

        info!(user_id = user.id, "password reset token issued");
        self.audit(AuditKind::PasswordResetRequested, &user.username, ip, "reset link sent");
        Ok(())
    }

    pub async fn validate_reset_token(&self, token: &str, ip: Option<&str>) -> AppResult<String> {
        let resolved = self.resets.validate(token).await;
        self.reset_token_outcome(resolved, ip)
    }

    fn reset_token_outcome(
        &self,
        resolved: Result<String, ResetError>,
        ip: Option<&str>,
    ) -> AppResult<String> {
        match resolved {
            Ok(email) => Ok(email),
            Err(ResetError::Expired) => {
                self.audit(
                    AuditKind::PasswordResetTokenExpired,
                    "anonymous",
                    ip,
                    "reset token expired",
                );
                Err(AppError::validation(INVALID_RESET_TOKEN))
            }
            Err(ResetError::NotFound) => {
                self.audit(
                    AuditKind::PasswordResetInvalidToken,
                    "anonymous",
                    ip,
                    "unknown reset token",
                );
                Err(AppError::validation(INVALID_RESET_TOKEN))
            }
        }
    }

    /// The token is claimed for the duration of the change, so a concurrent
    /// completion with the same token is rejected. It stays valid unless
    /// every step succeeds.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        ip: Option<&str>,
    ) -> AppResult<()> {
        let claimed = self.resets.claim(token).await;
        let email = self.reset_token_outcome(claimed, ip)?;

        match self.change_password(&email, new_password, ip).await {
            Ok(()) => {
                self.resets.consume(&email, token).await;
                Ok(())
            }
            Err(e) => {
                self.resets.release(&email, token).await;
                Err(e)
            }
        }
    }

    async fn change_password(
        &self,
        email: &str,
        new_password: &str,
        ip: Option<&str>,
    ) -> AppResult<()> {
        check_password_policy(new_password).map_err(AppError::Validation)?;

        let Some(user) = self.users.find_by_email(email).await? else {
            warn!("reset token refers to a missing account");
            return Err(AppError::validation(INVALID_RESET_TOKEN));
        };

        let hash = self.hash_password(new_password).await?;
        self.users.update_password(user.id, &hash).await.map_err(|e| {
            error!(error = %e, user_id = user.id, "update password failed");
            AppError::from(e)
        })?;

        info!(user_id = user.id, "password reset completed");
        self.audit(AuditKind::PasswordResetCompleted, &user.username, ip, "password changed");
        Ok(())
    }

    pub async fn list_users(&self) -> AppResult<Vec<PublicUser>> {
        let users = self.users.list().await?;
        Ok(users.into_iter().map(PublicUser::from).collect())
    }
}

fn validate_registration(username: &str, email: &str, password: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("username is required".into());
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        ));
    }
    if !is_valid_email(email) {
        return Err("invalid email address".into());
    }
    check_password_policy(password)
}
