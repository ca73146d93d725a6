//! Outbound mail for the password-reset flow.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail is not configured")]
    NotConfigured,

    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_reset(&self, to: &str, reset_link: &str) -> Result<(), MailError>;
}

pub fn password_reset_body(reset_link: &str, ttl_minutes: i64) -> String {
    format!(
        "Hello,\n\n\
         You requested a password reset for your TuneTudo account.\n\n\
         Click the link below to reset your password:\n{reset_link}\n\n\
         This link will expire in {ttl_minutes} minutes.\n\n\
         If you didn't request this, please ignore this email and your password will remain unchanged.\n\n\
         Best regards,\nTuneTudo Team"
    )
}

pub struct SmtpMailer {
    config: MailConfig,
    ttl_minutes: i64,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(config: MailConfig, ttl_minutes: i64, timeout: Duration) -> Self {
        Self {
            config,
            ttl_minutes,
            timeout,
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_password_reset(&self, to: &str, reset_link: &str) -> Result<(), MailError> {
        let email = Message::builder()
            .from(self.config.from_email.parse()?)
            .to(to.parse()?)
            .subject("Password Reset Request - TuneTudo")
            .header(ContentType::TEXT_PLAIN)
            .body(password_reset_body(reset_link, self.ttl_minutes))
            .map_err(|e| MailError::Build(e.to_string()))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.smtp_user.clone(),
                self.config.smtp_pass.clone(),
            ))
            .timeout(Some(self.timeout))
            .build();
        mailer.send(email).await?;

        info!("password reset email dispatched");
        Ok(())
    }
}

/// Stand-in used when SMTP settings are absent: every dispatch fails, so the
/// reset token issued for it is rolled back.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send_password_reset(&self, _to: &str, _reset_link: &str) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

#[cfg(test)]
pub use self::fakes::{FailingMailer, RecordingMailer};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_contains_link_and_expiry() {
        let body = password_reset_body("https://x/reset-password.html?token=abc", 15);
        assert!(body.contains("https://x/reset-password.html?token=abc"));
        assert!(body.contains("expire in 15 minutes"));
    }

    #[tokio::test]
    async fn unconfigured_mailer_always_fails() {
        let err = UnconfiguredMailer
            .send_password_reset("a@b.com", "link")
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::NotConfigured));
    }

    #[test]
    fn mail_error_display_address() {
        let addr_err: Result<lettre::Address, _> = "not-an-email".parse();
        let err = MailError::Address(addr_err.unwrap_err());
        assert!(err.to_string().contains("email address parse error"));
    }
}
