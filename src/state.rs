use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::Hasher;
use crate::auth::rate_limit::{self, RateLimiter};
use crate::auth::repo::{PgUserStore, UserStore};
use crate::auth::reset::{MemoryResetStore, ResetTokenStore};
use crate::auth::services::AuthService;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::mail::{Mailer, SmtpMailer, UnconfiguredMailer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub keys: JwtKeys,
    pub resets: Arc<dyn ResetTokenStore>,
    pub audit: Arc<dyn AuditSink>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    /// Builds the production state. Returns the pool too so the caller can
    /// run migrations against it.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await?;

        let mailer: Arc<dyn Mailer> = match config.mail.clone() {
            Some(mail) => Arc::new(SmtpMailer::new(
                mail,
                config.reset.ttl_minutes,
                config.mail_timeout(),
            )),
            None => {
                tracing::warn!("SMTP not configured; password reset mails will fail");
                Arc::new(UnconfiguredMailer)
            }
        };

        let hasher = Hasher::new(
            config.hash.memory_kib,
            config.hash.iterations,
            config.hash.parallelism,
        )?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let resets = Arc::new(MemoryResetStore::new(config.reset_ttl(), clock.clone()));
        let state = Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            resets,
            mailer,
            Arc::new(TracingAuditSink),
            hasher,
            clock,
        );
        Ok((state, db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        resets: Arc<dyn ResetTokenStore>,
        mailer: Arc<dyn Mailer>,
        audit: Arc<dyn AuditSink>,
        hasher: Hasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = JwtKeys::new(&config.jwt.secret, config.jwt_ttl(), clock.clone());
        let limiter = rate_limit::from_config(&config, clock);
        let auth = Arc::new(AuthService::new(
            users,
            resets.clone(),
            mailer,
            audit.clone(),
            hasher,
            keys.clone(),
            &config,
        ));
        Self {
            config,
            auth,
            keys,
            resets,
            audit,
            limiter,
        }
    }
}

/// Handles on the in-memory collaborators behind [`AppState::fake`].
#[cfg(test)]
pub struct Fakes {
    pub users: Arc<crate::auth::memory::MemoryUserStore>,
    pub resets: Arc<MemoryResetStore>,
    pub audit: Arc<crate::audit::RecordingAuditSink>,
    pub clock: crate::clock::MockClock,
}

#[cfg(test)]
impl AppState {
    pub fn fake() -> Self {
        Self::fake_with_mailer(Arc::new(crate::mail::RecordingMailer::default())).0
    }

    pub fn fake_with_mailer(mailer: Arc<dyn Mailer>) -> (Self, Fakes) {
        use crate::audit::RecordingAuditSink;
        use crate::auth::memory::MemoryUserStore;
        use crate::clock::MockClock;

        let config = Arc::new(AppConfig::for_tests());
        let clock = MockClock::new();
        let users = Arc::new(MemoryUserStore::default());
        let audit = Arc::new(RecordingAuditSink::default());
        let resets = Arc::new(MemoryResetStore::new(
            config.reset_ttl(),
            Arc::new(clock.clone()),
        ));

        let state = Self::from_parts(
            config,
            users.clone(),
            resets.clone(),
            mailer,
            audit.clone(),
            Hasher::fast(),
            Arc::new(clock.clone()),
        );
        let fakes = Fakes {
            users,
            resets,
            audit,
            clock,
        };
        (state, fakes)
    }
}
