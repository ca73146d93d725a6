use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::error;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Argon2id hasher with a fixed work factor.
#[derive(Debug, Clone)]
pub struct Hasher {
    params: Params,
    /// Throwaway hash under the same params, verified for unknown logins.
    dummy: Arc<Option<String>>,
}

impl Hasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> anyhow::Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {e}"))?;
        Ok(Self::with_params(params))
    }

    fn with_params(params: Params) -> Self {
        let mut hasher = Self {
            params,
            dummy: Arc::new(None),
        };
        hasher.dummy = Arc::new(hasher.hash("tunetudo-dummy-password").ok());
        hasher
    }

    /// Cheapest parameters argon2 allows; keeps the test suite fast.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self::with_params(Params::new(Params::MIN_M_COST, 1, 1, None).expect("min argon2 params"))
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    /// Parameters are read from the PHC string, so older hashes keep verifying.
    pub fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        match self.argon2().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }

    /// Burns one verification against a throwaway hash so an unknown login
    /// costs the same as a wrong password.
    pub fn verify_dummy(&self, plain: &str) {
        if let Some(hash) = self.dummy.as_deref() {
            let _ = self.verify(plain, hash);
        }
    }
}

pub fn check_password_policy(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    Ok(())
}
