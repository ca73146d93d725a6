use std::sync::Arc;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use time::Duration;
use tracing::debug;

use crate::auth::claims::Claims;
use crate::clock::Clock;

/// The only signing algorithm tokens may carry.
const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("malformed token")]
    Malformed,
    #[error("token has expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Session-token signing and verification keys.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            clock,
        }
    }

    pub fn issue(&self, user_id: i64, username: &str, is_admin: bool) -> anyhow::Result<String> {
        let now = self.clock.now();
        let claims = Claims {
            user_id,
            username: username.to_string(),
            is_admin,
            iat: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        debug!(user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;

        // The library checks `exp` against the wall clock; re-check against
        // our clock so expiry does not depend on library leeway rules.
        if self.clock.now().unix_timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        debug!(user_id = data.claims.user_id, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MockClock, SystemClock};
    use serde_json::json;

    fn make_keys(secret: &str) -> (JwtKeys, MockClock) {
        let clock = MockClock::new();
        let keys = JwtKeys::new(secret, Duration::days(7), Arc::new(clock.clone()));
        (keys, clock)
    }

    #[test]
    fn sign_and_verify_session_token() {
        let (keys, _) = make_keys("dev-secret");
        let token = keys.issue(42, "alice", true).expect("sign");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.username, "alice");
        assert!(claims.is_admin);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn token_expires_after_seven_days() {
        let (keys, clock) = make_keys("dev-secret");
        let token = keys.issue(1, "alice", false).unwrap();

        clock.advance(Duration::days(7) - Duration::seconds(1));
        assert!(keys.verify(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(keys.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn token_expired_by_wall_clock_is_expired() {
        let clock = MockClock::new();
        clock.advance(Duration::days(-8));
        let issuer = JwtKeys::new("s", Duration::days(7), Arc::new(clock));
        let token = issuer.issue(1, "alice", false).unwrap();

        let verifier = JwtKeys::new("s", Duration::days(7), Arc::new(SystemClock));
        assert_eq!(verifier.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn verify_rejects_other_secret() {
        let (good, _) = make_keys("secret-alpha");
        let (bad, _) = make_keys("secret-bravo");
        let token = good.issue(1, "alice", false).unwrap();
        assert_eq!(bad.verify(&token).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn verify_rejects_other_hmac_variant() {
        let (keys, clock) = make_keys("dev-secret");
        let now = clock.now().unix_timestamp();
        let claims = Claims {
            user_id: 1,
            username: "alice".into(),
            is_admin: true,
            iat: now,
            exp: now + 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert_eq!(keys.verify(&token).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn verify_rejects_unsigned_token() {
        let (keys, _) = make_keys("dev-secret");
        // {"alg":"none","typ":"JWT"}.{"user_id":1,...}.
        let header = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0";
        let payload = "eyJ1c2VyX2lkIjoxLCJ1c2VybmFtZSI6ImEiLCJpc19hZG1pbiI6dHJ1ZSwiaWF0IjoxLCJleHAiOjQxMDI0NDQ4MDB9";
        let token = format!("{header}.{payload}.");
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        let (keys, _) = make_keys("dev-secret");
        assert_eq!(keys.verify("not.a.jwt").unwrap_err(), TokenError::Malformed);
        assert_eq!(keys.verify("").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn float_encoded_user_id_is_tolerated() {
        let (keys, clock) = make_keys("dev-secret");
        let now = clock.now().unix_timestamp();
        let payload = json!({
            "user_id": 42.0,
            "username": "alice",
            "is_admin": false,
            "iat": now,
            "exp": now + 60,
        });
        let token = encode(
            &Header::default(),
            &payload,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert_eq!(keys.verify(&token).unwrap().user_id, 42);
    }

    #[test]
    fn unknown_claims_make_token_malformed() {
        let (keys, clock) = make_keys("dev-secret");
        let now = clock.now().unix_timestamp();
        let payload = json!({
            "user_id": 1,
            "username": "alice",
            "is_admin": false,
            "iat": now,
            "exp": now + 60,
            "scope": "everything",
        });
        let token = encode(
            &Header::default(),
            &payload,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        assert_eq!(keys.verify(&token).unwrap_err(), TokenError::Malformed);
    }
}
