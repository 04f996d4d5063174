//! crates/hbd_core/src/auth.rs
//!
//! Authentication strategies and stateless session tokens.
//!
//! Callers prove who they are with one of the `Credentials` variants. The issuer
//! only sees the `CredentialVerifier` contract; `StoreVerifier` is the default
//! strategy and resolves every variant against the credential store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::{self, MasterKey};
use crate::domain::User;
use crate::error::{CoreError, CoreResult};
use crate::ports::{CredentialStore, PortError};

/// Default session lifetime (30 days).
pub const DEFAULT_TOKEN_HOURS: i64 = 720;
/// Upper bound for a caller-requested lifetime (one year).
pub const MAX_TOKEN_HOURS: i64 = 24 * 366;

//=========================================================================================
// Lookup hashes
//=========================================================================================

/// Emails are compared case-insensitively and without surrounding whitespace.
pub fn email_lookup_hash(email: &str) -> String {
    crypto::hash(email.trim().to_lowercase().as_bytes())
}

pub fn secret_lookup_hash(secret: &str) -> String {
    crypto::hash(secret.as_bytes())
}

//=========================================================================================
// Credentials
//=========================================================================================

/// The ways a caller can identify itself.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    SecretOnly { secret: String },
    EmailAndSecret { email: String, secret: String },
    SessionToken(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Credentials::SecretOnly { .. } => "SecretOnly",
            Credentials::EmailAndSecret { .. } => "EmailAndSecret",
            Credentials::SessionToken(_) => "SessionToken",
        };
        write!(f, "Credentials::{}(..)", kind)
    }
}

/// Resolves presented credentials to exactly one identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns `CoreError::Authentication` for every kind of mismatch.
    async fn verify(&self, credentials: &Credentials) -> CoreResult<User>;
}

//=========================================================================================
// Session tokens
//=========================================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Identity id.
    pub sub: String,
    /// Email lookup hash at issuance; tokens go stale when the email changes.
    pub email_hash: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and validates HS256 session tokens with a key derived from the master key.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_ttl: Duration,
}

impl SessionKeys {
    pub fn new(master_key: &MasterKey, default_ttl_hours: i64) -> Self {
        let secret = master_key.token_signing_key();
        Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            default_ttl: Duration::hours(default_ttl_hours.clamp(1, MAX_TOKEN_HOURS)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The lifetime a token would get, or a validation error when a requested
    /// `ttl` is out of range.
    pub fn resolve_ttl(&self, ttl: Option<Duration>) -> CoreResult<Duration> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() || ttl > Duration::hours(MAX_TOKEN_HOURS) {
            return Err(CoreError::Validation("Invalid token duration".to_string()));
        }
        Ok(ttl)
    }

    /// Issues a token for `user`. `ttl` overrides the default lifetime.
    pub fn issue(&self, user: &User, ttl: Option<Duration>, now: DateTime<Utc>) -> CoreResult<IssuedToken> {
        let ttl = self.resolve_ttl(ttl)?;
        let expires_at = now + ttl;
        let claims = SessionClaims {
            sub: user.id.to_string(),
            email_hash: user.email_lookup_hash.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CoreError::Storage(format!("Failed to sign session token: {}", e)))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Checks signature and expiry against `now`. Does not consult the store.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> CoreResult<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();

        let data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            debug!("Rejected session token: {}", e);
            CoreError::Authentication
        })?;
        if data.claims.exp <= now.timestamp() {
            debug!("Rejected expired session token");
            return Err(CoreError::Authentication);
        }
        Ok(data.claims)
    }
}

//=========================================================================================
// Default verifier
//=========================================================================================

/// Verifies every credential variant against the credential store.
pub struct StoreVerifier {
    store: Arc<dyn CredentialStore>,
    sessions: SessionKeys,
    clock: Arc<dyn Clock>,
}

impl StoreVerifier {
    pub fn new(store: Arc<dyn CredentialStore>, sessions: SessionKeys, clock: Arc<dyn Clock>) -> Self {
        Self { store, sessions, clock }
    }

    async fn by_hashes(&self, email: Option<&str>, secret: &str) -> CoreResult<User> {
        if secret.is_empty() || email.is_some_and(|e| e.trim().is_empty()) {
            return Err(CoreError::Authentication);
        }
        let email_hash = email.map(email_lookup_hash);
        let secret_hash = secret_lookup_hash(secret);
        self.store
            .find_user_by_hashes(email_hash.as_deref(), &secret_hash)
            .await
            .map_err(auth_failure)
    }

    async fn by_token(&self, token: &str) -> CoreResult<User> {
        let claims = self.sessions.validate(token, self.clock.now())?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| CoreError::Authentication)?;
        let user = self.store.get_user(user_id).await.map_err(auth_failure)?;
        if user.email_lookup_hash != claims.email_hash {
            debug!(user_id = %user.id, "Rejected session token bound to a previous email");
            return Err(CoreError::Authentication);
        }
        Ok(user)
    }
}

/// Missing records are a credential failure; anything else is a storage fault.
fn auth_failure(err: PortError) -> CoreError {
    match err {
        PortError::NotFound(_) => CoreError::Authentication,
        other => {
            warn!("Credential lookup failed: {}", other);
            CoreError::from(other)
        }
    }
}

#[async_trait]
impl CredentialVerifier for StoreVerifier {
    async fn verify(&self, credentials: &Credentials) -> CoreResult<User> {
        match credentials {
            Credentials::SecretOnly { secret } => self.by_hashes(None, secret).await,
            Credentials::EmailAndSecret { email, secret } => {
                self.by_hashes(Some(email.as_str()), secret).await
            }
            Credentials::SessionToken(token) => self.by_token(token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryStore;
    use chrono::{NaiveTime, TimeZone};

    fn sample_user(email: &str, secret: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email_lookup_hash: email_lookup_hash(email),
            secret_lookup_hash: secret_lookup_hash(secret),
            encrypted_secret: None,
            encrypted_contact_token: String::new(),
            encrypted_contact_id: String::new(),
            reminder_time_utc: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            timezone: "UTC".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn token_round_trip_and_expiry() {
        let keys = SessionKeys::new(&MasterKey::generate(), DEFAULT_TOKEN_HOURS);
        let user = sample_user("a@hbd.wtf", "s");
        let issued = keys.issue(&user, Some(Duration::hours(1)), now()).unwrap();

        let claims = keys.validate(&issued.token, now()).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.exp - claims.iat, 3600);

        let later = now() + Duration::hours(2);
        assert!(matches!(keys.validate(&issued.token, later), Err(CoreError::Authentication)));
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let user = sample_user("a@hbd.wtf", "s");
        let issued = SessionKeys::new(&MasterKey::generate(), 1).issue(&user, None, now()).unwrap();
        let other = SessionKeys::new(&MasterKey::generate(), 1);
        assert!(other.validate(&issued.token, now()).is_err());
        assert!(other.validate("garbage", now()).is_err());
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let keys = SessionKeys::new(&MasterKey::generate(), DEFAULT_TOKEN_HOURS);
        let user = sample_user("a@hbd.wtf", "s");
        assert!(keys.issue(&user, Some(Duration::hours(0)), now()).is_err());
        assert!(keys.issue(&user, Some(Duration::hours(MAX_TOKEN_HOURS + 1)), now()).is_err());
        assert_eq!(keys.resolve_ttl(None).unwrap(), Duration::hours(DEFAULT_TOKEN_HOURS));
        assert!(keys.resolve_ttl(Some(Duration::hours(-1))).is_err());
    }

    #[tokio::test]
    async fn verifier_collapses_failures_to_authentication() {
        let store = Arc::new(MemoryStore::new());
        let user = sample_user("Alice@hbd.wtf", "correct horse");
        store.insert_user(user.clone()).await.unwrap();
        let keys = SessionKeys::new(&MasterKey::generate(), DEFAULT_TOKEN_HOURS);
        let verifier = StoreVerifier::new(store, keys, Arc::new(FixedClock::new(now())));

        let ok = Credentials::EmailAndSecret {
            email: " alice@HBD.wtf ".to_string(),
            secret: "correct horse".to_string(),
        };
        assert_eq!(verifier.verify(&ok).await.unwrap().id, user.id);

        let ok_secret = Credentials::SecretOnly { secret: "correct horse".to_string() };
        assert_eq!(verifier.verify(&ok_secret).await.unwrap().id, user.id);

        for bad in [
            Credentials::EmailAndSecret { email: "bob@hbd.wtf".into(), secret: "correct horse".into() },
            Credentials::EmailAndSecret { email: "alice@hbd.wtf".into(), secret: "wrong".into() },
            Credentials::SecretOnly { secret: String::new() },
            Credentials::SessionToken("not-a-token".into()),
        ] {
            assert!(matches!(verifier.verify(&bad).await, Err(CoreError::Authentication)));
        }
    }

    #[tokio::test]
    async fn token_bound_to_previous_email_is_stale() {
        let store = Arc::new(MemoryStore::new());
        let user = sample_user("old@hbd.wtf", "s3cret");
        store.insert_user(user.clone()).await.unwrap();
        let keys = SessionKeys::new(&MasterKey::generate(), DEFAULT_TOKEN_HOURS);
        let token = keys.issue(&user, None, now()).unwrap().token;
        let verifier = StoreVerifier::new(store.clone(), keys, Arc::new(FixedClock::new(now())));

        assert!(verifier.verify(&Credentials::SessionToken(token.clone())).await.is_ok());

        let update = crate::domain::UserUpdate {
            email_lookup_hash: Some(email_lookup_hash("new@hbd.wtf")),
            ..Default::default()
        };
        store.update_user(user.id, update).await.unwrap();
        assert!(matches!(
            verifier.verify(&Credentials::SessionToken(token)).await,
            Err(CoreError::Authentication)
        ));
    }
}
