//! crates/hbd_core/src/issuer.rs
//!
//! The credential & session issuer: registration, login, profile reads and
//! mutations, date-record management and secret generation.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{email_lookup_hash, secret_lookup_hash, CredentialVerifier, Credentials, IssuedToken, SessionKeys};
use crate::clock::{self, Clock};
use crate::crypto::{self, MasterKey};
use crate::domain::{BirthDate, DateRecord, User, UserUpdate};
use crate::error::{CoreError, CoreResult};
use crate::ports::{CredentialStore, NotificationGateway};

//=========================================================================================
// Inputs and outputs
//=========================================================================================

/// Everything a new user supplies at registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub secret: String,
    /// Local `HH:MM`.
    pub reminder_time: String,
    pub timezone: String,
    pub contact_token: String,
    pub contact_id: String,
}

/// A partial profile modification. Email and secret changes additionally
/// need `current_secret`.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub current_secret: Option<String>,
    pub new_email: Option<String>,
    pub new_secret: Option<String>,
    pub new_reminder_time: Option<String>,
    pub new_timezone: Option<String>,
    pub new_contact_token: Option<String>,
    pub new_contact_id: Option<String>,
}

impl ProfileChanges {
    fn changes_identity(&self) -> bool {
        self.new_email.is_some() || self.new_secret.is_some()
    }
}

/// Decrypted, display-ready view of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub contact_token: String,
    pub contact_id: String,
    /// `HH:MM` in the user's zone.
    pub reminder_time: String,
    pub timezone: String,
    /// Present only when the service retains secrets.
    pub secret: Option<String>,
    pub dates: Vec<DateRecord>,
    /// Records whose month/day is today's (UTC).
    pub due_today: Vec<DateRecord>,
}

#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub token: IssuedToken,
    pub profile: Profile,
}

#[derive(Debug, Clone)]
pub struct ModifiedProfile {
    pub profile: Profile,
    /// A fresh token when the email changed; older tokens no longer validate.
    pub token: Option<IssuedToken>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IssuerSettings {
    /// Keep the user's secret encrypted so it can be shown again.
    pub retain_secret: bool,
}

//=========================================================================================
// Issuer
//=========================================================================================

pub struct Issuer {
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn CredentialVerifier>,
    sessions: SessionKeys,
    gateway: Arc<dyn NotificationGateway>,
    master_key: Arc<MasterKey>,
    clock: Arc<dyn Clock>,
    settings: IssuerSettings,
}

impl Issuer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn CredentialVerifier>,
        sessions: SessionKeys,
        gateway: Arc<dyn NotificationGateway>,
        master_key: Arc<MasterKey>,
        clock: Arc<dyn Clock>,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            sessions,
            gateway,
            master_key,
            clock,
            settings,
        }
    }

    /// A random secret for users who do not want to choose one.
    pub fn generate_secret(&self) -> String {
        crypto::generate_secret()
    }

    /// Resolves credentials to an identity through the configured strategy.
    pub async fn authenticate(&self, credentials: &Credentials) -> CoreResult<User> {
        self.verifier.verify(credentials).await
    }

    // --- Registration and login ---

    pub async fn register(&self, req: Registration, ttl: Option<Duration>) -> CoreResult<SessionGrant> {
        require_non_empty("email", &req.email)?;
        require_non_empty("password", &req.secret)?;
        require_non_empty("telegram_bot_api_key", &req.contact_token)?;
        require_non_empty("telegram_user_id", &req.contact_id)?;
        let ttl = self.sessions.resolve_ttl(ttl)?;

        let email_hash = email_lookup_hash(&req.email);
        let secret_hash = secret_lookup_hash(&req.secret);
        if self.store.email_hash_exists(&email_hash).await? {
            return Err(CoreError::Conflict("Email already registered".to_string()));
        }
        if self.store.secret_hash_exists(&secret_hash).await? {
            return Err(CoreError::Conflict("Password already registered".to_string()));
        }

        let now = self.clock.now();
        let reminder_time_utc = clock::normalize_reminder_time(&req.reminder_time, &req.timezone, now)?;
        let encrypted_secret = if self.settings.retain_secret {
            Some(self.seal(&req.secret)?)
        } else {
            None
        };

        let user = User {
            id: Uuid::new_v4(),
            email_lookup_hash: email_hash,
            secret_lookup_hash: secret_hash,
            encrypted_secret,
            encrypted_contact_token: self.seal(req.contact_token.trim())?,
            encrypted_contact_id: self.seal(req.contact_id.trim())?,
            reminder_time_utc,
            timezone: req.timezone.clone(),
        };
        self.store.insert_user(user.clone()).await?;
        info!(user_id = %user.id, "Registered new user");

        let confirmation = format!(
            "🎂 Your user has been successfully registered, through this bot and user ID you'll receive your birthday reminders (if there's any) at {} (Timezone: {}).",
            req.reminder_time.trim(),
            req.timezone
        );
        if let Err(e) = self
            .gateway
            .send_message(req.contact_token.trim(), req.contact_id.trim(), &confirmation)
            .await
        {
            warn!(user_id = %user.id, "Failed to send registration confirmation: {}", e);
        }

        let token = self.sessions.issue(&user, Some(ttl), now)?;
        let profile = self.build_profile(&user, now).await?;
        Ok(SessionGrant { token, profile })
    }

    pub async fn login(&self, credentials: Credentials, ttl: Option<Duration>) -> CoreResult<SessionGrant> {
        let user = self.authenticate(&credentials).await?;
        let now = self.clock.now();
        let profile = self.build_profile(&user, now).await.map_err(|e| match e {
            CoreError::Crypto(inner) => {
                warn!(user_id = %user.id, "Stored contact data failed to decrypt at login: {}", inner);
                CoreError::Authentication
            }
            other => other,
        })?;
        let token = self.sessions.issue(&user, ttl, now)?;
        Ok(SessionGrant { token, profile })
    }

    // --- Profile ---

    pub async fn profile(&self, user: &User) -> CoreResult<Profile> {
        self.build_profile(user, self.clock.now()).await
    }

    pub async fn modify_profile(
        &self,
        user: &User,
        changes: ProfileChanges,
        ttl: Option<Duration>,
    ) -> CoreResult<ModifiedProfile> {
        let ttl = self.sessions.resolve_ttl(ttl)?;
        if changes.changes_identity() {
            let current = changes
                .current_secret
                .clone()
                .filter(|s| !s.is_empty())
                .ok_or(CoreError::Authentication)?;
            let proven = self.authenticate(&Credentials::SecretOnly { secret: current }).await?;
            if proven.id != user.id {
                return Err(CoreError::Authentication);
            }
        }

        let now = self.clock.now();
        let mut update = UserUpdate::default();

        if let Some(email) = &changes.new_email {
            require_non_empty("new_email", email)?;
            let hash = email_lookup_hash(email);
            if hash != user.email_lookup_hash {
                if self.store.email_hash_exists(&hash).await? {
                    return Err(CoreError::Conflict("Email already registered".to_string()));
                }
                update.email_lookup_hash = Some(hash);
            }
        }

        if let Some(secret) = &changes.new_secret {
            require_non_empty("new_password", secret)?;
            let hash = secret_lookup_hash(secret);
            if hash != user.secret_lookup_hash && self.store.secret_hash_exists(&hash).await? {
                return Err(CoreError::Conflict("Password already registered".to_string()));
            }
            update.secret_lookup_hash = Some(hash);
            update.encrypted_secret = Some(if self.settings.retain_secret {
                Some(self.seal(secret)?)
            } else {
                None
            });
        }

        if changes.new_reminder_time.is_some() || changes.new_timezone.is_some() {
            let timezone = changes.new_timezone.clone().unwrap_or_else(|| user.timezone.clone());
            update.reminder_time_utc = Some(match &changes.new_reminder_time {
                Some(t) => clock::normalize_reminder_time(t, &timezone, now)?,
                // Keep the user's local wall-clock time when only the zone changes.
                None => clock::rezone_reminder_time(user.reminder_time_utc, &user.timezone, &timezone, now)?,
            });
            update.timezone = Some(timezone);
        }

        if let Some(token) = &changes.new_contact_token {
            require_non_empty("new_telegram_bot_api_key", token)?;
            update.encrypted_contact_token = Some(self.seal(token.trim())?);
        }
        if let Some(chat_id) = &changes.new_contact_id {
            require_non_empty("new_telegram_user_id", chat_id)?;
            update.encrypted_contact_id = Some(self.seal(chat_id.trim())?);
        }

        let email_changed = update.email_lookup_hash.is_some();
        let updated = if update.is_empty() {
            user.clone()
        } else {
            self.store.update_user(user.id, update).await?
        };
        info!(user_id = %user.id, email_changed, "Modified user profile");

        let token = if email_changed {
            Some(self.sessions.issue(&updated, Some(ttl), now)?)
        } else {
            None
        };
        let profile = self.build_profile(&updated, now).await?;
        Ok(ModifiedProfile { profile, token })
    }

    pub async fn delete_profile(&self, user: &User) -> CoreResult<()> {
        self.store.delete_user(user.id).await?;
        info!(user_id = %user.id, "Deleted user");
        Ok(())
    }

    // --- Date records ---

    pub async fn list_dates(&self, user: &User) -> CoreResult<Vec<DateRecord>> {
        Ok(self.store.list_dates(user.id).await?)
    }

    pub async fn add_date(&self, user: &User, label: &str, date: &str) -> CoreResult<DateRecord> {
        let record = DateRecord {
            id: Uuid::new_v4(),
            owner_id: user.id,
            label: clean_label(label)?,
            date: date.parse::<BirthDate>()?,
        };
        self.store.insert_date(record.clone()).await?;
        Ok(record)
    }

    pub async fn modify_date(
        &self,
        user: &User,
        record_id: Uuid,
        label: &str,
        date: &str,
    ) -> CoreResult<DateRecord> {
        let record = DateRecord {
            id: record_id,
            owner_id: user.id,
            label: clean_label(label)?,
            date: date.parse::<BirthDate>()?,
        };
        self.store.update_date(record.clone()).await?;
        Ok(record)
    }

    pub async fn delete_date(&self, user: &User, record_id: Uuid) -> CoreResult<()> {
        Ok(self.store.delete_date(user.id, record_id).await?)
    }

    // --- Helpers ---

    /// Encrypts `value` exactly as given.
    fn seal(&self, value: &str) -> CoreResult<String> {
        crypto::encrypt(&self.master_key, value.as_bytes()).map_err(|e| {
            error!("Failed to encrypt value: {}", e);
            CoreError::from(e)
        })
    }

    fn open(&self, ciphertext: &str) -> CoreResult<String> {
        Ok(crypto::decrypt_string(&self.master_key, ciphertext)?)
    }

    async fn build_profile(&self, user: &User, now: DateTime<Utc>) -> CoreResult<Profile> {
        let contact_token = self.open(&user.encrypted_contact_token)?;
        let contact_id = self.open(&user.encrypted_contact_id)?;
        let secret = user
            .encrypted_secret
            .as_deref()
            .map(|s| self.open(s))
            .transpose()?;
        let reminder_time = clock::localize_reminder_time(user.reminder_time_utc, &user.timezone, now)?;
        let dates = self.store.list_dates(user.id).await?;
        let today: NaiveDate = now.date_naive();
        let due_today = dates.iter().filter(|d| d.date.is_anniversary(today)).cloned().collect();

        Ok(Profile {
            user_id: user.id,
            contact_token,
            contact_id,
            reminder_time,
            timezone: user.timezone.clone(),
            secret,
            dates,
            due_today,
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("Field '{}' is required", field)));
    }
    Ok(())
}

fn clean_label(label: &str) -> CoreResult<String> {
    let label = label.trim();
    if label.is_empty() {
        return Err(CoreError::Validation("Field 'name' is required".to_string()));
    }
    Ok(label.to_string())
}
