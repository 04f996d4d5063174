//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `CredentialStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::NaiveTime;
use hbd_core::domain::{BirthDate, DateRecord, User, UserUpdate};
use hbd_core::ports::{CredentialStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email_lookup_hash, secret_lookup_hash, encrypted_secret, \
     encrypted_contact_token, encrypted_contact_id, reminder_time_utc, timezone";
const BIRTHDAY_COLUMNS: &str = "id, user_id, name, year, month, day";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `CredentialStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Unique-constraint violations become `Conflict`; everything else is unexpected.
fn write_error(e: sqlx::Error, what: &str) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(format!("{} already exists", what))
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email_lookup_hash: String,
    secret_lookup_hash: String,
    encrypted_secret: Option<String>,
    encrypted_contact_token: String,
    encrypted_contact_id: String,
    reminder_time_utc: NaiveTime,
    timezone: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email_lookup_hash: self.email_lookup_hash,
            secret_lookup_hash: self.secret_lookup_hash,
            encrypted_secret: self.encrypted_secret,
            encrypted_contact_token: self.encrypted_contact_token,
            encrypted_contact_id: self.encrypted_contact_id,
            reminder_time_utc: self.reminder_time_utc,
            timezone: self.timezone,
        }
    }
}

#[derive(FromRow)]
struct BirthdayRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    year: Option<i32>,
    month: i16,
    day: i16,
}
impl BirthdayRecord {
    fn to_domain(self) -> PortResult<DateRecord> {
        let date = BirthDate::new(self.year, self.month as u32, self.day as u32)
            .map_err(|e| PortError::Unexpected(format!("Stored birthday {} is invalid: {}", self.id, e)))?;
        Ok(DateRecord {
            id: self.id,
            owner_id: self.user_id,
            label: self.name,
            date,
        })
    }
}

fn to_domain_dates(records: Vec<BirthdayRecord>) -> PortResult<Vec<DateRecord>> {
    records.into_iter().map(BirthdayRecord::to_domain).collect()
}

//=========================================================================================
// `CredentialStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CredentialStore for DbAdapter {
    async fn email_hash_exists(&self, email_hash: &str) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email_lookup_hash = $1)")
            .bind(email_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn secret_hash_exists(&self, secret_hash: &str) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE secret_lookup_hash = $1)")
            .bind(secret_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn insert_user(&self, user: User) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO users (id, email_lookup_hash, secret_lookup_hash, encrypted_secret, \
             encrypted_contact_token, encrypted_contact_id, reminder_time_utc, timezone) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.email_lookup_hash)
        .bind(&user.secret_lookup_hash)
        .bind(&user.encrypted_secret)
        .bind(&user.encrypted_contact_token)
        .bind(&user.encrypted_contact_id)
        .bind(user.reminder_time_utc)
        .bind(&user.timezone)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "User"))?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
                _ => PortError::Unexpected(e.to_string()),
            })?;
        Ok(record.to_domain())
    }

    async fn find_user_by_hashes(&self, email_hash: Option<&str>, secret_hash: &str) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE secret_lookup_hash = $1 \
             AND ($2::TEXT IS NULL OR email_lookup_hash = $2)",
            USER_COLUMNS
        ))
        .bind(secret_hash)
        .bind(email_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound("No user matches the given credentials".to_string()))?;
        Ok(record.to_domain())
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> PortResult<User> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE id = $1 FOR UPDATE",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;

        let mut user = record.to_domain();
        update.apply(&mut user);

        sqlx::query(
            "UPDATE users SET email_lookup_hash = $2, secret_lookup_hash = $3, encrypted_secret = $4, \
             encrypted_contact_token = $5, encrypted_contact_id = $6, reminder_time_utc = $7, \
             timezone = $8, updated_at = NOW() WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.email_lookup_hash)
        .bind(&user.secret_lookup_hash)
        .bind(&user.encrypted_secret)
        .bind(&user.encrypted_contact_token)
        .bind(&user.encrypted_contact_id)
        .bind(user.reminder_time_utc)
        .bind(&user.timezone)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "User"))?;

        tx.commit().await.map_err(unexpected)?;
        Ok(user)
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        // Birthdays go with the user through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn users_due_at(&self, time: NaiveTime) -> PortResult<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE reminder_time_utc = $1",
            USER_COLUMNS
        ))
        .bind(time)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_dates(&self, owner_id: Uuid) -> PortResult<Vec<DateRecord>> {
        let records = sqlx::query_as::<_, BirthdayRecord>(&format!(
            "SELECT {} FROM birthdays WHERE user_id = $1 ORDER BY month, day, name",
            BIRTHDAY_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        to_domain_dates(records)
    }

    async fn dates_on(&self, owner_id: Uuid, month: u32, day: u32) -> PortResult<Vec<DateRecord>> {
        let records = sqlx::query_as::<_, BirthdayRecord>(&format!(
            "SELECT {} FROM birthdays WHERE user_id = $1 AND month = $2 AND day = $3 ORDER BY name",
            BIRTHDAY_COLUMNS
        ))
        .bind(owner_id)
        .bind(month as i16)
        .bind(day as i16)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        to_domain_dates(records)
    }

    async fn insert_date(&self, record: DateRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO birthdays (id, user_id, name, year, month, day) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.label)
        .bind(record.date.year)
        .bind(record.date.month as i16)
        .bind(record.date.day as i16)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "Birthday"))?;
        Ok(())
    }

    async fn update_date(&self, record: DateRecord) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE birthdays SET name = $3, year = $4, month = $5, day = $6 WHERE id = $1 AND user_id = $2",
        )
        .bind(record.id)
        .bind(record.owner_id)
        .bind(&record.label)
        .bind(record.date.year)
        .bind(record.date.month as i16)
        .bind(record.date.day as i16)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "Birthday"))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Date record {} not found", record.id)));
        }
        Ok(())
    }

    async fn delete_date(&self, owner_id: Uuid, record_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM birthdays WHERE id = $1 AND user_id = $2")
            .bind(record_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Date record {} not found", record_id)));
        }
        Ok(())
    }
}
