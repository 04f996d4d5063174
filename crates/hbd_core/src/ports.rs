//! crates/hbd_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or the
//! messaging transport.

use async_trait::async_trait;
use chrono::NaiveTime;
use uuid::Uuid;

use crate::domain::{DateRecord, User, UserUpdate};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A uniqueness constraint rejected the write. Nothing was persisted.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistence for identity and date records.
///
/// Every mutating method is all-or-nothing: on error the store is unchanged.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    // --- Identity records ---
    async fn email_hash_exists(&self, email_hash: &str) -> PortResult<bool>;

    async fn secret_hash_exists(&self, secret_hash: &str) -> PortResult<bool>;

    /// Inserts a new identity. Fails with `Conflict` if either lookup hash is taken.
    async fn insert_user(&self, user: User) -> PortResult<()>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    /// Finds the identity whose secret hash (and email hash, when given) match exactly.
    async fn find_user_by_hashes(
        &self,
        email_hash: Option<&str>,
        secret_hash: &str,
    ) -> PortResult<User>;

    /// Applies `update` in one transaction and returns the stored record.
    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> PortResult<User>;

    /// Deletes the identity and every date record it owns.
    async fn delete_user(&self, user_id: Uuid) -> PortResult<()>;

    /// Identities whose `reminder_time_utc` equals `time`.
    async fn users_due_at(&self, time: NaiveTime) -> PortResult<Vec<User>>;

    // --- Date records ---
    async fn list_dates(&self, owner_id: Uuid) -> PortResult<Vec<DateRecord>>;

    /// Records of `owner_id` falling on `month`/`day`, any year.
    async fn dates_on(&self, owner_id: Uuid, month: u32, day: u32) -> PortResult<Vec<DateRecord>>;

    /// Fails with `Conflict` if the owner already has the same label and date.
    async fn insert_date(&self, record: DateRecord) -> PortResult<()>;

    /// Replaces label and date of an existing record of the same owner.
    async fn update_date(&self, record: DateRecord) -> PortResult<()>;

    async fn delete_date(&self, owner_id: Uuid, record_id: Uuid) -> PortResult<()>;
}

/// Outbound "send text to chat id" capability.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_message(&self, bot_token: &str, chat_id: &str, text: &str) -> PortResult<()>;
}
