//! crates/hbd_core/src/memory.rs
//!
//! In-memory adapters: a `CredentialStore` and a `NotificationGateway` that
//! keeps sent messages in an outbox instead of delivering them.
//!
//! Each store mutation runs inside one write-lock critical section and
//! validates before it writes, so a failed call leaves the maps untouched.

use async_trait::async_trait;
use chrono::NaiveTime;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{DateRecord, User, UserUpdate};
use crate::ports::{CredentialStore, NotificationGateway, PortError, PortResult};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    dates: HashMap<Uuid, DateRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }

    pub async fn date_count(&self) -> usize {
        self.tables.read().await.dates.len()
    }
}

impl Tables {
    fn hash_taken(&self, except: Option<Uuid>, pred: impl Fn(&User) -> bool) -> bool {
        self.users
            .values()
            .any(|u| Some(u.id) != except && pred(u))
    }

    fn duplicate_date(&self, record: &DateRecord) -> bool {
        self.dates.values().any(|d| {
            d.id != record.id && d.owner_id == record.owner_id && d.same_entry(&record.label, &record.date)
        })
    }
}

fn sorted(mut records: Vec<DateRecord>) -> Vec<DateRecord> {
    records.sort_by(|a, b| {
        (a.date.month, a.date.day, &a.label).cmp(&(b.date.month, b.date.day, &b.label))
    });
    records
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn email_hash_exists(&self, email_hash: &str) -> PortResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.hash_taken(None, |u| u.email_lookup_hash == email_hash))
    }

    async fn secret_hash_exists(&self, secret_hash: &str) -> PortResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.hash_taken(None, |u| u.secret_lookup_hash == secret_hash))
    }

    async fn insert_user(&self, user: User) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id)
            || tables.hash_taken(None, |u| {
                u.email_lookup_hash == user.email_lookup_hash
                    || u.secret_lookup_hash == user.secret_lookup_hash
            })
        {
            return Err(PortError::Conflict("User already exists".to_string()));
        }
        tables.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.tables
            .read()
            .await
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn find_user_by_hashes(
        &self,
        email_hash: Option<&str>,
        secret_hash: &str,
    ) -> PortResult<User> {
        let tables = self.tables.read().await;
        tables
            .users
            .values()
            .find(|u| {
                u.secret_lookup_hash == secret_hash
                    && email_hash.map_or(true, |e| u.email_lookup_hash == e)
            })
            .cloned()
            .ok_or_else(|| PortError::NotFound("No matching user".to_string()))
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> PortResult<User> {
        let mut tables = self.tables.write().await;
        let mut updated = tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        update.apply(&mut updated);

        if tables.hash_taken(Some(user_id), |u| u.email_lookup_hash == updated.email_lookup_hash) {
            return Err(PortError::Conflict("Email already registered".to_string()));
        }
        if tables.hash_taken(Some(user_id), |u| u.secret_lookup_hash == updated.secret_lookup_hash) {
            return Err(PortError::Conflict("Secret already registered".to_string()));
        }

        tables.users.insert(user_id, updated.clone());
        Ok(updated)
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&user_id).is_none() {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        tables.dates.retain(|_, d| d.owner_id != user_id);
        Ok(())
    }

    async fn users_due_at(&self, time: NaiveTime) -> PortResult<Vec<User>> {
        let tables = self.tables.read().await;
        let mut due: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.reminder_time_utc == time)
            .cloned()
            .collect();
        due.sort_by_key(|u| u.id);
        Ok(due)
    }

    async fn list_dates(&self, owner_id: Uuid) -> PortResult<Vec<DateRecord>> {
        let tables = self.tables.read().await;
        Ok(sorted(
            tables.dates.values().filter(|d| d.owner_id == owner_id).cloned().collect(),
        ))
    }

    async fn dates_on(&self, owner_id: Uuid, month: u32, day: u32) -> PortResult<Vec<DateRecord>> {
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .dates
                .values()
                .filter(|d| d.owner_id == owner_id && d.date.month == month && d.date.day == day)
                .cloned()
                .collect(),
        ))
    }

    async fn insert_date(&self, record: DateRecord) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&record.owner_id) {
            return Err(PortError::NotFound(format!("User {} not found", record.owner_id)));
        }
        if tables.dates.contains_key(&record.id) || tables.duplicate_date(&record) {
            return Err(PortError::Conflict("Date record already exists".to_string()));
        }
        tables.dates.insert(record.id, record);
        Ok(())
    }

    async fn update_date(&self, record: DateRecord) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        let owned = matches!(tables.dates.get(&record.id), Some(d) if d.owner_id == record.owner_id);
        if !owned {
            return Err(PortError::NotFound(format!("Date record {} not found", record.id)));
        }
        if tables.duplicate_date(&record) {
            return Err(PortError::Conflict("Date record already exists".to_string()));
        }
        tables.dates.insert(record.id, record);
        Ok(())
    }

    async fn delete_date(&self, owner_id: Uuid, record_id: Uuid) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        let owned = matches!(tables.dates.get(&record_id), Some(d) if d.owner_id == owner_id);
        if !owned {
            return Err(PortError::NotFound(format!("Date record {} not found", record_id)));
        }
        tables.dates.remove(&record_id);
        Ok(())
    }
}

//=========================================================================================
// Outbox gateway
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub bot_token: String,
    pub chat_id: String,
    pub text: String,
}

/// Records messages instead of sending them. Chat ids registered with
/// `fail_for` are rejected with an error.
#[derive(Default)]
pub struct OutboxGateway {
    sent: RwLock<Vec<SentMessage>>,
    failing_chats: RwLock<Vec<String>>,
}

impl OutboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_for(&self, chat_id: &str) {
        self.failing_chats.write().await.push(chat_id.to_string());
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationGateway for OutboxGateway {
    async fn send_message(&self, bot_token: &str, chat_id: &str, text: &str) -> PortResult<()> {
        if self.failing_chats.read().await.iter().any(|c| c == chat_id) {
            return Err(PortError::Unexpected(format!("Delivery to chat {} failed", chat_id)));
        }
        self.sent.write().await.push(SentMessage {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BirthDate;

    fn user(email: &str, secret: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email_lookup_hash: email.to_string(),
            secret_lookup_hash: secret.to_string(),
            encrypted_secret: None,
            encrypted_contact_token: "token".to_string(),
            encrypted_contact_id: "chat".to_string(),
            reminder_time_utc: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            timezone: "UTC".to_string(),
        }
    }

    fn record(owner_id: Uuid, label: &str, date: &str) -> DateRecord {
        DateRecord {
            id: Uuid::new_v4(),
            owner_id,
            label: label.to_string(),
            date: date.parse::<BirthDate>().unwrap(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_hashes() {
        let store = MemoryStore::new();
        store.insert_user(user("e1", "s1")).await.unwrap();

        assert!(matches!(store.insert_user(user("e1", "s2")).await, Err(PortError::Conflict(_))));
        assert!(matches!(store.insert_user(user("e2", "s1")).await, Err(PortError::Conflict(_))));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn conflicting_update_leaves_record_unchanged() {
        let store = MemoryStore::new();
        let alice = user("alice", "s1");
        let bob = user("bob", "s2");
        store.insert_user(alice.clone()).await.unwrap();
        store.insert_user(bob.clone()).await.unwrap();

        let update = UserUpdate {
            email_lookup_hash: Some("bob".to_string()),
            timezone: Some("Europe/Paris".to_string()),
            ..Default::default()
        };
        assert!(matches!(store.update_user(alice.id, update).await, Err(PortError::Conflict(_))));
        assert_eq!(store.get_user(alice.id).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn delete_user_cascades_to_dates() {
        let store = MemoryStore::new();
        let alice = user("alice", "s1");
        store.insert_user(alice.clone()).await.unwrap();
        store.insert_date(record(alice.id, "Mum", "1960-05-02")).await.unwrap();
        store.insert_date(record(alice.id, "Dad", "1958-11-20")).await.unwrap();

        store.delete_user(alice.id).await.unwrap();
        assert_eq!(store.date_count().await, 0);
    }

    #[tokio::test]
    async fn date_natural_key_is_label_and_date() {
        let store = MemoryStore::new();
        let alice = user("alice", "s1");
        store.insert_user(alice.clone()).await.unwrap();

        store.insert_date(record(alice.id, "Sam", "1990-01-02")).await.unwrap();
        store.insert_date(record(alice.id, "Sam", "1991-01-02")).await.unwrap();
        let dup = store.insert_date(record(alice.id, "Sam", "1990-01-02")).await;
        assert!(matches!(dup, Err(PortError::Conflict(_))));

        let on_day = store.dates_on(alice.id, 1, 2).await.unwrap();
        assert_eq!(on_day.len(), 2);
    }

    #[tokio::test]
    async fn other_owner_cannot_touch_records() {
        let store = MemoryStore::new();
        let alice = user("alice", "s1");
        let mallory = user("mallory", "s2");
        store.insert_user(alice.clone()).await.unwrap();
        store.insert_user(mallory.clone()).await.unwrap();
        let rec = record(alice.id, "Sam", "1990-01-02");
        store.insert_date(rec.clone()).await.unwrap();

        let mut hijack = rec.clone();
        hijack.owner_id = mallory.id;
        assert!(matches!(store.update_date(hijack).await, Err(PortError::NotFound(_))));
        assert!(matches!(store.delete_date(mallory.id, rec.id).await, Err(PortError::NotFound(_))));
        assert_eq!(store.list_dates(alice.id).await.unwrap(), vec![rec]);
    }
}
