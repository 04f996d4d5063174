//! crates/hbd_core/src/scheduler.rs
//!
//! The reminder scheduler. Each tick selects the users whose reminder time is
//! the current UTC minute, finds their dates falling on today's month/day and
//! pushes one message per user through the notification gateway.
//!
//! A failure for one user (bad ciphertext, store error, delivery error) is
//! logged and counted; the scan always continues with the next user.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{truncate_to_minute, Clock};
use crate::crypto::{self, MasterKey};
use crate::domain::{DateRecord, User};
use crate::error::{CoreError, CoreResult};
use crate::ports::{CredentialStore, NotificationGateway};

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Users whose reminder time matched.
    pub due: usize,
    pub notified: usize,
    /// Due users with nothing to report today.
    pub skipped: usize,
    pub failed: usize,
}

pub struct Scheduler {
    store: Arc<dyn CredentialStore>,
    gateway: Arc<dyn NotificationGateway>,
    master_key: Arc<MasterKey>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn NotificationGateway>,
        master_key: Arc<MasterKey>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            master_key,
            clock,
        }
    }

    /// Scans every user due at `now` (truncated to the minute).
    pub async fn run_tick(&self, now: DateTime<Utc>) -> CoreResult<TickReport> {
        let minute = truncate_to_minute(now.time());
        let users = self.store.users_due_at(minute).await?;
        let mut report = TickReport {
            due: users.len(),
            ..Default::default()
        };

        for user in &users {
            match self.check_user(user, now).await {
                Ok(0) => report.skipped += 1,
                Ok(_) => report.notified += 1,
                Err(e) => {
                    warn!(user_id = %user.id, "Reminder check failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                notified = report.notified,
                skipped = report.skipped,
                failed = report.failed,
                "Reminder tick finished"
            );
        }
        Ok(report)
    }

    /// Checks one user regardless of their reminder time. Returns how many
    /// records were included in the message, zero when nothing was sent.
    pub async fn check_user(&self, user: &User, now: DateTime<Utc>) -> CoreResult<usize> {
        let bot_token = crypto::decrypt_string(&self.master_key, &user.encrypted_contact_token)?;
        let chat_id = crypto::decrypt_string(&self.master_key, &user.encrypted_contact_id)?;

        let today = now.date_naive();
        let records = self.store.dates_on(user.id, today.month(), today.day()).await?;
        if records.is_empty() {
            debug!(user_id = %user.id, "No dates today");
            return Ok(0);
        }

        let text = compose_message(now, &records);
        self.gateway
            .send_message(&bot_token, &chat_id, &text)
            .await
            .map_err(|e| CoreError::Notification(e.to_string()))?;
        info!(user_id = %user.id, records = records.len(), "Sent reminder");
        Ok(records.len())
    }

    /// Runs `run_tick` every `period`, starting at the next wall-clock minute,
    /// until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now() + until_next_minute(self.clock.now());
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs(), "Reminder scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_tick(self.clock.now()).await {
                            error!("Reminder tick failed: {}", e);
                        }
                    }
                }
            }

            info!("Reminder scheduler stopped");
        })
    }
}

/// `🎂 Birthdays for today: YYYY-MM-DD` followed by one `> Label` line per
/// record, annotated with the age when the year is known.
pub fn compose_message(now: DateTime<Utc>, records: &[DateRecord]) -> String {
    let today = now.date_naive();
    let lines: Vec<String> = records
        .iter()
        .map(|r| match r.date.age_on(today) {
            Some(age) => format!("> {} - Turns {}", r.label, age),
            None => format!("> {}", r.label),
        })
        .collect();
    format!(
        "🎂 Birthdays for today: {}\n\n{}",
        today.format("%Y-%m-%d"),
        lines.join("\n")
    )
}

fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = u64::from(now.second()) * 1000 + u64::from(now.timestamp_subsec_millis());
    Duration::from_millis(60_000u64.saturating_sub(into_minute) % 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::BirthDate;
    use crate::memory::{MemoryStore, OutboxGateway};
    use chrono::{NaiveTime, TimeZone};
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<OutboxGateway>,
        key: Arc<MasterKey>,
        scheduler: Arc<Scheduler>,
    }

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()
    }

    fn harness(now: DateTime<Utc>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(OutboxGateway::new());
        let key = Arc::new(MasterKey::generate());
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            gateway.clone(),
            key.clone(),
            Arc::new(FixedClock::new(now)),
        ));
        Harness { store, gateway, key, scheduler }
    }

    async fn add_user(h: &Harness, chat_id: &str, reminder: NaiveTime) -> User {
        add_user_with_id(h, Uuid::new_v4(), chat_id, reminder).await
    }

    async fn add_user_with_id(h: &Harness, id: Uuid, chat_id: &str, reminder: NaiveTime) -> User {
        let user = User {
            id,
            email_lookup_hash: format!("email-{}", chat_id),
            secret_lookup_hash: format!("secret-{}", chat_id),
            encrypted_secret: None,
            encrypted_contact_token: crypto::encrypt(&h.key, b"bot-token").unwrap(),
            encrypted_contact_id: crypto::encrypt(&h.key, chat_id.as_bytes()).unwrap(),
            reminder_time_utc: reminder,
            timezone: "UTC".to_string(),
        };
        h.store.insert_user(user.clone()).await.unwrap();
        user
    }

    async fn add_date(h: &Harness, owner: &User, label: &str, date: &str) {
        let record = DateRecord {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            label: label.to_string(),
            date: date.parse::<BirthDate>().unwrap(),
        };
        h.store.insert_date(record).await.unwrap();
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn message_lists_labels_with_ages() {
        let owner = Uuid::new_v4();
        let records = vec![
            DateRecord { id: Uuid::new_v4(), owner_id: owner, label: "Sam".into(), date: "2000-01-01".parse().unwrap() },
            DateRecord { id: Uuid::new_v4(), owner_id: owner, label: "Kim".into(), date: "01-01".parse().unwrap() },
        ];
        let text = compose_message(at(2024, 1, 1, 9, 0), &records);
        assert_eq!(text, "🎂 Birthdays for today: 2024-01-01\n\n> Sam - Turns 24\n> Kim");
    }

    #[tokio::test]
    async fn corrupted_user_does_not_block_the_scan() {
        let now = at(2024, 6, 15, 9, 0);
        let h = harness(now);
        // Due users are scanned in id order, so the broken one comes first.
        let broken = add_user_with_id(&h, Uuid::from_u128(1), "111", nine()).await;
        let healthy = add_user_with_id(&h, Uuid::from_u128(2), "222", nine()).await;
        add_date(&h, &broken, "Ana", "1990-06-15").await;
        add_date(&h, &healthy, "Ben", "1990-06-15").await;

        let corrupt = crate::domain::UserUpdate {
            encrypted_contact_token: Some("00ff".repeat(30)),
            ..Default::default()
        };
        h.store.update_user(broken.id, corrupt).await.unwrap();

        let report = h.scheduler.run_tick(now).await.unwrap();
        assert_eq!(report, TickReport { due: 2, notified: 1, skipped: 0, failed: 1 });

        let sent = h.gateway.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "222");
        assert!(sent[0].text.contains("> Ben - Turns 34"));
    }

    #[tokio::test]
    async fn delivery_failure_is_counted_and_scan_continues() {
        let now = at(2024, 6, 15, 9, 0);
        let h = harness(now);
        let a = add_user(&h, "111", nine()).await;
        let b = add_user(&h, "222", nine()).await;
        add_date(&h, &a, "Ana", "06-15").await;
        add_date(&h, &b, "Ben", "06-15").await;
        h.gateway.fail_for("111").await;

        let report = h.scheduler.run_tick(now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(h.gateway.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn only_users_due_this_minute_are_scanned() {
        let now = at(2024, 6, 15, 9, 0);
        let h = harness(now);
        let due = add_user(&h, "111", nine()).await;
        let later = add_user(&h, "222", NaiveTime::from_hms_opt(10, 0, 0).unwrap()).await;
        add_date(&h, &due, "Ana", "06-15").await;
        add_date(&h, &later, "Ben", "06-15").await;

        let report = h.scheduler.run_tick(now + chrono::Duration::seconds(42)).await.unwrap();
        assert_eq!(report.due, 1);
        let sent = h.gateway.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "111");
    }

    #[tokio::test]
    async fn due_user_without_dates_today_is_skipped() {
        let now = at(2024, 6, 15, 9, 0);
        let h = harness(now);
        let user = add_user(&h, "111", nine()).await;
        add_date(&h, &user, "Ana", "1990-06-16").await;

        let report = h.scheduler.run_tick(now).await.unwrap();
        assert_eq!(report, TickReport { due: 1, notified: 0, skipped: 1, failed: 0 });
        assert!(h.gateway.sent().await.is_empty());
    }

    #[tokio::test]
    async fn check_user_ignores_reminder_time() {
        let now = at(2024, 6, 15, 17, 30);
        let h = harness(now);
        let user = add_user(&h, "111", nine()).await;
        add_date(&h, &user, "Ana", "2021-06-15").await;

        assert_eq!(h.scheduler.check_user(&user, now).await.unwrap(), 1);
        let sent = h.gateway.sent().await;
        assert!(sent[0].text.contains("Turns 3"));
        assert_eq!(sent[0].bot_token, "bot-token");
    }

    #[tokio::test]
    async fn spawned_loop_ticks_until_cancelled() {
        let now = at(2024, 6, 15, 9, 0);
        let h = harness(now);
        let user = add_user(&h, "111", nine()).await;
        add_date(&h, &user, "Ana", "06-15").await;

        let shutdown = CancellationToken::new();
        let handle = h.scheduler.clone().spawn(Duration::from_millis(20), shutdown.clone());

        let mut delivered = false;
        for _ in 0..100 {
            if !h.gateway.sent().await.is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();
        assert!(delivered);
    }

    #[test]
    fn next_minute_alignment() {
        assert_eq!(until_next_minute(at(2024, 1, 1, 0, 0)), Duration::ZERO);
        let mid = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 45).unwrap();
        assert_eq!(until_next_minute(mid), Duration::from_secs(15));
    }
}
