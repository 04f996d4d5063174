use chrono::{TimeZone, Utc};
use std::sync::Arc;

use hbd_core::auth::DEFAULT_TOKEN_HOURS;
use hbd_core::{
    Clock, Credentials, FixedClock, Issuer, IssuerSettings, MasterKey, MemoryStore, OutboxGateway, Registration,
    Scheduler, SessionKeys, StoreVerifier,
};

#[tokio::test]
async fn registered_birthday_is_reported_with_age() {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(OutboxGateway::new());
    let key = Arc::new(MasterKey::generate());
    let sessions = SessionKeys::new(&key, DEFAULT_TOKEN_HOURS);
    let verifier = Arc::new(StoreVerifier::new(store.clone(), sessions.clone(), clock.clone()));
    let issuer = Issuer::new(
        store.clone(),
        verifier,
        sessions,
        gateway.clone(),
        key.clone(),
        clock.clone(),
        IssuerSettings::default(),
    );
    let scheduler = Scheduler::new(store.clone(), gateway.clone(), key, clock.clone());

    issuer
        .register(
            Registration {
                email: "carol@hbd.wtf".to_string(),
                secret: "hunter2hunter2".to_string(),
                reminder_time: "10:00".to_string(),
                timezone: "Europe/Madrid".to_string(),
                contact_token: "bot:abc".to_string(),
                contact_id: "4242".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    let grant = issuer
        .login(
            Credentials::EmailAndSecret {
                email: "carol@hbd.wtf".to_string(),
                secret: "hunter2hunter2".to_string(),
            },
            None,
        )
        .await
        .unwrap();
    let user = issuer
        .authenticate(&Credentials::SessionToken(grant.token.token))
        .await
        .unwrap();
    issuer.add_date(&user, "Nephew", "2021-06-15").await.unwrap();

    clock.set(Utc.with_ymd_and_hms(2024, 6, 15, 19, 0, 0).unwrap());
    let before = gateway.sent().await.len();
    let notified = scheduler.check_user(&user, clock.now()).await.unwrap();
    assert_eq!(notified, 1);

    let sent = gateway.sent().await;
    assert_eq!(sent.len(), before + 1);
    let reminder = &sent[before];
    assert_eq!(reminder.chat_id, "4242");
    assert_eq!(reminder.bot_token, "bot:abc");
    assert!(reminder.text.contains("Turns 3"));

    // 10:00 CEST is 08:00 UTC; the periodic scan picks the user up then.
    let report = scheduler
        .run_tick(Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 30).unwrap())
        .await
        .unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.notified, 1);
}
