//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::web::rate_limit::RateLimiter;
use hbd_core::{
    Clock, CredentialStore, Issuer, IssuerSettings, NotificationGateway, Scheduler, SessionKeys, StoreVerifier,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<Issuer>,
    pub scheduler: Arc<Scheduler>,
    pub rate_limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the issuer and the scheduler to the given adapters.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let master_key = config.master_key.clone();
        let sessions = SessionKeys::new(&master_key, config.default_token_hours);
        let verifier = Arc::new(StoreVerifier::new(store.clone(), sessions.clone(), clock.clone()));

        let issuer = Issuer::new(
            store.clone(),
            verifier,
            sessions,
            gateway.clone(),
            master_key.clone(),
            clock.clone(),
            IssuerSettings {
                retain_secret: config.retain_secret,
            },
        );
        let scheduler = Scheduler::new(store, gateway, master_key, clock.clone());
        let rate_limiter = RateLimiter::new(config.rate_limit_max, config.rate_limit_window);

        Self {
            issuer: Arc::new(issuer),
            scheduler: Arc::new(scheduler),
            rate_limiter: Arc::new(rate_limiter),
            clock,
            config,
        }
    }
}
