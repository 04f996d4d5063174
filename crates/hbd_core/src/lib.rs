pub mod auth;
pub mod clock;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod issuer;
pub mod memory;
pub mod ports;
pub mod scheduler;

pub use auth::{Credentials, CredentialVerifier, IssuedToken, SessionKeys, StoreVerifier};
pub use clock::{Clock, FixedClock, SystemClock};
pub use crypto::{CryptoError, MasterKey};
pub use domain::{BirthDate, DateRecord, User, UserUpdate};
pub use error::{CoreError, CoreResult};
pub use issuer::{Issuer, IssuerSettings, ModifiedProfile, Profile, ProfileChanges, Registration, SessionGrant};
pub use memory::{MemoryStore, OutboxGateway, SentMessage};
pub use ports::{CredentialStore, NotificationGateway, PortError, PortResult};
pub use scheduler::{Scheduler, TickReport};
