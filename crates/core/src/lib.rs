//! Job-listing monitor: credential lifecycle, listings poll and alert delivery.
//!
//! ```text
//! HeadlessSession ─▶ TokenExtractor ─▶ TokenManager ─▶ PollEngine ─▶ SeenSet ─▶ AlertDispatcher
//! ```
//!
//! The listings API only accepts a bearer credential minted client-side by the
//! target site. [`extractor::TokenExtractor`] harvests it from a headless
//! browser, [`lifecycle::TokenManager`] keeps it fresh with single-flight
//! renewal, and [`poller::PollEngine`] queries the API every tick and hands new
//! postings to [`dispatch::AlertDispatcher`].

pub mod config;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod health;
pub mod lifecycle;
pub mod listings;
pub mod monitor;
pub mod poller;
pub mod seen;

pub use config::{SeenPolicy, WatchConfig};
pub use credential::{Credential, ExpiryBasis, TokenOrigin};
pub use dispatch::{AlertDispatcher, DeliveryReport, Messenger, TelegramMessenger};
pub use error::{Result, WatchError};
pub use extractor::{CredentialProvider, CredentialVerifier, StorageProvider, TokenExtractor};
pub use lifecycle::{TokenManager, TokenPhase, TokenStatus};
pub use listings::{Listing, ListingsClient};
pub use monitor::Monitor;
pub use poller::{PollCycleResult, PollEngine};
pub use seen::SeenSet;
