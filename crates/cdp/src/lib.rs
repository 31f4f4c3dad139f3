//! Headless Chromium driver over the Chrome DevTools Protocol.
//!
//! The crate launches a throwaway Chromium process with remote debugging
//! enabled, attaches a single page target in flat session mode and exposes the
//! handful of operations the token extractor needs: navigate, let the page's
//! own scripts settle, and dump `localStorage`/`sessionStorage`.
//!
//! # Example
//!
//! ```ignore
//! let mut session = HeadlessSession::start(SessionOptions::default()).await?;
//! session.load_session("https://example.com/").await?;
//! let storage = session.read_storage().await?;
//! session.stop().await;
//! ```

pub mod connection;
pub mod discovery;
pub mod error;
mod finder;
pub mod launcher;
pub mod process;
pub mod session;
pub mod storage;

pub use connection::Connection;
pub use discovery::{CdpVersionInfo, EndpointDiscovery};
pub use error::{CdpError, Result};
pub use session::{HeadlessSession, SessionOptions};
pub use storage::StorageSnapshot;
