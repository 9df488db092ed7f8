//! Naming Server --- the coordinator for a distributed file system (§1).
//!
//! Clients and storage servers both speak the fixed-layout protocol in
//! [`wire`]. The naming server holds no file bytes itself; it tracks who
//! owns what, who may read or write it, which storage server is
//! authoritative for it, and routes clients there.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod metadata;
pub mod persistence;
pub mod session;
pub mod ss;
pub mod wire;

pub use dispatch::NamingServer;
pub use error::{NsError, Result};
