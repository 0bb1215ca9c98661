//! lotbook-core - Core library for Lotbook
//!
//! This crate contains the models, local store, remote backend seam, and the
//! offline-first sync engine used by the Lotbook CLI and apps.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod export;
pub mod media;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{RemoteConfig, SyncSettings};
pub use connectivity::ConnectivityMonitor;
pub use error::{Error, Result};
pub use media::{PhotoReference, PhotoResolver};
pub use models::{Company, Contact, Document, Entity, Lot, Photo, Sale, Table};
pub use remote::{HttpRemote, MemoryRemote, RemoteBackend};
pub use services::LocalStore;
pub use sync::{SyncOrchestrator, SyncStatusHub};
