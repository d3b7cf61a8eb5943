//! Unitflow - persistent lifecycle management for installable worker units.
//!
//! This library fetches candidate worker units over HTTP, streams their
//! bodies into a persisted content store while hashing them, deduplicates
//! against previously stored content, and drives each unit through the
//! install/activate state machine with rollback-on-failure semantics.
//!
//! # Architecture
//!
//! - [`stream`] - closable chunk relay with bounded-buffer backpressure,
//!   the ingestion primitive for network bodies and local files
//! - [`store`] - SQLite-backed store for unit and registration rows with
//!   serialized connection access and streamed blob writes
//! - [`unit`] - the in-memory projection of one installable unit version
//! - [`registration`] - slot bookkeeping plus the process-wide identity
//!   registry keyed by scope
//! - [`fetch`] / [`dispatch`] - collaborator seams for the HTTP transport
//!   and the lifecycle event engine
//! - [`lifecycle`] - the orchestration layer tying it all together
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use unitflow::dispatch::NullDispatcher;
//! use unitflow::fetch::HttpFetcher;
//! use unitflow::lifecycle::LifecycleManager;
//! use unitflow::store::ContentStore;
//!
//! let store = Arc::new(ContentStore::open("units.db")?);
//! let manager = LifecycleManager::new(
//!     store,
//!     Arc::new(HttpFetcher::new()?),
//!     Arc::new(NullDispatcher),
//! );
//! manager.register("https://app.example/", "https://app.example/worker.js").await?;
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod registration;
pub mod store;
pub mod stream;
pub mod unit;

pub use error::LifecycleError;
pub use lifecycle::{LifecycleManager, ManagerConfig, UnregisterPolicy};
pub use registration::{Registration, RegistrationRegistry, SlotKind};
pub use store::ContentStore;
pub use stream::ByteStream;
pub use unit::{ContentHash, Headers, InstallState, UnitId, UnitRecord};

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
