//! Revision control for collaboratively edited documents.
//!
//! Edits are deltas in an operational-transformation algebra ([`ot`]); each
//! committed change lands in a content-addressed, versioned file store
//! ([`file`]) through a transaction whose predicates assert the revision the
//! change was built on. The store runtime ([`runtime`]) serializes commits,
//! journals them through an optional SQLite sink ([`persist`]) and lets
//! transactions wait for later revisions. [`doc`] ties one OT kind to one
//! store.
//!
//! # Examples
//!
//! Composing property deltas:
//! ```
//! use otstore::ot::{
//!     Delta,
//!     property::{PropertyDelta, PropertyOp},
//! };
//!
//! let d1: PropertyDelta = Delta::new(vec![
//!     PropertyOp::set("a", "1").expect("set"),
//!     PropertyOp::set("b", "2").expect("set"),
//! ]);
//! let d2: PropertyDelta = Delta::new(vec![PropertyOp::delete("b").expect("delete")]);
//! let doc = d1.compose(&d2, true);
//! assert_eq!(doc.ops(), &[PropertyOp::set("a", "1").expect("set")]);
//! ```
//!
//! Committing a change with an optimistic revision check:
//! ```no_run
//! use otstore::{
//!     doc::{DocConfig, DocControl},
//!     ot::{Change, Delta, property::PropertyOp},
//!     persist::sqlite::SqliteRevisionSink,
//!     runtime::{StoreConfig, spawn_file_store},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteRevisionSink::open("doc.db").expect("open sqlite");
//! let initial = sink.load_snapshot().expect("load");
//! let store = spawn_file_store(initial, Some(Box::new(sink)), StoreConfig::default());
//! let doc = DocControl::<PropertyOp>::new(store.clone(), DocConfig::default()).expect("layout");
//! if !doc.exists() {
//!     doc.create().await.expect("create");
//! }
//! let next = doc.rev_num().expect("rev") + 1;
//! let delta = Delta::new(vec![PropertyOp::set("title", "Notes").expect("set")]);
//! doc.append_change(Change::new(next, delta)).await.expect("append");
//! store.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Document control: change log, snapshots and appends for one document.
pub mod doc;
/// Content-addressed file storage, predicates and transactions.
pub mod file;
/// Operational-transformation algebra and its three op kinds.
pub mod ot;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// File-store runtime handle and events.
pub mod runtime;
/// Async mutex, condition and single-flight primitives.
pub mod sync;
/// Shared primitive types.
pub mod types;
