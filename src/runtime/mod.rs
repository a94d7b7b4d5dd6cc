//! Async file-store runtime with serialized commits and event stream APIs.

/// Event stream types emitted by the runtime.
pub mod events;
/// Store handle, commit path and persistence worker.
pub mod handle;

pub use events::StoreEvent;
pub use handle::{FileStoreHandle, RuntimeError, StoreConfig, spawn_file_store};
