//! Annotator sync core - offline-resilient persistence and synchronization
//! for collaborative spreadsheet annotation.
//!
//! Local edits land in an in-memory [`annotations::AnnotationStore`], are
//! flushed to a durable [`local_store::LocalStore`], and are replayed against
//! the remote REST API by the operation queue actor whenever the
//! connectivity monitor sees the network.

pub mod actors;
pub mod annotations;
pub mod config;
pub mod conflicts;
pub mod engine;
pub mod local_store;
pub mod remote_api;

pub use config::SyncConfig;
pub use engine::{EngineError, OpenProject, SyncEngine};
