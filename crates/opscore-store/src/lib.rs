// crates/opscore-store/src/lib.rs
// ============================================================================
// Module: Ops Core Transactional Store
// Description: Connection pool, transactions, advisory locks, the event
//              store, and the projector registry.
// Purpose: Give every write path in the workspace one place to append an
//          event and apply its projectors atomically.
// Dependencies: crate::{db, events, projectors, watermark, catchup}
// ============================================================================

//! ## Overview
//! `opscore-store` is the only crate that touches SQLite directly. It
//! exposes [`db::Database`] (C1), [`events::append_to_stream`] (C2), and the
//! [`projectors`] registry (C3). Every other crate in the workspace depends
//! on this one to persist state; none of them hold a `rusqlite::Connection`
//! directly.

pub mod catchup;
pub mod db;
pub mod events;
pub mod projectors;
pub mod watermark;

pub use catchup::CatchUpWorker;
pub use catchup::DeadLetterEntry;
pub use db::AdvisoryLockGuard;
pub use db::Database;
pub use db::DatabaseConfig;
pub use db::StoreError;
pub use events::EventStoreError;
pub use events::append_to_stream;
pub use events::ensure_schema as ensure_event_schema;
pub use projectors::EventKind;
pub use projectors::ProjectorError;
pub use projectors::ProjectorRegistry;
pub use watermark::Watermark;
