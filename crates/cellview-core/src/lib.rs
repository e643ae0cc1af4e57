//! Per-viewer incremental cache synchronization for a multi-user virtual
//! world.
//!
//! Every connected viewer has a client-side cache of world cells. The server
//! must continuously decide, per viewer, which cells are currently relevant,
//! diff that set against what the client already holds, and emit a minimal
//! correctly-ordered stream of load/move/update/unload/delete operations.
//! This crate implements that decision core, runtime-free:
//!
//! - [`cell`]: cell identity, spatial description, and the dual version
//!   counters (transform, content) compared by inequality only.
//! - [`cache`]: the durable per-viewer record of what a client has loaded.
//! - [`engine`]: the per-tick diff and change classification, transactional
//!   against collaborator failures.
//! - [`op`]: the closed operation set and structural message shapes.
//! - [`delivery`]: interchangeable strategies turning operations into
//!   per-operation or batched outbound messages.
//! - [`config`]: TOML-backed tuning for tick timing, proximity radius, and
//!   delivery mode.
//!
//! The spatial index, access decisions, and the authoritative object graph
//! are external collaborators consumed through the narrow traits in
//! [`engine`]; scheduling and transports live in the companion server crate.

pub mod cache;
pub mod cell;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod op;
pub mod viewer;

pub use cache::{CellRef, PendingUpdates, ViewerCache};
pub use cell::{version_changed, BoundingSphere, CellDescriptor, CellId, CellTransform};
pub use config::{CacheConfig, ConfigError, DeliveryMode};
pub use delivery::{
    scheduler_for, AggregatingScheduler, DeliveryScheduler, ImmediateScheduler, MessageSink,
    NoopScheduler,
};
pub use engine::{
    AccessPolicy, ObjectDirectory, RevalidationEngine, TickOutcome, TickStats, VisibilityQuery,
    WorldAccess,
};
pub use error::{QueryError, RevalidationError};
pub use op::{CellMessage, CellOp};
pub use viewer::ViewerId;
