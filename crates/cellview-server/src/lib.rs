//! Server runtime for per-viewer cell cache synchronization.
//!
//! Hosts the runtime side of the `cellview-core` decision core: one tokio
//! task per connected viewer running the periodic revalidation loop, channel
//! transports whose teardown silently drops late messages, an in-memory
//! world implementing the core's collaborator traits, and Prometheus metrics
//! for the whole subsystem.
//!
//! - [`session`]: login/logout lifecycle, the per-viewer task, transports.
//! - [`world`]: reference world model and access policies.
//! - [`metrics`]: session, tick, and delivery counters.

pub mod metrics;
pub mod session;
pub mod world;

pub use metrics::{CacheMetrics, MetricsError, MetricsRegistry};
pub use session::{SessionError, SessionHandle, SessionRegistry, ViewerPose, WorldHandles};
pub use world::{DenyList, OpenAccess, WorldIndex};
