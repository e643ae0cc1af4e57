//! Per-viewer session lifecycle and the periodic revalidation loop.
//!
//! Each logged-in viewer gets one tokio task owning that viewer's
//! [`RevalidationEngine`]. The task is the cache's only writer, so no lock
//! protects the cache itself. Login preloads the root anchor cell and starts
//! the task; logout severs delivery first and then asks the task to stop, so
//! a pass already in flight completes its diff but sends nothing.
//!
//! ```text
//! login ──> preload root ──> spawn task ──┐
//!                                         │  every tick:
//!                                         │    revalidate ─> deliver
//! logout ─> close transport ─> shutdown ──┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cellview_core::{
    scheduler_for, AccessPolicy, CacheConfig, CellDescriptor, CellMessage, MessageSink,
    ObjectDirectory, RevalidationEngine, ViewerId, VisibilityQuery, WorldAccess,
};
use nalgebra::Point3;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::CacheMetrics;


/// Errors from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The viewer already has a running session.
    #[error("viewer {0} already has an active session")]
    AlreadyActive(ViewerId),
}

/// Shared handles to the world collaborators a session reads from.
#[derive(Clone)]
pub struct WorldHandles {
    /// Spatial visibility queries.
    pub visibility: Arc<dyn VisibilityQuery + Send + Sync>,
    /// Per-viewer view permission.
    pub access: Arc<dyn AccessPolicy + Send + Sync>,
    /// Object existence lookups.
    pub directory: Arc<dyn ObjectDirectory + Send + Sync>,
}

impl WorldHandles {
    /// Borrows the handles as the engine's per-pass collaborator view.
    #[must_use]
    pub fn world_access(&self) -> WorldAccess<'_> {
        WorldAccess {
            visibility: &*self.visibility,
            access: &*self.access,
            directory: &*self.directory,
        }
    }
}

/// A viewer's last reported observation point, written by the connection
/// layer and read once per tick by the session task.
#[derive(Clone, Debug)]
pub struct ViewerPose {
    position: Arc<RwLock<Point3<f32>>>,
}

impl ViewerPose {
    fn new(position: Point3<f32>) -> Self {
        Self {
            position: Arc::new(RwLock::new(position)),
        }
    }

    /// Updates the observation point.
    pub fn set(&self, position: Point3<f32>) {
        *self
            .position
            .write()
            .unwrap_or_else(PoisonError::into_inner) = position;
    }

    /// The current observation point.
    #[must_use]
    pub fn get(&self) -> Point3<f32> {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outbound transport for one viewer, backed by an unbounded channel.
///
/// The `closed` flag is flipped before shutdown is requested, so a tick
/// already past the shutdown check cannot deliver to a logged-out viewer.
/// Dropped messages are counted, never surfaced as errors.
struct ChannelTransport {
    tx: mpsc::UnboundedSender<CellMessage>,
    closed: Arc<AtomicBool>,
    metrics: CacheMetrics,
}

impl MessageSink for ChannelTransport {
    fn send(&self, message: CellMessage) -> bool {
        if self.closed.load(Ordering::Acquire) || self.tx.send(message).is_err() {
            self.metrics.message_dropped();
            return false;
        }
        self.metrics.message_sent();
        true
    }
}

/// Client-side end of a session: where the viewer's messages arrive and how
/// its observation point is reported.
#[derive(Debug)]
pub struct SessionHandle {
    /// The viewer this session serves.
    pub viewer: ViewerId,
    /// Writable observation point for the connection layer.
    pub pose: ViewerPose,
    /// Ordered stream of outbound cache messages.
    pub messages: mpsc::UnboundedReceiver<CellMessage>,
}

struct ActiveSession {
    shutdown: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Tracks active sessions and runs one revalidation task per viewer.
pub struct SessionRegistry {
    world: WorldHandles,
    root: CellDescriptor,
    config: CacheConfig,
    metrics: CacheMetrics,
    active: Mutex<HashMap<ViewerId, ActiveSession>>,
}

impl SessionRegistry {
    /// Creates a registry serving sessions against the given world, with
    /// `root` as every viewer's permanent anchor cell.
    #[must_use]
    pub fn new(
        world: WorldHandles,
        root: CellDescriptor,
        config: CacheConfig,
        metrics: CacheMetrics,
    ) -> Self {
        Self {
            world,
            root,
            config,
            metrics,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<ViewerId, ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions().len()
    }

    /// Starts a session for `viewer` at the given observation point.
    ///
    /// The root anchor cell is delivered synchronously before the first
    /// periodic pass, so a client always holds it from the moment login
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyActive`] if the viewer already has a
    /// running session.
    pub fn login(
        &self,
        viewer: ViewerId,
        position: Point3<f32>,
    ) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&viewer) {
            return Err(SessionError::AlreadyActive(viewer));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = ChannelTransport {
            tx,
            closed: Arc::clone(&closed),
            metrics: self.metrics.clone(),
        };

        transport.send(CellMessage::Load {
            id: self.root.id,
            parent: self.root.parent,
            bounds: self.root.local_bounds,
            transform: self.root.transform.clone(),
            content: self.root.content.clone(),
        });

        let pose = ViewerPose::new(position);
        let engine = RevalidationEngine::new(
            viewer.clone(),
            self.config.proximity_radius,
            &self.root,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            engine,
            pose.clone(),
            self.world.clone(),
            self.config.clone(),
            transport,
            self.metrics.clone(),
            shutdown_rx,
        ));

        self.metrics.session_started();
        info!(viewer = %viewer, "session started");
        sessions.insert(
            viewer.clone(),
            ActiveSession {
                shutdown: shutdown_tx,
                closed,
                task,
            },
        );

        Ok(SessionHandle {
            viewer,
            pose,
            messages: rx,
        })
    }

    /// Ends a viewer's session, waiting for its task to finish.
    ///
    /// Delivery is severed before the task is asked to stop, so a pass in
    /// flight completes its cache update but nothing reaches the viewer
    /// after this call starts. Returns false if no session was active.
    pub async fn logout(&self, viewer: &ViewerId) -> bool {
        let Some(session) = self.sessions().remove(viewer) else {
            debug!(viewer = %viewer, "logout for unknown viewer");
            return false;
        };

        session.closed.store(true, Ordering::Release);
        // An Err means the task already exited; joining below is still fine.
        let _ = session.shutdown.send(true);
        if session.task.await.is_err() {
            warn!(viewer = %viewer, "session task panicked before logout");
        }

        self.metrics.session_ended();
        info!(viewer = %viewer, "session ended");
        true
    }

    /// Ends every active session.
    pub async fn shutdown(&self) {
        let viewers: Vec<ViewerId> = self.sessions().keys().cloned().collect();
        for viewer in viewers {
            self.logout(&viewer).await;
        }
    }
}

/// The per-viewer periodic task: sleep, revalidate, deliver, repeat.
///
/// A failed pass is logged and retried on the next tick; the engine
/// guarantees the cache was untouched. A tick that overruns the period
/// delays subsequent ticks rather than bunching them.
async fn run_session(
    mut engine: RevalidationEngine,
    pose: ViewerPose,
    world: WorldHandles,
    config: CacheConfig,
    transport: ChannelTransport,
    metrics: CacheMetrics,
    mut shutdown: watch::Receiver<bool>,
) {
    let scheduler = scheduler_for(config.delivery);
    let mut ticker = interval_at(
        Instant::now() + config.initial_delay(),
        config.tick_interval(),
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A send of `true` or a dropped sender both end the task.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match engine.revalidate(pose.get(), world.world_access()) {
                    Ok(outcome) => {
                        metrics.tick_completed();
                        if !outcome.ops.is_empty() {
                            let accepted = scheduler.deliver(
                                &outcome.ops,
                                &*world.directory,
                                &transport,
                            );
                            debug!(
                                viewer = %engine.viewer(),
                                ops = outcome.stats.ops(),
                                accepted,
                                "delivered revalidation changes"
                            );
                        }
                    }
                    Err(error) => {
                        metrics.tick_failed();
                        warn!(
                            viewer = %engine.viewer(),
                            %error,
                            "revalidation pass failed, retrying next tick"
                        );
                    }
                }
            }
        }
    }

    debug!(viewer = %engine.viewer(), cached = engine.cache().len(), "session task stopped");
}
