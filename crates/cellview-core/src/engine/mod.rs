//! Per-tick visibility diffing and change classification.
//!
//! One [`RevalidationEngine`] exists per connected viewer and owns that
//! viewer's [`ViewerCache`]. Each pass queries the current visible set,
//! filters it through the access policy, diffs it against the cache, and
//! produces an ordered list of [`CellOp`]s for the delivery scheduler.
//!
//! # Transactionality
//!
//! A pass stages all cache mutations on a working copy and swaps it in only
//! after the whole diff succeeds. If the visibility query or the access
//! policy fails mid-pass, the error propagates and the cache is left exactly
//! as it was, so the next tick retries from a consistent state.
//!
//! # Ordering
//!
//! Loads and updates are emitted in visibility-query order; removals follow,
//! sorted by cell id. A cell can never be both loaded and removed in the
//! same pass: loads only fire for ids absent from the cache, removals only
//! for cached ids absent from the visible set.

use std::collections::HashSet;

use nalgebra::Point3;
use tracing::{debug, trace};

use crate::cache::{CellRef, ViewerCache};
use crate::cell::{BoundingSphere, CellDescriptor, CellId};
use crate::error::{QueryError, RevalidationError};
use crate::op::CellOp;
use crate::viewer::ViewerId;


/// Spatial query engine collaborator: reports the cells currently visible
/// from a region.
pub trait VisibilityQuery {
    /// Returns a consistent snapshot of the cells visible from `region`.
    ///
    /// May silently omit cells it cannot currently resolve; a hard failure
    /// aborts the caller's revalidation pass.
    ///
    /// # Errors
    ///
    /// Returns a transient [`QueryError`] if the query cannot be answered.
    fn visible_cells(
        &self,
        anchor: CellId,
        region: &BoundingSphere,
    ) -> Result<Vec<CellDescriptor>, QueryError>;
}

/// Access control collaborator: a side-effect-free view permission check.
pub trait AccessPolicy {
    /// Returns whether `viewer` may see `cell`.
    ///
    /// # Errors
    ///
    /// Returns a transient [`QueryError`] if the policy cannot be evaluated.
    fn can_view(&self, viewer: &ViewerId, cell: &CellDescriptor) -> Result<bool, QueryError>;
}

/// Object graph collaborator: existence check used at delivery time to
/// distinguish a cell that left visibility from one that was deleted.
pub trait ObjectDirectory {
    /// Returns true if the object still exists in the authoritative world.
    fn exists(&self, id: CellId) -> bool;
}

/// The collaborators one pass reads from, passed down explicitly rather
/// than reached through ambient state.
#[derive(Clone, Copy)]
pub struct WorldAccess<'a> {
    /// Spatial visibility queries.
    pub visibility: &'a dyn VisibilityQuery,
    /// Per-viewer view permission.
    pub access: &'a dyn AccessPolicy,
    /// Object existence lookups.
    pub directory: &'a dyn ObjectDirectory,
}

/// Counters describing one revalidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Cells returned by the visibility query.
    pub visible: usize,
    /// Cells skipped because the access policy denied them.
    pub denied: usize,
    /// Load operations classified.
    pub loads: usize,
    /// Move and content-update operations classified.
    pub updates: usize,
    /// Remove operations classified.
    pub removes: usize,
}

impl TickStats {
    /// Total operations classified in the pass.
    #[must_use]
    pub const fn ops(&self) -> usize {
        self.loads + self.updates + self.removes
    }
}

/// Result of one successful revalidation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Classified operations in delivery order.
    pub ops: Vec<CellOp>,
    /// Pass counters for logging and metrics.
    pub stats: TickStats,
}

/// Diffs a viewer's visible set against its cache, once per tick.
#[derive(Debug)]
pub struct RevalidationEngine {
    viewer: ViewerId,
    proximity_radius: f32,
    cache: ViewerCache,
}

impl RevalidationEngine {
    /// Creates an engine for `viewer` with a cache pre-seeded from the root
    /// anchor descriptor.
    #[must_use]
    pub fn new(viewer: ViewerId, proximity_radius: f32, root: &CellDescriptor) -> Self {
        Self {
            viewer,
            proximity_radius,
            cache: ViewerCache::new(root),
        }
    }

    /// The viewer this engine serves.
    #[must_use]
    pub fn viewer(&self) -> &ViewerId {
        &self.viewer
    }

    /// Read access to the viewer's cache.
    #[must_use]
    pub fn cache(&self) -> &ViewerCache {
        &self.cache
    }

    /// The proximity region for a viewer position. Deterministic in the
    /// position: a sphere of the configured radius centered on it.
    #[must_use]
    pub fn proximity_region(&self, position: Point3<f32>) -> BoundingSphere {
        BoundingSphere::new(position, self.proximity_radius)
    }

    /// Runs one revalidation pass from the given observation point.
    ///
    /// On success the cache reflects every classified operation as sent and
    /// the returned ops are ready for the delivery scheduler. On error the
    /// cache is untouched.
    ///
    /// # Errors
    ///
    /// Propagates transient collaborator failures as [`RevalidationError`];
    /// the caller should log and retry on the next tick.
    pub fn revalidate(
        &mut self,
        position: Point3<f32>,
        world: WorldAccess<'_>,
    ) -> Result<TickOutcome, RevalidationError> {
        let region = self.proximity_region(position);
        let visible = world
            .visibility
            .visible_cells(self.cache.root(), &region)
            .map_err(RevalidationError::Visibility)?;

        let mut stats = TickStats {
            visible: visible.len(),
            ..TickStats::default()
        };

        // All mutations land on the staged copy; it replaces the live cache
        // only once the pass has fully succeeded.
        let mut staged = self.cache.clone();

        // Every previously known cell starts as a removal candidate, except
        // the root anchor, which is never removed by visibility.
        let mut candidates: HashSet<CellId> = staged
            .snapshot_ids()
            .into_iter()
            .filter(|id| *id != staged.root())
            .collect();

        let mut ops = Vec::new();
        for desc in &visible {
            let allowed = world
                .access
                .can_view(&self.viewer, desc)
                .map_err(|source| RevalidationError::Access {
                    cell: desc.id,
                    source,
                })?;
            if !allowed {
                // Denied cells are treated as not visible at all: no entry
                // is created and no removal is triggered for a cell the
                // viewer never had.
                trace!(viewer = %self.viewer, cell = %desc.id, "access denied, skipping");
                stats.denied += 1;
                continue;
            }

            if let Some(cached) = staged.get_mut(desc.id) {
                let pending = cached.diff(desc);
                if pending.transform && !desc.movable {
                    // Movable cells push their own transforms over an
                    // independent fast channel; re-pushing here would race
                    // with it.
                    ops.push(CellOp::Move {
                        id: desc.id,
                        transform: desc.transform.clone(),
                    });
                    stats.updates += 1;
                }
                if pending.content {
                    ops.push(CellOp::UpdateContent {
                        id: desc.id,
                        content: desc.content.clone(),
                    });
                    stats.updates += 1;
                }
                cached.acknowledge(desc);
                candidates.remove(&desc.id);
            } else {
                trace!(viewer = %self.viewer, cell = %desc.id, "entering view");
                staged.insert(CellRef::record(desc));
                ops.push(CellOp::Load(desc.clone()));
                stats.loads += 1;
            }
        }

        // Whatever was known but not matched against the visible set has
        // left this viewer's view.
        let mut departed: Vec<CellId> = candidates.into_iter().collect();
        departed.sort_unstable();
        for id in departed {
            // A cell loaded in this pass was absent from the cache, so it
            // cannot also be a removal candidate. Anything else is a bug in
            // the diff above.
            debug_assert!(
                !ops.iter()
                    .any(|op| matches!(op, CellOp::Load(desc) if desc.id == id)),
                "cell {id} classified as both load and remove in one pass"
            );
            trace!(viewer = %self.viewer, cell = %id, "leaving view");
            staged.remove(id);
            ops.push(CellOp::Remove { id });
            stats.removes += 1;
        }

        self.cache = staged;

        if stats.ops() > 0 {
            debug!(
                viewer = %self.viewer,
                visible = stats.visible,
                denied = stats.denied,
                loads = stats.loads,
                updates = stats.updates,
                removes = stats.removes,
                "revalidation pass classified changes"
            );
        }

        Ok(TickOutcome { ops, stats })
    }
}
