//! Durable per-viewer record of what a client currently has loaded.
//!
//! One [`ViewerCache`] exists per connected viewer, created at login and
//! discarded at logout. It is mutated exclusively by that viewer's
//! [`crate::engine::RevalidationEngine`]; the surrounding driver guarantees
//! that no two passes for the same viewer run concurrently, so the cache
//! needs no internal locking.

use std::collections::HashMap;

use crate::cell::{version_changed, CellDescriptor, CellId};

/// Update kinds pending for a cached cell relative to a fresh descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingUpdates {
    /// The transform version moved since last acknowledged.
    pub transform: bool,
    /// The content version moved since last acknowledged.
    pub content: bool,
}

impl PendingUpdates {
    /// Returns true if any update kind is pending.
    #[must_use]
    pub const fn any(self) -> bool {
        self.transform || self.content
    }
}

/// Record of a single cell on a viewer's client: the version counters last
/// acknowledged-sent. Two refs with the same id refer to the same cell
/// regardless of versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    id: CellId,
    transform_version: u64,
    content_version: u64,
}

impl CellRef {
    /// Creates a ref recording the descriptor's current versions, i.e. the
    /// state the client will have once the corresponding LOAD is delivered.
    #[must_use]
    pub fn record(desc: &CellDescriptor) -> Self {
        Self {
            id: desc.id,
            transform_version: desc.transform_version,
            content_version: desc.content_version,
        }
    }

    /// The referenced cell id.
    #[must_use]
    pub const fn id(&self) -> CellId {
        self.id
    }

    /// Transform version last acknowledged-sent.
    #[must_use]
    pub const fn transform_version(&self) -> u64 {
        self.transform_version
    }

    /// Content version last acknowledged-sent.
    #[must_use]
    pub const fn content_version(&self) -> u64 {
        self.content_version
    }

    /// Which update kinds `desc` carries relative to the acknowledged state.
    #[must_use]
    pub fn diff(&self, desc: &CellDescriptor) -> PendingUpdates {
        PendingUpdates {
            transform: version_changed(self.transform_version, desc.transform_version),
            content: version_changed(self.content_version, desc.content_version),
        }
    }

    /// Stores the descriptor's versions as acknowledged-sent, so an
    /// unchanged descriptor on the next pass diffs clean.
    pub fn acknowledge(&mut self, desc: &CellDescriptor) {
        self.transform_version = desc.transform_version;
        self.content_version = desc.content_version;
    }
}

/// Mapping from cell id to [`CellRef`], scoped to one viewer session.
///
/// The root anchor cell is seeded at construction and is never subject to
/// visibility-driven removal.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerCache {
    root: CellId,
    cells: HashMap<CellId, CellRef>,
}

impl ViewerCache {
    /// Creates a cache pre-seeded with the root anchor cell.
    #[must_use]
    pub fn new(root: &CellDescriptor) -> Self {
        let mut cells = HashMap::new();
        cells.insert(root.id, CellRef::record(root));
        Self {
            root: root.id,
            cells,
        }
    }

    /// The pre-seeded root anchor id.
    #[must_use]
    pub const fn root(&self) -> CellId {
        self.root
    }

    /// Looks up the ref for a cell id.
    #[must_use]
    pub fn get(&self, id: CellId) -> Option<&CellRef> {
        self.cells.get(&id)
    }

    /// Mutable lookup, used to acknowledge versions in place.
    pub fn get_mut(&mut self, id: CellId) -> Option<&mut CellRef> {
        self.cells.get_mut(&id)
    }

    /// Inserts or replaces the ref for its cell id.
    pub fn insert(&mut self, cell: CellRef) {
        self.cells.insert(cell.id(), cell);
    }

    /// Removes and returns the ref for a cell id, if present.
    pub fn remove(&mut self, id: CellId) -> Option<CellRef> {
        self.cells.remove(&id)
    }

    /// Returns true if the cache holds a ref for the id.
    #[must_use]
    pub fn contains(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    /// Number of cached cells, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if the cache is empty. Never true in practice since the
    /// root is seeded at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Point-in-time copy of the cached ids, sorted for deterministic
    /// iteration. Mutations after the call do not affect the returned set.
    #[must_use]
    pub fn snapshot_ids(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self.cells.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;
    use crate::cell::{BoundingSphere, CellTransform};

    fn descriptor(id: u64, tv: u64, cv: u64) -> CellDescriptor {
        CellDescriptor {
            id: CellId::new(id),
            parent: None,
            local_bounds: BoundingSphere::new(Point3::origin(), 1.0),
            transform: CellTransform::identity(),
            transform_version: tv,
            content_version: cv,
            movable: false,
            content: serde_json::Value::Null,
        }
    }

    #[test]
    fn cache_is_seeded_with_root() {
        let cache = ViewerCache::new(&descriptor(0, 1, 1));
        assert_eq!(cache.root(), CellId::new(0));
        assert!(cache.contains(CellId::new(0)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn diff_tracks_each_counter_independently() {
        let cell = CellRef::record(&descriptor(5, 1, 1));

        let moved = descriptor(5, 2, 1);
        assert_eq!(
            cell.diff(&moved),
            PendingUpdates {
                transform: true,
                content: false
            }
        );

        let reconfigured = descriptor(5, 1, 2);
        assert_eq!(
            cell.diff(&reconfigured),
            PendingUpdates {
                transform: false,
                content: true
            }
        );

        assert!(!cell.diff(&descriptor(5, 1, 1)).any());
    }

    #[test]
    fn acknowledge_clears_pending_updates() {
        let mut cell = CellRef::record(&descriptor(5, 1, 1));
        let newer = descriptor(5, 3, 2);
        assert!(cell.diff(&newer).any());

        cell.acknowledge(&newer);
        assert!(!cell.diff(&newer).any());
        assert_eq!(cell.transform_version(), 3);
        assert_eq!(cell.content_version(), 2);
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let mut cache = ViewerCache::new(&descriptor(0, 1, 1));
        cache.insert(CellRef::record(&descriptor(3, 1, 1)));

        let snapshot = cache.snapshot_ids();
        cache.insert(CellRef::record(&descriptor(9, 1, 1)));
        cache.remove(CellId::new(3));

        assert_eq!(snapshot, vec![CellId::new(0), CellId::new(3)]);
    }

    #[test]
    fn remove_returns_the_evicted_ref() {
        let mut cache = ViewerCache::new(&descriptor(0, 1, 1));
        cache.insert(CellRef::record(&descriptor(4, 7, 2)));

        let evicted = cache.remove(CellId::new(4)).expect("present");
        assert_eq!(evicted.transform_version(), 7);
        assert!(cache.remove(CellId::new(4)).is_none());
    }
}
