//! Reference in-memory authoritative world model.
//!
//! The production spatial index and object graph are external collaborators;
//! this module implements the narrow interfaces the cache subsystem consumes
//! (`VisibilityQuery`, `ObjectDirectory`) over a plain read-mostly map, plus
//! the access policies used by the server and its tests. Gameplay code
//! mutates cells through the version-bumping methods here; the cache
//! subsystem only ever reads.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cellview_core::{
    AccessPolicy, BoundingSphere, CellDescriptor, CellId, CellTransform, ObjectDirectory,
    QueryError, ViewerId, VisibilityQuery,
};
use tracing::debug;

/// In-memory world: a map of cell descriptors keyed by id, readable
/// concurrently by every session task.
pub struct WorldIndex {
    root: CellId,
    cells: RwLock<HashMap<CellId, CellDescriptor>>,
}

impl WorldIndex {
    /// Creates a world containing only the root anchor cell.
    #[must_use]
    pub fn new(root: CellDescriptor) -> Self {
        let root_id = root.id;
        let mut cells = HashMap::new();
        cells.insert(root_id, root);
        Self {
            root: root_id,
            cells: RwLock::new(cells),
        }
    }

    // The map holds plain data, so a panic mid-write cannot leave it
    // logically inconsistent; recover the guard instead of propagating
    // poison to every session task.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CellId, CellDescriptor>> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CellId, CellDescriptor>> {
        self.cells.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The root anchor id.
    #[must_use]
    pub const fn root_id(&self) -> CellId {
        self.root
    }

    /// A snapshot of the root anchor descriptor.
    ///
    /// # Panics
    ///
    /// Never panics: the root is inserted at construction and cannot be
    /// removed.
    #[must_use]
    pub fn root_descriptor(&self) -> CellDescriptor {
        self.read()
            .get(&self.root)
            .cloned()
            .unwrap_or_else(|| unreachable!("root cell is permanent"))
    }

    /// Inserts or replaces a cell.
    pub fn insert(&self, cell: CellDescriptor) {
        self.write().insert(cell.id, cell);
    }

    /// Deletes a cell. The root anchor cannot be deleted.
    ///
    /// Returns true if the cell existed.
    pub fn remove(&self, id: CellId) -> bool {
        if id == self.root {
            debug!(cell = %id, "refusing to delete the root anchor");
            return false;
        }
        self.write().remove(&id).is_some()
    }

    /// Moves a cell, bumping its transform version.
    ///
    /// Returns false if the cell does not exist.
    pub fn move_cell(&self, id: CellId, transform: CellTransform) -> bool {
        let mut cells = self.write();
        let Some(cell) = cells.get_mut(&id) else {
            return false;
        };
        cell.transform = transform;
        cell.transform_version += 1;
        true
    }

    /// Replaces a cell's setup data, bumping its content version.
    ///
    /// Returns false if the cell does not exist.
    pub fn update_content(&self, id: CellId, content: serde_json::Value) -> bool {
        let mut cells = self.write();
        let Some(cell) = cells.get_mut(&id) else {
            return false;
        };
        cell.content = content;
        cell.content_version += 1;
        true
    }

    /// A snapshot of one cell's descriptor.
    #[must_use]
    pub fn descriptor(&self, id: CellId) -> Option<CellDescriptor> {
        self.read().get(&id).cloned()
    }

    /// Number of cells, including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Always false: the root anchor is permanent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl VisibilityQuery for WorldIndex {
    fn visible_cells(
        &self,
        _anchor: CellId,
        region: &BoundingSphere,
    ) -> Result<Vec<CellDescriptor>, QueryError> {
        let cells = self.read();
        let mut visible: Vec<CellDescriptor> = cells
            .values()
            .filter(|cell| cell.world_bounds().intersects(region))
            .cloned()
            .collect();
        // Map order is arbitrary; keep query results deterministic.
        visible.sort_unstable_by_key(|cell| cell.id);
        Ok(visible)
    }
}

impl ObjectDirectory for WorldIndex {
    fn exists(&self, id: CellId) -> bool {
        self.read().contains_key(&id)
    }
}

/// Grants every viewer access to every cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn can_view(&self, _viewer: &ViewerId, _cell: &CellDescriptor) -> Result<bool, QueryError> {
        Ok(true)
    }
}

/// Denies specific viewer/cell pairs; everything else is allowed.
#[derive(Debug, Default)]
pub struct DenyList {
    denied: RwLock<HashSet<(ViewerId, CellId)>>,
}

impl DenyList {
    /// Creates an empty deny list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies a viewer access to a cell.
    pub fn deny(&self, viewer: ViewerId, cell: CellId) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((viewer, cell));
    }

    /// Restores a viewer's access to a cell.
    pub fn allow(&self, viewer: &ViewerId, cell: CellId) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(viewer.clone(), cell));
    }
}

impl AccessPolicy for DenyList {
    fn can_view(&self, viewer: &ViewerId, cell: &CellDescriptor) -> Result<bool, QueryError> {
        let denied = self
            .denied
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(viewer.clone(), cell.id));
        Ok(!denied)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;

    fn cell_at(id: u64, x: f32) -> CellDescriptor {
        CellDescriptor {
            id: CellId::new(id),
            parent: Some(CellId::new(0)),
            local_bounds: BoundingSphere::new(Point3::origin(), 1.0),
            transform: CellTransform::from_translation(Point3::new(x, 0.0, 0.0)),
            transform_version: 1,
            content_version: 1,
            movable: false,
            content: serde_json::Value::Null,
        }
    }

    fn world() -> WorldIndex {
        WorldIndex::new(cell_at(0, 0.0))
    }

    #[test]
    fn visibility_is_filtered_by_region() {
        let world = world();
        world.insert(cell_at(1, 10.0));
        world.insert(cell_at(2, 500.0));

        let region = BoundingSphere::new(Point3::origin(), 50.0);
        let visible = world.visible_cells(world.root_id(), &region).expect("query");
        let ids: Vec<CellId> = visible.iter().map(|cell| cell.id).collect();
        assert_eq!(ids, vec![CellId::new(0), CellId::new(1)]);
    }

    #[test]
    fn mutators_bump_the_right_version() {
        let world = world();
        world.insert(cell_at(1, 10.0));

        assert!(world.move_cell(
            CellId::new(1),
            CellTransform::from_translation(Point3::new(12.0, 0.0, 0.0))
        ));
        let moved = world.descriptor(CellId::new(1)).expect("present");
        assert_eq!(moved.transform_version, 2);
        assert_eq!(moved.content_version, 1);

        assert!(world.update_content(CellId::new(1), serde_json::json!({"color": "red"})));
        let updated = world.descriptor(CellId::new(1)).expect("present");
        assert_eq!(updated.transform_version, 2);
        assert_eq!(updated.content_version, 2);

        assert!(!world.move_cell(CellId::new(9), CellTransform::identity()));
    }

    #[test]
    fn directory_reflects_removal() {
        let world = world();
        world.insert(cell_at(1, 10.0));
        assert!(world.exists(CellId::new(1)));
        assert!(world.remove(CellId::new(1)));
        assert!(!world.exists(CellId::new(1)));
    }

    #[test]
    fn root_anchor_cannot_be_removed() {
        let world = world();
        assert!(!world.remove(world.root_id()));
        assert!(world.exists(world.root_id()));
    }

    #[test]
    fn deny_list_scopes_to_viewer_and_cell() {
        let policy = DenyList::new();
        let alice = ViewerId::from("alice");
        let bob = ViewerId::from("bob");
        let cell = cell_at(1, 0.0);

        policy.deny(alice.clone(), cell.id);
        assert!(!policy.can_view(&alice, &cell).expect("policy"));
        assert!(policy.can_view(&bob, &cell).expect("policy"));

        policy.allow(&alice, cell.id);
        assert!(policy.can_view(&alice, &cell).expect("policy"));
    }
}
