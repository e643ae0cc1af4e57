//! Cell identity and per-query descriptor snapshots.
//!
//! A [`CellDescriptor`] is an ephemeral snapshot of one world object as
//! reported by the visibility query at a point in time. The only durable
//! record this subsystem keeps is the per-viewer [`crate::cache::CellRef`],
//! which stores the version counters last acknowledged-sent to a client.

use std::fmt;

use nalgebra::{Point3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Stable identifier for a world cell.
///
/// Ids are unique within a world and are never reused for a different
/// object, so an id observed after a delete always refers to the same
/// (now gone) object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CellId(u64);

impl CellId {
    /// Creates a cell id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}

/// Position and orientation of a cell in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTransform {
    /// World-space position.
    pub translation: Point3<f32>,
    /// World-space orientation.
    pub rotation: UnitQuaternion<f32>,
    /// Uniform scale factor.
    pub scale: f32,
}

impl CellTransform {
    /// Identity transform at the world origin.
    #[must_use]
    pub fn identity() -> Self {
        Self::from_translation(Point3::origin())
    }

    /// Transform with the given position and no rotation or scaling.
    #[must_use]
    pub fn from_translation(translation: Point3<f32>) -> Self {
        Self {
            translation,
            rotation: UnitQuaternion::identity(),
            scale: 1.0,
        }
    }
}

/// Sphere used both for cell extents and viewer proximity regions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    /// Sphere center.
    pub center: Point3<f32>,
    /// Sphere radius, world units.
    pub radius: f32,
}

impl BoundingSphere {
    /// Creates a sphere with the given center and radius.
    #[must_use]
    pub const fn new(center: Point3<f32>, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Returns true if the two spheres overlap or touch.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        nalgebra::distance(&self.center, &other.center) <= self.radius + other.radius
    }
}

/// Snapshot of one world object as seen by a visibility query.
///
/// Descriptors are produced fresh for every query and discarded after the
/// revalidation pass that consumed them. The two version counters advance
/// independently: `transform_version` whenever the object moves,
/// `content_version` whenever its non-spatial setup data changes. Both are
/// non-decreasing across any two observations of the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDescriptor {
    /// Stable identity of the object.
    pub id: CellId,
    /// Parent cell for client-side hierarchy reconstruction, if any.
    pub parent: Option<CellId>,
    /// Spatial extent in local coordinates.
    pub local_bounds: BoundingSphere,
    /// Position and orientation in world coordinates.
    pub transform: CellTransform,
    /// Incremented by the authoritative object on every transform change.
    pub transform_version: u64,
    /// Incremented on every change to the object's setup/configuration data.
    pub content_version: u64,
    /// Movable cells push transform changes over their own fast channel, so
    /// this subsystem must not redundantly push transform updates for them.
    pub movable: bool,
    /// Opaque setup data delivered with LOAD and UPDATE_CONTENT messages.
    pub content: serde_json::Value,
}

impl CellDescriptor {
    /// Spatial extent in world coordinates: the local bounds centered on the
    /// current world translation.
    #[must_use]
    pub fn world_bounds(&self) -> BoundingSphere {
        let offset = self.local_bounds.center.coords + self.transform.translation.coords;
        BoundingSphere::new(Point3::from(offset), self.local_bounds.radius * self.transform.scale)
    }
}

/// Compares two version counter observations.
///
/// Versions carry no ordering contract for consumers: the question is only
/// "has this changed since last observed", so the comparison is strict
/// inequality rather than `<`.
#[must_use]
pub const fn version_changed(last_acknowledged: u64, observed: u64) -> bool {
    last_acknowledged != observed
}
