use serde::{Deserialize, Serialize};

/// Number of distinct payload stream kinds.
pub const NUM_STREAM_KINDS: usize = 5;

/// Maximum depth of the undo and redo stacks; the oldest snapshot is
/// discarded when a push would exceed it.
pub const MAX_UNDO_DEPTH: usize = 10;

/// Kind tag for payloads flowing between filters.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum StreamKind {
    /// 3D point data (positions with a scalar value, e.g. mass).
    Points,
    /// 2D plot data (labelled xy series).
    Plot,
    /// Abstract 3D drawables (primitives/meshes for scene decoration).
    Draw,
    /// Regular voxel grid.
    Voxel,
    /// Range table (value intervals naming compositions).
    Range,
}

impl StreamKind {
    /// All kinds, in mask-bit order.
    pub const ALL: [StreamKind; NUM_STREAM_KINDS] = [
        StreamKind::Points,
        StreamKind::Plot,
        StreamKind::Draw,
        StreamKind::Voxel,
        StreamKind::Range,
    ];

    const fn bit(self) -> u8 {
        match self {
            StreamKind::Points => 1 << 0,
            StreamKind::Plot => 1 << 1,
            StreamKind::Draw => 1 << 2,
            StreamKind::Voxel => 1 << 3,
            StreamKind::Range => 1 << 4,
        }
    }
}

/// Bitset over [`StreamKind`]s, used for filter emit/block declarations
/// and their accumulated forms during seed computation.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct StreamMask(u8);

impl StreamMask {
    /// Mask containing no kinds.
    pub const EMPTY: StreamMask = StreamMask(0);
    /// Mask containing every kind.
    pub const ALL: StreamMask = StreamMask((1 << NUM_STREAM_KINDS as u8) - 1);

    /// Mask containing exactly `kind`.
    pub const fn only(kind: StreamKind) -> Self {
        StreamMask(kind.bit())
    }

    /// Return `true` when no kind is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Return `true` when `kind` is set.
    pub fn contains(self, kind: StreamKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Set union.
    pub fn union(self, other: StreamMask) -> StreamMask {
        StreamMask(self.0 | other.0)
    }

    /// Set intersection.
    pub fn intersect(self, other: StreamMask) -> StreamMask {
        StreamMask(self.0 & other.0)
    }

    /// Complement within the universe of defined kinds.
    pub fn complement(self) -> StreamMask {
        StreamMask(!self.0 & Self::ALL.0)
    }

    /// Remove `other`'s kinds from this mask.
    pub fn minus(self, other: StreamMask) -> StreamMask {
        StreamMask(self.0 & !other.0)
    }

    /// Iterate the kinds set in this mask, in bit order.
    pub fn kinds(self) -> impl Iterator<Item = StreamKind> {
        StreamKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl std::ops::BitOr for StreamMask {
    type Output = StreamMask;
    fn bitor(self, rhs: StreamMask) -> StreamMask {
        self.union(rhs)
    }
}

impl From<StreamKind> for StreamMask {
    fn from(kind: StreamKind) -> Self {
        StreamMask::only(kind)
    }
}

/// Stable identifier of a node in a [`FilterTree`](crate::tree::FilterTree).
///
/// Ids survive tree clones, undo and redo: snapshots copy the underlying
/// slab layout verbatim, so a live id keeps addressing the corresponding
/// node in the restored tree.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId {
    pub(crate) idx: u32,
    pub(crate) r#gen: u32,
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}.{}", self.idx, self.r#gen)
    }
}

/// Stable identifier of a stash slot.
///
/// Never positional: deleting a stash cannot shift another stash's id.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StashId(pub u64);

/// A point in 3D space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Point3 {
    /// Construct a point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared Euclidean distance to `other`.
    pub fn distance_sq(self, other: Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl BoundingBox {
    /// Box spanning `min` to `max`. Callers are responsible for
    /// componentwise `min <= max`.
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Return `true` when `p` lies inside the closed box.
    pub fn contains(&self, p: Point3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Edge lengths along each axis.
    pub fn extents(&self) -> Point3 {
        Point3::new(
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z,
        )
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
