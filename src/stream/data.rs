use crate::foundation::core::{BoundingBox, Point3, StreamKind};
use serde::{Deserialize, Serialize};

/// RGBA colour, straight alpha, 0..=1 per channel.
pub type Colour = [f32; 4];

/// A single point record: position plus a scalar value (nominally
/// mass-to-charge for atom-probe data).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointHit {
    /// Position in dataset space.
    pub pos: Point3,
    /// Scalar value attached to the point.
    pub mass: f32,
}

/// Point payload.
#[derive(Clone, Debug, Default)]
pub struct PointStream {
    /// The point records.
    pub points: Vec<PointHit>,
    /// Display colour hint for the whole set.
    pub colour: Colour,
    /// Display size hint, in viewer units.
    pub point_size: f32,
    /// Name of the scalar value axis.
    pub value_label: String,
}

impl PointStream {
    /// Empty stream with the conventional display defaults.
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            colour: [1.0, 0.0, 0.0, 1.0],
            point_size: 2.0,
            value_label: "mass-to-charge".to_owned(),
        }
    }
}

/// 2D plot payload: one labelled xy series.
#[derive(Clone, Debug, Default)]
pub struct PlotStream {
    /// Series title.
    pub label: String,
    /// X axis label.
    pub x_label: String,
    /// Y axis label.
    pub y_label: String,
    /// The xy pairs, in x order.
    pub series: Vec<(f32, f32)>,
    /// Plot the y axis logarithmically.
    pub logarithmic: bool,
    /// Display colour hint.
    pub colour: Colour,
    /// Highlighted x intervals (e.g. ranged regions of a spectrum).
    pub regions: Vec<(f32, f32)>,
}

/// Abstract 3D primitive the viewer knows how to draw.
#[derive(Clone, Debug, PartialEq)]
pub enum Drawable {
    /// Axis-aligned box outline.
    Cuboid {
        /// Extent of the box.
        bounds: BoundingBox,
        /// Outline colour.
        colour: Colour,
    },
    /// Sphere.
    Sphere {
        /// Centre point.
        centre: Point3,
        /// Radius.
        radius: f32,
        /// Surface colour.
        colour: Colour,
    },
}

/// Drawable payload, for 3D scene decoration. Carries no data objects.
#[derive(Clone, Debug, Default)]
pub struct DrawStream {
    /// The primitives to draw.
    pub drawables: Vec<Drawable>,
}

/// Regular voxel grid payload.
#[derive(Clone, Debug)]
pub struct VoxelStream {
    /// Cell counts along each axis.
    pub dims: [u32; 3],
    /// Dataset-space extent covered by the grid.
    pub bounds: BoundingBox,
    /// Cell values, x-fastest.
    pub values: Vec<f32>,
}

impl VoxelStream {
    /// Total cell count.
    pub fn cell_count(&self) -> usize {
        self.dims.iter().map(|d| *d as usize).product()
    }
}

/// One named value interval of a range table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassRange {
    /// Composition name.
    pub name: String,
    /// Inclusive lower bound.
    pub low: f32,
    /// Inclusive upper bound.
    pub high: f32,
    /// Display colour for points matching this range.
    pub colour: Colour,
}

impl MassRange {
    /// Return `true` when `mass` falls inside the closed interval.
    pub fn matches(&self, mass: f32) -> bool {
        mass >= self.low && mass <= self.high
    }
}

/// Range-table payload.
#[derive(Clone, Debug, Default)]
pub struct RangeStream {
    /// The intervals, non-overlapping by construction of the producer.
    pub ranges: Vec<MassRange>,
}

/// A payload flowing between filters.
///
/// Closed tagged set; the engine never inspects variant internals, only
/// kind, object count and size.
#[derive(Clone, Debug)]
pub enum StreamData {
    /// Point data.
    Points(PointStream),
    /// Plot data.
    Plot(PlotStream),
    /// Drawables.
    Draw(DrawStream),
    /// Voxel grid.
    Voxel(VoxelStream),
    /// Range table.
    Range(RangeStream),
}

impl StreamData {
    /// Kind tag of this payload.
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamData::Points(_) => StreamKind::Points,
            StreamData::Plot(_) => StreamKind::Plot,
            StreamData::Draw(_) => StreamKind::Draw,
            StreamData::Voxel(_) => StreamKind::Voxel,
            StreamData::Range(_) => StreamKind::Range,
        }
    }

    /// Number of basic data objects carried.
    ///
    /// Drawables and range tables report zero: they decorate rather than
    /// store dataset objects, matching how cache sizing treats them.
    pub fn n_objects(&self) -> u64 {
        match self {
            StreamData::Points(p) => p.points.len() as u64,
            StreamData::Plot(p) => p.series.len() as u64,
            StreamData::Draw(_) => 0,
            StreamData::Voxel(v) => v.cell_count() as u64,
            StreamData::Range(_) => 0,
        }
    }

    /// Approximate heap footprint, used for cache budget accounting.
    pub fn approx_bytes(&self) -> u64 {
        let payload = match self {
            StreamData::Points(p) => p.points.len() * size_of::<PointHit>(),
            StreamData::Plot(p) => p.series.len() * size_of::<(f32, f32)>(),
            StreamData::Draw(d) => d.drawables.len() * size_of::<Drawable>(),
            StreamData::Voxel(v) => v.values.len() * size_of::<f32>(),
            StreamData::Range(r) => r.ranges.len() * size_of::<MassRange>(),
        };
        (payload + size_of::<StreamData>()) as u64
    }
}
