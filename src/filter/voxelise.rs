use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, params_from,
};
use crate::foundation::core::{BoundingBox, Point3, StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use crate::stream::data::{StreamData, VoxelStream};
use serde::{Deserialize, Serialize};

const MAX_CELLS: u64 = 1 << 27;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    dims: [u32; 3],
    normalise: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            dims: [32, 32, 32],
            normalise: false,
        }
    }
}

/// Density voxeliser: bins incoming points into a regular grid over
/// their bounding box. Consumes the points.
#[derive(Clone, Debug, Default)]
pub struct Voxelise {
    params: Params,
    label: Option<String>,
}

impl Voxelise {
    pub(crate) fn from_params(params: &serde_json::Value) -> PointflowResult<Self> {
        Ok(Self {
            params: params_from(params)?,
            label: None,
        })
    }

    fn cell_count(&self) -> u64 {
        self.params.dims.iter().map(|d| *d as u64).product()
    }
}

impl Filter for Voxelise {
    fn kind(&self) -> FilterKind {
        FilterKind::Voxelise
    }

    fn custom_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    fn refresh(
        &mut self,
        inputs: &[StreamHandle],
        arena: &mut StreamArena,
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<StreamHandle>, FilterError> {
        let cells = self.cell_count();
        if cells == 0 || cells > MAX_CELLS {
            return Err(FilterError::InvalidParameter(format!(
                "voxel grid of {cells} cells"
            )));
        }

        let mut out = Vec::with_capacity(inputs.len() + 1);
        let mut min = Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
        let mut max = Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY);
        let mut any = false;
        for &h in inputs {
            match arena.get(h) {
                Some(StreamData::Points(p)) => {
                    for hit in &p.points {
                        min.x = min.x.min(hit.pos.x);
                        min.y = min.y.min(hit.pos.y);
                        min.z = min.z.min(hit.pos.z);
                        max.x = max.x.max(hit.pos.x);
                        max.y = max.y.max(hit.pos.y);
                        max.z = max.z.max(hit.pos.z);
                    }
                    any = any || !p.points.is_empty();
                }
                Some(_) => out.push(h),
                None => debug_assert!(false, "stale input handle"),
            }
        }
        ctx.tick()?;

        let bounds = if any {
            BoundingBox::new(min, max)
        } else {
            BoundingBox::new(Point3::default(), Point3::default())
        };

        let [nx, ny, nz] = self.params.dims;
        let mut values = vec![0f32; cells as usize];
        let ext = bounds.extents();
        for &h in inputs {
            if let Some(StreamData::Points(p)) = arena.get(h) {
                for hit in &p.points {
                    let cell = |v: f32, lo: f32, e: f32, n: u32| -> usize {
                        if e <= 0.0 {
                            0
                        } else {
                            (((v - lo) / e * n as f32) as usize).min(n as usize - 1)
                        }
                    };
                    let ix = cell(hit.pos.x, bounds.min.x, ext.x, nx);
                    let iy = cell(hit.pos.y, bounds.min.y, ext.y, ny);
                    let iz = cell(hit.pos.z, bounds.min.z, ext.z, nz);
                    values[(iz * ny as usize + iy) * nx as usize + ix] += 1.0;
                }
                ctx.tick()?;
            }
        }

        if self.params.normalise {
            let total: f32 = values.iter().sum();
            if total > 0.0 {
                for v in &mut values {
                    *v /= total;
                }
            }
        }

        out.push(arena.alloc(
            ctx.node(),
            StreamData::Voxel(VoxelStream {
                dims: self.params.dims,
                bounds,
                values,
            }),
        ));
        Ok(out)
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Voxel)
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Points)
    }

    fn cache_bytes(&self, _n_objects: u64) -> Option<u64> {
        Some(self.cell_count() * size_of::<f32>() as u64)
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        vec![PropertyGroup {
            title: "grid",
            props: vec![
                Property {
                    key: "dims_x",
                    value: PropertyValue::U64(self.params.dims[0] as u64),
                },
                Property {
                    key: "dims_y",
                    value: PropertyValue::U64(self.params.dims[1] as u64),
                },
                Property {
                    key: "dims_z",
                    value: PropertyValue::U64(self.params.dims[2] as u64),
                },
                Property {
                    key: "normalise",
                    value: PropertyValue::Bool(self.params.normalise),
                },
            ],
        }]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> PointflowResult<PropertyOutcome> {
        let set_dim = |dims: &mut [u32; 3], axis: usize, v: u64| -> PointflowResult<()> {
            if v == 0 || v > u32::MAX as u64 {
                return Err(PointflowError::validation("grid dimension out of range"));
            }
            dims[axis] = v as u32;
            Ok(())
        };
        match key {
            "dims_x" => set_dim(&mut self.params.dims, 0, value.as_u64()?)?,
            "dims_y" => set_dim(&mut self.params.dims, 1, value.as_u64()?)?,
            "dims_z" => set_dim(&mut self.params.dims, 2, value.as_u64()?)?,
            "normalise" => self.params.normalise = value.as_bool()?,
            _ => {
                return Err(PointflowError::validation(format!(
                    "voxelise has no property '{key}'"
                )));
            }
        }
        Ok(PropertyOutcome::refresh_all())
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("voxelise params serialize")
    }
}
