use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, SelectionBinding,
    params_from,
};
use crate::foundation::core::{BoundingBox, Point3, StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use crate::stream::data::{DrawStream, Drawable, PointHit, PointStream, StreamData};
use serde::{Deserialize, Serialize};

/// Binding id for the primitive's centre, draggable in the viewer.
pub const BINDING_CENTRE: u32 = 0;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    centre: Point3,
    half_extent: Point3,
    invert: bool,
    show_primitive: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            centre: Point3::default(),
            half_extent: Point3::new(5.0, 5.0, 5.0),
            invert: false,
            show_primitive: true,
        }
    }
}

/// Box clip: keeps points inside (or outside) an axis-aligned box, and
/// exposes the box centre as a viewer selection binding so it can be
/// dragged in the 3D scene.
#[derive(Clone, Debug, Default)]
pub struct ClipBox {
    params: Params,
    label: Option<String>,
}

impl ClipBox {
    pub(crate) fn from_params(params: &serde_json::Value) -> PointflowResult<Self> {
        Ok(Self {
            params: params_from(params)?,
            label: None,
        })
    }

    fn bounds(&self) -> BoundingBox {
        let c = self.params.centre;
        let h = self.params.half_extent;
        BoundingBox::new(
            Point3::new(c.x - h.x, c.y - h.y, c.z - h.z),
            Point3::new(c.x + h.x, c.y + h.y, c.z + h.z),
        )
    }
}

impl Filter for ClipBox {
    fn kind(&self) -> FilterKind {
        FilterKind::ClipBox
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
        let bounds = self.bounds();
        let mut out = Vec::with_capacity(inputs.len() + 1);
        let mut clipped: Vec<PointStream> = Vec::new();

        for &h in inputs {
            match arena.get(h) {
                Some(StreamData::Points(p)) => {
                    let kept: Vec<PointHit> = p
                        .points
                        .iter()
                        .filter(|hit| bounds.contains(hit.pos) != self.params.invert)
                        .copied()
                        .collect();
                    clipped.push(PointStream {
                        points: kept,
                        colour: p.colour,
                        point_size: p.point_size,
                        value_label: p.value_label.clone(),
                    });
                    ctx.tick()?;
                }
                Some(_) => out.push(h),
                None => debug_assert!(false, "stale input handle"),
            }
        }

        for stream in clipped {
            out.push(arena.alloc(ctx.node(), StreamData::Points(stream)));
        }
        if self.params.show_primitive {
            let draw = DrawStream {
                drawables: vec![Drawable::Cuboid {
                    bounds,
                    colour: [0.5, 0.5, 0.5, 1.0],
                }],
            };
            out.push(arena.alloc(ctx.node(), StreamData::Draw(draw)));
        }
        Ok(out)
    }

    fn emit_mask(&self) -> StreamMask {
        let mut mask = StreamMask::only(StreamKind::Points);
        if self.params.show_primitive {
            mask = mask | StreamMask::only(StreamKind::Draw);
        }
        mask
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Points)
    }

    fn cache_bytes(&self, n_objects: u64) -> Option<u64> {
        // Clipping keeps at most everything.
        Some(n_objects * size_of::<PointHit>() as u64)
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        vec![PropertyGroup {
            title: "clip",
            props: vec![
                Property {
                    key: "centre",
                    value: PropertyValue::Point(self.params.centre),
                },
                Property {
                    key: "half_extent",
                    value: PropertyValue::Point(self.params.half_extent),
                },
                Property {
                    key: "invert",
                    value: PropertyValue::Bool(self.params.invert),
                },
                Property {
                    key: "show_primitive",
                    value: PropertyValue::Bool(self.params.show_primitive),
                },
            ],
        }]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> PointflowResult<PropertyOutcome> {
        match key {
            "centre" => self.params.centre = value.as_point()?,
            "half_extent" => {
                let h = value.as_point()?;
                if h.x < 0.0 || h.y < 0.0 || h.z < 0.0 {
                    return Err(PointflowError::validation(
                        "half extents must be non-negative",
                    ));
                }
                self.params.half_extent = h;
            }
            "invert" => self.params.invert = value.as_bool()?,
            "show_primitive" => {
                self.params.show_primitive = value.as_bool()?;
                // The drawable changes but the clipped points do not.
                return Ok(PropertyOutcome::local_only());
            }
            _ => {
                return Err(PointflowError::validation(format!(
                    "clip box has no property '{key}'"
                )));
            }
        }
        Ok(PropertyOutcome::refresh_all())
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("clip params serialize")
    }

    fn selection_bindings(&self) -> Vec<SelectionBinding> {
        vec![SelectionBinding {
            binding: BINDING_CENTRE,
            value: PropertyValue::Point(self.params.centre),
        }]
    }

    fn apply_binding(&mut self, binding: &SelectionBinding) -> PointflowResult<()> {
        match binding.binding {
            BINDING_CENTRE => {
                self.params.centre = binding.value.as_point()?;
                Ok(())
            }
            other => Err(PointflowError::validation(format!(
                "clip box has no binding {other}"
            ))),
        }
    }
}
