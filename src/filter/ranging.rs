use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, params_from,
};
use crate::foundation::core::{StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use crate::stream::data::{MassRange, PointStream, RangeStream, StreamData};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    ranges: Vec<MassRange>,
    drop_unranged: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            drop_unranged: false,
        }
    }
}

/// Composition range table: emits a range payload describing named
/// mass intervals, and optionally drops points falling outside every
/// interval. Whether points are consumed depends on that property, so
/// the block mask is dynamic.
#[derive(Clone, Debug, Default)]
pub struct RangeTable {
    params: Params,
    label: Option<String>,
    console: Vec<String>,
}

impl RangeTable {
    /// Table over the given intervals.
    pub fn with_ranges(ranges: Vec<MassRange>) -> Self {
        Self {
            params: Params {
                ranges,
                drop_unranged: false,
            },
            ..Self::default()
        }
    }

    pub(crate) fn from_params(params: &serde_json::Value) -> PointflowResult<Self> {
        Ok(Self {
            params: params_from(params)?,
            ..Self::default()
        })
    }
}

impl Filter for RangeTable {
    fn kind(&self) -> FilterKind {
        FilterKind::RangeTable
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
        let mut out = Vec::with_capacity(inputs.len() + 1);
        let mut ranged: Vec<PointStream> = Vec::new();

        for &h in inputs {
            match arena.get(h) {
                Some(StreamData::Points(p)) if self.params.drop_unranged => {
                    let kept: Vec<_> = p
                        .points
                        .iter()
                        .filter(|hit| self.params.ranges.iter().any(|r| r.matches(hit.mass)))
                        .copied()
                        .collect();
                    self.console.push(format!(
                        "ranged {} of {} points",
                        kept.len(),
                        p.points.len()
                    ));
                    ranged.push(PointStream {
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

        for stream in ranged {
            out.push(arena.alloc(ctx.node(), StreamData::Points(stream)));
        }
        out.push(arena.alloc(
            ctx.node(),
            StreamData::Range(RangeStream {
                ranges: self.params.ranges.clone(),
            }),
        ));
        Ok(out)
    }

    fn emit_mask(&self) -> StreamMask {
        let mut mask = StreamMask::only(StreamKind::Range);
        if self.params.drop_unranged {
            mask = mask | StreamMask::only(StreamKind::Points);
        }
        mask
    }

    fn block_mask(&self) -> StreamMask {
        if self.params.drop_unranged {
            StreamMask::only(StreamKind::Points)
        } else {
            StreamMask::EMPTY
        }
    }

    fn cache_bytes(&self, n_objects: u64) -> Option<u64> {
        let table = self.params.ranges.len() as u64 * size_of::<MassRange>() as u64;
        if self.params.drop_unranged {
            Some(table + n_objects * size_of::<crate::stream::data::PointHit>() as u64)
        } else {
            Some(table)
        }
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        let mut props = vec![Property {
            key: "drop_unranged",
            value: PropertyValue::Bool(self.params.drop_unranged),
        }];
        props.push(Property {
            key: "range_count",
            value: PropertyValue::U64(self.params.ranges.len() as u64),
        });
        vec![PropertyGroup {
            title: "ranging",
            props,
        }]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> PointflowResult<PropertyOutcome> {
        match key {
            "drop_unranged" => {
                self.params.drop_unranged = value.as_bool()?;
                Ok(PropertyOutcome::refresh_all())
            }
            _ => Err(PointflowError::validation(format!(
                "range table has no property '{key}'"
            ))),
        }
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(Self {
            console: Vec::new(),
            ..self.clone()
        })
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("range params serialize")
    }

    fn console_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }
}
