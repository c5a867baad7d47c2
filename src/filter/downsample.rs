use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, StreamSummary,
    params_from,
};
use crate::foundation::core::{StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use crate::stream::data::{PointHit, PointStream, StreamData};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    fraction: f64,
    limit: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            fraction: 0.1,
            limit: 0,
        }
    }
}

/// Point downsampler: keeps a configurable fraction of the incoming
/// points (optionally capped at a fixed count), by even stride so the
/// result is deterministic.
#[derive(Clone, Debug, Default)]
pub struct Downsample {
    params: Params,
    label: Option<String>,
}

impl Downsample {
    /// Downsampler keeping the given fraction of input points.
    pub fn with_fraction(fraction: f64) -> Self {
        Self {
            params: Params {
                fraction,
                ..Params::default()
            },
            label: None,
        }
    }

    pub(crate) fn from_params(params: &serde_json::Value) -> PointflowResult<Self> {
        Ok(Self {
            params: params_from(params)?,
            label: None,
        })
    }

    fn target_len(&self, input_len: u64) -> u64 {
        let mut target = (input_len as f64 * self.params.fraction).round() as u64;
        if self.params.limit != 0 {
            target = target.min(self.params.limit);
        }
        target.min(input_len)
    }
}

impl Filter for Downsample {
    fn kind(&self) -> FilterKind {
        FilterKind::Downsample
    }

    fn custom_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    fn init_topology(&mut self, inputs: &[StreamSummary]) -> Vec<StreamSummary> {
        let mut out = Vec::with_capacity(inputs.len());
        for s in inputs {
            if s.kind == StreamKind::Points {
                out.push(StreamSummary {
                    kind: StreamKind::Points,
                    objects: self.target_len(s.objects),
                });
            } else {
                out.push(*s);
            }
        }
        out
    }

    fn refresh(
        &mut self,
        inputs: &[StreamHandle],
        arena: &mut StreamArena,
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<StreamHandle>, FilterError> {
        let mut out = Vec::with_capacity(inputs.len());
        let mut sampled: Vec<(Vec<PointHit>, PointStream)> = Vec::new();

        for &h in inputs {
            match arena.get(h) {
                Some(StreamData::Points(p)) => {
                    let target = self.target_len(p.points.len() as u64) as usize;
                    let mut kept = Vec::new();
                    kept.try_reserve_exact(target)
                        .map_err(|_| FilterError::Allocation(format!("{target} points")))?;
                    if target > 0 {
                        let len = p.points.len();
                        for i in 0..target {
                            kept.push(p.points[i * len / target]);
                        }
                    }
                    // Carry the display attributes of the source stream.
                    let template = PointStream {
                        points: Vec::new(),
                        colour: p.colour,
                        point_size: p.point_size,
                        value_label: p.value_label.clone(),
                    };
                    sampled.push((kept, template));
                    ctx.tick()?;
                }
                Some(_) => out.push(h),
                None => debug_assert!(false, "stale input handle"),
            }
        }

        for (kept, mut template) in sampled {
            template.points = kept;
            out.push(arena.alloc(ctx.node(), StreamData::Points(template)));
        }
        Ok(out)
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Points)
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Points)
    }

    fn cache_bytes(&self, n_objects: u64) -> Option<u64> {
        Some(self.target_len(n_objects) * size_of::<PointHit>() as u64)
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        vec![PropertyGroup {
            title: "sampling",
            props: vec![
                Property {
                    key: "fraction",
                    value: PropertyValue::F64(self.params.fraction),
                },
                Property {
                    key: "limit",
                    value: PropertyValue::U64(self.params.limit),
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
            "fraction" => {
                let f = value.as_f64()?;
                if !(0.0..=1.0).contains(&f) {
                    return Err(PointflowError::validation(
                        "fraction must be within [0, 1]",
                    ));
                }
                self.params.fraction = f;
            }
            "limit" => self.params.limit = value.as_u64()?,
            _ => {
                return Err(PointflowError::validation(format!(
                    "downsample has no property '{key}'"
                )));
            }
        }
        Ok(PropertyOutcome::refresh_all())
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("downsample params serialize")
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/downsample.rs"]
mod tests;
