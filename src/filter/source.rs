use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, StreamSummary,
    params_from,
};
use crate::foundation::core::{Point3, StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use crate::stream::data::{PointHit, PointStream, StreamData};
use serde::{Deserialize, Serialize};

const TICK_INTERVAL: u64 = 16 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    count: u64,
    extent: f32,
    seed: u64,
    mass_peaks: Vec<f32>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            count: 10_000,
            extent: 20.0,
            seed: 7,
            mass_peaks: vec![1.0, 27.0, 58.5],
        }
    }
}

/// Deterministic synthetic point-cloud source.
///
/// Stands in for the dataset loader: positions uniform in a cube of the
/// configured extent, masses scattered around the configured peaks.
/// Real file parsing is a collaborator concern, not an engine one.
#[derive(Clone, Debug, Default)]
pub struct PointSource {
    params: Params,
    label: Option<String>,
    console: Vec<String>,
}

impl PointSource {
    /// Source producing `count` points from the given seed.
    pub fn with_count(count: u64, seed: u64) -> Self {
        Self {
            params: Params {
                count,
                seed,
                ..Params::default()
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

// splitmix64; good enough scatter for synthetic clouds, and stable
// across platforms so tests can pin outputs.
fn next_u64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn next_unit(state: &mut u64) -> f32 {
    (next_u64(state) >> 40) as f32 / (1u64 << 24) as f32
}

impl Filter for PointSource {
    fn kind(&self) -> FilterKind {
        FilterKind::PointSource
    }

    fn custom_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    fn init_topology(&mut self, inputs: &[StreamSummary]) -> Vec<StreamSummary> {
        let mut out: Vec<StreamSummary> = inputs.to_vec();
        out.push(StreamSummary {
            kind: StreamKind::Points,
            objects: self.params.count,
        });
        out
    }

    fn refresh(
        &mut self,
        inputs: &[StreamHandle],
        arena: &mut StreamArena,
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<StreamHandle>, FilterError> {
        let mut stream = PointStream::new();
        stream
            .points
            .try_reserve_exact(self.params.count as usize)
            .map_err(|_| {
                FilterError::Allocation(format!("{} points", self.params.count))
            })?;

        let half = self.params.extent * 0.5;
        let default_peak = [1.0f32];
        let peaks: &[f32] = if self.params.mass_peaks.is_empty() {
            &default_peak
        } else {
            &self.params.mass_peaks
        };
        let mut rng = self.params.seed;
        for i in 0..self.params.count {
            let pos = Point3::new(
                (next_unit(&mut rng) - 0.5) * 2.0 * half,
                (next_unit(&mut rng) - 0.5) * 2.0 * half,
                (next_unit(&mut rng) - 0.5) * 2.0 * half,
            );
            let peak = peaks[(next_u64(&mut rng) % peaks.len() as u64) as usize];
            let mass = peak + (next_unit(&mut rng) - 0.5) * 0.2;
            stream.points.push(PointHit { pos, mass });

            if i % TICK_INTERVAL == TICK_INTERVAL - 1 {
                ctx.set_percent((i * 100 / self.params.count.max(1)) as u32);
                ctx.tick()?;
            }
        }
        ctx.set_percent(100);

        self.console
            .push(format!("generated {} points", stream.points.len()));

        let mut out: Vec<StreamHandle> = inputs.to_vec();
        out.push(arena.alloc(ctx.node(), StreamData::Points(stream)));
        Ok(out)
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Points)
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::EMPTY
    }

    fn cache_bytes(&self, _n_objects: u64) -> Option<u64> {
        Some(self.params.count * size_of::<PointHit>() as u64)
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        vec![PropertyGroup {
            title: "source",
            props: vec![
                Property {
                    key: "count",
                    value: PropertyValue::U64(self.params.count),
                },
                Property {
                    key: "extent",
                    value: PropertyValue::F64(self.params.extent as f64),
                },
                Property {
                    key: "seed",
                    value: PropertyValue::U64(self.params.seed),
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
            "count" => self.params.count = value.as_u64()?,
            "extent" => self.params.extent = value.as_f64()? as f32,
            "seed" => self.params.seed = value.as_u64()?,
            _ => {
                return Err(crate::foundation::error::PointflowError::validation(
                    format!("point source has no property '{key}'"),
                ));
            }
        }
        Ok(PropertyOutcome::refresh_all())
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(Self {
            console: Vec::new(),
            ..self.clone()
        })
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("source params serialize")
    }

    fn console_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }
}
