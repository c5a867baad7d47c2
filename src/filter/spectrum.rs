use crate::engine::progress::RefreshContext;
use crate::filter::{
    Filter, FilterKind, Property, PropertyGroup, PropertyOutcome, PropertyValue, params_from,
};
use crate::foundation::core::{StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use crate::stream::data::{PlotStream, StreamData};
use serde::{Deserialize, Serialize};

const MAX_BINS: usize = 1 << 22;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Params {
    bin_width: f32,
    logarithmic: bool,
    colour: [f32; 4],
}

impl Default for Params {
    fn default() -> Self {
        Self {
            bin_width: 0.05,
            logarithmic: true,
            colour: [0.0, 0.0, 1.0, 1.0],
        }
    }
}

/// Mass spectrum: histograms the scalar values of all incoming point
/// streams into one plot. Range tables flowing past contribute marked
/// regions to the plot.
#[derive(Clone, Debug, Default)]
pub struct Spectrum {
    params: Params,
    label: Option<String>,
}

impl Spectrum {
    pub(crate) fn from_params(params: &serde_json::Value) -> PointflowResult<Self> {
        Ok(Self {
            params: params_from(params)?,
            label: None,
        })
    }
}

impl Filter for Spectrum {
    fn kind(&self) -> FilterKind {
        FilterKind::Spectrum
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
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        let mut total = 0usize;
        for &h in inputs {
            if let Some(StreamData::Points(p)) = arena.get(h) {
                for hit in &p.points {
                    lo = lo.min(hit.mass);
                    hi = hi.max(hit.mass);
                }
                total += p.points.len();
            }
        }
        ctx.tick()?;

        let mut plot = PlotStream {
            label: self.label(),
            x_label: "mass-to-charge".to_owned(),
            y_label: "count".to_owned(),
            logarithmic: self.params.logarithmic,
            colour: self.params.colour,
            ..PlotStream::default()
        };

        if total > 0 {
            let width = self.params.bin_width.max(f32::EPSILON);
            let n_bins = (((hi - lo) / width).floor() as usize + 1).min(MAX_BINS);
            let mut counts = vec![0u64; n_bins];
            for &h in inputs {
                if let Some(StreamData::Points(p)) = arena.get(h) {
                    for hit in &p.points {
                        let bin = (((hit.mass - lo) / width) as usize).min(n_bins - 1);
                        counts[bin] += 1;
                    }
                }
                ctx.tick()?;
            }
            plot.series = counts
                .iter()
                .enumerate()
                .map(|(i, &c)| (lo + (i as f32 + 0.5) * width, c as f32))
                .collect();
        }

        for &h in inputs {
            if let Some(StreamData::Range(r)) = arena.get(h) {
                plot.regions
                    .extend(r.ranges.iter().map(|range| (range.low, range.high)));
            }
        }

        let mut out: Vec<StreamHandle> = inputs.to_vec();
        out.push(arena.alloc(ctx.node(), StreamData::Plot(plot)));
        Ok(out)
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::only(StreamKind::Plot)
    }

    fn block_mask(&self) -> StreamMask {
        StreamMask::EMPTY
    }

    fn cache_bytes(&self, n_objects: u64) -> Option<u64> {
        // One bin per input object is the worst case.
        Some((n_objects.min(MAX_BINS as u64)) * size_of::<(f32, f32)>() as u64)
    }

    fn properties(&self) -> Vec<PropertyGroup> {
        vec![PropertyGroup {
            title: "spectrum",
            props: vec![
                Property {
                    key: "bin_width",
                    value: PropertyValue::F64(self.params.bin_width as f64),
                },
                Property {
                    key: "logarithmic",
                    value: PropertyValue::Bool(self.params.logarithmic),
                },
                Property {
                    key: "colour",
                    value: PropertyValue::Colour(self.params.colour),
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
            "bin_width" => {
                let w = value.as_f64()?;
                if w <= 0.0 {
                    return Err(PointflowError::validation("bin width must be positive"));
                }
                self.params.bin_width = w as f32;
                Ok(PropertyOutcome::refresh_all())
            }
            "logarithmic" => {
                // Changes the emitted plot's axis flag only; nothing
                // downstream computes from it.
                self.params.logarithmic = value.as_bool()?;
                Ok(PropertyOutcome::local_only())
            }
            "colour" => {
                if let PropertyValue::Colour(c) = value {
                    self.params.colour = *c;
                    Ok(PropertyOutcome::local_only())
                } else {
                    Err(PointflowError::validation("expected colour"))
                }
            }
            _ => Err(PointflowError::validation(format!(
                "spectrum has no property '{key}'"
            ))),
        }
    }

    fn clone_uncached(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn save_params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).expect("spectrum params serialize")
    }
}
