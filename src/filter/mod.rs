//! The filter contract: the capability surface the engine depends on,
//! plus the factory over the closed set of concrete filter kinds.

use crate::engine::progress::RefreshContext;
use crate::foundation::core::{Point3, StreamKind, StreamMask};
use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle};
use serde::{Deserialize, Serialize};

/// Box clip with a draggable primitive.
pub mod clip;
/// Point downsampler.
pub mod downsample;
/// External program stage (hazardous).
pub mod external;
/// Composition range table.
pub mod ranging;
/// Synthetic point-cloud source.
pub mod source;
/// Mass spectrum plot.
pub mod spectrum;
/// Point-density voxeliser.
pub mod voxelise;

/// A typed property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// Unsigned count.
    U64(u64),
    /// Real-valued parameter.
    F64(f64),
    /// Free text.
    Str(String),
    /// 3D point parameter.
    Point(Point3),
    /// RGBA colour.
    Colour([f32; 4]),
}

impl PropertyValue {
    pub(crate) fn as_bool(&self) -> PointflowResult<bool> {
        match self {
            PropertyValue::Bool(b) => Ok(*b),
            other => Err(PointflowError::validation(format!(
                "expected bool, got {other:?}"
            ))),
        }
    }

    pub(crate) fn as_u64(&self) -> PointflowResult<u64> {
        match self {
            PropertyValue::U64(v) => Ok(*v),
            other => Err(PointflowError::validation(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }

    pub(crate) fn as_f64(&self) -> PointflowResult<f64> {
        match self {
            PropertyValue::F64(v) => Ok(*v),
            PropertyValue::U64(v) => Ok(*v as f64),
            other => Err(PointflowError::validation(format!(
                "expected number, got {other:?}"
            ))),
        }
    }

    pub(crate) fn as_str(&self) -> PointflowResult<&str> {
        match self {
            PropertyValue::Str(s) => Ok(s),
            other => Err(PointflowError::validation(format!(
                "expected string, got {other:?}"
            ))),
        }
    }

    pub(crate) fn as_point(&self) -> PointflowResult<Point3> {
        match self {
            PropertyValue::Point(p) => Ok(*p),
            other => Err(PointflowError::validation(format!(
                "expected point, got {other:?}"
            ))),
        }
    }
}

/// One displayable property.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Addressing key, also used by [`Filter::set_property`].
    pub key: &'static str,
    /// Current value.
    pub value: PropertyValue,
}

/// Display grouping of properties. Grouping is presentational only;
/// keys address properties regardless of group.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyGroup {
    /// Group heading.
    pub title: &'static str,
    /// Properties in display order.
    pub props: Vec<Property>,
}

/// Result of a successful property change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyOutcome {
    /// Downstream computations consume what changed: every descendant's
    /// cache must be cleared.
    pub needs_refresh: bool,
    /// This filter's own cached output no longer matches its
    /// properties. Filters that can reuse their previous output (pure
    /// display-side changes) leave this unset.
    pub invalidates_own_cache: bool,
}

impl PropertyOutcome {
    /// Everything downstream of and including this filter recomputes.
    pub fn refresh_all() -> Self {
        Self {
            needs_refresh: true,
            invalidates_own_cache: true,
        }
    }

    /// Only this filter's own output recomputes; descendants' cached
    /// results stay valid.
    pub fn local_only() -> Self {
        Self {
            needs_refresh: false,
            invalidates_own_cache: true,
        }
    }

    /// Nothing recomputes.
    pub fn display_only() -> Self {
        Self {
            needs_refresh: false,
            invalidates_own_cache: false,
        }
    }

    /// Whether the host should run a refresh walk at all after this
    /// change.
    pub fn wants_walk(&self) -> bool {
        self.needs_refresh || self.invalidates_own_cache
    }
}

/// A viewer-side manipulation binding: lets the 3D scene adjust one of
/// the owning filter's parameters directly (e.g. dragging a clip
/// primitive), bypassing the property grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionBinding {
    /// Which of the filter's bindable parameters this addresses.
    pub binding: u32,
    /// The (new) parameter value.
    pub value: PropertyValue,
}

/// Lightweight payload descriptor threaded through topology dry-runs in
/// place of real data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    /// Payload kind that would flow here.
    pub kind: StreamKind,
    /// Expected object count, where the filter can estimate it cheaply.
    pub objects: u64,
}

/// Type tag for the closed set of concrete filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Synthetic point-cloud source.
    PointSource,
    /// Point downsampler.
    Downsample,
    /// Mass spectrum plot.
    Spectrum,
    /// Box clip with a draggable primitive.
    ClipBox,
    /// Point-density voxeliser.
    Voxelise,
    /// Composition range table.
    RangeTable,
    /// External program stage. Hazardous.
    ExternalProgram,
}

impl FilterKind {
    /// Human-readable type name, used as the default label.
    pub fn display_name(self) -> &'static str {
        match self {
            FilterKind::PointSource => "point source",
            FilterKind::Downsample => "downsample",
            FilterKind::Spectrum => "spectrum",
            FilterKind::ClipBox => "clip box",
            FilterKind::Voxelise => "voxelise",
            FilterKind::RangeTable => "range table",
            FilterKind::ExternalProgram => "external program",
        }
    }

    /// Construct a filter of this kind with default parameters.
    pub fn build_default(self) -> Box<dyn Filter> {
        match self {
            FilterKind::PointSource => Box::new(source::PointSource::default()),
            FilterKind::Downsample => Box::new(downsample::Downsample::default()),
            FilterKind::Spectrum => Box::new(spectrum::Spectrum::default()),
            FilterKind::ClipBox => Box::new(clip::ClipBox::default()),
            FilterKind::Voxelise => Box::new(voxelise::Voxelise::default()),
            FilterKind::RangeTable => Box::new(ranging::RangeTable::default()),
            FilterKind::ExternalProgram => Box::new(external::ExternalProgram::default()),
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Serialized form of one filter node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterState {
    /// Type tag, selects the deserializer.
    pub kind: FilterKind,
    /// User label, if one was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Kind-specific parameters.
    pub params: serde_json::Value,
}

/// Build a filter from its serialized state.
///
/// Fails (without side effects) on malformed parameters; the kind set is
/// closed, so unknown kinds are already rejected at deserialization.
pub fn build_filter(state: &FilterState) -> PointflowResult<Box<dyn Filter>> {
    let mut filter = match state.kind {
        FilterKind::PointSource => {
            Box::new(source::PointSource::from_params(&state.params)?) as Box<dyn Filter>
        }
        FilterKind::Downsample => Box::new(downsample::Downsample::from_params(&state.params)?),
        FilterKind::Spectrum => Box::new(spectrum::Spectrum::from_params(&state.params)?),
        FilterKind::ClipBox => Box::new(clip::ClipBox::from_params(&state.params)?),
        FilterKind::Voxelise => Box::new(voxelise::Voxelise::from_params(&state.params)?),
        FilterKind::RangeTable => Box::new(ranging::RangeTable::from_params(&state.params)?),
        FilterKind::ExternalProgram => {
            Box::new(external::ExternalProgram::from_params(&state.params)?)
        }
    };
    if let Some(label) = &state.label {
        filter.set_label(Some(label.clone()));
    }
    Ok(filter)
}

pub(crate) fn params_from<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
) -> PointflowResult<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| PointflowError::state(format!("bad filter parameters: {e}")))
}

/// A processing stage in the pipeline.
///
/// Implementations are single-threaded and engine-driven: `refresh` is
/// only ever called from the walk, with the arena and context it was
/// handed. Long-running refreshes are contracted to poll
/// [`RefreshContext::tick`] and bail out with [`FilterError::Aborted`]
/// when it fails.
pub trait Filter {
    /// Type tag.
    fn kind(&self) -> FilterKind;

    /// The user-assigned label, if any.
    fn custom_label(&self) -> Option<&str>;

    /// Set or clear the user label.
    fn set_label(&mut self, label: Option<String>);

    /// Effective display label.
    fn label(&self) -> String {
        self.custom_label()
            .map(str::to_owned)
            .unwrap_or_else(|| self.kind().display_name().to_owned())
    }

    /// Cheap, cache-free dry run of the payload flow, used by topology
    /// notification. Default: pass through everything not blocked, then
    /// add this filter's own emissions with unknown (zero) counts.
    fn init_topology(&mut self, inputs: &[StreamSummary]) -> Vec<StreamSummary> {
        let block = self.block_mask();
        let mut out: Vec<StreamSummary> = inputs
            .iter()
            .filter(|s| !block.contains(s.kind))
            .copied()
            .collect();
        out.extend(
            self.emit_mask()
                .kinds()
                .map(|kind| StreamSummary { kind, objects: 0 }),
        );
        out
    }

    /// Produce outputs from inputs. New payloads are allocated in the
    /// arena under the walking node's identity (`ctx.node()`); input
    /// handles the filter does not block may be forwarded verbatim.
    fn refresh(
        &mut self,
        inputs: &[StreamHandle],
        arena: &mut StreamArena,
        ctx: &mut RefreshContext<'_>,
    ) -> Result<Vec<StreamHandle>, FilterError>;

    /// Payload kinds this filter can introduce.
    fn emit_mask(&self) -> StreamMask;

    /// Payload kinds this filter consumes (prevents from propagating).
    fn block_mask(&self) -> StreamMask;

    /// Approximate bytes a cache of this filter's output would occupy
    /// given `n_objects` input objects, or `None` when the output cannot
    /// be cached meaningfully.
    fn cache_bytes(&self, n_objects: u64) -> Option<u64>;

    /// Current properties, grouped for display.
    fn properties(&self) -> Vec<PropertyGroup>;

    /// Apply a property change. Rejections must leave the filter
    /// unchanged.
    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> PointflowResult<PropertyOutcome>;

    /// Deep copy with no cached state.
    fn clone_uncached(&self) -> Box<dyn Filter>;

    /// Kind-specific parameters for persistence.
    fn save_params(&self) -> serde_json::Value;

    /// Serialized node state.
    fn state(&self) -> FilterState {
        FilterState {
            kind: self.kind(),
            label: self.custom_label().map(str::to_owned),
            params: self.save_params(),
        }
    }

    /// Externally-driven invalidation: `true` when something outside the
    /// property path (a watched file, a monitored command) may have
    /// changed this filter's output since its cache was filled.
    fn monitor_needs_refresh(&self) -> bool {
        false
    }

    /// Whether this filter can have side effects outside the process
    /// (and is therefore subject to the strip-on-load sweep).
    fn hazardous(&self) -> bool {
        false
    }

    /// Drain console text produced by the last refresh.
    fn console_messages(&mut self) -> Vec<String> {
        Vec::new()
    }

    /// Viewer manipulation bindings currently exposed. Valid after a
    /// refresh.
    fn selection_bindings(&self) -> Vec<SelectionBinding> {
        Vec::new()
    }

    /// Apply a modified binding coming back from the viewer.
    fn apply_binding(&mut self, binding: &SelectionBinding) -> PointflowResult<()> {
        let _ = binding;
        Err(PointflowError::validation(format!(
            "filter '{}' has no selection bindings",
            self.label()
        )))
    }
}
