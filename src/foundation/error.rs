use crate::foundation::core::NodeId;

/// Crate-wide result alias.
pub type PointflowResult<T> = Result<T, PointflowError>;

/// Top-level engine error.
#[derive(thiserror::Error, Debug)]
pub enum PointflowError {
    /// Bad argument or configuration value.
    #[error("validation error: {0}")]
    Validation(String),

    /// A structural tree operation was rejected; the tree is unchanged.
    #[error("tree operation rejected: {0}")]
    Tree(String),

    /// A filter's refresh reported failure; the whole walk was abandoned.
    #[error("filter '{label}' failed: {source}")]
    Filter {
        /// Node whose refresh failed.
        node: NodeId,
        /// The filter's user-facing label at the time of failure.
        label: String,
        /// The filter-reported failure.
        #[source]
        source: FilterError,
    },

    /// The walk was cancelled at a cooperative yield point.
    #[error("refresh aborted")]
    Aborted,

    /// State document save/load failure.
    #[error("state error: {0}")]
    State(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PointflowError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn tree(msg: impl Into<String>) -> Self {
        Self::Tree(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Return `true` for user-requested cancellation, whether surfaced
    /// directly or via a filter's abort code.
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Aborted => true,
            Self::Filter { source, .. } => matches!(source, FilterError::Aborted),
            _ => false,
        }
    }
}

/// Failure reported by a filter's refresh operation.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    /// The filter observed the cancellation flag and exited early.
    #[error("aborted")]
    Aborted,

    /// A property combination made the computation impossible.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The computation would exceed a size limit.
    #[error("allocation limit exceeded: {0}")]
    Allocation(String),

    /// An external command could not be run or reported failure.
    #[error("external command failed: {0}")]
    Command(String),

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilterError {
    /// Stable numeric code for sink-facing reporting. Code 0 is reserved
    /// for success and never produced here.
    pub fn code(&self) -> u32 {
        match self {
            FilterError::Aborted => 1,
            FilterError::InvalidParameter(_) => 2,
            FilterError::Allocation(_) => 3,
            FilterError::Command(_) => 4,
            FilterError::Io(_) => 5,
        }
    }
}
