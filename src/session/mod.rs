//! Session-oriented engine facade.

/// The [`AnalysisSession`] facade.
pub mod analysis_session;

pub use analysis_session::{AnalysisSession, SessionOpts, WalkState};
