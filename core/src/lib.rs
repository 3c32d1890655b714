//! Core types shared by every scene-vision crate.
//!
//! - [`point_cloud`]: [`PointCloud`], [`IndexSet`] and cloud identity
//! - [`pose`]: stamped object poses with a confidence tag
//! - [`robust`]: generic RANSAC engine
//! - [`budget`]: per-frame deadlines
//! - [`context`]: immutable per-frame context
//! - [`threads`]: global Rayon pool sizing

pub mod budget;
pub mod context;
pub mod point_cloud;
pub mod pose;
pub mod robust;
pub mod threads;

pub use budget::Deadline;
pub use context::FrameContext;
pub use point_cloud::{CloudId, IndexSet, PointCloud, Rgb};
pub use pose::{Confidence, Pose};
pub use robust::{Ransac, RobustConfig, RobustModel, RobustResult};
pub use threads::{init_thread_pool, pool_threads};

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the perception core can report.
///
/// Variants fall into two groups. Expected conditions (empty input, an empty
/// stage output, no model fit, an exhausted budget) are recoverable: the
/// pipeline records them and returns a degraded result. Everything else is a
/// caller error and is returned as-is.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Empty input: {points} points, at least {required} required")]
    EmptyInput { points: usize, required: usize },

    #[error("Stage '{0}' produced no points")]
    StageEmpty(String),

    #[error("No model found: {0}")]
    NoModel(String),

    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Feature length mismatch: expected {expected}, got {actual}")]
    FeatureLength { expected: usize, actual: usize },

    #[error("Index set computed for cloud {expected:?} used against cloud {actual:?}")]
    IndexMismatch { expected: CloudId, actual: CloudId },

    #[error("Catalog miss: no template for label '{0}'")]
    CatalogMiss(String),

    #[error("Transform from '{source_frame}' to '{target_frame}' unavailable")]
    TransformUnavailable {
        target_frame: String,
        source_frame: String,
    },

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for conditions the pipeline degrades on instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::EmptyInput { .. }
                | Error::StageEmpty(_)
                | Error::NoModel(_)
                | Error::BudgetExhausted(_)
        )
    }
}
