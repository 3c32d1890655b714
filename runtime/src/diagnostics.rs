use serde::{Deserialize, Serialize};
use std::fmt;
use sv_core::Error;

/// Pipeline stage a diagnostic or count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    RangeCrop,
    Downsample,
    Smoothing,
    SupportCrop,
    PlaneStripping,
    OutlierRemoval,
    Clustering,
    Description,
    Classification,
    PoseEstimation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::RangeCrop => "range_crop",
            Stage::Downsample => "downsample",
            Stage::Smoothing => "smoothing",
            Stage::SupportCrop => "support_crop",
            Stage::PlaneStripping => "plane_stripping",
            Stage::OutlierRemoval => "outlier_removal",
            Stage::Clustering => "clustering",
            Stage::Description => "description",
            Stage::Classification => "classification",
            Stage::PoseEstimation => "pose_estimation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable note about a recoverable condition met during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
    /// Output of this pass is incomplete because of this condition.
    pub degrading: bool,
}

impl Diagnostic {
    pub fn degraded(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            degrading: true,
        }
    }

    pub fn note(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            degrading: false,
        }
    }

    pub fn from_error(stage: Stage, error: &Error) -> Self {
        Self::degraded(stage, error.to_string())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Point counts after each stage of the decomposition.
///
/// A stage that did not run keeps `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounts {
    pub raw: usize,
    pub cropped: Option<usize>,
    pub downsampled: Option<usize>,
    pub smoothed: Option<usize>,
    pub supported: Option<usize>,
    pub stripped: Option<usize>,
    pub planes_removed: usize,
    pub cleaned: Option<usize>,
    pub clusters: usize,
}
