use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use sv_core::{Error, Result};
use sv_features::ShapeConfig;
use sv_point_cloud::{ClusterConfig, CropLimits, OutlierConfig, PlaneConfig, SmoothingConfig, StripperConfig};
use sv_recognition::CombinationRule;
use sv_registration::IcpConfig;

/// Optional crop against the horizontal support surface, run in `world_frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportConfig {
    pub world_frame: String,
    pub plane: PlaneConfig,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            world_frame: "odom_combined".to_string(),
            plane: PlaneConfig::support_surface(),
        }
    }
}

/// Every tunable of one perception pass.
///
/// Missing JSON fields take the defaults below, so a config file only needs
/// to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames with fewer raw points are treated as sensor noise.
    pub noise_threshold: usize,
    pub crop: CropLimits,
    pub voxel_leaf: f32,
    pub smoothing: SmoothingConfig,
    /// Disabled unless set; needs a frame transformer on the pipeline.
    pub support: Option<SupportConfig>,
    pub stripper: StripperConfig,
    pub outliers: OutlierConfig,
    pub clusters: ClusterConfig,
    pub shape: ShapeConfig,
    pub icp: IcpConfig,
    pub combination: CombinationRule,
    /// Per-frame wall-clock limit in milliseconds.
    pub frame_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            noise_threshold: 500,
            crop: CropLimits::default(),
            voxel_leaf: 0.01,
            smoothing: SmoothingConfig::default(),
            support: None,
            stripper: StripperConfig::default(),
            outliers: OutlierConfig::default(),
            clusters: ClusterConfig::default(),
            shape: ShapeConfig::default(),
            icp: IcpConfig::default(),
            combination: CombinationRule::default(),
            frame_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects values no stage can run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("voxel_leaf", self.voxel_leaf),
            ("clusters.tolerance", self.clusters.tolerance),
            ("shape.normal_radius", self.shape.normal_radius),
            ("stripper.plane.distance_threshold", self.stripper.plane.distance_threshold),
            ("icp.max_correspondence_distance", self.icp.max_correspondence_distance),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(Error::InvalidInput(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.clusters.min_size > self.clusters.max_size {
            return Err(Error::InvalidInput(format!(
                "clusters.min_size {} exceeds max_size {}",
                self.clusters.min_size, self.clusters.max_size
            )));
        }
        if self.smoothing.enabled && !(self.smoothing.search_radius > 0.0) {
            return Err(Error::InvalidInput("smoothing.search_radius must be positive".to_string()));
        }
        Ok(())
    }
}
