//! Point cloud stages of the scene decomposition pass.
//!
//! Every stage takes a cloud by reference and returns a new one; inputs are
//! never mutated. Outputs are unorganized and keep the frame of their input.
//!
//! # Module Organization
//!
//! - `spatial`: R*-tree index over cloud positions
//! - `filtering`: range crop, voxel grid, statistical outlier removal
//! - `smoothing`: moving-least-squares surface smoothing
//! - `normals`: radius normals with curvature, oriented to a viewpoint
//! - `segmentation`: RANSAC planes, iterative plane stripping, support crop
//! - `clustering`: Euclidean cluster extraction and cluster selectors

pub mod clustering;
pub mod filtering;
pub mod normals;
pub mod segmentation;
pub mod smoothing;
pub mod spatial;

pub use clustering::{extract_clusters, largest_cluster, nearest_cluster, Cluster, ClusterConfig};
pub use filtering::{range_crop, remove_statistical_outliers, voxel_downsample, CropLimits, OutlierConfig};
pub use normals::{estimate_normals, NormalEstimate};
pub use segmentation::{
    crop_below_support, estimate_plane, strip_planes, AxisConstraint, PlaneConfig, PlaneModel,
    StripOutcome, StripperConfig,
};
pub use smoothing::{smooth, SmoothingConfig};
pub use spatial::SpatialIndex;
