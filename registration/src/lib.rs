//! Template alignment and object pose estimation
//!
//! - ICP (Iterative Closest Point), point to point, centroid initialized
//! - Orientation policies applied to the aligned rotation
//! - Pose estimation from one or several templates

pub mod icp;
pub mod orientation;
pub mod pose;

pub use icp::{evaluate_registration, registration_icp_point_to_point, IcpConfig, ICPResult};
pub use orientation::{FlipAxis, OrientationPolicy};
pub use pose::{best_alignment, centroid_pose, estimate_best_pose, estimate_pose};
