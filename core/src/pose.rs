use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Whether an estimate came out of a converged alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Converged,
    /// Structurally valid but produced after an iteration or time limit, or
    /// without any alignment at all.
    Low,
}

/// Stamped object pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub frame: String,
    pub timestamp: SystemTime,
    pub confidence: Confidence,
    /// Mean squared correspondence distance of the alignment; lower is better.
    pub fitness: f32,
}

impl Pose {
    /// Position-only pose with identity orientation, flagged low confidence.
    pub fn at_position(position: Point3<f32>, frame: &str, timestamp: SystemTime) -> Self {
        Self {
            position,
            orientation: UnitQuaternion::identity(),
            frame: frame.to_string(),
            timestamp,
            confidence: Confidence::Low,
            fitness: f32::INFINITY,
        }
    }

    pub fn isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(self.position.coords), self.orientation)
    }

    pub fn is_converged(&self) -> bool {
        self.confidence == Confidence::Converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_only_pose() {
        let pose = Pose::at_position(Point3::new(1.0, 2.0, 3.0), "world", SystemTime::UNIX_EPOCH);
        assert!(!pose.is_converged());
        let iso = pose.isometry();
        assert_eq!(iso.translation.vector.z, 3.0);
        assert_eq!(iso.rotation, UnitQuaternion::identity());
    }
}
