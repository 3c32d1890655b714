//! Ground-truth positions from a simulator, used when perception finds no
//! object. Compiled only with the `simulation` feature.

use nalgebra::Point3;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;
use sv_core::Pose;
use sv_recognition::ObjectLabel;

pub trait FallbackProvider: Send + Sync {
    /// Position-only pose of `label` as known to the simulator, if any.
    fn object_pose(&self, label: ObjectLabel, timestamp: SystemTime) -> Option<Pose>;
}

/// Positions set directly by the simulation harness.
pub struct FixedPositions {
    frame: String,
    positions: RwLock<HashMap<ObjectLabel, Point3<f32>>>,
}

impl FixedPositions {
    pub fn new(frame: impl Into<String>) -> Self {
        Self {
            frame: frame.into(),
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, label: ObjectLabel, position: Point3<f32>) {
        self.positions.write().insert(label, position);
    }
}

impl FallbackProvider for FixedPositions {
    fn object_pose(&self, label: ObjectLabel, timestamp: SystemTime) -> Option<Pose> {
        let position = *self.positions.read().get(&label)?;
        Some(Pose::at_position(position, &self.frame, timestamp))
    }
}
