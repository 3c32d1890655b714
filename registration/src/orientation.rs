use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipAxis {
    X,
    Y,
    Z,
}

impl FlipAxis {
    fn unit(&self) -> nalgebra::Unit<Vector3<f32>> {
        match self {
            FlipAxis::X => Vector3::x_axis(),
            FlipAxis::Y => Vector3::y_axis(),
            FlipAxis::Z => Vector3::z_axis(),
        }
    }
}

/// Post-processing of an aligned rotation, chosen per object class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrientationPolicy {
    Identity,
    /// For objects that stand upright on a table: when the rotated z axis
    /// still has a positive z component (`R[(2, 2)] > 0`), the rotation is
    /// post-multiplied by a half turn about `axis`.
    UprightCorrection { axis: FlipAxis },
}

impl Default for OrientationPolicy {
    fn default() -> Self {
        OrientationPolicy::UprightCorrection { axis: FlipAxis::X }
    }
}

impl OrientationPolicy {
    pub fn apply(&self, rotation: &Matrix3<f32>) -> UnitQuaternion<f32> {
        let r = Rotation3::from_matrix(rotation);
        match self {
            OrientationPolicy::Identity => UnitQuaternion::from_rotation_matrix(&r),
            OrientationPolicy::UprightCorrection { axis } => {
                if r[(2, 2)] > 0.0 {
                    let flip = Rotation3::from_axis_angle(&axis.unit(), PI);
                    UnitQuaternion::from_rotation_matrix(&(r * flip))
                } else {
                    UnitQuaternion::from_rotation_matrix(&r)
                }
            }
        }
    }
}
