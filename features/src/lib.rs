pub mod color;
pub mod shape;
pub mod vector;

pub use color::{estimate_color_histogram, ColorHistogram};
pub use shape::{estimate_shape_descriptor, ShapeConfig, ShapeDescriptor};
pub use vector::{FeatureVector, COLOR_LEN, FEATURE_LEN, SHAPE_LEN};

use sv_core::{PointCloud, Result};

/// Shape descriptor followed by color histogram for one object cloud.
pub fn describe(cloud: &PointCloud, config: &ShapeConfig) -> Result<FeatureVector> {
    let shape = estimate_shape_descriptor(cloud, config)?;
    let color = estimate_color_histogram(cloud)?;
    FeatureVector::new(&shape, &color)
}
