use serde::{Deserialize, Serialize};
use sv_core::{Error, Result};

pub const SHAPE_LEN: usize = 308;
pub const COLOR_LEN: usize = 24;
pub const FEATURE_LEN: usize = SHAPE_LEN + COLOR_LEN;

/// Shape segment followed by color segment, exactly [`FEATURE_LEN`] values.
///
/// The length is checked on construction and on deserialization, so a
/// `FeatureVector` in hand always has the right layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(shape: &[f32], color: &[f32]) -> Result<Self> {
        if shape.len() != SHAPE_LEN {
            return Err(Error::FeatureLength {
                expected: SHAPE_LEN,
                actual: shape.len(),
            });
        }
        if color.len() != COLOR_LEN {
            return Err(Error::FeatureLength {
                expected: COLOR_LEN,
                actual: color.len(),
            });
        }
        let mut values = Vec::with_capacity(FEATURE_LEN);
        values.extend_from_slice(shape);
        values.extend_from_slice(color);
        Ok(Self(values))
    }

    pub fn from_slice(values: &[f32]) -> Result<Self> {
        Self::try_from(values.to_vec())
    }

    pub fn shape(&self) -> &[f32] {
        &self.0[..SHAPE_LEN]
    }

    pub fn color(&self) -> &[f32] {
        &self.0[SHAPE_LEN..]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        if values.len() != FEATURE_LEN {
            return Err(Error::FeatureLength {
                expected: FEATURE_LEN,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(v: FeatureVector) -> Self {
        v.0
    }
}
