use crate::forest::Forest;
use crate::label::ObjectLabel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use sv_core::{Error, Result};
use sv_features::{COLOR_LEN, FEATURE_LEN, SHAPE_LEN};
use tracing::info;

pub const MODEL_VERSION: u32 = 1;

/// Trained classifier artifact: one ensemble over the color segment, one over
/// the shape segment, and the label of every class index.
///
/// Produced offline; loaded once and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub version: u32,
    pub feature_length: usize,
    pub shape_length: usize,
    pub color_length: usize,
    pub labels: Vec<ObjectLabel>,
    pub color_forest: Forest,
    pub shape_forest: Forest,
}

impl ClassifierModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let model = Self::from_json(&text)?;
        info!(
            path = %path.display(),
            classes = model.labels.len(),
            color_trees = model.color_forest.trees.len(),
            shape_trees = model.shape_forest.trees.len(),
            "loaded classifier model"
        );
        Ok(model)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let model: ClassifierModel =
            serde_json::from_str(text).map_err(|e| Error::ModelLoad(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_VERSION {
            return Err(Error::ModelLoad(format!(
                "unsupported model version {}, expected {}",
                self.version, MODEL_VERSION
            )));
        }
        let layout = (self.feature_length, self.shape_length, self.color_length);
        if layout != (FEATURE_LEN, SHAPE_LEN, COLOR_LEN) {
            return Err(Error::ModelLoad(format!(
                "feature layout {}={}+{} does not match {}={}+{}",
                layout.0, layout.1, layout.2, FEATURE_LEN, SHAPE_LEN, COLOR_LEN
            )));
        }
        if self.labels.is_empty() {
            return Err(Error::ModelLoad("model has no labels".to_string()));
        }
        self.color_forest
            .validate(COLOR_LEN, self.labels.len())
            .map_err(|e| Error::ModelLoad(format!("color ensemble: {e}")))?;
        self.shape_forest
            .validate(SHAPE_LEN, self.labels.len())
            .map_err(|e| Error::ModelLoad(format!("shape ensemble: {e}")))?;
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}
