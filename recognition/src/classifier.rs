use crate::forest::argmax;
use crate::label::ObjectLabel;
use crate::model::ClassifierModel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sv_core::{Error, Result};
use sv_features::{FeatureVector, FEATURE_LEN, SHAPE_LEN};
use tracing::debug;

/// How the color and shape ensembles are combined into one label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CombinationRule {
    PreferShape,
    PreferColor,
    /// Shape vote unless fewer than `min_agreement` of the shape trees agree,
    /// then color vote.
    ShapeWithColorFallback { min_agreement: f32 },
    /// Arg-max of the weighted sum of both vote distributions.
    Weighted { shape_weight: f32, color_weight: f32 },
}

impl Default for CombinationRule {
    fn default() -> Self {
        CombinationRule::ShapeWithColorFallback { min_agreement: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: ObjectLabel,
    pub shape_label: ObjectLabel,
    pub color_label: ObjectLabel,
    /// Vote share behind `label` under the active rule.
    pub confidence: f32,
}

pub struct Classifier {
    model: Arc<ClassifierModel>,
    rule: CombinationRule,
}

impl Classifier {
    /// Fails with [`Error::ModelLoad`] unless `model` passes
    /// [`ClassifierModel::validate`].
    pub fn new(model: Arc<ClassifierModel>, rule: CombinationRule) -> Result<Self> {
        model.validate()?;
        Ok(Self { model, rule })
    }

    pub fn rule(&self) -> CombinationRule {
        self.rule
    }

    pub fn classify(&self, features: &FeatureVector) -> Result<Classification> {
        self.classify_slice(features.as_slice())
    }

    /// Classify a raw 332-value feature vector.
    pub fn classify_slice(&self, features: &[f32]) -> Result<Classification> {
        if features.len() != FEATURE_LEN {
            return Err(Error::FeatureLength {
                expected: FEATURE_LEN,
                actual: features.len(),
            });
        }
        let (shape, color) = features.split_at(SHAPE_LEN);
        let n = self.model.num_classes();
        let shape_votes = self.model.shape_forest.vote_fractions(shape, n);
        let color_votes = self.model.color_forest.vote_fractions(color, n);

        let shape_idx = argmax(&shape_votes).unwrap_or(0);
        let color_idx = argmax(&color_votes).unwrap_or(0);

        let (idx, confidence) = match self.rule {
            CombinationRule::PreferShape => (shape_idx, shape_votes[shape_idx]),
            CombinationRule::PreferColor => (color_idx, color_votes[color_idx]),
            CombinationRule::ShapeWithColorFallback { min_agreement } => {
                if shape_votes[shape_idx] >= min_agreement {
                    (shape_idx, shape_votes[shape_idx])
                } else {
                    (color_idx, color_votes[color_idx])
                }
            }
            CombinationRule::Weighted {
                shape_weight,
                color_weight,
            } => {
                let total = (shape_weight + color_weight).max(f32::EPSILON);
                let combined: Vec<f32> = shape_votes
                    .iter()
                    .zip(&color_votes)
                    .map(|(s, c)| (shape_weight * s + color_weight * c) / total)
                    .collect();
                let idx = argmax(&combined).unwrap_or(0);
                (idx, combined[idx])
            }
        };

        let label = self.model.labels[idx];
        debug!(%label, confidence, rule = ?self.rule, "classified object");
        Ok(Classification {
            label,
            shape_label: self.model.labels[shape_idx],
            color_label: self.model.labels[color_idx],
            confidence,
        })
    }
}
