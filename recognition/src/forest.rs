use serde::{Deserialize, Serialize};
use sv_core::{Error, Result};

/// One node of a binary decision tree. Samples with
/// `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        class: usize,
    },
}

/// Flat node array rooted at index 0. Children always come after their
/// parent, so evaluation terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::ModelLoad("tree has no nodes".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= n_features {
                        return Err(Error::ModelLoad(format!(
                            "node {i} splits on feature {feature}, only {n_features} features"
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(Error::ModelLoad(format!("node {i} has a non-finite threshold")));
                    }
                    for child in [left, right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(Error::ModelLoad(format!(
                                "node {i} links to invalid child {child}"
                            )));
                        }
                    }
                }
                Node::Leaf { class } => {
                    if class >= n_classes {
                        return Err(Error::ModelLoad(format!(
                            "leaf {i} predicts class {class}, only {n_classes} classes"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Class index reached by `x`. The tree must have been validated; an
    /// unvalidated tree that never reaches a leaf yields class 0.
    pub fn predict(&self, x: &[f32]) -> usize {
        let mut i = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(i) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = x.get(*feature).copied().unwrap_or(0.0);
                    i = if value <= *threshold { *left } else { *right };
                }
                Some(Node::Leaf { class }) => return *class,
                None => return 0,
            }
        }
        0
    }
}

/// Ensemble of trees voting by majority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub trees: Vec<Tree>,
}

impl Forest {
    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::ModelLoad("forest has no trees".to_string()));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features, n_classes)
                .map_err(|e| Error::ModelLoad(format!("tree {t}: {e}")))?;
        }
        Ok(())
    }

    /// Fraction of trees voting for each class.
    pub fn vote_fractions(&self, x: &[f32], n_classes: usize) -> Vec<f32> {
        let mut votes = vec![0usize; n_classes];
        for tree in &self.trees {
            let class = tree.predict(x);
            if let Some(v) = votes.get_mut(class) {
                *v += 1;
            }
        }
        let total = self.trees.len().max(1) as f32;
        votes.into_iter().map(|v| v as f32 / total).collect()
    }
}

/// Index of the largest value; ties go to the lowest index.
pub(crate) fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: usize, threshold: f32, low: usize, high: usize) -> Tree {
        Tree {
            nodes: vec![
                Node::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { class: low },
                Node::Leaf { class: high },
            ],
        }
    }

    #[test]
    fn test_predict_and_vote() {
        let forest = Forest {
            trees: vec![stump(0, 0.5, 0, 1), stump(1, 0.5, 0, 1), stump(0, 2.0, 0, 1)],
        };
        forest.validate(2, 2).unwrap();
        let fractions = forest.vote_fractions(&[1.0, 1.0], 2);
        assert!((fractions[1] - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(argmax(&fractions), Some(1));
    }

    #[test]
    fn test_validation_rejects_bad_trees() {
        assert!(stump(5, 0.5, 0, 1).validate(2, 2).is_err());
        assert!(stump(0, 0.5, 0, 7).validate(2, 2).is_err());
        let cycle = Tree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(cycle.validate(1, 1).is_err());
        // Even unvalidated, evaluation stops.
        assert_eq!(cycle.predict(&[1.0]), 0);
        assert!(Forest { trees: vec![] }.validate(1, 1).is_err());
    }

    #[test]
    fn test_argmax_ties_take_first() {
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_node_json_layout() {
        let node: Node = serde_json::from_str(r#"{"type":"leaf","class":3}"#).unwrap();
        assert_eq!(node, Node::Leaf { class: 3 });
    }
}
