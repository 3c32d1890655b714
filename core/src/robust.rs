//! Robust Estimation Module
//!
//! Generic RANSAC engine usable for any model estimation task. Sampling is
//! reproducible when a seed is configured and every run is bounded by both an
//! iteration cap and a [`Deadline`].

use crate::budget::Deadline;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::marker::PhantomData;

/// Configuration for robust estimation
#[derive(Debug, Clone)]
pub struct RobustConfig {
    pub threshold: f64,
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: Option<u64>,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            max_iterations: 1000,
            confidence: 0.99,
            seed: None,
        }
    }
}

/// Result of robust estimation
#[derive(Debug, Clone)]
pub struct RobustResult<M> {
    pub model: Option<M>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    pub residual: f64,
    pub iterations: usize,
    /// The deadline expired before the search finished.
    pub exhausted: bool,
}

impl<M> RobustResult<M> {
    fn empty(n: usize) -> Self {
        Self {
            model: None,
            inliers: vec![false; n],
            num_inliers: 0,
            residual: f64::INFINITY,
            iterations: 0,
            exhausted: false,
        }
    }

    pub fn inlier_indices(&self) -> Vec<usize> {
        self.inliers
            .iter()
            .enumerate()
            .filter(|(_, &inl)| inl)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Trait for models that can be estimated robustly
pub trait RobustModel<D> {
    type Model: Clone;

    /// Minimum number of data points required to estimate the model
    fn min_sample_size(&self) -> usize;

    /// Estimate model from a minimal sample. Returning `None` rejects the
    /// sample (degenerate or violating a constraint).
    fn estimate(&self, data: &[&D]) -> Option<Self::Model>;

    /// Compute error for a single data point against the model
    fn compute_error(&self, model: &Self::Model, data: &D) -> f64;
}

/// Generic RANSAC engine
pub struct Ransac<D, M: RobustModel<D>> {
    config: RobustConfig,
    _phantom: PhantomData<(D, M)>,
}

impl<D, M: RobustModel<D>> Ransac<D, M> {
    pub fn new(config: RobustConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn run(&self, estimator: &M, data: &[D], deadline: &Deadline) -> RobustResult<M::Model> {
        let n = data.len();
        let k = estimator.min_sample_size();

        if n < k || k == 0 {
            return RobustResult::empty(n);
        }

        let mut result = RobustResult::empty(n);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut required = self.config.max_iterations;

        while result.iterations < required.min(self.config.max_iterations) {
            if deadline.expired() {
                result.exhausted = true;
                break;
            }
            result.iterations += 1;

            // 1. Sample
            let picks = rand::seq::index::sample(&mut rng, n, k);
            let sample: Vec<&D> = picks.iter().map(|i| &data[i]).collect();

            // 2. Estimate
            let Some(model) = estimator.estimate(&sample) else {
                continue;
            };

            // 3. Score
            let mut inliers = vec![false; n];
            let mut num_inliers = 0;
            let mut total_error = 0.0;
            for (j, d) in data.iter().enumerate() {
                let err = estimator.compute_error(&model, d);
                if err < self.config.threshold {
                    inliers[j] = true;
                    num_inliers += 1;
                    total_error += err;
                }
            }

            let residual = if num_inliers > 0 {
                total_error / num_inliers as f64
            } else {
                f64::INFINITY
            };

            if num_inliers > result.num_inliers
                || (num_inliers == result.num_inliers && num_inliers > 0 && residual < result.residual)
            {
                result.num_inliers = num_inliers;
                result.inliers = inliers;
                result.model = Some(model);
                result.residual = residual;
                required = adaptive_iterations(num_inliers, n, k, self.config.confidence)
                    .min(self.config.max_iterations);
            }
        }

        result
    }
}

/// Number of iterations needed to draw one all-inlier sample with the given
/// confidence when `inliers / n` of the data fits the model.
fn adaptive_iterations(inliers: usize, n: usize, k: usize, confidence: f64) -> usize {
    let w = inliers as f64 / n as f64;
    let p_good = w.powi(k as i32);
    if p_good >= 1.0 {
        return 1;
    }
    if p_good <= f64::EPSILON || confidence <= 0.0 {
        return usize::MAX;
    }
    let confidence = confidence.min(1.0 - f64::EPSILON);
    let iterations = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if iterations.is_finite() {
        iterations.ceil().max(1.0) as usize
    } else {
        usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Fits a constant to 1-D data.
    struct ConstantModel;

    impl RobustModel<f64> for ConstantModel {
        type Model = f64;

        fn min_sample_size(&self) -> usize {
            1
        }

        fn estimate(&self, data: &[&f64]) -> Option<f64> {
            Some(*data[0])
        }

        fn compute_error(&self, model: &f64, data: &f64) -> f64 {
            (model - data).abs()
        }
    }

    fn data() -> Vec<f64> {
        let mut v = vec![5.0; 80];
        v.extend((0..20).map(|i| 100.0 + i as f64 * 10.0));
        v
    }

    #[test]
    fn test_ransac_finds_majority() {
        let config = RobustConfig {
            threshold: 0.5,
            max_iterations: 200,
            confidence: 0.99,
            seed: Some(7),
        };
        let result = Ransac::new(config).run(&ConstantModel, &data(), &Deadline::unbounded());
        assert_eq!(result.model, Some(5.0));
        assert_eq!(result.num_inliers, 80);
        assert_eq!(result.inlier_indices().len(), 80);
        assert!(!result.exhausted);
    }

    #[test]
    fn test_ransac_seed_is_reproducible() {
        let config = RobustConfig {
            threshold: 0.5,
            max_iterations: 3,
            confidence: 0.99,
            seed: Some(42),
        };
        let a = Ransac::new(config.clone()).run(&ConstantModel, &data(), &Deadline::unbounded());
        let b = Ransac::new(config).run(&ConstantModel, &data(), &Deadline::unbounded());
        assert_eq!(a.model, b.model);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_ransac_expired_deadline() {
        let result = Ransac::new(RobustConfig::default()).run(
            &ConstantModel,
            &data(),
            &Deadline::after(Duration::ZERO),
        );
        assert!(result.exhausted);
        assert!(result.model.is_none());
    }

    #[test]
    fn test_ransac_too_few_points() {
        let result = Ransac::new(RobustConfig::default()).run(
            &ConstantModel,
            &[] as &[f64],
            &Deadline::unbounded(),
        );
        assert!(result.model.is_none());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(10, 10, 3, 0.99), 1);
        assert_eq!(adaptive_iterations(0, 10, 3, 0.99), usize::MAX);
        assert!(adaptive_iterations(5, 10, 3, 0.99) > 10);
    }
}
