//! K-fold cross-validation over the training partition.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::consensus::{EvaluationSample, collect_validation_samples};
use crate::dataset::Dataset;
use crate::error::RfError;
use crate::forest::build_forest;
use crate::sampler::{BagSampler, BagStrategy, DrawnBag};
use crate::tree::TreeParams;

/// Cross-validation configuration.
///
/// Construct via [`CrossValidation::new`], then chain `with_seed` if desired.
#[derive(Debug, Clone)]
pub struct CrossValidation {
    n_folds: usize,
    seed: u64,
}

/// Held-out predictions gathered from every fold.
#[derive(Debug)]
pub struct CrossValidationResult {
    /// One scored sample per held-out training sample, fold by fold.
    pub samples: Vec<EvaluationSample>,
    /// Majority-vote accuracy of each evaluated fold.
    pub fold_accuracies: Vec<f64>,
    /// Mean of `fold_accuracies`.
    pub mean_accuracy: f64,
}

impl CrossValidation {
    /// Create a new cross-validation config with the given number of folds.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidFoldCount`] if `n_folds` < 2.
    pub fn new(n_folds: usize) -> Result<Self, RfError> {
        if n_folds < 2 {
            return Err(RfError::InvalidFoldCount { k_folds: n_folds });
        }
        Ok(Self { n_folds, seed: 42 })
    }

    /// Set the seed for fold shuffling and fold-local bags.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the number of folds.
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Score every training sample with a forest grown on the other folds.
    ///
    /// Training indices are shuffled once and cut into contiguous folds of
    /// `n / k` samples; the last fold takes the remainder. Each fold grows
    /// `num_trees` trees on bags drawn from the remaining samples and votes
    /// on the held-out fold with all of them. Folds with nothing to hold
    /// out or nothing to train on are skipped.
    ///
    /// # Errors
    ///
    /// | Variant                   | When                    |
    /// |---------------------------|-------------------------|
    /// | [`RfError::EmptyDataset`] | `train` is empty        |
    /// | [`RfError::EmptyForest`]  | `num_trees` is zero     |
    #[instrument(skip_all, fields(n_folds = self.n_folds, n_samples = train.len()))]
    pub fn evaluate(
        &self,
        train: &Dataset,
        params: &TreeParams,
        strategy: BagStrategy,
        num_trees: usize,
    ) -> Result<CrossValidationResult, RfError> {
        if train.is_empty() {
            return Err(RfError::EmptyDataset);
        }
        if num_trees == 0 {
            return Err(RfError::EmptyForest);
        }

        let n = train.len();
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);

        let fold_size = match n / self.n_folds {
            0 => n,
            size => size,
        };
        let sampler = BagSampler::new(self.seed, strategy);

        let mut samples = Vec::with_capacity(n);
        let mut fold_accuracies = Vec::with_capacity(self.n_folds);

        for fold in 0..self.n_folds {
            let begin = (fold * fold_size).min(n);
            let end = if fold + 1 == self.n_folds {
                n
            } else {
                (begin + fold_size).min(n)
            };
            if begin >= end {
                debug!(fold, "empty fold skipped");
                continue;
            }

            let pool: Vec<usize> = order[..begin].iter().chain(&order[end..]).copied().collect();
            if pool.is_empty() {
                debug!(fold, "fold leaves no training samples, skipped");
                continue;
            }

            let bags: Vec<DrawnBag> = (0..num_trees)
                .map(|tree_index| DrawnBag {
                    bag: sampler.draw_fold_bag(fold, tree_index, &pool, n),
                    nonce: 0,
                    fallback: false,
                })
                .collect();
            let (forest, _) = build_forest(train, bags, params, self.seed)?;

            let mut held: Vec<usize> = order[begin..end].to_vec();
            held.sort_unstable();
            let fold_samples = collect_validation_samples(&forest, &train.subset(&held));
            let correct = fold_samples.iter().filter(|s| s.is_correct()).count();
            let accuracy = correct as f64 / fold_samples.len() as f64;
            debug!(fold, accuracy, held_out = held.len(), "fold completed");

            fold_accuracies.push(accuracy);
            samples.extend(fold_samples);
        }

        let mean_accuracy = if fold_accuracies.is_empty() {
            0.0
        } else {
            fold_accuracies.iter().sum::<f64>() / fold_accuracies.len() as f64
        };
        info!(
            folds = fold_accuracies.len(),
            mean_accuracy,
            "cross-validation complete"
        );

        Ok(CrossValidationResult {
            samples,
            fold_accuracies,
            mean_accuracy,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::dataset::{QuantBits, Sample};

    fn make_separable_data(n: usize) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let samples = (0..n)
            .map(|i| {
                let label = (i % 3) as u8;
                Sample::new(label, vec![label * 5 + rng.gen_range(0..4), rng.gen_range(0..16)])
            })
            .collect();
        Dataset::new(samples, QuantBits::new(4).unwrap()).unwrap()
    }

    #[test]
    fn every_sample_scored_once() {
        let data = make_separable_data(90);
        let cv = CrossValidation::new(4).unwrap().with_seed(3);
        let result = cv
            .evaluate(&data, &TreeParams::new(), BagStrategy::Bootstrap, 10)
            .unwrap();
        assert_eq!(result.samples.len(), 90);
        assert_eq!(result.fold_accuracies.len(), 4);
        assert!(result.samples.iter().all(|s| s.total_votes == 10));
    }

    #[test]
    fn separable_data_scores_high() {
        let data = make_separable_data(120);
        let cv = CrossValidation::new(5).unwrap();
        let result = cv
            .evaluate(&data, &TreeParams::new(), BagStrategy::Bootstrap, 15)
            .unwrap();
        assert!(result.mean_accuracy > 0.85, "mean_accuracy = {}", result.mean_accuracy);
    }

    #[test]
    fn more_folds_than_samples() {
        // fold_size falls back to n: fold 0 holds everything out and is skipped.
        let data = make_separable_data(3);
        let cv = CrossValidation::new(5).unwrap();
        let result = cv
            .evaluate(&data, &TreeParams::new(), BagStrategy::Bootstrap, 3)
            .unwrap();
        assert!(result.samples.is_empty());
        assert_eq!(result.mean_accuracy, 0.0);
    }

    #[test]
    fn invalid_fold_count() {
        assert!(CrossValidation::new(0).is_err());
        assert!(CrossValidation::new(1).is_err());
    }

    #[test]
    fn deterministic_for_seed() {
        let data = make_separable_data(60);
        let cv = CrossValidation::new(3).unwrap().with_seed(11);
        let strategy = BagStrategy::Subsample { ratio: 0.632 };
        let a = cv.evaluate(&data, &TreeParams::new(), strategy, 5).unwrap();
        let b = cv.evaluate(&data, &TreeParams::new(), strategy, 5).unwrap();
        assert_eq!(a.samples, b.samples);
    }
}
