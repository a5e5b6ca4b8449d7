//! Hyperparameter grid search and final forest fitting.

use serde::Serialize;
use tracing::{info, instrument};

use crate::config::{EvalStrategy, ForestConfig, ParamGrid, TrainingParams};
use crate::consensus::{
    EvaluationSample, collect_oob_samples, collect_validation_samples, default_consensus_threshold,
};
use crate::dataset::Dataset;
use crate::error::RfError;
use crate::eval::CrossValidation;
use crate::forest::{Forest, ForestStats, build_forest};
use crate::sampler::BagSampler;
use crate::threshold::{ThresholdSearch, find_best_threshold};

/// One evaluated grid point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    /// `min_split` used.
    pub min_split: u16,
    /// `min_leaf` used.
    pub min_leaf: u16,
    /// `max_depth` used.
    pub max_depth: u16,
    /// Largest per-tree node count of the candidate forest.
    pub max_nodes: usize,
    /// Objective score; 0.0 when nothing could be scored.
    pub score: f64,
    /// Selected consensus threshold, if a search result exists.
    pub threshold: Option<f64>,
}

/// Receives every evaluated candidate.
///
/// `improved` is `true` when the candidate beats every earlier one; the
/// sink may stage that forest and promote it in [`CandidateSink::finish`].
pub trait CandidateSink {
    /// Error type of the sink; grid errors convert into it.
    type Error: From<RfError>;

    /// Record one candidate.
    ///
    /// # Errors
    ///
    /// Implementation-defined; an error aborts the search.
    fn record(
        &mut self,
        record: &CandidateRecord,
        forest: &Forest,
        improved: bool,
    ) -> Result<(), Self::Error>;

    /// Called once after the last candidate with the winning record.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn finish(&mut self, _best: &CandidateRecord) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Collects records in memory.
impl CandidateSink for Vec<CandidateRecord> {
    type Error = RfError;

    fn record(&mut self, record: &CandidateRecord, _: &Forest, _: bool) -> Result<(), RfError> {
        self.push(record.clone());
        Ok(())
    }
}

/// A forest scored by the configured strategy.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// The forest grown on the training partition.
    pub forest: Forest,
    /// Shape of `forest`.
    pub stats: ForestStats,
    /// Scored samples the threshold was searched on.
    pub samples: Vec<EvaluationSample>,
    /// Threshold search result; `None` when no sample was scored.
    pub search: Option<ThresholdSearch>,
}

impl Evaluation {
    /// Objective score, 0.0 when nothing was scored.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.search.map_or(0.0, |s| s.score)
    }
}

/// The final model and how it was chosen.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Parameters of the final forest.
    pub params: TrainingParams,
    /// Final forest and its evaluation.
    pub evaluation: Evaluation,
    /// Threshold to deploy with the forest.
    pub consensus_threshold: f64,
    /// Grid points evaluated; 0 when the search was skipped.
    pub candidates_evaluated: usize,
}

impl TrainingOutcome {
    /// Score of the final forest.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.evaluation.score()
    }
}

/// Grid search over `min_split`, `min_leaf` and `max_depth`.
#[derive(Debug, Clone)]
pub struct GridSearch<'a> {
    config: &'a ForestConfig,
    train: &'a Dataset,
    validation: Option<&'a Dataset>,
    grid: ParamGrid,
}

impl<'a> GridSearch<'a> {
    /// Prepare a search over `train`, resolving unset ranges from its profile.
    ///
    /// # Errors
    ///
    /// | Variant                     | When                                             |
    /// |-----------------------------|--------------------------------------------------|
    /// | [`RfError::EmptyDataset`]   | `train` is empty                                 |
    /// | [`RfError::EmptyPartition`] | validation strategy without validation samples   |
    /// | [`RfError::EmptyGrid`]      | a configured range expands to nothing            |
    /// | validation errors           | from [`ForestConfig::validate`]                  |
    pub fn new(
        config: &'a ForestConfig,
        train: &'a Dataset,
        validation: Option<&'a Dataset>,
    ) -> Result<Self, RfError> {
        config.validate()?;
        if train.is_empty() {
            return Err(RfError::EmptyDataset);
        }
        if config.strategy() == EvalStrategy::Validation && validation.is_none_or(Dataset::is_empty) {
            return Err(RfError::EmptyPartition {
                partition: "validation",
            });
        }
        let grid = ParamGrid::resolve(config, &train.profile());
        if grid.is_empty() {
            return Err(RfError::EmptyGrid);
        }
        Ok(Self {
            config,
            train,
            validation,
            grid,
        })
    }

    /// Return the resolved grid.
    #[must_use]
    pub fn grid(&self) -> &ParamGrid {
        &self.grid
    }

    /// Parameters for one grid point.
    #[must_use]
    pub fn params_for(&self, min_split: u16, min_leaf: u16, max_depth: u16) -> TrainingParams {
        TrainingParams::from_config(
            self.config,
            self.train.n_features(),
            min_split,
            min_leaf,
            max_depth,
        )
    }

    /// Build a forest with `params` and score it by the configured strategy.
    ///
    /// # Errors
    ///
    /// Propagates forest construction and cross-validation errors.
    pub fn evaluate(&self, params: &TrainingParams) -> Result<Evaluation, RfError> {
        let tree_params = params.tree_params();
        let mut sampler = BagSampler::new(params.seed, params.bag_strategy);
        let bags = sampler.draw_bags(params.num_trees, self.train.len());
        // Every strategy needs the full-set forest: its node count fills the
        // node-log row and it is the model staged for the winning candidate.
        let (forest, stats) = build_forest(self.train, bags, &tree_params, params.seed)?;

        let samples = match self.config.strategy() {
            EvalStrategy::OutOfBag => collect_oob_samples(&forest, self.train),
            EvalStrategy::Validation => match self.validation {
                Some(validation) => collect_validation_samples(&forest, validation),
                None => Vec::new(),
            },
            EvalStrategy::KFold => {
                CrossValidation::new(self.config.k_folds())?
                    .with_seed(params.seed)
                    .evaluate(self.train, &tree_params, params.bag_strategy, params.num_trees)?
                    .samples
            }
        };
        let search = find_best_threshold(&samples, self.config.metric());

        Ok(Evaluation {
            forest,
            stats,
            samples,
            search,
        })
    }

    /// Try every grid point, report each to `sink`, then rebuild the winner.
    ///
    /// A candidate improves on the best so far only with a strictly higher
    /// score, so earlier grid points win ties.
    ///
    /// # Errors
    ///
    /// Forest errors converted into the sink's error type, or the sink's own errors.
    #[instrument(skip_all, fields(combinations = self.grid.len(), strategy = self.config.strategy().as_str()))]
    pub fn run<S: CandidateSink>(&self, sink: &mut S) -> Result<TrainingOutcome, S::Error> {
        let mut best: Option<(TrainingParams, CandidateRecord)> = None;
        let mut best_score = -1.0_f64;
        let mut evaluated = 0usize;

        for (min_split, min_leaf, max_depth) in self.grid.combinations() {
            let params = self.params_for(min_split, min_leaf, max_depth);
            let evaluation = self.evaluate(&params)?;
            let score = evaluation.score();
            let record = CandidateRecord {
                min_split,
                min_leaf,
                max_depth,
                max_nodes: evaluation.stats.max_nodes,
                score,
                threshold: evaluation.search.map(|s| s.threshold),
            };
            evaluated += 1;

            let improved = score > best_score;
            info!(
                min_split,
                min_leaf,
                max_depth,
                score,
                max_nodes = record.max_nodes,
                improved,
                "candidate evaluated"
            );
            sink.record(&record, &evaluation.forest, improved)?;
            if improved {
                best_score = score;
                best = Some((params, record));
            }
        }

        let (params, record) = best.ok_or(RfError::EmptyGrid)?;
        sink.finish(&record)?;
        info!(
            min_split = record.min_split,
            min_leaf = record.min_leaf,
            max_depth = record.max_depth,
            score = record.score,
            "best parameters selected"
        );

        let mut outcome = self.fit(params)?;
        outcome.candidates_evaluated = evaluated;
        Ok(outcome)
    }

    /// Build and score the forest for `params` without searching.
    ///
    /// # Errors
    ///
    /// Propagates forest construction and cross-validation errors.
    pub fn fit(&self, params: TrainingParams) -> Result<TrainingOutcome, RfError> {
        let evaluation = self.evaluate(&params)?;
        let consensus_threshold = evaluation.search.map_or_else(
            || default_consensus_threshold(self.train.n_labels(), self.train.n_features()),
            |s| s.threshold,
        );
        info!(
            score = evaluation.score(),
            consensus_threshold,
            total_nodes = evaluation.stats.total_nodes,
            "final forest fitted"
        );
        Ok(TrainingOutcome {
            params,
            evaluation,
            consensus_threshold,
            candidates_evaluated: 0,
        })
    }

    /// Fit with the middle of each range, skipping the search.
    ///
    /// # Errors
    ///
    /// Propagates forest construction and cross-validation errors.
    pub fn fit_default(&self) -> Result<TrainingOutcome, RfError> {
        let (min_split, min_leaf, max_depth) = self.grid.midpoint();
        self.fit(self.params_for(min_split, min_leaf, max_depth))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::config::ParamRange;
    use crate::dataset::{QuantBits, Sample};

    fn make_data(n: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let samples = (0..n)
            .map(|i| {
                let label = (i % 2) as u8;
                Sample::new(label, vec![label * 2 + rng.gen_range(0..2), rng.gen_range(0..4), rng.gen_range(0..4)])
            })
            .collect();
        Dataset::new(samples, QuantBits::new(2).unwrap()).unwrap()
    }

    fn small_config() -> ForestConfig {
        ForestConfig::new(6)
            .unwrap()
            .with_min_split(Some(ParamRange::span("min_split", 2, 3, 1).unwrap()))
            .with_min_leaf(Some(ParamRange::Fixed(1)))
            .with_max_depth(Some(ParamRange::span("max_depth", 3, 4, 1).unwrap()))
    }

    #[test]
    fn every_combination_recorded() {
        let data = make_data(80, 1);
        let config = small_config();
        let search = GridSearch::new(&config, &data, None).unwrap();
        let mut records: Vec<CandidateRecord> = Vec::new();
        let outcome = search.run(&mut records).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(outcome.candidates_evaluated, 4);
        let combos: Vec<_> = records.iter().map(|r| (r.min_split, r.max_depth)).collect();
        assert_eq!(combos, vec![(2, 3), (2, 4), (3, 3), (3, 4)]);
        assert!(records.iter().all(|r| r.max_nodes > 0));
    }

    #[test]
    fn winner_is_first_strict_maximum() {
        let data = make_data(80, 2);
        let config = small_config();
        let search = GridSearch::new(&config, &data, None).unwrap();
        let mut records: Vec<CandidateRecord> = Vec::new();
        let outcome = search.run(&mut records).unwrap();
        let best = records
            .iter()
            .fold(None::<&CandidateRecord>, |acc, r| match acc {
                Some(b) if r.score <= b.score => Some(b),
                _ => Some(r),
            })
            .unwrap();
        assert_eq!(outcome.params.min_split, best.min_split);
        assert_eq!(outcome.params.max_depth, best.max_depth);
        // The rebuild is deterministic, so the final score matches the record.
        assert!((outcome.score() - best.score).abs() < 1e-12);
    }

    #[test]
    fn config_is_not_mutated() {
        let data = make_data(60, 3);
        let config = small_config();
        let before = config.clone();
        let search = GridSearch::new(&config, &data, None).unwrap();
        search.run(&mut Vec::<CandidateRecord>::new()).unwrap();
        assert_eq!(config, before);
    }

    #[test]
    fn validation_strategy_needs_partition() {
        let data = make_data(40, 4);
        let config = small_config().with_strategy(EvalStrategy::Validation);
        let err = GridSearch::new(&config, &data, None).unwrap_err();
        assert!(matches!(err, RfError::EmptyPartition { partition: "validation" }));

        let validation = make_data(20, 5);
        let search = GridSearch::new(&config, &data, Some(&validation)).unwrap();
        let outcome = search.fit_default().unwrap();
        assert_eq!(outcome.evaluation.samples.len(), 20);
    }

    #[test]
    fn kfold_strategy_scores_all_training_samples() {
        let data = make_data(60, 6);
        let config = small_config().with_strategy(EvalStrategy::KFold).with_k_folds(3);
        let search = GridSearch::new(&config, &data, None).unwrap();
        let outcome = search.fit_default().unwrap();
        assert_eq!(outcome.evaluation.samples.len(), 60);
        assert!(outcome.score() > 0.5);
    }

    #[test]
    fn unscorable_forest_falls_back_to_default_threshold() {
        // One tree without bootstrap leaves no out-of-bag samples.
        let data = make_data(30, 7);
        let config = ForestConfig::new(1)
            .unwrap()
            .with_min_split(Some(ParamRange::Fixed(2)))
            .with_min_leaf(Some(ParamRange::Fixed(1)))
            .with_max_depth(Some(ParamRange::Fixed(4)));
        let search = GridSearch::new(&config, &data, None).unwrap();
        let outcome = search.fit_default().unwrap();
        assert!(outcome.evaluation.search.is_none());
        assert_eq!(outcome.score(), 0.0);
        assert!((outcome.consensus_threshold - default_consensus_threshold(2, 3)).abs() < 1e-12);
    }
}
