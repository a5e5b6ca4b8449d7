//! Accuracy regression tests for picoforest-rf.
//!
//! These tests verify that algorithmic changes do not degrade forest
//! accuracy on a deterministic quantized dataset, and that the compact
//! encoding never changes a prediction.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use picoforest_rf::{
    BagSampler, BagStrategy, CandidateRecord, CompactForest, CrossValidation, Dataset, EvalStrategy, ForestConfig,
    GridSearch, MetricFlags, ParamRange, QuantBits, Sample, SplitRatios, TestReport, TreeParams,
    build_forest, partition,
};

// ---------------------------------------------------------------------------
// Helper: deterministic quantized classification dataset
// ---------------------------------------------------------------------------

/// Generate a 300-sample, 10-feature, 3-label dataset with 3-bit features.
///
/// Features 0-2 are informative (label * 3 + noise in [0, 1]).
/// Features 3-9 are uniform noise over the full alphabet.
/// Samples are assigned round-robin across labels.
fn make_classification() -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let samples = (0..300)
        .map(|i| {
            let label = (i % 3) as u8;
            let features = (0..10)
                .map(|f| {
                    if f < 3 {
                        label * 3 + rng.gen_range(0..=1)
                    } else {
                        rng.gen_range(0..=7)
                    }
                })
                .collect();
            Sample::new(label, features)
        })
        .collect();
    Dataset::new(samples, QuantBits::new(3).unwrap()).unwrap()
}

fn small_grid(config: ForestConfig) -> ForestConfig {
    config
        .with_min_split(Some(ParamRange::span("min_split", 2, 4, 2).unwrap()))
        .with_min_leaf(Some(ParamRange::Fixed(1)))
        .with_max_depth(Some(ParamRange::span("max_depth", 4, 6, 2).unwrap()))
}

// ---------------------------------------------------------------------------
// a) cv_accuracy_above_threshold
// ---------------------------------------------------------------------------

/// 5-fold cross-validation mean accuracy must exceed 0.85.
#[test]
fn cv_accuracy_above_threshold() {
    let data = make_classification();
    let params = TreeParams::new().with_max_depth(6).with_max_features(Some(3));
    let cv = CrossValidation::new(5).unwrap().with_seed(42);
    let result = cv.evaluate(&data, &params, BagStrategy::Bootstrap, 30).unwrap();

    assert_eq!(result.fold_accuracies.len(), 5);
    assert!(
        result.mean_accuracy > 0.85,
        "cv mean_accuracy {} <= 0.85",
        result.mean_accuracy
    );
}

// ---------------------------------------------------------------------------
// b) oob_score_above_threshold
// ---------------------------------------------------------------------------

/// Out-of-bag grid search must find a candidate scoring above 0.80.
#[test]
fn oob_score_above_threshold() {
    let data = make_classification();
    let config = small_grid(ForestConfig::new(30).unwrap().with_seed(42));
    let search = GridSearch::new(&config, &data, None).unwrap();
    let outcome = search.run(&mut Vec::<CandidateRecord>::new()).unwrap();

    assert_eq!(outcome.candidates_evaluated, 4);
    assert!(outcome.score() > 0.80, "oob score {} <= 0.80", outcome.score());
}

// ---------------------------------------------------------------------------
// c) held_out_test_accuracy
// ---------------------------------------------------------------------------

/// A forest tuned on validation data must generalize to the test partition.
#[test]
fn held_out_test_accuracy() {
    let data = make_classification();
    let ratios = SplitRatios::new(0.6, 0.2, 0.2).unwrap();
    let parts = partition(&data, &ratios, true, 42).unwrap();
    let config = small_grid(
        ForestConfig::new(20)
            .unwrap()
            .with_strategy(EvalStrategy::Validation)
            .with_metric(MetricFlags::ACCURACY | MetricFlags::F1_SCORE),
    );
    let search = GridSearch::new(&config, &parts.train, parts.validation.as_ref()).unwrap();
    let outcome = search.fit_default().unwrap();

    let report = TestReport::evaluate(
        &outcome.evaluation.forest,
        &parts.test,
        outcome.consensus_threshold,
        config.metric(),
    )
    .unwrap()
    .unwrap();
    assert!(
        report.confusion.accuracy() > 0.80,
        "test accuracy {} <= 0.80",
        report.confusion.accuracy()
    );
}

// ---------------------------------------------------------------------------
// d) compact_forest_matches_trained_forest
// ---------------------------------------------------------------------------

/// Every sample must receive the same vote from the decoded compact forest.
#[test]
fn compact_forest_matches_trained_forest() {
    let data = make_classification();
    let bags = BagSampler::new(42, BagStrategy::Subsample { ratio: 0.632 }).draw_bags(25, data.len());
    let params = TreeParams::new().with_max_depth(7).with_max_features(Some(3));
    let (forest, _) = build_forest(&data, bags, &params, 42).unwrap();

    let compact = CompactForest::from_forest(&forest).unwrap();
    let decoded = CompactForest::decode(&compact.encode()).unwrap();
    assert_eq!(decoded.n_trees(), 25);

    for sample in data.samples() {
        let expected = forest.consensus(sample.features()).unwrap();
        let got = decoded.consensus(sample.features()).unwrap();
        assert_eq!(got, expected);
    }
}

// ---------------------------------------------------------------------------
// e) determinism
// ---------------------------------------------------------------------------

/// The same seed must produce the same candidates and the same encoded bytes.
#[test]
fn training_is_deterministic() {
    let data = make_classification();
    let config = small_grid(ForestConfig::new(10).unwrap().with_seed(7));

    let run = || {
        let search = GridSearch::new(&config, &data, None).unwrap();
        let mut records: Vec<CandidateRecord> = Vec::new();
        let outcome = search.run(&mut records).unwrap();
        let bytes = CompactForest::from_forest(&outcome.evaluation.forest)
            .unwrap()
            .encode();
        (records, bytes)
    };

    let (records_a, bytes_a) = run();
    let (records_b, bytes_b) = run();
    assert_eq!(records_a, records_b);
    assert_eq!(bytes_a, bytes_b);
}
