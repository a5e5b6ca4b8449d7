use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use picoforest_io::{
    ConfigDocument, DatasetMetadata, DatasetReader, ModelExtras, ModelName, ResultWriter,
    resolve_quant_bits,
};
use picoforest_rf::{
    CompactForest, ConfusionMatrix, EvaluationSample, GridSearch, TestReport, check_threshold,
    default_consensus_threshold, metrics_at_threshold, partition,
};

#[derive(Parser)]
#[command(name = "picoforest")]
#[command(about = "Train quantized random forests and pack them for microcontrollers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed, used when the configuration document sets none
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for tree construction (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Tune and train a forest, then write the compact model and its configuration
    Train {
        /// Path to the quantized dataset CSV (overrides the configuration document)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Path to the JSON configuration document
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for result files
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Train once with mid-range parameters instead of searching the grid
        #[arg(long, default_value_t = false)]
        skip_grid_search: bool,

        /// Read at most this many samples (0 = all)
        #[arg(long)]
        max_samples: Option<usize>,
    },

    /// Score a labelled CSV against a compact forest file
    Predict {
        /// Path to the compact forest (`*_forest.bin`)
        #[arg(long)]
        model: PathBuf,

        /// Path to the labelled dataset CSV
        #[arg(long)]
        data: PathBuf,

        /// Consensus threshold (defaults to the label-count heuristic)
        #[arg(long)]
        threshold: Option<f64>,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput {
    model: String,
    n_samples: usize,
    n_features: usize,
    n_labels: usize,
    skipped_rows: usize,
    quantization_bits: u8,
    candidates_evaluated: usize,
    min_split: u16,
    min_leaf: u16,
    max_depth: u16,
    result_score: f64,
    consensus_threshold: f64,
    test: Option<TestOutput>,
    resident_bytes: usize,
    forest_path: PathBuf,
    config_path: PathBuf,
}

#[derive(Serialize)]
struct TestOutput {
    n_samples: usize,
    score: f64,
    accuracy: f64,
    precision: f64,
    recall: f64,
    f1: f64,
    confusion_matrix: Vec<Vec<usize>>,
    rejected: Vec<usize>,
}

#[derive(Serialize)]
struct PredictOutput {
    model_n_trees: usize,
    model_required_features: usize,
    n_samples: usize,
    threshold: f64,
    accepted: usize,
    correct: usize,
    unpredictable: usize,
    accuracy: f64,
    confusion_matrix: Vec<Vec<usize>>,
}

fn test_output(report: &TestReport) -> TestOutput {
    TestOutput {
        n_samples: report.confusion.total(),
        score: report.score,
        accuracy: report.metrics.accuracy,
        precision: report.metrics.precision,
        recall: report.metrics.recall,
        f1: report.metrics.f1,
        confusion_matrix: report.confusion.as_rows().to_vec(),
        rejected: report.confusion.rejected().to_vec(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Configure Rayon thread pool
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Train {
            data,
            config,
            output_dir,
            skip_grid_search,
            max_samples,
        } => {
            // 1. Configuration document
            let doc = match &config {
                Some(path) => ConfigDocument::from_path(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?,
                None => {
                    info!("no configuration document, using defaults");
                    ConfigDocument::default()
                }
            };
            let data_path = data
                .or_else(|| doc.data_path())
                .context("no dataset given: pass --data or set data_path in the config")?;
            let model = ModelName::from_data_path(&data_path)?;

            // 2. Dataset
            let bits = resolve_quant_bits(
                &DatasetMetadata::path_for(&data_path, &model),
                doc.quant_bits(),
            );
            let max_samples = max_samples.or_else(|| doc.max_samples());
            let loaded = DatasetReader::new(&data_path)
                .with_quant_bits(bits)
                .with_max_samples(max_samples)
                .read()
                .context("failed to read dataset CSV")?;
            let dataset = loaded.dataset;
            info!(
                model = model.as_str(),
                n_samples = dataset.len(),
                n_features = dataset.n_features(),
                n_labels = dataset.n_labels(),
                skipped = loaded.skipped_rows,
                "dataset loaded"
            );

            // 3. Forest configuration
            let mut forest_config = doc
                .forest_config(dataset.quant_bits(), &dataset.profile())
                .context("invalid training configuration")?;
            if doc.random_seed.is_none() {
                forest_config = forest_config.with_seed(cli.seed);
            }

            // 4. Partition
            let parts = partition(
                &dataset,
                &forest_config.split_ratios(),
                forest_config.strategy().needs_validation(),
                forest_config.seed(),
            )
            .context("failed to partition dataset")?;
            info!(
                train = parts.train.len(),
                test = parts.test.len(),
                validation = parts.validation.as_ref().map_or(0, |v| v.len()),
                "dataset partitioned"
            );

            // 5. Train
            let writer = ResultWriter::new(&output_dir, model.clone())?;
            let search = GridSearch::new(&forest_config, &parts.train, parts.validation.as_ref())
                .context("failed to prepare training")?;
            let (outcome, compact) = if skip_grid_search {
                let outcome = search.fit_default().context("training failed")?;
                let compact = writer.write_forest(&outcome.evaluation.forest)?;
                (outcome, compact)
            } else {
                let mut log = writer.node_log()?;
                let outcome = search.run(&mut log).context("grid search failed")?;
                info!(rows = log.rows(), path = %writer.node_log_path().display(), "node log written");
                drop(log);
                let compact = CompactForest::load(writer.forest_path())
                    .context("failed to reload best forest")?;
                (outcome, compact)
            };

            // 6. Held-out test
            let report = TestReport::evaluate(
                &outcome.evaluation.forest,
                &parts.test,
                outcome.consensus_threshold,
                forest_config.metric(),
            )
            .context("test evaluation failed")?;
            match &report {
                Some(r) => info!(score = r.score, accuracy = r.metrics.accuracy, "test set scored"),
                None => warn!("test partition is empty, no test score"),
            }

            // 7. Configuration artifact
            let extras = ModelExtras {
                max_samples,
                enable_retrain: doc.enable_retrain(),
                test_score: report.as_ref().map(|r| r.score),
            };
            writer.write_config(&forest_config, &outcome, &compact, extras)?;

            let output = TrainOutput {
                model: model.as_str().to_string(),
                n_samples: dataset.len(),
                n_features: dataset.n_features(),
                n_labels: dataset.n_labels(),
                skipped_rows: loaded.skipped_rows,
                quantization_bits: dataset.quant_bits().bits(),
                candidates_evaluated: outcome.candidates_evaluated,
                min_split: outcome.params.min_split,
                min_leaf: outcome.params.min_leaf,
                max_depth: outcome.params.max_depth,
                result_score: outcome.score(),
                consensus_threshold: outcome.consensus_threshold,
                test: report.as_ref().map(test_output),
                resident_bytes: compact.resident_bytes(),
                forest_path: writer.forest_path(),
                config_path: writer.config_path(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Predict {
            model,
            data,
            threshold,
        } => {
            let threshold = threshold
                .map(check_threshold)
                .transpose()
                .context("invalid --threshold")?;

            // 1. Load model
            let forest = CompactForest::load(&model).context("failed to load model")?;
            info!(
                n_trees = forest.n_trees(),
                required_features = forest.required_features(),
                "model loaded"
            );

            // 2. Read dataset
            let dataset = DatasetReader::new(&data)
                .read()
                .context("failed to read dataset CSV")?
                .dataset;
            info!(n_samples = dataset.len(), "dataset loaded");

            // 3. Score
            let threshold = threshold.unwrap_or_else(|| {
                default_consensus_threshold(dataset.n_labels(), dataset.n_features())
            });
            let samples = dataset
                .samples()
                .iter()
                .map(|s| Ok(EvaluationSample::new(s.label(), forest.consensus(s.features())?)))
                .collect::<Result<Vec<_>, picoforest_rf::RfError>>()
                .context("prediction failed")?;
            let metrics = metrics_at_threshold(&samples, threshold);
            let confusion = ConfusionMatrix::from_samples(&samples, threshold, dataset.n_labels())?;

            let accepted = samples
                .iter()
                .filter(|s| s.total_votes > 0 && s.consensus >= threshold)
                .count();
            let correct = samples
                .iter()
                .filter(|s| s.consensus >= threshold && s.predicted == Some(s.actual))
                .count();
            let unpredictable = samples.iter().filter(|s| s.total_votes == 0).count();

            let output = PredictOutput {
                model_n_trees: forest.n_trees(),
                model_required_features: forest.required_features(),
                n_samples: samples.len(),
                threshold,
                accepted,
                correct,
                unpredictable,
                accuracy: metrics.accuracy,
                confusion_matrix: confusion.as_rows().to_vec(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
