//! Parallel forest construction and per-forest statistics.

use std::sync::{Mutex, PoisonError};

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info, instrument, warn};

use crate::bag::Bag;
use crate::dataset::{Dataset, QuantBits};
use crate::error::RfError;
use crate::random::{FEATURE_STREAM_SALT, derive_rng};
use crate::sampler::DrawnBag;
use crate::tree::{BuiltTree, Tree, TreeParams, build_tree};

/// A fitted forest with the bag each tree was grown on.
#[derive(Debug, Clone)]
pub struct Forest {
    pub(crate) trees: Vec<Tree>,
    pub(crate) bags: Vec<Bag>,
    pub(crate) n_features: usize,
    pub(crate) n_labels: usize,
    pub(crate) quant_bits: QuantBits,
}

/// Build-queue high-water mark reported by one worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuePeak {
    /// Index of the tree in the forest.
    pub tree_index: usize,
    /// Largest number of ranges waiting in the queue.
    pub peak_queue: usize,
    /// `peak_queue` as a percentage of the tree's node count.
    pub peak_percent: f64,
}

/// Aggregate shape of a forest.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestStats {
    /// Nodes across all trees.
    pub total_nodes: usize,
    /// Leaves across all trees.
    pub total_leaves: usize,
    /// Largest per-tree node count.
    pub max_nodes: usize,
    /// Mean nodes per tree.
    pub avg_nodes: f64,
    /// Shallowest tree depth.
    pub min_depth: usize,
    /// Deepest tree depth.
    pub max_depth: usize,
    /// Queue peaks ordered by tree index. Empty for decoded forests.
    pub queue_peaks: Vec<QueuePeak>,
}

/// Grow one tree per bag in parallel.
///
/// Each worker draws its feature subsets from a stream derived from
/// `(tree_index, nonce)`, so the result does not depend on scheduling.
/// Queue peaks are pushed into a shared collector and returned in
/// [`ForestStats::queue_peaks`].
///
/// # Errors
///
/// | Variant                   | When                       |
/// |---------------------------|----------------------------|
/// | [`RfError::EmptyDataset`] | `train` or any bag is empty |
/// | [`RfError::EmptyForest`]  | `bags` is empty            |
#[instrument(skip_all, fields(n_trees = bags.len(), n_samples = train.len()))]
pub fn build_forest(
    train: &Dataset,
    bags: Vec<DrawnBag>,
    params: &TreeParams,
    seed: u64,
) -> Result<(Forest, ForestStats), RfError> {
    if train.is_empty() {
        return Err(RfError::EmptyDataset);
    }
    if bags.is_empty() {
        return Err(RfError::EmptyForest);
    }

    let collector: Mutex<Vec<QueuePeak>> = Mutex::new(Vec::with_capacity(bags.len()));
    let feature_seed = seed ^ FEATURE_STREAM_SALT;

    let built: Vec<BuiltTree> = bags
        .par_iter()
        .enumerate()
        .map(|(tree_index, drawn)| {
            let mut rng = derive_rng(feature_seed, tree_index as u64, drawn.nonce);
            let built = build_tree(train, &drawn.bag, params, &mut rng)?;
            let n_nodes = built.tree.n_nodes().max(1);
            let peak = QueuePeak {
                tree_index,
                peak_queue: built.peak_queue,
                peak_percent: built.peak_queue as f64 / n_nodes as f64 * 100.0,
            };
            collector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(peak);
            Ok(built)
        })
        .collect::<Result<_, RfError>>()?;

    let exhausted = built.iter().filter(|b| b.budget_exhausted).count();
    if exhausted > 0 {
        warn!(
            trees = exhausted,
            max_nodes = params.max_nodes,
            "node budget exhausted, impure leaves emitted"
        );
    }

    let mut queue_peaks = collector
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    queue_peaks.sort_by_key(|p| p.tree_index);

    let forest = Forest {
        trees: built.into_iter().map(|b| b.tree).collect(),
        bags: bags.into_iter().map(|d| d.bag).collect(),
        n_features: train.n_features(),
        n_labels: train.n_labels(),
        quant_bits: train.quant_bits(),
    };

    let mut stats = forest.stats();
    stats.queue_peaks = queue_peaks;

    debug!(
        total_nodes = stats.total_nodes,
        max_nodes = stats.max_nodes,
        min_depth = stats.min_depth,
        max_depth = stats.max_depth,
        "forest built"
    );

    Ok((forest, stats))
}

impl Forest {
    /// Assemble a forest from parts.
    ///
    /// `bags` may be empty (for example after decoding a compact file); out-of-bag
    /// evaluation then treats every sample as in-bag.
    #[must_use]
    pub fn from_parts(
        trees: Vec<Tree>,
        bags: Vec<Bag>,
        n_features: usize,
        n_labels: usize,
        quant_bits: QuantBits,
    ) -> Self {
        Self {
            trees,
            bags,
            n_features,
            n_labels,
            quant_bits,
        }
    }

    /// Return the trees.
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Return the per-tree bags.
    #[must_use]
    pub fn bags(&self) -> &[Bag] {
        &self.bags
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of features.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of label slots.
    #[must_use]
    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    /// Return the quantization bit width.
    #[must_use]
    pub fn quant_bits(&self) -> QuantBits {
        self.quant_bits
    }

    /// Return `true` if tree `tree_index` never drew training sample `sample`.
    #[must_use]
    pub fn is_out_of_bag(&self, tree_index: usize, sample: usize) -> bool {
        self.bags
            .get(tree_index)
            .is_some_and(|bag| !bag.contains(sample))
    }

    /// Compute node, leaf and depth aggregates.
    #[must_use]
    pub fn stats(&self) -> ForestStats {
        let total_nodes: usize = self.trees.iter().map(Tree::n_nodes).sum();
        let total_leaves: usize = self.trees.iter().map(Tree::n_leaves).sum();
        let max_nodes = self.trees.iter().map(Tree::n_nodes).max().unwrap_or(0);
        let depths: Vec<usize> = self.trees.iter().map(Tree::depth).collect();
        let avg_nodes = if self.trees.is_empty() {
            0.0
        } else {
            total_nodes as f64 / self.trees.len() as f64
        };
        ForestStats {
            total_nodes,
            total_leaves,
            max_nodes,
            avg_nodes,
            min_depth: depths.iter().copied().min().unwrap_or(0),
            max_depth: depths.iter().copied().max().unwrap_or(0),
            queue_peaks: Vec::new(),
        }
    }

    /// Log the forest shape at info level.
    pub fn log_summary(&self) {
        let stats = self.stats();
        info!(
            n_trees = self.n_trees(),
            total_nodes = stats.total_nodes,
            total_leaves = stats.total_leaves,
            avg_nodes = stats.avg_nodes,
            min_depth = stats.min_depth,
            max_depth = stats.max_depth,
            "forest summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::dataset::Sample;
    use crate::sampler::{BagSampler, BagStrategy};

    /// Three labels separated along feature 0, with two noise features.
    fn make_separable_data(n: usize) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let samples = (0..n)
            .map(|i| {
                let label = (i % 3) as u8;
                let signal = label * 5 + rng.gen_range(0..5);
                Sample::new(label, vec![signal, rng.gen_range(0..16), rng.gen_range(0..16)])
            })
            .collect();
        Dataset::new(samples, QuantBits::new(4).unwrap()).unwrap()
    }

    fn build(data: &Dataset, num_trees: usize, seed: u64) -> (Forest, ForestStats) {
        let bags = BagSampler::new(seed, BagStrategy::Bootstrap).draw_bags(num_trees, data.len());
        let params = TreeParams::new().with_max_depth(10).with_max_features(Some(2));
        build_forest(data, bags, &params, seed).unwrap()
    }

    #[test]
    fn builds_requested_tree_count() {
        let data = make_separable_data(90);
        let (forest, stats) = build(&data, 12, 42);
        assert_eq!(forest.n_trees(), 12);
        assert_eq!(forest.bags().len(), 12);
        assert_eq!(stats.queue_peaks.len(), 12);
        for (i, peak) in stats.queue_peaks.iter().enumerate() {
            assert_eq!(peak.tree_index, i);
            assert!(peak.peak_percent > 0.0 && peak.peak_percent <= 100.0);
        }
    }

    #[test]
    fn stats_are_consistent() {
        let data = make_separable_data(90);
        let (forest, stats) = build(&data, 8, 1);
        let sum: usize = forest.trees().iter().map(Tree::n_nodes).sum();
        assert_eq!(stats.total_nodes, sum);
        assert!(stats.max_nodes >= stats.avg_nodes as usize);
        assert!(stats.min_depth <= stats.max_depth);
        assert!(stats.total_leaves > forest.n_trees() - 1);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let data = make_separable_data(60);
        let (a, _) = build(&data, 6, 99);
        let (b, _) = build(&data, 6, 99);
        assert_eq!(a.trees(), b.trees());
    }

    #[test]
    fn out_of_bag_matches_bags() {
        let data = make_separable_data(60);
        let (forest, _) = build(&data, 5, 3);
        for t in 0..forest.n_trees() {
            for s in 0..data.len() {
                assert_eq!(forest.is_out_of_bag(t, s), forest.bags()[t].count(s) == 0);
            }
        }
    }

    #[test]
    fn empty_bag_list_rejected() {
        let data = make_separable_data(10);
        let err = build_forest(&data, Vec::new(), &TreeParams::new(), 0).unwrap_err();
        assert!(matches!(err, RfError::EmptyForest));
    }
}
