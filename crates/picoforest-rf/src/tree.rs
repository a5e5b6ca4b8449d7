use std::collections::VecDeque;

use rand::Rng;
use tracing::debug;

use crate::{
    RfError,
    bag::Bag,
    dataset::Dataset,
    node::{FeatureIndex, Node, NodeIndex},
    split::{SplitCriterion, find_best_split},
};

/// Floor applied to the size-scaled impurity threshold.
const MIN_ADAPTIVE_THRESHOLD: f64 = 1e-4;

/// Stopping rules and split settings for growing one tree.
///
/// # Defaults
///
/// | Parameter            | Default      |
/// |----------------------|--------------|
/// | `min_split`          | 2            |
/// | `min_leaf`           | 1            |
/// | `max_depth`          | 8            |
/// | `max_nodes`          | `u32::MAX`   |
/// | `impurity_threshold` | 0.01         |
/// | `criterion`          | `Gini`       |
/// | `max_features`       | `None` (all) |
#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    pub(crate) min_split: usize,
    pub(crate) min_leaf: usize,
    pub(crate) max_depth: usize,
    pub(crate) max_nodes: usize,
    pub(crate) impurity_threshold: f64,
    pub(crate) criterion: SplitCriterion,
    pub(crate) max_features: Option<usize>,
}

impl TreeParams {
    /// Create parameters with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_split: 2,
            min_leaf: 1,
            max_depth: 8,
            max_nodes: u32::MAX as usize,
            impurity_threshold: 0.01,
            criterion: SplitCriterion::Gini,
            max_features: None,
        }
    }

    /// Set the minimum node size eligible for splitting.
    #[must_use]
    pub fn with_min_split(mut self, min_split: usize) -> Self {
        self.min_split = min_split;
        self
    }

    /// Set the minimum size of each child of a split.
    #[must_use]
    pub fn with_min_leaf(mut self, min_leaf: usize) -> Self {
        self.min_leaf = min_leaf;
        self
    }

    /// Set the depth limit. Nodes at depth `max_depth - 1` or deeper become leaves.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the node budget per tree.
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Set the minimum gain a split must exceed, before size scaling.
    #[must_use]
    pub fn with_impurity_threshold(mut self, impurity_threshold: f64) -> Self {
        self.impurity_threshold = impurity_threshold;
        self
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set how many features each node samples. `None` means all.
    #[must_use]
    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    /// Gain threshold for a node holding `n_samples` samples.
    ///
    /// Shrinks as nodes grow: `t / (1 + log2(n + 1))`, floored at `1e-4`.
    /// Nodes at or below `min_split` use the raw threshold.
    #[must_use]
    pub fn adaptive_threshold(&self, n_samples: usize) -> f64 {
        let base = self.impurity_threshold;
        if base > 0.0 && n_samples > self.min_split {
            let scaled = base / (1.0 + ((n_samples + 1) as f64).log2());
            scaled.max(MIN_ADAPTIVE_THRESHOLD)
        } else {
            base
        }
    }
}

impl Default for TreeParams {
    fn default() -> Self {
        Self::new()
    }
}

/// A tree together with statistics gathered while growing it.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    /// The grown tree.
    pub tree: Tree,
    /// Largest number of pending ranges held by the build queue.
    pub peak_queue: usize,
    /// `true` if at least one node was turned into a leaf because of the node budget.
    pub budget_exhausted: bool,
}

/// One pending `[begin, end)` range of the shared index array.
struct Pending {
    node: usize,
    begin: usize,
    end: usize,
    depth: usize,
}

/// Grow a tree breadth-first over the members of `bag`.
///
/// The bag is expanded into a single index array that is partitioned in
/// place. Each queued range becomes either a leaf holding its majority
/// label or a split whose two children are appended to the arena and
/// queued one level deeper.
///
/// `rng` drives the per-node feature subset.
///
/// # Errors
///
/// Returns [`RfError::EmptyDataset`] when the bag is empty.
pub fn build_tree(
    data: &Dataset,
    bag: &Bag,
    params: &TreeParams,
    rng: &mut impl Rng,
) -> Result<BuiltTree, RfError> {
    let mut indices = bag.to_indices();
    if indices.is_empty() {
        return Err(RfError::EmptyDataset);
    }

    let n_features = data.n_features();
    let n_labels = data.n_labels();
    let subset_size = params
        .max_features
        .unwrap_or(n_features)
        .clamp(1, n_features);

    let mut nodes: Vec<Node> = vec![Node::Leaf { label: 0 }];
    let mut queue: VecDeque<Pending> = VecDeque::new();
    queue.push_back(Pending {
        node: 0,
        begin: 0,
        end: indices.len(),
        depth: 0,
    });
    let mut peak_queue = queue.len();
    let mut budget_exhausted = false;

    let mut counts = vec![0usize; n_labels];
    let mut feature_order: Vec<usize> = (0..n_features).collect();
    let mut scratch: Vec<usize> = Vec::with_capacity(indices.len());

    while let Some(Pending { node, begin, end, depth }) = queue.pop_front() {
        let range = &indices[begin..end];
        let total = range.len();

        counts.iter_mut().for_each(|c| *c = 0);
        for &row in range {
            counts[data.sample(row).label() as usize] += 1;
        }
        let majority = majority_label(&counts);
        let present = counts.iter().filter(|&&c| c > 0).count();

        let over_budget = nodes.len() + 2 > params.max_nodes;
        if over_budget && present > 1 {
            budget_exhausted = true;
        }
        if present <= 1
            || total < params.min_split
            || depth >= params.max_depth.saturating_sub(1)
            || over_budget
        {
            nodes[node] = Node::Leaf { label: majority };
            continue;
        }

        // Partial Fisher-Yates: only the first `subset_size` positions matter.
        for i in 0..subset_size {
            let j = rng.gen_range(i..n_features);
            feature_order.swap(i, j);
        }
        let candidates = &feature_order[..subset_size];

        let Some(split) = find_best_split(data, range, &counts, candidates, params.criterion)
        else {
            nodes[node] = Node::Leaf { label: majority };
            continue;
        };
        if split.n_left < params.min_leaf
            || split.n_right < params.min_leaf
            || split.gain <= params.adaptive_threshold(total)
        {
            nodes[node] = Node::Leaf { label: majority };
            continue;
        }

        // Stable partition: left rows compact in place, right rows go via scratch.
        let feature = split.feature.index();
        scratch.clear();
        let mut write = begin;
        for read in begin..end {
            let row = indices[read];
            if data.sample(row).features()[feature] <= split.threshold {
                indices[write] = row;
                write += 1;
            } else {
                scratch.push(row);
            }
        }
        indices[write..end].copy_from_slice(&scratch);
        let mid = write;

        let left = nodes.len();
        nodes.push(Node::Leaf { label: majority });
        nodes.push(Node::Leaf { label: majority });
        nodes[node] = Node::Split {
            feature: FeatureIndex::new(feature),
            threshold: split.threshold,
            left: NodeIndex::new(left),
        };

        for (child, child_begin, child_end) in [(left, begin, mid), (left + 1, mid, end)] {
            // An empty child keeps the parent's majority label.
            if child_begin == child_end {
                continue;
            }
            queue.push_back(Pending {
                node: child,
                begin: child_begin,
                end: child_end,
                depth: depth + 1,
            });
            peak_queue = peak_queue.max(queue.len());
        }
    }

    debug!(
        n_nodes = nodes.len(),
        peak_queue,
        budget_exhausted,
        "tree built"
    );

    Ok(BuiltTree {
        tree: Tree { nodes, n_features },
        peak_queue,
        budget_exhausted,
    })
}

/// First label with the highest count, scanning labels in ascending order.
pub(crate) fn majority_label(counts: &[usize]) -> u8 {
    let mut best = 0usize;
    for (label, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = label;
        }
    }
    best as u8
}

/// A fitted decision tree stored as a breadth-first node arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) n_features: usize,
}

impl Tree {
    /// Build a tree directly from an arena.
    ///
    /// The caller guarantees that every split's `left + 1` is in bounds.
    #[must_use]
    pub fn from_nodes(nodes: Vec<Node>, n_features: usize) -> Self {
        Self { nodes, n_features }
    }

    /// Predict the label for a single sample.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `features.len() != n_features`.
    pub fn predict(&self, features: &[u8]) -> Result<u8, RfError> {
        if features.len() != self.n_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: features.len(),
            });
        }
        Ok(self.predict_unchecked(features))
    }

    /// Traverse without checking the feature count.
    pub(crate) fn predict_unchecked(&self, features: &[u8]) -> u8 {
        let mut idx = 0usize;
        loop {
            match self.nodes[idx] {
                Node::Leaf { label } => return label,
                Node::Split {
                    feature,
                    threshold,
                    left,
                } => {
                    idx = if features[feature.index()] <= threshold {
                        left.index()
                    } else {
                        left.sibling().index()
                    };
                }
            }
        }
    }

    /// Return the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the number of features the tree expects.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth of the tree.
    ///
    /// A single-node tree (just a root leaf) has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        let mut max_depth = 0usize;
        let mut queue = VecDeque::new();
        queue.push_back((0usize, 0usize));

        while let Some((node_idx, d)) = queue.pop_front() {
            match self.nodes[node_idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split { left, .. } => {
                    queue.push_back((left.index(), d + 1));
                    queue.push_back((left.sibling().index(), d + 1));
                }
            }
        }

        max_depth
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::dataset::{QuantBits, Sample};

    fn dataset(rows: &[(u8, &[u8])], bits: u8) -> Dataset {
        let samples = rows.iter().map(|(l, f)| Sample::new(*l, f.to_vec())).collect();
        Dataset::new(samples, QuantBits::new(bits).unwrap()).unwrap()
    }

    fn full_bag(n: usize) -> Bag {
        let mut bag = Bag::new(n);
        for i in 0..n {
            bag.try_insert(i);
        }
        bag
    }

    fn grow(data: &Dataset, params: &TreeParams) -> BuiltTree {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        build_tree(data, &full_bag(data.len()), params, &mut rng).unwrap()
    }

    fn assert_arena_invariant(tree: &Tree) {
        for (i, node) in tree.nodes().iter().enumerate() {
            if let Node::Split { left, .. } = node {
                assert!(left.index() > i, "left child {} not after node {i}", left.index());
                assert!(left.index() + 1 < tree.n_nodes(), "right child out of bounds");
            }
        }
    }

    // --- TreeParams ---

    #[test]
    fn adaptive_threshold_scales_with_size() {
        let params = TreeParams::new().with_impurity_threshold(0.1).with_min_split(2);
        // n = 7: 0.1 / (1 + log2(8)) = 0.025
        assert!((params.adaptive_threshold(7) - 0.025).abs() < 1e-12);
        // At or below min_split the raw threshold applies.
        assert!((params.adaptive_threshold(2) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn adaptive_threshold_has_floor() {
        let params = TreeParams::new().with_impurity_threshold(0.0002);
        assert!((params.adaptive_threshold(1_000_000) - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn zero_threshold_stays_zero() {
        let params = TreeParams::new().with_impurity_threshold(0.0);
        assert_eq!(params.adaptive_threshold(500), 0.0);
    }

    // --- build_tree ---

    #[test]
    fn pure_data_single_leaf() {
        let ds = dataset(&[(2, &[0, 1]), (2, &[3, 2]), (2, &[1, 1])], 2);
        let built = grow(&ds, &TreeParams::new());
        assert_eq!(built.tree.n_nodes(), 1);
        assert_eq!(built.tree.predict(&[0, 0]).unwrap(), 2);
    }

    #[test]
    fn four_sample_scenario_terminates_in_pure_leaves() {
        // Labels form two same-label blocks along feature 0.
        let ds = dataset(&[(0, &[0, 1]), (0, &[1, 3]), (1, &[2, 0]), (1, &[3, 2])], 2);
        let params = TreeParams::new()
            .with_min_split(2)
            .with_max_depth(3)
            .with_impurity_threshold(0.0);
        let built = grow(&ds, &params);
        assert_arena_invariant(&built.tree);
        assert_eq!(built.tree.n_leaves(), 2);
        for sample in ds.samples() {
            assert_eq!(built.tree.predict(sample.features()).unwrap(), sample.label());
        }
    }

    #[test]
    fn xor_needs_two_levels() {
        let ds = dataset(&[(0, &[0, 0]), (1, &[0, 1]), (1, &[1, 0]), (0, &[1, 1])], 1);
        let params = TreeParams::new()
            .with_max_depth(4)
            .with_impurity_threshold(0.0);
        let built = grow(&ds, &params);
        assert_arena_invariant(&built.tree);
        // The root split has zero gain on XOR, so with a zero threshold it is rejected.
        assert_eq!(built.tree.n_nodes(), 1);
    }

    #[test]
    fn depth_limit_respected() {
        let rows: Vec<(u8, Vec<u8>)> = (0..64u8).map(|i| (i % 4, vec![i % 16, i / 16])).collect();
        let refs: Vec<(u8, &[u8])> = rows.iter().map(|(l, f)| (*l, f.as_slice())).collect();
        let ds = dataset(&refs, 4);
        let params = TreeParams::new().with_max_depth(3).with_impurity_threshold(0.0);
        let built = grow(&ds, &params);
        assert_arena_invariant(&built.tree);
        assert!(built.tree.depth() <= 2, "depth = {}", built.tree.depth());
    }

    #[test]
    fn node_budget_forces_leaves() {
        let rows: Vec<(u8, Vec<u8>)> = (0..64u8).map(|i| (i % 4, vec![i % 16, i / 16])).collect();
        let refs: Vec<(u8, &[u8])> = rows.iter().map(|(l, f)| (*l, f.as_slice())).collect();
        let ds = dataset(&refs, 4);
        let params = TreeParams::new()
            .with_max_depth(20)
            .with_max_nodes(5)
            .with_impurity_threshold(0.0);
        let built = grow(&ds, &params);
        assert!(built.tree.n_nodes() <= 5);
        assert!(built.budget_exhausted);
        assert_arena_invariant(&built.tree);
    }

    #[test]
    fn min_leaf_blocks_small_children() {
        let ds = dataset(&[(0, &[0]), (1, &[3]), (1, &[3]), (1, &[3])], 2);
        let params = TreeParams::new().with_min_leaf(2).with_impurity_threshold(0.0);
        let built = grow(&ds, &params);
        assert_eq!(built.tree.n_nodes(), 1);
        assert_eq!(built.tree.predict(&[0]).unwrap(), 1);
    }

    #[test]
    fn repeated_bag_members_weigh_in() {
        let ds = dataset(&[(0, &[0]), (1, &[0])], 2);
        let mut bag = Bag::new(2);
        bag.try_insert(0);
        bag.try_insert(1);
        bag.try_insert(1);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let built = build_tree(&ds, &bag, &TreeParams::new(), &mut rng).unwrap();
        assert_eq!(built.tree.predict(&[0]).unwrap(), 1);
    }

    #[test]
    fn empty_bag_rejected() {
        let ds = dataset(&[(0, &[0])], 2);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = build_tree(&ds, &Bag::new(1), &TreeParams::new(), &mut rng).unwrap_err();
        assert!(matches!(err, RfError::EmptyDataset));
    }

    #[test]
    fn breadth_first_peak_is_tracked() {
        let rows: Vec<(u8, Vec<u8>)> = (0..32u8).map(|i| (i % 8, vec![i % 8, i / 8])).collect();
        let refs: Vec<(u8, &[u8])> = rows.iter().map(|(l, f)| (*l, f.as_slice())).collect();
        let ds = dataset(&refs, 3);
        let params = TreeParams::new().with_max_depth(10).with_impurity_threshold(0.0);
        let built = grow(&ds, &params);
        assert!(built.peak_queue >= 2);
        for sample in ds.samples() {
            assert_eq!(built.tree.predict(sample.features()).unwrap(), sample.label());
        }
    }

    #[test]
    fn prediction_feature_mismatch() {
        let ds = dataset(&[(0, &[0, 1]), (1, &[3, 2])], 2);
        let built = grow(&ds, &TreeParams::new());
        let err = built.tree.predict(&[1]).unwrap_err();
        assert!(matches!(
            err,
            RfError::PredictionFeatureMismatch { expected: 2, got: 1 }
        ));
    }

    // --- majority_label ---

    #[test]
    fn majority_ties_pick_lowest_label() {
        assert_eq!(majority_label(&[0, 3, 3, 1]), 1);
        assert_eq!(majority_label(&[0, 0]), 0);
    }
}
