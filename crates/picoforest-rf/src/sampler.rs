//! Train/test/validation partitioning and per-tree bag drawing.

use std::collections::HashSet;

use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument, warn};

use crate::bag::Bag;
use crate::dataset::Dataset;
use crate::error::RfError;
use crate::random::derive_rng;

/// Number of redraws attempted before a colliding bag is perturbed deterministically.
pub const MAX_BAG_RETRIES: u64 = 8;

/// Stream offset between folds when drawing k-fold bags.
const FOLD_STREAM_STRIDE: u64 = 1000;

/// Normalized train/test/validation proportions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    train: f64,
    test: f64,
    valid: f64,
}

impl SplitRatios {
    /// Normalize the three ratios so they sum to 1.0.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidRatio`] when any ratio is negative or
    /// non-finite, or when all three are zero.
    pub fn new(train: f64, test: f64, valid: f64) -> Result<Self, RfError> {
        for (name, value) in [("train", train), ("test", test), ("valid", valid)] {
            if !value.is_finite() || value < 0.0 {
                return Err(RfError::InvalidRatio { name, value });
            }
        }
        let total = train + test + valid;
        if total <= 0.0 {
            return Err(RfError::InvalidRatio { name: "total", value: total });
        }
        Ok(Self {
            train: train / total,
            test: test / total,
            valid: valid / total,
        })
    }

    /// Return the normalized train share.
    #[must_use]
    pub fn train(&self) -> f64 {
        self.train
    }

    /// Return the normalized test share.
    #[must_use]
    pub fn test(&self) -> f64 {
        self.test
    }

    /// Return the normalized validation share.
    #[must_use]
    pub fn valid(&self) -> f64 {
        self.valid
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            test: 0.15,
            valid: 0.15,
        }
    }
}

/// Disjoint partitions of a base dataset, each in base order.
#[derive(Debug, Clone)]
pub struct Partitions {
    /// Training samples.
    pub train: Dataset,
    /// Held-out test samples. May be empty.
    pub test: Dataset,
    /// Validation samples, present only when requested.
    pub validation: Option<Dataset>,
}

/// Split `base` into disjoint train, test and (optionally) validation sets.
///
/// Train and test take `floor(n * ratio)` samples each from a seeded
/// shuffle. The remainder goes to validation when `with_validation` is set,
/// and to test otherwise. Every partition is restored to base order.
///
/// # Errors
///
/// | Variant                     | When                                          |
/// |-----------------------------|-----------------------------------------------|
/// | [`RfError::EmptyPartition`] | train is empty, or validation is requested but empty |
#[instrument(skip_all, fields(n_samples = base.len(), with_validation))]
pub fn partition(
    base: &Dataset,
    ratios: &SplitRatios,
    with_validation: bool,
    seed: u64,
) -> Result<Partitions, RfError> {
    let n = base.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let n_train = ((n as f64) * ratios.train).floor() as usize;
    let n_test = if with_validation {
        (((n as f64) * ratios.test).floor() as usize).min(n - n_train)
    } else {
        n - n_train
    };

    let mut train_idx = order[..n_train].to_vec();
    let mut test_idx = order[n_train..n_train + n_test].to_vec();
    let mut valid_idx = order[n_train + n_test..].to_vec();
    train_idx.sort_unstable();
    test_idx.sort_unstable();
    valid_idx.sort_unstable();

    if train_idx.is_empty() {
        return Err(RfError::EmptyPartition { partition: "train" });
    }
    if with_validation && valid_idx.is_empty() {
        return Err(RfError::EmptyPartition { partition: "validation" });
    }

    debug!(
        train = train_idx.len(),
        test = test_idx.len(),
        validation = valid_idx.len(),
        "dataset partitioned"
    );

    Ok(Partitions {
        train: base.subset(&train_idx),
        test: base.subset(&test_idx),
        validation: with_validation.then(|| base.subset(&valid_idx)),
    })
}

/// How each tree's bag is drawn from the training set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BagStrategy {
    /// `n` draws with replacement.
    Bootstrap,
    /// `floor(n * ratio)` draws without replacement.
    Subsample {
        /// Fraction of the pool drawn per tree, in (0.0, 1.0].
        ratio: f64,
    },
}

impl BagStrategy {
    /// Number of draws for a pool of `pool_size` samples.
    #[must_use]
    pub fn draw_count(&self, pool_size: usize) -> usize {
        match *self {
            BagStrategy::Bootstrap => pool_size,
            BagStrategy::Subsample { ratio } => {
                (((pool_size as f64) * ratio).floor() as usize).clamp(1, pool_size.max(1))
            }
        }
    }
}

/// A bag together with how it was obtained.
#[derive(Debug, Clone)]
pub struct DrawnBag {
    /// The drawn membership.
    pub bag: Bag,
    /// Nonce of the stream that produced the accepted draw.
    pub nonce: u64,
    /// `true` when retries ran out and the deterministic perturbation was used.
    /// Such a bag is not guaranteed to be unique.
    pub fallback: bool,
}

/// Draws per-tree bags, rejecting duplicates across trees.
#[derive(Debug, Clone)]
pub struct BagSampler {
    seed: u64,
    strategy: BagStrategy,
    seen: HashSet<u64>,
}

impl BagSampler {
    /// Create a sampler for one forest build.
    #[must_use]
    pub fn new(seed: u64, strategy: BagStrategy) -> Self {
        Self {
            seed,
            strategy,
            seen: HashSet::new(),
        }
    }

    /// Return the bag strategy.
    #[must_use]
    pub fn strategy(&self) -> BagStrategy {
        self.strategy
    }

    /// Draw the bag for `tree_index` over `0..train_size`.
    ///
    /// Each attempt uses the stream `(tree_index, nonce)`. A bag whose
    /// fingerprint matches an earlier tree is redrawn with the next nonce;
    /// after [`MAX_BAG_RETRIES`] retries the last draw is replaced by a
    /// deterministic perturbation and accepted.
    pub fn draw_unique_bag(&mut self, tree_index: usize, train_size: usize) -> DrawnBag {
        let draws = self.strategy.draw_count(train_size);
        let pool: Vec<usize> = (0..train_size).collect();
        let mut bag = Bag::new(train_size);
        let mut nonce = 0u64;

        loop {
            bag.clear();
            let mut rng = derive_rng(self.seed, tree_index as u64, nonce);
            fill_bag(&mut bag, &pool, draws, self.strategy, &mut rng);

            if self.seen.insert(bag.fingerprint()) {
                return DrawnBag { bag, nonce, fallback: false };
            }
            nonce += 1;
            if nonce > MAX_BAG_RETRIES {
                let bag = fallback_bag(tree_index, train_size, bag.len());
                self.seen.insert(bag.fingerprint());
                warn!(tree_index, "bag retries exhausted, using deterministic perturbation");
                return DrawnBag { bag, nonce, fallback: true };
            }
            debug!(tree_index, nonce, "duplicate bag, redrawing");
        }
    }

    /// Draw bags for trees `0..num_trees`, in order.
    pub fn draw_bags(&mut self, num_trees: usize, train_size: usize) -> Vec<DrawnBag> {
        (0..num_trees)
            .map(|tree_index| self.draw_unique_bag(tree_index, train_size))
            .collect()
    }

    /// Draw a fold-local bag from `pool`, a subset of `0..universe`.
    ///
    /// Uses stream `fold * 1000 + tree_index` and performs no duplicate check.
    #[must_use]
    pub fn draw_fold_bag(
        &self,
        fold: usize,
        tree_index: usize,
        pool: &[usize],
        universe: usize,
    ) -> Bag {
        let mut bag = Bag::new(universe);
        if pool.is_empty() {
            return bag;
        }
        let stream = fold as u64 * FOLD_STREAM_STRIDE + tree_index as u64;
        let mut rng = derive_rng(self.seed, stream, 0);
        let draws = self.strategy.draw_count(pool.len());
        fill_bag(&mut bag, pool, draws, self.strategy, &mut rng);
        bag
    }
}

fn fill_bag(bag: &mut Bag, pool: &[usize], draws: usize, strategy: BagStrategy, rng: &mut impl Rng) {
    if pool.is_empty() {
        return;
    }
    match strategy {
        BagStrategy::Bootstrap => {
            for _ in 0..draws {
                // Saturated members are redrawn; the pool always has room since draws <= 7 * len.
                loop {
                    let pick = pool[rng.gen_range(0..pool.len())];
                    if bag.try_insert(pick) {
                        break;
                    }
                }
            }
        }
        BagStrategy::Subsample { .. } => {
            let mut shuffled = pool.to_vec();
            let take = draws.min(shuffled.len());
            for t in 0..take {
                let j = rng.gen_range(t..shuffled.len());
                shuffled.swap(t, j);
                bag.try_insert(shuffled[t]);
            }
        }
    }
}

fn fallback_bag(tree_index: usize, universe: usize, draws: usize) -> Bag {
    let mut bag = Bag::new(universe);
    if universe == 0 {
        return bag;
    }
    let seeded = draws.min(5);
    for k in 0..seeded {
        bag.try_insert((2 * k + tree_index) % universe);
    }
    for k in seeded..draws {
        bag.try_insert(k % universe);
    }
    bag
}
