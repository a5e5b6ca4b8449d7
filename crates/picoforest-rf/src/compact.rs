//! Bit-packed forest format for memory-constrained targets.
//!
//! Every tree is rewritten into three arrays. A split whose children are
//! both leaves or both splits is an *internal* node and stores one child
//! index (the sibling follows it). A split with one leaf and one split
//! child is a *mixed* node and stores both. Leaves store only their label.
//! A per-tree bitmap marks each split, in node order, as internal (0) or
//! mixed (1), so a split's array position is its rank within its kind.
//!
//! Field widths are the minimum needed by the forest and are recorded in
//! the file header.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::bits::{BitReader, BitWriter, bits_for};
use crate::consensus::{ConsensusResult, check_threshold, tally_votes};
use crate::error::RfError;
use crate::forest::Forest;
use crate::node::Node;
use crate::tree::Tree;

/// `"FRC3"` read as a little-endian `u32`.
pub const MAGIC: u32 = 0x3343_5246;

/// Current compact format version.
pub const FORMAT_VERSION: u8 = 3;

/// Most trees a file can hold; the header stores the count in one byte.
pub const MAX_TREES: usize = u8::MAX as usize;

/// Bytes of per-tree bookkeeping a target keeps next to the arrays.
pub const TREE_DESCRIPTOR_BYTES: usize = 24;

/// Minimum field widths shared by every tree of a forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitWidths {
    /// Quantized threshold width.
    pub threshold: u8,
    /// Feature index width.
    pub feature: u8,
    /// Label width.
    pub label: u8,
    /// Child index width.
    pub child: u8,
}

impl BitWidths {
    /// Measure the widths a forest needs.
    ///
    /// The threshold width is the quantization width. The child width
    /// covers the largest node-array index of any tree, which bounds every
    /// renumbered index.
    ///
    /// # Errors
    ///
    /// | Variant                 | When                     |
    /// |-------------------------|--------------------------|
    /// | [`RfError::EmptyForest`]| the forest has no trees  |
    /// | [`RfError::EmptyTree`]  | a tree has no nodes      |
    pub fn from_forest(forest: &Forest) -> Result<Self, RfError> {
        if forest.trees().is_empty() {
            return Err(RfError::EmptyForest);
        }
        let mut max_feature = 0u64;
        let mut max_label = 0u64;
        let mut max_index = 0u64;
        for (t, tree) in forest.trees().iter().enumerate() {
            if tree.nodes().is_empty() {
                return Err(RfError::EmptyTree { tree: t });
            }
            max_index = max_index.max(tree.n_nodes() as u64 - 1);
            for node in tree.nodes() {
                match *node {
                    Node::Split { feature, .. } => {
                        max_feature = max_feature.max(feature.index() as u64);
                    }
                    Node::Leaf { label } => max_label = max_label.max(u64::from(label)),
                }
            }
        }
        Ok(Self {
            threshold: forest.quant_bits().bits(),
            feature: bits_for(max_feature),
            label: bits_for(max_label),
            child: bits_for(max_index),
        })
    }

    /// Bits of an internal node: flag, threshold, feature, child.
    #[must_use]
    pub fn internal_bits(&self) -> u32 {
        1 + u32::from(self.threshold) + u32::from(self.feature) + u32::from(self.child)
    }

    /// Bits of a mixed node: flag, threshold, feature, left, right.
    #[must_use]
    pub fn mixed_bits(&self) -> u32 {
        1 + u32::from(self.threshold) + u32::from(self.feature) + 2 * u32::from(self.child)
    }

    /// Bits of a leaf node.
    #[must_use]
    pub fn leaf_bits(&self) -> u32 {
        u32::from(self.label)
    }
}

fn bytes_for_bits(bits: u32) -> usize {
    bits.div_ceil(8) as usize
}

fn check_width(value: u64, width: u8, tree: usize, field: &'static str) -> Result<(), RfError> {
    if width < 64 && value >> width != 0 {
        return Err(RfError::FieldOverflow {
            tree,
            field,
            value,
            width,
        });
    }
    Ok(())
}

/// One tree in compact form.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CompactTree {
    root_is_leaf: bool,
    root: u32,
    n_branches: u32,
    n_internal: u32,
    n_mixed: u32,
    n_leaves: u32,
    kinds: Vec<u8>,
    internal: Vec<u8>,
    mixed: Vec<u8>,
    leaves: Vec<u8>,
    /// Mixed splits preceding each split; rebuilt from `kinds`.
    mixed_rank: Vec<u32>,
}

impl CompactTree {
    fn encode(tree_index: usize, tree: &Tree, widths: &BitWidths) -> Result<Self, RfError> {
        let nodes = tree.nodes();
        if nodes.is_empty() {
            return Err(RfError::EmptyTree { tree: tree_index });
        }

        // Renumber splits and leaves separately, keeping node order.
        let mut new_index = vec![0u32; nodes.len()];
        let (mut n_branches, mut n_leaves) = (0u32, 0u32);
        for (i, node) in nodes.iter().enumerate() {
            let counter = if node.is_leaf() { &mut n_leaves } else { &mut n_branches };
            new_index[i] = *counter;
            *counter += 1;
        }

        let mut kinds = vec![0u8; (n_branches as usize).div_ceil(8)];
        let mut internal = BitWriter::new();
        let mut mixed = BitWriter::new();
        let mut leaves = BitWriter::new();
        let (mut n_internal, mut n_mixed) = (0u32, 0u32);
        let mut branch = 0usize;

        for node in nodes {
            match *node {
                Node::Leaf { label } => {
                    check_width(u64::from(label), widths.label, tree_index, "label")?;
                    leaves.write_bits(u64::from(label), widths.label);
                    leaves.align();
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                } => {
                    let l = left.index();
                    let r = left.sibling().index();
                    if r >= nodes.len() {
                        return Err(RfError::MalformedForest {
                            reason: format!("tree {tree_index}: child {r} out of bounds"),
                        });
                    }
                    let left_is_leaf = nodes[l].is_leaf();
                    let right_is_leaf = nodes[r].is_leaf();
                    let feature = feature.index() as u64;
                    check_width(u64::from(threshold), widths.threshold, tree_index, "threshold")?;
                    check_width(feature, widths.feature, tree_index, "feature")?;
                    check_width(u64::from(new_index[l]), widths.child, tree_index, "child")?;
                    check_width(u64::from(new_index[r]), widths.child, tree_index, "child")?;

                    if left_is_leaf == right_is_leaf {
                        internal.write_bits(u64::from(left_is_leaf), 1);
                        internal.write_bits(u64::from(threshold), widths.threshold);
                        internal.write_bits(feature, widths.feature);
                        internal.write_bits(u64::from(new_index[l]), widths.child);
                        internal.align();
                        n_internal += 1;
                    } else {
                        mixed.write_bits(u64::from(left_is_leaf), 1);
                        mixed.write_bits(u64::from(threshold), widths.threshold);
                        mixed.write_bits(feature, widths.feature);
                        mixed.write_bits(u64::from(new_index[l]), widths.child);
                        mixed.write_bits(u64::from(new_index[r]), widths.child);
                        mixed.align();
                        kinds[branch / 8] |= 1 << (branch % 8);
                        n_mixed += 1;
                    }
                    branch += 1;
                }
            }
        }

        let mut tree = Self {
            root_is_leaf: nodes[0].is_leaf(),
            root: 0,
            n_branches,
            n_internal,
            n_mixed,
            n_leaves,
            kinds,
            internal: internal.into_bytes(),
            mixed: mixed.into_bytes(),
            leaves: leaves.into_bytes(),
            mixed_rank: Vec::new(),
        };
        tree.rebuild_rank();
        Ok(tree)
    }

    fn rebuild_rank(&mut self) {
        let mut rank = 0u32;
        self.mixed_rank = (0..self.n_branches as usize)
            .map(|b| {
                let before = rank;
                if self.is_mixed(b) {
                    rank += 1;
                }
                before
            })
            .collect();
    }

    fn is_mixed(&self, branch: usize) -> bool {
        (self.kinds[branch / 8] >> (branch % 8)) & 1 == 1
    }

    fn leaf_label(&self, index: u64, widths: &BitWidths) -> Result<u8, RfError> {
        let stride = bytes_for_bits(widths.leaf_bits()) * 8;
        let offset = usize::try_from(index).unwrap_or(usize::MAX).saturating_mul(stride);
        Ok(BitReader::at(&self.leaves, offset).read_bits(widths.label)? as u8)
    }

    fn predict(&self, features: &[u8], widths: &BitWidths) -> Result<u8, RfError> {
        if self.root_is_leaf {
            return self.leaf_label(u64::from(self.root), widths);
        }
        let internal_stride = bytes_for_bits(widths.internal_bits()) * 8;
        let mixed_stride = bytes_for_bits(widths.mixed_bits()) * 8;
        let mut branch = self.root as usize;

        loop {
            if branch >= self.n_branches as usize {
                return Err(RfError::MalformedForest {
                    reason: format!("branch {branch} out of {} branches", self.n_branches),
                });
            }
            let mixed_before = self.mixed_rank[branch] as usize;
            let (next, next_is_leaf) = if self.is_mixed(branch) {
                let mut r = BitReader::at(&self.mixed, mixed_before * mixed_stride);
                let left_is_leaf = r.read_flag()?;
                let threshold = r.read_bits(widths.threshold)?;
                let feature = r.read_bits(widths.feature)? as usize;
                let left = r.read_bits(widths.child)?;
                let right = r.read_bits(widths.child)?;
                if go_left(features, feature, threshold)? {
                    (left, left_is_leaf)
                } else {
                    (right, !left_is_leaf)
                }
            } else {
                let index = branch - mixed_before;
                let mut r = BitReader::at(&self.internal, index * internal_stride);
                let children_are_leaf = r.read_flag()?;
                let threshold = r.read_bits(widths.threshold)?;
                let feature = r.read_bits(widths.feature)? as usize;
                let child = r.read_bits(widths.child)?;
                let next = if go_left(features, feature, threshold)? {
                    child
                } else {
                    child + 1
                };
                (next, children_are_leaf)
            };

            if next_is_leaf {
                return self.leaf_label(next, widths);
            }
            // Splits are numbered in node order, so children always come later.
            let next = next as usize;
            if next <= branch {
                return Err(RfError::MalformedForest {
                    reason: format!("branch {branch} points back to {next}"),
                });
            }
            branch = next;
        }
    }

    /// Largest feature index any split of this tree reads.
    fn max_feature(&self, widths: &BitWidths) -> Result<Option<u64>, RfError> {
        let mut max = None;
        for (array, count, bits) in [
            (&self.internal, self.n_internal, widths.internal_bits()),
            (&self.mixed, self.n_mixed, widths.mixed_bits()),
        ] {
            let stride = bytes_for_bits(bits) * 8;
            for i in 0..count as usize {
                let mut r = BitReader::at(array, i * stride + 1 + widths.threshold as usize);
                let feature = r.read_bits(widths.feature)?;
                max = max.max(Some(feature));
            }
        }
        Ok(max)
    }

    fn resident_bytes(&self) -> usize {
        self.kinds.len() + self.internal.len() + self.mixed.len() + self.leaves.len() + TREE_DESCRIPTOR_BYTES
    }
}

fn go_left(features: &[u8], feature: usize, threshold: u64) -> Result<bool, RfError> {
    let Some(&value) = features.get(feature) else {
        return Err(RfError::PredictionFeatureMismatch {
            expected: feature + 1,
            got: features.len(),
        });
    };
    Ok(u64::from(value) <= threshold)
}

/// A forest in compact form, ready to be written or queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactForest {
    widths: BitWidths,
    trees: Vec<CompactTree>,
    required_features: usize,
}

fn required_features(trees: &[CompactTree], widths: &BitWidths) -> Result<usize, RfError> {
    let mut max = None;
    for tree in trees {
        max = max.max(tree.max_feature(widths)?);
    }
    Ok(max.map_or(0, |f| f as usize + 1))
}

impl CompactForest {
    /// Compute widths and rewrite every tree.
    ///
    /// # Errors
    ///
    /// | Variant                  | When                                   |
    /// |--------------------------|----------------------------------------|
    /// | [`RfError::EmptyForest`] | no trees                               |
    /// | [`RfError::EmptyTree`]   | a tree has no nodes                    |
    /// | [`RfError::TooManyTrees`]| more than [`MAX_TREES`] trees          |
    /// | [`RfError::FieldOverflow`]| a value does not fit its width        |
    #[instrument(skip_all, fields(n_trees = forest.n_trees()))]
    pub fn from_forest(forest: &Forest) -> Result<Self, RfError> {
        let widths = BitWidths::from_forest(forest)?;
        if forest.n_trees() > MAX_TREES {
            return Err(RfError::TooManyTrees {
                count: forest.n_trees(),
                max: MAX_TREES,
            });
        }
        let trees = forest
            .trees()
            .iter()
            .enumerate()
            .map(|(t, tree)| CompactTree::encode(t, tree, &widths))
            .collect::<Result<Vec<_>, _>>()?;
        let required_features = required_features(&trees, &widths)?;
        let compact = Self {
            widths,
            trees,
            required_features,
        };
        debug!(
            threshold_bits = widths.threshold,
            feature_bits = widths.feature,
            label_bits = widths.label,
            child_bits = widths.child,
            resident_bytes = compact.resident_bytes(),
            "forest compacted"
        );
        Ok(compact)
    }

    /// Return the field widths.
    #[must_use]
    pub fn widths(&self) -> BitWidths {
        self.widths
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Shortest feature vector every tree can be evaluated on.
    #[must_use]
    pub fn required_features(&self) -> usize {
        self.required_features
    }

    fn check_features(&self, features: &[u8]) -> Result<(), RfError> {
        if features.len() < self.required_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.required_features,
                got: features.len(),
            });
        }
        Ok(())
    }

    /// Bytes a target needs to hold the forest: arrays, bitmaps and one
    /// descriptor per tree.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.trees.iter().map(CompactTree::resident_bytes).sum()
    }

    /// Predict with a single tree.
    ///
    /// # Errors
    ///
    /// | Variant                                | When                                   |
    /// |----------------------------------------|----------------------------------------|
    /// | [`RfError::PredictionFeatureMismatch`] | `features` is shorter than [`CompactForest::required_features`] |
    /// | [`RfError::MalformedForest`]           | `tree` is out of range or inconsistent |
    pub fn predict_tree(&self, tree: usize, features: &[u8]) -> Result<u8, RfError> {
        let Some(compact) = self.trees.get(tree) else {
            return Err(RfError::MalformedForest {
                reason: format!("tree {tree} out of {} trees", self.trees.len()),
            });
        };
        self.check_features(features)?;
        compact.predict(features, &self.widths)
    }

    /// Vote with every tree.
    ///
    /// # Errors
    ///
    /// Same as [`CompactForest::predict_tree`].
    pub fn consensus(&self, features: &[u8]) -> Result<ConsensusResult, RfError> {
        self.check_features(features)?;
        let labels = self
            .trees
            .iter()
            .map(|tree| tree.predict(features, &self.widths))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tally_votes(labels))
    }

    /// Majority label, or `None` when its vote share is below `threshold`.
    ///
    /// # Errors
    ///
    /// [`RfError::InvalidThreshold`] for a threshold outside `[0, 1]`,
    /// otherwise the same as [`CompactForest::predict_tree`].
    pub fn predict_with_threshold(
        &self,
        features: &[u8],
        threshold: f64,
    ) -> Result<Option<u8>, RfError> {
        let threshold = check_threshold(threshold)?;
        Ok(self.consensus(features)?.accepted(threshold))
    }

    /// Serialize to the file layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.resident_bytes());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(FORMAT_VERSION);
        out.push(self.trees.len() as u8);
        out.extend_from_slice(&[
            self.widths.threshold,
            self.widths.feature,
            self.widths.label,
            self.widths.child,
        ]);

        let node_widths = [
            self.widths.internal_bits() as u8,
            self.widths.mixed_bits() as u8,
            self.widths.leaf_bits() as u8,
        ];
        for (t, tree) in self.trees.iter().enumerate() {
            out.push(t as u8);
            out.push(u8::from(tree.root_is_leaf));
            out.extend_from_slice(&tree.root.to_le_bytes());
            for count in [tree.n_branches, tree.n_internal, tree.n_mixed, tree.n_leaves] {
                out.extend_from_slice(&count.to_le_bytes());
            }
            out.extend_from_slice(&node_widths);
            out.extend_from_slice(&(tree.kinds.len() as u32).to_le_bytes());
            out.extend_from_slice(&tree.kinds);
            out.extend_from_slice(&tree.internal);
            out.extend_from_slice(&tree.mixed);
            out.extend_from_slice(&tree.leaves);
        }
        out
    }

    /// Parse the file layout.
    ///
    /// # Errors
    ///
    /// | Variant                               | When                                  |
    /// |---------------------------------------|---------------------------------------|
    /// | [`RfError::BadMagic`]                 | wrong magic number                    |
    /// | [`RfError::IncompatibleFormatVersion`]| unknown version                       |
    /// | [`RfError::MalformedForest`]          | truncated or inconsistent contents    |
    pub fn decode(bytes: &[u8]) -> Result<Self, RfError> {
        let mut cur = ByteCursor::new(bytes);
        let magic = cur.u32()?;
        if magic != MAGIC {
            return Err(RfError::BadMagic {
                expected: MAGIC,
                found: magic,
            });
        }
        let version = cur.u8()?;
        if version != FORMAT_VERSION {
            return Err(RfError::IncompatibleFormatVersion {
                expected: FORMAT_VERSION,
                found: version,
            });
        }
        let n_trees = cur.u8()? as usize;
        let widths = BitWidths {
            threshold: cur.u8()?,
            feature: cur.u8()?,
            label: cur.u8()?,
            child: cur.u8()?,
        };
        if [widths.threshold, widths.feature, widths.label, widths.child]
            .iter()
            .any(|&w| w == 0 || w > 32)
        {
            return Err(malformed("field width outside 1..=32"));
        }
        if n_trees == 0 {
            return Err(RfError::EmptyForest);
        }

        let expected_widths = [
            widths.internal_bits(),
            widths.mixed_bits(),
            widths.leaf_bits(),
        ];
        let mut trees = Vec::with_capacity(n_trees);
        for t in 0..n_trees {
            let index = cur.u8()? as usize;
            if index != t {
                return Err(malformed(&format!("tree {t} stored with index {index}")));
            }
            let root_is_leaf = cur.u8()? != 0;
            let root = cur.u32()?;
            let n_branches = cur.u32()?;
            let n_internal = cur.u32()?;
            let n_mixed = cur.u32()?;
            let n_leaves = cur.u32()?;
            let node_widths = [cur.u8()?, cur.u8()?, cur.u8()?].map(u32::from);
            if node_widths != expected_widths {
                return Err(malformed(&format!("tree {t}: node widths {node_widths:?} disagree with header")));
            }
            if n_internal.checked_add(n_mixed) != Some(n_branches) || n_leaves == 0 {
                return Err(malformed(&format!("tree {t}: inconsistent node counts")));
            }
            let kind_len = cur.u32()? as usize;
            if kind_len != (n_branches as usize).div_ceil(8) {
                return Err(malformed(&format!("tree {t}: bitmap length {kind_len}")));
            }
            let kinds = cur.bytes(kind_len)?.to_vec();
            let internal = cur.bytes(n_internal as usize * bytes_for_bits(expected_widths[0]))?.to_vec();
            let mixed = cur.bytes(n_mixed as usize * bytes_for_bits(expected_widths[1]))?.to_vec();
            let leaves = cur.bytes(n_leaves as usize * bytes_for_bits(expected_widths[2]))?.to_vec();

            let mut tree = CompactTree {
                root_is_leaf,
                root,
                n_branches,
                n_internal,
                n_mixed,
                n_leaves,
                kinds,
                internal,
                mixed,
                leaves,
                mixed_rank: Vec::new(),
            };
            let marked = (0..n_branches as usize).filter(|&b| tree.is_mixed(b)).count();
            if marked != n_mixed as usize {
                return Err(malformed(&format!("tree {t}: bitmap marks {marked} mixed splits, header says {n_mixed}")));
            }
            let root_bound = if root_is_leaf { n_leaves } else { n_branches };
            if root >= root_bound {
                return Err(malformed(&format!("tree {t}: root {root} out of range")));
            }
            tree.rebuild_rank();
            trees.push(tree);
        }
        if cur.remaining() != 0 {
            return Err(malformed(&format!("{} trailing bytes", cur.remaining())));
        }
        let required_features = required_features(&trees, &widths)?;
        Ok(Self {
            widths,
            trees,
            required_features,
        })
    }

    /// Write the forest to `path`.
    ///
    /// Nothing is left at `path` when writing fails.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::WriteForest`] if the file cannot be written.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<usize, RfError> {
        let path = path.as_ref();
        let bytes = self.encode();
        if let Err(source) = fs::write(path, &bytes) {
            if fs::remove_file(path).is_ok() {
                warn!("partial forest file removed");
            }
            return Err(RfError::WriteForest {
                path: path.to_path_buf(),
                source,
            });
        }
        info!(size_bytes = bytes.len(), n_trees = self.n_trees(), "compact forest saved");
        Ok(bytes.len())
    }

    /// Read a forest from `path`.
    ///
    /// # Errors
    ///
    /// [`RfError::ReadForest`] if the file cannot be read, otherwise as
    /// [`CompactForest::decode`].
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RfError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| RfError::ReadForest {
            path: path.to_path_buf(),
            source,
        })?;
        let forest = Self::decode(&bytes)?;
        debug!(n_trees = forest.n_trees(), "compact forest loaded");
        Ok(forest)
    }
}

/// Encode `forest` and write it to `path`.
///
/// When encoding fails, any file already at `path` is removed so a stale
/// forest is never mistaken for the new one.
///
/// # Errors
///
/// As [`CompactForest::from_forest`] and [`CompactForest::save`].
pub fn write_compact(forest: &Forest, path: impl AsRef<Path>) -> Result<CompactForest, RfError> {
    let path = path.as_ref();
    let compact = match CompactForest::from_forest(forest) {
        Ok(compact) => compact,
        Err(err) => {
            if fs::remove_file(path).is_ok() {
                warn!(path = %path.display(), "stale forest file removed after encoding failure");
            }
            return Err(err);
        }
    };
    compact.save(path)?;
    Ok(compact)
}

fn malformed(reason: &str) -> RfError {
    RfError::MalformedForest {
        reason: reason.to_string(),
    }
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], RfError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(malformed(&format!("truncated at byte {} reading {n} bytes", self.pos)));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RfError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, RfError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}
