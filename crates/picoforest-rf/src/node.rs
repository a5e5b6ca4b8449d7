/// Zero-based feature column index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    /// Create a new feature index from a zero-based column position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based feature column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index into a `Vec<Node>` arena, identifying a specific node in a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Create a new node index from a zero-based arena position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// The sibling stored directly after this node.
    #[must_use]
    pub fn sibling(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Criterion-agnostic impurity value (Gini or Entropy).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Impurity(f64);

impl Impurity {
    /// Create a new impurity value.
    pub(crate) fn new(value: f64) -> Self {
        Self(value)
    }

    /// Return the raw impurity value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

/// A node in a tree arena.
///
/// A split stores only its left child; the right child always sits at
/// `left + 1`. Both children are appended after their parent, so
/// `left > own index` holds for every split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    /// An interior split node: `value <= threshold` goes left.
    Split {
        /// Feature tested by the split.
        feature: FeatureIndex,
        /// Quantized threshold.
        threshold: u8,
        /// Index of the left child; the right child is `left + 1`.
        left: NodeIndex,
    },
    /// A terminal leaf node.
    Leaf {
        /// Majority label of the training samples that reached this leaf.
        label: u8,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureIndex, Impurity, Node, NodeIndex};

    // --- FeatureIndex ---

    #[test]
    fn feature_index_roundtrip() {
        let fi = FeatureIndex::new(7);
        assert_eq!(fi.index(), 7);
        assert!(fi < FeatureIndex::new(8));
    }

    // --- NodeIndex ---

    #[test]
    fn node_index_sibling() {
        let ni = NodeIndex::new(41);
        assert_eq!(ni.sibling().index(), 42);
        assert!(ni < ni.sibling());
    }

    // --- Impurity ---

    #[test]
    fn impurity_orders_by_value() {
        assert!(Impurity::new(0.1) < Impurity::new(0.5));
        assert_eq!(Impurity::new(0.25).value(), 0.25);
    }

    // --- Node ---

    #[test]
    fn leaf_is_leaf() {
        assert!(Node::Leaf { label: 3 }.is_leaf());
        let split = Node::Split {
            feature: FeatureIndex::new(0),
            threshold: 1,
            left: NodeIndex::new(1),
        };
        assert!(!split.is_leaf());
    }
}
