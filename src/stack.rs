//! Graph stacking with leakage-safe cumulative edge views.
//!
//! Inductive training on a partitioned graph needs one consistent node
//! numbering but a different message-passing scope per split: validation may
//! aggregate over train and unlabeled edges, test additionally over
//! validation edges, and never the other way around. [`StackedGraph::stack`]
//! concatenates the four splits' node blocks in a fixed order, re-bases every
//! split-local index to the combined numbering, and freezes three cumulative
//! [`EdgeView`] snapshots:
//!
//! ```text
//! train_view = train ++ unlabeled edges
//! valid_view = train_view ++ validation edges
//! test_view  = valid_view ++ test edges
//! ```
//!
//! The subset chain `train ⊆ valid ⊆ test` holds by construction and the
//! views are never mutated afterwards.

use crate::error::{Error, Result};
use crate::view::EdgeView;
use candle_core::{Device, Tensor};
use std::sync::Arc;

/// One split's local graph: node features, labels, the auxiliary revenue
/// signal, a split-local edge list, and the split-local target rows.
///
/// All node indices in `edges` and `target_idx` are local to this split's
/// own feature block; [`StackedGraph::stack`] re-bases them.
#[derive(Debug, Clone)]
pub struct SplitGraph {
    /// Node features, `(n, d)`.
    pub features: Tensor,
    /// Per-node target value, `(n,)`.
    pub labels: Tensor,
    /// Per-node auxiliary numeric signal, `(n,)`.
    pub revenue: Tensor,
    /// Directed split-local edges.
    pub edges: Vec<(u32, u32)>,
    /// Split-local rows to predict on.
    pub target_idx: Vec<u32>,
}

impl SplitGraph {
    /// Create a split graph, validating internal consistency.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `labels` or `revenue` disagree with the
    /// feature row count, [`Error::IndexOutOfRange`] if an edge endpoint or
    /// target index exceeds the row count.
    pub fn new(
        features: Tensor,
        labels: Tensor,
        revenue: Tensor,
        edges: Vec<(u32, u32)>,
        target_idx: Vec<u32>,
    ) -> Result<Self> {
        let (n, _) = features.dims2()?;
        if labels.dim(0)? != n {
            return Err(Error::ShapeMismatch {
                context: "labels",
                expected: n,
                got: labels.dim(0)?,
            });
        }
        if revenue.dim(0)? != n {
            return Err(Error::ShapeMismatch {
                context: "revenue",
                expected: n,
                got: revenue.dim(0)?,
            });
        }
        for &(src, dst) in &edges {
            for index in [src, dst] {
                if index as usize >= n {
                    return Err(Error::IndexOutOfRange {
                        index,
                        num_nodes: n,
                    });
                }
            }
        }
        for &index in &target_idx {
            if index as usize >= n {
                return Err(Error::IndexOutOfRange {
                    index,
                    num_nodes: n,
                });
            }
        }
        Ok(Self {
            features,
            labels,
            revenue,
            edges,
            target_idx,
        })
    }

    /// Number of nodes in this split.
    pub fn num_nodes(&self) -> Result<usize> {
        Ok(self.features.dim(0)?)
    }

    /// Feature width of this split.
    pub fn feature_dim(&self) -> Result<usize> {
        Ok(self.features.dim(1)?)
    }
}

/// Auxiliary per-node embeddings, populated by the offline precompute pass.
///
/// Row-major `(num_nodes, dim)` buffer, zero-initialized. Nodes never
/// appearing in a precompute target set keep their zero rows; rerunning the
/// pass overwrites rows wholesale, never blends.
#[derive(Debug, Clone)]
pub struct AuxEmbedding {
    dim: usize,
    data: Vec<f32>,
}

impl AuxEmbedding {
    /// Zero-filled buffer for `num_nodes` rows of width `dim`.
    pub fn zeros(num_nodes: usize, dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; num_nodes * dim],
        }
    }

    /// Embedding width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Overwrite the rows at `ids` with the rows of `values` (`(len, dim)`).
    pub fn write_rows(&mut self, ids: &[u32], values: &Tensor) -> Result<()> {
        let rows = values.to_vec2::<f32>()?;
        if rows.len() != ids.len() {
            return Err(Error::ShapeMismatch {
                context: "aux rows",
                expected: ids.len(),
                got: rows.len(),
            });
        }
        for (&id, row) in ids.iter().zip(&rows) {
            if row.len() != self.dim {
                return Err(Error::ShapeMismatch {
                    context: "aux dim",
                    expected: self.dim,
                    got: row.len(),
                });
            }
            let lo = id as usize * self.dim;
            self.data[lo..lo + self.dim].copy_from_slice(row);
        }
        Ok(())
    }

    /// Gather the rows at `ids` into a `(len, dim)` tensor on `device`.
    pub fn rows(&self, ids: &[u32], device: &Device) -> Result<Tensor> {
        let mut out = Vec::with_capacity(ids.len() * self.dim);
        for &id in ids {
            let lo = id as usize * self.dim;
            out.extend_from_slice(&self.data[lo..lo + self.dim]);
        }
        Ok(Tensor::from_vec(out, (ids.len(), self.dim), device)?)
    }
}

/// Four splits stacked into one graph with cumulative edge views.
///
/// Node identity is the row index into `features`; rows are laid out in
/// split order train, unlabeled, validation, test and never move. The edge
/// views and target-index sets are immutable after construction; only the
/// auxiliary embedding buffer is filled in afterwards, by a single
/// precompute pass that must complete before any consumer reads it.
#[derive(Debug, Clone)]
pub struct StackedGraph {
    /// Node features, `(N, d)`.
    pub features: Tensor,
    /// Per-node target value, `(N,)`.
    pub labels: Tensor,
    /// Per-node auxiliary numeric signal, `(N,)`.
    pub revenue: Tensor,
    /// Train + unlabeled edges.
    pub train_view: Arc<EdgeView>,
    /// Train view plus validation edges.
    pub valid_view: Arc<EdgeView>,
    /// Valid view plus test edges.
    pub test_view: Arc<EdgeView>,
    /// Re-based train target rows.
    pub train_idx: Vec<u32>,
    /// Re-based validation target rows.
    pub valid_idx: Vec<u32>,
    /// Re-based test target rows.
    pub test_idx: Vec<u32>,
    aux: Option<AuxEmbedding>,
}

/// Re-base split-local indices by the split's row offset.
fn rebase_edges(edges: &[(u32, u32)], offset: u32) -> Vec<(u32, u32)> {
    edges
        .iter()
        .map(|&(src, dst)| (src + offset, dst + offset))
        .collect()
}

fn rebase_idx(idx: &[u32], offset: u32) -> Vec<u32> {
    idx.iter().map(|&i| i + offset).collect()
}

impl StackedGraph {
    /// Stack four per-split graphs into one combined graph.
    ///
    /// Concatenates feature/label/revenue blocks in split order, re-bases
    /// every split-local index before any edge-list concatenation, builds
    /// the three cumulative edge views, and carries the re-based target
    /// sets through unchanged.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the splits disagree on feature width,
    /// [`Error::EmptyTargets`] if train, validation or test has an empty
    /// target-index set. Both are fatal configuration errors.
    pub fn stack(
        train: &SplitGraph,
        unlabeled: &SplitGraph,
        valid: &SplitGraph,
        test: &SplitGraph,
    ) -> Result<Self> {
        let dim = train.feature_dim()?;
        for split in [unlabeled, valid, test] {
            let got = split.feature_dim()?;
            if got != dim {
                return Err(Error::ShapeMismatch {
                    context: "feature dim",
                    expected: dim,
                    got,
                });
            }
        }
        for (split, name) in [
            (train, "train"),
            (valid, "validation"),
            (test, "test"),
        ] {
            if split.target_idx.is_empty() {
                return Err(Error::EmptyTargets { split: name });
            }
        }

        let n_train = train.num_nodes()?;
        let n_unlab = unlabeled.num_nodes()?;
        let n_valid = valid.num_nodes()?;
        let n_test = test.num_nodes()?;

        // Cumulative row offsets in split order.
        let off_train = 0u32;
        let off_unlab = n_train as u32;
        let off_valid = (n_train + n_unlab) as u32;
        let off_test = (n_train + n_unlab + n_valid) as u32;
        let total = n_train + n_unlab + n_valid + n_test;

        let features = Tensor::cat(
            &[
                &train.features,
                &unlabeled.features,
                &valid.features,
                &test.features,
            ],
            0,
        )?;
        let labels = Tensor::cat(
            &[&train.labels, &unlabeled.labels, &valid.labels, &test.labels],
            0,
        )?;
        let revenue = Tensor::cat(
            &[
                &train.revenue,
                &unlabeled.revenue,
                &valid.revenue,
                &test.revenue,
            ],
            0,
        )?;

        // Re-base before concatenating; raw local edge lists would silently
        // corrupt adjacency once the blocks are stacked.
        let mut train_edges = rebase_edges(&train.edges, off_train);
        train_edges.extend(rebase_edges(&unlabeled.edges, off_unlab));

        let mut valid_edges = train_edges.clone();
        valid_edges.extend(rebase_edges(&valid.edges, off_valid));

        let mut test_edges = valid_edges.clone();
        test_edges.extend(rebase_edges(&test.edges, off_test));

        let train_view = Arc::new(EdgeView::new(train_edges, total)?);
        let valid_view = Arc::new(EdgeView::new(valid_edges, total)?);
        let test_view = Arc::new(EdgeView::new(test_edges, total)?);

        Ok(Self {
            features,
            labels,
            revenue,
            train_view,
            valid_view,
            test_view,
            train_idx: rebase_idx(&train.target_idx, off_train),
            valid_idx: rebase_idx(&valid.target_idx, off_valid),
            test_idx: rebase_idx(&test.target_idx, off_test),
            aux: None,
        })
    }

    /// Total number of nodes across all four splits.
    pub fn num_nodes(&self) -> Result<usize> {
        Ok(self.features.dim(0)?)
    }

    /// Feature width.
    pub fn feature_dim(&self) -> Result<usize> {
        Ok(self.features.dim(1)?)
    }

    /// The auxiliary embeddings, if the precompute pass has run.
    pub fn aux(&self) -> Option<&AuxEmbedding> {
        self.aux.as_ref()
    }

    /// Install a fresh zero-filled auxiliary buffer of width `dim`,
    /// discarding any previous pass's rows.
    pub fn reset_aux(&mut self, dim: usize) -> Result<()> {
        let n = self.num_nodes()?;
        self.aux = Some(AuxEmbedding::zeros(n, dim));
        Ok(())
    }

    /// Mutable access to the auxiliary buffer.
    pub(crate) fn aux_mut(&mut self) -> Option<&mut AuxEmbedding> {
        self.aux.as_mut()
    }

    /// Gather feature rows for `ids` as a `(len, d)` tensor.
    pub fn gather_features(&self, ids: &[u32]) -> Result<Tensor> {
        let index = Tensor::from_vec(ids.to_vec(), ids.len(), self.features.device())?;
        Ok(self.features.index_select(&index, 0)?)
    }

    /// Gather label values for `ids` as a `(len,)` tensor.
    pub fn gather_labels(&self, ids: &[u32]) -> Result<Tensor> {
        let index = Tensor::from_vec(ids.to_vec(), ids.len(), self.labels.device())?;
        Ok(self.labels.index_select(&index, 0)?)
    }

    /// Gather revenue values for `ids` as a `(len,)` tensor.
    pub fn gather_revenue(&self, ids: &[u32]) -> Result<Tensor> {
        let index = Tensor::from_vec(ids.to_vec(), ids.len(), self.revenue.device())?;
        Ok(self.revenue.index_select(&index, 0)?)
    }
}
