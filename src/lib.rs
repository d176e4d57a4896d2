//! Mini-batch data preparation for semi-supervised GNN training on
//! transaction graphs.
//!
//! `sagebatch` takes four disjoint graph partitions (train, unlabeled,
//! validation, test), stacks them into one consistent graph with
//! leakage-safe cumulative edge views, and produces fixed-size multi-hop
//! neighborhood batches for both supervised and self-supervised
//! (contrastive) training regimes.
//!
//! # Modules
//!
//! - [`stack`]: split stacking and cumulative edge-view construction
//! - [`view`]: immutable edge-view snapshots with in-neighbor CSR indexes
//! - [`sampler`]: capped multi-hop neighbor sampling and contrastive pairs
//! - [`batch`]: immutable batch records with pure device relocation
//! - [`precompute`]: offline auxiliary-embedding pass over a frozen encoder
//! - [`loader`]: train/validation/test batch sources with worker pools
//!
//! # Leakage-safe cumulative views
//!
//! Validation must message-pass over train and unlabeled edges but never
//! over test edges; test sees everything. The stacker freezes three edge
//! snapshots with `train ⊆ valid ⊆ test` so each split queries exactly its
//! own scope:
//!
//! ```text
//! train_view = train ++ unlabeled edges
//! valid_view = train_view ++ validation edges
//! test_view  = valid_view ++ test edges
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sagebatch::{ContrastiveData, StackedGraph};
//! use std::sync::Arc;
//!
//! let graph = Arc::new(StackedGraph::stack(&train, &unlab, &valid, &test)?);
//! let data = ContrastiveData::new(graph, vec![25, 10]).with_batch_size(128);
//!
//! for batch in data.train_batches()? {
//!     let batch = batch?.to_device(&device)?;
//!     // anchors, positives and negatives are sliced apart by position:
//!     // batch.y[..b], batch.y[b..2b], batch.y[2b..3b]
//! }
//! ```

pub mod batch;
pub mod error;
pub mod loader;
pub mod precompute;
pub mod sampler;
pub mod stack;
pub mod view;

pub use batch::{AuxBatch, Batch};
pub use error::{Error, Result};
pub use loader::{AuxData, BatchLoader, ContrastiveData, LoaderConfig};
pub use precompute::{precompute_aux, Encoder, PrecomputeConfig};
pub use sampler::{Adj, ContrastivePairSampler, NeighborSampler, SampleOutput};
pub use stack::{AuxEmbedding, SplitGraph, StackedGraph};
pub use view::EdgeView;
