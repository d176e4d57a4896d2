//! Offline auxiliary-embedding precomputation.
//!
//! Runs a frozen encoder once over the full stacked graph to materialize one
//! auxiliary embedding per target node, consumed later as extra input
//! features by [`crate::AuxBatch`]. The pass walks the union of the three
//! splits' target sets in fixed chunks, samples a two-hop neighborhood per
//! chunk on the full cumulative edge view, encodes without gradient
//! tracking (the [`Encoder`] is inference-only by contract), and writes the
//! resulting rows in place.
//!
//! Rerunning the pass overwrites rows with a fresh sample; it never blends.
//! The pass must complete before any sampler reads the buffer; ordering is
//! the caller's responsibility, there is no internal locking.

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::sampler::{chunk_seed, Adj, NeighborSampler};
use crate::stack::StackedGraph;
use candle_core::Tensor;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A frozen message-passing encoder, consumed as an opaque function.
///
/// `encode` maps the features of a batch's touched nodes plus its hop
/// descriptors to one embedding per node; implementations must not track
/// gradients or update parameters. Encoders that shrink their working set
/// per hop may return only the leading target rows; the precompute pass
/// reads exactly the first `chunk_len` rows either way.
pub trait Encoder {
    /// Encode a sampled neighborhood.
    fn encode(&self, x: &Tensor, adjs: &[Adj]) -> candle_core::Result<Tensor>;

    /// Width of the produced embeddings.
    fn output_dim(&self) -> usize;
}

/// Configuration for the precompute pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecomputeConfig {
    /// Per-hop fan-out caps (default: `[62, 32]`).
    pub fanouts: Vec<i64>,
    /// Target nodes per chunk (default: 1024).
    pub batch_size: usize,
    /// Worker pool degree (default: 16).
    pub num_workers: usize,
    /// Random seed for neighborhood sampling.
    pub seed: u64,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self {
            fanouts: vec![62, 32],
            batch_size: 1024,
            num_workers: 16,
            seed: 42,
        }
    }
}

impl PrecomputeConfig {
    pub fn with_fanouts(mut self, fanouts: Vec<i64>) -> Self {
        self.fanouts = fanouts;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Run the frozen `encoder` over the union of all three target sets and
/// write one auxiliary embedding per covered node into `graph`.
///
/// Chunks are sampled and encoded on a worker pool; rows are written
/// sequentially afterwards, so the graph's shared tensors stay read-only
/// for the whole parallel section.
pub fn precompute_aux<E: Encoder + Sync>(
    graph: &mut StackedGraph,
    encoder: &E,
    cfg: &PrecomputeConfig,
) -> Result<()> {
    if cfg.batch_size == 0 {
        return Err(Error::InvalidConfig("batch_size must be positive".into()));
    }

    let mut targets: Vec<u32> = Vec::new();
    targets.extend_from_slice(&graph.train_idx);
    targets.extend_from_slice(&graph.valid_idx);
    targets.extend_from_slice(&graph.test_idx);

    // The original pass concatenated all three views; given the cumulative
    // invariant that only duplicates edges, so the full view suffices.
    let sampler = NeighborSampler::new(graph.test_view.clone(), cfg.fanouts.clone());

    let chunks: Vec<&[u32]> = targets.chunks(cfg.batch_size).collect();
    debug!(
        targets = targets.len(),
        chunks = chunks.len(),
        workers = cfg.num_workers,
        "precomputing auxiliary embeddings"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.num_workers)
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    let shared = &*graph;
    let encoded: Vec<(Vec<u32>, Tensor)> = pool.install(|| {
        chunks
            .par_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let out = sampler.sample(chunk, chunk_seed(cfg.seed, i as u64))?;
                let batch = Batch::assemble(shared, &out)?;
                let emb = encoder.encode(&batch.x, &batch.adjs)?;
                // Keep exactly the chunk-target rows.
                let emb = emb.narrow(0, 0, chunk.len())?;
                Ok((chunk.to_vec(), emb))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    graph.reset_aux(encoder.output_dim())?;
    let aux = graph.aux_mut().ok_or(Error::AuxMissing)?;
    for (ids, emb) in &encoded {
        aux.write_rows(ids, emb)?;
    }
    Ok(())
}
