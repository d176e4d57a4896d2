//! Batch sources for the training loop.
//!
//! A [`BatchLoader`] turns one (edge view, anchor set, config) triple into a
//! finite, repeatable sequence of batches: anchors are optionally shuffled,
//! grouped into fixed-size chunks (optionally dropping a final undersized
//! chunk), and each chunk is sampled and assembled independently. The same
//! seed always reproduces the same sequence; bump the seed per pass for a
//! fresh shuffle.
//!
//! Chunks share no mutable state, so production is embarrassingly parallel:
//! the `collect_*` methods farm chunks out to a rayon pool whose output is
//! bitwise identical to the lazy iterators, because every chunk derives its
//! own rng seed from its position.
//!
//! [`ContrastiveData`] and [`AuxData`] are the two pipeline surfaces,
//! exposing independently configured train/validation/test sources that
//! differ in edge view, target set, fan-out profile, shuffling and
//! drop-last policy.

use crate::batch::{AuxBatch, Batch};
use crate::error::{Error, Result};
use crate::sampler::{chunk_seed, ContrastivePairSampler, NeighborSampler, SampleOutput};
use crate::stack::StackedGraph;
use crate::view::EdgeView;
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Batch-production configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Anchors per chunk (default: 128).
    pub batch_size: usize,
    /// Per-hop fan-out caps; the first entry is the anchor-adjacent hop
    /// (default: `[25, 10]`).
    pub fanouts: Vec<i64>,
    /// Shuffle anchor order before chunking (default: false).
    pub shuffle: bool,
    /// Drop a final undersized chunk (default: false).
    pub drop_last: bool,
    /// Worker pool degree for eager collection (default: 32).
    pub num_workers: usize,
    /// Random seed; fixes both shuffle order and sampling.
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            fanouts: vec![25, 10],
            shuffle: false,
            drop_last: false,
            num_workers: 32,
            seed: 42,
        }
    }
}

impl LoaderConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_fanouts(mut self, fanouts: Vec<i64>) -> Self {
        self.fanouts = fanouts;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
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

/// One batch source: an anchor set sampled over one edge view.
///
/// Cheap to clone; the stacked graph and edge view are shared read-only.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    graph: Arc<StackedGraph>,
    view: Arc<EdgeView>,
    anchors: Vec<u32>,
    cfg: LoaderConfig,
    pairing: bool,
}

impl BatchLoader {
    /// Create a plain loader over `anchors`.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] on a zero batch size.
    pub fn new(
        graph: Arc<StackedGraph>,
        view: Arc<EdgeView>,
        anchors: Vec<u32>,
        cfg: LoaderConfig,
    ) -> Result<Self> {
        if cfg.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self {
            graph,
            view,
            anchors,
            cfg,
            pairing: false,
        })
    }

    /// Enable contrastive pairing: every chunk's anchors are augmented with
    /// one positive and one negative companion each before sampling.
    pub fn with_pairing(mut self, pairing: bool) -> Self {
        self.pairing = pairing;
        self
    }

    /// The loader's configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    /// Number of batches one pass produces.
    pub fn num_batches(&self) -> usize {
        let n = self.anchors.len();
        if self.cfg.drop_last {
            n / self.cfg.batch_size
        } else {
            n.div_ceil(self.cfg.batch_size)
        }
    }

    /// Anchor order for one pass: shuffled by the seed when configured.
    fn pass_order(&self) -> Vec<u32> {
        let mut order = self.anchors.clone();
        if self.cfg.shuffle {
            let mut rng = XorShiftRng::seed_from_u64(self.cfg.seed);
            order.shuffle(&mut rng);
        }
        order
    }

    /// Sample one chunk with its derived seed.
    fn sample_chunk(&self, chunk: &[u32], seed: u64) -> Result<SampleOutput> {
        let base = NeighborSampler::new(self.view.clone(), self.cfg.fanouts.clone());
        if self.pairing {
            ContrastivePairSampler::new(base).sample(chunk, seed)
        } else {
            base.sample(chunk, seed)
        }
    }

    fn chunk_bounds(&self, total: usize) -> Vec<(usize, usize)> {
        let mut bounds = Vec::new();
        let mut start = 0;
        while start < total {
            let end = (start + self.cfg.batch_size).min(total);
            if end - start < self.cfg.batch_size && self.cfg.drop_last {
                break;
            }
            bounds.push((start, end));
            start = end;
        }
        bounds
    }

    /// Lazy supervised batches; repeatable for a fixed seed.
    pub fn batches(&self) -> BatchIter {
        BatchIter {
            inner: ChunkIter::new(self.clone()),
        }
    }

    /// Lazy augmented batches; requires a completed precompute pass.
    pub fn aux_batches(&self) -> AuxBatchIter {
        AuxBatchIter {
            inner: ChunkIter::new(self.clone()),
        }
    }

    /// Eager supervised batches, sampled on a worker pool. Output equals
    /// one pass of [`BatchLoader::batches`].
    pub fn collect_batches(&self) -> Result<Vec<Batch>> {
        self.collect_with(|out| Batch::assemble(&self.graph, out))
    }

    /// Eager augmented batches, sampled on a worker pool.
    pub fn collect_aux_batches(&self) -> Result<Vec<AuxBatch>> {
        self.collect_with(|out| AuxBatch::assemble(&self.graph, out))
    }

    fn collect_with<B, F>(&self, assemble: F) -> Result<Vec<B>>
    where
        B: Send,
        F: Fn(&SampleOutput) -> Result<B> + Sync,
    {
        let order = self.pass_order();
        let bounds = self.chunk_bounds(order.len());
        debug!(
            batches = bounds.len(),
            workers = self.cfg.num_workers,
            "collecting batches"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.num_workers)
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        pool.install(|| {
            bounds
                .par_iter()
                .enumerate()
                .map(|(i, &(lo, hi))| {
                    let out = self.sample_chunk(&order[lo..hi], chunk_seed(self.cfg.seed, i as u64))?;
                    assemble(&out)
                })
                .collect::<Result<Vec<_>>>()
        })
    }
}

/// Shared chunk walker behind both lazy iterators.
struct ChunkIter {
    loader: BatchLoader,
    order: Vec<u32>,
    bounds: Vec<(usize, usize)>,
    next: usize,
}

impl ChunkIter {
    fn new(loader: BatchLoader) -> Self {
        let order = loader.pass_order();
        let bounds = loader.chunk_bounds(order.len());
        Self {
            loader,
            order,
            bounds,
            next: 0,
        }
    }

    fn next_output(&mut self) -> Option<Result<SampleOutput>> {
        let &(lo, hi) = self.bounds.get(self.next)?;
        let seed = chunk_seed(self.loader.cfg.seed, self.next as u64);
        self.next += 1;
        Some(self.loader.sample_chunk(&self.order[lo..hi], seed))
    }
}

/// Lazy iterator over supervised batches.
pub struct BatchIter {
    inner: ChunkIter,
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let out = match self.inner.next_output()? {
            Ok(out) => out,
            Err(e) => return Some(Err(e)),
        };
        Some(Batch::assemble(&self.inner.loader.graph, &out))
    }
}

/// Lazy iterator over augmented batches.
pub struct AuxBatchIter {
    inner: ChunkIter,
}

impl Iterator for AuxBatchIter {
    type Item = Result<AuxBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let out = match self.inner.next_output()? {
            Ok(out) => out,
            Err(e) => return Some(Err(e)),
        };
        Some(AuxBatch::assemble(&self.inner.loader.graph, &out))
    }
}

/// Contrastive (self-supervised) pipeline surface.
///
/// Training batches carry anchors plus positive/negative companions over
/// the train edge view, shuffled with the final undersized chunk dropped.
/// Validation and test fall back to plain sampling with a wide fan-out
/// profile (`[-1, 200]`), unshuffled; validation drops the last chunk,
/// test keeps it.
#[derive(Debug, Clone)]
pub struct ContrastiveData {
    graph: Arc<StackedGraph>,
    fanouts: Vec<i64>,
    eval_fanouts: Vec<i64>,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
}

impl ContrastiveData {
    /// Create the surface with training fan-outs `fanouts`.
    pub fn new(graph: Arc<StackedGraph>, fanouts: Vec<i64>) -> Self {
        Self {
            graph,
            fanouts,
            eval_fanouts: vec![-1, 200],
            batch_size: 128,
            num_workers: 32,
            seed: 42,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_eval_fanouts(mut self, fanouts: Vec<i64>) -> Self {
        self.eval_fanouts = fanouts;
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

    fn config(&self, fanouts: &[i64], shuffle: bool, drop_last: bool) -> LoaderConfig {
        LoaderConfig::default()
            .with_batch_size(self.batch_size)
            .with_fanouts(fanouts.to_vec())
            .with_shuffle(shuffle)
            .with_drop_last(drop_last)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
    }

    /// Contrastive training loader over the train view.
    pub fn train_loader(&self) -> Result<BatchLoader> {
        Ok(BatchLoader::new(
            self.graph.clone(),
            self.graph.train_view.clone(),
            self.graph.train_idx.clone(),
            self.config(&self.fanouts, true, true),
        )?
        .with_pairing(true))
    }

    /// Plain validation loader over the valid view.
    pub fn validation_loader(&self) -> Result<BatchLoader> {
        BatchLoader::new(
            self.graph.clone(),
            self.graph.valid_view.clone(),
            self.graph.valid_idx.clone(),
            self.config(&self.eval_fanouts, false, true),
        )
    }

    /// Plain test loader over the test view.
    pub fn test_loader(&self) -> Result<BatchLoader> {
        BatchLoader::new(
            self.graph.clone(),
            self.graph.test_view.clone(),
            self.graph.test_idx.clone(),
            self.config(&self.eval_fanouts, false, false),
        )
    }

    /// Lazy training batches.
    pub fn train_batches(&self) -> Result<BatchIter> {
        Ok(self.train_loader()?.batches())
    }

    /// Lazy validation batches.
    pub fn validation_batches(&self) -> Result<BatchIter> {
        Ok(self.validation_loader()?.batches())
    }

    /// Lazy test batches.
    pub fn test_batches(&self) -> Result<BatchIter> {
        Ok(self.test_loader()?.batches())
    }
}

/// Aux-augmented (supervised) pipeline surface.
///
/// All three sources sample plainly with the same fan-out profile and
/// assemble [`AuxBatch`]es, so the precompute pass must have run first.
#[derive(Debug, Clone)]
pub struct AuxData {
    graph: Arc<StackedGraph>,
    fanouts: Vec<i64>,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
}

impl AuxData {
    /// Create the surface with fan-outs `fanouts`.
    pub fn new(graph: Arc<StackedGraph>, fanouts: Vec<i64>) -> Self {
        Self {
            graph,
            fanouts,
            batch_size: 128,
            num_workers: 32,
            seed: 42,
        }
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

    fn config(&self, shuffle: bool, drop_last: bool) -> LoaderConfig {
        LoaderConfig::default()
            .with_batch_size(self.batch_size)
            .with_fanouts(self.fanouts.clone())
            .with_shuffle(shuffle)
            .with_drop_last(drop_last)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
    }

    /// Shuffled, drop-last training loader over the train view.
    pub fn train_loader(&self) -> Result<BatchLoader> {
        BatchLoader::new(
            self.graph.clone(),
            self.graph.train_view.clone(),
            self.graph.train_idx.clone(),
            self.config(true, true),
        )
    }

    /// Validation loader over the valid view.
    pub fn validation_loader(&self) -> Result<BatchLoader> {
        BatchLoader::new(
            self.graph.clone(),
            self.graph.valid_view.clone(),
            self.graph.valid_idx.clone(),
            self.config(false, true),
        )
    }

    /// Test loader over the test view; keeps the final undersized chunk.
    pub fn test_loader(&self) -> Result<BatchLoader> {
        BatchLoader::new(
            self.graph.clone(),
            self.graph.test_view.clone(),
            self.graph.test_idx.clone(),
            self.config(false, false),
        )
    }

    /// Lazy augmented training batches.
    pub fn train_batches(&self) -> Result<AuxBatchIter> {
        Ok(self.train_loader()?.aux_batches())
    }

    /// Lazy augmented validation batches.
    pub fn validation_batches(&self) -> Result<AuxBatchIter> {
        Ok(self.validation_loader()?.aux_batches())
    }

    /// Lazy augmented test batches.
    pub fn test_batches(&self) -> Result<AuxBatchIter> {
        Ok(self.test_loader()?.aux_batches())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::SplitGraph;
    use candle_core::{Device, Tensor};

    fn split(n: usize, d: usize, base: f32, edges: Vec<(u32, u32)>, targets: Vec<u32>) -> SplitGraph {
        let device = Device::Cpu;
        let features: Vec<f32> = (0..n * d).map(|i| base + i as f32).collect();
        let labels: Vec<f32> = (0..n).map(|i| base + i as f32).collect();
        let revenue: Vec<f32> = vec![1.0; n];
        SplitGraph::new(
            Tensor::from_vec(features, (n, d), &device).unwrap(),
            Tensor::from_vec(labels, n, &device).unwrap(),
            Tensor::from_vec(revenue, n, &device).unwrap(),
            edges,
            targets,
        )
        .unwrap()
    }

    fn toy_graph() -> Arc<StackedGraph> {
        let ring = |n: u32| -> Vec<(u32, u32)> {
            (0..n)
                .flat_map(|i| [(i, (i + 1) % n), ((i + 1) % n, i)])
                .collect()
        };
        let train = split(10, 2, 0.0, ring(10), (0..10).collect());
        let unlab = split(10, 2, 100.0, ring(10), vec![]);
        let valid = split(10, 2, 200.0, ring(10), (0..10).collect());
        let test = split(10, 2, 300.0, ring(10), (0..10).collect());
        Arc::new(StackedGraph::stack(&train, &unlab, &valid, &test).unwrap())
    }

    #[test]
    fn test_drop_last_batch_count() {
        let graph = toy_graph();
        let cfg = LoaderConfig::default()
            .with_batch_size(4)
            .with_fanouts(vec![2, 2])
            .with_drop_last(true);
        let loader = BatchLoader::new(
            graph.clone(),
            graph.train_view.clone(),
            graph.train_idx.clone(),
            cfg,
        )
        .unwrap();

        // 10 targets, batch 4, drop_last: floor(10 / 4) = 2 batches.
        assert_eq!(loader.num_batches(), 2);
        let batches: Vec<_> = loader.batches().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert_eq!(batch.adjs.len(), 2);
            assert_eq!(batch.target_count().unwrap(), 4);
        }
    }

    #[test]
    fn test_keep_last_batch_count() {
        let graph = toy_graph();
        let cfg = LoaderConfig::default()
            .with_batch_size(4)
            .with_fanouts(vec![2]);
        let loader = BatchLoader::new(
            graph.clone(),
            graph.test_view.clone(),
            graph.test_idx.clone(),
            cfg,
        )
        .unwrap();

        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<_> = loader.batches().collect::<Result<_>>().unwrap();
        assert_eq!(batches[2].target_count().unwrap(), 2);
    }

    #[test]
    fn test_repeatable_for_fixed_seed() {
        let graph = toy_graph();
        let cfg = LoaderConfig::default()
            .with_batch_size(4)
            .with_fanouts(vec![2, 2])
            .with_shuffle(true)
            .with_drop_last(true);
        let loader = BatchLoader::new(
            graph.clone(),
            graph.train_view.clone(),
            graph.train_idx.clone(),
            cfg,
        )
        .unwrap();

        let a: Vec<_> = loader.batches().collect::<Result<_>>().unwrap();
        let b: Vec<_> = loader.batches().collect::<Result<_>>().unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(
                x.y.to_vec1::<f32>().unwrap(),
                y.y.to_vec1::<f32>().unwrap()
            );
            assert_eq!(
                x.x.to_vec2::<f32>().unwrap(),
                y.x.to_vec2::<f32>().unwrap()
            );
        }
    }

    #[test]
    fn test_parallel_equals_sequential() {
        let graph = toy_graph();
        let cfg = LoaderConfig::default()
            .with_batch_size(3)
            .with_fanouts(vec![2, 2])
            .with_shuffle(true)
            .with_num_workers(4);
        let loader = BatchLoader::new(
            graph.clone(),
            graph.train_view.clone(),
            graph.train_idx.clone(),
            cfg,
        )
        .unwrap();

        let lazy: Vec<_> = loader.batches().collect::<Result<_>>().unwrap();
        let eager = loader.collect_batches().unwrap();
        assert_eq!(lazy.len(), eager.len());
        for (x, y) in lazy.iter().zip(&eager) {
            assert_eq!(
                x.x.to_vec2::<f32>().unwrap(),
                y.x.to_vec2::<f32>().unwrap()
            );
            assert_eq!(
                x.y.to_vec1::<f32>().unwrap(),
                y.y.to_vec1::<f32>().unwrap()
            );
        }
    }

    #[test]
    fn test_contrastive_train_targets_are_tripled() {
        let graph = toy_graph();
        let data = ContrastiveData::new(graph, vec![2, 2]).with_batch_size(5);
        let batches: Vec<_> = data.train_batches().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert_eq!(batch.target_count().unwrap(), 15);
        }
    }

    #[test]
    fn test_shuffle_changes_order_not_population() {
        let graph = toy_graph();
        let cfg = LoaderConfig::default()
            .with_batch_size(10)
            .with_fanouts(vec![1])
            .with_shuffle(true)
            .with_seed(3);
        let loader = BatchLoader::new(
            graph.clone(),
            graph.train_view.clone(),
            graph.train_idx.clone(),
            cfg,
        )
        .unwrap();

        let batch = loader.batches().next().unwrap().unwrap();
        let mut labels = batch.y.to_vec1::<f32>().unwrap();
        labels.sort_by(f32::total_cmp);
        assert_eq!(labels, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let graph = toy_graph();
        let err = BatchLoader::new(
            graph.clone(),
            graph.train_view.clone(),
            graph.train_idx.clone(),
            LoaderConfig::default().with_batch_size(0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
