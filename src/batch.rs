//! Immutable mini-batch records and device relocation.
//!
//! Two batch shapes, both assembled from a stacked graph plus one sampler
//! output and destroyed after a single training step:
//!
//! - [`Batch`] - supervised: target features, labels, revenue, hop
//!   descriptors
//! - [`AuxBatch`] - self-supervised-augmented: the same plus precomputed
//!   auxiliary embedding rows for every touched node
//!
//! Relocation is pure: `to_device` builds a new record with every tensor
//! transferred field by field, leaving the original untouched. Transfer
//! failures surface as [`crate::Error::Tensor`] unmodified, with no retry.

use crate::error::{Error, Result};
use crate::sampler::{Adj, SampleOutput};
use crate::stack::StackedGraph;
use candle_core::{Device, Tensor};

fn relocate_adjs(adjs: &[Adj], device: &Device) -> Result<Vec<Adj>> {
    adjs.iter().map(|adj| adj.to_device(device)).collect()
}

/// A supervised mini-batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Features of every touched node, `(num_touched, d)`.
    pub x: Tensor,
    /// Labels of the target nodes, `(target_count,)`.
    pub y: Tensor,
    /// Revenue of the target nodes, `(target_count,)`.
    pub rev: Tensor,
    /// Hop descriptors, outermost to innermost.
    pub adjs: Vec<Adj>,
}

impl Batch {
    /// Assemble a batch from a stacked graph and one sampler output.
    pub fn assemble(graph: &StackedGraph, out: &SampleOutput) -> Result<Self> {
        let targets = &out.node_ids[..out.target_count];
        Ok(Self {
            x: graph.gather_features(&out.node_ids)?,
            y: graph.gather_labels(targets)?,
            rev: graph.gather_revenue(targets)?,
            adjs: out.adjs.clone(),
        })
    }

    /// Number of target nodes in this batch.
    pub fn target_count(&self) -> Result<usize> {
        Ok(self.y.dim(0)?)
    }

    /// Relocate every tensor field to `device`. Pure.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            x: self.x.to_device(device)?,
            y: self.y.to_device(device)?,
            rev: self.rev.to_device(device)?,
            adjs: relocate_adjs(&self.adjs, device)?,
        })
    }
}

/// A self-supervised-augmented mini-batch.
///
/// Carries auxiliary embedding rows for every touched node, not just the
/// targets, so the encoder can consume them as extra input features at any
/// hop depth.
#[derive(Debug, Clone)]
pub struct AuxBatch {
    /// Features of every touched node, `(num_touched, d)`.
    pub x: Tensor,
    /// Auxiliary embedding rows of every touched node, `(num_touched, aux_dim)`.
    pub x_aux: Tensor,
    /// Labels of the target nodes, `(target_count,)`.
    pub y: Tensor,
    /// Revenue of the target nodes, `(target_count,)`.
    pub rev: Tensor,
    /// Hop descriptors, outermost to innermost.
    pub adjs: Vec<Adj>,
}

impl AuxBatch {
    /// Assemble an augmented batch from a stacked graph and one sampler
    /// output.
    ///
    /// # Errors
    /// [`Error::AuxMissing`] if the precompute pass has not populated the
    /// graph's auxiliary embeddings. The pass must complete before any
    /// augmented batch is assembled.
    pub fn assemble(graph: &StackedGraph, out: &SampleOutput) -> Result<Self> {
        let aux = graph.aux().ok_or(Error::AuxMissing)?;
        let targets = &out.node_ids[..out.target_count];
        Ok(Self {
            x: graph.gather_features(&out.node_ids)?,
            x_aux: aux.rows(&out.node_ids, graph.features.device())?,
            y: graph.gather_labels(targets)?,
            rev: graph.gather_revenue(targets)?,
            adjs: out.adjs.clone(),
        })
    }

    /// Number of target nodes in this batch.
    pub fn target_count(&self) -> Result<usize> {
        Ok(self.y.dim(0)?)
    }

    /// Relocate every tensor field to `device`. Pure.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            x: self.x.to_device(device)?,
            x_aux: self.x_aux.to_device(device)?,
            y: self.y.to_device(device)?,
            rev: self.rev.to_device(device)?,
            adjs: relocate_adjs(&self.adjs, device)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::NeighborSampler;
    use crate::stack::SplitGraph;

    fn split(n: usize, d: usize, base: f32, edges: Vec<(u32, u32)>, targets: Vec<u32>) -> SplitGraph {
        let device = Device::Cpu;
        let features: Vec<f32> = (0..n * d).map(|i| base + i as f32).collect();
        let labels: Vec<f32> = (0..n).map(|i| base + i as f32).collect();
        let revenue: Vec<f32> = (0..n).map(|i| 2.0 * (base + i as f32)).collect();
        SplitGraph::new(
            Tensor::from_vec(features, (n, d), &device).unwrap(),
            Tensor::from_vec(labels, n, &device).unwrap(),
            Tensor::from_vec(revenue, n, &device).unwrap(),
            edges,
            targets,
        )
        .unwrap()
    }

    fn toy_graph() -> StackedGraph {
        // Ring over each split's 4 nodes.
        let ring = |n: u32| -> Vec<(u32, u32)> { (0..n).map(|i| (i, (i + 1) % n)).collect() };
        let train = split(4, 3, 0.0, ring(4), vec![0, 1, 2, 3]);
        let unlab = split(4, 3, 100.0, ring(4), vec![]);
        let valid = split(4, 3, 200.0, ring(4), vec![0, 1]);
        let test = split(4, 3, 300.0, ring(4), vec![2, 3]);
        StackedGraph::stack(&train, &unlab, &valid, &test).unwrap()
    }

    #[test]
    fn test_assemble_shapes() {
        let graph = toy_graph();
        let sampler = NeighborSampler::new(graph.train_view.clone(), vec![2, 2]);
        let out = sampler.sample(&graph.train_idx, 42).unwrap();
        let batch = Batch::assemble(&graph, &out).unwrap();

        assert_eq!(batch.x.dims(), &[out.node_ids.len(), 3]);
        assert_eq!(batch.y.dims(), &[4]);
        assert_eq!(batch.rev.dims(), &[4]);
        assert_eq!(batch.adjs.len(), 2);
    }

    #[test]
    fn test_labels_match_targets() {
        let graph = toy_graph();
        let sampler = NeighborSampler::new(graph.train_view.clone(), vec![1]);
        let out = sampler.sample(&[2, 0], 3).unwrap();
        let batch = Batch::assemble(&graph, &out).unwrap();

        assert_eq!(batch.y.to_vec1::<f32>().unwrap(), vec![2.0, 0.0]);
        assert_eq!(batch.rev.to_vec1::<f32>().unwrap(), vec![4.0, 0.0]);
    }

    #[test]
    fn test_aux_batch_requires_precompute() {
        let graph = toy_graph();
        let sampler = NeighborSampler::new(graph.train_view.clone(), vec![1]);
        let out = sampler.sample(&[0], 1).unwrap();
        let err = AuxBatch::assemble(&graph, &out).unwrap_err();
        assert!(matches!(err, Error::AuxMissing));
    }

    #[test]
    fn test_relocation_roundtrip_preserves_values() {
        let graph = toy_graph();
        let sampler = NeighborSampler::new(graph.train_view.clone(), vec![2]);
        let out = sampler.sample(&graph.train_idx, 11).unwrap();
        let batch = Batch::assemble(&graph, &out).unwrap();

        let moved = batch.to_device(&Device::Cpu).unwrap();
        assert_eq!(
            batch.x.to_vec2::<f32>().unwrap(),
            moved.x.to_vec2::<f32>().unwrap()
        );
        assert_eq!(
            batch.y.to_vec1::<f32>().unwrap(),
            moved.y.to_vec1::<f32>().unwrap()
        );
        assert_eq!(
            batch.rev.to_vec1::<f32>().unwrap(),
            moved.rev.to_vec1::<f32>().unwrap()
        );
        for (a, b) in batch.adjs.iter().zip(&moved.adjs) {
            assert_eq!(
                a.edge_index.to_vec2::<u32>().unwrap(),
                b.edge_index.to_vec2::<u32>().unwrap()
            );
            assert_eq!(
                a.edge_ids.to_vec1::<u32>().unwrap(),
                b.edge_ids.to_vec1::<u32>().unwrap()
            );
            assert_eq!(a.size, b.size);
        }
    }
}
