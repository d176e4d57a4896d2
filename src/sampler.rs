//! Multi-hop neighborhood sampling for mini-batch GNN training.
//!
//! Provides the two sampling primitives of the pipeline:
//!
//! - [`NeighborSampler`] - capped multi-hop neighbor sampling over an
//!   [`EdgeView`], GraphSAGE style
//! - [`ContrastivePairSampler`] - augments the anchor set with one positive
//!   and one negative companion per anchor before delegating to the base
//!   sampler, for unsupervised contrastive training
//!
//! # Hop ordering
//!
//! Hops are sampled innermost-first over the growing touched-node list, then
//! the descriptor list is reversed: the first [`Adj`] is the outermost hop
//! and the last is the one immediately adjacent to the anchors. A message
//! passing encoder consumes the list front to back, shrinking its working
//! set at each layer via `size.1`.
//!
//! # Reference
//!
//! Hamilton et al., "Inductive Representation Learning on Large Graphs",
//! NeurIPS 2017.

use crate::error::Result;
use crate::view::EdgeView;
use candle_core::{Device, Tensor};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::collections::HashMap;
use std::sync::Arc;

/// Derive an independent per-chunk sampling seed, so chunk execution order
/// (sequential or on a worker pool) cannot change the drawn neighborhoods.
pub(crate) fn chunk_seed(seed: u64, chunk: u64) -> u64 {
    seed ^ chunk.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// One hop's adjacency descriptor.
///
/// `edge_index` is a `(2, e)` tensor of `[sources; destinations]` remapped
/// to positions in the batch's touched-node list; `edge_ids` holds the
/// original edge identifiers in the source view; `size` is the
/// (source-count, destination-count) node shape of the hop. Destinations
/// are always a prefix of the sources: `size.1 <= size.0`.
#[derive(Debug, Clone)]
pub struct Adj {
    /// Local `[src; dst]` edge index, `(2, e)` u32.
    pub edge_index: Tensor,
    /// Original edge ids, `(e,)` u32.
    pub edge_ids: Tensor,
    /// (source node count, destination node count).
    pub size: (usize, usize),
}

impl Adj {
    /// Relocate both tensors to `device`; `size` is copied. Pure.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            edge_index: self.edge_index.to_device(device)?,
            edge_ids: self.edge_ids.to_device(device)?,
            size: self.size,
        })
    }
}

/// Result of one multi-hop sampling call.
///
/// `node_ids` lists every touched node: the seed list verbatim (duplicates
/// preserved, positions meaningful), followed by every node pulled in across
/// hops, deduplicated by first occurrence. Consumers must slice by position;
/// only `node_ids[..target_count]` is guaranteed to be the seed set.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    /// Number of true target (seed) nodes at the front of `node_ids`.
    pub target_count: usize,
    /// Global ids of all touched nodes, targets first.
    pub node_ids: Vec<u32>,
    /// Hop descriptors, outermost to innermost.
    pub adjs: Vec<Adj>,
}

/// Multi-hop capped neighbor sampler over one edge view.
///
/// `fanouts` holds one cap per hop; `-1` means take all in-neighbors.
/// Sampling is without replacement: when a node's in-degree does not exceed
/// the cap, all in-neighbors are taken.
#[derive(Debug, Clone)]
pub struct NeighborSampler {
    view: Arc<EdgeView>,
    fanouts: Vec<i64>,
}

impl NeighborSampler {
    /// Create a sampler over `view` with per-hop caps `fanouts`.
    pub fn new(view: Arc<EdgeView>, fanouts: Vec<i64>) -> Self {
        Self { view, fanouts }
    }

    /// The edge view this sampler draws from.
    pub fn view(&self) -> &Arc<EdgeView> {
        &self.view
    }

    /// Number of hops.
    pub fn num_hops(&self) -> usize {
        self.fanouts.len()
    }

    /// Sample a multi-hop neighborhood around `seeds`, seeded for
    /// reproducibility: same seed and inputs give an identical batch.
    pub fn sample(&self, seeds: &[u32], seed: u64) -> Result<SampleOutput> {
        let mut rng = XorShiftRng::seed_from_u64(seed);
        self.sample_with_rng(seeds, &mut rng)
    }

    /// Sample using an externally owned rng.
    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        seeds: &[u32],
        rng: &mut R,
    ) -> Result<SampleOutput> {
        // Seeds kept verbatim: contrastive consumers slice companions back
        // apart by position, so duplicates must survive.
        let mut node_ids: Vec<u32> = seeds.to_vec();
        let mut local: HashMap<u32, usize> = HashMap::with_capacity(seeds.len());
        for (i, &n) in seeds.iter().enumerate() {
            local.entry(n).or_insert(i);
        }

        let device = Device::Cpu;
        let mut adjs = Vec::with_capacity(self.fanouts.len());

        for &fanout in &self.fanouts {
            let dst_count = node_ids.len();
            let mut srcs: Vec<u32> = Vec::new();
            let mut dsts: Vec<u32> = Vec::new();
            let mut eids: Vec<u32> = Vec::new();

            // Every node touched so far is a destination row of this hop.
            for i in 0..dst_count {
                let v = node_ids[i];
                let (nbrs, ids) = self.view.in_neighbors(v);

                let picked: Vec<(u32, u32)> = {
                    let all: Vec<(u32, u32)> =
                        nbrs.iter().copied().zip(ids.iter().copied()).collect();
                    if fanout < 0 || all.len() <= fanout as usize {
                        all
                    } else {
                        all.choose_multiple(rng, fanout as usize).copied().collect()
                    }
                };

                for (u, eid) in picked {
                    let src_local = match local.get(&u) {
                        Some(&idx) => idx,
                        None => {
                            let idx = node_ids.len();
                            node_ids.push(u);
                            local.insert(u, idx);
                            idx
                        }
                    };
                    srcs.push(src_local as u32);
                    dsts.push(i as u32);
                    eids.push(eid);
                }
            }

            let num_edges = srcs.len();
            let mut flat = srcs;
            flat.extend_from_slice(&dsts);
            adjs.push(Adj {
                edge_index: Tensor::from_vec(flat, (2, num_edges), &device)?,
                edge_ids: Tensor::from_vec(eids, num_edges, &device)?,
                size: (node_ids.len(), dst_count),
            });
        }

        // Innermost hop was sampled first; flip so the list reads
        // outermost to innermost and the last entry touches the anchors.
        adjs.reverse();

        Ok(SampleOutput {
            target_count: seeds.len(),
            node_ids,
            adjs,
        })
    }
}

/// Contrastive pair sampler for self-supervised training.
///
/// Wraps a [`NeighborSampler`] (composition, not inheritance): per anchor it
/// draws one positive companion by a single random-walk step along the edge
/// view and one negative companion uniformly over the full node range, then
/// delegates the augmented seed list to the base sampler. The seed order is
/// anchors, all positives, all negatives; consumers slice the three groups
/// apart by the original anchor count.
///
/// An anchor with no in-edges yields itself as positive (degenerate self
/// pair); negative collisions with true neighbors are accepted as label
/// noise, not filtered.
#[derive(Debug, Clone)]
pub struct ContrastivePairSampler {
    base: NeighborSampler,
}

impl ContrastivePairSampler {
    /// Wrap a base sampler.
    pub fn new(base: NeighborSampler) -> Self {
        Self { base }
    }

    /// The underlying base sampler.
    pub fn base(&self) -> &NeighborSampler {
        &self.base
    }

    /// Sample neighborhoods for anchors plus their companions.
    ///
    /// The output's `target_count` is `3 * anchors.len()`.
    pub fn sample(&self, anchors: &[u32], seed: u64) -> Result<SampleOutput> {
        let mut rng = XorShiftRng::seed_from_u64(seed);
        self.sample_with_rng(anchors, &mut rng)
    }

    /// Sample using an externally owned rng.
    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        anchors: &[u32],
        rng: &mut R,
    ) -> Result<SampleOutput> {
        let view = self.base.view();
        let num_nodes = view.num_nodes() as u32;

        let mut seeds = Vec::with_capacity(3 * anchors.len());
        seeds.extend_from_slice(anchors);
        for &a in anchors {
            seeds.push(view.walk_step(a, rng));
        }
        for _ in anchors {
            seeds.push(rng.random_range(0..num_nodes));
        }

        self.base.sample_with_rng(&seeds, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::EdgeView;

    /// Directed ring over `n` nodes plus a reverse chord per node.
    fn ring_view(n: u32) -> Arc<EdgeView> {
        let mut edges = Vec::new();
        for i in 0..n {
            edges.push((i, (i + 1) % n));
            edges.push(((i + 1) % n, i));
        }
        Arc::new(EdgeView::new(edges, n as usize).unwrap())
    }

    #[test]
    fn test_single_hop_shapes() {
        let sampler = NeighborSampler::new(ring_view(10), vec![2]);
        let out = sampler.sample(&[0, 5], 42).unwrap();

        assert_eq!(out.target_count, 2);
        assert_eq!(out.adjs.len(), 1);
        assert_eq!(&out.node_ids[..2], &[0, 5]);

        let adj = &out.adjs[0];
        assert_eq!(adj.size.1, 2);
        assert_eq!(adj.size.0, out.node_ids.len());
        // Each of the 2 destinations has in-degree 2, cap 2.
        assert_eq!(adj.edge_index.dims(), &[2, 4]);
    }

    #[test]
    fn test_fanout_cap_bounds_each_hop() {
        let sampler = NeighborSampler::new(ring_view(20), vec![2, 2]);
        let out = sampler.sample(&[0, 7, 13], 1).unwrap();

        assert_eq!(out.adjs.len(), 2);
        for adj in &out.adjs {
            let (src_count, dst_count) = adj.size;
            assert!(dst_count <= src_count);
            // Newly touched nodes cannot exceed destinations times cap.
            assert!(src_count - dst_count <= dst_count * 2);
            // No destination keeps more than cap edges.
            let rows = adj.edge_index.to_vec2::<u32>().unwrap();
            let mut per_dst = vec![0usize; dst_count];
            for &d in &rows[1] {
                per_dst[d as usize] += 1;
            }
            assert!(per_dst.iter().all(|&c| c <= 2));
        }
    }

    #[test]
    fn test_uncapped_takes_all() {
        let sampler = NeighborSampler::new(ring_view(6), vec![-1]);
        let out = sampler.sample(&[3], 9).unwrap();
        let adj = &out.adjs[0];
        // In-degree of every ring node is 2.
        assert_eq!(adj.edge_ids.dims(), &[2]);
    }

    #[test]
    fn test_same_seed_same_batch() {
        let sampler = NeighborSampler::new(ring_view(30), vec![2, 2]);
        let a = sampler.sample(&[0, 11, 22], 1234).unwrap();
        let b = sampler.sample(&[0, 11, 22], 1234).unwrap();

        assert_eq!(a.node_ids, b.node_ids);
        for (x, y) in a.adjs.iter().zip(&b.adjs) {
            assert_eq!(
                x.edge_index.to_vec2::<u32>().unwrap(),
                y.edge_index.to_vec2::<u32>().unwrap()
            );
            assert_eq!(
                x.edge_ids.to_vec1::<u32>().unwrap(),
                y.edge_ids.to_vec1::<u32>().unwrap()
            );
            assert_eq!(x.size, y.size);
        }
    }

    #[test]
    fn test_last_hop_touches_anchors() {
        let sampler = NeighborSampler::new(ring_view(12), vec![1, 1]);
        let out = sampler.sample(&[4], 5).unwrap();

        // The last descriptor's destinations are exactly the seed set.
        assert_eq!(out.adjs.last().unwrap().size.1, 1);
        // The first (outermost) descriptor covers the full touched set.
        assert_eq!(out.adjs[0].size.0, out.node_ids.len());
    }

    #[test]
    fn test_edge_ids_refer_to_view() {
        let view = ring_view(8);
        let sampler = NeighborSampler::new(view.clone(), vec![-1]);
        let out = sampler.sample(&[2], 3).unwrap();

        let adj = &out.adjs[0];
        let eids = adj.edge_ids.to_vec1::<u32>().unwrap();
        let rows = adj.edge_index.to_vec2::<u32>().unwrap();
        for (k, &eid) in eids.iter().enumerate() {
            let (src, dst) = view.edges()[eid as usize];
            assert_eq!(out.node_ids[rows[0][k] as usize], src);
            assert_eq!(out.node_ids[rows[1][k] as usize], dst);
        }
    }

    #[test]
    fn test_contrastive_seed_layout() {
        let sampler = ContrastivePairSampler::new(NeighborSampler::new(ring_view(10), vec![2]));
        let anchors = [1u32, 4, 8];
        let out = sampler.sample(&anchors, 77).unwrap();

        assert_eq!(out.target_count, 9);
        assert_eq!(&out.node_ids[..3], &anchors);
        // Positives are true in-neighbors on the ring.
        for (i, &a) in anchors.iter().enumerate() {
            let pos = out.node_ids[3 + i];
            let (nbrs, _) = sampler.base().view().in_neighbors(a);
            assert!(nbrs.contains(&pos));
        }
        // Negatives are in range.
        for i in 0..3 {
            assert!((out.node_ids[6 + i] as usize) < 10);
        }
    }

    #[test]
    fn test_isolated_anchor_positive_is_self() {
        // Node 2 has no in-edges.
        let view = Arc::new(EdgeView::new(vec![(2, 0), (2, 1)], 3).unwrap());
        let sampler = ContrastivePairSampler::new(NeighborSampler::new(view, vec![1]));
        let out = sampler.sample(&[2], 5).unwrap();

        assert_eq!(out.target_count, 3);
        assert_eq!(out.node_ids[1], 2);
    }
}
