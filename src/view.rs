//! Immutable edge-view snapshots over a stacked graph.
//!
//! An [`EdgeView`] freezes one edge list together with a CSR index over
//! in-neighbors, so samplers can enumerate the message sources of a node in
//! O(degree) and keep the original edge identifier of every retained edge.
//!
//! Edge identity is positional: edge `i` is the `i`-th pair of the list the
//! view was built from. The three cumulative views of a stacked graph are
//! built by prefix-preserving concatenation, so an edge keeps the same id in
//! every view that contains it.

use crate::error::{Error, Result};
use rand::prelude::*;

/// An immutable edge list with an in-neighbor CSR index.
///
/// Edges are directed `(src, dst)`; the index is keyed by destination, i.e.
/// `in_neighbors(v)` lists the nodes that send messages to `v`. This matches
/// the aggregation direction of message passing: sampling a node's
/// neighborhood pulls in the sources it aggregates from.
#[derive(Debug, Clone)]
pub struct EdgeView {
    edges: Vec<(u32, u32)>,
    num_nodes: usize,
    /// CSR offsets, one slot per node plus the terminal bound.
    offsets: Vec<usize>,
    /// Source node per CSR slot.
    srcs: Vec<u32>,
    /// Original edge id per CSR slot.
    eids: Vec<u32>,
}

impl EdgeView {
    /// Build a view over `edges` with node indices bounded by `num_nodes`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if any endpoint is `>= num_nodes`.
    pub fn new(edges: Vec<(u32, u32)>, num_nodes: usize) -> Result<Self> {
        for &(src, dst) in &edges {
            for index in [src, dst] {
                if index as usize >= num_nodes {
                    return Err(Error::IndexOutOfRange { index, num_nodes });
                }
            }
        }

        // Counting sort by destination.
        let mut counts = vec![0usize; num_nodes + 1];
        for &(_, dst) in &edges {
            counts[dst as usize + 1] += 1;
        }
        for i in 0..num_nodes {
            counts[i + 1] += counts[i];
        }
        let offsets = counts.clone();

        let mut srcs = vec![0u32; edges.len()];
        let mut eids = vec![0u32; edges.len()];
        let mut cursor = counts;
        for (eid, &(src, dst)) in edges.iter().enumerate() {
            let slot = cursor[dst as usize];
            srcs[slot] = src;
            eids[slot] = eid as u32;
            cursor[dst as usize] += 1;
        }

        Ok(Self {
            edges,
            num_nodes,
            offsets,
            srcs,
            eids,
        })
    }

    /// Number of nodes covered by this view.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of edges in this view.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// The raw `(src, dst)` edge list, in id order.
    pub fn edges(&self) -> &[(u32, u32)] {
        &self.edges
    }

    /// In-neighbors of `v`: parallel slices of source nodes and edge ids.
    pub fn in_neighbors(&self, v: u32) -> (&[u32], &[u32]) {
        let lo = self.offsets[v as usize];
        let hi = self.offsets[v as usize + 1];
        (&self.srcs[lo..hi], &self.eids[lo..hi])
    }

    /// In-degree of `v`.
    pub fn in_degree(&self, v: u32) -> usize {
        self.offsets[v as usize + 1] - self.offsets[v as usize]
    }

    /// One random-walk step backwards along an in-edge of `v`.
    ///
    /// Returns `v` itself when it has no in-edges; the walk pads with its
    /// start node rather than failing, so callers can treat the result as a
    /// degenerate self-pair.
    pub fn walk_step<R: Rng + ?Sized>(&self, v: u32, rng: &mut R) -> u32 {
        let (nbrs, _) = self.in_neighbors(v);
        match nbrs.choose(rng) {
            Some(&u) => u,
            None => v,
        }
    }
}
