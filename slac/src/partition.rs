// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slac_core::errors::{capacity_error, Result, SlacError};

use crate::predictor::parcor::{estimate_code_length, ParcorAnalyzer};

/// Effectively-infinite edge weight for the shortest-path search.
const DIJKSTRA_BIG_WEIGHT: f64 = (1u64 << 24) as f64;

/// Rough per-block header cost added to every edge, in bytes.
const ESTIMATED_BLOCK_HEADER_SIZE: f64 = 50.0;

/// Extra per-edge cost discouraging fragmentation into many small blocks, in bytes.
const LONGPATH_PENALTY: f64 = 10.0;

/// `BlockPartitionEstimator` chooses block boundaries that minimise the total estimated code
/// length of a span of samples.
///
/// Candidate boundaries sit on a grid of `delta` samples. Every pair of grid nodes is an
/// edge weighted with the PARCOR code-length estimate of the samples between them (infinite
/// when the span violates the block-size bounds), and Dijkstra's algorithm finds the
/// cheapest path from the first node to the last.
pub struct BlockPartitionEstimator {
    max_num_nodes: usize,
    adjacency: Vec<f64>,
    cost: Vec<f64>,
    path: Vec<usize>,
    used: Vec<bool>,
    coef: Vec<f64>,
}

impl BlockPartitionEstimator {
    /// Number of grid nodes spanning `num_samples` at a grid step of `delta`.
    fn num_nodes(num_samples: u32, delta: u32) -> usize {
        (((num_samples + delta - 1) / delta) + 1) as usize
    }

    /// The largest number of partitions a search over `max_num_samples` can produce.
    pub fn max_num_partitions(max_num_samples: u32, delta: u32) -> usize {
        Self::num_nodes(max_num_samples, delta)
    }

    /// Instantiate an estimator for spans of up to `max_num_samples` samples on a grid of
    /// `delta` samples, using PARCOR estimates of up to `max_parcor_order`.
    pub fn new(max_num_samples: u32, delta: u32, max_parcor_order: usize) -> Self {
        assert!(max_num_samples >= delta);

        let max_num_nodes = Self::num_nodes(max_num_samples, delta);

        BlockPartitionEstimator {
            max_num_nodes,
            adjacency: vec![0.0; max_num_nodes * max_num_nodes],
            cost: vec![0.0; max_num_nodes],
            path: vec![0; max_num_nodes],
            used: vec![false; max_num_nodes],
            coef: vec![0.0; max_parcor_order + 1],
        }
    }

    /// Searches the optimal partition of `data[..][..num_samples]` into blocks of
    /// `min_num_block_samples..=max_num_block_samples` samples.
    ///
    /// Fills `partitions` with the chosen block lengths in stream order and returns their
    /// count.
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &mut self,
        analyzer: &mut ParcorAnalyzer,
        data: &[Vec<f64>],
        num_channels: usize,
        num_samples: u32,
        min_num_block_samples: u32,
        delta: u32,
        max_num_block_samples: u32,
        bits_per_sample: u32,
        parcor_order: usize,
        partitions: &mut [u32],
    ) -> Result<usize> {
        let num_nodes = Self::num_nodes(num_samples, delta);
        if num_nodes > self.max_num_nodes {
            return capacity_error("partition span exceeds estimator capacity");
        }

        let stride = self.max_num_nodes;

        // Edge (i, j) carries the estimated cost of coding samples
        // [i * delta, j * delta) as a single block.
        for i in 0..num_nodes {
            for j in 0..num_nodes {
                if j <= i {
                    self.adjacency[i * stride + j] = DIJKSTRA_BIG_WEIGHT;
                    continue;
                }

                let sample_offset = i as u32 * delta;
                // The trailing node overshoots the span; clip the final block to it.
                let num_block_samples =
                    ((j - i) as u32 * delta).min(num_samples - sample_offset);

                if num_block_samples < min_num_block_samples
                    || num_block_samples > max_num_block_samples
                {
                    self.adjacency[i * stride + j] = DIJKSTRA_BIG_WEIGHT;
                    continue;
                }

                let mut estimate = 0.0;
                for chan in data[..num_channels].iter() {
                    let segment = &chan
                        [sample_offset as usize..(sample_offset + num_block_samples) as usize];

                    analyzer.calculate_parcor(segment, parcor_order, &mut self.coef)?;

                    let length_per_sample =
                        estimate_code_length(segment, bits_per_sample, &self.coef, parcor_order);
                    estimate += f64::from(num_block_samples) * length_per_sample;
                }

                self.adjacency[i * stride + j] =
                    estimate + ESTIMATED_BLOCK_HEADER_SIZE + LONGPATH_PENALTY;
            }
        }

        self.dijkstra(num_nodes, 0, num_nodes - 1)?;

        // Walk the parent pointers back from the goal to count the partitions.
        let mut num_partitions = 0;
        let mut node = num_nodes - 1;
        while node != 0 {
            // The path visits nodes in ascending order.
            debug_assert!(self.path[node] < node);
            node = self.path[node];
            num_partitions += 1;
        }

        // Walk again, writing the block lengths in stream order.
        let mut node = num_nodes - 1;
        for i in 0..num_partitions {
            let prev = self.path[node];
            let sample_offset = prev as u32 * delta;
            let num_block_samples =
                ((node - prev) as u32 * delta).min(num_samples - sample_offset);

            partitions[num_partitions - i - 1] = num_block_samples;
            node = prev;
        }

        Ok(num_partitions)
    }

    fn dijkstra(&mut self, num_nodes: usize, start: usize, goal: usize) -> Result<()> {
        let stride = self.max_num_nodes;

        for i in 0..num_nodes {
            self.used[i] = false;
            self.path[i] = usize::MAX;
            self.cost[i] = DIJKSTRA_BIG_WEIGHT;
        }

        self.cost[start] = 0.0;

        loop {
            // Settle the cheapest unsettled node.
            let mut min = DIJKSTRA_BIG_WEIGHT;
            let mut target = usize::MAX;
            for i in 0..num_nodes {
                if !self.used[i] && self.cost[i] < min {
                    min = self.cost[i];
                    target = i;
                }
            }

            // Every remaining node is unreachable; with valid block-size bounds this cannot
            // happen before the goal settles.
            if target == usize::MAX {
                return Err(SlacError::CoefficientCalculationFailed);
            }

            if target == goal {
                break;
            }

            // Relax every edge out of the settled node.
            for i in 0..num_nodes {
                let via = self.adjacency[target * stride + i] + self.cost[target];
                if self.cost[i] > via {
                    self.cost[i] = via;
                    self.path[i] = target;
                }
            }

            self.used[target] = true;
        }

        Ok(())
    }
}
