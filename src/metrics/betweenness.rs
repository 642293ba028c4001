//! Shortest-path betweenness centrality (Brandes' algorithm)
//!
//! Edge weights are tie strengths, so path length uses
//! `distance = 1/weight`: stronger ties make shorter paths. Equal-length
//! shortest paths share fractional credit through the path counts; pairs
//! in different connected components contribute nothing.

use super::AdjacencyView;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Tolerance for treating two accumulated path lengths as equal
const EPS: f64 = 1e-9;

/// State for the Dijkstra priority queue
#[derive(Copy, Clone, PartialEq)]
struct State {
    cost: f64,
    node_idx: usize,
}

impl Eq for State {}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare costs reversed for min-heap
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Raw betweenness per node index.
///
/// Runs a single-source shortest-path accumulation from every node and
/// sums pair dependencies; undirected totals are halved at the end.
pub(crate) fn betweenness(view: &AdjacencyView) -> Vec<f64> {
    let n = view.node_count;
    let mut centrality = vec![0.0; n];

    for source in 0..n {
        let mut dist = vec![f64::INFINITY; n];
        let mut sigma = vec![0.0_f64; n];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut settled: Vec<usize> = Vec::with_capacity(n);
        let mut done = vec![false; n];
        let mut heap = BinaryHeap::new();

        dist[source] = 0.0;
        sigma[source] = 1.0;
        heap.push(State {
            cost: 0.0,
            node_idx: source,
        });

        while let Some(State { cost, node_idx }) = heap.pop() {
            if done[node_idx] {
                continue;
            }
            done[node_idx] = true;
            settled.push(node_idx);

            for (&next_idx, &weight) in &view.adjacency[node_idx] {
                if weight <= 0.0 || done[next_idx] {
                    continue;
                }
                let alt = cost + 1.0 / weight;

                if alt < dist[next_idx] - EPS {
                    dist[next_idx] = alt;
                    sigma[next_idx] = sigma[node_idx];
                    preds[next_idx].clear();
                    preds[next_idx].push(node_idx);
                    heap.push(State {
                        cost: alt,
                        node_idx: next_idx,
                    });
                } else if (alt - dist[next_idx]).abs() <= EPS {
                    // Another shortest path of the same length
                    sigma[next_idx] += sigma[node_idx];
                    preds[next_idx].push(node_idx);
                }
            }
        }

        // Dependency accumulation in reverse settlement order
        let mut delta = vec![0.0_f64; n];
        while let Some(w) = settled.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != source {
                centrality[w] += delta[w];
            }
        }
    }

    // Each undirected pair was counted from both endpoints
    for value in &mut centrality {
        *value /= 2.0;
    }
    centrality
}
