//! Static path enumeration
//!
//! Discovers every execution path from the entry block to an exit, in two
//! regimes: classical DFS when the function has no loops, and a loop-aware
//! traversal otherwise. The loop-aware rule bounds the otherwise infinite
//! dynamic path set: a path may cross a loop header at most twice, once
//! entering the body and once stepping straight to a loop-exit block. This
//! is a deliberate static approximation; nested loops with several exit
//! blocks are only enumerated through the recursive sub-loop splice, so not
//! every dynamically reachable equivalence class appears.

use crate::cfg::loops::LoopForest;
use crate::cfg::{NodeId, PathId};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

/// Node-occurrence fingerprint of a path
///
/// One bit per node id; bit i is set iff node i appears in the sequence.
/// Renders as a '0'/'1' string in node-id order, the same format the
/// instrumented driver prints at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMask {
    bits: Vec<bool>,
}

impl PathMask {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            bits: vec![false; num_nodes],
        }
    }

    /// Build a mask from a runtime trace string ('1' = visited)
    pub fn from_trace(trace: &str) -> Self {
        Self {
            bits: trace.chars().map(|c| c == '1').collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn set_bit(&mut self, index: usize) {
        assert!(index < self.bits.len(), "mask index {index} out of range");
        self.bits[index] = true;
    }

    pub fn bit(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    /// True when every bit set in `other` is also set in `self`.
    /// Masks of different lengths never cover each other.
    pub fn covers(&self, other: &PathMask) -> bool {
        if self.bits.len() != other.bits.len() {
            return false;
        }
        self.bits
            .iter()
            .zip(&other.bits)
            .all(|(mine, theirs)| *mine || !*theirs)
    }
}

impl fmt::Display for PathMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in &self.bits {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// One static path: an ordered node-id sequence from entry to an exit
#[derive(Debug, Clone)]
pub struct Path {
    /// Stable id, assigned in enumeration order
    pub id: PathId,
    /// Node ids in traversal order
    pub nodes: Vec<NodeId>,
    mask: PathMask,
}

impl Path {
    /// Create a path over a CFG of `total_nodes` blocks
    pub fn new(id: PathId, total_nodes: usize, nodes: Vec<NodeId>) -> Self {
        let mut mask = PathMask::new(total_nodes);
        for &node in &nodes {
            assert!(node < total_nodes, "node id {node} out of range");
            mask.set_bit(node);
        }
        Self { id, nodes, mask }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn mask(&self) -> &PathMask {
        &self.mask
    }

    pub fn mask_string(&self) -> String {
        self.mask.to_string()
    }

    /// Render as `0 -> 2 -> 3`
    pub fn nodes_string(&self) -> String {
        self.nodes
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Path", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("mask", &self.mask.to_string())?;
        state.serialize_field("nodes", &self.nodes_string())?;
        state.end()
    }
}

/// Enumerate all static path sequences over a successor table
///
/// `edges[i]` lists the successors of block i in IR terminator order;
/// block 0 is the entry and the highest id is the function's last block.
pub fn enumerate_sequences(edges: &[Vec<NodeId>], loops: &LoopForest) -> Vec<Vec<NodeId>> {
    if edges.is_empty() {
        return Vec::new();
    }
    if loops.is_empty() {
        let mut all = Vec::new();
        let mut current = vec![0];
        dfs_acyclic(edges, 0, &mut current, &mut all);
        all
    } else {
        let last = edges.len() - 1;
        let exit_set: HashSet<NodeId> = HashSet::from([last]);
        let mut all = Vec::new();
        dfs_loop_aware(edges, loops, 0, None, vec![0], &mut all, &exit_set);
        all
    }
}

/// Plain DFS; a path completes at any successor-less block
fn dfs_acyclic(
    edges: &[Vec<NodeId>],
    node: NodeId,
    current: &mut Vec<NodeId>,
    all: &mut Vec<Vec<NodeId>>,
) {
    if edges[node].is_empty() {
        all.push(current.clone());
        return;
    }
    for &next in &edges[node] {
        current.push(next);
        dfs_acyclic(edges, next, current, all);
        current.pop();
    }
}

/// DFS bounded by the loop rule
///
/// `header` is the loop whose body is being walked (None outside any loop);
/// `exit_set` holds the blocks that complete a path at this level.
fn dfs_loop_aware(
    edges: &[Vec<NodeId>],
    loops: &LoopForest,
    node: NodeId,
    header: Option<NodeId>,
    path: Vec<NodeId>,
    all: &mut Vec<Vec<NodeId>>,
    exit_set: &HashSet<NodeId>,
) {
    if exit_set.contains(&node) {
        all.push(path);
        return;
    }

    // Second arrival at the walked header (via back-edge or a sub-loop
    // splice landing on it): the only legal continuation is a direct step
    // to a loop-exit block outside the body.
    if header == Some(node) && path.len() > 1 {
        let lp = loops.get(node).expect("walked header has a loop");
        for &escape in &edges[node] {
            if exit_set.contains(&escape) && !lp.contains(escape) {
                let mut extended = path.clone();
                extended.push(escape);
                dfs_loop_aware(edges, loops, escape, header, extended, all, exit_set);
            }
        }
        return;
    }

    // A header other than the one being walked starts a (sub-)loop: splice
    // its enumerated header-to-exit sub-paths, skipping the seam header.
    if header != Some(node) && loops.is_header(node) {
        for sub in loop_paths_from_header(edges, loops, node) {
            let mut spliced = path.clone();
            spliced.extend_from_slice(&sub[1..]);
            let resume = *spliced.last().expect("sub-path is never empty");
            dfs_loop_aware(edges, loops, resume, header, spliced, all, exit_set);
        }
        return;
    }

    for &next in &edges[node] {
        let mut extended = path.clone();
        extended.push(next);
        dfs_loop_aware(edges, loops, next, header, extended, all, exit_set);
    }
}

/// All sub-paths that start at a loop header and reach one of its exit blocks
fn loop_paths_from_header(
    edges: &[Vec<NodeId>],
    loops: &LoopForest,
    header: NodeId,
) -> Vec<Vec<NodeId>> {
    let lp = loops.get(header).expect("caller checked is_header");
    let exit_set: HashSet<NodeId> = lp.exits.iter().copied().collect();
    let mut sub_paths = Vec::new();
    dfs_loop_aware(
        edges,
        loops,
        header,
        Some(header),
        vec![header],
        &mut sub_paths,
        &exit_set,
    );
    sub_paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::loops::detect_natural_loops;
    use crate::cfg::{EdgeKind, Graph, Node, NodeKind};
    use petgraph::graph::NodeIndex;

    fn forest_for(edge_list: &[(NodeId, NodeId)], count: usize) -> (Vec<Vec<NodeId>>, LoopForest) {
        let mut graph = Graph::new();
        for id in 0..count {
            graph.add_node(Node {
                id,
                kind: NodeKind::Normal,
                ops: vec![],
                select_num: 0,
                src: String::new(),
            });
        }
        let mut edges = vec![Vec::new(); count];
        for &(from, to) in edge_list {
            graph.add_edge(
                NodeIndex::new(from),
                NodeIndex::new(to),
                EdgeKind::Fallthrough,
            );
            edges[from].push(to);
        }
        let forest = detect_natural_loops(&graph, &edges);
        (edges, forest)
    }

    #[test]
    fn test_mask_bits_match_sequence() {
        let path = Path::new(0, 4, vec![0, 2, 3]);
        assert_eq!(path.mask_string(), "1011");
        assert!(path.mask().bit(0));
        assert!(!path.mask().bit(1));
    }

    #[test]
    fn test_mask_covers_subset() {
        let full = PathMask::from_trace("1111");
        let sub = PathMask::from_trace("1010");
        assert!(full.covers(&sub));
        assert!(!sub.covers(&full));
        // length mismatch never covers
        assert!(!full.covers(&PathMask::from_trace("111")));
    }

    #[test]
    fn test_single_block_yields_one_path() {
        let (edges, forest) = forest_for(&[], 1);
        let paths = enumerate_sequences(&edges, &forest);
        assert_eq!(paths, vec![vec![0]]);
    }

    #[test]
    fn test_if_else_two_paths_in_discovery_order() {
        // 0 -> {2, 1}, both -> 3 (then-branch listed first in terminator)
        let (edges, forest) = forest_for(&[(0, 2), (0, 1), (2, 3), (1, 3)], 4);
        let paths = enumerate_sequences(&edges, &forest);
        assert_eq!(paths, vec![vec![0, 2, 3], vec![0, 1, 3]]);
    }

    #[test]
    fn test_one_loop_exactly_two_paths() {
        // E=0 -> H=1; H -> B=2 (iterate) or X=3 (exit); B -> H
        let (edges, forest) = forest_for(&[(0, 1), (1, 2), (1, 3), (2, 1)], 4);
        let paths = enumerate_sequences(&edges, &forest);

        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&vec![0, 1, 3]));
        assert!(paths.contains(&vec![0, 1, 2, 1, 3]));

        // the two masks differ exactly in the body bit
        let skip = Path::new(0, 4, vec![0, 1, 3]);
        let once = Path::new(1, 4, vec![0, 1, 2, 1, 3]);
        assert_eq!(skip.mask_string(), "1101");
        assert_eq!(once.mask_string(), "1111");
    }

    #[test]
    fn test_nested_loop_splices_inner_paths() {
        // outer header 1, inner header 2:
        // 0->1; 1->2 | 1->4; 2->3 | 2->1; 3->2; 4 = last block
        let (edges, forest) = forest_for(&[(0, 1), (1, 2), (1, 4), (2, 3), (2, 1), (3, 2)], 5);
        let paths = enumerate_sequences(&edges, &forest);

        assert!(!paths.is_empty());
        for path in &paths {
            assert_eq!(*path.first().unwrap(), 0);
            assert_eq!(*path.last().unwrap(), 4);
            // consecutive entries are actual edges
            for pair in path.windows(2) {
                assert!(
                    edges[pair[0]].contains(&pair[1]),
                    "{} -> {} is not an edge",
                    pair[0],
                    pair[1]
                );
            }
        }
        // skip-loop path exists
        assert!(paths.contains(&vec![0, 1, 4]));
    }

    #[test]
    fn test_acyclic_paths_end_at_any_exit() {
        // two exits: 0 -> 1 (ret), 0 -> 2 (ret)
        let (edges, forest) = forest_for(&[(0, 1), (0, 2)], 3);
        let paths = enumerate_sequences(&edges, &forest);
        assert_eq!(paths, vec![vec![0, 1], vec![0, 2]]);
    }

    #[test]
    fn test_empty_edge_table() {
        let (edges, forest) = forest_for(&[], 0);
        assert!(enumerate_sequences(&edges, &forest).is_empty());
    }

    #[test]
    fn test_path_nodes_string() {
        let path = Path::new(0, 3, vec![0, 1, 2]);
        assert_eq!(path.nodes_string(), "0 -> 1 -> 2");
    }
}
