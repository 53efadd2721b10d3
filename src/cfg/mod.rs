// CFG data structures shared by the analysis and instrumentation pipelines

pub mod build;
pub mod export;
pub mod loops;
pub mod matcher;
pub mod paths;
pub mod source;

pub use build::build_cfg;
pub use export::{export_dot, CfgExport};
pub use loops::{detect_natural_loops, LoopForest, NaturalLoop};
pub use paths::{Path, PathMask};
pub use source::{annotate_from_source, SrcLoc};

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Dense block identifier within one function
pub type NodeId = usize;

/// Path identifier; matches the wire format where -1 marks "no path"
pub type PathId = i32;

/// Sentinel for a failed path match
pub const INVALID_PATH_ID: PathId = -1;

/// Graph backbone: nodes carry block data, edges their branch ordinal
pub type Graph = DiGraph<Node, EdgeKind>;

/// Node classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entry,
    Exit,
    Branch,
    Loop,
    Normal,
}

/// Edge classification
///
/// `Select(n)` is the n-th outgoing edge (1-based) of a multi-way
/// terminator; single-successor blocks fall through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    Fallthrough,
    Select(u32),
}

/// One basic block of the function under analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Dense id, assigned in IR block order
    pub id: NodeId,
    pub kind: NodeKind,
    /// Opcode mnemonics, one per IR instruction
    pub ops: Vec<String>,
    /// 1-based ordinal of the incoming branch edge; 0 for non-branch targets
    pub select_num: u32,
    /// Reconstructed source snippet (empty when annotation is unavailable)
    pub src: String,
}

/// Control-flow graph of one function version
///
/// Owns its nodes, edges and enumerated static paths. Node ids double as
/// indices into both the successor table and the petgraph backbone, which
/// the builder asserts at insertion.
#[derive(Debug)]
pub struct Cfg {
    pub function_name: String,
    graph: Graph,
    /// Successor ids per node, in IR terminator order
    edges: Vec<Vec<NodeId>>,
    paths: Vec<Path>,
    /// bitmask string -> path id; first occurrence wins
    mask_index: HashMap<String, PathId>,
    /// Per-path test-execution counters used to break matching ties
    path_test_counts: HashMap<PathId, u32>,
    /// Source (line, column) -> node id
    loc_map: BTreeMap<SrcLoc, NodeId>,
}

impl Cfg {
    pub(crate) fn new(function_name: String) -> Self {
        Self {
            function_name,
            graph: Graph::new(),
            edges: Vec::new(),
            paths: Vec::new(),
            mask_index: HashMap::new(),
            path_test_counts: HashMap::new(),
            loc_map: BTreeMap::new(),
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, id: NodeId) -> &Node {
        assert!(id < self.len(), "node id {id} out of range");
        &self.graph[NodeIndex::new(id)]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        assert!(id < self.len(), "node id {id} out of range");
        &mut self.graph[NodeIndex::new(id)]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    /// Successors of a block, in IR terminator order
    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        assert!(id < self.edges.len(), "block id {id} out of range");
        &self.edges[id]
    }

    /// The full successor table, indexed by node id
    pub(crate) fn edge_table(&self) -> &[Vec<NodeId>] {
        &self.edges
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn path(&self, id: PathId) -> &Path {
        let idx = usize::try_from(id).expect("path id must be non-negative");
        assert!(idx < self.paths.len(), "path id {id} out of range");
        &self.paths[idx]
    }

    /// Node-id sequences of all paths, in path-id order
    pub fn path_node_sequences(&self) -> Vec<Vec<NodeId>> {
        self.paths.iter().map(|p| p.nodes.clone()).collect()
    }

    /// Human-readable rendering of one path (`0 -> 2 -> 3`)
    pub fn path_string(&self, id: PathId) -> String {
        if id < 0 || id as usize >= self.paths.len() {
            return format!("<invalid path {id}>");
        }
        self.paths[id as usize].nodes_string()
    }

    pub(crate) fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        let idx = self.graph.add_node(node);
        assert_eq!(idx.index(), id, "node id must match insertion order");
        self.edges.push(Vec::new());
        id
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.graph
            .add_edge(NodeIndex::new(from), NodeIndex::new(to), kind);
        self.edges[from].push(to);
    }

    pub(crate) fn install_paths(&mut self, sequences: Vec<Vec<NodeId>>) {
        let size = self.len();
        for nodes in sequences {
            let id = self.paths.len() as PathId;
            let path = Path::new(id, size, nodes);
            let mask = path.mask_string();
            if let Some(&existing) = self.mask_index.get(&mask) {
                tracing::warn!(
                    function = %self.function_name,
                    "paths {existing} and {id} share bitmask {mask}; keeping {existing}"
                );
            } else {
                self.mask_index.insert(mask, id);
            }
            self.paths.push(path);
        }
    }

    pub(crate) fn mask_index(&self) -> &HashMap<String, PathId> {
        &self.mask_index
    }

    pub(crate) fn path_test_counts_mut(&mut self) -> &mut HashMap<PathId, u32> {
        &mut self.path_test_counts
    }

    pub(crate) fn loc_map(&self) -> &BTreeMap<SrcLoc, NodeId> {
        &self.loc_map
    }

    pub(crate) fn loc_map_mut(&mut self) -> &mut BTreeMap<SrcLoc, NodeId> {
        &mut self.loc_map
    }
}
