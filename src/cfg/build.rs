//! Build a [`Cfg`] from a parsed IR function
//!
//! Blocks get dense ids in IR order; successor edges follow terminator
//! operand order; kinds and branch ordinals are derived from the edge
//! structure and dominator-based loop analysis. Path enumeration runs as
//! the final construction step, so a returned Cfg is complete and
//! immutable from the caller's point of view.

use crate::cfg::loops::detect_natural_loops;
use crate::cfg::paths::enumerate_sequences;
use crate::cfg::{Cfg, EdgeKind, Node, NodeKind};
use crate::ir;
use anyhow::{bail, Result};

/// Build the CFG of `function`, including loop info and enumerated paths
pub fn build_cfg(function: &ir::Function) -> Result<Cfg> {
    if function.blocks.is_empty() {
        bail!("function @{} has no basic blocks", function.name);
    }

    let mut cfg = Cfg::new(function.name.clone());
    for (id, block) in function.blocks.iter().enumerate() {
        let ops = block
            .instructions
            .iter()
            .map(|inst| inst.opcode.clone())
            .collect();
        cfg.add_node(Node {
            id,
            kind: NodeKind::Normal,
            ops,
            select_num: 0,
            src: String::new(),
        });
    }
    cfg.node_mut(0).kind = NodeKind::Entry;

    // Successor edges in terminator operand order
    let label_index = function.block_index();
    for (id, block) in function.blocks.iter().enumerate() {
        for (ordinal, label) in block.successors.iter().enumerate() {
            let Some(&target) = label_index.get(label.as_str()) else {
                bail!(
                    "function @{}: block {id} branches to unknown label %{label}",
                    function.name
                );
            };
            let kind = if block.successors.len() > 1 {
                EdgeKind::Select(ordinal as u32 + 1)
            } else {
                EdgeKind::Fallthrough
            };
            cfg.add_edge(id, target, kind);
        }
    }

    // Loop headers before the exit/branch pass, so a branching header
    // keeps its Loop kind
    let loop_forest = detect_natural_loops(cfg.graph(), raw_edges(&cfg));
    for header in loop_forest.headers() {
        cfg.node_mut(header).kind = NodeKind::Loop;
    }

    for id in 0..cfg.len() {
        let successors: Vec<_> = cfg.successors(id).to_vec();
        if successors.is_empty() {
            cfg.node_mut(id).kind = NodeKind::Exit;
        } else if successors.len() > 1 {
            if cfg.node(id).kind == NodeKind::Normal {
                cfg.node_mut(id).kind = NodeKind::Branch;
            }
            for (ordinal, &target) in successors.iter().enumerate() {
                cfg.node_mut(target).select_num = ordinal as u32 + 1;
            }
        }
    }

    let sequences = enumerate_sequences(raw_edges(&cfg), &loop_forest);
    tracing::debug!(
        function = %function.name,
        blocks = cfg.len(),
        paths = sequences.len(),
        "enumerated static paths"
    );
    cfg.install_paths(sequences);
    Ok(cfg)
}

fn raw_edges(cfg: &Cfg) -> &[Vec<usize>] {
    // successor table indexed by node id; build_cfg fills it densely
    cfg.edge_table()
}
