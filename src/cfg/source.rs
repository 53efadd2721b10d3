//! Source annotation for CFG nodes
//!
//! Debug locations attached to a block's instructions are mapped back to
//! the C source: each node collects its (line, column) set, and a snippet
//! is reconstructed by slicing each location up to the next recorded
//! location on the same line, or to end-of-line otherwise. Annotation is
//! best-effort; an unreadable source leaves nodes with empty snippets.

use crate::cfg::{Cfg, NodeId};
use crate::ir;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Bound;
use std::path::Path;

/// A (line, column) position in the source file, both 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SrcLoc {
    pub line: u32,
    pub column: u32,
}

/// Attach source snippets to the nodes of `cfg`
///
/// `function` must be the IR function the CFG was built from; its debug
/// locations drive the mapping. Returns an error only when the source file
/// cannot be read; callers treat that as non-fatal.
pub fn annotate_from_source(
    cfg: &mut Cfg,
    function: &ir::Function,
    src_path: impl AsRef<Path>,
) -> Result<()> {
    let src_path = src_path.as_ref();
    let text = fs::read_to_string(src_path)
        .with_context(|| format!("failed to read source file {}", src_path.display()))?;
    let src_lines: Vec<&str> = text.lines().collect();

    // Per-node location sets, deduplicated and sorted by (line, column)
    let mut node_locs: Vec<Vec<SrcLoc>> = vec![Vec::new(); cfg.len()];
    for (id, block) in function.blocks.iter().enumerate() {
        for inst in &block.instructions {
            let Some(debug_loc) = inst.debug_loc else {
                continue;
            };
            if debug_loc.line == 0 || debug_loc.column == 0 {
                continue;
            }
            let loc = SrcLoc {
                line: debug_loc.line,
                column: debug_loc.column,
            };
            node_locs[id].push(loc);
            cfg.loc_map_mut().insert(loc, id);
        }
        node_locs[id].sort_unstable();
        node_locs[id].dedup();
    }

    for id in 0..cfg.len() {
        if node_locs[id].is_empty() {
            continue;
        }
        let mut snippet = String::new();
        for &loc in &node_locs[id] {
            snippet.push_str(&snippet_at(cfg, &src_lines, loc));
        }
        cfg.node_mut(id).src = snippet;
    }
    Ok(())
}

/// Slice the source at `loc`, up to the next recorded location on the same
/// line or to end-of-line, with escaping applied
fn snippet_at(cfg: &Cfg, src_lines: &[&str], loc: SrcLoc) -> String {
    let Some(line) = src_lines.get(loc.line as usize - 1) else {
        return String::new();
    };
    let start = (loc.column as usize - 1).min(line.len());

    let next_on_line = cfg
        .loc_map()
        .range((Bound::Excluded(loc), Bound::Unbounded))
        .next()
        .map(|(next, _)| *next)
        .filter(|next| next.line == loc.line);

    match next_on_line {
        Some(next) => {
            let end = (next.column as usize - 1).clamp(start, line.len());
            escape_snippet(&line[start..end], false)
        }
        None => escape_snippet(&line[start..], true),
    }
}

/// Escape quote, backslash and newline; a snippet that runs to end-of-line
/// gets a literal `\n` appended
fn escape_snippet(origin: &str, end_of_line: bool) -> String {
    let mut out = String::with_capacity(origin.len());
    for c in origin.chars() {
        if matches!(c, '"' | '\\' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    if end_of_line {
        out.push_str("\\n");
    }
    out
}

/// Look up the node covering a source position, if any
pub fn node_at(cfg: &Cfg, loc: SrcLoc) -> Option<NodeId> {
    cfg.loc_map().get(&loc).copied()
}
