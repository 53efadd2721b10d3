//! IR instrumentation
//!
//! Two rewriters over parsed `.ll` modules:
//!
//! - [`BlockMarker`] makes an executable driver print its execution trace:
//!   a global char array records every entered block of the target
//!   function, and `main` prints it just before returning.
//! - [`PathInstrumenter`] steers a symbolic executor toward one static
//!   path by planting trigger calls along the path's shortest unique node
//!   subsequence and conditional-exit calls at every off-path successor.
//!
//! Both leave the input module untouched and produce a rewritten copy,
//! which is re-parsed so the result is known to be well-formed.

pub mod rolling;

pub use rolling::RollingHashIndex;

use crate::cfg::{build_cfg, Cfg, NodeId, PathId};
use crate::ir::Module;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path as FsPath;

/// Runtime trace externs provided by the symbolic executor
const TRIGGER_FN: &str = "klee_path_trigger";
const EXIT_FN: &str = "klee_path_conditional_exit";

/// Global names used by the trace-printing driver
const MARKER_GLOBAL: &str = "__block_marker__";
const FMT_GLOBAL: &str = "__trace_fmt__";

/// Insert lines before given line indices, preserving per-line push order;
/// an index equal to the line count appends at the end
fn apply_edits(lines: &[String], edits: Vec<(usize, String)>) -> Vec<String> {
    let mut by_line: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (idx, text) in edits {
        by_line.entry(idx).or_default().push(text);
    }
    let mut out = Vec::with_capacity(lines.len() + by_line.len());
    for (idx, line) in lines.iter().enumerate() {
        if let Some(inserted) = by_line.get(&idx) {
            out.extend(inserted.iter().cloned());
        }
        out.push(line.clone());
    }
    if let Some(inserted) = by_line.get(&lines.len()) {
        out.extend(inserted.iter().cloned());
    }
    out
}

fn has_declaration(module: &Module, symbol: &str) -> bool {
    let needle = format!("@{symbol}(");
    module
        .lines
        .iter()
        .any(|line| line.starts_with("declare") && line.contains(&needle))
}

/// Rewrites a driver module so each entered block of the target function
/// flips its cell in a global `'0'`-filled char array, printed by `main`
/// right before it returns
pub struct BlockMarker<'a> {
    module: &'a Module,
    function_name: String,
}

impl<'a> BlockMarker<'a> {
    pub fn new(module: &'a Module, function_name: impl Into<String>) -> Self {
        Self {
            module,
            function_name: function_name.into(),
        }
    }

    /// Produce the instrumented module
    pub fn run(&self) -> Result<Module> {
        let function = self
            .module
            .function(&self.function_name)
            .with_context(|| format!("function @{} not found in module", self.function_name))?;
        let block_count = function.blocks.len();
        let array_len = block_count + 1; // trailing NUL

        let mut edits: Vec<(usize, String)> = Vec::new();

        // globals ahead of the first definition
        let first_define = self
            .module
            .functions
            .first()
            .map(|f| f.define_idx)
            .unwrap_or(0);
        edits.push((
            first_define,
            format!(
                "@{MARKER_GLOBAL} = dso_local global [{array_len} x i8] c\"{}\\00\", align 1",
                "0".repeat(block_count)
            ),
        ));
        edits.push((
            first_define,
            format!(
                "@{FMT_GLOBAL} = private unnamed_addr constant [3 x i8] c\"%s\\00\", align 1"
            ),
        ));
        edits.push((first_define, String::new()));

        // mark entry into every block of the target function ('1' is 49)
        for (id, block) in function.blocks.iter().enumerate() {
            edits.push((
                block.first_insertion_idx,
                format!(
                    "  %__bm_ptr_{id} = getelementptr inbounds [{array_len} x i8], \
                     [{array_len} x i8]* @{MARKER_GLOBAL}, i64 0, i64 {id}"
                ),
            ));
            edits.push((
                block.first_insertion_idx,
                format!("  store i8 49, i8* %__bm_ptr_{id}, align 1"),
            ));
        }

        // print the trace just before main returns
        let main = self
            .module
            .function("main")
            .context("driver module has no main function")?;
        let last_block = main.blocks.last().expect("functions have blocks");
        let ret = last_block
            .instructions
            .iter()
            .find(|inst| inst.opcode == "ret")
            .context("main's last block has no ret instruction")?;
        edits.push((
            ret.line_idx,
            format!(
                "  %__trace_fmt_ptr = getelementptr inbounds [3 x i8], \
                 [3 x i8]* @{FMT_GLOBAL}, i64 0, i64 0"
            ),
        ));
        edits.push((
            ret.line_idx,
            format!(
                "  %__trace_arr_ptr = getelementptr inbounds [{array_len} x i8], \
                 [{array_len} x i8]* @{MARKER_GLOBAL}, i64 0, i64 0"
            ),
        ));
        edits.push((
            ret.line_idx,
            "  %__trace_ret = call i32 (i8*, ...) @printf(i8* %__trace_fmt_ptr, \
             i8* %__trace_arr_ptr)"
                .to_string(),
        ));

        if !has_declaration(self.module, "printf") {
            edits.push((self.module.lines.len(), String::new()));
            edits.push((self.module.lines.len(), "declare i32 @printf(i8*, ...)".to_string()));
        }

        let lines = apply_edits(&self.module.lines, edits);
        Module::parse(&lines.join("\n")).context("block-marker instrumentation produced invalid IR")
    }
}

/// Plants path-steering markers for one target path
///
/// Holds the target function's CFG and the rolling-hash index over its
/// paths; each call to [`PathInstrumenter::instrument_path`] rewrites a
/// fresh copy of the pristine module.
pub struct PathInstrumenter<'a> {
    module: &'a Module,
    function_name: String,
    cfg: Cfg,
    index: RollingHashIndex,
}

impl<'a> PathInstrumenter<'a> {
    pub fn new(module: &'a Module, function_name: impl Into<String>) -> Result<Self> {
        let function_name = function_name.into();
        let function = module
            .function(&function_name)
            .with_context(|| format!("function @{function_name} not found in module"))?;
        let cfg = build_cfg(function)?;
        let index = RollingHashIndex::new(cfg.path_node_sequences(), cfg.len());
        Ok(Self {
            module,
            function_name,
            cfg,
            index,
        })
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    /// Instrument toward `path_id`; None when the path has no uniquely
    /// identifying subsequence (it is a prefix of another path)
    pub fn instrument_path(&mut self, path_id: PathId) -> Result<Option<Module>> {
        if path_id < 0 || path_id as usize >= self.cfg.paths().len() {
            bail!("path id {path_id} out of range");
        }
        let unique = self.index.shortest_unique_subseq(path_id as usize);
        if unique.is_empty() {
            tracing::warn!(
                function = %self.function_name,
                path = path_id,
                "no unique subsequence; skipping instrumentation"
            );
            return Ok(None);
        }

        let sequence = &self.cfg.path(path_id).nodes;
        let exit_blocks = off_path_successors(&self.cfg, sequence);

        let function = self
            .module
            .function(&self.function_name)
            .expect("checked in new");
        let mut edits: Vec<(usize, String)> = Vec::new();

        // the trigger argument packs two bits: bit 0 set when an edge
        // starts here (not last), bit 1 set when an edge ends here (not first)
        for (pos, &node) in unique.iter().enumerate() {
            let mut mask = 0;
            mask |= i32::from(pos != unique.len() - 1);
            mask |= i32::from(pos != 0) << 1;
            edits.push((
                function.blocks[node].first_insertion_idx,
                format!("  call void @{TRIGGER_FN}(i32 {mask})"),
            ));
        }
        for &block in &exit_blocks {
            edits.push((
                function.blocks[block].first_insertion_idx,
                format!("  call void @{EXIT_FN}(i32 0)"),
            ));
        }

        if !has_declaration(self.module, TRIGGER_FN) {
            edits.push((self.module.lines.len(), String::new()));
            edits.push((
                self.module.lines.len(),
                format!("declare void @{TRIGGER_FN}(i32)"),
            ));
        }
        if !has_declaration(self.module, EXIT_FN) {
            edits.push((
                self.module.lines.len(),
                format!("declare void @{EXIT_FN}(i32)"),
            ));
        }

        let lines = apply_edits(&self.module.lines, edits);
        let rewritten = Module::parse(&lines.join("\n"))
            .context("path instrumentation produced invalid IR")?;
        Ok(Some(rewritten))
    }

    /// Instrument toward `path_id` and write the result; false when the
    /// path was skipped
    pub fn write_instrumented(&mut self, path_id: PathId, out: impl AsRef<FsPath>) -> Result<bool> {
        match self.instrument_path(path_id)? {
            Some(module) => {
                module.write_file(out)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Successors of on-path blocks that leave the path: for every consecutive
/// pair (a, b), every successor of a other than b
fn off_path_successors(cfg: &Cfg, sequence: &[NodeId]) -> BTreeSet<NodeId> {
    let mut exits = BTreeSet::new();
    for pair in sequence.windows(2) {
        for &succ in cfg.successors(pair[0]) {
            if succ != pair[1] {
                exits.insert(succ);
            }
        }
    }
    exits
}

#[cfg(test)]
mod tests {
    use super::*;

    // diamond with an extra hop: 0 -> 1 -> {2, 4}, 2 -> 3, 4 -> 3
    const TARGET_LL: &str = r#"define i32 @route(i32 %0) {
  br label %junction

junction:
  %2 = icmp sgt i32 %0, 0
  br i1 %2, label %left, label %right

left:
  br label %done

right:
  br label %done

done:
  ret i32 0
}

define i32 @main(i32 %0, i8** %1) {
  %3 = call i32 @route(i32 7)
  ret i32 0
}
"#;

    #[test]
    fn test_block_marker_inserts_one_store_per_block() {
        let module = Module::parse(TARGET_LL).unwrap();
        let marked = BlockMarker::new(&module, "route").run().unwrap();

        let stores = marked
            .lines
            .iter()
            .filter(|l| l.contains("store i8 49"))
            .count();
        assert_eq!(stores, 5);
        assert!(marked
            .lines
            .iter()
            .any(|l| l.contains("@__block_marker__ = dso_local global [6 x i8] c\"00000\\00\"")));
    }

    #[test]
    fn test_block_marker_prints_before_main_ret() {
        let module = Module::parse(TARGET_LL).unwrap();
        let marked = BlockMarker::new(&module, "route").run().unwrap();

        let printf_idx = marked
            .lines
            .iter()
            .position(|l| l.contains("call i32 (i8*, ...) @printf"))
            .expect("printf call inserted");
        let main = marked.function("main").unwrap();
        let ret_idx = main
            .blocks
            .last()
            .unwrap()
            .instructions
            .iter()
            .find(|i| i.opcode == "ret")
            .unwrap()
            .line_idx;
        assert!(printf_idx < ret_idx);
        assert!(marked.lines.iter().any(|l| l.starts_with("declare i32 @printf")));
    }

    #[test]
    fn test_block_marker_requires_main() {
        let no_main = TARGET_LL.split("define i32 @main").next().unwrap();
        let module = Module::parse(no_main).unwrap();
        assert!(BlockMarker::new(&module, "route").run().is_err());
    }

    #[test]
    fn test_path_instrumenter_triggers_and_exits() {
        let module = Module::parse(TARGET_LL).unwrap();
        let mut instr = PathInstrumenter::new(&module, "route").unwrap();

        // path 0 = 0 -> 1 -> 2 -> 4 (left arm); unique subseq is [1, 2]
        let instrumented = instr.instrument_path(0).unwrap().expect("path has markers");

        let triggers: Vec<_> = instrumented
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.contains(TRIGGER_FN) && l.trim_start().starts_with("call"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(triggers.len(), 2);

        // first trigger is in block 1 (edge starts, mask 1); second in
        // block 2 (edge ends, mask 2)
        assert!(instrumented.lines[triggers[0]].contains("(i32 1)"));
        assert!(instrumented.lines[triggers[1]].contains("(i32 2)"));

        let exits: Vec<_> = instrumented
            .lines
            .iter()
            .filter(|l| l.contains(EXIT_FN) && l.trim_start().starts_with("call"))
            .collect();
        assert_eq!(exits.len(), 1);

        // the conditional exit lands at the head of the right arm (block 3)
        let function = instrumented.function("route").unwrap();
        let right = &function.blocks[3];
        assert_eq!(right.label, "right");
        assert_eq!(right.instructions[0].opcode, "call");

        assert!(instrumented
            .lines
            .iter()
            .any(|l| l == &format!("declare void @{TRIGGER_FN}(i32)")));
        assert!(instrumented
            .lines
            .iter()
            .any(|l| l == &format!("declare void @{EXIT_FN}(i32)")));
    }

    #[test]
    fn test_path_instrumenter_pristine_module_unchanged() {
        let module = Module::parse(TARGET_LL).unwrap();
        let before = module.to_text();
        let mut instr = PathInstrumenter::new(&module, "route").unwrap();
        instr.instrument_path(0).unwrap();
        instr.instrument_path(1).unwrap();
        assert_eq!(module.to_text(), before);
    }

    #[test]
    fn test_path_instrumenter_rejects_bad_path_id() {
        let module = Module::parse(TARGET_LL).unwrap();
        let mut instr = PathInstrumenter::new(&module, "route").unwrap();
        assert!(instr.instrument_path(99).is_err());
        assert!(instr.instrument_path(-1).is_err());
    }

    #[test]
    fn test_off_path_successors() {
        let module = Module::parse(TARGET_LL).unwrap();
        let instr = PathInstrumenter::new(&module, "route").unwrap();
        let path = instr.cfg().path(0).nodes.clone();
        let exits = off_path_successors(instr.cfg(), &path);
        assert_eq!(exits.into_iter().collect::<Vec<_>>(), vec![3]);
    }
}
