//! Textual LLVM IR front-end
//!
//! Reads `.ll` modules as produced by `clang -S -emit-llvm -g` and exposes
//! the minimal view the rest of the tool needs: functions, basic blocks in
//! module order, opcode mnemonics, terminator successors and debug
//! locations. The raw text lines are preserved so instrumentation can
//! rewrite the module and print it back out.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A debug location resolved from a `!DILocation` metadata node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugLoc {
    pub line: u32,
    pub column: u32,
}

/// One IR instruction, tied back to its line in the module text
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Opcode mnemonic (`load`, `store`, `br`, `icmp`, ...)
    pub opcode: String,
    /// Index of this instruction's line in [`Module::lines`]
    pub line_idx: usize,
    /// Debug location, if the instruction carries a `!dbg` reference
    pub debug_loc: Option<DebugLoc>,
}

/// One basic block of a function
#[derive(Debug, Clone)]
pub struct Block {
    /// Block label with `%` stripped; the entry block's implicit label is
    /// synthesized from the function's unnamed-value numbering
    pub label: String,
    pub instructions: Vec<Instruction>,
    /// Successor labels in terminator operand order (`br` lists the taken
    /// target first, `switch` its default first)
    pub successors: Vec<String>,
    /// Line index where an instruction may be inserted ahead of the block's
    /// first non-phi instruction
    pub first_insertion_idx: usize,
}

/// One function definition
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<Block>,
    /// Index of the `define` line in [`Module::lines`]
    pub define_idx: usize,
    /// Index of the closing `}` line
    pub end_idx: usize,
}

impl Function {
    /// Map block label -> dense block index
    pub fn block_index(&self) -> HashMap<&str, usize> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.as_str(), i))
            .collect()
    }
}

/// A parsed module with its original text retained
#[derive(Debug, Clone)]
pub struct Module {
    pub lines: Vec<String>,
    pub functions: Vec<Function>,
}

impl Module {
    /// Parse a `.ll` file from disk
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Module> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read IR file {}", path.display()))?;
        Module::parse(&text).with_context(|| format!("failed to parse IR file {}", path.display()))
    }

    /// Parse module text
    pub fn parse(text: &str) -> Result<Module> {
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        let debug_locs = parse_debug_locations(&lines);

        let mut functions = Vec::new();
        let mut idx = 0;
        while idx < lines.len() {
            if lines[idx].starts_with("define ") {
                let function = parse_function(&lines, idx, &debug_locs)?;
                idx = function.end_idx + 1;
                functions.push(function);
            } else {
                idx += 1;
            }
        }

        Ok(Module { lines, functions })
    }

    /// Look up a function by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Render the module text back out
    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    /// Write the module text to disk
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_text())
            .with_context(|| format!("failed to write IR file {}", path.display()))
    }
}

/// Collect `!N = !DILocation(line: L, column: C, ...)` metadata
fn parse_debug_locations(lines: &[String]) -> HashMap<u32, DebugLoc> {
    let mut locs = HashMap::new();
    for line in lines {
        let Some(rest) = line.strip_prefix('!') else {
            continue;
        };
        let Some((id_str, body)) = rest.split_once(" = ") else {
            continue;
        };
        let Ok(id) = id_str.parse::<u32>() else {
            continue;
        };
        if !body.starts_with("!DILocation(") {
            continue;
        }
        let line_num = parse_metadata_field(body, "line:");
        let col_num = parse_metadata_field(body, "column:");
        if let Some(line) = line_num {
            locs.insert(
                id,
                DebugLoc {
                    line,
                    column: col_num.unwrap_or(0),
                },
            );
        }
    }
    locs
}

fn parse_metadata_field(body: &str, key: &str) -> Option<u32> {
    let start = body.find(key)? + key.len();
    let rest = body[start..].trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn parse_function(
    lines: &[String],
    define_idx: usize,
    debug_locs: &HashMap<u32, DebugLoc>,
) -> Result<Function> {
    let define_line = &lines[define_idx];
    let name = function_name(define_line)
        .with_context(|| format!("malformed define line: {define_line}"))?;

    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    let mut end_idx = None;

    let mut idx = define_idx + 1;
    while idx < lines.len() {
        let line = &lines[idx];
        let trimmed = line.trim();

        if line.starts_with('}') {
            end_idx = Some(idx);
            break;
        }
        if trimmed.is_empty() || trimmed.starts_with(';') {
            idx += 1;
            continue;
        }

        if let Some(label) = block_label(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Block {
                label,
                instructions: Vec::new(),
                successors: Vec::new(),
                first_insertion_idx: idx + 1,
            });
            idx += 1;
            continue;
        }

        // Entry block has no label line; synthesize one from the define line.
        let block = current.get_or_insert_with(|| Block {
            label: entry_label(define_line),
            instructions: Vec::new(),
            successors: Vec::new(),
            first_insertion_idx: idx,
        });

        // A switch spreads its case list over following lines up to `]`.
        let mut inst_text = trimmed.to_string();
        let mut consumed = 0;
        if opcode_of(trimmed) == "switch" && !trimmed.contains(']') {
            while idx + consumed + 1 < lines.len() {
                consumed += 1;
                let cont = lines[idx + consumed].trim();
                inst_text.push(' ');
                inst_text.push_str(cont);
                if cont.contains(']') {
                    break;
                }
            }
        }

        let opcode = opcode_of(&inst_text).to_string();
        if is_terminator(&opcode) {
            block.successors = successor_labels(&inst_text);
        }
        if matches!(opcode.as_str(), "phi" | "landingpad") {
            block.first_insertion_idx = idx + 1;
        }
        block.instructions.push(Instruction {
            opcode,
            line_idx: idx,
            debug_loc: debug_ref(&inst_text).and_then(|id| debug_locs.get(&id).copied()),
        });
        idx += consumed + 1;
    }

    if let Some(block) = current.take() {
        blocks.push(block);
    }
    let end_idx = end_idx.with_context(|| format!("unterminated function @{name}"))?;
    if blocks.is_empty() {
        bail!("function @{name} has no basic blocks");
    }

    Ok(Function {
        name,
        blocks,
        define_idx,
        end_idx,
    })
}

/// Extract the symbol name from a `define` line
fn function_name(define_line: &str) -> Option<String> {
    let at = define_line.find('@')?;
    let rest = &define_line[at + 1..];
    let paren = rest.find('(')?;
    let mut name = rest[..paren].to_string();
    if name.starts_with('"') && name.ends_with('"') && name.len() >= 2 {
        name = name[1..name.len() - 1].to_string();
    }
    Some(name)
}

/// Recognize a block label line (`entry:`, `if.then:`, `8:  ; preds = %0`)
fn block_label(line: &str) -> Option<String> {
    if line.starts_with(' ') || line.starts_with('\t') {
        return None;
    }
    let head = line.split(';').next()?.trim_end();
    let label = head.strip_suffix(':')?;
    if label.is_empty()
        || !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '$'))
    {
        return None;
    }
    Some(label.to_string())
}

/// The entry block's implicit label under LLVM's unnamed-value numbering:
/// unnamed parameters are %0..%k-1, the entry block is %k.
fn entry_label(define_line: &str) -> String {
    let params = match (define_line.find('('), define_line.rfind(')')) {
        (Some(open), Some(close)) if close > open => &define_line[open + 1..close],
        _ => "",
    };
    let unnamed = params
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .filter(|p| {
            p.split_whitespace()
                .last()
                .map(|tok| {
                    tok.strip_prefix('%')
                        .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
                })
                .unwrap_or(false)
        })
        .count();
    unnamed.to_string()
}

/// Extract the opcode mnemonic from an instruction line
fn opcode_of(inst: &str) -> &str {
    let first = inst.split_whitespace().next().unwrap_or("");
    let mut op = first;
    if let Some(eq_pos) = inst.find(" = ") {
        let rhs = inst[eq_pos + 3..].trim_start();
        op = rhs.split_whitespace().next().unwrap_or("");
    }
    // call may be prefixed by a tail-call marker
    if matches!(op, "tail" | "musttail" | "notail") {
        return "call";
    }
    op
}

fn is_terminator(opcode: &str) -> bool {
    matches!(
        opcode,
        "br" | "switch" | "ret" | "unreachable" | "indirectbr" | "invoke" | "resume"
    )
}

/// Successor labels in terminator operand order
fn successor_labels(inst: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut rest = inst;
    while let Some(pos) = rest.find("label %") {
        let tail = &rest[pos + "label %".len()..];
        let end = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '$')))
            .unwrap_or(tail.len());
        labels.push(tail[..end].to_string());
        rest = &tail[end..];
    }
    labels
}

/// Reference id of a trailing `!dbg !N` annotation
fn debug_ref(inst: &str) -> Option<u32> {
    let pos = inst.find("!dbg !")?;
    let tail = &inst[pos + "!dbg !".len()..];
    let end = tail
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(tail.len());
    tail[..end].parse().ok()
}
