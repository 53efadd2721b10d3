//! CFG export to DOT and JSON formats

use crate::cfg::{Cfg, EdgeKind, NodeKind};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::fmt::Write;

/// Export a CFG to DOT format for Graphviz
pub fn export_dot(cfg: &Cfg) -> String {
    let mut dot = String::from("digraph CFG {\n");
    writeln!(dot, "  label=\"CFG for {} function\";", cfg.function_name).ok();
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    for node in cfg.nodes() {
        let style = match node.kind {
            NodeKind::Entry => ", fillcolor=lightgreen, style=filled",
            NodeKind::Exit => ", fillcolor=lightcoral, style=filled",
            NodeKind::Loop => ", fillcolor=lightblue, style=filled",
            NodeKind::Branch | NodeKind::Normal => "",
        };
        writeln!(
            dot,
            "  {} [label=\"{}\\n{}\"{}];",
            node.id,
            node.id,
            escape_dot_string(&node.src),
            style
        )
        .ok();
    }

    dot.push('\n');
    for edge in cfg.graph().edge_references() {
        let label = match edge.weight() {
            EdgeKind::Fallthrough => String::new(),
            EdgeKind::Select(n) => format!(" [label=\"{n}\"]"),
        };
        writeln!(
            dot,
            "  {} -> {}{};",
            edge.source().index(),
            edge.target().index(),
            label
        )
        .ok();
    }

    dot.push_str("}\n");
    dot
}

fn escape_dot_string(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Serializable snapshot of a CFG for reports
#[derive(Debug, Clone, Serialize)]
pub struct CfgExport {
    pub function_name: String,
    pub size: usize,
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<Vec<usize>>,
    pub paths: Vec<crate::cfg::Path>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeExport {
    pub id: usize,
    pub kind: NodeKind,
    #[serde(rename = "selectNum")]
    pub select_num: u32,
    pub ops: Vec<String>,
    pub src: String,
}

impl CfgExport {
    pub fn from_cfg(cfg: &Cfg) -> Self {
        let nodes = cfg
            .nodes()
            .map(|node| NodeExport {
                id: node.id,
                kind: node.kind,
                select_num: node.select_num,
                ops: node.ops.clone(),
                src: node.src.clone(),
            })
            .collect();
        let edges = (0..cfg.len()).map(|id| cfg.successors(id).to_vec()).collect();
        Self {
            function_name: cfg.function_name.clone(),
            size: cfg.len(),
            nodes,
            edges,
            paths: cfg.paths().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::ir::Module;

    const IF_ELSE: &str = r#"define i32 @sign(i32 %0) {
  %2 = icmp sgt i32 %0, 0
  br i1 %2, label %then, label %else

then:
  br label %done

else:
  br label %done

done:
  ret i32 0
}
"#;

    fn if_else_cfg() -> Cfg {
        let module = Module::parse(IF_ELSE).unwrap();
        build_cfg(module.function("sign").unwrap()).unwrap()
    }

    #[test]
    fn test_export_dot_structure() {
        let cfg = if_else_cfg();
        let dot = export_dot(&cfg);

        assert!(dot.starts_with("digraph CFG {"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("CFG for sign function"));
        // branch edges carry their ordinal
        assert!(dot.contains("[label=\"1\"]"));
        assert!(dot.contains("[label=\"2\"]"));
    }

    #[test]
    fn test_export_json_snapshot() {
        let cfg = if_else_cfg();
        let export = CfgExport::from_cfg(&cfg);

        assert_eq!(export.function_name, "sign");
        assert_eq!(export.size, 4);
        assert_eq!(export.nodes.len(), 4);
        assert_eq!(export.edges[0], vec![1, 2]);
        assert_eq!(export.paths.len(), 2);

        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"selectNum\""));
        assert!(json.contains("\"mask\":\"1101\""));
    }
}
