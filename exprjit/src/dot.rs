//! Graph DOT export (§6, auxiliary): a visualization aid, not part of the
//! compilation pipeline. Ported directly from
//! `examples/original_source/src/tools.cpp`'s `write_to_dotfile`: DFS from
//! `outputs`, one dot node per distinct structural hash (so CSE is visible
//! in the rendered graph), `Sin`/`Cos` colored red, a fresh leaf node per
//! use of a `Constant` rather than sharing it, and `outputs`/`inputs`
//! pinned to `rank=source`/`rank=sink`.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use exprjit_core::{Node, OpKind};

fn label(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Variable => "Variable",
        OpKind::Zero => "Zero",
        OpKind::One => "One",
        OpKind::Constant => "Constant",
        OpKind::Add => "Add",
        OpKind::Sub => "Sub",
        OpKind::Mul => "Mul",
        OpKind::Negate => "Negate",
        OpKind::Sin => "Sin",
        OpKind::Cos => "Cos",
        OpKind::ExtCall => "ExtCall",
    }
}

/// Render `inputs`/`outputs` as a Graphviz DOT digraph.
pub fn to_dot(inputs: &[Node], outputs: &[Node]) -> String {
    let mut names: HashMap<i32, String> = HashMap::new();
    let mut counter: usize = 0;
    let mut get_name = |hash: i32, names: &mut HashMap<i32, String>| -> String {
        names
            .entry(hash)
            .or_insert_with(|| {
                let name = format!("node{counter}");
                counter += 1;
                name
            })
            .clone()
    };

    let mut out = String::new();
    out.push_str("digraph OperationGraph {\n");

    let mut visited: HashSet<i32> = HashSet::new();
    let mut stack: Vec<Node> = outputs.to_vec();

    while let Some(node) = stack.pop() {
        if !visited.insert(node.hash()) {
            continue;
        }
        let name = get_name(node.hash(), &mut names);
        if matches!(node.kind(), OpKind::Sin | OpKind::Cos) {
            let _ = writeln!(out, "  {name} [label={}, color=red, style=filled];", label(node.kind()));
        } else {
            let _ = writeln!(out, "  {name} [label={}];", label(node.kind()));
        }

        for arg in node.args() {
            if arg.kind() == OpKind::Constant {
                let constant_name = format!("node{counter}");
                counter += 1;
                let _ = writeln!(out, "  {constant_name} [label={}];", label(OpKind::Constant));
                let _ = writeln!(out, "  {name} -> {constant_name};");
            } else {
                let arg_name = get_name(arg.hash(), &mut names);
                let _ = writeln!(out, "  {name} -> {arg_name};");
                if !visited.contains(&arg.hash()) {
                    stack.push(arg.clone());
                }
            }
        }
    }

    out.push_str("  { rank=source; ");
    for output in outputs {
        let name = get_name(output.hash(), &mut names);
        let _ = write!(out, "{name}; ");
    }
    out.push_str("}\n");

    out.push_str("  { rank=sink; ");
    for input in inputs {
        let name = get_name(input.hash(), &mut names);
        let _ = write!(out, "{name}; ");
    }
    out.push_str("}\n");

    out.push_str("}\n");
    out
}
