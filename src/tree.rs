//! Dependency tree visualization.
//!
//! `nest tree` resolves (and fetches) the graph without building and prints
//! it target by target. Targets already shown are marked `(*)`.
//!
//! ## Example Output
//!
//! ```text
//! app:app (native)
//! ├── mathlib:mathlib (native)
//! │   └── zlib:zlib (package)
//! └── [build] codegen:gen (custom)
//! ```

use crate::graph::{BuildGraph, ContextId, TargetId};
use colored::*;
use std::collections::HashSet;

pub fn render_tree(graph: &BuildGraph, root: ContextId) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    for &target in &graph.context(root).targets {
        lines.push(describe(graph, target));
        seen.insert(target);
        render_children(graph, target, "", &mut seen, &mut lines);
    }
    lines
}

pub fn print_tree(graph: &BuildGraph, root: ContextId) {
    for line in render_tree(graph, root) {
        println!("{}", line);
    }
}

fn describe(graph: &BuildGraph, target: TargetId) -> String {
    format!(
        "{} ({})",
        graph.label(target).bold(),
        graph.target(target).kind.label().dimmed()
    )
}

fn render_children(
    graph: &BuildGraph,
    target: TargetId,
    prefix: &str,
    seen: &mut HashSet<TargetId>,
    lines: &mut Vec<String>,
) {
    let t = graph.target(target);
    let children: Vec<(TargetId, bool)> = t
        .dependencies
        .iter()
        .map(|d| (*d, false))
        .chain(t.build_dependencies.iter().map(|d| (*d, true)))
        .collect();

    let count = children.len();
    for (i, (child, build_only)) in children.into_iter().enumerate() {
        let is_last = i == count - 1;
        let branch = if is_last { "└──" } else { "├──" };
        let tag = if build_only {
            format!("{} ", "[build]".yellow())
        } else {
            String::new()
        };
        let first_visit = seen.insert(child);
        let repeat = if first_visit {
            String::new()
        } else {
            format!(" {}", "(*)".dimmed())
        };
        lines.push(format!(
            "{}{} {}{}{}",
            prefix,
            branch,
            tag,
            describe(graph, child),
            repeat
        ));
        if first_visit {
            let nested = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
            render_children(graph, child, &nested, seen, lines);
        }
    }
}
