//! ASCII rendering of estimates for the CLI.

use crate::models::{row_span, Estimate, Node};

/// Render an estimate as a tree, hours shown on the leaves.
///
/// Example output:
/// ```text
/// Checkout revamp (2024-03-01)
/// Cart
/// ├── Add items [7h]
/// └── Story
///     ├── Validate stock [3h]
///     └── Reserve [1.5h]
/// Payments [5h]
///
/// Total: 16.5h over 4 rows
/// ```
pub fn render_estimate(estimate: &Estimate) -> String {
    let mut output = format!("{} ({})\n", estimate.project_name, estimate.start_date);
    output.push_str(&render_tree(estimate.epics.epics()));
    output.push('\n');
    let rows: usize = estimate.epics.epics().iter().map(row_span).sum();
    output.push_str(&format!(
        "Total: {}h over {} {}\n",
        estimate.grand_total(),
        rows,
        if rows == 1 { "row" } else { "rows" }
    ));
    output
}

/// Render epics and everything below them.
pub fn render_tree(epics: &[Node]) -> String {
    let mut output = String::new();
    for epic in epics {
        render_node(&mut output, epic, "", true, true);
    }
    output
}

fn render_node(output: &mut String, node: &Node, prefix: &str, is_last: bool, is_root: bool) {
    if !is_root {
        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
    }
    output.push_str(&label(node));
    if node.is_leaf() {
        output.push_str(&format!(" [{}h]", node.personnel.total()));
    }
    output.push('\n');

    let child_prefix = if is_root {
        String::new()
    } else {
        let continuation = if is_last { "    " } else { "│   " };
        format!("{}{}", prefix, continuation)
    };

    for (i, child) in node.children.iter().enumerate() {
        let child_is_last = i == node.children.len() - 1;
        render_node(output, child, &child_prefix, child_is_last, false);
    }
}

/// Node name, or its level for unnamed nodes.
fn label(node: &Node) -> String {
    if node.name.trim().is_empty() {
        node.level.label().to_string()
    } else {
        node.name.clone()
    }
}
