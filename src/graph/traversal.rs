//! Graph traversal utilities

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use super::node::GraphNode;

/// Depth-first search (post-order)
fn dfs_post(roots: &[GraphNode]) -> Vec<GraphNode> {
    fn dfs_visit(
        node: &GraphNode,
        visited: &mut FxHashSet<GraphNode>,
        result: &mut Vec<GraphNode>,
    ) {
        if !visited.insert(node.clone()) {
            return;
        }
        for src in node.sources() {
            dfs_visit(src, visited, result);
        }
        result.push(node.clone());
    }

    let mut result = Vec::new();
    let mut visited = FxHashSet::default();
    for root in roots {
        dfs_visit(root, &mut visited, &mut result);
    }
    result
}

/// Topological sort (inputs before outputs)
///
/// Each node appears once, after all of its sources. Sources are visited in
/// operand order, so the result only depends on the graph's structure.
pub fn topological_sort(outputs: &[GraphNode]) -> Vec<GraphNode> {
    dfs_post(outputs)
}

/// Collect input placeholders in first-encountered order
pub fn collect_inputs(roots: &[GraphNode]) -> Vec<GraphNode> {
    topological_sort(roots)
        .into_iter()
        .filter(|n| n.is_input())
        .collect()
}

/// Count distinct nodes reachable from `roots`
pub fn count_nodes(roots: &[GraphNode]) -> usize {
    topological_sort(roots).len()
}

/// Find common subexpressions (nodes referenced by more than one parent)
pub fn find_common_subexpressions(roots: &[GraphNode]) -> Vec<(GraphNode, usize)> {
    let mut ref_count: FxHashMap<GraphNode, usize> = FxHashMap::default();
    let mut visited = FxHashSet::default();
    let mut queue = VecDeque::new();

    for root in roots {
        *ref_count.entry(root.clone()).or_insert(0) += 1;
        if visited.insert(root.clone()) {
            queue.push_back(root.clone());
        }
    }

    while let Some(node) = queue.pop_front() {
        for src in node.sources() {
            *ref_count.entry(src.clone()).or_insert(0) += 1;
            if visited.insert(src.clone()) {
                queue.push_back(src.clone());
            }
        }
    }

    // keep topological order for stable output
    topological_sort(roots)
        .into_iter()
        .filter_map(|n| {
            let count = ref_count.get(&n).copied().unwrap_or(0);
            (count > 1).then_some((n, count))
        })
        .collect()
}

/// Convert graph to string representation (for debugging)
pub fn graph_to_string(roots: &[GraphNode]) -> String {
    let nodes = topological_sort(roots);
    let index: FxHashMap<GraphNode, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.clone(), i))
        .collect();

    let mut result = String::new();
    for (i, node) in nodes.iter().enumerate() {
        let sources = node
            .sources()
            .iter()
            .map(|s| format!("%{}", index[s]))
            .collect::<Vec<_>>()
            .join(", ");
        result.push_str(&format!(
            "%{} = {}({}) shape={:?}\n",
            i,
            node.op(),
            sources,
            node.shape()
        ));
    }
    result
}
