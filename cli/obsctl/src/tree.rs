//! Reconstructs parent/child order for the spans of one trace.
//!
//! Spans arrive as a flat, paginated list. The output is a deterministic
//! parent-first, depth-first ordering where children keep their input order.
//! Spans whose parent is not in the set are promoted to roots, and spans
//! unreachable from any root (cycles, self-parents) are appended at the end,
//! so the output is always a permutation of the input.

use crate::records::FlatSpan;
use std::collections::HashMap;

/// A span together with its depth in the reconstructed tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub depth: usize,
    pub span: FlatSpan,
}

/// Orders spans parent-first, depth-first.
pub fn build_tree(spans: Vec<FlatSpan>) -> Vec<FlatSpan> {
    build_tree_entries(spans)
        .into_iter()
        .map(|entry| entry.span)
        .collect()
}

/// Like [`build_tree`], keeping each span's depth.
pub fn build_tree_entries(spans: Vec<FlatSpan>) -> Vec<TreeEntry> {
    let order = tree_order(&spans);
    let mut slots: Vec<Option<FlatSpan>> = spans.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|(idx, depth)| slots[idx].take().map(|span| TreeEntry { depth, span }))
        .collect()
}

// Returns (input index, depth) pairs covering every input index exactly once.
fn tree_order(spans: &[FlatSpan]) -> Vec<(usize, usize)> {
    let mut index_by_id: HashMap<&str, usize> = HashMap::new();
    for (idx, span) in spans.iter().enumerate() {
        index_by_id.entry(span.span_id.as_str()).or_insert(idx);
    }

    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();
    for (idx, span) in spans.iter().enumerate() {
        match span.parent_id() {
            Some(parent) if index_by_id.contains_key(parent) => {
                children.entry(parent).or_default().push(idx);
            }
            _ => roots.push(idx),
        }
    }

    let mut visited = vec![false; spans.len()];
    let mut order = Vec::with_capacity(spans.len());
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in roots {
        stack.push((root, 0));
        while let Some((idx, depth)) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            order.push((idx, depth));

            if let Some(kids) = children.get(spans[idx].span_id.as_str()) {
                // Reversed so the first child is popped first.
                for &child in kids.iter().rev() {
                    if !visited[child] {
                        stack.push((child, depth + 1));
                    }
                }
            }
        }
    }

    let orphaned = visited.iter().filter(|v| !**v).count();
    if orphaned > 0 {
        tracing::debug!(
            orphaned,
            "Spans unreachable from any root, appending in input order"
        );
    }
    for (idx, seen) in visited.iter().enumerate() {
        if !seen {
            order.push((idx, 0));
        }
    }
    order
}
