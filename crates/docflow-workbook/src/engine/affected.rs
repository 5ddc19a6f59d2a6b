//! Dirty-set expansion, targeted-column subtree restriction, and the
//! structural+document mixed-dirtiness merge rule (§4.8 bullets 3-5). No
//! direct teacher counterpart — `formualizer-eval/src/engine/graph.rs`'s
//! own dirty-propagation is a flat BFS over dependents with no
//! structural-refresh-merge rule — so this module is built from that BFS
//! primitive plus the merge rule spec.md spells out explicitly.
use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use docflow_common::{ColumnId, Table};
use docflow_eval::NodeId;
use docflow_parse::CompiledFormula;

/// Forward BFS over `dependents` from `seeds` (§4.8 bullet 3: "transitive
/// closure over `dependents_by_node`"). Seeds are included in the result.
pub fn transitive_affected<I>(dependents: &FxHashMap<NodeId, Vec<NodeId>>, seeds: I) -> FxHashSet<NodeId>
where
    I: IntoIterator<Item = NodeId>,
{
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for seed in seeds {
        if visited.insert(seed.clone()) {
            queue.push_back(seed);
        }
    }
    while let Some(node) = queue.pop_front() {
        if let Some(children) = dependents.get(&node) {
            for child in children {
                if visited.insert(child.clone()) {
                    queue.push_back(child.clone());
                }
            }
        }
    }
    visited
}

/// Merges a pre-rebuild affected set against the post-rebuild one (§4.8
/// bullet 3: "when document dirtiness is mixed with a structural refresh
/// ... nodes that are no longer reachable from the new plan still get
/// re-evaluated once").
pub fn merge_affected(old: FxHashSet<NodeId>, new: FxHashSet<NodeId>) -> FxHashSet<NodeId> {
    let mut merged = old;
    merged.extend(new);
    merged
}

/// Restricts evaluation within a table to the subtree of the
/// `this_row_columns` dependency graph among formula columns, reachable
/// from `targeted` (§4.8 bullet 4). Built locally from each formula
/// column's `CompiledFormula::this_row_columns()` and a case-insensitive
/// column name ⇒ id map — no planner involvement, since this graph never
/// crosses a table boundary.
pub fn targeted_columns_for_table(
    table: &Table,
    targeted: &[ColumnId],
    compiled_columns: &FxHashMap<ColumnId, CompiledFormula>,
) -> FxHashSet<ColumnId> {
    let name_to_id: FxHashMap<String, ColumnId> = table
        .columns
        .iter()
        .map(|c| (c.name.to_ascii_lowercase(), c.id))
        .collect();

    // column -> formula columns whose this_row_columns reference it.
    let mut column_dependents: FxHashMap<ColumnId, Vec<ColumnId>> = FxHashMap::default();
    for column in &table.columns {
        let Some(slot) = compiled_columns.get(&column.id) else { continue };
        for name in slot.this_row_columns() {
            if let Some(&dep_id) = name_to_id.get(&name.to_ascii_lowercase()) {
                column_dependents.entry(dep_id).or_default().push(column.id);
            }
        }
    }

    let mut visited: FxHashSet<ColumnId> = FxHashSet::default();
    let mut queue: VecDeque<ColumnId> = VecDeque::new();
    for &id in targeted {
        if visited.insert(id) {
            queue.push_back(id);
        }
    }
    while let Some(id) = queue.pop_front() {
        if let Some(children) = column_dependents.get(&id) {
            for &child in children {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }
    visited
}
