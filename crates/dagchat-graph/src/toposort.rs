use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::subdag::SubDag;

/// Linearize a SubDAG into a total order where every parent precedes all
/// of its children.
///
/// This is Kahn's algorithm with a chain-preference tiebreak: a naive
/// topological sort fragments natural question/answer chains interleaved
/// with sibling branches, producing histories that confuse the model.
/// The tiebreak keeps single-parent chains contiguous; merge points are
/// emitted only after all of their parents, folding the finished chains
/// together.
///
/// Deterministic: the seed pick and the fallback strategy use id-sorted
/// order, and the SubDAG's child lists are already id-sorted.
pub fn chain_preserving_sort(subdag: &SubDag) -> Vec<String> {
    let edges = &subdag.edges;

    let mut in_degree: HashMap<&str, usize> =
        subdag.node_map.keys().map(|id| (id.as_str(), 0)).collect();
    for children in edges.values() {
        for child in children {
            if let Some(d) = in_degree.get_mut(child.as_str()) {
                *d += 1;
            }
        }
    }
    let out_degree: HashMap<&str, usize> = edges
        .iter()
        .map(|(id, children)| (id.as_str(), children.len()))
        .collect();
    let mut in_degree_live = in_degree.clone();

    let mut available: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut result: Vec<String> = Vec::with_capacity(subdag.len());

    while !available.is_empty() {
        let pick: &str = match result.last() {
            None => available.iter().next().copied().unwrap(),
            Some(last) => choose_next(last, &available, edges, &in_degree, &out_degree),
        };

        available.remove(pick);
        result.push(pick.to_string());

        if let Some(children) = edges.get(pick) {
            for child in children {
                if let Some(d) = in_degree_live.get_mut(child.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        available.insert(child.as_str());
                    }
                }
            }
        }
    }

    // Leftovers only exist if the stored graph has a cycle; emit them in
    // id order so the output stays total.
    if result.len() < subdag.len() {
        warn!(
            sorted = result.len(),
            total = subdag.len(),
            "subdag contains a cycle; appending remaining nodes by id"
        );
        let mut remaining: Vec<&String> = subdag
            .node_map
            .keys()
            .filter(|id| !result.contains(*id))
            .collect();
        remaining.sort();
        result.extend(remaining.into_iter().cloned());
    }

    result
}

/// The three strategies of the chain-preference tiebreak, in order:
///
/// (a) continue the chain: the first child of the last-emitted node that
///     is available and has original in-degree 1 — only a single-parent
///     link truly continues a conversational chain; a merge point must
///     wait for its other parents.
/// (b) start a new simple chain: the id-smallest available pure link
///     node (in-degree 1 and out-degree 1).
/// (c) the id-smallest available node.
fn choose_next<'a>(
    last: &str,
    available: &BTreeSet<&'a str>,
    edges: &'a HashMap<String, Vec<String>>,
    in_degree: &HashMap<&str, usize>,
    out_degree: &HashMap<&str, usize>,
) -> &'a str {
    if let Some(children) = edges.get(last) {
        for child in children {
            let child = child.as_str();
            if available.contains(child) && in_degree.get(child) == Some(&1) {
                return child;
            }
        }
    }

    for candidate in available.iter().copied() {
        if in_degree.get(candidate) == Some(&1) && out_degree.get(candidate) == Some(&1) {
            return candidate;
        }
    }

    available.iter().next().copied().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagchat_core::types::Role;
    use dagchat_store::MessageNode;

    /// Build a SubDag directly from (id, parents) pairs, the same shape
    /// `build_subdag` produces.
    fn subdag(layout: &[(&str, &[&str])]) -> SubDag {
        let mut dag = SubDag::default();
        for (id, parents) in layout {
            let mut node = MessageNode::new("c", Role::User, *id);
            node.id = id.to_string();
            node.parent_ids = parents.iter().map(|p| p.to_string()).collect();
            dag.node_map.insert(id.to_string(), node);
        }
        let mut edges: HashMap<String, Vec<String>> = dag
            .node_map
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        let mut ids: Vec<String> = dag.node_map.keys().cloned().collect();
        ids.sort();
        for id in &ids {
            for parent in &dag.node_map[id].parent_ids {
                if let Some(children) = edges.get_mut(parent) {
                    children.push(id.clone());
                }
            }
        }
        dag.edges = edges;
        dag
    }

    fn index_of(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn linked_list_stays_linear() {
        let dag = subdag(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &["c"]),
            ("e", &["d"]),
            ("f", &["e"]),
        ]);
        let order = chain_preserving_sort(&dag);
        assert_eq!(order, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn every_edge_respects_the_order() {
        let dag = subdag(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
            ("e", &["d"]),
        ]);
        let order = chain_preserving_sort(&dag);
        assert_eq!(order.len(), 5);
        for (id, node) in &dag.node_map {
            for parent in &node.parent_ids {
                assert!(
                    index_of(&order, parent) < index_of(&order, id),
                    "edge {parent} -> {id} violated in {order:?}"
                );
            }
        }
    }

    #[test]
    fn merge_point_waits_for_both_chains() {
        // two chains a->c->i and a->d->j merging into n
        let dag = subdag(&[
            ("a", &[]),
            ("c", &["a"]),
            ("d", &["a"]),
            ("i", &["c"]),
            ("j", &["d"]),
            ("n", &["i", "j"]),
        ]);
        let order = chain_preserving_sort(&dag);
        assert_eq!(index_of(&order, "a"), 0);
        assert!(index_of(&order, "c") < index_of(&order, "i"));
        assert!(index_of(&order, "i") < index_of(&order, "n"));
        assert!(index_of(&order, "d") < index_of(&order, "j"));
        assert!(index_of(&order, "j") < index_of(&order, "n"));
        assert_eq!(index_of(&order, "n"), 5);
        // each two-node chain is contiguous
        assert_eq!(index_of(&order, "i"), index_of(&order, "c") + 1);
        assert_eq!(index_of(&order, "j"), index_of(&order, "d") + 1);
    }

    #[test]
    fn chain_preference_keeps_interior_links_together() {
        // chain j->o->q->s plus branch j->n->s
        let dag = subdag(&[
            ("j", &[]),
            ("n", &["j"]),
            ("o", &["j"]),
            ("q", &["o"]),
            ("s", &["q", "n"]),
        ]);
        let order = chain_preserving_sort(&dag);
        let o = index_of(&order, "o");
        let q = index_of(&order, "q");
        assert_eq!(q, o + 1, "o and q must be consecutive in {order:?}");
        assert_eq!(index_of(&order, "s"), 4);
    }

    #[test]
    fn sort_is_deterministic() {
        let dag = subdag(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["a"]),
            ("e", &["b", "c", "d"]),
        ]);
        let first = chain_preserving_sort(&dag);
        for _ in 0..10 {
            assert_eq!(chain_preserving_sort(&dag), first);
        }
    }

    #[test]
    fn empty_subdag_sorts_to_empty() {
        let dag = SubDag::default();
        assert!(chain_preserving_sort(&dag).is_empty());
    }
}
