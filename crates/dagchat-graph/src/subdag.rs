use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};
use uuid::Uuid;

use dagchat_store::{MessageNode, NodeStore, Result};

/// Upper bound on BFS rounds. The node graph is maintained acyclic, but
/// the bound keeps the traversal total even on pathological data.
pub const MAX_DEPTH: usize = 2000;

/// Batched lookups keep the round count low on wide ancestor sets.
const BATCH_SIZE: usize = 100;

/// The ancestor closure of a set of start nodes.
///
/// `node_map` holds every ancestor of every start id (the start ids
/// included); `edges` lists, per node, its children *inside* the closure
/// in id-sorted order. Edges pointing outside the closure are dropped.
/// Both maps live only for the duration of one request.
#[derive(Debug, Default)]
pub struct SubDag {
    pub node_map: HashMap<String, MessageNode>,
    pub edges: HashMap<String, Vec<String>>,
}

impl SubDag {
    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }
}

/// Collect the ancestor closure of `parent_ids` by BFS-ing the parent
/// links upward through the node store.
///
/// Malformed and nonexistent ids are skipped (with a log), so they yield
/// an empty SubDAG rather than an error — upstream treats that as
/// "no prior history". Hitting `MAX_DEPTH` logs a warning and returns
/// the partial closure collected so far.
pub fn build_subdag(nodes: &NodeStore, parent_ids: &[String]) -> Result<SubDag> {
    let start_ids: Vec<String> = parent_ids
        .iter()
        .filter(|id| !id.is_empty())
        .filter(|id| {
            let ok = Uuid::parse_str(id).is_ok();
            if !ok {
                warn!(id = %id, "skipping malformed parent id");
            }
            ok
        })
        .cloned()
        .collect();

    if start_ids.is_empty() {
        return Ok(SubDag::default());
    }

    let mut queue: VecDeque<String> = start_ids.into();
    let mut visited: HashSet<String> = HashSet::new();
    let mut node_map: HashMap<String, MessageNode> = HashMap::new();
    let mut depth = 0usize;

    while !queue.is_empty() && depth < MAX_DEPTH {
        let batch: Vec<String> = queue
            .drain(..queue.len().min(BATCH_SIZE))
            .collect();

        for node in nodes.find_by_ids(&batch)? {
            if visited.contains(&node.id) {
                continue;
            }
            visited.insert(node.id.clone());
            for parent_id in &node.parent_ids {
                if !parent_id.is_empty() && !visited.contains(parent_id) {
                    if Uuid::parse_str(parent_id).is_ok() {
                        queue.push_back(parent_id.clone());
                    } else {
                        warn!(id = %parent_id, "skipping malformed parent id in stored node");
                    }
                }
            }
            node_map.insert(node.id.clone(), node);
        }

        depth += 1;
    }

    if depth >= MAX_DEPTH && !queue.is_empty() {
        warn!(
            remaining = queue.len(),
            max_depth = MAX_DEPTH,
            "ancestor traversal stopped at depth bound; returning partial closure"
        );
    }

    debug!(nodes = node_map.len(), depth, "ancestor traversal complete");
    Ok(SubDag {
        edges: derive_edges(&node_map),
        node_map,
    })
}

/// One pass over the closure: every in-closure `parent_id` contributes a
/// parent→child edge. Iteration runs in id order so child lists are
/// deterministic for a given closure.
fn derive_edges(node_map: &HashMap<String, MessageNode>) -> HashMap<String, Vec<String>> {
    let mut edges: HashMap<String, Vec<String>> = node_map
        .keys()
        .map(|id| (id.clone(), Vec::new()))
        .collect();

    let mut ids: Vec<&String> = node_map.keys().collect();
    ids.sort();

    for id in ids {
        for parent_id in &node_map[id].parent_ids {
            if let Some(children) = edges.get_mut(parent_id) {
                children.push(id.clone());
            }
        }
    }
    edges
}
