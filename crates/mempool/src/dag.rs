use std::collections::HashMap;

use opnet_primitives::Buf32;

/// Dependency graph over mempool entries.
///
/// Arena storage: nodes are dense indices, edges are index lists, the id
/// map is the only way in. Edges may dangle (a child can name a parent
/// that has not arrived yet); they resolve when the parent is inserted,
/// and cycle detection runs against the resolved graph.
#[derive(Debug, Default)]
pub struct DependencyDag {
    nodes: Vec<Node>,
    index_of: HashMap<Buf32, usize>,
    /// parent id → children already waiting on it.
    dangling: HashMap<Buf32, Vec<usize>>,
}

#[derive(Debug)]
struct Node {
    id: Buf32,
    parents: Vec<usize>,
    children: Vec<usize>,
    /// Tombstone left by removal; indices stay stable.
    removed: bool,
}

impl DependencyDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &Buf32) -> bool {
        self.index_of.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_of.is_empty()
    }

    /// Inserts a node with the given parent ids (known or not yet seen).
    ///
    /// Fails and leaves the graph untouched when the insertion would
    /// close a cycle through previously dangling edges.
    pub fn insert(&mut self, id: Buf32, parent_ids: &[Buf32]) -> Result<(), CycleDetected> {
        debug_assert!(!self.contains(&id), "caller enforces uniqueness");

        let node_idx = self.nodes.len();
        self.nodes.push(Node {
            id,
            parents: Vec::new(),
            children: Vec::new(),
            removed: false,
        });

        // Wire known parents now, leave the rest dangling.
        for parent_id in parent_ids {
            match self.index_of.get(parent_id) {
                Some(&parent_idx) => {
                    self.nodes[parent_idx].children.push(node_idx);
                    self.nodes[node_idx].parents.push(parent_idx);
                }
                None => {
                    self.dangling.entry(*parent_id).or_default().push(node_idx);
                }
            }
        }

        // Resolve children that were waiting for this id.
        let waiting = self.dangling.remove(&id).unwrap_or_default();
        for child_idx in &waiting {
            self.nodes[node_idx].children.push(*child_idx);
            self.nodes[*child_idx].parents.push(node_idx);
        }

        if self.reaches(node_idx, node_idx) {
            // Unwind: this is the newest node, so popping it plus the
            // edge lists touching it restores the previous graph.
            for child_idx in waiting {
                self.nodes[child_idx].parents.pop();
                self.dangling.entry(id).or_default().push(child_idx);
            }
            for parent_idx in self.nodes[node_idx].parents.clone() {
                self.nodes[parent_idx].children.pop();
            }
            self.dangling.retain(|_, children| {
                children.retain(|c| *c != node_idx);
                !children.is_empty()
            });
            self.nodes.pop();
            return Err(CycleDetected);
        }

        self.index_of.insert(id, node_idx);
        Ok(())
    }

    /// Removes a node, detaching its edges. Children keep running; their
    /// edge to this parent disappears (mined or evicted parents no longer
    /// constrain ordering).
    pub fn remove(&mut self, id: &Buf32) {
        let Some(idx) = self.index_of.remove(id) else {
            return;
        };
        self.nodes[idx].removed = true;

        let parents = std::mem::take(&mut self.nodes[idx].parents);
        for parent_idx in parents {
            self.nodes[parent_idx].children.retain(|c| *c != idx);
        }
        let children = std::mem::take(&mut self.nodes[idx].children);
        for child_idx in children {
            self.nodes[child_idx].parents.retain(|p| *p != idx);
        }
        self.dangling.retain(|_, waiting| {
            waiting.retain(|c| *c != idx);
            !waiting.is_empty()
        });
    }

    /// Resolved parent ids of an entry.
    pub fn parents_of(&self, id: &Buf32) -> Vec<Buf32> {
        let Some(&idx) = self.index_of.get(id) else {
            return Vec::new();
        };
        self.nodes[idx]
            .parents
            .iter()
            .map(|p| self.nodes[*p].id)
            .collect()
    }

    /// Whether `target` is reachable from `from` by following child
    /// edges (i.e. `from` is an ancestor of `target`), passing through
    /// `from` itself only as the endpoint.
    fn reaches(&self, from: usize, target: usize) -> bool {
        let mut stack: Vec<usize> = self.nodes[from].children.clone();
        let mut seen = vec![false; self.nodes.len()];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if seen[node] || self.nodes[node].removed {
                continue;
            }
            seen[node] = true;
            stack.extend(self.nodes[node].children.iter().copied());
        }
        false
    }

    /// Full-graph acyclicity check (Kahn). Admission keeps this true as
    /// an invariant; the property tests assert it.
    pub fn is_acyclic(&self) -> bool {
        let mut indegree: HashMap<usize, usize> = HashMap::new();
        for (_, &idx) in &self.index_of {
            indegree.insert(idx, self.nodes[idx].parents.len());
        }
        let mut queue: Vec<usize> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| *i)
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop() {
            visited += 1;
            for &child in &self.nodes[node].children {
                if let Some(d) = indegree.get_mut(&child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(child);
                    }
                }
            }
        }
        visited == self.index_of.len()
    }

    /// Transitive ancestor chain of an entry (for the acyclicity
    /// property: it must terminate without repeats).
    pub fn ancestor_chain(&self, id: &Buf32) -> Vec<Buf32> {
        let Some(&start) = self.index_of.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = self.nodes[start].parents.clone();
        while let Some(node) = stack.pop() {
            if seen[node] {
                continue;
            }
            seen[node] = true;
            out.push(self.nodes[node].id);
            stack.extend(self.nodes[node].parents.iter().copied());
        }
        out
    }
}

/// Marker error: insertion would create a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleDetected;
