//! Arena-backed directed dependency graph.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::error::GraphError;

/// Directed graph over shared node ownership, keyed by integer id.
///
/// An edge `producer -> consumer` means the consumer node receives data
/// produced by the producer node. Nodes are held as `Arc<T>` so worker
/// threads can keep using a node payload while the graph itself stays
/// build-once/read-many.
///
/// Adjacency is stored per node as two id-sets (`producers`: edges
/// arriving at this node; `consumers`: edges leaving it), giving O(1)
/// edge insertion and removal.
#[derive(Debug, Default)]
pub struct DependencyGraph<T> {
    nodes: HashMap<u32, Entry<T>>,
}

#[derive(Debug)]
struct Entry<T> {
    payload: Arc<T>,
    producers: HashSet<u32>,
    consumers: HashSet<u32>,
}

impl<T> DependencyGraph<T> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Checks whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks whether a node exists.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Inserts a node, replacing any node previously stored at `id`.
    pub fn add_node(&mut self, id: u32, payload: T) {
        self.nodes.insert(
            id,
            Entry {
                payload: Arc::new(payload),
                producers: HashSet::new(),
                consumers: HashSet::new(),
            },
        );
    }

    /// Returns a node payload.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.nodes.get(&id).map(|e| Arc::clone(&e.payload))
    }

    /// Adds an edge: `consumer` receives data produced by `producer`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] when either endpoint is
    /// missing; the graph is unchanged.
    pub fn add_edge(&mut self, producer: u32, consumer: u32) -> crate::Result<()> {
        if !self.nodes.contains_key(&producer) {
            return Err(GraphError::NodeNotFound(producer));
        }
        if !self.nodes.contains_key(&consumer) {
            return Err(GraphError::NodeNotFound(consumer));
        }
        if let Some(entry) = self.nodes.get_mut(&producer) {
            entry.consumers.insert(consumer);
        }
        if let Some(entry) = self.nodes.get_mut(&consumer) {
            entry.producers.insert(producer);
        }
        Ok(())
    }

    /// Removes an edge if present.
    pub fn remove_edge(&mut self, producer: u32, consumer: u32) {
        if let Some(entry) = self.nodes.get_mut(&producer) {
            entry.consumers.remove(&consumer);
        }
        if let Some(entry) = self.nodes.get_mut(&consumer) {
            entry.producers.remove(&producer);
        }
    }

    /// Removes a single node and its incident edges.
    pub fn remove_node(&mut self, id: u32) {
        let Some(entry) = self.nodes.remove(&id) else {
            return;
        };
        for p in &entry.producers {
            if let Some(producer) = self.nodes.get_mut(p) {
                producer.consumers.remove(&id);
            }
        }
        for c in &entry.consumers {
            if let Some(consumer) = self.nodes.get_mut(c) {
                consumer.producers.remove(&id);
            }
        }
    }

    /// Removes a node and everything that transitively consumes it.
    ///
    /// BFS over consumer edges: used at startup to prune a sensor whose
    /// dependencies cannot be satisfied together with every virtual
    /// sensor built on top of it. Returns the removed ids.
    pub fn remove_node_and_dependents(&mut self, id: u32) -> Vec<u32> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }

        let mut to_remove = Vec::new();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut queue: VecDeque<u32> = VecDeque::new();
        queue.push_back(id);
        visited.insert(id);

        while let Some(current) = queue.pop_front() {
            to_remove.push(current);
            if let Some(entry) = self.nodes.get(&current) {
                for consumer in &entry.consumers {
                    if visited.insert(*consumer) {
                        queue.push_back(*consumer);
                    }
                }
            }
        }

        for removed in &to_remove {
            self.remove_node(*removed);
        }
        to_remove
    }

    /// Returns the ids of nodes producing data for `id`.
    #[must_use]
    pub fn producers_of(&self, id: u32) -> Vec<u32> {
        self.nodes
            .get(&id)
            .map(|e| e.producers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the ids of nodes consuming data from `id`.
    #[must_use]
    pub fn consumers_of(&self, id: u32) -> Vec<u32> {
        self.nodes
            .get(&id)
            .map(|e| e.consumers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Iterates over all node ids and payloads.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Arc<T>)> + '_ {
        self.nodes
            .iter()
            .map(|(id, e)| (*id, Arc::clone(&e.payload)))
    }

    /// Returns a topological order with producers before consumers.
    ///
    /// Iterative depth-first search; deterministic given insertion-free
    /// tie-breaking is not required by callers. Dependency wiring walks
    /// this order in reverse so each node's producers are fully wired
    /// before anything consuming the node is touched.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] naming a node on the cycle.
    /// Construction order makes cycles impossible in practice (edges are
    /// only added from already-present producers), but the graph is
    /// generic and does not assume it.
    pub fn topological_sort(&self) -> crate::Result<Vec<u32>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<u32, Mark> =
            self.nodes.keys().map(|id| (*id, Mark::Unvisited)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        let mut roots: Vec<u32> = self.nodes.keys().copied().collect();
        roots.sort_unstable();

        for root in roots {
            if marks.get(&root) != Some(&Mark::Unvisited) {
                continue;
            }
            // Stack of (node, producers-remaining-to-visit).
            let mut stack: Vec<(u32, Vec<u32>)> = Vec::new();
            marks.insert(root, Mark::InProgress);
            stack.push((root, self.sorted_producers(root)));

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let next = top.1.pop();
                match next {
                    Some(next) => match marks.get(&next) {
                        Some(Mark::Unvisited) => {
                            marks.insert(next, Mark::InProgress);
                            let producers = self.sorted_producers(next);
                            stack.push((next, producers));
                        }
                        Some(Mark::InProgress) => return Err(GraphError::Cycle(next)),
                        _ => {}
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        order.push(node);
                        stack.pop();
                    }
                }
            }
        }

        Ok(order)
    }

    fn sorted_producers(&self, id: u32) -> Vec<u32> {
        let mut producers = self.producers_of(id);
        producers.sort_unstable();
        producers
    }
}
