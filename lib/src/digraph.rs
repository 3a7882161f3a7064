use std::collections::{HashMap, VecDeque};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction::{Incoming, Outgoing};

use crate::error::ExecError;

/// Mutable working copy of the task DAG for one invocation. Edges point from
/// dependency to dependent. The scheduler is the sole mutator and observer,
/// so no synchronization is needed.
///
/// Backed by a `StableDiGraph` because tasks are removed from the interior of
/// the graph as they are reaped, and the remaining indices must stay valid.
#[derive(Clone, Debug, Default)]
pub struct WorkingGraph {
    graph: StableDiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl WorkingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, id: impl Into<String>) -> Result<(), ExecError> {
        let id = id.into();
        if self.indices.contains_key(&id) {
            return Err(ExecError::Graph(format!("task id is duplicated: {id}")));
        }
        let index = self.graph.add_node(id.clone());
        self.indices.insert(id, index);
        Ok(())
    }

    /// Adds an edge from dependency `from` to dependent `to`.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), ExecError> {
        let from_i = self.index_of(from)?;
        let to_i = self.index_of(to)?;
        self.graph.add_edge(from_i, to_i, ());
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex, ExecError> {
        self.indices
            .get(id)
            .copied()
            .ok_or_else(|| ExecError::Graph(format!("task {id} does not exist")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All remaining task ids, in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|i| self.graph[i].clone())
            .collect()
    }

    /// Tasks with no remaining predecessor.
    pub fn root_ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|&i| self.graph.edges_directed(i, Incoming).next().is_none())
            .map(|i| self.graph[i].clone())
            .collect()
    }

    /// Direct dependents of `id`.
    pub fn successor_ids(&self, id: &str) -> Result<Vec<String>, ExecError> {
        let index = self.index_of(id)?;
        Ok(self
            .graph
            .neighbors_directed(index, Outgoing)
            .map(|i| self.graph[i].clone())
            .collect())
    }

    /// All transitive dependents of `id`, breadth first, `id` excluded.
    pub fn descendant_ids(&self, id: &str) -> Result<Vec<String>, ExecError> {
        let start = self.index_of(id)?;
        let mut descendants = Vec::new();
        let mut search_queue = VecDeque::new();
        search_queue.push_back(start);

        while let Some(index) = search_queue.pop_front() {
            for suc_index in self.graph.neighbors_directed(index, Outgoing) {
                if !descendants.contains(&suc_index) {
                    descendants.push(suc_index);
                    search_queue.push_back(suc_index);
                }
            }
        }
        Ok(descendants
            .into_iter()
            .map(|i| self.graph[i].clone())
            .collect())
    }

    /// Removes `id` and its incident edges. Dependents of `id` may become new
    /// roots.
    pub fn remove(&mut self, id: &str) -> Result<(), ExecError> {
        let index = self.index_of(id)?;
        self.graph.remove_node(index);
        self.indices.remove(id);
        Ok(())
    }

    /// Removes `id` and every transitive dependent.
    pub fn remove_recursively(&mut self, id: &str) -> Result<(), ExecError> {
        let descendants = self.descendant_ids(id)?;
        self.remove(id)?;
        for descendant in descendants {
            self.remove(&descendant)?;
        }
        Ok(())
    }
}

/// Compound priority of every task: its own priority plus the priorities of
/// all transitive dependents. Computed once at build time; the scheduler only
/// uses the result as an opaque tie-breaker.
pub fn accumulate_compound_priorities(
    graph: &WorkingGraph,
    priorities: &HashMap<String, i32>,
) -> Result<HashMap<String, i32>, ExecError> {
    let mut compound = HashMap::with_capacity(priorities.len());
    for id in graph.ids() {
        let own = priorities.get(&id).copied().unwrap_or(0);
        let descendants_sum: i32 = graph
            .descendant_ids(&id)?
            .iter()
            .map(|descendant| priorities.get(descendant).copied().unwrap_or(0))
            .sum();
        compound.insert(id, own + descendants_sum);
    }
    Ok(compound)
}
