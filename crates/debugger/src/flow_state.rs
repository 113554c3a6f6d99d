//! Running flow instances
//!
//! Flow states form a tree: a flow started by a component of another flow is
//! a child of that flow's state. Nodes live in an arena keyed by a local
//! [`FlowStateId`]; the remote index only names a node while the engine keeps
//! it alive.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use transport::message::FlowStateIndex;

use crate::project::{ComponentDef, FlowDef};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowStateId(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub code: u32,
    /// Module provided rendering of `code`
    pub decoded: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentState {
    pub inputs: BTreeMap<String, Value>,
    pub execution_state: Option<ExecutionState>,
    pub async_state: bool,
}

#[derive(Debug)]
pub struct FlowState {
    pub id: FlowStateId,
    /// Remote index the state was created with
    pub index: FlowStateIndex,
    pub flow_index: u32,
    pub flow: Arc<FlowDef>,
    pub parent: Option<FlowStateId>,
    pub parent_component: Option<Arc<ComponentDef>>,
    pub children: Vec<FlowStateId>,
    pub timeline_position: f64,
    pub error: Option<String>,
    pub finished: bool,
    pub locals: BTreeMap<String, Value>,
    /// Keyed by component path
    pub components: BTreeMap<String, ComponentState>,
    pub active_components: usize,
}

impl FlowState {
    pub fn component_state(&self, path: &str) -> Option<&ComponentState> {
        self.components.get(path)
    }

    pub fn component_state_mut(&mut self, path: &str) -> &mut ComponentState {
        self.components.entry(path.to_string()).or_default()
    }
}

/// Arena of flow states plus the remote index in both directions
#[derive(Debug, Default)]
pub struct FlowStateTree {
    nodes: HashMap<FlowStateId, FlowState>,
    roots: Vec<FlowStateId>,
    by_index: HashMap<FlowStateIndex, FlowStateId>,
    index_of: HashMap<FlowStateId, FlowStateIndex>,
    next_id: u64,
}

impl FlowStateTree {
    /// Add a node, index it and link it under `parent` (or the roots)
    ///
    /// The caller checks that `index` is free.
    pub fn create(
        &mut self,
        index: FlowStateIndex,
        flow_index: u32,
        flow: Arc<FlowDef>,
        parent: Option<FlowStateId>,
        parent_component: Option<Arc<ComponentDef>>,
    ) -> FlowStateId {
        let id = FlowStateId(self.next_id);
        self.next_id += 1;

        self.nodes.insert(
            id,
            FlowState {
                id,
                index,
                flow_index,
                flow,
                parent,
                parent_component,
                children: Vec::new(),
                timeline_position: 0.0,
                error: None,
                finished: false,
                locals: BTreeMap::new(),
                components: BTreeMap::new(),
                active_components: 0,
            },
        );
        self.by_index.insert(index, id);
        self.index_of.insert(id, index);

        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(parent) => parent.children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn lookup(&self, index: FlowStateIndex) -> Option<FlowStateId> {
        self.by_index.get(&index).copied()
    }

    pub fn index_of(&self, id: FlowStateId) -> Option<FlowStateIndex> {
        self.index_of.get(&id).copied()
    }

    pub fn get(&self, id: FlowStateId) -> Option<&FlowState> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: FlowStateId) -> Option<&mut FlowState> {
        self.nodes.get_mut(&id)
    }

    pub fn by_index(&self, index: FlowStateIndex) -> Option<&FlowState> {
        self.lookup(index).and_then(|id| self.nodes.get(&id))
    }

    pub fn by_index_mut(&mut self, index: FlowStateIndex) -> Option<&mut FlowState> {
        let id = self.lookup(index)?;
        self.nodes.get_mut(&id)
    }

    pub fn roots(&self) -> &[FlowStateId] {
        &self.roots
    }

    pub fn children(&self, id: FlowStateId) -> &[FlowStateId] {
        self.nodes
            .get(&id)
            .map(|state| state.children.as_slice())
            .unwrap_or_default()
    }

    /// Number of nodes still in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes addressable by remote index
    pub fn indexed(&self) -> usize {
        self.by_index.len()
    }

    /// Unindex the node at `index` and mark it finished
    pub fn destroy(&mut self, index: FlowStateIndex) -> Option<FlowStateId> {
        let id = self.by_index.remove(&index)?;
        self.index_of.remove(&id);
        if let Some(state) = self.nodes.get_mut(&id) {
            state.finished = true;
        }
        Some(id)
    }

    /// Drop finished nodes from the tree
    ///
    /// Finished nodes are unlinked from their parent (or the roots) unless
    /// `referenced` holds for them. Nodes that end up unreachable from the
    /// roots, unindexed and unreferenced are removed from the arena. Nodes
    /// that are still indexed stay addressable even when their parent went
    /// away.
    pub fn sweep(&mut self, referenced: impl Fn(FlowStateId) -> bool) {
        let keep = |nodes: &HashMap<FlowStateId, FlowState>, id: &FlowStateId| {
            nodes.get(id).is_some_and(|s| !s.finished) || referenced(*id)
        };

        let nodes = &self.nodes;
        self.roots.retain(|id| keep(nodes, id));

        let mut reachable = HashSet::new();
        let mut pending: Vec<FlowStateId> = self.roots.clone();
        while let Some(id) = pending.pop() {
            if !reachable.insert(id) {
                continue;
            }
            let Some(children) = self.nodes.get(&id).map(|s| s.children.clone()) else {
                continue;
            };
            let kept: Vec<FlowStateId> = children
                .into_iter()
                .filter(|child| keep(&self.nodes, child))
                .collect();
            pending.extend(kept.iter().copied());
            if let Some(state) = self.nodes.get_mut(&id) {
                state.children = kept;
            }
        }

        let by_index = &self.index_of;
        let before = self.nodes.len();
        self.nodes
            .retain(|id, _| reachable.contains(id) || by_index.contains_key(id) || referenced(*id));
        let purged = before - self.nodes.len();
        if purged > 0 {
            tracing::trace!(purged, "removed finished flow states");
        }
    }

    /// Forget every remote index, keeping the nodes for inspection
    pub fn clear_index(&mut self) {
        self.by_index.clear();
        self.index_of.clear();
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.clear_index();
    }
}
