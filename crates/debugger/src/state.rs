use std::collections::BTreeMap;

use serde::Serialize;
use transport::message::FlowStateIndex;

use crate::flow_state::{FlowStateId, FlowStateTree};
use crate::logs::LogItem;
use crate::project::ConnectionLineDef;
use crate::queue::QueueTask;
use crate::runtime::RuntimeState;
use crate::value::{Heap, Value};

/// Notifications published by a session
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The command channel to the engine is up
    Connected,
    StateChanged(RuntimeState),
    FlowStateCreated {
        index: FlowStateIndex,
        flow: String,
    },
    FlowStateDestroyed {
        index: FlowStateIndex,
    },
    QueueChanged {
        len: usize,
    },
    PageSelected {
        path: String,
    },
    Log(LogItem),
    /// Fatal session error, the session stops right after
    Error(String),
    /// The engine stopped on its own, the host should leave run mode
    EditorModeRequested,
    TransportClosed,
    Stopped,
}

/// Free and total engine memory in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryGauges {
    pub free: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSnapshot {
    pub inputs: BTreeMap<String, serde_json::Value>,
    pub execution_state: Option<u32>,
    pub async_state: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStateSnapshot {
    pub id: FlowStateId,
    /// `None` once the engine destroyed the state
    pub index: Option<FlowStateIndex>,
    pub flow: String,
    pub parent_component: Option<String>,
    pub timeline_position: f64,
    pub error: Option<String>,
    pub finished: bool,
    pub active_components: usize,
    pub locals: BTreeMap<String, serde_json::Value>,
    pub components: BTreeMap<String, ComponentSnapshot>,
    pub children: Vec<FlowStateSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueTaskSnapshot {
    pub id: u64,
    pub flow_state: FlowStateId,
    pub component: String,
    pub connection_line: Option<ConnectionLineDef>,
}

impl From<&QueueTask> for QueueTaskSnapshot {
    fn from(task: &QueueTask) -> Self {
        Self {
            id: task.id,
            flow_state: task.flow_state,
            component: task.component.path.clone(),
            connection_line: task.connection_line.clone(),
        }
    }
}

/// Point in time copy of everything a session mirrors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorSnapshot {
    pub state: RuntimeState,
    pub debugger_active: bool,
    pub error: Option<String>,
    pub selected_page: Option<String>,
    pub selected_flow_state: Option<FlowStateId>,
    pub memory: MemoryGauges,
    pub globals: BTreeMap<String, serde_json::Value>,
    pub flow_states: Vec<FlowStateSnapshot>,
    pub queue: Vec<QueueTaskSnapshot>,
    pub logs: Vec<LogItem>,
}

impl MirrorSnapshot {
    pub fn to_json(&self) -> eyre::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Depth first search of the flow state tree
    pub fn flow_state(&self, id: FlowStateId) -> Option<&FlowStateSnapshot> {
        let mut pending: Vec<&FlowStateSnapshot> = self.flow_states.iter().collect();
        while let Some(node) = pending.pop() {
            if node.id == id {
                return Some(node);
            }
            pending.extend(node.children.iter());
        }
        None
    }
}

pub(crate) fn snapshot_tree(tree: &FlowStateTree, heap: &Heap) -> Vec<FlowStateSnapshot> {
    tree.roots()
        .iter()
        .filter_map(|&id| snapshot_node(tree, heap, id, 0))
        .collect()
}

fn snapshot_node(
    tree: &FlowStateTree,
    heap: &Heap,
    id: FlowStateId,
    depth: usize,
) -> Option<FlowStateSnapshot> {
    // engine flow nesting is shallow, this only guards against corrupt links
    const MAX_DEPTH: usize = 256;
    if depth > MAX_DEPTH {
        return None;
    }

    let state = tree.get(id)?;
    let render = |values: &BTreeMap<String, Value>| -> BTreeMap<String, serde_json::Value> {
        values
            .iter()
            .map(|(name, value)| (name.clone(), heap.to_json(value)))
            .collect()
    };

    Some(FlowStateSnapshot {
        id,
        index: tree.index_of(id),
        flow: state.flow.path.clone(),
        parent_component: state.parent_component.as_ref().map(|c| c.path.clone()),
        timeline_position: state.timeline_position,
        error: state.error.clone(),
        finished: state.finished,
        active_components: state.active_components,
        locals: render(&state.locals),
        components: state
            .components
            .iter()
            .map(|(path, component)| {
                (
                    path.clone(),
                    ComponentSnapshot {
                        inputs: render(&component.inputs),
                        execution_state: component.execution_state.as_ref().map(|s| s.code),
                        async_state: component.async_state,
                    },
                )
            })
            .collect(),
        children: state
            .children
            .iter()
            .filter_map(|&child| snapshot_node(tree, heap, child, depth + 1))
            .collect(),
    })
}
