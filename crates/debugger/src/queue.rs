//! Mirror of the engine's execution queue

use std::collections::VecDeque;
use std::sync::Arc;

use crate::flow_state::FlowStateId;
use crate::project::{ComponentDef, ConnectionLineDef};

/// A component waiting to be executed
#[derive(Debug, Clone, PartialEq)]
pub struct QueueTask {
    pub id: u64,
    pub flow_state: FlowStateId,
    pub component: Arc<ComponentDef>,
    /// The connection that delivered the value which triggered the task
    pub connection_line: Option<ConnectionLineDef>,
}

#[derive(Debug, Default)]
pub struct QueueMirror {
    tasks: VecDeque<QueueTask>,
    next_id: u64,
}

impl QueueMirror {
    pub fn push(
        &mut self,
        flow_state: FlowStateId,
        component: Arc<ComponentDef>,
        connection_line: Option<ConnectionLineDef>,
    ) -> &QueueTask {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.push_back(QueueTask {
            id,
            flow_state,
            component,
            connection_line,
        });
        &self.tasks[self.tasks.len() - 1]
    }

    pub fn pop(&mut self) -> Option<QueueTask> {
        self.tasks.pop_front()
    }

    pub fn front(&self) -> Option<&QueueTask> {
        self.tasks.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueTask> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_state::FlowStateTree;
    use crate::project::{ComponentKind, FlowDef, FlowKind};

    fn component(path: &str) -> Arc<ComponentDef> {
        Arc::new(ComponentDef {
            path: path.to_string(),
            kind: ComponentKind::Action,
        })
    }

    #[test]
    fn test_fifo() {
        let mut tree = FlowStateTree::default();
        let flow = Arc::new(FlowDef {
            path: "/f".to_string(),
            name: String::new(),
            kind: FlowKind::Action,
            local_variables: Vec::new(),
            connection_lines: Vec::new(),
        });
        let fs = tree.create(1, 0, flow, None, None);

        let mut queue = QueueMirror::default();
        let a = queue.push(fs, component("/a"), None).id;
        let b = queue.push(fs, component("/b"), None).id;
        assert_ne!(a, b);
        assert_eq!(queue.front().unwrap().component.path, "/a");

        assert_eq!(queue.pop().unwrap().id, a);
        assert_eq!(queue.pop().unwrap().id, b);
        assert!(queue.pop().is_none());
    }
}
