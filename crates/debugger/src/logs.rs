//! Runtime log collected from the engine

use std::collections::VecDeque;

use serde::Serialize;
use transport::message::LogLevel;

use crate::flow_state::FlowStateId;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Fatal,
    Error,
    Warning,
    Scpi,
    Info,
    Debug,
    /// A queued component was executed
    Execute,
}

impl From<LogLevel> for LogKind {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Fatal => LogKind::Fatal,
            LogLevel::Error => LogKind::Error,
            LogLevel::Warning => LogKind::Warning,
            LogLevel::Scpi => LogKind::Scpi,
            LogLevel::Info => LogKind::Info,
            LogLevel::Debug => LogKind::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogItem {
    pub kind: LogKind,
    pub message: String,
    pub flow_state: Option<FlowStateId>,
    /// Component path
    pub component: Option<String>,
}

/// Bounded log, oldest entries are dropped first
#[derive(Debug)]
pub struct RuntimeLogs {
    items: VecDeque<LogItem>,
    capacity: usize,
}

impl Default for RuntimeLogs {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl RuntimeLogs {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: LogItem) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Whether any retained item points at `flow_state`
    pub fn references(&self, flow_state: FlowStateId) -> bool {
        self.items
            .iter()
            .any(|item| item.flow_state == Some(flow_state))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogItem> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&LogItem> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
