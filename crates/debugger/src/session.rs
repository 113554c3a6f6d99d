//! The mirrored state of one debugging session
//!
//! A [`Session`] owns every registry rebuilt from the engine's message
//! stream and the channel commands go out on. It is single threaded: the
//! [`crate::Debugger`] handle drives it from one background thread, tests
//! drive it directly.

mod dispatch;

use std::collections::BTreeMap;
use std::sync::Arc;

use transport::framer::{DEFAULT_MAX_LINE_LENGTH, Framer};
use transport::{BreakpointRef, CommandSink, DebuggerMode, OutboundCommand, TransportEvent};

use crate::assets::AssetMap;
use crate::bindings::BindingRegistry;
use crate::error::SessionError;
use crate::flow_state::{FlowStateId, FlowStateTree};
use crate::logs::{DEFAULT_LOG_CAPACITY, LogItem, LogKind, RuntimeLogs};
use crate::project::{ConnectionLineDef, FlowDef, PathCache, Project, RuntimeModule};
use crate::queue::{QueueMirror, QueueTask};
use crate::runtime::{RuntimeState, SingleStepMode, StateMachineAction, StepTracker};
use crate::state::{self, Event, MemoryGauges, MirrorSnapshot, QueueTaskSnapshot};
use crate::value::{Heap, Value};

const CONNECTION_CLOSED: &str = "Connection with debugger is closed";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Start in debug mode, the engine pauses before running anything
    pub debugger_active: bool,
    /// Resume once when the engine first reports that it paused
    pub resume_at_start: bool,
    pub max_line_length: usize,
    pub log_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debugger_active: false,
            resume_at_start: false,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointAction {
    Add,
    Remove,
    Enable,
    Disable,
}

impl BreakpointAction {
    fn command(self, breakpoint: BreakpointRef) -> OutboundCommand {
        match self {
            BreakpointAction::Add => OutboundCommand::AddBreakpoint(breakpoint),
            BreakpointAction::Remove => OutboundCommand::RemoveBreakpoint(breakpoint),
            BreakpointAction::Enable => OutboundCommand::EnableBreakpoint(breakpoint),
            BreakpointAction::Disable => OutboundCommand::DisableBreakpoint(breakpoint),
        }
    }
}

pub struct Session {
    assets: AssetMap,
    paths: PathCache,
    module: Option<Arc<dyn RuntimeModule>>,
    publisher: crossbeam_channel::Sender<Event>,
    sink: Option<Box<dyn CommandSink>>,
    framer: Framer,

    // run control
    state: RuntimeState,
    debugger_active: bool,
    resume_at_start: bool,
    transition_to_running_mode: bool,
    error: Option<String>,
    step: StepTracker,
    selected_queue_task: Option<QueueTask>,
    selected_flow_state: Option<FlowStateId>,
    selected_page: Option<Arc<FlowDef>>,

    // mirror
    globals: BTreeMap<String, Value>,
    flow_states: FlowStateTree,
    bindings: BindingRegistry,
    heap: Heap,
    queue: QueueMirror,
    logs: RuntimeLogs,
    memory: MemoryGauges,
    active_connection_line: Option<ConnectionLineDef>,
}

impl Session {
    pub fn new(
        assets: AssetMap,
        project: Arc<dyn Project>,
        module: Option<Arc<dyn RuntimeModule>>,
        options: SessionOptions,
        publisher: crossbeam_channel::Sender<Event>,
    ) -> Self {
        Self {
            assets,
            paths: PathCache::new(project),
            module,
            publisher,
            sink: None,
            framer: Framer::with_max_line_length(options.max_line_length),
            state: RuntimeState::Starting,
            debugger_active: options.debugger_active,
            resume_at_start: options.resume_at_start,
            transition_to_running_mode: false,
            error: None,
            step: StepTracker::default(),
            selected_queue_task: None,
            selected_flow_state: None,
            selected_page: None,
            globals: BTreeMap::new(),
            flow_states: FlowStateTree::default(),
            bindings: BindingRegistry::default(),
            heap: Heap::default(),
            queue: QueueMirror::default(),
            logs: RuntimeLogs::with_capacity(options.log_capacity),
            memory: MemoryGauges::default(),
            active_connection_line: None,
        }
    }

    /// Attach the command channel and announce the debugger mode
    ///
    /// Without an active debugger the engine is told to run straight away.
    /// Anything mirrored from an earlier run is dropped first.
    #[tracing::instrument(skip_all, fields(debugger_active = self.debugger_active))]
    pub fn start(&mut self, sink: Box<dyn CommandSink>) -> Result<(), SessionError> {
        if let Some(previous) = self.sink.take() {
            previous.stop();
        }
        self.reset();
        self.globals.clear();
        self.flow_states.clear();
        self.logs.clear();
        self.selected_flow_state = None;
        self.selected_page = None;
        self.error = None;
        self.state = RuntimeState::Starting;

        let action = if self.debugger_active {
            StateMachineAction::StartWithDebugger
        } else {
            StateMachineAction::StartWithoutDebugger
        };
        self.transition(action);

        self.sink = Some(sink);
        self.publish(Event::Connected);
        self.on_connected()?;

        if !self.debugger_active {
            self.resume()?;
        }
        Ok(())
    }

    fn on_connected(&mut self) -> Result<(), SessionError> {
        self.send_mode()
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(bytes) => self.on_data(&bytes),
            TransportEvent::Closed => {
                tracing::info!("engine closed the connection");
                self.on_transport_closed();
            }
            TransportEvent::Error(error) => {
                tracing::warn!(%error, "debugger connection failed");
                self.on_transport_closed();
            }
        }
    }

    /// Feed raw bytes from the engine
    pub fn on_data(&mut self, chunk: &[u8]) {
        for frame in self.framer.feed(chunk) {
            if self.state == RuntimeState::Stopped {
                tracing::debug!("session stopped, dropping remaining messages");
                break;
            }
            let message = match frame.parse() {
                Ok(message) => message,
                Err(error) => {
                    tracing::warn!(%error, line = frame.line(), "invalid message");
                    continue;
                }
            };
            tracing::trace!(?message, "received message");
            if let Err(error) = self.dispatch(message) {
                tracing::warn!(%error, line = frame.line(), "dropping message");
            }
        }
    }

    fn on_transport_closed(&mut self) {
        if let Some(sink) = &self.sink {
            sink.stop();
        }
        self.publish(Event::TransportClosed);
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.sink.is_none() {
            return Ok(());
        }
        self.step.clear();
        self.send(OutboundCommand::Resume)
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        let result = if self.state.is_paused() {
            Ok(())
        } else {
            self.send(OutboundCommand::Pause)
        };
        self.debugger_active = true;
        result
    }

    /// Execute the next queued component
    ///
    /// With a mode the step is tracked so tasks of unrelated flow states are
    /// skipped when the engine pauses again. Without one the engine is simply
    /// told to step.
    pub fn single_step(&mut self, mode: Option<SingleStepMode>) -> Result<(), SessionError> {
        if let Some(mode) = mode {
            let head = self.queue.front().cloned();
            self.step.begin(mode, head);
        }
        self.send(OutboundCommand::SingleStep)
    }

    pub fn toggle_debugger(&mut self) -> Result<(), SessionError> {
        if self.debugger_active {
            if self.state.is_paused() {
                self.transition_to_running_mode = true;
                self.resume()?;
            } else {
                self.transition(StateMachineAction::Run);
            }
            self.debugger_active = false;
        } else {
            self.pause()?;
        }
        self.send_mode()
    }

    /// Breakpoint command for the component at `path`
    pub fn breakpoint(&mut self, action: BreakpointAction, path: &str) -> Result<(), SessionError> {
        let breakpoint = self
            .assets
            .find_component(path)
            .ok_or_else(|| SessionError::UnknownComponent(path.to_string()))?;
        self.send(action.command(breakpoint))
    }

    /// Tear the session down
    ///
    /// Closes the command channel and clears every registry. Flow state
    /// nodes are kept, unindexed, so they can still be inspected.
    #[tracing::instrument(skip(self))]
    pub fn stop(&mut self, notify: bool) {
        if self.state == RuntimeState::Stopped {
            return;
        }
        self.transition(StateMachineAction::Stop);

        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.reset();

        if notify {
            self.publish(Event::Stopped);
        }
    }

    pub fn stop_with_error(&mut self, message: &str) {
        tracing::error!(%message, "stopping session");
        self.error = Some(message.to_string());
        self.publish(Event::Error(message.to_string()));
        self.stop(true);
    }

    fn reset(&mut self) {
        self.bindings.clear();
        self.flow_states.clear_index();
        self.heap.clear();
        self.paths.clear();
        self.queue.clear();
        self.framer.clear();
        self.step.clear();
        self.selected_queue_task = None;
        self.active_connection_line = None;
    }

    fn send_mode(&mut self) -> Result<(), SessionError> {
        let mode = if self.debugger_active {
            DebuggerMode::Debug
        } else {
            DebuggerMode::Run
        };
        self.send(OutboundCommand::Mode(mode))
    }

    /// Deliver a command to the engine
    ///
    /// Losing the connection is only fatal while the debugger is active.
    fn send(&mut self, command: OutboundCommand) -> Result<(), SessionError> {
        let Some(sink) = self.sink.as_ref() else {
            tracing::debug!(%command, "not connected, dropping command");
            return Ok(());
        };

        match sink.send_command(&command) {
            Ok(()) => {
                tracing::debug!(%command, "sent command");
                Ok(())
            }
            Err(error) if self.debugger_active => {
                tracing::warn!(%error, %command, "failed to send command");
                self.stop_with_error(CONNECTION_CLOSED);
                Err(error.into())
            }
            Err(error) => {
                tracing::debug!(%error, %command, "failed to send command");
                Ok(())
            }
        }
    }

    fn transition(&mut self, action: StateMachineAction) {
        if self.state == RuntimeState::Stopped && action == StateMachineAction::Pause {
            self.debugger_active = true;
            if let Err(error) = self.send_mode() {
                tracing::warn!(%error, "failed to switch to debug mode");
            }
            return;
        }

        let Some(next) = self.state.next(action) else {
            tracing::warn!(state = %self.state, ?action, "invalid transition");
            return;
        };
        tracing::debug!(from = %self.state, to = %next, "state changed");
        self.state = next;
        self.publish(Event::StateChanged(next));

        if next == RuntimeState::Paused {
            self.debugger_active = true;
            self.show_next_queue_task();
        }
    }

    fn show_next_queue_task(&mut self) {
        let next = self.queue.front().cloned();
        if let Some(task) = &next {
            if self.skip_next_queue_task(task) {
                return;
            }
        }
        self.select_queue_task(next);
    }

    /// Whether `next` is outside the current step and was stepped over
    fn skip_next_queue_task(&mut self, next: &QueueTask) -> bool {
        if !self.state.is_paused() {
            return false;
        }
        let Some(current) = &self.step.queue_task else {
            return false;
        };
        if next.id == current.id || self.step.last_skipped == Some(next.id) {
            return false;
        }

        let current_flow_state = current.flow_state;
        let Some(current_parent) = self
            .flow_states
            .get(current_flow_state)
            .filter(|state| !state.finished)
            .map(|state| state.parent)
        else {
            self.step.clear();
            return false;
        };
        let next_parent = self
            .flow_states
            .get(next.flow_state)
            .and_then(|state| state.parent);

        let unrelated =
            next.flow_state != current_flow_state && Some(next.flow_state) != current_parent;
        let skip = match self.step.mode {
            SingleStepMode::StepOver => unrelated,
            SingleStepMode::StepInto => unrelated && next_parent != Some(current_flow_state),
            // the stepped flow state is still running
            SingleStepMode::StepOut => true,
        };

        if skip {
            tracing::debug!(task = next.id, mode = ?self.step.mode, "skipping queue task");
            self.step.last_skipped = Some(next.id);
            if let Err(error) = self.single_step(None) {
                tracing::warn!(%error, "failed to continue single step");
            }
            true
        } else {
            self.step.queue_task = Some(next.clone());
            false
        }
    }

    fn select_queue_task(&mut self, task: Option<QueueTask>) {
        if let Some(step) = &self.step.queue_task {
            if task.as_ref().map(|t| t.flow_state) != Some(step.flow_state) {
                return;
            }
        }
        if let Some(task) = &task {
            self.selected_flow_state = Some(task.flow_state);
        }
        self.selected_queue_task = task;
    }

    fn log(
        &mut self,
        kind: LogKind,
        message: String,
        flow_state: Option<FlowStateId>,
        component: Option<String>,
    ) {
        let item = LogItem {
            kind,
            message,
            flow_state,
            component,
        };
        self.logs.push(item.clone());
        self.publish(Event::Log(item));
    }

    fn publish(&self, event: Event) {
        // nobody listening is fine
        let _ = self.publisher.send(event);
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn is_debugger_active(&self) -> bool {
        self.debugger_active
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn flow_states(&self) -> &FlowStateTree {
        &self.flow_states
    }

    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn queue(&self) -> &QueueMirror {
        &self.queue
    }

    pub fn logs(&self) -> &RuntimeLogs {
        &self.logs
    }

    pub fn memory(&self) -> MemoryGauges {
        self.memory
    }

    pub fn selected_page(&self) -> Option<&str> {
        self.selected_page.as_ref().map(|page| page.path.as_str())
    }

    pub fn selected_queue_task(&self) -> Option<&QueueTask> {
        self.selected_queue_task.as_ref()
    }

    pub fn selected_flow_state(&self) -> Option<FlowStateId> {
        self.selected_flow_state
    }

    /// Task skipped by the last automatic single step
    pub fn last_skipped_task(&self) -> Option<u64> {
        self.step.last_skipped
    }

    pub fn active_connection_line(&self) -> Option<&ConnectionLineDef> {
        self.active_connection_line.as_ref()
    }

    /// Render a mirrored value, following containers
    pub fn value_json(&self, value: &Value) -> serde_json::Value {
        self.heap.to_json(value)
    }

    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            state: self.state,
            debugger_active: self.debugger_active,
            error: self.error.clone(),
            selected_page: self.selected_page().map(str::to_string),
            selected_flow_state: self.selected_flow_state,
            memory: self.memory,
            globals: self
                .globals
                .iter()
                .map(|(name, value)| (name.clone(), self.heap.to_json(value)))
                .collect(),
            flow_states: state::snapshot_tree(&self.flow_states, &self.heap),
            queue: self.queue.iter().map(QueueTaskSnapshot::from).collect(),
            logs: self.logs.iter().cloned().collect(),
        }
    }
}
