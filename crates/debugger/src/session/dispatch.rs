//! Applying engine messages to the mirror
//!
//! Every handler resolves the indices of its message through the asset map
//! and the project before touching any state. A reference that cannot be
//! resolved is reported as a [`DispatchError`] and the message is dropped.

use std::mem;
use std::sync::Arc;

use transport::InboundMessage;
use transport::message::{Address, FlowStateIndex, LogLevel, QueueSource, RemoteState};

use super::Session;
use crate::assets::FlowAsset;
use crate::bindings::{DebuggerValue, Owners};
use crate::decode::{self, DecodeContext};
use crate::error::DispatchError;
use crate::flow_state::{ExecutionState, FlowState, FlowStateId};
use crate::logs::LogKind;
use crate::project::{ComponentDef, ComponentKind, ConnectionLineDef, FlowDef, FlowKind};
use crate::runtime::StateMachineAction;
use crate::state::{Event, MemoryGauges};
use crate::value::Value;

/// Page ids from here on belong to engine internal pages
const FIRST_INTERNAL_PAGE_ID: i64 = 32000;

/// A live flow state looked up by remote index
struct Resolved {
    id: FlowStateId,
    flow_index: u32,
    flow: Arc<FlowDef>,
}

impl Session {
    /// Apply one message from the engine
    pub fn dispatch(&mut self, message: InboundMessage) -> Result<(), DispatchError> {
        match message {
            InboundMessage::StateChanged(state) => {
                self.on_state_changed(state);
                Ok(())
            }
            InboundMessage::AddToQueue {
                flow_state,
                source,
                target_component,
                target_input,
                free_memory,
                total_memory,
            } => {
                self.memory = MemoryGauges {
                    free: free_memory,
                    total: total_memory,
                };
                self.on_add_to_queue(flow_state, source, target_component, target_input)
            }
            InboundMessage::RemoveFromQueue => self.on_remove_from_queue(),
            InboundMessage::GlobalVariableInit {
                variable,
                address,
                value,
            } => self.on_global_variable_init(variable, address, &value),
            InboundMessage::LocalVariableInit {
                flow_state,
                variable,
                address,
                value,
            } => self.on_local_variable_init(flow_state, variable, address, &value),
            InboundMessage::ComponentInputInit {
                flow_state,
                input,
                address,
                value,
            } => self.on_component_input_init(flow_state, input, address, &value),
            InboundMessage::ValueChanged { address, value } => {
                self.on_value_changed(address, &value)
            }
            InboundMessage::FlowStateCreated {
                flow_state,
                flow,
                parent,
                parent_component,
            } => self.on_flow_state_created(flow_state, flow, parent, parent_component),
            InboundMessage::FlowStateTimelineChanged {
                flow_state,
                position,
            } => {
                let state = self
                    .flow_states
                    .by_index_mut(flow_state)
                    .ok_or(DispatchError::UnknownFlowState(flow_state))?;
                state.timeline_position = position;
                Ok(())
            }
            InboundMessage::FlowStateDestroyed { flow_state } => {
                self.on_flow_state_destroyed(flow_state)
            }
            InboundMessage::FlowStateError {
                flow_state,
                component,
                message,
            } => self.on_flow_state_error(flow_state, component, message),
            InboundMessage::Log {
                level,
                flow_state,
                component,
                message,
            } => self.on_log(level, flow_state, component, message),
            InboundMessage::PageChanged { page_id } => self.on_page_changed(page_id),
            InboundMessage::ComponentExecutionStateChanged {
                flow_state,
                component,
                state,
            } => self.on_execution_state_changed(flow_state, component, state),
            InboundMessage::ComponentAsyncStateChanged {
                flow_state,
                component,
                is_async,
            } => {
                let resolved = self.resolve(flow_state)?;
                let component = self.component(resolved.flow_index, component)?;
                self.flow_state_mut(resolved.id, flow_state)?
                    .component_state_mut(&component.path)
                    .async_state = is_async;
                Ok(())
            }
        }
    }

    fn on_state_changed(&mut self, state: RemoteState) {
        match state {
            RemoteState::Resumed => {
                if mem::take(&mut self.transition_to_running_mode) {
                    self.transition(StateMachineAction::Run);
                } else {
                    self.transition(StateMachineAction::Resume);
                }
            }
            RemoteState::Paused => {
                if mem::take(&mut self.resume_at_start) {
                    if let Err(error) = self.resume() {
                        tracing::warn!(%error, "failed to resume at start");
                    }
                } else {
                    self.transition(StateMachineAction::Pause);
                }
            }
            RemoteState::SingleStep => self.transition(StateMachineAction::SingleStep),
            RemoteState::Stopped => {
                if self.error.is_none() {
                    self.publish(Event::EditorModeRequested);
                    self.stop(true);
                }
            }
        }
    }

    fn on_add_to_queue(
        &mut self,
        flow_state: FlowStateIndex,
        source: Option<QueueSource>,
        target_component: u32,
        target_input: u32,
    ) -> Result<(), DispatchError> {
        let resolved = self.resolve(flow_state)?;
        let target = self.component(resolved.flow_index, target_component)?;

        let connection_line = match source {
            Some(source) => {
                let line = self.connection_line(&resolved, source, &target, target_input)?;
                self.active_connection_line = Some(line.clone());
                Some(line)
            }
            None => None,
        };

        self.queue.push(resolved.id, target, connection_line);
        if let Some(state) = self.flow_states.get_mut(resolved.id) {
            state.active_components += 1;
        }
        self.publish(Event::QueueChanged {
            len: self.queue.len(),
        });

        if self.state.is_paused() {
            self.show_next_queue_task();
        }
        Ok(())
    }

    /// The single connection line that carried a value from `source` to the
    /// target input
    fn connection_line(
        &mut self,
        resolved: &Resolved,
        source: QueueSource,
        target: &ComponentDef,
        target_input: u32,
    ) -> Result<ConnectionLineDef, DispatchError> {
        let source_component = self.component(resolved.flow_index, source.component)?;

        let flow = self.flow_asset(resolved.flow_index)?;
        let output = flow
            .component(source.component)
            .and_then(|component| component.output(source.output))
            .ok_or_else(|| DispatchError::MissingOutput {
                component: source_component.path.clone(),
                output: source.output,
            })?
            .output_name
            .clone();
        let input = flow
            .component_input(target_input)
            .ok_or(DispatchError::MissingInput {
                flow: resolved.flow_index,
                input: target_input,
            })?
            .input_name
            .clone();

        let matches: Vec<&ConnectionLineDef> = resolved
            .flow
            .connection_lines
            .iter()
            .filter(|line| {
                line.source == source_component.path
                    && line.output == output
                    && line.target == target.path
                    && line.input == input
            })
            .collect();

        match matches.as_slice() {
            [line] => Ok((*line).clone()),
            _ => Err(DispatchError::ConnectionLine {
                from_component: source_component.path.clone(),
                output,
                target: target.path.clone(),
                input,
                matches: matches.len(),
            }),
        }
    }

    fn on_remove_from_queue(&mut self) -> Result<(), DispatchError> {
        let task = self.queue.pop().ok_or(DispatchError::EmptyQueue)?;
        if let Some(state) = self.flow_states.get_mut(task.flow_state) {
            state.active_components = state.active_components.saturating_sub(1);
        }

        self.log(
            LogKind::Execute,
            "Execute component".to_string(),
            Some(task.flow_state),
            Some(task.component.path.clone()),
        );
        self.publish(Event::QueueChanged {
            len: self.queue.len(),
        });

        if self.state.is_paused() {
            self.show_next_queue_task();
        }
        Ok(())
    }

    fn on_global_variable_init(
        &mut self,
        variable: u32,
        address: Address,
        token: &str,
    ) -> Result<(), DispatchError> {
        let name = self
            .assets
            .global_variable(variable)
            .ok_or(DispatchError::MissingGlobalVariable(variable))?
            .name
            .clone();
        let definition = self
            .paths
            .global_variable(&name)
            .ok_or_else(|| DispatchError::UndeclaredVariable(name.clone()))?;

        let value = self.decode_value(token);
        self.bind(
            address,
            DebuggerValue::GlobalVariable {
                name,
                value_type: definition.value_type,
            },
            value,
        );
        Ok(())
    }

    fn on_local_variable_init(
        &mut self,
        flow_state: FlowStateIndex,
        variable: u32,
        address: Address,
        token: &str,
    ) -> Result<(), DispatchError> {
        let resolved = self.resolve(flow_state)?;
        let name = self
            .flow_asset(resolved.flow_index)?
            .local_variable(variable)
            .ok_or(DispatchError::MissingLocalVariable {
                flow: resolved.flow_index,
                variable,
            })?
            .name
            .clone();
        let value_type = resolved
            .flow
            .local_variable(&name)
            .ok_or_else(|| DispatchError::UndeclaredVariable(name.clone()))?
            .value_type
            .clone();

        let value = self.decode_value(token);
        self.bind(
            address,
            DebuggerValue::LocalVariable {
                flow_state: resolved.id,
                name,
                value_type,
            },
            value,
        );
        Ok(())
    }

    fn on_component_input_init(
        &mut self,
        flow_state: FlowStateIndex,
        input: u32,
        address: Address,
        token: &str,
    ) -> Result<(), DispatchError> {
        let resolved = self.resolve(flow_state)?;
        let input_asset = self
            .flow_asset(resolved.flow_index)?
            .component_input(input)
            .ok_or(DispatchError::MissingInput {
                flow: resolved.flow_index,
                input,
            })?
            .clone();
        let component = self.component(resolved.flow_index, input_asset.component_index)?;

        let value = self.decode_value(token);
        self.bind(
            address,
            DebuggerValue::ComponentInput {
                flow_state: resolved.id,
                component: component.path.clone(),
                input: input_asset.input_name,
                value_type: input_asset.input_type,
            },
            value,
        );
        Ok(())
    }

    /// Decode once and store the value in every binding at `address`
    fn on_value_changed(&mut self, address: Address, token: &str) -> Result<(), DispatchError> {
        let bindings = self
            .bindings
            .get(address)
            .ok_or(DispatchError::UnknownAddress(address))?
            .to_vec();

        let value = self.decode_value(token);
        let mut owners = Owners {
            globals: &mut self.globals,
            flow_states: &mut self.flow_states,
            heap: &mut self.heap,
        };
        for binding in &bindings {
            if !binding.apply(value.clone(), &mut owners) {
                tracing::debug!(address, ?binding, "owner of binding is gone");
            }
        }
        Ok(())
    }

    fn on_flow_state_created(
        &mut self,
        flow_state: FlowStateIndex,
        flow_index: u32,
        parent: Option<FlowStateIndex>,
        parent_component: Option<u32>,
    ) -> Result<(), DispatchError> {
        let path = self.flow_asset(flow_index)?.path.clone();
        let flow = self
            .paths
            .flow(&path)
            .ok_or_else(|| DispatchError::UnresolvedPath(path.clone()))?;

        if self.flow_states.lookup(flow_state).is_some() {
            return Err(DispatchError::DuplicateFlowState(flow_state));
        }

        let (parent, parent_component) = match parent {
            Some(parent) => {
                let parent = self.resolve(parent)?;
                let component = match parent_component {
                    Some(component) => Some(self.component(parent.flow_index, component)?),
                    None => None,
                };
                (Some(parent.id), component)
            }
            None => (None, None),
        };

        self.flow_states
            .create(flow_state, flow_index, flow, parent, parent_component);
        tracing::debug!(flow_state, %path, "flow state created");
        self.publish(Event::FlowStateCreated {
            index: flow_state,
            flow: path,
        });
        Ok(())
    }

    fn on_flow_state_destroyed(&mut self, flow_state: FlowStateIndex) -> Result<(), DispatchError> {
        self.flow_states
            .destroy(flow_state)
            .ok_or(DispatchError::UnknownFlowState(flow_state))?;

        let logs = &self.logs;
        let queue = &self.queue;
        self.flow_states.sweep(|id| {
            logs.references(id) || queue.iter().any(|task| task.flow_state == id)
        });

        self.publish(Event::FlowStateDestroyed { index: flow_state });
        Ok(())
    }

    /// A flow failed on the engine, which ends the session
    fn on_flow_state_error(
        &mut self,
        flow_state: FlowStateIndex,
        component: u32,
        message: String,
    ) -> Result<(), DispatchError> {
        // resolve first, stopping clears the index
        let resolved = match self.resolve(flow_state) {
            Ok(resolved) => self
                .component(resolved.flow_index, component)
                .map(|component| (resolved.id, component)),
            Err(error) => Err(error),
        };

        self.stop_with_error(&message);

        let (id, component) = resolved?;
        if let Some(state) = self.flow_states.get_mut(id) {
            state.error = Some(message.clone());
        }
        self.log(
            LogKind::Error,
            message,
            Some(id),
            Some(component.path.clone()),
        );
        Ok(())
    }

    fn on_log(
        &mut self,
        level: LogLevel,
        flow_state: FlowStateIndex,
        component: Option<u32>,
        message: String,
    ) -> Result<(), DispatchError> {
        let resolved = self.resolve(flow_state)?;
        let component = match component {
            Some(component) => Some(self.component(resolved.flow_index, component)?.path.clone()),
            None => None,
        };
        self.log(level.into(), message, Some(resolved.id), component);
        Ok(())
    }

    /// The engine shows another page
    ///
    /// The id is one based, its sign is ignored.
    fn on_page_changed(&mut self, page_id: i32) -> Result<(), DispatchError> {
        let page_index = i64::from(page_id).abs() - 1;

        let Some(asset) = usize::try_from(page_index)
            .ok()
            .and_then(|index| self.assets.flows.get(index))
        else {
            if page_index < FIRST_INTERNAL_PAGE_ID {
                return Err(DispatchError::PageOutOfRange(i64::from(page_id)));
            }
            tracing::trace!(page_id, "engine internal page");
            return Ok(());
        };

        let path = asset.path.clone();
        let flow = self
            .paths
            .flow(&path)
            .ok_or_else(|| DispatchError::UnresolvedPath(path.clone()))?;
        if flow.kind != FlowKind::Page {
            return Err(DispatchError::NotAPage(path));
        }

        self.selected_page = Some(flow);
        self.publish(Event::PageSelected { path });
        Ok(())
    }

    fn on_execution_state_changed(
        &mut self,
        flow_state: FlowStateIndex,
        component: u32,
        state: u32,
    ) -> Result<(), DispatchError> {
        let resolved = self.resolve(flow_state)?;
        let component = self.component(resolved.flow_index, component)?;
        if component.kind == ComponentKind::InputAction {
            return Ok(());
        }

        let execution_state = (state != 0).then(|| ExecutionState {
            code: state,
            decoded: self
                .module
                .as_ref()
                .and_then(|module| module.execution_state(state)),
        });
        self.flow_state_mut(resolved.id, flow_state)?
            .component_state_mut(&component.path)
            .execution_state = execution_state;
        Ok(())
    }

    fn resolve(&self, index: FlowStateIndex) -> Result<Resolved, DispatchError> {
        let state = self
            .flow_states
            .by_index(index)
            .ok_or(DispatchError::UnknownFlowState(index))?;
        Ok(Resolved {
            id: state.id,
            flow_index: state.flow_index,
            flow: Arc::clone(&state.flow),
        })
    }

    fn flow_state_mut(
        &mut self,
        id: FlowStateId,
        index: FlowStateIndex,
    ) -> Result<&mut FlowState, DispatchError> {
        self.flow_states
            .get_mut(id)
            .ok_or(DispatchError::UnknownFlowState(index))
    }

    fn flow_asset(&self, flow_index: u32) -> Result<&FlowAsset, DispatchError> {
        self.assets
            .flow(flow_index)
            .ok_or(DispatchError::MissingFlow(flow_index))
    }

    fn component(
        &mut self,
        flow_index: u32,
        component_index: u32,
    ) -> Result<Arc<ComponentDef>, DispatchError> {
        let asset = self
            .assets
            .flow(flow_index)
            .ok_or(DispatchError::MissingFlow(flow_index))?
            .component(component_index)
            .ok_or(DispatchError::MissingComponent {
                flow: flow_index,
                component: component_index,
            })?;
        self.paths
            .component(&asset.path)
            .ok_or_else(|| DispatchError::UnresolvedPath(asset.path.clone()))
    }

    fn decode_value(&mut self, token: &str) -> Value {
        let mut ctx = DecodeContext {
            assets: &self.assets,
            heap: &mut self.heap,
            bindings: &mut self.bindings,
            module: self.module.as_deref(),
        };
        decode::decode(token, &mut ctx)
    }

    /// Store the initial value and register the binding
    fn bind(&mut self, address: Address, binding: DebuggerValue, value: Value) {
        let mut owners = Owners {
            globals: &mut self.globals,
            flow_states: &mut self.flow_states,
            heap: &mut self.heap,
        };
        if !binding.apply(value, &mut owners) {
            tracing::debug!(address, ?binding, "owner of binding is gone");
        }
        self.bindings.register(address, binding);
    }
}
