//! Live mirror of a flow engine, rebuilt from its remote debugger protocol
mod assets;
mod bindings;
mod commands;
mod debugger;
mod decode;
mod error;
mod flow_state;
mod logs;
mod project;
mod queue;
mod runtime;
mod session;
pub(crate) mod state;
mod value;

pub use assets::{
    AssetMap, ComponentAsset, ComponentInputAsset, ElementType, FieldAsset, FlowAsset,
    GlobalVariableAsset, LocalVariableAsset, OutputAsset, TypeAsset,
};
pub use bindings::{BindingRegistry, DebuggerValue};
pub use debugger::{ConnectionParameters, Debugger, StartArguments};
pub use error::{DispatchError, SessionError};
pub use flow_state::{ComponentState, ExecutionState, FlowState, FlowStateId, FlowStateTree};
pub use logs::{DEFAULT_LOG_CAPACITY, LogItem, LogKind, RuntimeLogs};
pub use project::{
    ComponentDef, ComponentKind, ConnectionLineDef, FlowDef, FlowKind, Project, RuntimeModule,
    StaticProject, VariableDef,
};
pub use queue::{QueueMirror, QueueTask};
pub use runtime::{RuntimeState, SingleStepMode, StateMachineAction};
pub use session::{BreakpointAction, Session, SessionOptions};
pub use state::{
    ComponentSnapshot, Event, FlowStateSnapshot, MemoryGauges, MirrorSnapshot, QueueTaskSnapshot,
};
pub use value::{Container, ContainerId, Heap, MemberKey, Value};
