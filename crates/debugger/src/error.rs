use transport::TransportError;
use transport::message::{Address, FlowStateIndex};

/// A message that does not fit the mirrored state
///
/// The message is dropped and processing continues with the next one.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown flow state {0}")]
    UnknownFlowState(FlowStateIndex),

    #[error("flow state {0} already exists")]
    DuplicateFlowState(FlowStateIndex),

    #[error("no flow with index {0}")]
    MissingFlow(u32),

    #[error("flow {flow} has no component {component}")]
    MissingComponent { flow: u32, component: u32 },

    #[error("component {component} has no output {output}")]
    MissingOutput { component: String, output: u32 },

    #[error("flow {flow} has no input {input}")]
    MissingInput { flow: u32, input: u32 },

    #[error("no global variable with index {0}")]
    MissingGlobalVariable(u32),

    #[error("flow {flow} has no local variable {variable}")]
    MissingLocalVariable { flow: u32, variable: u32 },

    #[error("path {0} is not part of the project")]
    UnresolvedPath(String),

    #[error("variable {0} is not declared in the project")]
    UndeclaredVariable(String),

    #[error(
        "expected one connection line {from_component}.{output} -> {target}.{input}, found {matches}"
    )]
    ConnectionLine {
        from_component: String,
        output: String,
        target: String,
        input: String,
        matches: usize,
    },

    #[error("no value is bound at address {0:#x}")]
    UnknownAddress(Address),

    #[error("execution queue is empty")]
    EmptyQueue,

    #[error("page {0} is out of range")]
    PageOutOfRange(i64),

    #[error("flow {0} is not a page")]
    NotAPage(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no component {0} in the asset map")]
    UnknownComponent(String),
}
