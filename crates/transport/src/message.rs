//! Wire catalogue of the flow engine debugger protocol
//!
//! Every message is one newline-terminated line of tab-separated fields. The
//! first field is the integer message type.

use std::fmt;

use crate::error::ProtocolError;

/// Remote flow-state index
pub type FlowStateIndex = u32;

/// Remote memory address of a watched value
pub type Address = u64;

/// Run state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Resumed,
    Paused,
    SingleStep,
    Stopped,
}

/// Severity of a LOG message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    Scpi,
    Info,
    Debug,
}

/// Component output that triggered a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSource {
    pub component: u32,
    pub output: u32,
}

/// Messages sent by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    StateChanged(RemoteState),
    AddToQueue {
        flow_state: FlowStateIndex,
        source: Option<QueueSource>,
        target_component: u32,
        target_input: u32,
        free_memory: u64,
        total_memory: u64,
    },
    RemoveFromQueue,
    GlobalVariableInit {
        variable: u32,
        address: Address,
        value: String,
    },
    LocalVariableInit {
        flow_state: FlowStateIndex,
        variable: u32,
        address: Address,
        value: String,
    },
    ComponentInputInit {
        flow_state: FlowStateIndex,
        input: u32,
        address: Address,
        value: String,
    },
    ValueChanged {
        address: Address,
        value: String,
    },
    FlowStateCreated {
        flow_state: FlowStateIndex,
        flow: u32,
        parent: Option<FlowStateIndex>,
        parent_component: Option<u32>,
    },
    FlowStateTimelineChanged {
        flow_state: FlowStateIndex,
        position: f64,
    },
    FlowStateDestroyed {
        flow_state: FlowStateIndex,
    },
    FlowStateError {
        flow_state: FlowStateIndex,
        component: u32,
        message: String,
    },
    Log {
        level: LogLevel,
        flow_state: FlowStateIndex,
        component: Option<u32>,
        message: String,
    },
    PageChanged {
        page_id: i32,
    },
    ComponentExecutionStateChanged {
        flow_state: FlowStateIndex,
        component: u32,
        state: u32,
    },
    ComponentAsyncStateChanged {
        flow_state: FlowStateIndex,
        component: u32,
        is_async: bool,
    },
}

const STATE_CHANGED: i64 = 0;
const ADD_TO_QUEUE: i64 = 1;
const REMOVE_FROM_QUEUE: i64 = 2;
const GLOBAL_VARIABLE_INIT: i64 = 3;
const LOCAL_VARIABLE_INIT: i64 = 4;
const COMPONENT_INPUT_INIT: i64 = 5;
const VALUE_CHANGED: i64 = 6;
const FLOW_STATE_CREATED: i64 = 7;
const FLOW_STATE_TIMELINE_CHANGED: i64 = 8;
const FLOW_STATE_DESTROYED: i64 = 9;
const FLOW_STATE_ERROR: i64 = 10;
const LOG: i64 = 11;
const PAGE_CHANGED: i64 = 12;
const COMPONENT_EXECUTION_STATE_CHANGED: i64 = 13;
const COMPONENT_ASYNC_STATE_CHANGED: i64 = 14;

impl InboundMessage {
    /// Decode one tab-split line
    ///
    /// Trailing fields beyond the ones a message defines are ignored.
    pub fn parse(fields: &[&str]) -> Result<Self, ProtocolError> {
        let Some(kind) = fields.first() else {
            return Err(ProtocolError::Empty);
        };
        if kind.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let kind: i64 = kind
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidType(kind.to_string()))?;

        let message = match kind {
            STATE_CHANGED => {
                let f = Fields::new("STATE_CHANGED", fields, 1)?;
                let state = match f.int(1, "state")? {
                    0 => RemoteState::Resumed,
                    1 => RemoteState::Paused,
                    2 => RemoteState::SingleStep,
                    3 => RemoteState::Stopped,
                    _ => return Err(f.invalid(1, "state")),
                };
                Self::StateChanged(state)
            }
            ADD_TO_QUEUE => {
                let f = Fields::new("ADD_TO_QUEUE", fields, 7)?;
                let source = match f.optional_index(2, "source component")? {
                    Some(component) => Some(QueueSource {
                        component,
                        output: f.index(3, "source output")?,
                    }),
                    None => None,
                };
                Self::AddToQueue {
                    flow_state: f.index(1, "flow state")?,
                    source,
                    target_component: f.index(4, "target component")?,
                    target_input: f.index(5, "target input")?,
                    free_memory: f.unsigned(6, "free memory")?,
                    total_memory: f.unsigned(7, "total memory")?,
                }
            }
            REMOVE_FROM_QUEUE => Self::RemoveFromQueue,
            GLOBAL_VARIABLE_INIT => {
                let f = Fields::new("GLOBAL_VARIABLE_INIT", fields, 3)?;
                Self::GlobalVariableInit {
                    variable: f.index(1, "variable")?,
                    address: f.address(2)?,
                    value: f.raw(3),
                }
            }
            LOCAL_VARIABLE_INIT => {
                let f = Fields::new("LOCAL_VARIABLE_INIT", fields, 4)?;
                Self::LocalVariableInit {
                    flow_state: f.index(1, "flow state")?,
                    variable: f.index(2, "variable")?,
                    address: f.address(3)?,
                    value: f.raw(4),
                }
            }
            COMPONENT_INPUT_INIT => {
                let f = Fields::new("COMPONENT_INPUT_INIT", fields, 4)?;
                Self::ComponentInputInit {
                    flow_state: f.index(1, "flow state")?,
                    input: f.index(2, "input")?,
                    address: f.address(3)?,
                    value: f.raw(4),
                }
            }
            VALUE_CHANGED => {
                let f = Fields::new("VALUE_CHANGED", fields, 2)?;
                Self::ValueChanged {
                    address: f.address(1)?,
                    value: f.raw(2),
                }
            }
            FLOW_STATE_CREATED => {
                let f = Fields::new("FLOW_STATE_CREATED", fields, 4)?;
                Self::FlowStateCreated {
                    flow_state: f.index(1, "flow state")?,
                    flow: f.index(2, "flow")?,
                    parent: f.optional_index(3, "parent flow state")?,
                    parent_component: f.optional_index(4, "parent component")?,
                }
            }
            FLOW_STATE_TIMELINE_CHANGED => {
                let f = Fields::new("FLOW_STATE_TIMELINE_CHANGED", fields, 2)?;
                Self::FlowStateTimelineChanged {
                    flow_state: f.index(1, "flow state")?,
                    position: f.float(2, "timeline position")?,
                }
            }
            FLOW_STATE_DESTROYED => {
                let f = Fields::new("FLOW_STATE_DESTROYED", fields, 1)?;
                Self::FlowStateDestroyed {
                    flow_state: f.index(1, "flow state")?,
                }
            }
            FLOW_STATE_ERROR => {
                let f = Fields::new("FLOW_STATE_ERROR", fields, 3)?;
                Self::FlowStateError {
                    flow_state: f.index(1, "flow state")?,
                    component: f.index(2, "component")?,
                    message: strip_quotes(fields[3]),
                }
            }
            LOG => {
                let f = Fields::new("LOG", fields, 4)?;
                let level = match f.int(1, "log type")? {
                    0 => LogLevel::Fatal,
                    1 => LogLevel::Error,
                    2 => LogLevel::Warning,
                    3 => LogLevel::Scpi,
                    4 => LogLevel::Info,
                    5 => LogLevel::Debug,
                    _ => return Err(f.invalid(1, "log type")),
                };
                Self::Log {
                    level,
                    flow_state: f.index(2, "flow state")?,
                    component: f.optional_index(3, "component")?,
                    message: f.raw(4),
                }
            }
            PAGE_CHANGED => {
                let f = Fields::new("PAGE_CHANGED", fields, 1)?;
                let page_id = i32::try_from(f.int(1, "page id")?)
                    .map_err(|_| f.invalid(1, "page id"))?;
                Self::PageChanged { page_id }
            }
            COMPONENT_EXECUTION_STATE_CHANGED => {
                let f = Fields::new("COMPONENT_EXECUTION_STATE_CHANGED", fields, 3)?;
                let state = u32::from_str_radix(fields[3].trim(), 16)
                    .map_err(|_| f.invalid(3, "execution state"))?;
                Self::ComponentExecutionStateChanged {
                    flow_state: f.index(1, "flow state")?,
                    component: f.index(2, "component")?,
                    state,
                }
            }
            COMPONENT_ASYNC_STATE_CHANGED => {
                let f = Fields::new("COMPONENT_ASYNC_STATE_CHANGED", fields, 3)?;
                Self::ComponentAsyncStateChanged {
                    flow_state: f.index(1, "flow state")?,
                    component: f.index(2, "component")?,
                    is_async: f.int(3, "async state")? != 0,
                }
            }
            other => return Err(ProtocolError::UnknownType(other)),
        };
        Ok(message)
    }
}

/// Positional access to the fields of one message, with the arity checked up
/// front
struct Fields<'a> {
    message: &'static str,
    fields: &'a [&'a str],
}

impl<'a> Fields<'a> {
    fn new(
        message: &'static str,
        fields: &'a [&'a str],
        arguments: usize,
    ) -> Result<Self, ProtocolError> {
        if fields.len() < arguments + 1 {
            return Err(ProtocolError::Arity {
                message,
                expected: arguments,
                got: fields.len() - 1,
            });
        }
        Ok(Self { message, fields })
    }

    fn invalid(&self, i: usize, field: &'static str) -> ProtocolError {
        ProtocolError::InvalidField {
            message: self.message,
            field,
            value: self.fields[i].to_string(),
        }
    }

    fn int(&self, i: usize, field: &'static str) -> Result<i64, ProtocolError> {
        self.fields[i]
            .trim()
            .parse()
            .map_err(|_| self.invalid(i, field))
    }

    fn index(&self, i: usize, field: &'static str) -> Result<u32, ProtocolError> {
        u32::try_from(self.int(i, field)?).map_err(|_| self.invalid(i, field))
    }

    /// Negative values mean "absent"
    fn optional_index(&self, i: usize, field: &'static str) -> Result<Option<u32>, ProtocolError> {
        let value = self.int(i, field)?;
        if value < 0 {
            return Ok(None);
        }
        u32::try_from(value)
            .map(Some)
            .map_err(|_| self.invalid(i, field))
    }

    fn unsigned(&self, i: usize, field: &'static str) -> Result<u64, ProtocolError> {
        u64::try_from(self.int(i, field)?).map_err(|_| self.invalid(i, field))
    }

    fn float(&self, i: usize, field: &'static str) -> Result<f64, ProtocolError> {
        self.fields[i]
            .trim()
            .parse()
            .map_err(|_| self.invalid(i, field))
    }

    fn address(&self, i: usize) -> Result<Address, ProtocolError> {
        Address::from_str_radix(self.fields[i].trim(), 16).map_err(|_| self.invalid(i, "address"))
    }

    fn raw(&self, i: usize) -> String {
        self.fields[i].to_string()
    }
}

/// Drop the first and last character of a quoted error message and unescape
/// the rest
fn strip_quotes(text: &str) -> String {
    let mut chars = text.chars();
    chars.next();
    chars.next_back();
    unescape(chars.as_str())
}

/// Undo the engine's string escaping
///
/// `\t`, `\n`, `\"` and `\\` are recognised, matching the pairs [`unquote`]
/// accepts. Any other backslash is kept as is.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let replacement = match chars.peek() {
            Some('t') => '\t',
            Some('n') => '\n',
            Some('"') => '"',
            Some('\\') => '\\',
            _ => {
                out.push('\\');
                continue;
            }
        };
        chars.next();
        out.push(replacement);
    }
    out
}

/// Decode a quoted string token
///
/// Returns `None` when the token is not a single well formed quoted string.
pub fn unquote(token: &str) -> Option<String> {
    let inner = token.strip_prefix('"')?.strip_suffix('"')?;
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return None;
        }
    }
    if escaped {
        // the closing quote was escaped
        return None;
    }
    Some(unescape(inner))
}

/// Breakpoint location as the engine knows it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointRef {
    pub flow_index: u32,
    pub component_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerMode {
    Run,
    Debug,
}

/// Commands sent to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundCommand {
    Resume,
    Pause,
    SingleStep,
    AddBreakpoint(BreakpointRef),
    RemoveBreakpoint(BreakpointRef),
    EnableBreakpoint(BreakpointRef),
    DisableBreakpoint(BreakpointRef),
    Mode(DebuggerMode),
}

impl OutboundCommand {
    pub fn code(&self) -> u8 {
        match self {
            Self::Resume => 0,
            Self::Pause => 1,
            Self::SingleStep => 2,
            Self::AddBreakpoint(_) => 3,
            Self::RemoveBreakpoint(_) => 4,
            Self::EnableBreakpoint(_) => 5,
            Self::DisableBreakpoint(_) => 6,
            Self::Mode(_) => 7,
        }
    }

    /// The full wire line, newline included
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())?;
        match self {
            Self::Resume | Self::Pause | Self::SingleStep => Ok(()),
            Self::AddBreakpoint(bp)
            | Self::RemoveBreakpoint(bp)
            | Self::EnableBreakpoint(bp)
            | Self::DisableBreakpoint(bp) => {
                write!(f, "\t{}\t{}", bp.flow_index, bp.component_index)
            }
            Self::Mode(DebuggerMode::Run) => write!(f, "\t0"),
            Self::Mode(DebuggerMode::Debug) => write!(f, "\t1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<InboundMessage, ProtocolError> {
        let fields: Vec<&str> = line.split('\t').collect();
        InboundMessage::parse(&fields)
    }

    #[test]
    fn test_state_changed() {
        assert_eq!(
            parse("0\t1").unwrap(),
            InboundMessage::StateChanged(RemoteState::Paused)
        );
        assert!(matches!(
            parse("0\t9"),
            Err(ProtocolError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_add_to_queue_without_source() {
        assert_eq!(
            parse("1\t4\t-1\t0\t3\t0\t1024\t4096").unwrap(),
            InboundMessage::AddToQueue {
                flow_state: 4,
                source: None,
                target_component: 3,
                target_input: 0,
                free_memory: 1024,
                total_memory: 4096,
            }
        );
    }

    #[test]
    fn test_add_to_queue_with_source() {
        let InboundMessage::AddToQueue { source, .. } =
            parse("1\t4\t2\t1\t3\t0\t1024\t4096").unwrap()
        else {
            panic!("wrong message");
        };
        assert_eq!(
            source,
            Some(QueueSource {
                component: 2,
                output: 1
            })
        );
    }

    #[test]
    fn test_addresses_are_hex() {
        assert_eq!(
            parse("6\t1f\t42").unwrap(),
            InboundMessage::ValueChanged {
                address: 0x1f,
                value: "42".to_string()
            }
        );
    }

    #[test]
    fn test_flow_state_created_root() {
        assert_eq!(
            parse("7\t1\t0\t-1\t-1").unwrap(),
            InboundMessage::FlowStateCreated {
                flow_state: 1,
                flow: 0,
                parent: None,
                parent_component: None,
            }
        );
    }

    #[test]
    fn test_flow_state_error_message_is_unquoted() {
        assert_eq!(
            parse("10\t1\t2\t\"division\\tby \\\"zero\\\"\"").unwrap(),
            InboundMessage::FlowStateError {
                flow_state: 1,
                component: 2,
                message: "division\tby \"zero\"".to_string(),
            }
        );
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(
            parse("11\t3\t1\t-1\tvoltage set").unwrap(),
            InboundMessage::Log {
                level: LogLevel::Scpi,
                flow_state: 1,
                component: None,
                message: "voltage set".to_string(),
            }
        );
        assert!(parse("11\t6\t1\t-1\tx").is_err());
    }

    #[test]
    fn test_execution_state_is_hex() {
        assert_eq!(
            parse("13\t1\t2\tff").unwrap(),
            InboundMessage::ComponentExecutionStateChanged {
                flow_state: 1,
                component: 2,
                state: 255,
            }
        );
    }

    #[test]
    fn test_missing_value_field() {
        assert_eq!(
            parse("5\t1\t0\t1f"),
            Err(ProtocolError::Arity {
                message: "COMPONENT_INPUT_INIT",
                expected: 4,
                got: 3,
            })
        );
    }

    #[test]
    fn test_bad_type_field() {
        assert_eq!(parse(""), Err(ProtocolError::Empty));
        assert_eq!(
            parse("x\t1"),
            Err(ProtocolError::InvalidType("x".to_string()))
        );
        assert_eq!(parse("15"), Err(ProtocolError::UnknownType(15)));
    }

    #[test]
    fn test_unescape_sequences() {
        assert_eq!(unescape(r"a\tb\nc\\d\x"), "a\tb\nc\\d\\x");
        assert_eq!(unescape(r"\\\t"), "\\\t");
        assert_eq!(unescape(r#"say \"hi\""#), "say \"hi\"");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote(r#""a\tb""#).as_deref(), Some("a\tb"));
        assert_eq!(unquote(r#""""#).as_deref(), Some(""));
        assert_eq!(unquote(r#""unterminated"#), None);
        assert_eq!(unquote(r#""a"b""#), None);
        assert_eq!(unquote(r#""a\""#), None);
        // an escaped backslash right before the closing quote
        assert_eq!(unquote(r#""C:\\""#).as_deref(), Some("C:\\"));
    }

    #[test]
    fn test_outbound_encoding() {
        let bp = BreakpointRef {
            flow_index: 2,
            component_index: 14,
        };
        assert_eq!(OutboundCommand::Resume.encode(), "0\n");
        assert_eq!(OutboundCommand::Pause.encode(), "1\n");
        assert_eq!(OutboundCommand::SingleStep.encode(), "2\n");
        assert_eq!(OutboundCommand::AddBreakpoint(bp).encode(), "3\t2\t14\n");
        assert_eq!(OutboundCommand::RemoveBreakpoint(bp).encode(), "4\t2\t14\n");
        assert_eq!(OutboundCommand::EnableBreakpoint(bp).encode(), "5\t2\t14\n");
        assert_eq!(OutboundCommand::DisableBreakpoint(bp).encode(), "6\t2\t14\n");
        assert_eq!(OutboundCommand::Mode(DebuggerMode::Run).encode(), "7\t0\n");
        assert_eq!(OutboundCommand::Mode(DebuggerMode::Debug).encode(), "7\t1\n");
    }
}
