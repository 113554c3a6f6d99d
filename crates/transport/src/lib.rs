//! Transport layer of the flow engine remote debugger
//!
//! Moves bytes between the editor and a running engine ([`io`], [`Client`]),
//! cuts the stream into lines ([`framer`]) and gives those lines a typed
//! shape ([`message`]).

mod client;
mod error;
pub mod framer;
pub mod io;
pub mod message;

pub use client::{Client, CommandSink, TransportEvent};
pub use error::{ProtocolError, TransportError};
pub use framer::{Frame, Framer};
pub use message::{BreakpointRef, DebuggerMode, InboundMessage, OutboundCommand, RemoteState};

/// TCP port the engine listens on for debugger connections
pub const DEFAULT_DEBUGGER_PORT: u16 = 3333;
