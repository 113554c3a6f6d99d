//! IO abstraction layer for the debugger connection
//!
//! The flow engine is reached either over a TCP socket (real instruments and
//! the desktop simulator) or over an in-process channel pair (the embedded
//! simulator and tests). [`DebugTransport`] hides the difference from the
//! [`Client`](crate::Client).
//!
//! # Examples
//!
//! ## Using TCP Transport
//!
//! ```no_run
//! use transport::io::TcpTransport;
//! use transport::Client;
//!
//! let transport = TcpTransport::connect("127.0.0.1:3333")?;
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let client = Client::with_transport(transport, tx)?;
//! # Ok::<(), eyre::Error>(())
//! ```
//!
//! ## Using In-Memory Transport for Testing
//!
//! ```
//! use transport::io::InMemoryTransport;
//! use transport::Client;
//!
//! let (client_transport, engine_transport) = InMemoryTransport::pair();
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let client = Client::with_transport(client_transport, tx)?;
//! # Ok::<(), eyre::Error>(())
//! ```

use std::io::{self, Read, Write};

mod memory;
mod tcp;

#[cfg(test)]
mod tests;

pub use memory::{InMemoryCloser, InMemoryReader, InMemoryTransport, InMemoryWriter};
pub use tcp::{ConnectRetry, TcpCloser, TcpTransport};

/// Trait for a bidirectional byte stream to the flow engine
///
/// Implementations split into three independently owned halves:
///
/// - a reader that is moved into the background polling thread
/// - a writer used to send commands
/// - a closer that tears the connection down from any thread
///
/// Readers should return `WouldBlock` (or `TimedOut`) when no data arrives
/// within their poll interval, so the polling thread can notice shutdown
/// requests, and `Ok(0)` once the peer has gone away.
pub trait DebugTransport: Send + 'static {
    /// The reader type
    type Reader: Read + Send + 'static;

    /// The writer type
    type Writer: Write + Send + 'static;

    /// Handle used to close the connection
    type Closer: Close + Send + 'static;

    /// Split the transport into its reader, writer and closer
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be split (e.g., socket cloning fails)
    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer, Self::Closer)>;
}

/// Graceful teardown of a connection
pub trait Close {
    /// Close the connection. Calling this more than once is allowed.
    fn close(&mut self) -> io::Result<()>;
}
