use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use eyre::{Context, Result};

use crate::error::TransportError;
use crate::io::{Close, DebugTransport};
use crate::message::OutboundCommand;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What the background reader observed on the connection
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw bytes, not necessarily aligned to message boundaries
    Data(Bytes),
    /// The engine closed the connection
    Closed,
    /// The connection failed
    Error(io::Error),
}

/// Anything that can deliver outbound commands to the engine
pub trait CommandSink: Send {
    fn send_command(&self, command: &OutboundCommand) -> Result<(), TransportError>;

    /// Tear down the underlying channel
    fn stop(&self) {}
}

struct ClientInternals {
    // None once the adapter has been stopped
    output: Option<Box<dyn Write + Send>>,
    closer: Option<Box<dyn Close + Send>>,

    // Option because of drop and take
    exit: Option<oneshot::Sender<()>>,
}

/// Debugger connection to a flow engine
pub struct Client {
    internals: Mutex<ClientInternals>,
}

impl Client {
    /// Create a new client over any [`DebugTransport`]
    ///
    /// Inbound bytes are forwarded to `events` from a background thread.
    ///
    /// ```
    /// use transport::{Client, io::InMemoryTransport};
    ///
    /// let (client_transport, engine_transport) = InMemoryTransport::pair();
    /// let (tx, rx) = crossbeam_channel::unbounded();
    /// let client = Client::with_transport(client_transport, tx)?;
    /// # Ok::<(), eyre::Error>(())
    /// ```
    pub fn with_transport<T>(
        transport: T,
        events: crossbeam_channel::Sender<TransportEvent>,
    ) -> Result<Self>
    where
        T: DebugTransport,
    {
        let (input, output, closer) = transport.split()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        thread::Builder::new()
            .name("flowdbg-reader".to_string())
            .spawn(move || poll_loop(input, events, shutdown_rx))
            .wrap_err("spawning transport reader thread")?;

        let internals = ClientInternals {
            output: Some(Box::new(output)),
            closer: Some(Box::new(closer)),
            exit: Some(shutdown_tx),
        };

        Ok(Self {
            internals: Mutex::new(internals),
        })
    }

    /// Write one command to the engine
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn send(&self, command: &OutboundCommand) -> Result<(), TransportError> {
        with_lock("Client.internals", &self.internals, |mut internals| {
            internals.send(command)
        })
    }

    /// Close the connection and stop the reader thread
    ///
    /// Safe to call any number of times.
    pub fn stop(&self) {
        with_lock("Client.internals", &self.internals, |mut internals| {
            internals.stop()
        })
    }

    pub fn is_connected(&self) -> bool {
        with_lock("Client.internals", &self.internals, |internals| {
            internals.output.is_some()
        })
    }
}

impl CommandSink for Client {
    fn send_command(&self, command: &OutboundCommand) -> Result<(), TransportError> {
        self.send(command)
    }

    fn stop(&self) {
        Client::stop(self)
    }
}

impl CommandSink for crossbeam_channel::Sender<OutboundCommand> {
    fn send_command(&self, command: &OutboundCommand) -> Result<(), TransportError> {
        self.send(*command)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

fn with_lock<T, F, R>(name: &str, lock: &Mutex<T>, f: F) -> R
where
    F: FnOnce(MutexGuard<'_, T>) -> R,
{
    tracing::trace!(%name, "taking lock");
    let inner = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let res = f(inner);
    tracing::trace!(%name, "releasing lock");
    res
}

impl ClientInternals {
    fn send(&mut self, command: &OutboundCommand) -> Result<(), TransportError> {
        let Some(output) = self.output.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };
        let line = command.encode();
        tracing::debug!(command = %command, "sending command");

        let written = output
            .write_all(line.as_bytes())
            .and_then(|_| output.flush());
        if let Err(e) = written {
            log_connection_error(&e);
            self.stop();
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(exit) = self.exit.take() {
            tracing::debug!("shutting down client");
            let _ = exit.send(());
        }
        self.output = None;
        if let Some(mut closer) = self.closer.take() {
            if let Err(e) = closer.close() {
                tracing::debug!(error = %e, "error closing connection");
            }
        }
    }
}

impl Drop for ClientInternals {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop<R: Read>(
    mut input: R,
    events: crossbeam_channel::Sender<TransportEvent>,
    shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        // check for shutdown
        match shutdown_rx.try_recv() {
            Ok(_) => return,
            Err(oneshot::TryRecvError::Empty) => {}
            Err(oneshot::TryRecvError::Disconnected) => {
                tracing::debug!("shutdown sender closed");
                return;
            }
        }

        match input.read(&mut buf) {
            Ok(0) => {
                if shutdown_rx.try_recv().is_ok() {
                    return;
                }
                tracing::debug!("connection closed by engine");
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Ok(n) => {
                tracing::trace!(bytes = n, "received data");
                if events
                    .send(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    return;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                thread::sleep(IDLE_POLL_INTERVAL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log_connection_error(&e);
                let _ = events.send(TransportEvent::Error(e));
                return;
            }
        }
    }
}

fn log_connection_error(e: &io::Error) {
    match e.kind() {
        io::ErrorKind::ConnectionReset => {
            tracing::error!(error = %e, "connection was forcibly closed by the remote host")
        }
        io::ErrorKind::ConnectionRefused => {
            tracing::error!(error = %e, "target actively refused the connection")
        }
        _ => tracing::error!(error = %e, "transport error"),
    }
}
