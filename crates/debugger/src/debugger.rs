use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use eyre::WrapErr;
use transport::{
    Client, TransportEvent,
    io::{ConnectRetry, InMemoryTransport, TcpTransport},
};

use crate::{
    AssetMap, Event, MirrorSnapshot, Project, RuntimeModule, SessionOptions, SingleStepMode,
    commands::{Command, Control},
    session::{BreakpointAction, Session},
};

/// Where the engine is reachable
pub enum ConnectionParameters {
    /// Instrument or engine listening on a TCP port
    Tcp {
        host: String,
        port: u16,
        retry: ConnectRetry,
    },

    /// Engine running in process, spoken to through a channel pair
    Simulator(InMemoryTransport),
}

impl std::fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port, retry } => f
                .debug_struct("Tcp")
                .field("host", host)
                .field("port", port)
                .field("retry", retry)
                .finish(),
            Self::Simulator(_) => f.write_str("Simulator"),
        }
    }
}

/// Everything needed to start debugging a running engine
pub struct StartArguments {
    pub connection: ConnectionParameters,
    pub assets: AssetMap,
    pub project: Arc<dyn Project>,
    /// Only available when the engine runs in process
    pub module: Option<Arc<dyn RuntimeModule>>,
    pub options: SessionOptions,
}

/// Represents a debugging session
///
/// The session itself lives on a background thread which owns the mirror
/// and applies engine messages and control requests one at a time. The
/// handle talks to it through channels.
pub struct Debugger {
    events: crossbeam_channel::Receiver<Event>,
    command_tx: crossbeam_channel::Sender<Command>,
    background: Option<JoinHandle<()>>,
}

impl Debugger {
    /// Connect to the engine and start the session thread
    #[tracing::instrument(skip(arguments), fields(connection = ?arguments.connection))]
    pub fn start(arguments: StartArguments) -> eyre::Result<Self> {
        let StartArguments {
            connection,
            assets,
            project,
            module,
            options,
        } = arguments;

        let (event_tx, events) = crossbeam_channel::unbounded();
        let (transport_tx, transport_rx) = crossbeam_channel::unbounded();

        let client = match connection {
            ConnectionParameters::Tcp { host, port, retry } => {
                let transport = TcpTransport::connect_with_retry((host.as_str(), port), retry)
                    .wrap_err_with(|| format!("connecting to {host}:{port}"))?;
                Client::with_transport(transport, transport_tx)
            }
            ConnectionParameters::Simulator(transport) => {
                Client::with_transport(transport, transport_tx)
            }
        }
        .wrap_err("creating debugger client")?;

        let mut session = Session::new(assets, project, module, options, event_tx);
        session
            .start(Box::new(client))
            .wrap_err("starting debugging session")?;

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let background = thread::Builder::new()
            .name("flowdbg-session".to_string())
            .spawn(move || background_thread_loop(session, transport_rx, command_rx))
            .wrap_err("spawning session thread")?;

        Ok(Self {
            events,
            command_tx,
            background: Some(background),
        })
    }

    /// Subscribe to session events
    pub fn events(&self) -> crossbeam_channel::Receiver<Event> {
        self.events.clone()
    }

    /// Block until an event matching `pred` arrives
    pub fn wait_for_event<F>(&self, timeout: Duration, pred: F) -> eyre::Result<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let event = self
                .events
                .recv_deadline(deadline)
                .wrap_err("waiting for debugger event")?;
            tracing::trace!(?event, "received event");
            if pred(&event) {
                return Ok(event);
            }
        }
    }

    pub fn resume(&self) -> eyre::Result<()> {
        self.control(Control::Resume)
    }

    pub fn pause(&self) -> eyre::Result<()> {
        self.control(Control::Pause)
    }

    pub fn single_step(&self, mode: SingleStepMode) -> eyre::Result<()> {
        self.control(Control::SingleStep(Some(mode)))
    }

    /// Switch between run mode and debug mode
    pub fn toggle_debugger(&self) -> eyre::Result<()> {
        self.control(Control::ToggleDebugger)
    }

    pub fn add_breakpoint(&self, component_path: impl Into<String>) -> eyre::Result<()> {
        self.breakpoint(BreakpointAction::Add, component_path.into())
    }

    pub fn remove_breakpoint(&self, component_path: impl Into<String>) -> eyre::Result<()> {
        self.breakpoint(BreakpointAction::Remove, component_path.into())
    }

    pub fn enable_breakpoint(&self, component_path: impl Into<String>) -> eyre::Result<()> {
        self.breakpoint(BreakpointAction::Enable, component_path.into())
    }

    pub fn disable_breakpoint(&self, component_path: impl Into<String>) -> eyre::Result<()> {
        self.breakpoint(BreakpointAction::Disable, component_path.into())
    }

    /// Stop the session, the background thread keeps answering snapshots
    pub fn stop(&self) -> eyre::Result<()> {
        self.control(Control::Stop)
    }

    pub fn snapshot(&self) -> eyre::Result<MirrorSnapshot> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Snapshot(response_tx))
            .map_err(|_| eyre::eyre!("session thread has exited"))?;
        response_rx
            .recv()
            .wrap_err("session thread dropped the snapshot request")
    }

    fn breakpoint(&self, action: BreakpointAction, path: String) -> eyre::Result<()> {
        self.control(Control::Breakpoint(action, path))
    }

    fn control(&self, control: Control) -> eyre::Result<()> {
        tracing::debug!(?control, "sending control request");
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Control {
                control,
                response_tx,
            })
            .map_err(|_| eyre::eyre!("session thread has exited"))?;
        response_rx
            .recv()
            .wrap_err("session thread dropped the control request")?
            .wrap_err("applying control request")
    }
}

/// Owns the session, applying engine traffic and requests in arrival order
fn background_thread_loop(
    mut session: Session,
    transport_rx: crossbeam_channel::Receiver<TransportEvent>,
    command_rx: crossbeam_channel::Receiver<Command>,
) {
    let mut transport_rx = transport_rx;
    loop {
        let mut reader_finished = false;
        crossbeam_channel::select! {
            recv(transport_rx) -> event => match event {
                Ok(event) => session.on_transport_event(event),
                Err(_) => reader_finished = true,
            },
            recv(command_rx) -> command => match command {
                Ok(Command::Control { control, response_tx }) => {
                    let _ = response_tx.send(control.apply(&mut session));
                }
                Ok(Command::Snapshot(response_tx)) => {
                    let _ = response_tx.send(session.snapshot());
                }
                Ok(Command::Shutdown) => {
                    tracing::debug!("received shutdown command");
                    break;
                }
                Err(_) => {
                    tracing::debug!("command channel closed, terminating background thread");
                    break;
                }
            },
        }

        if reader_finished {
            tracing::debug!("transport reader finished");
            transport_rx = crossbeam_channel::never();
        }
    }

    session.stop(false);
    tracing::debug!("background thread terminated");
}

impl Drop for Debugger {
    fn drop(&mut self) {
        tracing::debug!("dropping debugger");
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(background) = self.background.take() {
            if background.join().is_err() {
                tracing::warn!("session thread panicked");
            }
        }
    }
}
