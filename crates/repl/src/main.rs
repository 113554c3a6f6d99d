use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{self, Context};
use crossbeam_channel::Receiver;
use debugger::{
    AssetMap, BreakpointAction, ConnectionParameters, Debugger, Event, StartArguments,
    StaticProject,
};
use tracing_subscriber::filter::EnvFilter;

mod command;

use command::{HELP, ReplCommand};

struct App {
    debugger: Debugger,
    debugger_events: Receiver<Event>,
    input_rx: Receiver<String>,

    #[allow(dead_code)]
    input_thread: JoinHandle<()>,
}

impl App {
    fn new(debugger: Debugger) -> Self {
        let debugger_events = debugger.events();

        // handle input
        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        let input_thread = std::thread::spawn(move || {
            let mut buffer = String::new();
            loop {
                match std::io::stdin().read_line(&mut buffer) {
                    Ok(0) => {
                        // end of input behaves like quitting
                        let _ = input_tx.send("q".to_string());
                        return;
                    }
                    Ok(_) => {
                        let input = buffer.trim().to_owned();
                        if input_tx.send(input).is_err() {
                            return;
                        }
                        buffer.clear();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reading from stdin");
                        return;
                    }
                }
            }
        });

        Self {
            debugger,
            debugger_events,
            input_thread,
            input_rx,
        }
    }

    fn loop_step(&mut self) -> eyre::Result<ShouldQuit> {
        print!("> ");
        std::io::stdout().flush()?;

        crossbeam_channel::select! {
            recv(self.input_rx) -> input => match input {
                Ok(input) => self.handle_input(&input).context("handling command"),
                Err(_) => Ok(ShouldQuit::True),
            },
            recv(self.debugger_events) -> event => match event {
                Ok(event) => self.handle_debugger_event(event).context("handling debugger event"),
                Err(_) => Ok(ShouldQuit::True),
            },
        }
    }

    #[tracing::instrument(skip(self))]
    fn handle_debugger_event(&mut self, event: Event) -> eyre::Result<ShouldQuit> {
        match event {
            Event::Connected => println!("connected"),
            Event::StateChanged(state) => println!("state: {state}"),
            Event::FlowStateCreated { index, flow } => println!("flow state {index} started ({flow})"),
            Event::FlowStateDestroyed { index } => println!("flow state {index} finished"),
            Event::QueueChanged { .. } => {}
            Event::PageSelected { path } => println!("page: {path}"),
            Event::Log(item) => {
                let component = item.component.as_deref().unwrap_or("-");
                println!("[{:?}] {component}: {}", item.kind, item.message);
            }
            Event::Error(message) => println!("error: {message}"),
            Event::EditorModeRequested => println!("engine stopped"),
            Event::TransportClosed => {
                println!("connection closed");
                return Ok(ShouldQuit::True);
            }
            Event::Stopped => {
                println!("session stopped");
                return Ok(ShouldQuit::True);
            }
        }
        Ok(ShouldQuit::False)
    }

    fn handle_input(&mut self, input: &str) -> eyre::Result<ShouldQuit> {
        let command = match input.parse::<ReplCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                return Ok(ShouldQuit::False);
            }
        };

        tracing::debug!(?command, "executing command");
        match command {
            ReplCommand::Continue => self.debugger.resume().context("resuming execution")?,
            ReplCommand::Pause => self.debugger.pause().context("pausing execution")?,
            ReplCommand::Step(mode) => self.debugger.single_step(mode).context("stepping")?,
            ReplCommand::Breakpoint(action, path) => {
                let result = match action {
                    BreakpointAction::Add => self.debugger.add_breakpoint(path),
                    BreakpointAction::Remove => self.debugger.remove_breakpoint(path),
                    BreakpointAction::Enable => self.debugger.enable_breakpoint(path),
                    BreakpointAction::Disable => self.debugger.disable_breakpoint(path),
                };
                if let Err(e) = result {
                    println!("{e:#}");
                }
            }
            ReplCommand::ToggleDebugger => self
                .debugger
                .toggle_debugger()
                .context("toggling debugger")?,
            ReplCommand::State => {
                let snapshot = self.debugger.snapshot()?;
                println!("state: {}", snapshot.state);
                if let Some(page) = &snapshot.selected_page {
                    println!("page: {page}");
                }
                if let Some(error) = &snapshot.error {
                    println!("error: {error}");
                }
                println!(
                    "memory: {} free of {}",
                    snapshot.memory.free, snapshot.memory.total
                );
                for (name, value) in &snapshot.globals {
                    println!("{name} = {value}");
                }
                for task in &snapshot.queue {
                    println!("queued: {}", task.component);
                }
            }
            ReplCommand::Dump => println!("{}", self.debugger.snapshot()?.to_json()?),
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => return Ok(ShouldQuit::True),
            ReplCommand::Empty => {}
        }
        Ok(ShouldQuit::False)
    }
}

#[derive(Debug, Parser)]
struct Args {
    /// Asset map of the running application (JSON)
    #[clap(long)]
    assets: PathBuf,

    /// Project description (JSON)
    #[clap(long)]
    project: PathBuf,

    #[clap(long)]
    host: Option<String>,

    #[clap(short, long)]
    port: Option<u16>,

    /// Start in debug mode
    #[clap(short, long)]
    debug: bool,

    /// Resume once when the engine first pauses
    #[clap(long)]
    resume_at_start: bool,

    /// Configuration file, instead of the default location
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Component paths to break at
    #[clap(short, long)]
    breakpoints: Vec<String>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
    .context("loading configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.debug {
        config.debugger_active = true;
    }
    tracing::debug!(?config, "resolved configuration");

    let assets = AssetMap::from_path(&args.assets).context("loading asset map")?;
    let project = StaticProject::from_path(&args.project).context("loading project")?;

    let mut options = config.session_options();
    options.resume_at_start = args.resume_at_start;

    let debugger = Debugger::start(StartArguments {
        connection: ConnectionParameters::Tcp {
            host: config.host.clone(),
            port: config.port,
            retry: config.connect_retry(),
        },
        assets,
        project: Arc::new(project),
        module: None,
        options,
    })
    .context("creating debugger")?;
    debugger.wait_for_event(Duration::from_secs(5), |event| {
        matches!(event, Event::Connected)
    })?;

    for breakpoint in args.breakpoints {
        tracing::debug!(%breakpoint, "adding breakpoint");
        debugger
            .add_breakpoint(breakpoint)
            .context("adding breakpoint")?;
    }
    tracing::debug!("breakpoints added");

    let mut app = App::new(debugger);
    loop {
        match app.loop_step() {
            Ok(ShouldQuit::True) => break,
            Ok(ShouldQuit::False) => {}
            Err(e) => eyre::bail!("Error running command: {e}"),
        }
    }

    Ok(())
}

enum ShouldQuit {
    True,
    False,
}
