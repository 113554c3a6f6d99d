use std::io::{IsTerminal, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use debugger::{
    AssetMap, ConnectionParameters, Debugger, Event, MirrorSnapshot, RuntimeState,
    SessionOptions, SingleStepMode, StartArguments, StaticProject,
};
use eyre::WrapErr;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use transport::io::{DebugTransport, InMemoryReader, InMemoryTransport, InMemoryWriter};

const ASSETS: &str = include_str!("fixtures/assets.json");
const PROJECT: &str = include_str!("fixtures/project.json");
const TIMEOUT: Duration = Duration::from_secs(5);

#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }
    let _ = color_eyre::install();
}

/// The engine side of an in-memory connection
struct Engine {
    reader: InMemoryReader,
    writer: InMemoryWriter,
    pending: Vec<u8>,
}

impl Engine {
    /// Read the next `n` command lines sent by the debugger
    fn commands(&mut self, n: usize) -> Vec<String> {
        let deadline = Instant::now() + TIMEOUT;
        let mut buf = [0u8; 256];
        while self.pending.iter().filter(|b| **b == b'\n').count() < n {
            assert!(Instant::now() < deadline, "timed out waiting for commands");
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(len) => self.pending.extend_from_slice(&buf[..len]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1))
                }
                Err(e) => panic!("read failed: {e}"),
            }
        }

        let mut lines = Vec::new();
        for _ in 0..n {
            let Some(end) = self.pending.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).unwrap();
        self.writer.flush().unwrap();
    }
}

fn start(options: SessionOptions) -> eyre::Result<(Debugger, Engine)> {
    let (client_transport, engine_transport) = InMemoryTransport::pair();
    let (reader, writer, _closer) = engine_transport.split()?;

    let debugger = Debugger::start(StartArguments {
        connection: ConnectionParameters::Simulator(client_transport),
        assets: AssetMap::from_json(ASSETS)?,
        project: Arc::new(StaticProject::from_json(PROJECT)?),
        module: None,
        options,
    })
    .wrap_err("starting debugger")?;

    Ok((
        debugger,
        Engine {
            reader,
            writer,
            pending: Vec::new(),
        },
    ))
}

/// Poll snapshots until `pred` holds
fn wait_for_snapshot<F>(debugger: &Debugger, pred: F) -> eyre::Result<MirrorSnapshot>
where
    F: Fn(&MirrorSnapshot) -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let snapshot = debugger.snapshot()?;
        if pred(&snapshot) {
            return Ok(snapshot);
        }
        eyre::ensure!(Instant::now() < deadline, "timed out waiting for snapshot");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_run_mode_session() -> eyre::Result<()> {
    let (debugger, mut engine) = start(SessionOptions::default())?;
    assert_eq!(engine.commands(2), vec!["7\t0", "0"]);

    engine.send("7\t1\t1\t-1\t-1\n3\t0\t10\t7\n");
    let event = debugger.wait_for_event(TIMEOUT, |e| matches!(e, Event::FlowStateCreated { .. }))?;
    assert_eq!(
        event,
        Event::FlowStateCreated {
            index: 1,
            flow: "/flows/measure".to_string()
        }
    );

    let snapshot = wait_for_snapshot(&debugger, |s| s.globals.contains_key("counter"))?;
    assert_eq!(snapshot.globals["counter"], json!(7.0));

    // split across writes
    engine.send("6\t1");
    engine.send("0\t8\n");
    let snapshot = wait_for_snapshot(&debugger, |s| s.globals["counter"] == json!(8.0))?;
    assert_eq!(snapshot.state, RuntimeState::StartingWithoutDebugger);

    debugger.add_breakpoint("/flows/measure/components/log")?;
    assert_eq!(engine.commands(1), vec!["3\t1\t2"]);

    assert!(debugger.add_breakpoint("/nowhere").is_err());
    Ok(())
}

#[test]
fn test_debug_mode_session() -> eyre::Result<()> {
    let (debugger, mut engine) = start(SessionOptions {
        debugger_active: true,
        ..Default::default()
    })?;
    assert_eq!(engine.commands(1), vec!["7\t1"]);

    engine.send("7\t1\t1\t-1\t-1\n1\t1\t-1\t0\t0\t0\t100\t200\n0\t1\n");
    debugger.wait_for_event(TIMEOUT, |e| *e == Event::StateChanged(RuntimeState::Paused))?;

    let snapshot = debugger.snapshot()?;
    assert_eq!(snapshot.queue.len(), 1);
    assert_eq!(snapshot.queue[0].component, "/flows/measure/components/start");
    assert_eq!(snapshot.selected_flow_state, Some(snapshot.queue[0].flow_state));

    debugger.single_step(SingleStepMode::StepInto)?;
    assert_eq!(engine.commands(1), vec!["2"]);

    debugger.resume()?;
    assert_eq!(engine.commands(1), vec!["0"]);
    engine.send("0\t0\n");
    debugger.wait_for_event(TIMEOUT, |e| *e == Event::StateChanged(RuntimeState::Resumed))?;

    engine.send("0\t3\n");
    debugger.wait_for_event(TIMEOUT, |e| *e == Event::EditorModeRequested)?;
    let snapshot = wait_for_snapshot(&debugger, |s| s.state == RuntimeState::Stopped)?;
    assert!(snapshot.error.is_none());
    Ok(())
}

#[test]
fn test_engine_disconnect_is_reported() -> eyre::Result<()> {
    let (debugger, engine) = start(SessionOptions::default())?;
    drop(engine);

    debugger.wait_for_event(TIMEOUT, |e| *e == Event::TransportClosed)?;
    // the session thread keeps answering
    debugger.snapshot()?;
    Ok(())
}

#[test]
fn test_stop_notifies() -> eyre::Result<()> {
    let (debugger, mut engine) = start(SessionOptions::default())?;
    engine.commands(2);

    debugger.stop()?;
    debugger.wait_for_event(TIMEOUT, |e| *e == Event::Stopped)?;
    assert_eq!(debugger.snapshot()?.state, RuntimeState::Stopped);
    Ok(())
}
