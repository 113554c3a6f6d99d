//! Integration tests for the client over the in-memory transport

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use eyre::Result;
use transport::{
    BreakpointRef, Client, CommandSink, DebuggerMode, Framer, InboundMessage, OutboundCommand,
    RemoteState, TransportError, TransportEvent,
    io::{DebugTransport, InMemoryReader, InMemoryTransport},
};

#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .json()
            .try_init();
    }
    let _ = color_eyre::install();
}

/// Read from the engine side until `n` newline-terminated lines arrived
fn read_lines(reader: &mut InMemoryReader, n: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while received.iter().filter(|b| **b == b'\n').count() < n {
        assert!(Instant::now() < deadline, "timed out waiting for commands");
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => received.extend_from_slice(&buf[..len]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    String::from_utf8(received)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_commands_reach_engine() -> Result<()> {
    let (client_transport, engine_transport) = InMemoryTransport::pair();
    let (event_tx, _event_rx) = crossbeam_channel::unbounded();
    let client = Client::with_transport(client_transport, event_tx)?;
    let (mut engine_reader, _engine_writer, _) = engine_transport.split()?;

    client.send(&OutboundCommand::Mode(DebuggerMode::Debug))?;
    client.send(&OutboundCommand::AddBreakpoint(BreakpointRef {
        flow_index: 1,
        component_index: 3,
    }))?;
    client.send_command(&OutboundCommand::Resume)?;

    assert_eq!(
        read_lines(&mut engine_reader, 3),
        vec!["7\t1", "3\t1\t3", "0"]
    );
    Ok(())
}

#[test]
fn test_engine_bytes_are_forwarded() -> Result<()> {
    let (client_transport, engine_transport) = InMemoryTransport::pair();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let _client = Client::with_transport(client_transport, event_tx)?;
    let (_engine_reader, mut engine_writer, _) = engine_transport.split()?;

    engine_writer.write_all(b"0\t")?;
    engine_writer.write_all(b"1\n7\t1\t0\t-1\t-1\n")?;

    let mut framer = Framer::new();
    let mut messages = Vec::new();
    while messages.len() < 2 {
        match event_rx.recv_timeout(Duration::from_secs(5))? {
            TransportEvent::Data(bytes) => {
                for frame in framer.feed(&bytes) {
                    messages.push(frame.parse()?);
                }
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(messages[0], InboundMessage::StateChanged(RemoteState::Paused));
    assert!(matches!(
        messages[1],
        InboundMessage::FlowStateCreated { flow_state: 1, .. }
    ));
    Ok(())
}

#[test]
fn test_engine_disconnect_is_reported() -> Result<()> {
    let (client_transport, engine_transport) = InMemoryTransport::pair();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let _client = Client::with_transport(client_transport, event_tx)?;

    drop(engine_transport);

    let event = event_rx.recv_timeout(Duration::from_secs(5))?;
    assert!(matches!(event, TransportEvent::Closed));
    Ok(())
}

#[test]
fn test_send_after_stop_fails() -> Result<()> {
    let (client_transport, _engine_transport) = InMemoryTransport::pair();
    let (event_tx, _event_rx) = crossbeam_channel::unbounded();
    let client = Client::with_transport(client_transport, event_tx)?;

    assert!(client.is_connected());
    client.stop();
    client.stop();
    assert!(!client.is_connected());

    let err = client.send(&OutboundCommand::Pause).unwrap_err();
    assert!(matches!(err, TransportError::ConnectionClosed));
    Ok(())
}

#[test]
fn test_channel_sink() {
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send_command(&OutboundCommand::SingleStep).unwrap();
    assert_eq!(rx.recv().unwrap(), OutboundCommand::SingleStep);

    drop(rx);
    assert!(matches!(
        tx.send_command(&OutboundCommand::Pause),
        Err(TransportError::ConnectionClosed)
    ));
}
