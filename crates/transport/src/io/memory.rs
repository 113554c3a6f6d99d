//! In-memory transport implementation
//!
//! Used for the embedded simulator, where the engine runs in the same
//! process, and for tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{Close, DebugTransport};

/// In-memory transport
///
/// # Examples
///
/// ```
/// use transport::io::InMemoryTransport;
/// use transport::Client;
///
/// // Create a connected pair of transports
/// let (client_transport, engine_transport) = InMemoryTransport::pair();
///
/// // Use client_transport with Client
/// let (tx, rx) = crossbeam_channel::unbounded();
/// let client = Client::with_transport(client_transport, tx)?;
///
/// // Use engine_transport to play the flow engine
/// # Ok::<(), eyre::Error>(())
/// ```
pub struct InMemoryTransport {
    reader: InMemoryReader,
    writer: InMemoryWriter,
    closed: Arc<AtomicBool>,
}

/// Reader half of in-memory transport
///
/// When the channel is empty it returns `WouldBlock` to simulate the read
/// timeout of a socket. A disconnected peer or a closed end reads as EOF.
pub struct InMemoryReader {
    buffer: Cursor<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

/// Writer half of in-memory transport
pub struct InMemoryWriter {
    tx: Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

/// Marks one end of an in-memory pair as closed
pub struct InMemoryCloser {
    closed: Arc<AtomicBool>,
}

impl InMemoryTransport {
    /// Create a connected pair of in-memory transports
    ///
    /// Returns `(client_transport, engine_transport)` where data written to
    /// one can be read from the other.
    pub fn pair() -> (Self, Self) {
        let (client_tx, engine_rx) = crossbeam_channel::unbounded();
        let (engine_tx, client_rx) = crossbeam_channel::unbounded();

        (Self::end(client_rx, client_tx), Self::end(engine_rx, engine_tx))
    }

    fn end(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        Self {
            reader: InMemoryReader {
                buffer: Cursor::new(Vec::new()),
                rx,
                closed: Arc::clone(&closed),
            },
            writer: InMemoryWriter {
                tx,
                closed: Arc::clone(&closed),
            },
            closed,
        }
    }
}

impl DebugTransport for InMemoryTransport {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;
    type Closer = InMemoryCloser;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer, Self::Closer)> {
        let closer = InMemoryCloser {
            closed: self.closed,
        };
        Ok((self.reader, self.writer, closer))
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(0);
        }

        if self.buffer.position() >= self.buffer.get_ref().len() as u64 {
            match self.rx.try_recv() {
                Ok(data) => self.buffer = Cursor::new(data),
                Err(TryRecvError::Empty) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "no data available",
                    ));
                }
                Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }

        self.buffer.read(buf)
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transport closed",
            ));
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for InMemoryCloser {
    fn close(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
