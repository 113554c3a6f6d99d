//! TCP-based transport implementation

use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use eyre::{Context, Result};
use retry::{delay::Fixed, retry};

use super::{Close, DebugTransport};

/// How often, and how patiently, to try reaching the debugger port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    pub attempts: usize,
    pub backoff: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_millis(100),
        }
    }
}

/// TCP-based debugger transport
///
/// # Timeout Behavior
///
/// The reader is configured with a 1-second read timeout to enable
/// periodic checking of shutdown signals in the background polling thread.
///
/// # Examples
///
/// ```no_run
/// use transport::io::TcpTransport;
///
/// let transport = TcpTransport::connect("127.0.0.1:3333")?;
/// # Ok::<(), eyre::Error>(())
/// ```
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Create a new TCP transport from an existing stream
    ///
    /// # Errors
    ///
    /// Returns an error if configuring the socket fails
    pub fn new(stream: TcpStream) -> Result<Self> {
        // Set read timeout for WouldBlock behavior in polling loop
        stream
            .set_read_timeout(Some(Duration::from_secs(1)))
            .context("setting read timeout on TCP stream")?;
        stream
            .set_nodelay(true)
            .context("disabling Nagle on TCP stream")?;
        Ok(Self { stream })
    }

    /// Connect to a debugger port with a single attempt
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).context("connecting to debugger port")?;
        Self::new(stream)
    }

    /// Connect to a debugger port, retrying while the engine starts up
    ///
    /// The engine usually opens its port a moment after it has been launched,
    /// so refused connections are retried with a fixed delay.
    ///
    /// ```no_run
    /// use transport::io::{ConnectRetry, TcpTransport};
    ///
    /// let transport = TcpTransport::connect_with_retry(("127.0.0.1", 3333), ConnectRetry::default())?;
    /// # Ok::<(), eyre::Error>(())
    /// ```
    pub fn connect_with_retry<A>(addr: A, policy: ConnectRetry) -> Result<Self>
    where
        A: ToSocketAddrs + Clone,
    {
        let backoff_ms = u64::try_from(policy.backoff.as_millis()).unwrap_or(u64::MAX);
        let delays = Fixed::from_millis(backoff_ms).take(policy.attempts.saturating_sub(1));
        let stream = retry(delays, || {
            tracing::debug!("trying to make connection");
            match TcpStream::connect(addr.clone()) {
                Ok(stream) => {
                    tracing::debug!("connection made");
                    Ok(stream)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "error making connection");
                    Err(e)
                }
            }
        })
        .wrap_err("failed to connect to debugger port")?;

        Self::new(stream)
    }
}

impl DebugTransport for TcpTransport {
    type Reader = TcpStream;
    type Writer = TcpStream;
    type Closer = TcpCloser;

    fn split(self) -> Result<(Self::Reader, Self::Writer, Self::Closer)> {
        let input = self
            .stream
            .try_clone()
            .context("cloning TCP stream for reader")?;
        let closer = TcpCloser {
            stream: self
                .stream
                .try_clone()
                .context("cloning TCP stream for closer")?,
        };
        Ok((input, self.stream, closer))
    }
}

/// Closes both directions of a TCP connection
pub struct TcpCloser {
    stream: TcpStream,
}

impl Close for TcpCloser {
    fn close(&mut self) -> io::Result<()> {
        // half-close first so the engine sees a clean FIN before the reset
        if !cfg!(windows) {
            ignore_not_connected(self.stream.shutdown(Shutdown::Write))?;
        }
        ignore_not_connected(self.stream.shutdown(Shutdown::Both))
    }
}

fn ignore_not_connected(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}
