//! Transport to the monitor.
//!
//! A [`CommandChannel`] is deliberately thin: it writes command bytes, hands
//! back whatever bytes have arrived, and can wait for one CRLF-terminated
//! line. It does not correlate commands with responses; that ordering is the
//! caller's job (see [`crate::session::Session`]).

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::errors::{is_transient_io, HrvError, Result};
use crate::protocol::{find_delimiter, DELIMITER};

/// Size of a single transport read.
const READ_CHUNK: usize = 4096;

/// Pause after a read that produced nothing, for transports that return
/// immediately instead of honouring a read timeout.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

// ============================================================================
// Transport Abstraction
// ============================================================================

/// Trait for Read + Write + Send, allowing different transport backends.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Shared flag used to close a channel from another thread.
///
/// Once closed, every read on the owning channel fails with
/// [`HrvError::Closed`] at its next poll, so a producer blocked in a read
/// exits instead of retrying.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("channel close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Byte-level command/response transport.
pub trait CommandChannel {
    /// Write raw command bytes. Fire-and-forget: the device never acknowledges.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Return whatever bytes are currently buffered, waiting at most one
    /// short poll. An empty vector is not an error.
    fn read_available(&mut self) -> Result<Vec<u8>>;

    /// Wait up to `timeout` for one CRLF-terminated line (returned without
    /// the delimiter). `Ok(None)` means nothing complete arrived in time.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Handle that closes this channel from elsewhere.
    fn close_handle(&self) -> CloseHandle;
}

// ============================================================================
// Serial Channel
// ============================================================================

/// [`CommandChannel`] over a serial port or any other byte stream.
///
/// # Example
/// ```ignore
/// let mut channel = SerialChannel::open("/dev/ttyACM0", 115200, Duration::from_millis(50))?;
/// channel.send(&Command::Rmssd.encode())?;
/// let line = channel.read_line(Duration::from_secs(2))?;
/// ```
pub struct SerialChannel {
    transport: Box<dyn Transport>,
    /// Bytes received but not yet handed out.
    pending: Vec<u8>,
    close: CloseHandle,
}

impl SerialChannel {
    /// Open a serial device.
    ///
    /// `poll_timeout` bounds each underlying read, and therefore how quickly
    /// [`CloseHandle::close`] takes effect.
    pub fn open(path: &str, baud_rate: u32, poll_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(poll_timeout)
            .open()?;
        info!("serial port open: path={}, baud={}", path, baud_rate);
        Ok(Self::from_transport(Box::new(port)))
    }

    /// Wrap an already-open byte stream.
    pub fn from_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Vec::new(),
            close: CloseHandle::new(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.close.is_closed() {
            Err(HrvError::Closed)
        } else {
            Ok(())
        }
    }

    /// One transport read into `pending`. Returns the number of new bytes.
    fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.transport.read(&mut chunk) {
            Ok(0) => Err(HrvError::Disconnected),
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if is_transient_io(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Split the first complete line off `pending`.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = find_delimiter(&self.pending)?;
        let mut line: Vec<u8> = self.pending.drain(..pos + DELIMITER.len()).collect();
        line.truncate(pos);
        Some(line)
    }
}

impl CommandChannel for SerialChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if self.pending.is_empty() && self.fill()? == 0 {
            self.ensure_open()?;
            thread::sleep(IDLE_BACKOFF);
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if self.fill()? == 0 {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }

    fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }
}
