//! CRLF framing of the device byte stream.
//!
//! The demuxer owns one accumulation buffer for the whole session. Chunks are
//! appended as they arrive; everything up to the last delimiter is settled and
//! split into frames, everything after it stays in the buffer verbatim until
//! more bytes complete it. A frame is therefore never emitted before its
//! delimiter has been seen, regardless of how the stream was chunked.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::channel::CommandChannel;
use crate::errors::{HrvError, Result};
use crate::protocol::{find_delimiter, rfind_delimiter, Sentinel, DELIMITER};

/// One complete, non-empty line received from the device, without its delimiter.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Frame(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Frame text with surrounding whitespace removed.
    ///
    /// Fails with `ProtocolParse` when the frame is not UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.0)
            .map(str::trim)
            .map_err(|_| HrvError::ProtocolParse(format!("frame is not text: {:?}", self)))
    }

    pub fn sentinel(&self) -> Option<Sentinel> {
        Sentinel::from_frame(&self.0)
    }

    pub fn is(&self, sentinel: Sentinel) -> bool {
        self.0 == sentinel.as_bytes()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame(s.as_bytes().to_vec())
    }
}

/// Splits a byte stream into [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameDemuxer {
    /// Unsettled bytes after the last delimiter seen, plus any settled frames
    /// returned after a sentinel stop.
    buf: Vec<u8>,
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held back.
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }

    /// Append a chunk and return every frame it completed, in order.
    ///
    /// Empty frames (consecutive delimiters) are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let Some(last) = rfind_delimiter(&self.buf) else {
            return Vec::new();
        };

        let rest = self.buf.split_off(last + DELIMITER.len());
        let settled = std::mem::replace(&mut self.buf, rest);
        split_frames(&settled)
    }

    /// Pop one complete frame already sitting in the buffer.
    fn pop_buffered(&mut self) -> Option<Frame> {
        loop {
            let pos = find_delimiter(&self.buf)?;
            let mut line: Vec<u8> = self.buf.drain(..pos + DELIMITER.len()).collect();
            line.truncate(pos);
            if !line.is_empty() {
                return Some(Frame(line));
            }
        }
    }

    /// Put frames back at the front of the buffer, ahead of the unsettled tail.
    fn unread(&mut self, frames: &[Frame]) {
        if frames.is_empty() {
            return;
        }
        let mut restored = Vec::new();
        for frame in frames {
            restored.extend_from_slice(frame.as_bytes());
            restored.extend_from_slice(DELIMITER);
        }
        restored.extend_from_slice(&self.buf);
        self.buf = restored;
    }

    /// Read from `channel` until a frame equal to `sentinel` is framed.
    ///
    /// Returns every non-empty frame up to and including the sentinel, and
    /// calls `on_frame` for each of them in the same order as they are framed.
    /// Frames completed after the sentinel stay buffered for the next phase.
    ///
    /// The demuxer itself waits forever on a silent stream; `idle_timeout`
    /// is the caller's bound on how long no byte at all may arrive.
    pub fn run_until<C, F>(
        &mut self,
        channel: &mut C,
        sentinel: Sentinel,
        idle_timeout: Option<Duration>,
        mut on_frame: F,
    ) -> Result<Vec<Frame>>
    where
        C: CommandChannel + ?Sized,
        F: FnMut(&Frame) -> Result<()>,
    {
        let mut frames = Vec::new();

        // Frames left over from a previous phase come first.
        let mut ready = Vec::new();
        while let Some(frame) = self.pop_buffered() {
            ready.push(frame);
        }

        let mut last_activity = Instant::now();
        loop {
            let mut pending = ready.into_iter();
            while let Some(frame) = pending.next() {
                on_frame(&frame)?;
                let done = frame.is(sentinel);
                frames.push(frame);
                if done {
                    let unread: Vec<Frame> = pending.collect();
                    if !unread.is_empty() {
                        trace!("{} frame(s) held after {}", unread.len(), sentinel);
                    }
                    self.unread(&unread);
                    debug!("framing stopped at {}: frames={}", sentinel, frames.len());
                    return Ok(frames);
                }
            }

            let chunk = channel.read_available()?;
            if chunk.is_empty() {
                if let Some(limit) = idle_timeout {
                    if last_activity.elapsed() >= limit {
                        return Err(HrvError::Timeout(format!(
                            "no data for {:?} while waiting for {:?}",
                            limit,
                            sentinel.as_str()
                        )));
                    }
                }
                ready = Vec::new();
                continue;
            }
            last_activity = Instant::now();
            ready = self.push(&chunk);
        }
    }

    /// Read one frame, waiting at most `timeout`.
    ///
    /// Buffered frames are served first. With nothing buffered the line read
    /// is delegated to the channel; with only a partial line buffered, bytes
    /// are pulled until it completes.
    pub fn next_frame<C>(&mut self, channel: &mut C, timeout: Duration) -> Result<Option<Frame>>
    where
        C: CommandChannel + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.pop_buffered() {
                return Ok(Some(frame));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            if self.buf.is_empty() {
                match channel.read_line(deadline - now)? {
                    Some(line) if line.is_empty() => continue,
                    Some(line) => return Ok(Some(Frame(line))),
                    None => return Ok(None),
                }
            }

            let chunk = channel.read_available()?;
            self.buf.extend_from_slice(&chunk);
        }
    }
}

fn split_frames(settled: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut rest = settled;
    while let Some(pos) = find_delimiter(rest) {
        if pos > 0 {
            frames.push(Frame(rest[..pos].to_vec()));
        }
        rest = &rest[pos + DELIMITER.len()..];
    }
    frames
}
