//! Live per-sample feed produced during monitoring.
//!
//! The producer thread is the only writer; a renderer drains the stream at
//! its own pace. The queue is a `crossbeam` channel, so a sample is fully
//! published before the consumer can observe it and arrives in framing order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::demux::Frame;
use crate::errors::{HrvError, Result};

/// One live reading: raw ECG value and instantaneous heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Ordinal position in the session.
    pub index: usize,
    pub ecg: f64,
    pub bpm: f64,
}

/// Parse an `ecg,bpm` frame.
pub fn parse_reading(frame: &Frame) -> Result<(f64, f64)> {
    let text = frame.text()?;
    let (ecg, bpm) = text
        .split_once(',')
        .ok_or_else(|| HrvError::ProtocolParse(format!("telemetry frame {text:?} has no comma")))?;
    let parse = |field: &str| {
        field.trim().parse::<f64>().map_err(|_| {
            HrvError::ProtocolParse(format!("telemetry field {field:?} in {text:?} is not a number"))
        })
    };
    Ok((parse(ecg)?, parse(bpm)?))
}

/// Create a connected publisher/stream pair.
pub fn channel() -> (TelemetryPublisher, TelemetryStream) {
    let (tx, rx) = unbounded();
    let done = Arc::new(AtomicBool::new(false));
    (
        TelemetryPublisher {
            tx,
            next_index: 0,
            done: done.clone(),
        },
        TelemetryStream { rx, done },
    )
}

/// Writing end, owned by the producer.
#[derive(Debug)]
pub struct TelemetryPublisher {
    tx: Sender<TelemetrySample>,
    next_index: usize,
    done: Arc<AtomicBool>,
}

impl TelemetryPublisher {
    /// Append one sample. Returns it with its assigned index.
    ///
    /// A consumer that went away is not an error for the producer; acquisition
    /// continues so the histograms can still be collected.
    pub fn publish(&mut self, ecg: f64, bpm: f64) -> TelemetrySample {
        let sample = TelemetrySample {
            index: self.next_index,
            ecg,
            bpm,
        };
        self.next_index += 1;
        let _ = self.tx.send(sample);
        sample
    }

    /// Number of samples published so far.
    pub fn published(&self) -> usize {
        self.next_index
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        // Set after the last send, so "done and empty" means fully drained.
        self.done.store(true, Ordering::Release);
    }
}

/// Reading end, owned by the renderer.
#[derive(Debug)]
pub struct TelemetryStream {
    rx: Receiver<TelemetrySample>,
    done: Arc<AtomicBool>,
}

impl TelemetryStream {
    /// Everything published since the last call, without blocking.
    pub fn drain(&self) -> Vec<TelemetrySample> {
        self.rx.try_iter().collect()
    }

    /// Wait for the next sample. `None` on timeout or once the producer is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<TelemetrySample> {
        match self.rx.recv_timeout(timeout) {
            Ok(sample) => Some(sample),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// True once the producer has finished and every sample was consumed.
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire) && self.rx.is_empty()
    }
}
