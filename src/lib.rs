//! Host-side driver for an embedded HRV (heart-rate variability) monitor.
//!
//! This crate talks to the monitor over a serial line, splits its CRLF-framed
//! output into frames, reconstructs the RR-interval and BPM distributions from
//! the device's compact histogram dumps, and parses the HRV metrics the device
//! computes on board (RMSSD, SDANN, HTI).
//!
//! # Session flow
//!
//! 1. Either feed a recorded ECG trace (`Session::simulate`) or wait for the
//!    start button (`Session::wait_for_start`).
//! 2. Wait for the stop button (`Session::wait_for_stop`).
//! 3. Issue the five follow-up requests (`Session::collect_measurements`):
//!    RR histogram, BPM histogram, RMSSD, SDANN, HTI, strictly one at a time.
//!
//! For live plotting, `LiveCapture` moves the session onto a producer thread
//! that publishes each `ecg,bpm` reading to a [`TelemetryStream`] as soon as it
//! is framed.
//!
//! Rendering and file formats beyond JSON export are left to the caller; with
//! the `python` feature the same core is exposed as the `_core` extension
//! module.

pub mod channel;
pub mod config;
pub mod demux;
pub mod errors;
pub mod export;
pub mod histogram;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod simulation;
pub mod telemetry;

#[cfg(feature = "python")]
mod python;

pub use channel::{CloseHandle, CommandChannel, SerialChannel, Transport};
pub use config::{RetryPolicy, SessionConfig};
pub use demux::{Frame, FrameDemuxer};
pub use errors::*;
pub use export::Measurements;
pub use histogram::{expand, ExpandedHistogram, HistogramKind};
pub use metrics::{average, describe, Description, HrvSummary, MetricKind, ScalarMetric, Stat};
pub use protocol::{Command, Sentinel};
pub use session::{LiveCapture, LiveOutcome, Session};
pub use simulation::{FeedMode, SimulationFeeder};
pub use telemetry::{TelemetrySample, TelemetryStream};
