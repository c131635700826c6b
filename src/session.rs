//! One monitoring session against one device.
//!
//! The protocol carries no request identifiers, so a response is matched to
//! its command purely by order. `Session` is the single owner of the channel
//! and of the demuxer buffer, and every request method sends exactly one
//! command and drains its whole answer before returning.
//!
//! # Example
//! ```ignore
//! let channel = SerialChannel::open("/dev/ttyACM0", 115200, Duration::from_millis(50))?;
//! let mut session = Session::new(channel, SessionConfig::default());
//! session.wait_for_start()?;
//! session.wait_for_stop()?;
//! let measurements = session.collect_measurements()?;
//! println!("{}", HrvSummary::from_measurements(&measurements));
//! ```

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::channel::{CloseHandle, CommandChannel};
use crate::config::{RetryPolicy, SessionConfig};
use crate::demux::{Frame, FrameDemuxer};
use crate::errors::{HrvError, Result};
use crate::export::Measurements;
use crate::histogram::{self, ExpandedHistogram, HistogramKind};
use crate::metrics::{parse_scalar_response, MetricKind, ScalarMetric};
use crate::protocol::{Command, Sentinel};
use crate::simulation::{FeedMode, SimulationFeeder};
use crate::telemetry::{self, TelemetryPublisher, TelemetryStream};

/// Upper bound on draining stale input before a request.
const MAX_FLUSH: Duration = Duration::from_millis(200);

pub struct Session<C: CommandChannel> {
    channel: C,
    demuxer: FrameDemuxer,
    config: SessionConfig,
}

impl<C: CommandChannel> Session<C> {
    pub fn new(channel: C, config: SessionConfig) -> Self {
        Self {
            channel,
            demuxer: FrameDemuxer::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.channel.close_handle()
    }

    // ------------------------------------------------------------------------
    // Phase control
    // ------------------------------------------------------------------------

    /// Block until the device emits `sentinel`, ignoring any other line.
    ///
    /// Each attempt is one line read of `line_timeout`. Timed-out attempts
    /// are retried with backoff up to the sentinel retry policy; a closed or
    /// broken channel fails immediately.
    pub fn wait_for_sentinel(&mut self, sentinel: Sentinel) -> Result<()> {
        let policy = self.config.sentinel_retry;
        let timeout = self.config.line_timeout;
        let mut timeouts = 0u32;
        debug!("waiting for {:?}", sentinel.as_str());

        loop {
            let frame = match self.demuxer.next_frame(&mut self.channel, timeout) {
                Ok(frame) => frame,
                Err(e) if e.is_transient() => None,
                Err(e) => return Err(e),
            };

            match frame {
                Some(frame) if frame.is(sentinel) => {
                    info!("device: {}", sentinel);
                    return Ok(());
                }
                Some(frame) => trace!("ignored while waiting for {}: {:?}", sentinel, frame),
                None => {
                    timeouts += 1;
                    backoff(&policy, timeouts, || format!("waiting for {:?}", sentinel.as_str()))?;
                }
            }
        }
    }

    /// Block until the device emits a button sentinel.
    ///
    /// Monitoring may run for a day or more, so silent line reads are not
    /// counted against a retry budget. The wait ends only on the sentinel,
    /// a broken channel, or `button_timeout` when one is configured.
    fn wait_for_button(&mut self, sentinel: Sentinel) -> Result<()> {
        let timeout = self.config.line_timeout;
        let deadline = self.config.button_timeout.map(|limit| (Instant::now() + limit, limit));
        let mut silent = 0u64;
        debug!("waiting for {:?}", sentinel.as_str());

        loop {
            let frame = match self.demuxer.next_frame(&mut self.channel, timeout) {
                Ok(frame) => frame,
                Err(e) if e.is_transient() => None,
                Err(e) => return Err(e),
            };

            match frame {
                Some(frame) if frame.is(sentinel) => {
                    info!("device: {}", sentinel);
                    return Ok(());
                }
                Some(frame) => trace!("ignored while waiting for {}: {:?}", sentinel, frame),
                None => {
                    silent += 1;
                    trace!("still waiting for {} (silent reads={})", sentinel, silent);
                }
            }

            if let Some((deadline, limit)) = deadline {
                if Instant::now() >= deadline {
                    return Err(HrvError::Timeout(format!(
                        "waiting for {:?} longer than {:?}",
                        sentinel.as_str(),
                        limit
                    )));
                }
            }
        }
    }

    /// Wait for the monitoring-start button press (`Starting to monitor`).
    pub fn wait_for_start(&mut self) -> Result<()> {
        self.wait_for_button(Sentinel::StartingToMonitor)
    }

    /// Wait for the monitoring-stop button press (`Monitoring done!`).
    pub fn wait_for_stop(&mut self) -> Result<()> {
        self.wait_for_button(Sentinel::MonitoringDone)
    }

    /// Feed a recorded trace. In single-shot mode, also wait until the device
    /// has replayed it.
    pub fn simulate(&mut self, trace: &[f64], mode: FeedMode) -> Result<()> {
        let feeder = SimulationFeeder::new(mode);
        feeder.feed(&mut self.channel, trace)?;

        if let Some(settle) = feeder.settle_time(&self.config) {
            info!("waiting {:?} for the simulation to complete", settle);
            thread::sleep(settle);
            self.wait_for_sentinel(Sentinel::SimulationDone)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    fn send(&mut self, command: Command) -> Result<()> {
        debug!("sending command: {}", command);
        self.channel.send(&command.encode())
    }

    /// Discard anything still buffered so it cannot be taken for the answer
    /// to the next command.
    fn flush_input(&mut self) -> Result<()> {
        let mut discarded = self.demuxer.remainder().len();
        self.demuxer = FrameDemuxer::new();

        let start = Instant::now();
        loop {
            let chunk = self.channel.read_available()?;
            if chunk.is_empty() || start.elapsed() > MAX_FLUSH {
                break;
            }
            discarded += chunk.len();
        }
        if discarded > 0 {
            warn!("discarded {} stale byte(s) before request", discarded);
        }
        Ok(())
    }

    /// Request and decode one histogram dump.
    pub fn request_histogram(&mut self, kind: HistogramKind) -> Result<ExpandedHistogram> {
        self.flush_input()?;
        self.send(kind.command())?;
        let frames = self.demuxer.run_until(
            &mut self.channel,
            Sentinel::DoneHist,
            self.config.phase_idle_timeout,
            |_| Ok(()),
        )?;
        let hist = histogram::decode(&frames)?;
        info!("{:?} histogram: buckets={}, samples={}", kind, frames.len() - 1, hist.len());
        Ok(hist)
    }

    /// Request one device-computed metric.
    ///
    /// A slow answer is waited for again (up to the command retry policy)
    /// rather than re-requested, since a second command would leave two
    /// answers in flight.
    pub fn request_scalar(&mut self, kind: MetricKind) -> Result<ScalarMetric> {
        self.flush_input()?;
        self.send(kind.command())?;

        let policy = self.config.command_retry;
        let mut timeouts = 0u32;
        loop {
            let frame = match self.demuxer.next_frame(&mut self.channel, self.config.response_timeout) {
                Ok(frame) => frame,
                Err(e) if e.is_transient() => None,
                Err(e) => return Err(e),
            };
            match frame {
                Some(frame) => {
                    let value = parse_scalar_response(frame.as_bytes())?;
                    info!("{} = {}", kind, value);
                    return Ok(ScalarMetric { kind, value });
                }
                None => {
                    timeouts += 1;
                    backoff(&policy, timeouts, || format!("waiting for {} response", kind))?;
                }
            }
        }
    }

    /// Issue the five follow-up requests in order.
    pub fn collect_measurements(&mut self) -> Result<Measurements> {
        let rr = self.request_histogram(HistogramKind::RrIntervals)?;
        let bpm = self.request_histogram(HistogramKind::Bpm)?;
        let rmssd = self.request_scalar(MetricKind::Rmssd)?;
        let sdann = self.request_scalar(MetricKind::Sdann)?;
        let hti = self.request_scalar(MetricKind::Hti)?;
        Ok(Measurements {
            rr,
            bpm,
            rmssd: rmssd.value,
            sdann: sdann.value,
            hti: hti.value,
        })
    }

    /// Complete single-shot session.
    ///
    /// With a trace, the device is fed and (in single-shot mode) replays it;
    /// without one, the session waits for the start button. Both then wait
    /// for the stop button and collect the measurements.
    pub fn run(&mut self, trace: Option<&[f64]>, mode: FeedMode) -> Result<Measurements> {
        match trace {
            Some(trace) => self.simulate(trace, mode)?,
            None => {
                info!("press the button to start monitoring");
                self.wait_for_start()?;
            }
        }
        info!("press the button to stop monitoring");
        self.wait_for_stop()?;
        self.collect_measurements()
    }

    // ------------------------------------------------------------------------
    // Live capture
    // ------------------------------------------------------------------------

    /// Producer side of a live capture: publish telemetry until `Done data`,
    /// then read the histogram dump that follows until `Done hist`.
    fn capture_live(mut self, mut publisher: TelemetryPublisher) -> Result<(Self, LiveOutcome)> {
        let mut skipped = 0usize;
        let data = self.demuxer.run_until(
            &mut self.channel,
            Sentinel::DoneData,
            self.config.phase_idle_timeout,
            |frame| {
                publish_frame(&mut publisher, frame, &mut skipped);
                Ok(())
            },
        )?;
        info!(
            "live data done: frames={}, samples={}, skipped={}",
            data.len(),
            publisher.published(),
            skipped
        );
        let samples = publisher.published();
        drop(publisher);

        let frames = self.demuxer.run_until(
            &mut self.channel,
            Sentinel::DoneHist,
            self.config.phase_idle_timeout,
            |_| Ok(()),
        )?;
        let histogram = histogram::decode(&frames)?;
        info!("live histogram: samples={}", histogram.len());

        Ok((
            self,
            LiveOutcome {
                samples,
                skipped,
                histogram,
            },
        ))
    }
}

fn publish_frame(publisher: &mut TelemetryPublisher, frame: &Frame, skipped: &mut usize) {
    if let Some(sentinel) = frame.sentinel() {
        info!("device: {}", sentinel);
        return;
    }
    match telemetry::parse_reading(frame) {
        Ok((ecg, bpm)) => {
            publisher.publish(ecg, bpm);
        }
        Err(e) => {
            *skipped += 1;
            warn!("skipping telemetry frame: {}", e);
        }
    }
}

/// Count one timed-out attempt against `policy`, sleeping before the next.
fn backoff(policy: &RetryPolicy, attempt: u32, what: impl FnOnce() -> String) -> Result<()> {
    if attempt >= policy.max_attempts {
        return Err(HrvError::Timeout(format!(
            "{} after {} attempt(s)",
            what(),
            attempt
        )));
    }
    let delay = policy.delay(attempt);
    debug!("no data, retrying after {:?} (attempt={})", delay, attempt);
    thread::sleep(delay);
    Ok(())
}

/// Result of a live capture.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveOutcome {
    /// Telemetry samples published.
    pub samples: usize,
    /// Non-sentinel frames that were not `ecg,bpm` readings.
    pub skipped: usize,
    /// Histogram dumped after `Done data`.
    pub histogram: ExpandedHistogram,
}

/// A live capture running on its own producer thread.
///
/// The producer owns the session until it finishes; the caller keeps the
/// [`TelemetryStream`] and reads it at its own pace.
pub struct LiveCapture<C: CommandChannel> {
    handle: JoinHandle<Result<(Session<C>, LiveOutcome)>>,
    close: CloseHandle,
}

impl<C> LiveCapture<C>
where
    C: CommandChannel + Send + 'static,
{
    pub fn spawn(session: Session<C>) -> Result<(Self, TelemetryStream)> {
        let (publisher, stream) = telemetry::channel();
        let close = session.close_handle();
        let handle = thread::Builder::new()
            .name("hrv-producer".to_string())
            .spawn(move || session.capture_live(publisher))?;
        info!("live capture started");
        Ok((Self { handle, close }, stream))
    }

    /// Close the channel; the producer exits with [`HrvError::Closed`].
    pub fn cancel(&self) {
        self.close.close();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the producer and take the session back.
    pub fn join(self) -> Result<(Session<C>, LiveOutcome)> {
        self.handle
            .join()
            .map_err(|_| HrvError::Io(io::Error::other("producer thread panicked")))?
    }
}
