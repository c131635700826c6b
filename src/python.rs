//! Python bindings.
//!
//! The Python side owns all plotting and window layout; these classes only
//! hand it telemetry samples, expanded histograms and metric values.

use std::time::Duration;

use pyo3::exceptions::{PyIOError, PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::channel::SerialChannel;
use crate::config::SessionConfig;
use crate::errors::HrvError;
use crate::export::Measurements;
use crate::logging;
use crate::metrics::{describe, HrvSummary};
use crate::protocol::BAUD_RATE;
use crate::session::{LiveCapture, LiveOutcome, Session};
use crate::simulation::FeedMode;
use crate::telemetry::{TelemetrySample, TelemetryStream};

fn to_py_err(e: HrvError) -> PyErr {
    match e {
        HrvError::Timeout(_) => PyErr::new::<PyTimeoutError, _>(e.to_string()),
        HrvError::ProtocolParse(_) | HrvError::Trace(_) | HrvError::Config(_) => {
            PyErr::new::<PyValueError, _>(e.to_string())
        }
        e if e.is_transport() => PyErr::new::<PyIOError, _>(e.to_string()),
        e => PyErr::new::<PyRuntimeError, _>(e.to_string()),
    }
}

/// One live reading (dataclass-like).
///
/// Attributes:
///     index: Ordinal position in the session.
///     ecg: Raw ECG reading.
///     bpm: Instantaneous heart rate.
#[pyclass(name = "TelemetrySample", frozen)]
#[derive(Clone)]
struct PyTelemetrySample {
    #[pyo3(get)]
    index: usize,
    #[pyo3(get)]
    ecg: f64,
    #[pyo3(get)]
    bpm: f64,
}

#[pymethods]
impl PyTelemetrySample {
    fn __repr__(&self) -> String {
        format!(
            "TelemetrySample(index={}, ecg={}, bpm={})",
            self.index, self.ecg, self.bpm
        )
    }
}

impl From<TelemetrySample> for PyTelemetrySample {
    fn from(s: TelemetrySample) -> Self {
        PyTelemetrySample {
            index: s.index,
            ecg: s.ecg,
            bpm: s.bpm,
        }
    }
}

/// Results read back after a monitoring session.
///
/// Attributes:
///     rr: Expanded RR-interval histogram (list of bucket indices).
///     bpm: Expanded BPM histogram.
///     rmssd, sdann, hti: Metrics computed by the device.
#[pyclass(name = "Measurements", frozen)]
#[derive(Clone)]
struct PyMeasurements {
    inner: Measurements,
}

#[pymethods]
impl PyMeasurements {
    #[getter]
    fn rr(&self) -> Vec<u32> {
        self.inner.rr.values().to_vec()
    }

    #[getter]
    fn bpm(&self) -> Vec<u32> {
        self.inner.bpm.values().to_vec()
    }

    #[getter]
    fn rmssd(&self) -> f64 {
        self.inner.rmssd
    }

    #[getter]
    fn sdann(&self) -> f64 {
        self.inner.sdann
    }

    #[getter]
    fn hti(&self) -> f64 {
        self.inner.hti
    }

    /// Human-readable results block (means, deviation, metrics).
    fn summary(&self) -> String {
        HrvSummary::from_measurements(&self.inner).to_string()
    }

    /// Convert to the `measurements.json` dictionary layout.
    ///
    /// Derived statistics are included as `rr_mean`, `rr_std_dev` and
    /// `average_bpm`, set to None when undefined.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let summary = HrvSummary::from_measurements(&self.inner);
        let dict = PyDict::new(py);
        dict.set_item("RR", self.rr())?;
        dict.set_item("BPM", self.bpm())?;
        dict.set_item("RMSSD", self.inner.rmssd)?;
        dict.set_item("SDANN", self.inner.sdann)?;
        dict.set_item("HTI", self.inner.hti)?;
        dict.set_item("rr_mean", summary.rr.mean.value())?;
        dict.set_item("rr_std_dev", summary.rr.std_dev.value())?;
        dict.set_item("average_bpm", summary.average_bpm.value())?;
        Ok(dict)
    }

    /// Write `measurements.json`.
    fn write_json(&self, path: &str) -> PyResult<()> {
        self.inner
            .write_json(std::path::Path::new(path))
            .map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        format!(
            "Measurements(rr={}, bpm={}, rmssd={}, sdann={}, hti={})",
            self.inner.rr.len(),
            self.inner.bpm.len(),
            self.inner.rmssd,
            self.inner.sdann,
            self.inner.hti
        )
    }
}

/// Outcome of a live capture.
///
/// Attributes:
///     samples: Number of telemetry samples published.
///     skipped: Frames that were neither readings nor sentinels.
///     histogram: Histogram dumped after the live data (expanded).
#[pyclass(name = "LiveOutcome", frozen)]
struct PyLiveOutcome {
    #[pyo3(get)]
    samples: usize,
    #[pyo3(get)]
    skipped: usize,
    #[pyo3(get)]
    histogram: Vec<u32>,
}

#[pymethods]
impl PyLiveOutcome {
    /// Mean of the histogram, or None when it is empty.
    #[getter]
    fn mean(&self) -> Option<f64> {
        let values: Vec<f64> = self.histogram.iter().map(|&v| f64::from(v)).collect();
        describe(&values).mean.value()
    }

    fn __repr__(&self) -> String {
        format!(
            "LiveOutcome(samples={}, skipped={}, histogram={})",
            self.samples,
            self.skipped,
            self.histogram.len()
        )
    }
}

impl From<LiveOutcome> for PyLiveOutcome {
    fn from(o: LiveOutcome) -> Self {
        PyLiveOutcome {
            samples: o.samples,
            skipped: o.skipped,
            histogram: o.histogram.into_inner(),
        }
    }
}

/// HRV monitor session over a serial port.
///
/// Example:
///     >>> monitor = Monitor("/dev/ttyACM0")
///     >>> monitor.wait_for_start()
///     >>> monitor.wait_for_stop()
///     >>> results = monitor.collect()
///     >>> print(results.summary())
#[pyclass(name = "Monitor", unsendable)]
struct PyMonitor {
    session: Option<Session<SerialChannel>>,
}

impl PyMonitor {
    fn session(&mut self) -> PyResult<&mut Session<SerialChannel>> {
        self.session.as_mut().ok_or_else(|| {
            PyErr::new::<PyRuntimeError, _>("session was handed to a live capture")
        })
    }
}

#[pymethods]
impl PyMonitor {
    /// Open the serial port of the monitor.
    ///
    /// Args:
    ///     port: Serial device path (e.g. "/dev/ttyACM0" or "COM3").
    ///     baud_rate: Baud rate. Default: 115200.
    ///     line_timeout: Seconds to wait per line while waiting for a phase marker.
    ///     button_timeout: Seconds to wait for a button press. Default: forever.
    ///
    /// Raises:
    ///     IOError: If the port cannot be opened.
    #[new]
    #[pyo3(signature = (port, baud_rate=BAUD_RATE, line_timeout=None, button_timeout=None))]
    fn new(
        port: &str,
        baud_rate: u32,
        line_timeout: Option<f64>,
        button_timeout: Option<f64>,
    ) -> PyResult<Self> {
        let mut config = SessionConfig {
            baud_rate,
            ..SessionConfig::default()
        };
        if let Some(secs) = line_timeout {
            config.line_timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?;
        }
        if let Some(secs) = button_timeout {
            config.button_timeout = Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?,
            );
        }
        let channel =
            SerialChannel::open(port, config.baud_rate, config.poll_interval).map_err(to_py_err)?;
        Ok(PyMonitor {
            session: Some(Session::new(channel, config)),
        })
    }

    /// Feed a recorded ECG trace (volts) to the device.
    ///
    /// Args:
    ///     readings: ECG readings, header rows already removed.
    ///     continuous: Return right after sending instead of waiting for
    ///         "Simulation done!". Default: False.
    #[pyo3(signature = (readings, continuous=false))]
    fn simulate(&mut self, py: Python<'_>, readings: Vec<f64>, continuous: bool) -> PyResult<()> {
        let mode = if continuous {
            FeedMode::Continuous
        } else {
            FeedMode::SingleShot
        };
        let session = self.session()?;
        py.detach(|| session.simulate(&readings, mode))
            .map_err(to_py_err)
    }

    /// Block until the device reports "Starting to monitor".
    fn wait_for_start(&mut self, py: Python<'_>) -> PyResult<()> {
        let session = self.session()?;
        py.detach(|| session.wait_for_start()).map_err(to_py_err)
    }

    /// Block until the device reports "Monitoring done!".
    fn wait_for_stop(&mut self, py: Python<'_>) -> PyResult<()> {
        let session = self.session()?;
        py.detach(|| session.wait_for_stop()).map_err(to_py_err)
    }

    /// Request both histograms and the three metrics.
    ///
    /// Raises:
    ///     TimeoutError: If the device does not answer.
    ///     ValueError: If a response cannot be parsed.
    fn collect(&mut self, py: Python<'_>) -> PyResult<PyMeasurements> {
        let session = self.session()?;
        py.detach(|| session.collect_measurements())
            .map(|inner| PyMeasurements { inner })
            .map_err(to_py_err)
    }

    /// Start a live capture on a background thread.
    ///
    /// This monitor cannot be used until the capture is finished; `finish()`
    /// returns a new Monitor for follow-up requests.
    fn start_live(&mut self) -> PyResult<PyLiveCapture> {
        let session = self.session.take().ok_or_else(|| {
            PyErr::new::<PyRuntimeError, _>("a live capture is already running")
        })?;
        let (capture, stream) = LiveCapture::spawn(session).map_err(to_py_err)?;
        Ok(PyLiveCapture {
            capture: Some(capture),
            stream,
        })
    }

    fn __repr__(&self) -> String {
        match &self.session {
            Some(s) => format!("Monitor(baud_rate={})", s.config().baud_rate),
            None => "Monitor(live capture running)".to_string(),
        }
    }
}

/// Live capture handle returned by `Monitor.start_live()`.
///
/// Call `poll()` from the plotting loop to fetch new samples.
#[pyclass(name = "LiveCapture", unsendable)]
struct PyLiveCapture {
    capture: Option<LiveCapture<SerialChannel>>,
    stream: TelemetryStream,
}

#[pymethods]
impl PyLiveCapture {
    /// Samples published since the last call (never blocks).
    fn poll(&self) -> Vec<PyTelemetrySample> {
        self.stream
            .drain()
            .into_iter()
            .map(PyTelemetrySample::from)
            .collect()
    }

    /// True once the capture finished and every sample was polled.
    #[getter]
    fn done(&self) -> bool {
        self.stream.is_finished()
            && self
                .capture
                .as_ref()
                .map(|c| c.is_finished())
                .unwrap_or(true)
    }

    /// Close the port; the capture stops with an error.
    fn cancel(&self) {
        if let Some(capture) = &self.capture {
            capture.cancel();
        }
    }

    /// Wait for the capture and return `(LiveOutcome, Monitor)`.
    fn finish(&mut self, py: Python<'_>) -> PyResult<(PyLiveOutcome, PyMonitor)> {
        let capture = self
            .capture
            .take()
            .ok_or_else(|| PyErr::new::<PyRuntimeError, _>("capture already finished"))?;
        // The producer may log through Python while we wait for it.
        let (session, outcome) = py.detach(|| capture.join()).map_err(to_py_err)?;
        Ok((
            PyLiveOutcome::from(outcome),
            PyMonitor {
                session: Some(session),
            },
        ))
    }
}

/// Route crate logs to Python's `logging` module (loggers named
/// `hrv_link.<module>`), or to stderr when `stderr=True`.
///
/// Only the first call has an effect.
///
/// Args:
///     level: "error", "warn", "info", "debug" or "trace". Default: the
///         HRV_LOG / RUST_LOG environment variable, else "info".
///     stderr: Write records to stderr instead. Default: False.
#[pyfunction]
#[pyo3(signature = (level=None, stderr=false))]
fn init_logging(py: Python<'_>, level: Option<&str>, stderr: bool) -> PyResult<()> {
    if stderr {
        logging::init_with_level(level);
        Ok(())
    } else {
        logging::init_python_logging(py, level)
    }
}

/// The Python module definition
#[pymodule]
#[pyo3(name = "_core")]
fn py_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyMonitor>()?;
    m.add_class::<PyLiveCapture>()?;
    m.add_class::<PyLiveOutcome>()?;
    m.add_class::<PyMeasurements>()?;
    m.add_class::<PyTelemetrySample>()?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;

    m.add("DEFAULT_BAUD_RATE", BAUD_RATE)?;

    Ok(())
}
