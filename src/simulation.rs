//! Replaying a recorded ECG trace into the monitor.
//!
//! In simulation mode the firmware takes its ECG input from the serial line
//! instead of the electrodes. Each reading is sent as one `Sample` command,
//! followed by the `s1000` end-of-trace marker.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};

use crate::channel::CommandChannel;
use crate::config::SessionConfig;
use crate::errors::{HrvError, Result};
use crate::protocol::{scale_reading, Command, END_OF_TRACE};

/// Header rows in a trace export (column names, then units).
const TRACE_HEADER_ROWS: usize = 2;

/// Column holding the ECG reading; column 0 is the timestamp.
const TRACE_READING_COLUMN: usize = 1;

/// What happens after the trace has been transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Wait for the device to report `Simulation done!`.
    #[default]
    SingleShot,
    /// Return immediately; the device keeps streaming.
    Continuous,
}

/// Encode one reading as its wire command text, e.g. `1.2345` → `s1234`.
pub fn encode_sample(reading: f64) -> Result<String> {
    Ok(format!("s{}", scale_reading(reading)?))
}

/// Commands for a whole trace, end-of-trace marker included.
pub fn encode_trace(trace: &[f64]) -> Result<Vec<Command>> {
    let mut commands = trace
        .iter()
        .map(|&r| scale_reading(r).map(Command::Sample))
        .collect::<Result<Vec<_>>>()?;
    commands.push(Command::Sample(END_OF_TRACE));
    Ok(commands)
}

/// Transmit side of a simulation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationFeeder {
    mode: FeedMode,
}

impl SimulationFeeder {
    pub fn new(mode: FeedMode) -> Self {
        Self { mode }
    }

    /// Send the encoded trace in order. Returns the number of commands sent.
    ///
    /// The whole trace is encoded before the first byte goes out, so an
    /// unencodable reading never leaves the device with half a trace.
    pub fn feed<C>(&self, channel: &mut C, trace: &[f64]) -> Result<usize>
    where
        C: CommandChannel + ?Sized,
    {
        let commands = encode_trace(trace)?;
        info!("feeding simulated trace: samples={}", trace.len());
        for command in &commands {
            channel.send(&command.encode())?;
        }
        debug!("trace sent: commands={}", commands.len());
        Ok(commands.len())
    }

    /// How long to let the device replay before polling for its end marker.
    /// `None` in continuous mode.
    pub fn settle_time(&self, config: &SessionConfig) -> Option<Duration> {
        match self.mode {
            FeedMode::SingleShot => Some(config.settle_delay + config.simulation_duration),
            FeedMode::Continuous => None,
        }
    }
}

/// Load the reading column of a two-column trace CSV, skipping its header rows.
pub fn load_trace(path: &Path) -> Result<Vec<f64>> {
    let file = std::fs::File::open(path)
        .map_err(|e| HrvError::Trace(format!("{}: {e}", path.display())))?;
    read_trace(file)
}

pub fn read_trace<R: Read>(reader: R) -> Result<Vec<f64>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut readings = Vec::new();
    for (row, record) in rdr.records().enumerate().skip(TRACE_HEADER_ROWS) {
        let record = record.map_err(|e| HrvError::Trace(format!("row {}: {e}", row + 1)))?;
        let field = record.get(TRACE_READING_COLUMN).ok_or_else(|| {
            HrvError::Trace(format!("row {}: missing reading column", row + 1))
        })?;
        let reading = field.parse::<f64>().map_err(|_| {
            HrvError::Trace(format!("row {}: {field:?} is not a number", row + 1))
        })?;
        readings.push(reading);
    }
    Ok(readings)
}
