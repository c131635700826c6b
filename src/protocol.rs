//! Wire protocol of the HRV monitor.
//!
//! The device speaks ASCII over a serial line. Every host command is a
//! short `s<value>` token with no terminator and no acknowledgement; every
//! device response is one or more CRLF-terminated lines. There is no
//! request identifier in a response, so the host must keep exactly one
//! command in flight and drain its answer before sending the next one.

use std::fmt;
use std::time::Duration;

use crate::errors::{HrvError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Frame delimiter used by the device.
pub const DELIMITER: &[u8] = b"\r\n";

/// Default serial baud rate of the monitor firmware.
pub const BAUD_RATE: u32 = 115200;

/// Default timeout for a single line read (`readline` on the device port).
pub const DEFAULT_LINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Scale applied to a trace reading before it is sent as an integer.
pub const SAMPLE_SCALE: f64 = 1000.0;

/// Sample value that tells the device the simulated trace has ended.
pub const END_OF_TRACE: i64 = 1000;

/// Position of the first delimiter in `buf`.
pub(crate) fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Position of the last delimiter in `buf`.
pub(crate) fn rfind_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len()).rposition(|w| w == DELIMITER)
}

// ============================================================================
// Commands
// ============================================================================

/// A host-to-device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// One integer-scaled ECG sample of a simulation feed.
    Sample(i64),
    /// Dump the RR-interval histogram.
    RrIntervalsHistogram,
    /// Dump the BPM histogram.
    BpmHistogram,
    Rmssd,
    Sdann,
    Hti,
}

impl Command {
    /// Numeric code carried after the `s` prefix.
    pub fn code(self) -> i64 {
        match self {
            Command::Sample(value) => value,
            Command::RrIntervalsHistogram => 1,
            Command::BpmHistogram => 2,
            Command::Rmssd => 3,
            Command::Sdann => 4,
            Command::Hti => 5,
        }
    }

    /// ASCII bytes as written to the wire.
    pub fn encode(self) -> Vec<u8> {
        format!("s{}", self.code()).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Sample(v) => write!(f, "sample({v})"),
            Command::RrIntervalsHistogram => f.write_str("rr-histogram"),
            Command::BpmHistogram => f.write_str("bpm-histogram"),
            Command::Rmssd => f.write_str("rmssd"),
            Command::Sdann => f.write_str("sdann"),
            Command::Hti => f.write_str("hti"),
        }
    }
}

/// Scale a trace reading to the integer carried by a `Sample` command.
///
/// Truncates toward zero, so `1.2345` becomes `1234` and `-0.0005` becomes `0`.
pub fn scale_reading(reading: f64) -> Result<i64> {
    let scaled = (reading * SAMPLE_SCALE).trunc();
    if !scaled.is_finite() || scaled.abs() > i64::MAX as f64 {
        return Err(HrvError::Trace(format!(
            "reading {reading} cannot be encoded as a sample"
        )));
    }
    Ok(scaled as i64)
}

// ============================================================================
// Sentinels
// ============================================================================

/// Textual markers the device emits at protocol phase boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    StartingToMonitor,
    MonitoringDone,
    SimulationDone,
    DoneData,
    DoneHist,
}

impl Sentinel {
    pub const ALL: [Sentinel; 5] = [
        Sentinel::StartingToMonitor,
        Sentinel::MonitoringDone,
        Sentinel::SimulationDone,
        Sentinel::DoneData,
        Sentinel::DoneHist,
    ];

    /// Exact text of the sentinel on the wire (case-sensitive).
    pub fn as_str(self) -> &'static str {
        match self {
            Sentinel::StartingToMonitor => "Starting to monitor",
            Sentinel::MonitoringDone => "Monitoring done!",
            Sentinel::SimulationDone => "Simulation done!",
            Sentinel::DoneData => "Done data",
            Sentinel::DoneHist => "Done hist",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Match a complete frame against the sentinel set.
    pub fn from_frame(frame: &[u8]) -> Option<Sentinel> {
        Sentinel::ALL
            .into_iter()
            .find(|s| s.as_bytes() == frame)
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::RrIntervalsHistogram.encode(), b"s1");
        assert_eq!(Command::BpmHistogram.encode(), b"s2");
        assert_eq!(Command::Rmssd.encode(), b"s3");
        assert_eq!(Command::Sdann.encode(), b"s4");
        assert_eq!(Command::Hti.encode(), b"s5");
        assert_eq!(Command::Sample(-42).encode(), b"s-42");
        assert_eq!(Command::Sample(END_OF_TRACE).encode(), b"s1000");
    }

    #[test]
    fn test_scale_truncates_toward_zero() {
        assert_eq!(scale_reading(1.2345).unwrap(), 1234);
        assert_eq!(scale_reading(-0.0005).unwrap(), 0);
        assert_eq!(scale_reading(-1.9999).unwrap(), -1999);
        assert_eq!(scale_reading(0.0).unwrap(), 0);
    }

    #[test]
    fn test_scale_rejects_non_finite() {
        assert!(scale_reading(f64::NAN).is_err());
        assert!(scale_reading(f64::INFINITY).is_err());
    }

    #[test]
    fn test_sentinel_exact_match() {
        assert_eq!(
            Sentinel::from_frame(b"Done hist"),
            Some(Sentinel::DoneHist)
        );
        assert_eq!(
            Sentinel::from_frame(b"Monitoring done!"),
            Some(Sentinel::MonitoringDone)
        );
        assert_eq!(Sentinel::from_frame(b"done hist"), None);
        assert_eq!(Sentinel::from_frame(b"Done hist "), None);
        assert_eq!(Sentinel::from_frame(b"12"), None);
    }

    #[test]
    fn test_delimiter_search() {
        let buf = b"10\r\n20\r\n2";
        assert_eq!(find_delimiter(buf), Some(2));
        assert_eq!(rfind_delimiter(buf), Some(6));
        assert_eq!(find_delimiter(b"\r"), None);
        assert_eq!(rfind_delimiter(b""), None);
    }
}
