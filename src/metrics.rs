//! Derived statistics and device-reported HRV scalars.
//!
//! RMSSD, SDANN and HTI are computed on the monitor itself; the host only
//! parses them. RR mean/deviation and the average BPM are computed here from
//! the reconstructed histograms.
//!
//! Degenerate input (no samples, or a single sample for a deviation) is not an
//! error. It yields [`Stat::Undefined`], and the presentation layer decides
//! how to show it.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::errors::{HrvError, Result};
use crate::export::Measurements;
use crate::protocol::{find_delimiter, Command};

/// A statistic that may be undefined for the given input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Stat {
    Defined(f64),
    #[default]
    Undefined,
}

impl Stat {
    pub fn value(self) -> Option<f64> {
        match self {
            Stat::Defined(v) => Some(v),
            Stat::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Stat::Defined(_))
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stat::Defined(v) => write!(f, "{:.3}", v),
            Stat::Undefined => f.write_str("undefined"),
        }
    }
}

impl Serialize for Stat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Stat::Defined(v) => serializer.serialize_f64(*v),
            Stat::Undefined => serializer.serialize_none(),
        }
    }
}

/// Mean and sample standard deviation of a series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Description {
    pub mean: Stat,
    pub std_dev: Stat,
}

/// Describe a series. The mean needs one sample, the deviation two.
pub fn describe(samples: &[f64]) -> Description {
    let mean = average(samples);
    let std_dev = match mean {
        Stat::Defined(m) if samples.len() >= 2 => {
            let ss: f64 = samples.iter().map(|x| (x - m) * (x - m)).sum();
            Stat::Defined((ss / (samples.len() - 1) as f64).sqrt())
        }
        _ => Stat::Undefined,
    };
    Description { mean, std_dev }
}

/// Arithmetic mean, `Undefined` for an empty series.
pub fn average(samples: &[f64]) -> Stat {
    if samples.is_empty() {
        Stat::Undefined
    } else {
        Stat::Defined(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Parse the first line of a scalar metric response.
pub fn parse_scalar_response(response: &[u8]) -> Result<f64> {
    let line = match find_delimiter(response) {
        Some(pos) => &response[..pos],
        None => response,
    };
    let text = std::str::from_utf8(line)
        .map_err(|_| HrvError::ProtocolParse("metric response is not text".to_string()))?
        .trim();
    text.parse::<f64>()
        .map_err(|_| HrvError::ProtocolParse(format!("metric response {text:?} is not a number")))
}

// ============================================================================
// Scalar metrics
// ============================================================================

/// HRV metrics precomputed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Rmssd,
    Sdann,
    Hti,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Rmssd, MetricKind::Sdann, MetricKind::Hti];

    pub fn command(self) -> Command {
        match self {
            MetricKind::Rmssd => Command::Rmssd,
            MetricKind::Sdann => Command::Sdann,
            MetricKind::Hti => Command::Hti,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Rmssd => "RMSSD",
            MetricKind::Sdann => "SDANN",
            MetricKind::Hti => "HTI",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarMetric {
    pub kind: MetricKind,
    pub value: f64,
}

// ============================================================================
// Summary
// ============================================================================

/// Final numbers of a session, ready for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HrvSummary {
    pub rr: Description,
    pub average_bpm: Stat,
    pub rmssd: f64,
    pub sdann: f64,
    pub hti: f64,
}

impl HrvSummary {
    pub fn from_measurements(m: &Measurements) -> Self {
        Self {
            rr: describe(&m.rr.as_f64()),
            average_bpm: average(&m.bpm.as_f64()),
            rmssd: m.rmssd,
            sdann: m.sdann,
            hti: m.hti,
        }
    }
}

impl fmt::Display for HrvSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results:")?;
        writeln!(
            f,
            "RR intervals are distributed with mean {} and standard deviation {}",
            self.rr.mean, self.rr.std_dev
        )?;
        writeln!(f, "The average BPM is: {}", self.average_bpm)?;
        writeln!(f, "RMSSD is: {}ms", self.rmssd)?;
        writeln!(f, "SDANN is: {}ms", self.sdann)?;
        writeln!(f, "HTI is: {}ms", self.hti)?;
        write!(f, "Note that HTI is only valid if the measurement is at least 24h!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::expand;

    fn close(a: Stat, b: f64) -> bool {
        a.value().map(|v| (v - b).abs() < 1e-9).unwrap_or(false)
    }

    #[test]
    fn test_describe_degenerate() {
        let empty = describe(&[]);
        assert_eq!(empty.mean, Stat::Undefined);
        assert_eq!(empty.std_dev, Stat::Undefined);

        let single = describe(&[5.0]);
        assert_eq!(single.mean, Stat::Defined(5.0));
        assert_eq!(single.std_dev, Stat::Undefined);
    }

    #[test]
    fn test_describe_sample_std_dev() {
        let d = describe(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!(close(d.mean, 5.0));
        // Sample (n-1) deviation.
        assert!(close(d.std_dev, (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn test_describe_matches_enumerated_samples() {
        let counts = [0, 1, 3, 0, 2];
        let from_hist = describe(&expand(&counts).unwrap().as_f64());
        let direct = describe(&[1.0, 2.0, 2.0, 2.0, 4.0, 4.0]);
        assert_eq!(from_hist, direct);
        assert!(close(from_hist.mean, 2.5));
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), Stat::Undefined);
        assert!(close(average(&[2.0, 2.0, 2.0, 2.0, 2.0]), 2.0));
    }

    #[test]
    fn test_parse_scalar_response() {
        assert_eq!(parse_scalar_response(b"42.0\r\n").unwrap(), 42.0);
        assert_eq!(parse_scalar_response(b" 10.5 \r\ntrailing\r\n").unwrap(), 10.5);
        assert_eq!(parse_scalar_response(b"33.3").unwrap(), 33.3);
        assert!(matches!(
            parse_scalar_response(b"Done hist\r\n"),
            Err(HrvError::ProtocolParse(_))
        ));
        assert!(parse_scalar_response(b"").is_err());
    }

    #[test]
    fn test_stat_display_and_json() {
        assert_eq!(Stat::Defined(2.5).to_string(), "2.500");
        assert_eq!(Stat::Undefined.to_string(), "undefined");
        assert_eq!(serde_json::to_string(&Stat::Undefined).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Stat::Defined(1.5)).unwrap(), "1.5");
    }

    #[test]
    fn test_summary_block_units() {
        let m = Measurements {
            rr: expand(&[0, 1, 3, 0, 2]).unwrap(),
            bpm: expand(&[0, 0, 5]).unwrap(),
            rmssd: 42.0,
            sdann: 10.5,
            hti: 33.3,
        };
        let text = HrvSummary::from_measurements(&m).to_string();
        assert!(text.contains("RMSSD is: 42ms"), "{text}");
        assert!(text.contains("SDANN is: 10.5ms"), "{text}");
        assert!(text.contains("HTI is: 33.3ms"), "{text}");
        assert!(text.contains("mean 2.500"), "{text}");
    }

    #[test]
    fn test_metric_commands() {
        let codes: Vec<i64> = MetricKind::ALL.iter().map(|k| k.command().code()).collect();
        assert_eq!(codes, vec![3, 4, 5]);
    }
}
