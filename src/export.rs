//! JSON export of a finished session.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::errors::{HrvError, Result};
use crate::histogram::ExpandedHistogram;

/// Everything read back from the monitor after a monitoring session.
///
/// Serializes to the `measurements.json` layout: expanded `RR` and `BPM`
/// histograms plus the three device-reported scalars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurements {
    #[serde(rename = "RR")]
    pub rr: ExpandedHistogram,
    #[serde(rename = "BPM")]
    pub bpm: ExpandedHistogram,
    #[serde(rename = "RMSSD")]
    pub rmssd: f64,
    #[serde(rename = "SDANN")]
    pub sdann: f64,
    #[serde(rename = "HTI")]
    pub hti: f64,
}

impl Measurements {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| HrvError::Export(e.to_string()))
    }

    /// Write the measurements to `path`, replacing any existing file.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|e| HrvError::Export(e.to_string()))?;
        writer.flush()?;
        info!("measurements written: path={}", path.display());
        Ok(())
    }
}
