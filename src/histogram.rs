//! Reconstruction of the device's compact histogram dumps.
//!
//! The firmware keeps RR intervals and BPM values as per-integer occurrence
//! counts rather than raw samples. A dump is one count per line, bucket 0
//! first, followed by `Done hist`. Bucket 0 collects out-of-range values and
//! carries no sample weight.

use serde::Serialize;

use crate::demux::Frame;
use crate::errors::{HrvError, Result};
use crate::protocol::{Command, Sentinel};

/// Upper bound on the samples one dump may expand to. A day of monitoring
/// at 200 BPM stays far below it; anything larger is a garbled count.
pub const MAX_EXPANDED_SAMPLES: usize = 10_000_000;

/// The two distributions the monitor can dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramKind {
    RrIntervals,
    Bpm,
}

impl HistogramKind {
    pub fn command(self) -> Command {
        match self {
            HistogramKind::RrIntervals => Command::RrIntervalsHistogram,
            HistogramKind::Bpm => Command::BpmHistogram,
        }
    }
}

/// Flat, ascending list of bucket indices, each repeated by its count.
///
/// Intra-bucket order and sub-bucket precision are gone; this is a display
/// quality distribution, not the original series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExpandedHistogram(Vec<u32>);

impl ExpandedHistogram {
    pub fn values(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values widened for statistics.
    pub fn as_f64(&self) -> Vec<f64> {
        self.0.iter().map(|&v| f64::from(v)).collect()
    }

    pub fn into_inner(self) -> Vec<u32> {
        self.0
    }
}

/// Expand bucket counts into the samples they stand for.
///
/// Bucket `i` (for `i >= 1`) contributes `counts[i]` copies of `i`.
/// Fails with [`HrvError::ProtocolParse`] when the counts add up to more
/// than [`MAX_EXPANDED_SAMPLES`].
pub fn expand(counts: &[u32]) -> Result<ExpandedHistogram> {
    let total = expanded_len(counts)?;
    let mut values = Vec::with_capacity(total);
    for (bucket, &count) in counts.iter().enumerate().skip(1) {
        values.extend(std::iter::repeat(bucket as u32).take(count as usize));
    }
    Ok(ExpandedHistogram(values))
}

fn expanded_len(counts: &[u32]) -> Result<usize> {
    counts
        .iter()
        .skip(1)
        .try_fold(0usize, |total, &count| {
            total
                .checked_add(count as usize)
                .filter(|&t| t <= MAX_EXPANDED_SAMPLES)
        })
        .ok_or_else(|| {
            HrvError::ProtocolParse(format!(
                "histogram expands to more than {MAX_EXPANDED_SAMPLES} samples"
            ))
        })
}

/// Parse the frames of one histogram dump into bucket counts.
///
/// The list must end with `Done hist`, which is dropped. Every other frame
/// must be a non-negative integer; a bad frame fails the whole dump, since
/// skipping it would shift every later bucket.
pub fn parse_counts(frames: &[Frame]) -> Result<Vec<u32>> {
    let Some((last, body)) = frames.split_last() else {
        return Err(HrvError::ProtocolParse(
            "histogram dump is empty".to_string(),
        ));
    };
    if !last.is(Sentinel::DoneHist) {
        return Err(HrvError::ProtocolParse(format!(
            "histogram dump does not end with {:?}: last frame {:?}",
            Sentinel::DoneHist.as_str(),
            last
        )));
    }

    body.iter()
        .enumerate()
        .map(|(bucket, frame)| parse_count(bucket, frame))
        .collect()
}

fn parse_count(bucket: usize, frame: &Frame) -> Result<u32> {
    let text = frame.text()?;
    let value: i64 = text.parse().map_err(|_| {
        HrvError::ProtocolParse(format!("bucket {bucket}: {text:?} is not an integer"))
    })?;
    if value < 0 {
        return Err(HrvError::ProtocolParse(format!(
            "bucket {bucket}: negative count {value}"
        )));
    }
    u32::try_from(value).map_err(|_| {
        HrvError::ProtocolParse(format!("bucket {bucket}: count {value} out of range"))
    })
}

/// Parse and expand one dump.
pub fn decode(frames: &[Frame]) -> Result<ExpandedHistogram> {
    expand(&parse_counts(frames)?)
}
