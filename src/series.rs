use log::warn;
use serde::{Deserialize, Serialize};

use crate::angle::ContactEstimate;
use crate::contact_line::RegionSummary;
use crate::error::{AnalysisError, FailureReason, Result};
use crate::fit::linear_regression;

/// Radius and contact line measurements of one side of a droplet
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SideMeasurement {
    pub radius: f64,
    pub contact_x: f64,
    /// Contact angle in degrees, `None` when it could not be resolved
    pub angle: Option<f64>,
    pub confidence: f64,
}

impl From<&ContactEstimate> for SideMeasurement {
    fn from(estimate: &ContactEstimate) -> Self {
        Self {
            radius: estimate.radius,
            contact_x: estimate.contact.x,
            angle: estimate.contact.angle,
            confidence: estimate.contact.confidence,
        }
    }
}

/// Result of analysing a single frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub left: SideMeasurement,
    pub right: SideMeasurement,
    /// Number of disconnected droplets found in the frame
    pub islands: usize,
    pub center_x: f64,
    /// Cross-section area of the droplet
    pub area: f64,
    /// Angle of a spherical cap with the same footprint and height
    pub cap_angle: Option<f64>,
    pub regions: RegionSummary,
}

impl FrameResult {
    /// Spreading radius: half the distance between the contact points
    pub fn radius(&self) -> f64 {
        0.5 * (self.left.radius + self.right.radius)
    }

    /// Mean of the resolved contact angles
    pub fn mean_angle(&self) -> Option<f64> {
        match (self.left.angle, self.right.angle) {
            (Some(l), Some(r)) => Some(0.5 * (l + r)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

/// Outcome of one frame. Failed frames are kept as explicit gaps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FrameOutcome {
    Analysed(FrameResult),
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl FrameOutcome {
    /// Turn a frame error into a gap with its reason code
    pub fn failed(err: &AnalysisError) -> Self {
        FrameOutcome::Failed {
            reason: err.failure_reason(),
            message: err.to_string(),
        }
    }

    pub fn result(&self) -> Option<&FrameResult> {
        match self {
            FrameOutcome::Analysed(result) => Some(result),
            FrameOutcome::Failed { .. } => None,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, FrameOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub timestamp: f64,
    pub outcome: FrameOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Building,
    Finalized,
}

/// Collects per-frame outcomes in strictly increasing time order
#[derive(Debug)]
pub struct TimeSeriesAggregator {
    records: Vec<FrameRecord>,
    state: State,
}

impl Default for TimeSeriesAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesAggregator {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            state: State::Building,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    /// Append the outcome of the frame at `timestamp`.
    ///
    /// The timestamp must be strictly greater than the previous one.
    pub fn append(&mut self, timestamp: f64, outcome: FrameOutcome) -> Result<()> {
        if self.state == State::Finalized {
            return Err(AnalysisError::SeriesFinalized);
        }
        if !timestamp.is_finite() {
            return Err(AnalysisError::InvalidParameter {
                name: "timestamp",
                value: timestamp,
                expected: "a finite time",
            });
        }
        if let Some(last) = self.records.last() {
            if timestamp <= last.timestamp {
                return Err(AnalysisError::NonMonotonicTime {
                    last: last.timestamp,
                    given: timestamp,
                });
            }
        }

        self.records.push(FrameRecord { timestamp, outcome });
        Ok(())
    }

    /// Close the series. Only the first call succeeds.
    pub fn finalize(&mut self) -> Result<TimeSeries> {
        if self.state == State::Finalized {
            return Err(AnalysisError::SeriesFinalized);
        }
        self.state = State::Finalized;
        Ok(TimeSeries {
            records: std::mem::take(&mut self.records),
        })
    }
}

/// Running average of the analysed frames around one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothedPoint {
    pub timestamp: f64,
    pub radius: f64,
    pub angle: Option<f64>,
}

/// Means over a window of consecutive frames
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowSummary {
    /// Timestamp of the first frame in the window
    pub timestamp: f64,
    pub analysed: usize,
    pub failed: usize,
    pub radius: Option<f64>,
    pub angle: Option<f64>,
}

/// Power law `r = prefactor * t^exponent` fitted to the spreading radius
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadingFit {
    pub prefactor: f64,
    pub exponent: f64,
    /// Number of frames the fit used
    pub points: usize,
}

impl SpreadingFit {
    pub fn radius_at(&self, time: f64) -> f64 {
        self.prefactor * time.powf(self.exponent)
    }
}

/// Finalized, time-ordered frame records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    records: Vec<FrameRecord>,
}

impl TimeSeries {
    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Successfully analysed frames with their timestamps
    pub fn analysed(&self) -> impl Iterator<Item = (f64, &FrameResult)> + '_ {
        self.records
            .iter()
            .filter_map(|r| r.outcome.result().map(|result| (r.timestamp, result)))
    }

    pub fn gaps(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_gap()).count()
    }

    /// Time of the first frame in which a droplet was analysed
    pub fn impact_time(&self) -> Option<f64> {
        self.analysed().next().map(|(t, _)| t)
    }

    /// Radius and mean angle of every analysed frame
    pub fn samples(&self) -> Vec<SpreadingSample> {
        self.analysed()
            .map(|(time, result)| SpreadingSample {
                time,
                radius: result.radius(),
                angle: result.mean_angle(),
            })
            .collect()
    }

    /// Centred running average over `window_size` analysed frames.
    /// Gaps are skipped, not averaged as zeros.
    pub fn smooth(&self, window_size: usize) -> Result<Vec<SmoothedPoint>> {
        smooth_samples(&self.samples(), window_size)
    }

    /// Split the records into consecutive windows of `window_size` frames
    /// and average each. The last window may be shorter.
    pub fn summarize(&self, window_size: usize) -> Result<Vec<WindowSummary>> {
        ensure_window(window_size)?;
        let total_frames = self.records.len();
        let num_windows = (total_frames + window_size - 1) / window_size; // Ceiling division

        let summaries = (0..num_windows)
            .map(|window_idx| {
                let start_idx = window_idx * window_size;
                let end_idx = (start_idx + window_size).min(total_frames);
                let window = &self.records[start_idx..end_idx];
                let results: Vec<&FrameResult> =
                    window.iter().filter_map(|r| r.outcome.result()).collect();

                WindowSummary {
                    timestamp: window[0].timestamp,
                    analysed: results.len(),
                    failed: window.len() - results.len(),
                    radius: mean(results.iter().map(|r| r.radius())),
                    angle: mean(results.iter().filter_map(|r| r.mean_angle())),
                }
            })
            .collect();

        Ok(summaries)
    }

    /// Fit a power law to the spreading radius against the time since impact
    pub fn fit_spreading(&self, limits: (Option<f64>, Option<f64>)) -> Result<SpreadingFit> {
        fit_power_law(&self.samples(), limits)
    }
}

/// Radius and contact angle of one analysed frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadingSample {
    pub time: f64,
    pub radius: f64,
    pub angle: Option<f64>,
}

/// Centred running average of radius and angle, `window_size` samples wide
/// and truncated at both ends
pub fn smooth_samples(samples: &[SpreadingSample], window_size: usize) -> Result<Vec<SmoothedPoint>> {
    ensure_window(window_size)?;
    let total_frames = samples.len();
    let half_window = window_size / 2;

    let smoothed = samples
        .iter()
        .enumerate()
        .map(|(idx, sample)| {
            let start_idx = idx.saturating_sub(half_window);
            let end_idx = (idx + half_window + 1).min(total_frames);
            let window = &samples[start_idx..end_idx];

            SmoothedPoint {
                timestamp: sample.time,
                radius: window.iter().map(|s| s.radius).sum::<f64>() / window.len() as f64,
                angle: mean(window.iter().filter_map(|s| s.angle)),
            }
        })
        .collect();

    Ok(smoothed)
}

/// Fit `r = a * t^k` in log-log space, with `t` the time since the first
/// sample (the impact).
///
/// Only samples after impact with a positive radius take part.
///
/// # Arguments
/// * `samples` - Spreading samples ordered by time
/// * `limits` - Optional `(t_min, t_max)` since impact. A range holding no
///   samples falls back to all of them.
///
/// # Returns
/// Prefactor `a`, exponent `k` and the number of fitted samples
pub fn fit_power_law(
    samples: &[SpreadingSample],
    limits: (Option<f64>, Option<f64>),
) -> Result<SpreadingFit> {
    let impact = samples
        .first()
        .map(|s| s.time)
        .ok_or(AnalysisError::InsufficientPoints {
            required: 2,
            available: 0,
        })?;

    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| (s.time - impact, s.radius))
        .filter(|&(t, r)| t > 0.0 && r > 0.0)
        .collect();

    let (lower, upper) = limits;
    let in_limits: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|&(t, _)| lower.map_or(true, |lo| t >= lo) && upper.map_or(true, |hi| t <= hi))
        .collect();

    let points = if in_limits.is_empty() {
        warn!(
            "no frames within fit limits {:?}, fitting the entire series",
            limits
        );
        points
    } else {
        in_limits
    };

    if points.len() < 2 {
        return Err(AnalysisError::InsufficientPoints {
            required: 2,
            available: points.len(),
        });
    }

    let log_t: Vec<f64> = points.iter().map(|(t, _)| t.log10()).collect();
    let log_r: Vec<f64> = points.iter().map(|(_, r)| r.log10()).collect();
    let (log_a, k) = linear_regression(&log_t, &log_r).ok_or(AnalysisError::InsufficientPoints {
        required: 2,
        available: points.len(),
    })?;

    Ok(SpreadingFit {
        prefactor: 10f64.powf(log_a),
        exponent: k,
        points: points.len(),
    })
}

fn ensure_window(window_size: usize) -> Result<()> {
    if window_size == 0 {
        return Err(AnalysisError::InvalidParameter {
            name: "window_size",
            value: 0.0,
            expected: ">= 1",
        });
    }
    Ok(())
}

fn mean<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
