use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::angle::{cap_angle, footprint_radius, ContactPoint, Parametrization, RadiusAngleEstimator};
use crate::config::PipelineConfig;
use crate::contact_line::{ContactLineRegionAnalyzer, RegionMap};
use crate::error::{AnalysisError, Result};
use crate::interface::{ContourResult, InterfaceContour, InterfaceExtractor, Side};
use crate::series::{FrameOutcome, FrameResult, SideMeasurement, TimeSeries, TimeSeriesAggregator};
use crate::structure::GridSnapshot;

/// Everything derived from one snapshot
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub contours: ContourResult,
    /// Left and right contact points of the primary droplet
    pub contacts: Vec<ContactPoint>,
    pub regions: RegionMap,
    pub result: FrameResult,
}

impl FrameAnalysis {
    /// Contour of the most massive droplet, the one that was measured
    pub fn contour(&self) -> &InterfaceContour {
        self.contours.primary()
    }
}

/// Runs interface extraction, radius and angle estimation and region
/// classification on every frame. Frames are analysed in parallel and
/// appended to the series in input order by a single writer.
#[derive(Debug, Clone)]
pub struct FramePipeline {
    config: PipelineConfig,
    extractor: InterfaceExtractor,
    estimator: RadiusAngleEstimator,
    regions: ContactLineRegionAnalyzer,
    show_progress: bool,
}

impl FramePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            extractor: InterfaceExtractor::new(config.extract)?,
            estimator: RadiusAngleEstimator::new(config.fit)?,
            regions: ContactLineRegionAnalyzer::new(config.bands)?,
            show_progress: false,
        })
    }

    /// Draw a progress bar on stderr while running over frames
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Analyse one snapshot, keeping the contour and region labels
    pub fn analyse_detailed(&self, snapshot: &GridSnapshot) -> Result<FrameAnalysis> {
        let contours = self.extractor.extract(snapshot)?;
        let contour = contours.primary();

        let (left, left_contact) = self.measure_side(contour, Side::Left)?;
        let (right, right_contact) = self.measure_side(contour, Side::Right)?;
        let contacts = vec![left_contact, right_contact];

        let regions = self.regions.classify(snapshot, contour, &contacts);
        let summary = self.regions.aggregate(snapshot, &regions, &contacts);

        let result = FrameResult {
            left,
            right,
            islands: contours.island_count(),
            center_x: contour.center_of_mass.x,
            area: contour.area(),
            cap_angle: cap_angle(contour),
            regions: summary,
        };

        Ok(FrameAnalysis {
            contacts,
            regions,
            result,
            contours,
        })
    }

    /// Analyse one snapshot. Errors become a gap carrying their reason code.
    pub fn analyse_frame(&self, snapshot: &GridSnapshot) -> FrameOutcome {
        match self.analyse_detailed(snapshot) {
            Ok(analysis) => FrameOutcome::Analysed(analysis.result),
            Err(err) => {
                warn!("t = {}: frame skipped: {}", snapshot.timestamp(), err);
                FrameOutcome::failed(&err)
            }
        }
    }

    /// Analyse all snapshots and collect them into a finalized time series.
    ///
    /// # Arguments
    /// * `snapshots` - Frames ordered by strictly increasing timestamp
    ///
    /// # Returns
    /// The finalized series. A failing frame is recorded as a gap and never
    /// stops the others; unordered timestamps fail with `NonMonotonicTime`.
    pub fn run(&self, snapshots: &[GridSnapshot]) -> Result<TimeSeries> {
        let pb = if self.show_progress {
            ProgressBar::new(snapshots.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} frames ({percent}%) | ETA: {eta}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message("Analysing frames");

        let outcomes: Vec<FrameOutcome> = snapshots
            .par_iter()
            .map(|snapshot| {
                let outcome = self.analyse_frame(snapshot);
                pb.inc(1);
                outcome
            })
            .collect();

        pb.finish_with_message("Analysis complete");

        let mut aggregator = TimeSeriesAggregator::new();
        for (snapshot, outcome) in snapshots.iter().zip(outcomes) {
            aggregator.append(snapshot.timestamp(), outcome)?;
        }
        let series = aggregator.finalize()?;

        info!(
            "analysed {} frames: {} succeeded, {} gaps",
            series.len(),
            series.len() - series.gaps(),
            series.gaps()
        );
        Ok(series)
    }

    /// Radius and contact point of one side. A branch too short for the fit
    /// still reports its radius, with the angle left undefined.
    fn measure_side(
        &self,
        contour: &InterfaceContour,
        side: Side,
    ) -> Result<(SideMeasurement, ContactPoint)> {
        match self.estimator.estimate(contour, side) {
            Ok(estimate) => Ok((SideMeasurement::from(&estimate), estimate.contact)),
            Err(AnalysisError::InsufficientPoints { required, available }) => {
                let missing = AnalysisError::InsufficientPoints { required, available };
                let base = *contour.branch(side).base().ok_or(missing)?;
                let radius = footprint_radius(contour, side).unwrap_or(0.0);
                debug!(
                    "{} branch has {} of {} points, angle not fitted",
                    side.name(),
                    available,
                    required
                );

                let contact = ContactPoint {
                    side,
                    x: base.x,
                    z: contour.substrate,
                    angle: None,
                    residual: f64::NAN,
                    confidence: 0.0,
                    parametrization: Parametrization::HeightOfX,
                };
                let measurement = SideMeasurement {
                    radius,
                    contact_x: base.x,
                    angle: None,
                    confidence: 0.0,
                };
                Ok((measurement, contact))
            }
            Err(err) => Err(err),
        }
    }
}
