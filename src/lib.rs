pub mod angle;
pub mod config;
pub mod contact_line;
pub mod datamap;
pub mod error;
pub mod fit;
pub mod interface;
pub mod output;
pub mod pipeline;
pub mod series;
pub mod structure;

#[cfg(feature = "python")]
pub mod python_bindings;

// Re-export commonly used types and traits
pub use angle::{cap_angle, footprint_radius, ContactEstimate, ContactPoint, RadiusAngleEstimator};
pub use config::{BandWidths, Connectivity, ExtractParams, FitModel, FitParams, PipelineConfig};
pub use contact_line::{ContactLineRegionAnalyzer, RegionLabel, RegionMap, RegionSummary};
pub use datamap::{find_datamap_files, read_frames, CsvDatamap, SnapshotSource};
pub use error::{AnalysisError, FailureReason, Result};
pub use interface::{Branch, ContourResult, InterfaceContour, InterfaceExtractor, Recenter, Side};
pub use output::{
    load_spreading_csv, save_contour_to_csv, save_regions_to_csv, save_series_to_csv,
    save_smoothed_to_csv, save_summary_to_csv,
};
pub use pipeline::{FrameAnalysis, FramePipeline};
pub use series::{
    fit_power_law, smooth_samples, FrameOutcome, FrameResult, SpreadingFit, SpreadingSample,
    TimeSeries, TimeSeriesAggregator,
};
pub use structure::{Bin, GridSnapshot, Point, Spacing};
