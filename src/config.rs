use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Neighbourhood used when grouping liquid bins into islands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    C4,
    C8,
}

/// Require liquid bins to have liquid neighbours, to drop isolated noise
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighbourFilter {
    /// Search radius around a bin centre
    pub radius: f64,
    /// Number of other liquid bins required within the radius
    pub min_neighbours: usize,
}

/// Parameters of the interface extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractParams {
    /// Bins with mass at or above this value are liquid. Must be > 0.
    pub density_threshold: f64,
    /// Width in columns of the centred height smoothing window. Must be odd,
    /// 1 disables it.
    pub smoothing_window: usize,
    pub connectivity: Connectivity,
    pub neighbour_filter: Option<NeighbourFilter>,
    /// Substrate height. `None` uses the lowest liquid row of each island.
    pub floor: Option<f64>,
    /// Fail on fragmented droplets instead of returning every island
    pub single_droplet: bool,
}

impl ExtractParams {
    pub fn new(density_threshold: f64, smoothing_window: usize) -> Self {
        Self {
            density_threshold,
            smoothing_window,
            connectivity: Connectivity::C8,
            neighbour_filter: None,
            floor: None,
            single_droplet: false,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_neighbour_filter(mut self, radius: f64, min_neighbours: usize) -> Self {
        self.neighbour_filter = Some(NeighbourFilter {
            radius,
            min_neighbours,
        });
        self
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn single_droplet(mut self, single: bool) -> Self {
        self.single_droplet = single;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("density_threshold", self.density_threshold)?;
        if self.smoothing_window % 2 == 0 {
            return Err(AnalysisError::InvalidParameter {
                name: "smoothing_window",
                value: self.smoothing_window as f64,
                expected: "an odd number of columns",
            });
        }
        if let Some(filter) = self.neighbour_filter {
            ensure_positive("neighbour_filter.radius", filter.radius)?;
        }
        if let Some(floor) = self.floor {
            if !floor.is_finite() {
                return Err(AnalysisError::InvalidParameter {
                    name: "floor",
                    value: floor,
                    expected: "a finite height",
                });
            }
        }
        Ok(())
    }
}

/// Curve model fitted to the lowest branch points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitModel {
    /// Least-squares polynomial of the given order (1..=3)
    Polynomial { order: usize },
    /// Algebraic least-squares circle
    CircularArc,
}

/// Parameters of the contact angle fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    /// Number of branch points, from the substrate up, used in the fit. Must be >= 3.
    pub fit_window: usize,
    pub model: FitModel,
    /// Tangents closer than this many degrees to an unresolvable direction
    /// leave the angle undefined.
    pub degenerate_tolerance: f64,
}

impl FitParams {
    pub fn new(fit_window: usize, model: FitModel, degenerate_tolerance: f64) -> Self {
        Self {
            fit_window,
            model,
            degenerate_tolerance,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fit_window < 3 {
            return Err(AnalysisError::InvalidParameter {
                name: "fit_window",
                value: self.fit_window as f64,
                expected: ">= 3",
            });
        }
        if let FitModel::Polynomial { order } = self.model {
            if order == 0 || order > 3 {
                return Err(AnalysisError::InvalidParameter {
                    name: "polynomial order",
                    value: order as f64,
                    expected: "1, 2 or 3",
                });
            }
            if order >= self.fit_window {
                return Err(AnalysisError::InvalidParameter {
                    name: "polynomial order",
                    value: order as f64,
                    expected: "less than fit_window",
                });
            }
        }
        if !(0.0..45.0).contains(&self.degenerate_tolerance) {
            return Err(AnalysisError::InvalidParameter {
                name: "degenerate_tolerance",
                value: self.degenerate_tolerance,
                expected: "degrees in [0, 45)",
            });
        }
        Ok(())
    }
}

/// Distance bands of the contact line region classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandWidths {
    /// Bins closer than this to a contact point are near the contact line
    pub inner: f64,
    /// Precursor film bins must lie closer than this to a contact point
    pub outer: f64,
    /// Precursor film bins must lie lower than this above the substrate
    pub film_height: f64,
}

impl BandWidths {
    pub fn new(inner: f64, outer: f64, film_height: f64) -> Self {
        Self {
            inner,
            outer,
            film_height,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("bands.inner", self.inner)?;
        ensure_positive("bands.outer", self.outer)?;
        ensure_positive("bands.film_height", self.film_height)?;
        if self.outer < self.inner {
            return Err(AnalysisError::InvalidParameter {
                name: "bands.outer",
                value: self.outer,
                expected: "at least bands.inner",
            });
        }
        Ok(())
    }
}

/// Everything one per-frame pipeline run needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub extract: ExtractParams,
    pub fit: FitParams,
    pub bands: BandWidths,
}

impl PipelineConfig {
    pub fn new(extract: ExtractParams, fit: FitParams, bands: BandWidths) -> Self {
        Self {
            extract,
            fit,
            bands,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.extract.validate()?;
        self.fit.validate()?;
        self.bands.validate()
    }
}

fn ensure_positive(name: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(AnalysisError::InvalidParameter {
            name,
            value,
            expected: "> 0",
        })
    }
}
