use serde::Serialize;

use crate::angle::ContactPoint;
use crate::config::BandWidths;
use crate::error::Result;
use crate::interface::InterfaceContour;
use crate::structure::{Bin, GridSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegionLabel {
    Bulk,
    NearContactLine,
    PrecursorFilm,
    Exterior,
}

impl RegionLabel {
    pub const ALL: [RegionLabel; 4] = [
        RegionLabel::Bulk,
        RegionLabel::NearContactLine,
        RegionLabel::PrecursorFilm,
        RegionLabel::Exterior,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RegionLabel::Bulk => "bulk",
            RegionLabel::NearContactLine => "near_contact_line",
            RegionLabel::PrecursorFilm => "precursor_film",
            RegionLabel::Exterior => "exterior",
        }
    }
}

/// One label per snapshot bin, in the snapshot's row-major order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionMap {
    labels: Vec<RegionLabel>,
    shape: (usize, usize),
}

impl RegionMap {
    pub fn labels(&self) -> &[RegionLabel] {
        &self.labels
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn get(&self, idx: usize) -> Option<RegionLabel> {
        self.labels.get(idx).copied()
    }

    pub fn count(&self, label: RegionLabel) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }
}

/// Flow statistics of the bins carrying one label
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionStats {
    pub bins: usize,
    pub mass: f64,
    /// Mass-weighted mean (vx, vz); plain mean when the region holds no mass
    pub mean_velocity: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionSummary {
    pub bulk: RegionStats,
    pub near_contact_line: RegionStats,
    pub precursor_film: RegionStats,
    pub exterior: RegionStats,
    /// Mean outward velocity of the near contact line bins
    pub flux: Option<f64>,
}

impl RegionSummary {
    pub fn stats(&self, label: RegionLabel) -> &RegionStats {
        match label {
            RegionLabel::Bulk => &self.bulk,
            RegionLabel::NearContactLine => &self.near_contact_line,
            RegionLabel::PrecursorFilm => &self.precursor_film,
            RegionLabel::Exterior => &self.exterior,
        }
    }
}

/// Labels bins by contact line region and aggregates flow per region.
/// Labels live in a separate `RegionMap`; the snapshot is never touched.
#[derive(Debug, Clone)]
pub struct ContactLineRegionAnalyzer {
    bands: BandWidths,
}

impl ContactLineRegionAnalyzer {
    pub fn new(bands: BandWidths) -> Result<Self> {
        bands.validate()?;
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &BandWidths {
        &self.bands
    }

    /// Label every bin by its distance to the nearest contact point
    ///
    /// # Arguments
    /// * `snapshot` - Frame whose bins are labelled
    /// * `contour` - Droplet interface, separates bulk from the outside
    /// * `contacts` - Contact points of the droplet. With none, no bin is near
    ///   the contact line or in the precursor film.
    ///
    /// # Returns
    /// One label per bin, in snapshot order
    pub fn classify(
        &self,
        snapshot: &GridSnapshot,
        contour: &InterfaceContour,
        contacts: &[ContactPoint],
    ) -> RegionMap {
        let half_dz = 0.5 * snapshot.spacing().dz;
        let labels = snapshot
            .bins()
            .iter()
            .enumerate()
            .map(|(idx, bin)| {
                if snapshot.is_masked(idx) {
                    return RegionLabel::Exterior;
                }

                let center = bin.center();
                let distance = nearest_contact(contacts, bin)
                    .map(|(_, d)| d)
                    .unwrap_or(f64::INFINITY);
                let inside = contour.contains(&center);
                let height = center.z - contour.substrate;

                if distance < self.bands.inner {
                    RegionLabel::NearContactLine
                } else if inside {
                    RegionLabel::Bulk
                } else if distance < self.bands.outer
                    && height < self.bands.film_height
                    && height > -half_dz
                {
                    RegionLabel::PrecursorFilm
                } else {
                    RegionLabel::Exterior
                }
            })
            .collect();

        RegionMap {
            labels,
            shape: snapshot.shape(),
        }
    }

    /// Aggregate mass, mean velocity and contact line flux per region
    pub fn aggregate(
        &self,
        snapshot: &GridSnapshot,
        map: &RegionMap,
        contacts: &[ContactPoint],
    ) -> RegionSummary {
        let stats_for = |label: RegionLabel| {
            let bins: Vec<&Bin> = snapshot
                .bins()
                .iter()
                .enumerate()
                .filter(|(idx, _)| !snapshot.is_masked(*idx) && map.get(*idx) == Some(label))
                .map(|(_, bin)| bin)
                .collect();
            region_stats(&bins)
        };

        let mut outward_sum = 0.0;
        let mut near_bins = 0usize;
        for (idx, bin) in snapshot.bins().iter().enumerate() {
            if snapshot.is_masked(idx) || map.get(idx) != Some(RegionLabel::NearContactLine) {
                continue;
            }
            if let Some((contact, _)) = nearest_contact(contacts, bin) {
                outward_sum += bin.vx * contact.side.outward();
                near_bins += 1;
            }
        }
        let flux = if near_bins > 0 {
            Some(outward_sum / near_bins as f64)
        } else {
            None
        };

        RegionSummary {
            bulk: stats_for(RegionLabel::Bulk),
            near_contact_line: stats_for(RegionLabel::NearContactLine),
            precursor_film: stats_for(RegionLabel::PrecursorFilm),
            exterior: stats_for(RegionLabel::Exterior),
            flux,
        }
    }
}

fn nearest_contact<'a>(contacts: &'a [ContactPoint], bin: &Bin) -> Option<(&'a ContactPoint, f64)> {
    let center = bin.center();
    contacts
        .iter()
        .map(|c| (c, c.position().distance_to(&center)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn region_stats(bins: &[&Bin]) -> RegionStats {
    let mass: f64 = bins.iter().map(|b| b.mass).sum();
    let mean_velocity = if bins.is_empty() {
        None
    } else if mass > 0.0 {
        let vx = bins.iter().map(|b| b.mass * b.vx).sum::<f64>() / mass;
        let vz = bins.iter().map(|b| b.mass * b.vz).sum::<f64>() / mass;
        Some((vx, vz))
    } else {
        let n = bins.len() as f64;
        Some((
            bins.iter().map(|b| b.vx).sum::<f64>() / n,
            bins.iter().map(|b| b.vz).sum::<f64>() / n,
        ))
    };

    RegionStats {
        bins: bins.len(),
        mass,
        mean_velocity,
    }
}
