use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// 2D coordinate in the (x, z) plane, z being the height above the substrate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    /// Calculate Euclidean distance to another point
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// Uniform bin size of a lattice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spacing {
    pub dx: f64,
    pub dz: f64,
}

impl Spacing {
    pub fn new(dx: f64, dz: f64) -> Self {
        Self { dx, dz }
    }

    pub fn min(&self) -> f64 {
        self.dx.min(self.dz)
    }
}

/// One cell of the binned flow field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// Bin centre
    pub x: f64,
    pub z: f64,
    /// Accumulated mass (or density) in the bin
    pub mass: f64,
    pub vx: f64,
    pub vz: f64,
    /// Number of particles or tracers sampled into the bin, when known
    pub count: Option<f64>,
}

impl Bin {
    pub fn empty(x: f64, z: f64) -> Self {
        Self {
            x,
            z,
            mass: 0.0,
            vx: 0.0,
            vz: 0.0,
            count: None,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x, self.z)
    }
}

/// One time frame of binned data on a complete rectangular lattice.
///
/// Bins are stored row-major, `iz * nx + ix`, with `iz = 0` the bottom row.
/// Lattice positions a reader could not fill are kept as empty bins flagged
/// in the mask.
#[derive(Debug, Clone)]
pub struct GridSnapshot {
    timestamp: f64,
    origin: Point,
    spacing: Spacing,
    nx: usize,
    nz: usize,
    bins: Vec<Bin>,
    masked: Vec<bool>,
}

impl GridSnapshot {
    /// Build a snapshot from row-major bins.
    ///
    /// `origin` is the lower-left corner of the lattice; every bin centre must
    /// sit at `origin + (i + 1/2) * spacing`.
    pub fn new(
        timestamp: f64,
        origin: Point,
        spacing: Spacing,
        shape: (usize, usize),
        bins: Vec<Bin>,
    ) -> Result<Self> {
        let (nx, nz) = shape;
        if nx == 0 || nz == 0 {
            return Err(AnalysisError::InvalidGrid(format!(
                "lattice shape ({}, {}) has no bins",
                nx, nz
            )));
        }
        if !(spacing.dx > 0.0 && spacing.dz > 0.0) {
            return Err(AnalysisError::InvalidGrid(format!(
                "bin spacing ({}, {}) must be positive",
                spacing.dx, spacing.dz
            )));
        }
        if bins.len() != nx * nz {
            return Err(AnalysisError::InvalidGrid(format!(
                "expected {} bins for a {}x{} lattice, got {}",
                nx * nz,
                nx,
                nz,
                bins.len()
            )));
        }

        let tolerance = 1e-6 * spacing.min();
        for (idx, bin) in bins.iter().enumerate() {
            let ix = idx % nx;
            let iz = idx / nx;
            let expected_x = origin.x + (ix as f64 + 0.5) * spacing.dx;
            let expected_z = origin.z + (iz as f64 + 0.5) * spacing.dz;
            if (bin.x - expected_x).abs() > tolerance || (bin.z - expected_z).abs() > tolerance {
                return Err(AnalysisError::InvalidGrid(format!(
                    "bin {} at ({}, {}) is off the lattice, expected ({}, {})",
                    idx, bin.x, bin.z, expected_x, expected_z
                )));
            }
        }

        Ok(Self {
            timestamp,
            origin,
            spacing,
            nx,
            nz,
            masked: vec![false; bins.len()],
            bins,
        })
    }

    /// Build a snapshot by sampling `(mass, vx, vz)` at every bin centre
    pub fn from_fn<F>(
        timestamp: f64,
        origin: Point,
        spacing: Spacing,
        shape: (usize, usize),
        mut f: F,
    ) -> Result<Self>
    where
        F: FnMut(Point) -> (f64, f64, f64),
    {
        let (nx, nz) = shape;
        let mut bins = Vec::with_capacity(nx * nz);
        for iz in 0..nz {
            for ix in 0..nx {
                let x = origin.x + (ix as f64 + 0.5) * spacing.dx;
                let z = origin.z + (iz as f64 + 0.5) * spacing.dz;
                let (mass, vx, vz) = f(Point::new(x, z));
                bins.push(Bin {
                    x,
                    z,
                    mass,
                    vx,
                    vz,
                    count: None,
                });
            }
        }
        Self::new(timestamp, origin, spacing, shape, bins)
    }

    /// Flag lattice positions as missing. Masked bins never count as liquid.
    pub fn with_mask(mut self, masked: Vec<bool>) -> Result<Self> {
        if masked.len() != self.bins.len() {
            return Err(AnalysisError::InvalidGrid(format!(
                "mask has {} entries for {} bins",
                masked.len(),
                self.bins.len()
            )));
        }
        self.masked = masked;
        Ok(self)
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    /// Number of bins along x and z
    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.nz)
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn index(&self, ix: usize, iz: usize) -> usize {
        iz * self.nx + ix
    }

    pub fn bin(&self, ix: usize, iz: usize) -> Option<&Bin> {
        if ix < self.nx && iz < self.nz {
            self.bins.get(self.index(ix, iz))
        } else {
            None
        }
    }

    pub fn is_masked(&self, idx: usize) -> bool {
        self.masked.get(idx).copied().unwrap_or(true)
    }

    pub fn is_sparse(&self) -> bool {
        self.masked.iter().any(|&m| m)
    }

    /// Half-width and half-height of every bin
    pub fn half_size(&self) -> (f64, f64) {
        (0.5 * self.spacing.dx, 0.5 * self.spacing.dz)
    }

    /// Horizontal and vertical extent of the lattice
    pub fn extent(&self) -> (f64, f64) {
        (
            self.nx as f64 * self.spacing.dx,
            self.nz as f64 * self.spacing.dz,
        )
    }

    pub fn column_x(&self, ix: usize) -> f64 {
        self.origin.x + (ix as f64 + 0.5) * self.spacing.dx
    }

    pub fn row_z(&self, iz: usize) -> f64 {
        self.origin.z + (iz as f64 + 0.5) * self.spacing.dz
    }

    /// Row whose centre lies closest to height `z`
    pub fn nearest_row(&self, z: f64) -> usize {
        let pos = ((z - self.origin.z) / self.spacing.dz - 0.5).round();
        pos.clamp(0.0, (self.nz - 1) as f64) as usize
    }

    pub fn total_mass(&self) -> f64 {
        self.bins
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.is_masked(*idx))
            .map(|(_, bin)| bin.mass)
            .sum()
    }

    /// Return the sub-lattice of bins whose centres fall inside the limits.
    ///
    /// `None` leaves that side of a limit open.
    pub fn cut(
        &self,
        xlim: (Option<f64>, Option<f64>),
        zlim: (Option<f64>, Option<f64>),
    ) -> Result<Self> {
        let inside = |v: f64, lim: (Option<f64>, Option<f64>)| {
            lim.0.map_or(true, |lo| v >= lo) && lim.1.map_or(true, |hi| v <= hi)
        };

        let columns: Vec<usize> = (0..self.nx).filter(|&ix| inside(self.column_x(ix), xlim)).collect();
        let rows: Vec<usize> = (0..self.nz).filter(|&iz| inside(self.row_z(iz), zlim)).collect();

        let (Some(&ix0), Some(&iz0)) = (columns.first(), rows.first()) else {
            return Err(AnalysisError::InvalidGrid(
                "cut limits leave no bins".to_string(),
            ));
        };

        let mut bins = Vec::with_capacity(columns.len() * rows.len());
        let mut masked = Vec::with_capacity(columns.len() * rows.len());
        for &iz in &rows {
            for &ix in &columns {
                let idx = self.index(ix, iz);
                bins.push(self.bins[idx]);
                masked.push(self.masked[idx]);
            }
        }

        let origin = Point::new(
            self.origin.x + ix0 as f64 * self.spacing.dx,
            self.origin.z + iz0 as f64 * self.spacing.dz,
        );
        Self::new(
            self.timestamp,
            origin,
            self.spacing,
            (columns.len(), rows.len()),
            bins,
        )?
        .with_mask(masked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: (usize, usize)) -> GridSnapshot {
        GridSnapshot::from_fn(
            0.0,
            Point::new(0.0, 0.0),
            Spacing::new(1.0, 0.5),
            shape,
            |p| (p.x + p.z, 0.0, 0.0),
        )
        .unwrap()
    }

    #[test]
    fn test_point_distance() {
        let p1 = Point::new(0.0, 0.0);
        let p2 = Point::new(3.0, 4.0);
        assert_eq!(p1.distance_to(&p2), 5.0);
    }

    #[test]
    fn test_lattice_layout() {
        let grid = ramp((4, 3));
        assert_eq!(grid.shape(), (4, 3));
        assert_eq!(grid.len(), 12);
        assert_eq!(grid.extent(), (4.0, 1.5));
        let bin = grid.bin(2, 1).unwrap();
        assert_eq!(bin.x, 2.5);
        assert_eq!(bin.z, 0.75);
        assert!(grid.bin(4, 0).is_none());
        assert_eq!(grid.nearest_row(0.8), 1);
        assert_eq!(grid.nearest_row(-3.0), 0);
        assert!(!grid.is_sparse());
    }

    #[test]
    fn test_off_lattice_bin_is_rejected() {
        let mut bins = ramp((2, 2)).bins().to_vec();
        bins[3].x += 0.3;
        let result = GridSnapshot::new(
            0.0,
            Point::new(0.0, 0.0),
            Spacing::new(1.0, 0.5),
            (2, 2),
            bins,
        );
        assert!(matches!(result, Err(AnalysisError::InvalidGrid(_))));
    }

    #[test]
    fn test_wrong_bin_count_is_rejected() {
        let bins = ramp((2, 2)).bins()[..3].to_vec();
        let result = GridSnapshot::new(
            0.0,
            Point::new(0.0, 0.0),
            Spacing::new(1.0, 0.5),
            (2, 2),
            bins,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cut_keeps_sub_lattice() {
        let grid = ramp((6, 4));
        let cut = grid.cut((Some(1.0), Some(3.9)), (None, Some(1.0))).unwrap();
        assert_eq!(cut.shape(), (3, 2));
        assert_eq!(cut.origin(), Point::new(1.0, 0.0));
        assert_eq!(cut.bin(0, 0).unwrap().x, 1.5);
        assert!(grid.cut((Some(10.0), None), (None, None)).is_err());
    }

    #[test]
    fn test_masked_bins_are_excluded_from_mass() {
        let grid = ramp((2, 1));
        let total = grid.total_mass();
        let masked = grid.with_mask(vec![true, false]).unwrap();
        assert!(masked.is_sparse());
        assert!(masked.total_mass() < total);
        assert!(masked.is_masked(0));
    }
}
