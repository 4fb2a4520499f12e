use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::{AnalysisError, Result};
use crate::structure::{Bin, GridSnapshot, Point, Spacing};

/// Largest inferred lattice, in bins per row read, before the coordinates
/// are rejected as not lying on a regular grid
const MAX_BINS_PER_ROW: f64 = 16.0;

/// Anything that can turn a data map file into a snapshot
pub trait SnapshotSource {
    /// Read the data map at `path` as the frame at `timestamp`
    fn read_snapshot(&self, path: &Path, timestamp: f64) -> Result<GridSnapshot>;
}

/// One bin of a data map file
#[derive(Debug, Clone, Deserialize)]
struct DatamapRow {
    #[serde(rename = "X")]
    x: f64,
    /// Height above the substrate
    #[serde(rename = "Y")]
    y: f64,
    /// Number of sampled particles
    #[serde(rename = "N", default)]
    n: Option<f64>,
    #[serde(rename = "M")]
    m: f64,
    #[serde(rename = "U")]
    u: f64,
    #[serde(rename = "V")]
    v: f64,
}

/// Plain-text data maps with a header naming the columns `X,Y,N,T,M,U,V`.
///
/// Rows may come in any order and lattice points may be missing; the lattice
/// is inferred from the distinct coordinates and holes become masked bins.
#[derive(Debug, Clone)]
pub struct CsvDatamap {
    delimiter: u8,
}

impl Default for CsvDatamap {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvDatamap {
    pub fn new() -> Self {
        Self { delimiter: b',' }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Parse a data map from any reader
    pub fn read_from<R: io::Read>(&self, reader: R, timestamp: f64) -> Result<GridSnapshot> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for result in reader.deserialize() {
            let row: DatamapRow = result?;
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(AnalysisError::Parse("data map holds no bins".to_string()));
        }

        snapshot_from_rows(&rows, timestamp)
    }
}

impl SnapshotSource for CsvDatamap {
    fn read_snapshot(&self, path: &Path, timestamp: f64) -> Result<GridSnapshot> {
        let file = std::fs::File::open(path)?;
        let snapshot = self.read_from(file, timestamp).map_err(|e| match e {
            AnalysisError::Parse(msg) => AnalysisError::Parse(format!("{}: {}", path.display(), msg)),
            AnalysisError::InvalidGrid(msg) => {
                AnalysisError::InvalidGrid(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        debug!(
            "read {} ({}x{} bins, t = {})",
            path.display(),
            snapshot.shape().0,
            snapshot.shape().1,
            timestamp
        );
        Ok(snapshot)
    }
}

/// Data map files `{base}{n:05}{ext}` from `begin` up to `end`, stopping at
/// the first number without a file
pub fn find_datamap_files(base: &str, begin: usize, end: Option<usize>, ext: &str) -> Vec<PathBuf> {
    let last = end.unwrap_or(usize::MAX);
    (begin..=last)
        .map(|n| PathBuf::from(format!("{}{:05}{}", base, n, ext)))
        .take_while(|path| path.is_file())
        .collect()
}

/// Read every file as a frame, the i-th one at time `start + i * dt`
pub fn read_frames<S: SnapshotSource>(
    source: &S,
    paths: &[PathBuf],
    start: f64,
    dt: f64,
) -> Result<Vec<GridSnapshot>> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| source.read_snapshot(path, start + i as f64 * dt))
        .collect()
}

/// Distinct values of a coordinate, sorted, with the bin size between them
fn lattice_axis(values: impl Iterator<Item = f64>, name: &str) -> Result<(Vec<f64>, f64)> {
    let mut axis: Vec<f64> = values.collect();
    if let Some(bad) = axis.iter().find(|v| !v.is_finite()) {
        return Err(AnalysisError::Parse(format!("non-finite {} coordinate {}", name, bad)));
    }
    axis.sort_by(|a, b| a.total_cmp(b));
    axis.dedup_by(|a, b| (*a - *b).abs() <= 1e-9 * b.abs().max(1.0));

    // A single row or column is taken to start at zero
    let size = if axis.len() > 1 {
        axis.windows(2)
            .map(|w| w[1] - w[0])
            .fold(f64::INFINITY, f64::min)
    } else {
        2.0 * axis[0]
    };
    if !(size > 0.0) {
        return Err(AnalysisError::InvalidGrid(format!(
            "cannot infer a positive bin size along {} from {:?}",
            name, axis
        )));
    }
    Ok((axis, size))
}

fn snapshot_from_rows(rows: &[DatamapRow], timestamp: f64) -> Result<GridSnapshot> {
    let (xs, dx) = lattice_axis(rows.iter().map(|r| r.x), "X")?;
    let (zs, dz) = lattice_axis(rows.iter().map(|r| r.y), "Y")?;
    let (x0, z0) = (xs[0], zs[0]);

    let nx_f = ((xs[xs.len() - 1] - x0) / dx).round() + 1.0;
    let nz_f = ((zs[zs.len() - 1] - z0) / dz).round() + 1.0;
    if nx_f * nz_f > MAX_BINS_PER_ROW * rows.len() as f64 {
        return Err(AnalysisError::InvalidGrid(format!(
            "{} rows would span a {} x {} lattice with bin size {} x {}",
            rows.len(),
            nx_f,
            nz_f,
            dx,
            dz
        )));
    }
    let (nx, nz) = (nx_f as usize, nz_f as usize);
    let spacing = Spacing::new(dx, dz);
    let origin = Point::new(x0 - 0.5 * dx, z0 - 0.5 * dz);

    let mut bins: Vec<Bin> = (0..nx * nz)
        .map(|idx| {
            let (ix, iz) = (idx % nx, idx / nx);
            Bin::empty(
                origin.x + (ix as f64 + 0.5) * dx,
                origin.z + (iz as f64 + 0.5) * dz,
            )
        })
        .collect();
    let mut masked = vec![true; nx * nz];

    for row in rows {
        let fx = (row.x - x0) / dx;
        let fz = (row.y - z0) / dz;
        let (ix, iz) = (fx.round(), fz.round());
        if (fx - ix).abs() > 0.25 || (fz - iz).abs() > 0.25 {
            return Err(AnalysisError::InvalidGrid(format!(
                "bin at ({}, {}) does not sit on a {} x {} lattice",
                row.x, row.y, dx, dz
            )));
        }

        let idx = iz as usize * nx + ix as usize;
        if !masked[idx] {
            return Err(AnalysisError::InvalidGrid(format!(
                "duplicate bin at ({}, {})",
                row.x, row.y
            )));
        }
        masked[idx] = false;

        let bin = &mut bins[idx];
        bin.mass = row.m;
        bin.vx = row.u;
        bin.vz = row.v;
        bin.count = row.n;
    }

    let missing = masked.iter().filter(|&&m| m).count();
    if missing > 0 {
        debug!("{} of {} lattice points missing, masked", missing, nx * nz);
    }

    GridSnapshot::new(timestamp, origin, spacing, (nx, nz), bins)?.with_mask(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MAP: &str = "\
X,Y,N,T,M,U,V
0.5,0.5,4,300,1.0,0.1,0.0
1.5,0.5,2,300,0.5,0.2,0.0
0.5,1.5,0,300,0.0,0.0,0.0
1.5,1.5,1,300,0.2,-0.1,0.3
";

    #[test]
    fn test_read_complete_lattice() {
        let snapshot = CsvDatamap::new().read_from(MAP.as_bytes(), 2.5).unwrap();
        assert_eq!(snapshot.timestamp(), 2.5);
        assert_eq!(snapshot.shape(), (2, 2));
        assert_eq!(snapshot.spacing(), Spacing::new(1.0, 1.0));
        assert_eq!(snapshot.origin(), Point::new(0.0, 0.0));
        assert!(!snapshot.is_sparse());

        let bin = snapshot.bin(1, 1).unwrap();
        assert_eq!(bin.mass, 0.2);
        assert_eq!(bin.vz, 0.3);
        assert_eq!(bin.count, Some(1.0));
    }

    #[test]
    fn test_rows_in_any_order_with_holes() {
        let map = "X,Y,M,U,V\n3.0,1.0,1.0,0,0\n1.0,1.0,1.0,0,0\n1.0,3.0,1.0,0,0\n";
        let snapshot = CsvDatamap::new().read_from(map.as_bytes(), 0.0).unwrap();
        assert_eq!(snapshot.shape(), (2, 2));
        assert_eq!(snapshot.spacing(), Spacing::new(2.0, 2.0));
        assert!(snapshot.is_sparse());
        assert!(snapshot.is_masked(snapshot.index(1, 1)));
        assert!(!snapshot.is_masked(snapshot.index(0, 1)));
        assert_eq!(snapshot.bin(0, 0).unwrap().count, None);
    }

    #[test]
    fn test_whitespace_delimited_map() {
        let map = "X Y N T M U V\n0.5 0.5 1 0 1.0 0 0\n1.5 0.5 1 0 1.0 0 0\n";
        let snapshot = CsvDatamap::new()
            .with_delimiter(b' ')
            .read_from(map.as_bytes(), 0.0)
            .unwrap();
        assert_eq!(snapshot.shape(), (2, 1));
        // A single row is taken to start at zero height
        assert_eq!(snapshot.spacing().dz, 1.0);
    }

    #[test]
    fn test_malformed_maps_are_rejected() {
        let off_lattice = "X,Y,M,U,V\n0.0,0.0,1,0,0\n1.0,0.0,1,0,0\n2.5,0.0,1,0,0\n";
        assert!(matches!(
            CsvDatamap::new().read_from(off_lattice.as_bytes(), 0.0),
            Err(AnalysisError::InvalidGrid(_))
        ));

        let duplicate = "X,Y,M,U,V\n0.5,0.5,1,0,0\n0.5,0.5,1,0,0\n1.5,1.5,1,0,0\n";
        assert!(matches!(
            CsvDatamap::new().read_from(duplicate.as_bytes(), 0.0),
            Err(AnalysisError::InvalidGrid(_))
        ));

        // Jitter below the bin size would blow the lattice up to millions of bins
        let jittered = "X,Y,M,U,V\n0.5,0.5,1,0,0\n0.5000001,0.5,1,0,0\n1.5,0.5,1,0,0\n0.5,1.5,1,0,0\n";
        assert!(matches!(
            CsvDatamap::new().read_from(jittered.as_bytes(), 0.0),
            Err(AnalysisError::InvalidGrid(_))
        ));

        let missing_mass = "X,Y,U,V\n0.5,0.5,0,0\n";
        assert!(matches!(
            CsvDatamap::new().read_from(missing_mass.as_bytes(), 0.0),
            Err(AnalysisError::Csv(_))
        ));

        assert!(matches!(
            CsvDatamap::new().read_from("X,Y,M,U,V\n".as_bytes(), 0.0),
            Err(AnalysisError::Parse(_))
        ));
    }

    #[test]
    fn test_find_files_stops_at_first_gap() {
        let dir = std::env::temp_dir().join(format!("datamap_find_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for n in [1, 2, 3, 5] {
            fs::write(dir.join(format!("map{:05}.csv", n)), MAP).unwrap();
        }
        let base = dir.join("map").to_string_lossy().into_owned();

        let files = find_datamap_files(&base, 1, None, ".csv");
        assert_eq!(files.len(), 3);
        assert!(files[2].ends_with("map00003.csv"));
        assert_eq!(find_datamap_files(&base, 2, Some(2), ".csv").len(), 1);
        assert!(find_datamap_files(&base, 4, None, ".csv").is_empty());

        let frames = read_frames(&CsvDatamap::new(), &files, 1.0, 0.5).unwrap();
        let times: Vec<f64> = frames.iter().map(|f| f.timestamp()).collect();
        assert_eq!(times, vec![1.0, 1.5, 2.0]);

        assert!(matches!(
            CsvDatamap::new().read_snapshot(&dir.join("missing.csv"), 0.0),
            Err(AnalysisError::Io(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
