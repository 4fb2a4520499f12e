use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{Connectivity, ExtractParams, NeighbourFilter};
use crate::error::{AnalysisError, Result};
use crate::structure::{GridSnapshot, Point, Spacing};

/// Side of the droplet a branch or contact point belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Sign of the x direction pointing away from the droplet
    pub fn outward(&self) -> f64 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// One side of the interface, ordered from the substrate up to the apex.
/// Heights never decrease along the branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub side: Side,
    pub points: Vec<Point>,
}

impl Branch {
    pub fn new(side: Side, points: Vec<Point>) -> Self {
        Self { side, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point where the branch meets the substrate
    pub fn base(&self) -> Option<&Point> {
        self.points.first()
    }
}

/// Horizontal origin an interface can be shifted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recenter {
    /// Midpoint between the two contact points
    Zero,
    /// Horizontal centre of mass of the droplet
    CenterOfMass,
}

/// Interface of one connected droplet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceContour {
    pub left: Branch,
    pub right: Branch,
    /// Smoothed interface height of every contour column, ordered by x
    pub profile: Vec<Point>,
    pub center_of_mass: Point,
    pub mass: f64,
    /// Height of the substrate row centre
    pub substrate: f64,
    pub spacing: Spacing,
}

impl InterfaceContour {
    pub fn branch(&self, side: Side) -> &Branch {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Highest point of the profile
    pub fn apex(&self) -> Option<Point> {
        self.profile
            .iter()
            .copied()
            .max_by(|a, b| a.z.total_cmp(&b.z))
    }

    /// Horizontal distance between the two substrate contact points
    pub fn footprint(&self) -> Option<f64> {
        match (self.left.base(), self.right.base()) {
            (Some(l), Some(r)) => Some(r.x - l.x),
            _ => None,
        }
    }

    /// Cross-section area enclosed by the profile and the substrate.
    ///
    /// Every column spans from the bottom face of the substrate row to the top
    /// face of its interface bin.
    pub fn area(&self) -> f64 {
        self.profile
            .iter()
            .map(|p| self.spacing.dx * (p.z - self.substrate + self.spacing.dz).max(0.0))
            .sum()
    }

    /// Arc length of the interface line, summed over the profile segments
    pub fn length(&self) -> f64 {
        self.profile
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }

    /// Copy of the contour with every x shifted so that `origin` lies at 0
    pub fn recentered(&self, origin: Recenter) -> InterfaceContour {
        let offset = match origin {
            Recenter::Zero => match (self.left.base(), self.right.base()) {
                (Some(l), Some(r)) => 0.5 * (l.x + r.x),
                _ => self.center_of_mass.x,
            },
            Recenter::CenterOfMass => self.center_of_mass.x,
        };
        let shift = |points: &[Point]| -> Vec<Point> {
            points.iter().map(|p| Point::new(p.x - offset, p.z)).collect()
        };

        InterfaceContour {
            left: Branch::new(Side::Left, shift(&self.left.points)),
            right: Branch::new(Side::Right, shift(&self.right.points)),
            profile: shift(&self.profile),
            center_of_mass: Point::new(self.center_of_mass.x - offset, self.center_of_mass.z),
            ..self.clone()
        }
    }

    /// Interface height of the column containing `x`, if it is a contour column
    pub fn height_at(&self, x: f64) -> Option<f64> {
        let half = 0.5 * self.spacing.dx;
        self.profile
            .iter()
            .find(|p| (p.x - x).abs() < half)
            .map(|p| p.z)
    }

    /// Whether a bin centre lies inside the droplet
    pub fn contains(&self, p: &Point) -> bool {
        if p.z < self.substrate - 0.5 * self.spacing.dz {
            return false;
        }
        match self.height_at(p.x) {
            Some(h) => p.z <= h + 1e-9 * self.spacing.dz,
            None => false,
        }
    }
}

/// Outcome of a successful extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ContourResult {
    /// A single droplet with its left and right branches
    TwoBranches(InterfaceContour),
    /// Disconnected islands, most massive first
    MultiIsland(Vec<InterfaceContour>),
}

impl ContourResult {
    /// The droplet carrying the most mass
    pub fn primary(&self) -> &InterfaceContour {
        match self {
            ContourResult::TwoBranches(contour) => contour,
            // Never empty: extraction returns EmptyDroplet instead
            ContourResult::MultiIsland(islands) => &islands[0],
        }
    }

    pub fn islands(&self) -> &[InterfaceContour] {
        match self {
            ContourResult::TwoBranches(contour) => std::slice::from_ref(contour),
            ContourResult::MultiIsland(islands) => islands,
        }
    }

    pub fn island_count(&self) -> usize {
        self.islands().len()
    }
}

/// Extracts droplet interfaces from snapshots with fixed parameters.
///
/// Bins at or above the density threshold are liquid and are grouped into
/// islands. The topmost liquid bin of each island column traces the
/// interface, which is split at the column nearest the island's centre of
/// mass into a left and a right branch.
#[derive(Debug, Clone)]
pub struct InterfaceExtractor {
    params: ExtractParams,
}

impl InterfaceExtractor {
    pub fn new(params: ExtractParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ExtractParams {
        &self.params
    }

    /// Classify every bin of the snapshot as liquid or vapour
    pub fn liquid_mask(&self, snapshot: &GridSnapshot) -> Vec<bool> {
        let threshold = self.params.density_threshold;
        let raw: Vec<bool> = snapshot
            .bins()
            .iter()
            .enumerate()
            .map(|(idx, bin)| !snapshot.is_masked(idx) && bin.mass >= threshold)
            .collect();

        match self.params.neighbour_filter {
            Some(filter) => apply_neighbour_filter(snapshot, &raw, &filter),
            None => raw,
        }
    }

    /// Extract the interface contour of every droplet in the snapshot.
    ///
    /// # Returns
    /// The single droplet, or every island sorted by mass. Fails with
    /// `EmptyDroplet` when no bin is liquid, and with `DegenerateGeometry`
    /// for fragmented droplets in single-droplet mode.
    pub fn extract(&self, snapshot: &GridSnapshot) -> Result<ContourResult> {
        let liquid = self.liquid_mask(snapshot);
        if !liquid.iter().any(|&l| l) {
            return Err(AnalysisError::EmptyDroplet);
        }

        let (nx, nz) = snapshot.shape();
        let islands = connected_components(&liquid, nx, nz, self.params.connectivity);
        debug!(
            "t = {}: {} liquid islands found",
            snapshot.timestamp(),
            islands.len()
        );

        let floor_row = self.params.floor.map(|floor| snapshot.nearest_row(floor));

        let mut contours: Vec<InterfaceContour> = islands
            .iter()
            .filter_map(|island| self.trace_island(snapshot, island, floor_row))
            .collect();

        if contours.is_empty() {
            // Liquid exists, so only a floor the droplet never reaches gets here
            return Err(AnalysisError::NoSubstrateContact {
                floor: self.params.floor.unwrap_or(f64::NAN),
            });
        }

        contours.sort_by(|a, b| b.mass.total_cmp(&a.mass));

        if contours.len() == 1 {
            return Ok(ContourResult::TwoBranches(contours.remove(0)));
        }
        if self.params.single_droplet {
            return Err(AnalysisError::DegenerateGeometry {
                islands: contours.len(),
            });
        }
        Ok(ContourResult::MultiIsland(contours))
    }

    /// Trace the interface of one island. `None` if the island misses the floor row.
    fn trace_island(
        &self,
        snapshot: &GridSnapshot,
        island: &[usize],
        floor_row: Option<usize>,
    ) -> Option<InterfaceContour> {
        let (nx, _) = snapshot.shape();
        let lowest_row = island.iter().map(|&idx| idx / nx).min()?;
        let substrate_row = match floor_row {
            Some(row) if island.iter().any(|&idx| idx / nx == row) => row,
            Some(_) => return None,
            None => lowest_row,
        };

        let mut mass = 0.0;
        let mut moment_x = 0.0;
        let mut moment_z = 0.0;
        let mut tops: BTreeMap<usize, usize> = BTreeMap::new();
        for &idx in island {
            let (ix, iz) = (idx % nx, idx / nx);
            if iz < substrate_row {
                continue;
            }
            let bin = &snapshot.bins()[idx];
            mass += bin.mass;
            moment_x += bin.mass * bin.x;
            moment_z += bin.mass * bin.z;
            let top = tops.entry(ix).or_insert(iz);
            *top = (*top).max(iz);
        }
        if tops.is_empty() || mass <= 0.0 {
            return None;
        }
        let center_of_mass = Point::new(moment_x / mass, moment_z / mass);

        let columns = drop_precursor_columns(tops.into_iter().collect(), substrate_row);
        let heights: Vec<f64> = columns.iter().map(|&(_, iz)| snapshot.row_z(iz)).collect();
        let heights = smooth_heights(&heights, self.params.smoothing_window);
        let profile: Vec<Point> = columns
            .iter()
            .zip(heights)
            .map(|(&(ix, _), z)| Point::new(snapshot.column_x(ix), z))
            .collect();

        let split = profile
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.x - center_of_mass.x)
                    .abs()
                    .total_cmp(&(b.x - center_of_mass.x).abs())
            })
            .map(|(i, _)| i)?;

        let left = Branch::new(Side::Left, monotone_in_height(profile[..=split].to_vec()));
        let right = Branch::new(
            Side::Right,
            monotone_in_height(profile[split..].iter().rev().copied().collect()),
        );

        Some(InterfaceContour {
            left,
            right,
            profile,
            center_of_mass,
            mass,
            substrate: snapshot.row_z(substrate_row),
            spacing: snapshot.spacing(),
        })
    }
}

/// Keep bulk columns plus, on each side, the substrate-only column touching
/// the bulk edge. Further substrate-only columns are precursor film.
fn drop_precursor_columns(columns: Vec<(usize, usize)>, substrate_row: usize) -> Vec<(usize, usize)> {
    let first_bulk = columns.iter().position(|&(_, top)| top > substrate_row);
    let last_bulk = columns.iter().rposition(|&(_, top)| top > substrate_row);
    match (first_bulk, last_bulk) {
        (Some(first), Some(last)) => {
            let start = first.saturating_sub(1);
            let end = (last + 1).min(columns.len() - 1);
            columns[start..=end].to_vec()
        }
        // A film one row thick has no bulk to measure from
        _ => columns,
    }
}

/// Centred moving average over `window` columns, truncated at the ends
fn smooth_heights(heights: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return heights.to_vec();
    }
    let half = window / 2;
    let n = heights.len();
    (0..n)
        .map(|idx| {
            let start = idx.saturating_sub(half);
            let end = (idx + half + 1).min(n);
            heights[start..end].iter().sum::<f64>() / (end - start) as f64
        })
        .collect()
}

/// Running maximum of heights from the substrate upwards
fn monotone_in_height(mut points: Vec<Point>) -> Vec<Point> {
    let mut highest = f64::NEG_INFINITY;
    for p in points.iter_mut() {
        highest = highest.max(p.z);
        p.z = highest;
    }
    points
}

fn apply_neighbour_filter(snapshot: &GridSnapshot, raw: &[bool], filter: &NeighbourFilter) -> Vec<bool> {
    let (nx, nz) = snapshot.shape();
    let spacing = snapshot.spacing();
    let reach_x = (filter.radius / spacing.dx).floor() as isize;
    let reach_z = (filter.radius / spacing.dz).floor() as isize;
    let radius_sq = filter.radius * filter.radius;

    (0..raw.len())
        .map(|idx| {
            if !raw[idx] {
                return false;
            }
            let (ix, iz) = ((idx % nx) as isize, (idx / nx) as isize);
            let center = snapshot.bins()[idx].center();
            let mut count = 0;
            for jz in (iz - reach_z).max(0)..=(iz + reach_z).min(nz as isize - 1) {
                for jx in (ix - reach_x).max(0)..=(ix + reach_x).min(nx as isize - 1) {
                    let other = jz as usize * nx + jx as usize;
                    if other == idx || !raw[other] {
                        continue;
                    }
                    let p = snapshot.bins()[other].center();
                    let (dx, dz) = (p.x - center.x, p.z - center.z);
                    if dx * dx + dz * dz <= radius_sq {
                        count += 1;
                    }
                }
            }
            count >= filter.min_neighbours
        })
        .collect()
}

const DX: [isize; 8] = [1, 1, 0, -1, -1, -1, 0, 1];
const DZ: [isize; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
const DIRS_C4: [usize; 4] = [0, 2, 4, 6];
const DIRS_C8: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

/// Group occupied cells into connected components, each sorted by index
fn connected_components(
    occupied: &[bool],
    width: usize,
    height: usize,
    connectivity: Connectivity,
) -> Vec<Vec<usize>> {
    let dirs: &[usize] = match connectivity {
        Connectivity::C4 => &DIRS_C4,
        Connectivity::C8 => &DIRS_C8,
    };

    let mut seen = vec![false; occupied.len()];
    let mut stack = Vec::new();
    let mut components = Vec::new();

    for start in 0..occupied.len() {
        if !occupied[start] || seen[start] {
            continue;
        }

        let mut component = Vec::new();
        seen[start] = true;
        stack.push(start);

        while let Some(p) = stack.pop() {
            component.push(p);
            let (x, z) = ((p % width) as isize, (p / width) as isize);
            for &dir in dirs {
                let (nx, nz) = (x + DX[dir], z + DZ[dir]);
                if nx < 0 || nz < 0 || nx >= width as isize || nz >= height as isize {
                    continue;
                }
                let nb = nz as usize * width + nx as usize;
                if occupied[nb] && !seen[nb] {
                    seen[nb] = true;
                    stack.push(nb);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    components
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Snapshot with unit bins drawn from `rows`, top row first.
    /// `#` is liquid (mass 1), `+` thin film (mass 0.2), anything else vapour.
    pub(crate) fn grid_with_flow<F>(rows: &[&str], velocity: F) -> GridSnapshot
    where
        F: Fn(Point) -> (f64, f64),
    {
        let nz = rows.len();
        let nx = rows[0].len();
        GridSnapshot::from_fn(
            0.0,
            Point::new(0.0, 0.0),
            Spacing::new(1.0, 1.0),
            (nx, nz),
            |p| {
                let ix = p.x.floor() as usize;
                let iz = p.z.floor() as usize;
                let mass = match rows[nz - 1 - iz].as_bytes()[ix] {
                    b'#' => 1.0,
                    b'+' => 0.2,
                    _ => 0.0,
                };
                let (vx, vz) = velocity(p);
                (mass, vx, vz)
            },
        )
        .unwrap()
    }

    pub(crate) fn grid_from_rows(rows: &[&str]) -> GridSnapshot {
        grid_with_flow(rows, |_| (0.0, 0.0))
    }

    fn extractor() -> InterfaceExtractor {
        InterfaceExtractor::new(ExtractParams::new(0.5, 1)).unwrap()
    }

    #[test]
    fn test_empty_snapshot_fails() {
        let grid = grid_from_rows(&["....", "...."]);
        let result = extractor().extract(&grid);
        assert!(matches!(result, Err(AnalysisError::EmptyDroplet)));
    }

    #[test]
    fn test_threshold_above_all_mass_fails() {
        let grid = grid_from_rows(&["....", ".##.", "####"]);
        let extractor = InterfaceExtractor::new(ExtractParams::new(1.5, 1)).unwrap();
        assert!(matches!(extractor.extract(&grid), Err(AnalysisError::EmptyDroplet)));
    }

    #[test]
    fn test_triangle_branches() {
        let grid = grid_from_rows(&[".....", ".....", "..#..", ".###.", "#####"]);
        let result = extractor().extract(&grid).unwrap();
        let contour = match result {
            ContourResult::TwoBranches(contour) => contour,
            other => panic!("expected two branches, got {:?}", other),
        };

        assert_eq!(contour.center_of_mass.x, 2.5);
        assert_eq!(contour.substrate, 0.5);
        assert_eq!(
            contour.left.points,
            vec![Point::new(0.5, 0.5), Point::new(1.5, 1.5), Point::new(2.5, 2.5)]
        );
        assert_eq!(
            contour.right.points,
            vec![Point::new(4.5, 0.5), Point::new(3.5, 1.5), Point::new(2.5, 2.5)]
        );
        assert_eq!(contour.footprint(), Some(4.0));
        assert_eq!(contour.area(), 9.0);
        assert_eq!(contour.apex(), Some(Point::new(2.5, 2.5)));
    }

    #[test]
    fn test_interface_length() {
        let grid = grid_from_rows(&[".....", ".....", "..#..", ".###.", "#####"]);
        let contour = extractor().extract(&grid).unwrap().primary().clone();
        assert!((contour.length() - 4.0 * 2.0_f64.sqrt()).abs() < 1e-12);

        let flat = grid_from_rows(&["....", "####"]);
        assert_eq!(extractor().extract(&flat).unwrap().primary().length(), 3.0);
    }

    #[test]
    fn test_recentered_contour() {
        let grid = grid_from_rows(&["......", "..#...", ".####.", "######"]);
        let contour = extractor().extract(&grid).unwrap().primary().clone();

        let zero = contour.recentered(Recenter::Zero);
        assert_eq!(zero.left.base(), Some(&Point::new(-2.5, 0.5)));
        assert_eq!(zero.right.base(), Some(&Point::new(2.5, 0.5)));
        assert_eq!(zero.area(), contour.area());
        assert_eq!(zero.length(), contour.length());

        let com = contour.recentered(Recenter::CenterOfMass);
        assert!(com.center_of_mass.x.abs() < 1e-12);
        let shift = contour.center_of_mass.x;
        for (moved, original) in com.profile.iter().zip(&contour.profile) {
            assert!((moved.x - (original.x - shift)).abs() < 1e-12);
            assert_eq!(moved.z, original.z);
        }
    }

    #[test]
    fn test_smoothing_window_averages_heights() {
        let grid = grid_from_rows(&[".....", ".....", "..#..", ".###.", "#####"]);
        let contour = InterfaceExtractor::new(ExtractParams::new(0.5, 3))
            .unwrap()
            .extract(&grid)
            .unwrap()
            .primary()
            .clone();
        assert_eq!(contour.left.points[0], Point::new(0.5, 1.0));
        assert_eq!(contour.left.points[1], Point::new(1.5, 1.5));
        assert!((contour.left.points[2].z - 5.5 / 3.0).abs() < 1e-12);
        assert_eq!(contour.right.points[0], Point::new(4.5, 1.0));
    }

    #[test]
    fn test_precursor_columns_are_dropped() {
        let grid = grid_from_rows(&["...........", "....###....", "###########"]);
        let contour = extractor().extract(&grid).unwrap().primary().clone();
        // Bulk spans columns 4..=6, one substrate column is kept on each side
        assert_eq!(contour.left.base(), Some(&Point::new(3.5, 0.5)));
        assert_eq!(contour.right.base(), Some(&Point::new(7.5, 0.5)));
        assert_eq!(contour.profile.len(), 5);
    }

    #[test]
    fn test_flat_film_keeps_all_columns() {
        let grid = grid_from_rows(&["....", "####"]);
        let contour = extractor().extract(&grid).unwrap().primary().clone();
        assert_eq!(contour.profile.len(), 4);
        assert_eq!(contour.footprint(), Some(3.0));
    }

    #[test]
    fn test_branches_are_monotonic_in_height() {
        let grid = grid_from_rows(&["..#....#..", ".###..###.", "##########"]);
        let result = extractor().extract(&grid).unwrap();
        for contour in result.islands() {
            for branch in [&contour.left, &contour.right] {
                assert!(branch.points.windows(2).all(|w| w[1].z >= w[0].z));
            }
        }
    }

    #[test]
    fn test_fragmented_droplet_returns_islands() {
        let grid = grid_from_rows(&["..........", ".##....#..", "###...###."]);
        let result = extractor().extract(&grid).unwrap();
        match &result {
            ContourResult::MultiIsland(islands) => {
                assert_eq!(islands.len(), 2);
                assert!(islands[0].mass >= islands[1].mass);
            }
            other => panic!("expected islands, got {:?}", other),
        }
        assert_eq!(result.island_count(), 2);
    }

    #[test]
    fn test_fragmented_droplet_fails_in_single_mode() {
        let grid = grid_from_rows(&["..........", ".##....#..", "###...###."]);
        let extractor =
            InterfaceExtractor::new(ExtractParams::new(0.5, 1).single_droplet(true)).unwrap();
        assert!(matches!(
            extractor.extract(&grid),
            Err(AnalysisError::DegenerateGeometry { islands: 2 })
        ));
    }

    #[test]
    fn test_diagonal_contact_depends_on_connectivity() {
        let grid = grid_from_rows(&["...#", "..#.", "##.."]);
        let c8 = extractor().extract(&grid).unwrap();
        assert_eq!(c8.island_count(), 1);

        let c4 = InterfaceExtractor::new(ExtractParams::new(0.5, 1).with_connectivity(Connectivity::C4))
            .unwrap()
            .extract(&grid)
            .unwrap();
        assert_eq!(c4.island_count(), 3);
    }

    #[test]
    fn test_neighbour_filter_removes_isolated_bins() {
        let grid = grid_from_rows(&["#.........", "..........", "...####...", "...####..."]);
        let plain = extractor().extract(&grid).unwrap();
        assert_eq!(plain.island_count(), 2);

        let filtered = InterfaceExtractor::new(ExtractParams::new(0.5, 1).with_neighbour_filter(1.0, 1))
            .unwrap()
            .extract(&grid)
            .unwrap();
        assert_eq!(filtered.island_count(), 1);
    }

    #[test]
    fn test_floor_missed_by_droplet() {
        let grid = grid_from_rows(&[".##.", "####", "...."]);
        let extractor = InterfaceExtractor::new(ExtractParams::new(0.5, 1).with_floor(0.5)).unwrap();
        assert!(matches!(
            extractor.extract(&grid),
            Err(AnalysisError::NoSubstrateContact { .. })
        ));

        let lifted = InterfaceExtractor::new(ExtractParams::new(0.5, 1).with_floor(1.4)).unwrap();
        let contour = lifted.extract(&grid).unwrap().primary().clone();
        assert_eq!(contour.substrate, 1.5);
    }

    #[test]
    fn test_smoothing_suppresses_single_column_spike() {
        let heights = [1.0, 1.0, 4.0, 1.0, 1.0];
        let smoothed = smooth_heights(&heights, 3);
        assert_eq!(smoothed[2], 2.0);
        assert_eq!(smoothed[0], 1.0);
        assert_eq!(smooth_heights(&heights, 1), heights.to_vec());
    }

    #[test]
    fn test_masked_bins_are_vapour() {
        let grid = grid_from_rows(&["##"]);
        let masked = grid.with_mask(vec![true, true]).unwrap();
        assert!(matches!(extractor().extract(&masked), Err(AnalysisError::EmptyDroplet)));
    }
}
