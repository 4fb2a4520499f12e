use log::debug;
use serde::Serialize;

use crate::config::{FitModel, FitParams};
use crate::error::{AnalysisError, Result};
use crate::fit::{fit_circle, polyfit, rms};
use crate::interface::{Branch, InterfaceContour, Side};
use crate::structure::Point;

/// How the fitted curve was parametrised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Parametrization {
    /// Height as a function of x
    HeightOfX,
    /// x as a function of height, used for overhanging or steep branches
    XOfHeight,
    Arc,
}

/// Where a branch meets the substrate, with the fitted contact angle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContactPoint {
    pub side: Side,
    pub x: f64,
    /// Substrate height
    pub z: f64,
    /// Contact angle in degrees, `None` when the fit degenerates
    pub angle: Option<f64>,
    /// RMS residual of the fit
    pub residual: f64,
    /// 1 / (1 + residual / bin size)
    pub confidence: f64,
    pub parametrization: Parametrization,
}

impl ContactPoint {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.z)
    }
}

/// Radius and contact point of one side of a droplet
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContactEstimate {
    pub radius: f64,
    pub contact: ContactPoint,
}

/// Footprint radius: x distance from the centre of mass to the branch base
pub fn footprint_radius(contour: &InterfaceContour, side: Side) -> Option<f64> {
    contour
        .branch(side)
        .base()
        .map(|base| (contour.center_of_mass.x - base.x).abs())
}

/// Contact angle of a spherical cap with the contour's footprint and apex height
pub fn cap_angle(contour: &InterfaceContour) -> Option<f64> {
    let chord = contour.footprint()?;
    let height = contour.apex()?.z - contour.substrate;
    if chord <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(2.0 * (2.0 * height / chord).atan().to_degrees())
}

/// Secant angle between the branch base and the branch point nearest `height` above it
pub fn angle_at_height(branch: &Branch, height: f64) -> Option<f64> {
    let base = *branch.base()?;
    let target = base.z + height;
    let top = branch
        .points
        .iter()
        .min_by(|a, b| (a.z - target).abs().total_cmp(&(b.z - target).abs()))?;

    let mut dx = top.x - base.x;
    let dz = top.z - base.z;
    if branch.side == Side::Right {
        dx = -dx;
    }
    let length = (dx * dx + dz * dz).sqrt();
    if length == 0.0 {
        return None;
    }
    Some((dx / length).acos().to_degrees())
}

/// Estimates footprint radius and contact angle with fixed fit parameters
#[derive(Debug, Clone)]
pub struct RadiusAngleEstimator {
    params: FitParams,
}

impl RadiusAngleEstimator {
    pub fn new(params: FitParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    /// Estimate the radius and contact angle of one side of the contour.
    ///
    /// The `fit_window` lowest branch points are fitted and the tangent of the
    /// fitted curve at the branch base gives the angle, measured through the
    /// liquid from the substrate.
    ///
    /// # Arguments
    /// * `contour` - Interface of the droplet being measured
    /// * `side` - Branch to fit
    ///
    /// # Returns
    /// Radius and contact point, or `InsufficientPoints` when the branch is
    /// shorter than the fit window
    pub fn estimate(&self, contour: &InterfaceContour, side: Side) -> Result<ContactEstimate> {
        let branch = contour.branch(side);
        let window = self.params.fit_window;
        if branch.len() < window {
            return Err(AnalysisError::InsufficientPoints {
                required: window,
                available: branch.len(),
            });
        }

        let points = &branch.points[..window];
        let base = points[0];
        let radius = (contour.center_of_mass.x - base.x).abs();

        let fitted = match self.params.model {
            FitModel::Polynomial { order } => self.fit_polynomial(points, order),
            FitModel::CircularArc => {
                self.fit_arc(points).or_else(|| self.fit_polynomial(points, 1))
            }
        };

        let (angle, residual, parametrization) = match fitted {
            Some(fit) => {
                let angle = tangent_angle(fit.tangent, side)
                    .filter(|&a| !near_horizontal(a, self.params.degenerate_tolerance));
                (angle, fit.residual, fit.parametrization)
            }
            None => (None, f64::NAN, Parametrization::HeightOfX),
        };

        debug!(
            "{} contact at x = {:.3}: angle {:?}, residual {:.3e} ({:?})",
            side.name(),
            base.x,
            angle,
            residual,
            parametrization
        );

        let scale = contour.spacing.min();
        let confidence = if residual.is_finite() {
            1.0 / (1.0 + residual / scale)
        } else {
            0.0
        };

        Ok(ContactEstimate {
            radius,
            contact: ContactPoint {
                side,
                x: base.x,
                z: contour.substrate,
                angle,
                residual,
                confidence,
                parametrization,
            },
        })
    }

    /// Fit z(x) when x is single valued over the window, x(z) otherwise or
    /// when the z(x) tangent is too close to vertical to resolve.
    fn fit_polynomial(&self, points: &[Point], order: usize) -> Option<CurveFit> {
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let zs: Vec<f64> = points.iter().map(|p| p.z).collect();
        let base = points[0];

        if strictly_monotonic(&xs) {
            if let Some(poly) = polyfit(&xs, &zs, order) {
                let slope = poly.derivative(base.x);
                let tangent = (1.0, slope);
                let steep = tangent_angle(tangent, Side::Left)
                    .map_or(true, |a| (a - 90.0).abs() < self.params.degenerate_tolerance);
                if !steep {
                    let residual = rms(points.iter().map(|p| p.z - poly.eval(p.x)));
                    return Some(CurveFit {
                        tangent,
                        residual,
                        parametrization: Parametrization::HeightOfX,
                    });
                }
            }
        }

        let poly = polyfit(&zs, &xs, order)?;
        let slope = poly.derivative(base.z);
        let residual = rms(points.iter().map(|p| p.x - poly.eval(p.z)));
        Some(CurveFit {
            tangent: (slope, 1.0),
            residual,
            parametrization: Parametrization::XOfHeight,
        })
    }

    fn fit_arc(&self, points: &[Point]) -> Option<CurveFit> {
        let circle = fit_circle(points)?;
        let base = points[0];
        let (rx, rz) = (base.x - circle.center.x, base.z - circle.center.z);
        if rx == 0.0 && rz == 0.0 {
            return None;
        }
        let residual = rms(points.iter().map(|p| p.distance_to(&circle.center) - circle.radius));
        Some(CurveFit {
            tangent: (-rz, rx),
            residual,
            parametrization: Parametrization::Arc,
        })
    }
}

struct CurveFit {
    tangent: (f64, f64),
    residual: f64,
    parametrization: Parametrization,
}

/// Angle in degrees between the substrate, pointing into the liquid, and the
/// tangent pointing away from it. Normalised into [0, 180).
fn tangent_angle(tangent: (f64, f64), side: Side) -> Option<f64> {
    let (mut tx, mut tz) = tangent;
    if !tx.is_finite() || !tz.is_finite() || (tx == 0.0 && tz == 0.0) {
        return None;
    }
    if tz < 0.0 || (tz == 0.0 && tx < 0.0) {
        tx = -tx;
        tz = -tz;
    }
    // The liquid lies towards +x from a left contact, towards -x from a right one
    let inward = -side.outward();
    let angle = tz.atan2(tx * inward).to_degrees();
    Some(if angle >= 180.0 { angle - 180.0 } else { angle })
}

/// An exactly horizontal tangent is always undefined, whatever the tolerance
fn near_horizontal(angle: f64, tolerance: f64) -> bool {
    angle <= tolerance || angle >= 180.0 - tolerance
}

fn strictly_monotonic(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[1] > w[0]) || values.windows(2).all(|w| w[1] < w[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractParams;
    use crate::interface::tests::grid_from_rows;
    use crate::interface::{ContourResult, InterfaceExtractor};
    use crate::structure::{GridSnapshot, Spacing};

    fn line_fit(window: usize) -> RadiusAngleEstimator {
        RadiusAngleEstimator::new(FitParams::new(window, FitModel::Polynomial { order: 1 }, 1.0)).unwrap()
    }

    fn contour_with(left: Vec<Point>, right: Vec<Point>, center_x: f64) -> InterfaceContour {
        let mut profile = left.clone();
        profile.extend(right.iter().rev().skip(1).copied());
        InterfaceContour {
            left: Branch::new(Side::Left, left),
            right: Branch::new(Side::Right, right),
            profile,
            center_of_mass: Point::new(center_x, 1.0),
            mass: 1.0,
            substrate: 0.0,
            spacing: Spacing::new(1.0, 1.0),
        }
    }

    #[test]
    fn test_triangle_scenario() {
        let grid = grid_from_rows(&[".....", ".....", "..#..", ".###.", "#####"]);
        let extractor = InterfaceExtractor::new(ExtractParams::new(0.5, 1)).unwrap();
        let contour = match extractor.extract(&grid).unwrap() {
            ContourResult::TwoBranches(contour) => contour,
            other => panic!("expected two branches, got {:?}", other),
        };

        let estimator = line_fit(3);
        for side in [Side::Left, Side::Right] {
            let estimate = estimator.estimate(&contour, side).unwrap();
            // Half of the base width measured between the outer bin centres
            assert_eq!(estimate.radius, 2.0);
            let angle = estimate.contact.angle.unwrap();
            assert!((angle - 45.0).abs() < 5.0, "{} angle {}", side.name(), angle);
            assert!(estimate.contact.residual < 1e-9);
            assert!((estimate.contact.confidence - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_symmetric_semicircle() {
        let radius = 12.3;
        let grid = GridSnapshot::from_fn(
            0.0,
            Point::new(-20.0, 0.0),
            Spacing::new(1.0, 1.0),
            (40, 20),
            |p| {
                let inside = p.x * p.x + p.z * p.z <= radius * radius;
                (if inside { 1.0 } else { 0.0 }, 0.0, 0.0)
            },
        )
        .unwrap();
        let contour = InterfaceExtractor::new(ExtractParams::new(0.5, 1))
            .unwrap()
            .extract(&grid)
            .unwrap()
            .primary()
            .clone();

        let estimator = line_fit(3);
        let left = estimator.estimate(&contour, Side::Left).unwrap();
        let right = estimator.estimate(&contour, Side::Right).unwrap();
        assert!((left.radius - right.radius).abs() <= grid.spacing().dx);
        let (al, ar) = (left.contact.angle.unwrap(), right.contact.angle.unwrap());
        assert!((al - ar).abs() < 1.0, "left {} right {}", al, ar);

        let half_extent = 0.5 * grid.extent().0;
        for estimate in [left, right] {
            assert!(estimate.radius >= 0.0);
            assert!(estimate.radius < half_extent);
        }
    }

    #[test]
    fn test_insufficient_points() {
        let contour = contour_with(
            vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            vec![Point::new(2.0, 0.0), Point::new(1.0, 1.0)],
            1.0,
        );
        let err = line_fit(3).estimate(&contour, Side::Left).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientPoints { required: 3, available: 2 }
        ));
        assert_eq!(footprint_radius(&contour, Side::Left), Some(1.0));
    }

    #[test]
    fn test_horizontal_tangent_is_undefined() {
        let flat: Vec<Point> = (0..4).map(|i| Point::new(i as f64, 0.0)).collect();
        let contour = contour_with(flat.clone(), flat.iter().rev().copied().collect(), 1.5);
        let estimate = line_fit(3).estimate(&contour, Side::Left).unwrap();
        assert_eq!(estimate.contact.angle, None);
    }

    #[test]
    fn test_horizontal_tangent_without_tolerance() {
        let flat: Vec<Point> = (0..4).map(|i| Point::new(i as f64, 0.0)).collect();
        let contour = contour_with(flat.clone(), flat.iter().rev().copied().collect(), 1.5);
        let estimator =
            RadiusAngleEstimator::new(FitParams::new(3, FitModel::Polynomial { order: 1 }, 0.0)).unwrap();
        for side in [Side::Left, Side::Right] {
            let estimate = estimator.estimate(&contour, side).unwrap();
            assert_eq!(estimate.contact.angle, None);
        }
    }

    #[test]
    fn test_overhang_uses_height_parametrization() {
        let left = vec![Point::new(1.0, 0.0), Point::new(0.6, 1.0), Point::new(0.8, 2.0)];
        let right = vec![Point::new(3.0, 0.0), Point::new(2.0, 1.0), Point::new(1.5, 2.0)];
        let contour = contour_with(left, right, 2.0);
        let estimate = line_fit(3).estimate(&contour, Side::Left).unwrap();
        assert_eq!(estimate.contact.parametrization, Parametrization::XOfHeight);
        let angle = estimate.contact.angle.unwrap();
        assert!(angle > 90.0 && angle < 180.0, "angle {}", angle);
    }

    #[test]
    fn test_vertical_wall_is_refitted() {
        let wall: Vec<Point> = (0..3).map(|i| Point::new(0.0, i as f64)).collect();
        let right: Vec<Point> = (0..3).map(|i| Point::new(4.0, i as f64)).collect();
        let contour = contour_with(wall, right, 2.0);
        let estimate = line_fit(3).estimate(&contour, Side::Right).unwrap();
        assert_eq!(estimate.contact.parametrization, Parametrization::XOfHeight);
        assert!((estimate.contact.angle.unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_arc_fit_on_circular_branch() {
        // Circle of radius 5 centred below the substrate: contact angle 60 degrees
        let (r, cz) = (5.0_f64, -2.5_f64);
        let left: Vec<Point> = (0..5)
            .map(|i| {
                let z = i as f64 * 0.5;
                Point::new(-(r * r - (z - cz).powi(2)).sqrt(), z)
            })
            .collect();
        let right: Vec<Point> = left.iter().map(|p| Point::new(-p.x, p.z)).collect();
        let contour = contour_with(left, right, 0.0);

        let estimator =
            RadiusAngleEstimator::new(FitParams::new(5, FitModel::CircularArc, 1.0)).unwrap();
        for side in [Side::Left, Side::Right] {
            let estimate = estimator.estimate(&contour, side).unwrap();
            assert_eq!(estimate.contact.parametrization, Parametrization::Arc);
            assert!((estimate.contact.angle.unwrap() - 60.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_quadratic_fit_tangent_at_base() {
        // z = x^2 / 4 on the right flank: slope at x = 2 is 1
        let left: Vec<Point> = (0..4)
            .map(|i| {
                let x = -2.0 - i as f64 * 0.5;
                Point::new(x, 0.25 * x * x - 1.0)
            })
            .collect();
        let contour = contour_with(left.clone(), left.iter().map(|p| Point::new(-p.x, p.z)).collect(), 0.0);
        let estimator = RadiusAngleEstimator::new(FitParams::new(4, FitModel::Polynomial { order: 2 }, 1.0))
            .unwrap();
        let estimate = estimator.estimate(&contour, Side::Right).unwrap();
        // Tangent leaves the substrate away from the liquid: obtuse angle
        assert!((estimate.contact.angle.unwrap() - 135.0).abs() < 1e-6);
    }

    #[test]
    fn test_secant_and_cap_angles() {
        let grid = grid_from_rows(&[".....", ".....", "..#..", ".###.", "#####"]);
        let contour = InterfaceExtractor::new(ExtractParams::new(0.5, 1))
            .unwrap()
            .extract(&grid)
            .unwrap()
            .primary()
            .clone();
        let left = angle_at_height(&contour.left, 2.0).unwrap();
        let right = angle_at_height(&contour.right, 2.0).unwrap();
        assert!((left - 45.0).abs() < 1e-9);
        assert!((right - 45.0).abs() < 1e-9);
        assert!((cap_angle(&contour).unwrap() - 90.0).abs() < 1e-9);
    }
}
