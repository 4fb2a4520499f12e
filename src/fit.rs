use nalgebra::{DMatrix, DVector};

use crate::structure::Point;

const RANK_TOL: f64 = 1e-12;

/// Polynomial `p(t) = sum c_i (t - shift)^i`
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    pub coeffs: Vec<f64>,
    pub shift: f64,
}

impl Polynomial {
    pub fn eval(&self, t: f64) -> f64 {
        let u = t - self.shift;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * u + c)
    }

    pub fn derivative(&self, t: f64) -> f64 {
        let u = t - self.shift;
        self.coeffs
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, c)| acc * u + i as f64 * c)
    }
}

/// Circle `(x - cx)^2 + (z - cz)^2 = r^2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

/// Fit `ys` as a polynomial of `ts` with the given order
pub fn polyfit(ts: &[f64], ys: &[f64], order: usize) -> Option<Polynomial> {
    let n = order + 1;
    if ts.len() != ys.len() || ts.len() < n {
        return None;
    }

    let shift = ts.iter().sum::<f64>() / ts.len() as f64;

    // Vandermonde matrix of the shifted abscissa
    let design = DMatrix::from_fn(ts.len(), n, |row, col| (ts[row] - shift).powi(col as i32));
    let rhs = DVector::from_vec(ys.to_vec());

    least_squares(design, rhs).map(|coeffs| Polynomial { coeffs, shift })
}

/// Algebraic (Kasa) circle fit through at least three points
pub fn fit_circle(points: &[Point]) -> Option<Circle> {
    if points.len() < 3 {
        return None;
    }

    let count = points.len() as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / count;
    let mz = points.iter().map(|p| p.z).sum::<f64>() / count;

    // Minimise sum (u^2 + v^2 + D u + E v + F)^2 over D, E, F
    let design = DMatrix::from_fn(points.len(), 3, |row, col| match col {
        0 => points[row].x - mx,
        1 => points[row].z - mz,
        _ => 1.0,
    });
    let rhs = DVector::from_iterator(
        points.len(),
        points.iter().map(|p| {
            let (u, v) = (p.x - mx, p.z - mz);
            -(u * u + v * v)
        }),
    );

    let sol = least_squares(design, rhs)?;
    let (d, e, f) = (sol[0], sol[1], sol[2]);
    let cu = -0.5 * d;
    let cv = -0.5 * e;
    let r_sq = cu * cu + cv * cv - f;
    if !(r_sq > 0.0) || !r_sq.is_finite() {
        return None;
    }

    Some(Circle {
        center: Point::new(cu + mx, cv + mz),
        radius: r_sq.sqrt(),
    })
}

/// Ordinary least-squares line, returned as `(intercept, slope)`
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let line = polyfit(xs, ys, 1)?;
    // Undo the shift: y = c0 + c1 (x - s)
    let slope = line.coeffs[1];
    Some((line.coeffs[0] - slope * line.shift, slope))
}

/// Root mean square of a residual sequence
pub fn rms<I: IntoIterator<Item = f64>>(residuals: I) -> f64 {
    let (sum, count) = residuals
        .into_iter()
        .fold((0.0, 0usize), |(s, n), r| (s + r * r, n + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

/// Least-squares solution of `design * x = rhs` through the singular value
/// decomposition. `None` when a singular value falls below `RANK_TOL`
/// relative to the largest one.
fn least_squares(design: DMatrix<f64>, rhs: DVector<f64>) -> Option<Vec<f64>> {
    let unknowns = design.ncols();
    let svd = design.svd(true, true);
    let largest = svd.singular_values.max();
    if !(largest > 0.0) || !largest.is_finite() {
        return None;
    }

    let eps = RANK_TOL * largest;
    if svd.rank(eps) < unknowns {
        return None;
    }

    let x = svd.solve(&rhs, eps).ok()?;
    if x.iter().all(|v| v.is_finite()) {
        Some(x.iter().copied().collect())
    } else {
        None
    }
}
