// Contour smoothing module
// Fits a closed interpolating cubic spline through the simplified track polygon

use tracing::{debug, info};
use trackmap_common::{Contour, PixelPoint};

use crate::error::{Result, TrackError};

/// Periodic cubic spline through a closed polygon
///
/// Chord-length parametrized; x and y are splined independently with
/// second derivatives that wrap around the seam, so the curve is C2
/// everywhere including where it closes.
#[derive(Debug, Clone)]
pub struct PeriodicSpline {
    /// Parameter value at each vertex, plus the closing knot (= period)
    knots: Vec<f64>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at each vertex
    mx: Vec<f64>,
    my: Vec<f64>,
}

impl PeriodicSpline {
    /// Fit through the vertices of a closed polygon.
    /// The first vertex must not be repeated at the end.
    pub fn fit(vertices: &[PixelPoint]) -> Result<Self> {
        let n = vertices.len();
        if n < 3 {
            return Err(TrackError::DegenerateContour(format!(
                "need at least 3 distinct vertices for a closed spline, got {}",
                n
            )));
        }

        let mut knots = Vec::with_capacity(n + 1);
        knots.push(0.0);
        for i in 0..n {
            let chord = vertices[i].distance_to(&vertices[(i + 1) % n]);
            if chord == 0.0 {
                return Err(TrackError::DegenerateContour(format!(
                    "repeated vertex at index {}",
                    i
                )));
            }
            knots.push(knots[i] + chord);
        }

        let xs: Vec<f64> = vertices.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = vertices.iter().map(|p| p.y).collect();
        let spans: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();

        let mx = periodic_second_derivatives(&spans, &xs);
        let my = periodic_second_derivatives(&spans, &ys);

        Ok(Self { knots, xs, ys, mx, my })
    }

    /// Total chord length of the control polygon
    pub fn period(&self) -> f64 {
        self.knots[self.knots.len() - 1]
    }

    /// Evaluate at parameter `t`, wrapped into `[0, period]`
    pub fn evaluate(&self, t: f64) -> PixelPoint {
        let period = self.period();
        let t = if (0.0..=period).contains(&t) {
            t
        } else {
            t.rem_euclid(period)
        };

        let n = self.xs.len();
        let i = self
            .knots
            .partition_point(|&k| k <= t)
            .saturating_sub(1)
            .min(n - 1);
        let j = (i + 1) % n;

        let x = eval_segment(self.knots[i], self.knots[i + 1], self.xs[i], self.xs[j], self.mx[i], self.mx[j], t);
        let y = eval_segment(self.knots[i], self.knots[i + 1], self.ys[i], self.ys[j], self.my[i], self.my[j], t);
        PixelPoint { x, y }
    }

    /// Sample `count` points at evenly spaced parameter values over the
    /// closed interval, so the last sample coincides with the first
    pub fn sample(&self, count: usize) -> Vec<PixelPoint> {
        if count == 0 {
            return Vec::new();
        }
        if count == 1 {
            return vec![self.evaluate(0.0)];
        }
        let period = self.period();
        (0..count)
            .map(|k| self.evaluate(period * k as f64 / (count - 1) as f64))
            .collect()
    }
}

/// Cubic segment on [t0, t1] from end values and second derivatives
fn eval_segment(t0: f64, t1: f64, y0: f64, y1: f64, m0: f64, m1: f64, t: f64) -> f64 {
    let h = t1 - t0;
    let a = t1 - t;
    let b = t - t0;
    m0 * a.powi(3) / (6.0 * h)
        + m1 * b.powi(3) / (6.0 * h)
        + (y0 / h - m0 * h / 6.0) * a
        + (y1 / h - m1 * h / 6.0) * b
}

/// Second derivatives of the periodic interpolating cubic
///
/// Row i: h[i-1] M[i-1] + 2 (h[i-1] + h[i]) M[i] + h[i] M[i+1]
///        = 6 ((y[i+1] - y[i]) / h[i] - (y[i] - y[i-1]) / h[i-1]), indices mod n
fn periodic_second_derivatives(spans: &[f64], values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut lower = vec![0.0; n];
    let mut diag = vec![0.0; n];
    let mut upper = vec![0.0; n];
    let mut rhs = vec![0.0; n];

    for i in 0..n {
        let prev = (i + n - 1) % n;
        let next = (i + 1) % n;
        let h_prev = spans[prev];
        let h = spans[i];
        lower[i] = h_prev;
        diag[i] = 2.0 * (h_prev + h);
        upper[i] = h;
        rhs[i] = 6.0 * ((values[next] - values[i]) / h - (values[i] - values[prev]) / h_prev);
    }

    // Corner entries of the cyclic matrix: A[0][n-1] and A[n-1][0]
    let top_right = lower[0];
    let bottom_left = upper[n - 1];
    solve_cyclic(&lower, &diag, &upper, top_right, bottom_left, &rhs)
}

/// Cyclic tridiagonal solve via Sherman-Morrison over the Thomas algorithm
fn solve_cyclic(
    lower: &[f64],
    diag: &[f64],
    upper: &[f64],
    top_right: f64,
    bottom_left: f64,
    rhs: &[f64],
) -> Vec<f64> {
    let n = diag.len();
    let gamma = -diag[0];

    let mut modified = diag.to_vec();
    modified[0] = diag[0] - gamma;
    modified[n - 1] = diag[n - 1] - bottom_left * top_right / gamma;

    let mut x = solve_tridiagonal(lower, &modified, upper, rhs);

    let mut u = vec![0.0; n];
    u[0] = gamma;
    u[n - 1] = bottom_left;
    let z = solve_tridiagonal(lower, &modified, upper, &u);

    let factor = (x[0] + top_right * x[n - 1] / gamma) / (1.0 + z[0] + top_right * z[n - 1] / gamma);
    for (xi, zi) in x.iter_mut().zip(&z) {
        *xi -= factor * zi;
    }
    x
}

/// Thomas algorithm; `lower[0]` and `upper[n-1]` are ignored
fn solve_tridiagonal(lower: &[f64], diag: &[f64], upper: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];

    c_prime[0] = upper[0] / diag[0];
    d_prime[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - lower[i] * c_prime[i - 1];
        c_prime[i] = upper[i] / denom;
        d_prime[i] = (rhs[i] - lower[i] * d_prime[i - 1]) / denom;
    }

    let mut x = vec![0.0; n];
    x[n - 1] = d_prime[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d_prime[i] - c_prime[i] * x[i + 1];
    }
    x
}

/// Drop repeated vertices, including a closing copy of the first one
fn distinct_vertices(points: &[PixelPoint]) -> Vec<PixelPoint> {
    let mut distinct = points.to_vec();
    distinct.dedup();
    while distinct.len() > 1 && distinct.first() == distinct.last() {
        distinct.pop();
    }
    distinct
}

/// Smooth the simplified track polygon into a dense, evenly parametrized
/// closed curve of `sample_count` points
pub fn smooth_track_outline(polygon: &Contour, sample_count: usize) -> Result<Contour> {
    let vertices = distinct_vertices(&polygon.points);
    debug!(
        "Spline input: {} vertices ({} after removing repeats)",
        polygon.points.len(),
        vertices.len()
    );

    let spline = PeriodicSpline::fit(&vertices)?;
    let smoothed = spline.sample(sample_count);

    info!(
        "Fitted periodic spline through {} vertices, sampled {} points (period {:.1} px)",
        vertices.len(),
        smoothed.len(),
        spline.period()
    );

    Ok(Contour::closed(smoothed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(side: f64) -> Vec<PixelPoint> {
        vec![
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(side, 0.0),
            PixelPoint::new(side, side),
            PixelPoint::new(0.0, side),
        ]
    }

    #[test]
    fn spline_passes_through_vertices() {
        let vertices = vec![
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(40.0, 5.0),
            PixelPoint::new(60.0, 30.0),
            PixelPoint::new(35.0, 70.0),
            PixelPoint::new(-10.0, 40.0),
        ];
        let spline = PeriodicSpline::fit(&vertices).unwrap();
        for (i, v) in vertices.iter().enumerate() {
            let p = spline.evaluate(spline.knots[i]);
            assert_relative_eq!(p.x, v.x, epsilon = 1e-9);
            assert_relative_eq!(p.y, v.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn samples_close_the_loop() {
        let spline = PeriodicSpline::fit(&square(100.0)).unwrap();
        let samples = spline.sample(1000);
        assert_eq!(samples.len(), 1000);
        let first = samples[0];
        let last = samples[999];
        assert_relative_eq!(first.x, last.x, epsilon = 1e-9);
        assert_relative_eq!(first.y, last.y, epsilon = 1e-9);
    }

    #[test]
    fn square_becomes_a_symmetric_rounded_loop() {
        let spline = PeriodicSpline::fit(&square(100.0)).unwrap();
        // Mid-edge of the first side bulges outwards (y < 0) by symmetry
        let mid = spline.evaluate(50.0);
        assert_relative_eq!(mid.x, 50.0, epsilon = 1e-9);
        assert!(mid.y < 0.0);
        // Opposite edge mirrors it
        let opposite = spline.evaluate(250.0);
        assert_relative_eq!(opposite.x, 50.0, epsilon = 1e-9);
        assert_relative_eq!(opposite.y, 100.0 - mid.y, epsilon = 1e-9);
    }

    #[test]
    fn seam_is_smooth_for_a_square() {
        let spline = PeriodicSpline::fit(&square(10.0)).unwrap();
        let period = spline.period();
        let eps = 0.5;
        // The square is symmetric about y = x through the seam vertex, so
        // a wrapped spline mirrors across it
        let before = spline.evaluate(period - eps);
        let after = spline.evaluate(eps);
        assert_relative_eq!(before.x, after.y, epsilon = 1e-9);
        assert_relative_eq!(before.y, after.x, epsilon = 1e-9);
    }

    #[test]
    fn cyclic_solver_matches_dense_system() {
        let lower = [1.0, 1.0, 1.0, 1.0];
        let diag = [4.0, 4.0, 4.0, 4.0];
        let upper = [1.0, 1.0, 1.0, 1.0];
        let rhs = [6.0, 6.0, 6.0, 6.0];
        // Constant right-hand side on a circulant matrix: x = 6 / (4 + 1 + 1)
        let x = solve_cyclic(&lower, &diag, &upper, 1.0, 1.0, &rhs);
        for v in x {
            assert_relative_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn too_few_vertices_is_degenerate() {
        let err = PeriodicSpline::fit(&[PixelPoint::new(0.0, 0.0), PixelPoint::new(1.0, 0.0)]);
        assert!(matches!(err, Err(TrackError::DegenerateContour(_))));
    }

    #[test]
    fn closing_duplicate_is_ignored() {
        let mut points = square(20.0);
        points.push(points[0]);
        points.insert(1, points[0]);
        let smoothed = smooth_track_outline(&Contour::closed(points), 200).unwrap();
        assert_eq!(smoothed.len(), 200);
        assert!(smoothed.closed);
    }
}
