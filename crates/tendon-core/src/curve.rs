//! Arc-length parametrized polyline curves.
//!
//! Curves are baked once into a list of points with cumulative lengths;
//! sampling by arc length is then a binary search and one lerp.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

/// Control point of a cubic Bezier path. Handles are relative to `position`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BezierPoint<const D: usize> {
    pub position: SVector<f32, D>,
    pub handle_in: SVector<f32, D>,
    pub handle_out: SVector<f32, D>,
}

impl<const D: usize> BezierPoint<D> {
    /// Point with no handles (straight segments).
    pub fn corner(position: SVector<f32, D>) -> Self {
        Self {
            position,
            handle_in: SVector::zeros(),
            handle_out: SVector::zeros(),
        }
    }
}

/// Baked curve in `D` dimensions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurvePath<const D: usize> {
    points: Vec<SVector<f32, D>>,
    cumulative: Vec<f32>,
}

pub type Curve2D = CurvePath<2>;
pub type Curve3D = CurvePath<3>;

impl<const D: usize> CurvePath<D> {
    /// Polyline through `points` in order.
    pub fn from_points(points: impl IntoIterator<Item = SVector<f32, D>>) -> Self {
        let points: Vec<SVector<f32, D>> = points.into_iter().collect();
        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        for (i, p) in points.iter().enumerate() {
            if i > 0 {
                total += (p - points[i - 1]).norm();
            }
            cumulative.push(total);
        }
        Self { points, cumulative }
    }

    /// Bake a cubic Bezier path so that consecutive samples are at most
    /// roughly `bake_interval` apart.
    pub fn from_bezier(control: &[BezierPoint<D>], bake_interval: f32) -> Self {
        let interval = bake_interval.max(1e-4);
        let mut baked = Vec::new();
        if let Some(first) = control.first() {
            baked.push(first.position);
        }
        for pair in control.windows(2) {
            let p0 = pair[0].position;
            let c0 = p0 + pair[0].handle_out;
            let p1 = pair[1].position;
            let c1 = p1 + pair[1].handle_in;
            // Control polygon length bounds the arc length from above.
            let hull = (c0 - p0).norm() + (c1 - c0).norm() + (p1 - c1).norm();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let steps = ((hull / interval).ceil() as usize).max(1);
            for step in 1..=steps {
                #[allow(clippy::cast_precision_loss)]
                let t = step as f32 / steps as f32;
                let u = 1.0 - t;
                let point = p0 * (u * u * u)
                    + c0 * (3.0 * u * u * t)
                    + c1 * (3.0 * u * t * t)
                    + p1 * (t * t * t);
                baked.push(point);
            }
        }
        Self::from_points(baked)
    }

    /// Total arc length.
    pub fn baked_length(&self) -> f32 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SVector<f32, D>] {
        &self.points
    }

    /// Point at arc length `offset`, clamped to the ends. `None` when empty.
    pub fn sample_baked(&self, offset: f32) -> Option<SVector<f32, D>> {
        let last = *self.points.last()?;
        if self.points.len() == 1 || offset <= 0.0 {
            return Some(self.points[0]);
        }
        if offset >= self.baked_length() {
            return Some(last);
        }
        // First index whose cumulative length exceeds the offset.
        let upper = self.cumulative.partition_point(|&len| len <= offset);
        let lower = upper - 1;
        let span = self.cumulative[upper] - self.cumulative[lower];
        if span <= f32::EPSILON {
            return Some(self.points[upper]);
        }
        let t = (offset - self.cumulative[lower]) / span;
        Some(self.points[lower].lerp(&self.points[upper], t))
    }

    /// New curve with every baked point mapped through `f`.
    #[must_use]
    pub fn map_points(&self, f: impl Fn(SVector<f32, D>) -> SVector<f32, D>) -> Self {
        Self::from_points(self.points.iter().map(|&p| f(p)))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    use super::*;

    fn l_shape() -> Curve2D {
        Curve2D::from_points([
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 0.0),
            Vector2::new(2.0, 3.0),
        ])
    }

    #[test]
    fn baked_length_sums_segments() {
        assert_relative_eq!(l_shape().baked_length(), 5.0);
    }

    #[test]
    fn sample_interpolates_and_clamps() {
        let curve = l_shape();
        assert_relative_eq!(curve.sample_baked(1.0).unwrap(), Vector2::new(1.0, 0.0));
        assert_relative_eq!(curve.sample_baked(3.5).unwrap(), Vector2::new(2.0, 1.5));
        assert_relative_eq!(curve.sample_baked(-1.0).unwrap(), Vector2::new(0.0, 0.0));
        assert_relative_eq!(curve.sample_baked(99.0).unwrap(), Vector2::new(2.0, 3.0));
        assert_relative_eq!(curve.sample_baked(2.0).unwrap(), Vector2::new(2.0, 0.0));
    }

    #[test]
    fn empty_curve_has_no_samples() {
        let curve = Curve3D::default();
        assert!(curve.is_empty());
        assert!(curve.sample_baked(0.0).is_none());
        assert_relative_eq!(curve.baked_length(), 0.0);
    }

    #[test]
    fn bezier_straight_line() {
        let curve = Curve3D::from_bezier(
            &[
                BezierPoint::corner(Vector3::zeros()),
                BezierPoint::corner(Vector3::new(0.0, 0.0, -4.0)),
            ],
            0.5,
        );
        assert_relative_eq!(curve.baked_length(), 4.0, epsilon = 1e-4);
        assert_relative_eq!(
            curve.sample_baked(1.0).unwrap(),
            Vector3::new(0.0, 0.0, -1.0),
            epsilon = 1e-4
        );
    }

    #[test]
    fn bezier_arc_is_longer_than_chord() {
        let curve = Curve2D::from_bezier(
            &[
                BezierPoint {
                    position: Vector2::new(0.0, 0.0),
                    handle_in: Vector2::zeros(),
                    handle_out: Vector2::new(0.0, 1.0),
                },
                BezierPoint {
                    position: Vector2::new(2.0, 0.0),
                    handle_in: Vector2::new(0.0, 1.0),
                    handle_out: Vector2::zeros(),
                },
            ],
            0.05,
        );
        assert!(curve.baked_length() > 2.0);
        assert!(curve.points().len() > 10);
    }

    #[test]
    fn map_points_scales_length() {
        let curve = l_shape().map_points(|p| p * 2.0);
        assert_relative_eq!(curve.baked_length(), 10.0);
    }
}
