use ndarray::prelude::*;

use crate::geometry::Geometry;
use crate::regularized::sinkhorn::{Sinkhorn, SinkhornOutput};
use crate::utils::metrics::MetricType;
use crate::OTError;

/// Solved transport problem between two weighted point clouds, bundling what a
/// plotting consumer needs: points, weights and the coupling.
///
/// ```rust
/// use rust_sinkhorn::prelude::*;
/// use ndarray::prelude::*;
///
/// let x = array![[0.0, 0.0], [1.0, 1.0]];
/// let y = array![[0.0, 0.1], [1.0, 0.9], [0.5, 0.5]];
///
/// let ot = Transport::new(x, y, None, None, 0.1, &Sinkhorn::new()).unwrap();
/// assert_eq!(ot.matrix().dim(), (2, 3));
/// assert!((ot.matrix().sum() - 1.0).abs() < 1e-2);
/// ```
#[derive(Clone, Debug)]
pub struct Transport {
    geom: Geometry,
    a: Array1<f64>,
    b: Array1<f64>,
    output: SinkhornOutput,
}

impl Transport {
    /// x: (n, d) source samples, y: (m, d) target samples
    /// a, b: sample weights, uniform when None
    /// epsilon: entropic regularization (> 0)
    pub fn new(
        x: Array2<f64>,
        y: Array2<f64>,
        a: Option<Array1<f64>>,
        b: Option<Array1<f64>>,
        epsilon: f64,
        solver: &Sinkhorn,
    ) -> Result<Self, OTError> {
        let geom = Geometry::from_point_clouds(x, y, MetricType::SqEuclidean, epsilon)?;
        Self::from_geometry(geom, a, b, solver)
    }

    pub fn from_geometry(
        geom: Geometry,
        a: Option<Array1<f64>>,
        b: Option<Array1<f64>>,
        solver: &Sinkhorn,
    ) -> Result<Self, OTError> {
        let (n, m) = geom.shape();

        // Defaults to uniform weights
        let a = a.unwrap_or_else(|| Array1::from_elem(n, 1. / n as f64));
        let b = b.unwrap_or_else(|| Array1::from_elem(m, 1. / m as f64));

        let output = solver.solve(&geom, &a, &b)?;

        Ok(Self { geom, a, b, output })
    }

    pub fn reg_ot_cost(&self) -> f64 {
        self.output.reg_ot_cost
    }

    pub fn converged(&self) -> bool {
        self.output.converged
    }

    /// Coupling reconstructed from the potentials
    pub fn matrix(&self) -> Array2<f64> {
        self.output.matrix(&self.geom)
    }

    pub fn output(&self) -> &SinkhornOutput {
        &self.output
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    pub fn a(&self) -> &Array1<f64> {
        &self.a
    }

    pub fn b(&self) -> &Array1<f64> {
        &self.b
    }

    /// Source points, None for cost matrix geometries
    pub fn x(&self) -> Option<&Array2<f64>> {
        self.geom.point_cloud().map(|pc| pc.x())
    }

    pub fn y(&self) -> Option<&Array2<f64>> {
        self.geom.point_cloud().map(|pc| pc.y())
    }
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::Transport;
    use crate::geometry::Geometry;
    use crate::regularized::sinkhorn::Sinkhorn;

    #[test]
    fn test_uniform_default_weights() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![[0.5], [1.5]];

        let ot = Transport::new(x.clone(), y, None, None, 0.5, Sinkhorn::new().threshold(1e-8)).unwrap();

        assert!(ot.a().abs_diff_eq(&Array1::from_elem(3, 1. / 3.), 1e-15));
        assert!(ot.b().abs_diff_eq(&Array1::from_elem(2, 0.5), 1e-15));
        assert_eq!(ot.x(), Some(&x));
        assert!(ot.converged());

        let plan = ot.matrix();
        assert!(plan.sum_axis(Axis(1)).abs_diff_eq(ot.a(), 1e-6));
        assert!(plan.sum_axis(Axis(0)).abs_diff_eq(ot.b(), 1e-6));
    }

    #[test]
    fn test_from_cost_matrix() {
        let geom = Geometry::from_cost_matrix(array![[0.0, 1.0], [1.0, 0.0]], 1.0).unwrap();
        let ot = Transport::from_geometry(geom, None, None, &Sinkhorn::new()).unwrap();

        assert!(ot.x().is_none());
        assert!(ot.reg_ot_cost().is_finite());
    }

    #[test]
    fn test_shape_mismatch() {
        let geom = Geometry::from_cost_matrix(Array2::zeros((2, 2)), 1.0).unwrap();
        assert!(Transport::from_geometry(geom, Some(array![1.0]), None, &Sinkhorn::new()).is_err());
    }
}
