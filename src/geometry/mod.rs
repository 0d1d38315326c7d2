//! Cost and kernel evaluators between two supports.
//!
//! A [`Geometry`] is either a dense cost matrix or a pair of point clouds under a ground
//! metric. The Sinkhorn solver only talks to it through kernel applications, so point
//! clouds can stay online and never hold an n x m matrix.

mod cost_matrix;
mod pointcloud;

use ndarray::prelude::*;
use ndarray::Zip;
use rayon::prelude::*;

use crate::error::OTError;
use crate::ndarray_logical::logsumexp;
use crate::utils::metrics::MetricType;

pub use cost_matrix::CostMatrix;
pub use pointcloud::PointCloud;

pub(crate) fn check_epsilon(epsilon: f64) -> Result<(), OTError> {
    if epsilon <= 0. || !epsilon.is_finite() {
        return Err(OTError::ArgError(format!(
            "Regularization term must be positive and finite, got {}",
            epsilon
        )));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub enum Geometry {
    CostMatrix(CostMatrix),
    PointCloud(PointCloud),
}

impl Geometry {
    pub fn from_cost_matrix(cost: Array2<f64>, epsilon: f64) -> Result<Self, OTError> {
        CostMatrix::new(cost, epsilon).map(Geometry::CostMatrix)
    }

    pub fn from_point_clouds(
        x: Array2<f64>,
        y: Array2<f64>,
        metric: MetricType,
        epsilon: f64,
    ) -> Result<Self, OTError> {
        PointCloud::new(x, y, metric, epsilon).map(Geometry::PointCloud)
    }

    /// Wraps one to three cost matrices, ordered (xy, xx, yy), for a Sinkhorn divergence
    pub fn prepare_divergences_from_costs(costs: Vec<Array2<f64>>, epsilon: f64) -> Result<Vec<Geometry>, OTError> {
        if costs.is_empty() || costs.len() > 3 {
            return Err(OTError::ArgError(format!(
                "Expected between 1 and 3 cost matrices, got {}",
                costs.len()
            )));
        }

        costs
            .into_iter()
            .map(|cost| Geometry::from_cost_matrix(cost, epsilon))
            .collect()
    }

    pub fn epsilon(&self) -> f64 {
        match self {
            Geometry::CostMatrix(geom) => geom.epsilon(),
            Geometry::PointCloud(geom) => geom.epsilon(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            Geometry::CostMatrix(geom) => geom.shape(),
            Geometry::PointCloud(geom) => geom.shape(),
        }
    }

    pub fn cost(&self, i: usize, j: usize) -> f64 {
        match self {
            Geometry::CostMatrix(geom) => geom.cost(i, j),
            Geometry::PointCloud(geom) => geom.cost(i, j),
        }
    }

    /// Materialized cost matrix
    pub fn cost_matrix(&self) -> Array2<f64> {
        match self {
            Geometry::CostMatrix(geom) => geom.cost_matrix().clone(),
            Geometry::PointCloud(geom) => geom.cost_matrix(),
        }
    }

    /// Materialized kernel K = exp(-C/eps)
    pub fn kernel_matrix(&self) -> Array2<f64> {
        match self {
            Geometry::CostMatrix(geom) => geom.kernel_matrix().clone(),
            Geometry::PointCloud(geom) => geom.kernel_matrix(),
        }
    }

    pub fn point_cloud(&self) -> Option<&PointCloud> {
        match self {
            Geometry::PointCloud(geom) => Some(geom),
            Geometry::CostMatrix(_) => None,
        }
    }

    /// Ensures weight vectors match the geometry's support sizes
    pub fn check_weights(&self, a: &Array1<f64>, b: &Array1<f64>) -> Result<(), OTError> {
        let (m0, m1) = self.shape();
        let dim_a = a.len();
        let dim_b = b.len();

        if dim_a != m0 || dim_b != m1 {
            return Err(OTError::InvalidShape {
                dim_a,
                dim_b,
                dim_m_0: m0,
                dim_m_1: m1,
            });
        }

        Ok(())
    }

    /// Axis(0): K^T v, one entry per column. Axis(1): K v, one entry per row.
    pub fn apply_kernel(&self, v: &Array1<f64>, axis: Axis) -> Array1<f64> {
        match self {
            Geometry::CostMatrix(geom) => geom.apply_kernel(v, axis),
            Geometry::PointCloud(geom) => geom.apply_kernel(v, axis),
        }
    }

    /// Log-domain kernel application.
    ///
    /// Axis(0): eps * LSE_i((h_i - C_ij) / eps) for every column j.
    /// Axis(1): eps * LSE_j((h_j - C_ij) / eps) for every row i.
    pub fn apply_lse_kernel(&self, h: &Array1<f64>, axis: Axis) -> Array1<f64> {
        let eps = self.epsilon();
        let (n, m) = self.shape();

        let values: Vec<f64> = match axis {
            Axis(0) => (0..m)
                .into_par_iter()
                .map(|j| {
                    let exponents: Vec<f64> = (0..n).map(|i| (h[i] - self.cost(i, j)) / eps).collect();
                    eps * logsumexp(exponents.iter().copied())
                })
                .collect(),
            _ => (0..n)
                .into_par_iter()
                .map(|i| {
                    let exponents: Vec<f64> = (0..m).map(|j| (h[j] - self.cost(i, j)) / eps).collect();
                    eps * logsumexp(exponents.iter().copied())
                })
                .collect(),
        };

        Array1::from_vec(values)
    }

    /// Coupling entry P_ij = exp((f_i + g_j - C_ij) / eps)
    pub fn transport_entry(&self, f: &Array1<f64>, g: &Array1<f64>, i: usize, j: usize) -> f64 {
        ((f[i] + g[j] - self.cost(i, j)) / self.epsilon()).exp()
    }

    /// Axis(1): row sums of the coupling, Axis(0): column sums
    pub fn marginals_from_potentials(&self, f: &Array1<f64>, g: &Array1<f64>, axis: Axis) -> Array1<f64> {
        let eps = self.epsilon();
        match axis {
            Axis(0) => {
                let lse = self.apply_lse_kernel(f, Axis(0));
                Zip::from(g).and(&lse).map_collect(|&gj, &l| ((gj + l) / eps).exp())
            }
            _ => {
                let lse = self.apply_lse_kernel(g, Axis(1));
                Zip::from(f).and(&lse).map_collect(|&fi, &l| ((fi + l) / eps).exp())
            }
        }
    }

    /// Axis(1): u * K v, Axis(0): v * K^T u
    pub fn marginals_from_scalings(&self, u: &Array1<f64>, v: &Array1<f64>, axis: Axis) -> Array1<f64> {
        match axis {
            Axis(0) => v * &self.apply_kernel(u, Axis(0)),
            _ => u * &self.apply_kernel(v, Axis(1)),
        }
    }

    /// Materialized coupling diag(exp(f/eps)) K diag(exp(g/eps))
    pub fn transport_from_potentials(&self, f: &Array1<f64>, g: &Array1<f64>) -> Array2<f64> {
        Array2::from_shape_fn(self.shape(), |(i, j)| self.transport_entry(f, g, i, j))
    }

    /// Materialized coupling diag(u) K diag(v)
    pub fn transport_from_scalings(&self, u: &Array1<f64>, v: &Array1<f64>) -> Array2<f64> {
        let k = self.kernel_matrix();
        Array2::from_shape_fn(self.shape(), |(i, j)| u[i] * k[[i, j]] * v[j])
    }
}
