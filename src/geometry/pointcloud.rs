use std::sync::OnceLock;

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rayon::prelude::*;

use crate::error::OTError;
use crate::utils::metrics::{dist, MetricType};

use super::Geometry;

/// Geometry between two point clouds x (n x d) and y (m x d) under a ground metric.
///
/// In online mode (the default) cost and kernel entries are evaluated on the fly, so
/// kernel applications never hold an n x m matrix. Offline mode materializes the cost
/// and kernel matrices on first use.
#[derive(Clone, Debug)]
pub struct PointCloud {
    x: Array2<f64>,
    y: Array2<f64>,
    metric: MetricType,
    epsilon: f64,
    scale: f64,
    online: bool,
    cost: OnceLock<Array2<f64>>,
    kernel: OnceLock<Array2<f64>>,
}

impl PointCloud {
    pub fn new(x: Array2<f64>, y: Array2<f64>, metric: MetricType, epsilon: f64) -> Result<Self, OTError> {
        super::check_epsilon(epsilon)?;

        if x.ncols() != y.ncols() {
            return Err(OTError::PointDimensionError {
                dim_x: x.ncols(),
                dim_y: y.ncols(),
            });
        }

        if x.nrows() == 0 || y.nrows() == 0 {
            return Err(OTError::InvalidShape {
                dim_a: x.nrows(),
                dim_b: y.nrows(),
                dim_m_0: x.nrows(),
                dim_m_1: y.nrows(),
            });
        }

        Ok(Self {
            x,
            y,
            metric,
            epsilon,
            scale: 1.,
            online: true,
            cost: OnceLock::new(),
            kernel: OnceLock::new(),
        })
    }

    /// Materialize cost and kernel matrices instead of evaluating entries on the fly
    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Divide every cost entry by the largest one
    pub fn normalize_cost(mut self) -> Result<Self, OTError> {
        let cost = dist(&self.x, &self.y, self.metric)?;
        let max_cost = *cost.max().map_err(|err| OTError::Other(anyhow::anyhow!(err)))?;

        if max_cost > 0. {
            self.scale = 1. / max_cost;
        }
        self.cost = OnceLock::new();
        self.kernel = OnceLock::new();

        Ok(self)
    }

    /// Geometries for a Sinkhorn divergence between x and y: [xy, xx] when `static_b`
    /// is requested, [xy, xx, yy] otherwise. All share the metric and epsilon.
    pub fn prepare_divergences(
        x: &Array2<f64>,
        y: &Array2<f64>,
        metric: MetricType,
        epsilon: f64,
        static_b: bool,
    ) -> Result<Vec<Geometry>, OTError> {
        let mut pairs = vec![(x, y), (x, x)];
        if !static_b {
            pairs.push((y, y));
        }

        pairs
            .into_iter()
            .map(|(lhs, rhs)| {
                PointCloud::new(lhs.clone(), rhs.clone(), metric, epsilon).map(Geometry::PointCloud)
            })
            .collect()
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array2<f64> {
        &self.y
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x.nrows(), self.y.nrows())
    }

    /// Multiplicative factor applied to raw metric values
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn cost(&self, i: usize, j: usize) -> f64 {
        match self.cost.get() {
            Some(cost) => cost[[i, j]],
            None => self.scale * self.metric.pair(self.x.row(i), self.y.row(j)),
        }
    }

    pub fn cost_matrix(&self) -> Array2<f64> {
        match self.cached_cost() {
            Some(cost) => cost.clone(),
            None => Array2::from_shape_fn(self.shape(), |(i, j)| self.cost(i, j)),
        }
    }

    fn cached_cost(&self) -> Option<&Array2<f64>> {
        if self.online {
            return None;
        }

        Some(self.cost.get_or_init(|| {
            Array2::from_shape_fn(self.shape(), |(i, j)| {
                self.scale * self.metric.pair(self.x.row(i), self.y.row(j))
            })
        }))
    }

    pub fn kernel_matrix(&self) -> Array2<f64> {
        let reg = self.epsilon;
        match self.cached_cost() {
            Some(cost) => self.kernel.get_or_init(|| cost.mapv(|ele| (-ele / reg).exp())).clone(),
            None => Array2::from_shape_fn(self.shape(), |(i, j)| (-self.cost(i, j) / reg).exp()),
        }
    }

    pub fn apply_kernel(&self, v: &Array1<f64>, axis: Axis) -> Array1<f64> {
        let reg = self.epsilon;

        if let Some(cost) = self.cached_cost() {
            let k = self.kernel.get_or_init(|| cost.mapv(|ele| (-ele / reg).exp()));
            return match axis {
                Axis(0) => k.t().dot(v),
                _ => k.dot(v),
            };
        }

        let (n, m) = self.shape();
        let values: Vec<f64> = match axis {
            Axis(0) => (0..m)
                .into_par_iter()
                .map(|j| (0..n).map(|i| (-self.cost(i, j) / reg).exp() * v[i]).sum())
                .collect(),
            _ => (0..n)
                .into_par_iter()
                .map(|i| (0..m).map(|j| (-self.cost(i, j) / reg).exp() * v[j]).sum())
                .collect(),
        };

        Array1::from_vec(values)
    }

    /// Gradient of the scaled cost c(x_i, y_j) with respect to x_i.
    /// The gradient with respect to y_j is its negation.
    pub fn grad_x(&self, i: usize, j: usize) -> Array1<f64> {
        self.metric.grad_x(self.x.row(i), self.y.row(j)) * self.scale
    }

    /// Hessian of the scaled cost with respect to x_i
    pub fn hessian_xx(&self, i: usize, j: usize) -> Array2<f64> {
        self.metric.hessian_xx(self.x.row(i), self.y.row(j)) * self.scale
    }

    /// Pulls a weighting w_ij of cost entries back onto the points:
    /// x̄_i = Σ_j w_ij ∇_x c(x_i, y_j) and ȳ_j = Σ_i w_ij ∇_y c(x_i, y_j)
    pub fn pullback<W>(&self, weight: W) -> (Array2<f64>, Array2<f64>)
    where
        W: Fn(usize, usize) -> f64 + Sync,
    {
        let (n, m) = self.shape();
        let dim = self.x.ncols();

        let rows: Vec<Array1<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..m).fold(Array1::zeros(dim), |acc, j| {
                    acc + self.grad_x(i, j) * weight(i, j)
                })
            })
            .collect();

        let cols: Vec<Array1<f64>> = (0..m)
            .into_par_iter()
            .map(|j| {
                (0..n).fold(Array1::zeros(dim), |acc, i| {
                    acc - self.grad_x(i, j) * weight(i, j)
                })
            })
            .collect();

        (stack_rows(&rows, dim), stack_rows(&cols, dim))
    }
}

fn stack_rows(rows: &[Array1<f64>], dim: usize) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), dim));
    for (mut row, value) in out.axis_iter_mut(Axis(0)).zip(rows) {
        row.assign(value);
    }
    out
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use crate::utils::metrics::{dist, MetricType};

    fn clouds() -> (Array2<f64>, Array2<f64>) {
        let x = array![[0.0, 0.0], [1.0, 0.5], [0.2, 0.9]];
        let y = array![[0.5, 0.5], [1.0, 1.0]];
        (x, y)
    }

    #[test]
    fn test_online_kernel_matches_offline() {
        let (x, y) = clouds();
        let online = super::PointCloud::new(x.clone(), y.clone(), MetricType::SqEuclidean, 0.3).unwrap();
        let offline = online.clone().offline();

        let u = array![0.1, 0.3, 0.6];
        let v = array![0.4, 0.6];

        assert!(online
            .apply_kernel(&u, Axis(0))
            .abs_diff_eq(&offline.apply_kernel(&u, Axis(0)), 1e-12));
        assert!(online
            .apply_kernel(&v, Axis(1))
            .abs_diff_eq(&offline.apply_kernel(&v, Axis(1)), 1e-12));

        let m = dist(&x, &y, MetricType::SqEuclidean).unwrap();
        assert!(online.cost_matrix().abs_diff_eq(&m, 1e-12));
    }

    #[test]
    fn test_normalize_cost() {
        let (x, y) = clouds();
        let geom = super::PointCloud::new(x, y, MetricType::SqEuclidean, 0.3)
            .unwrap()
            .normalize_cost()
            .unwrap();

        let cost = geom.cost_matrix();
        let max = cost.iter().cloned().fold(f64::MIN, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_prepare_divergences() {
        let (x, y) = clouds();
        let geoms = super::PointCloud::prepare_divergences(&x, &y, MetricType::SqEuclidean, 0.1, false).unwrap();
        assert_eq!(geoms.len(), 3);
        assert_eq!(geoms[0].shape(), (3, 2));
        assert_eq!(geoms[1].shape(), (3, 3));
        assert_eq!(geoms[2].shape(), (2, 2));

        let geoms = super::PointCloud::prepare_divergences(&x, &y, MetricType::SqEuclidean, 0.1, true).unwrap();
        assert_eq!(geoms.len(), 2);
    }

    #[test]
    fn test_rejects_mismatched_features() {
        let x = Array2::<f64>::zeros((3, 2));
        let y = Array2::<f64>::zeros((4, 3));
        assert!(super::PointCloud::new(x, y, MetricType::SqEuclidean, 0.1).is_err());
    }
}
