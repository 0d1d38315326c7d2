use std::sync::OnceLock;

use ndarray::prelude::*;

use crate::error::OTError;

/// Geometry defined by a precomputed n x m cost matrix
#[derive(Clone, Debug)]
pub struct CostMatrix {
    cost: Array2<f64>,
    epsilon: f64,
    kernel: OnceLock<Array2<f64>>,
}

impl CostMatrix {
    pub fn new(cost: Array2<f64>, epsilon: f64) -> Result<Self, OTError> {
        super::check_epsilon(epsilon)?;

        if cost.is_empty() {
            return Err(OTError::InvalidShape {
                dim_a: cost.nrows(),
                dim_b: cost.ncols(),
                dim_m_0: cost.nrows(),
                dim_m_1: cost.ncols(),
            });
        }

        Ok(Self {
            cost,
            epsilon,
            kernel: OnceLock::new(),
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn shape(&self) -> (usize, usize) {
        self.cost.dim()
    }

    pub fn cost(&self, i: usize, j: usize) -> f64 {
        self.cost[[i, j]]
    }

    pub fn cost_matrix(&self) -> &Array2<f64> {
        &self.cost
    }

    /// K = exp(-M/reg), computed on first use
    pub fn kernel_matrix(&self) -> &Array2<f64> {
        let reg = self.epsilon;
        self.kernel.get_or_init(|| self.cost.mapv(|ele| (-ele / reg).exp()))
    }

    pub fn apply_kernel(&self, v: &Array1<f64>, axis: Axis) -> Array1<f64> {
        let k = self.kernel_matrix();
        match axis {
            Axis(0) => k.t().dot(v),
            _ => k.dot(v),
        }
    }
}
