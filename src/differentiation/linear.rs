//! Linear solvers for the systems arising from implicit differentiation.
//!
//! Operators are symmetric positive semi-definite and only available through
//! matrix-vector products. A ridge term `ridge * I` is added by the solver.

use ndarray::prelude::*;

use crate::ndarray_logical;
use crate::OTError;

pub trait LinearOperator: Sync {
    fn dim(&self) -> usize;

    fn apply(&self, x: &Array1<f64>) -> Array1<f64>;
}

pub trait LinearSolve {
    /// Solves (op + ridge * I) x = rhs
    fn solve(&self, op: &dyn LinearOperator, rhs: &Array1<f64>, ridge: f64) -> Result<Array1<f64>, OTError>;
}

/// Matrix-free conjugate gradient
///
/// tolerance: Stop when ||r|| <= tolerance * ||rhs|| (default = 1E-10)
/// max_iter: Iteration cap, None meaning 10 x dim (default = None)
#[derive(Clone, Debug)]
pub struct ConjugateGradient {
    tolerance: f64,
    max_iter: Option<usize>,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self::new()
    }
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self {
            tolerance: 1E-10,
            max_iter: None,
        }
    }

    pub fn tolerance<'b>(&'b mut self, tolerance: f64) -> &'b mut Self {
        self.tolerance = tolerance;
        self
    }

    pub fn iterations<'b>(&'b mut self, max_iter: usize) -> &'b mut Self {
        self.max_iter = Some(max_iter);
        self
    }
}

impl LinearSolve for ConjugateGradient {
    fn solve(&self, op: &dyn LinearOperator, rhs: &Array1<f64>, ridge: f64) -> Result<Array1<f64>, OTError> {
        let dim = op.dim();
        if rhs.len() != dim {
            return Err(OTError::LinearSolveError(format!(
                "right hand side has length {}, operator has dimension {}",
                rhs.len(),
                dim
            )));
        }

        let mut x = Array1::<f64>::zeros(dim);
        let rhs_norm = rhs.dot(rhs).sqrt();
        if !rhs_norm.is_finite() {
            return Err(OTError::LinearSolveError("non-finite right hand side".to_string()));
        }
        if rhs_norm == 0. {
            return Ok(x);
        }

        let max_iter = self.max_iter.unwrap_or(10 * dim.max(1));
        let mut r = rhs.clone();
        let mut p = r.clone();
        let mut rs = r.dot(&r);
        let mut converged = false;

        for _ in 0..max_iter {
            let ap = op.apply(&p) + &p * ridge;
            let curvature = p.dot(&ap);
            if !(curvature > 0.) {
                // singular direction reached
                break;
            }

            let alpha = rs / curvature;
            x.scaled_add(alpha, &p);
            r.scaled_add(-alpha, &ap);

            let rs_new = r.dot(&r);
            if rs_new.sqrt() <= self.tolerance * rhs_norm {
                converged = true;
                break;
            }

            p = &r + &(p * (rs_new / rs));
            rs = rs_new;
        }

        if !ndarray_logical::all_finite(&x) {
            return Err(OTError::LinearSolveError(
                "conjugate gradient produced non-finite values".to_string(),
            ));
        }

        if !converged {
            log::warn!(
                "linear system may be singular: conjugate gradient stopped at relative residual {:.3e}, \
                 consider a positive ridge",
                rs.sqrt() / rhs_norm
            );
        }

        Ok(x)
    }
}

/// Dense LU solve through LAPACK. The operator is materialized column by column.
#[cfg(feature = "linalg")]
#[derive(Clone, Debug, Default)]
pub struct Lapack;

#[cfg(feature = "linalg")]
impl LinearSolve for Lapack {
    fn solve(&self, op: &dyn LinearOperator, rhs: &Array1<f64>, ridge: f64) -> Result<Array1<f64>, OTError> {
        use ndarray_linalg::Solve;

        let dim = op.dim();
        let mut mat = Array2::<f64>::zeros((dim, dim));
        for k in 0..dim {
            let mut unit = Array1::zeros(dim);
            unit[k] = 1.;
            mat.column_mut(k).assign(&op.apply(&unit));
        }
        mat.diag_mut().mapv_inplace(|d| d + ridge);

        let x = mat
            .solve(rhs)
            .map_err(|err| OTError::LinearSolveError(err.to_string()))?;

        if !ndarray_logical::all_finite(&x) {
            return Err(OTError::LinearSolveError("LU solve produced non-finite values".to_string()));
        }

        Ok(x)
    }
}

/// Solver choice carried by the Sinkhorn configuration
#[derive(Clone, Debug)]
pub enum LinearSolver {
    ConjugateGradient(ConjugateGradient),
    #[cfg(feature = "linalg")]
    Lapack(Lapack),
}

impl Default for LinearSolver {
    fn default() -> Self {
        LinearSolver::ConjugateGradient(ConjugateGradient::new())
    }
}

impl LinearSolve for LinearSolver {
    fn solve(&self, op: &dyn LinearOperator, rhs: &Array1<f64>, ridge: f64) -> Result<Array1<f64>, OTError> {
        match self {
            LinearSolver::ConjugateGradient(solver) => solver.solve(op, rhs, ridge),
            #[cfg(feature = "linalg")]
            LinearSolver::Lapack(solver) => solver.solve(op, rhs, ridge),
        }
    }
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::{ConjugateGradient, LinearOperator, LinearSolve};

    struct Dense(Array2<f64>);

    impl LinearOperator for Dense {
        fn dim(&self) -> usize {
            self.0.nrows()
        }

        fn apply(&self, x: &Array1<f64>) -> Array1<f64> {
            self.0.dot(x)
        }
    }

    #[test]
    fn test_conjugate_gradient_spd() {
        let op = Dense(array![[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]]);
        let truth = array![1.0, -2.0, 0.5];
        let rhs = op.apply(&truth);

        let x = ConjugateGradient::new().solve(&op, &rhs, 0.).unwrap();
        assert!(x.abs_diff_eq(&truth, 1e-8));
    }

    #[test]
    fn test_conjugate_gradient_ridge() {
        let op = Dense(array![[1.0, -1.0], [-1.0, 1.0]]);
        let rhs = array![1.0, 1.0];

        // (A + I) x = rhs with rhs in the kernel of A
        let x = ConjugateGradient::new().solve(&op, &rhs, 1.).unwrap();
        assert!(x.abs_diff_eq(&rhs, 1e-10));
    }

    #[test]
    fn test_conjugate_gradient_consistent_singular_system() {
        let op = Dense(array![[1.0, -1.0], [-1.0, 1.0]]);
        let rhs = array![1.0, -1.0];

        let x = ConjugateGradient::new().solve(&op, &rhs, 0.).unwrap();
        assert!(op.apply(&x).abs_diff_eq(&rhs, 1e-10));
    }

    #[test]
    fn test_conjugate_gradient_rejects_bad_rhs() {
        let op = Dense(Array2::eye(2));
        assert!(ConjugateGradient::new().solve(&op, &array![1.0], 0.).is_err());
        assert!(ConjugateGradient::new().solve(&op, &array![f64::NAN, 0.0], 0.).is_err());
    }
}
