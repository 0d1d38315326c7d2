//! Derivatives of the regularized OT cost with respect to the weights and the points.
//!
//! Three strategies are available, picked from the solver configuration:
//!
//! - [`Differentiation::Unrolled`] backpropagates through every recorded iteration.
//! - [`Differentiation::Implicit`] applies the implicit function theorem at the returned
//!   potentials, solving one linear system in the dual variables.
//! - [`Differentiation::Danskin`] treats the potentials as constants, which is exact at an
//!   optimum and a cheap approximation elsewhere.
//!
//! Hessians are available for the unrolled and implicit strategies.

pub mod linear;

mod implicit;
mod unrolled;

use ndarray::prelude::*;
use ndarray::Zip;
use rayon::prelude::*;

use crate::geometry::Geometry;
use crate::regularized::sinkhorn::{relative_potential, relaxation, rho, Sinkhorn, SinkhornOutput};
use crate::OTError;

use linear::{LinearOperator, LinearSolve};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Differentiation {
    Unrolled,
    Implicit { ridge_kernel: f64, ridge_identity: f64 },
    Danskin,
}

/// Gradient of the regularized OT cost. Point gradients are only defined for point
/// cloud geometries.
#[derive(Clone, Debug)]
pub struct Gradients {
    pub a: Array1<f64>,
    pub b: Array1<f64>,
    pub x: Option<Array2<f64>>,
    pub y: Option<Array2<f64>>,
}

impl Sinkhorn {
    /// Strategy in use. `use_danskin` takes precedence over `implicit_differentiation`.
    pub fn differentiation(&self) -> Differentiation {
        if self.use_danskin {
            Differentiation::Danskin
        } else if self.implicit_differentiation {
            Differentiation::Implicit {
                ridge_kernel: self.ridge_kernel,
                ridge_identity: self.ridge_identity,
            }
        } else {
            Differentiation::Unrolled
        }
    }

    /// Solves the problem and differentiates its cost with the configured strategy
    pub fn value_and_grad(
        &self,
        geom: &Geometry,
        a: &Array1<f64>,
        b: &Array1<f64>,
    ) -> Result<(SinkhornOutput, Gradients), OTError> {
        self.check(geom, a, b)?;

        match self.differentiation() {
            Differentiation::Danskin => {
                let output = self.iterate(geom, a, b, None);
                let grads = Dual::new(self, geom, a, b, &output).danskin();
                Ok((output, grads))
            }
            Differentiation::Implicit { .. } => {
                let output = self.iterate(geom, a, b, None);
                let grads = implicit::gradients(self, geom, a, b, &output)?;
                Ok((output, grads))
            }
            Differentiation::Unrolled => {
                let mut tape = Vec::new();
                let output = self.iterate(geom, a, b, Some(&mut tape));
                let grads = unrolled::gradients(self, geom, a, b, &output, &tape);
                Ok((output, grads))
            }
        }
    }

    /// Hessian of the cost with respect to the first weight vector (n x n). For
    /// balanced problems this is the Hessian along the simplex, H (I - 1 1^T / n).
    pub fn hessian_a(&self, geom: &Geometry, a: &Array1<f64>, b: &Array1<f64>) -> Result<Array2<f64>, OTError> {
        self.check(geom, a, b)?;

        match self.differentiation() {
            Differentiation::Danskin => Err(OTError::UnsupportedDerivative(
                "Danskin gradients treat potentials as constants and have no Hessian".to_string(),
            )),
            Differentiation::Implicit { .. } => {
                let output = self.iterate(geom, a, b, None);
                implicit::hessian_a(self, geom, a, b, &output)
            }
            Differentiation::Unrolled => {
                let mut tape = Vec::new();
                let output = self.iterate(geom, a, b, Some(&mut tape));
                Ok(unrolled::hessian_a(self, geom, a, b, &output, &tape))
            }
        }
    }

    /// Hessian of the cost with respect to the first point cloud, flattened row-major
    /// to (n * d) x (n * d)
    pub fn hessian_x(&self, geom: &Geometry, a: &Array1<f64>, b: &Array1<f64>) -> Result<Array2<f64>, OTError> {
        self.check(geom, a, b)?;

        if geom.point_cloud().is_none() {
            return Err(OTError::ArgError(
                "Point Hessians need a point cloud geometry".to_string(),
            ));
        }

        match self.differentiation() {
            Differentiation::Danskin => Err(OTError::UnsupportedDerivative(
                "Danskin gradients treat potentials as constants and have no Hessian".to_string(),
            )),
            Differentiation::Implicit { .. } => {
                let output = self.iterate(geom, a, b, None);
                implicit::hessian_x(self, geom, a, b, &output)
            }
            Differentiation::Unrolled => {
                let mut tape = Vec::new();
                let output = self.iterate(geom, a, b, Some(&mut tape));
                unrolled::hessian_x(self, geom, a, b, &output, &tape)
            }
        }
    }
}

/// First order information of the cost at fixed potentials
pub(crate) struct Dual<'a> {
    geom: &'a Geometry,
    a: &'a Array1<f64>,
    b: &'a Array1<f64>,
    f: &'a Array1<f64>,
    g: &'a Array1<f64>,
    reg: f64,
    tau_a: f64,
    tau_b: f64,
    balanced: bool,
    relax_a: Array1<f64>,
    relax_b: Array1<f64>,
    rows: Array1<f64>,
    cols: Array1<f64>,
    plan: Option<Array2<f64>>,
}

impl<'a> Dual<'a> {
    pub(crate) fn new(
        solver: &Sinkhorn,
        geom: &'a Geometry,
        a: &'a Array1<f64>,
        b: &'a Array1<f64>,
        output: &'a SinkhornOutput,
    ) -> Self {
        let reg = geom.epsilon();
        let (f, g) = (&output.f, &output.g);

        Self {
            geom,
            a,
            b,
            f,
            g,
            reg,
            tau_a: solver.tau_a,
            tau_b: solver.tau_b,
            balanced: solver.is_balanced(),
            relax_a: relaxation(a, f, reg, solver.tau_a),
            relax_b: relaxation(b, g, reg, solver.tau_b),
            rows: geom.marginals_from_potentials(f, g, Axis(1)),
            cols: geom.marginals_from_potentials(f, g, Axis(0)),
            plan: None,
        }
    }

    /// Keeps a dense copy of the coupling for repeated products
    pub(crate) fn materialize(mut self) -> Self {
        self.plan = Some(self.geom.transport_from_potentials(self.f, self.g));
        self
    }

    pub(crate) fn transport(&self, i: usize, j: usize) -> f64 {
        match &self.plan {
            Some(plan) => plan[[i, j]],
            None => self.geom.transport_entry(self.f, self.g, i, j),
        }
    }

    /// Axis(0): P^T z, Axis(1): P z
    pub(crate) fn apply_transport(&self, z: &Array1<f64>, axis: Axis) -> Array1<f64> {
        if let Some(plan) = &self.plan {
            return match axis {
                Axis(0) => plan.t().dot(z),
                _ => plan.dot(z),
            };
        }

        let (n, m) = self.geom.shape();
        let values: Vec<f64> = match axis {
            Axis(0) => (0..m)
                .into_par_iter()
                .map(|j| (0..n).map(|i| self.transport(i, j) * z[i]).sum())
                .collect(),
            _ => (0..n)
                .into_par_iter()
                .map(|i| (0..m).map(|j| self.transport(i, j) * z[j]).sum())
                .collect(),
        };

        Array1::from_vec(values)
    }

    /// Derivative of the residual with respect to each weight, also the derivative of
    /// the weight gradient with respect to the relative potential
    pub(crate) fn sensitivity_a(&self) -> Array1<f64> {
        sensitivity(self.a, &self.relax_a, self.reg, self.tau_a)
    }

    pub(crate) fn sensitivity_b(&self) -> Array1<f64> {
        sensitivity(self.b, &self.relax_b, self.reg, self.tau_b)
    }

    /// Gradient of the cost in the weights at fixed potentials
    pub(crate) fn partial_a(&self) -> Array1<f64> {
        let phi = self.extended_potential(self.a, self.f, self.g, Axis(1), self.tau_a);
        partial(&phi, self.reg, self.tau_a, self.b.sum())
    }

    pub(crate) fn partial_b(&self) -> Array1<f64> {
        let phi = self.extended_potential(self.b, self.g, self.f, Axis(0), self.tau_b);
        partial(&phi, self.reg, self.tau_b, self.a.sum())
    }

    /// Relative potential, extended off the support of the weights by the
    /// c-transform of the other potential, -tau * eps * LSE((other - C) / eps)
    fn extended_potential(
        &self,
        weights: &Array1<f64>,
        potential: &Array1<f64>,
        other: &Array1<f64>,
        axis: Axis,
        tau: f64,
    ) -> Array1<f64> {
        let mut phi = relative_potential(weights, potential, self.reg);
        if weights.iter().any(|&w| w <= 0.) {
            let transform = self.geom.apply_lse_kernel(other, axis);
            Zip::from(&mut phi)
                .and(weights)
                .and(&transform)
                .for_each(|p, &w, &t| {
                    if w <= 0. {
                        *p = -tau * t;
                    }
                });
        }
        phi
    }

    /// Gradient of the cost in the potentials, zero at a fixed point
    pub(crate) fn residual(&self) -> (Array1<f64>, Array1<f64>) {
        let res_f = self.a * &self.relax_a - &self.rows;
        let res_g = self.b * &self.relax_b - &self.cols;
        (res_f, res_g)
    }

    /// Solves M [x_f, x_g] = [rhs_f, rhs_g] with
    /// M = [[diag(P 1) + D_a, P], [P^T, diag(P^T 1) + D_b]] = -eps * d(residual)/d(f, g),
    /// through its Schur complement on the second block
    pub(crate) fn solve(
        &self,
        solver: &Sinkhorn,
        rhs_f: &Array1<f64>,
        rhs_g: &Array1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), OTError> {
        let d1 = &self.rows + &curvature(self.a, &self.relax_a, self.reg, self.tau_a);
        let inv_d1 = d1.mapv(|d| if d > 0. { 1. / d } else { 0. });
        let d2 = &self.cols + &curvature(self.b, &self.relax_b, self.reg, self.tau_b);

        let mut reduced_rhs = rhs_g - &self.apply_transport(&(&inv_d1 * rhs_f), Axis(0));
        let op = Schur {
            dual: self,
            inv_d1: &inv_d1,
            d2: &d2,
            ridge_kernel: if self.balanced { solver.ridge_kernel } else { 0. },
        };

        // balanced systems are singular along 1, solve on its complement
        if self.balanced {
            center(&mut reduced_rhs, &d2);
        }
        let mut x_g = solver
            .linear_solver
            .solve(&op, &reduced_rhs, solver.ridge_identity)?;
        if self.balanced {
            center(&mut x_g, &d2);
        }
        let x_f = &inv_d1 * &(rhs_f - &self.apply_transport(&x_g, Axis(1)));

        Ok((x_f, x_g))
    }

    /// Pulls a weighting of the cost entries back onto the points of a point cloud
    pub(crate) fn pullback<W>(&self, weight: W) -> (Option<Array2<f64>>, Option<Array2<f64>>)
    where
        W: Fn(usize, usize) -> f64 + Sync,
    {
        match self.geom.point_cloud() {
            Some(pc) => {
                let (x, y) = pc.pullback(weight);
                (Some(x), Some(y))
            }
            None => (None, None),
        }
    }

    pub(crate) fn danskin(&self) -> Gradients {
        let (x, y) = self.pullback(|i, j| self.transport(i, j));
        Gradients {
            a: self.partial_a(),
            b: self.partial_b(),
            x,
            y,
        }
    }
}

/// S = diag(P^T 1) + D_b - P^T (diag(P 1) + D_a)^-1 P + ridge_kernel * 1 1^T,
/// the ridge only being used for balanced problems where S 1 = 0
struct Schur<'a> {
    dual: &'a Dual<'a>,
    inv_d1: &'a Array1<f64>,
    d2: &'a Array1<f64>,
    ridge_kernel: f64,
}

impl LinearOperator for Schur<'_> {
    fn dim(&self) -> usize {
        self.d2.len()
    }

    fn apply(&self, z: &Array1<f64>) -> Array1<f64> {
        let pz = self.dual.apply_transport(z, Axis(1));
        let back = self.dual.apply_transport(&(self.inv_d1 * &pz), Axis(0));
        let mut out = self.d2 * z - back;
        if self.ridge_kernel > 0. {
            out += self.ridge_kernel * z.sum();
        }
        out
    }
}

/// Removes the mean over the support of `diag`, zeroing the entries outside of it
fn center(z: &mut Array1<f64>, diag: &Array1<f64>) {
    let support = diag.iter().filter(|&&d| d > 0.).count();
    if support == 0 {
        return;
    }
    let mean = Zip::from(&*z)
        .and(diag)
        .fold(0., |acc, &v, &d| if d > 0. { acc + v } else { acc })
        / support as f64;
    Zip::from(z).and(diag).for_each(|v, &d| *v = if d > 0. { *v - mean } else { 0. });
}

fn partial(phi: &Array1<f64>, reg: f64, tau: f64, other_mass: f64) -> Array1<f64> {
    match rho(reg, tau) {
        None => phi + reg * (other_mass - 1.),
        Some(rho) => phi.mapv(|p| {
            let e = (-p / rho).exp();
            rho * (1. - e) - reg * e + reg * other_mass
        }),
    }
}

fn sensitivity(weights: &Array1<f64>, relax: &Array1<f64>, reg: f64, tau: f64) -> Array1<f64> {
    let factor = rho(reg, tau).map_or(1., |rho| 1. + reg / rho);
    Zip::from(weights)
        .and(relax)
        .map_collect(|&w, &e| if w > 0. { e * factor } else { 0. })
}

/// eps * a * exp(-phi / rho) / rho, zero when balanced
fn curvature(weights: &Array1<f64>, relax: &Array1<f64>, reg: f64, tau: f64) -> Array1<f64> {
    match rho(reg, tau) {
        None => Array1::zeros(weights.len()),
        Some(rho) => weights * relax * (reg / rho),
    }
}

/// Gradients of the cost along per-point directions, one array (n x m x d) entry per pair
pub(crate) fn cost_gradients(geom: &Geometry) -> Option<Array3<f64>> {
    let pc = geom.point_cloud()?;
    let (n, m) = pc.shape();
    let dim = pc.x().ncols();

    let mut out = Array3::zeros((n, m, dim));
    for i in 0..n {
        for j in 0..m {
            out.slice_mut(s![i, j, ..]).assign(&pc.grad_x(i, j));
        }
    }
    Some(out)
}

/// Unit weight directions. Balanced problems only admit mass preserving changes, so
/// their directions are projected onto the complement of 1.
pub(crate) fn weight_directions(n: usize, balanced: bool) -> Array2<f64> {
    let mut directions = Array2::eye(n);
    if balanced {
        directions -= 1. / n as f64;
    }
    directions
}

/// Weight Hessian from potential tangents along the given weight directions:
/// H[i, q] = kappa_i * (fdot[i, q] - eps * directions[i, q] / a_i)
pub(crate) fn assemble_hessian_a(dual: &Dual, directions: &Array2<f64>, fdot: &Array2<f64>) -> Array2<f64> {
    let kappa = dual.sensitivity_a();

    Array2::from_shape_fn(fdot.dim(), |(i, q)| {
        if dual.a[i] <= 0. {
            return 0.;
        }
        kappa[i] * (fdot[[i, q]] - dual.reg * directions[[i, q]] / dual.a[i])
    })
}

/// Point Hessian from potential tangents along every unit direction of x, columns
/// indexed by k * d + l. Differentiates x̄_i = Σ_j P_ij ∇c(x_i, y_j) through the
/// coupling and through the cost gradient itself.
pub(crate) fn assemble_hessian_x(
    dual: &Dual,
    grads: &Array3<f64>,
    fdot: &Array2<f64>,
    gdot: &Array2<f64>,
) -> Array2<f64> {
    let (n, m, dim) = grads.dim();
    let reg = dual.reg;

    let mut out = Array2::<f64>::zeros((n * dim, n * dim));

    // coupling variation through the potentials
    for q in 0..n * dim {
        for i in 0..n {
            for j in 0..m {
                let weight = dual.transport(i, j) * (fdot[[i, q]] + gdot[[j, q]]) / reg;
                for l in 0..dim {
                    out[[i * dim + l, q]] += weight * grads[[i, j, l]];
                }
            }
        }
    }

    // local terms: coupling variation through the cost and curvature of the cost
    let pc = dual.geom.point_cloud();
    for k in 0..n {
        let mut local = Array2::<f64>::zeros((dim, dim));
        for j in 0..m {
            let p = dual.transport(k, j);
            let grad = grads.slice(s![k, j, ..]);
            let outer = grad
                .insert_axis(Axis(1))
                .dot(&grad.insert_axis(Axis(0)));
            local.scaled_add(-p / reg, &outer);
            if let Some(pc) = pc {
                local.scaled_add(p, &pc.hessian_xx(k, j));
            }
        }
        let mut block = out.slice_mut(s![k * dim..(k + 1) * dim, k * dim..(k + 1) * dim]);
        block += &local;
    }

    out
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    use super::Differentiation;
    use crate::geometry::Geometry;
    use crate::regularized::sinkhorn::Sinkhorn;
    use crate::utils::distributions::{uniform_point_cloud, uniform_weights};
    use crate::utils::metrics::MetricType;

    fn problem(seed: u64) -> (Geometry, Array1<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = uniform_point_cloud(7, 2, &mut rng);
        let y = uniform_point_cloud(9, 2, &mut rng);
        let a = uniform_weights(7, 0.2, &mut rng);
        let b = uniform_weights(9, 0.2, &mut rng);
        let geom = Geometry::from_point_clouds(x, y, MetricType::SqEuclidean, 0.1).unwrap();
        (geom, a, b)
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            Sinkhorn::new().differentiation(),
            Differentiation::Implicit {
                ridge_kernel: 0.,
                ridge_identity: 0.
            }
        );
        assert_eq!(
            Sinkhorn::new().implicit_differentiation(false).differentiation(),
            Differentiation::Unrolled
        );
        assert_eq!(
            Sinkhorn::new()
                .implicit_differentiation(false)
                .use_danskin(true)
                .differentiation(),
            Differentiation::Danskin
        );
    }

    #[test]
    fn test_strategies_agree_at_convergence() {
        let (geom, a, b) = problem(5);

        for (tau_a, tau_b) in [(1.0, 1.0), (0.8, 0.9)] {
            let mut solver = Sinkhorn::new();
            solver.threshold(1e-10).tau_a(tau_a).tau_b(tau_b);

            let (_, implicit) = solver.value_and_grad(&geom, &a, &b).unwrap();
            let (_, unrolled) = solver
                .clone()
                .implicit_differentiation(false)
                .value_and_grad(&geom, &a, &b)
                .unwrap();
            let (_, danskin) = solver.clone().use_danskin(true).value_and_grad(&geom, &a, &b).unwrap();

            for other in [&unrolled, &danskin] {
                assert!(implicit.a.abs_diff_eq(&other.a, 1e-6));
                assert!(implicit.b.abs_diff_eq(&other.b, 1e-6));
                assert!(implicit
                    .x
                    .as_ref()
                    .unwrap()
                    .abs_diff_eq(other.x.as_ref().unwrap(), 1e-6));
                assert!(implicit
                    .y
                    .as_ref()
                    .unwrap()
                    .abs_diff_eq(other.y.as_ref().unwrap(), 1e-6));
            }
        }
    }

    #[test]
    fn test_cost_matrix_has_no_point_gradients() {
        let geom = Geometry::from_cost_matrix(array![[0.0, 1.0], [1.0, 0.0]], 0.5).unwrap();
        let a = array![0.5, 0.5];

        let (_, grads) = Sinkhorn::new().value_and_grad(&geom, &a, &a).unwrap();
        assert!(grads.x.is_none());
        assert!(grads.y.is_none());
        assert!(Sinkhorn::new().hessian_x(&geom, &a, &a).is_err());
    }

    #[test]
    fn test_danskin_has_no_hessian() {
        let (geom, a, b) = problem(1);
        let result = Sinkhorn::new().use_danskin(true).hessian_a(&geom, &a, &b);
        assert!(matches!(result, Err(crate::OTError::UnsupportedDerivative(_))));
    }
}
