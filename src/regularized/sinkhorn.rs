use ndarray::prelude::*;
use ndarray::Zip;

use crate::differentiation::linear::LinearSolver;
use crate::geometry::Geometry;
use crate::ndarray_logical;
use crate::OTError;

/// Pair of dual potentials (f, g), with coupling P = diag(exp(f/eps)) K diag(exp(g/eps))
#[derive(Clone, Debug, PartialEq)]
pub struct Potentials {
    pub f: Array1<f64>,
    pub g: Array1<f64>,
}

/// Result of a single Sinkhorn run
#[derive(Clone, Debug)]
pub struct SinkhornOutput {
    pub f: Array1<f64>,
    pub g: Array1<f64>,
    /// <P, C> + eps KL(P | a x b), plus the marginal penalties when unbalanced
    pub reg_ot_cost: f64,
    pub iterations: usize,
    /// Marginal violation, one entry per convergence check in iteration order
    pub errors: Vec<f64>,
    pub converged: bool,
    pub threshold: f64,
}

impl SinkhornOutput {
    pub fn potentials(&self) -> Potentials {
        Potentials {
            f: self.f.clone(),
            g: self.g.clone(),
        }
    }

    /// Materialized transport plan
    pub fn matrix(&self, geom: &Geometry) -> Array2<f64> {
        geom.transport_from_potentials(&self.f, &self.g)
    }
}

/// Entropic optimal transport solver based on alternating Sinkhorn projections
///
/// threshold: Marginal violation convergence threshold (> 0) (default = 1E-3)
/// max_iter: Max number of iterations (default = 2000)
/// inner_iterations: Iterations between two convergence checks (default = 10)
/// lse_mode: Log-domain (stabilized) updates when true, scaling updates otherwise (default = true)
/// tau_a, tau_b: Marginal relaxation in (0, 1], 1 being balanced (default = 1)
/// implicit_differentiation, use_danskin, ridge_kernel, ridge_identity: see [`crate::differentiation`]
///
/// ```rust
/// use rust_sinkhorn::prelude::*;
/// use ndarray::prelude::*;
///
/// let a = array![0.5, 0.5];
/// let b = array![0.5, 0.5];
/// let geom = Geometry::from_cost_matrix(array![[0.0, 1.0], [1.0, 0.0]], 1.0).unwrap();
///
/// let out = Sinkhorn::new().threshold(1e-9).solve(&geom, &a, &b).unwrap();
/// let plan = out.matrix(&geom);
/// assert!(plan.relative_eq(&array![[0.36552929, 0.13447071], [0.13447071, 0.36552929]], 1E-6, 1E-2));
/// ```
#[derive(Clone, Debug)]
pub struct Sinkhorn {
    pub(crate) threshold: f64,
    pub(crate) max_iter: usize,
    pub(crate) inner_iterations: usize,
    pub(crate) lse_mode: bool,
    pub(crate) tau_a: f64,
    pub(crate) tau_b: f64,
    pub(crate) implicit_differentiation: bool,
    pub(crate) use_danskin: bool,
    pub(crate) ridge_kernel: f64,
    pub(crate) ridge_identity: f64,
    pub(crate) linear_solver: LinearSolver,
    pub(crate) init: Option<Potentials>,
}

impl Default for Sinkhorn {
    fn default() -> Self {
        Self::new()
    }
}

impl Sinkhorn {
    pub fn new() -> Self {
        Self {
            threshold: 1E-3,
            max_iter: 2000,
            inner_iterations: 10,
            lse_mode: true,
            tau_a: 1.,
            tau_b: 1.,
            implicit_differentiation: true,
            use_danskin: false,
            ridge_kernel: 0.,
            ridge_identity: 0.,
            linear_solver: LinearSolver::default(),
            init: None,
        }
    }

    pub fn threshold<'b>(&'b mut self, threshold: f64) -> &'b mut Self {
        self.threshold = threshold;
        self
    }

    pub fn iterations<'b>(&'b mut self, max_iter: usize) -> &'b mut Self {
        self.max_iter = max_iter;
        self
    }

    pub fn inner_iterations<'b>(&'b mut self, inner_iterations: usize) -> &'b mut Self {
        self.inner_iterations = inner_iterations;
        self
    }

    pub fn lse_mode<'b>(&'b mut self, lse_mode: bool) -> &'b mut Self {
        self.lse_mode = lse_mode;
        self
    }

    pub fn tau_a<'b>(&'b mut self, tau_a: f64) -> &'b mut Self {
        self.tau_a = tau_a;
        self
    }

    pub fn tau_b<'b>(&'b mut self, tau_b: f64) -> &'b mut Self {
        self.tau_b = tau_b;
        self
    }

    pub fn implicit_differentiation<'b>(&'b mut self, implicit: bool) -> &'b mut Self {
        self.implicit_differentiation = implicit;
        self
    }

    pub fn use_danskin<'b>(&'b mut self, use_danskin: bool) -> &'b mut Self {
        self.use_danskin = use_danskin;
        self
    }

    pub fn ridge_kernel<'b>(&'b mut self, ridge_kernel: f64) -> &'b mut Self {
        self.ridge_kernel = ridge_kernel;
        self
    }

    pub fn ridge_identity<'b>(&'b mut self, ridge_identity: f64) -> &'b mut Self {
        self.ridge_identity = ridge_identity;
        self
    }

    pub fn linear_solver<'b>(&'b mut self, linear_solver: LinearSolver) -> &'b mut Self {
        self.linear_solver = linear_solver;
        self
    }

    /// Warm start from previously computed potentials
    pub fn init_potentials<'b>(&'b mut self, init: Option<Potentials>) -> &'b mut Self {
        self.init = init;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iter
    }

    pub fn is_balanced(&self) -> bool {
        self.tau_a == 1. && self.tau_b == 1.
    }

    /// Ensures the configuration is usable and the weights are consistent with the
    /// geometry
    pub(crate) fn check(&self, geom: &Geometry, a: &Array1<f64>, b: &Array1<f64>) -> Result<(), OTError> {
        geom.check_weights(a, b)?;

        if !(self.threshold > 0.) {
            return Err(OTError::ArgError("Convergence threshold <= 0".to_string()));
        }

        if self.max_iter == 0 || self.inner_iterations == 0 {
            return Err(OTError::ArgError(
                "Iterations not a valid value. Must be > 0".to_string(),
            ));
        }

        for tau in [self.tau_a, self.tau_b] {
            if !(tau > 0. && tau <= 1.) {
                return Err(OTError::ArgError(format!(
                    "Marginal relaxation must lie in (0, 1], got {}",
                    tau
                )));
            }
        }

        if self.ridge_kernel < 0. || self.ridge_identity < 0. {
            return Err(OTError::ArgError("Ridge parameters must be >= 0".to_string()));
        }

        if a.iter().chain(b.iter()).any(|&w| w < 0. || !w.is_finite()) {
            return Err(OTError::ArgError(
                "Sample weights must be non-negative and finite".to_string(),
            ));
        }

        if let Some(init) = &self.init {
            if init.f.len() != a.len() || init.g.len() != b.len() {
                return Err(OTError::InvalidShape {
                    dim_a: init.f.len(),
                    dim_b: init.g.len(),
                    dim_m_0: a.len(),
                    dim_m_1: b.len(),
                });
            }
        }

        Ok(())
    }

    pub fn solve(&self, geom: &Geometry, a: &Array1<f64>, b: &Array1<f64>) -> Result<SinkhornOutput, OTError> {
        self.check(geom, a, b)?;
        Ok(self.iterate(geom, a, b, None))
    }

    /// Runs the fixed point iterations. When a tape is given, the pair (f^{k-1}, g^k)
    /// consumed and produced by every iteration k is recorded on it.
    pub(crate) fn iterate(
        &self,
        geom: &Geometry,
        a: &Array1<f64>,
        b: &Array1<f64>,
        mut tape: Option<&mut Vec<Potentials>>,
    ) -> SinkhornOutput {
        let reg = geom.epsilon();
        let (dim_a, dim_b) = geom.shape();
        let log_a = a.mapv(f64::ln);
        let log_b = b.mapv(f64::ln);

        let (mut f, mut g) = match &self.init {
            Some(init) => (init.f.clone(), init.g.clone()),
            None => (Array1::zeros(dim_a), Array1::zeros(dim_b)),
        };

        // scaling domain state, u = exp(f/reg) and v = exp(g/reg)
        let mut u = f.mapv(|x| (x / reg).exp());
        let mut v = g.mapv(|x| (x / reg).exp());

        let mut errors = Vec::new();
        let mut iterations = 0;

        for count in 0..self.max_iter {
            let f_prev = f.clone();

            if self.lse_mode {
                let g_prev = g.clone();

                // g = reg * log(b) - tau_b * reg * LSE_i((f_i - C_ij) / reg)
                let lse = geom.apply_lse_kernel(&f, Axis(0));
                g = &log_b * reg - &lse * self.tau_b;

                // f = reg * log(a) - tau_a * reg * LSE_j((g_j - C_ij) / reg)
                let lse = geom.apply_lse_kernel(&g, Axis(1));
                f = &log_a * reg - &lse * self.tau_a;

                if ndarray_logical::is_nan(&f) || ndarray_logical::is_nan(&g) {
                    log::warn!("sinkhorn produced NaN potentials at iteration {}, keeping previous iterate", count);
                    f = f_prev;
                    g = g_prev;
                    errors.push(self.marginal_error(geom, a, b, &f, &g, None));
                    break;
                }
            } else {
                let (u_prev, v_prev) = (u.clone(), v.clone());

                // v = b / (K^T u)^tau_b
                let ktu = geom.apply_kernel(&u, Axis(0));
                azip!((v in &mut v, &b in b, &ktu in &ktu) *v = b * ktu.powf(-self.tau_b));

                // u = a / (K v)^tau_a
                let kv = geom.apply_kernel(&v, Axis(1));
                azip!((u in &mut u, &a in a, &kv in &kv) *u = a * kv.powf(-self.tau_a));

                if ndarray_logical::any_zero(&ktu)
                    || ndarray_logical::any_zero(&kv)
                    || ndarray_logical::is_inf(&u)
                    || ndarray_logical::is_inf(&v)
                    || ndarray_logical::is_nan(&u)
                    || ndarray_logical::is_nan(&v)
                {
                    log::warn!(
                        "sinkhorn scalings degenerated at iteration {}, keeping previous iterate",
                        count
                    );
                    u = u_prev;
                    v = v_prev;
                    errors.push(self.marginal_error(geom, a, b, &f, &g, Some((&u, &v))));
                    break;
                }

                f = u.mapv(|x| reg * x.ln());
                g = v.mapv(|x| reg * x.ln());
            }

            if let Some(tape) = tape.as_mut() {
                tape.push(Potentials {
                    f: f_prev,
                    g: g.clone(),
                });
            }
            iterations = count + 1;

            if iterations % self.inner_iterations == 0 || iterations == self.max_iter {
                let err = if self.lse_mode {
                    self.marginal_error(geom, a, b, &f, &g, None)
                } else {
                    self.marginal_error(geom, a, b, &f, &g, Some((&u, &v)))
                };
                log::debug!("sinkhorn iteration {:>6} marginal error {:.3e}", iterations, err);
                errors.push(err);

                if err < self.threshold {
                    break;
                }
            }
        }

        if !self.lse_mode {
            f = u.mapv(|x| reg * x.ln());
            g = v.mapv(|x| reg * x.ln());
        }

        let converged = errors.last().map_or(false, |err| *err < self.threshold);
        if !converged {
            log::warn!(
                "sinkhorn did not reach threshold {:.1e} in {} iterations (last error {:?})",
                self.threshold,
                iterations,
                errors.last()
            );
        }

        let reg_ot_cost = ent_reg_cost(geom, a, b, &f, &g, self.tau_a, self.tau_b);
        log::info!(
            "sinkhorn {}x{} finished after {} iterations, cost {:.6}",
            dim_a,
            dim_b,
            iterations,
            reg_ot_cost
        );

        SinkhornOutput {
            f,
            g,
            reg_ot_cost,
            iterations,
            errors,
            converged,
            threshold: self.threshold,
        }
    }

    /// L1 violation of the first order conditions on both marginals. Balanced marginals
    /// are compared with the weights; relaxed ones with a * exp(-phi / rho).
    fn marginal_error(
        &self,
        geom: &Geometry,
        a: &Array1<f64>,
        b: &Array1<f64>,
        f: &Array1<f64>,
        g: &Array1<f64>,
        scalings: Option<(&Array1<f64>, &Array1<f64>)>,
    ) -> f64 {
        let reg = geom.epsilon();
        let (rows, cols) = match scalings {
            Some((u, v)) => (
                geom.marginals_from_scalings(u, v, Axis(1)),
                geom.marginals_from_scalings(u, v, Axis(0)),
            ),
            None => (
                geom.marginals_from_potentials(f, g, Axis(1)),
                geom.marginals_from_potentials(f, g, Axis(0)),
            ),
        };

        let target_a = marginal_target(a, f, reg, self.tau_a);
        let target_b = marginal_target(b, g, reg, self.tau_b);

        let err_a: f64 = (&rows - &target_a).mapv(f64::abs).sum();
        let err_b: f64 = (&cols - &target_b).mapv(f64::abs).sum();
        err_a + err_b
    }
}

/// Marginal relaxation strength rho = reg * tau / (1 - tau), None when balanced
pub(crate) fn rho(reg: f64, tau: f64) -> Option<f64> {
    if tau >= 1. {
        None
    } else {
        Some(reg * tau / (1. - tau))
    }
}

/// Potentials relative to the reference measure a x b, phi = f - reg * log(a).
/// Entries outside the support of the weights are set to 0.
pub(crate) fn relative_potential(weights: &Array1<f64>, potential: &Array1<f64>, reg: f64) -> Array1<f64> {
    Zip::from(weights)
        .and(potential)
        .map_collect(|&w, &p| if w > 0. { p - reg * w.ln() } else { 0. })
}

/// exp(-phi / rho), identically 1 when balanced
pub(crate) fn relaxation(weights: &Array1<f64>, potential: &Array1<f64>, reg: f64, tau: f64) -> Array1<f64> {
    match rho(reg, tau) {
        None => Array1::ones(weights.len()),
        Some(rho) => relative_potential(weights, potential, reg).mapv(|phi| (-phi / rho).exp()),
    }
}

/// Marginal the coupling should reach at a fixed point
pub(crate) fn marginal_target(weights: &Array1<f64>, potential: &Array1<f64>, reg: f64, tau: f64) -> Array1<f64> {
    weights * &relaxation(weights, potential, reg, tau)
}

/// Regularized OT cost, evaluated from the dual potentials without forming the coupling
pub(crate) fn ent_reg_cost(
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    f: &Array1<f64>,
    g: &Array1<f64>,
    tau_a: f64,
    tau_b: f64,
) -> f64 {
    let reg = geom.epsilon();

    let marginal_term = |weights: &Array1<f64>, potential: &Array1<f64>, tau: f64| -> f64 {
        let phi = relative_potential(weights, potential, reg);
        match rho(reg, tau) {
            None => weights.dot(&phi),
            Some(rho) => -Zip::from(weights)
                .and(&phi)
                .fold(0., |acc, &w, &p| acc + w * rho * ((-p / rho).exp() - 1.)),
        }
    };

    let div_a = marginal_term(a, f, tau_a);
    let div_b = marginal_term(b, g, tau_b);
    let total_sum = geom.marginals_from_potentials(f, g, Axis(1)).sum();

    div_a + div_b + reg * (a.sum() * b.sum() - total_sum)
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;

    use super::{Potentials, Sinkhorn};
    use crate::geometry::Geometry;
    use crate::utils::distributions::{uniform_point_cloud, uniform_weights};
    use crate::utils::metrics::MetricType;

    #[test]
    fn test_sinkhorn_knopp() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let m = array![[0.0, 1.0], [1.0, 0.0]];
        let geom = Geometry::from_cost_matrix(m, 1.0).unwrap();

        for lse_mode in [true, false] {
            let result = match Sinkhorn::new().threshold(1e-9).lse_mode(lse_mode).solve(&geom, &a, &b) {
                Ok(result) => result,
                Err(error) => panic!("{:?}", error),
            };

            let truth = array![[0.36552929, 0.13447071], [0.13447071, 0.36552929]];

            assert!(result.converged);
            assert!(result.matrix(&geom).relative_eq(&truth, 1E-6, 1E-2));
        }
    }

    #[test]
    fn test_cost_matches_primal_objective() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = uniform_point_cloud(8, 2, &mut rng);
        let y = uniform_point_cloud(6, 2, &mut rng);
        let a = uniform_weights(8, 0.1, &mut rng);
        let b = uniform_weights(6, 0.1, &mut rng);
        let geom = Geometry::from_point_clouds(x, y, MetricType::SqEuclidean, 0.1).unwrap();

        let out = Sinkhorn::new().threshold(1e-10).solve(&geom, &a, &b).unwrap();
        let plan = out.matrix(&geom);
        let cost = geom.cost_matrix();

        // <P, C> + eps KL(P | a x b)
        let mut primal = 0.;
        for i in 0..8 {
            for j in 0..6 {
                let p = plan[[i, j]];
                primal += p * cost[[i, j]] + 0.1 * (p * (p / (a[i] * b[j])).ln() - p + a[i] * b[j]);
            }
        }

        assert!((out.reg_ot_cost - primal).abs() < 1e-6);
        assert!(plan.sum_axis(Axis(1)).abs_diff_eq(&a, 1e-8));
        assert!(plan.sum_axis(Axis(0)).abs_diff_eq(&b, 1e-8));
    }

    #[test]
    fn test_unbalanced_cost_matches_primal_objective() {
        let mut rng = StdRng::seed_from_u64(8);
        let x = uniform_point_cloud(7, 2, &mut rng);
        let y = uniform_point_cloud(9, 2, &mut rng);
        let a = uniform_weights(7, 0.1, &mut rng);
        let b = uniform_weights(9, 0.1, &mut rng) * 1.7;
        let reg = 0.1;
        let (tau_a, tau_b) = (0.8, 0.7);
        let geom = Geometry::from_point_clouds(x, y, MetricType::SqEuclidean, reg).unwrap();

        let out = Sinkhorn::new()
            .threshold(1e-11)
            .iterations(20_000)
            .tau_a(tau_a)
            .tau_b(tau_b)
            .solve(&geom, &a, &b)
            .unwrap();
        assert!(out.converged);

        let plan = out.matrix(&geom);
        let cost = geom.cost_matrix();
        let kl = |p: f64, q: f64| p * (p / q).ln() - p + q;

        // <P, C> + eps KL(P | a x b) + rho_a KL(P 1 | a) + rho_b KL(P^T 1 | b)
        let mut primal = 0.;
        for i in 0..7 {
            for j in 0..9 {
                let p = plan[[i, j]];
                primal += p * cost[[i, j]] + reg * kl(p, a[i] * b[j]);
            }
        }
        let rho_a = reg * tau_a / (1. - tau_a);
        let rho_b = reg * tau_b / (1. - tau_b);
        let rows = plan.sum_axis(Axis(1));
        let cols = plan.sum_axis(Axis(0));
        primal += rho_a * (0..7).map(|i| kl(rows[i], a[i])).sum::<f64>();
        primal += rho_b * (0..9).map(|j| kl(cols[j], b[j])).sum::<f64>();

        assert!((out.reg_ot_cost - primal).abs() < 1e-6, "{} vs {}", out.reg_ot_cost, primal);
    }

    #[test]
    fn test_log_and_scaling_modes_agree() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = uniform_point_cloud(10, 3, &mut rng);
        let y = uniform_point_cloud(12, 3, &mut rng);
        let a = uniform_weights(10, 0.1, &mut rng);
        let b = uniform_weights(12, 0.1, &mut rng);
        let geom = Geometry::from_point_clouds(x, y, MetricType::SqEuclidean, 0.2).unwrap();

        for (tau_a, tau_b) in [(1.0, 1.0), (0.9, 0.8)] {
            let log = Sinkhorn::new()
                .threshold(1e-9)
                .tau_a(tau_a)
                .tau_b(tau_b)
                .solve(&geom, &a, &b)
                .unwrap();
            let scaling = Sinkhorn::new()
                .threshold(1e-9)
                .tau_a(tau_a)
                .tau_b(tau_b)
                .lse_mode(false)
                .solve(&geom, &a, &b)
                .unwrap();

            assert!((log.reg_ot_cost - scaling.reg_ot_cost).abs() < 1e-8);
            assert!(log.matrix(&geom).abs_diff_eq(&scaling.matrix(&geom), 1e-8));
        }
    }

    #[test]
    fn test_unbalanced_relaxes_marginals() {
        let a = array![0.5, 0.5];
        let b = array![1.0, 1.0];
        let m = array![[0.0, 1.0], [1.0, 0.0]];
        let geom = Geometry::from_cost_matrix(m, 0.5).unwrap();

        let out = Sinkhorn::new()
            .threshold(1e-10)
            .tau_a(0.5)
            .tau_b(0.5)
            .solve(&geom, &a, &b)
            .unwrap();
        assert!(out.converged);

        let mass = out.matrix(&geom).sum();
        assert!(mass > 1.0 && mass < 2.0);
    }

    #[test]
    fn test_non_convergence_is_reported() {
        let mut rng = StdRng::seed_from_u64(11);
        let x = uniform_point_cloud(20, 2, &mut rng);
        let y = uniform_point_cloud(20, 2, &mut rng);
        let a = uniform_weights(20, 0.0, &mut rng);
        let b = uniform_weights(20, 0.0, &mut rng);
        let geom = Geometry::from_point_clouds(x, y, MetricType::SqEuclidean, 1e-3).unwrap();

        let out = Sinkhorn::new()
            .threshold(1e-12)
            .iterations(5)
            .inner_iterations(1)
            .solve(&geom, &a, &b)
            .unwrap();

        assert!(!out.converged);
        assert_eq!(out.iterations, 5);
        assert_eq!(out.errors.len(), 5);
        assert!(out.errors.iter().all(|e| e.is_finite()));
        assert!(*out.errors.last().unwrap() >= 1e-12);
        assert!(out.reg_ot_cost.is_finite());
    }

    #[test]
    fn test_degenerate_kernel_keeps_error_trace() {
        let a = array![0.5, 0.5];
        let geom = Geometry::from_cost_matrix(Array2::from_elem((2, 2), 1000.), 1.0).unwrap();

        let out = Sinkhorn::new().lse_mode(false).solve(&geom, &a, &a).unwrap();

        assert!(!out.converged);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].is_finite());
        assert!(out.errors[0] > out.threshold);
    }

    #[test]
    fn test_error_trace_checked_every_inner_iterations() {
        let a = array![0.2, 0.8];
        let b = array![0.6, 0.4];
        let geom = Geometry::from_cost_matrix(array![[0.0, 1.0], [1.0, 0.0]], 0.05).unwrap();

        let out = Sinkhorn::new()
            .threshold(1e-300)
            .iterations(25)
            .inner_iterations(10)
            .solve(&geom, &a, &b)
            .unwrap();

        // checks at 10, 20 and the final iteration
        assert_eq!(out.iterations, 25);
        assert_eq!(out.errors.len(), 3);
    }

    #[test]
    fn test_warm_start_converges_immediately() {
        let a = array![0.3, 0.7];
        let b = array![0.5, 0.5];
        let geom = Geometry::from_cost_matrix(array![[0.0, 2.0], [1.0, 0.5]], 0.5).unwrap();

        let cold = Sinkhorn::new().threshold(1e-10).solve(&geom, &a, &b).unwrap();
        let warm = Sinkhorn::new()
            .threshold(1e-10)
            .inner_iterations(1)
            .init_potentials(Some(cold.potentials()))
            .solve(&geom, &a, &b)
            .unwrap();

        assert_eq!(warm.iterations, 1);
        assert!((warm.reg_ot_cost - cold.reg_ot_cost).abs() < 1e-9);
    }

    #[test]
    fn test_check_shape() {
        let geom = Geometry::from_cost_matrix(Array2::zeros((2, 3)), 1.0).unwrap();
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        assert!(matches!(
            Sinkhorn::new().solve(&geom, &a, &b),
            Err(crate::OTError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_check_arguments() {
        let geom = Geometry::from_cost_matrix(Array2::zeros((2, 2)), 1.0).unwrap();
        let a = array![0.5, 0.5];

        assert!(Sinkhorn::new().threshold(0.).solve(&geom, &a, &a).is_err());
        assert!(Sinkhorn::new().iterations(0).solve(&geom, &a, &a).is_err());
        assert!(Sinkhorn::new().tau_a(0.).solve(&geom, &a, &a).is_err());
        assert!(Sinkhorn::new().tau_b(1.5).solve(&geom, &a, &a).is_err());
        assert!(Sinkhorn::new().solve(&geom, &a, &array![1.5, -0.5]).is_err());

        let bad_init = Some(Potentials {
            f: Array1::zeros(3),
            g: Array1::zeros(2),
        });
        assert!(Sinkhorn::new().init_potentials(bad_init).solve(&geom, &a, &a).is_err());
    }
}
