use ndarray::prelude::*;

use super::sinkhorn::{Potentials, Sinkhorn, SinkhornOutput};
use crate::differentiation::Gradients;
use crate::geometry::{Geometry, PointCloud};
use crate::utils::metrics::MetricType;
use crate::OTError;

/// Debiased Sinkhorn divergence between (a, x) and (b, y)
///
/// Slots are ordered (xy, xx, yy). A missing self term contributes a zero cost and
/// keeps `None` potentials and geometry with an empty error trace.
#[derive(Clone, Debug)]
pub struct DivergenceOutput {
    pub divergence: f64,
    pub potentials: [Option<Potentials>; 3],
    pub geoms: [Option<Geometry>; 3],
    pub errors: [Vec<f64>; 3],
    /// Every solve that ran reached the threshold
    pub converged: bool,
}

/// Sinkhorn divergence between two point clouds
///
/// x: (n, d) source samples, y: (m, d) target samples
/// a, b: sample weights
/// static_b: skip the yy self term, only partially debiasing the result
///
/// ```rust
/// use rust_sinkhorn::prelude::*;
/// use ndarray::prelude::*;
///
/// let x = array![[0.0, 0.0], [1.0, 0.0]];
/// let y = array![[0.0, 1.0], [1.0, 1.0], [0.5, 0.5]];
/// let a = Array1::from_elem(2, 0.5);
/// let b = Array1::from_elem(3, 1.0 / 3.0);
///
/// let out = sinkhorn_divergence(&x, &y, &a, &b, MetricType::SqEuclidean, 0.1, false, &Sinkhorn::new()).unwrap();
/// assert!(out.divergence > 0.);
/// ```
#[allow(clippy::too_many_arguments)]
pub fn sinkhorn_divergence(
    x: &Array2<f64>,
    y: &Array2<f64>,
    a: &Array1<f64>,
    b: &Array1<f64>,
    metric: MetricType,
    epsilon: f64,
    static_b: bool,
    solver: &Sinkhorn,
) -> Result<DivergenceOutput, OTError> {
    let geoms = PointCloud::prepare_divergences(x, y, metric, epsilon, static_b)?;
    sinkhorn_divergence_wrapper(geoms, a, b, solver)
}

/// Sinkhorn divergence over one to three prepared geometries, ordered (xy, xx, yy).
/// The three solves share the solver configuration and run concurrently.
pub fn sinkhorn_divergence_wrapper(
    geoms: Vec<Geometry>,
    a: &Array1<f64>,
    b: &Array1<f64>,
    solver: &Sinkhorn,
) -> Result<DivergenceOutput, OTError> {
    let geoms = pad(geoms)?;
    let outputs = run_terms(&geoms, a, b, |geom, lhs, rhs| solver.solve(geom, lhs, rhs))?;

    Ok(collect_output(geoms, outputs))
}

/// Divergence together with its gradient in a, b and, for point clouds, x and y.
/// Self terms see the same cloud on both sides, so both of their point gradients
/// are folded into the one of that cloud.
pub fn divergence_value_and_grad(
    geoms: Vec<Geometry>,
    a: &Array1<f64>,
    b: &Array1<f64>,
    solver: &Sinkhorn,
) -> Result<(DivergenceOutput, Gradients), OTError> {
    let geoms = pad(geoms)?;
    let results = run_terms(&geoms, a, b, |geom, lhs, rhs| solver.value_and_grad(geom, lhs, rhs))?;

    let [xy, xx, yy] = results;
    let (out_xy, grad_xy) = xy.ok_or_else(|| OTError::ArgError("Missing cross term".to_string()))?;
    let (out_xx, grad_xx) = xx.unzip();
    let (out_yy, grad_yy) = yy.unzip();

    let mut grads = grad_xy;
    if let Some(self_term) = grad_xx {
        grads.a = grads.a - (&self_term.a + &self_term.b) * 0.5;
        grads.x = fold_self_term(grads.x, self_term.x, self_term.y);
    }
    if let Some(self_term) = grad_yy {
        grads.b = grads.b - (&self_term.a + &self_term.b) * 0.5;
        grads.y = fold_self_term(grads.y, self_term.x, self_term.y);
    }

    let output = collect_output(geoms, [Some(out_xy), out_xx, out_yy]);
    Ok((output, grads))
}

/// cross - (lhs + rhs) / 2, when all are available
fn fold_self_term(
    cross: Option<Array2<f64>>,
    lhs: Option<Array2<f64>>,
    rhs: Option<Array2<f64>>,
) -> Option<Array2<f64>> {
    match (cross, lhs, rhs) {
        (Some(cross), Some(lhs), Some(rhs)) => Some(cross - (lhs + rhs) * 0.5),
        (cross, _, _) => cross,
    }
}

fn pad(geoms: Vec<Geometry>) -> Result<[Option<Geometry>; 3], OTError> {
    if geoms.is_empty() || geoms.len() > 3 {
        return Err(OTError::ArgError(format!(
            "Expected between 1 and 3 geometries, got {}",
            geoms.len()
        )));
    }

    let mut slots = geoms.into_iter();
    Ok([slots.next(), slots.next(), slots.next()])
}

/// Runs `op` on (xy, a, b), (xx, a, a) and (yy, b, b) concurrently
fn run_terms<T, F>(
    geoms: &[Option<Geometry>; 3],
    a: &Array1<f64>,
    b: &Array1<f64>,
    op: F,
) -> Result<[Option<T>; 3], OTError>
where
    T: Send,
    F: Fn(&Geometry, &Array1<f64>, &Array1<f64>) -> Result<T, OTError> + Sync,
{
    let term = |slot: &Option<Geometry>, lhs: &Array1<f64>, rhs: &Array1<f64>| -> Result<Option<T>, OTError> {
        slot.as_ref().map(|geom| op(geom, lhs, rhs)).transpose()
    };

    let (xy, (xx, yy)) = rayon::join(
        || term(&geoms[0], a, b),
        || rayon::join(|| term(&geoms[1], a, a), || term(&geoms[2], b, b)),
    );

    Ok([xy?, xx?, yy?])
}

fn collect_output(geoms: [Option<Geometry>; 3], outputs: [Option<SinkhornOutput>; 3]) -> DivergenceOutput {
    let cost = |out: &Option<SinkhornOutput>| out.as_ref().map_or(0., |out| out.reg_ot_cost);
    let divergence = cost(&outputs[0]) - 0.5 * (cost(&outputs[1]) + cost(&outputs[2]));
    let converged = outputs.iter().flatten().all(|out| out.converged);

    log::info!(
        "sinkhorn divergence {:.6} over {} terms",
        divergence,
        outputs.iter().flatten().count()
    );

    let [xy, xx, yy] = outputs;
    let split = |out: Option<SinkhornOutput>| match out {
        Some(out) => (Some(out.potentials()), out.errors),
        None => (None, Vec::new()),
    };
    let (pot_xy, err_xy) = split(xy);
    let (pot_xx, err_xx) = split(xx);
    let (pot_yy, err_yy) = split(yy);

    DivergenceOutput {
        divergence,
        potentials: [pot_xy, pot_xx, pot_yy],
        geoms,
        errors: [err_xy, err_xx, err_yy],
        converged,
    }
}

#[cfg(test)]
mod tests {

    use ndarray::prelude::*;

    use super::{divergence_value_and_grad, sinkhorn_divergence, sinkhorn_divergence_wrapper};
    use crate::geometry::Geometry;
    use crate::regularized::sinkhorn::Sinkhorn;
    use crate::utils::metrics::MetricType;

    #[test]
    fn test_single_geometry_is_plain_cost() {
        let a = array![0.5, 0.5];
        let b = array![0.5, 0.5];
        let geom = Geometry::from_cost_matrix(array![[0.0, 1.0], [1.0, 0.0]], 1.0).unwrap();

        let mut solver = Sinkhorn::new();
        solver.threshold(1e-9);

        let plain = solver.solve(&geom, &a, &b).unwrap();
        let out = sinkhorn_divergence_wrapper(vec![geom], &a, &b, &solver).unwrap();

        assert!((out.divergence - plain.reg_ot_cost).abs() < 1e-12);
        assert!(out.potentials[1].is_none() && out.potentials[2].is_none());
        assert!(out.geoms[1].is_none() && out.geoms[2].is_none());
        assert!(out.errors[1].is_empty() && out.errors[2].is_empty());
    }

    #[test]
    fn test_static_b_skips_self_term() {
        let x = array![[0.0, 0.0], [1.0, 0.0]];
        let y = array![[0.0, 1.0], [1.0, 1.0], [0.5, 0.5]];
        let a = Array1::from_elem(2, 0.5);
        let b = Array1::from_elem(3, 1.0 / 3.0);
        let solver = Sinkhorn::new();

        let full = sinkhorn_divergence(&x, &y, &a, &b, MetricType::SqEuclidean, 0.1, false, &solver).unwrap();
        let partial = sinkhorn_divergence(&x, &y, &a, &b, MetricType::SqEuclidean, 0.1, true, &solver).unwrap();

        assert!(full.potentials[2].is_some());
        assert!(partial.potentials[2].is_none());
        assert!(partial.geoms[2].is_none());
        assert!(partial.divergence > full.divergence);
    }

    #[test]
    fn test_rejects_too_many_geometries() {
        let geom = Geometry::from_cost_matrix(Array2::zeros((2, 2)), 1.0).unwrap();
        let a = array![0.5, 0.5];
        let geoms = vec![geom.clone(), geom.clone(), geom.clone(), geom];

        assert!(sinkhorn_divergence_wrapper(geoms, &a, &a, &Sinkhorn::new()).is_err());
        assert!(divergence_value_and_grad(vec![], &a, &a, &Sinkhorn::new()).is_err());
    }
}
