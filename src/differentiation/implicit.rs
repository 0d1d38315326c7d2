use ndarray::prelude::*;
use rayon::prelude::*;

use super::{assemble_hessian_a, assemble_hessian_x, cost_gradients, weight_directions, Dual, Gradients};
use crate::geometry::Geometry;
use crate::regularized::sinkhorn::{Sinkhorn, SinkhornOutput};
use crate::OTError;

/// Danskin partials corrected by the first order response of the potentials.
///
/// With residual H = dJ/d(f, g) and lambda = M^-1 H, the total derivative in a
/// parameter theta is dJ/dtheta + eps * lambda^T dH/dtheta.
pub(crate) fn gradients(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
) -> Result<Gradients, OTError> {
    let dual = Dual::new(solver, geom, a, b, output);
    let reg = dual.reg;

    let (res_f, res_g) = dual.residual();
    let (lambda_f, lambda_g) = dual.solve(solver, &res_f, &res_g)?;

    let grad_a = dual.partial_a() + &(dual.sensitivity_a() * &lambda_f * reg);
    let grad_b = dual.partial_b() + &(dual.sensitivity_b() * &lambda_g * reg);

    // dJ/dC_ij = P_ij, dH/dC_ij = P_ij / eps on both f_i and g_j
    let (x, y) = dual.pullback(|i, j| dual.transport(i, j) * (1. + lambda_f[i] + lambda_g[j]));

    Ok(Gradients {
        a: grad_a,
        b: grad_b,
        x,
        y,
    })
}

/// Tangent of the potentials along each weight direction d_q:
/// (fdot, gdot) = eps * M^-1 (kappa_a * d_q, 0)
pub(crate) fn hessian_a(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
) -> Result<Array2<f64>, OTError> {
    let dual = Dual::new(solver, geom, a, b, output).materialize();
    let (n, m) = geom.shape();
    let reg = dual.reg;
    let kappa = dual.sensitivity_a();
    let directions = weight_directions(n, solver.is_balanced());
    let zeros = Array1::zeros(m);

    let tangents = (0..n)
        .into_par_iter()
        .map(|q| {
            let rhs_f = &kappa * &directions.column(q) * reg;
            dual.solve(solver, &rhs_f, &zeros).map(|(fdot, _)| fdot)
        })
        .collect::<Result<Vec<_>, OTError>>()?;

    Ok(assemble_hessian_a(&dual, &directions, &stack_columns(&tangents, n)))
}

/// Tangent of the potentials along each unit point direction e_(k, l), with
/// cost variation dC_kj = d/dx_kl c(x_k, y_j):
/// (fdot, gdot) = M^-1 (Σ_j P_ij dC_ij, Σ_i P_ij dC_ij)
pub(crate) fn hessian_x(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
) -> Result<Array2<f64>, OTError> {
    let grads = cost_gradients(geom)
        .ok_or_else(|| OTError::ArgError("Point Hessians need a point cloud geometry".to_string()))?;
    let (n, m, dim) = grads.dim();
    let dual = Dual::new(solver, geom, a, b, output).materialize();

    let tangents = (0..n * dim)
        .into_par_iter()
        .map(|q| {
            let (k, l) = (q / dim, q % dim);
            let rhs_g = Array1::from_shape_fn(m, |j| dual.transport(k, j) * grads[[k, j, l]]);
            let mut rhs_f = Array1::zeros(n);
            rhs_f[k] = rhs_g.sum();
            dual.solve(solver, &rhs_f, &rhs_g)
        })
        .collect::<Result<Vec<_>, OTError>>()?;

    let (fdots, gdots): (Vec<_>, Vec<_>) = tangents.into_iter().unzip();

    Ok(assemble_hessian_x(
        &dual,
        &grads,
        &stack_columns(&fdots, n),
        &stack_columns(&gdots, m),
    ))
}

fn stack_columns(columns: &[Array1<f64>], rows: usize) -> Array2<f64> {
    let mut out = Array2::zeros((rows, columns.len()));
    for (mut column, value) in out.axis_iter_mut(Axis(1)).zip(columns) {
        column.assign(value);
    }
    out
}
