use ndarray::prelude::*;
use rayon::prelude::*;

use super::{cost_gradients, curvature, weight_directions, Dual, Gradients};
use crate::geometry::Geometry;
use crate::regularized::sinkhorn::{Potentials, Sinkhorn, SinkhornOutput};
use crate::OTError;

// Every recorded iteration k maps (f^{k-1}, g^{k-1}) to
//   g^k_j = eps log b_j - tau_b eps LSE_i((f^{k-1}_i - C_ij) / eps)
//   f^k_i = eps log a_i - tau_a eps LSE_j((g^k_j - C_ij) / eps)
// whose Jacobians are the column softmax T of the first update and the row
// softmax S of the second.

/// Axis(0): column softmax of (h_i - C_ij) / eps over i.
/// Axis(1): row softmax of (h_j - C_ij) / eps over j.
fn softmax(geom: &Geometry, cost: &Array2<f64>, h: &Array1<f64>, axis: Axis) -> Array2<f64> {
    let reg = geom.epsilon();
    let lse = geom.apply_lse_kernel(h, axis);

    match axis {
        Axis(0) => Array2::from_shape_fn(cost.dim(), |(i, j)| ((h[i] - cost[[i, j]] - lse[j]) / reg).exp()),
        _ => Array2::from_shape_fn(cost.dim(), |(i, j)| ((h[j] - cost[[i, j]] - lse[i]) / reg).exp()),
    }
}

/// adjoint_i * eps / w_i accumulated on the support of the weights
fn accumulate_log_weight(acc: &mut Array1<f64>, adjoint: &Array1<f64>, weights: &Array1<f64>, reg: f64) {
    azip!((acc in acc, &adj in adjoint, &w in weights) if w > 0. { *acc += adj * reg / w });
}

/// Reverse pass through the recorded iterations, starting from the derivatives of
/// the cost in the final potentials
pub(crate) fn gradients(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
    tape: &[Potentials],
) -> Gradients {
    let dual = Dual::new(solver, geom, a, b, output);
    let reg = dual.reg;
    let cost = geom.cost_matrix();

    let (mut f_bar, mut g_bar) = dual.residual();
    let mut a_bar = dual.partial_a();
    let mut b_bar = dual.partial_b();
    let mut cost_bar = geom.transport_from_potentials(&output.f, &output.g);

    for step in tape.iter().rev() {
        let rows = softmax(geom, &cost, &step.g, Axis(1));
        g_bar -= &(rows.t().dot(&f_bar) * solver.tau_a);
        accumulate_log_weight(&mut a_bar, &f_bar, a, reg);
        cost_bar += &(&rows * &f_bar.view().insert_axis(Axis(1)) * solver.tau_a);

        let cols = softmax(geom, &cost, &step.f, Axis(0));
        accumulate_log_weight(&mut b_bar, &g_bar, b, reg);
        cost_bar += &(&cols * &g_bar.view().insert_axis(Axis(0)) * solver.tau_b);

        f_bar = cols.dot(&g_bar) * -solver.tau_b;
        g_bar.fill(0.);
    }

    log::debug!("unrolled {} sinkhorn iterations", tape.len());

    let (x, y) = dual.pullback(|i, j| cost_bar[[i, j]]);

    Gradients {
        a: a_bar,
        b: b_bar,
        x,
        y,
    }
}

/// Perturbation of the inputs along one direction: the weights a and the cost
struct Seed {
    a_dot: Array1<f64>,
    /// eps * a_dot / a, the direct term of every f update
    direct: Array1<f64>,
    cost_dot: Option<Array2<f64>>,
}

impl Seed {
    fn weights(a_dot: Array1<f64>, a: &Array1<f64>, reg: f64) -> Self {
        let direct = Array1::from_shape_fn(a.len(), |i| if a[i] > 0. { reg * a_dot[i] / a[i] } else { 0. });
        Self {
            a_dot,
            direct,
            cost_dot: None,
        }
    }

    fn cost(cost_dot: Array2<f64>) -> Self {
        let n = cost_dot.nrows();
        Self {
            a_dot: Array1::zeros(n),
            direct: Array1::zeros(n),
            cost_dot: Some(cost_dot),
        }
    }
}

/// Tangents of the reverse pass variables along one seed
struct Tangent {
    f_bar: Array1<f64>,
    g_bar: Array1<f64>,
    a_bar: Array1<f64>,
    cost_bar: Array2<f64>,
}

/// Axis(0): Σ_i T_ij (h_i - Cdot_ij), Axis(1): Σ_j S_ij (h_j - Cdot_ij)
fn softmax_apply(weights: &Array2<f64>, h: &Array1<f64>, cost_dot: Option<&Array2<f64>>, axis: Axis) -> Array1<f64> {
    let mut out = match axis {
        Axis(0) => weights.t().dot(h),
        _ => weights.dot(h),
    };
    if let Some(cost_dot) = cost_dot {
        out -= &(weights * cost_dot).sum_axis(axis);
    }
    out
}

/// Tangent of a softmax matrix normalized along `axis`, given the tangent of its
/// logits scaled by eps
fn softmax_dot(weights: &Array2<f64>, logits_dot: &Array2<f64>, axis: Axis, reg: f64) -> Array2<f64> {
    let mean = (weights * logits_dot).sum_axis(axis);
    let centered = match axis {
        Axis(0) => logits_dot - &mean.insert_axis(Axis(0)),
        _ => logits_dot - &mean.insert_axis(Axis(1)),
    };
    weights * &centered / reg
}

/// Logit tangents h_i - Cdot_ij (Axis(0)) or h_j - Cdot_ij (Axis(1))
fn logits_dot(h: &Array1<f64>, cost_dot: Option<&Array2<f64>>, shape: (usize, usize), axis: Axis) -> Array2<f64> {
    let mut out = match axis {
        Axis(0) => Array2::from_shape_fn(shape, |(i, _)| h[i]),
        _ => Array2::from_shape_fn(shape, |(_, j)| h[j]),
    };
    if let Some(cost_dot) = cost_dot {
        out -= cost_dot;
    }
    out
}

/// Forward-over-reverse pass: differentiates the reverse pass of [`gradients`] along
/// every seed. Returns the tangents and the adjoint of the cost.
fn second_order(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
    tape: &[Potentials],
    seeds: &[Seed],
) -> (Vec<Tangent>, Array2<f64>) {
    let reg = geom.epsilon();
    let (n, m) = geom.shape();
    let cost = geom.cost_matrix();
    let (tau_a, tau_b) = (solver.tau_a, solver.tau_b);

    // forward tangents (fdot^{k-1}, gdot^k) of every iteration
    let mut f_dots: Vec<Array1<f64>> = seeds.iter().map(|_| Array1::zeros(n)).collect();
    let mut history: Vec<Vec<(Array1<f64>, Array1<f64>)>> = Vec::with_capacity(tape.len());

    for step in tape {
        let cols = softmax(geom, &cost, &step.f, Axis(0));
        let rows = softmax(geom, &cost, &step.g, Axis(1));

        let records = seeds
            .par_iter()
            .zip(f_dots.par_iter_mut())
            .map(|(seed, f_dot)| {
                let g_dot = softmax_apply(&cols, f_dot, seed.cost_dot.as_ref(), Axis(0)) * -tau_b;
                let f_next = &seed.direct - &(softmax_apply(&rows, &g_dot, seed.cost_dot.as_ref(), Axis(1)) * tau_a);
                (std::mem::replace(f_dot, f_next), g_dot)
            })
            .collect();
        history.push(records);
    }

    let dual = Dual::new(solver, geom, a, b, output).materialize();
    let kappa = dual.sensitivity_a();
    let curv_a = curvature(a, &dual.relax_a, reg, tau_a) / reg;
    let curv_b = curvature(b, &dual.relax_b, reg, tau_b) / reg;
    let plan = geom.transport_from_potentials(&output.f, &output.g);

    let (mut f_bar, mut g_bar) = dual.residual();
    let mut cost_bar = plan.clone();

    // tangents of the initial adjoints dJ/df, dJ/dg, dJ/da and dJ/dC = P
    let mut tangents: Vec<Tangent> = seeds
        .par_iter()
        .enumerate()
        .map(|(q, seed)| {
            let f_dot = &f_dots[q];
            let g_dot = history
                .last()
                .map_or_else(|| Array1::zeros(m), |records| records[q].1.clone());

            let plan_dot = &plan * &logits_dot(f_dot, seed.cost_dot.as_ref(), (n, m), Axis(0)) / reg;
            let plan_dot = plan_dot + &(&plan * &g_dot.view().insert_axis(Axis(0)) / reg);

            let f_bar = &kappa * &seed.a_dot - &(&curv_a * f_dot) - plan_dot.sum_axis(Axis(1));
            let g_bar = -(&curv_b * &g_dot) - plan_dot.sum_axis(Axis(0));
            let a_bar = Array1::from_shape_fn(n, |i| {
                if a[i] > 0. {
                    kappa[i] * (f_dot[i] - seed.direct[i])
                } else {
                    0.
                }
            });

            Tangent {
                f_bar,
                g_bar,
                a_bar,
                cost_bar: plan_dot,
            }
        })
        .collect();

    for (step, records) in tape.iter().zip(&history).rev() {
        let rows = softmax(geom, &cost, &step.g, Axis(1));
        let cols = softmax(geom, &cost, &step.f, Axis(0));
        let g_bar_next = &g_bar - &(rows.t().dot(&f_bar) * tau_a);

        tangents
            .par_iter_mut()
            .zip(records.par_iter())
            .zip(seeds.par_iter())
            .for_each(|((t, (f_dot, g_dot)), seed)| {
                let cost_dot = seed.cost_dot.as_ref();
                let rows_dot = softmax_dot(&rows, &logits_dot(g_dot, cost_dot, (n, m), Axis(1)), Axis(1), reg);
                let cols_dot = softmax_dot(&cols, &logits_dot(f_dot, cost_dot, (n, m), Axis(0)), Axis(0), reg);

                // f update
                t.g_bar -= &((rows_dot.t().dot(&f_bar) + rows.t().dot(&t.f_bar)) * tau_a);
                azip!((acc in &mut t.a_bar, &fb in &t.f_bar, &f in &f_bar, &w in a, &w_dot in &seed.a_dot)
                    if w > 0. { *acc += reg * (fb - f * w_dot / w) / w });
                t.cost_bar += &((&rows_dot * &f_bar.view().insert_axis(Axis(1))
                    + &rows * &t.f_bar.view().insert_axis(Axis(1)))
                    * tau_a);

                // g update
                t.cost_bar += &((&cols_dot * &g_bar_next.view().insert_axis(Axis(0))
                    + &cols * &t.g_bar.view().insert_axis(Axis(0)))
                    * tau_b);
                t.f_bar = (cols_dot.dot(&g_bar_next) + cols.dot(&t.g_bar)) * -tau_b;
                t.g_bar.fill(0.);
            });

        cost_bar += &(&rows * &f_bar.view().insert_axis(Axis(1)) * tau_a);
        cost_bar += &(&cols * &g_bar_next.view().insert_axis(Axis(0)) * tau_b);
        f_bar = cols.dot(&g_bar_next) * -tau_b;
        g_bar = Array1::zeros(m);
    }

    (tangents, cost_bar)
}

/// Derivative of the unrolled weight gradient along every weight direction
pub(crate) fn hessian_a(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
    tape: &[Potentials],
) -> Array2<f64> {
    let n = a.len();
    let reg = geom.epsilon();

    let directions = weight_directions(n, solver.is_balanced());
    let seeds: Vec<Seed> = directions
        .axis_iter(Axis(1))
        .map(|direction| Seed::weights(direction.to_owned(), a, reg))
        .collect();

    let (tangents, _) = second_order(solver, geom, a, b, output, tape, &seeds);

    let mut out = Array2::zeros((n, n));
    for (mut column, tangent) in out.axis_iter_mut(Axis(1)).zip(&tangents) {
        column.assign(&tangent.a_bar);
    }
    out
}

/// Derivative of the unrolled point gradient along every unit direction e_(k, l)
pub(crate) fn hessian_x(
    solver: &Sinkhorn,
    geom: &Geometry,
    a: &Array1<f64>,
    b: &Array1<f64>,
    output: &SinkhornOutput,
    tape: &[Potentials],
) -> Result<Array2<f64>, OTError> {
    let pc = geom
        .point_cloud()
        .ok_or_else(|| OTError::ArgError("Point Hessians need a point cloud geometry".to_string()))?;
    let grads = cost_gradients(geom)
        .ok_or_else(|| OTError::ArgError("Point Hessians need a point cloud geometry".to_string()))?;
    let (n, m, dim) = grads.dim();

    let seeds: Vec<Seed> = (0..n * dim)
        .map(|q| {
            let (k, l) = (q / dim, q % dim);
            let mut cost_dot = Array2::zeros((n, m));
            for j in 0..m {
                cost_dot[[k, j]] = grads[[k, j, l]];
            }
            Seed::cost(cost_dot)
        })
        .collect();

    let (tangents, cost_bar) = second_order(solver, geom, a, b, output, tape, &seeds);

    // x̄_i = Σ_j cost_bar_ij ∇c(x_i, y_j), varied through cost_bar and through ∇c
    let mut out = Array2::<f64>::zeros((n * dim, n * dim));
    for (q, tangent) in tangents.iter().enumerate() {
        for i in 0..n {
            for l in 0..dim {
                out[[i * dim + l, q]] = (0..m).map(|j| tangent.cost_bar[[i, j]] * grads[[i, j, l]]).sum();
            }
        }
    }
    for k in 0..n {
        let mut local = Array2::<f64>::zeros((dim, dim));
        for j in 0..m {
            local.scaled_add(cost_bar[[k, j]], &pc.hessian_xx(k, j));
        }
        let mut block = out.slice_mut(s![k * dim..(k + 1) * dim, k * dim..(k + 1) * dim]);
        block += &local;
    }

    Ok(out)
}
