//! Entropic optimal transport with the Sinkhorn algorithm.
//!
//! Solves regularized OT problems between weighted point clouds or cost matrices, in
//! log or scaling domain, balanced or unbalanced, and computes the debiased Sinkhorn
//! divergence. Costs can be differentiated with respect to the weights and the points
//! by unrolling the iterations, by implicit differentiation or with Danskin's theorem.

#[cfg(any(feature = "blas", feature = "openblas"))]
extern crate blas_src;

mod error;
pub mod differentiation;
pub mod geometry;
pub mod ndarray_logical;
pub mod regularized;
pub mod transport;
pub mod utils;
pub mod prelude;

pub use error::OTError;
