//! rust-sinkhorn prelude
//!
//! This module contains the most used types, traits, and functions
//!
//! ```
//! use rust_sinkhorn::prelude::*;
//!
//! ```

pub use crate::error::OTError;

pub use crate::geometry::{CostMatrix, Geometry, PointCloud};

pub use crate::regularized::{
    divergence::{divergence_value_and_grad, sinkhorn_divergence, sinkhorn_divergence_wrapper, DivergenceOutput},
    sinkhorn::{Potentials, Sinkhorn, SinkhornOutput},
};

pub use crate::differentiation::{
    linear::{ConjugateGradient, LinearOperator, LinearSolve, LinearSolver},
    Differentiation, Gradients,
};

pub use crate::transport::Transport;

pub use crate::utils::metrics::{dist, MetricType};
