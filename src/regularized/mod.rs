pub mod divergence;
pub mod sinkhorn;
