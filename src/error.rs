use thiserror::Error;

#[derive(Error, Debug)]
pub enum OTError {
    #[error(
        "Sample weight dimensions, source distribution \
            {dim_a:?} and target distribution {dim_b:?}, do \
            not match cost matrix dimensions, ({dim_m_0:?}, {dim_m_1:?})"
    )]
    InvalidShape {
        dim_a: usize,
        dim_b: usize,
        dim_m_0: usize,
        dim_m_1: usize,
    },

    #[error("Point clouds live in different spaces, x has {dim_x:?} features and y has {dim_y:?}")]
    PointDimensionError { dim_x: usize, dim_y: usize },

    #[error("Invalid argument: '{0}'")]
    ArgError(String),

    #[error("Derivative not supported: '{0}'")]
    UnsupportedDerivative(String),

    #[error("Linear solve failed: '{0}'")]
    LinearSolveError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
