pub mod distributions {

    use ndarray::prelude::*;
    use ndarray_rand::rand::Rng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    use crate::error::OTError;

    /// Returns a 1D histogram for a gaussian distribution
    /// n: number of bins in histogram
    /// mean: mean value of distribution
    /// std: standard deviation of distribution
    #[allow(non_snake_case)]
    pub fn get_1D_gauss_histogram(n: usize, mean: f64, std: f64) -> Result<Array1<f64>, OTError> {
        if n == 0 {
            return Err(OTError::ArgError("histogram needs at least one bin".to_string()));
        }

        if std <= 0. {
            return Err(OTError::ArgError("standard deviation <= 0".to_string()));
        }

        let x = Array1::<f64>::range(0.0, n as f64, 1.0);
        let denom = 2.0 * std.powi(2);
        let mut result = x.mapv(|val| (-(val - mean).powi(2) / denom).exp());
        let summed_val = result.sum();

        result /= summed_val;

        Ok(result)
    }

    /// Returns n points drawn uniformly from the unit cube [0, 1)^dim
    pub fn uniform_point_cloud<R: Rng + ?Sized>(n: usize, dim: usize, rng: &mut R) -> Array2<f64> {
        Array2::random_using((n, dim), Uniform::new(0., 1.), rng)
    }

    /// Returns n uniform random weights shifted by `offset` and normalized to sum to one
    pub fn uniform_weights<R: Rng + ?Sized>(n: usize, offset: f64, rng: &mut R) -> Array1<f64> {
        let mut weights = Array1::random_using(n, Uniform::new(0., 1.), rng) + offset;
        let total = weights.sum();
        weights /= total;
        weights
    }
}

pub mod metrics {

    use anyhow::anyhow;
    use ndarray::prelude::*;
    use ndarray_einsum_beta::*;

    use crate::error::OTError;

    /// Ground cost between two samples. Both metrics are translation invariant, so
    /// derivatives with respect to the second argument are the negated ones of the first.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MetricType {
        SqEuclidean,
        Euclidean,
    }

    impl MetricType {
        /// c(x, y) for a single pair of samples
        pub fn pair(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
            let sq: f64 = x.iter().zip(y.iter()).map(|(xi, yi)| (xi - yi).powi(2)).sum();
            match self {
                MetricType::SqEuclidean => sq,
                MetricType::Euclidean => sq.sqrt(),
            }
        }

        /// Gradient of c(x, y) with respect to x
        pub fn grad_x(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array1<f64> {
            let diff = &x - &y;
            match self {
                MetricType::SqEuclidean => diff * 2.,
                MetricType::Euclidean => {
                    let norm = diff.dot(&diff).sqrt();
                    // subgradient 0 at coinciding points
                    if norm > 0. {
                        diff / norm
                    } else {
                        Array1::zeros(x.len())
                    }
                }
            }
        }

        /// Hessian of c(x, y) with respect to x. The cross block d²c/dxdy is its negation
        /// and d²c/dy² equals it.
        pub fn hessian_xx(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Array2<f64> {
            let dim = x.len();
            match self {
                MetricType::SqEuclidean => Array2::eye(dim) * 2.,
                MetricType::Euclidean => {
                    let diff = &x - &y;
                    let norm = diff.dot(&diff).sqrt();
                    if norm > 0. {
                        let unit = &diff / norm;
                        let outer = unit
                            .view()
                            .insert_axis(Axis(1))
                            .dot(&unit.view().insert_axis(Axis(0)));
                        (Array2::eye(dim) - outer) / norm
                    } else {
                        Array2::zeros((dim, dim))
                    }
                }
            }
        }
    }

    /// Compute distance between samples in x1 and x2
    /// x1: matrix with n1 samples of size d
    /// x2: matrix with n2 samples of size d
    /// metric: choice of distance metric
    pub fn dist(x1: &Array2<f64>, x2: &Array2<f64>, metric: MetricType) -> Result<Array2<f64>, OTError> {
        if x1.ncols() != x2.ncols() {
            return Err(OTError::PointDimensionError {
                dim_x: x1.ncols(),
                dim_y: x2.ncols(),
            });
        }

        match metric {
            MetricType::SqEuclidean => euclidean_distances(x1, x2, true),
            MetricType::Euclidean => euclidean_distances(x1, x2, false),
        }
    }

    /// einsum('ij,ij->i', X, X)
    fn squared_norms(x: &Array2<f64>) -> Result<Array1<f64>, OTError> {
        let norms = einsum("ij,ij->i", &[x, x]).map_err(|err| OTError::Other(anyhow!(err)))?;
        norms
            .into_dimensionality::<Ix1>()
            .map_err(|err| OTError::Other(anyhow!(err)))
    }

    /// Considering the rows of X (and Y=X) as vectors, compute the distance matrix between each pair
    /// of vectors
    /// X: matrix of nsamples x nfeatures
    /// Y: matrix of nsamples x nfeatures
    /// squared: Return squared Euclidean distances
    fn euclidean_distances(x: &Array2<f64>, y: &Array2<f64>, squared: bool) -> Result<Array2<f64>, OTError> {
        let a2 = squared_norms(x)?;
        let b2 = squared_norms(y)?;

        // |x|^2 - 2 <x, y> + |y|^2, clipped at 0
        let mut c = x.dot(&y.t()) * -2f64;
        c += &a2.insert_axis(Axis(1));
        c += &b2.insert_axis(Axis(0));
        c.mapv_inplace(|val| val.max(0.));

        if !squared {
            c.mapv_inplace(f64::sqrt);
        }

        if x == y {
            c.diag_mut().fill(0.);
        }

        Ok(c)
    }

} // mod metrics
