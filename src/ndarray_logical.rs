use ndarray::prelude::*;
use ndarray::Data;
use num_traits::Float;

/// Returns True if every array element is finite (neither infinite nor NaN)
/// Returns True for empty arrays
pub fn all_finite<S, D, A>(arr: &ArrayBase<S, D>) -> bool
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    arr.iter().all(|ele| ele.is_finite())
}

/// Tests element-wise for NaN elements in an array.
/// Returns True if there are NaN, False otherwise
pub fn is_nan<S, D, A>(arr: &ArrayBase<S, D>) -> bool
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    arr.iter().any(|ele| ele.is_nan())
}

/// Tests element-wise for inf elements in an array.
/// Returns True if there are inf, False otherwise
pub fn is_inf<S, D, A>(arr: &ArrayBase<S, D>) -> bool
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    arr.iter().any(|ele| ele.is_infinite())
}

/// Tests element-wise for exact zeros, the entries a scaling update would divide by
pub fn any_zero<S, D, A>(arr: &ArrayBase<S, D>) -> bool
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
{
    arr.iter().any(|ele| *ele == A::zero())
}

/// Numerically stable log(sum(exp(x))) over an iterator of values.
///
/// `-inf` entries contribute nothing; an empty or all `-inf` input returns `-inf`.
pub fn logsumexp<A, I>(values: I) -> A
where
    A: Float,
    I: Iterator<Item = A> + Clone,
{
    let max = values
        .clone()
        .fold(A::neg_infinity(), |acc, x| if x > acc { x } else { acc });

    if !max.is_finite() {
        return max;
    }

    let sum = values.fold(A::zero(), |acc, x| acc + (x - max).exp());
    max + sum.ln()
}

#[cfg(test)]
mod tests {

    use super::{all_finite, any_zero, is_inf, is_nan, logsumexp};
    use ndarray::array;

    #[test]
    fn test_is_nan() {
        let arr = array![1., 2., f64::NAN];

        assert!(is_nan(&arr));
        assert!(!is_nan(&array![1., f64::INFINITY]));
    }

    #[test]
    fn test_is_inf() {
        let arr = array![1f32, 2f32, f32::INFINITY];

        assert!(is_inf(&arr));
    }

    #[test]
    fn test_all_finite() {
        let arr = array![[1., 42.], [2., 11.]];
        assert!(all_finite(&arr));

        let arr = array![[f64::NEG_INFINITY, 42.], [2., 11.]];
        assert!(!all_finite(&arr));
    }

    #[test]
    fn test_any_zero() {
        assert!(any_zero(&array![1., 0., 3.]));
        assert!(!any_zero(&array![1., 1e-300, 3.]));
    }

    #[test]
    fn test_logsumexp() {
        let values = [1000.0f64, 1000.0];
        let result = logsumexp(values.iter().copied());
        assert!((result - (1000.0 + 2f64.ln())).abs() < 1e-12);

        let values = [f64::NEG_INFINITY, 0.0];
        assert!(logsumexp(values.iter().copied()).abs() < 1e-12);

        let empty: [f64; 0] = [];
        assert_eq!(logsumexp(empty.iter().copied()), f64::NEG_INFINITY);
    }
}
