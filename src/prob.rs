///
/// probability calculation
/// implements logaddexp and normalization helpers
///
use approx::AbsDiffEq;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};

///
/// Wrapper of f64 that represents probability `0 <= p <= 1` in log space
///
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Prob(f64);

///
/// short-hand of `Prob::from_log_prob`
///
pub fn lp(lp: f64) -> Prob {
    Prob::from_log_prob(lp)
}

impl Prob {
    ///
    ///
    pub fn from_log_prob(log_value: f64) -> Prob {
        Prob(log_value)
    }
    ///
    /// Get the probability (in `[0, 1]`)
    pub fn to_value(self) -> f64 {
        self.0.exp()
    }
    ///
    /// Get the log probability
    pub fn to_log_value(self) -> f64 {
        self.0
    }
    ///
    /// Is `p == 0` or not? (log p = -inf)
    ///
    pub fn is_zero(self) -> bool {
        self.0.is_infinite() && self.0.is_sign_negative()
    }
    ///
    /// prob=0.0
    ///
    pub fn zero() -> Prob {
        Prob(f64::NEG_INFINITY)
    }
    ///
    /// prob=1.0
    ///
    pub fn one() -> Prob {
        Prob(0.0)
    }
}

impl num_traits::One for Prob {
    fn one() -> Self {
        Prob::one()
    }
}

impl num_traits::Zero for Prob {
    fn zero() -> Self {
        Prob::zero()
    }
    fn is_zero(&self) -> bool {
        Prob::is_zero(*self)
    }
}

/// Addition of two probabilities `px + py` in log space
///
/// If `px > py`:
///
/// ```text
/// log(exp(x) + exp(y))
///  = x + log(1 + exp(y-x))
/// ```
impl std::ops::Add for Prob {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        let (x, y) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        if y == f64::NEG_INFINITY {
            Prob(x)
        } else if x == y {
            Prob(x + std::f64::consts::LN_2)
        } else {
            Prob(x + (y - x).exp().ln_1p())
        }
    }
}

/// Multiplication of two probabilities `px * py` in log space
impl std::ops::Mul for Prob {
    type Output = Self;
    fn mul(self, other: Self) -> Self {
        Prob(self.0 + other.0)
    }
}

/// Division of two probabilities `px / py` in log space
impl std::ops::Div for Prob {
    type Output = Self;
    fn div(self, other: Self) -> Self {
        Prob(self.0 - other.0)
    }
}

impl std::iter::Sum for Prob {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Prob::zero(), |a, b| a + b)
    }
}
impl<'a> std::iter::Sum<&'a Self> for Prob {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Prob::zero(), |a, b| a + *b)
    }
}
/// for approx `assert_abs_diff_eq`
impl AbsDiffEq for Prob {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        f64::abs_diff_eq(&self.0, &other.0, epsilon)
    }
}

//
// array helpers
//

///
/// `log(sum(exp(xs)))` of log values, stable for `-inf` entries.
///
/// Unlike summing `Prob`s one by one, this shifts by the maximum once.
///
pub fn logsumexp<'a, I>(xs: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
    I::IntoIter: Clone,
{
    let iter = xs.into_iter();
    let max = iter.clone().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max.is_infinite() {
        return max;
    }
    let s: f64 = iter.map(|x| (x - max).exp()).sum();
    max + s.ln()
}

///
/// Normalize non-negative values in place to sum to one.
/// Rows whose sum is zero are left untouched.
///
pub fn normalize(mut x: ArrayViewMut1<f64>) {
    let s = x.sum();
    if s > 0.0 {
        x.mapv_inplace(|v| v / s);
    }
}

///
/// Normalize every row of `[n, k]` matrix.
///
pub fn normalize_rows(x: &mut Array2<f64>) {
    for row in x.axis_iter_mut(Axis(0)) {
        normalize(row);
    }
}

///
/// `ln(x)` elementwise, mapping `0` to `-inf` without warnings.
///
pub fn ln_array(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(f64::ln)
}

///
/// Check if `x` is a probability vector (non-negative, sums to 1).
///
pub fn is_stochastic(x: ArrayView1<f64>, tol: f64) -> bool {
    x.iter().all(|&v| v >= 0.0 && v.is_finite()) && (x.sum() - 1.0).abs() < tol
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn p(v: f64) -> Prob {
        lp(v.ln())
    }

    #[test]
    fn test_id() {
        let x = p(0.3);
        let e = p(0.0);
        assert_relative_eq!((x + e).0, x.0);
        assert_relative_eq!((x * e).0, e.0);
    }
    #[test]
    fn test_sum() {
        let xs = vec![p(0.1), p(0.1), p(0.1)];
        let x: Prob = xs.iter().sum();
        assert_relative_eq!(x.to_value(), 0.3);
        let empty: Vec<Prob> = vec![];
        assert!(empty.iter().sum::<Prob>().is_zero());
    }
    #[test]
    fn prob_add_mul_div() {
        assert_eq!(p(0.0) + p(1.0), p(1.0));
        assert_eq!(p(0.0) * p(1.0), p(0.0));
        assert_abs_diff_eq!(p(0.3) + p(0.3), p(0.6), epsilon = 1e-12);
        assert_abs_diff_eq!(p(0.3) * p(0.3), p(0.09), epsilon = 1e-12);
        assert_abs_diff_eq!(p(0.5) + p(0.00001), p(0.50001), epsilon = 1e-12);
        assert_abs_diff_eq!(p(0.09) / p(0.3), p(0.3), epsilon = 1e-12);
        assert_eq!(Prob::zero() + Prob::zero(), Prob::zero());
        assert_eq!(<Prob as num_traits::One>::one(), Prob::one());
    }
    #[test]
    fn logsumexp_matches_prob_sum() {
        let xs = [0.1f64.ln(), 0.2f64.ln(), 0.3f64.ln()];
        let s: Prob = xs.iter().map(|&x| lp(x)).sum();
        assert_abs_diff_eq!(logsumexp(xs.iter()), s.to_log_value(), epsilon = 1e-12);
        assert_abs_diff_eq!(logsumexp(xs.iter()), 0.6f64.ln(), epsilon = 1e-12);
    }
    #[test]
    fn logsumexp_of_zeros() {
        let xs = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        assert_eq!(logsumexp(xs.iter()), f64::NEG_INFINITY);
        let xs = [f64::NEG_INFINITY, 0.0];
        assert_eq!(logsumexp(xs.iter()), 0.0);
    }
    #[test]
    fn normalization() {
        let mut m = array![[1.0, 1.0], [0.0, 0.0], [3.0, 1.0]];
        normalize_rows(&mut m);
        assert_eq!(m.row(0).to_vec(), vec![0.5, 0.5]);
        assert_eq!(m.row(1).to_vec(), vec![0.0, 0.0]);
        assert!(is_stochastic(m.row(2), 1e-12));
    }
}
