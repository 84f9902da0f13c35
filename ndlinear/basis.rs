use ndarray::{Array, Array1, ArrayView1, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("Data range is invalid: start ({0}) must be strictly less than end ({1}).")]
    InvalidRange(f64, f64),

    #[error("Quantile strategy requires a non-empty training data set for quantile calculation.")]
    QuantileDataMissing,

    #[error("Cannot compute {num_quantiles} quantiles from only {num_points} data points.")]
    InsufficientDataForQuantiles {
        num_quantiles: usize,
        num_points: usize,
    },

    #[error("Knot vector is invalid: {0}")]
    InvalidKnots(String),

    #[error("Coordinate {x} lies outside the basis domain [{min}, {max}].")]
    OutOfDomain { x: f64, min: f64, max: f64 },

    #[error("Coordinate {0} is not finite.")]
    NonFinite(f64),

    #[error("Output buffer holds {found} values, but this basis produces {expected}.")]
    OutputLength { expected: usize, found: usize },
}

/// A univariate basis family: fills `out[i]` with the i-th basis function evaluated at `x`.
///
/// The same `params` instance is handed to every evaluator of a workspace on every call.
/// It is only ever borrowed immutably, so implementations are free to keep precomputed,
/// read-only state there (knot tables, normalization constants). An implementation that
/// mutates state behind `params` through interior mutability must synchronize that state
/// itself: workspace clones call evaluators concurrently.
pub trait BasisEvaluator<P: ?Sized = ()>: Send + Sync {
    fn evaluate(&self, x: f64, out: ArrayViewMut1<'_, f64>, params: &P) -> Result<(), BasisError>;

    /// The number of values this evaluator writes, when it is fixed by construction.
    /// Workspaces cross-check it against their basis-count table.
    fn num_basis(&self) -> Option<usize> {
        None
    }
}

fn check_output_len(expected: usize, out: &ArrayViewMut1<'_, f64>) -> Result<(), BasisError> {
    if out.len() != expected {
        return Err(BasisError::OutputLength {
            expected,
            found: out.len(),
        });
    }
    Ok(())
}

fn check_finite(x: f64) -> Result<(), BasisError> {
    if x.is_finite() {
        Ok(())
    } else {
        Err(BasisError::NonFinite(x))
    }
}

/// Monomials `1, x, x^2, ..., x^{count-1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polynomial {
    pub count: usize,
}

impl Polynomial {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl<P: ?Sized> BasisEvaluator<P> for Polynomial {
    fn evaluate(&self, x: f64, mut out: ArrayViewMut1<'_, f64>, _: &P) -> Result<(), BasisError> {
        check_output_len(self.count, &out)?;
        check_finite(x)?;
        let mut power = 1.0;
        for value in out.iter_mut() {
            *value = power;
            power *= x;
        }
        Ok(())
    }

    fn num_basis(&self) -> Option<usize> {
        Some(self.count)
    }
}

/// What a [`Legendre`] basis is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegendreArgument {
    /// `P_l(x)`.
    Direct,
    /// `P_l(cos x)`, the usual polar-angle dependence.
    Cosine,
}

/// Legendre polynomials `P_0 .. P_{count-1}` via the Bonnet recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Legendre {
    pub count: usize,
    pub argument: LegendreArgument,
}

impl Legendre {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            argument: LegendreArgument::Direct,
        }
    }

    pub fn of_cosine(count: usize) -> Self {
        Self {
            count,
            argument: LegendreArgument::Cosine,
        }
    }
}

impl<P: ?Sized> BasisEvaluator<P> for Legendre {
    fn evaluate(&self, x: f64, mut out: ArrayViewMut1<'_, f64>, _: &P) -> Result<(), BasisError> {
        check_output_len(self.count, &out)?;
        check_finite(x)?;
        let t = match self.argument {
            LegendreArgument::Direct => x,
            LegendreArgument::Cosine => x.cos(),
        };

        if self.count > 0 {
            out[0] = 1.0;
        }
        if self.count > 1 {
            out[1] = t;
        }
        // (l + 1) P_{l+1}(t) = (2l + 1) t P_l(t) - l P_{l-1}(t)
        for l in 1..self.count.saturating_sub(1) {
            let lf = l as f64;
            out[l + 1] = ((2.0 * lf + 1.0) * t * out[l] - lf * out[l - 1]) / (lf + 1.0);
        }
        Ok(())
    }

    fn num_basis(&self) -> Option<usize> {
        Some(self.count)
    }
}

/// Real Fourier basis `1, sin x, cos x, sin 2x, cos 2x, ...` laid out as
/// `out[i] = cos((i / 2) x)` for even `i` and `sin(((i + 1) / 2) x)` for odd `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fourier {
    pub count: usize,
}

impl Fourier {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl<P: ?Sized> BasisEvaluator<P> for Fourier {
    fn evaluate(&self, x: f64, mut out: ArrayViewMut1<'_, f64>, _: &P) -> Result<(), BasisError> {
        check_output_len(self.count, &out)?;
        check_finite(x)?;
        for (i, value) in out.iter_mut().enumerate() {
            *value = if i % 2 == 0 {
                ((i / 2) as f64 * x).cos()
            } else {
                (((i + 1) / 2) as f64 * x).sin()
            };
        }
        Ok(())
    }

    fn num_basis(&self) -> Option<usize> {
        Some(self.count)
    }
}

/// Defines the strategy for placing the internal knots of a spline.
/// This is part of the public API and will be saved in the model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnotStrategy {
    /// Place knots uniformly across the specified `data_range`.
    /// This is deterministic and suitable for prediction.
    Uniform,
    /// Place knots at the quantiles of the training data.
    /// This adapts to the data's distribution.
    Quantile,
}

/// Clamped B-spline basis over a fixed knot vector.
///
/// The number of basis functions is `knots.len() - degree - 1`, which for knots built by
/// [`BSpline::uniform`] or [`BSpline::quantile`] is `num_internal_knots + degree + 1`.
/// Coordinates outside `[knots[0], knots[last]]` are rejected with
/// [`BasisError::OutOfDomain`].
#[derive(Debug, Clone, PartialEq)]
pub struct BSpline {
    knots: Array1<f64>,
    degree: usize,
}

impl BSpline {
    /// Uniformly spaced internal knots over `data_range`.
    pub fn uniform(
        data_range: (f64, f64),
        num_internal_knots: usize,
        degree: usize,
    ) -> Result<Self, BasisError> {
        Self::validate(data_range, degree)?;
        let knots = internal::generate_full_knot_vector(data_range, num_internal_knots, degree, None)?;
        Ok(Self { knots, degree })
    }

    /// Internal knots at the quantiles of `training_data`.
    ///
    /// `data_range` must be the range of the original training data, even when the basis
    /// is rebuilt for prediction, so that the basis stays identical.
    pub fn quantile(
        data_range: (f64, f64),
        num_internal_knots: usize,
        degree: usize,
        training_data: ArrayView1<f64>,
    ) -> Result<Self, BasisError> {
        Self::validate(data_range, degree)?;
        let knots = internal::generate_full_knot_vector(
            data_range,
            num_internal_knots,
            degree,
            Some(training_data),
        )?;
        Ok(Self { knots, degree })
    }

    /// Uses a caller-supplied full knot vector.
    ///
    /// The vector must be clamped: its first `degree + 1` knots equal and its last
    /// `degree + 1` knots equal, so that the basis is a partition of unity over
    /// [`BSpline::domain`].
    pub fn with_knots(knots: Array1<f64>, degree: usize) -> Result<Self, BasisError> {
        if degree < 1 {
            return Err(BasisError::InvalidDegree(degree));
        }
        if knots.len() < 2 * (degree + 1) {
            return Err(BasisError::InvalidKnots(format!(
                "degree {degree} needs at least {} knots, got {}",
                2 * (degree + 1),
                knots.len()
            )));
        }
        if knots.iter().any(|k| !k.is_finite()) {
            return Err(BasisError::InvalidKnots("knots must be finite".to_string()));
        }
        if knots.windows(2).into_iter().any(|w| w[1] < w[0]) {
            return Err(BasisError::InvalidKnots(
                "knots must be non-decreasing".to_string(),
            ));
        }
        let (min, max) = (knots[0], knots[knots.len() - 1]);
        if min >= max {
            return Err(BasisError::InvalidRange(min, max));
        }
        let n = knots.len();
        let clamped = knots.iter().take(degree + 1).all(|&k| k == min)
            && knots.iter().skip(n - degree - 1).all(|&k| k == max);
        if !clamped {
            return Err(BasisError::InvalidKnots(format!(
                "the first and last {} knots must repeat the boundary values {min} and {max}",
                degree + 1
            )));
        }
        Ok(Self { knots, degree })
    }

    fn validate(data_range: (f64, f64), degree: usize) -> Result<(), BasisError> {
        if degree < 1 {
            return Err(BasisError::InvalidDegree(degree));
        }
        if !(data_range.0 < data_range.1) {
            return Err(BasisError::InvalidRange(data_range.0, data_range.1));
        }
        Ok(())
    }

    pub fn knots(&self) -> ArrayView1<'_, f64> {
        self.knots.view()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn count(&self) -> usize {
        self.knots.len() - self.degree - 1
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.knots[0], self.knots[self.knots.len() - 1])
    }
}

impl<P: ?Sized> BasisEvaluator<P> for BSpline {
    fn evaluate(&self, x: f64, mut out: ArrayViewMut1<'_, f64>, _: &P) -> Result<(), BasisError> {
        check_output_len(self.count(), &out)?;
        check_finite(x)?;
        let (min, max) = self.domain();
        if x < min || x > max {
            return Err(BasisError::OutOfDomain { x, min, max });
        }
        internal::evaluate_splines_at_point(x, self.degree, self.knots.view(), out.view_mut());
        Ok(())
    }

    fn num_basis(&self) -> Option<usize> {
        Some(self.count())
    }
}

/// Adapts a closure into a [`BasisEvaluator`].
pub struct FnBasis<F> {
    count: Option<usize>,
    f: F,
}

impl<F> FnBasis<F> {
    pub fn new<P>(f: F) -> Self
    where
        P: ?Sized,
        F: Fn(f64, ArrayViewMut1<'_, f64>, &P) -> Result<(), BasisError> + Send + Sync,
    {
        Self { count: None, f }
    }

    /// Declares the output length so workspaces can validate it at construction.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

impl<P, F> BasisEvaluator<P> for FnBasis<F>
where
    P: ?Sized,
    F: Fn(f64, ArrayViewMut1<'_, f64>, &P) -> Result<(), BasisError> + Send + Sync,
{
    fn evaluate(&self, x: f64, out: ArrayViewMut1<'_, f64>, params: &P) -> Result<(), BasisError> {
        if let Some(count) = self.count {
            check_output_len(count, &out)?;
        }
        (self.f)(x, out, params)
    }

    fn num_basis(&self) -> Option<usize> {
        self.count
    }
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    /// Generates the full knot vector, including repeated boundary knots.
    pub(super) fn generate_full_knot_vector(
        data_range: (f64, f64),
        num_internal_knots: usize,
        degree: usize,
        training_data_for_quantiles: Option<ArrayView1<f64>>,
    ) -> Result<Array1<f64>, BasisError> {
        let (min_val, max_val) = data_range;

        let internal_knots = if let Some(training_data) = training_data_for_quantiles {
            if training_data.is_empty() {
                return Err(BasisError::QuantileDataMissing);
            }
            if training_data.len() < num_internal_knots {
                return Err(BasisError::InsufficientDataForQuantiles {
                    num_quantiles: num_internal_knots,
                    num_points: training_data.len(),
                });
            }
            quantiles(training_data, num_internal_knots)
                .mapv(|k: f64| k.clamp(min_val, max_val))
        } else if num_internal_knots == 0 {
            Array1::from_vec(vec![])
        } else {
            let h = (max_val - min_val) / (num_internal_knots as f64 + 1.0);
            Array::from_iter((1..=num_internal_knots).map(|i| min_val + i as f64 * h))
        };

        // B-splines require `degree + 1` repeated knots at each boundary.
        let min_knots = Array1::from_elem(degree + 1, min_val);
        let max_knots = Array1::from_elem(degree + 1, max_val);

        ndarray::concatenate(
            Axis(0),
            &[min_knots.view(), internal_knots.view(), max_knots.view()],
        )
        .map_err(|e| BasisError::InvalidKnots(e.to_string()))
    }

    /// Calculates quantiles from a data vector using linear interpolation (Type 7 in R).
    fn quantiles(data: ArrayView1<f64>, num_quantiles: usize) -> Array1<f64> {
        if num_quantiles == 0 {
            return Array1::from_vec(vec![]);
        }

        let mut sorted_data = data.to_vec();
        sorted_data.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted_data.len();
        (1..=num_quantiles)
            .map(|k| {
                let p = k as f64 / (num_quantiles as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;

                if lower_idx == upper_idx {
                    sorted_data[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted_data[lower_idx] * (1.0 - fraction) + sorted_data[upper_idx] * fraction
                }
            })
            .collect()
    }

    /// Evaluates all B-spline basis functions at a single point `x` into `out`.
    ///
    /// Only the `degree + 1` functions supported on the knot span containing `x` are
    /// non-zero; they are computed with the triangular Cox-de Boor scheme and scattered
    /// into place. `x` must already lie inside the knot range.
    pub(super) fn evaluate_splines_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
        mut out: ArrayViewMut1<f64>,
    ) {
        let num_basis = knots.len() - degree - 1;

        // Span `mu` with knots[mu] <= x < knots[mu + 1]; the right boundary belongs to the
        // last non-empty span.
        let mut mu = knots
            .iter()
            .rposition(|&k| k <= x)
            .unwrap_or(degree)
            .clamp(degree, num_basis - 1);
        while mu > degree && knots[mu] >= knots[mu + 1] {
            mu -= 1;
        }

        let mut b = vec![0.0; degree + 1];
        let mut left = vec![0.0; degree + 1];
        let mut right = vec![0.0; degree + 1];
        b[0] = 1.0;

        for d in 1..=degree {
            left[d] = x - knots[mu + 1 - d];
            right[d] = knots[mu + d] - x;
            let mut saved = 0.0;
            for r in 0..d {
                let denom = right[r + 1] + left[d - r];
                let temp = if denom > 1e-12 { b[r] / denom } else { 0.0 };
                b[r] = saved + right[r + 1] * temp;
                saved = left[d - r] * temp;
            }
            b[d] = saved;
        }

        out.fill(0.0);
        let start_index = mu - degree;
        for (i, &value) in b.iter().enumerate() {
            out[start_index + i] = value;
        }
    }
}
