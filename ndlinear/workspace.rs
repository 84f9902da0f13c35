//! # Tensor-Product Workspace
//!
//! The workspace owns everything needed to turn one data point into one design-matrix
//! row of a separable tensor-product model:
//!
//! - the per-dimension basis-count table `N[0..n_dim)` and the derived coefficient count
//!   `n_coeffs = prod N[k]`, held as a [`MixedRadix`] system;
//! - one evaluator per dimension plus a shared, read-only parameter context;
//! - two scratch buffers allocated once at construction: a cache of `sum N[k]` basis
//!   values, partitioned into one contiguous range per dimension, and a row buffer of
//!   `n_coeffs` values used by prediction.
//!
//! Row construction calls every evaluator exactly once per point and then expands the
//! cached values over all `n_coeffs` flat indices. Scratch buffers make a workspace
//! single-context by nature; every row-producing method takes `&mut self`. Concurrent
//! callers clone the workspace, which allocates fresh scratch buffers while sharing the
//! evaluators and parameters.

use crate::basis::{BasisError, BasisEvaluator};
use crate::radix::{MixedRadix, RadixError};
use ndarray::{Array1, ArrayView1, ArrayViewMut1, s};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// A basis evaluator shared between a workspace and its clones.
pub type SharedEvaluator<P = ()> = Arc<dyn BasisEvaluator<P>>;

/// Error type for workspace construction, row construction, design matrices and prediction.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("Invalid workspace configuration: {0}")]
    InvalidArgument(String),

    #[error("Failed to allocate the {what}: {reason}")]
    AllocationError { what: &'static str, reason: String },

    #[error("The {what} has size {found}, but the workspace requires {expected}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Basis evaluator for dimension {dimension} failed at coordinate {coordinate}: {source}")]
    EvaluatorFailure {
        dimension: usize,
        coordinate: f64,
        #[source]
        source: BasisError,
    },
}

impl DesignError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, found: usize) -> Self {
        DesignError::DimensionMismatch {
            what,
            expected,
            found,
        }
    }
}

/// Reusable state for building design-matrix rows of a tensor-product model.
pub struct Workspace<P: ?Sized = ()> {
    radix: MixedRadix,
    evaluators: Vec<Arc<dyn BasisEvaluator<P>>>,
    params: Arc<P>,
    /// Cached basis values for the current point; `basis_cache[cache_ranges[k]]` holds
    /// the `N[k]` values of dimension `k`.
    basis_cache: Array1<f64>,
    cache_ranges: Vec<Range<usize>>,
    row: Array1<f64>,
}

impl<P: ?Sized> Workspace<P> {
    /// Creates a workspace for `basis_counts.len()` dimensions.
    ///
    /// `evaluators[k]` must produce `basis_counts[k]` values. Fails with
    /// [`DesignError::InvalidArgument`] for an empty table, a zero basis count, a wrong
    /// number of evaluators, or an evaluator whose declared count disagrees with the table,
    /// and with [`DesignError::AllocationError`] if the scratch buffers cannot be obtained.
    pub fn new(
        basis_counts: &[usize],
        evaluators: Vec<Arc<dyn BasisEvaluator<P>>>,
        params: impl Into<Arc<P>>,
    ) -> Result<Self, DesignError> {
        let radix = MixedRadix::new(basis_counts).map_err(|e| match e {
            RadixError::Overflow => DesignError::AllocationError {
                what: "coefficient row",
                reason: e.to_string(),
            },
            other => DesignError::InvalidArgument(other.to_string()),
        })?;

        if evaluators.len() != basis_counts.len() {
            return Err(DesignError::InvalidArgument(format!(
                "{} basis counts were given but {} evaluators",
                basis_counts.len(),
                evaluators.len()
            )));
        }
        for (dimension, (evaluator, &count)) in evaluators.iter().zip(basis_counts).enumerate() {
            if let Some(declared) = evaluator.num_basis() {
                if declared != count {
                    return Err(DesignError::InvalidArgument(format!(
                        "evaluator for dimension {dimension} produces {declared} values, but the basis count is {count}"
                    )));
                }
            }
        }

        let cache_len = basis_counts
            .iter()
            .try_fold(0usize, |acc, &n| acc.checked_add(n))
            .ok_or_else(|| DesignError::AllocationError {
                what: "basis cache",
                reason: "total basis count overflows the index type".to_string(),
            })?;

        let mut cache_ranges = Vec::with_capacity(basis_counts.len());
        let mut offset = 0;
        for &count in basis_counts {
            cache_ranges.push(offset..offset + count);
            offset += count;
        }

        let basis_cache = try_zeros(cache_len, "basis cache")?;
        let row = try_zeros(radix.size(), "coefficient row")?;

        log::debug!(
            "Created tensor-product workspace: {} dimensions, basis counts {:?}, {} coefficients",
            basis_counts.len(),
            basis_counts,
            radix.size()
        );

        Ok(Self {
            radix,
            evaluators,
            params: params.into(),
            basis_cache,
            cache_ranges,
            row,
        })
    }

    /// Total number of model coefficients, `prod N[k]`.
    pub fn ncoeffs(&self) -> usize {
        self.radix.size()
    }

    /// Number of independent variables.
    pub fn ndim(&self) -> usize {
        self.radix.ndigits()
    }

    pub fn basis_counts(&self) -> &[usize] {
        self.radix.radices()
    }

    /// The flattening between coefficient positions and per-dimension basis indices.
    pub fn radix(&self) -> &MixedRadix {
        &self.radix
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    /// Writes the design-matrix row for `point` into `out`.
    ///
    /// `out[j]` is the product over dimensions `k` of basis function `r_k` of dimension
    /// `k` at `point[k]`, where `(r_0, ..., r_{n-1})` is the multi-index of `j`. If an
    /// evaluator fails, `out` is left untouched.
    pub fn construct_row(
        &mut self,
        point: ArrayView1<f64>,
        out: ArrayViewMut1<f64>,
    ) -> Result<(), DesignError> {
        if out.len() != self.ncoeffs() {
            return Err(DesignError::mismatch("output row", self.ncoeffs(), out.len()));
        }
        self.evaluate_bases(point)?;
        expand_tensor_row(&self.radix, self.basis_cache.view(), &self.cache_ranges, out);
        Ok(())
    }

    /// Builds the row for `point` in the workspace's own row buffer.
    pub(crate) fn row_for(&mut self, point: ArrayView1<f64>) -> Result<ArrayView1<'_, f64>, DesignError> {
        self.evaluate_bases(point)?;
        let Self {
            radix,
            basis_cache,
            cache_ranges,
            row,
            ..
        } = &mut *self;
        expand_tensor_row(radix, basis_cache.view(), cache_ranges, row.view_mut());
        Ok(self.row.view())
    }

    /// Fills the basis cache: exactly one evaluator call per dimension.
    fn evaluate_bases(&mut self, point: ArrayView1<f64>) -> Result<(), DesignError> {
        if point.len() != self.ndim() {
            return Err(DesignError::mismatch("data point", self.ndim(), point.len()));
        }

        for (dimension, (evaluator, range)) in
            self.evaluators.iter().zip(&self.cache_ranges).enumerate()
        {
            let coordinate = point[dimension];
            evaluator
                .evaluate(
                    coordinate,
                    self.basis_cache.slice_mut(s![range.clone()]),
                    &self.params,
                )
                .map_err(|source| DesignError::EvaluatorFailure {
                    dimension,
                    coordinate,
                    source,
                })?;
        }
        Ok(())
    }
}

/// Expands cached per-dimension basis values into one tensor-product row.
///
/// For each flat index `j` the digits are peeled off from the last dimension to the
/// first: `r_k = (j / denom) mod N_k`, then `denom *= N_k`. This is the digit order of
/// [`MixedRadix::decode`]; debug builds assert that the two agree.
fn expand_tensor_row(
    radix: &MixedRadix,
    basis_cache: ArrayView1<f64>,
    cache_ranges: &[Range<usize>],
    mut out: ArrayViewMut1<f64>,
) {
    let radices = radix.radices();
    for (j, element) in out.iter_mut().enumerate() {
        let mut denom = 1;
        let mut product = 1.0;
        for (k, (&n_k, range)) in radices.iter().zip(cache_ranges).enumerate().rev() {
            let r_k = (j / denom) % n_k;
            debug_assert_eq!(radix.decode_to_vec(j).ok().map(|digits| digits[k]), Some(r_k));
            denom *= n_k;
            product *= basis_cache[range.start + r_k];
        }
        *element = product;
    }
}

fn try_zeros(len: usize, what: &'static str) -> Result<Array1<f64>, DesignError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| DesignError::AllocationError {
            what,
            reason: e.to_string(),
        })?;
    buffer.resize(len, 0.0);
    Ok(Array1::from_vec(buffer))
}

impl<P: ?Sized> Clone for Workspace<P> {
    /// Shares evaluators and parameters; scratch buffers are fresh.
    fn clone(&self) -> Self {
        Self {
            radix: self.radix.clone(),
            evaluators: self.evaluators.clone(),
            params: Arc::clone(&self.params),
            basis_cache: Array1::zeros(self.basis_cache.len()),
            cache_ranges: self.cache_ranges.clone(),
            row: Array1::zeros(self.row.len()),
        }
    }
}

impl<P: ?Sized> fmt::Debug for Workspace<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("basis_counts", &self.basis_counts())
            .field("n_coeffs", &self.ncoeffs())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{FnBasis, Polynomial};
    use approx::assert_relative_eq;
    use ndarray::{Array1, array};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn powers(count: usize) -> SharedEvaluator {
        Arc::new(Polynomial::new(count))
    }

    #[test]
    fn ncoeffs_is_product_of_basis_counts() {
        for counts in [vec![3], vec![2, 3], vec![10, 10, 9], vec![1, 4, 1, 2]] {
            let evaluators = counts.iter().map(|&n| powers(n)).collect();
            let workspace = Workspace::new(&counts, evaluators, ()).unwrap();
            assert_eq!(workspace.ncoeffs(), counts.iter().product::<usize>());
            assert_eq!(workspace.ndim(), counts.len());
            assert_eq!(workspace.basis_counts(), counts.as_slice());
        }
    }

    #[test]
    fn separable_row_uses_last_dimension_fastest() {
        let mut workspace = Workspace::new(&[2, 3], vec![powers(2), powers(3)], ()).unwrap();
        assert_eq!(workspace.ncoeffs(), 6);

        let mut row = Array1::zeros(6);
        workspace
            .construct_row(array![2.0, 3.0].view(), row.view_mut())
            .unwrap();
        assert_eq!(row, array![1.0, 3.0, 9.0, 2.0, 6.0, 18.0]);
    }

    #[test]
    fn row_entries_follow_radix_decoding() {
        let counts = [3, 2, 4];
        let mut workspace =
            Workspace::new(&counts, vec![powers(3), powers(2), powers(4)], ()).unwrap();
        let point = [0.7, -1.3, 2.2];
        let mut row = Array1::zeros(24);
        workspace
            .construct_row(array![point[0], point[1], point[2]].view(), row.view_mut())
            .unwrap();

        for j in 0..workspace.ncoeffs() {
            let digits = workspace.radix().decode_to_vec(j).unwrap();
            let expected: f64 = digits
                .iter()
                .zip(point)
                .map(|(&r, x)| x.powi(r as i32))
                .product();
            assert_relative_eq!(row[j], expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn one_dimensional_row_is_the_basis_itself() {
        let mut workspace = Workspace::new(&[3], vec![powers(3)], ()).unwrap();
        let mut row = Array1::zeros(3);
        workspace
            .construct_row(array![2.0].view(), row.view_mut())
            .unwrap();
        assert_eq!(row, array![1.0, 2.0, 4.0]);
    }

    #[test]
    fn rows_are_deterministic_across_calls() {
        let mut workspace =
            Workspace::new(&[3, 2, 4], vec![powers(3), powers(2), powers(4)], ()).unwrap();
        let point = array![0.7, -1.3, 2.2];
        let mut first = Array1::zeros(24);
        let mut second = Array1::zeros(24);
        workspace.construct_row(point.view(), first.view_mut()).unwrap();
        workspace
            .construct_row(array![5.0, 5.0, 5.0].view(), second.view_mut())
            .unwrap();
        workspace.construct_row(point.view(), second.view_mut()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn each_evaluator_runs_once_per_point() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = |count: usize| -> SharedEvaluator {
            let calls = Arc::clone(&calls);
            Arc::new(
                FnBasis::new(move |x, mut out, _: &()| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let mut power = 1.0;
                    for value in out.iter_mut() {
                        *value = power;
                        power *= x;
                    }
                    Ok(())
                })
                .with_count(count),
            )
        };

        let mut workspace =
            Workspace::new(&[4, 5, 6], vec![counting(4), counting(5), counting(6)], ()).unwrap();
        let mut row = Array1::zeros(workspace.ncoeffs());
        workspace
            .construct_row(array![1.0, 2.0, 3.0].view(), row.view_mut())
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn evaluator_failure_leaves_output_untouched() {
        let failing: SharedEvaluator = Arc::new(FnBasis::new(|x, _, _: &()| {
            Err(BasisError::OutOfDomain {
                x,
                min: 0.0,
                max: 1.0,
            })
        }));
        let mut workspace = Workspace::new(&[2, 2], vec![powers(2), failing], ()).unwrap();
        let mut row = Array1::from_elem(4, -1.0);

        match workspace
            .construct_row(array![0.5, 4.0].view(), row.view_mut())
            .unwrap_err()
        {
            DesignError::EvaluatorFailure {
                dimension,
                coordinate,
                source,
            } => {
                assert_eq!(dimension, 1);
                assert_eq!(coordinate, 4.0);
                assert!(matches!(source, BasisError::OutOfDomain { .. }));
            }
            other => panic!("Expected EvaluatorFailure, got {other:?}"),
        }
        assert!(row.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn shared_params_reach_every_evaluator() {
        let scaled = |count: usize| -> SharedEvaluator<f64> {
            Arc::new(
                FnBasis::new(|x, mut out, scale: &f64| {
                    out.fill(scale * x);
                    Ok(())
                })
                .with_count(count),
            )
        };
        let mut workspace = Workspace::new(&[1, 2], vec![scaled(1), scaled(2)], 10.0).unwrap();
        assert_eq!(*workspace.params(), 10.0);

        let mut row = Array1::zeros(2);
        workspace
            .construct_row(array![1.0, 2.0].view(), row.view_mut())
            .unwrap();
        assert_eq!(row, array![200.0, 200.0]);
    }

    #[test]
    fn rejects_invalid_configurations() {
        assert!(matches!(
            Workspace::<()>::new(&[], vec![], ()).unwrap_err(),
            DesignError::InvalidArgument(_)
        ));
        assert!(matches!(
            Workspace::new(&[2, 0], vec![powers(2), powers(0)], ()).unwrap_err(),
            DesignError::InvalidArgument(_)
        ));
        assert!(matches!(
            Workspace::new(&[2, 3], vec![powers(2)], ()).unwrap_err(),
            DesignError::InvalidArgument(_)
        ));
        assert!(matches!(
            Workspace::new(&[2, 3], vec![powers(2), powers(4)], ()).unwrap_err(),
            DesignError::InvalidArgument(_)
        ));
    }

    #[test]
    fn overflowing_coefficient_count_is_an_allocation_error() {
        let evaluators: Vec<SharedEvaluator> = vec![
            Arc::new(FnBasis::new(|_, _, _: &()| Ok(()))),
            Arc::new(FnBasis::new(|_, _, _: &()| Ok(()))),
        ];
        assert!(matches!(
            Workspace::new(&[usize::MAX, 2], evaluators, ()).unwrap_err(),
            DesignError::AllocationError { .. }
        ));
    }

    #[test]
    fn rejects_mis_shaped_points_and_rows() {
        let mut workspace = Workspace::new(&[2, 3], vec![powers(2), powers(3)], ()).unwrap();
        let mut row = Array1::from_elem(5, 7.0);
        match workspace
            .construct_row(array![1.0, 2.0].view(), row.view_mut())
            .unwrap_err()
        {
            DesignError::DimensionMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 6);
                assert_eq!(found, 5);
            }
            other => panic!("Expected DimensionMismatch, got {other:?}"),
        }
        assert!(row.iter().all(|&v| v == 7.0));

        let mut row = Array1::zeros(6);
        assert!(matches!(
            workspace
                .construct_row(array![1.0, 2.0, 3.0].view(), row.view_mut())
                .unwrap_err(),
            DesignError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn clones_share_evaluators_but_not_scratch() {
        let mut original = Workspace::new(&[2, 2], vec![powers(2), powers(2)], ()).unwrap();
        let mut copy = original.clone();
        let mut a = Array1::zeros(4);
        let mut b = Array1::zeros(4);
        original.construct_row(array![2.0, 3.0].view(), a.view_mut()).unwrap();
        copy.construct_row(array![5.0, 7.0].view(), b.view_mut()).unwrap();
        assert_eq!(a, array![1.0, 3.0, 2.0, 6.0]);
        assert_eq!(b, array![1.0, 7.0, 5.0, 35.0]);
    }
}
