//! Ordinary least-squares solve of a design matrix against observations.
//!
//! The factorization itself is delegated to `ndarray-linalg` (LAPACK SVD driver); this
//! module only packages its result the way prediction needs it: coefficients, their
//! covariance `sigma^2 (X'X)^-1` with `sigma^2 = chisq / (n - p)`, and the residual sum of
//! squares.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Inverse, LeastSquaresSvd};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    #[error("Design matrix has {rows} rows, but {observations} observations were supplied.")]
    ShapeMismatch { rows: usize, observations: usize },

    #[error(
        "A fit with {cols} coefficients needs more than {cols} observations to estimate its covariance, but only {rows} were supplied."
    )]
    Underdetermined { rows: usize, cols: usize },

    #[error("Design matrix is rank deficient: rank {rank} for {cols} coefficients.")]
    RankDeficient { rank: usize, cols: usize },

    #[error("Linear algebra backend failed: {0}")]
    LinalgError(#[from] LinalgError),
}

/// Result of an unweighted linear least-squares fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearFit {
    pub coefficients: Array1<f64>,
    /// `sigma^2 (X'X)^-1`.
    pub covariance: Array2<f64>,
    /// Residual sum of squares.
    pub chisq: f64,
    pub rank: usize,
}

impl LinearFit {
    /// Coefficient of determination `1 - chisq / TSS` against the fitted observations.
    pub fn r_squared(&self, observations: ArrayView1<f64>) -> f64 {
        let mean = observations.mean().unwrap_or(0.0);
        let tss: f64 = observations.iter().map(|&y| (y - mean) * (y - mean)).sum();
        1.0 - self.chisq / tss
    }
}

/// Solves `min ||X c - y||^2` and estimates the coefficient covariance.
pub fn fit_least_squares(
    design: ArrayView2<f64>,
    observations: ArrayView1<f64>,
) -> Result<LinearFit, FitError> {
    let (rows, cols) = design.dim();
    if observations.len() != rows {
        return Err(FitError::ShapeMismatch {
            rows,
            observations: observations.len(),
        });
    }
    if rows <= cols {
        return Err(FitError::Underdetermined { rows, cols });
    }

    log::info!("Solving least-squares system with {rows} observations and {cols} coefficients");

    let solution = design.least_squares(&observations)?;
    let rank = usize::try_from(solution.rank).unwrap_or(0);
    if rank < cols {
        return Err(FitError::RankDeficient { rank, cols });
    }
    let coefficients = solution.solution;

    let residuals = &observations - &design.dot(&coefficients);
    let chisq = residuals.dot(&residuals);
    let sigma_squared = chisq / (rows - cols) as f64;

    let xtx = design.t().dot(&design);
    let covariance = xtx.inv()? * sigma_squared;

    log::debug!(
        "Least-squares fit: chisq = {chisq:e}, sigma^2 = {sigma_squared:e}, rank = {rank}"
    );

    Ok(LinearFit {
        coefficients,
        covariance,
        chisq,
        rank,
    })
}
