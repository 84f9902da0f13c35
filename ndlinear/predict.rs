//! Model evaluation at arbitrary points, with optional standard errors.

use crate::workspace::{DesignError, Workspace};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// A model prediction together with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    pub std_error: f64,
}

/// Linear estimate `y = x . c` and its standard error `sqrt(x' Cov x)`.
///
/// `row` and `coefficients` must have the same length `p`, and `covariance` must be
/// `p x p`. Negative variances produced by round-off are clamped to zero, so the
/// standard error is always non-negative.
pub fn linear_estimate(
    row: ArrayView1<f64>,
    coefficients: ArrayView1<f64>,
    covariance: ArrayView2<f64>,
) -> Result<Estimate, DesignError> {
    let p = row.len();
    if coefficients.len() != p {
        return Err(DesignError::mismatch(
            "coefficient vector",
            p,
            coefficients.len(),
        ));
    }
    if covariance.nrows() != p {
        return Err(DesignError::mismatch(
            "covariance matrix row count",
            p,
            covariance.nrows(),
        ));
    }
    if covariance.ncols() != p {
        return Err(DesignError::mismatch(
            "covariance matrix column count",
            p,
            covariance.ncols(),
        ));
    }

    let value = row.dot(&coefficients);
    let variance = row.dot(&covariance.dot(&row));
    Ok(Estimate {
        value,
        std_error: variance.max(0.0).sqrt(),
    })
}

impl<P: ?Sized> Workspace<P> {
    /// Evaluates the fitted model `sum_j c_j X_j(point)`.
    pub fn calc(
        &mut self,
        point: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
    ) -> Result<f64, DesignError> {
        self.check_coefficients(&coefficients)?;
        let row = self.row_for(point)?;
        Ok(row.dot(&coefficients))
    }

    /// Evaluates the fitted model and its standard error from the coefficient covariance.
    pub fn estimate(
        &mut self,
        point: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
        covariance: ArrayView2<f64>,
    ) -> Result<Estimate, DesignError> {
        self.check_coefficients(&coefficients)?;
        let row = self.row_for(point)?;
        linear_estimate(row, coefficients, covariance)
    }

    /// Evaluates the fitted model at every row of `points`.
    pub fn calc_many(
        &mut self,
        points: ArrayView2<f64>,
        coefficients: ArrayView1<f64>,
    ) -> Result<Array1<f64>, DesignError> {
        self.check_coefficients(&coefficients)?;
        points
            .axis_iter(Axis(0))
            .map(|point| self.calc(point, coefficients))
            .collect()
    }

    fn check_coefficients(&self, coefficients: &ArrayView1<f64>) -> Result<(), DesignError> {
        if coefficients.len() != self.ncoeffs() {
            return Err(DesignError::mismatch(
                "coefficient vector",
                self.ncoeffs(),
                coefficients.len(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Polynomial;
    use crate::workspace::SharedEvaluator;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use std::sync::Arc;

    fn quadratic_by_linear() -> Workspace {
        let evaluators: Vec<SharedEvaluator> =
            vec![Arc::new(Polynomial::new(2)), Arc::new(Polynomial::new(3))];
        Workspace::new(&[2, 3], evaluators, ()).unwrap()
    }

    #[test]
    fn one_hot_coefficients_select_a_single_row_entry() {
        let mut workspace = quadratic_by_linear();
        let point = array![2.0, 3.0];
        let mut row = Array1::zeros(6);
        workspace.construct_row(point.view(), row.view_mut()).unwrap();

        for j in 0..workspace.ncoeffs() {
            let mut coefficients = Array1::zeros(6);
            coefficients[j] = 1.0;
            let value = workspace.calc(point.view(), coefficients.view()).unwrap();
            assert_eq!(value, row[j]);
        }
    }

    #[test]
    fn calc_evaluates_the_tensor_product_model() {
        // f(x, y) = 1 + 2y + 3xy^2
        let mut workspace = quadratic_by_linear();
        let coefficients = array![1.0, 2.0, 0.0, 0.0, 0.0, 3.0];
        let value = workspace
            .calc(array![2.0, -1.5].view(), coefficients.view())
            .unwrap();
        assert_abs_diff_eq!(value, 1.0 + 2.0 * -1.5 + 3.0 * 2.0 * 2.25, epsilon = 1e-12);

        let many = workspace
            .calc_many(array![[2.0, -1.5], [0.0, 0.0]].view(), coefficients.view())
            .unwrap();
        assert_abs_diff_eq!(many[0], value, epsilon = 1e-12);
        assert_abs_diff_eq!(many[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn calc_rejects_wrong_coefficient_count() {
        let mut workspace = quadratic_by_linear();
        assert!(matches!(
            workspace
                .calc(array![1.0, 1.0].view(), Array1::zeros(5).view())
                .unwrap_err(),
            DesignError::DimensionMismatch {
                expected: 6,
                found: 5,
                ..
            }
        ));
    }

    #[test]
    fn estimate_uses_covariance_quadratic_form() {
        let mut workspace = quadratic_by_linear();
        let coefficients = Array1::ones(6);
        let covariance = Array2::<f64>::eye(6) * 0.25;
        let estimate = workspace
            .estimate(array![2.0, 3.0].view(), coefficients.view(), covariance.view())
            .unwrap();

        // Row [1, 3, 9, 2, 6, 18]: sum 39, squared norm 455.
        assert_abs_diff_eq!(estimate.value, 39.0, epsilon = 1e-12);
        assert_abs_diff_eq!(estimate.std_error, (0.25 * 455.0_f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn estimate_rejects_mis_shaped_covariance() {
        let mut workspace = quadratic_by_linear();
        let err = workspace
            .estimate(
                array![2.0, 3.0].view(),
                Array1::ones(6).view(),
                Array2::eye(5).view(),
            )
            .unwrap_err();
        assert!(matches!(err, DesignError::DimensionMismatch { .. }));
    }

    #[test]
    fn linear_estimate_clamps_negative_variance() {
        let row = array![1.0, 1.0];
        let covariance = array![[1.0, -1.0 - 1e-15], [-1.0 - 1e-15, 1.0]];
        let estimate =
            linear_estimate(row.view(), array![2.0, 3.0].view(), covariance.view()).unwrap();
        assert_eq!(estimate.value, 5.0);
        assert!(estimate.std_error >= 0.0);
    }
}
