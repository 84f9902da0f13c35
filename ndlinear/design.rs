//! Design-matrix assembly: one tensor-product row per data point.

use crate::workspace::{DesignError, Workspace};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;

impl<P: ?Sized> Workspace<P> {
    /// Fills `out` (shape `[ndata, ncoeffs]`) with the design matrix of `points`
    /// (shape `[ndata, ndim]`).
    ///
    /// Shapes are validated before anything is written. Rows are built in order and the
    /// first failing row aborts the build; rows before it have already been written, so
    /// on error the whole of `out` must be discarded.
    pub fn build_design_matrix(
        &mut self,
        points: ArrayView2<f64>,
        mut out: ArrayViewMut2<f64>,
    ) -> Result<(), DesignError> {
        self.check_design_shapes(&points, &out)?;
        log::debug!(
            "Building {}x{} design matrix",
            points.nrows(),
            self.ncoeffs()
        );

        for (i, (point, row)) in points
            .axis_iter(Axis(0))
            .zip(out.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            self.construct_row(point, row).inspect_err(|e| {
                log::debug!("Design matrix construction stopped at row {i}: {e}");
            })?;
        }
        Ok(())
    }

    /// Allocates and returns the design matrix of `points`.
    pub fn design_matrix(&mut self, points: ArrayView2<f64>) -> Result<Array2<f64>, DesignError> {
        let mut out = Array2::zeros((points.nrows(), self.ncoeffs()));
        self.build_design_matrix(points, out.view_mut())?;
        Ok(out)
    }

    fn check_design_shapes(
        &self,
        points: &ArrayView2<f64>,
        out: &ArrayViewMut2<f64>,
    ) -> Result<(), DesignError> {
        if points.ncols() != self.ndim() {
            return Err(DesignError::mismatch(
                "data point matrix column count",
                self.ndim(),
                points.ncols(),
            ));
        }
        if out.nrows() != points.nrows() {
            return Err(DesignError::mismatch(
                "design matrix row count",
                points.nrows(),
                out.nrows(),
            ));
        }
        if out.ncols() != self.ncoeffs() {
            return Err(DesignError::mismatch(
                "design matrix column count",
                self.ncoeffs(),
                out.ncols(),
            ));
        }
        Ok(())
    }
}

impl<P: ?Sized + Send + Sync> Workspace<P> {
    /// Parallel variant of [`Workspace::build_design_matrix`].
    ///
    /// Each rayon worker builds rows with its own clone of this workspace; evaluators and
    /// parameters are shared, so they must be safe to call concurrently. If any row fails
    /// the build stops and one of the failures is returned (not necessarily the first row
    /// in order); `out` must then be discarded.
    pub fn build_design_matrix_parallel(
        &self,
        points: ArrayView2<f64>,
        mut out: ArrayViewMut2<f64>,
    ) -> Result<(), DesignError> {
        self.check_design_shapes(&points, &out)?;
        log::debug!(
            "Building {}x{} design matrix on {} threads",
            points.nrows(),
            self.ncoeffs(),
            rayon::current_num_threads()
        );

        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(points.axis_iter(Axis(0)).into_par_iter())
            .try_for_each_init(
                || self.clone(),
                |workspace, (row, point)| workspace.construct_row(point, row),
            )
    }
}
