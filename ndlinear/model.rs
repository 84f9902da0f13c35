use crate::basis::{
    BSpline, BasisError, Fourier, KnotStrategy, Legendre, LegendreArgument, Polynomial,
};
use crate::fit::{FitError, fit_least_squares};
use crate::predict::Estimate;
use crate::workspace::{DesignError, SharedEvaluator, Workspace};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a model configuration and
// of a fitted model when serialized to a TOML file.

fn default_legendre_argument() -> LegendreArgument {
    LegendreArgument::Direct
}

fn default_knot_strategy() -> KnotStrategy {
    KnotStrategy::Uniform
}

/// The univariate basis family used along one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BasisSpec {
    Polynomial {
        count: usize,
    },
    Legendre {
        count: usize,
        #[serde(default = "default_legendre_argument")]
        argument: LegendreArgument,
    },
    Fourier {
        count: usize,
    },
    #[serde(rename = "bspline")]
    BSpline {
        degree: usize,
        num_internal_knots: usize,
        /// Must be the range of the training data, also when predicting.
        range: (f64, f64),
        #[serde(default = "default_knot_strategy")]
        knot_strategy: KnotStrategy,
        /// Full knot vector, filled in by [`ModelConfig::resolve_knots`] so that a saved
        /// model reproduces the exact basis it was fitted with.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        knots: Option<Vec<f64>>,
    },
}

impl BasisSpec {
    /// Number of basis functions this specification produces.
    pub fn count(&self) -> usize {
        match self {
            BasisSpec::Polynomial { count }
            | BasisSpec::Legendre { count, .. }
            | BasisSpec::Fourier { count } => *count,
            BasisSpec::BSpline {
                degree,
                num_internal_knots,
                knots,
                ..
            } => match knots {
                Some(knots) => knots.len().saturating_sub(degree + 1),
                None => num_internal_knots + degree + 1,
            },
        }
    }

    /// Builds the evaluator. B-splines with quantile knots need either resolved knots or
    /// the training column.
    pub fn build(&self, training: Option<ArrayView1<f64>>) -> Result<SharedEvaluator, BasisError> {
        let evaluator: SharedEvaluator = match self {
            BasisSpec::Polynomial { count } => Arc::new(Polynomial::new(*count)),
            BasisSpec::Legendre { count, argument } => Arc::new(Legendre {
                count: *count,
                argument: *argument,
            }),
            BasisSpec::Fourier { count } => Arc::new(Fourier::new(*count)),
            BasisSpec::BSpline { .. } => Arc::new(self.bspline(training)?),
        };
        Ok(evaluator)
    }

    fn bspline(&self, training: Option<ArrayView1<f64>>) -> Result<BSpline, BasisError> {
        let BasisSpec::BSpline {
            degree,
            num_internal_knots,
            range,
            knot_strategy,
            knots,
        } = self
        else {
            return Err(BasisError::InvalidKnots(
                "basis specification is not a B-spline".to_string(),
            ));
        };

        if let Some(knots) = knots {
            return BSpline::with_knots(Array1::from_vec(knots.clone()), *degree);
        }
        match knot_strategy {
            KnotStrategy::Uniform => BSpline::uniform(*range, *num_internal_knots, *degree),
            KnotStrategy::Quantile => {
                let training = training.ok_or(BasisError::QuantileDataMissing)?;
                BSpline::quantile(*range, *num_internal_knots, *degree, training)
            }
        }
    }
}

/// One named independent variable and its basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    pub basis: BasisSpec,
}

/// The structure of a tensor-product model: one basis per dimension, in the canonical
/// order that fixes the coefficient flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub dimensions: Vec<DimensionConfig>,
}

/// Fit diagnostics stored alongside the coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    pub ndata: usize,
    pub chisq: f64,
    pub r_squared: f64,
    pub rank: usize,
}

/// The top-level, self-contained, fitted model artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    /// Flattened coefficients, last dimension varying fastest.
    pub coefficients: Vec<f64>,
    pub statistics: FitStatistics,
    pub config: ModelConfig,
    /// Coefficient covariance, required for standard errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<Array2<f64>>,
}

/// Custom error type for model configuration, fitting, persistence and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Basis construction for dimension '{name}' failed: {source}")]
    BasisError {
        name: String,
        #[source]
        source: BasisError,
    },
    #[error(transparent)]
    DesignError(#[from] DesignError),
    #[error(transparent)]
    FitError(#[from] FitError),
    #[error("The model has {found} coefficients, but its configuration implies {expected}.")]
    CoefficientCount { expected: usize, found: usize },
    #[error("The model was saved without a covariance matrix; standard errors are unavailable.")]
    CovarianceMissing,
}

impl ModelConfig {
    pub fn from_toml_str(toml_string: &str) -> Result<Self, ModelError> {
        Ok(toml::from_str(toml_string)?)
    }

    /// Loads a model configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn basis_counts(&self) -> Vec<usize> {
        self.dimensions.iter().map(|d| d.basis.count()).collect()
    }

    /// Replaces every B-spline knot placement rule with the explicit knot vector it
    /// produces on `points` (shape `[ndata, ndim]`).
    pub fn resolve_knots(&self, points: ArrayView2<f64>) -> Result<Self, ModelError> {
        if points.ncols() != self.dimensions.len() {
            return Err(DesignError::DimensionMismatch {
                what: "data point matrix column count",
                expected: self.dimensions.len(),
                found: points.ncols(),
            }
            .into());
        }

        let mut resolved = self.clone();
        for (dimension, column) in resolved.dimensions.iter_mut().zip(points.axis_iter(Axis(1))) {
            if let BasisSpec::BSpline { .. } = dimension.basis {
                let spline = dimension
                    .basis
                    .bspline(Some(column))
                    .map_err(|source| ModelError::BasisError {
                        name: dimension.name.clone(),
                        source,
                    })?;
                if let BasisSpec::BSpline { knots, .. } = &mut dimension.basis {
                    *knots = Some(spline.knots().to_vec());
                }
            }
        }
        Ok(resolved)
    }

    /// Builds a workspace for this configuration. Quantile B-splines must have been
    /// resolved with [`ModelConfig::resolve_knots`] first.
    pub fn workspace(&self) -> Result<Workspace, ModelError> {
        let evaluators = self
            .dimensions
            .iter()
            .map(|d| {
                d.basis.build(None).map_err(|source| ModelError::BasisError {
                    name: d.name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Workspace::new(&self.basis_counts(), evaluators, ())?)
    }
}

impl FittedModel {
    /// Fits `observations` at `points` (shape `[ndata, ndim]`) by ordinary least squares.
    pub fn fit(
        config: &ModelConfig,
        points: ArrayView2<f64>,
        observations: ArrayView1<f64>,
    ) -> Result<Self, ModelError> {
        let config = config.resolve_knots(points)?;
        let mut workspace = config.workspace()?;
        log::info!(
            "Fitting tensor-product model: {} points, {} dimensions, {} coefficients",
            points.nrows(),
            workspace.ndim(),
            workspace.ncoeffs()
        );

        let design = workspace.design_matrix(points)?;
        let fit = fit_least_squares(design.view(), observations)?;
        let r_squared = fit.r_squared(observations);
        log::info!("chisq = {:e}, Rsq = {:.6}", fit.chisq, r_squared);

        Ok(FittedModel {
            coefficients: fit.coefficients.to_vec(),
            statistics: FitStatistics {
                ndata: points.nrows(),
                chisq: fit.chisq,
                r_squared,
                rank: fit.rank,
            },
            config,
            covariance: Some(fit.covariance),
        })
    }

    /// Rebuilds the workspace and checks the stored coefficients against it.
    pub fn workspace(&self) -> Result<Workspace, ModelError> {
        let workspace = self.config.workspace()?;
        if workspace.ncoeffs() != self.coefficients.len() {
            return Err(ModelError::CoefficientCount {
                expected: workspace.ncoeffs(),
                found: self.coefficients.len(),
            });
        }
        Ok(workspace)
    }

    /// Model values at every row of `points`.
    pub fn predict(&self, points: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let mut workspace = self.workspace()?;
        let coefficients = ArrayView1::from(self.coefficients.as_slice());
        Ok(workspace.calc_many(points, coefficients)?)
    }

    /// Model values and standard errors at every row of `points`.
    pub fn predict_with_error(&self, points: ArrayView2<f64>) -> Result<Vec<Estimate>, ModelError> {
        let covariance = self
            .covariance
            .as_ref()
            .ok_or(ModelError::CovarianceMissing)?;
        let mut workspace = self.workspace()?;
        let coefficients = ArrayView1::from(self.coefficients.as_slice());
        points
            .axis_iter(Axis(0))
            .map(|point| {
                workspace
                    .estimate(point, coefficients, covariance.view())
                    .map_err(ModelError::from)
            })
            .collect()
    }

    /// Saves the fitted model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a fitted model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const CONFIG: &str = r#"
[[dimensions]]
name = "x"
basis = { kind = "polynomial", count = 3 }

[[dimensions]]
name = "theta"
basis = { kind = "legendre", count = 4, argument = "Cosine" }

[[dimensions]]
name = "r"
basis = { kind = "bspline", degree = 3, num_internal_knots = 2, range = [0.0, 1.0] }
"#;

    #[test]
    fn parses_configuration_and_counts_coefficients() {
        let config = ModelConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.dimensions.len(), 3);
        assert_eq!(config.basis_counts(), vec![3, 4, 6]);
        assert_eq!(
            config.dimensions[2].basis,
            BasisSpec::BSpline {
                degree: 3,
                num_internal_knots: 2,
                range: (0.0, 1.0),
                knot_strategy: KnotStrategy::Uniform,
                knots: None,
            }
        );

        let workspace = config.workspace().unwrap();
        assert_eq!(workspace.ncoeffs(), 72);
    }

    #[test]
    fn quantile_knots_require_resolution() {
        let config = ModelConfig {
            dimensions: vec![DimensionConfig {
                name: "age".to_string(),
                basis: BasisSpec::BSpline {
                    degree: 1,
                    num_internal_knots: 1,
                    range: (0.0, 10.0),
                    knot_strategy: KnotStrategy::Quantile,
                    knots: None,
                },
            }],
        };
        assert!(matches!(
            config.workspace().unwrap_err(),
            ModelError::BasisError {
                source: BasisError::QuantileDataMissing,
                ..
            }
        ));

        let points = array![[0.0], [1.0], [2.0], [10.0]];
        let resolved = config.resolve_knots(points.view()).unwrap();
        match &resolved.dimensions[0].basis {
            BasisSpec::BSpline { knots: Some(knots), .. } => {
                assert_eq!(knots, &vec![0.0, 0.0, 1.5, 10.0, 10.0]);
            }
            other => panic!("Expected resolved B-spline, got {other:?}"),
        }
        assert_eq!(resolved.workspace().unwrap().ncoeffs(), 3);
    }

    #[test]
    fn fit_recovers_separable_polynomial() {
        // f(x, y) = 1 - x + 2 x y^2
        let config = ModelConfig {
            dimensions: vec![
                DimensionConfig {
                    name: "x".to_string(),
                    basis: BasisSpec::Polynomial { count: 2 },
                },
                DimensionConfig {
                    name: "y".to_string(),
                    basis: BasisSpec::Polynomial { count: 3 },
                },
            ],
        };
        let points = Array2::from_shape_fn((40, 2), |(i, j)| {
            let t = i as f64 / 39.0;
            if j == 0 { 2.0 * t - 1.0 } else { (7.0 * t).sin() }
        });
        let observations = points
            .axis_iter(Axis(0))
            .map(|p| 1.0 - p[0] + 2.0 * p[0] * p[1] * p[1])
            .collect::<Array1<f64>>();

        let model = FittedModel::fit(&config, points.view(), observations.view()).unwrap();
        let expected = [1.0, 0.0, 0.0, -1.0, 0.0, 2.0];
        for (c, e) in model.coefficients.iter().zip(expected) {
            assert_abs_diff_eq!(*c, e, epsilon = 1e-8);
        }
        assert_abs_diff_eq!(model.statistics.r_squared, 1.0, epsilon = 1e-10);

        let predicted = model.predict(array![[0.5, 0.5]].view()).unwrap();
        assert_abs_diff_eq!(predicted[0], 1.0 - 0.5 + 2.0 * 0.5 * 0.25, epsilon = 1e-8);
    }

    #[test]
    fn coefficient_count_is_checked_against_configuration() {
        let model = FittedModel {
            coefficients: vec![1.0, 2.0],
            statistics: FitStatistics {
                ndata: 0,
                chisq: 0.0,
                r_squared: 1.0,
                rank: 2,
            },
            config: ModelConfig {
                dimensions: vec![DimensionConfig {
                    name: "x".to_string(),
                    basis: BasisSpec::Fourier { count: 3 },
                }],
            },
            covariance: None,
        };
        assert!(matches!(
            model.predict(array![[0.1]].view()).unwrap_err(),
            ModelError::CoefficientCount {
                expected: 3,
                found: 2
            }
        ));
        assert!(matches!(
            model.predict_with_error(array![[0.1]].view()).unwrap_err(),
            ModelError::CovarianceMissing
        ));
    }
}
