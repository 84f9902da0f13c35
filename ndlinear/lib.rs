#![deny(dead_code)]
#![deny(unused_imports)]

//! Least-squares design matrices for separable tensor-product expansions.
//!
//! A model in `n_dim` variables is written as
//!
//! ```text
//! f(x_0, ..., x_{n-1}) = sum_j c_j * u^{(0)}_{r_0}(x_0) * u^{(1)}_{r_1}(x_1) * ... * u^{(n-1)}_{r_{n-1}}(x_{n-1})
//! ```
//!
//! where each flat coefficient index `j` maps to a multi-index `(r_0, ..., r_{n-1})` with
//! the last dimension varying fastest. The [`Workspace`] evaluates the per-dimension bases
//! once per point and expands them into a design-matrix row, which is handed to a
//! least-squares solver ([`fit::fit_least_squares`]) and reused for prediction.

pub mod basis;
pub mod design;
pub mod fit;
pub mod model;
pub mod predict;
pub mod radix;
pub mod workspace;

pub use basis::{BasisError, BasisEvaluator};
pub use predict::{Estimate, linear_estimate};
pub use radix::MixedRadix;
pub use workspace::{DesignError, Workspace};
