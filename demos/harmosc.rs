//! Fits a noisy three-dimensional wavefunction-like field in spherical coordinates
//! `(r, theta, phi)` with a tensor-product basis: cubic B-splines in `r`, Legendre
//! polynomials in `cos(theta)` and a Fourier series in `phi`. Prints the fit quality and
//! the RMS model error over a volume-weighted grid.
//!
//! Run with `RUST_LOG=info cargo run --release --example harmosc`.

use ndarray::{Array1, Array2, Axis, array};
use ndlinear::Workspace;
use ndlinear::basis::{BSpline, Fourier, Legendre};
use ndlinear::fit::fit_least_squares;
use ndlinear::workspace::SharedEvaluator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::error::Error;
use std::f64::consts::PI;
use std::sync::Arc;

/// Number of basis functions for each variable.
const N_SUM_R: usize = 10;
const N_SUM_THETA: usize = 10;
const N_SUM_PHI: usize = 9;

const R_MAX: f64 = 3.0;
const NDATA: usize = 3000;

/// Radial profile times an associated-Legendre-like angular factor, `l = 2, m = 2`.
fn psi_exact(r: f64, theta: f64, phi: f64) -> f64 {
    let radial = r * r * (-r * r).exp();
    let angular = theta.sin().powi(2);
    radial * angular * (2.0 * phi).cos()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Cubic B-splines: N_SUM_R - 4 internal knots give N_SUM_R functions.
    let radial = BSpline::uniform((0.0, R_MAX), N_SUM_R - 4, 3)?;
    let evaluators: Vec<SharedEvaluator> = vec![
        Arc::new(radial),
        Arc::new(Legendre::of_cosine(N_SUM_THETA)),
        Arc::new(Fourier::new(N_SUM_PHI)),
    ];
    let mut workspace = Workspace::new(&[N_SUM_R, N_SUM_THETA, N_SUM_PHI], evaluators, ())?;
    log::info!("ncoeffs = {}", workspace.ncoeffs());

    let mut rng = StdRng::seed_from_u64(42);
    let mut vars = Array2::zeros((NDATA, 3));
    let mut data = Array1::zeros(NDATA);
    for (mut point, y) in vars.axis_iter_mut(Axis(0)).zip(data.iter_mut()) {
        let r = rng.gen_range(0.0..R_MAX);
        let theta = rng.gen_range(0.0..PI);
        let phi = rng.gen_range(0.0..2.0 * PI);
        let psi = psi_exact(r, theta, phi);
        let noise = Normal::new(0.0, (0.05 * psi).abs().max(f64::MIN_POSITIVE))?;

        point.assign(&array![r, theta, phi]);
        *y = psi + noise.sample(&mut rng);
    }

    let mut design = Array2::zeros((NDATA, workspace.ncoeffs()));
    workspace.build_design_matrix_parallel(vars.view(), design.view_mut())?;
    let fit = fit_least_squares(design.view(), data.view())?;
    log::info!(
        "chisq = {:e}, Rsq = {:.6}",
        fit.chisq,
        fit.r_squared(data.view())
    );

    let (dr, dtheta, dphi) = (0.05, 5.0 * PI / 180.0, 5.0 * PI / 180.0);
    let mut eps_rms = 0.0;
    let mut volume = 0.0;
    let mut r = 0.01;
    while r < R_MAX {
        let mut theta = 0.0;
        while theta < PI {
            let mut phi = 0.0;
            while phi < 2.0 * PI {
                let dv = r * r * theta.sin() * dr * dtheta * dphi;
                let model = workspace.calc(array![r, theta, phi].view(), fit.coefficients.view())?;
                let err = model - psi_exact(r, theta, phi);
                eps_rms += err * err * dv;
                volume += dv;
                phi += dphi;
            }
            theta += dtheta;
        }
        r += dr;
    }

    log::info!("rms error over all parameter space = {:e}", (eps_rms / volume).sqrt());
    Ok(())
}
