use crate::{
    config,
    error::{CpdError, Result},
    point_cloud::PointSet,
    registration::{
        validate_pair, IterationObserver, RegistrationBackend, RegistrationOutcome,
        RegistrationState,
    },
};
use nalgebra as na;
use rayon::iter::{IndexedParallelIterator, ParallelIterator};
use rayon::slice::ParallelSliceMut;
use std::f64::consts::PI;

/// Non-rigid coherent point drift solver.
///
/// The source set is deformed onto the target by an EM loop: soft
/// correspondences under an isotropic Gaussian mixture, then a smoothness
/// regularized displacement field expressed in a Gaussian kernel basis.
/// `use_acceleration` evaluates the correspondence matrix on all cores;
/// both variants produce the same iterates.
pub struct CpdPipeline {
    config: config::Config,
}

impl CpdPipeline {
    pub fn new(config: config::Config) -> CpdPipeline {
        CpdPipeline { config }
    }

    pub fn default_values() -> CpdPipeline {
        CpdPipeline {
            config: config::Config::default_values(),
        }
    }
}

impl RegistrationBackend for CpdPipeline {
    fn register(
        &self,
        source: &PointSet,
        target: &PointSet,
        observer: &mut dyn IterationObserver,
    ) -> Result<RegistrationOutcome> {
        validate_pair(source, target)?;
        if !(self.config.kernel_width > 0.0) {
            return Err(CpdError::InvalidParameter(format!(
                "kernel_width must be positive, got {}",
                self.config.kernel_width
            )));
        }
        if !(self.config.smoothness_weight > 0.0) {
            return Err(CpdError::InvalidParameter(format!(
                "smoothness_weight must be positive, got {}",
                self.config.smoothness_weight
            )));
        }
        if !(0.0..1.0).contains(&self.config.outlier_weight) {
            return Err(CpdError::InvalidParameter(format!(
                "outlier_weight must be in [0, 1), got {}",
                self.config.outlier_weight
            )));
        }

        let y = source.coords();
        let x = target.coords();
        let (m, d) = (y.nrows(), y.ncols());

        let kernel = gaussian_kernel(y, self.config.kernel_width);
        let mut sigma2 = initial_variance(x, y);
        let mut deformation = na::DMatrix::<f64>::zeros(m, d);
        let mut transformed = source.clone();
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..self.config.max_num_iterations as usize {
            let posteriors = compute_posteriors(
                x,
                transformed.coords(),
                sigma2,
                self.config.outlier_weight,
                self.config.use_acceleration,
            );
            let coefficients = solve_coefficients(
                &kernel,
                y,
                &posteriors,
                self.config.smoothness_weight,
                sigma2,
            )?;
            deformation = &kernel * coefficients;
            transformed = PointSet::from_matrix(y + &deformation);

            let updated = update_variance(x, transformed.coords(), &posteriors);
            let diff = (sigma2 - updated).abs();
            // keep the mixture proper when the variance estimate collapses
            sigma2 = if updated > 0.0 {
                updated
            } else {
                self.config.convergence_criterion / 10.0
            };
            iterations = iteration + 1;
            log::debug!("iteration {iteration}: sigma2 {sigma2:.6}, diff {diff:.6}");

            observer.on_iteration(&RegistrationState {
                iteration,
                error: sigma2,
                transformed: &transformed,
                target,
            });

            if diff < self.config.convergence_criterion {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "registration did not converge within {} iterations",
                self.config.max_num_iterations
            );
        }
        Ok(RegistrationOutcome {
            transformed,
            deformation,
            error: sigma2,
            iterations,
            converged,
        })
    }
}

fn squared_distance(a: &na::DMatrix<f64>, i: usize, b: &na::DMatrix<f64>, j: usize) -> f64 {
    let mut sum = 0.0;
    for d in 0..a.ncols() {
        let diff = a[(i, d)] - b[(j, d)];
        sum += diff * diff;
    }
    sum
}

/// Symmetric kernel over the undeformed source; the displacement field is a
/// weighted sum of these basis columns.
fn gaussian_kernel(y: &na::DMatrix<f64>, kernel_width: f64) -> na::DMatrix<f64> {
    let m = y.nrows();
    let scale = -1.0 / (2.0 * kernel_width * kernel_width);
    let mut kernel = na::DMatrix::zeros(m, m);
    for i in 0..m {
        for j in i..m {
            let value = (scale * squared_distance(y, i, y, j)).exp();
            kernel[(i, j)] = value;
            kernel[(j, i)] = value;
        }
    }
    kernel
}

fn initial_variance(x: &na::DMatrix<f64>, y: &na::DMatrix<f64>) -> f64 {
    let (n, m, d) = (x.nrows(), y.nrows(), x.ncols());
    let mut sum = 0.0;
    for ni in 0..n {
        for mi in 0..m {
            sum += squared_distance(x, ni, y, mi);
        }
    }
    sum / (d * n * m) as f64
}

struct Posteriors {
    /// Per-target-point match probability mass (column sums of P).
    pt1: na::DVector<f64>,
    /// Per-source-point match probability mass (row sums of P).
    p1: na::DVector<f64>,
    /// P * X, the probability weighted target coordinates.
    px: na::DMatrix<f64>,
    /// Total probability mass.
    np: f64,
}

/// E-step: soft correspondence probabilities between the current transformed
/// source and the target, with a uniform outlier component of weight
/// `outlier_weight`.
fn compute_posteriors(
    x: &na::DMatrix<f64>,
    transformed: &na::DMatrix<f64>,
    sigma2: f64,
    outlier_weight: f64,
    parallel: bool,
) -> Posteriors {
    let (n, m, d) = (x.nrows(), transformed.nrows(), x.ncols());
    let scale = -1.0 / (2.0 * sigma2);

    // column n holds the unnormalized match likelihoods of every source point
    // against target point n
    let fill_column = |ni: usize, column: &mut [f64]| {
        for (mi, value) in column.iter_mut().enumerate() {
            *value = (scale * squared_distance(x, ni, transformed, mi)).exp();
        }
    };
    let mut likelihoods = vec![0.0; m * n];
    if parallel {
        likelihoods
            .par_chunks_mut(m)
            .enumerate()
            .for_each(|(ni, column)| fill_column(ni, column));
    } else {
        for (ni, column) in likelihoods.chunks_mut(m).enumerate() {
            fill_column(ni, column);
        }
    }
    let likelihoods = na::DMatrix::from_vec(m, n, likelihoods);

    let uniform = if outlier_weight > 0.0 {
        (2.0 * PI * sigma2).powf(d as f64 / 2.0) * outlier_weight / (1.0 - outlier_weight)
            * m as f64
            / n as f64
    } else {
        0.0
    };

    let mut pt1 = na::DVector::zeros(n);
    let mut p1 = na::DVector::zeros(m);
    let mut px = na::DMatrix::zeros(m, d);
    for ni in 0..n {
        let mass: f64 = likelihoods.column(ni).sum();
        let denominator = (mass + uniform).max(f64::MIN_POSITIVE);
        pt1[ni] = mass / denominator;
        for mi in 0..m {
            let p = likelihoods[(mi, ni)] / denominator;
            p1[mi] += p;
            for di in 0..d {
                px[(mi, di)] += p * x[(ni, di)];
            }
        }
    }
    let np = p1.sum();
    Posteriors { pt1, p1, px, np }
}

/// M-step: solve (diag(p1) G + alpha sigma2 I) W = PX - diag(p1) Y for the
/// kernel coefficients of the displacement field.
fn solve_coefficients(
    kernel: &na::DMatrix<f64>,
    y: &na::DMatrix<f64>,
    posteriors: &Posteriors,
    smoothness_weight: f64,
    sigma2: f64,
) -> Result<na::DMatrix<f64>> {
    let (m, d) = (y.nrows(), y.ncols());
    let mut lhs = kernel.clone();
    for i in 0..m {
        let weight = posteriors.p1[i];
        for j in 0..m {
            lhs[(i, j)] *= weight;
        }
        lhs[(i, i)] += smoothness_weight * sigma2;
    }
    let mut rhs = posteriors.px.clone();
    for i in 0..m {
        for j in 0..d {
            rhs[(i, j)] -= posteriors.p1[i] * y[(i, j)];
        }
    }
    lhs.lu()
        .solve(&rhs)
        .ok_or_else(|| CpdError::Registration("deformation system is singular".to_string()))
}

fn update_variance(
    x: &na::DMatrix<f64>,
    transformed: &na::DMatrix<f64>,
    posteriors: &Posteriors,
) -> f64 {
    let (n, m, d) = (x.nrows(), transformed.nrows(), x.ncols());
    let mut target_term = 0.0;
    for ni in 0..n {
        let mut sq = 0.0;
        for di in 0..d {
            sq += x[(ni, di)] * x[(ni, di)];
        }
        target_term += posteriors.pt1[ni] * sq;
    }
    let mut cross_term = 0.0;
    let mut source_term = 0.0;
    for mi in 0..m {
        let mut sq = 0.0;
        for di in 0..d {
            cross_term += posteriors.px[(mi, di)] * transformed[(mi, di)];
            sq += transformed[(mi, di)] * transformed[(mi, di)];
        }
        source_term += posteriors.p1[mi] * sq;
    }
    (target_term - 2.0 * cross_term + source_term) / (posteriors.np * d as f64)
}
