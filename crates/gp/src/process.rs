//! The non-parametric process surrogate.
//!
//! A [`Process`] maintains a posterior over an unknown function given an
//! incrementally growing sample set. It owns a covariance [`Kernel`], a
//! parametric [`MeanFunction`], a nugget regularizer and the Cholesky factor
//! of the regularized correlation matrix, extended by a rank-1 append on
//! every accepted sample.
//!
//! Four flavours share the same machinery and differ in how the mean
//! coefficients and the process variance enter the predictive distribution:
//!
//! | flavour | coefficients | variance | predictive |
//! |---|---|---|---|
//! | [`Flavour::Gaussian`] | prior (fixed) | fixed | Normal |
//! | [`Flavour::GaussianMl`] | GLS estimate | MLE | Normal |
//! | [`Flavour::GaussianNormal`] | Normal posterior | fixed | Normal |
//! | [`Flavour::StudentTNig`] | NIG posterior | Inverse-Gamma posterior | Student-t |

use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use crate::la::CholeskyFactor;
use crate::means::MeanFunction;

use linfa::dataset::DatasetBase;
use linfa::prelude::Fit;
use linfa::{Float, ParamGuard};
use log::{debug, warn};
use ndarray::{concatenate, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use statrs::distribution::{Continuous, ContinuousCDF, Normal, StudentsT};
use statrs::function::gamma::ln_gamma;
use std::fmt;

const LN_2PI: f64 = 1.8378770664093453;

/// The statistical flavour of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavour {
    /// Gaussian process with fixed process variance and prior mean coefficients
    Gaussian,
    /// Gaussian process with coefficients and variance concentrated out by
    /// maximum likelihood
    GaussianMl,
    /// Gaussian process with a Normal prior on the mean coefficients
    GaussianNormal,
    /// Student-t process with a Normal-Inverse-Gamma prior on coefficients
    /// and variance
    StudentTNig,
}

impl Flavour {
    /// Resolves a surrogate factory name.
    ///
    /// `sStudentTProcessJef` is accepted as a synonym of
    /// `sStudentTProcessNIG`, as in the original factory.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sGaussianProcess" => Ok(Flavour::Gaussian),
            "sGaussianProcessML" => Ok(Flavour::GaussianMl),
            "sGaussianProcessNormal" => Ok(Flavour::GaussianNormal),
            "sStudentTProcessJef" | "sStudentTProcessNIG" => Ok(Flavour::StudentTNig),
            _ => Err(GpError::UnknownName(name.to_string())),
        }
    }
}

/// Normal-Inverse-Gamma prior hyperparameters for [`Flavour::StudentTNig`]
#[derive(Clone, Copy, Debug)]
pub struct NigPrior<F: Float> {
    /// Inverse-Gamma shape
    pub alpha: F,
    /// Inverse-Gamma scale
    pub beta: F,
    /// Coefficient prior scale: β|σ² ~ N(β₀, σ²δ²I)
    pub delta: F,
}

impl<F: Float> Default for NigPrior<F> {
    fn default() -> Self {
        NigPrior {
            alpha: F::one(),
            beta: F::one(),
            delta: F::cast(10.),
        }
    }
}

/// Scalar predictive distribution at a query point
#[derive(Clone, Copy, Debug)]
pub struct Prediction<F: Float> {
    /// Predictive mean
    pub mean: F,
    /// Predictive standard deviation (scale for Student-t)
    pub std: F,
    /// Degrees of freedom; `None` for the Gaussian flavours
    pub dof: Option<F>,
}

impl<F: Float> Prediction<F> {
    /// CDF of the standardized residual distribution at `z`
    pub fn standard_cdf(&self, z: f64) -> f64 {
        match self.dof {
            Some(dof) => {
                let dof = dof.to_f64().unwrap().max(1.0 + 1e-6);
                StudentsT::new(0., 1., dof).unwrap().cdf(z)
            }
            None => Normal::new(0., 1.).unwrap().cdf(z),
        }
    }

    /// PDF of the standardized residual distribution at `z`
    pub fn standard_pdf(&self, z: f64) -> f64 {
        match self.dof {
            Some(dof) => {
                let dof = dof.to_f64().unwrap().max(1.0 + 1e-6);
                StudentsT::new(0., 1., dof).unwrap().pdf(z)
            }
            None => Normal::new(0., 1.).unwrap().pdf(z),
        }
    }

    /// Quantile of the standardized residual distribution at probability `p`
    pub fn standard_quantile(&self, p: f64) -> f64 {
        let p = p.clamp(1e-12, 1. - 1e-12);
        match self.dof {
            Some(dof) => {
                let dof = dof.to_f64().unwrap().max(1.0 + 1e-6);
                StudentsT::new(0., 1., dof).unwrap().inverse_cdf(p)
            }
            None => Normal::new(0., 1.).unwrap().inverse_cdf(p),
        }
    }

    /// CDF of the predictive distribution at `y`
    pub fn cdf(&self, y: F) -> f64 {
        let z = ((y - self.mean) / self.std).to_f64().unwrap();
        self.standard_cdf(z)
    }

    /// PDF of the predictive distribution at `y`
    pub fn pdf(&self, y: F) -> f64 {
        let std = self.std.to_f64().unwrap();
        let z = ((y - self.mean) / self.std).to_f64().unwrap();
        self.standard_pdf(z) / std
    }
}

/// Flavour-specific sufficient statistics cached after `fit`/`update`
#[derive(Clone, Debug)]
struct PredictiveCache<F: Float> {
    /// Predictive-mean weights `K⁻¹(y − Φᵀβ*)`
    alpha: Array1<F>,
    /// Effective mean coefficients β*
    beta: Array1<F>,
    /// `Ft = L⁻¹Φᵀ`, shape (n, m)
    ft: Array2<F>,
    /// Cholesky of `A = FtᵀFt (+ prior precision)` for the GLS/posterior flavours
    a_chol: Option<CholeskyFactor<F>>,
    /// Predictive variance scale
    sigma2: F,
    /// Student-t degrees of freedom
    dof: Option<F>,
    /// Quadratic form retained for the likelihood
    quad: F,
}

/// A non-parametric process surrogate over a growing sample set
#[derive(Clone, Debug)]
pub struct Process<F: Float> {
    params: ProcessValidParams<F>,
    /// Kernel actually used (hyperparameters may differ from the configured
    /// ones after learning)
    kernel: Kernel<F>,
    mean: MeanFunction<F>,
    /// Sample inputs, one row per observation
    x: Array2<F>,
    /// Sample outputs
    y: Array1<F>,
    min_index: usize,
    max_index: usize,
    chol: CholeskyFactor<F>,
    cache: Option<PredictiveCache<F>>,
}

impl<F: Float> fmt::Display for Process<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Process(flavour={:?}, kernel={}, mean={}, n={})",
            self.params.flavour,
            self.kernel,
            self.mean,
            self.y.len()
        )
    }
}

impl<F: Float> Process<F> {
    /// Process parameters constructor
    pub fn params(kernel: Kernel<F>, mean: MeanFunction<F>) -> ProcessParams<F> {
        ProcessParams::new(kernel, mean)
    }

    /// Replaces the sample set with the given design. Invalidates the factor
    /// and the predictive cache until the next [`Process::fit`].
    pub fn set_samples(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(GpError::DimensionError(format!(
                "{} input rows for {} outputs",
                x.nrows(),
                y.len()
            )));
        }
        if x.ncols() != self.mean.dim() {
            return Err(GpError::DimensionError(format!(
                "expected {}-dimensional samples, got {}",
                self.mean.dim(),
                x.ncols()
            )));
        }
        self.x = x.to_owned();
        self.y = y.to_owned();
        self.min_index = 0;
        self.max_index = 0;
        for i in 0..self.y.len() {
            self.track_bounds(i);
        }
        self.cache = None;
        Ok(())
    }

    /// Appends one observation without touching the factor; used while
    /// assembling an initial design. [`Process::update`] is the incremental
    /// variant for use inside the optimization loop.
    pub fn add_sample(&mut self, x: &ArrayBase<impl Data<Elem = F>, Ix1>, y: F) -> Result<()> {
        if x.len() != self.x.ncols() {
            return Err(GpError::DimensionError(format!(
                "expected {}-dimensional sample, got {}",
                self.x.ncols(),
                x.len()
            )));
        }
        let row = x.to_owned().insert_axis(Axis(0));
        self.x = concatenate![Axis(0), self.x.view(), row.view()];
        self.y = concatenate![Axis(0), self.y.view(), ndarray::arr1(&[y]).view()];
        self.track_bounds(self.y.len() - 1);
        self.cache = None;
        Ok(())
    }

    fn track_bounds(&mut self, index: usize) {
        if self.y[index] < self.y[self.min_index] {
            self.min_index = index;
        }
        if self.y[index] > self.y[self.max_index] {
            self.max_index = index;
        }
    }

    /// Recomputes the Cholesky factor from scratch and refreshes the
    /// predictive cache.
    ///
    /// Required after [`Process::set_samples`] or a hyperparameter change;
    /// fails when the regularized correlation matrix is not
    /// positive-definite.
    pub fn fit(&mut self) -> Result<()> {
        let n = self.y.len();
        if n == 0 {
            return Err(GpError::InvalidValueError(
                "cannot fit on an empty sample set".to_string(),
            ));
        }
        let k = self.kernel.corr_matrix(&self.x, self.params.noise);
        let capacity = n + self.params.reserve;
        self.chol = CholeskyFactor::decompose(&k, capacity)?;
        self.precompute()
    }

    /// Appends one observation, extends the factor by a rank-1 append and
    /// refreshes the predictive cache.
    ///
    /// A single append failure triggers a full refactor; if that fails too
    /// the error surfaces as [`GpError::NumericalInstability`].
    pub fn update(&mut self, x: &ArrayBase<impl Data<Elem = F>, Ix1>, y: F) -> Result<()> {
        let kx = self.kernel.cross_correlations(&self.x, x);
        let kss = self.kernel.value(x, x) + self.params.noise;
        self.add_sample(x, y)?;
        match self.chol.append(&kx, kss) {
            Ok(()) => self.precompute(),
            Err(err) => {
                warn!("Cholesky extension failed ({err}), trying a full refactor");
                self.fit().map_err(|e| {
                    GpError::NumericalInstability(format!(
                        "rank-1 append and refactor both failed: {e}"
                    ))
                })
            }
        }
    }

    /// Predictive distribution at a query point.
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Prediction<F>> {
        let cache = self.cache()?;
        let kx = self.kernel.cross_correlations(&self.x, x);
        let kss = self.kernel.value(x, x);
        let phi = self.mean.features(x);

        let mean = phi.dot(&cache.beta) + kx.dot(&cache.alpha);
        let v = self.chol.solve_lower(&kx);
        let mut var = kss - v.dot(&v);
        if let Some(a_chol) = &cache.a_chol {
            let u = &phi - &cache.ft.t().dot(&v);
            let w = a_chol.solve_lower(&u);
            var = var + w.dot(&w);
        }
        var = var * cache.sigma2;
        if !var.is_finite() || !mean.is_finite() {
            return Err(GpError::NumericalInstability(format!(
                "non-finite prediction at {x:?}"
            )));
        }
        // tiny negative values happen at machine precision
        if var < F::zero() {
            var = F::zero();
        }
        Ok(Prediction {
            mean,
            std: var.sqrt(),
            dof: cache.dof,
        })
    }

    /// Predictive means and standard deviations over the rows of `x`.
    pub fn predict_all(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let mut means = Array1::zeros(x.nrows());
        let mut stds = Array1::zeros(x.nrows());
        for (i, row) in x.rows().into_iter().enumerate() {
            let p = self.predict(&row)?;
            means[i] = p.mean;
            stds[i] = p.std;
        }
        Ok((means, stds))
    }

    fn cache(&self) -> Result<&PredictiveCache<F>> {
        self.cache.as_ref().ok_or_else(|| {
            GpError::InvalidValueError("process must be fitted before prediction".to_string())
        })
    }

    fn precompute(&mut self) -> Result<()> {
        let n = self.y.len();
        let m = self.mean.n_features();
        let phi = self.mean.features_all(&self.x);
        let ft = self.chol.solve_lower_mat(&phi.t());
        let yt = self.chol.solve_lower(&self.y);

        let cache = match self.params.flavour {
            Flavour::Gaussian => {
                let beta = self.mean.coefficients().to_owned();
                let resid_t = &yt - &ft.dot(&beta);
                let quad = resid_t.dot(&resid_t);
                PredictiveCache {
                    alpha: self.chol.solve_upper(&resid_t),
                    beta,
                    ft,
                    a_chol: None,
                    sigma2: self.params.sigma2,
                    dof: None,
                    quad,
                }
            }
            Flavour::GaussianMl => {
                let a = ft.t().dot(&ft);
                let a_chol = CholeskyFactor::decompose(&a, m).map_err(|_| {
                    GpError::LikelihoodComputationError(
                        "singular feature matrix in generalized least squares".to_string(),
                    )
                })?;
                let beta = a_chol.solve(&ft.t().dot(&yt));
                let resid_t = &yt - &ft.dot(&beta);
                let quad = resid_t.dot(&resid_t);
                PredictiveCache {
                    alpha: self.chol.solve_upper(&resid_t),
                    beta,
                    ft,
                    a_chol: Some(a_chol),
                    sigma2: quad / F::cast(n),
                    dof: None,
                    quad,
                }
            }
            Flavour::GaussianNormal => {
                let beta0 = self.mean.coefficients();
                let prior_std = &self.params.coef_prior_std;
                let mut a = ft.t().dot(&ft);
                let mut b = ft.t().dot(&yt);
                let mut prior_quad = F::zero();
                for i in 0..m {
                    let prec = F::one() / (prior_std[i] * prior_std[i]);
                    a[[i, i]] = a[[i, i]] + prec;
                    b[i] = b[i] + prec * beta0[i];
                    prior_quad = prior_quad + beta0[i] * beta0[i] * prec;
                }
                let a_chol = CholeskyFactor::decompose(&a, m)?;
                let beta = a_chol.solve(&b);
                let quad = yt.dot(&yt) + prior_quad - beta.dot(&b);
                let resid_t = &yt - &ft.dot(&beta);
                PredictiveCache {
                    alpha: self.chol.solve_upper(&resid_t),
                    beta,
                    ft,
                    a_chol: Some(a_chol),
                    sigma2: self.params.sigma2,
                    dof: None,
                    quad,
                }
            }
            Flavour::StudentTNig => {
                let nig = self.params.nig;
                let beta0 = self.mean.coefficients();
                let prec = F::one() / (nig.delta * nig.delta);
                let mut a = ft.t().dot(&ft);
                let mut b = ft.t().dot(&yt);
                let mut prior_quad = F::zero();
                for i in 0..m {
                    a[[i, i]] = a[[i, i]] + prec;
                    b[i] = b[i] + prec * beta0[i];
                    prior_quad = prior_quad + beta0[i] * beta0[i] * prec;
                }
                let a_chol = CholeskyFactor::decompose(&a, m)?;
                let beta = a_chol.solve(&b);
                let quad = (yt.dot(&yt) + prior_quad - beta.dot(&b)).max(F::cast(1e-300));
                let alpha_n = (nig.alpha + F::cast(0.5) * F::cast(n as f64 - m as f64))
                    .max(F::cast(0.5));
                let dof = alpha_n + alpha_n;
                if dof <= F::cast(2.) {
                    debug!("Student-t dof {dof:?} <= 2: predictive variance is heavy-tailed");
                }
                let beta_n = nig.beta + quad / F::cast(2.);
                let resid_t = &yt - &ft.dot(&beta);
                PredictiveCache {
                    alpha: self.chol.solve_upper(&resid_t),
                    beta,
                    ft,
                    a_chol: Some(a_chol),
                    sigma2: beta_n / alpha_n,
                    dof: Some(dof),
                    quad,
                }
            }
        };
        self.cache = Some(cache);
        Ok(())
    }

    /// Negative marginal log-likelihood of the observations under the current
    /// hyperparameters (flavour-specific, see module documentation).
    pub fn neg_log_likelihood(&self) -> Result<F> {
        let cache = self.cache()?;
        let n = F::cast(self.y.len());
        let m = self.mean.n_features();
        let log_det = self.chol.log_det();
        let half = F::cast(0.5);
        let ln_2pi = F::cast(LN_2PI);

        let nll = match self.params.flavour {
            Flavour::Gaussian => {
                let s2 = self.params.sigma2;
                half * cache.quad / s2 + half * (log_det + n * s2.ln()) + half * n * ln_2pi
            }
            Flavour::GaussianMl => {
                let s2 = cache.sigma2.max(F::cast(1e-300));
                half * n * s2.ln() + half * log_det + half * n * (F::one() + ln_2pi)
            }
            Flavour::GaussianNormal => {
                let s2 = self.params.sigma2;
                let mut log_prior_det = F::zero();
                for s in self.params.coef_prior_std.iter() {
                    log_prior_det = log_prior_det + (*s * *s).ln();
                }
                let log_a_det = cache
                    .a_chol
                    .as_ref()
                    .map(|c| c.log_det())
                    .unwrap_or(F::zero());
                half * cache.quad / s2
                    + half * (n * s2.ln() + log_det + log_prior_det + log_a_det)
                    + half * n * ln_2pi
            }
            Flavour::StudentTNig => {
                let nig = self.params.nig;
                let alpha_n = (nig.alpha + half * (n - F::cast(m))).max(F::cast(0.5));
                let beta_n = nig.beta + half * cache.quad;
                let log_delta_det = F::cast(m) * (nig.delta * nig.delta).ln();
                let log_a_det = cache
                    .a_chol
                    .as_ref()
                    .map(|c| c.log_det())
                    .unwrap_or(F::zero());
                let gammas = F::cast(
                    ln_gamma(nig.alpha.to_f64().unwrap()) - ln_gamma(alpha_n.to_f64().unwrap()),
                );
                half * (log_det + log_delta_det + log_a_det)
                    + alpha_n * beta_n.ln()
                    - nig.alpha * nig.beta.ln()
                    + gammas
                    + half * n * ln_2pi
            }
        };
        if !nll.is_finite() {
            return Err(GpError::LikelihoodComputationError(format!(
                "non-finite likelihood ({nll:?})"
            )));
        }
        Ok(nll)
    }

    /// Negative leave-one-out predictive log density, computed in closed form
    /// from the Cholesky factor (Sundararajan–Keerthi identities).
    pub fn loo_neg_log_likelihood(&self) -> Result<F> {
        let cache = self.cache()?;
        let kinv_diag = self.chol.inverse_diagonal();
        let half = F::cast(0.5);
        let ln_2pi = F::cast(LN_2PI);
        let mut nll = F::zero();
        for i in 0..self.y.len() {
            let kinv_ii = kinv_diag[i].max(F::cast(1e-300));
            let sigma2_i = F::one() / kinv_ii;
            let alpha_i = cache.alpha[i];
            nll = nll + half * (sigma2_i.ln() + ln_2pi) + half * alpha_i * alpha_i / kinv_ii;
        }
        if !nll.is_finite() {
            return Err(GpError::LikelihoodComputationError(
                "non-finite leave-one-out score".to_string(),
            ));
        }
        Ok(nll)
    }

    /// Log density of the kernel hyperparameters under their log-normal
    /// priors. Hyperparameters with zero prior std are treated as point
    /// estimates and contribute nothing.
    pub fn kernel_log_prior(&self) -> F {
        let theta = self.kernel.params();
        let mean = &self.params.hp_prior_mean;
        let std = &self.params.hp_prior_std;
        let half = F::cast(0.5);
        let ln_2pi = F::cast(LN_2PI);
        let mut acc = F::zero();
        for i in 0..theta.len() {
            if std[i] > F::zero() && theta[i] > F::zero() && mean[i] > F::zero() {
                let z = (theta[i].ln() - mean[i].ln()) / std[i];
                acc = acc - theta[i].ln() - std[i].ln() - half * ln_2pi - half * z * z;
            }
        }
        acc
    }

    /// Flat hyperparameter vector: kernel hyperparameters followed by the
    /// tunable mean coefficients.
    pub fn hyperparameters(&self) -> Array1<F> {
        let theta = self.kernel.params();
        if self.mean.n_tunable() == 0 {
            theta
        } else {
            concatenate![Axis(0), theta, self.mean.coefficients().view()]
        }
    }

    /// Installs a flat hyperparameter vector produced by
    /// [`Process::hyperparameters`]. The factor is stale afterwards; call
    /// [`Process::fit`].
    pub fn set_hyperparameters(&mut self, v: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        let nk = self.kernel.n_params();
        let expected = nk + self.mean.n_tunable();
        if v.len() != expected {
            return Err(GpError::DimensionError(format!(
                "expected {} hyperparameters, got {}",
                expected,
                v.len()
            )));
        }
        self.kernel.set_params(&v.slice(ndarray::s![..nk]))?;
        if self.mean.n_tunable() > 0 {
            self.mean.set_coefficients(&v.slice(ndarray::s![nk..]))?;
        }
        self.cache = None;
        Ok(())
    }

    /// Kernel hyperparameters only
    pub fn kernel_params(&self) -> Array1<F> {
        self.kernel.params()
    }

    /// Sets kernel hyperparameters only; the factor is stale afterwards.
    pub fn set_kernel_params(&mut self, theta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        self.kernel.set_params(theta)?;
        self.cache = None;
        Ok(())
    }

    /// The kernel in use
    pub fn kernel(&self) -> &Kernel<F> {
        &self.kernel
    }

    /// The mean function in use
    pub fn mean(&self) -> &MeanFunction<F> {
        &self.mean
    }

    /// The parameters this process was built from
    pub fn valid_params(&self) -> &ProcessValidParams<F> {
        &self.params
    }

    /// Number of observations
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    /// Sample inputs as a (n, d) matrix
    pub fn sample_inputs(&self) -> &Array2<F> {
        &self.x
    }

    /// Sample outputs
    pub fn sample_outputs(&self) -> &Array1<F> {
        &self.y
    }

    /// Smallest observed output and its insertion index
    pub fn y_min(&self) -> (F, usize) {
        (self.y[self.min_index], self.min_index)
    }

    /// Largest observed output and its insertion index
    pub fn y_max(&self) -> (F, usize) {
        (self.y[self.max_index], self.max_index)
    }

    /// Active Cholesky factor (for invariant checks and diagnostics)
    pub fn cholesky(&self) -> &CholeskyFactor<F> {
        &self.chol
    }
}

/// A set of validated process parameters.
#[derive(Clone, Debug)]
pub struct ProcessValidParams<F: Float> {
    pub(crate) kernel: Kernel<F>,
    pub(crate) mean: MeanFunction<F>,
    pub(crate) flavour: Flavour,
    /// Nugget σ²_n added to the correlation diagonal
    pub(crate) noise: F,
    /// Fixed process variance for the Gaussian and GaussianNormal flavours
    pub(crate) sigma2: F,
    /// Log-normal prior means over kernel hyperparameters
    pub(crate) hp_prior_mean: Array1<F>,
    /// Log-normal prior stds over kernel hyperparameters (0 = point estimate)
    pub(crate) hp_prior_std: Array1<F>,
    /// Prior std on each mean coefficient (GaussianNormal)
    pub(crate) coef_prior_std: Array1<F>,
    pub(crate) nig: NigPrior<F>,
    /// Extra factor capacity reserved for future updates
    pub(crate) reserve: usize,
}

impl<F: Float> ProcessValidParams<F> {
    /// Nugget value
    pub fn noise(&self) -> F {
        self.noise
    }

    /// Flavour of the process
    pub fn flavour(&self) -> Flavour {
        self.flavour
    }

    /// Log-normal prior (means, stds) over kernel hyperparameters
    pub fn hp_prior(&self) -> (&Array1<F>, &Array1<F>) {
        (&self.hp_prior_mean, &self.hp_prior_std)
    }
}

/// Builder for [`Process`] parameters.
#[derive(Clone, Debug)]
pub struct ProcessParams<F: Float>(ProcessValidParams<F>);

impl<F: Float> ProcessParams<F> {
    /// A constructor given kernel and mean models
    pub fn new(kernel: Kernel<F>, mean: MeanFunction<F>) -> Self {
        let n_hp = kernel.n_params();
        let theta = kernel.params();
        let m = mean.n_features();
        ProcessParams(ProcessValidParams {
            kernel,
            mean,
            flavour: Flavour::GaussianMl,
            noise: F::cast(1e-10),
            sigma2: F::one(),
            hp_prior_mean: theta,
            hp_prior_std: Array1::zeros(n_hp),
            coef_prior_std: Array1::ones(m),
            nig: NigPrior::default(),
            reserve: 0,
        })
    }

    /// Sets the flavour
    pub fn flavour(mut self, flavour: Flavour) -> Self {
        self.0.flavour = flavour;
        self
    }

    /// Sets the nugget σ²_n added to the correlation diagonal
    pub fn noise(mut self, noise: F) -> Self {
        self.0.noise = noise;
        self
    }

    /// Sets the fixed process variance
    pub fn sigma2(mut self, sigma2: F) -> Self {
        self.0.sigma2 = sigma2;
        self
    }

    /// Sets the log-normal prior over kernel hyperparameters; also installs
    /// the prior means as the kernel starting point.
    pub fn hp_prior(mut self, mean: Array1<F>, std: Array1<F>) -> Self {
        self.0.hp_prior_mean = mean;
        self.0.hp_prior_std = std;
        self
    }

    /// Sets the prior std on the mean coefficients
    pub fn coef_prior_std(mut self, std: Array1<F>) -> Self {
        self.0.coef_prior_std = std;
        self
    }

    /// Sets the Normal-Inverse-Gamma prior
    pub fn nig(mut self, nig: NigPrior<F>) -> Self {
        self.0.nig = nig;
        self
    }

    /// Reserves factor capacity for that many future updates
    pub fn reserve(mut self, reserve: usize) -> Self {
        self.0.reserve = reserve;
        self
    }
}

impl<F: Float> ParamGuard for ProcessParams<F> {
    type Checked = ProcessValidParams<F>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let p = &self.0;
        let n_hp = p.kernel.n_params();
        if p.hp_prior_mean.len() != n_hp || p.hp_prior_std.len() != n_hp {
            return Err(GpError::InvalidValueError(format!(
                "kernel {} has {} hyperparameters but prior has ({}, {})",
                p.kernel,
                n_hp,
                p.hp_prior_mean.len(),
                p.hp_prior_std.len()
            )));
        }
        if p.coef_prior_std.len() != p.mean.n_features() {
            return Err(GpError::InvalidValueError(format!(
                "mean {} has {} coefficients but prior std has {}",
                p.mean,
                p.mean.n_features(),
                p.coef_prior_std.len()
            )));
        }
        if p.noise < F::zero() {
            return Err(GpError::InvalidValueError(
                "noise must be non-negative".to_string(),
            ));
        }
        if p.sigma2 <= F::zero() {
            return Err(GpError::InvalidValueError(
                "process variance must be positive".to_string(),
            ));
        }
        if p.nig.alpha <= F::zero() || p.nig.beta <= F::zero() || p.nig.delta <= F::zero() {
            return Err(GpError::InvalidValueError(
                "NIG prior hyperparameters must be positive".to_string(),
            ));
        }
        Ok(p)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl<F: Float, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError>
    for ProcessValidParams<F>
{
    type Object = Process<F>;

    /// Fits the process on an initial design: installs the prior kernel
    /// hyperparameters, factorizes and caches the predictive statistics.
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let mut kernel = self.kernel.clone();
        kernel.set_params(&self.hp_prior_mean)?;
        let mut process = Process {
            params: self.clone(),
            kernel,
            mean: self.mean.clone(),
            x: Array2::zeros((0, self.mean.dim())),
            y: Array1::zeros(0),
            min_index: 0,
            max_index: 0,
            chol: CholeskyFactor::with_capacity(1),
            cache: None,
        };
        process.set_samples(dataset.records(), dataset.targets())?;
        process.fit()?;
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::MaternOrder;
    use crate::la::lower_triangle_product;
    use crate::means::MeanKind;
    use approx::assert_abs_diff_eq;
    use linfa::Dataset;
    use ndarray::array;

    fn toy_process(flavour: Flavour, noise: f64) -> Process<f64> {
        let kernel = Kernel::SqExpIso { theta: 0.3 };
        let mean = MeanFunction::new(MeanKind::Constant, 1);
        let xt = array![[0.0], [0.25], [0.5], [0.75], [1.0]];
        let yt = array![0.0, 0.8, 1.0, 0.3, -0.5];
        Process::params(kernel, mean)
            .flavour(flavour)
            .noise(noise)
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .unwrap()
    }

    #[test]
    fn test_interpolation_zero_nugget() {
        for flavour in [
            Flavour::Gaussian,
            Flavour::GaussianMl,
            Flavour::GaussianNormal,
            Flavour::StudentTNig,
        ] {
            let process = toy_process(flavour, 0.);
            // predictive mean at a training point equals the observation
            let p = process.predict(&array![0.25]).unwrap();
            assert_abs_diff_eq!(p.mean, 0.8, epsilon = 1e-6);
            assert!(p.std < 1e-4, "flavour {flavour:?}: std {} at sample", p.std);
        }
    }

    #[test]
    fn test_variance_positive_everywhere() {
        let process = toy_process(Flavour::GaussianMl, 1e-10);
        for i in 0..50 {
            let x = array![i as f64 / 49.];
            let p = process.predict(&x).unwrap();
            assert!(p.std >= 0.);
            assert!(p.std.is_finite());
        }
    }

    #[test]
    fn test_factor_reconstruction_invariant() {
        let mut process = toy_process(Flavour::GaussianMl, 1e-8);
        process.update(&array![0.6], 0.7).unwrap();
        process.update(&array![0.1], 0.4).unwrap();
        let k = process
            .kernel()
            .corr_matrix(process.sample_inputs(), process.valid_params().noise());
        let rebuilt = lower_triangle_product(&process.cholesky().view());
        let norm: f64 = k.iter().map(|v| v * v).sum::<f64>().sqrt();
        let err: f64 = (&rebuilt - &k).iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(err <= 1e-9 * norm, "reconstruction error {err} vs {norm}");
    }

    #[test]
    fn test_update_matches_full_fit() {
        let mut incremental = toy_process(Flavour::GaussianMl, 1e-8);
        incremental.update(&array![0.6], 0.7).unwrap();

        let kernel = Kernel::SqExpIso { theta: 0.3 };
        let mean = MeanFunction::new(MeanKind::Constant, 1);
        let xt = array![[0.0], [0.25], [0.5], [0.75], [1.0], [0.6]];
        let yt = array![0.0, 0.8, 1.0, 0.3, -0.5, 0.7];
        let full = Process::params(kernel, mean)
            .flavour(Flavour::GaussianMl)
            .noise(1e-8)
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .unwrap();

        // rank-1 growth and full refactor agree bit for bit
        assert_eq!(incremental.cholesky().view(), full.cholesky().view());
        let p1 = incremental.predict(&array![0.33]).unwrap();
        let p2 = full.predict(&array![0.33]).unwrap();
        assert_eq!(p1.mean.to_bits(), p2.mean.to_bits());
        assert_eq!(p1.std.to_bits(), p2.std.to_bits());
    }

    #[test]
    fn test_duplicate_sample_zero_nugget_fails() {
        let mut process = toy_process(Flavour::GaussianMl, 0.);
        let res = process.update(&array![0.25], 0.8);
        assert!(matches!(res, Err(GpError::NumericalInstability(_))));
    }

    #[test]
    fn test_duplicate_sample_with_nugget_succeeds() {
        let mut process = toy_process(Flavour::GaussianMl, 1e-8);
        process.update(&array![0.25], 0.8).unwrap();
        let p = process.predict(&array![0.25]).unwrap();
        // residual uncertainty at a duplicated input is of the nugget's order
        assert!(p.std * p.std < 1e-6);
    }

    #[test]
    fn test_student_t_dof() {
        let process = toy_process(Flavour::StudentTNig, 1e-10);
        let p = process.predict(&array![0.4]).unwrap();
        // n = 5, m = 1, alpha = 1 => dof = 5 - 1 + 2
        assert_abs_diff_eq!(p.dof.unwrap(), 6.0);
        assert!(p.cdf(p.mean) > 0.49 && p.cdf(p.mean) < 0.51);
    }

    #[test]
    fn test_neg_log_likelihood_finite_and_sensitive() {
        let process = toy_process(Flavour::GaussianMl, 1e-10);
        let nll0 = process.neg_log_likelihood().unwrap();
        let mut other = process.clone();
        other.set_kernel_params(&array![3.0]).unwrap();
        other.fit().unwrap();
        let nll1 = other.neg_log_likelihood().unwrap();
        assert!(nll0.is_finite() && nll1.is_finite());
        assert!((nll0 - nll1).abs() > 1e-8);
    }

    #[test]
    fn test_loo_score_finite() {
        for flavour in [Flavour::Gaussian, Flavour::GaussianMl, Flavour::StudentTNig] {
            let process = toy_process(flavour, 1e-10);
            assert!(process.loo_neg_log_likelihood().unwrap().is_finite());
        }
    }

    #[test]
    fn test_kernel_log_prior() {
        let kernel = Kernel::SqExpIso { theta: 1.0 };
        let mean = MeanFunction::new(MeanKind::Zero, 1);
        let xt = array![[0.0], [0.5], [1.0]];
        let yt = array![0.0, 1.0, 0.5];
        let process = Process::params(kernel, mean)
            .flavour(Flavour::Gaussian)
            .hp_prior(array![1.0], array![1.0])
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .unwrap();
        // at theta = prior mean the log-normal density is -ln(theta sigma sqrt(2 pi))
        let expected = -(1.0f64.ln() + 1.0f64.ln() + 0.5 * LN_2PI);
        assert_abs_diff_eq!(process.kernel_log_prior(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_rosenbrock_regression() {
        use argmin_testfunctions::rosenbrock;
        use ndarray_rand::rand::SeedableRng;
        use rand_xoshiro::Xoshiro256Plus;
        use smbo_doe::{Lhs, SamplingMethod};

        let xlimits = array![[-1.5, 1.5], [-1.5, 1.5]];
        let xt = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .sample(40);
        let yt = Array1::from_iter(xt.rows().into_iter().map(|r| rosenbrock(&[r[0], r[1]])));

        let kernel = Kernel::SqExpArd {
            theta: array![2.0, 2.0],
        };
        let mean = MeanFunction::new(MeanKind::Constant, 2);
        let process = Process::params(kernel, mean)
            .flavour(Flavour::GaussianMl)
            .noise(1e-8)
            .check()
            .unwrap()
            .fit(&Dataset::new(xt, yt))
            .unwrap();

        // interpolation is exact at training points and sane nearby
        let p = process.predict(&array![0.5, 0.5]).unwrap();
        let truth: f64 = rosenbrock(&[0.5, 0.5]);
        assert!(
            (p.mean - truth).abs() < 3. * p.std + 10.,
            "predicted {} ± {} vs {}",
            p.mean,
            p.std,
            truth
        );
    }

    #[test]
    fn test_bounds_tracking() {
        let mut process = toy_process(Flavour::GaussianMl, 1e-10);
        assert_abs_diff_eq!(process.y_min().0, -0.5);
        assert_abs_diff_eq!(process.y_max().0, 1.0);
        process.update(&array![0.9], -2.0).unwrap();
        let (ymin, idx) = process.y_min();
        assert_abs_diff_eq!(ymin, -2.0);
        assert_eq!(idx, 5);
    }

    #[test]
    fn test_dimension_mismatch() {
        let kernel = Kernel::SqExpIso { theta: 1.0 };
        let mean = MeanFunction::new(MeanKind::Constant, 2);
        let res = Process::params(kernel, mean)
            .check()
            .unwrap()
            .fit(&Dataset::new(array![[0.0], [1.0]], array![0.0, 1.0]));
        assert!(res.is_err());
    }

    #[test]
    fn test_hyperparameter_mismatch_rejected() {
        let kernel = Kernel::MaternArd {
            order: MaternOrder::Five,
            theta: array![1.0, 1.0],
        };
        let mean = MeanFunction::new(MeanKind::Zero, 2);
        let res = Process::params(kernel, mean)
            .hp_prior(array![1.0], array![0.0])
            .check();
        assert!(res.is_err());
    }
}
