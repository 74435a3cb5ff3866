//! Optimizer configuration.
//!
//! [`BoParams`] is the builder, [`ValidBoParams`] the checked result. The
//! configuration is pure data (names and numbers); names are resolved into
//! kernels, means, flavours and criteria when the optimizer is constructed,
//! and every unknown name or count mismatch surfaces before any side effect.

use crate::criteria::CriterionSet;
use crate::errors::{BoError, Result};
use serde::{Deserialize, Serialize};
use smbo_gp::learning::LearningMode;
use smbo_gp::{Flavour, Kernel, MeanFunction};

/// Default iteration budget
pub const DEFAULT_N_ITERATIONS: usize = 190;
/// Default initial design size
pub const DEFAULT_N_INIT_SAMPLES: usize = 30;
/// Default inner optimizer evaluation budget (per criterion optimization)
pub const DEFAULT_INNER_MAX_EVAL: usize = 500;

/// Initial design generators
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMethod {
    /// Latin hypercube sampling
    #[default]
    LatinHypercube,
    /// Scrambled Sobol sequence
    Sobol,
    /// Uniform random sampling
    Uniform,
}

impl InitMethod {
    /// Resolves an initial design name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "lhs" | "LatinHypercube" => Ok(InitMethod::LatinHypercube),
            "sobol" | "Sobol" => Ok(InitMethod::Sobol),
            "uniform" | "Uniform" => Ok(InitMethod::Uniform),
            _ => Err(BoError::InvalidConfig(format!(
                "unknown initial design method {name:?}"
            ))),
        }
    }
}

/// Kernel configuration: expression and log-normal hyperparameter prior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Kernel expression, e.g. `kMaternISO3` or `kSEISO+kConst`
    pub name: String,
    /// Prior means of the hyperparameters (also the starting point)
    pub hp_mean: Vec<f64>,
    /// Prior stds of the hyperparameters; 0 means point estimate
    pub hp_std: Vec<f64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            name: "kMaternISO3".to_string(),
            hp_mean: vec![1.0],
            hp_std: vec![10.0],
        }
    }
}

/// Mean function configuration: name and Normal prior on the coefficients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeanConfig {
    /// Mean function name, e.g. `mConst`
    pub name: String,
    /// Prior means of the coefficients (also the fixed value for the
    /// non-learned flavours)
    pub coef_mean: Vec<f64>,
    /// Prior stds of the coefficients
    pub coef_std: Vec<f64>,
}

impl Default for MeanConfig {
    fn default() -> Self {
        MeanConfig {
            name: "mConst".to_string(),
            coef_mean: vec![1.0],
            coef_std: vec![1000.0],
        }
    }
}

/// Valid (checked) optimizer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidBoParams {
    /// Number of iterations after the initial design; each iteration is one
    /// objective evaluation
    pub(crate) n_iterations: usize,
    /// Initial design size
    pub(crate) n_init_samples: usize,
    /// Cadence of hyperparameter relearning; 0 means learn at start only
    pub(crate) n_iter_relearn: usize,
    /// Initial design generator
    pub(crate) init_method: InitMethod,
    /// RNG seed; `None` draws from entropy (non-reproducible)
    pub(crate) random_seed: Option<u64>,
    /// Verbosity knob, observability only
    pub(crate) verbose_level: u32,
    /// Log file name, observability only
    pub(crate) log_filename: Option<String>,
    /// Observation noise σ²_n added to the correlation diagonal
    pub(crate) noise: f64,
    /// Process variance of the fixed-variance flavours
    pub(crate) sigma_s: f64,
    /// Surrogate name (`sGaussianProcess`, `sGaussianProcessML`,
    /// `sGaussianProcessNormal`, `sStudentTProcessJef`, `sStudentTProcessNIG`)
    pub(crate) surr_name: String,
    /// Hyperparameter learning mode (`fixed`, `ml`, `map`, `loo`, `mcmc`)
    pub(crate) sc_type: String,
    /// Whether mean coefficients are relearned along with kernel
    /// hyperparameters
    pub(crate) l_all: bool,
    /// Optimization method for empirical learning: `empirical` (multistart)
    /// or `local` (single descent from the current hyperparameters)
    pub(crate) l_type: String,
    /// Kernel configuration
    pub(crate) kernel: KernelConfig,
    /// Mean configuration
    pub(crate) mean: MeanConfig,
    /// Criterion name; portfolios spelled `cHedge(cEI,cLCB,...)`
    pub(crate) crit_name: String,
    /// Per-criterion scalar parameters
    pub(crate) crit_params: Vec<f64>,
    /// NIG prior shape
    pub(crate) alpha: f64,
    /// NIG prior scale
    pub(crate) beta: f64,
    /// NIG coefficient prior scale
    pub(crate) delta: f64,
    /// Probability of a uniformly random exploration step
    pub(crate) epsilon: f64,
    /// Number of non-improving iterations before an unconditional random
    /// jump; also the retry budget for infeasible proposals. 0 disables.
    pub(crate) force_jump: usize,
    /// Inner optimizer evaluation budget
    pub(crate) n_inner_eval: usize,
}

impl Default for ValidBoParams {
    fn default() -> Self {
        ValidBoParams {
            n_iterations: DEFAULT_N_ITERATIONS,
            n_init_samples: DEFAULT_N_INIT_SAMPLES,
            n_iter_relearn: 50,
            init_method: InitMethod::LatinHypercube,
            random_seed: Some(0),
            verbose_level: 1,
            log_filename: None,
            noise: 1e-6,
            sigma_s: 1.0,
            surr_name: "sGaussianProcessML".to_string(),
            sc_type: "ml".to_string(),
            l_all: false,
            l_type: "empirical".to_string(),
            kernel: KernelConfig::default(),
            mean: MeanConfig::default(),
            crit_name: "cEI".to_string(),
            crit_params: vec![],
            alpha: 1.0,
            beta: 1.0,
            delta: 10.0,
            epsilon: 0.0,
            force_jump: 20,
            n_inner_eval: DEFAULT_INNER_MAX_EVAL,
        }
    }
}

impl ValidBoParams {
    /// Resolved surrogate flavour
    pub fn flavour(&self) -> Result<Flavour> {
        Ok(Flavour::from_name(&self.surr_name)?)
    }

    /// Resolved learning mode
    pub fn learning_mode(&self) -> Result<LearningMode> {
        Ok(LearningMode::from_name(&self.sc_type)?)
    }

    /// Multistart count for empirical learning, per `l_type`
    pub fn learn_n_start(&self) -> usize {
        match self.l_type.as_str() {
            "local" => 1,
            _ => smbo_gp::learning::LEARN_N_START,
        }
    }

    /// Builds the configured kernel for a `dim`-dimensional problem,
    /// checking the hyperparameter count.
    pub fn build_kernel(&self, dim: usize) -> Result<Kernel<f64>> {
        let mut kernel = Kernel::from_expr(&self.kernel.name, dim)
            .map_err(|e| BoError::InvalidConfig(e.to_string()))?;
        let n_hp = kernel.n_params();
        if self.kernel.hp_mean.len() != n_hp || self.kernel.hp_std.len() != n_hp {
            return Err(BoError::InvalidConfig(format!(
                "kernel {} expects {} hyperparameters, prior has ({}, {})",
                self.kernel.name,
                n_hp,
                self.kernel.hp_mean.len(),
                self.kernel.hp_std.len()
            )));
        }
        kernel
            .set_params(&ndarray::Array1::from_vec(self.kernel.hp_mean.clone()))
            .map_err(|e| BoError::InvalidConfig(e.to_string()))?;
        Ok(kernel)
    }

    /// Builds the configured mean function for a `dim`-dimensional problem,
    /// checking the coefficient count.
    pub fn build_mean(&self, dim: usize) -> Result<MeanFunction<f64>> {
        let mut mean = MeanFunction::from_name(&self.mean.name, dim)
            .map_err(|e| BoError::InvalidConfig(e.to_string()))?;
        let m = mean.n_features();
        if mean.n_tunable() > 0 {
            if self.mean.coef_mean.len() != m || self.mean.coef_std.len() != m {
                return Err(BoError::InvalidConfig(format!(
                    "mean {} expects {} coefficients, prior has ({}, {})",
                    self.mean.name,
                    m,
                    self.mean.coef_mean.len(),
                    self.mean.coef_std.len()
                )));
            }
            mean.set_coefficients(&ndarray::Array1::from_vec(self.mean.coef_mean.clone()))
                .map_err(|e| BoError::InvalidConfig(e.to_string()))?;
        }
        Ok(mean)
    }

    /// Builds the configured criterion set.
    pub fn build_criterion(&self) -> Result<CriterionSet> {
        CriterionSet::from_name(&self.crit_name, &self.crit_params)
    }

    // accessors used by the loops

    /// Iteration budget
    pub fn n_iterations(&self) -> usize {
        self.n_iterations
    }

    /// Initial design size
    pub fn n_init_samples(&self) -> usize {
        self.n_init_samples
    }

    /// Relearning cadence
    pub fn n_iter_relearn(&self) -> usize {
        self.n_iter_relearn
    }

    /// Nugget value
    pub fn noise(&self) -> f64 {
        self.noise
    }

    /// Random seed
    pub fn random_seed(&self) -> Option<u64> {
        self.random_seed
    }
}

/// Optimizer configuration builder
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BoParams(ValidBoParams);

impl BoParams {
    /// Sets the number of iterations (objective evaluations after the
    /// initial design)
    pub fn n_iterations(mut self, n: usize) -> Self {
        self.0.n_iterations = n;
        self
    }

    /// Sets the initial design size
    pub fn n_init_samples(mut self, n: usize) -> Self {
        self.0.n_init_samples = n;
        self
    }

    /// Sets the relearning cadence (0 learns at start only)
    pub fn n_iter_relearn(mut self, n: usize) -> Self {
        self.0.n_iter_relearn = n;
        self
    }

    /// Sets the initial design generator
    pub fn init_method(mut self, method: InitMethod) -> Self {
        self.0.init_method = method;
        self
    }

    /// Sets the RNG seed; `None` draws from entropy
    pub fn random_seed(mut self, seed: Option<u64>) -> Self {
        self.0.random_seed = seed;
        self
    }

    /// Sets the verbosity knob (observability only)
    pub fn verbose_level(mut self, level: u32) -> Self {
        self.0.verbose_level = level;
        self
    }

    /// Sets the log file name (observability only)
    pub fn log_filename(mut self, name: impl Into<String>) -> Self {
        self.0.log_filename = Some(name.into());
        self
    }

    /// Sets the observation noise (nugget)
    pub fn noise(mut self, noise: f64) -> Self {
        self.0.noise = noise;
        self
    }

    /// Sets the process variance of the fixed-variance flavours
    pub fn sigma_s(mut self, sigma_s: f64) -> Self {
        self.0.sigma_s = sigma_s;
        self
    }

    /// Sets the surrogate name
    pub fn surrogate(mut self, name: impl Into<String>) -> Self {
        self.0.surr_name = name.into();
        self
    }

    /// Sets the hyperparameter learning mode
    pub fn learning(mut self, sc_type: impl Into<String>) -> Self {
        self.0.sc_type = sc_type.into();
        self
    }

    /// Sets whether mean coefficients are relearned too
    pub fn learn_all(mut self, l_all: bool) -> Self {
        self.0.l_all = l_all;
        self
    }

    /// Sets the optimization method for empirical learning
    pub fn learning_method(mut self, l_type: impl Into<String>) -> Self {
        self.0.l_type = l_type.into();
        self
    }

    /// Sets the kernel configuration
    pub fn kernel(mut self, kernel: KernelConfig) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Sets the mean configuration
    pub fn mean(mut self, mean: MeanConfig) -> Self {
        self.0.mean = mean;
        self
    }

    /// Sets the criterion name (portfolios spelled `cHedge(cEI,cLCB,...)`)
    pub fn criterion(mut self, name: impl Into<String>) -> Self {
        self.0.crit_name = name.into();
        self
    }

    /// Sets the per-criterion scalar parameters
    pub fn crit_params(mut self, params: Vec<f64>) -> Self {
        self.0.crit_params = params;
        self
    }

    /// Sets the NIG prior hyperparameters
    pub fn nig_prior(mut self, alpha: f64, beta: f64, delta: f64) -> Self {
        self.0.alpha = alpha;
        self.0.beta = beta;
        self.0.delta = delta;
        self
    }

    /// Sets the ε-greedy exploration probability
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.0.epsilon = epsilon;
        self
    }

    /// Sets the stuck/retry budget before an unconditional random jump
    pub fn force_jump(mut self, force_jump: usize) -> Self {
        self.0.force_jump = force_jump;
        self
    }

    /// Sets the inner optimizer evaluation budget
    pub fn n_inner_eval(mut self, n: usize) -> Self {
        self.0.n_inner_eval = n;
        self
    }

    /// Checks and wraps the configuration.
    ///
    /// All name resolution errors surface here, before the optimizer touches
    /// anything.
    pub fn check(self) -> Result<ValidBoParams> {
        let config = self.0;
        if config.n_iterations == 0 {
            return Err(BoError::InvalidConfig(
                "n_iterations must be at least 1".to_string(),
            ));
        }
        if config.n_init_samples == 0 {
            return Err(BoError::InvalidConfig(
                "n_init_samples must be at least 1".to_string(),
            ));
        }
        if config.noise < 0.0 {
            return Err(BoError::InvalidConfig(
                "noise must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.epsilon) {
            return Err(BoError::InvalidConfig(
                "epsilon must lie in [0, 1]".to_string(),
            ));
        }
        if !matches!(config.l_type.as_str(), "empirical" | "local") {
            return Err(BoError::InvalidConfig(format!(
                "unknown learning method {:?}",
                config.l_type
            )));
        }
        config.flavour()?;
        config.learning_mode()?;
        config.build_criterion()?;
        // the kernel expression must parse; hyperparameter counts are checked
        // against the actual problem dimension at construction
        Kernel::<f64>::from_expr(&config.kernel.name, 1)
            .map_err(|e| BoError::InvalidConfig(e.to_string()))?;
        MeanFunction::<f64>::from_name(&config.mean.name, 1)
            .map_err(|e| BoError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_checks() {
        assert!(BoParams::default().check().is_ok());
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert!(BoParams::default().surrogate("sWishart").check().is_err());
        assert!(BoParams::default().criterion("cUCB?").check().is_err());
        assert!(BoParams::default()
            .kernel(KernelConfig {
                name: "kWavelet".to_string(),
                hp_mean: vec![1.],
                hp_std: vec![0.],
            })
            .check()
            .is_err());
        assert!(BoParams::default().learning("momentum").check().is_err());
    }

    #[test]
    fn test_bad_scalars_rejected() {
        assert!(BoParams::default().n_iterations(0).check().is_err());
        assert!(BoParams::default().noise(-1.).check().is_err());
        assert!(BoParams::default().epsilon(1.5).check().is_err());
    }

    #[test]
    fn test_hp_count_mismatch_rejected_at_build() {
        let config = BoParams::default()
            .kernel(KernelConfig {
                name: "kSEARD".to_string(),
                hp_mean: vec![1.0],
                hp_std: vec![0.0],
            })
            .check()
            .unwrap();
        // kSEARD over 3 dimensions needs 3 hyperparameters
        assert!(config.build_kernel(3).is_err());
        assert!(config.build_kernel(1).is_ok());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = BoParams::default()
            .n_iterations(50)
            .criterion("cHedge(cEI,cLCB)")
            .check()
            .unwrap();
        let text = serde_json::to_string(&config).unwrap();
        let back: ValidBoParams = serde_json::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
