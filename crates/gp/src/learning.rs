//! Hyperparameter learning for the process.
//!
//! Three families are supported, selectable per run:
//! * **Fixed**: hyperparameters are set once and never touched.
//! * **Empirical** ([`LearningMode::Ml`], [`LearningMode::Map`],
//!   [`LearningMode::Loo`]): the selected score is minimised in log-θ space
//!   by a seeded multistart of COBYLA runs.
//! * **MCMC** ([`LearningMode::Mcmc`]): a step-out slice sampler draws a
//!   small ensemble of hyperparameter vectors from the posterior; the caller
//!   integrates criterion evaluations over the ensemble.

use crate::errors::{GpError, Result};
use crate::process::Process;

use cobyla::{minimize, Func, RhoBeg, StopTols};
use linfa::Float;
use log::{debug, info};
use ndarray::{concatenate, Array1, Array2, Axis};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use smbo_doe::{Lhs, SamplingMethod};

/// Default multistart count for empirical learning
pub const LEARN_N_START: usize = 8;
/// Default score evaluation budget of one COBYLA run
pub const LEARN_MAX_EVAL: usize = 100;
/// Default bounds on a kernel hyperparameter during learning
pub const LEARN_THETA_BOUNDS: (f64, f64) = (1e-4, 1e3);
/// Default bounds on a mean coefficient during learning
pub const LEARN_COEF_BOUNDS: (f64, f64) = (-1e3, 1e3);

/// Hyperparameter learning mode (the `sc_type` of the configuration)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LearningMode {
    /// No learning, hyperparameters stay at their configured values
    Fixed,
    /// Maximum likelihood
    Ml,
    /// Maximum a posteriori under the kernel log-normal priors
    Map,
    /// Leave-one-out cross-validated predictive density
    Loo,
    /// Slice sampling of the hyperparameter posterior
    Mcmc,
}

impl LearningMode {
    /// Resolves a learning mode name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "fixed" | "L_FIXED" => Ok(LearningMode::Fixed),
            "ml" | "L_ML" => Ok(LearningMode::Ml),
            "map" | "L_MAP" => Ok(LearningMode::Map),
            "loo" | "L_LOO" => Ok(LearningMode::Loo),
            "mcmc" | "L_MCMC" => Ok(LearningMode::Mcmc),
            _ => Err(GpError::UnknownName(name.to_string())),
        }
    }
}

/// Learner configuration
#[derive(Clone, Debug)]
pub struct LearnerConfig {
    /// Learning mode
    pub mode: LearningMode,
    /// Whether the tunable mean coefficients are learned along with the
    /// kernel hyperparameters (the `l_all` switch)
    pub include_mean: bool,
    /// Multistart count for empirical learning
    pub n_start: usize,
    /// Score evaluation budget per start
    pub max_eval: usize,
    /// Ensemble size for MCMC
    pub mcmc_samples: usize,
    /// Burn-in sweeps for MCMC
    pub mcmc_burn_in: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig {
            mode: LearningMode::Ml,
            include_mean: false,
            n_start: LEARN_N_START,
            max_eval: LEARN_MAX_EVAL,
            mcmc_samples: 10,
            mcmc_burn_in: 10,
        }
    }
}

/// Outcome of a learning pass
#[derive(Clone, Debug)]
pub enum Learned<F: Float> {
    /// Hyperparameters unchanged
    Unchanged,
    /// A single winning hyperparameter vector was installed and the process
    /// refitted
    Point(Array1<F>),
    /// A posterior ensemble of hyperparameter vectors; the last one is
    /// installed in the process
    Ensemble(Vec<Array1<F>>),
}

/// Evaluates the learning score for the process as currently fitted.
pub fn score<F: Float>(process: &Process<F>, mode: LearningMode) -> Result<F> {
    match mode {
        LearningMode::Fixed => Ok(F::zero()),
        LearningMode::Ml => process.neg_log_likelihood(),
        // the posterior also drives MCMC, where it is used as a log target
        LearningMode::Map | LearningMode::Mcmc => Ok(process.neg_log_likelihood()?
            - process.kernel_log_prior()),
        LearningMode::Loo => process.loo_neg_log_likelihood(),
    }
}

/// Runs one learning pass on the process, refitting it with the winning
/// hyperparameters. Draws on `rng` only, so runs are reproducible.
pub fn learn<F: Float>(
    process: &mut Process<F>,
    config: &LearnerConfig,
    rng: &mut Xoshiro256Plus,
) -> Result<Learned<F>> {
    match config.mode {
        LearningMode::Fixed => Ok(Learned::Unchanged),
        LearningMode::Ml | LearningMode::Map | LearningMode::Loo => {
            learn_empirical(process, config, rng)
        }
        LearningMode::Mcmc => {
            let samples = slice_sample_posterior(
                process,
                config.mcmc_samples,
                config.mcmc_burn_in,
                rng,
            )?;
            let last = samples
                .last()
                .ok_or_else(|| GpError::LearningError("empty posterior sample".to_string()))?;
            set_vector(process, last, config.include_mean)?;
            process.fit()?;
            Ok(Learned::Ensemble(samples))
        }
    }
}

/// Layout of the optimization vector: kernel hyperparameters in log space,
/// then (optionally) mean coefficients in linear space.
fn pack<F: Float>(process: &Process<F>, include_mean: bool) -> (Vec<f64>, Vec<(f64, f64)>) {
    let theta = process.kernel_params();
    let mut z: Vec<f64> = theta.iter().map(|t| t.to_f64().unwrap().ln()).collect();
    let mut bounds = vec![
        (LEARN_THETA_BOUNDS.0.ln(), LEARN_THETA_BOUNDS.1.ln());
        theta.len()
    ];
    if include_mean && process.mean().n_tunable() > 0 {
        for c in process.mean().coefficients().iter() {
            z.push(c.to_f64().unwrap());
            bounds.push(LEARN_COEF_BOUNDS);
        }
    }
    (z, bounds)
}

fn unpack<F: Float>(process: &Process<F>, z: &[f64], include_mean: bool) -> Array1<F> {
    let nk = process.kernel_params().len();
    let theta = Array1::from_iter(z[..nk].iter().map(|v| F::cast(v.exp())));
    if include_mean && process.mean().n_tunable() > 0 {
        let coefs = Array1::from_iter(z[nk..].iter().map(|v| F::cast(*v)));
        concatenate![Axis(0), theta, coefs]
    } else {
        theta
    }
}

fn set_vector<F: Float>(process: &mut Process<F>, v: &Array1<F>, include_mean: bool) -> Result<()> {
    if include_mean && process.mean().n_tunable() > 0 {
        process.set_hyperparameters(v)
    } else {
        process.set_kernel_params(v)
    }
}

fn evaluate<F: Float>(
    process: &Process<F>,
    z: &[f64],
    include_mean: bool,
    mode: LearningMode,
) -> f64 {
    if z.iter().any(|v| !v.is_finite()) {
        return f64::INFINITY;
    }
    let mut candidate = process.clone();
    let v = unpack(process, z, include_mean);
    if set_vector(&mut candidate, &v, include_mean).is_err() {
        return f64::INFINITY;
    }
    if candidate.fit().is_err() {
        return f64::INFINITY;
    }
    match score(&candidate, mode) {
        Ok(s) => s.to_f64().unwrap_or(f64::INFINITY),
        Err(_) => f64::INFINITY,
    }
}

fn learn_empirical<F: Float>(
    process: &mut Process<F>,
    config: &LearnerConfig,
    rng: &mut Xoshiro256Plus,
) -> Result<Learned<F>> {
    let include_mean = config.include_mean;
    let mode = config.mode;
    let (z0, bounds) = pack(process, include_mean);

    // multistart: current point first, then an LHS over the search box
    let mut starts: Vec<Vec<f64>> = vec![z0.clone()];
    if config.n_start > 1 {
        let mut xlimits = Array2::zeros((bounds.len(), 2));
        for (i, (lo, up)) in bounds.iter().enumerate() {
            xlimits[[i, 0]] = *lo;
            xlimits[[i, 1]] = *up;
        }
        let seeds = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(rng.gen()))
            .sample(config.n_start - 1);
        for row in seeds.rows() {
            starts.push(row.to_vec());
        }
    }

    let objfn = |z: &[f64], _user: &mut ()| evaluate(process, z, include_mean, mode);
    let cons: Vec<&dyn Func<()>> = vec![];

    let mut best: Option<(f64, Vec<f64>)> = None;
    for start in &starts {
        let res = minimize(
            objfn,
            start,
            &bounds,
            &cons,
            (),
            config.max_eval,
            RhoBeg::All(0.5),
            Some(StopTols {
                ftol_rel: 1e-4,
                ..StopTols::default()
            }),
        );
        let (z_opt, fval) = match res {
            Ok((_, z_opt, fval)) => (z_opt, fval),
            Err((status, z_opt, _)) => {
                debug!("COBYLA terminated with {status:?} during learning");
                (z_opt, f64::INFINITY)
            }
        };
        if fval.is_finite() && best.as_ref().map_or(true, |(bf, _)| fval < *bf) {
            best = Some((fval, z_opt));
        }
    }

    let (fbest, zbest) = best.ok_or_else(|| {
        GpError::LearningError("no feasible hyperparameters found by the optimizer".to_string())
    })?;
    let v = unpack(process, &zbest, include_mean);
    set_vector(process, &v, include_mean)?;
    process.fit()?;
    info!(
        "Learned hyperparameters {:?} (score {fbest:.6})",
        process.hyperparameters()
    );
    Ok(Learned::Point(v))
}

/// Draws `n_samples` hyperparameter vectors from the posterior
/// `p(θ|y) ∝ p(y|θ)·p(θ)` with a coordinate-wise step-out slice sampler
/// (Neal 2003) in log-θ space.
pub fn slice_sample_posterior<F: Float>(
    process: &Process<F>,
    n_samples: usize,
    burn_in: usize,
    rng: &mut Xoshiro256Plus,
) -> Result<Vec<Array1<F>>> {
    const STEP_WIDTH: f64 = 1.0;
    const MAX_STEP_OUT: usize = 20;
    const MAX_SHRINK: usize = 50;

    let log_target = |z: &[f64]| -> f64 { -evaluate(process, z, false, LearningMode::Map) };

    let (mut z, bounds) = pack(process, false);
    let mut logp = log_target(&z);
    if !logp.is_finite() {
        return Err(GpError::LearningError(
            "slice sampler started from a zero-density point".to_string(),
        ));
    }

    let mut samples = Vec::with_capacity(n_samples);
    for sweep in 0..(burn_in + n_samples) {
        for i in 0..z.len() {
            let level = logp + rng.gen::<f64>().ln();
            // step out around the current point
            let u: f64 = rng.gen();
            let mut lo = z[i] - STEP_WIDTH * u;
            let mut up = lo + STEP_WIDTH;
            let eval_at = |z: &[f64], i: usize, v: f64, f: &dyn Fn(&[f64]) -> f64| {
                let mut probe = z.to_vec();
                probe[i] = v;
                f(&probe)
            };
            let mut k = 0;
            while lo > bounds[i].0 && k < MAX_STEP_OUT && eval_at(&z, i, lo, &log_target) > level {
                lo -= STEP_WIDTH;
                k += 1;
            }
            k = 0;
            while up < bounds[i].1 && k < MAX_STEP_OUT && eval_at(&z, i, up, &log_target) > level {
                up += STEP_WIDTH;
                k += 1;
            }
            lo = lo.max(bounds[i].0);
            up = up.min(bounds[i].1);

            // shrink until a point inside the slice is found
            let mut accepted = false;
            for _ in 0..MAX_SHRINK {
                let candidate = lo + rng.gen::<f64>() * (up - lo);
                let cand_logp = eval_at(&z, i, candidate, &log_target);
                if cand_logp > level {
                    z[i] = candidate;
                    logp = cand_logp;
                    accepted = true;
                    break;
                }
                if candidate < z[i] {
                    lo = candidate;
                } else {
                    up = candidate;
                }
            }
            if !accepted {
                debug!("slice sampler kept coordinate {i} at sweep {sweep}");
            }
        }
        if sweep >= burn_in {
            samples.push(Array1::from_iter(z.iter().map(|v| F::cast(v.exp()))));
        }
    }
    Ok(samples)
}
