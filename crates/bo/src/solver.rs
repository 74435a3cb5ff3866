//! The sequential optimization loop over a bounded continuous domain.
//!
//! [`BoundedOptimizer`] walks the state machine `Uninitialised →
//! Initialised → Running → Finished`: [`BoundedOptimizer::initialize_optimization`]
//! evaluates the initial design and fits the surrogate,
//! [`BoundedOptimizer::step_optimization`] performs one criterion-driven
//! evaluation, and the loop can halt, serialize itself with
//! [`BoundedOptimizer::save_optimization`] and resume bit-identically in a
//! fresh optimizer through [`BoundedOptimizer::restore_optimization`].
//!
//! Internally everything lives in the unit hypercube; user bounds are only
//! touched when the objective callback is invoked.

use crate::config::{InitMethod, ValidBoParams};
use crate::criteria::{CriterionCtx, CriterionSet, SingleCriterion};
use crate::errors::{BoError, Result};
use crate::optimizer::{in_unit_cube, InnerOptimizer};
use crate::state::{BoState, STATE_FORMAT_VERSION};

use linfa::prelude::*;
use linfa::ParamGuard;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256Plus;
use smbo_doe::{Lhs, Random, SamplingMethod, Sobol};
use smbo_gp::learning::{learn, Learned, LearnerConfig};
use smbo_gp::{NigPrior, Prediction, Process};
use std::cell::RefCell;

/// Two consecutive observations closer than this are considered equal when
/// tracking stagnation.
const STUCK_TOLERANCE: f64 = 1e-10;
/// Standard deviation of the perturbation applied to an unreachable proposal
const PERTURBATION_STD: f64 = 0.05;

/// The function under optimization.
///
/// The loop hands over points in the user bounds; errors propagate unchanged
/// and abort the run.
pub trait ObjectiveFunction {
    /// Evaluates the objective at `x`
    fn evaluate(&mut self, x: &ArrayView1<f64>) -> Result<f64>;

    /// Optional reachability predicate; an unreachable proposal is replaced
    /// by a perturbed or uniformly resampled one.
    fn check_reachability(&self, _x: &ArrayView1<f64>) -> bool {
        true
    }
}

/// Loop stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// No initial design yet
    Uninitialised,
    /// Initial design evaluated, surrogate fitted
    Initialised,
    /// At least one iteration performed
    Running,
    /// Iteration budget exhausted
    Finished,
}

/// Sequential Bayesian optimizer over a bounded continuous domain
pub struct BoundedOptimizer<O: ObjectiveFunction> {
    config: ValidBoParams,
    objective: O,
    /// User bounds as a (d, 2) matrix
    bounds: Array2<f64>,
    dim: usize,
    criterion: CriterionSet,
    inner: InnerOptimizer,
    process: Option<Process<f64>>,
    /// Posterior hyperparameter ensemble (MCMC learning only)
    ensemble: Vec<Process<f64>>,
    rng: Xoshiro256Plus,
    stage: Stage,
    current_iter: usize,
    counter_stuck: usize,
    y_prev: f64,
}

impl<O: ObjectiveFunction> BoundedOptimizer<O> {
    /// Builds an optimizer for `objective` over the user `bounds` given as a
    /// (d, 2) matrix of `[lower, upper]` rows.
    ///
    /// All configuration names are resolved here; nothing is evaluated yet.
    pub fn new(
        config: ValidBoParams,
        bounds: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        objective: O,
    ) -> Result<Self> {
        if bounds.ncols() != 2 {
            return Err(BoError::InvalidConfig(
                "bounds must be a (d, 2) matrix of [lower, upper] rows".to_string(),
            ));
        }
        let dim = bounds.nrows();
        if dim == 0 {
            return Err(BoError::InvalidConfig("empty input space".to_string()));
        }
        for row in bounds.rows() {
            if !(row[0] < row[1]) {
                return Err(BoError::InvalidConfig(format!(
                    "invalid bound interval [{}, {}]",
                    row[0], row[1]
                )));
            }
        }
        // resolve every configured name now, before any side effect
        config.build_kernel(dim)?;
        config.build_mean(dim)?;
        let criterion = config.build_criterion()?;
        config.flavour()?;
        config.learning_mode()?;

        let rng = match config.random_seed() {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        let inner = InnerOptimizer::new(config.n_inner_eval);
        Ok(BoundedOptimizer {
            config,
            objective,
            bounds: bounds.to_owned(),
            dim,
            criterion,
            inner,
            process: None,
            ensemble: Vec::new(),
            rng,
            stage: Stage::Uninitialised,
            current_iter: 0,
            counter_stuck: 0,
            y_prev: f64::INFINITY,
        })
    }

    /// Maps a point from the unit hypercube to the user bounds.
    pub fn scale_to_bounds(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.dim);
        for i in 0..self.dim {
            out[i] = self.bounds[[i, 0]] + x[i] * (self.bounds[[i, 1]] - self.bounds[[i, 0]]);
        }
        out
    }

    /// Maps a point from the user bounds to the unit hypercube.
    pub fn scale_to_unit(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.dim);
        for i in 0..self.dim {
            out[i] = (x[i] - self.bounds[[i, 0]]) / (self.bounds[[i, 1]] - self.bounds[[i, 0]]);
        }
        out
    }

    /// Generates the initial design, evaluates the objective on it, fits the
    /// surrogate and runs the initial hyperparameter learning.
    pub fn initialize_optimization(&mut self) -> Result<()> {
        if self.stage != Stage::Uninitialised {
            return Err(BoError::Loop(
                "optimization is already initialized".to_string(),
            ));
        }
        let n_init = self.config.n_init_samples();
        let mut unit = Array2::zeros((self.dim, 2));
        unit.column_mut(1).fill(1.);
        let design = match self.config.init_method {
            InitMethod::LatinHypercube => Lhs::new(&unit)
                .with_rng(Xoshiro256Plus::seed_from_u64(self.rng.gen()))
                .sample(n_init),
            InitMethod::Sobol => Sobol::new(&unit).with_seed(self.rng.gen()).sample(n_init),
            InitMethod::Uniform => Random::new(&unit)
                .with_rng(Xoshiro256Plus::seed_from_u64(self.rng.gen()))
                .sample(n_init),
        };
        info!(
            "Evaluating initial design of {n_init} points ({:?})",
            self.config.init_method
        );

        let mut y = Array1::zeros(n_init);
        for (i, row) in design.rows().into_iter().enumerate() {
            y[i] = self.eval_objective(&row)?;
        }

        let process = self.build_process(&design, &y)?;
        self.process = Some(process);
        self.apply_learning()?;

        let process = self.process.as_ref().unwrap();
        self.y_prev = process.y_min().0;
        self.counter_stuck = 0;
        self.current_iter = 0;
        self.stage = Stage::Initialised;
        info!(
            "Initialization done: best y = {} over {} samples",
            self.y_prev,
            process.n_samples()
        );
        Ok(())
    }

    fn build_process(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Process<f64>> {
        let kernel = self.config.build_kernel(self.dim)?;
        let mean = self.config.build_mean(self.dim)?;
        let m = mean.n_features();
        let coef_std = if mean.n_tunable() > 0 {
            Array1::from_vec(self.config.mean.coef_std.clone())
        } else {
            Array1::from_elem(m, 1e-10)
        };
        let process = Process::params(kernel, mean)
            .flavour(self.config.flavour()?)
            .noise(self.config.noise())
            .sigma2(self.config.sigma_s)
            .hp_prior(
                Array1::from_vec(self.config.kernel.hp_mean.clone()),
                Array1::from_vec(self.config.kernel.hp_std.clone()),
            )
            .coef_prior_std(coef_std)
            .nig(NigPrior {
                alpha: self.config.alpha,
                beta: self.config.beta,
                delta: self.config.delta,
            })
            .reserve(self.config.n_iterations())
            .check()
            .map_err(|e| BoError::InvalidConfig(e.to_string()))?
            .fit(&Dataset::new(x.to_owned(), y.to_owned()))?;
        Ok(process)
    }

    fn learner_config(&self) -> Result<LearnerConfig> {
        Ok(LearnerConfig {
            mode: self.config.learning_mode()?,
            include_mean: self.config.l_all,
            n_start: self.config.learn_n_start(),
            ..Default::default()
        })
    }

    fn apply_learning(&mut self) -> Result<()> {
        let learner = self.learner_config()?;
        let process = self.process.as_mut().ok_or_else(|| {
            BoError::Loop("surrogate not available before initialization".to_string())
        })?;
        match learn(process, &learner, &mut self.rng)? {
            Learned::Ensemble(samples) => {
                let mut ensemble = Vec::with_capacity(samples.len());
                for theta in &samples {
                    let mut member = process.clone();
                    if member.set_kernel_params(theta).is_ok() && member.fit().is_ok() {
                        ensemble.push(member);
                    }
                }
                debug!("Posterior ensemble of {} surrogates", ensemble.len());
                self.ensemble = ensemble;
            }
            Learned::Point(theta) => {
                debug!("Learned hyperparameters {theta}");
                self.ensemble.clear();
            }
            Learned::Unchanged => (),
        }
        Ok(())
    }

    /// Performs one iteration: optional relearning, criterion proposal,
    /// reachability fallback, objective evaluation, surrogate update and best
    /// tracking.
    pub fn step_optimization(&mut self) -> Result<()> {
        match self.stage {
            Stage::Uninitialised => {
                return Err(BoError::Loop(
                    "initialize_optimization must run before stepping".to_string(),
                ));
            }
            Stage::Finished => {
                return Err(BoError::Loop("iteration budget exhausted".to_string()));
            }
            _ => (),
        }

        let relearn = self.config.n_iter_relearn() > 0
            && self.current_iter > 0
            && self.current_iter % self.config.n_iter_relearn() == 0;
        if relearn {
            debug!("Relearning hyperparameters at iteration {}", self.current_iter);
            self.apply_learning()?;
        }

        let x_t = self.next_query()?;
        let y_t = self.eval_objective(&x_t.view())?;

        let process = self.process.as_mut().expect("initialized above");
        process.update(&x_t, y_t).map_err(|e| {
            BoError::Numerical(format!("surrogate update at iteration {}: {e}", self.current_iter))
        })?;
        let mut dead = Vec::new();
        for (i, member) in self.ensemble.iter_mut().enumerate() {
            if member.update(&x_t, y_t).is_err() {
                dead.push(i);
            }
        }
        for i in dead.into_iter().rev() {
            warn!("dropping unstable posterior ensemble member {i}");
            self.ensemble.remove(i);
        }

        // Hedge: reward every arm from the refreshed surrogate
        if let CriterionSet::Portfolio(hedge) = &mut self.criterion {
            let process = self.process.as_ref().expect("initialized above");
            let means: Vec<f64> = hedge
                .proposals
                .iter()
                .map(|p| {
                    process
                        .predict(p)
                        .map(|pred| pred.mean)
                        .unwrap_or(f64::INFINITY)
                })
                .collect();
            let (y_min, _) = process.y_min();
            let (y_max, _) = process.y_max();
            hedge.update_gains(&means, y_min, y_max);
        }

        if (y_t - self.y_prev).abs() < STUCK_TOLERANCE {
            self.counter_stuck += 1;
        } else {
            self.counter_stuck = 0;
        }
        self.y_prev = y_t;

        self.current_iter += 1;
        self.stage = if self.current_iter >= self.config.n_iterations() {
            Stage::Finished
        } else {
            Stage::Running
        };
        debug!(
            "Iteration {}/{}: y = {y_t}, best = {}",
            self.current_iter,
            self.config.n_iterations(),
            self.process.as_ref().unwrap().y_min().0
        );
        Ok(())
    }

    /// Runs the remaining budget and returns the best `(x*, y*)` in user
    /// bounds.
    pub fn run(&mut self) -> Result<(Array1<f64>, f64)> {
        if self.stage == Stage::Uninitialised {
            self.initialize_optimization()?;
        }
        while self.stage != Stage::Finished {
            self.step_optimization()?;
        }
        self.best_point()
    }

    /// Selects the next query point in the unit hypercube.
    fn next_query(&mut self) -> Result<Array1<f64>> {
        let force_jump = self.config.force_jump;
        if force_jump > 0 && self.counter_stuck >= force_jump {
            info!(
                "No progress for {} iterations, jumping to a random point",
                self.counter_stuck
            );
            self.counter_stuck = 0;
            return Ok(self.uniform_point());
        }
        if self.config.epsilon > 0. && self.rng.gen::<f64>() < self.config.epsilon {
            debug!("ε-greedy exploration step");
            return Ok(self.uniform_point());
        }

        let proposal = self.propose()?;
        self.ensure_acceptable(proposal)
    }

    /// Replaces an infeasible or unreachable proposal: first by a local
    /// perturbation, then by uniform resampling, at most `force_jump` times.
    fn ensure_acceptable(&mut self, proposal: Array1<f64>) -> Result<Array1<f64>> {
        let max_attempts = self.config.force_jump.max(1);
        let mut x = proposal;
        let mut attempts = 0;
        while !self.is_acceptable(&x) {
            attempts += 1;
            if attempts > max_attempts {
                return Err(BoError::Optimizer(format!(
                    "no feasible query found after {max_attempts} resampling attempts"
                )));
            }
            x = if attempts == 1 {
                debug!("proposal rejected, perturbing");
                self.perturb(&x)
            } else {
                debug!("proposal rejected, resampling uniformly");
                self.uniform_point()
            };
        }
        Ok(x)
    }

    fn is_acceptable(&self, x: &Array1<f64>) -> bool {
        if !in_unit_cube(&x.view()) {
            return false;
        }
        let scaled = self.scale_to_bounds(&x.view());
        self.objective.check_reachability(&scaled.view())
    }

    fn uniform_point(&mut self) -> Array1<f64> {
        Array1::from_iter((0..self.dim).map(|_| self.rng.gen::<f64>()))
    }

    fn perturb(&mut self, x: &Array1<f64>) -> Array1<f64> {
        let normal = Normal::new(0., PERTURBATION_STD).unwrap();
        x.mapv(|v: f64| (v + normal.sample(&mut self.rng)).clamp(0., 1.))
    }

    /// Maximises the configured criterion over the surrogate.
    fn propose(&mut self) -> Result<Array1<f64>> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| BoError::Loop("surrogate not fitted".to_string()))?;
        let ctx = CriterionCtx {
            y_min: process.y_min().0,
            iteration: self.current_iter,
            dim: self.dim,
        };
        match &mut self.criterion {
            CriterionSet::Single(criterion) => {
                let criterion = criterion.clone();
                let seed: u64 = self.rng.gen();
                let x = maximize_criterion(
                    &self.inner,
                    &criterion,
                    process,
                    &self.ensemble,
                    &ctx,
                    seed,
                    self.dim,
                    &mut self.rng,
                )?;
                Ok(x)
            }
            CriterionSet::Portfolio(hedge) => {
                let mut proposals = Vec::with_capacity(hedge.arms.len());
                for arm in hedge.arms.clone() {
                    let seed: u64 = self.rng.gen();
                    let x = maximize_criterion(
                        &self.inner,
                        &arm,
                        process,
                        &self.ensemble,
                        &ctx,
                        seed,
                        self.dim,
                        &mut self.rng,
                    )?;
                    proposals.push(x);
                }
                hedge.proposals = proposals;
                let chosen = hedge.choose_arm(&mut self.rng);
                debug!("Hedge chose arm {chosen} ({:?})", hedge.arms[chosen]);
                Ok(hedge.proposals[chosen].clone())
            }
        }
    }

    fn eval_objective(&mut self, x_unit: &ArrayView1<f64>) -> Result<f64> {
        let x_user = self.scale_to_bounds(x_unit);
        let y = self.objective.evaluate(&x_user.view())?;
        if !y.is_finite() {
            return Err(BoError::Numerical(format!(
                "objective returned {y} at {x_user}"
            )));
        }
        Ok(y)
    }

    /// Best observed `(x*, y*)` in user bounds.
    pub fn best_point(&self) -> Result<(Array1<f64>, f64)> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| BoError::Loop("no sample evaluated yet".to_string()))?;
        let (y_min, index) = process.y_min();
        let x = process.sample_inputs().row(index).to_owned();
        Ok((self.scale_to_bounds(&x.view()), y_min))
    }

    /// Current loop stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Completed iterations (excluding the initial design)
    pub fn current_iter(&self) -> usize {
        self.current_iter
    }

    /// The fitted surrogate, when available
    pub fn process(&self) -> Option<&Process<f64>> {
        self.process.as_ref()
    }

    /// The criterion in use
    pub fn criterion(&self) -> &CriterionSet {
        &self.criterion
    }

    /// The objective, for embedding programs that carry state in it
    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// Captures a value snapshot of the loop: counters, configuration,
    /// hyperparameters, sample set and RNG.
    pub fn save_optimization(&self) -> Result<BoState> {
        let process = self.process.as_ref().ok_or_else(|| {
            BoError::State("nothing to save before initialization".to_string())
        })?;
        Ok(BoState {
            format_version: STATE_FORMAT_VERSION,
            current_iter: self.current_iter,
            counter_stuck: self.counter_stuck,
            y_prev: self.y_prev,
            config: self.config.clone(),
            kernel_hp: process.kernel_params().to_vec(),
            mean_coefs: process.mean().coefficients().to_vec(),
            x: process.sample_inputs().clone(),
            y: process.sample_outputs().clone(),
            rng: self.rng.clone(),
        })
    }

    /// Restores a snapshot into this optimizer.
    ///
    /// The state is validated (format version, dimension, hyperparameter
    /// count) before any mutation; the surrogate is rebuilt from the
    /// persisted samples and refitted, which reproduces the factor of the
    /// halted run bit for bit.
    pub fn restore_optimization(&mut self, state: BoState) -> Result<()> {
        if state.format_version != STATE_FORMAT_VERSION {
            return Err(BoError::State(format!(
                "state format {} not supported (expected {})",
                state.format_version, STATE_FORMAT_VERSION
            )));
        }
        if state.x.ncols() != self.dim {
            return Err(BoError::State(format!(
                "state holds {}-dimensional samples, optimizer expects {}",
                state.x.ncols(),
                self.dim
            )));
        }
        if state.x.nrows() != state.y.len() {
            return Err(BoError::State(format!(
                "{} sample inputs for {} outputs",
                state.x.nrows(),
                state.y.len()
            )));
        }
        let kernel = self.config.build_kernel(self.dim)?;
        if state.kernel_hp.len() != kernel.n_params() {
            return Err(BoError::State(format!(
                "state holds {} kernel hyperparameters, kernel {} expects {}",
                state.kernel_hp.len(),
                kernel,
                kernel.n_params()
            )));
        }

        let mut process = self.build_process(&state.x, &state.y)?;
        process.set_kernel_params(&Array1::from_vec(state.kernel_hp.clone()))?;
        if process.mean().n_tunable() > 0 {
            let coefs = Array1::from_vec(state.mean_coefs.clone());
            process
                .set_hyperparameters(&ndarray::concatenate![
                    ndarray::Axis(0),
                    Array1::from_vec(state.kernel_hp.clone()),
                    coefs
                ])
                .map_err(|e| BoError::State(e.to_string()))?;
        }
        process.fit()?;

        self.process = Some(process);
        self.ensemble.clear();
        self.rng = state.rng;
        self.current_iter = state.current_iter;
        self.counter_stuck = state.counter_stuck;
        self.y_prev = state.y_prev;
        self.stage = if self.current_iter >= self.config.n_iterations() {
            Stage::Finished
        } else {
            Stage::Initialised
        };
        info!(
            "Restored optimization at iteration {}/{} with {} samples",
            self.current_iter,
            self.config.n_iterations(),
            self.process.as_ref().unwrap().n_samples()
        );
        Ok(())
    }
}

/// Averages predictive moments over the posterior hyperparameter ensemble,
/// falling back to the single fitted surrogate.
fn predict_marginal(
    process: &Process<f64>,
    ensemble: &[Process<f64>],
    x: &ArrayView1<f64>,
) -> smbo_gp::Result<Prediction<f64>> {
    if ensemble.len() <= 1 {
        return process.predict(x);
    }
    let mut mean = 0.;
    let mut var = 0.;
    let mut dof = None;
    for member in ensemble {
        let pred = member.predict(x)?;
        mean += pred.mean;
        var += pred.std * pred.std;
        dof = pred.dof;
    }
    let k = ensemble.len() as f64;
    Ok(Prediction {
        mean: mean / k,
        std: (var / k).sqrt(),
        dof,
    })
}

#[allow(clippy::too_many_arguments)]
fn maximize_criterion(
    inner: &InnerOptimizer,
    criterion: &SingleCriterion,
    process: &Process<f64>,
    ensemble: &[Process<f64>],
    ctx: &CriterionCtx,
    score_seed: u64,
    dim: usize,
    rng: &mut Xoshiro256Plus,
) -> Result<Array1<f64>> {
    let score_rng = RefCell::new(Xoshiro256Plus::seed_from_u64(score_seed));
    let score = |x: &ArrayView1<f64>| match predict_marginal(process, ensemble, x) {
        Ok(pred) => criterion.score(&pred, ctx, &mut score_rng.borrow_mut()),
        Err(_) => f64::NEG_INFINITY,
    };
    inner.maximize(score, dim, rng)
}
