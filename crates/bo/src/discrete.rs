//! Sequential optimization over a finite candidate set.
//!
//! The discrete variant differs from [`crate::BoundedOptimizer`] in two
//! places: the initial design samples candidates without replacement, and
//! the inner optimizer is replaced by an exhaustive criterion sweep over the
//! set. A proposal that was already evaluated reuses the stored observation,
//! so the objective runs exactly once per unique proposal.

use crate::config::ValidBoParams;
use crate::criteria::{CriterionCtx, CriterionSet};
use crate::errors::{BoError, Result};
use crate::solver::ObjectiveFunction;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use smbo_gp::learning::{learn, LearnerConfig};
use smbo_gp::{NigPrior, Process};
use std::collections::HashMap;

/// Sequential Bayesian optimizer over a finite input set
pub struct DiscreteOptimizer<O: ObjectiveFunction> {
    config: ValidBoParams,
    objective: O,
    /// Candidate inputs, one row per point
    candidates: Array2<f64>,
    criterion: CriterionSet,
    process: Option<Process<f64>>,
    /// Observations keyed by candidate index
    evaluated: HashMap<usize, f64>,
    rng: Xoshiro256Plus,
    current_iter: usize,
    finished: bool,
}

impl<O: ObjectiveFunction> DiscreteOptimizer<O> {
    /// Builds an optimizer over the given candidate set (one row per point).
    pub fn new(
        config: ValidBoParams,
        candidates: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        objective: O,
    ) -> Result<Self> {
        if candidates.nrows() < config.n_init_samples() {
            return Err(BoError::InvalidConfig(format!(
                "candidate set of {} points cannot hold an initial design of {}",
                candidates.nrows(),
                config.n_init_samples()
            )));
        }
        let dim = candidates.ncols();
        config.build_kernel(dim)?;
        config.build_mean(dim)?;
        let criterion = config.build_criterion()?;
        let rng = match config.random_seed() {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        Ok(DiscreteOptimizer {
            config,
            objective,
            candidates: candidates.to_owned(),
            criterion,
            process: None,
            evaluated: HashMap::new(),
            rng,
            current_iter: 0,
            finished: false,
        })
    }

    /// Evaluates an initial design drawn from the set without replacement
    /// and fits the surrogate.
    pub fn initialize_optimization(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Err(BoError::Loop(
                "optimization is already initialized".to_string(),
            ));
        }
        let n_init = self.config.n_init_samples();
        let mut indices: Vec<usize> = (0..self.candidates.nrows()).collect();
        indices.shuffle(&mut self.rng);
        indices.truncate(n_init);

        let dim = self.candidates.ncols();
        let mut x = Array2::zeros((n_init, dim));
        let mut y = Array1::zeros(n_init);
        for (row, &idx) in indices.iter().enumerate() {
            let point = self.candidates.row(idx).to_owned();
            let value = self.objective.evaluate(&point.view())?;
            x.row_mut(row).assign(&point);
            y[row] = value;
            self.evaluated.insert(idx, value);
        }

        let kernel = self.config.build_kernel(dim)?;
        let mean = self.config.build_mean(dim)?;
        let m = mean.n_features();
        let coef_std = if mean.n_tunable() > 0 {
            Array1::from_vec(self.config.mean.coef_std.clone())
        } else {
            Array1::from_elem(m, 1e-10)
        };
        use linfa::prelude::*;
        use linfa::ParamGuard;
        let mut process = Process::params(kernel, mean)
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
            .fit(&Dataset::new(x, y))?;

        let learner = LearnerConfig {
            mode: self.config.learning_mode()?,
            include_mean: self.config.l_all,
            n_start: self.config.learn_n_start(),
            ..Default::default()
        };
        learn(&mut process, &learner, &mut self.rng)?;
        self.process = Some(process);
        info!("Discrete initialization done over {n_init} candidates");
        Ok(())
    }

    /// Sweeps the criterion over the candidate set and returns the argmax
    /// index.
    fn find_optimal(&mut self) -> Result<usize> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| BoError::Loop("surrogate not fitted".to_string()))?;
        let ctx = CriterionCtx {
            y_min: process.y_min().0,
            iteration: self.current_iter,
            dim: self.candidates.ncols(),
        };
        let criterion = match &mut self.criterion {
            CriterionSet::Single(c) => c.clone(),
            CriterionSet::Portfolio(hedge) => {
                // a sweep per arm, then the Hedge draw
                let mut proposals = Vec::with_capacity(hedge.arms.len());
                for arm in hedge.arms.clone() {
                    let mut best = (f64::NEG_INFINITY, 0usize);
                    for (idx, row) in self.candidates.rows().into_iter().enumerate() {
                        if let Ok(pred) = process.predict(&row) {
                            let s = arm.score(&pred, &ctx, &mut self.rng);
                            if s > best.0 {
                                best = (s, idx);
                            }
                        }
                    }
                    proposals.push(self.candidates.row(best.1).to_owned());
                }
                hedge.proposals = proposals;
                let chosen = hedge.choose_arm(&mut self.rng);
                return Ok(nearest_candidate(
                    &self.candidates,
                    &hedge.proposals[chosen],
                ));
            }
        };
        let mut best = (f64::NEG_INFINITY, 0usize);
        for (idx, row) in self.candidates.rows().into_iter().enumerate() {
            if let Ok(pred) = process.predict(&row) {
                let s = criterion.score(&pred, &ctx, &mut self.rng);
                if s > best.0 {
                    best = (s, idx);
                }
            }
        }
        Ok(best.1)
    }

    /// Performs one iteration.
    pub fn step_optimization(&mut self) -> Result<()> {
        if self.process.is_none() {
            return Err(BoError::Loop(
                "initialize_optimization must run before stepping".to_string(),
            ));
        }
        if self.finished {
            return Err(BoError::Loop("iteration budget exhausted".to_string()));
        }

        if self.config.n_iter_relearn() > 0
            && self.current_iter > 0
            && self.current_iter % self.config.n_iter_relearn() == 0
        {
            let learner = LearnerConfig {
                mode: self.config.learning_mode()?,
                include_mean: self.config.l_all,
                n_start: self.config.learn_n_start(),
                ..Default::default()
            };
            let process = self.process.as_mut().expect("initialized above");
            learn(process, &learner, &mut self.rng)?;
        }

        let index = if self.config.epsilon > 0. && self.rng.gen::<f64>() < self.config.epsilon {
            self.rng.gen_range(0..self.candidates.nrows())
        } else {
            self.find_optimal()?
        };
        let point = self.candidates.row(index).to_owned();

        // one objective run per unique proposal; repeats reuse the record
        let value = match self.evaluated.get(&index) {
            Some(known) => {
                debug!("candidate {index} already evaluated, reusing {known}");
                *known
            }
            None => {
                let value = self.objective.evaluate(&point.view())?;
                self.evaluated.insert(index, value);
                value
            }
        };

        let process = self.process.as_mut().expect("initialized above");
        process.update(&point, value).map_err(|e| {
            BoError::Numerical(format!(
                "surrogate update at iteration {}: {e}",
                self.current_iter
            ))
        })?;

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

        self.current_iter += 1;
        self.finished = self.current_iter >= self.config.n_iterations();
        Ok(())
    }

    /// Runs the remaining budget and returns the best `(x*, y*)`, a member
    /// of the candidate set.
    pub fn run(&mut self) -> Result<(Array1<f64>, f64)> {
        if self.process.is_none() {
            self.initialize_optimization()?;
        }
        while !self.finished {
            self.step_optimization()?;
        }
        self.best_point()
    }

    /// Best observed `(x*, y*)`
    pub fn best_point(&self) -> Result<(Array1<f64>, f64)> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| BoError::Loop("no sample evaluated yet".to_string()))?;
        let (y_min, index) = process.y_min();
        Ok((process.sample_inputs().row(index).to_owned(), y_min))
    }

    /// Number of objective evaluations spent so far
    pub fn n_evaluations(&self) -> usize {
        self.evaluated.len()
    }

    /// Completed iterations
    pub fn current_iter(&self) -> usize {
        self.current_iter
    }

    /// The objective, for embedding programs that carry state in it
    pub fn objective(&self) -> &O {
        &self.objective
    }
}

fn nearest_candidate(candidates: &Array2<f64>, point: &Array1<f64>) -> usize {
    let mut best = (f64::INFINITY, 0usize);
    for (idx, row) in candidates.rows().into_iter().enumerate() {
        let d: f64 = row
            .iter()
            .zip(point.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        if d < best.0 {
            best = (d, idx);
        }
    }
    best.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoParams;
    use crate::errors::Result;
    use ndarray::ArrayView1;
    use smbo_doe::{Sobol, SamplingMethod};

    struct CountingSphere {
        calls: usize,
    }

    impl ObjectiveFunction for CountingSphere {
        fn evaluate(&mut self, x: &ArrayView1<f64>) -> Result<f64> {
            self.calls += 1;
            Ok(x.iter().map(|v| (v - 0.5) * (v - 0.5)).sum())
        }
    }

    fn candidate_set(n: usize) -> Array2<f64> {
        let unit = ndarray::array![[0., 1.], [0., 1.]];
        Sobol::new(&unit).with_seed(17).sample(n)
    }

    #[test]
    fn test_result_belongs_to_set() {
        let config = BoParams::default()
            .n_iterations(8)
            .n_init_samples(10)
            .n_iter_relearn(0)
            .random_seed(Some(5))
            .noise(1e-8)
            .check()
            .unwrap();
        let candidates = candidate_set(200);
        let mut opt =
            DiscreteOptimizer::new(config, &candidates, CountingSphere { calls: 0 }).unwrap();
        let (best_x, best_y) = opt.run().unwrap();
        let found = candidates
            .rows()
            .into_iter()
            .any(|row| row.iter().zip(best_x.iter()).all(|(a, b)| a == b));
        assert!(found, "best point {best_x} is not a candidate");
        assert!(best_y < 0.2);
    }

    #[test]
    fn test_objective_called_once_per_unique_proposal() {
        let config = BoParams::default()
            .n_iterations(15)
            .n_init_samples(8)
            .n_iter_relearn(0)
            .random_seed(Some(1))
            .noise(1e-8)
            .check()
            .unwrap();
        // a tiny set forces repeated proposals
        let candidates = candidate_set(12);
        let mut opt =
            DiscreteOptimizer::new(config, &candidates, CountingSphere { calls: 0 }).unwrap();
        opt.run().unwrap();
        assert_eq!(opt.objective.calls, opt.n_evaluations());
        assert!(opt.n_evaluations() <= 12);
    }

    #[test]
    fn test_design_larger_than_set_rejected() {
        let config = BoParams::default().n_init_samples(30).check().unwrap();
        let res = DiscreteOptimizer::new(config, &candidate_set(10), CountingSphere { calls: 0 });
        assert!(res.is_err());
    }
}
