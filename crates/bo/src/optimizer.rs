//! Inner optimizer maximising an acquisition score over the unit hypercube.
//!
//! The score is cheap next to the objective, so the optimizer spends a
//! generous evaluation budget: a global phase ranks a seeded space-filling
//! candidate set, then COBYLA refines the best starts. Derivative-free,
//! bounded, and deterministic given the loop RNG.

use crate::errors::{BoError, Result};
use cobyla::{minimize, Func, RhoBeg, StopTols};
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use smbo_doe::{Lhs, SamplingMethod};

/// Number of local refinements started from the best global candidates
const N_LOCAL_STARTS: usize = 4;

/// Inner optimizer configuration
#[derive(Clone, Copy, Debug)]
pub struct InnerOptimizer {
    /// Total score evaluation budget
    pub max_eval: usize,
    /// Relative tolerance of the local phase
    pub ftol_rel: f64,
}

impl Default for InnerOptimizer {
    fn default() -> Self {
        InnerOptimizer {
            max_eval: crate::config::DEFAULT_INNER_MAX_EVAL,
            ftol_rel: 1e-6,
        }
    }
}

impl InnerOptimizer {
    /// Constructor with an evaluation budget
    pub fn new(max_eval: usize) -> Self {
        InnerOptimizer {
            max_eval: max_eval.max(2 * N_LOCAL_STARTS),
            ..Default::default()
        }
    }

    /// Finds `argmax_{x ∈ [0,1]^dim} score(x)`.
    ///
    /// Half the budget goes to a Latin hypercube sweep, the other half to
    /// COBYLA refinements of the best candidates. All randomness is drawn
    /// from `rng`.
    pub fn maximize<S>(&self, score: S, dim: usize, rng: &mut Xoshiro256Plus) -> Result<Array1<f64>>
    where
        S: Fn(&ArrayView1<f64>) -> f64,
    {
        let n_global = (self.max_eval / 2).max(N_LOCAL_STARTS);
        let mut xlimits = Array2::zeros((dim, 2));
        xlimits.column_mut(1).fill(1.);
        let candidates = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(rng.gen()))
            .sample(n_global);

        let mut ranked: Vec<(f64, usize)> = candidates
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| (score(&row), i))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let n_starts = N_LOCAL_STARTS.min(ranked.len());
        let local_budget = (self.max_eval / 2 / n_starts).max(10);
        let bounds = vec![(0., 1.); dim];
        let cons: Vec<&dyn Func<()>> = vec![];
        let objfn = |x: &[f64], _u: &mut ()| {
            let view = ArrayView1::from(x);
            -score(&view)
        };

        let mut best_val = ranked[0].0;
        let mut best_x = candidates.row(ranked[0].1).to_owned();
        for &(_, idx) in ranked.iter().take(n_starts) {
            let start = candidates.row(idx).to_vec();
            let res = minimize(
                objfn,
                &start,
                &bounds,
                &cons,
                (),
                local_budget,
                RhoBeg::All(0.2),
                Some(StopTols {
                    ftol_rel: self.ftol_rel,
                    ..StopTols::default()
                }),
            );
            if let Ok((_, x_opt, neg_val)) = res {
                let val = -neg_val;
                if val > best_val && x_opt.iter().all(|v| v.is_finite()) {
                    best_val = val;
                    best_x = Array1::from_vec(x_opt);
                }
            }
        }

        if !best_val.is_finite() {
            return Err(BoError::Optimizer(
                "no finite acquisition value found".to_string(),
            ));
        }
        Ok(best_x)
    }
}

/// Whether a point lies inside the closed unit hypercube
pub fn in_unit_cube(x: &ArrayView1<f64>) -> bool {
    x.iter().all(|v| (0. ..=1.).contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_maximize_quadratic() {
        let optimizer = InnerOptimizer::new(400);
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let target = [0.3, 0.7];
        let score = |x: &ArrayView1<f64>| {
            -x.iter()
                .zip(target.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
        };
        let best = optimizer.maximize(score, 2, &mut rng).unwrap();
        assert_abs_diff_eq!(best[0], 0.3, epsilon = 0.05);
        assert_abs_diff_eq!(best[1], 0.7, epsilon = 0.05);
    }

    #[test]
    fn test_stays_in_bounds() {
        let optimizer = InnerOptimizer::new(200);
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        // score pushing toward the corner
        let score = |x: &ArrayView1<f64>| x.sum();
        let best = optimizer.maximize(score, 3, &mut rng).unwrap();
        assert!(in_unit_cube(&best.view()));
        assert!(best.sum() > 2.5);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let optimizer = InnerOptimizer::new(200);
        let score = |x: &ArrayView1<f64>| -(x[0] - 0.5).abs();
        let mut rng1 = Xoshiro256Plus::seed_from_u64(9);
        let mut rng2 = Xoshiro256Plus::seed_from_u64(9);
        let a = optimizer.maximize(score, 1, &mut rng1).unwrap();
        let b = optimizer.maximize(score, 1, &mut rng2).unwrap();
        assert_eq!(a, b);
    }
}
