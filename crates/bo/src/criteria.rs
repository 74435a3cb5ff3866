//! Acquisition criteria ranking candidate points for the next evaluation.
//!
//! Every criterion scores a candidate from the surrogate predictive
//! distribution at that point plus the current observed minimum; higher is
//! better, minimisation is cast by sign. Annealed criteria additionally read
//! the iteration counter, sampling criteria draw from the loop RNG.
//!
//! The [`Hedge`] portfolio holds several criteria as arms and picks among
//! their proposals with exponentially weighted probabilities (GP-Hedge).

use crate::errors::{BoError, Result};
use ndarray::Array1;
use ndarray_rand::rand::Rng;
use rand_xoshiro::Xoshiro256Plus;
use smbo_gp::Prediction;
use std::f64::consts::PI;

/// Default LCB exploration weight
pub const DEFAULT_LCB_BETA: f64 = 1.0;
/// Default annealed LCB confidence parameter
pub const DEFAULT_LCB_DELTA: f64 = 0.1;
/// Default Hedge learning rate
pub const DEFAULT_HEDGE_ETA: f64 = 2.0;
/// Starting exponent of the annealed expected improvement
const ANNEALED_EI_EXP_START: u32 = 10;
/// Iterations between two halvings of the annealed EI exponent
const ANNEALED_EI_PERIOD: usize = 10;

/// Context shared by criterion evaluations within one iteration
#[derive(Clone, Copy, Debug)]
pub struct CriterionCtx {
    /// Current observed minimum
    pub y_min: f64,
    /// Iteration counter (0 during the initial design)
    pub iteration: usize,
    /// Input space dimension
    pub dim: usize,
}

/// A single acquisition criterion
#[derive(Clone, Debug, PartialEq)]
pub enum SingleCriterion {
    /// Expected improvement, optionally exponentiated
    Ei {
        /// EI is raised to this power (≥ 1)
        exponent: u32,
    },
    /// Expected improvement with an exponent annealed from 10 down to 1
    EiAnnealed,
    /// Lower confidence bound `−(μ − β·σ)`
    Lcb {
        /// exploration weight β
        beta: f64,
    },
    /// LCB with the annealed weight `β_t = √(2·log(t^(d/2+2)·π²/(3δ)))`
    LcbAnnealed {
        /// confidence parameter δ
        delta: f64,
    },
    /// Probability of improvement with an exploration offset
    Poi {
        /// improvement offset added to the target
        offset: f64,
    },
    /// Greedy posterior mean `−μ`
    ExpectedReturn,
    /// Posterior variance (A-optimality design criterion)
    AOptimality,
    /// One posterior draw `−(μ + σ·z)`
    ThompsonSampling,
    /// The smaller of the posterior mean and one posterior draw, negated
    OptimisticSampling,
}

impl SingleCriterion {
    /// Parses a single-criterion name with its scalar parameters.
    pub fn from_name(name: &str, params: &[f64]) -> Result<Self> {
        let criterion = match name {
            "cEI" => SingleCriterion::Ei {
                exponent: params.first().map(|p| *p as u32).unwrap_or(1).max(1),
            },
            "cEIa" => SingleCriterion::EiAnnealed,
            "cLCB" => SingleCriterion::Lcb {
                beta: params.first().copied().unwrap_or(DEFAULT_LCB_BETA),
            },
            "cLCBa" => SingleCriterion::LcbAnnealed {
                delta: params.first().copied().unwrap_or(DEFAULT_LCB_DELTA),
            },
            "cPOI" => SingleCriterion::Poi {
                offset: params.first().copied().unwrap_or(0.01),
            },
            "cExpReturn" => SingleCriterion::ExpectedReturn,
            "cAopt" => SingleCriterion::AOptimality,
            "cThompsonSampling" => SingleCriterion::ThompsonSampling,
            "cOptimisticSampling" => SingleCriterion::OptimisticSampling,
            _ => return Err(BoError::InvalidConfig(format!("unknown criterion {name:?}"))),
        };
        Ok(criterion)
    }

    /// Whether scoring consumes random draws
    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            SingleCriterion::ThompsonSampling | SingleCriterion::OptimisticSampling
        )
    }

    /// Criterion score at a candidate with predictive distribution `pred`.
    pub fn score(
        &self,
        pred: &Prediction<f64>,
        ctx: &CriterionCtx,
        rng: &mut Xoshiro256Plus,
    ) -> f64 {
        match self {
            SingleCriterion::Ei { exponent } => expected_improvement(pred, ctx.y_min, *exponent),
            SingleCriterion::EiAnnealed => {
                let halvings = (ctx.iteration / ANNEALED_EI_PERIOD) as u32;
                let exponent = (ANNEALED_EI_EXP_START >> halvings).max(1);
                expected_improvement(pred, ctx.y_min, exponent)
            }
            SingleCriterion::Lcb { beta } => beta * pred.std - pred.mean,
            SingleCriterion::LcbAnnealed { delta } => {
                let t = (ctx.iteration + 1) as f64;
                let d = ctx.dim as f64;
                let beta =
                    (2. * (t.powf(d / 2. + 2.) * PI * PI / (3. * delta)).ln()).max(0.).sqrt();
                beta * pred.std - pred.mean
            }
            SingleCriterion::Poi { offset } => {
                if pred.std <= f64::EPSILON {
                    return 0.;
                }
                let z = (ctx.y_min - pred.mean - offset) / pred.std;
                pred.standard_cdf(z)
            }
            SingleCriterion::ExpectedReturn => -pred.mean,
            SingleCriterion::AOptimality => pred.std * pred.std,
            SingleCriterion::ThompsonSampling => {
                let draw = pred.mean + pred.std * pred.standard_quantile(rng.gen());
                -draw
            }
            SingleCriterion::OptimisticSampling => {
                let draw = pred.mean + pred.std * pred.standard_quantile(rng.gen());
                -draw.min(pred.mean)
            }
        }
    }
}

/// Expected improvement over `y_min`, with the Student-t closed form when
/// the predictive distribution carries degrees of freedom.
fn expected_improvement(pred: &Prediction<f64>, y_min: f64, exponent: u32) -> f64 {
    if pred.std <= f64::EPSILON {
        return 0.;
    }
    let diff = y_min - pred.mean;
    let z = diff / pred.std;
    let ei = match pred.dof {
        Some(dof) if dof > 1. => {
            diff * pred.standard_cdf(z)
                + pred.std * (dof + z * z) / (dof - 1.) * pred.standard_pdf(z)
        }
        _ => diff * pred.standard_cdf(z) + pred.std * pred.standard_pdf(z),
    };
    let ei = ei.max(0.);
    if exponent > 1 { ei.powi(exponent as i32) } else { ei }
}

/// A GP-Hedge portfolio of criteria.
///
/// Each arm proposes its own candidate through the inner optimizer; an arm
/// is then chosen with probability `exp(η·g_j)/Z` and its proposal is
/// evaluated. After the surrogate update every arm's cumulative gain grows
/// by a reward normalised from the predictive mean at its own proposal.
#[derive(Clone, Debug)]
pub struct Hedge {
    /// Portfolio arms
    pub arms: Vec<SingleCriterion>,
    /// Cumulative gains, one per arm
    pub gains: Vec<f64>,
    /// Learning rate η
    pub eta: f64,
    /// Proposals of the last round, one per arm
    pub proposals: Vec<Array1<f64>>,
    /// Arm chosen in the last round
    pub chosen: usize,
}

impl Hedge {
    /// A portfolio over the given arms
    pub fn new(arms: Vec<SingleCriterion>, eta: f64) -> Self {
        let n = arms.len();
        Hedge {
            arms,
            gains: vec![0.; n],
            eta,
            proposals: Vec::new(),
            chosen: 0,
        }
    }

    /// Samples the arm index from the exponentially weighted distribution.
    pub fn choose_arm(&mut self, rng: &mut Xoshiro256Plus) -> usize {
        let g_max = self
            .gains
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = self
            .gains
            .iter()
            .map(|g| (self.eta * (g - g_max)).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        let mut u = rng.gen::<f64>() * total;
        for (j, w) in weights.iter().enumerate() {
            u -= w;
            if u <= 0. {
                self.chosen = j;
                return j;
            }
        }
        self.chosen = self.arms.len() - 1;
        self.chosen
    }

    /// Updates the cumulative gains from the rewards of the last round.
    ///
    /// `predicted_means` holds the surrogate mean at each arm's proposal
    /// after the update; rewards are normalised against the observed range.
    pub fn update_gains(&mut self, predicted_means: &[f64], y_min: f64, y_max: f64) {
        let spread = (y_max - y_min).max(f64::EPSILON);
        for (j, mu) in predicted_means.iter().enumerate() {
            let reward = ((y_max - mu) / spread).clamp(0., 1.);
            self.gains[j] += reward;
        }
    }
}

/// The configured criterion: one criterion or a Hedge portfolio
#[derive(Clone, Debug)]
pub enum CriterionSet {
    /// A single criterion
    Single(SingleCriterion),
    /// A GP-Hedge portfolio
    Portfolio(Hedge),
}

impl CriterionSet {
    /// Parses a criterion name; portfolios are spelled
    /// `cHedge(cEI,cLCB,...)`.
    pub fn from_name(name: &str, params: &[f64]) -> Result<Self> {
        if let Some(args) = name.strip_prefix("cHedge(") {
            let args = args.strip_suffix(')').ok_or_else(|| {
                BoError::InvalidConfig(format!("unbalanced parentheses in {name:?}"))
            })?;
            let mut arms = Vec::new();
            for arm in args.split(',') {
                let arm = arm.trim();
                if arm.is_empty() {
                    continue;
                }
                arms.push(SingleCriterion::from_name(arm, &[])?);
            }
            if arms.is_empty() {
                return Err(BoError::InvalidConfig(
                    "cHedge needs at least one sub-criterion".to_string(),
                ));
            }
            let eta = params.first().copied().unwrap_or(DEFAULT_HEDGE_ETA);
            Ok(CriterionSet::Portfolio(Hedge::new(arms, eta)))
        } else {
            Ok(CriterionSet::Single(SingleCriterion::from_name(
                name, params,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::SeedableRng;

    fn gaussian_pred(mean: f64, std: f64) -> Prediction<f64> {
        Prediction {
            mean,
            std,
            dof: None,
        }
    }

    fn ctx() -> CriterionCtx {
        CriterionCtx {
            y_min: 0.,
            iteration: 3,
            dim: 2,
        }
    }

    #[test]
    fn test_ei_closed_form() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let ei = SingleCriterion::Ei { exponent: 1 };
        // y_min = 0, mean = 0, std = 1 => EI = phi(0) = 1/sqrt(2 pi)
        let score = ei.score(&gaussian_pred(0., 1.), &ctx(), &mut rng);
        approx::assert_abs_diff_eq!(score, 0.3989422804014327, epsilon = 1e-12);
    }

    #[test]
    fn test_ei_zero_variance() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let ei = SingleCriterion::Ei { exponent: 1 };
        assert_eq!(ei.score(&gaussian_pred(-5., 0.), &ctx(), &mut rng), 0.);
    }

    #[test]
    fn test_ei_student_t_exceeds_gaussian_in_tails() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let ei = SingleCriterion::Ei { exponent: 1 };
        let g = gaussian_pred(2., 0.5);
        let t = Prediction {
            mean: 2.,
            std: 0.5,
            dof: Some(3.),
        };
        // candidate far above y_min: heavy tails keep more improvement mass
        let sg = ei.score(&g, &ctx(), &mut rng);
        let st = ei.score(&t, &ctx(), &mut rng);
        assert!(st > sg, "t-EI {st} should exceed gaussian EI {sg}");
    }

    #[test]
    fn test_lcb_prefers_uncertainty() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let lcb = SingleCriterion::Lcb { beta: 2. };
        let certain = lcb.score(&gaussian_pred(1., 0.1), &ctx(), &mut rng);
        let uncertain = lcb.score(&gaussian_pred(1., 1.0), &ctx(), &mut rng);
        assert!(uncertain > certain);
    }

    #[test]
    fn test_annealed_lcb_decays() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let lcb = SingleCriterion::LcbAnnealed { delta: 0.1 };
        let early = CriterionCtx {
            y_min: 0.,
            iteration: 1,
            dim: 2,
        };
        let late = CriterionCtx {
            y_min: 0.,
            iteration: 100,
            dim: 2,
        };
        let pred = gaussian_pred(0., 1.);
        // beta grows with t, so exploration weight increases
        assert!(lcb.score(&pred, &late, &mut rng) > lcb.score(&pred, &early, &mut rng));
    }

    #[test]
    fn test_poi_monotone_in_mean() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let poi = SingleCriterion::Poi { offset: 0. };
        let low = poi.score(&gaussian_pred(-1., 1.), &ctx(), &mut rng);
        let high = poi.score(&gaussian_pred(1., 1.), &ctx(), &mut rng);
        assert!(low > high);
    }

    #[test]
    fn test_thompson_deterministic_given_seed() {
        let crit = SingleCriterion::ThompsonSampling;
        let mut rng1 = Xoshiro256Plus::seed_from_u64(5);
        let mut rng2 = Xoshiro256Plus::seed_from_u64(5);
        let p = gaussian_pred(0.5, 0.3);
        assert_eq!(
            crit.score(&p, &ctx(), &mut rng1),
            crit.score(&p, &ctx(), &mut rng2)
        );
    }

    #[test]
    fn test_annealed_ei_exponent_schedule() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let eia = SingleCriterion::EiAnnealed;
        let pred = gaussian_pred(-0.5, 0.5);
        let early = CriterionCtx {
            y_min: 0.,
            iteration: 0,
            dim: 1,
        };
        let late = CriterionCtx {
            y_min: 0.,
            iteration: 60,
            dim: 1,
        };
        let ei1 = SingleCriterion::Ei { exponent: 1 }.score(&pred, &late, &mut rng);
        // after enough halvings the annealed criterion is plain EI
        approx::assert_abs_diff_eq!(eia.score(&pred, &late, &mut rng), ei1, epsilon = 1e-12);
        // early on the exponent is larger
        let e0 = eia.score(&pred, &early, &mut rng);
        approx::assert_abs_diff_eq!(e0, ei1.powi(10), epsilon = 1e-12);
    }

    #[test]
    fn test_hedge_single_arm_always_chosen() {
        let mut hedge = Hedge::new(vec![SingleCriterion::Ei { exponent: 1 }], 2.);
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        for _ in 0..10 {
            assert_eq!(hedge.choose_arm(&mut rng), 0);
        }
    }

    #[test]
    fn test_hedge_gains_bias_choice() {
        let mut hedge = Hedge::new(
            vec![
                SingleCriterion::Ei { exponent: 1 },
                SingleCriterion::ExpectedReturn,
            ],
            2.,
        );
        hedge.gains = vec![10., 0.];
        let mut rng = Xoshiro256Plus::seed_from_u64(2);
        let picks: Vec<usize> = (0..100).map(|_| hedge.choose_arm(&mut rng)).collect();
        let zeros = picks.iter().filter(|&&j| j == 0).count();
        assert!(zeros > 90, "arm 0 picked only {zeros}/100 times");
    }

    #[test]
    fn test_hedge_reward_normalisation() {
        let mut hedge = Hedge::new(
            vec![
                SingleCriterion::Ei { exponent: 1 },
                SingleCriterion::ExpectedReturn,
            ],
            2.,
        );
        hedge.update_gains(&[0.0, 10.0], 0.0, 10.0);
        approx::assert_abs_diff_eq!(hedge.gains[0], 1.0);
        approx::assert_abs_diff_eq!(hedge.gains[1], 0.0);
    }

    #[test]
    fn test_parse_portfolio() {
        match CriterionSet::from_name("cHedge(cEI,cLCB,cPOI)", &[]).unwrap() {
            CriterionSet::Portfolio(h) => assert_eq!(h.arms.len(), 3),
            _ => panic!("expected portfolio"),
        }
        assert!(CriterionSet::from_name("cHedge(cEI", &[]).is_err());
        assert!(CriterionSet::from_name("cHedge(cNope)", &[]).is_err());
    }
}
