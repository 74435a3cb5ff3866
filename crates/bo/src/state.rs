//! Value snapshot of an optimization run.
//!
//! [`BoState`] captures everything a halted run needs to continue in a fresh
//! optimizer: loop counters, the configuration, the learned hyperparameters,
//! the sample set and the RNG. `save → load → save` round-trips identically,
//! and a restored run reproduces the uninterrupted trajectory because the
//! surrogate factor rebuilt from the persisted samples is bit-identical to
//! the incrementally grown one.

use crate::config::ValidBoParams;
use crate::errors::Result;
use ndarray::{Array1, Array2};
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};

/// Version tag of the snapshot layout
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Serializable snapshot of the loop and its surrogate inputs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoState {
    /// Snapshot layout version
    pub format_version: u32,
    /// Completed iterations (excluding the initial design)
    pub current_iter: usize,
    /// Consecutive non-improving iterations
    pub counter_stuck: usize,
    /// Last observed objective value
    pub y_prev: f64,
    /// Full configuration of the run
    pub config: ValidBoParams,
    /// Kernel hyperparameters in effect (flat, tree order)
    pub kernel_hp: Vec<f64>,
    /// Mean function coefficients in effect
    pub mean_coefs: Vec<f64>,
    /// Sample inputs in the unit hypercube, one row per observation
    pub x: Array2<f64>,
    /// Sample outputs in evaluation order
    pub y: Array1<f64>,
    /// Random generator state
    pub rng: Xoshiro256Plus,
}

impl BoState {
    /// Serializes the snapshot to a self-describing text document.
    pub fn save(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a snapshot back from its text form.
    pub fn load(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
