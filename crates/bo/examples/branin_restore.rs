//! Halting an optimization half-way, serializing its state and resuming it
//! in a brand new optimizer. Both halves together reproduce the
//! uninterrupted run exactly.

use ndarray::{array, ArrayView1};
use smbo_bo::{BoParams, BoState, BoundedOptimizer, ObjectiveFunction, Result, Stage, ValidBoParams};
use std::f64::consts::PI;

/// Branin function rescaled to the unit square, minimum ≈ 0.397887
struct BraninNormalized;

impl ObjectiveFunction for BraninNormalized {
    fn evaluate(&mut self, u: &ArrayView1<f64>) -> Result<f64> {
        let x = 15. * u[0] - 5.;
        let y = 15. * u[1];
        let b = 5.1 / (4. * PI * PI);
        let c = 5. / PI;
        let t = 1. / (8. * PI);
        Ok((y - b * x * x + c * x - 6.).powi(2) + 10. * (1. - t) * x.cos() + 10.)
    }
}

fn config() -> ValidBoParams {
    BoParams::default()
        .n_iterations(190)
        .random_seed(Some(0))
        .verbose_level(1)
        .noise(1e-10)
        .check()
        .expect("valid configuration")
}

fn main() {
    env_logger::init();
    let bounds = array![[0., 1.], [0., 1.]];

    // First optimization, stopped at half the budget
    let mut branin1 = BoundedOptimizer::new(config(), &bounds, BraninNormalized).unwrap();
    branin1.initialize_optimization().unwrap();
    let stop_at = 190 / 2;
    while branin1.current_iter() < stop_at {
        branin1.step_optimization().unwrap();
    }
    let state = branin1.save_optimization().unwrap();
    println!("STATE ITERS: {}", state.current_iter);
    let (x1, y1) = branin1.best_point().unwrap();
    println!("Branin1 result: {x1} -> {y1}");

    println!("RESTORING OPTIMIZATION");
    println!("======================");

    // Second optimization, restored from the snapshot text
    let text = state.save().unwrap();
    let restored = BoState::load(&text).unwrap();
    let mut branin2 = BoundedOptimizer::new(config(), &bounds, BraninNormalized).unwrap();
    branin2.restore_optimization(restored).unwrap();
    while branin2.stage() != Stage::Finished {
        branin2.step_optimization().unwrap();
    }
    let (x2, y2) = branin2.best_point().unwrap();
    println!("Branin2 result: {x2} -> {y2}");
}
