//! One-dimensional optimization with a plain Gaussian process surrogate.

use ndarray::{array, ArrayView1};
use smbo_bo::{BoParams, BoundedOptimizer, KernelConfig, ObjectiveFunction, Result};

/// f(x) = (x − 0.3)² + sin(20x)/10, a gently multimodal valley on [0, 1]
struct ExampleOneD;

impl ObjectiveFunction for ExampleOneD {
    fn evaluate(&mut self, x: &ArrayView1<f64>) -> Result<f64> {
        Ok((x[0] - 0.3) * (x[0] - 0.3) + (20. * x[0]).sin() / 10.)
    }
}

fn main() {
    env_logger::init();

    let config = BoParams::default()
        .n_init_samples(10)
        .n_iterations(300)
        .surrogate("sGaussianProcess")
        .learning("map")
        .kernel(KernelConfig {
            name: "kMaternISO3".to_string(),
            hp_mean: vec![1.0],
            hp_std: vec![100.0],
        })
        .random_seed(Some(42))
        .check()
        .expect("valid configuration");

    let bounds = array![[0., 1.]];
    let mut optimizer =
        BoundedOptimizer::new(config, &bounds, ExampleOneD).expect("optimizer built");
    let (x_best, y_best) = optimizer.run().expect("optimization finished");
    println!("Result: f({}) = {}", x_best[0], y_best);
}
