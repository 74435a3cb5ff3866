/*!
This library implements sequential Bayesian optimization of an expensive
black-box objective over a bounded continuous domain or a finite candidate
set.

The optimizer keeps a non-parametric process surrogate (see [`smbo_gp`])
over the observed samples and, at each iteration, evaluates the objective at
the maximiser of an acquisition criterion: expected improvement, lower
confidence bound, probability of improvement, posterior sampling criteria,
or a GP-Hedge portfolio adaptively mixing several of them. Runs are
deterministic given a seed, and can halt, serialize their state and resume
bit-identically in a fresh optimizer.

# Example

```no_run
use smbo_bo::{BoParams, BoundedOptimizer, ObjectiveFunction, Result};
use ndarray::{array, ArrayView1};

struct Sphere;

impl ObjectiveFunction for Sphere {
    fn evaluate(&mut self, x: &ArrayView1<f64>) -> Result<f64> {
        Ok(x.iter().map(|v| v * v).sum())
    }
}

let config = BoParams::default()
    .n_iterations(50)
    .n_init_samples(10)
    .random_seed(Some(42))
    .check()
    .expect("valid configuration");
let bounds = array![[-2., 2.], [-2., 2.]];
let mut optimizer = BoundedOptimizer::new(config, &bounds, Sphere).unwrap();
let (x_best, y_best) = optimizer.run().unwrap();
println!("minimum {y_best} at {x_best}");
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod config;
mod criteria;
mod discrete;
mod errors;
mod optimizer;
mod solver;
mod state;

pub use config::*;
pub use criteria::*;
pub use discrete::*;
pub use errors::*;
pub use optimizer::*;
pub use solver::*;
pub use state::*;
