/*!
This library implements the non-parametric process surrogates used by
sequential Bayesian optimization: Gaussian processes (with fixed, maximum
likelihood or Normal-prior mean coefficients) and Student-t processes with a
Normal-Inverse-Gamma prior.

A [`Process`] maintains a posterior over an expensive black-box function
given an incrementally growing sample set. The regularized correlation
matrix is kept factorized as a growable Cholesky factor which is extended by
an O(n²) rank-1 append on every accepted sample; a factor grown this way is
bit-identical to one rebuilt from scratch, which is what makes halted and
resumed optimization runs reproduce the uninterrupted trajectory.

Covariance [`Kernel`]s form an expression tree (atomic kernels combined by
sum and product), parametric [`MeanFunction`]s expose feature vectors whose
inner product with a coefficient vector gives the process mean, and the
[`learning`] module estimates kernel hyperparameters by maximum likelihood,
maximum a posteriori, leave-one-out cross-validation or slice sampling.

# Example

```
use smbo_gp::{Flavour, Kernel, MeanFunction, MeanKind, Process};
use linfa::prelude::*;
use linfa::ParamGuard;
use ndarray::{arr1, arr2, array};

let xt = arr2(&[[0.0], [0.25], [0.5], [0.75], [1.0]]);
let yt = arr1(&[0.2, 0.8, 1.0, 0.3, -0.5]);

let mut process = Process::params(
        Kernel::SqExpIso { theta: 0.2 },
        MeanFunction::new(MeanKind::Constant, 1),
    )
    .flavour(Flavour::GaussianMl)
    .noise(1e-10)
    .check()
    .unwrap()
    .fit(&Dataset::new(xt, yt))
    .expect("process trained");

process.update(&array![0.6], 0.7).expect("process updated");
let pred = process.predict(&array![0.4]).expect("prediction");
println!("mean={} std={}", pred.mean, pred.std);
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod kernels;
mod la;
pub mod learning;
mod means;
mod process;

pub use errors::*;
pub use kernels::*;
pub use la::*;
pub use means::*;
pub use process::*;
