/*!
This library implements the sampling methods used to build the initial design
of a surrogate-based optimizer: [Latin Hypercube sampling](https://en.wikipedia.org/wiki/Latin_hypercube_sampling),
[Sobol sequences](https://en.wikipedia.org/wiki/Sobol_sequence) and plain random sampling.

A sampling method generates a set of points within a design space `xlimits`,
defined as a 2D ndarray `(nx, 2)` specifying the lower bound and upper bound
of each of the `nx` components of the samples `x`.

Example:
```
use smbo_doe::{Lhs, LhsKind, Random, Sobol, SamplingMethod};
use ndarray::arr2;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

// Design space is defined as [5., 10.] x [0., 1.], samples are 2-dimensional.
let xlimits = arr2(&[[5., 10.], [0., 1.]]);
// Five samples using centered Latin Hypercube sampling.
let samples = Lhs::new(&xlimits)
    .with_rng(Xoshiro256Plus::seed_from_u64(42))
    .kind(LhsKind::Centered)
    .sample(5);
// or with a scrambled Sobol sequence
let samples = Sobol::new(&xlimits).with_seed(42).sample(5);
// or randomly
let samples = Random::new(&xlimits).with_rng(Xoshiro256Plus::seed_from_u64(42)).sample(5);
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod lhs;
mod random;
mod sobol;
mod traits;

pub use lhs::*;
pub use random::*;
pub use sobol::*;
pub use traits::*;
