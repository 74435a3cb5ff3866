use crate::SamplingMethod;
use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2};

/// Quasi-random design using a scrambled Sobol low-discrepancy sequence
/// (Owen scrambling as implemented by the Burley 2020 algorithm).
///
/// Sobol sequences cover the design space more evenly than random sampling:
/// with `ns` samples each dimension is close to fully stratified without any
/// model fitting. The sequence is fully deterministic for a given seed.
#[derive(Clone, Debug)]
pub struct Sobol<F: Float> {
    /// Sampling space definition as a (nx, 2) matrix
    xlimits: Array2<F>,
    /// Scrambling seed
    seed: u32,
}

impl<F: Float> Sobol<F> {
    /// Constructor given a design space as a (nx, 2) matrix `[[lower bound, upper bound], ...]`
    ///
    /// **Panics** if `xlimits` does not have exactly 2 columns or if the space
    /// dimension exceeds the sequence generator limit (256).
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        if xlimits.nrows() > 256 {
            panic!("Sobol sampling is limited to 256 dimensions");
        }
        Sobol {
            xlimits: xlimits.to_owned(),
            seed: 0,
        }
    }

    /// Sets the scrambling seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed as u32;
        self
    }
}

impl<F: Float> SamplingMethod<F> for Sobol<F> {
    fn sampling_space(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<F> {
        let nx = self.xlimits.nrows();
        let mut doe = Array2::zeros((ns, nx));
        for i in 0..ns {
            for j in 0..nx {
                let v = sobol_burley::sample(i as u32, j as u32, self.seed);
                doe[[i, j]] = F::cast(f64::from(v));
            }
        }
        doe
    }
}
