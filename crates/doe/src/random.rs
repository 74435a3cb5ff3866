use crate::SamplingMethod;
use linfa::Float;
use ndarray::{Array, Array2, ArrayBase, Data, Ix2};
use ndarray_rand::{rand::Rng, rand::SeedableRng, rand_distr::Uniform, RandomExt};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::{Arc, RwLock};

type RngRef<R> = Arc<RwLock<R>>;

/// The Random design consists in drawing samples uniformly.
#[derive(Clone, Debug)]
pub struct Random<F: Float, R: Rng> {
    /// Sampling space definition as a (nx, 2) matrix
    xlimits: Array2<F>,
    /// Random generator used for reproducibility
    rng: RngRef<R>,
}

impl<F: Float> Random<F, Xoshiro256Plus> {
    /// Constructor given a design space as a (nx, 2) matrix `[[lower bound, upper bound], ...]`
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<F: Float, R: Rng> Random<F, R> {
    /// Constructor with given design space and random generator.
    ///
    /// **Panics** if `xlimits` does not have exactly 2 columns.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>, rng: R) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        Random {
            xlimits: xlimits.to_owned(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Sets the random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Random<F, R2> {
        Random {
            xlimits: self.xlimits,
            rng: Arc::new(RwLock::new(rng)),
        }
    }
}

impl<F: Float, R: Rng> SamplingMethod<F> for Random<F, R> {
    fn sampling_space(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<F> {
        let mut rng = self.rng.write().unwrap();
        let nx = self.xlimits.nrows();
        Array::random_using((ns, nx), Uniform::new(0., 1.), &mut *rng).mapv(F::cast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_random_within_bounds() {
        let xlimits = arr2(&[[5., 10.], [0., 1.]]);
        let doe = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .sample(50);
        assert_eq!(doe.dim(), (50, 2));
        for row in doe.rows() {
            assert!(row[0] >= 5. && row[0] <= 10.);
            assert!(row[1] >= 0. && row[1] <= 1.);
        }
    }

    #[test]
    fn test_random_reproducibility() {
        let xlimits = arr2(&[[0., 1.]]);
        let doe1 = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(1))
            .sample(5);
        let doe2 = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(1))
            .sample(5);
        assert_eq!(doe1, doe2);
    }
}
