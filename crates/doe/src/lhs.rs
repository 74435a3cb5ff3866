use crate::SamplingMethod;
use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2};
use ndarray_rand::rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::{Arc, RwLock};

/// Kinds of Latin Hypercube design
#[derive(Clone, Copy, Debug, Default)]
pub enum LhsKind {
    /// each sample is drawn uniformly within its latin hypercube cell
    #[default]
    Classic,
    /// each sample sits at the center of its latin hypercube cell
    Centered,
}

type RngRef<R> = Arc<RwLock<R>>;

/// Latin Hypercube sampling.
///
/// Each dimension is divided into `ns` cells where `ns` is the number of
/// requested samples, and exactly one point lands in each cell. Cell
/// assignment is a per-dimension random permutation, so the resulting design
/// has full stratification in every single dimension.
#[derive(Clone, Debug)]
pub struct Lhs<F: Float, R: Rng> {
    /// Sampling space definition as a (nx, 2) matrix
    xlimits: Array2<F>,
    /// The requested kind of LHS
    kind: LhsKind,
    /// Random generator used for reproducibility
    rng: RngRef<R>,
}

impl<F: Float> Lhs<F, Xoshiro256Plus> {
    /// Constructor given a design space as a (nx, 2) matrix `[[lower bound, upper bound], ...]`
    ///
    /// ```
    /// use smbo_doe::Lhs;
    /// use ndarray::arr2;
    ///
    /// let doe = Lhs::new(&arr2(&[[0.0, 1.0], [5.0, 10.0]]));
    /// ```
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<F: Float, R: Rng> Lhs<F, R> {
    /// Constructor with given design space and random generator.
    ///
    /// **Panics** if `xlimits` does not have exactly 2 columns.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>, rng: R) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        Lhs {
            xlimits: xlimits.to_owned(),
            kind: LhsKind::default(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Sets the kind of LHS
    pub fn kind(mut self, kind: LhsKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Lhs<F, R2> {
        Lhs {
            xlimits: self.xlimits,
            kind: self.kind,
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    fn cell_positions(&self, ns: usize) -> Array2<F> {
        let nx = self.xlimits.nrows();
        let mut rng = self.rng.write().unwrap();
        let mut doe = Array2::zeros((ns, nx));
        let mut cells: Vec<usize> = (0..ns).collect();
        for j in 0..nx {
            cells.shuffle(&mut *rng);
            for (i, &cell) in cells.iter().enumerate() {
                let offset = match self.kind {
                    LhsKind::Classic => rng.gen::<f64>(),
                    LhsKind::Centered => 0.5,
                };
                doe[[i, j]] = F::cast((cell as f64 + offset) / ns as f64);
            }
        }
        doe
    }
}

impl<F: Float, R: Rng> SamplingMethod<F> for Lhs<F, R> {
    fn sampling_space(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<F> {
        self.cell_positions(ns)
    }
}
