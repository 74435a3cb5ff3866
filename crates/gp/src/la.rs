//! Dense linear-algebra primitives for the process: row-by-row Cholesky
//! decomposition, triangular solves and the O(n²) rank-1 extension of a
//! Cholesky factor when one sample is appended.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView2, Data, Ix1, Ix2};

/// A growable lower-triangular Cholesky factor `L` with `L·Lᵀ = K + σ²_n·I`.
///
/// The factor lives in a square buffer whose capacity is reserved up front
/// (typically `n_init_samples + n_iterations`), so appending one row per
/// accepted sample never reallocates during an optimization run.
///
/// Rows are computed with the Banachiewicz recurrence, which makes
/// [`CholeskyFactor::append`] produce bit for bit the same row a full
/// [`CholeskyFactor::decompose`] of the extended matrix would: a factor grown
/// incrementally and a factor rebuilt from scratch are interchangeable.
#[derive(Debug, Clone)]
pub struct CholeskyFactor<F: Float> {
    buf: Array2<F>,
    n: usize,
}

impl<F: Float> CholeskyFactor<F> {
    /// An empty factor with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        CholeskyFactor {
            buf: Array2::zeros((capacity.max(1), capacity.max(1))),
            n: 0,
        }
    }

    /// Factorizes the symmetric matrix `k`, reserving room for `capacity` rows.
    ///
    /// Fails with [`GpError::NotPositiveDefinite`] as soon as a pivot is not
    /// strictly positive.
    pub fn decompose(k: &ArrayBase<impl Data<Elem = F>, Ix2>, capacity: usize) -> Result<Self> {
        let n = k.nrows();
        if k.ncols() != n {
            return Err(GpError::DimensionError(format!(
                "expected square matrix, got ({}, {})",
                n,
                k.ncols()
            )));
        }
        let mut chol = Self::with_capacity(capacity.max(n));
        for i in 0..n {
            chol.append(&k.slice(s![i, ..i]), k[[i, i]])?;
        }
        Ok(chol)
    }

    /// Number of rows of the active factor.
    pub fn n(&self) -> usize {
        self.n
    }

    /// View of the active `n × n` lower-triangular block.
    pub fn view(&self) -> ArrayView2<F> {
        self.buf.slice(s![..self.n, ..self.n])
    }

    /// Appends one row to the factor given the cross terms `k_star` against
    /// the existing samples and the regularized self term `k_star_star`.
    ///
    /// Costs O(n²) and leaves the first `n` rows untouched. Fails with
    /// [`GpError::NotPositiveDefinite`] when the new diagonal pivot is not
    /// strictly positive, in which case the factor is left unchanged.
    pub fn append(&mut self, k_star: &ArrayBase<impl Data<Elem = F>, Ix1>, k_star_star: F) -> Result<()> {
        let n = self.n;
        if k_star.len() != n {
            return Err(GpError::DimensionError(format!(
                "cross-correlation row has {} entries, factor has {} rows",
                k_star.len(),
                n
            )));
        }
        if n == self.buf.nrows() {
            self.reserve(2 * self.buf.nrows());
        }
        // Banachiewicz recurrence for row n
        for j in 0..n {
            let mut s = k_star[j];
            for p in 0..j {
                s = s - self.buf[[n, p]] * self.buf[[j, p]];
            }
            self.buf[[n, j]] = s / self.buf[[j, j]];
        }
        let mut d = k_star_star;
        for p in 0..n {
            d = d - self.buf[[n, p]] * self.buf[[n, p]];
        }
        // pivots within accumulated rounding error of zero are as fatal as
        // negative ones
        let tol = k_star_star.abs() * F::epsilon() * F::cast(10. * (n as f64 + 1.));
        if d <= tol || !d.is_finite() {
            // wipe the scratch row so a later append starts clean
            for j in 0..n {
                self.buf[[n, j]] = F::zero();
            }
            return Err(GpError::NotPositiveDefinite(format!(
                "pivot {d:?} on row {n}"
            )));
        }
        self.buf[[n, n]] = d.sqrt();
        self.n += 1;
        Ok(())
    }

    fn reserve(&mut self, capacity: usize) {
        let mut buf = Array2::zeros((capacity, capacity));
        buf.slice_mut(s![..self.n, ..self.n]).assign(&self.view());
        self.buf = buf;
    }

    /// Solves `L·z = b` by forward substitution.
    pub fn solve_lower(&self, b: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        debug_assert_eq!(b.len(), self.n);
        let mut z = b.to_owned();
        for i in 0..self.n {
            for j in 0..i {
                let zj = z[j];
                z[i] = z[i] - self.buf[[i, j]] * zj;
            }
            z[i] = z[i] / self.buf[[i, i]];
        }
        z
    }

    /// Solves `Lᵀ·z = b` by backward substitution.
    pub fn solve_upper(&self, b: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        debug_assert_eq!(b.len(), self.n);
        let mut z = b.to_owned();
        for i in (0..self.n).rev() {
            for j in (i + 1)..self.n {
                let zj = z[j];
                z[i] = z[i] - self.buf[[j, i]] * zj;
            }
            z[i] = z[i] / self.buf[[i, i]];
        }
        z
    }

    /// Solves `(L·Lᵀ)·z = b`, i.e. applies `K⁻¹` to `b`.
    pub fn solve(&self, b: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        self.solve_upper(&self.solve_lower(b))
    }

    /// Solves `L·Z = B` column-wise.
    pub fn solve_lower_mat(&self, b: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        debug_assert_eq!(b.nrows(), self.n);
        let mut z = Array2::zeros(b.raw_dim());
        for (j, col) in b.columns().into_iter().enumerate() {
            z.column_mut(j).assign(&self.solve_lower(&col));
        }
        z
    }

    /// `log |K| = 2·Σ log Lᵢᵢ`
    pub fn log_det(&self) -> F {
        let mut acc = F::zero();
        for i in 0..self.n {
            acc = acc + self.buf[[i, i]].ln();
        }
        acc + acc
    }

    /// Diagonal of `K⁻¹`, obtained from the squared rows of `L⁻¹`.
    pub fn inverse_diagonal(&self) -> Array1<F> {
        let n = self.n;
        let mut diag = Array1::zeros(n);
        let mut e = Array1::zeros(n);
        for j in 0..n {
            e.fill(F::zero());
            e[j] = F::one();
            let col = self.solve_lower(&e);
            // column j of L⁻¹ has zeros above row j
            let mut acc = F::zero();
            for i in j..n {
                acc = acc + col[i] * col[i];
            }
            diag[j] = acc;
        }
        diag
    }
}

/// Reconstructs `L·Lᵀ` from a lower-triangular factor view, used by
/// reconstruction checks.
pub fn lower_triangle_product<F: Float>(l: &ArrayView2<F>) -> Array2<F> {
    let n = l.nrows();
    let mut k = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut acc = F::zero();
            for p in 0..=j {
                acc = acc + l[[i, p]] * l[[j, p]];
            }
            k[[i, j]] = acc;
            k[[j, i]] = acc;
        }
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_decompose_reconstructs() {
        let k = array![[4., 2., 0.6], [2., 2., 0.5], [0.6, 0.5, 1.]];
        let chol = CholeskyFactor::decompose(&k, 8).unwrap();
        let rebuilt = lower_triangle_product(&chol.view());
        assert_abs_diff_eq!(k, rebuilt, epsilon = 1e-12);
    }

    #[test]
    fn test_append_matches_full_factorization() {
        let k = array![
            [2.0, 0.4, 0.2, 0.1],
            [0.4, 2.0, 0.5, 0.3],
            [0.2, 0.5, 2.0, 0.6],
            [0.1, 0.3, 0.6, 2.0]
        ];
        let full = CholeskyFactor::decompose(&k, 4).unwrap();

        let mut grown = CholeskyFactor::decompose(&k.slice(s![..2, ..2]), 4).unwrap();
        grown.append(&k.slice(s![2, ..2]), k[[2, 2]]).unwrap();
        grown.append(&k.slice(s![3, ..3]), k[[3, 3]]).unwrap();

        // bit-identical, not merely close
        assert_eq!(full.view(), grown.view());
    }

    #[test]
    fn test_append_rejects_non_pd() {
        let k = array![[1.0, 1.0], [1.0, 1.0]];
        let mut chol = CholeskyFactor::decompose(&k.slice(s![..1, ..1]), 2).unwrap();
        let res = chol.append(&k.slice(s![1, ..1]), k[[1, 1]]);
        assert!(matches!(res, Err(GpError::NotPositiveDefinite(_))));
        // factor unchanged by the failed append
        assert_eq!(chol.n(), 1);
        assert!(chol.append(&array![0.5], 1.0).is_ok());
    }

    #[test]
    fn test_solves() {
        let k = array![[4., 2.], [2., 3.]];
        let chol = CholeskyFactor::decompose(&k, 2).unwrap();
        let b = array![1., 2.];
        let z = chol.solve(&b);
        assert_abs_diff_eq!(k.dot(&z), b, epsilon = 1e-12);
    }

    #[test]
    fn test_log_det() {
        let k = array![[4., 0.], [0., 9.]];
        let chol = CholeskyFactor::decompose(&k, 2).unwrap();
        assert_abs_diff_eq!(chol.log_det(), 36f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_diagonal() {
        let k = array![[4., 2., 0.6], [2., 2., 0.5], [0.6, 0.5, 1.]];
        let chol = CholeskyFactor::decompose(&k, 3).unwrap();
        let diag = chol.inverse_diagonal();
        // compare against K⁻¹ e_j
        for j in 0..3 {
            let mut e = Array1::zeros(3);
            e[j] = 1.0;
            let col = chol.solve(&e);
            assert_abs_diff_eq!(diag[j], col[j], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_capacity_regrowth() {
        let mut chol: CholeskyFactor<f64> = CholeskyFactor::with_capacity(1);
        chol.append(&Array1::zeros(0), 1.0).unwrap();
        chol.append(&array![0.1], 1.0).unwrap();
        chol.append(&array![0.1, 0.2], 1.0).unwrap();
        assert_eq!(chol.n(), 3);
    }
}
