//! Covariance kernels of the process.
//!
//! A kernel is a tree: atomic kernels at the leaves, `Sum`/`Prod` nodes
//! combining two children owned by value. Isotropic kernels carry a single
//! length-scale, ARD (automatic relevance determination) variants one
//! length-scale per input dimension; the distinction is data, not a type.
//!
//! All hyperparameter gradients are taken with respect to the *logarithm* of
//! the hyperparameter, indexed by the position of the hyperparameter in the
//! tree flattened left-to-right.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order of a Matérn kernel: ν = order/2 with order ∈ {1, 3, 5}
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum MaternOrder {
    /// Matérn 1/2, the exponential kernel
    One,
    /// Matérn 3/2
    Three,
    /// Matérn 5/2
    Five,
}

impl MaternOrder {
    fn scale(&self) -> f64 {
        match self {
            MaternOrder::One => 1.,
            MaternOrder::Three => 3.,
            MaternOrder::Five => 5.,
        }
    }
}

/// Covariance kernel expression tree
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub enum Kernel<F: Float> {
    /// Constant covariance `k = θ`
    Const {
        /// covariance level
        theta: F,
    },
    /// Isotropic dot-product kernel `k = (x1·x2)/θ²`
    Linear {
        /// length-scale
        theta: F,
    },
    /// Per-dimension dot-product kernel `k = Σ x1ᵢ·x2ᵢ/θᵢ²`
    LinearArd {
        /// length-scales, one per input dimension
        theta: Array1<F>,
    },
    /// Kernel over the Hamming distance `k = exp(−h(x1,x2)/θ)` for
    /// categorical-like inputs
    Hamming {
        /// decay length
        theta: F,
    },
    /// Isotropic Matérn kernel with scaled radius `r = √c·‖x1−x2‖/θ`
    MaternIso {
        /// Matérn order
        order: MaternOrder,
        /// length-scale
        theta: F,
    },
    /// ARD Matérn kernel with `r² = c·Σ((x1ᵢ−x2ᵢ)/θᵢ)²`
    MaternArd {
        /// Matérn order
        order: MaternOrder,
        /// length-scales, one per input dimension
        theta: Array1<F>,
    },
    /// Polynomial kernel `k = s²·(x1·x2 + c)^degree`, degree 1 to 6
    Poly {
        /// polynomial degree
        degree: u32,
        /// offset c
        offset: F,
        /// scale s
        scale: F,
    },
    /// Isotropic squared exponential `k = exp(−‖x1−x2‖²/(2θ²))`
    SqExpIso {
        /// length-scale
        theta: F,
    },
    /// ARD squared exponential `k = exp(−½·Σ((x1ᵢ−x2ᵢ)/θᵢ)²)`
    SqExpArd {
        /// length-scales, one per input dimension
        theta: Array1<F>,
    },
    /// Isotropic rational quadratic `k = (1 + r²/(2α))^(−α)` with
    /// `r = ‖x1−x2‖/θ`
    RatQuadIso {
        /// length-scale
        theta: F,
        /// shape α
        alpha: F,
    },
    /// Pointwise sum of two kernels
    Sum(Box<Kernel<F>>, Box<Kernel<F>>),
    /// Pointwise product of two kernels
    Prod(Box<Kernel<F>>, Box<Kernel<F>>),
}

fn sq_norm<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix1>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> F {
    let mut acc = F::zero();
    for (a, b) in x1.iter().zip(x2.iter()) {
        let d = *a - *b;
        acc = acc + d * d;
    }
    acc
}

fn dot<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix1>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> F {
    let mut acc = F::zero();
    for (a, b) in x1.iter().zip(x2.iter()) {
        acc = acc + *a * *b;
    }
    acc
}

fn hamming<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix1>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> F {
    let eps = F::cast(1e-10);
    let mut count = F::zero();
    for (a, b) in x1.iter().zip(x2.iter()) {
        if (*a - *b).abs() > eps {
            count = count + F::one();
        }
    }
    count
}

impl<F: Float> Kernel<F> {
    /// Kernel value `k(x1, x2)`
    pub fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix1>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> F {
        match self {
            Kernel::Const { theta } => *theta,
            Kernel::Linear { theta } => dot(x1, x2) / (*theta * *theta),
            Kernel::LinearArd { theta } => {
                let mut acc = F::zero();
                for ((a, b), t) in x1.iter().zip(x2.iter()).zip(theta.iter()) {
                    acc = acc + *a * *b / (*t * *t);
                }
                acc
            }
            Kernel::Hamming { theta } => (-hamming(x1, x2) / *theta).exp(),
            Kernel::MaternIso { order, theta } => {
                let r = (F::cast(order.scale()) * sq_norm(x1, x2)).sqrt() / *theta;
                matern_of_r(*order, r)
            }
            Kernel::MaternArd { order, theta } => {
                let r = matern_ard_radius(*order, x1, x2, theta);
                matern_of_r(*order, r)
            }
            Kernel::Poly {
                degree,
                offset,
                scale,
            } => *scale * *scale * (dot(x1, x2) + *offset).powi(*degree as i32),
            Kernel::SqExpIso { theta } => {
                let k = sq_norm(x1, x2) / (*theta * *theta);
                (-k / F::cast(2.)).exp()
            }
            Kernel::SqExpArd { theta } => {
                let mut k = F::zero();
                for ((a, b), t) in x1.iter().zip(x2.iter()).zip(theta.iter()) {
                    let d = (*a - *b) / *t;
                    k = k + d * d;
                }
                (-k / F::cast(2.)).exp()
            }
            Kernel::RatQuadIso { theta, alpha } => {
                let u = sq_norm(x1, x2) / (*theta * *theta * F::cast(2.) * *alpha);
                (F::one() + u).powf(-*alpha)
            }
            Kernel::Sum(k1, k2) => k1.value(x1, x2) + k2.value(x1, x2),
            Kernel::Prod(k1, k2) => k1.value(x1, x2) * k2.value(x1, x2),
        }
    }

    /// Derivative of `k(x1, x2)` with respect to the log of the
    /// `grad_index`-th hyperparameter (flattened left-to-right).
    pub fn gradient(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix1>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix1>,
        grad_index: usize,
    ) -> F {
        match self {
            Kernel::Const { theta } => *theta,
            Kernel::Linear { theta } => {
                let two = F::cast(2.);
                -two * dot(x1, x2) / (*theta * *theta)
            }
            Kernel::LinearArd { theta } => {
                let t = theta[grad_index];
                -F::cast(2.) * x1[grad_index] * x2[grad_index] / (t * t)
            }
            Kernel::Hamming { theta } => {
                let h = hamming(x1, x2);
                (-h / *theta).exp() * h / *theta
            }
            Kernel::MaternIso { order, theta } => {
                let r = (F::cast(order.scale()) * sq_norm(x1, x2)).sqrt() / *theta;
                let er = (-r).exp();
                match order {
                    MaternOrder::One => r * er,
                    MaternOrder::Three => r * r * er,
                    MaternOrder::Five => r * r * (F::one() + r) / F::cast(3.) * er,
                }
            }
            Kernel::MaternArd { order, theta } => {
                let c = F::cast(order.scale());
                let r = matern_ard_radius(*order, x1, x2, theta);
                let t = theta[grad_index];
                let d = x1[grad_index] - x2[grad_index];
                let cdt = c * d * d / (t * t);
                let er = (-r).exp();
                match order {
                    MaternOrder::One => {
                        if r == F::zero() {
                            F::zero()
                        } else {
                            cdt / r * er
                        }
                    }
                    MaternOrder::Three => cdt * er,
                    MaternOrder::Five => (F::one() + r) / F::cast(3.) * cdt * er,
                }
            }
            Kernel::Poly {
                degree,
                offset,
                scale,
            } => {
                let base = dot(x1, x2) + *offset;
                match grad_index {
                    0 => {
                        *scale * *scale * F::cast(*degree) * base.powi(*degree as i32 - 1) * *offset
                    }
                    _ => F::cast(2.) * *scale * *scale * base.powi(*degree as i32),
                }
            }
            Kernel::SqExpIso { theta } => {
                let k = sq_norm(x1, x2) / (*theta * *theta);
                (-k / F::cast(2.)).exp() * k
            }
            Kernel::SqExpArd { theta } => {
                let t = theta[grad_index];
                let d = (x1[grad_index] - x2[grad_index]) / t;
                self.value(x1, x2) * d * d
            }
            Kernel::RatQuadIso { theta, alpha } => {
                let u = sq_norm(x1, x2) / (*theta * *theta * F::cast(2.) * *alpha);
                let one_u = F::one() + u;
                match grad_index {
                    0 => F::cast(2.) * *alpha * u * one_u.powf(-*alpha - F::one()),
                    _ => {
                        let k = one_u.powf(-*alpha);
                        k * *alpha * (u / one_u - one_u.ln())
                    }
                }
            }
            Kernel::Sum(k1, k2) => {
                let n1 = k1.n_params();
                if grad_index < n1 {
                    k1.gradient(x1, x2, grad_index)
                } else {
                    k2.gradient(x1, x2, grad_index - n1)
                }
            }
            Kernel::Prod(k1, k2) => {
                let n1 = k1.n_params();
                if grad_index < n1 {
                    k1.gradient(x1, x2, grad_index) * k2.value(x1, x2)
                } else {
                    k1.value(x1, x2) * k2.gradient(x1, x2, grad_index - n1)
                }
            }
        }
    }

    /// Number of hyperparameters of the tree
    pub fn n_params(&self) -> usize {
        match self {
            Kernel::Const { .. }
            | Kernel::Linear { .. }
            | Kernel::Hamming { .. }
            | Kernel::MaternIso { .. }
            | Kernel::SqExpIso { .. } => 1,
            Kernel::LinearArd { theta }
            | Kernel::MaternArd { theta, .. }
            | Kernel::SqExpArd { theta } => theta.len(),
            Kernel::Poly { .. } | Kernel::RatQuadIso { .. } => 2,
            Kernel::Sum(k1, k2) | Kernel::Prod(k1, k2) => k1.n_params() + k2.n_params(),
        }
    }

    /// Hyperparameters of the tree flattened left-to-right
    pub fn params(&self) -> Array1<F> {
        let mut out = Vec::with_capacity(self.n_params());
        self.collect_params(&mut out);
        Array1::from_vec(out)
    }

    fn collect_params(&self, out: &mut Vec<F>) {
        match self {
            Kernel::Const { theta }
            | Kernel::Linear { theta }
            | Kernel::Hamming { theta }
            | Kernel::MaternIso { theta, .. }
            | Kernel::SqExpIso { theta } => out.push(*theta),
            Kernel::LinearArd { theta }
            | Kernel::MaternArd { theta, .. }
            | Kernel::SqExpArd { theta } => out.extend(theta.iter().copied()),
            Kernel::Poly { offset, scale, .. } => {
                out.push(*offset);
                out.push(*scale);
            }
            Kernel::RatQuadIso { theta, alpha } => {
                out.push(*theta);
                out.push(*alpha);
            }
            Kernel::Sum(k1, k2) | Kernel::Prod(k1, k2) => {
                k1.collect_params(out);
                k2.collect_params(out);
            }
        }
    }

    /// Sets the hyperparameters of the tree from a flat vector.
    ///
    /// Fails when the vector length does not match [`Kernel::n_params`].
    pub fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        if params.len() != self.n_params() {
            return Err(GpError::InvalidValueError(format!(
                "kernel {} expects {} hyperparameters, got {}",
                self,
                self.n_params(),
                params.len()
            )));
        }
        let mut iter = params.iter().copied();
        self.assign_params(&mut iter);
        Ok(())
    }

    fn assign_params(&mut self, iter: &mut impl Iterator<Item = F>) {
        match self {
            Kernel::Const { theta }
            | Kernel::Linear { theta }
            | Kernel::Hamming { theta }
            | Kernel::MaternIso { theta, .. }
            | Kernel::SqExpIso { theta } => *theta = iter.next().unwrap(),
            Kernel::LinearArd { theta }
            | Kernel::MaternArd { theta, .. }
            | Kernel::SqExpArd { theta } => {
                for t in theta.iter_mut() {
                    *t = iter.next().unwrap();
                }
            }
            Kernel::Poly { offset, scale, .. } => {
                *offset = iter.next().unwrap();
                *scale = iter.next().unwrap();
            }
            Kernel::RatQuadIso { theta, alpha } => {
                *theta = iter.next().unwrap();
                *alpha = iter.next().unwrap();
            }
            Kernel::Sum(k1, k2) | Kernel::Prod(k1, k2) => {
                k1.assign_params(iter);
                k2.assign_params(iter);
            }
        }
    }

    /// Correlation matrix `K + nugget·I` over the rows of `x`
    pub fn corr_matrix(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>, nugget: F) -> Array2<F> {
        let n = x.nrows();
        let mut k = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..i {
                let v = self.value(&x.row(i), &x.row(j));
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
            k[[i, i]] = self.value(&x.row(i), &x.row(i)) + nugget;
        }
        k
    }

    /// Cross-correlations `[k(xᵢ, q)]` between the rows of `x` and a query point
    pub fn cross_correlations(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        q: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let mut out = Array1::zeros(x.nrows());
        for (i, row) in x.rows().into_iter().enumerate() {
            out[i] = self.value(&row, q);
        }
        out
    }
}

fn matern_of_r<F: Float>(order: MaternOrder, r: F) -> F {
    let er = (-r).exp();
    match order {
        MaternOrder::One => er,
        MaternOrder::Three => (F::one() + r) * er,
        MaternOrder::Five => (F::one() + r * (F::one() + r / F::cast(3.))) * er,
    }
}

fn matern_ard_radius<F: Float>(
    order: MaternOrder,
    x1: &ArrayBase<impl Data<Elem = F>, Ix1>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix1>,
    theta: &Array1<F>,
) -> F {
    let mut acc = F::zero();
    for ((a, b), t) in x1.iter().zip(x2.iter()).zip(theta.iter()) {
        let d = (*a - *b) / *t;
        acc = acc + d * d;
    }
    (F::cast(order.scale()) * acc).sqrt()
}

impl<F: Float> fmt::Display for Kernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kernel::Const { .. } => write!(f, "kConst"),
            Kernel::Linear { .. } => write!(f, "kLinear"),
            Kernel::LinearArd { .. } => write!(f, "kLinearARD"),
            Kernel::Hamming { .. } => write!(f, "kHamming"),
            Kernel::MaternIso { order, .. } => write!(f, "kMaternISO{}", order.scale() as u32),
            Kernel::MaternArd { order, .. } => write!(f, "kMaternARD{}", order.scale() as u32),
            Kernel::Poly { degree, .. } => write!(f, "kPoly{degree}"),
            Kernel::SqExpIso { .. } => write!(f, "kSEISO"),
            Kernel::SqExpArd { .. } => write!(f, "kSEARD"),
            Kernel::RatQuadIso { .. } => write!(f, "kRQISO"),
            Kernel::Sum(k1, k2) => write!(f, "kSum({k1},{k2})"),
            Kernel::Prod(k1, k2) => write!(f, "kProd({k1},{k2})"),
        }
    }
}

impl<F: Float> Kernel<F> {
    /// Builds a kernel tree from an expression string.
    ///
    /// The grammar accepts the factory names (`kMaternISO5`, `kSEARD`,
    /// `kPoly3`, ...), infix combinators `k1+k2` and `k1*k2`
    /// (right-associative, `*` binding tighter than `+`), parentheses, and
    /// the explicit forms `kSum(k1,k2)` / `kProd(k1,k2)`.
    ///
    /// Hyperparameters are initialized to one; use [`Kernel::set_params`] to
    /// install configured values.
    pub fn from_expr(expr: &str, dim: usize) -> Result<Self> {
        let expr: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        parse_sum(&expr, dim)
    }
}

fn split_top_level(expr: &str, sep: char) -> Option<(String, String)> {
    let mut depth = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                return Some((expr[..i].to_string(), expr[i + 1..].to_string()));
            }
            _ => (),
        }
    }
    None
}

fn parse_sum<F: Float>(expr: &str, dim: usize) -> Result<Kernel<F>> {
    if let Some((head, tail)) = split_top_level(expr, '+') {
        let k1 = parse_prod(&head, dim)?;
        let k2 = parse_sum(&tail, dim)?;
        return Ok(Kernel::Sum(Box::new(k1), Box::new(k2)));
    }
    parse_prod(expr, dim)
}

fn parse_prod<F: Float>(expr: &str, dim: usize) -> Result<Kernel<F>> {
    if let Some((head, tail)) = split_top_level(expr, '*') {
        let k1 = parse_atom(&head, dim)?;
        let k2 = parse_prod(&tail, dim)?;
        return Ok(Kernel::Prod(Box::new(k1), Box::new(k2)));
    }
    parse_atom(expr, dim)
}

fn parse_atom<F: Float>(expr: &str, dim: usize) -> Result<Kernel<F>> {
    if let Some(inner) = expr.strip_prefix('(') {
        let inner = inner
            .strip_suffix(')')
            .ok_or_else(|| GpError::UnknownName(format!("unbalanced parentheses in {expr:?}")))?;
        return parse_sum(inner, dim);
    }
    if let Some(args) = expr.strip_prefix("kSum(") {
        let (k1, k2) = parse_pair(args, expr, dim)?;
        return Ok(Kernel::Sum(Box::new(k1), Box::new(k2)));
    }
    if let Some(args) = expr.strip_prefix("kProd(") {
        let (k1, k2) = parse_pair(args, expr, dim)?;
        return Ok(Kernel::Prod(Box::new(k1), Box::new(k2)));
    }
    atomic_kernel(expr, dim)
}

fn parse_pair<F: Float>(args: &str, expr: &str, dim: usize) -> Result<(Kernel<F>, Kernel<F>)> {
    let args = args
        .strip_suffix(')')
        .ok_or_else(|| GpError::UnknownName(format!("unbalanced parentheses in {expr:?}")))?;
    let (a, b) = split_top_level(args, ',')
        .ok_or_else(|| GpError::UnknownName(format!("expected two sub-kernels in {expr:?}")))?;
    Ok((parse_sum(&a, dim)?, parse_sum(&b, dim)?))
}

fn atomic_kernel<F: Float>(name: &str, dim: usize) -> Result<Kernel<F>> {
    let one = F::one();
    let ones = Array1::from_elem(dim, one);
    let kernel = match name {
        "kConst" => Kernel::Const { theta: one },
        "kLinear" => Kernel::Linear { theta: one },
        "kLinearARD" => Kernel::LinearArd { theta: ones },
        "kHamming" => Kernel::Hamming { theta: one },
        "kMaternISO1" => Kernel::MaternIso {
            order: MaternOrder::One,
            theta: one,
        },
        "kMaternISO3" => Kernel::MaternIso {
            order: MaternOrder::Three,
            theta: one,
        },
        "kMaternISO5" => Kernel::MaternIso {
            order: MaternOrder::Five,
            theta: one,
        },
        "kMaternARD1" => Kernel::MaternArd {
            order: MaternOrder::One,
            theta: ones,
        },
        "kMaternARD3" => Kernel::MaternArd {
            order: MaternOrder::Three,
            theta: ones,
        },
        "kMaternARD5" => Kernel::MaternArd {
            order: MaternOrder::Five,
            theta: ones,
        },
        "kSEISO" => Kernel::SqExpIso { theta: one },
        "kSEARD" => Kernel::SqExpArd { theta: ones },
        "kRQISO" => Kernel::RatQuadIso {
            theta: one,
            alpha: one,
        },
        name if name.starts_with("kPoly") => {
            let degree: u32 = name["kPoly".len()..]
                .parse()
                .map_err(|_| GpError::UnknownName(name.to_string()))?;
            if !(1..=6).contains(&degree) {
                return Err(GpError::UnknownName(name.to_string()));
            }
            Kernel::Poly {
                degree,
                offset: one,
                scale: one,
            }
        }
        _ => return Err(GpError::UnknownName(name.to_string())),
    };
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use paste::paste;

    fn finite_diff_log_grad(kernel: &Kernel<f64>, x1: &Array1<f64>, x2: &Array1<f64>, idx: usize) -> f64 {
        let eps: f64 = 1e-6;
        let theta = kernel.params();
        let mut up = kernel.clone();
        let mut down = kernel.clone();
        let mut tu = theta.clone();
        let mut td = theta;
        tu[idx] *= eps.exp();
        td[idx] *= (-eps).exp();
        up.set_params(&tu).unwrap();
        down.set_params(&td).unwrap();
        (up.value(x1, x2) - down.value(x1, x2)) / (2. * eps)
    }

    macro_rules! test_kernel_gradient {
        ($name:ident, $kernel:expr) => {
            paste! {
                #[test]
                fn [<test_grad_ $name>]() {
                    let kernel: Kernel<f64> = $kernel;
                    let x1 = array![0.3, 0.7];
                    let x2 = array![0.5, 0.1];
                    for idx in 0..kernel.n_params() {
                        let expected = finite_diff_log_grad(&kernel, &x1, &x2, idx);
                        let actual = kernel.gradient(&x1, &x2, idx);
                        assert_abs_diff_eq!(actual, expected, epsilon = 1e-5);
                    }
                }
            }
        };
    }

    test_kernel_gradient!(const_, Kernel::Const { theta: 1.5 });
    test_kernel_gradient!(linear, Kernel::Linear { theta: 0.8 });
    test_kernel_gradient!(
        linear_ard,
        Kernel::LinearArd {
            theta: array![0.8, 1.3]
        }
    );
    test_kernel_gradient!(
        matern_iso1,
        Kernel::MaternIso {
            order: MaternOrder::One,
            theta: 0.5
        }
    );
    test_kernel_gradient!(
        matern_iso3,
        Kernel::MaternIso {
            order: MaternOrder::Three,
            theta: 0.5
        }
    );
    test_kernel_gradient!(
        matern_iso5,
        Kernel::MaternIso {
            order: MaternOrder::Five,
            theta: 0.5
        }
    );
    test_kernel_gradient!(
        matern_ard1,
        Kernel::MaternArd {
            order: MaternOrder::One,
            theta: array![0.5, 0.9]
        }
    );
    test_kernel_gradient!(
        matern_ard3,
        Kernel::MaternArd {
            order: MaternOrder::Three,
            theta: array![0.5, 0.9]
        }
    );
    test_kernel_gradient!(
        matern_ard5,
        Kernel::MaternArd {
            order: MaternOrder::Five,
            theta: array![0.5, 0.9]
        }
    );
    test_kernel_gradient!(
        poly3,
        Kernel::Poly {
            degree: 3,
            offset: 0.7,
            scale: 1.2
        }
    );
    test_kernel_gradient!(se_iso, Kernel::SqExpIso { theta: 0.5 });
    test_kernel_gradient!(
        se_ard,
        Kernel::SqExpArd {
            theta: array![0.5, 0.9]
        }
    );
    test_kernel_gradient!(
        rq_iso,
        Kernel::RatQuadIso {
            theta: 0.5,
            alpha: 1.5
        }
    );
    test_kernel_gradient!(
        sum,
        Kernel::Sum(
            Box::new(Kernel::SqExpIso { theta: 0.5 }),
            Box::new(Kernel::Const { theta: 0.3 })
        )
    );
    test_kernel_gradient!(
        prod,
        Kernel::Prod(
            Box::new(Kernel::SqExpIso { theta: 0.5 }),
            Box::new(Kernel::MaternIso {
                order: MaternOrder::Five,
                theta: 0.8
            })
        )
    );

    #[test]
    fn test_sum_composition_law() {
        let k1 = Kernel::SqExpIso { theta: 0.4 };
        let k2 = Kernel::MaternIso {
            order: MaternOrder::Three,
            theta: 0.9,
        };
        let sum = Kernel::Sum(Box::new(k1.clone()), Box::new(k2.clone()));
        let x = array![0.2, 0.8];
        let y = array![0.6, 0.4];
        assert_abs_diff_eq!(sum.value(&x, &y), k1.value(&x, &y) + k2.value(&x, &y));
        // index in k1 routes to k1's own gradient
        assert_abs_diff_eq!(sum.gradient(&x, &y, 0), k1.gradient(&x, &y, 0));
        assert_abs_diff_eq!(sum.gradient(&x, &y, 1), k2.gradient(&x, &y, 0));
    }

    #[test]
    fn test_prod_gradient_scales_by_sibling() {
        let k1 = Kernel::SqExpIso { theta: 0.4 };
        let k2 = Kernel::Const { theta: 2.5 };
        let prod = Kernel::Prod(Box::new(k1.clone()), Box::new(k2.clone()));
        let x = array![0.2];
        let y = array![0.6];
        assert_abs_diff_eq!(
            prod.gradient(&x, &y, 0),
            k1.gradient(&x, &y, 0) * k2.value(&x, &y)
        );
    }

    #[test]
    fn test_params_roundtrip() {
        let mut k: Kernel<f64> = Kernel::from_expr("kSEARD+kConst", 3).unwrap();
        assert_eq!(k.n_params(), 4);
        let theta = array![0.1, 0.2, 0.3, 0.4];
        k.set_params(&theta).unwrap();
        assert_eq!(k.params(), theta);
    }

    #[test]
    fn test_params_length_mismatch() {
        let mut k: Kernel<f64> = Kernel::from_expr("kSEISO", 2).unwrap();
        assert!(k.set_params(&array![1., 2.]).is_err());
    }

    #[test]
    fn test_parser_operators() {
        let k: Kernel<f64> = Kernel::from_expr("kSEISO + kConst * kMaternISO5", 2).unwrap();
        // * binds tighter than +
        assert_eq!(k.to_string(), "kSum(kSEISO,kProd(kConst,kMaternISO5))");
        let k: Kernel<f64> = Kernel::from_expr("(kSEISO + kConst) * kMaternISO3", 2).unwrap();
        assert_eq!(k.to_string(), "kProd(kSum(kSEISO,kConst),kMaternISO3)");
    }

    #[test]
    fn test_parser_factory_form() {
        let k: Kernel<f64> = Kernel::from_expr("kSum(kSEISO,kProd(kConst,kPoly2))", 2).unwrap();
        assert_eq!(k.n_params(), 4);
    }

    #[test]
    fn test_parser_unknown_name() {
        assert!(Kernel::<f64>::from_expr("kWavelet", 2).is_err());
    }

    #[test]
    fn test_self_correlation_positive() {
        let x = array![0.3, 0.4];
        for expr in [
            "kConst",
            "kHamming",
            "kMaternISO1",
            "kMaternARD5",
            "kSEISO",
            "kSEARD",
            "kRQISO",
            "kPoly2",
            "kSEISO+kConst",
            "kSEISO*kMaternISO3",
        ] {
            let k: Kernel<f64> = Kernel::from_expr(expr, 2).unwrap();
            assert!(k.value(&x, &x) > 0., "k(x,x) <= 0 for {expr}");
        }
    }

    #[test]
    fn test_corr_matrix_symmetric_with_nugget() {
        let k: Kernel<f64> = Kernel::from_expr("kSEISO", 1).unwrap();
        let x = array![[0.1], [0.4], [0.9]];
        let m = k.corr_matrix(&x, 1e-8);
        for i in 0..3 {
            assert_abs_diff_eq!(m[[i, i]], 1. + 1e-8, epsilon = 1e-15);
            for j in 0..3 {
                assert_abs_diff_eq!(m[[i, j]], m[[j, i]]);
            }
        }
    }
}
