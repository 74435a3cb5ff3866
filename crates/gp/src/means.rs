//! Parametric mean functions of the process.
//!
//! A mean function exposes a feature map `φ(x) ∈ ℝ^m`; the mean value is the
//! inner product of the features with a coefficient vector β. `Zero` and
//! `One` pin β to 0 and 1, `Constant`, `Linear` and `LinearConstant` carry
//! configurable coefficients.

use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{concatenate, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a mean function feature map
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum MeanKind {
    /// `φ = [1]`, β pinned to 0
    Zero,
    /// `φ = [1]`, β pinned to 1
    One,
    /// `φ = [1]`, β configurable
    Constant,
    /// `φ = x`, one coefficient per dimension
    Linear,
    /// `φ = [1, x]`
    LinearConstant,
}

/// A parametric mean function `μ(x) = β·φ(x)`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub struct MeanFunction<F: Float> {
    kind: MeanKind,
    beta: Array1<F>,
    dim: usize,
}

impl<F: Float> MeanFunction<F> {
    /// Constructor; the feature count `m` is fixed by the kind and the input
    /// dimension.
    pub fn new(kind: MeanKind, dim: usize) -> Self {
        let beta = match kind {
            MeanKind::Zero => Array1::zeros(1),
            MeanKind::One | MeanKind::Constant => Array1::ones(1),
            MeanKind::Linear => Array1::ones(dim),
            MeanKind::LinearConstant => Array1::ones(dim + 1),
        };
        MeanFunction { kind, beta, dim }
    }

    /// Builds a mean function from its factory name
    /// (`mZero`, `mOne`, `mConst`, `mLinear`, `mLinearConst`).
    pub fn from_name(name: &str, dim: usize) -> Result<Self> {
        let kind = match name {
            "mZero" => MeanKind::Zero,
            "mOne" => MeanKind::One,
            "mConst" => MeanKind::Constant,
            "mLinear" => MeanKind::Linear,
            "mLinearConst" => MeanKind::LinearConstant,
            _ => return Err(GpError::UnknownName(name.to_string())),
        };
        Ok(MeanFunction::new(kind, dim))
    }

    /// The kind of this mean function
    pub fn kind(&self) -> MeanKind {
        self.kind
    }

    /// Number of features `m`
    pub fn n_features(&self) -> usize {
        self.beta.len()
    }

    /// Number of coefficients open to tuning; `Zero` and `One` expose none.
    pub fn n_tunable(&self) -> usize {
        match self.kind {
            MeanKind::Zero | MeanKind::One => 0,
            _ => self.beta.len(),
        }
    }

    /// Feature vector `φ(x)`
    pub fn features(&self, x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Array1<F> {
        match self.kind {
            MeanKind::Zero | MeanKind::One | MeanKind::Constant => Array1::ones(1),
            MeanKind::Linear => x.to_owned(),
            MeanKind::LinearConstant => {
                concatenate![Axis(0), Array1::ones(1), x.to_owned()]
            }
        }
    }

    /// Feature matrix `Φ` with one column `φ(xᵢ)` per row of `x`, shape (m, n)
    pub fn features_all(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let mut phi = Array2::zeros((self.n_features(), x.nrows()));
        for (i, row) in x.rows().into_iter().enumerate() {
            phi.column_mut(i).assign(&self.features(&row));
        }
        phi
    }

    /// Mean value `β·φ(x)`
    pub fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        self.features(x).dot(&self.beta)
    }

    /// Mean values over the rows of `x`, i.e. `Φᵀβ`
    pub fn value_all(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        self.features_all(x).t().dot(&self.beta)
    }

    /// Current coefficient vector β
    pub fn coefficients(&self) -> &Array1<F> {
        &self.beta
    }

    /// Sets β; fails on length mismatch or when the kind pins β.
    pub fn set_coefficients(&mut self, beta: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        if self.n_tunable() == 0 {
            return Err(GpError::InvalidValueError(format!(
                "mean function {self} has fixed coefficients"
            )));
        }
        if beta.len() != self.beta.len() {
            return Err(GpError::DimensionError(format!(
                "mean function {} expects {} coefficients, got {}",
                self,
                self.beta.len(),
                beta.len()
            )));
        }
        self.beta.assign(beta);
        Ok(())
    }

    /// Input dimension this mean was built for
    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl<F: Float> fmt::Display for MeanFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self.kind {
            MeanKind::Zero => "mZero",
            MeanKind::One => "mOne",
            MeanKind::Constant => "mConst",
            MeanKind::Linear => "mLinear",
            MeanKind::LinearConstant => "mLinearConst",
        };
        write!(f, "{name}")
    }
}
