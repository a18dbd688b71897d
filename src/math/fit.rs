use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::data1d::Data1D;

/// Basis family used to approximate difference functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpansionFunction {
    Gaussian,
    Poisson,
}

/// Linear expansion of a tabulated function over `n_functions` basis terms
/// centred on a regular grid across the data range.
///
/// Gaussian terms are `exp(-(x - x_k)^2 / (2 sigma^2))`; Poisson terms are
/// the normalised `(x / x_k)^(x_k / sigma) exp(-(x - x_k) / sigma)` bumps,
/// which share the Gaussians' locality but vanish at the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionFit {
    function: ExpansionFunction,
    centres: Vec<f64>,
    sigma: f64,
    coefficients: Vec<f64>,
}

impl FunctionFit {
    /// Least-squares fit of `data` with `n_functions` terms of width `sigma`.
    /// Solved through the SVD pseudoinverse of the basis matrix.
    pub fn fit(data: &Data1D, function: ExpansionFunction, n_functions: usize, sigma: f64) -> Result<Self> {
        if data.n_values() < 2 || n_functions == 0 {
            return Err(EngineError::Computation("insufficient data or functions for fit".into()));
        }
        if sigma <= 0.0 {
            return Err(EngineError::Computation("fit function width must be positive".into()));
        }

        let x_min = data.x(0);
        let x_max = data.x(data.n_values() - 1);
        let spacing = (x_max - x_min) / n_functions as f64;
        let centres: Vec<f64> = (0..n_functions).map(|k| x_min + (k as f64 + 0.5) * spacing).collect();

        let n_points = data.n_values();
        let mut basis = DMatrix::zeros(n_points, n_functions);
        for m in 0..n_points {
            for k in 0..n_functions {
                basis[(m, k)] = evaluate_basis(function, data.x(m), centres[k], sigma);
            }
        }
        let rhs = DVector::from_iterator(n_points, data.values().iter().copied());

        let svd = basis.svd(true, true);
        let solution = svd
            .solve(&rhs, 1.0e-10)
            .map_err(|e| EngineError::Computation(format!("basis fit failed: {}", e)))?;

        Ok(Self {
            function,
            centres,
            sigma,
            coefficients: solution.iter().copied().collect(),
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn n_functions(&self) -> usize {
        self.centres.len()
    }

    /// Smooth the coefficient vector with a boxcar of window `2n + 1`.
    pub fn smooth_coefficients(&mut self, n: usize) {
        if n == 0 || self.coefficients.len() < 3 {
            return;
        }
        let src = self.coefficients.clone();
        for i in 0..src.len() {
            let lo = i.saturating_sub(n);
            let hi = (i + n).min(src.len() - 1);
            self.coefficients[i] = src[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;
        }
    }

    /// Evaluate the fitted expansion at `x`.
    pub fn value(&self, x: f64) -> f64 {
        self.centres
            .iter()
            .zip(&self.coefficients)
            .map(|(&centre, &c)| c * evaluate_basis(self.function, x, centre, self.sigma))
            .sum()
    }

    /// Tabulate the expansion on a regular axis.
    pub fn approximation(&self, tag: &str, x_min: f64, x_step: f64, x_max: f64) -> Data1D {
        let mut data = Data1D::regular(tag, x_min, x_step, x_max);
        for i in 0..data.n_values() {
            let v = self.value(data.x(i));
            data.set_value(i, v);
        }
        data
    }

    /// Percentage error of the fit against its source data.
    pub fn percent_error(&self, data: &Data1D) -> f64 {
        let mut sum_delta = 0.0;
        let mut sum_ref = 0.0;
        for i in 0..data.n_values() {
            sum_delta += (data.value(i) - self.value(data.x(i))).abs();
            sum_ref += data.value(i).abs();
        }
        if sum_ref > 0.0 {
            100.0 * sum_delta / sum_ref
        } else {
            0.0
        }
    }
}

fn evaluate_basis(function: ExpansionFunction, x: f64, centre: f64, sigma: f64) -> f64 {
    match function {
        ExpansionFunction::Gaussian => (-(x - centre).powi(2) / (2.0 * sigma * sigma)).exp(),
        ExpansionFunction::Poisson => {
            if x <= 0.0 || centre <= 0.0 {
                return 0.0;
            }
            let shape = centre / sigma;
            ((x / centre).ln() * shape - (x - centre) / sigma).exp()
        }
    }
}
