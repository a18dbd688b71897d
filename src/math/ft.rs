use serde::{Deserialize, Serialize};

use crate::math::data1d::Data1D;

/// Window applied to the integrand of a sine transform, as a function of the
/// fractional position `x / x_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    Rectangular,
    Lorch,
}

impl WindowFunction {
    pub fn value(&self, fraction: f64) -> f64 {
        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Lorch => {
                let x = std::f64::consts::PI * fraction;
                if x.abs() < 1.0e-10 {
                    1.0
                } else {
                    x.sin() / x
                }
            }
        }
    }
}

/// Gaussian broadening applied as a multiplicative factor in the conjugate
/// space of a sine transform. The FT of a Gaussian of the given FWHM is again
/// Gaussian, so broadening reduces to scaling each output point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Broadening {
    None,
    /// Constant Gaussian of the given FWHM.
    Gaussian { fwhm: f64 },
    /// Gaussian whose FWHM grows linearly with the conjugate variable,
    /// suitable for pair-dependent intramolecular broadening.
    ScaledGaussian { fwhm: f64 },
}

impl Broadening {
    /// Factor applied at conjugate value `omega`. With `inverted` the factor
    /// is divided out instead (used when back-transforming broadened data).
    pub fn factor(&self, omega: f64, inverted: bool) -> f64 {
        let value = match *self {
            Broadening::None => 1.0,
            Broadening::Gaussian { fwhm } => {
                let sigma = fwhm / (8.0 * 2.0_f64.ln()).sqrt();
                (-0.5 * (omega * sigma).powi(2)).exp()
            }
            Broadening::ScaledGaussian { fwhm } => {
                let sigma = omega * fwhm / (8.0 * 2.0_f64.ln()).sqrt();
                (-0.5 * sigma.powi(2)).exp()
            }
        };
        if inverted {
            if value.abs() < 1.0e-8 {
                0.0
            } else {
                1.0 / value
            }
        } else {
            value
        }
    }
}

/// In-place sine Fourier transform:
///
/// `f(w) = norm / w * sum_i x_i y(x_i) sin(w x_i) window(x_i / x_last) dx_i`
///
/// With `norm = 4 pi rho` this takes `g(r) - 1` to `S(Q) - 1`; with
/// `norm = 1 / (2 pi^2 rho)` it performs the inverse. The output axis runs
/// from `omega_min` to `omega_max` in steps of `omega_step`.
pub fn sine_ft(
    data: &mut Data1D,
    norm: f64,
    omega_min: f64,
    omega_step: f64,
    omega_max: f64,
    window: WindowFunction,
    broadening: Broadening,
    invert_broadening: bool,
) {
    if data.n_values() < 2 {
        return;
    }

    let x = data.x_axis().to_vec();
    let y = data.values().to_vec();
    let x_max = *x.last().unwrap();

    let mut result = Data1D::new(data.tag());
    let mut omega = omega_min.max(omega_step);
    while omega <= omega_max + omega_step * 1.0e-6 {
        let mut sum = 0.0;
        for i in 0..x.len() {
            // Centred interval widths
            let dx = if i == 0 {
                x[1] - x[0]
            } else if i == x.len() - 1 {
                x[i] - x[i - 1]
            } else {
                0.5 * (x[i + 1] - x[i - 1])
            };
            sum += x[i] * y[i] * (omega * x[i]).sin() * window.value(x[i] / x_max) * dx;
        }
        let value = norm * sum / omega * broadening.factor(omega, invert_broadening);
        result.add_point(omega, value);
        omega += omega_step;
    }

    *data = result;
}
