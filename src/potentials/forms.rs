use serde::{Deserialize, Serialize};

/// Functional forms for bond stretch terms. Energies in kJ/mol, distances in
/// Angstroms; `derivative` returns dU/dr.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "form")]
pub enum BondForm {
    /// U = 0.5 k (r - eq)^2
    Harmonic { k: f64, eq: f64 },
    /// U = D [1 - exp(-a (r - eq))]^2
    Morse { d: f64, a: f64, eq: f64 },
}

impl BondForm {
    pub fn energy(&self, r: f64) -> f64 {
        match *self {
            BondForm::Harmonic { k, eq } => 0.5 * k * (r - eq).powi(2),
            BondForm::Morse { d, a, eq } => {
                let e = 1.0 - (-a * (r - eq)).exp();
                d * e * e
            }
        }
    }

    pub fn derivative(&self, r: f64) -> f64 {
        match *self {
            BondForm::Harmonic { k, eq } => k * (r - eq),
            BondForm::Morse { d, a, eq } => {
                let x = (-a * (r - eq)).exp();
                2.0 * d * a * x * (1.0 - x)
            }
        }
    }

    /// Equilibrium distance, used when exporting force-field tables.
    pub fn equilibrium(&self) -> f64 {
        match *self {
            BondForm::Harmonic { eq, .. } | BondForm::Morse { eq, .. } => eq,
        }
    }

    /// Four-character DL_POLY keyword and parameter list.
    pub fn dl_poly(&self) -> (&'static str, Vec<f64>) {
        match *self {
            BondForm::Harmonic { k, eq } => ("harm", vec![k, eq]),
            BondForm::Morse { d, a, eq } => ("mors", vec![d, eq, a]),
        }
    }
}

/// Functional forms for angle bend terms. `theta` in radians internally;
/// equilibrium values are stored in degrees as conventional in input files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "form")]
pub enum AngleForm {
    /// U = 0.5 k (theta - eq)^2
    Harmonic { k: f64, eq: f64 },
    /// U = k [1 + s cos(n theta - eq)]
    Cosine { k: f64, n: f64, eq: f64, s: f64 },
}

impl AngleForm {
    pub fn energy(&self, theta: f64) -> f64 {
        match *self {
            AngleForm::Harmonic { k, eq } => 0.5 * k * (theta - eq.to_radians()).powi(2),
            AngleForm::Cosine { k, n, eq, s } => k * (1.0 + s * (n * theta - eq.to_radians()).cos()),
        }
    }

    /// dU/dtheta.
    pub fn derivative(&self, theta: f64) -> f64 {
        match *self {
            AngleForm::Harmonic { k, eq } => k * (theta - eq.to_radians()),
            AngleForm::Cosine { k, n, eq, s } => -k * s * n * (n * theta - eq.to_radians()).sin(),
        }
    }

    pub fn dl_poly(&self) -> (&'static str, Vec<f64>) {
        match *self {
            AngleForm::Harmonic { k, eq } => ("harm", vec![k, eq]),
            AngleForm::Cosine { k, n, eq, s } => ("cos ", vec![k, eq, n * s]),
        }
    }
}

/// Functional forms for torsion (and improper) terms; `phi` in radians.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "form")]
pub enum TorsionForm {
    /// U = k [1 + cos(n phi - eq)]
    Cosine { k: f64, n: f64, eq: f64 },
    /// U = 0.5 [k1 (1 + cos phi) + k2 (1 - cos 2phi) + k3 (1 + cos 3phi)]
    Cos3 { k1: f64, k2: f64, k3: f64 },
}

impl TorsionForm {
    pub fn energy(&self, phi: f64) -> f64 {
        match *self {
            TorsionForm::Cosine { k, n, eq } => k * (1.0 + (n * phi - eq.to_radians()).cos()),
            TorsionForm::Cos3 { k1, k2, k3 } => {
                0.5 * (k1 * (1.0 + phi.cos()) + k2 * (1.0 - (2.0 * phi).cos()) + k3 * (1.0 + (3.0 * phi).cos()))
            }
        }
    }

    /// dU/dphi.
    pub fn derivative(&self, phi: f64) -> f64 {
        match *self {
            TorsionForm::Cosine { k, n, eq } => -k * n * (n * phi - eq.to_radians()).sin(),
            TorsionForm::Cos3 { k1, k2, k3 } => {
                0.5 * (-k1 * phi.sin() + 2.0 * k2 * (2.0 * phi).sin() - 3.0 * k3 * (3.0 * phi).sin())
            }
        }
    }

    pub fn dl_poly(&self) -> (&'static str, Vec<f64>) {
        match *self {
            TorsionForm::Cosine { k, n, eq } => ("cos ", vec![k, eq, n]),
            TorsionForm::Cos3 { k1, k2, k3 } => ("cos3", vec![k1, k2, k3]),
        }
    }
}
