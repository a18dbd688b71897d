use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::species::{Isotopologue, Species};
use crate::core::types::{element_bound_coherent, AtomTypeMix};
use crate::error::{EngineError, Result};

/// Normalisation applied to a weighted total structure factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalisation {
    None,
    /// <b>^2
    SquareOfAverage,
    /// <b^2>
    AverageOfSquares,
}

// --- Neutron ---

/// Scattering weights for a neutron dataset: per-type effective bound
/// coherent scattering lengths (fm) assembled from isotopologue mixtures,
/// concentration products and the full `c_i c_j b_i b_j (2 - delta_ij)`
/// matrix over the atom-type mix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeutronWeights {
    mixtures: Vec<(Arc<Species>, usize, Vec<(Option<Isotopologue>, f64)>)>,
    mix: AtomTypeMix,
    bound_coherent: Vec<f64>,
    intramolecular_bound_coherent: Vec<f64>,
    weights: Vec<f64>,
    intramolecular_weights: Vec<f64>,
    bound_coherent_square_of_average: f64,
    bound_coherent_average_of_squares: f64,
    valid: bool,
}

impl NeutronWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an isotopologue (None = natural abundance) for a species with
    /// the given relative population within that species' mixture.
    pub fn add_isotopologue(
        &mut self,
        species: &Arc<Species>,
        species_population: usize,
        isotopologue: Option<&Isotopologue>,
        relative_weight: f64,
    ) {
        if let Some(entry) = self.mixtures.iter_mut().find(|(sp, ..)| Arc::ptr_eq(sp, species)) {
            entry.2.push((isotopologue.cloned(), relative_weight));
        } else {
            self.mixtures.push((
                species.clone(),
                species_population,
                vec![(isotopologue.cloned(), relative_weight)],
            ));
        }
    }

    /// Build the type mix and weighting matrices from the registered
    /// mixtures. Types named in `exchangeable` share a common averaged
    /// scattering length across every species in which they appear.
    pub fn create(&mut self, exchangeable: &[String]) -> Result<()> {
        self.mix = AtomTypeMix::new();

        // Populations, and population-weighted effective b per type
        let mut b_sums: Vec<f64> = Vec::new();
        for (species, population, mixture) in &self.mixtures {
            let total_relative: f64 = mixture.iter().map(|(_, w)| w).sum();
            if total_relative <= 0.0 {
                return Err(EngineError::Setup(format!(
                    "isotopologue mixture for species '{}' has zero weight",
                    species.name()
                )));
            }
            for atom in species.atoms() {
                // Effective scattering length under the isotopologue mixture
                let mut b = 0.0;
                for (iso, weight) in mixture {
                    let value = iso
                        .as_ref()
                        .and_then(|i| i.scattering_lengths.get(&atom.atom_type.name).copied())
                        .unwrap_or_else(|| element_bound_coherent(atom.z));
                    b += value * weight / total_relative;
                }
                let index = self.mix.add(&atom.atom_type, *population as f64);
                if index == b_sums.len() {
                    b_sums.push(0.0);
                }
                b_sums[index] += b * *population as f64;
            }
        }
        self.mix.finalise();

        let n = self.mix.n_types();
        self.bound_coherent = (0..n)
            .map(|i| b_sums[i] / self.mix.entry(i).population)
            .collect();

        // Intramolecular correlations always see the actual per-type
        // scattering lengths; only the intermolecular weights below take the
        // exchange-averaged values
        self.intramolecular_bound_coherent = self.bound_coherent.clone();

        // Exchangeable types take the global population-weighted average
        if !exchangeable.is_empty() {
            let mut pop_sum = 0.0;
            let mut b_sum = 0.0;
            for i in 0..n {
                if exchangeable.contains(&self.mix.atom_type(i).name) {
                    pop_sum += self.mix.entry(i).population;
                    b_sum += self.bound_coherent[i] * self.mix.entry(i).population;
                }
            }
            if pop_sum > 0.0 {
                let average = b_sum / pop_sum;
                for i in 0..n {
                    if exchangeable.contains(&self.mix.atom_type(i).name) {
                        self.bound_coherent[i] = average;
                    }
                }
            }
        }

        // Weight matrices and single-atom averages
        self.weights = vec![0.0; n * n];
        self.intramolecular_weights = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let ci = self.mix.entry(i).fraction;
                let cj = self.mix.entry(j).fraction;
                let factor = if i == j { 1.0 } else { 2.0 };
                self.weights[i * n + j] = ci * cj * self.bound_coherent[i] * self.bound_coherent[j] * factor;
                self.intramolecular_weights[i * n + j] = ci
                    * cj
                    * self.intramolecular_bound_coherent[i]
                    * self.intramolecular_bound_coherent[j]
                    * factor;
            }
        }

        let b_average: f64 = (0..n).map(|i| self.mix.entry(i).fraction * self.bound_coherent[i]).sum();
        self.bound_coherent_square_of_average = b_average * b_average;
        self.bound_coherent_average_of_squares = (0..n)
            .map(|i| self.mix.entry(i).fraction * self.bound_coherent[i].powi(2))
            .sum();

        self.valid = true;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn atom_types(&self) -> &AtomTypeMix {
        &self.mix
    }

    pub fn bound_coherent(&self, i: usize) -> f64 {
        self.bound_coherent[i]
    }

    /// Actual (non-exchange-averaged) bound coherent scattering length (fm),
    /// as used for intramolecular correlations.
    pub fn intramolecular_bound_coherent(&self, i: usize) -> f64 {
        self.intramolecular_bound_coherent[i]
    }

    /// Full weight for the unordered pair (i, j).
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        self.weights[i * self.mix.n_types() + j]
    }

    pub fn intramolecular_weight(&self, i: usize, j: usize) -> f64 {
        self.intramolecular_weights[i * self.mix.n_types() + j]
    }

    /// <b>^2 (fm^2).
    pub fn bound_coherent_square_of_average(&self) -> f64 {
        self.bound_coherent_square_of_average
    }

    /// <b^2> (fm^2).
    pub fn bound_coherent_average_of_squares(&self) -> f64 {
        self.bound_coherent_average_of_squares
    }

    pub fn normalisation_factor(&self, normalisation: Normalisation) -> f64 {
        match normalisation {
            Normalisation::None => 1.0,
            Normalisation::SquareOfAverage => self.bound_coherent_square_of_average,
            Normalisation::AverageOfSquares => self.bound_coherent_average_of_squares,
        }
    }
}

// --- X-ray ---

/// Cromer-Mann four-Gaussian form factor coefficients: (Z, a[4], b[4], c).
const FORM_FACTORS: &[(u8, [f64; 4], [f64; 4], f64)] = &[
    (
        1,
        [0.489918, 0.262003, 0.196767, 0.049879],
        [20.6593, 7.74039, 49.5519, 2.20159],
        0.001305,
    ),
    (
        6,
        [2.31000, 1.02000, 1.58860, 0.865000],
        [20.8439, 10.2075, 0.568700, 51.6512],
        0.215600,
    ),
    (
        7,
        [12.2126, 3.13220, 2.01250, 1.16630],
        [0.005700, 9.89330, 28.9975, 0.582600],
        -11.529,
    ),
    (
        8,
        [3.04850, 2.28680, 1.54630, 0.867000],
        [13.2771, 5.70110, 0.323900, 32.9089],
        0.250800,
    ),
    (
        11,
        [4.76260, 3.17360, 1.26740, 1.11280],
        [3.28500, 8.84220, 0.313600, 129.424],
        0.676000,
    ),
    (
        12,
        [5.42040, 2.17350, 1.22690, 2.30730],
        [2.82750, 79.2611, 0.380800, 7.19370],
        0.858400,
    ),
    (
        14,
        [6.29150, 3.03530, 1.98910, 1.54100],
        [2.43860, 32.3337, 0.678500, 81.6937],
        1.14070,
    ),
    (
        15,
        [6.43450, 4.17910, 1.78000, 1.49080],
        [1.90670, 27.1570, 0.526000, 68.1645],
        1.11490,
    ),
    (
        16,
        [6.90530, 5.20340, 1.43790, 1.58630],
        [1.46790, 22.2151, 0.253600, 56.1720],
        0.866900,
    ),
    (
        17,
        [11.4604, 7.19640, 6.25560, 1.64550],
        [0.010400, 1.16620, 18.5194, 47.7784],
        -9.5574,
    ),
    (
        19,
        [8.21860, 7.43980, 1.05190, 0.865900],
        [12.7949, 0.774800, 213.187, 41.6841],
        1.42280,
    ),
    (
        20,
        [8.62660, 7.38730, 1.58990, 1.02110],
        [10.4421, 0.659900, 85.7484, 178.437],
        1.37510,
    ),
    (
        26,
        [11.7695, 7.35730, 3.52220, 2.30450],
        [4.76110, 0.307200, 15.3535, 76.8805],
        1.03690,
    ),
];

/// Atomic form factor f(Q) for element `z`, if tabulated.
pub fn form_factor(z: u8, q: f64) -> Option<f64> {
    let (_, a, b, c) = FORM_FACTORS.iter().find(|entry| entry.0 == z)?;
    // Coefficients are tabulated against s = Q / 4pi
    let s_sq = (q / (4.0 * std::f64::consts::PI)).powi(2);
    Some(a.iter().zip(b).map(|(ai, bi)| ai * (-bi * s_sq).exp()).sum::<f64>() + c)
}

/// Scattering weights for an X-ray dataset: Q-dependent form-factor products
/// over the atom-type mix, plus the concentration pre-factors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XRayWeights {
    mix: AtomTypeMix,
    valid: bool,
}

impl XRayWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_species(&mut self, species: &Arc<Species>, population: usize) {
        for atom in species.atoms() {
            self.mix.add(&atom.atom_type, population as f64);
        }
    }

    /// Finalise fractions and check that form factors exist for every element
    /// present.
    pub fn finalise(&mut self) -> Result<()> {
        self.mix.finalise();
        for entry in self.mix.entries() {
            if form_factor(entry.atom_type.z, 0.0).is_none() {
                return Err(EngineError::Setup(format!(
                    "no form factor data available for element Z={} (type '{}')",
                    entry.atom_type.z, entry.atom_type.name
                )));
            }
        }
        self.valid = true;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn atom_types(&self) -> &AtomTypeMix {
        &self.mix
    }

    pub fn form_factor(&self, i: usize, q: f64) -> f64 {
        form_factor(self.mix.atom_type(i).z, q).unwrap_or(0.0)
    }

    /// Concentration pre-factor `c_i c_j (2 - delta_ij)`.
    pub fn pre_factor(&self, i: usize, j: usize) -> f64 {
        let factor = if i == j { 1.0 } else { 2.0 };
        self.mix.entry(i).fraction * self.mix.entry(j).fraction * factor
    }

    /// Full weight `c_i c_j f_i(Q) f_j(Q) (2 - delta_ij)`.
    pub fn weight(&self, i: usize, j: usize, q: f64) -> f64 {
        self.pre_factor(i, j) * self.form_factor(i, q) * self.form_factor(j, q)
    }

    /// Q-dependent <f>^2.
    pub fn square_of_average(&self, q: f64) -> f64 {
        let average: f64 = (0..self.mix.n_types())
            .map(|i| self.mix.entry(i).fraction * self.form_factor(i, q))
            .sum();
        average * average
    }

    /// Q-dependent <f^2>.
    pub fn average_of_squares(&self, q: f64) -> f64 {
        (0..self.mix.n_types())
            .map(|i| self.mix.entry(i).fraction * self.form_factor(i, q).powi(2))
            .sum()
    }

    pub fn normalisation_factor(&self, normalisation: Normalisation, q: f64) -> f64 {
        match normalisation {
            Normalisation::None => 1.0,
            Normalisation::SquareOfAverage => self.square_of_average(q),
            Normalisation::AverageOfSquares => self.average_of_squares(q),
        }
    }
}
