use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// --- Elements ---

/// Minimal element table: (Z, symbol, mass in amu, natural bound coherent
/// scattering length in fm).
const ELEMENTS: &[(u8, &str, f64, f64)] = &[
    (1, "H", 1.008, -3.739),
    (2, "He", 4.0026, 3.26),
    (3, "Li", 6.94, -1.90),
    (5, "B", 10.81, 5.30),
    (6, "C", 12.011, 6.646),
    (7, "N", 14.007, 9.36),
    (8, "O", 15.999, 5.803),
    (9, "F", 18.998, 5.654),
    (11, "Na", 22.990, 3.63),
    (12, "Mg", 24.305, 5.375),
    (13, "Al", 26.982, 3.449),
    (14, "Si", 28.085, 4.149),
    (15, "P", 30.974, 5.13),
    (16, "S", 32.06, 2.847),
    (17, "Cl", 35.45, 9.577),
    (18, "Ar", 39.948, 1.909),
    (19, "K", 39.098, 3.67),
    (20, "Ca", 40.078, 4.70),
    (22, "Ti", 47.867, -3.438),
    (26, "Fe", 55.845, 9.45),
    (29, "Cu", 63.546, 7.718),
    (30, "Zn", 65.38, 5.680),
    (35, "Br", 79.904, 6.795),
    (53, "I", 126.904, 5.28),
];

/// Bound coherent scattering length of deuterium (fm).
pub const DEUTERIUM_BC: f64 = 6.671;

pub fn element_symbol(z: u8) -> &'static str {
    ELEMENTS.iter().find(|e| e.0 == z).map(|e| e.1).unwrap_or("X")
}

pub fn element_mass(z: u8) -> f64 {
    ELEMENTS.iter().find(|e| e.0 == z).map(|e| e.2).unwrap_or(1.0)
}

/// Natural-abundance bound coherent scattering length (fm).
pub fn element_bound_coherent(z: u8) -> f64 {
    ELEMENTS.iter().find(|e| e.0 == z).map(|e| e.3).unwrap_or(0.0)
}

pub fn element_from_symbol(symbol: &str) -> Option<u8> {
    let trimmed = symbol.trim();
    ELEMENTS
        .iter()
        .find(|e| e.1.eq_ignore_ascii_case(trimmed))
        .map(|e| e.0)
}

// --- Atom Types ---

/// A named interaction type: element, short-range (Lennard-Jones) parameters
/// and net charge. Shared by reference wherever type identity matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomType {
    pub name: String,
    pub z: u8,
    pub charge: f64,
    pub epsilon: f64, // kJ/mol
    pub sigma: f64,   // Angstroms
}

impl AtomType {
    pub fn new(name: &str, z: u8, charge: f64, epsilon: f64, sigma: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            z,
            charge,
            epsilon,
            sigma,
        })
    }
}

/// Entry in an [`AtomTypeMix`]: the type plus its population in the owning
/// configuration and (once finalised) its number fraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomTypeEntry {
    pub atom_type: Arc<AtomType>,
    pub population: f64,
    pub fraction: f64,
}

/// The unique, ordered set of atom types used by a configuration. The order
/// here is the canonical index space for every partial matrix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtomTypeMix {
    entries: Vec<AtomTypeEntry>,
}

impl AtomTypeMix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or increase the population of) a type. Identity is by pointer
    /// first, falling back to name.
    pub fn add(&mut self, atom_type: &Arc<AtomType>, population: f64) -> usize {
        if let Some(index) = self.index_of(atom_type) {
            self.entries[index].population += population;
            return index;
        }
        self.entries.push(AtomTypeEntry {
            atom_type: atom_type.clone(),
            population,
            fraction: 0.0,
        });
        self.entries.len() - 1
    }

    /// Recalculate number fractions from populations.
    pub fn finalise(&mut self) {
        let total: f64 = self.entries.iter().map(|e| e.population).sum();
        if total > 0.0 {
            for entry in &mut self.entries {
                entry.fraction = entry.population / total;
            }
        }
    }

    pub fn index_of(&self, atom_type: &Arc<AtomType>) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.atom_type, atom_type) || e.atom_type.name == atom_type.name)
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.atom_type.name == name)
    }

    pub fn n_types(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, index: usize) -> &AtomTypeEntry {
        &self.entries[index]
    }

    pub fn atom_type(&self, index: usize) -> &Arc<AtomType> {
        &self.entries[index].atom_type
    }

    pub fn entries(&self) -> &[AtomTypeEntry] {
        &self.entries
    }

    pub fn require_index(&self, atom_type: &Arc<AtomType>) -> Result<usize> {
        self.index_of(atom_type)
            .ok_or_else(|| EngineError::Internal(format!("atom type '{}' missing from mix", atom_type.name)))
    }

    /// Iterate unique unordered type pairs `(i, j)` with `i <= j`, in
    /// pair-index order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> {
        let n = self.entries.len();
        (0..n).flat_map(move |i| (i..n).map(move |j| (i, j)))
    }
}

/// Number of unique unordered pairs for `n` types.
pub fn n_pairs(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Upper-triangular index of the unordered pair `(i, j)`; commutative.
pub fn pair_index(i: usize, j: usize, n: usize) -> usize {
    let (i, j) = if i <= j { (i, j) } else { (j, i) };
    i * n - i * (i + 1) / 2 + j
}
