use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::core::types::{element_mass, AtomType};
use crate::error::{EngineError, Result};
use crate::potentials::forms::{AngleForm, BondForm, TorsionForm};

/// Default 1-4 scale factors applied to intramolecular pair-potential terms.
pub const DEFAULT_ELEC_14: f64 = 0.5;
pub const DEFAULT_VDW_14: f64 = 0.5;

/// Prototype atom within a species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesAtom {
    pub z: u8,
    pub atom_type: Arc<AtomType>,
    pub r: Point3<f64>,
    pub charge: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeciesBond {
    pub i: usize,
    pub j: usize,
    pub form: BondForm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeciesAngle {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub form: AngleForm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeciesTorsion {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub l: usize,
    pub form: TorsionForm,
}

/// Named subset of atoms defining a labelled origin and optional local axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesSite {
    pub name: String,
    pub origin_atoms: Vec<usize>,
    pub x_axis_atoms: Vec<usize>,
    pub y_axis_atoms: Vec<usize>,
}

/// Scale factors for an intramolecular atom pair's pair-potential terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntraScale {
    pub elec: f64,
    pub vdw: f64,
}

impl IntraScale {
    pub const EXCLUDED: IntraScale = IntraScale { elec: 0.0, vdw: 0.0 };
    pub const FULL: IntraScale = IntraScale { elec: 1.0, vdw: 1.0 };

    pub fn is_excluded(&self) -> bool {
        self.elec == 0.0 && self.vdw == 0.0
    }
}

/// Named mixture of isotopes for a species: effective bound coherent
/// scattering lengths (fm) per atom-type name, overriding natural values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Isotopologue {
    pub name: String,
    pub scattering_lengths: HashMap<String, f64>,
}

/// Immutable molecular template: atom prototypes, connectivity, analysis
/// sites and isotopologues. Finalised once before a run begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    name: String,
    atoms: Vec<SpeciesAtom>,
    bonds: Vec<SpeciesBond>,
    angles: Vec<SpeciesAngle>,
    torsions: Vec<SpeciesTorsion>,
    impropers: Vec<SpeciesTorsion>,
    sites: Vec<SpeciesSite>,
    isotopologues: Vec<Isotopologue>,
    // Flattened n x n matrix of intramolecular pair-potential scalings
    intra_scaling: Vec<IntraScale>,
}

impl Species {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            atoms: Vec::new(),
            bonds: Vec::new(),
            angles: Vec::new(),
            torsions: Vec::new(),
            impropers: Vec::new(),
            sites: Vec::new(),
            isotopologues: Vec::new(),
            intra_scaling: Vec::new(),
        }
    }

    pub fn add_atom(&mut self, z: u8, atom_type: Arc<AtomType>, r: Point3<f64>, charge: f64) -> usize {
        self.atoms.push(SpeciesAtom {
            z,
            atom_type,
            r,
            charge,
        });
        self.atoms.len() - 1
    }

    pub fn add_bond(&mut self, i: usize, j: usize, form: BondForm) -> Result<()> {
        self.check_indices(&[i, j])?;
        self.bonds.push(SpeciesBond { i, j, form });
        Ok(())
    }

    pub fn add_angle(&mut self, i: usize, j: usize, k: usize, form: AngleForm) -> Result<()> {
        self.check_indices(&[i, j, k])?;
        self.angles.push(SpeciesAngle { i, j, k, form });
        Ok(())
    }

    pub fn add_torsion(&mut self, i: usize, j: usize, k: usize, l: usize, form: TorsionForm) -> Result<()> {
        self.check_indices(&[i, j, k, l])?;
        self.torsions.push(SpeciesTorsion { i, j, k, l, form });
        Ok(())
    }

    pub fn add_improper(&mut self, i: usize, j: usize, k: usize, l: usize, form: TorsionForm) -> Result<()> {
        self.check_indices(&[i, j, k, l])?;
        self.impropers.push(SpeciesTorsion { i, j, k, l, form });
        Ok(())
    }

    pub fn add_site(&mut self, site: SpeciesSite) -> Result<()> {
        self.check_indices(&site.origin_atoms)?;
        self.check_indices(&site.x_axis_atoms)?;
        self.check_indices(&site.y_axis_atoms)?;
        self.sites.push(site);
        Ok(())
    }

    pub fn add_isotopologue(&mut self, iso: Isotopologue) {
        self.isotopologues.push(iso);
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        for &i in indices {
            if i >= self.atoms.len() {
                return Err(EngineError::Setup(format!(
                    "atom index {} out of range for species '{}'",
                    i, self.name
                )));
            }
        }
        Ok(())
    }

    /// Build the intramolecular scaling matrix from the connectivity: bonded
    /// (1-2) and angle (1-3) pairs are excluded, torsion end pairs (1-4) are
    /// scaled, everything else interacts fully.
    pub fn finalise(&mut self) -> Result<()> {
        if self.atoms.is_empty() {
            return Err(EngineError::Setup(format!("species '{}' has no atoms", self.name)));
        }

        let n = self.atoms.len();
        self.intra_scaling = vec![IntraScale::FULL; n * n];

        let mut set = |a: usize, b: usize, scale: IntraScale| {
            self.intra_scaling[a * n + b] = scale;
            self.intra_scaling[b * n + a] = scale;
        };

        for t in &self.torsions {
            set(
                t.i,
                t.l,
                IntraScale {
                    elec: DEFAULT_ELEC_14,
                    vdw: DEFAULT_VDW_14,
                },
            );
        }
        for a in &self.angles {
            set(a.i, a.k, IntraScale::EXCLUDED);
        }
        for b in &self.bonds {
            set(b.i, b.j, IntraScale::EXCLUDED);
        }
        for i in 0..n {
            set(i, i, IntraScale::EXCLUDED);
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn atoms(&self) -> &[SpeciesAtom] {
        &self.atoms
    }

    pub fn atom(&self, i: usize) -> &SpeciesAtom {
        &self.atoms[i]
    }

    pub fn bonds(&self) -> &[SpeciesBond] {
        &self.bonds
    }

    pub fn angles(&self) -> &[SpeciesAngle] {
        &self.angles
    }

    pub fn torsions(&self) -> &[SpeciesTorsion] {
        &self.torsions
    }

    pub fn impropers(&self) -> &[SpeciesTorsion] {
        &self.impropers
    }

    pub fn sites(&self) -> &[SpeciesSite] {
        &self.sites
    }

    pub fn site(&self, name: &str) -> Option<&SpeciesSite> {
        self.sites.iter().find(|s| s.name == name)
    }

    pub fn isotopologues(&self) -> &[Isotopologue] {
        &self.isotopologues
    }

    pub fn isotopologue(&self, name: &str) -> Option<&Isotopologue> {
        self.isotopologues.iter().find(|i| i.name == name)
    }

    /// Intramolecular pair-potential scaling between two atoms of this
    /// species. Identity pairs are excluded.
    pub fn intra_scaling(&self, i: usize, j: usize) -> IntraScale {
        let n = self.atoms.len();
        if self.intra_scaling.is_empty() {
            // Species not finalised: treat all intramolecular pairs as full
            return IntraScale::FULL;
        }
        self.intra_scaling[i * n + j]
    }

    /// Whether two distinct atoms are connected through the bonded terms
    /// (1-2, 1-3, or a 1-4 torsion pair). Such pairs are the bound
    /// contributions in pair histograms; other intramolecular pairs count as
    /// unbound.
    pub fn atoms_connected(&self, i: usize, j: usize) -> bool {
        i != j && self.intra_scaling(i, j) != IntraScale::FULL
    }

    pub fn mass(&self) -> f64 {
        self.atoms.iter().map(|a| element_mass(a.z)).sum()
    }

    /// Geometric centre of the reference coordinates.
    pub fn centre_of_geometry(&self) -> Point3<f64> {
        let mut sum = nalgebra::Vector3::zeros();
        for atom in &self.atoms {
            sum += atom.r.coords;
        }
        Point3::from(sum / self.atoms.len() as f64)
    }
}
