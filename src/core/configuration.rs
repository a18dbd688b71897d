use std::sync::Arc;

use nalgebra::{Matrix3, Point3, Rotation3, Unit, Vector3};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::cells::CellArray;
use crate::core::lattice::Lattice;
use crate::core::species::Species;
use crate::core::types::AtomTypeMix;
use crate::error::{EngineError, Result};

/// A single atom instance. Atoms are owned by the configuration as a densely
/// packed vector; molecules and cells refer to them by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub r: Point3<f64>,
    pub z: u8,
    pub charge: f64,
    /// Index into the configuration's atom-type mix.
    pub local_type_index: usize,
    /// Index of the prototype atom within the owning molecule's species.
    pub species_atom_index: usize,
    /// Index of the owning molecule.
    pub molecule: usize,
    /// Index of the cell currently containing this atom.
    pub cell: usize,
}

/// An instance of a species: ordered global atom indices plus the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Molecule {
    pub species: Arc<Species>,
    pub atoms: Vec<usize>,
    /// Global index of this molecule's first atom.
    pub global_offset: usize,
}

/// Optional extended potential acting on atoms in addition to the pair
/// potentials and geometry terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExternalPotential {
    /// Harmonic restraint toward `origin`: U = 0.5 k |r - origin|^2, applied
    /// to all atoms or only to those of the named species.
    SphericalWell {
        origin: Point3<f64>,
        k: f64,
        species: Option<String>,
    },
}

/// Instruction in a configuration's generator programme.
#[derive(Debug, Clone)]
pub enum ProcedureNode {
    /// Insert `population` copies of a species at random positions and
    /// orientations. If `density` (atoms/A^3) is given and no box exists yet,
    /// a cubic box is created to match; lowering the density of an existing
    /// box is rejected.
    AddSpecies {
        species: Arc<Species>,
        population: usize,
        density: Option<f64>,
    },
    SetTemperature(f64),
}

/// Owns atoms, molecules, species populations, the atom-type mix, the cell
/// array and any external potentials.
#[derive(Debug, Clone)]
pub struct Configuration {
    name: String,
    lattice: Lattice,
    cells: CellArray,
    atoms: Vec<Atom>,
    molecules: Vec<Molecule>,
    species_populations: Vec<(Arc<Species>, usize)>,
    atom_types: AtomTypeMix,
    external_potentials: Vec<ExternalPotential>,
    temperature: f64,
    contents_version: u64,
}

impl Configuration {
    pub fn new(name: &str, lattice: Lattice) -> Self {
        Self {
            name: name.to_string(),
            lattice,
            cells: CellArray::default(),
            atoms: Vec::new(),
            molecules: Vec::new(),
            species_populations: Vec::new(),
            atom_types: AtomTypeMix::new(),
            external_potentials: Vec::new(),
            temperature: 300.0,
            contents_version: 0,
        }
    }

    /// Build a configuration by executing a generator programme. All workers
    /// run this with the same seed, so the result is identical everywhere.
    pub fn generate(
        name: &str,
        lattice: Option<Lattice>,
        nodes: &[ProcedureNode],
        seed: u64,
    ) -> Result<Self> {
        let have_box = lattice.is_some();
        let mut cfg = Self::new(name, lattice.unwrap_or_else(|| Lattice::cubic(1.0)));
        let mut rng = ChaCha12Rng::seed_from_u64(seed);

        for node in nodes {
            match node {
                ProcedureNode::AddSpecies {
                    species,
                    population,
                    density,
                } => cfg.add_species(species, *population, *density, have_box || !cfg.atoms.is_empty(), &mut rng)?,
                ProcedureNode::SetTemperature(t) => cfg.temperature = *t,
            }
        }

        cfg.atom_types.finalise();
        Ok(cfg)
    }

    fn add_species(
        &mut self,
        species: &Arc<Species>,
        population: usize,
        density: Option<f64>,
        box_fixed: bool,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        if species.n_atoms() == 0 {
            return Err(EngineError::Setup(format!("species '{}' is empty", species.name())));
        }

        // Resolve the box from the requested density
        if let Some(rho) = density {
            if rho <= 0.0 {
                return Err(EngineError::Setup("requested density must be positive".into()));
            }
            let n_new_atoms = (species.n_atoms() * population) as f64;
            let required_volume = (self.atoms.len() as f64 + n_new_atoms) / rho;
            if !box_fixed {
                self.lattice = Lattice::cubic(required_volume.cbrt());
            } else if required_volume > self.lattice.volume() * (1.0 + 1.0e-9) {
                // Expanding an existing box to dilute its contents is rejected
                // rather than silently applied
                return Err(EngineError::Setup(format!(
                    "adding {} '{}' at density {} would require expanding the box",
                    population,
                    species.name(),
                    rho
                )));
            }
        }

        info!(
            "Adding {} copies of species '{}' to configuration '{}'",
            population,
            species.name(),
            self.name
        );

        let centre = species.centre_of_geometry();
        for _ in 0..population {
            // Random rotation about the template centre plus random placement
            let axis = Unit::new_normalize(Vector3::new(
                rng.gen::<f64>() - 0.5,
                rng.gen::<f64>() - 0.5,
                rng.gen::<f64>() - 0.5,
            ));
            let rot = Rotation3::from_axis_angle(&axis, rng.gen_range(0.0..std::f64::consts::TAU));
            let frac = Point3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
            let origin = self.lattice.to_cartesian(&frac);

            let mol_index = self.molecules.len();
            let global_offset = self.atoms.len();
            let mut atom_indices = Vec::with_capacity(species.n_atoms());
            for (sp_index, proto) in species.atoms().iter().enumerate() {
                let local_type_index = self.atom_types.add(&proto.atom_type, 1.0);
                let r = origin + rot * (proto.r - centre);
                atom_indices.push(self.atoms.len());
                self.atoms.push(Atom {
                    r,
                    z: proto.z,
                    charge: proto.charge,
                    local_type_index,
                    species_atom_index: sp_index,
                    molecule: mol_index,
                    cell: 0,
                });
            }
            self.molecules.push(Molecule {
                species: species.clone(),
                atoms: atom_indices,
                global_offset,
            });
        }

        if let Some(entry) = self
            .species_populations
            .iter_mut()
            .find(|(sp, _)| Arc::ptr_eq(sp, species))
        {
            entry.1 += population;
        } else {
            self.species_populations.push((species.clone(), population));
        }

        Ok(())
    }

    /// (Re)build the cell array for the current box and re-home every atom.
    /// Called whenever the box or the pair-potential cutoff changes.
    pub fn update_cells(&mut self, pair_potential_range: f64) -> Result<()> {
        let cell_size = (pair_potential_range / 2.0).max(1.0e-3);
        self.cells = CellArray::generate(&self.lattice, cell_size, pair_potential_range)?;
        self.update_all_atom_locations();
        Ok(())
    }

    /// Re-home a single atom after its position changed.
    pub fn update_atom_location(&mut self, i: usize) {
        let new_cell = self.cells.cell_index_of(&self.lattice, &self.atoms[i].r);
        let old_cell = self.atoms[i].cell;
        if new_cell != old_cell {
            self.cells.remove_atom_from_cell(i, old_cell);
            self.cells.add_atom_to_cell(i, new_cell);
            self.atoms[i].cell = new_cell;
        }
    }

    /// Re-home every atom of the specified molecule.
    pub fn update_molecule_locations(&mut self, mol: usize) {
        let atoms = self.molecules[mol].atoms.clone();
        for i in atoms {
            self.update_atom_location(i);
        }
    }

    /// Clear and rebuild all cell memberships.
    pub fn update_all_atom_locations(&mut self) {
        self.cells.clear_atoms();
        for i in 0..self.atoms.len() {
            let cell = self.cells.cell_index_of(&self.lattice, &self.atoms[i].r);
            self.atoms[i].cell = cell;
            self.cells.add_atom_to_cell(i, cell);
        }
    }

    /// Centre of geometry of a molecule, built up via minimum-image deltas
    /// from its first atom so wrapped molecules stay contiguous.
    pub fn molecule_cog(&self, mol: usize) -> Point3<f64> {
        let atoms = &self.molecules[mol].atoms;
        let first = self.atoms[atoms[0]].r;
        let mut sum = first.coords;
        for &i in &atoms[1..] {
            sum += (first + self.lattice.minimum_vector(&first, &self.atoms[i].r)).coords;
        }
        Point3::from(sum / atoms.len() as f64)
    }

    /// Translate a whole molecule. Cell memberships are not updated here; the
    /// caller re-homes through `update_molecule_locations`.
    pub fn translate_molecule(&mut self, mol: usize, delta: Vector3<f64>) {
        for n in 0..self.molecules[mol].atoms.len() {
            let i = self.molecules[mol].atoms[n];
            self.atoms[i].r += delta;
        }
    }

    /// Apply a rotation about the molecule's centre of geometry, using
    /// minimum-image vectors so periodic wrapping cannot shear the molecule.
    pub fn transform_molecule(&mut self, mol: usize, transform: &Matrix3<f64>) {
        let cog = self.molecule_cog(mol);
        for n in 0..self.molecules[mol].atoms.len() {
            let i = self.molecules[mol].atoms[n];
            let local = self.lattice.minimum_vector(&cog, &self.atoms[i].r);
            self.atoms[i].r = cog + transform * local;
        }
    }

    /// Positions of a named species site, one per molecule of that species:
    /// the minimum-image average of the site's origin atoms.
    pub fn site_positions(&self, species: &Arc<Species>, site_name: &str) -> Result<Vec<Point3<f64>>> {
        let site = species.site(site_name).ok_or_else(|| {
            EngineError::Setup(format!(
                "species '{}' has no site named '{}'",
                species.name(),
                site_name
            ))
        })?;

        let mut positions = Vec::new();
        for molecule in &self.molecules {
            if !Arc::ptr_eq(&molecule.species, species) {
                continue;
            }
            let first = self.atoms[molecule.atoms[site.origin_atoms[0]]].r;
            let mut sum = first.coords;
            for &origin in &site.origin_atoms[1..] {
                let r = self.atoms[molecule.atoms[origin]].r;
                sum += (first + self.lattice.minimum_vector(&first, &r)).coords;
            }
            positions.push(Point3::from(sum / site.origin_atoms.len() as f64));
        }
        Ok(positions)
    }

    pub fn add_external_potential(&mut self, potential: ExternalPotential) {
        self.external_potentials.push(potential);
    }

    pub fn external_potentials(&self) -> &[ExternalPotential] {
        &self.external_potentials
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn cells(&self) -> &CellArray {
        &self.cells
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn atom(&self, i: usize) -> &Atom {
        &self.atoms[i]
    }

    pub fn atom_mut(&mut self, i: usize) -> &mut Atom {
        &mut self.atoms[i]
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn molecules(&self) -> &[Molecule] {
        &self.molecules
    }

    pub fn molecule(&self, i: usize) -> &Molecule {
        &self.molecules[i]
    }

    pub fn n_molecules(&self) -> usize {
        self.molecules.len()
    }

    pub fn species_populations(&self) -> &[(Arc<Species>, usize)] {
        &self.species_populations
    }

    pub fn atom_types(&self) -> &AtomTypeMix {
        &self.atom_types
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn set_temperature(&mut self, t: f64) {
        self.temperature = t;
    }

    /// Atoms per cubic Angstrom.
    pub fn atomic_density(&self) -> f64 {
        if self.lattice.volume() > 0.0 {
            self.atoms.len() as f64 / self.lattice.volume()
        } else {
            0.0
        }
    }

    pub fn contents_version(&self) -> u64 {
        self.contents_version
    }

    pub fn increment_contents_version(&mut self) {
        self.contents_version += 1;
    }

    /// Freshness tag for derived data.
    pub fn fingerprint(&self) -> String {
        format!("{}@{}", self.name, self.contents_version)
    }
}
