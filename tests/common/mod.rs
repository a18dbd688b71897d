use std::sync::Arc;

use nalgebra::Point3;

use epsr_engine::core::configuration::{Configuration, ProcedureNode};
use epsr_engine::core::lattice::Lattice;
use epsr_engine::core::species::{Isotopologue, Species};
use epsr_engine::core::types::AtomType;
use epsr_engine::parallel::pool::ProcessPool;
use epsr_engine::potentials::forms::{AngleForm, BondForm};
use epsr_engine::potentials::pair::PotentialMap;

/// Single-worker pool for serial tests.
pub fn single_pool() -> ProcessPool {
    ProcessPool::create_many("Test", 1).remove(0)
}

/// Argon atom type with standard LJ parameters.
pub fn argon_type() -> Arc<AtomType> {
    AtomType::new("Ar", 18, 0.0, 0.979, 3.401)
}

/// Monatomic argon species.
pub fn argon_species() -> Arc<Species> {
    let mut species = Species::new("Argon");
    species.add_atom(18, argon_type(), Point3::origin(), 0.0);
    species.finalise().unwrap();
    Arc::new(species)
}

/// Flexible three-site water species (SPC/E charges and geometry), with a
/// deuterated isotopologue defined for neutron weighting tests.
pub fn water_species() -> Arc<Species> {
    let ow = AtomType::new("OW", 8, -0.8476, 0.650, 3.166);
    let hw = AtomType::new("HW", 1, 0.4238, 0.0, 1.0);

    let mut species = Species::new("Water");
    species.add_atom(8, ow, Point3::new(0.0, 0.0, 0.0), -0.8476);
    species.add_atom(1, hw.clone(), Point3::new(0.7570, 0.5859, 0.0), 0.4238);
    species.add_atom(1, hw, Point3::new(-0.7570, 0.5859, 0.0), 0.4238);
    species
        .add_bond(0, 1, BondForm::Harmonic { k: 4431.53, eq: 1.0 })
        .unwrap();
    species
        .add_bond(0, 2, BondForm::Harmonic { k: 4431.53, eq: 1.0 })
        .unwrap();
    species
        .add_angle(1, 0, 2, AngleForm::Harmonic { k: 317.57, eq: 109.47 })
        .unwrap();
    species.add_isotopologue(Isotopologue {
        name: "D2O".to_string(),
        scattering_lengths: [("HW".to_string(), 6.671)].into_iter().collect(),
    });
    species.finalise().unwrap();
    Arc::new(species)
}

/// Argon atoms placed randomly in a cubic box, cells built for the given
/// pair-potential range.
pub fn argon_configuration(n_atoms: usize, box_side: f64, pp_range: f64, seed: u64) -> Configuration {
    let nodes = [
        ProcedureNode::SetTemperature(85.0),
        ProcedureNode::AddSpecies {
            species: argon_species(),
            population: n_atoms,
            density: None,
        },
    ];
    let mut cfg = Configuration::generate("ArgonBox", Some(Lattice::cubic(box_side)), &nodes, seed).unwrap();
    cfg.update_cells(pp_range).unwrap();
    cfg
}

/// Water molecules placed randomly in a cubic box.
pub fn water_configuration(n_molecules: usize, box_side: f64, pp_range: f64, seed: u64) -> Configuration {
    let nodes = [
        ProcedureNode::SetTemperature(298.0),
        ProcedureNode::AddSpecies {
            species: water_species(),
            population: n_molecules,
            density: None,
        },
    ];
    let mut cfg = Configuration::generate("WaterBox", Some(Lattice::cubic(box_side)), &nodes, seed).unwrap();
    cfg.update_cells(pp_range).unwrap();
    cfg
}

/// Potential map over a configuration's mix.
pub fn potential_map(cfg: &Configuration, range: f64) -> PotentialMap {
    PotentialMap::new(cfg.atom_types(), range, 0.05).unwrap()
}
