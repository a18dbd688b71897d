mod common;

use std::sync::Arc;

use nalgebra::Point3;

use epsr_engine::core::configuration::{Configuration, ProcedureNode};
use epsr_engine::core::lattice::Lattice;
use epsr_engine::core::species::Species;
use epsr_engine::core::types::AtomType;
use epsr_engine::kernels::energy::{EnergyFlags, EnergyKernel};
use epsr_engine::kernels::forces::{ForceKernel, ForceKind};
use epsr_engine::parallel::pool::DivisionStrategy;
use epsr_engine::potentials::pair::PotentialMap;

/// Two-atom configuration with exact positions.
fn dimer(sigma: f64, epsilon: f64, separation: f64, box_side: f64, range: f64) -> (Configuration, PotentialMap) {
    let atom_type = AtomType::new("Ar", 18, 0.0, epsilon, sigma);
    let mut species = Species::new("Atom");
    species.add_atom(18, atom_type, Point3::origin(), 0.0);
    species.finalise().unwrap();

    let nodes = [ProcedureNode::AddSpecies {
        species: Arc::new(species),
        population: 2,
        density: None,
    }];
    let mut cfg = Configuration::generate("Dimer", Some(Lattice::cubic(box_side)), &nodes, 1).unwrap();
    cfg.atom_mut(0).r = Point3::new(0.0, 0.0, 0.0);
    cfg.atom_mut(1).r = Point3::new(separation, 0.0, 0.0);
    cfg.update_cells(range).unwrap();

    let potentials = PotentialMap::new(cfg.atom_types(), range, 0.05).unwrap();
    (cfg, potentials)
}

#[test]
fn lennard_jones_dimer_energy() {
    let (sigma, epsilon, separation) = (3.4, 1.0, 3.5);
    let (cfg, potentials) = dimer(sigma, epsilon, separation, 20.0, 10.0);
    let pool = common::single_pool();

    let kernel = EnergyKernel::new(&cfg, &potentials, None);
    let energy = kernel
        .total_pair_potential_energy(&pool, DivisionStrategy::PoolProcesses, true)
        .unwrap();

    let sr6 = (sigma / separation).powi(6);
    let expected = 4.0 * epsilon * (sr6 * sr6 - sr6);
    assert!(
        (energy.total() - expected).abs() < 1.0e-10,
        "dimer energy {} != {}",
        energy.total(),
        expected
    );

    // No connectivity, so geometry energy is exactly zero
    let geometry = kernel.total_geometry_energy(&pool, DivisionStrategy::PoolProcesses).unwrap();
    assert_eq!(geometry, 0.0);

    // Atom and molecule scopes see the same single interaction
    let atom_energy = kernel.total_atom_energy(0);
    assert!((atom_energy.total_unbound() - expected).abs() < 1.0e-10);
    let molecule_energy = kernel.total_molecule_energy(0, EnergyFlags::default());
    assert!((molecule_energy.total() - expected).abs() < 1.0e-10);
}

/// Total energy of the whole configuration, for differencing.
fn total_energy(
    cfg: &Configuration,
    potentials: &PotentialMap,
    pool: &epsr_engine::parallel::pool::ProcessPool,
) -> f64 {
    let kernel = EnergyKernel::new(cfg, potentials, None);
    kernel
        .total_pair_potential_energy(pool, DivisionStrategy::PoolProcesses, true)
        .unwrap()
        .total()
        + kernel
            .total_geometry_energy(pool, DivisionStrategy::PoolProcesses)
            .unwrap()
}

#[test]
fn forces_match_central_difference_of_energy() {
    let pool = common::single_pool();
    let mut cfg = common::water_configuration(4, 25.0, 8.0, 11);
    let potentials = common::potential_map(&cfg, 8.0);

    let mut f_unbound = vec![nalgebra::Vector3::zeros(); cfg.n_atoms()];
    let mut f_bound = vec![nalgebra::Vector3::zeros(); cfg.n_atoms()];
    {
        let kernel = ForceKernel::new(&cfg, &potentials, None);
        kernel
            .total_forces(&pool, DivisionStrategy::PoolProcesses, ForceKind::Full, &mut f_unbound, &mut f_bound)
            .unwrap();
    }

    let h = 1.0e-5;
    for atom in 0..cfg.n_atoms() {
        for axis in 0..3 {
            let original = cfg.atom(atom).r[axis];

            cfg.atom_mut(atom).r[axis] = original + h;
            cfg.update_all_atom_locations();
            let e_plus = total_energy(&cfg, &potentials, &pool);

            cfg.atom_mut(atom).r[axis] = original - h;
            cfg.update_all_atom_locations();
            let e_minus = total_energy(&cfg, &potentials, &pool);

            cfg.atom_mut(atom).r[axis] = original;
            cfg.update_all_atom_locations();

            let numeric = -(e_plus - e_minus) / (2.0 * h);
            let analytic = f_unbound[atom][axis] + f_bound[atom][axis];
            let scale = analytic.abs().max(numeric.abs()).max(1.0);
            assert!(
                (numeric - analytic).abs() / scale < 1.0e-4,
                "force mismatch at atom {} axis {}: analytic {} vs numeric {}",
                atom,
                axis,
                analytic,
                numeric
            );
        }
    }
}

#[test]
fn geometry_forces_sum_to_zero() {
    let pool = common::single_pool();
    let cfg = common::water_configuration(3, 30.0, 8.0, 3);
    let potentials = common::potential_map(&cfg, 8.0);

    let mut f_unbound = vec![nalgebra::Vector3::zeros(); cfg.n_atoms()];
    let mut f_bound = vec![nalgebra::Vector3::zeros(); cfg.n_atoms()];
    let kernel = ForceKernel::new(&cfg, &potentials, None);
    kernel
        .total_forces(&pool, DivisionStrategy::PoolProcesses, ForceKind::Full, &mut f_unbound, &mut f_bound)
        .unwrap();

    let bound_sum: nalgebra::Vector3<f64> = f_bound.iter().sum();
    assert!(bound_sum.norm() < 1.0e-8, "net geometry force {}", bound_sum.norm());

    // Pair forces are equal and opposite, so the unbound sum vanishes too
    let unbound_sum: nalgebra::Vector3<f64> = f_unbound.iter().sum();
    assert!(unbound_sum.norm() < 1.0e-8, "net pair force {}", unbound_sum.norm());
}

#[test]
fn rigid_body_flags_exclude_internal_terms() {
    let cfg = common::water_configuration(2, 25.0, 8.0, 5);
    let potentials = common::potential_map(&cfg, 8.0);
    let kernel = EnergyKernel::new(&cfg, &potentials, None);

    let full = kernel.total_molecule_energy(0, EnergyFlags::default());
    let rigid = kernel.total_molecule_energy(0, EnergyFlags::RIGID_BODY);

    assert_eq!(rigid.geometry, 0.0);
    assert_eq!(rigid.pair_potential.intra, 0.0);
    assert!((rigid.pair_potential.inter - full.pair_potential.inter).abs() < 1.0e-12);
}
