mod common;

use epsr_engine::core::registry::DataStore;
use epsr_engine::error::Outcome;
use epsr_engine::modules::atomshake::AtomShakeModule;
use epsr_engine::modules::energy::EnergyModule;
use epsr_engine::modules::gr::GrModule;
use epsr_engine::modules::md::{MdModule, TimestepKind};
use epsr_engine::modules::molshake::MolShakeModule;
use epsr_engine::modules::sq::{IsotopologueSpec, NeutronSqModule, SqModule};
use epsr_engine::modules::ModuleContext;

#[test]
fn atom_shake_runs_and_keeps_step_within_clamp() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(60, 14.0, 5.0, 41);
    let potentials = common::potential_map(&cfg, 5.0);
    let mut store = DataStore::new();

    let mut module = AtomShakeModule::new("Shake01");
    module.n_shakes_per_atom = 2;
    module.step_size = 0.2;
    module.step_size_min = 0.05;
    module.step_size_max = 0.5;

    for iteration in 1..=3 {
        let mut ctx = ModuleContext {
            cfg: &mut cfg,
            pool: &pool,
            store: &mut store,
            iteration,
            seed: 9,
        };
        let outcome = module.run(&mut ctx, &potentials).unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert!(
            module.step_size >= module.step_size_min && module.step_size <= module.step_size_max,
            "step size {} escaped its clamp",
            module.step_size
        );
    }

    // Moves were proposed from a random start, so some must have landed
    assert!(cfg.contents_version() > 0);
}

#[test]
fn mol_shake_adapts_both_step_sizes_independently() {
    let pool = common::single_pool();
    let mut cfg = common::water_configuration(20, 20.0, 5.0, 43);
    let potentials = common::potential_map(&cfg, 5.0);
    let mut store = DataStore::new();

    let mut module = MolShakeModule::new("MolShake01");
    module.n_shakes_per_molecule = 2;
    let (t0, r0) = (module.translation_step, module.rotation_step);

    let mut ctx = ModuleContext {
        cfg: &mut cfg,
        pool: &pool,
        store: &mut store,
        iteration: 1,
        seed: 15,
    };
    let outcome = module.run(&mut ctx, &potentials).unwrap();
    assert_eq!(outcome, Outcome::Success);

    assert!(module.translation_step >= module.translation_step_min);
    assert!(module.translation_step <= module.translation_step_max);
    assert!(module.rotation_step >= module.rotation_step_min);
    assert!(module.rotation_step <= module.rotation_step_max);
    assert!(
        module.translation_step != t0 || module.rotation_step != r0,
        "neither step size adapted"
    );
}

#[test]
fn energy_module_declares_stability_after_a_flat_window() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(30, 12.0, 5.0, 47);
    let potentials = common::potential_map(&cfg, 5.0);
    let mut store = DataStore::new();

    let mut module = EnergyModule::new("Energy01");
    module.stability_window = 5;

    // A static configuration has perfectly flat energy history
    for iteration in 1..=6 {
        let mut ctx = ModuleContext {
            cfg: &mut cfg,
            pool: &pool,
            store: &mut store,
            iteration,
            seed: 1,
        };
        module.run(&mut ctx, &potentials).unwrap();
    }

    assert_eq!(EnergyModule::is_stable(&store, "Energy01"), Some(true));
    let history = store.get_data1d("Total", "Energy01").unwrap();
    assert_eq!(history.n_values(), 6);
}

#[test]
fn md_skips_when_energy_is_not_stable() {
    let pool = common::single_pool();
    let mut cfg = common::water_configuration(8, 16.0, 5.0, 53);
    let potentials = common::potential_map(&cfg, 5.0);
    let mut store = DataStore::new();

    let mut module = MdModule::new("MD01");
    module.only_when_stable = Some("Energy01".to_string());

    let mut ctx = ModuleContext {
        cfg: &mut cfg,
        pool: &pool,
        store: &mut store,
        iteration: 1,
        seed: 3,
    };
    assert_eq!(module.run(&mut ctx, &potentials).unwrap(), Outcome::NotExecuted);
}

#[test]
fn md_propagates_and_persists_velocities() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(24, 14.0, 5.0, 59);
    let potentials = common::potential_map(&cfg, 5.0);
    let mut store = DataStore::new();

    let mut module = MdModule::new("MD01");
    module.n_steps = 5;
    module.timestep_kind = TimestepKind::Fixed;
    module.fixed_timestep = 1.0e-4;
    module.output_frequency = 0;

    let version_before = cfg.contents_version();
    let mut ctx = ModuleContext {
        cfg: &mut cfg,
        pool: &pool,
        store: &mut store,
        iteration: 1,
        seed: 5,
    };
    assert_eq!(module.run(&mut ctx, &potentials).unwrap(), Outcome::Success);
    assert!(cfg.contents_version() > version_before);

    let velocities = store.get_real_vec("Velocities", "MD01").unwrap();
    assert_eq!(velocities.len(), cfg.n_atoms() * 3);
    assert!(velocities.iter().any(|&v| v != 0.0));
}

#[test]
fn gr_bins_unconnected_intramolecular_pairs_as_unbound() {
    use epsr_engine::core::configuration::{Configuration, ProcedureNode};
    use epsr_engine::core::lattice::Lattice;
    use epsr_engine::core::species::Species;
    use epsr_engine::core::types::AtomType;
    use epsr_engine::potentials::forms::BondForm;
    use nalgebra::Point3;
    use std::sync::Arc;

    // X-Y are bonded; Z shares the molecule but has no connectivity path
    let mut species = Species::new("Dangler");
    species.add_atom(18, AtomType::new("XA", 18, 0.0, 0.1, 3.0), Point3::new(0.0, 0.0, 0.0), 0.0);
    species.add_atom(18, AtomType::new("YA", 18, 0.0, 0.1, 3.0), Point3::new(1.2, 0.0, 0.0), 0.0);
    species.add_atom(18, AtomType::new("ZA", 18, 0.0, 0.1, 3.0), Point3::new(3.0, 0.0, 0.0), 0.0);
    species
        .add_bond(0, 1, BondForm::Harmonic { k: 4000.0, eq: 1.2 })
        .unwrap();
    species.finalise().unwrap();
    let species = Arc::new(species);

    assert!(species.atoms_connected(0, 1));
    assert!(!species.atoms_connected(0, 2));

    let nodes = [ProcedureNode::AddSpecies {
        species: species.clone(),
        population: 10,
        density: None,
    }];
    let mut cfg = Configuration::generate("Danglers", Some(Lattice::cubic(20.0)), &nodes, 101).unwrap();
    cfg.update_cells(6.0).unwrap();

    let pool = common::single_pool();
    let mut store = DataStore::new();
    let mut gr = GrModule::new("GR01", 6.0, 0.05, 6.0);
    let mut ctx = ModuleContext {
        cfg: &mut cfg,
        pool: &pool,
        store: &mut store,
        iteration: 1,
        seed: 19,
    };
    assert_eq!(gr.run(&mut ctx).unwrap(), Outcome::Success);

    let gr_data = store.get_partial_set("UnweightedGR", "GR01").unwrap();
    let xa = gr_data.atom_types().index_of_name("XA").unwrap();
    let ya = gr_data.atom_types().index_of_name("YA").unwrap();
    let za = gr_data.atom_types().index_of_name("ZA").unwrap();

    // The bonded pair populates its bound partial; the co-resident but
    // unconnected pair lands in the unbound one and its bound partial stays
    // flagged empty
    assert!(!gr_data.is_bound_partial_empty(xa, ya));
    assert!(gr_data.bound_partial(xa, ya).max_abs() > 0.0);
    assert!(gr_data.is_bound_partial_empty(xa, za));
    assert!(gr_data.bound_partial(xa, za).max_abs() == 0.0);
    assert!(gr_data.unbound_partial(xa, za).max_abs() > 0.0);
}

#[test]
fn neutron_sq_rebuilds_full_partials_from_weighted_channels() {
    let pool = common::single_pool();
    let mut cfg = common::water_configuration(30, 16.0, 6.0, 97);
    let mut store = DataStore::new();

    let mut gr = GrModule::new("GR01", 6.0, 0.05, 6.0);
    let mut sq = SqModule::new("SQ01", "GR01");
    sq.q_min = 0.1;
    sq.q_delta = 0.1;
    sq.q_max = 15.0;
    let mut neutron = NeutronSqModule::new("Neutron01", "SQ01");
    neutron.isotopologues = vec![IsotopologueSpec {
        species: "Water".to_string(),
        isotopologue: Some("D2O".to_string()),
        weight: 1.0,
    }];

    let mut ctx = ModuleContext {
        cfg: &mut cfg,
        pool: &pool,
        store: &mut store,
        iteration: 1,
        seed: 21,
    };
    assert_eq!(gr.run(&mut ctx).unwrap(), Outcome::Success);
    assert_eq!(sq.run(&mut ctx).unwrap(), Outcome::Success);
    assert_eq!(neutron.run(&mut ctx).unwrap(), Outcome::Success);

    let weights = store.get_neutron_weights("FullWeights", "Neutron01").unwrap();
    let weighted = store.get_partial_set("WeightedSQ", "Neutron01").unwrap();
    let unweighted = store.get_partial_set("UnweightedSQ", "SQ01").unwrap();
    let mix = weights.atom_types();

    // Every full partial is the sum of its independently weighted channels,
    // so the bound weighting contributes to the total formed from them
    for (i, j) in unweighted.atom_types().pairs() {
        let wi = mix.index_of_name(&unweighted.atom_types().atom_type(i).name).unwrap();
        let wj = mix.index_of_name(&unweighted.atom_types().atom_type(j).name).unwrap();
        let weight = weights.weight(wi, wj);
        let intra_weight = weights.intramolecular_weight(wi, wj);
        for point in (0..weighted.partial(i, j).n_values()).step_by(25) {
            let expected = unweighted.unbound_partial(i, j).value(point) * weight
                + unweighted.bound_partial(i, j).value(point) * intra_weight;
            assert!(
                (weighted.partial(i, j).value(point) - expected).abs() < 1.0e-9,
                "full partial ({}, {}) diverges from its channels at point {}",
                i,
                j,
                point
            );
        }
    }

    // The bound channel is genuinely non-zero for the bonded O-H pair
    let ow = unweighted.atom_types().index_of_name("OW").unwrap();
    let hw = unweighted.atom_types().index_of_name("HW").unwrap();
    assert!(unweighted.bound_partial(ow, hw).max_abs() > 0.0);
}

#[test]
fn gr_and_sq_pipeline_produces_fresh_partials() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(400, 18.0, 8.0, 61);
    let mut store = DataStore::new();

    let mut gr = GrModule::new("GR01", 8.0, 0.05, 8.0);
    let mut sq = SqModule::new("SQ01", "GR01");
    sq.q_min = 0.1;
    sq.q_delta = 0.1;
    sq.q_max = 20.0;

    let mut ctx = ModuleContext {
        cfg: &mut cfg,
        pool: &pool,
        store: &mut store,
        iteration: 1,
        seed: 7,
    };
    assert_eq!(gr.run(&mut ctx).unwrap(), Outcome::Success);
    assert_eq!(sq.run(&mut ctx).unwrap(), Outcome::Success);

    let gr_data = store.get_partial_set("UnweightedGR", "GR01").unwrap();
    assert_eq!(gr_data.fingerprint(), cfg.fingerprint());
    assert!(gr_data.partial(0, 0).n_values() > 0);

    let sq_data = store.get_partial_set("UnweightedSQ", "SQ01").unwrap();
    assert_eq!(sq_data.fingerprint(), cfg.fingerprint());
    // Random placements: S(Q) - 1 tends to zero at high Q
    let tail = sq_data.partial(0, 0).value(sq_data.partial(0, 0).n_values() - 1);
    assert!(tail.abs() < 0.2, "S(Q) tail {}", tail);
}
