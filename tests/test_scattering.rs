mod common;

use std::sync::Arc;

use epsr_engine::core::types::{n_pairs, pair_index, AtomType};
use epsr_engine::math::data1d::Data1D;
use epsr_engine::math::fit::{ExpansionFunction, FunctionFit};
use epsr_engine::math::ft::{sine_ft, Broadening, WindowFunction};
use epsr_engine::parallel::pool::Communicator;
use epsr_engine::scattering::matrix::ScatteringMatrix;
use epsr_engine::scattering::partials::PartialSet;
use epsr_engine::scattering::weights::NeutronWeights;

#[test]
fn pair_index_is_commutative_and_dense() {
    for n in 1..6 {
        let mut seen = std::collections::BTreeSet::new();
        for i in 0..n {
            for j in i..n {
                assert_eq!(pair_index(i, j, n), pair_index(j, i, n));
                seen.insert(pair_index(i, j, n));
            }
        }
        assert_eq!(seen.len(), n_pairs(n));
        assert_eq!(*seen.iter().max().unwrap(), n_pairs(n) - 1);
    }
}

#[test]
fn ideal_gas_partials_approach_unity() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(1000, 20.0, 8.0, 31);
    // Overlapping placements are irrelevant here; the distribution is what
    // matters, so fold and rebuild memberships
    cfg.update_all_atom_locations();

    let mut partials = PartialSet::new(cfg.atom_types(), 8.0, 0.05);
    for i in 0..cfg.n_atoms() {
        for j in (i + 1)..cfg.n_atoms() {
            let r = cfg.lattice().minimum_distance(&cfg.atom(i).r, &cfg.atom(j).r);
            partials.bin_distance(0, 0, r, false);
        }
    }
    partials.all_sum(&pool, Communicator::Pool).unwrap();
    partials.form_partials(cfg.lattice().volume());
    partials.form_total(true);

    // Random placements are an ideal gas: g(r) ~ 1 away from r = 0
    let g = partials.partial(0, 0);
    let mut sum = 0.0;
    let mut count = 0;
    for point in 0..g.n_values() {
        if g.x(point) > 2.0 {
            sum += g.value(point);
            count += 1;
        }
    }
    let mean = sum / count as f64;
    assert!((mean - 1.0).abs() < 0.05, "ideal-gas g(r) mean {}", mean);

    // Bound histograms never received a sample
    assert!(partials.is_bound_partial_empty(0, 0));
}

#[test]
fn sine_ft_round_trip_recovers_input() {
    // Gaussian bump in g(r) - 1
    let rho: f64 = 0.0334;
    let mut data = Data1D::new("test");
    let mut r = 0.02;
    while r <= 20.0 {
        data.add_point(r, 0.2 * (-(r - 3.0_f64).powi(2) / (2.0 * 0.4_f64.powi(2))).exp());
        r += 0.02;
    }
    let original = data.clone();

    sine_ft(
        &mut data,
        4.0 * std::f64::consts::PI * rho,
        0.05,
        0.02,
        40.0,
        WindowFunction::Rectangular,
        Broadening::None,
        false,
    );
    sine_ft(
        &mut data,
        1.0 / (2.0 * std::f64::consts::PI.powi(2) * rho),
        0.02,
        0.02,
        20.0,
        WindowFunction::Rectangular,
        Broadening::None,
        false,
    );

    // Compare away from the endpoints where truncation ripple lives
    for point in 0..data.n_values() {
        let x = data.x(point);
        if !(1.0..=6.0).contains(&x) {
            continue;
        }
        let expected = original.interpolated(x);
        assert!(
            (data.value(point) - expected).abs() < 0.01,
            "round trip failed at r = {}: {} vs {}",
            x,
            data.value(point),
            expected
        );
    }
}

#[test]
fn gaussian_bump_transform_has_expected_first_zero() {
    // Amplitude 0.2, centre 3 A, width 0.4 A at rho = 0.033: S(Q) - 1
    // oscillates as sin(3Q)-like, so its first zero sits at Q = pi / 3
    let rho = 0.033;
    let mut data = Data1D::new("bump");
    let mut r = 0.01;
    while r <= 25.0 {
        data.add_point(r, 0.2 * (-(r - 3.0_f64).powi(2) / (2.0 * 0.4_f64.powi(2))).exp());
        r += 0.01;
    }
    sine_ft(
        &mut data,
        4.0 * std::f64::consts::PI * rho,
        0.01,
        0.01,
        10.0,
        WindowFunction::Rectangular,
        Broadening::None,
        false,
    );

    let mut first_zero = None;
    for point in 1..data.n_values() {
        if data.value(point - 1) > 0.0 && data.value(point) <= 0.0 {
            first_zero = Some(data.x(point));
            break;
        }
    }
    let first_zero = first_zero.expect("no sign change found");
    assert!(
        (first_zero - std::f64::consts::PI / 3.0).abs() < 0.05,
        "first zero at {} (expected {})",
        first_zero,
        std::f64::consts::PI / 3.0
    );
}

/// Three neutron-weighted datasets over a two-type system, rows made
/// linearly independent by isotope substitution on the first type.
fn isotope_weight_sets() -> (Vec<Arc<AtomType>>, Vec<NeutronWeights>) {
    let species = common::water_species();
    let types: Vec<Arc<AtomType>> = species.atoms().iter().map(|a| a.atom_type.clone()).collect();
    let unique: Vec<Arc<AtomType>> = {
        let mut out: Vec<Arc<AtomType>> = Vec::new();
        for t in types {
            if out.iter().all(|u| u.name != t.name) {
                out.push(t);
            }
        }
        out
    };

    let mut sets = Vec::new();
    for mix in [None, Some(1.0), Some(0.5)] {
        let mut weights = NeutronWeights::new();
        match mix {
            None => weights.add_isotopologue(&species, 100, None, 1.0),
            Some(fraction) => {
                let iso = species.isotopologue("D2O").unwrap().clone();
                weights.add_isotopologue(&species, 100, Some(&iso), fraction);
                if fraction < 1.0 {
                    weights.add_isotopologue(&species, 100, None, 1.0 - fraction);
                }
            }
        }
        weights.create(&[]).unwrap();
        sets.push(weights);
    }
    (unique, sets)
}

#[test]
fn scattering_matrix_inverse_times_matrix_is_identity() {
    let (types, weight_sets) = isotope_weight_sets();
    let mut matrix = ScatteringMatrix::default();
    matrix.initialise(&types);
    assert_eq!(matrix.n_pairs(), 3);

    let flat = Data1D::regular("flat", 0.1, 0.1, 10.0);
    for weights in &weight_sets {
        matrix.add_neutron_reference(flat.clone(), weights, 1.0).unwrap();
    }
    assert!(!matrix.under_determined());

    let product = matrix.inverse(0.0).unwrap() * matrix.matrix(0.0).unwrap();
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(
                (product[(i, j)] - expected).abs() < 1.0e-8,
                "identity violated at ({}, {}): {}",
                i,
                j,
                product[(i, j)]
            );
        }
    }
}

#[test]
fn scattering_matrix_recovers_synthetic_partials() {
    let (types, weight_sets) = isotope_weight_sets();
    let mut matrix = ScatteringMatrix::default();
    matrix.initialise(&types);

    // Synthetic per-pair partials on a shared Q grid
    let mut template = Data1D::regular("synthetic", 0.1, 0.1, 10.0);
    let synthetics: Vec<Data1D> = (0..3)
        .map(|k| {
            let mut partial = template.clone();
            for point in 0..partial.n_values() {
                let q = partial.x(point);
                let value = ((k as f64 + 1.0) * q).sin() / q;
                partial.set_value(point, value);
            }
            partial
        })
        .collect();
    template.zero();

    // Reference data constructed exactly from the synthetics
    for weights in &weight_sets {
        let used = weights.atom_types();
        let mut data = template.clone();
        for i in 0..used.n_types() {
            for j in i..used.n_types() {
                let global_i = types.iter().position(|t| t.name == used.atom_type(i).name).unwrap();
                let global_j = types.iter().position(|t| t.name == used.atom_type(j).name).unwrap();
                let column = pair_index(global_i, global_j, types.len());
                for point in 0..data.n_values() {
                    let value = data.value(point) + weights.weight(i, j) * synthetics[column].value(point);
                    data.set_value(point, value);
                }
            }
        }
        matrix.add_neutron_reference(data, weights, 1.0).unwrap();
    }

    let mut estimated: Vec<Data1D> = (0..3).map(|_| Data1D::default()).collect();
    matrix.generate_partials(&mut estimated).unwrap();

    for (column, synthetic) in synthetics.iter().enumerate() {
        for point in 0..synthetic.n_values() {
            assert!(
                (estimated[column].value(point) - synthetic.value(point)).abs() < 1.0e-6,
                "partial {} mismatched at point {}",
                column,
                point
            );
        }
    }
}

#[test]
fn neutron_weights_average_correctly_over_isotopologues() {
    let species = common::water_species();
    let mut weights = NeutronWeights::new();
    let iso = species.isotopologue("D2O").unwrap().clone();
    weights.add_isotopologue(&species, 10, None, 0.5);
    weights.add_isotopologue(&species, 10, Some(&iso), 0.5);
    weights.create(&[]).unwrap();

    let mix = weights.atom_types();
    let hw = mix.index_of_name("HW").unwrap();
    let ow = mix.index_of_name("OW").unwrap();

    // 50:50 H/D: b_H = (-3.739 + 6.671) / 2
    assert!((weights.bound_coherent(hw) - 1.466).abs() < 1.0e-3);
    assert!((weights.bound_coherent(ow) - 5.803).abs() < 1.0e-3);

    // Concentrations: two H per O
    assert!((mix.entry(hw).fraction - 2.0 / 3.0).abs() < 1.0e-12);

    // Cross weight carries the factor two
    let expected = 2.0 * mix.entry(hw).fraction * mix.entry(ow).fraction * 1.466 * 5.803;
    assert!((weights.weight(hw.min(ow), hw.max(ow)) - expected).abs() < 2.0e-2);
}

#[test]
fn exchangeable_types_average_intermolecular_weights_only() {
    use epsr_engine::core::species::Species;
    use epsr_engine::potentials::forms::BondForm;
    use nalgebra::Point3;

    // Fully deuterated water alongside a hydroxyl species with natural
    // hydrogens; the two hydrogen types exchange with each other
    let water = common::water_species();

    let ox = AtomType::new("OX", 8, -0.7, 0.65, 3.12);
    let ho = AtomType::new("HO", 1, 0.435, 0.0, 1.0);
    let mut hydroxyl = Species::new("Hydroxyl");
    hydroxyl.add_atom(8, ox, Point3::new(0.0, 0.0, 0.0), -0.7);
    hydroxyl.add_atom(1, ho, Point3::new(0.96, 0.0, 0.0), 0.435);
    hydroxyl
        .add_bond(0, 1, BondForm::Harmonic { k: 4000.0, eq: 0.96 })
        .unwrap();
    hydroxyl.finalise().unwrap();
    let hydroxyl = Arc::new(hydroxyl);

    let mut weights = NeutronWeights::new();
    let d2o = water.isotopologue("D2O").unwrap().clone();
    weights.add_isotopologue(&water, 50, Some(&d2o), 1.0);
    weights.add_isotopologue(&hydroxyl, 50, None, 1.0);
    weights.create(&["HW".to_string(), "HO".to_string()]).unwrap();

    let mix = weights.atom_types();
    let hw = mix.index_of_name("HW").unwrap();
    let ho = mix.index_of_name("HO").unwrap();

    // Intermolecular weights see the pooled average over 100 deuterated HW
    // and 50 natural HO
    let pooled = (100.0 * 6.671 + 50.0 * (-3.739)) / 150.0;
    assert!((weights.bound_coherent(hw) - pooled).abs() < 1.0e-6);
    assert!((weights.bound_coherent(ho) - pooled).abs() < 1.0e-6);

    // Intramolecular correlations keep the actual scattering lengths
    assert!((weights.intramolecular_bound_coherent(hw) - 6.671).abs() < 1.0e-6);
    assert!((weights.intramolecular_bound_coherent(ho) - (-3.739)).abs() < 1.0e-6);

    let c_hw = mix.entry(hw).fraction;
    assert!((c_hw - 0.4).abs() < 1.0e-12);
    assert!((weights.weight(hw, hw) - c_hw * c_hw * pooled * pooled).abs() < 1.0e-9);
    assert!((weights.intramolecular_weight(hw, hw) - c_hw * c_hw * 6.671 * 6.671).abs() < 1.0e-9);
    assert!(weights.weight(hw, hw) != weights.intramolecular_weight(hw, hw));
}

#[test]
fn add_partials_interpolates_between_grids() {
    let cfg = common::argon_configuration(10, 12.0, 5.0, 83);

    let mut coarse = PartialSet::new(cfg.atom_types(), 5.0, 0.1);
    coarse.form_partials(cfg.lattice().volume());
    coarse.form_total(true);

    let mut fine = PartialSet::new(cfg.atom_types(), 5.0, 0.05);
    for i in 0..cfg.n_atoms() {
        for j in (i + 1)..cfg.n_atoms() {
            let r = cfg.lattice().minimum_distance(&cfg.atom(i).r, &cfg.atom(j).r);
            fine.bin_distance(0, 0, r, false);
        }
    }
    fine.form_partials(cfg.lattice().volume());
    fine.form_total(true);

    coarse.add_partials(&fine, 0.5).unwrap();

    // Values land on the coarse axis, scaled by the weighting
    let source = fine.partial(0, 0);
    let target = coarse.partial(0, 0);
    let probe = 12;
    let expected = 0.5 * source.interpolated(target.x(probe));
    assert!((target.value(probe) - expected).abs() < 1.0e-9);
}

#[test]
fn site_positions_follow_molecule_origins() {
    use epsr_engine::core::species::SpeciesSite;

    // Rebuild the water species with an oxygen site
    let base = common::water_species();
    let mut species = (*base).clone();
    species
        .add_site(SpeciesSite {
            name: "O".to_string(),
            origin_atoms: vec![0],
            x_axis_atoms: vec![],
            y_axis_atoms: vec![],
        })
        .unwrap();
    let species = std::sync::Arc::new(species);

    let nodes = [epsr_engine::core::configuration::ProcedureNode::AddSpecies {
        species: species.clone(),
        population: 6,
        density: None,
    }];
    let mut cfg = epsr_engine::core::configuration::Configuration::generate(
        "Sites",
        Some(epsr_engine::core::lattice::Lattice::cubic(18.0)),
        &nodes,
        89,
    )
    .unwrap();
    cfg.update_cells(5.0).unwrap();

    let positions = cfg.site_positions(&species, "O").unwrap();
    assert_eq!(positions.len(), 6);
    for (mol, position) in positions.iter().enumerate() {
        assert_eq!(position, &cfg.atom(cfg.molecule(mol).atoms[0]).r);
    }

    assert!(cfg.site_positions(&species, "Missing").is_err());
}

#[test]
fn function_fit_reproduces_smooth_difference() {
    let mut data = Data1D::regular("delta", 0.5, 0.02, 10.0);
    for point in 0..data.n_values() {
        let q: f64 = data.x(point);
        let value = 0.3 * (-(q - 2.0_f64).powi(2) / 0.5).exp() - 0.1 * (-(q - 5.0_f64).powi(2) / 2.0).exp();
        data.set_value(point, value);
    }

    let fit = FunctionFit::fit(&data, ExpansionFunction::Gaussian, 40, 0.25).unwrap();
    assert!(fit.percent_error(&data) < 2.0, "fit error {}%", fit.percent_error(&data));

    let poisson = FunctionFit::fit(&data, ExpansionFunction::Poisson, 60, 0.15).unwrap();
    assert!(poisson.percent_error(&data) < 10.0, "poisson fit error {}%", poisson.percent_error(&data));
}
