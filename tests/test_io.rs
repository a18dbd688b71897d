mod common;

use std::io::Write;

use epsr_engine::core::registry::{DataStore, GenericItem};
use epsr_engine::io::deck::Deck;
use epsr_engine::io::export;
use epsr_engine::io::import::{import_coordinates, import_reference_data, CoordinateFormat};
use epsr_engine::io::restart::RestartArchive;
use epsr_engine::math::data1d::Data1D;

#[test]
fn xyz_export_import_round_trip() {
    let cfg = common::argon_configuration(25, 12.0, 5.0, 67);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coords.xyz");

    export::write_xyz(&cfg, path.to_str().unwrap(), "argon snapshot").unwrap();
    let imported = import_coordinates(CoordinateFormat::Xyz, &path).unwrap();

    assert_eq!(imported.atoms.len(), cfg.n_atoms());
    for (i, (symbol, r)) in imported.atoms.iter().enumerate() {
        assert_eq!(symbol, "Ar");
        assert!((r - cfg.atom(i).r).norm() < 1.0e-6);
    }
}

#[test]
fn dl_poly_config_round_trip_preserves_box_and_positions() {
    let cfg = common::water_configuration(5, 14.0, 5.0, 71);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("CONFIG");

    export::write_dl_poly_config(&cfg, path.to_str().unwrap()).unwrap();
    let imported = import_coordinates(CoordinateFormat::DlPoly, &path).unwrap();

    assert_eq!(imported.atoms.len(), cfg.n_atoms());
    let lattice = imported.lattice.expect("periodic CONFIG should carry a box");
    assert!((lattice.volume() - cfg.lattice().volume()).abs() < 1.0e-6);
    for (i, (_, r)) in imported.atoms.iter().enumerate() {
        assert!((r - cfg.atom(i).r).norm() < 1.0e-6);
    }
}

#[test]
fn dl_poly_control_and_field_exports_are_well_formed() {
    let cfg = common::water_configuration(3, 14.0, 5.0, 73);
    let potentials = common::potential_map(&cfg, 5.0);
    let dir = tempfile::tempdir().unwrap();

    let control_path = dir.path().join("CONTROL");
    export::write_dl_poly_control(
        &cfg,
        &export::DlPolyControl {
            temperature: 298.0,
            cutoff: 5.0,
            timestep: 5.0e-4,
            variable_timestep: true,
            n_steps: 1000,
            trajectory_frequency: 100,
            force_cap: Some(1.0e4),
            print_frequency: 10,
        },
        control_path.to_str().unwrap(),
    )
    .unwrap();
    let control = std::fs::read_to_string(&control_path).unwrap();
    for key in [
        "io_file_config",
        "temperature 298",
        "cutoff 5",
        "ensemble nvt",
        "timestep_variable ON",
        "vdw_mix_method Lorentz-Berthelot",
        "equilibration_force_cap",
        "stats_frequency",
    ] {
        assert!(control.contains(key), "CONTROL missing '{}'", key);
    }

    let field_path = dir.path().join("FIELD");
    export::write_dl_poly_field(&cfg, &potentials, field_path.to_str().unwrap()).unwrap();
    let field = std::fs::read_to_string(&field_path).unwrap();
    for key in ["units KJ", "moleculer types 1", "nummols 3", "atoms 3", "bonds 2", "angles 1", "finish", "vdw 3", "close"] {
        assert!(field.contains(key), "FIELD missing '{}'", key);
    }
}

#[test]
fn data1d_disk_format_round_trip() {
    let mut data = Data1D::new("Test//Series");
    for i in 0..50 {
        data.add_point_with_error(i as f64 * 0.1, (i as f64 * 0.37).sin(), 0.01 * i as f64);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.dat");
    export::write_data1d(&data, path.to_str().unwrap()).unwrap();
    let read = export::read_data1d(&path).unwrap();

    assert_eq!(read.tag(), "Test//Series");
    assert_eq!(read.n_values(), 50);
    assert!(read.has_errors());
    for i in 0..50 {
        assert!((read.x(i) - data.x(i)).abs() < 1.0e-9);
        assert!((read.value(i) - data.value(i)).abs() < 1.0e-9);
    }
}

#[test]
fn reference_data_import_handles_errors_and_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reference.mint");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# neutron data").unwrap();
    writeln!(file, "0.1  1.5  0.05").unwrap();
    writeln!(file, "0.2  1.2  0.04").unwrap();
    writeln!(file, "0.3  0.9").unwrap();
    drop(file);

    let data = import_reference_data(&path, "reference").unwrap();
    assert_eq!(data.n_values(), 3);
    assert!((data.value(0) - 1.5).abs() < 1.0e-12);
    assert_eq!(data.x(2), 0.3);
}

#[test]
fn restart_archive_round_trips_typed_payloads() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(100, 14.0, 5.0, 79);

    // Populate a store with a spread of payload classes
    let mut store = DataStore::new();
    *store.realise_real("Weight", "Refine01").unwrap() = 0.9;
    *store.realise_bool("EnergyStable", "Energy01").unwrap() = true;
    store
        .realise_data1d("RFactor", "Refine01")
        .unwrap()
        .add_point(1.0, 12.5);

    let mut partials = epsr_engine::scattering::partials::PartialSet::new(cfg.atom_types(), 5.0, 0.05);
    for i in 0..cfg.n_atoms() {
        for j in (i + 1)..cfg.n_atoms() {
            let r = cfg.lattice().minimum_distance(&cfg.atom(i).r, &cfg.atom(j).r);
            partials.bin_distance(0, 0, r, false);
        }
    }
    partials
        .all_sum(&pool, epsr_engine::parallel::pool::Communicator::Pool)
        .unwrap();
    partials.form_partials(cfg.lattice().volume());
    partials.form_total(true);
    partials.set_fingerprint(&cfg.fingerprint());
    store.insert("UnweightedGR", "GR01", GenericItem::PartialSet(partials.clone()));

    cfg.increment_contents_version();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.restart");
    RestartArchive::new(7, cfg.contents_version(), store).write(&path).unwrap();

    let archive = RestartArchive::read(&path).unwrap();
    assert_eq!(archive.iteration, 7);
    assert_eq!(archive.contents_version, cfg.contents_version());
    assert_eq!(archive.store.get_real("Weight", "Refine01"), Some(&0.9));
    assert_eq!(archive.store.get_bool("EnergyStable", "Energy01"), Some(&true));

    let restored = archive.store.get_partial_set("UnweightedGR", "GR01").unwrap();
    assert_eq!(restored.fingerprint(), partials.fingerprint());
    assert_eq!(restored.partial(0, 0).n_values(), partials.partial(0, 0).n_values());

    // A stored class mismatch is schema-checked on access
    let mut tampered = RestartArchive::read(&path).unwrap();
    assert!(tampered.store.realise_data1d("Weight", "Refine01").is_err());
}

#[test]
fn minimal_deck_parses_and_assembles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.toml");
    std::fs::write(
        &path,
        r#"
[simulation]
seed = 4
workers = 1
iterations = 2
pair_potential_range = 5.0

[[atom_types]]
name = "Ar"
element = "Ar"
epsilon = 0.979
sigma = 3.401

[[species]]
name = "Argon"
[[species.atoms]]
type = "Ar"
position = [0.0, 0.0, 0.0]

[configuration]
name = "Box"
temperature = 85.0
box_lengths = [12.0, 12.0, 12.0]
[[configuration.populations]]
species = "Argon"
count = 30

[[modules]]
kind = "AtomShake"
name = "Shake01"
step_size = 0.1

[[modules]]
kind = "GR"
name = "GR01"
range = 5.0

[[modules]]
kind = "SQ"
name = "SQ01"
source_gr = "GR01"
"#,
    )
    .unwrap();

    let deck = Deck::load(&path).unwrap();
    assert_eq!(deck.simulation.seed, 4);

    let assembled = deck.assemble().unwrap();
    assert_eq!(assembled.cfg.n_atoms(), 30);
    assert_eq!(assembled.cfg.n_molecules(), 30);
    assert_eq!(assembled.modules.len(), 3);
    assert_eq!(assembled.potentials.n_types(), 1);
}
