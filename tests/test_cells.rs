mod common;

use epsr_engine::core::cells::CellArray;
use epsr_engine::core::lattice::Lattice;

#[test]
fn empty_unit_cube_partitioning() {
    // 10 A cube with 7 A requested cells and a 5 A cutoff: the minimum of
    // three divisions per side wins, giving 27 cells of one-shell extent
    let lattice = Lattice::cubic(10.0);
    let cells = CellArray::generate(&lattice, 7.0, 5.0).unwrap();

    assert_eq!(cells.divisions().x, 3);
    assert_eq!(cells.divisions().y, 3);
    assert_eq!(cells.divisions().z, 3);
    assert_eq!(cells.n_cells(), 27);
    assert_eq!(cells.extents().x, 1);
    assert_eq!(cells.extents().y, 1);
    assert_eq!(cells.extents().z, 1);

    // With wrap, every cell neighbours every cell: upper-triangular pairs
    // including self = 27 * 28 / 2
    assert_eq!(cells.neighbour_pairs().len(), 378);
}

#[test]
fn neighbour_vectors_include_self_first() {
    let lattice = Lattice::cubic(24.0);
    let cells = CellArray::generate(&lattice, 4.0, 8.0).unwrap();

    for index in 0..cells.n_cells() {
        let neighbours = cells.neighbours(index);
        assert_eq!(neighbours[0].index, index);
        assert!(!neighbours[0].requires_mim);
    }
}

#[test]
fn mim_flags_and_grid_deltas_are_symmetric() {
    let lattice = Lattice::cubic(20.0);
    let cells = CellArray::generate(&lattice, 4.0, 6.0).unwrap();

    for a in 0..cells.n_cells() {
        for b in 0..cells.n_cells() {
            assert_eq!(
                cells.minimum_image_required(a, b, 6.0),
                cells.minimum_image_required(b, a, 6.0),
                "mim asymmetry for cells {} and {}",
                a,
                b
            );
            assert_eq!(cells.mim_grid_delta(a, b), -cells.mim_grid_delta(b, a));
        }
    }
}

#[test]
fn pair_enumeration_covers_neighbour_union() {
    let lattice = Lattice::cubic(18.0);
    let cells = CellArray::generate(&lattice, 3.0, 5.0).unwrap();

    // Every (cell, neighbour) edge must appear exactly once as an unordered
    // pair with master <= neighbour
    let mut expected = std::collections::BTreeSet::new();
    for cell in 0..cells.n_cells() {
        for nbr in cells.neighbours(cell) {
            let (lo, hi) = if cell <= nbr.index { (cell, nbr.index) } else { (nbr.index, cell) };
            expected.insert((lo, hi));
        }
    }
    let listed: std::collections::BTreeSet<(usize, usize)> = cells
        .neighbour_pairs()
        .iter()
        .map(|p| (p.master, p.neighbour))
        .collect();
    assert_eq!(listed, expected);
    assert_eq!(listed.len(), cells.neighbour_pairs().len(), "duplicate pairs present");
}

#[test]
fn atoms_fold_into_their_stored_cells() {
    let mut cfg = common::argon_configuration(200, 16.0, 5.0, 7);

    // Displace some atoms far outside the box, re-home, and check the stored
    // cell matches a fresh lookup for every atom
    for i in (0..cfg.n_atoms()).step_by(7) {
        cfg.atom_mut(i).r += nalgebra::Vector3::new(40.0, -32.0, 17.0);
        cfg.update_atom_location(i);
    }

    for i in 0..cfg.n_atoms() {
        let expected = cfg.cells().cell_index_of(cfg.lattice(), &cfg.atom(i).r);
        assert_eq!(cfg.atom(i).cell, expected, "atom {} mis-homed", i);
    }

    // Membership is a partition: total count matches and no atom is listed
    // twice
    let mut seen = vec![0usize; cfg.n_atoms()];
    let mut total = 0;
    for cell in 0..cfg.cells().n_cells() {
        for &atom in cfg.cells().cell(cell).atoms() {
            seen[atom] += 1;
            total += 1;
        }
    }
    assert_eq!(total, cfg.n_atoms());
    assert!(seen.iter().all(|&count| count == 1));
}

#[test]
fn within_range_is_conservative() {
    let lattice = Lattice::cubic(30.0);
    let cells = CellArray::generate(&lattice, 3.0, 6.0).unwrap();

    // A cell is always within any positive range of itself
    assert!(cells.within_range(0, 0, 0.1));

    // Adjacent cells share a face, so the nearest-edge distance is zero
    let adjacent = cells.wrapped_index(1, 0, 0);
    assert!(cells.within_range(0, adjacent, 0.1));
}
