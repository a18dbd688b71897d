mod common;

use std::collections::BTreeSet;
use std::thread;

use epsr_engine::parallel::change::ChangeStore;
use epsr_engine::parallel::distributor::RegionalDistributor;
use epsr_engine::parallel::pool::{Communicator, DivisionStrategy, ProcessPool};
use epsr_engine::parallel::random::RandomBuffer;

/// Run the same closure on every worker of a fresh pool, returning the
/// per-rank results.
fn on_pool<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(ProcessPool) -> R + Send + Sync + Clone + 'static,
{
    let pools = ProcessPool::create_many("Test", n);
    let handles: Vec<_> = pools
        .into_iter()
        .map(|pool| {
            let f = f.clone();
            thread::spawn(move || f(pool))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn all_sum_reaches_every_worker() {
    let results = on_pool(4, |pool| {
        let mut values = [pool.rank() as f64 + 1.0, 10.0];
        pool.all_sum_real(&mut values, Communicator::Pool).unwrap();
        values
    });
    for values in results {
        assert_eq!(values[0], 10.0); // 1 + 2 + 3 + 4
        assert_eq!(values[1], 40.0);
    }
}

#[test]
fn all_true_requires_consensus() {
    let results = on_pool(3, |pool| {
        let unanimous = pool.all_true(true, Communicator::Pool).unwrap();
        let dissent = pool.all_true(pool.rank() != 1, Communicator::Pool).unwrap();
        (unanimous, dissent)
    });
    for (unanimous, dissent) in results {
        assert!(unanimous);
        assert!(!dissent);
    }
}

#[test]
fn broadcast_and_assemble_agree_across_the_pool() {
    let results = on_pool(4, |pool| {
        // Master's payload wins the broadcast
        let mut data = if pool.is_master() {
            vec![3.0, 1.0, 4.0]
        } else {
            vec![0.0; 3]
        };
        pool.broadcast_reals(&mut data, Communicator::Pool).unwrap();

        // Variable-length chunks concatenate in rank order
        let local: Vec<u64> = (0..=pool.rank() as u64).collect();
        let assembled = pool.assemble_uint(&local, Communicator::Pool).unwrap();
        (data, assembled)
    });
    for (data, assembled) in results {
        assert_eq!(data, vec![3.0, 1.0, 4.0]);
        assert_eq!(assembled, vec![0, 0, 1, 0, 1, 2, 0, 1, 2, 3]);
    }
}

#[test]
fn group_assignment_elects_unique_leaders() {
    let results = on_pool(4, |mut pool| {
        pool.assign_processes_to_groups(2).unwrap();
        (pool.group_index(), pool.is_group_leader(), pool.best_strategy())
    });
    let leaders: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, (_, leader, _))| *leader)
        .map(|(rank, _)| rank)
        .collect();
    assert_eq!(leaders, vec![0, 2]);
    for (_, _, strategy) in &results {
        assert_eq!(*strategy, DivisionStrategy::Groups);
    }
}

#[test]
fn pool_scoped_random_draws_are_identical() {
    let results = on_pool(4, |pool| {
        let mut buffer = RandomBuffer::new(&pool, DivisionStrategy::GroupProcesses, 99, None).unwrap();
        (0..64).map(|_| buffer.random()).collect::<Vec<f64>>()
    });
    for draws in &results[1..] {
        assert_eq!(draws, &results[0], "workers diverged within the shared scope");
    }
    assert!(results[0].iter().all(|&v| (0.0..1.0).contains(&v)));
}

#[test]
fn private_random_streams_diverge() {
    let results = on_pool(2, |pool| {
        // PoolProcesses scopes give each worker its own buffer; seed the
        // generators differently through the rank so divergence is visible
        let mut buffer = RandomBuffer::new(&pool, DivisionStrategy::PoolProcesses, 7 + pool.rank() as u64, None).unwrap();
        (0..16).map(|_| buffer.random()).collect::<Vec<f64>>()
    });
    assert_ne!(results[0], results[1]);
}

#[test]
fn set_up_rejects_workers_absent_from_the_rank_list() {
    let mut pools = ProcessPool::create_many("Test", 2);
    assert!(pools[0].set_up("Subset", &[0]).is_ok());
    assert!(pools[1].set_up("Subset", &[0]).is_err());
}

#[test]
fn distributor_assignments_are_disjoint_and_complete() {
    let cfg = common::water_configuration(40, 22.0, 5.0, 13);
    let pools = ProcessPool::create_many("Test", 1);
    let pool = &pools[0];

    // A two-division view of the same configuration; every worker computes
    // the identical assignment map, so one instance can be inspected
    let mut distributor = RegionalDistributor::new(&cfg, pool, DivisionStrategy::PoolProcesses);

    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let mut cycles = 0;
    while distributor.cycle(&cfg).unwrap() {
        cycles += 1;
        assert!(cycles <= cfg.n_molecules() + 1, "distributor failed to terminate");

        let n_divisions = match distributor.current_strategy() {
            DivisionStrategy::Pool => 1,
            _ => pool.size(),
        };

        // No molecule may be assigned to two divisions within a cycle, and
        // no edit-locked cell may be shared
        let mut cycle_molecules: BTreeSet<usize> = BTreeSet::new();
        let mut locked: BTreeSet<usize> = BTreeSet::new();
        for division in 0..n_divisions {
            for &mol in distributor.assigned_molecules_for(division) {
                assert!(cycle_molecules.insert(mol), "molecule {} assigned twice", mol);
            }
            for cell in distributor.locked_cells(division) {
                assert!(locked.insert(cell), "cell {} locked by two divisions", cell);
            }
        }
        seen.extend(cycle_molecules);
    }

    // Termination means every molecule was advanced to completion
    assert_eq!(seen.len(), cfg.n_molecules());
}

#[test]
fn distributor_disjointness_across_two_divisions() {
    let cfg = common::water_configuration(60, 26.0, 5.0, 29);
    let pools = ProcessPool::create_many("Test", 2);

    // Drive both workers' distributors in lockstep on separate threads; they
    // communicate through nothing, so their decisions must agree
    let handles: Vec<_> = pools
        .into_iter()
        .map(|pool| {
            let cfg = cfg.clone();
            thread::spawn(move || {
                let mut distributor = RegionalDistributor::new(&cfg, &pool, DivisionStrategy::PoolProcesses);
                let mut per_cycle = Vec::new();
                while distributor.cycle(&cfg).unwrap() {
                    let mine: Vec<usize> = distributor.assigned_molecules().to_vec();
                    let locked = distributor.locked_cells(pool.rank());
                    per_cycle.push((mine, locked));
                }
                per_cycle
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results[0].len(), results[1].len(), "workers disagree on cycle count");
    for ((mols_a, cells_a), (mols_b, cells_b)) in results[0].iter().zip(&results[1]) {
        let a: BTreeSet<_> = mols_a.iter().collect();
        let b: BTreeSet<_> = mols_b.iter().collect();
        if a == b {
            // Degraded pool-strategy cycle: both process the same union
            continue;
        }
        assert!(a.intersection(&b).next().is_none(), "molecule sets overlap");
        let cells_a: BTreeSet<_> = cells_a.iter().collect();
        let cells_b: BTreeSet<_> = cells_b.iter().collect();
        assert!(cells_a.intersection(&cells_b).next().is_none(), "locked cells overlap");
    }
}

#[test]
fn change_store_update_then_revert_restores_state() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(50, 15.0, 5.0, 17);
    let before: Vec<_> = cfg.atoms().iter().map(|a| (a.r, a.cell)).collect();

    let mut store = ChangeStore::new(&pool, None);
    for mol in 0..cfg.n_molecules() {
        store.add_molecule(&cfg, mol);
    }

    // Shake everything, then revert: positions and cell memberships must be
    // exactly restored
    for i in 0..cfg.n_atoms() {
        cfg.atom_mut(i).r += nalgebra::Vector3::new(1.7, -0.9, 2.3);
        cfg.update_atom_location(i);
    }
    store.revert_all(&mut cfg);

    for (i, (r, cell)) in before.iter().enumerate() {
        assert_eq!(cfg.atom(i).r, *r);
        assert_eq!(cfg.atom(i).cell, *cell);
    }
}

#[test]
fn change_store_distributes_accepted_moves() {
    let pool = common::single_pool();
    let mut cfg = common::argon_configuration(20, 12.0, 5.0, 23);

    let mut store = ChangeStore::new(&pool, None);
    store.add_atom(&cfg, 4);
    let moved_to = cfg.atom(4).r + nalgebra::Vector3::new(0.5, 0.5, 0.5);
    cfg.atom_mut(4).r = moved_to;
    cfg.update_atom_location(4);
    store.update_atom(&cfg, 0);
    store.store_and_reset();

    assert_eq!(store.n_pending(), 1);
    store.distribute_and_apply(&mut cfg).unwrap();
    assert_eq!(cfg.atom(4).r, moved_to);
    assert_eq!(store.n_pending(), 0);

    // The stored cell is consistent after application
    let expected = cfg.cells().cell_index_of(cfg.lattice(), &cfg.atom(4).r);
    assert_eq!(cfg.atom(4).cell, expected);
}
