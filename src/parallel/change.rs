use nalgebra::Point3;

use crate::core::configuration::Configuration;
use crate::error::Result;
use crate::parallel::pool::{Communicator, ProcessPool, Timer};

/// A watched atom: the reference (accepted) position and whether it has moved
/// since being added.
#[derive(Debug, Clone)]
struct WatchedAtom {
    atom: usize,
    r: Point3<f64>,
    moved: bool,
}

/// Journal of atom displacements. Trial moves run against the configuration
/// directly; accepted coordinates are captured with `update_*`, rejected ones
/// rolled back with `revert_*`, and the accepted set is distributed to every
/// worker with `distribute_and_apply`.
pub struct ChangeStore<'a> {
    pool: &'a ProcessPool,
    comms_timer: Option<&'a Timer>,
    targets: Vec<WatchedAtom>,
    changes: Vec<(usize, Point3<f64>)>,
}

impl<'a> ChangeStore<'a> {
    pub fn new(pool: &'a ProcessPool, comms_timer: Option<&'a Timer>) -> Self {
        Self {
            pool,
            comms_timer,
            targets: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Watch a single atom, capturing its current position.
    pub fn add_atom(&mut self, cfg: &Configuration, i: usize) {
        self.targets.push(WatchedAtom {
            atom: i,
            r: cfg.atom(i).r,
            moved: false,
        });
    }

    /// Watch every atom of a molecule.
    pub fn add_molecule(&mut self, cfg: &Configuration, mol: usize) {
        for n in 0..cfg.molecule(mol).atoms.len() {
            let i = cfg.molecule(mol).atoms[n];
            self.add_atom(cfg, i);
        }
    }

    /// Watch every atom currently in a cell.
    pub fn add_cell(&mut self, cfg: &Configuration, cell: usize) {
        let atoms: Vec<usize> = cfg.cells().cell(cell).atoms().to_vec();
        for i in atoms {
            self.add_atom(cfg, i);
        }
    }

    /// Accept the current position of the watched atom at `index`.
    pub fn update_atom(&mut self, cfg: &Configuration, index: usize) {
        let target = &mut self.targets[index];
        target.r = cfg.atom(target.atom).r;
        target.moved = true;
    }

    /// Accept the current positions of all watched atoms.
    pub fn update_all(&mut self, cfg: &Configuration) {
        for index in 0..self.targets.len() {
            self.update_atom(cfg, index);
        }
    }

    /// Restore the watched atom at `index` to its reference position and
    /// re-home it in its previous cell.
    pub fn revert(&mut self, cfg: &mut Configuration, index: usize) {
        let target = &self.targets[index];
        cfg.atom_mut(target.atom).r = target.r;
        cfg.update_atom_location(target.atom);
    }

    /// Restore all watched atoms.
    pub fn revert_all(&mut self, cfg: &mut Configuration) {
        for index in 0..self.targets.len() {
            self.revert(cfg, index);
        }
    }

    /// Move accepted (moved) atoms into the to-broadcast set and clear the
    /// watch list.
    pub fn store_and_reset(&mut self) {
        for target in self.targets.drain(..) {
            if target.moved {
                self.changes.push((target.atom, target.r));
            }
        }
    }

    /// Discard all watched atoms and pending changes.
    pub fn reset(&mut self) {
        self.targets.clear();
        self.changes.clear();
    }

    pub fn n_pending(&self) -> usize {
        self.changes.len()
    }

    fn timed<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.comms_timer {
            Some(timer) => timer.time(f),
            None => f(),
        }
    }

    /// Agree the pool-wide change set and apply it locally on every worker,
    /// updating cell memberships as positions land.
    pub fn distribute_and_apply(&mut self, cfg: &mut Configuration) -> Result<()> {
        // Total change count across the pool
        let mut n_total = [self.changes.len() as u64];
        self.timed(|| self.pool.all_sum_uint(&mut n_total, Communicator::Pool))?;
        if n_total[0] == 0 {
            self.changes.clear();
            return Ok(());
        }

        // Exchange per-change (index, x, y, z) tuples
        let local: Vec<f64> = self
            .changes
            .iter()
            .flat_map(|(i, r)| [*i as f64, r.x, r.y, r.z])
            .collect();
        let full = self.timed(|| self.pool.assemble_real(&local, Communicator::Pool))?;

        for tuple in full.chunks_exact(4) {
            let i = tuple[0] as usize;
            cfg.atom_mut(i).r = Point3::new(tuple[1], tuple[2], tuple[3]);
            cfg.update_atom_location(i);
        }

        self.changes.clear();
        Ok(())
    }
}
