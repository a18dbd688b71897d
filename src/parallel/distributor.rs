use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::core::configuration::Configuration;
use crate::error::{EngineError, Result};
use crate::parallel::pool::{DivisionStrategy, ProcessPool};

/// Per-cycle status of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellStatus {
    Unused,
    LockedForEditing,
    ReadByOne,
    ReadByMany,
}

/// Distribution status of a molecule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoleculeStatus {
    ToDo,
    Assigned,
    Completed,
}

/// Hands disjoint molecule sets to workers cycle by cycle, locking the cells
/// the molecules touch so that no two workers ever mutate overlapping
/// regions.
///
/// Every worker runs `cycle` with identical inputs and reaches identical
/// decisions, so no communication is needed during distribution itself.
pub struct RegionalDistributor<'a> {
    pool: &'a ProcessPool,
    original_strategy: DivisionStrategy,
    current_strategy: DivisionStrategy,
    n_divisions: usize,
    division_index: usize,

    cell_status: Vec<CellStatus>,
    cell_owners: Vec<Option<usize>>,
    locked_cells: Vec<BTreeSet<usize>>,

    molecule_status: Vec<MoleculeStatus>,
    assigned_molecules: Vec<Vec<usize>>,
    n_to_distribute: usize,
    n_distributed: usize,
    n_cycles: usize,
}

impl<'a> RegionalDistributor<'a> {
    pub fn new(cfg: &Configuration, pool: &'a ProcessPool, strategy: DivisionStrategy) -> Self {
        let n_divisions = pool.strategy_n_divisions(strategy);
        let division_index = pool.strategy_index(strategy);
        let n_molecules = cfg.n_molecules();
        Self {
            pool,
            original_strategy: strategy,
            current_strategy: strategy,
            n_divisions,
            division_index,
            cell_status: vec![CellStatus::Unused; cfg.cells().n_cells()],
            cell_owners: vec![None; cfg.cells().n_cells()],
            locked_cells: vec![BTreeSet::new(); n_divisions],
            molecule_status: vec![MoleculeStatus::ToDo; n_molecules],
            assigned_molecules: vec![Vec::new(); n_divisions],
            n_to_distribute: n_molecules,
            n_distributed: 0,
            n_cycles: 0,
        }
    }

    /// Restrict distribution to the given molecule indices.
    pub fn set_target_molecules(&mut self, targets: &[usize]) {
        self.molecule_status.iter_mut().for_each(|s| *s = MoleculeStatus::Completed);
        for &id in targets {
            self.molecule_status[id] = MoleculeStatus::ToDo;
        }
        self.n_to_distribute = targets.len();
        self.n_distributed = 0;
    }

    /// Set up the next distribution of molecules amongst workers, returning
    /// false when every target molecule has been advanced to completion.
    pub fn cycle(&mut self, cfg: &Configuration) -> Result<bool> {
        if self.n_distributed == self.n_to_distribute {
            debug!("All target molecules distributed after {} cycle(s)", self.n_cycles);
            return Ok(false);
        }

        // Reset per-cycle state, allowing the strategy to climb back up to the
        // original one if the previous cycle degraded it
        for division in 0..self.n_divisions {
            self.assigned_molecules[division].clear();
            self.locked_cells[division].clear();
        }
        self.cell_status.iter_mut().for_each(|s| *s = CellStatus::Unused);
        self.cell_owners.iter_mut().for_each(|o| *o = None);
        self.current_strategy = self.original_strategy;
        self.n_divisions = self.pool.strategy_n_divisions(self.current_strategy);
        self.division_index = self.pool.strategy_index(self.current_strategy);

        if self.n_divisions == 1 {
            // Single worker/group: everything still to do goes to it
            for id in 0..self.molecule_status.len() {
                if self.molecule_status[id] == MoleculeStatus::ToDo {
                    self.assigned_molecules[0].push(id);
                    self.molecule_status[id] = MoleculeStatus::Assigned;
                    self.n_distributed += 1;
                }
            }
        } else {
            // Round-robin over workers until nobody can take another molecule
            let mut exhausted = vec![false; self.n_divisions];
            let mut n_exhausted = 0;
            'rounds: while n_exhausted < self.n_divisions {
                for division in 0..self.n_divisions {
                    if exhausted[division] {
                        continue;
                    }
                    match self.find_molecule_for(cfg, division)? {
                        Some(mol) => {
                            self.assigned_molecules[division].push(mol);
                            self.molecule_status[mol] = MoleculeStatus::Assigned;
                            self.n_distributed += 1;
                            trace!("Molecule {} assigned to division {}", mol, division);
                        }
                        None => {
                            exhausted[division] = true;
                            n_exhausted += 1;
                        }
                    }
                    if n_exhausted == self.n_divisions {
                        break;
                    }
                }

                // If any worker ended a round with nothing, degrade to the
                // pool strategy: the union of assignments is processed
                // redundantly by everyone
                if self.assigned_molecules.iter().any(|mols| mols.is_empty()) {
                    let union: Vec<usize> = (0..self.molecule_status.len())
                        .filter(|&id| self.molecule_status[id] == MoleculeStatus::Assigned)
                        .collect();
                    for division in 0..self.n_divisions {
                        self.assigned_molecules[division] = union.clone();
                    }
                    self.current_strategy = DivisionStrategy::Pool;
                    self.n_divisions = self.pool.strategy_n_divisions(self.current_strategy);
                    self.division_index = self.pool.strategy_index(self.current_strategy);
                    debug!("Distributor reverted to the pool strategy for this cycle");
                    break 'rounds;
                }
            }
        }

        self.n_cycles += 1;

        // Everything assigned this cycle will not be revisited
        for status in &mut self.molecule_status {
            if *status == MoleculeStatus::Assigned {
                *status = MoleculeStatus::Completed;
            }
        }

        Ok(true)
    }

    /// Molecule IDs assigned to this worker for the current cycle.
    pub fn assigned_molecules(&self) -> &[usize] {
        &self.assigned_molecules[self.division_index.min(self.assigned_molecules.len() - 1)]
    }

    /// Molecule IDs assigned to an arbitrary division this cycle. Every
    /// worker computes the full assignment map, so any division can be
    /// inspected from any worker.
    pub fn assigned_molecules_for(&self, division: usize) -> &[usize] {
        &self.assigned_molecules[division]
    }

    /// Parallel strategy in force for the current cycle.
    pub fn current_strategy(&self) -> DivisionStrategy {
        self.current_strategy
    }

    /// Whether this worker should collect statistics: everyone owns distinct
    /// work under the original strategy (group leaders report for their
    /// group); under the degraded pool strategy only the master reports.
    /// Totals are then summed pool-wide, with non-collectors contributing
    /// zero.
    pub fn collect_statistics(&self) -> bool {
        match self.current_strategy {
            DivisionStrategy::Pool => self.pool.is_master(),
            DivisionStrategy::Groups => self.pool.is_group_leader(),
            _ => true,
        }
    }

    // --- Cell locking ---

    fn can_lock_for_editing(&self, division: usize, cell: usize) -> bool {
        match self.cell_status[cell] {
            CellStatus::Unused => true,
            CellStatus::LockedForEditing | CellStatus::ReadByOne => self.cell_owners[cell] == Some(division),
            CellStatus::ReadByMany => false,
        }
    }

    /// Try to take the molecule for the division, locking its primary cells
    /// for editing and marking their neighbours read-only.
    fn try_assign_molecule(&mut self, cfg: &Configuration, mol: usize, division: usize) -> Result<bool> {
        if self.molecule_status[mol] != MoleculeStatus::ToDo {
            return Ok(false);
        }

        // Primary cells: every cell holding any atom of the molecule must be
        // lockable by this division
        let mut primary_cells: BTreeSet<usize> = BTreeSet::new();
        for &atom in &cfg.molecule(mol).atoms {
            let cell = cfg.atom(atom).cell;
            if !self.can_lock_for_editing(division, cell) {
                return Ok(false);
            }
            primary_cells.insert(cell);
        }

        // Read-only cells: all neighbours of the primary cells must not be
        // edit-locked by anyone else
        let mut read_only_cells: BTreeSet<usize> = BTreeSet::new();
        for &cell in &primary_cells {
            for nbr in cfg.cells().neighbours(cell) {
                if nbr.index == cell {
                    continue;
                }
                if self.cell_status[nbr.index] == CellStatus::LockedForEditing {
                    if self.cell_owners[nbr.index] == Some(division) {
                        continue;
                    }
                    return Ok(false);
                }
                read_only_cells.insert(nbr.index);
            }
        }

        // Commit: lock the primary cells...
        for &cell in &primary_cells {
            match self.cell_owners[cell] {
                Some(owner) if owner != division => {
                    return Err(EngineError::Internal(
                        "tried to lock a primary cell already owned by another worker".into(),
                    ))
                }
                _ => {
                    self.cell_owners[cell] = Some(division);
                    self.cell_status[cell] = CellStatus::LockedForEditing;
                    self.locked_cells[division].insert(cell);
                }
            }
        }

        // ...and mark the neighbours as read
        for &cell in &read_only_cells {
            match self.cell_status[cell] {
                CellStatus::LockedForEditing => {
                    if self.cell_owners[cell] != Some(division) {
                        return Err(EngineError::Internal(
                            "tried to mark an editing-locked cell as read-only".into(),
                        ));
                    }
                }
                CellStatus::Unused => {
                    self.cell_status[cell] = CellStatus::ReadByOne;
                    self.cell_owners[cell] = Some(division);
                }
                CellStatus::ReadByOne => {
                    if self.cell_owners[cell] != Some(division) {
                        self.cell_status[cell] = CellStatus::ReadByMany;
                        self.cell_owners[cell] = None;
                    }
                }
                CellStatus::ReadByMany => {}
            }
        }

        Ok(true)
    }

    /// Search a single cell for an assignable molecule.
    fn find_molecule_in_cell(&mut self, cfg: &Configuration, cell: usize, division: usize) -> Result<Option<usize>> {
        let mut checked: Vec<usize> = Vec::new();
        let atoms: Vec<usize> = cfg.cells().cell(cell).atoms().to_vec();
        for atom in atoms {
            let mol = cfg.atom(atom).molecule;
            if checked.contains(&mol) {
                continue;
            }
            if self.try_assign_molecule(cfg, mol, division)? {
                return Ok(Some(mol));
            }
            checked.push(mol);
        }
        Ok(None)
    }

    /// Find the next molecule for the division: first among its already
    /// locked cells (cheap, preserves locality), then among cells only it
    /// reads, then over all unused cells in order.
    fn find_molecule_for(&mut self, cfg: &Configuration, division: usize) -> Result<Option<usize>> {
        let locked: Vec<usize> = self.locked_cells[division].iter().copied().collect();
        for cell in locked {
            if let Some(mol) = self.find_molecule_in_cell(cfg, cell, division)? {
                return Ok(Some(mol));
            }
        }

        if !self.locked_cells[division].is_empty() {
            for cell in 0..cfg.cells().n_cells() {
                if self.cell_status[cell] != CellStatus::ReadByOne || self.cell_owners[cell] != Some(division) {
                    continue;
                }
                if let Some(mol) = self.find_molecule_in_cell(cfg, cell, division)? {
                    return Ok(Some(mol));
                }
            }
        }

        for cell in 0..cfg.cells().n_cells() {
            if self.cell_status[cell] != CellStatus::Unused {
                continue;
            }
            if let Some(mol) = self.find_molecule_in_cell(cfg, cell, division)? {
                return Ok(Some(mol));
            }
        }

        Ok(None)
    }

    pub fn n_cycles(&self) -> usize {
        self.n_cycles
    }

    /// Cells currently locked for editing by the given division (test hook
    /// for the disjointness property).
    pub fn locked_cells(&self, division: usize) -> Vec<usize> {
        self.locked_cells[division]
            .iter()
            .copied()
            .filter(|&c| self.cell_status[c] == CellStatus::LockedForEditing)
            .collect()
    }
}
