use crate::core::configuration::{Configuration, ExternalPotential};
use crate::error::Result;
use crate::kernels::geometry::GeometryKernel;
use crate::parallel::pool::{Communicator, DivisionStrategy, ProcessPool};
use crate::potentials::pair::PotentialMap;

/// Pair-potential energy split into inter- and intramolecular parts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairPotentialEnergy {
    pub inter: f64,
    pub intra: f64,
}

impl PairPotentialEnergy {
    pub fn total(&self) -> f64 {
        self.inter + self.intra
    }
}

impl std::ops::AddAssign for PairPotentialEnergy {
    fn add_assign(&mut self, rhs: Self) {
        self.inter += rhs.inter;
        self.intra += rhs.intra;
    }
}

/// Decomposed energy of an atom, molecule or configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyResult {
    pub pair_potential: PairPotentialEnergy,
    pub geometry: f64,
    pub extended: f64,
}

impl EnergyResult {
    pub fn total(&self) -> f64 {
        self.pair_potential.total() + self.geometry + self.extended
    }

    /// Everything except the geometry terms.
    pub fn total_unbound(&self) -> f64 {
        self.pair_potential.total() + self.extended
    }
}

/// Which contributions to include in a total.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyFlags {
    pub exclude_geometry: bool,
    pub exclude_intra_pair_potential: bool,
    pub exclude_extended: bool,
}

impl EnergyFlags {
    pub const RIGID_BODY: EnergyFlags = EnergyFlags {
        exclude_geometry: true,
        exclude_intra_pair_potential: true,
        exclude_extended: false,
    };
}

/// Aggregates pair-potential, geometry and extended-potential energies for an
/// atom, a molecule, or the whole configuration, using the cell neighbour
/// list. Pure function of (configuration snapshot, potential map, cutoff):
/// safe to call from any worker on disjoint molecule sets.
pub struct EnergyKernel<'a> {
    cfg: &'a Configuration,
    potentials: &'a PotentialMap,
    cutoff_sq: f64,
    geometry: GeometryKernel<'a>,
}

impl<'a> EnergyKernel<'a> {
    pub fn new(cfg: &'a Configuration, potentials: &'a PotentialMap, cutoff: Option<f64>) -> Self {
        let cutoff = cutoff.unwrap_or_else(|| potentials.range());
        Self {
            cfg,
            potentials,
            cutoff_sq: cutoff * cutoff,
            geometry: GeometryKernel::new(cfg),
        }
    }

    pub fn geometry(&self) -> &GeometryKernel<'a> {
        &self.geometry
    }

    /// Pair-potential energy between two atoms at squared distance `r_sq`,
    /// applying intramolecular scalings when they share a molecule. Returns
    /// (energy, is_intramolecular); excluded pairs contribute nothing.
    fn pair_energy(&self, i: usize, j: usize, r_sq: f64) -> (f64, bool) {
        let ai = self.cfg.atom(i);
        let aj = self.cfg.atom(j);
        if ai.molecule == aj.molecule {
            let species = &self.cfg.molecule(ai.molecule).species;
            let scale = species.intra_scaling(ai.species_atom_index, aj.species_atom_index);
            if scale.is_excluded() {
                return (0.0, true);
            }
            (
                self.potentials.energy_scaled(
                    ai.local_type_index,
                    aj.local_type_index,
                    r_sq.sqrt(),
                    scale.elec,
                    scale.vdw,
                ),
                true,
            )
        } else {
            (
                self.potentials.energy(ai.local_type_index, aj.local_type_index, r_sq.sqrt()),
                false,
            )
        }
    }

    /// Squared separation of two atoms, imaged or direct per the flag.
    fn distance_sq(&self, i: usize, j: usize, apply_mim: bool) -> f64 {
        let (ri, rj) = (&self.cfg.atom(i).r, &self.cfg.atom(j).r);
        if apply_mim {
            self.cfg.lattice().minimum_distance_sq(ri, rj)
        } else {
            (rj - ri).norm_squared()
        }
    }

    /// Pair-potential energy of atom `i` with the world.
    pub fn atom_pair_potential_energy(&self, i: usize) -> PairPotentialEnergy {
        let mut energy = PairPotentialEnergy::default();
        let cell = self.cfg.atom(i).cell;
        for nbr in self.cfg.cells().neighbours(cell) {
            for &j in self.cfg.cells().cell(nbr.index).atoms() {
                if i == j {
                    continue;
                }
                let r_sq = self.distance_sq(i, j, nbr.requires_mim);
                if r_sq > self.cutoff_sq {
                    continue;
                }
                let (e, intra) = self.pair_energy(i, j, r_sq);
                if intra {
                    energy.intra += e;
                } else {
                    energy.inter += e;
                }
            }
        }
        energy
    }

    /// Pair-potential energy of a whole molecule with the world. Pairs inside
    /// the molecule are counted once.
    pub fn molecule_pair_potential_energy(&self, mol: usize, include_intra: bool) -> PairPotentialEnergy {
        let mut energy = PairPotentialEnergy::default();
        let atoms = &self.cfg.molecule(mol).atoms;
        for &i in atoms {
            let cell = self.cfg.atom(i).cell;
            for nbr in self.cfg.cells().neighbours(cell) {
                for &j in self.cfg.cells().cell(nbr.index).atoms() {
                    if i == j {
                        continue;
                    }
                    let same_molecule = self.cfg.atom(j).molecule == mol;
                    if same_molecule && (!include_intra || j < i) {
                        // Skip, or count each internal pair once
                        continue;
                    }
                    let r_sq = self.distance_sq(i, j, nbr.requires_mim);
                    if r_sq > self.cutoff_sq {
                        continue;
                    }
                    let (e, intra) = self.pair_energy(i, j, r_sq);
                    if intra {
                        energy.intra += e;
                    } else {
                        energy.inter += e;
                    }
                }
            }
        }
        energy
    }

    /// Pair-potential energy among atoms of one cell.
    pub fn cell_energy(&self, cell: usize, include_intra: bool) -> PairPotentialEnergy {
        let mut energy = PairPotentialEnergy::default();
        let atoms = self.cfg.cells().cell(cell).atoms();
        for (n, &i) in atoms.iter().enumerate() {
            for &j in &atoms[n + 1..] {
                let same_molecule = self.cfg.atom(i).molecule == self.cfg.atom(j).molecule;
                if same_molecule && !include_intra {
                    continue;
                }
                let r_sq = self.distance_sq(i, j, false);
                if r_sq > self.cutoff_sq {
                    continue;
                }
                let (e, intra) = self.pair_energy(i, j, r_sq);
                if intra {
                    energy.intra += e;
                } else {
                    energy.inter += e;
                }
            }
        }
        energy
    }

    /// Pair-potential energy between the atoms of two different cells, with
    /// early exit past the cutoff.
    pub fn cell_to_cell_energy(&self, cell: usize, other: usize, apply_mim: bool, include_intra: bool) -> PairPotentialEnergy {
        let mut energy = PairPotentialEnergy::default();
        for &i in self.cfg.cells().cell(cell).atoms() {
            for &j in self.cfg.cells().cell(other).atoms() {
                let same_molecule = self.cfg.atom(i).molecule == self.cfg.atom(j).molecule;
                if same_molecule && !include_intra {
                    continue;
                }
                let r_sq = self.distance_sq(i, j, apply_mim);
                if r_sq > self.cutoff_sq {
                    continue;
                }
                let (e, intra) = self.pair_energy(i, j, r_sq);
                if intra {
                    energy.intra += e;
                } else {
                    energy.inter += e;
                }
            }
        }
        energy
    }

    /// Extended-potential energy of one atom.
    fn atom_extended_energy(&self, i: usize) -> f64 {
        let atom = self.cfg.atom(i);
        let mut energy = 0.0;
        for potential in self.cfg.external_potentials() {
            match potential {
                ExternalPotential::SphericalWell { origin, k, species } => {
                    if let Some(name) = species {
                        if self.cfg.molecule(atom.molecule).species.name() != name {
                            continue;
                        }
                    }
                    energy += 0.5 * k * (atom.r - origin).norm_squared();
                }
            }
        }
        energy
    }

    fn molecule_extended_energy(&self, mol: usize) -> f64 {
        self.cfg
            .molecule(mol)
            .atoms
            .iter()
            .map(|&i| self.atom_extended_energy(i))
            .sum()
    }

    /// Total energy of atom `i` with the world.
    pub fn total_atom_energy(&self, i: usize) -> EnergyResult {
        EnergyResult {
            pair_potential: self.atom_pair_potential_energy(i),
            geometry: self
                .geometry
                .atom_geometry_energy(self.cfg.atom(i).molecule, self.cfg.atom(i).species_atom_index),
            extended: self.atom_extended_energy(i),
        }
    }

    /// Total energy of a molecule with the world.
    pub fn total_molecule_energy(&self, mol: usize, flags: EnergyFlags) -> EnergyResult {
        let pp = self.molecule_pair_potential_energy(mol, !flags.exclude_intra_pair_potential);
        EnergyResult {
            pair_potential: pp,
            geometry: if flags.exclude_geometry {
                0.0
            } else {
                self.geometry.molecule_geometry_energy(mol)
            },
            extended: if flags.exclude_extended {
                0.0
            } else {
                self.molecule_extended_energy(mol)
            },
        }
    }

    /// Total pair-potential energy of the configuration, summed over the cell
    /// neighbour pairs and reduced across the pool with the chosen strategy.
    pub fn total_pair_potential_energy(
        &self,
        pool: &ProcessPool,
        strategy: DivisionStrategy,
        include_intra: bool,
    ) -> Result<PairPotentialEnergy> {
        let mut local = PairPotentialEnergy::default();
        for (index, pair) in self.cfg.cells().neighbour_pairs().iter().enumerate() {
            if !pool.owns_item(strategy, index) {
                continue;
            }
            local += if pair.master == pair.neighbour {
                self.cell_energy(pair.master, include_intra)
            } else {
                self.cell_to_cell_energy(pair.master, pair.neighbour, pair.requires_mim, include_intra)
            };
        }

        // Workers sharing a division index computed identical contributions,
        // so scale before the pool-wide reduction
        let share = redundancy(pool, strategy);
        let mut values = [local.inter / share, local.intra / share];
        pool.all_sum_real(&mut values, Communicator::Pool)?;

        Ok(PairPotentialEnergy {
            inter: values[0],
            intra: values[1],
        })
    }

    /// Total geometry energy of the configuration, divided across the pool.
    pub fn total_geometry_energy(&self, pool: &ProcessPool, strategy: DivisionStrategy) -> Result<f64> {
        let mut local = 0.0;
        for mol in 0..self.cfg.n_molecules() {
            if pool.owns_item(strategy, mol) {
                local += self.geometry.molecule_geometry_energy(mol);
            }
        }
        let mut values = [local / redundancy(pool, strategy)];
        pool.all_sum_real(&mut values, Communicator::Pool)?;
        Ok(values[0])
    }
}

/// Number of workers computing the same slice of a pool-wide loop under the
/// given strategy.
pub fn redundancy(pool: &ProcessPool, strategy: DivisionStrategy) -> f64 {
    match strategy {
        DivisionStrategy::Pool => pool.size() as f64,
        DivisionStrategy::Groups => pool.group_size() as f64,
        _ => 1.0,
    }
}
