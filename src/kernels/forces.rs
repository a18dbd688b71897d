use nalgebra::Vector3;

use crate::core::configuration::{Configuration, ExternalPotential};
use crate::error::Result;
use crate::kernels::energy::redundancy;
use crate::kernels::geometry::GeometryKernel;
use crate::parallel::pool::{Communicator, DivisionStrategy, ProcessPool};
use crate::potentials::pair::PotentialMap;

/// Which force contributions to calculate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceKind {
    /// Pair potentials plus geometry terms.
    Full,
    /// Geometry (and scaled intramolecular pair) terms only.
    IntraMolecularOnly,
}

/// Accumulates analytic forces mirroring the decomposition used by
/// [`EnergyKernel`](crate::kernels::energy::EnergyKernel): unbound
/// (pair-potential + extended) and bound (geometry) contributions are kept in
/// separate arrays so callers can cap or report them independently.
pub struct ForceKernel<'a> {
    cfg: &'a Configuration,
    potentials: &'a PotentialMap,
    cutoff_sq: f64,
    geometry: GeometryKernel<'a>,
}

impl<'a> ForceKernel<'a> {
    pub fn new(cfg: &'a Configuration, potentials: &'a PotentialMap, cutoff: Option<f64>) -> Self {
        let cutoff = cutoff.unwrap_or_else(|| potentials.range());
        Self {
            cfg,
            potentials,
            cutoff_sq: cutoff * cutoff,
            geometry: GeometryKernel::new(cfg),
        }
    }

    /// Pair force on atoms `i` and `j`, applied equal and opposite.
    fn add_pair_forces(&self, i: usize, j: usize, apply_mim: bool, f: &mut [Vector3<f64>]) {
        let ai = self.cfg.atom(i);
        let aj = self.cfg.atom(j);
        let vec_ij = if apply_mim {
            self.cfg.lattice().minimum_vector(&ai.r, &aj.r)
        } else {
            aj.r - ai.r
        };
        let r_sq = vec_ij.norm_squared();
        if r_sq > self.cutoff_sq || r_sq < 1.0e-10 {
            return;
        }
        let r = r_sq.sqrt();

        let magnitude = if ai.molecule == aj.molecule {
            let species = &self.cfg.molecule(ai.molecule).species;
            let scale = species.intra_scaling(ai.species_atom_index, aj.species_atom_index);
            if scale.is_excluded() {
                return;
            }
            self.potentials
                .force_scaled(ai.local_type_index, aj.local_type_index, r, scale.elec, scale.vdw)
        } else {
            self.potentials.force(ai.local_type_index, aj.local_type_index, r)
        };

        // Positive magnitude is repulsive: push i away from j
        let direction = vec_ij / r;
        f[i] -= direction * magnitude;
        f[j] += direction * magnitude;
    }

    fn add_external_forces(&self, f: &mut [Vector3<f64>]) {
        for potential in self.cfg.external_potentials() {
            match potential {
                ExternalPotential::SphericalWell { origin, k, species } => {
                    for (i, atom) in self.cfg.atoms().iter().enumerate() {
                        if let Some(name) = species {
                            if self.cfg.molecule(atom.molecule).species.name() != name {
                                continue;
                            }
                        }
                        f[i] -= (atom.r - origin) * *k;
                    }
                }
            }
        }
    }

    /// Accumulate total forces. `f_unbound` receives pair-potential and
    /// extended contributions, `f_bound` the geometry terms; both are indexed
    /// by global atom index and must span the configuration. The cell-pair
    /// loop is divided across the pool by the given strategy and reduced
    /// pool-wide so every worker ends with identical arrays.
    pub fn total_forces(
        &self,
        pool: &ProcessPool,
        strategy: DivisionStrategy,
        kind: ForceKind,
        f_unbound: &mut [Vector3<f64>],
        f_bound: &mut [Vector3<f64>],
    ) -> Result<()> {
        assert_eq!(f_unbound.len(), self.cfg.n_atoms());
        assert_eq!(f_bound.len(), self.cfg.n_atoms());
        f_unbound.iter_mut().for_each(|f| *f = Vector3::zeros());
        f_bound.iter_mut().for_each(|f| *f = Vector3::zeros());

        if kind == ForceKind::Full {
            for (index, pair) in self.cfg.cells().neighbour_pairs().iter().enumerate() {
                if !pool.owns_item(strategy, index) {
                    continue;
                }
                if pair.master == pair.neighbour {
                    let atoms = self.cfg.cells().cell(pair.master).atoms();
                    for (n, &i) in atoms.iter().enumerate() {
                        for &j in &atoms[n + 1..] {
                            self.add_pair_forces(i, j, false, f_unbound);
                        }
                    }
                } else {
                    for &i in self.cfg.cells().cell(pair.master).atoms() {
                        for &j in self.cfg.cells().cell(pair.neighbour).atoms() {
                            self.add_pair_forces(i, j, pair.requires_mim, f_unbound);
                        }
                    }
                }
            }
        }

        for mol in 0..self.cfg.n_molecules() {
            if pool.owns_item(strategy, mol) {
                self.geometry.molecule_geometry_forces(mol, f_bound);
            }
        }

        // Reduce both arrays pool-wide
        let share = redundancy(pool, strategy);
        let mut flat: Vec<f64> = f_unbound
            .iter()
            .chain(f_bound.iter())
            .flat_map(|v| [v.x / share, v.y / share, v.z / share])
            .collect();
        pool.all_sum_real(&mut flat, Communicator::Pool)?;

        let n = self.cfg.n_atoms();
        for (i, chunk) in flat.chunks_exact(3).enumerate() {
            let v = Vector3::new(chunk[0], chunk[1], chunk[2]);
            if i < n {
                f_unbound[i] = v;
            } else {
                f_bound[i - n] = v;
            }
        }

        // External terms are cheap and deterministic: every worker adds the
        // same values after the reduction
        if kind == ForceKind::Full {
            self.add_external_forces(f_unbound);
        }

        Ok(())
    }
}
