use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::types::{pair_index, AtomType, AtomTypeMix};
use crate::error::{EngineError, Result};
use crate::math::data1d::Data1D;

/// Coulomb conversion factor: e^2 / (4 pi eps0), in kJ mol^-1 Angstroms.
pub const COULOMB_CONSTANT: f64 = 1389.35444;

/// Interaction between one ordered type pair: analytic short-range
/// (Lennard-Jones, Lorentz-Berthelot combined) plus truncated-and-shifted
/// Coulomb, and a tabulated additional channel written by the refinement
/// loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairPotential {
    type_i: Arc<AtomType>,
    type_j: Arc<AtomType>,
    epsilon: f64,
    sigma: f64,
    charge_product: f64,
    range: f64,
    delta: f64,
    /// Empirical (additional) potential, tabulated on a regular r grid.
    u_additional: Data1D,
}

impl PairPotential {
    pub fn new(type_i: &Arc<AtomType>, type_j: &Arc<AtomType>, range: f64, delta: f64) -> Self {
        let u_additional = Data1D::regular(
            &format!("{}-{}//Additional", type_i.name, type_j.name),
            0.0,
            delta,
            range,
        );
        Self {
            epsilon: (type_i.epsilon * type_j.epsilon).sqrt(),
            sigma: 0.5 * (type_i.sigma + type_j.sigma),
            charge_product: type_i.charge * type_j.charge,
            type_i: type_i.clone(),
            type_j: type_j.clone(),
            range,
            delta,
            u_additional,
        }
    }

    pub fn type_i(&self) -> &Arc<AtomType> {
        &self.type_i
    }

    pub fn type_j(&self) -> &Arc<AtomType> {
        &self.type_j
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn lennard_jones(&self) -> (f64, f64) {
        (self.epsilon, self.sigma)
    }

    /// Short-range + electrostatic energy at separation `r`, without the
    /// additional channel. Components are scaled independently.
    pub fn analytic_energy(&self, r: f64, elec_scale: f64, vdw_scale: f64) -> f64 {
        if r >= self.range {
            return 0.0;
        }
        let sr6 = (self.sigma / r).powi(6);
        let lj = 4.0 * self.epsilon * (sr6 * sr6 - sr6);
        // Truncated and shifted Coulomb
        let coulomb = COULOMB_CONSTANT * self.charge_product * (1.0 / r - 1.0 / self.range);
        vdw_scale * lj + elec_scale * coulomb
    }

    /// Full energy at separation `r`, including the additional channel.
    pub fn energy(&self, r: f64) -> f64 {
        self.energy_scaled(r, 1.0, 1.0)
    }

    pub fn energy_scaled(&self, r: f64, elec_scale: f64, vdw_scale: f64) -> f64 {
        if r >= self.range {
            return 0.0;
        }
        self.analytic_energy(r, elec_scale, vdw_scale) + self.u_additional.interpolated(r)
    }

    /// Magnitude of -dU/dr at separation `r` (positive = repulsive).
    pub fn force(&self, r: f64) -> f64 {
        self.force_scaled(r, 1.0, 1.0)
    }

    pub fn force_scaled(&self, r: f64, elec_scale: f64, vdw_scale: f64) -> f64 {
        if r >= self.range {
            return 0.0;
        }
        let sr6 = (self.sigma / r).powi(6);
        let lj = 24.0 * self.epsilon * (2.0 * sr6 * sr6 - sr6) / r;
        let coulomb = COULOMB_CONSTANT * self.charge_product / (r * r);

        // Central difference over the tabulated additional channel
        let h = self.delta;
        let additional = if r > h && r < self.range - h {
            -(self.u_additional.interpolated(r + h) - self.u_additional.interpolated(r - h)) / (2.0 * h)
        } else {
            0.0
        };

        vdw_scale * lj + elec_scale * coulomb + additional
    }

    pub fn u_additional(&self) -> &Data1D {
        &self.u_additional
    }

    /// Fold a perturbation into the additional channel, interpolating onto
    /// the table grid. With `overwrite` the channel is replaced instead.
    pub fn adjust_additional(&mut self, delta: &Data1D, overwrite: bool) {
        if overwrite {
            self.u_additional.zero();
        }
        self.u_additional.add_interpolated(delta, 1.0);
    }

    pub fn reset_additional(&mut self) {
        self.u_additional.zero();
    }
}

/// Maps ordered type pairs to their pair potential; storage is
/// upper-triangular over the configuration's atom-type mix.
#[derive(Debug, Clone)]
pub struct PotentialMap {
    n_types: usize,
    range: f64,
    potentials: Vec<PairPotential>,
}

impl PotentialMap {
    pub fn new(mix: &AtomTypeMix, range: f64, delta: f64) -> Result<Self> {
        let n_types = mix.n_types();
        if n_types == 0 {
            return Err(EngineError::Setup("cannot build a potential map over an empty type mix".into()));
        }
        let mut potentials = Vec::with_capacity(n_types * (n_types + 1) / 2);
        for (i, j) in mix.pairs() {
            potentials.push(PairPotential::new(mix.atom_type(i), mix.atom_type(j), range, delta));
        }
        Ok(Self {
            n_types,
            range,
            potentials,
        })
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn n_types(&self) -> usize {
        self.n_types
    }

    pub fn get(&self, i: usize, j: usize) -> &PairPotential {
        &self.potentials[pair_index(i, j, self.n_types)]
    }

    pub fn get_mut(&mut self, i: usize, j: usize) -> &mut PairPotential {
        &mut self.potentials[pair_index(i, j, self.n_types)]
    }

    pub fn energy(&self, type_i: usize, type_j: usize, r: f64) -> f64 {
        self.get(type_i, type_j).energy(r)
    }

    pub fn energy_scaled(&self, type_i: usize, type_j: usize, r: f64, elec: f64, vdw: f64) -> f64 {
        self.get(type_i, type_j).energy_scaled(r, elec, vdw)
    }

    pub fn force(&self, type_i: usize, type_j: usize, r: f64) -> f64 {
        self.get(type_i, type_j).force(r)
    }

    pub fn force_scaled(&self, type_i: usize, type_j: usize, r: f64, elec: f64, vdw: f64) -> f64 {
        self.get(type_i, type_j).force_scaled(r, elec, vdw)
    }
}
