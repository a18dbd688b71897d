use nalgebra::Vector3;
use tracing::{info, warn};

use crate::core::types::element_mass;
use crate::error::{Outcome, Result};
use crate::io::export;
use crate::kernels::energy::EnergyKernel;
use crate::kernels::forces::{ForceKernel, ForceKind};
use crate::modules::energy::EnergyModule;
use crate::modules::ModuleContext;
use crate::parallel::pool::DivisionStrategy;
use crate::parallel::random::RandomBuffer;
use crate::potentials::pair::PotentialMap;

/// Boltzmann constant in internal MD units (10 J mol^-1 K^-1); kinetic
/// energies below are in g mol^-1 A^2 ps^-2.
const KB_MD: f64 = 0.8314462;
/// Conversion from kJ/mol forces to internal 10 J/mol units.
const FORCE_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestepKind {
    Fixed,
    /// Choose dt so the largest per-axis displacement stays bounded.
    Variable,
}

/// Velocity-Verlet propagation with velocity-rescaling thermostat, adaptive
/// or fixed timestep, and optional per-axis force capping.
pub struct MdModule {
    pub name: String,
    pub frequency: u64,
    pub cutoff: Option<f64>,
    pub n_steps: usize,
    pub timestep_kind: TimestepKind,
    /// Picoseconds.
    pub fixed_timestep: f64,
    /// Cap per-axis forces to this magnitude (kJ/mol), if set.
    pub cap_forces_at: Option<f64>,
    pub random_velocities: bool,
    /// Only run when the named energy module has asserted stability.
    pub only_when_stable: Option<String>,
    pub trajectory_frequency: usize,
    pub energy_frequency: usize,
    pub output_frequency: usize,
    /// Zero the velocities of molecules not of these species (empty = all
    /// species are mobile).
    pub restrict_to_species: Vec<String>,
}

impl MdModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            cutoff: None,
            n_steps: 50,
            timestep_kind: TimestepKind::Variable,
            fixed_timestep: 5.0e-4,
            cap_forces_at: Some(1.0e7),
            random_velocities: false,
            only_when_stable: None,
            trajectory_frequency: 0,
            energy_frequency: 10,
            output_frequency: 5,
            restrict_to_species: Vec::new(),
        }
    }

    /// Choose a timestep from the current forces: the largest per-axis
    /// force times dt/m must stay below a safety fraction of the typical
    /// interatomic spacing. None if no sane step exists.
    fn determine_timestep(&self, forces: &[Vector3<f64>], masses: &[f64]) -> Option<f64> {
        match self.timestep_kind {
            TimestepKind::Fixed => Some(self.fixed_timestep),
            TimestepKind::Variable => {
                let mut max_ratio: f64 = 0.0;
                for (f, m) in forces.iter().zip(masses) {
                    let largest = f.x.abs().max(f.y.abs()).max(f.z.abs());
                    max_ratio = max_ratio.max(largest / m);
                }
                if max_ratio <= 0.0 {
                    return Some(self.fixed_timestep);
                }
                // Displacement bound of 0.01 A per step along any axis
                let dt = (0.01 / max_ratio).sqrt();
                if dt < 1.0e-6 {
                    None
                } else {
                    Some(dt.min(1.0e-3))
                }
            }
        }
    }

    fn cap_forces(max_force: f64, forces: &mut [Vector3<f64>]) -> u64 {
        let mut n_capped = 0;
        for f in forces {
            for axis in 0..3 {
                if f[axis].abs() > max_force {
                    f[axis] = max_force * f[axis].signum();
                    n_capped += 1;
                }
            }
        }
        n_capped
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, potentials: &PotentialMap) -> Result<Outcome> {
        if let Some(energy_module) = &self.only_when_stable {
            match EnergyModule::is_stable(ctx.store, energy_module) {
                Some(true) => {}
                Some(false) => {
                    warn!("{}: energy is not yet stable, skipping", self.name);
                    return Ok(Outcome::NotExecuted);
                }
                None => {
                    warn!("{}: no energy stability information from '{}'", self.name, energy_module);
                    return Ok(Outcome::NotExecuted);
                }
            }
        }

        let temperature = ctx.cfg.temperature();
        let n_atoms = ctx.cfg.n_atoms();
        let max_force = self.cap_forces_at.map(|cap| cap * FORCE_SCALE);

        info!(
            "{}: {} step(s), timestep {}, T = {} K",
            self.name,
            self.n_steps,
            match self.timestep_kind {
                TimestepKind::Fixed => format!("fixed {} ps", self.fixed_timestep),
                TimestepKind::Variable => "variable".to_string(),
            },
            temperature
        );

        // Mobility flags from the species restriction
        let free: Vec<bool> = if self.restrict_to_species.is_empty() {
            vec![true; n_atoms]
        } else {
            ctx.cfg
                .atoms()
                .iter()
                .map(|atom| {
                    let species = &ctx.cfg.molecule(atom.molecule).species;
                    self.restrict_to_species.iter().any(|s| s == species.name())
                })
                .collect()
        };

        let masses: Vec<f64> = ctx.cfg.atoms().iter().map(|a| element_mass(a.z)).collect();

        // Velocities persist across runs in the data store
        let mut random = RandomBuffer::new(
            ctx.pool,
            DivisionStrategy::Pool,
            ctx.module_seed(&self.name),
            None,
        )?;
        let stored = ctx.store.realise_real_vec("Velocities", &self.name)?;
        let mut velocities: Vec<Vector3<f64>> = if stored.len() == n_atoms * 3 && !self.random_velocities {
            info!("{}: existing velocities will be used", self.name);
            stored
                .chunks_exact(3)
                .map(|v| Vector3::new(v[0], v[1], v[2]))
                .collect()
        } else {
            info!("{}: random initial velocities will be assigned", self.name);
            (0..n_atoms)
                .map(|i| {
                    if free[i] {
                        Vector3::new(
                            (random.random() - 0.5).exp(),
                            (random.random() - 0.5).exp(),
                            (random.random() - 0.5).exp(),
                        ) / (2.0 * std::f64::consts::PI).sqrt()
                    } else {
                        Vector3::zeros()
                    }
                })
                .collect()
        };

        // Remove centre-of-mass drift and rescale to the target temperature
        let mut v_com = Vector3::zeros();
        let mut mass_sum = 0.0;
        for i in 0..n_atoms {
            if free[i] {
                v_com += velocities[i] * masses[i];
                mass_sum += masses[i];
            }
        }
        if mass_sum > 0.0 {
            v_com /= mass_sum;
            for i in 0..n_atoms {
                if free[i] {
                    velocities[i] -= v_com;
                } else {
                    velocities[i] = Vector3::zeros();
                }
            }
        }
        let kinetic = |velocities: &[Vector3<f64>]| -> f64 {
            velocities
                .iter()
                .zip(&masses)
                .map(|(v, m)| 0.5 * m * v.norm_squared())
                .sum()
        };
        let mut ke = kinetic(&velocities);
        let mut t_instant = ke * 2.0 / (3.0 * n_atoms as f64 * KB_MD);
        if t_instant > 0.0 {
            let t_scale = (temperature / t_instant).sqrt();
            velocities.iter_mut().for_each(|v| *v *= t_scale);
        }

        let mut f_unbound = vec![Vector3::zeros(); n_atoms];
        let mut f_bound = vec![Vector3::zeros(); n_atoms];
        let mut accelerations = vec![Vector3::zeros(); n_atoms];
        let strategy = DivisionStrategy::PoolProcesses;

        // Initial forces, in internal units
        {
            let kernel = ForceKernel::new(ctx.cfg, potentials, self.cutoff);
            kernel.total_forces(ctx.pool, strategy, ForceKind::Full, &mut f_unbound, &mut f_bound)?;
        }
        f_unbound.iter_mut().for_each(|f| *f *= FORCE_SCALE);
        f_bound.iter_mut().for_each(|f| *f *= FORCE_SCALE);

        if self.output_frequency > 0 {
            info!("{}:   Step        T(K)       Kinetic      Total PE     deltaT(ps)", self.name);
        }

        let mut n_capped = 0u64;
        let mut steps_taken = 0;
        for step in 1..=self.n_steps {
            let dt = match self.determine_timestep(&f_unbound, &masses) {
                Some(dt) => dt,
                None => {
                    warn!("{}: no reasonable timestep could be determined, stopping", self.name);
                    break;
                }
            };
            let dt_sq = dt * dt;

            // Velocity Verlet stage A: full-step positions, half-step
            // velocities
            for i in 0..n_atoms {
                if !free[i] {
                    continue;
                }
                let displacement = velocities[i] * dt + accelerations[i] * 0.5 * dt_sq;
                ctx.cfg.atom_mut(i).r += displacement;
                velocities[i] += accelerations[i] * 0.5 * dt;
            }
            ctx.cfg.update_all_atom_locations();

            // New forces
            {
                let kernel = ForceKernel::new(ctx.cfg, potentials, self.cutoff);
                kernel.total_forces(ctx.pool, strategy, ForceKind::Full, &mut f_unbound, &mut f_bound)?;
            }
            f_unbound.iter_mut().for_each(|f| *f *= FORCE_SCALE);
            f_bound.iter_mut().for_each(|f| *f *= FORCE_SCALE);
            if let Some(cap) = max_force {
                n_capped += Self::cap_forces(cap, &mut f_unbound);
                n_capped += Self::cap_forces(cap, &mut f_bound);
            }

            // Stage B: new accelerations, second half-step velocities
            ke = 0.0;
            for i in 0..n_atoms {
                if !free[i] {
                    continue;
                }
                accelerations[i] = (f_unbound[i] + f_bound[i]) / masses[i];
                velocities[i] += accelerations[i] * 0.5 * dt;
                ke += 0.5 * masses[i] * velocities[i].norm_squared();
            }

            // Berendsen-style rescale to the target temperature
            t_instant = ke * 2.0 / (3.0 * n_atoms as f64 * KB_MD);
            if t_instant > 0.0 {
                let t_scale = (temperature / t_instant).sqrt();
                velocities.iter_mut().for_each(|v| *v *= t_scale);
            }
            steps_taken = step;

            if self.output_frequency > 0 && (step == 1 || step % self.output_frequency == 0) {
                if self.energy_frequency > 0 && step % self.energy_frequency == 0 {
                    let kernel = EnergyKernel::new(ctx.cfg, potentials, self.cutoff);
                    let pe = kernel.total_pair_potential_energy(ctx.pool, strategy, true)?.total()
                        + kernel.total_geometry_energy(ctx.pool, strategy)?;
                    info!(
                        "{}:   {:<8} {:10.3e} {:12.4e} {:12.4e} {:12.4e}",
                        self.name,
                        step,
                        t_instant,
                        ke * 0.01,
                        pe,
                        dt
                    );
                } else {
                    info!(
                        "{}:   {:<8} {:10.3e} {:12.4e}              {:12.4e}",
                        self.name,
                        step,
                        t_instant,
                        ke * 0.01,
                        dt
                    );
                }
            }

            // Trajectory frames are written by the master only
            if self.trajectory_frequency > 0 && step % self.trajectory_frequency == 0 {
                let path = format!("{}.md.xyz", ctx.cfg.name());
                let written = if ctx.pool.is_master() {
                    export::append_xyz(ctx.cfg, &path, &format!("Step {} of {}, T = {:.2} K", step, self.n_steps, t_instant))
                        .is_ok()
                } else {
                    true
                };
                if !ctx.pool.decide(written)? {
                    return Err(crate::error::EngineError::Computation(format!(
                        "{}: failed to write trajectory frame to '{}'",
                        self.name, path
                    )));
                }
            }
        }

        if let Some(cap) = max_force {
            if n_capped > 0 {
                info!(
                    "{}: {} force components were capped at {:.3e} kJ/mol",
                    self.name,
                    n_capped,
                    cap / FORCE_SCALE
                );
            }
        }

        // Persist velocities
        let stored = ctx.store.realise_real_vec("Velocities", &self.name)?;
        *stored = velocities.iter().flat_map(|v| [v.x, v.y, v.z]).collect();

        if steps_taken > 0 {
            ctx.cfg.increment_contents_version();
            info!("{}: {} step(s) performed", self.name, steps_taken);
            Ok(Outcome::Success)
        } else {
            Ok(Outcome::NotExecuted)
        }
    }
}
