use nalgebra::{Rotation3, Vector3};
use tracing::info;

use crate::error::{Outcome, Result};
use crate::kernels::energy::{EnergyFlags, EnergyKernel};
use crate::modules::atomshake::K_BOLTZMANN;
use crate::modules::ModuleContext;
use crate::parallel::change::ChangeStore;
use crate::parallel::distributor::RegionalDistributor;
use crate::parallel::pool::{sub_division_strategy, Communicator, Timer};
use crate::parallel::random::RandomBuffer;

/// Monte Carlo rigid-body moves of whole molecules: translations, rotations,
/// or both, mixed deterministically so the two step sizes can adapt
/// independently.
pub struct MolShakeModule {
    pub name: String,
    pub frequency: u64,
    pub cutoff: Option<f64>,
    pub n_shakes_per_molecule: usize,
    pub translation_step: f64,
    pub translation_step_min: f64,
    pub translation_step_max: f64,
    /// Degrees.
    pub rotation_step: f64,
    pub rotation_step_min: f64,
    pub rotation_step_max: f64,
    pub target_acceptance_rate: f64,
    /// Restrict moves to molecules of the named species (empty = all).
    pub restrict_to_species: Vec<String>,
}

impl MolShakeModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            cutoff: None,
            n_shakes_per_molecule: 1,
            translation_step: 0.05,
            translation_step_min: 0.001,
            translation_step_max: 3.0,
            rotation_step: 1.0,
            rotation_step_min: 0.01,
            rotation_step_max: 90.0,
            target_acceptance_rate: 0.33,
            restrict_to_species: Vec::new(),
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, potentials: &crate::potentials::pair::PotentialMap) -> Result<Outcome> {
        let r_rt = 1.0 / (K_BOLTZMANN * ctx.cfg.temperature());
        let comms_timer = Timer::new();

        info!(
            "{}: {} shake(s) per molecule; translation step {:.5} A, rotation step {:.5} deg",
            self.name, self.n_shakes_per_molecule, self.translation_step, self.rotation_step
        );

        let mut strategy = ctx.pool.best_strategy();
        let mut distributor = RegionalDistributor::new(ctx.cfg, ctx.pool, strategy);

        // Restrict targets by species if requested
        if !self.restrict_to_species.is_empty() {
            let targets: Vec<usize> = ctx
                .cfg
                .molecules()
                .iter()
                .enumerate()
                .filter(|(_, mol)| self.restrict_to_species.iter().any(|s| s == mol.species.name()))
                .map(|(id, _)| id)
                .collect();
            distributor.set_target_molecules(&targets);
        }

        let mut change_store = ChangeStore::new(ctx.pool, Some(&comms_timer));
        let mut random = RandomBuffer::new(
            ctx.pool,
            sub_division_strategy(strategy),
            ctx.module_seed(&self.name),
            Some(&comms_timer),
        )?;

        let mut n_translation_attempts = 0u64;
        let mut n_translations_accepted = 0u64;
        let mut n_rotation_attempts = 0u64;
        let mut n_rotations_accepted = 0u64;
        let mut n_general_attempts = 0u64;
        let mut total_delta = 0.0;

        // Ten-shot mixer: 8 combined moves, 1 translation-only, 1
        // rotation-only, starting from a random offset
        let mut count = (random.random() * 10.0) as u32;

        while distributor.cycle(ctx.cfg)? {
            if distributor.current_strategy() != strategy {
                strategy = distributor.current_strategy();
                random.reset(sub_division_strategy(strategy))?;
            }

            let targets: Vec<usize> = distributor.assigned_molecules().to_vec();
            for mol in targets {
                change_store.add_molecule(ctx.cfg, mol);

                // Reference energy excluding geometry and intramolecular pair
                // potentials, which rigid-body moves leave unchanged
                let mut current_energy = {
                    let kernel = EnergyKernel::new(ctx.cfg, potentials, self.cutoff);
                    kernel.total_molecule_energy(mol, EnergyFlags::RIGID_BODY).total()
                };

                for _ in 0..self.n_shakes_per_molecule {
                    let (rotate, translate) = match count {
                        0 => (true, false),
                        1 => (false, true),
                        _ => (true, true),
                    };

                    if translate {
                        let delta = Vector3::new(
                            random.random_plus_minus_one() * self.translation_step,
                            random.random_plus_minus_one() * self.translation_step,
                            random.random_plus_minus_one() * self.translation_step,
                        );
                        ctx.cfg.translate_molecule(mol, delta);
                    }

                    if rotate {
                        let rotation = Rotation3::from_euler_angles(
                            (random.random_plus_minus_one() * self.rotation_step).to_radians(),
                            (random.random_plus_minus_one() * self.rotation_step).to_radians(),
                            0.0,
                        );
                        ctx.cfg.transform_molecule(mol, rotation.matrix());
                    }

                    ctx.cfg.update_molecule_locations(mol);

                    let new_energy = {
                        let kernel = EnergyKernel::new(ctx.cfg, potentials, self.cutoff);
                        kernel.total_molecule_energy(mol, EnergyFlags::RIGID_BODY).total()
                    };

                    let delta = new_energy - current_energy;
                    let accept = delta < 0.0 || random.random() < (-delta * r_rt).exp();

                    if accept {
                        change_store.update_all(ctx.cfg);
                        current_energy = new_energy;
                    } else {
                        change_store.revert_all(ctx.cfg);
                    }

                    if distributor.collect_statistics() {
                        if accept {
                            total_delta += delta;
                        }
                        if rotate {
                            if accept {
                                n_rotations_accepted += 1;
                            }
                            n_rotation_attempts += 1;
                        }
                        if translate {
                            if accept {
                                n_translations_accepted += 1;
                            }
                            n_translation_attempts += 1;
                        }
                        n_general_attempts += 1;
                    }

                    count = (count + 1) % 10;
                }

                change_store.store_and_reset();
            }

            change_store.distribute_and_apply(ctx.cfg)?;
            change_store.reset();
        }

        // Collect statistics across the pool
        let mut counts = [
            n_translation_attempts,
            n_translations_accepted,
            n_rotation_attempts,
            n_rotations_accepted,
            n_general_attempts,
        ];
        comms_timer.time(|| ctx.pool.all_sum_uint(&mut counts, Communicator::Pool))?;
        let mut deltas = [total_delta];
        comms_timer.time(|| ctx.pool.all_sum_real(&mut deltas, Communicator::Pool))?;

        let translation_rate = if counts[0] > 0 { counts[1] as f64 / counts[0] as f64 } else { 0.0 };
        let rotation_rate = if counts[2] > 0 { counts[3] as f64 / counts[2] as f64 } else { 0.0 };

        info!(
            "{}: total energy delta {:.4e} kJ/mol over {} general attempts",
            self.name, deltas[0], counts[4]
        );
        info!(
            "{}: translation acceptance {:.2}% ({} of {}), rotation acceptance {:.2}% ({} of {})",
            self.name,
            100.0 * translation_rate,
            counts[1],
            counts[0],
            100.0 * rotation_rate,
            counts[3],
            counts[2]
        );

        // Adapt the two step sizes independently
        self.translation_step *= if counts[1] == 0 {
            0.8
        } else {
            translation_rate / self.target_acceptance_rate
        };
        self.translation_step = self
            .translation_step
            .clamp(self.translation_step_min, self.translation_step_max);

        self.rotation_step *= if counts[3] == 0 {
            0.8
        } else {
            rotation_rate / self.target_acceptance_rate
        };
        self.rotation_step = self.rotation_step.clamp(self.rotation_step_min, self.rotation_step_max);

        info!(
            "{}: updated steps are {:.5} A (translation), {:.5} deg (rotation)",
            self.name, self.translation_step, self.rotation_step
        );

        if counts[1] > 0 || counts[3] > 0 {
            ctx.cfg.increment_contents_version();
        }

        Ok(Outcome::Success)
    }
}
