use nalgebra::Vector3;
use tracing::info;

use crate::error::{Outcome, Result};
use crate::kernels::energy::EnergyKernel;
use crate::modules::ModuleContext;
use crate::parallel::change::ChangeStore;
use crate::parallel::distributor::RegionalDistributor;
use crate::parallel::pool::{sub_division_strategy, Communicator, Timer};
use crate::parallel::random::RandomBuffer;

/// Boltzmann constant, kJ mol^-1 K^-1.
pub const K_BOLTZMANN: f64 = 0.008314462;

/// Monte Carlo translations of individual atoms, accepted by Metropolis and
/// committed through the change store. The step size adapts toward the
/// target acceptance rate at the end of each run.
pub struct AtomShakeModule {
    pub name: String,
    pub frequency: u64,
    pub cutoff: Option<f64>,
    pub n_shakes_per_atom: usize,
    pub step_size: f64,
    pub step_size_min: f64,
    pub step_size_max: f64,
    pub target_acceptance_rate: f64,
}

impl AtomShakeModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            cutoff: None,
            n_shakes_per_atom: 1,
            step_size: 0.05,
            step_size_min: 0.001,
            step_size_max: 1.0,
            target_acceptance_rate: 0.33,
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, potentials: &crate::potentials::pair::PotentialMap) -> Result<Outcome> {
        let r_rt = 1.0 / (K_BOLTZMANN * ctx.cfg.temperature());
        let comms_timer = Timer::new();

        info!(
            "{}: {} shake(s) per atom, step size {:.5} A (allowed range {} <= delta <= {}), target rate {}",
            self.name,
            self.n_shakes_per_atom,
            self.step_size,
            self.step_size_min,
            self.step_size_max,
            self.target_acceptance_rate
        );

        let mut strategy = ctx.pool.best_strategy();
        let mut distributor = RegionalDistributor::new(ctx.cfg, ctx.pool, strategy);
        let mut change_store = ChangeStore::new(ctx.pool, Some(&comms_timer));
        let mut random = RandomBuffer::new(
            ctx.pool,
            sub_division_strategy(strategy),
            ctx.module_seed(&self.name),
            Some(&comms_timer),
        )?;

        let mut n_attempts = 0u64;
        let mut n_accepted = 0u64;
        let mut total_delta = 0.0;

        while distributor.cycle(ctx.cfg)? {
            if distributor.current_strategy() != strategy {
                strategy = distributor.current_strategy();
                random.reset(sub_division_strategy(strategy))?;
            }

            let targets: Vec<usize> = distributor.assigned_molecules().to_vec();
            for mol in targets {
                change_store.add_molecule(ctx.cfg, mol);

                let n_atoms = ctx.cfg.molecule(mol).atoms.len();
                for store_index in 0..n_atoms {
                    let atom = ctx.cfg.molecule(mol).atoms[store_index];

                    // Reference energies for the atom
                    let reference = {
                        let kernel = EnergyKernel::new(ctx.cfg, potentials, self.cutoff);
                        kernel.total_atom_energy(atom)
                    };
                    let mut current_energy = reference.total_unbound();
                    let mut current_geometry = reference.geometry;

                    for _ in 0..self.n_shakes_per_atom {
                        let delta_r = Vector3::new(
                            random.random_plus_minus_one() * self.step_size,
                            random.random_plus_minus_one() * self.step_size,
                            random.random_plus_minus_one() * self.step_size,
                        );
                        ctx.cfg.atom_mut(atom).r += delta_r;
                        ctx.cfg.update_atom_location(atom);

                        let trial = {
                            let kernel = EnergyKernel::new(ctx.cfg, potentials, self.cutoff);
                            kernel.total_atom_energy(atom)
                        };
                        let new_energy = trial.total_unbound();
                        let new_geometry = trial.geometry;

                        let delta = (new_energy + new_geometry) - (current_energy + current_geometry);
                        let accept = delta < 0.0 || random.random() < (-delta * r_rt).exp();

                        if accept {
                            change_store.update_atom(ctx.cfg, store_index);
                            current_energy = new_energy;
                            current_geometry = new_geometry;
                        } else {
                            change_store.revert(ctx.cfg, store_index);
                        }

                        if distributor.collect_statistics() {
                            if accept {
                                total_delta += delta;
                                n_accepted += 1;
                            }
                            n_attempts += 1;
                        }
                    }
                }

                change_store.store_and_reset();
            }

            change_store.distribute_and_apply(ctx.cfg)?;
            change_store.reset();
        }

        // Collect statistics across the pool
        let mut counts = [n_accepted, n_attempts];
        comms_timer.time(|| ctx.pool.all_sum_uint(&mut counts, Communicator::Pool))?;
        let mut deltas = [total_delta];
        comms_timer.time(|| ctx.pool.all_sum_real(&mut deltas, Communicator::Pool))?;
        let (n_accepted, n_attempts, total_delta) = (counts[0], counts[1], deltas[0]);

        let rate = if n_attempts > 0 {
            n_accepted as f64 / n_attempts as f64
        } else {
            0.0
        };
        info!(
            "{}: total energy delta {:.4e} kJ/mol; acceptance rate {:.2}% ({} of {} attempted moves)",
            self.name,
            total_delta,
            100.0 * rate,
            n_accepted,
            n_attempts
        );

        // Adapt the step size toward the target acceptance rate
        self.step_size *= if n_accepted == 0 {
            0.8
        } else {
            rate / self.target_acceptance_rate
        };
        self.step_size = self.step_size.clamp(self.step_size_min, self.step_size_max);
        info!("{}: updated step size is {:.5} A", self.name, self.step_size);

        if n_accepted > 0 {
            ctx.cfg.increment_contents_version();
        }

        Ok(Outcome::Success)
    }
}
