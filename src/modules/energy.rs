use tracing::info;

use crate::error::{Outcome, Result};
use crate::kernels::energy::EnergyKernel;
use crate::modules::ModuleContext;
use crate::parallel::pool::DivisionStrategy;
use crate::potentials::pair::PotentialMap;

/// Calculates the configuration's total energy, maintains its history, and
/// asserts stability when the windowed gradient falls below threshold. Other
/// modules (MD, Refine) consult the `EnergyStable` flag before acting.
pub struct EnergyModule {
    pub name: String,
    pub frequency: u64,
    /// Number of trailing points over which the gradient is assessed.
    pub stability_window: usize,
    /// Threshold on |gradient| as a fraction of the mean |energy|.
    pub stability_threshold: f64,
}

impl EnergyModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            stability_window: 10,
            stability_threshold: 1.0e-3,
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, potentials: &PotentialMap) -> Result<Outcome> {
        let kernel = EnergyKernel::new(ctx.cfg, potentials, None);
        let strategy = DivisionStrategy::PoolProcesses;

        let pair_potential = kernel.total_pair_potential_energy(ctx.pool, strategy, true)?;
        let geometry = kernel.total_geometry_energy(ctx.pool, strategy)?;
        let total = pair_potential.total() + geometry;

        info!(
            "{}: inter = {:.6e}, intra = {:.6e}, geometry = {:.6e}, total = {:.6e} kJ/mol",
            self.name,
            pair_potential.inter,
            pair_potential.intra,
            geometry,
            total
        );

        let iteration = ctx.iteration;
        let history = ctx.store.realise_data1d("Total", &self.name)?;
        history.add_point(iteration as f64, total);

        // Windowed linear gradient against the mean magnitude
        let stable = {
            let n = history.n_values();
            if n < self.stability_window.max(2) {
                false
            } else {
                let window = &history.values()[n - self.stability_window..];
                let xs = &history.x_axis()[n - self.stability_window..];
                let mean_x = xs.iter().sum::<f64>() / xs.len() as f64;
                let mean_y = window.iter().sum::<f64>() / window.len() as f64;
                let mut numerator = 0.0;
                let mut denominator = 0.0;
                for (x, y) in xs.iter().zip(window) {
                    numerator += (x - mean_x) * (y - mean_y);
                    denominator += (x - mean_x).powi(2);
                }
                let gradient = if denominator > 0.0 { numerator / denominator } else { 0.0 };
                let mean_magnitude = window.iter().map(|v| v.abs()).sum::<f64>() / window.len() as f64;
                gradient.abs() <= self.stability_threshold * mean_magnitude.max(1.0e-10)
            }
        };

        *ctx.store.realise_bool("EnergyStable", &self.name)? = stable;
        if stable {
            info!("{}: energy is stable", self.name);
        }

        Ok(Outcome::Success)
    }

    /// Look up the stability verdict recorded by the named energy module.
    pub fn is_stable(store: &crate::core::registry::DataStore, energy_module: &str) -> Option<bool> {
        store.get_bool("EnergyStable", energy_module).copied()
    }
}
