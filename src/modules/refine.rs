use tracing::{info, warn};

use crate::error::{EngineError, Outcome, Result};
use crate::math::data1d::{r_factor, Data1D};
use crate::math::fit::{ExpansionFunction, FunctionFit};
use crate::math::ft::{sine_ft, Broadening, WindowFunction};
use crate::modules::energy::EnergyModule;
use crate::modules::ModuleContext;
use crate::potentials::pair::PotentialMap;
use crate::scattering::matrix::ScatteringMatrix;
use crate::scattering::weights::Normalisation;

/// A reference dataset participating in the refinement.
#[derive(Debug, Clone)]
pub struct RefineTarget {
    /// Name of the NeutronSQ / XRaySQ module holding the weighted data.
    pub module: String,
    /// Name of the SQ module it sources unweighted partials from.
    pub source_sq: String,
}

/// The empirical potential structure refinement loop: stacks experimental
/// minus simulated differences into the scattering matrix, estimates true
/// partials through its pseudoinverse, fits the per-pair difference with a
/// function basis, and feeds the resulting perturbation back into the
/// additional pair-potential channel.
pub struct RefineModule {
    pub name: String,
    pub frequency: u64,
    pub targets: Vec<RefineTarget>,
    /// Name of the GR module supplying unweighted g(r) (for automatic
    /// minimum radii).
    pub source_gr: String,
    /// Fraction of experiment in the augmented matrix; the simulated
    /// partials enter at 1 - feedback.
    pub feedback: f64,
    pub q_min: f64,
    pub q_max: f64,
    pub expansion_function: ExpansionFunction,
    /// Number of fit coefficients (None = derived from the potential range).
    pub n_coeff_p: Option<usize>,
    /// Width of the fit functions in Q.
    pub p_sigma1: f64,
    /// Real-space smoothing length applied to the generated perturbation.
    pub p_sigma2: f64,
    /// Overall scale applied to the perturbations.
    pub weighting: f64,
    /// Minimum radius below which perturbations are zeroed (None = derive
    /// from the first peak in g(r)).
    pub minimum_radius: Option<f64>,
    pub truncation_width: f64,
    /// Boxcar half-width applied to fluctuation coefficients.
    pub fluctuation_smoothing: Option<usize>,
    /// Whether to apply generated perturbations to the potentials.
    pub modify_potential: bool,
    /// Replace the additional channel instead of accumulating into it.
    pub overwrite_potentials: bool,
    pub only_when_stable: Option<String>,
    /// Grid used when generating perturbations.
    pub pp_delta: f64,
}

impl RefineModule {
    pub fn new(name: &str, source_gr: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            targets: Vec::new(),
            source_gr: source_gr.to_string(),
            feedback: 0.9,
            q_min: 0.5,
            q_max: 30.0,
            expansion_function: ExpansionFunction::Gaussian,
            n_coeff_p: None,
            p_sigma1: 0.1,
            p_sigma2: 0.2,
            weighting: 1.0,
            minimum_radius: None,
            truncation_width: 0.3,
            fluctuation_smoothing: None,
            modify_potential: true,
            overwrite_potentials: false,
            only_when_stable: None,
            pp_delta: 0.05,
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, potentials: &mut PotentialMap) -> Result<Outcome> {
        if self.targets.is_empty() {
            return Err(EngineError::Setup(format!(
                "{}: at least one target dataset must be provided",
                self.name
            )));
        }

        // Refinement only proceeds once the energy is demonstrably stable
        if let Some(energy_module) = &self.only_when_stable {
            match EnergyModule::is_stable(ctx.store, energy_module) {
                Some(true) => {}
                Some(false) => {
                    warn!("{}: energy is not yet stable, no refinement this iteration", self.name);
                    return Ok(Outcome::NotExecuted);
                }
                None => {
                    return Err(EngineError::Setup(format!(
                        "{}: no energy stability information from '{}'",
                        self.name, energy_module
                    )))
                }
            }
        }

        let rho = ctx.cfg.atomic_density();
        if rho <= 0.0 {
            return Err(EngineError::Setup(format!("{}: configuration has no density", self.name)));
        }

        let pp_range = potentials.range();
        let n_coeff_p = self.n_coeff_p.unwrap_or(((10.0 * pp_range) as usize).min(200));

        info!(
            "{}: feedback {}, {} {} function(s), sigma(Q) {}, sigma(r) {}, weighting {}",
            self.name,
            self.feedback,
            n_coeff_p,
            match self.expansion_function {
                ExpansionFunction::Gaussian => "Gaussian",
                ExpansionFunction::Poisson => "Poisson",
            },
            self.p_sigma1,
            self.p_sigma2,
            self.weighting
        );

        let types: Vec<_> = ctx
            .cfg
            .atom_types()
            .entries()
            .iter()
            .map(|e| e.atom_type.clone())
            .collect();
        let n_types = types.len();
        let mut matrix = ScatteringMatrix::default();
        matrix.initialise(&types);

        // Combined unweighted S(Q), averaged over targets
        let mut simulated_sq: Vec<Data1D> = (0..matrix.n_pairs()).map(|_| Data1D::default()).collect();
        let pair_of = |i: usize, j: usize| crate::core::types::pair_index(i, j, n_types);

        let mut r_factor_total = 0.0;
        for target in &self.targets {
            let weighted = ctx
                .store
                .get_partial_set("WeightedSQ", &target.module)
                .ok_or_else(|| missing(&self.name, "WeightedSQ", &target.module))?
                .clone();
            let unweighted = ctx
                .store
                .get_partial_set("UnweightedSQ", &target.source_sq)
                .ok_or_else(|| missing(&self.name, "UnweightedSQ", &target.source_sq))?
                .clone();
            let reference = ctx
                .store
                .get_data1d("ReferenceData", &target.module)
                .ok_or_else(|| missing(&self.name, "ReferenceData", &target.module))?
                .clone();

            // Difference and r-factor over the fit range
            let mut difference = reference.clone();
            difference.add_interpolated(weighted.total(), -1.0);
            let mut trimmed_reference = reference.clone();
            trimmed_reference.trim(self.q_min, self.q_max);
            let dataset_r_factor = r_factor(&trimmed_reference, weighted.total());
            r_factor_total += dataset_r_factor;
            info!(
                "{}: current R-factor for reference data '{}' is {:.5}%",
                self.name, target.module, dataset_r_factor
            );

            let iteration = ctx.iteration as f64;
            ctx.store
                .realise_data1d(&format!("RFactor//{}", target.module), &self.name)?
                .add_point(iteration, dataset_r_factor);
            *ctx.store
                .realise_data1d(&format!("Difference//{}", target.module), &self.name)? = difference;

            // Stack the dataset into the scattering matrix, always as
            // absolute (un-normalised) structure factors with the
            // intramolecular total removed
            if let Some(weights) = ctx.store.get_neutron_weights("FullWeights", &target.module) {
                // Restore the reference to absolute units using the factor
                // recorded by the weighting module, then subtract the
                // (absolute) intramolecular total
                let norm = ctx
                    .store
                    .get_real("NormalisationFactor", &target.module)
                    .copied()
                    .unwrap_or(1.0);
                let mut row_data = reference.clone();
                row_data.scale(norm);
                let mut bound_total = weighted.bound_total(false);
                bound_total.scale(-1.0);
                row_data.add_interpolated(&bound_total, 1.0);
                matrix.add_neutron_reference(row_data, weights, self.feedback)?;
            } else if let Some(weights) = ctx.store.get_xray_weights("FullWeights", &target.module) {
                // X-ray rows always enter normalised to <f^2> so their
                // magnitudes are consistent with any neutron rows; convert
                // the reference from the module's normalisation first
                let recorded = ctx.store.get_int("Normalisation", &target.module).copied().unwrap_or(2);
                let mut row_data = reference.clone();
                for point in 0..row_data.n_values() {
                    let q = row_data.x(point);
                    let conversion = match recorded {
                        0 => 1.0 / weights.average_of_squares(q),
                        1 => weights.square_of_average(q) / weights.average_of_squares(q),
                        _ => 1.0,
                    };
                    let value = row_data.value(point) * conversion;
                    row_data.set_value(point, value);
                }
                let mut bound_total = weighted.bound_total(false);
                for point in 0..bound_total.n_values() {
                    let q = bound_total.x(point);
                    let value = bound_total.value(point) / weights.average_of_squares(q);
                    bound_total.set_value(point, value);
                }
                bound_total.scale(-1.0);
                row_data.add_interpolated(&bound_total, 1.0);
                matrix.add_xray_reference(row_data, weights, Normalisation::AverageOfSquares, self.feedback)?;
            } else {
                return Err(EngineError::Setup(format!(
                    "{}: target '{}' has no stored scattering weights",
                    self.name, target.module
                )));
            }

            // Accumulate this target's unweighted partials
            for (i, j) in unweighted.atom_types().pairs() {
                let global_i = ctx
                    .cfg
                    .atom_types()
                    .index_of_name(&unweighted.atom_types().atom_type(i).name)
                    .ok_or_else(|| EngineError::Internal(format!("{}: unknown type in partials", self.name)))?;
                let global_j = ctx
                    .cfg
                    .atom_types()
                    .index_of_name(&unweighted.atom_types().atom_type(j).name)
                    .ok_or_else(|| EngineError::Internal(format!("{}: unknown type in partials", self.name)))?;
                let slot = &mut simulated_sq[pair_of(global_i, global_j)];
                if slot.is_empty() {
                    *slot = Data1D::templated(
                        &format!("{}-{}", types[global_i].name, types[global_j].name),
                        unweighted.partial(i, j),
                    );
                }
                slot.add_interpolated(unweighted.partial(i, j), 1.0 / self.targets.len() as f64);
            }
        }

        r_factor_total /= self.targets.len() as f64;
        let iteration = ctx.iteration as f64;
        ctx.store
            .realise_data1d("RFactor", &self.name)?
            .add_point(iteration, r_factor_total);
        info!("{}: current total R-factor is {:.5}%", self.name, r_factor_total);

        // Augment with the simulated partials at complementary weight
        let pairs = matrix.type_pairs().to_vec();
        for (index, (type_i, type_j)) in pairs.iter().enumerate() {
            let mut data = simulated_sq[index].clone();
            data.set_tag(&format!("Simulated {}-{}", type_i.name, type_j.name));
            matrix.add_partial_reference(data, type_i, type_j, 1.0, 1.0 - self.feedback)?;
        }

        // Estimate the true partials
        let mut estimated_sq: Vec<Data1D> = (0..matrix.n_pairs()).map(|_| Data1D::default()).collect();
        matrix.generate_partials(&mut estimated_sq)?;
        *ctx.store.realise_data1d_vec("EstimatedSQ", &self.name)? = estimated_sq.clone();

        // Back-transform to estimated g(r)
        let mut estimated_gr = estimated_sq.clone();
        for partial in &mut estimated_gr {
            sine_ft(
                partial,
                1.0 / (2.0 * std::f64::consts::PI.powi(2) * rho),
                self.pp_delta,
                self.pp_delta,
                pp_range,
                WindowFunction::Lorch,
                Broadening::None,
                false,
            );
            partial.shift(1.0);
        }
        *ctx.store.realise_data1d_vec("EstimatedGR", &self.name)? = estimated_gr;

        // Minimum radii, either global or from the first maximum in g(r)
        let minimum_radii = self.minimum_radii(ctx, n_types)?;

        // Per pair: fit the difference, synthesise the perturbation, apply
        let mut pair_index = 0;
        for i in 0..n_types {
            for j in i..n_types {
                let mut delta_sq = estimated_sq[pair_index].clone();
                delta_sq.add_interpolated(&simulated_sq[pair_index], -1.0);
                delta_sq.trim(self.q_min, self.q_max);
                if delta_sq.n_values() < 4 {
                    pair_index += 1;
                    continue;
                }

                // Approximate the difference with the function basis
                let mut fit = FunctionFit::fit(&delta_sq, self.expansion_function, n_coeff_p, self.p_sigma1)?;
                if let Some(smoothing) = self.fluctuation_smoothing {
                    fit.smooth_coefficients(smoothing);
                }
                let smooth_delta = fit.approximation("DeltaSQ", self.q_min, self.q_max / 500.0, self.q_max);

                // Generate the perturbation in r-space
                let mut delta_phi = smooth_delta;
                sine_ft(
                    &mut delta_phi,
                    1.0 / (2.0 * std::f64::consts::PI.powi(2) * rho),
                    self.pp_delta,
                    self.pp_delta,
                    pp_range,
                    WindowFunction::Lorch,
                    Broadening::None,
                    false,
                );

                // Real-space smoothing over sigma(r)
                let smoothing_bins = (self.p_sigma2 / self.pp_delta).round() as usize;
                delta_phi.smooth(smoothing_bins);

                // Scale: weight limited by the absolute integral, opposing
                // the difference
                let abs_integral = delta_phi.abs_integral();
                let weight = if abs_integral > self.weighting {
                    -self.weighting / abs_integral
                } else {
                    -abs_integral
                };
                delta_phi.scale(weight);

                // Smoothly zero below the minimum radius, taper to zero at
                // the range limit
                let minimum_radius = minimum_radii[pair_index];
                let truncation_start = minimum_radius - self.truncation_width;
                let n_points = delta_phi.n_values();
                for point in 0..n_points {
                    let r = delta_phi.x(point);
                    let value = delta_phi.value(point);
                    let envelope = if r < truncation_start {
                        0.0
                    } else if r <= minimum_radius {
                        let x = (r - truncation_start) / self.truncation_width;
                        0.5 - 0.5 * (std::f64::consts::PI * x).cos()
                    } else {
                        1.0
                    };
                    let taper = 1.0 - point as f64 / (n_points - 1) as f64;
                    delta_phi.set_value(point, value * envelope * taper);
                }

                *ctx.store
                    .realise_data1d(&format!("DeltaPhiR//{}-{}", types[i].name, types[j].name), &self.name)? =
                    delta_phi.clone();

                if self.modify_potential {
                    potentials.get_mut(i, j).adjust_additional(&delta_phi, self.overwrite_potentials);
                }

                pair_index += 1;
            }
        }

        if self.modify_potential {
            info!("{}: perturbations applied to {} pair potential(s)", self.name, pair_index);
        } else {
            info!("{}: perturbations generated only (potentials unchanged)", self.name);
        }

        Ok(Outcome::Success)
    }

    /// Minimum perturbation radii per pair: the configured global value, or
    /// a fraction of the first non-zero point of the unweighted g(r).
    fn minimum_radii(&self, ctx: &ModuleContext, n_types: usize) -> Result<Vec<f64>> {
        let n_pairs = crate::core::types::n_pairs(n_types);
        if let Some(global) = self.minimum_radius {
            return Ok(vec![global; n_pairs]);
        }

        const R_FRACTION: f64 = 0.8;
        const THRESHOLD: f64 = 0.1;
        const HARD_LIMIT: f64 = 2.0 / R_FRACTION;

        let gr = ctx
            .store
            .get_partial_set("UnweightedGR", &self.source_gr)
            .ok_or_else(|| missing(&self.name, "UnweightedGR", &self.source_gr))?;

        let mut radii = vec![HARD_LIMIT * R_FRACTION; n_pairs];
        let mut index = 0;
        for i in 0..n_types {
            for j in i..n_types {
                let partial = gr.partial(i, j);
                let first_nonzero = (0..partial.n_values())
                    .find(|&n| partial.value(n) > THRESHOLD)
                    .map(|n| partial.x(n));
                if let Some(r) = first_nonzero {
                    if r < HARD_LIMIT {
                        radii[index] = r * R_FRACTION;
                    }
                }
                index += 1;
            }
        }
        Ok(radii)
    }
}

fn missing(module: &str, item: &str, prefix: &str) -> EngineError {
    EngineError::Setup(format!("{}: no {} data found under '{}'", module, item, prefix))
}
