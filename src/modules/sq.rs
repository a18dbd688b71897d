use tracing::{info, warn};

use crate::error::{EngineError, Outcome, Result};
use crate::math::data1d::Data1D;
use crate::math::ft::{sine_ft, Broadening, WindowFunction};
use crate::modules::ModuleContext;
use crate::scattering::partials::PartialSet;
use crate::scattering::weights::{Normalisation, NeutronWeights, XRayWeights};

/// Fourier-transforms partial g(r) to partial S(Q). Partials are stored in
/// the deviation convention (S(Q) - 1 for unbound correlations), so totals
/// oscillate about zero.
pub struct SqModule {
    pub name: String,
    pub frequency: u64,
    /// Name of the GR module supplying `UnweightedGR`.
    pub source_gr: String,
    pub q_min: f64,
    pub q_delta: f64,
    pub q_max: f64,
    pub window: WindowFunction,
    /// Broadening applied to all partials in Q.
    pub q_broadening: Broadening,
    /// Extra broadening applied to intramolecular (bound) partials.
    pub bound_broadening: Broadening,
}

impl SqModule {
    pub fn new(name: &str, source_gr: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            source_gr: source_gr.to_string(),
            q_min: 0.05,
            q_delta: 0.05,
            q_max: 30.0,
            window: WindowFunction::Lorch,
            q_broadening: Broadening::None,
            bound_broadening: Broadening::None,
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext) -> Result<Outcome> {
        let gr = ctx
            .store
            .get_partial_set("UnweightedGR", &self.source_gr)
            .ok_or_else(|| {
                EngineError::Setup(format!(
                    "{}: no UnweightedGR data found under '{}'",
                    self.name, self.source_gr
                ))
            })?
            .clone();

        if gr.fingerprint() != ctx.cfg.fingerprint() {
            warn!(
                "{}: source g(r) fingerprint '{}' is stale (configuration is '{}')",
                self.name,
                gr.fingerprint(),
                ctx.cfg.fingerprint()
            );
        }

        let rho = ctx.cfg.atomic_density();
        let mut sq = PartialSet::partials_only(gr.atom_types());

        for (i, j) in gr.atom_types().pairs() {
            // Unbound: transform g(r) - 1
            let mut unbound = gr.unbound_partial(i, j).clone();
            unbound.shift(-1.0);
            sine_ft(
                &mut unbound,
                4.0 * std::f64::consts::PI * rho,
                self.q_min,
                self.q_delta,
                self.q_max,
                self.window,
                self.q_broadening,
                false,
            );

            // Bound: transform directly, with the intramolecular broadening
            let mut bound = gr.bound_partial(i, j).clone();
            if !gr.is_bound_partial_empty(i, j) {
                sine_ft(
                    &mut bound,
                    4.0 * std::f64::consts::PI * rho,
                    self.q_min,
                    self.q_delta,
                    self.q_max,
                    self.window,
                    self.bound_broadening,
                    false,
                );
            } else {
                bound = Data1D::templated(bound.tag(), &unbound);
            }

            let mut full = Data1D::templated(sq.partial(i, j).tag(), &unbound);
            for point in 0..full.n_values() {
                full.set_value(point, unbound.value(point) + bound.value(point));
            }

            let unbound_tag = sq.unbound_partial(i, j).tag().to_string();
            let bound_tag = sq.bound_partial(i, j).tag().to_string();
            unbound.set_tag(&unbound_tag);
            bound.set_tag(&bound_tag);
            *sq.unbound_partial_mut(i, j) = unbound;
            *sq.bound_partial_mut(i, j) = bound;
            *sq.partial_mut(i, j) = full;
        }

        sq.form_total(true);
        sq.set_fingerprint(gr.fingerprint());

        info!("{}: transformed partials to S(Q) over {} <= Q <= {}", self.name, self.q_min, self.q_max);

        *ctx.store.realise_partial_set("UnweightedSQ", &self.name)? = sq;
        Ok(Outcome::Success)
    }
}

/// One isotopologue entry in a neutron weighting specification.
#[derive(Debug, Clone)]
pub struct IsotopologueSpec {
    pub species: String,
    /// Isotopologue name defined on the species; None = natural abundance.
    pub isotopologue: Option<String>,
    pub weight: f64,
}

/// Applies neutron isotopologue weights to unweighted S(Q), producing the
/// weighted total F(Q) and registering the reference dataset for refinement.
pub struct NeutronSqModule {
    pub name: String,
    pub frequency: u64,
    /// Name of the SQ module supplying `UnweightedSQ`.
    pub source_sq: String,
    pub isotopologues: Vec<IsotopologueSpec>,
    pub exchangeable: Vec<String>,
    pub normalisation: Normalisation,
    pub reference: Option<Data1D>,
}

impl NeutronSqModule {
    pub fn new(name: &str, source_sq: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            source_sq: source_sq.to_string(),
            isotopologues: Vec::new(),
            exchangeable: Vec::new(),
            normalisation: Normalisation::None,
            reference: None,
        }
    }

    fn build_weights(&self, ctx: &ModuleContext) -> Result<NeutronWeights> {
        let mut weights = NeutronWeights::new();
        for (species, population) in ctx.cfg.species_populations() {
            let specs: Vec<&IsotopologueSpec> = self
                .isotopologues
                .iter()
                .filter(|spec| spec.species == species.name())
                .collect();
            if specs.is_empty() {
                weights.add_isotopologue(species, *population, None, 1.0);
                continue;
            }
            for spec in specs {
                let iso = match &spec.isotopologue {
                    None => None,
                    Some(name) => Some(species.isotopologue(name).ok_or_else(|| {
                        EngineError::Setup(format!(
                            "{}: species '{}' has no isotopologue '{}'",
                            self.name,
                            species.name(),
                            name
                        ))
                    })?),
                };
                weights.add_isotopologue(species, *population, iso, spec.weight);
            }
        }
        weights.create(&self.exchangeable)?;
        Ok(weights)
    }

    pub fn run(&mut self, ctx: &mut ModuleContext) -> Result<Outcome> {
        let unweighted = ctx
            .store
            .get_partial_set("UnweightedSQ", &self.source_sq)
            .ok_or_else(|| {
                EngineError::Setup(format!(
                    "{}: no UnweightedSQ data found under '{}'",
                    self.name, self.source_sq
                ))
            })?
            .clone();

        let weights = self.build_weights(ctx)?;

        // Weighted partials and total
        let mut weighted = unweighted.clone();
        let used = weights.atom_types();
        for (i, j) in unweighted.atom_types().pairs() {
            let wi = used
                .index_of_name(&unweighted.atom_types().atom_type(i).name)
                .ok_or_else(|| EngineError::Internal(format!("{}: weighting is missing a type", self.name)))?;
            let wj = used
                .index_of_name(&unweighted.atom_types().atom_type(j).name)
                .ok_or_else(|| EngineError::Internal(format!("{}: weighting is missing a type", self.name)))?;
            let weight = weights.weight(wi, wj);
            let intra_weight = weights.intramolecular_weight(wi, wj);

            // Weight the two channels independently, then rebuild the full
            // partial as their sum so the intramolecular weighting reaches
            // the total formed below
            weighted.unbound_partial_mut(i, j).scale(weight);
            weighted.bound_partial_mut(i, j).scale(intra_weight);
            let full_tag = weighted.partial(i, j).tag().to_string();
            let mut full = weighted.unbound_partial(i, j).clone();
            full.set_tag(&full_tag);
            let bound = weighted.bound_partial(i, j);
            for point in 0..full.n_values() {
                let value = full.value(point) + bound.value(point);
                full.set_value(point, value);
            }
            *weighted.partial_mut(i, j) = full;
        }
        weighted.form_total(false);

        // The total is reported in the requested normalisation; the partials
        // stay absolute. The factor is recorded so the refinement loop can
        // restore reference data to absolute units.
        let norm = weights.normalisation_factor(self.normalisation);
        if self.normalisation != Normalisation::None {
            weighted.total_mut().scale(1.0 / norm);
        }
        *ctx.store.realise_real("NormalisationFactor", &self.name)? = norm;

        info!(
            "{}: formed weighted F(Q) (<b>^2 = {:.4}, <b^2> = {:.4} fm^2)",
            self.name,
            weights.bound_coherent_square_of_average(),
            weights.bound_coherent_average_of_squares()
        );

        if let Some(reference) = &self.reference {
            *ctx.store.realise_data1d("ReferenceData", &self.name)? = reference.clone();
        }
        *ctx.store.realise_neutron_weights("FullWeights", &self.name)? = weights;
        *ctx.store.realise_partial_set("WeightedSQ", &self.name)? = weighted;
        Ok(Outcome::Success)
    }
}

/// Applies Q-dependent X-ray form-factor weights to unweighted S(Q).
pub struct XRaySqModule {
    pub name: String,
    pub frequency: u64,
    pub source_sq: String,
    pub normalisation: Normalisation,
    pub reference: Option<Data1D>,
}

impl XRaySqModule {
    pub fn new(name: &str, source_sq: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            source_sq: source_sq.to_string(),
            normalisation: Normalisation::AverageOfSquares,
            reference: None,
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext) -> Result<Outcome> {
        let unweighted = ctx
            .store
            .get_partial_set("UnweightedSQ", &self.source_sq)
            .ok_or_else(|| {
                EngineError::Setup(format!(
                    "{}: no UnweightedSQ data found under '{}'",
                    self.name, self.source_sq
                ))
            })?
            .clone();

        let mut weights = XRayWeights::new();
        for (species, population) in ctx.cfg.species_populations() {
            weights.add_species(species, *population);
        }
        weights.finalise()?;

        // Q-dependent weighting: iterate Q values rather than using a single
        // scalar weight per pair. Partials (full, bound, unbound) carry the
        // absolute form-factor weights; only the total is normalised.
        let mut weighted = unweighted.clone();
        let used = weights.atom_types();
        let mut total = Data1D::templated("Total", unweighted.partial(0, 0));
        for (i, j) in unweighted.atom_types().pairs() {
            let wi = used
                .index_of_name(&unweighted.atom_types().atom_type(i).name)
                .ok_or_else(|| EngineError::Internal(format!("{}: weighting is missing a type", self.name)))?;
            let wj = used
                .index_of_name(&unweighted.atom_types().atom_type(j).name)
                .ok_or_else(|| EngineError::Internal(format!("{}: weighting is missing a type", self.name)))?;

            for point in 0..weighted.partial(i, j).n_values() {
                let q = weighted.partial(i, j).x(point);
                let w = weights.weight(wi, wj, q);
                let norm = weights.normalisation_factor(self.normalisation, q);

                let full = weighted.partial(i, j).value(point) * w;
                weighted.partial_mut(i, j).set_value(point, full);
                let bound = weighted.bound_partial(i, j).value(point) * w;
                weighted.bound_partial_mut(i, j).set_value(point, bound);
                let unbound = weighted.unbound_partial(i, j).value(point) * w;
                weighted.unbound_partial_mut(i, j).set_value(point, unbound);

                let t = total.value(point) + full / norm;
                total.set_value(point, t);
            }
        }
        *weighted.total_mut() = total;
        *ctx.store.realise_int("Normalisation", &self.name)? = match self.normalisation {
            Normalisation::None => 0,
            Normalisation::SquareOfAverage => 1,
            Normalisation::AverageOfSquares => 2,
        };

        info!("{}: formed x-ray weighted F(Q)", self.name);

        if let Some(reference) = &self.reference {
            *ctx.store.realise_data1d("ReferenceData", &self.name)? = reference.clone();
        }
        *ctx.store.realise_xray_weights("FullWeights", &self.name)? = weights;
        *ctx.store.realise_partial_set("WeightedSQ", &self.name)? = weighted;
        Ok(Outcome::Success)
    }
}
