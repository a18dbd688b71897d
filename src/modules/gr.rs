use tracing::info;

use crate::error::{Outcome, Result};
use crate::modules::ModuleContext;
use crate::parallel::pool::{Communicator, DivisionStrategy};
use crate::scattering::partials::PartialSet;

/// Bins atom-pair separations per type pair into bound/unbound histograms and
/// normalises them to partial g(r). The result is stored as `UnweightedGR`
/// under this module's name, fingerprinted against the configuration.
pub struct GrModule {
    pub name: String,
    pub frequency: u64,
    /// Maximum r (Angstroms).
    pub range: f64,
    pub bin_width: f64,
    /// Range over which the cell neighbour list is valid; separations are
    /// gathered cell-wise when it covers `range`, directly otherwise.
    pub cell_range: f64,
}

impl GrModule {
    pub fn new(name: &str, range: f64, bin_width: f64, cell_range: f64) -> Self {
        Self {
            name: name.to_string(),
            frequency: 1,
            range,
            bin_width,
            cell_range,
        }
    }

    pub fn run(&mut self, ctx: &mut ModuleContext) -> Result<Outcome> {
        let fingerprint = ctx.cfg.fingerprint();

        // Up-to-date data does not need recalculating
        if let Some(existing) = ctx.store.get_partial_set("UnweightedGR", &self.name) {
            if existing.fingerprint() == fingerprint {
                info!("{}: partials are up to date (fingerprint {})", self.name, fingerprint);
                return Ok(Outcome::Success);
            }
        }

        let mut partials = PartialSet::new(ctx.cfg.atom_types(), self.range, self.bin_width);

        // Gather separations, dividing the work across the whole pool
        if self.range <= self.cell_range {
            self.bin_by_cells(ctx, &mut partials);
        } else {
            self.bin_directly(ctx, &mut partials);
        }

        partials.all_sum(ctx.pool, Communicator::Pool)?;
        partials.form_partials(ctx.cfg.lattice().volume());
        partials.form_total(true);
        partials.set_fingerprint(&fingerprint);

        info!(
            "{}: formed {} partial(s) over {} type(s), range {} A",
            self.name,
            crate::core::types::n_pairs(ctx.cfg.atom_types().n_types()),
            ctx.cfg.atom_types().n_types(),
            self.range
        );

        *ctx.store.realise_partial_set("UnweightedGR", &self.name)? = partials;
        Ok(Outcome::Success)
    }

    /// Cell-wise enumeration: the neighbour list covers the requested range.
    fn bin_by_cells(&self, ctx: &ModuleContext, partials: &mut PartialSet) {
        let cfg = &*ctx.cfg;
        let strategy = DivisionStrategy::PoolProcesses;
        for (index, pair) in cfg.cells().neighbour_pairs().iter().enumerate() {
            if !ctx.pool.owns_item(strategy, index) {
                continue;
            }
            if pair.master == pair.neighbour {
                let atoms = cfg.cells().cell(pair.master).atoms();
                for (n, &i) in atoms.iter().enumerate() {
                    for &j in &atoms[n + 1..] {
                        let r = (cfg.atom(j).r - cfg.atom(i).r).norm();
                        self.bin_pair(cfg, partials, i, j, r);
                    }
                }
            } else {
                for &i in cfg.cells().cell(pair.master).atoms() {
                    for &j in cfg.cells().cell(pair.neighbour).atoms() {
                        let r = if pair.requires_mim {
                            cfg.lattice().minimum_distance(&cfg.atom(i).r, &cfg.atom(j).r)
                        } else {
                            (cfg.atom(j).r - cfg.atom(i).r).norm()
                        };
                        self.bin_pair(cfg, partials, i, j, r);
                    }
                }
            }
        }
    }

    /// Direct double loop, for ranges beyond the neighbour list coverage.
    fn bin_directly(&self, ctx: &ModuleContext, partials: &mut PartialSet) {
        let cfg = &*ctx.cfg;
        let strategy = DivisionStrategy::PoolProcesses;
        for i in 0..cfg.n_atoms() {
            if !ctx.pool.owns_item(strategy, i) {
                continue;
            }
            for j in (i + 1)..cfg.n_atoms() {
                let r = cfg.lattice().minimum_distance(&cfg.atom(i).r, &cfg.atom(j).r);
                self.bin_pair(cfg, partials, i, j, r);
            }
        }
    }

    fn bin_pair(
        &self,
        cfg: &crate::core::configuration::Configuration,
        partials: &mut PartialSet,
        i: usize,
        j: usize,
        r: f64,
    ) {
        let ai = cfg.atom(i);
        let aj = cfg.atom(j);
        // Bound pairs are connected through the species terms; intramolecular
        // pairs with no connectivity path are unbound like any other
        let bound = ai.molecule == aj.molecule
            && cfg
                .molecule(ai.molecule)
                .species
                .atoms_connected(ai.species_atom_index, aj.species_atom_index);
        partials.bin_distance(ai.local_type_index, aj.local_type_index, r, bound);
    }
}
