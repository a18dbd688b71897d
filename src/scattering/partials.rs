use serde::{Deserialize, Serialize};

use crate::core::types::{n_pairs, pair_index, AtomTypeMix};
use crate::error::{EngineError, Result};
use crate::math::data1d::Data1D;
use crate::math::histogram::Histogram1D;
use crate::parallel::pool::{Communicator, ProcessPool};

/// Per-type-pair histograms and derived partials (g(r) or S(Q)), stored
/// upper-triangularly over an atom-type mix, plus the weighted total trace
/// and a fingerprint tying the data to a configuration state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialSet {
    mix: AtomTypeMix,
    range: f64,
    bin_width: f64,
    full_histograms: Vec<Histogram1D>,
    bound_histograms: Vec<Histogram1D>,
    unbound_histograms: Vec<Histogram1D>,
    partials: Vec<Data1D>,
    bound_partials: Vec<Data1D>,
    unbound_partials: Vec<Data1D>,
    empty_bound: Vec<bool>,
    total: Data1D,
    fingerprint: String,
}

impl PartialSet {
    /// Set up histogram and partial arrays over the given mix.
    pub fn new(mix: &AtomTypeMix, range: f64, bin_width: f64) -> Self {
        let n = mix.n_types();
        let count = n_pairs(n);

        let mut set = Self {
            mix: mix.clone(),
            range,
            bin_width,
            full_histograms: vec![Histogram1D::new(0.0, range, bin_width); count],
            bound_histograms: vec![Histogram1D::new(0.0, range, bin_width); count],
            unbound_histograms: vec![Histogram1D::new(0.0, range, bin_width); count],
            partials: Vec::with_capacity(count),
            bound_partials: Vec::with_capacity(count),
            unbound_partials: Vec::with_capacity(count),
            empty_bound: vec![false; count],
            total: Data1D::new("Total"),
            fingerprint: "NO_FINGERPRINT".to_string(),
        };

        for (i, j) in mix.pairs() {
            let pair_tag = format!("{}-{}", mix.atom_type(i).name, mix.atom_type(j).name);
            set.partials.push(Data1D::new(&format!("{}//Full", pair_tag)));
            set.bound_partials.push(Data1D::new(&format!("{}//Bound", pair_tag)));
            set.unbound_partials.push(Data1D::new(&format!("{}//Unbound", pair_tag)));
        }

        set
    }

    /// Create a set sharing the mix but with empty partial arrays only (used
    /// for S(Q), where histograms are never binned).
    pub fn partials_only(mix: &AtomTypeMix) -> Self {
        let mut set = Self::new(mix, 0.0, 1.0);
        set.full_histograms.clear();
        set.bound_histograms.clear();
        set.unbound_histograms.clear();
        set
    }

    fn index(&self, i: usize, j: usize) -> usize {
        pair_index(i, j, self.mix.n_types())
    }

    pub fn atom_types(&self) -> &AtomTypeMix {
        &self.mix
    }

    pub fn n_atom_types(&self) -> usize {
        self.mix.n_types()
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn set_fingerprint(&mut self, fingerprint: &str) {
        self.fingerprint = fingerprint.to_string();
    }

    pub fn full_histogram_mut(&mut self, i: usize, j: usize) -> &mut Histogram1D {
        let index = self.index(i, j);
        &mut self.full_histograms[index]
    }

    pub fn bound_histogram_mut(&mut self, i: usize, j: usize) -> &mut Histogram1D {
        let index = self.index(i, j);
        &mut self.bound_histograms[index]
    }

    pub fn unbound_histogram_mut(&mut self, i: usize, j: usize) -> &mut Histogram1D {
        let index = self.index(i, j);
        &mut self.unbound_histograms[index]
    }

    /// Bin a pair separation into the full histogram and the bound or unbound
    /// one as flagged.
    pub fn bin_distance(&mut self, i: usize, j: usize, r: f64, bound: bool) {
        let index = self.index(i, j);
        self.full_histograms[index].bin(r);
        if bound {
            self.bound_histograms[index].bin(r);
        } else {
            self.unbound_histograms[index].bin(r);
        }
    }

    pub fn partial(&self, i: usize, j: usize) -> &Data1D {
        &self.partials[self.index(i, j)]
    }

    pub fn partial_mut(&mut self, i: usize, j: usize) -> &mut Data1D {
        let index = self.index(i, j);
        &mut self.partials[index]
    }

    pub fn bound_partial(&self, i: usize, j: usize) -> &Data1D {
        &self.bound_partials[self.index(i, j)]
    }

    pub fn bound_partial_mut(&mut self, i: usize, j: usize) -> &mut Data1D {
        let index = self.index(i, j);
        &mut self.bound_partials[index]
    }

    pub fn unbound_partial(&self, i: usize, j: usize) -> &Data1D {
        &self.unbound_partials[self.index(i, j)]
    }

    pub fn unbound_partial_mut(&mut self, i: usize, j: usize) -> &mut Data1D {
        let index = self.index(i, j);
        &mut self.unbound_partials[index]
    }

    pub fn is_bound_partial_empty(&self, i: usize, j: usize) -> bool {
        self.empty_bound[self.index(i, j)]
    }

    pub fn total(&self) -> &Data1D {
        &self.total
    }

    pub fn total_mut(&mut self) -> &mut Data1D {
        &mut self.total
    }

    /// Zero all histogram bins and partials.
    pub fn reset(&mut self) {
        for histogram in self
            .full_histograms
            .iter_mut()
            .chain(&mut self.bound_histograms)
            .chain(&mut self.unbound_histograms)
        {
            histogram.zero_bins();
        }
        for partial in self
            .partials
            .iter_mut()
            .chain(&mut self.bound_partials)
            .chain(&mut self.unbound_partials)
        {
            partial.clear();
        }
        self.empty_bound.iter_mut().for_each(|e| *e = true);
        self.total.clear();
        self.fingerprint = "NO_FINGERPRINT".to_string();
    }

    /// Sum histogram bins across the pool.
    pub fn all_sum(&mut self, pool: &ProcessPool, comm: Communicator) -> Result<()> {
        for histogram in self
            .full_histograms
            .iter_mut()
            .chain(&mut self.bound_histograms)
            .chain(&mut self.unbound_histograms)
        {
            histogram.all_sum(pool, comm)?;
        }
        Ok(())
    }

    /// Convert the histograms to per-pair g(r):
    /// `g(r) = N(r) / (N_centres * shell_volume(r) * rho_surrounding)`,
    /// with a factor two for the self pair.
    pub fn form_partials(&mut self, box_volume: f64) {
        for (i, j) in self.mix.pairs() {
            let index = self.index(i, j);
            let multiplier = if i == j { 2.0 } else { 1.0 };
            let n_centres = self.mix.entry(i).population;
            let n_surrounding = self.mix.entry(j).population;

            self.partials[index] = calculate_rdf(
                self.partials[index].tag(),
                &self.full_histograms[index],
                box_volume,
                n_centres,
                n_surrounding,
                multiplier,
            );
            self.bound_partials[index] = calculate_rdf(
                self.bound_partials[index].tag(),
                &self.bound_histograms[index],
                box_volume,
                n_centres,
                n_surrounding,
                multiplier,
            );
            self.unbound_partials[index] = calculate_rdf(
                self.unbound_partials[index].tag(),
                &self.unbound_histograms[index],
                box_volume,
                n_centres,
                n_surrounding,
                multiplier,
            );

            // Catch pairs with no in-molecule connectivity at all
            self.empty_bound[index] = self.bound_histograms[index].n_binned() == 0;
        }
    }

    /// Sum the partials into the total trace, optionally applying
    /// concentration weights `c_i c_j (2 - delta_ij)`.
    pub fn form_total(&mut self, apply_concentration_weights: bool) {
        if self.mix.n_types() == 0 || self.partials.is_empty() {
            self.total.clear();
            return;
        }
        self.total = Data1D::templated("Total", &self.partials[0]);
        for (i, j) in self.mix.pairs() {
            let factor = if apply_concentration_weights {
                let ci = self.mix.entry(i).fraction;
                let cj = self.mix.entry(j).fraction;
                ci * cj * if i == j { 1.0 } else { 2.0 }
            } else {
                1.0
            };
            let index = self.index(i, j);
            for point in 0..self.total.n_values() {
                let value = self.total.value(point) + self.partials[index].value(point) * factor;
                self.total.set_value(point, value);
            }
        }
    }

    /// Weighted sum of the bound partials.
    pub fn bound_total(&self, apply_concentration_weights: bool) -> Data1D {
        self.summed_total(&self.bound_partials, apply_concentration_weights)
    }

    /// Weighted sum of the unbound partials.
    pub fn unbound_total(&self, apply_concentration_weights: bool) -> Data1D {
        self.summed_total(&self.unbound_partials, apply_concentration_weights)
    }

    fn summed_total(&self, source: &[Data1D], apply_concentration_weights: bool) -> Data1D {
        if source.is_empty() || source[0].is_empty() {
            return Data1D::new("Total");
        }
        let mut total = Data1D::templated("Total", &source[0]);
        for (i, j) in self.mix.pairs() {
            let factor = if apply_concentration_weights {
                let ci = self.mix.entry(i).fraction;
                let cj = self.mix.entry(j).fraction;
                ci * cj * if i == j { 1.0 } else { 2.0 }
            } else {
                1.0
            };
            let index = self.index(i, j);
            for point in 0..total.n_values() {
                let value = total.value(point) + source[index].value(point) * factor;
                total.set_value(point, value);
            }
        }
        total
    }

    /// Add `weight * other` into this set, interpolating each source partial
    /// onto our x axes. Types missing from this set are an error.
    pub fn add_partials(&mut self, other: &PartialSet, weight: f64) -> Result<()> {
        for (source_i, source_j) in other.mix.pairs() {
            let local_i = self
                .mix
                .index_of(other.mix.atom_type(source_i))
                .ok_or_else(|| missing_type(&other.mix.atom_type(source_i).name))?;
            let local_j = self
                .mix
                .index_of(other.mix.atom_type(source_j))
                .ok_or_else(|| missing_type(&other.mix.atom_type(source_j).name))?;

            let local = self.index(local_i, local_j);
            let source = other.index(source_i, source_j);
            self.partials[local].add_interpolated(&other.partials[source], weight);
            self.bound_partials[local].add_interpolated(&other.bound_partials[source], weight);
            self.unbound_partials[local].add_interpolated(&other.unbound_partials[source], weight);

            if !other.empty_bound[source] {
                self.empty_bound[local] = false;
            }
        }
        self.total.add_interpolated(&other.total, weight);
        Ok(())
    }
}

fn missing_type(name: &str) -> EngineError {
    EngineError::Internal(format!("atom type '{}' is not present in this partial set", name))
}

/// Normalise a pair histogram to g(r) against an ideal-gas shell population.
fn calculate_rdf(
    tag: &str,
    histogram: &Histogram1D,
    box_volume: f64,
    n_centres: f64,
    n_surrounding: f64,
    multiplier: f64,
) -> Data1D {
    let mut data = Data1D::new(tag);
    let delta = histogram.bin_width();
    let number_density = n_surrounding / box_volume;
    let mut lower = 0.0;
    for (bin, &count) in histogram.bins().iter().enumerate() {
        let shell_volume = (4.0 / 3.0) * std::f64::consts::PI * ((lower + delta).powi(3) - lower.powi(3));
        let ideal = n_centres * shell_volume * number_density;
        let r = (bin as f64 + 0.5) * delta;
        if ideal > 0.0 {
            data.add_point(r, count as f64 * multiplier / ideal);
        } else {
            data.add_point(r, 0.0);
        }
        lower += delta;
    }
    data
}
