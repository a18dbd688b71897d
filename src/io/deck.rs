use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nalgebra::Point3;
use serde::Deserialize;

use crate::core::configuration::{Configuration, ProcedureNode};
use crate::core::lattice::Lattice;
use crate::core::species::{Isotopologue, Species, SpeciesSite};
use crate::core::types::{element_from_symbol, AtomType};
use crate::error::{EngineError, Result};
use crate::io::import::{import_coordinates, import_reference_data, CoordinateFormat};
use crate::math::fit::ExpansionFunction;
use crate::math::ft::{Broadening, WindowFunction};
use crate::modules::atomshake::AtomShakeModule;
use crate::modules::energy::EnergyModule;
use crate::modules::gr::GrModule;
use crate::modules::md::{MdModule, TimestepKind};
use crate::modules::molshake::MolShakeModule;
use crate::modules::refine::{RefineModule, RefineTarget};
use crate::modules::sq::{IsotopologueSpec, NeutronSqModule, SqModule, XRaySqModule};
use crate::modules::Module;
use crate::potentials::forms::{AngleForm, BondForm, TorsionForm};
use crate::potentials::pair::PotentialMap;

/// Parsed TOML input deck.
#[derive(Debug, Deserialize)]
pub struct Deck {
    pub simulation: SimulationSpec,
    #[serde(default)]
    pub atom_types: Vec<AtomTypeSpec>,
    #[serde(default)]
    pub species: Vec<SpeciesSpec>,
    pub configuration: ConfigurationSpec,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Deserialize)]
pub struct SimulationSpec {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_pp_range")]
    pub pair_potential_range: f64,
    #[serde(default = "default_pp_delta")]
    pub pair_potential_delta: f64,
    #[serde(default = "default_max_groups")]
    pub max_process_groups: usize,
    /// Abort the run when any module fails this many times.
    #[serde(default = "default_failure_threshold")]
    pub module_failure_threshold: u64,
}

fn default_seed() -> u64 {
    1
}
fn default_workers() -> usize {
    1
}
fn default_iterations() -> u64 {
    5
}
fn default_pp_range() -> f64 {
    10.0
}
fn default_pp_delta() -> f64 {
    0.05
}
fn default_max_groups() -> usize {
    4
}
fn default_failure_threshold() -> u64 {
    3
}

#[derive(Debug, Deserialize)]
pub struct AtomTypeSpec {
    pub name: String,
    pub element: String,
    #[serde(default)]
    pub charge: f64,
    #[serde(default)]
    pub epsilon: f64,
    #[serde(default = "default_sigma")]
    pub sigma: f64,
}

fn default_sigma() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct SpeciesAtomSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    pub position: [f64; 3],
    pub charge: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BondSpec {
    pub i: usize,
    pub j: usize,
    pub form: BondForm,
}

#[derive(Debug, Deserialize)]
pub struct AngleSpec {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub form: AngleForm,
}

#[derive(Debug, Deserialize)]
pub struct TorsionSpec {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub l: usize,
    pub form: TorsionForm,
}

#[derive(Debug, Deserialize)]
pub struct SiteSpec {
    pub name: String,
    pub origin: Vec<usize>,
    #[serde(default)]
    pub x_axis: Vec<usize>,
    #[serde(default)]
    pub y_axis: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct IsotopologueDefSpec {
    pub name: String,
    pub scattering_lengths: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
pub struct SpeciesSpec {
    pub name: String,
    pub atoms: Vec<SpeciesAtomSpec>,
    #[serde(default)]
    pub bonds: Vec<BondSpec>,
    #[serde(default)]
    pub angles: Vec<AngleSpec>,
    #[serde(default)]
    pub torsions: Vec<TorsionSpec>,
    #[serde(default)]
    pub impropers: Vec<TorsionSpec>,
    #[serde(default)]
    pub sites: Vec<SiteSpec>,
    #[serde(default)]
    pub isotopologues: Vec<IsotopologueDefSpec>,
}

#[derive(Debug, Deserialize)]
pub struct PopulationSpec {
    pub species: String,
    pub count: usize,
    pub density: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct InputCoordinatesSpec {
    pub format: String,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ConfigurationSpec {
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Orthogonal box side lengths; omit to derive a cubic box from density.
    pub box_lengths: Option<[f64; 3]>,
    pub populations: Vec<PopulationSpec>,
    pub input_coordinates: Option<InputCoordinatesSpec>,
}

fn default_temperature() -> f64 {
    300.0
}

#[derive(Debug, Deserialize)]
pub struct RefineTargetSpec {
    pub module: String,
    pub source_sq: String,
}

#[derive(Debug, Deserialize)]
pub struct IsotopologueUseSpec {
    pub species: String,
    pub isotopologue: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// One module instance in the run sequence. Fields beyond `kind`/`name` are
/// interpreted per module kind; unused ones are rejected only by omission.
#[derive(Debug, Deserialize)]
pub struct ModuleSpec {
    pub kind: String,
    pub name: String,
    pub frequency: Option<u64>,
    pub cutoff: Option<f64>,

    // GR / SQ
    pub range: Option<f64>,
    pub bin_width: Option<f64>,
    pub source_gr: Option<String>,
    pub source_sq: Option<String>,
    pub q_min: Option<f64>,
    pub q_delta: Option<f64>,
    pub q_max: Option<f64>,
    pub window: Option<String>,
    pub q_broadening_fwhm: Option<f64>,
    pub bound_broadening_fwhm: Option<f64>,
    pub normalisation: Option<String>,
    pub reference_file: Option<PathBuf>,
    #[serde(default)]
    pub isotopologues: Vec<IsotopologueUseSpec>,
    #[serde(default)]
    pub exchangeable: Vec<String>,

    // MC
    pub n_shakes: Option<usize>,
    pub step_size: Option<f64>,
    pub step_size_min: Option<f64>,
    pub step_size_max: Option<f64>,
    pub translation_step: Option<f64>,
    pub rotation_step: Option<f64>,
    pub target_acceptance_rate: Option<f64>,
    #[serde(default)]
    pub restrict_to_species: Vec<String>,

    // MD
    pub n_steps: Option<usize>,
    pub timestep: Option<String>,
    pub fixed_timestep: Option<f64>,
    pub cap_forces_at: Option<f64>,
    pub random_velocities: Option<bool>,
    pub trajectory_frequency: Option<usize>,
    pub energy_frequency: Option<usize>,
    pub output_frequency: Option<usize>,

    // Energy
    pub stability_window: Option<usize>,
    pub stability_threshold: Option<f64>,

    // Refine
    #[serde(default)]
    pub targets: Vec<RefineTargetSpec>,
    pub feedback: Option<f64>,
    pub expansion_function: Option<String>,
    pub n_coeff_p: Option<usize>,
    pub p_sigma1: Option<f64>,
    pub p_sigma2: Option<f64>,
    pub weighting: Option<f64>,
    pub minimum_radius: Option<f64>,
    pub truncation_width: Option<f64>,
    pub fluctuation_smoothing: Option<usize>,
    pub modify_potential: Option<bool>,
    pub overwrite_potentials: Option<bool>,
    pub only_when_stable: Option<String>,
}

/// Everything assembled from a deck, per worker.
pub struct Assembled {
    pub cfg: Configuration,
    pub potentials: PotentialMap,
    pub modules: Vec<Module>,
}

impl Deck {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Import(format!("cannot read input deck '{}': {}", path.display(), e)))?;
        toml::from_str(&text).map_err(|e| EngineError::Import(format!("input deck parse error: {}", e)))
    }

    /// Build the configuration, potential map and module sequence. Run on
    /// every worker with identical inputs, producing identical state.
    pub fn assemble(&self) -> Result<Assembled> {
        // Atom types
        let mut types: HashMap<String, Arc<AtomType>> = HashMap::new();
        for spec in &self.atom_types {
            let z = element_from_symbol(&spec.element)
                .ok_or_else(|| EngineError::Setup(format!("unknown element '{}'", spec.element)))?;
            types.insert(
                spec.name.clone(),
                AtomType::new(&spec.name, z, spec.charge, spec.epsilon, spec.sigma),
            );
        }

        // Species
        let mut species_map: HashMap<String, Arc<Species>> = HashMap::new();
        for spec in &self.species {
            let mut species = Species::new(&spec.name);
            for atom in &spec.atoms {
                let atom_type = types
                    .get(&atom.type_name)
                    .ok_or_else(|| EngineError::Setup(format!("unknown atom type '{}'", atom.type_name)))?;
                species.add_atom(
                    atom_type.z,
                    atom_type.clone(),
                    Point3::new(atom.position[0], atom.position[1], atom.position[2]),
                    atom.charge.unwrap_or(atom_type.charge),
                );
            }
            for bond in &spec.bonds {
                species.add_bond(bond.i, bond.j, bond.form)?;
            }
            for angle in &spec.angles {
                species.add_angle(angle.i, angle.j, angle.k, angle.form)?;
            }
            for torsion in &spec.torsions {
                species.add_torsion(torsion.i, torsion.j, torsion.k, torsion.l, torsion.form)?;
            }
            for improper in &spec.impropers {
                species.add_improper(improper.i, improper.j, improper.k, improper.l, improper.form)?;
            }
            for site in &spec.sites {
                species.add_site(SpeciesSite {
                    name: site.name.clone(),
                    origin_atoms: site.origin.clone(),
                    x_axis_atoms: site.x_axis.clone(),
                    y_axis_atoms: site.y_axis.clone(),
                })?;
            }
            for iso in &spec.isotopologues {
                species.add_isotopologue(Isotopologue {
                    name: iso.name.clone(),
                    scattering_lengths: iso.scattering_lengths.clone(),
                });
            }
            species.finalise()?;
            species_map.insert(spec.name.clone(), Arc::new(species));
        }

        // Configuration generator programme
        let lattice = self
            .configuration
            .box_lengths
            .map(|[a, b, c]| Lattice::orthorhombic(a, b, c));
        let mut nodes = vec![ProcedureNode::SetTemperature(self.configuration.temperature)];
        for population in &self.configuration.populations {
            let species = species_map
                .get(&population.species)
                .ok_or_else(|| EngineError::Setup(format!("unknown species '{}'", population.species)))?;
            nodes.push(ProcedureNode::AddSpecies {
                species: species.clone(),
                population: population.count,
                density: population.density,
            });
        }

        let mut cfg = Configuration::generate(&self.configuration.name, lattice, &nodes, self.simulation.seed)?;

        if let Some(input) = &self.configuration.input_coordinates {
            let format = match input.format.to_lowercase().as_str() {
                "xyz" => CoordinateFormat::Xyz,
                "dlpoly" | "config" => CoordinateFormat::DlPoly,
                "ato" | "epsr" => CoordinateFormat::EpsrAto,
                "moscito" => CoordinateFormat::Moscito,
                other => return Err(EngineError::Import(format!("unknown coordinate format '{}'", other))),
            };
            let imported = import_coordinates(format, &input.path)?;
            cfg.update_cells(self.simulation.pair_potential_range)?;
            imported.apply(&mut cfg)?;
        } else {
            cfg.update_cells(self.simulation.pair_potential_range)?;
        }

        let potentials = PotentialMap::new(
            cfg.atom_types(),
            self.simulation.pair_potential_range,
            self.simulation.pair_potential_delta,
        )?;

        // Modules
        let mut modules = Vec::with_capacity(self.modules.len());
        for spec in &self.modules {
            modules.push(self.build_module(spec)?);
        }

        Ok(Assembled {
            cfg,
            potentials,
            modules,
        })
    }

    fn build_module(&self, spec: &ModuleSpec) -> Result<Module> {
        let window = |name: &Option<String>| -> Result<WindowFunction> {
            match name.as_deref() {
                None | Some("Lorch") => Ok(WindowFunction::Lorch),
                Some("Rectangular") | Some("None") => Ok(WindowFunction::Rectangular),
                Some(other) => Err(EngineError::Setup(format!("unknown window function '{}'", other))),
            }
        };
        let normalisation = |name: &Option<String>| -> Result<crate::scattering::weights::Normalisation> {
            use crate::scattering::weights::Normalisation;
            match name.as_deref() {
                None | Some("None") => Ok(Normalisation::None),
                Some("SquareOfAverage") => Ok(Normalisation::SquareOfAverage),
                Some("AverageOfSquares") => Ok(Normalisation::AverageOfSquares),
                Some(other) => Err(EngineError::Setup(format!("unknown normalisation '{}'", other))),
            }
        };

        let module = match spec.kind.as_str() {
            "AtomShake" => {
                let mut module = AtomShakeModule::new(&spec.name);
                module.cutoff = spec.cutoff;
                if let Some(v) = spec.n_shakes {
                    module.n_shakes_per_atom = v;
                }
                if let Some(v) = spec.step_size {
                    module.step_size = v;
                }
                if let Some(v) = spec.step_size_min {
                    module.step_size_min = v;
                }
                if let Some(v) = spec.step_size_max {
                    module.step_size_max = v;
                }
                if let Some(v) = spec.target_acceptance_rate {
                    module.target_acceptance_rate = v;
                }
                Module::AtomShake(module)
            }
            "MolShake" => {
                let mut module = MolShakeModule::new(&spec.name);
                module.cutoff = spec.cutoff;
                if let Some(v) = spec.n_shakes {
                    module.n_shakes_per_molecule = v;
                }
                if let Some(v) = spec.translation_step {
                    module.translation_step = v;
                }
                if let Some(v) = spec.rotation_step {
                    module.rotation_step = v;
                }
                if let Some(v) = spec.target_acceptance_rate {
                    module.target_acceptance_rate = v;
                }
                module.restrict_to_species = spec.restrict_to_species.clone();
                Module::MolShake(module)
            }
            "MD" => {
                let mut module = MdModule::new(&spec.name);
                module.cutoff = spec.cutoff;
                if let Some(v) = spec.n_steps {
                    module.n_steps = v;
                }
                module.timestep_kind = match spec.timestep.as_deref() {
                    None | Some("variable") => TimestepKind::Variable,
                    Some("fixed") => TimestepKind::Fixed,
                    Some(other) => return Err(EngineError::Setup(format!("unknown timestep type '{}'", other))),
                };
                if let Some(v) = spec.fixed_timestep {
                    module.fixed_timestep = v;
                }
                module.cap_forces_at = spec.cap_forces_at.or(module.cap_forces_at);
                if let Some(v) = spec.random_velocities {
                    module.random_velocities = v;
                }
                if let Some(v) = spec.trajectory_frequency {
                    module.trajectory_frequency = v;
                }
                if let Some(v) = spec.energy_frequency {
                    module.energy_frequency = v;
                }
                if let Some(v) = spec.output_frequency {
                    module.output_frequency = v;
                }
                module.only_when_stable = spec.only_when_stable.clone();
                module.restrict_to_species = spec.restrict_to_species.clone();
                Module::Md(module)
            }
            "GR" => {
                let mut module = GrModule::new(
                    &spec.name,
                    spec.range.unwrap_or(self.simulation.pair_potential_range),
                    spec.bin_width.unwrap_or(0.025),
                    self.simulation.pair_potential_range,
                );
                module.frequency = spec.frequency.unwrap_or(1);
                Module::Gr(module)
            }
            "SQ" => {
                let source = spec
                    .source_gr
                    .clone()
                    .ok_or_else(|| EngineError::Setup(format!("module '{}' needs source_gr", spec.name)))?;
                let mut module = SqModule::new(&spec.name, &source);
                if let Some(v) = spec.q_min {
                    module.q_min = v;
                }
                if let Some(v) = spec.q_delta {
                    module.q_delta = v;
                }
                if let Some(v) = spec.q_max {
                    module.q_max = v;
                }
                module.window = window(&spec.window)?;
                if let Some(fwhm) = spec.q_broadening_fwhm {
                    module.q_broadening = Broadening::Gaussian { fwhm };
                }
                if let Some(fwhm) = spec.bound_broadening_fwhm {
                    module.bound_broadening = Broadening::ScaledGaussian { fwhm };
                }
                Module::Sq(module)
            }
            "NeutronSQ" => {
                let source = spec
                    .source_sq
                    .clone()
                    .ok_or_else(|| EngineError::Setup(format!("module '{}' needs source_sq", spec.name)))?;
                let mut module = NeutronSqModule::new(&spec.name, &source);
                module.normalisation = normalisation(&spec.normalisation)?;
                module.exchangeable = spec.exchangeable.clone();
                module.isotopologues = spec
                    .isotopologues
                    .iter()
                    .map(|iso| IsotopologueSpec {
                        species: iso.species.clone(),
                        isotopologue: iso.isotopologue.clone(),
                        weight: iso.weight,
                    })
                    .collect();
                if let Some(file) = &spec.reference_file {
                    module.reference = Some(import_reference_data(file, &spec.name)?);
                }
                Module::NeutronSq(module)
            }
            "XRaySQ" => {
                let source = spec
                    .source_sq
                    .clone()
                    .ok_or_else(|| EngineError::Setup(format!("module '{}' needs source_sq", spec.name)))?;
                let mut module = XRaySqModule::new(&spec.name, &source);
                module.normalisation = normalisation(&spec.normalisation)?;
                if let Some(file) = &spec.reference_file {
                    module.reference = Some(import_reference_data(file, &spec.name)?);
                }
                Module::XRaySq(module)
            }
            "Energy" => {
                let mut module = EnergyModule::new(&spec.name);
                if let Some(v) = spec.stability_window {
                    module.stability_window = v;
                }
                if let Some(v) = spec.stability_threshold {
                    module.stability_threshold = v;
                }
                Module::Energy(module)
            }
            "Refine" => {
                let source = spec
                    .source_gr
                    .clone()
                    .ok_or_else(|| EngineError::Setup(format!("module '{}' needs source_gr", spec.name)))?;
                let mut module = RefineModule::new(&spec.name, &source);
                module.targets = spec
                    .targets
                    .iter()
                    .map(|t| RefineTarget {
                        module: t.module.clone(),
                        source_sq: t.source_sq.clone(),
                    })
                    .collect();
                if let Some(v) = spec.feedback {
                    module.feedback = v;
                }
                if let Some(v) = spec.q_min {
                    module.q_min = v;
                }
                if let Some(v) = spec.q_max {
                    module.q_max = v;
                }
                module.expansion_function = match spec.expansion_function.as_deref() {
                    None | Some("Gaussian") => ExpansionFunction::Gaussian,
                    Some("Poisson") => ExpansionFunction::Poisson,
                    Some(other) => {
                        return Err(EngineError::Setup(format!("unknown expansion function '{}'", other)))
                    }
                };
                module.n_coeff_p = spec.n_coeff_p;
                if let Some(v) = spec.p_sigma1 {
                    module.p_sigma1 = v;
                }
                if let Some(v) = spec.p_sigma2 {
                    module.p_sigma2 = v;
                }
                if let Some(v) = spec.weighting {
                    module.weighting = v;
                }
                module.minimum_radius = spec.minimum_radius;
                if let Some(v) = spec.truncation_width {
                    module.truncation_width = v;
                }
                module.fluctuation_smoothing = spec.fluctuation_smoothing;
                if let Some(v) = spec.modify_potential {
                    module.modify_potential = v;
                }
                if let Some(v) = spec.overwrite_potentials {
                    module.overwrite_potentials = v;
                }
                module.only_when_stable = spec.only_when_stable.clone();
                module.pp_delta = self.simulation.pair_potential_delta;
                Module::Refine(module)
            }
            other => return Err(EngineError::Setup(format!("unknown module kind '{}'", other))),
        };

        // Common settings
        let mut module = module;
        if let Some(frequency) = spec.frequency {
            match &mut module {
                Module::AtomShake(m) => m.frequency = frequency,
                Module::MolShake(m) => m.frequency = frequency,
                Module::Md(m) => m.frequency = frequency,
                Module::Gr(m) => m.frequency = frequency,
                Module::Sq(m) => m.frequency = frequency,
                Module::NeutronSq(m) => m.frequency = frequency,
                Module::XRaySq(m) => m.frequency = frequency,
                Module::Energy(m) => m.frequency = frequency,
                Module::Refine(m) => m.frequency = frequency,
            }
        }
        Ok(module)
    }
}
