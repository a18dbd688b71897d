pub mod atomshake;
pub mod energy;
pub mod gr;
pub mod md;
pub mod molshake;
pub mod refine;
pub mod sq;

use crate::core::configuration::Configuration;
use crate::core::registry::DataStore;
use crate::error::{Outcome, Result};
use crate::parallel::pool::ProcessPool;
use crate::potentials::pair::PotentialMap;

/// Everything a processing module needs from the engine for one step.
pub struct ModuleContext<'a> {
    pub cfg: &'a mut Configuration,
    pub pool: &'a ProcessPool,
    pub store: &'a mut DataStore,
    pub iteration: u64,
    pub seed: u64,
}

impl ModuleContext<'_> {
    /// Deterministic per-module, per-iteration seed for random buffers, the
    /// same on every worker.
    pub fn module_seed(&self, module_name: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in module_name.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash ^ self.seed.wrapping_add(self.iteration.wrapping_mul(0x9e3779b97f4a7c15))
    }
}

/// A processing module instance in the simulation's run sequence.
pub enum Module {
    AtomShake(atomshake::AtomShakeModule),
    MolShake(molshake::MolShakeModule),
    Md(md::MdModule),
    Gr(gr::GrModule),
    Sq(sq::SqModule),
    NeutronSq(sq::NeutronSqModule),
    XRaySq(sq::XRaySqModule),
    Energy(energy::EnergyModule),
    Refine(refine::RefineModule),
}

impl Module {
    pub fn name(&self) -> &str {
        match self {
            Module::AtomShake(m) => &m.name,
            Module::MolShake(m) => &m.name,
            Module::Md(m) => &m.name,
            Module::Gr(m) => &m.name,
            Module::Sq(m) => &m.name,
            Module::NeutronSq(m) => &m.name,
            Module::XRaySq(m) => &m.name,
            Module::Energy(m) => &m.name,
            Module::Refine(m) => &m.name,
        }
    }

    /// Run frequency in iterations (0 = disabled).
    pub fn frequency(&self) -> u64 {
        match self {
            Module::AtomShake(m) => m.frequency,
            Module::MolShake(m) => m.frequency,
            Module::Md(m) => m.frequency,
            Module::Gr(m) => m.frequency,
            Module::Sq(m) => m.frequency,
            Module::NeutronSq(m) => m.frequency,
            Module::XRaySq(m) => m.frequency,
            Module::Energy(m) => m.frequency,
            Module::Refine(m) => m.frequency,
        }
    }

    pub fn should_run(&self, iteration: u64) -> bool {
        self.frequency() > 0 && iteration % self.frequency() == 0
    }

    pub fn run(&mut self, ctx: &mut ModuleContext, potentials: &mut PotentialMap) -> Result<Outcome> {
        match self {
            Module::AtomShake(m) => m.run(ctx, potentials),
            Module::MolShake(m) => m.run(ctx, potentials),
            Module::Md(m) => m.run(ctx, potentials),
            Module::Gr(m) => m.run(ctx),
            Module::Sq(m) => m.run(ctx),
            Module::NeutronSq(m) => m.run(ctx),
            Module::XRaySq(m) => m.run(ctx),
            Module::Energy(m) => m.run(ctx, potentials),
            Module::Refine(m) => m.run(ctx, potentials),
        }
    }
}
