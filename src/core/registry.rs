use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::data1d::{Data1D, Data2D, Data3D};
use crate::math::histogram::{Histogram1D, Histogram2D, Histogram3D, SampledReal};
use crate::scattering::partials::PartialSet;
use crate::scattering::weights::{NeutronWeights, XRayWeights};

/// Typed payload held in the processing data store and persisted to the
/// restart archive. The serialised form carries the class tag so the archive
/// is schema-checked on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class", content = "value")]
pub enum GenericItem {
    Bool(bool),
    Int(i64),
    Real(f64),
    RealVec(Vec<f64>),
    Data1D(Data1D),
    Data2D(Data2D),
    Data3D(Data3D),
    Histogram1D(Histogram1D),
    Histogram2D(Histogram2D),
    Histogram3D(Histogram3D),
    PartialSet(PartialSet),
    NeutronWeights(NeutronWeights),
    XRayWeights(XRayWeights),
    SampledReal(SampledReal),
    Data1DVec(Vec<Data1D>),
}

impl GenericItem {
    pub fn class_name(&self) -> &'static str {
        match self {
            GenericItem::Bool(_) => "Bool",
            GenericItem::Int(_) => "Int",
            GenericItem::Real(_) => "Real",
            GenericItem::RealVec(_) => "RealVec",
            GenericItem::Data1D(_) => "Data1D",
            GenericItem::Data2D(_) => "Data2D",
            GenericItem::Data3D(_) => "Data3D",
            GenericItem::Histogram1D(_) => "Histogram1D",
            GenericItem::Histogram2D(_) => "Histogram2D",
            GenericItem::Histogram3D(_) => "Histogram3D",
            GenericItem::PartialSet(_) => "PartialSet",
            GenericItem::NeutronWeights(_) => "NeutronWeights",
            GenericItem::XRayWeights(_) => "XRayWeights",
            GenericItem::SampledReal(_) => "SampledReal",
            GenericItem::Data1DVec(_) => "Data1DVec",
        }
    }
}

/// Cross-module data store: a map from `prefix//name` to a typed payload.
/// Long-lived results (partials, weights, r-factor histories) live here under
/// stable identities, so modules can reference each other's output and the
/// whole store can be archived and restored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStore {
    items: BTreeMap<String, GenericItem>,
}

macro_rules! typed_accessors {
    ($realise:ident, $get:ident, $variant:ident, $type:ty, $default:expr) => {
        /// Fetch the named item, creating it with a default value if absent.
        /// A different stored class under the same key is an internal error.
        pub fn $realise(&mut self, name: &str, prefix: &str) -> Result<&mut $type> {
            let key = Self::key(name, prefix);
            let entry = self
                .items
                .entry(key.clone())
                .or_insert_with(|| GenericItem::$variant($default));
            match entry {
                GenericItem::$variant(value) => Ok(value),
                other => Err(EngineError::Internal(format!(
                    "item '{}' holds class {}, expected {}",
                    key,
                    other.class_name(),
                    stringify!($variant)
                ))),
            }
        }

        /// Fetch the named item if present and of the right class.
        pub fn $get(&self, name: &str, prefix: &str) -> Option<&$type> {
            match self.items.get(&Self::key(name, prefix)) {
                Some(GenericItem::$variant(value)) => Some(value),
                _ => None,
            }
        }
    };
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, prefix: &str) -> String {
        format!("{}//{}", prefix, name)
    }

    pub fn contains(&self, name: &str, prefix: &str) -> bool {
        self.items.contains_key(&Self::key(name, prefix))
    }

    pub fn insert(&mut self, name: &str, prefix: &str, item: GenericItem) {
        self.items.insert(Self::key(name, prefix), item);
    }

    pub fn remove(&mut self, name: &str, prefix: &str) -> Option<GenericItem> {
        self.items.remove(&Self::key(name, prefix))
    }

    pub fn items(&self) -> impl Iterator<Item = (&String, &GenericItem)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    typed_accessors!(realise_bool, get_bool, Bool, bool, false);
    typed_accessors!(realise_int, get_int, Int, i64, 0);
    typed_accessors!(realise_real, get_real, Real, f64, 0.0);
    typed_accessors!(realise_real_vec, get_real_vec, RealVec, Vec<f64>, Vec::new());
    typed_accessors!(realise_data1d, get_data1d, Data1D, Data1D, Data1D::default());
    typed_accessors!(realise_partial_set, get_partial_set, PartialSet, PartialSet, PartialSet::default());
    typed_accessors!(
        realise_neutron_weights,
        get_neutron_weights,
        NeutronWeights,
        NeutronWeights,
        NeutronWeights::default()
    );
    typed_accessors!(
        realise_xray_weights,
        get_xray_weights,
        XRayWeights,
        XRayWeights,
        XRayWeights::default()
    );
    typed_accessors!(realise_sampled, get_sampled, SampledReal, SampledReal, SampledReal::default());
    typed_accessors!(realise_data1d_vec, get_data1d_vec, Data1DVec, Vec<Data1D>, Vec::new());
}
