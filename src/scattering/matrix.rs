use std::sync::Arc;

use nalgebra::DMatrix;
use tracing::debug;

use crate::core::types::AtomType;
use crate::error::{EngineError, Result};
use crate::math::data1d::Data1D;
use crate::scattering::weights::{NeutronWeights, Normalisation, XRayWeights};

/// Per-row weighting behaviour.
#[derive(Debug, Clone)]
enum RowWeighting {
    /// Row entries are fixed scalars (neutron or synthetic-partial rows).
    Fixed,
    /// Row entries must be multiplied by Q-dependent form-factor products
    /// divided by the recorded normalisation.
    XRay {
        weights: XRayWeights,
        normalisation: Normalisation,
    },
}

/// The linear system `A x = B` relating measured totals (rows) to the
/// unknown per-pair partials (columns). Columns are indexed by distinct
/// unordered type pairs, in the same order as `PartialSet`.
#[derive(Debug, Clone, Default)]
pub struct ScatteringMatrix {
    type_pairs: Vec<(Arc<AtomType>, Arc<AtomType>)>,
    /// Base coefficients; X-ray rows hold concentration pre-factors only.
    a: Vec<Vec<f64>>,
    row_weightings: Vec<RowWeighting>,
    data: Vec<Data1D>,
}

impl ScatteringMatrix {
    /// Fix the column index space from the configuration's type list.
    pub fn initialise(&mut self, types: &[Arc<AtomType>]) {
        self.type_pairs.clear();
        self.a.clear();
        self.row_weightings.clear();
        self.data.clear();
        for i in 0..types.len() {
            for j in i..types.len() {
                self.type_pairs.push((types[i].clone(), types[j].clone()));
            }
        }
    }

    pub fn n_pairs(&self) -> usize {
        self.type_pairs.len()
    }

    pub fn n_reference_data(&self) -> usize {
        self.data.len()
    }

    pub fn type_pairs(&self) -> &[(Arc<AtomType>, Arc<AtomType>)] {
        &self.type_pairs
    }

    /// Column index of the unordered pair; commutative.
    pub fn pair_index(&self, type_i: &Arc<AtomType>, type_j: &Arc<AtomType>) -> Option<usize> {
        self.type_pairs.iter().position(|(a, b)| {
            (Arc::ptr_eq(a, type_i) && Arc::ptr_eq(b, type_j)) || (Arc::ptr_eq(a, type_j) && Arc::ptr_eq(b, type_i))
        })
    }

    /// The matrix is solvable (possibly in the pseudoinverse sense) iff there
    /// are at least as many reference rows as pairs.
    pub fn under_determined(&self) -> bool {
        self.data.len() < self.type_pairs.len()
    }

    /// Append a neutron dataset row: scalar weights from the neutron
    /// weighting matrix, scaled by `factor` along with the data.
    pub fn add_neutron_reference(&mut self, mut data: Data1D, weights: &NeutronWeights, factor: f64) -> Result<()> {
        if !weights.is_valid() {
            return Err(EngineError::Setup(format!(
                "reference data '{}' does not have valid scattering weights",
                data.tag()
            )));
        }

        let mut row = vec![0.0; self.type_pairs.len()];
        let used = weights.atom_types();
        for i in 0..used.n_types() {
            for j in i..used.n_types() {
                let column = self
                    .pair_index(used.atom_type(i), used.atom_type(j))
                    .ok_or_else(|| unknown_pair(&used.atom_type(i).name, &used.atom_type(j).name))?;
                row[column] = weights.weight(i, j) * factor;
            }
        }

        data.scale(factor);
        self.a.push(row);
        self.row_weightings.push(RowWeighting::Fixed);
        self.data.push(data);
        Ok(())
    }

    /// Append an X-ray dataset row. Only the concentration pre-factors enter
    /// the base matrix; form-factor products are substituted per Q when the
    /// matrix is materialised.
    pub fn add_xray_reference(
        &mut self,
        mut data: Data1D,
        weights: &XRayWeights,
        normalisation: Normalisation,
        factor: f64,
    ) -> Result<()> {
        if !weights.is_valid() {
            return Err(EngineError::Setup(format!(
                "reference data '{}' does not have valid scattering weights",
                data.tag()
            )));
        }

        let mut row = vec![0.0; self.type_pairs.len()];
        let used = weights.atom_types();
        for i in 0..used.n_types() {
            for j in i..used.n_types() {
                let column = self
                    .pair_index(used.atom_type(i), used.atom_type(j))
                    .ok_or_else(|| unknown_pair(&used.atom_type(i).name, &used.atom_type(j).name))?;
                row[column] = weights.pre_factor(i, j) * factor;
            }
        }

        data.scale(factor);
        self.a.push(row);
        self.row_weightings.push(RowWeighting::XRay {
            weights: weights.clone(),
            normalisation,
        });
        self.data.push(data);
        Ok(())
    }

    /// Append a synthetic row weighting a single pair (used to augment the
    /// system with simulated partials).
    pub fn add_partial_reference(
        &mut self,
        mut data: Data1D,
        type_i: &Arc<AtomType>,
        type_j: &Arc<AtomType>,
        weight: f64,
        factor: f64,
    ) -> Result<()> {
        let column = self
            .pair_index(type_i, type_j)
            .ok_or_else(|| unknown_pair(&type_i.name, &type_j.name))?;
        let mut row = vec![0.0; self.type_pairs.len()];
        row[column] = weight * factor;

        data.scale(factor);
        self.a.push(row);
        self.row_weightings.push(RowWeighting::Fixed);
        self.data.push(data);
        Ok(())
    }

    /// Whether any row carries Q-dependent weights.
    pub fn q_dependent(&self) -> bool {
        self.row_weightings.iter().any(|w| matches!(w, RowWeighting::XRay { .. }))
    }

    /// Materialise the coefficient matrix at the given Q value.
    pub fn matrix(&self, q: f64) -> Result<DMatrix<f64>> {
        let n_rows = self.a.len();
        let n_cols = self.type_pairs.len();
        let mut m = DMatrix::zeros(n_rows, n_cols);
        for (row, coefficients) in self.a.iter().enumerate() {
            match &self.row_weightings[row] {
                RowWeighting::Fixed => {
                    for (col, &value) in coefficients.iter().enumerate() {
                        m[(row, col)] = value;
                    }
                }
                RowWeighting::XRay {
                    weights,
                    normalisation,
                } => {
                    let norm = weights.normalisation_factor(*normalisation, q);
                    if norm.abs() < 1.0e-12 {
                        return Err(EngineError::Computation(format!(
                            "x-ray normalisation factor vanished at Q = {}",
                            q
                        )));
                    }
                    for (col, &value) in coefficients.iter().enumerate() {
                        let (type_i, type_j) = &self.type_pairs[col];
                        let ffi = crate::scattering::weights::form_factor(type_i.z, q).ok_or_else(|| {
                            EngineError::Setup(format!("no form factor data for element Z={}", type_i.z))
                        })?;
                        let ffj = crate::scattering::weights::form_factor(type_j.z, q).ok_or_else(|| {
                            EngineError::Setup(format!("no form factor data for element Z={}", type_j.z))
                        })?;
                        m[(row, col)] = value * ffi * ffj / norm;
                    }
                }
            }
        }
        Ok(m)
    }

    /// SVD pseudoinverse of the matrix at the given Q value.
    pub fn inverse(&self, q: f64) -> Result<DMatrix<f64>> {
        let m = self.matrix(q)?;
        m.svd(true, true)
            .pseudo_inverse(1.0e-10)
            .map_err(|e| EngineError::Computation(format!("scattering matrix could not be pseudo-inverted: {}", e)))
    }

    /// Weight of a given pair in the inverse matrix for the dataset at
    /// `data_index`.
    pub fn pair_weight_inverse(
        &self,
        q: f64,
        type_i: &Arc<AtomType>,
        type_j: &Arc<AtomType>,
        data_index: usize,
    ) -> Result<f64> {
        let index = self
            .pair_index(type_i, type_j)
            .ok_or_else(|| unknown_pair(&type_i.name, &type_j.name))?;
        Ok(self.inverse(q)?[(index, data_index)])
    }

    /// Estimate per-pair partials by multiplying the pseudoinverse into the
    /// reference data, once if no row is Q-dependent and per Q-bin otherwise.
    /// The output slice holds one Data1D per pair, templated on the desired Q
    /// grid (the first dataset's axis is used when a partial is empty).
    pub fn generate_partials(&self, estimated: &mut [Data1D]) -> Result<()> {
        if self.under_determined() {
            return Err(EngineError::Computation(format!(
                "not enough reference data ({}) for {} pairs",
                self.data.len(),
                self.type_pairs.len()
            )));
        }
        if estimated.len() != self.type_pairs.len() {
            return Err(EngineError::Internal("estimated partial array has wrong pair count".into()));
        }

        // Template empty outputs on the first dataset
        for (pair, partial) in estimated.iter_mut().enumerate() {
            let tag = format!("{}-{}", self.type_pairs[pair].0.name, self.type_pairs[pair].1.name);
            if partial.is_empty() {
                *partial = Data1D::templated(&tag, &self.data[0]);
            } else {
                partial.zero();
                partial.set_tag(&tag);
            }
        }

        if self.q_dependent() {
            // Invert at every Q on the output grid
            let x_axis: Vec<f64> = estimated[0].x_axis().to_vec();
            for (point, &q) in x_axis.iter().enumerate() {
                let inverse = self.inverse(q)?;
                for pair in 0..self.type_pairs.len() {
                    let mut sum = 0.0;
                    for (data_index, data) in self.data.iter().enumerate() {
                        if q < data.x(0) || q > data.x(data.n_values() - 1) {
                            continue;
                        }
                        sum += data.interpolated(q) * inverse[(pair, data_index)];
                    }
                    estimated[pair].set_value(point, sum);
                }
            }
        } else {
            let inverse = self.inverse(0.0)?;
            debug!("Scattering matrix inverted once ({} rows)", self.data.len());
            for (pair, partial) in estimated.iter_mut().enumerate() {
                for (data_index, data) in self.data.iter().enumerate() {
                    partial.add_interpolated(data, inverse[(pair, data_index)]);
                }
            }
        }

        Ok(())
    }
}

fn unknown_pair(name_i: &str, name_j: &str) -> EngineError {
    EngineError::Internal(format!(
        "weights reference unknown atom types '{}' and/or '{}'",
        name_i, name_j
    ))
}
