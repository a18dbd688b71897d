use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Shape classification of the periodic cell, used when choosing export
/// conventions (e.g. the DL_POLY `imcon` value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxKind {
    NonPeriodic,
    Cubic,
    Orthorhombic,
    Triclinic,
}

/// Periodic boundary geometry: cell vectors, fractional mapping and
/// minimum-image convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lattice {
    kind: BoxKind,
    vectors: Matrix3<f64>, // Columns are a, b, c
    inverse: Matrix3<f64>, // Precomputed for fractional conversion
    volume: f64,
}

impl Lattice {
    pub fn from_vectors(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Result<Self> {
        let vectors = Matrix3::from_columns(&[a, b, c]);
        let inverse = vectors
            .try_inverse()
            .ok_or_else(|| EngineError::Setup("box vectors are singular".into()))?;
        let volume = vectors.determinant().abs();

        // Classify the cell shape
        let off_diagonal = vectors.m12.abs()
            + vectors.m13.abs()
            + vectors.m21.abs()
            + vectors.m23.abs()
            + vectors.m31.abs()
            + vectors.m32.abs();
        let kind = if off_diagonal > 1.0e-8 {
            BoxKind::Triclinic
        } else if (vectors.m11 - vectors.m22).abs() < 1.0e-8 && (vectors.m22 - vectors.m33).abs() < 1.0e-8 {
            BoxKind::Cubic
        } else {
            BoxKind::Orthorhombic
        };

        Ok(Self {
            kind,
            vectors,
            inverse,
            volume,
        })
    }

    pub fn cubic(a: f64) -> Self {
        Self::from_vectors(
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(0.0, a, 0.0),
            Vector3::new(0.0, 0.0, a),
        )
        .expect("cubic box with non-zero side is always invertible")
    }

    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        Self::from_vectors(
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(0.0, b, 0.0),
            Vector3::new(0.0, 0.0, c),
        )
        .expect("orthorhombic box with non-zero sides is always invertible")
    }

    /// Mark the lattice as a non-periodic bounding volume. Minimum image and
    /// folding become no-ops, but the cell partition still uses the vectors.
    pub fn set_non_periodic(&mut self) {
        self.kind = BoxKind::NonPeriodic;
    }

    pub fn kind(&self) -> BoxKind {
        self.kind
    }

    pub fn is_periodic(&self) -> bool {
        self.kind != BoxKind::NonPeriodic
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn axes(&self) -> &Matrix3<f64> {
        &self.vectors
    }

    pub fn axis_length(&self, n: usize) -> f64 {
        self.vectors.column(n).norm()
    }

    pub fn to_fractional(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse * p.coords)
    }

    pub fn to_cartesian(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.vectors * p.coords)
    }

    /// Fold the fractional image of `p` into [0,1) on each axis.
    pub fn fold_fractional(&self, p: &Point3<f64>) -> Point3<f64> {
        let mut f = self.to_fractional(p);
        f.coords.x = f.coords.x.rem_euclid(1.0);
        f.coords.y = f.coords.y.rem_euclid(1.0);
        f.coords.z = f.coords.z.rem_euclid(1.0);
        f
    }

    /// Fold `p` into the primary cell.
    pub fn fold(&self, p: &Point3<f64>) -> Point3<f64> {
        if !self.is_periodic() {
            return *p;
        }
        self.to_cartesian(&self.fold_fractional(p))
    }

    /// Minimum-image vector from `p1` to `p2`.
    pub fn minimum_vector(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> Vector3<f64> {
        let d_cart = p2 - p1;
        if !self.is_periodic() {
            return d_cart;
        }

        // Wrap fractional delta to [-0.5, 0.5] and convert back
        let mut d_frac = self.inverse * d_cart;
        d_frac.x -= d_frac.x.round();
        d_frac.y -= d_frac.y.round();
        d_frac.z -= d_frac.z.round();
        self.vectors * d_frac
    }

    pub fn minimum_distance_sq(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> f64 {
        self.minimum_vector(p1, p2).norm_squared()
    }

    pub fn minimum_distance(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> f64 {
        self.minimum_vector(p1, p2).norm()
    }

    /// Literal (non-imaged) distance.
    pub fn direct_distance(&self, p1: &Point3<f64>, p2: &Point3<f64>) -> f64 {
        (p2 - p1).norm()
    }

    /// Scale the cell vectors uniformly, preserving fractional coordinates of
    /// any content the caller re-maps.
    pub fn scale(&mut self, factor: f64) {
        self.vectors *= factor;
        self.inverse /= factor;
        self.volume = self.vectors.determinant().abs();
    }
}
