use nalgebra::{Point3, Vector3};

use crate::core::configuration::Configuration;
use crate::core::species::{SpeciesAngle, SpeciesBond, SpeciesTorsion};

/// Evaluates bond, angle, torsion and improper energies and their analytic
/// force partials for molecules of a configuration. Functional forms are
/// opaque callables supplied by the species connectivity.
pub struct GeometryKernel<'a> {
    cfg: &'a Configuration,
}

impl<'a> GeometryKernel<'a> {
    pub fn new(cfg: &'a Configuration) -> Self {
        Self { cfg }
    }

    fn r(&self, mol: usize, species_atom: usize) -> Point3<f64> {
        let i = self.cfg.molecule(mol).atoms[species_atom];
        self.cfg.atom(i).r
    }

    // --- Energies ---

    pub fn bond_energy(&self, mol: usize, bond: &SpeciesBond) -> f64 {
        let r = self
            .cfg
            .lattice()
            .minimum_distance(&self.r(mol, bond.i), &self.r(mol, bond.j));
        bond.form.energy(r)
    }

    pub fn angle_energy(&self, mol: usize, angle: &SpeciesAngle) -> f64 {
        let rj = self.r(mol, angle.j);
        let u = self.cfg.lattice().minimum_vector(&rj, &self.r(mol, angle.i));
        let v = self.cfg.lattice().minimum_vector(&rj, &self.r(mol, angle.k));
        angle.form.energy(angle_between(&u, &v))
    }

    pub fn torsion_energy(&self, mol: usize, torsion: &SpeciesTorsion) -> f64 {
        let (phi, ..) = self.torsion_parameters(mol, torsion);
        torsion.form.energy(phi)
    }

    /// Total geometry energy of the terms involving the specified atom of the
    /// molecule.
    pub fn atom_geometry_energy(&self, mol: usize, species_atom: usize) -> f64 {
        let species = &self.cfg.molecule(mol).species;
        let mut energy = 0.0;
        for bond in species.bonds() {
            if bond.i == species_atom || bond.j == species_atom {
                energy += self.bond_energy(mol, bond);
            }
        }
        for angle in species.angles() {
            if angle.i == species_atom || angle.j == species_atom || angle.k == species_atom {
                energy += self.angle_energy(mol, angle);
            }
        }
        for torsion in species.torsions().iter().chain(species.impropers()) {
            if [torsion.i, torsion.j, torsion.k, torsion.l].contains(&species_atom) {
                energy += self.torsion_energy(mol, torsion);
            }
        }
        energy
    }

    /// Total geometry energy of the molecule.
    pub fn molecule_geometry_energy(&self, mol: usize) -> f64 {
        let species = &self.cfg.molecule(mol).species;
        let mut energy = 0.0;
        for bond in species.bonds() {
            energy += self.bond_energy(mol, bond);
        }
        for angle in species.angles() {
            energy += self.angle_energy(mol, angle);
        }
        for torsion in species.torsions().iter().chain(species.impropers()) {
            energy += self.torsion_energy(mol, torsion);
        }
        energy
    }

    // --- Forces (into a global force vector, index = global atom index) ---

    pub fn bond_forces(&self, mol: usize, bond: &SpeciesBond, f: &mut [Vector3<f64>]) {
        let (gi, gj) = (self.cfg.molecule(mol).atoms[bond.i], self.cfg.molecule(mol).atoms[bond.j]);
        let vec_ij = self.cfg.lattice().minimum_vector(&self.cfg.atom(gi).r, &self.cfg.atom(gj).r);
        let r = vec_ij.norm();
        if r < 1.0e-10 {
            return;
        }
        // F_i = -dU/dr * d(r)/d(r_i); r decreases as i moves toward j
        let du_dr = bond.form.derivative(r);
        let direction = vec_ij / r;
        f[gi] += direction * du_dr;
        f[gj] -= direction * du_dr;
    }

    pub fn angle_forces(&self, mol: usize, angle: &SpeciesAngle, f: &mut [Vector3<f64>]) {
        let atoms = &self.cfg.molecule(mol).atoms;
        let (gi, gj, gk) = (atoms[angle.i], atoms[angle.j], atoms[angle.k]);
        let rj = self.cfg.atom(gj).r;
        let u = self.cfg.lattice().minimum_vector(&rj, &self.cfg.atom(gi).r);
        let v = self.cfg.lattice().minimum_vector(&rj, &self.cfg.atom(gk).r);
        let (lu, lv) = (u.norm(), v.norm());
        if lu < 1.0e-10 || lv < 1.0e-10 {
            return;
        }
        let (uh, vh) = (u / lu, v / lv);
        let cos_theta = uh.dot(&vh).clamp(-1.0, 1.0);
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt().max(1.0e-10);
        let du_dtheta = angle.form.derivative(cos_theta.acos());

        // dtheta/dri and dtheta/drk
        let dthet_dri = (uh * cos_theta - vh) / (lu * sin_theta);
        let dthet_drk = (vh * cos_theta - uh) / (lv * sin_theta);

        f[gi] -= dthet_dri * du_dtheta;
        f[gk] -= dthet_drk * du_dtheta;
        f[gj] += (dthet_dri + dthet_drk) * du_dtheta;
    }

    /// Dihedral angle and the bond vectors it was built from.
    #[allow(clippy::type_complexity)]
    fn torsion_parameters(
        &self,
        mol: usize,
        torsion: &SpeciesTorsion,
    ) -> (f64, Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let lattice = self.cfg.lattice();
        let ri = self.r(mol, torsion.i);
        let rj = self.r(mol, torsion.j);
        let rk = self.r(mol, torsion.k);
        let rl = self.r(mol, torsion.l);
        let b1 = lattice.minimum_vector(&ri, &rj);
        let b2 = lattice.minimum_vector(&rj, &rk);
        let b3 = lattice.minimum_vector(&rk, &rl);
        let n1 = b1.cross(&b2);
        let n2 = b2.cross(&b3);
        let phi = (n1.cross(&n2).dot(&b2) / b2.norm().max(1.0e-10)).atan2(n1.dot(&n2));
        (phi, b1, b2, b3)
    }

    pub fn torsion_forces(&self, mol: usize, torsion: &SpeciesTorsion, f: &mut [Vector3<f64>]) {
        let atoms = &self.cfg.molecule(mol).atoms;
        let (gi, gj, gk, gl) = (atoms[torsion.i], atoms[torsion.j], atoms[torsion.k], atoms[torsion.l]);
        let (phi, b1, b2, b3) = self.torsion_parameters(mol, torsion);
        let du_dphi = torsion.form.derivative(phi);

        let n1 = b1.cross(&b2);
        let n2 = b2.cross(&b3);
        let (n1_sq, n2_sq, lb2) = (n1.norm_squared(), n2.norm_squared(), b2.norm());
        if n1_sq < 1.0e-10 || n2_sq < 1.0e-10 || lb2 < 1.0e-10 {
            return;
        }

        // With phi = atan2((n1 x n2).b2hat, n1.n2): dphi/dri = -(|b2|/|n1|^2) n1
        // and dphi/drl = +(|b2|/|n2|^2) n2
        let fi = n1 * (du_dphi * lb2 / n1_sq);
        let fl = n2 * (-du_dphi * lb2 / n2_sq);
        let t = b1.dot(&b2) / b2.norm_squared();
        let s = b3.dot(&b2) / b2.norm_squared();
        let fj = fi * (t - 1.0) - fl * s;
        let fk = -(fi + fj + fl);

        f[gi] += fi;
        f[gj] += fj;
        f[gk] += fk;
        f[gl] += fl;
    }

    /// Accumulate all geometry forces for a molecule.
    pub fn molecule_geometry_forces(&self, mol: usize, f: &mut [Vector3<f64>]) {
        let species = self.cfg.molecule(mol).species.clone();
        for bond in species.bonds() {
            self.bond_forces(mol, bond, f);
        }
        for angle in species.angles() {
            self.angle_forces(mol, angle, f);
        }
        for torsion in species.torsions().iter().chain(species.impropers()) {
            self.torsion_forces(mol, torsion, f);
        }
    }
}

/// Angle between two vectors, in radians.
pub fn angle_between(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    (u.dot(v) / (u.norm() * v.norm())).clamp(-1.0, 1.0).acos()
}
