use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::core::configuration::Configuration;
use crate::core::lattice::BoxKind;
use crate::core::types::{element_mass, element_symbol};
use crate::error::{EngineError, Result};
use crate::math::data1d::{Data1D, Data2D, Data3D};
use crate::potentials::pair::PotentialMap;

fn io_error(path: &str, e: std::io::Error) -> EngineError {
    EngineError::Import(format!("cannot write '{}': {}", path, e))
}

/// Write configuration coordinates in XYZ format.
pub fn write_xyz(cfg: &Configuration, path: &str, title: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    write_xyz_frame(cfg, &mut file, title).map_err(|e| io_error(path, e))
}

/// Append one XYZ frame (trajectory style).
pub fn append_xyz(cfg: &Configuration, path: &str, title: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    write_xyz_frame(cfg, &mut file, title).map_err(|e| io_error(path, e))
}

fn write_xyz_frame(cfg: &Configuration, file: &mut File, title: &str) -> std::io::Result<()> {
    writeln!(file, "{}", cfg.n_atoms())?;
    writeln!(file, "{}", title)?;
    for atom in cfg.atoms() {
        writeln!(
            file,
            "{:<3}  {:15.9}  {:15.9}  {:15.9}",
            element_symbol(atom.z),
            atom.r.x,
            atom.r.y,
            atom.r.z
        )?;
    }
    Ok(())
}

/// DL_POLY periodic-boundary index for the box shape.
fn imcon(kind: BoxKind) -> usize {
    match kind {
        BoxKind::NonPeriodic => 0,
        BoxKind::Cubic => 1,
        BoxKind::Orthorhombic => 2,
        BoxKind::Triclinic => 3,
    }
}

/// Write configuration coordinates as a DL_POLY CONFIG file (levcfg 0).
pub fn write_dl_poly_config(cfg: &Configuration, path: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    let write = |file: &mut File| -> std::io::Result<()> {
        writeln!(file, "{}", cfg.name())?;
        writeln!(file, "{:10}{:10}{:20}", 0, imcon(cfg.lattice().kind()), cfg.n_atoms())?;
        if cfg.lattice().is_periodic() {
            let axes = cfg.lattice().axes();
            for row in 0..3 {
                writeln!(
                    file,
                    "{:20.12}{:20.12}{:20.12}",
                    axes[(row, 0)],
                    axes[(row, 1)],
                    axes[(row, 2)]
                )?;
            }
        }
        for (index, atom) in cfg.atoms().iter().enumerate() {
            writeln!(file, "{:<8}{:10}", element_symbol(atom.z), index + 1)?;
            writeln!(file, "{:20.12}{:20.12}{:20.12}", atom.r.x, atom.r.y, atom.r.z)?;
        }
        Ok(())
    };
    write(&mut file).map_err(|e| io_error(path, e))
}

/// Parameters for the DL_POLY CONTROL export.
pub struct DlPolyControl {
    pub temperature: f64,
    pub cutoff: f64,
    pub timestep: f64,
    pub variable_timestep: bool,
    pub n_steps: usize,
    pub trajectory_frequency: usize,
    pub force_cap: Option<f64>,
    pub print_frequency: usize,
}

/// Write a DL_POLY CONTROL file in key-value form.
pub fn write_dl_poly_control(cfg: &Configuration, control: &DlPolyControl, path: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    let write = |file: &mut File| -> std::io::Result<()> {
        writeln!(file, "title {}", cfg.name())?;
        writeln!(file, "io_file_config CONFIG")?;
        writeln!(file, "io_file_field FIELD")?;
        writeln!(file, "io_file_statis STATIS")?;
        writeln!(file, "io_file_revive REVIVE")?;
        writeln!(file, "io_file_revcon REVCON")?;
        writeln!(file, "temperature {} K", control.temperature)?;
        writeln!(file, "cutoff {} ang", control.cutoff)?;
        writeln!(file, "ensemble nvt")?;
        writeln!(file, "ensemble_method hoover")?;
        writeln!(file, "ensemble_thermostat_coupling 0.1 ps")?;
        writeln!(file, "timestep {} ps", control.timestep)?;
        if control.variable_timestep {
            writeln!(file, "timestep_variable ON")?;
        }
        writeln!(file, "time_run {} steps", control.n_steps)?;
        if control.trajectory_frequency > 0 {
            writeln!(file, "traj_calculate ON")?;
            writeln!(file, "traj_interval {} steps", control.trajectory_frequency)?;
            writeln!(file, "traj_key pos")?;
        }
        writeln!(file, "coul_method spme")?;
        writeln!(file, "coul_precision 1.0e-6")?;
        writeln!(file, "vdw_mix_method Lorentz-Berthelot")?;
        if let Some(cap) = control.force_cap {
            writeln!(file, "equilibration_force_cap {}", cap)?;
        }
        writeln!(file, "print_frequency {} steps", control.print_frequency)?;
        writeln!(file, "stats_frequency {} steps", control.print_frequency)?;
        Ok(())
    };
    write(&mut file).map_err(|e| io_error(path, e))
}

/// Write a DL_POLY FIELD file covering the configuration's species and the
/// short-range terms of the potential map.
pub fn write_dl_poly_field(cfg: &Configuration, potentials: &PotentialMap, path: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    let write = |file: &mut File| -> std::io::Result<()> {
        writeln!(file, "{}", cfg.name())?;
        writeln!(file, "units KJ")?;
        writeln!(file, "moleculer types {}", cfg.species_populations().len())?;

        for (species, population) in cfg.species_populations() {
            writeln!(file, "{}", species.name())?;
            writeln!(file, "nummols {}", population)?;
            writeln!(file, "atoms {}", species.n_atoms())?;
            for atom in species.atoms() {
                writeln!(
                    file,
                    "{:<8}{:12.5}{:12.5}    1    0",
                    atom.atom_type.name,
                    element_mass(atom.z),
                    atom.charge
                )?;
            }
            if !species.bonds().is_empty() {
                writeln!(file, "bonds {}", species.bonds().len())?;
                for bond in species.bonds() {
                    let (key, params) = bond.form.dl_poly();
                    write!(file, "{:<4}{:6}{:6}", key, bond.i + 1, bond.j + 1)?;
                    for p in params {
                        write!(file, "{:12.5}", p)?;
                    }
                    writeln!(file)?;
                }
            }
            if !species.angles().is_empty() {
                writeln!(file, "angles {}", species.angles().len())?;
                for angle in species.angles() {
                    let (key, params) = angle.form.dl_poly();
                    write!(file, "{:<4}{:6}{:6}{:6}", key, angle.i + 1, angle.j + 1, angle.k + 1)?;
                    for p in params {
                        write!(file, "{:12.5}", p)?;
                    }
                    writeln!(file)?;
                }
            }
            writeln!(file, "finish")?;
        }

        // Global short-range block
        let n = cfg.atom_types().n_types();
        writeln!(file, "vdw {}", n * (n + 1) / 2)?;
        for (i, j) in cfg.atom_types().pairs() {
            let potential = potentials.get(i, j);
            let (epsilon, sigma) = potential.lennard_jones();
            writeln!(
                file,
                "{:<8}{:<8}{:<4}{:12.5}{:12.5}",
                potential.type_i().name,
                potential.type_j().name,
                "LJ",
                epsilon,
                sigma
            )?;
        }
        writeln!(file, "close")?;
        Ok(())
    };
    write(&mut file).map_err(|e| io_error(path, e))
}

// --- Data on-disk format ---

/// Write Data1D: tag line, header `nX hasErrors`, x axis values, then values
/// (with errors when flagged).
pub fn write_data1d(data: &Data1D, path: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    let write = |file: &mut File| -> std::io::Result<()> {
        writeln!(file, "# {}", data.tag())?;
        writeln!(file, "{} {}", data.n_values(), u8::from(data.has_errors()))?;
        for i in 0..data.n_values() {
            writeln!(file, "{:16.9e}", data.x(i))?;
        }
        match data.errors() {
            Some(errors) => {
                for i in 0..data.n_values() {
                    writeln!(file, "{:16.9e} {:16.9e}", data.value(i), errors[i])?;
                }
            }
            None => {
                for i in 0..data.n_values() {
                    writeln!(file, "{:16.9e}", data.value(i))?;
                }
            }
        }
        Ok(())
    };
    write(&mut file).map_err(|e| io_error(path, e))
}

/// Read Data1D written by [`write_data1d`].
pub fn read_data1d(path: &Path) -> Result<Data1D> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Import(format!("cannot read '{}': {}", path.display(), e)))?;
    let mut lines = text.lines().peekable();

    let mut tag = String::new();
    if let Some(line) = lines.peek() {
        if let Some(stripped) = line.strip_prefix('#') {
            tag = stripped.trim().to_string();
            lines.next();
        }
    }

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| EngineError::Import("missing data header".into()))?
        .split_whitespace()
        .collect();
    if header.len() < 2 {
        return Err(EngineError::Import("bad data header".into()));
    }
    let n: usize = header[0]
        .parse()
        .map_err(|_| EngineError::Import("bad point count in data header".into()))?;
    let has_errors = header[1] == "1";

    let mut x = Vec::with_capacity(n);
    for _ in 0..n {
        let line = lines.next().ok_or_else(|| EngineError::Import("truncated x axis".into()))?;
        x.push(
            line.trim()
                .parse::<f64>()
                .map_err(|_| EngineError::Import(format!("bad x value '{}'", line)))?,
        );
    }

    let mut data = Data1D::new(&tag);
    for &xi in &x {
        let line = lines.next().ok_or_else(|| EngineError::Import("truncated values".into()))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let y = fields
            .first()
            .and_then(|f| f.parse::<f64>().ok())
            .ok_or_else(|| EngineError::Import(format!("bad value record '{}'", line)))?;
        if has_errors {
            let e = fields
                .get(1)
                .and_then(|f| f.parse::<f64>().ok())
                .ok_or_else(|| EngineError::Import(format!("missing error in record '{}'", line)))?;
            data.add_point_with_error(xi, y, e);
        } else {
            data.add_point(xi, y);
        }
    }
    Ok(data)
}

/// Write Data2D: tag, header `nX nY hasErrors`, axes, row-major values.
pub fn write_data2d(data: &Data2D, path: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    let write = |file: &mut File| -> std::io::Result<()> {
        writeln!(file, "# {}", data.tag)?;
        writeln!(file, "{} {} {}", data.x.len(), data.y.len(), u8::from(data.errors.is_some()))?;
        for x in &data.x {
            writeln!(file, "{:16.9e}", x)?;
        }
        for y in &data.y {
            writeln!(file, "{:16.9e}", y)?;
        }
        for value in &data.values {
            writeln!(file, "{:16.9e}", value)?;
        }
        if let Some(errors) = &data.errors {
            for error in errors {
                writeln!(file, "{:16.9e}", error)?;
            }
        }
        Ok(())
    };
    write(&mut file).map_err(|e| io_error(path, e))
}

/// Write Data3D: tag, header `nX nY nZ hasErrors`, axes, row-major values.
pub fn write_data3d(data: &Data3D, path: &str) -> Result<()> {
    let mut file = File::create(path).map_err(|e| io_error(path, e))?;
    let write = |file: &mut File| -> std::io::Result<()> {
        writeln!(file, "# {}", data.tag)?;
        writeln!(
            file,
            "{} {} {} {}",
            data.x.len(),
            data.y.len(),
            data.z.len(),
            u8::from(data.errors.is_some())
        )?;
        for axis in [&data.x, &data.y, &data.z] {
            for value in axis {
                writeln!(file, "{:16.9e}", value)?;
            }
        }
        for value in &data.values {
            writeln!(file, "{:16.9e}", value)?;
        }
        if let Some(errors) = &data.errors {
            for error in errors {
                writeln!(file, "{:16.9e}", error)?;
            }
        }
        Ok(())
    };
    write(&mut file).map_err(|e| io_error(path, e))
}
