use std::fs;
use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::core::configuration::Configuration;
use crate::core::lattice::Lattice;
use crate::error::{EngineError, Result};
use crate::math::data1d::Data1D;

/// Supported coordinate import formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateFormat {
    Xyz,
    DlPoly,
    EpsrAto,
    Moscito,
}

/// Imported coordinate set: element symbols with positions, plus the box if
/// the format carries one.
#[derive(Debug, Clone, Default)]
pub struct ImportedCoordinates {
    pub atoms: Vec<(String, Point3<f64>)>,
    pub lattice: Option<Lattice>,
}

impl ImportedCoordinates {
    /// Overwrite the configuration's atom positions in index order. The atom
    /// count must match exactly.
    pub fn apply(&self, cfg: &mut Configuration) -> Result<()> {
        if self.atoms.len() != cfg.n_atoms() {
            return Err(EngineError::Import(format!(
                "imported coordinate count ({}) does not match the configuration ({})",
                self.atoms.len(),
                cfg.n_atoms()
            )));
        }
        for (i, (_, r)) in self.atoms.iter().enumerate() {
            cfg.atom_mut(i).r = *r;
        }
        cfg.update_all_atom_locations();
        cfg.increment_contents_version();
        Ok(())
    }
}

pub fn import_coordinates(format: CoordinateFormat, path: &Path) -> Result<ImportedCoordinates> {
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::Import(format!("cannot read '{}': {}", path.display(), e)))?;
    match format {
        CoordinateFormat::Xyz => import_xyz(&text),
        CoordinateFormat::DlPoly => import_dl_poly(&text),
        CoordinateFormat::EpsrAto => import_epsr_ato(&text),
        CoordinateFormat::Moscito => import_moscito(&text),
    }
}

fn parse_f64(token: &str, context: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| EngineError::Import(format!("bad numeric field '{}' in {}", token, context)))
}

/// XYZ: atom count, title, then `symbol x y z` records.
fn import_xyz(text: &str) -> Result<ImportedCoordinates> {
    let mut lines = text.lines();
    let count: usize = lines
        .next()
        .ok_or_else(|| EngineError::Import("empty xyz file".into()))?
        .trim()
        .parse()
        .map_err(|_| EngineError::Import("bad atom count in xyz file".into()))?;
    let _title = lines.next();

    let mut atoms = Vec::with_capacity(count);
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 4 {
            return Err(EngineError::Import(format!("short xyz record '{}'", line)));
        }
        atoms.push((
            fields[0].to_string(),
            Point3::new(
                parse_f64(fields[1], "xyz record")?,
                parse_f64(fields[2], "xyz record")?,
                parse_f64(fields[3], "xyz record")?,
            ),
        ));
        if atoms.len() == count {
            break;
        }
    }
    if atoms.len() != count {
        return Err(EngineError::Import(format!(
            "xyz file declared {} atoms but contained {}",
            count,
            atoms.len()
        )));
    }
    Ok(ImportedCoordinates { atoms, lattice: None })
}

/// DL_POLY CONFIG: title, levcfg + imcon, cell vectors (if imcon > 0),
/// then per-atom records of 2 + levcfg lines.
fn import_dl_poly(text: &str) -> Result<ImportedCoordinates> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 {
        return Err(EngineError::Import("truncated CONFIG file".into()));
    }
    let control: Vec<&str> = lines[1].split_whitespace().collect();
    if control.len() < 2 {
        return Err(EngineError::Import("bad levcfg/imcon line in CONFIG file".into()));
    }
    let levcfg: usize = control[0]
        .parse()
        .map_err(|_| EngineError::Import("bad levcfg in CONFIG file".into()))?;
    let imcon: usize = control[1]
        .parse()
        .map_err(|_| EngineError::Import("bad imcon in CONFIG file".into()))?;

    let mut cursor = 2;
    let lattice = if imcon > 0 {
        let mut rows = [[0.0; 3]; 3];
        for row in &mut rows {
            let fields: Vec<&str> = lines
                .get(cursor)
                .ok_or_else(|| EngineError::Import("truncated cell vectors in CONFIG file".into()))?
                .split_whitespace()
                .collect();
            if fields.len() < 3 {
                return Err(EngineError::Import("short cell vector in CONFIG file".into()));
            }
            for (n, value) in row.iter_mut().enumerate() {
                *value = parse_f64(fields[n], "CONFIG cell vector")?;
            }
            cursor += 1;
        }
        Some(Lattice::from_vectors(
            Vector3::new(rows[0][0], rows[0][1], rows[0][2]),
            Vector3::new(rows[1][0], rows[1][1], rows[1][2]),
            Vector3::new(rows[2][0], rows[2][1], rows[2][2]),
        )?)
    } else {
        None
    };

    let mut atoms = Vec::new();
    while cursor < lines.len() {
        let header = lines[cursor].trim();
        if header.is_empty() {
            break;
        }
        let symbol = header
            .split_whitespace()
            .next()
            .ok_or_else(|| EngineError::Import("bad atom header in CONFIG file".into()))?
            .to_string();
        let position_line = lines
            .get(cursor + 1)
            .ok_or_else(|| EngineError::Import("CONFIG file ends mid-record".into()))?;
        let fields: Vec<&str> = position_line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(EngineError::Import("short position record in CONFIG file".into()));
        }
        atoms.push((
            symbol,
            Point3::new(
                parse_f64(fields[0], "CONFIG position")?,
                parse_f64(fields[1], "CONFIG position")?,
                parse_f64(fields[2], "CONFIG position")?,
            ),
        ));
        // Skip the velocity/force lines indicated by levcfg
        cursor += 2 + levcfg;
    }

    Ok(ImportedCoordinates { atoms, lattice })
}

/// EPSR ATO (subset): header with atom count and box length, molecule blocks
/// with absolute coordinates.
fn import_epsr_ato(text: &str) -> Result<ImportedCoordinates> {
    let mut lines = text.lines();
    let header: Vec<String> = lines
        .next()
        .ok_or_else(|| EngineError::Import("empty ato file".into()))?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if header.len() < 2 {
        return Err(EngineError::Import("bad ato header".into()));
    }
    let count: usize = header[0]
        .parse()
        .map_err(|_| EngineError::Import("bad atom count in ato header".into()))?;
    let box_length = parse_f64(&header[1], "ato header")?;

    let mut atoms = Vec::with_capacity(count);
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        // Records are `label x y z`, coordinates relative to the box centre
        if let (Ok(x), Ok(y), Ok(z)) = (fields[1].parse(), fields[2].parse(), fields[3].parse()) {
            atoms.push((fields[0].to_string(), Point3::new(x, y, z)));
            if atoms.len() == count {
                break;
            }
        }
    }
    if atoms.len() != count {
        return Err(EngineError::Import(format!(
            "ato file declared {} atoms but contained {}",
            count,
            atoms.len()
        )));
    }
    Ok(ImportedCoordinates {
        atoms,
        lattice: Some(Lattice::cubic(box_length)),
    })
}

/// Moscito structure (subset): `# <count>` header then `symbol x y z` records
/// in nanometres.
fn import_moscito(text: &str) -> Result<ImportedCoordinates> {
    let mut atoms = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(EngineError::Import(format!("short moscito record '{}'", line)));
        }
        atoms.push((
            fields[0].to_string(),
            // nm to Angstroms
            Point3::new(
                parse_f64(fields[1], "moscito record")? * 10.0,
                parse_f64(fields[2], "moscito record")? * 10.0,
                parse_f64(fields[3], "moscito record")? * 10.0,
            ),
        ));
    }
    Ok(ImportedCoordinates { atoms, lattice: None })
}

/// Reference dataset: whitespace-separated `x y [error]` rows, `#` comments.
pub fn import_reference_data(path: &Path, tag: &str) -> Result<Data1D> {
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::Import(format!("cannot read '{}': {}", path.display(), e)))?;
    let mut data = Data1D::new(tag);
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(EngineError::Import(format!("short data record '{}' in '{}'", line, path.display())));
        }
        let x = parse_f64(fields[0], "reference data")?;
        let y = parse_f64(fields[1], "reference data")?;
        if fields.len() > 2 {
            data.add_point_with_error(x, y, parse_f64(fields[2], "reference data")?);
        } else {
            data.add_point(x, y);
        }
    }
    if data.is_empty() {
        return Err(EngineError::Import(format!("no data points in '{}'", path.display())));
    }
    Ok(data)
}
