use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::lattice::Lattice;
use crate::error::{EngineError, Result};

/// Minimum number of cells along any box axis.
const MIN_CELLS_PER_SIDE: i32 = 3;
/// Tolerance used when snapping axis divisions to integers.
const DIVISION_TOLERANCE: f64 = 0.01;

/// A single cell in the partition: integer grid reference, real-space centre,
/// and the indices of the atoms currently inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    index: usize,
    grid: Vector3<i32>,
    centre: Point3<f64>,
    atoms: Vec<usize>,
}

impl Cell {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn grid(&self) -> Vector3<i32> {
        self.grid
    }

    pub fn centre(&self) -> Point3<f64> {
        self.centre
    }

    pub fn atoms(&self) -> &[usize] {
        &self.atoms
    }
}

/// Entry in a cell's neighbour vector. The self-cell is always first, with
/// `requires_mim == false`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellNeighbour {
    pub index: usize,
    pub requires_mim: bool,
}

/// Unique unordered cell pair, `master <= neighbour`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellNeighbourPair {
    pub master: usize,
    pub neighbour: usize,
    pub requires_mim: bool,
}

/// Partition of the box into near-cubic cells, with per-cell neighbour lists
/// covering the pair-potential range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellArray {
    divisions: Vector3<i32>,
    real_cell_size: Vector3<f64>,
    fractional_cell_size: Vector3<f64>,
    extents: Vector3<i32>,
    axes: Matrix3<f64>, // Cell axes: box axes scaled column-wise by the fractional cell size
    cells: Vec<Cell>,
    neighbours: Vec<Vec<CellNeighbour>>,
    neighbour_pairs: Vec<CellNeighbourPair>,
}

impl CellArray {
    /// Generate the partition for the supplied box.
    ///
    /// The shortest axis is shrink-fitted to an integer number of cells of the
    /// requested size; the remaining axes are snapped to as close to cubic as
    /// the tolerance allows, rounding down whenever rounding up would produce
    /// a cell shorter than the requested size.
    pub fn generate(lattice: &Lattice, cell_size: f64, pair_potential_range: f64) -> Result<Self> {
        if cell_size <= 0.0 {
            return Err(EngineError::Setup("requested cell size must be positive".into()));
        }

        let box_lengths = Vector3::new(lattice.axis_length(0), lattice.axis_length(1), lattice.axis_length(2));
        let trial: Vector3<i32> = box_lengths.map(|l| (l / cell_size) as i32);

        debug!(
            "Initial cell divisions for cell size {} are ({},{},{})",
            cell_size, trial.x, trial.y, trial.z
        );

        let mut divisions = Vector3::zeros();
        let mut real_cell_size = Vector3::zeros();

        // Fix the shortest axis first
        let min_el = (0..3).min_by(|&a, &b| box_lengths[a].total_cmp(&box_lengths[b])).unwrap();
        if trial.min() < MIN_CELLS_PER_SIDE {
            divisions[min_el] = MIN_CELLS_PER_SIDE;
        } else {
            divisions[min_el] = trial[min_el];
        }
        real_cell_size[min_el] = box_lengths[min_el] / f64::from(divisions[min_el]);

        // Snap the other two axes to the division whose cell length is as close
        // as possible to that of the shortest axis
        for n in 1..3 {
            let el = (min_el + n) % 3;
            let x = box_lengths[el] / real_cell_size[min_el];
            let remainder = x - x.floor();

            if remainder > (1.0 - DIVISION_TOLERANCE) {
                divisions[el] = x as i32 + 1;
            } else if remainder < DIVISION_TOLERANCE || remainder < 0.5 {
                divisions[el] = x as i32;
            } else {
                // Round up only if the resulting cell is still no shorter than requested
                divisions[el] = x as i32 + 1;
                if box_lengths[el] / f64::from(divisions[el]) < cell_size {
                    divisions[el] -= 1;
                }
            }
            divisions[el] = divisions[el].max(MIN_CELLS_PER_SIDE);
            real_cell_size[el] = box_lengths[el] / f64::from(divisions[el]);
        }

        let fractional_cell_size = Vector3::new(
            1.0 / f64::from(divisions.x),
            1.0 / f64::from(divisions.y),
            1.0 / f64::from(divisions.z),
        );

        debug!(
            "Final cell partitioning is ({},{},{}), {} cells in total",
            divisions.x,
            divisions.y,
            divisions.z,
            divisions.x * divisions.y * divisions.z
        );

        // Construct the cell array in row-major (x-outer) order
        let n_cells = (divisions.x * divisions.y * divisions.z) as usize;
        let mut cells = Vec::with_capacity(n_cells);
        let mut count = 0;
        for x in 0..divisions.x {
            for y in 0..divisions.y {
                for z in 0..divisions.z {
                    let frac_centre = Point3::new(
                        (f64::from(x) + 0.5) * fractional_cell_size.x,
                        (f64::from(y) + 0.5) * fractional_cell_size.y,
                        (f64::from(z) + 0.5) * fractional_cell_size.z,
                    );
                    cells.push(Cell {
                        index: count,
                        grid: Vector3::new(x, y, z),
                        centre: lattice.to_cartesian(&frac_centre),
                        atoms: Vec::new(),
                    });
                    count += 1;
                }
            }
        }

        // Cell axes matrix: box axes with columns scaled by the fractional size
        let mut axes = *lattice.axes();
        for (col, scale) in [fractional_cell_size.x, fractional_cell_size.y, fractional_cell_size.z]
            .iter()
            .enumerate()
        {
            let scaled = axes.column(col) * *scale;
            axes.set_column(col, &scaled);
        }

        let mut array = Self {
            divisions,
            real_cell_size,
            fractional_cell_size,
            extents: Vector3::zeros(),
            axes,
            cells,
            neighbours: Vec::new(),
            neighbour_pairs: Vec::new(),
        };

        array.create_neighbour_lists(pair_potential_range)?;

        Ok(array)
    }

    /// Establish the per-axis extents covering the pair-potential range, then
    /// build neighbour vectors and the unique pair list.
    fn create_neighbour_lists(&mut self, pair_potential_range: f64) -> Result<()> {
        // Maximal extent along each principal direction
        for n in 0..3 {
            loop {
                self.extents[n] += 1;
                let mut r = Vector3::zeros();
                r[n] = f64::from(self.extents[n]);
                if (self.axes * r)[n] >= pair_potential_range {
                    break;
                }
            }

            // Never require more cells than the box physically has: a cell must
            // not see itself through the periodic wrap
            if self.extents[n] * 2 + 1 > self.divisions[n] {
                self.extents[n] = self.divisions[n] / 2;
            }
        }
        debug!(
            "Cell extents required to cover the pair-potential range are ({},{},{})",
            self.extents.x, self.extents.y, self.extents.z
        );

        // Representative list of grid deltas whose cells can be within range of
        // a nominal central cell at (0,0,0)
        let mut neighbour_deltas: Vec<Vector3<i32>> = Vec::new();
        for x in -self.extents.x..=self.extents.x {
            for y in -self.extents.y..=self.extents.y {
                for z in -self.extents.z..=self.extents.z {
                    if x == 0 && y == 0 && z == 0 {
                        continue;
                    }
                    let delta = Vector3::new(x, y, z);
                    if self.corners_within_range(delta, pair_potential_range, true) {
                        // Duplicate wrapped images map to the same cell; keep one
                        let id = self.wrapped_index(x, y, z);
                        if neighbour_deltas.iter().all(|d| self.wrapped_index(d.x, d.y, d.z) != id) {
                            neighbour_deltas.push(delta);
                        }
                    }
                }
            }
        }
        debug!("Added {} cells to the representative neighbour list", neighbour_deltas.len());

        // Per-cell neighbour vectors (self first), with minimum-image flags
        self.neighbours = Vec::with_capacity(self.cells.len());
        for n in 0..self.cells.len() {
            let grid = self.cells[n].grid;
            let mut list = Vec::with_capacity(neighbour_deltas.len() + 1);
            list.push(CellNeighbour {
                index: n,
                requires_mim: false,
            });
            for delta in &neighbour_deltas {
                let nbr = self.wrapped_index(grid.x + delta.x, grid.y + delta.y, grid.z + delta.z);
                let requires_mim = self.minimum_image_required(n, nbr, pair_potential_range);
                if list.iter().all(|entry| entry.index != nbr) {
                    list.push(CellNeighbour {
                        index: nbr,
                        requires_mim,
                    });
                }
            }
            self.neighbours.push(list);
        }

        // Unique unordered pairs over the union of neighbour sets
        self.neighbour_pairs.clear();
        for cell in &self.cells {
            for nbr in &self.neighbours[cell.index] {
                if cell.index <= nbr.index {
                    self.neighbour_pairs.push(CellNeighbourPair {
                        master: cell.index,
                        neighbour: nbr.index,
                        requires_mim: nbr.requires_mim,
                    });
                }
            }
        }

        if self.neighbours.iter().any(|v| v.is_empty()) {
            return Err(EngineError::Internal("cell with empty neighbour vector".into()));
        }

        Ok(())
    }

    /// Check corner-corner distances between a nominal cell at zero and one at
    /// `delta`. With `imaged == false` the direct distance is checked; the
    /// minimum-image grid delta is always considered.
    fn corners_within_range(&self, delta: Vector3<i32>, range: f64, imaged: bool) -> bool {
        for i_corner in 0..8u32 {
            let i = Vector3::new(
                i32::from(i_corner & 1 != 0),
                i32::from(i_corner & 2 != 0),
                i32::from(i_corner & 4 != 0),
            );
            for j_corner in 0..8u32 {
                let j = Vector3::new(
                    delta.x + i32::from(j_corner & 1 != 0),
                    delta.y + i32::from(j_corner & 2 != 0),
                    delta.z + i32::from(j_corner & 4 != 0),
                );
                let mut d = j - i;
                if imaged {
                    d = self.mim_grid_delta_raw(d);
                }
                let r = self.axes * Vector3::new(f64::from(d.x), f64::from(d.y), f64::from(d.z));
                if r.norm() < range {
                    return true;
                }
            }
        }
        false
    }

    /// A pair requires minimum image treatment iff some corner pair is closer
    /// through a periodic image than directly.
    pub fn minimum_image_required(&self, a: usize, b: usize, range: f64) -> bool {
        let delta = self.cells[b].grid - self.cells[a].grid;
        for i_corner in 0..8u32 {
            let i = Vector3::new(
                i32::from(i_corner & 1 != 0),
                i32::from(i_corner & 2 != 0),
                i32::from(i_corner & 4 != 0),
            );
            for j_corner in 0..8u32 {
                let j = Vector3::new(
                    delta.x + i32::from(j_corner & 1 != 0),
                    delta.y + i32::from(j_corner & 2 != 0),
                    delta.z + i32::from(j_corner & 4 != 0),
                );
                let direct = j - i;
                let r = self.axes * Vector3::new(f64::from(direct.x), f64::from(direct.y), f64::from(direct.z));
                if r.norm() < range {
                    continue;
                }
                let imaged = self.mim_grid_delta_raw(direct);
                let r = self.axes * Vector3::new(f64::from(imaged.x), f64::from(imaged.y), f64::from(imaged.z));
                if r.norm() < range {
                    return true;
                }
            }
        }
        false
    }

    /// Whether any pair of atoms in the two cells can be within `distance`.
    ///
    /// The minimum-image grid delta is shortened by one on each non-zero
    /// component to account for atoms sitting at the near edges of the cells.
    pub fn within_range(&self, a: usize, b: usize, distance: f64) -> bool {
        let mut u = self.mim_grid_delta(a, b);
        u.x -= u.x.signum();
        u.y -= u.y.signum();
        u.z -= u.z.signum();
        let v = self.axes * Vector3::new(f64::from(u.x), f64::from(u.y), f64::from(u.z));
        v.norm() <= distance
    }

    /// Minimum-image grid delta from cell `a` to cell `b`.
    pub fn mim_grid_delta(&self, a: usize, b: usize) -> Vector3<i32> {
        self.mim_grid_delta_raw(self.cells[b].grid - self.cells[a].grid)
    }

    fn mim_grid_delta_raw(&self, mut delta: Vector3<i32>) -> Vector3<i32> {
        for n in 0..3 {
            if f64::from(delta[n]) > f64::from(self.divisions[n]) * 0.5 {
                delta[n] -= self.divisions[n];
            } else if f64::from(delta[n]) < -f64::from(self.divisions[n]) * 0.5 {
                delta[n] += self.divisions[n];
            }
        }
        delta
    }

    /// Linear index of the (wrapped) grid reference.
    pub fn wrapped_index(&self, x: i32, y: i32, z: i32) -> usize {
        let x = x.rem_euclid(self.divisions.x);
        let y = y.rem_euclid(self.divisions.y);
        let z = z.rem_euclid(self.divisions.z);
        (x * self.divisions.y * self.divisions.z + y * self.divisions.z + z) as usize
    }

    /// Index of the cell containing the supplied (unfolded) position.
    pub fn cell_index_of(&self, lattice: &Lattice, r: &Point3<f64>) -> usize {
        let frac = lattice.fold_fractional(r);
        let x = (frac.x / self.fractional_cell_size.x) as i32;
        let y = (frac.y / self.fractional_cell_size.y) as i32;
        let z = (frac.z / self.fractional_cell_size.z) as i32;
        self.wrapped_index(x, y, z)
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn divisions(&self) -> Vector3<i32> {
        self.divisions
    }

    pub fn real_cell_size(&self) -> Vector3<f64> {
        self.real_cell_size
    }

    pub fn extents(&self) -> Vector3<i32> {
        self.extents
    }

    pub fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    /// Neighbour vector for the specified cell, self first.
    pub fn neighbours(&self, index: usize) -> &[CellNeighbour] {
        &self.neighbours[index]
    }

    pub fn neighbour_pairs(&self) -> &[CellNeighbourPair] {
        &self.neighbour_pairs
    }

    /// Whether minimum image is needed between two cells already in each
    /// other's neighbour lists.
    pub fn requires_mim(&self, a: usize, b: usize) -> bool {
        self.neighbours[a]
            .iter()
            .find(|n| n.index == b)
            .map(|n| n.requires_mim)
            .unwrap_or(false)
    }

    pub fn clear_atoms(&mut self) {
        for cell in &mut self.cells {
            cell.atoms.clear();
        }
    }

    pub fn add_atom_to_cell(&mut self, atom: usize, cell: usize) {
        self.cells[cell].atoms.push(atom);
    }

    pub fn remove_atom_from_cell(&mut self, atom: usize, cell: usize) {
        if let Some(pos) = self.cells[cell].atoms.iter().position(|&a| a == atom) {
            self.cells[cell].atoms.swap_remove(pos);
        }
    }
}
