//! Precomputed containment grid per place
//!
//! A square grid of cells centered on the place, one cell of buffer beyond the
//! radius, each cell flagged inside/outside by its haversine distance to the
//! center. Cells sit on a regular equirectangular lattice, so the nearest cell
//! to any position is found per axis in O(1) instead of scanning.
//!
//! The side length is `ceil(2 * (radius + cell) / cell)` cells and the lattice
//! is symmetric about the center. For an even side no cell sits on the center
//! itself: the nearest cell is then a half-diagonal away.

use crate::domain::types::{Containment, Coordinate};
use crate::services::dead_reckoning::{haversine_distance, EARTH_RADIUS_M};

#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
    pub lat: f64,
    pub lng: f64,
    pub is_inside: bool,
    pub distance_from_center: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    center: Coordinate,
    radius_meters: f64,
    cell_size_meters: f64,
    /// Cells per side
    size: usize,
    /// Latitude of row 0 / longitude of col 0
    origin: Coordinate,
    lat_step_deg: f64,
    lng_step_deg: f64,
    /// Row-major, row 0 southmost, col 0 westmost
    cells: Vec<GridCell>,
}

impl Grid {
    pub fn generate(
        center_lat: f64,
        center_lng: f64,
        radius_meters: f64,
        cell_size_meters: f64,
    ) -> Self {
        let bounding = 2.0 * (radius_meters + cell_size_meters);
        let size = ((bounding / cell_size_meters).ceil() as usize).max(1);

        let lat_step_deg = (cell_size_meters / EARTH_RADIUS_M).to_degrees();
        // Clamp so a polar center does not divide by ~0
        let cos_lat = center_lat.to_radians().cos().max(1e-6);
        let lng_step_deg = (cell_size_meters / (EARTH_RADIUS_M * cos_lat)).to_degrees();

        let half = (size as f64 - 1.0) / 2.0;
        let origin =
            Coordinate::new(center_lat - half * lat_step_deg, center_lng - half * lng_step_deg);

        let mut cells = Vec::with_capacity(size * size);
        for row in 0..size {
            let lat = center_lat + (row as f64 - half) * lat_step_deg;
            for col in 0..size {
                let lng = center_lng + (col as f64 - half) * lng_step_deg;
                let distance_from_center = haversine_distance(lat, lng, center_lat, center_lng);
                cells.push(GridCell {
                    row,
                    col,
                    lat,
                    lng,
                    is_inside: distance_from_center <= radius_meters,
                    distance_from_center,
                });
            }
        }

        Self {
            center: Coordinate::new(center_lat, center_lng),
            radius_meters,
            cell_size_meters,
            size,
            origin,
            lat_step_deg,
            lng_step_deg,
            cells,
        }
    }

    /// Nearest cell to a position, or None when the position lies beyond the
    /// grid's extent (more than a cell half-diagonal from every cell).
    pub fn cell_for_position(&self, lat: f64, lng: f64) -> Option<&GridCell> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }

        // Planar squared distance is separable, so the nearest lattice point
        // is the per-axis nearest index clamped into range
        let row = Self::nearest_index((lat - self.origin.lat) / self.lat_step_deg, self.size);
        let col = Self::nearest_index((lng - self.origin.lng) / self.lng_step_deg, self.size);
        let cell = self.cell(row, col)?;

        let d_lat = lat - cell.lat;
        let d_lng = lng - cell.lng;
        let half_diag_sq = (self.lat_step_deg / 2.0).powi(2) + (self.lng_step_deg / 2.0).powi(2);
        if d_lat * d_lat + d_lng * d_lng > half_diag_sq {
            return None;
        }

        Some(cell)
    }

    /// Containment of a position; beyond the grid is Indeterminate, never Outside
    pub fn containment(&self, position: Coordinate) -> Containment {
        match self.cell_for_position(position.lat, position.lng) {
            Some(cell) if is_inside_radius(cell) => Containment::Inside,
            Some(_) => Containment::Outside,
            None => Containment::Indeterminate,
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&GridCell> {
        if row >= self.size || col >= self.size {
            return None;
        }
        self.cells.get(row * self.size + col)
    }

    pub fn rows(&self) -> usize {
        self.size
    }

    pub fn cols(&self) -> usize {
        self.size
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn center(&self) -> Coordinate {
        self.center
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    pub fn cell_size_meters(&self) -> f64 {
        self.cell_size_meters
    }

    fn nearest_index(fractional: f64, size: usize) -> usize {
        let max = (size - 1) as f64;
        fractional.round().clamp(0.0, max) as usize
    }
}

/// A cell's precomputed inside flag
#[inline]
pub fn is_inside_radius(cell: &GridCell) -> bool {
    cell.is_inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dead_reckoning::calculate_new_position;

    /// Reference nearest-cell lookup by scanning every cell
    fn scan_nearest(grid: &Grid, lat: f64, lng: f64) -> &GridCell {
        grid.cells()
            .iter()
            .min_by(|a, b| {
                let da = (a.lat - lat).powi(2) + (a.lng - lng).powi(2);
                let db = (b.lat - lat).powi(2) + (b.lng - lng).powi(2);
                da.total_cmp(&db)
            })
            .unwrap()
    }

    #[test]
    fn test_grid_is_square_with_buffer() {
        let grid = Grid::generate(0.0, 0.0, 50.0, 10.0);
        assert_eq!(grid.rows(), grid.cols());
        // 2 * (50 + 10) / 10
        assert_eq!(grid.rows(), 12);
        assert_eq!(grid.cells().len(), 144);
    }

    #[test]
    fn test_center_cell_inside() {
        let grid = Grid::generate(0.0, 0.0, 50.0, 10.0);
        let cell = grid.cell_for_position(0.0, 0.0).unwrap();
        assert!(is_inside_radius(cell));
        // Even side: the four central cells straddle the center
        let half_diagonal = grid.cell_size_meters() * std::f64::consts::FRAC_1_SQRT_2;
        assert!((cell.distance_from_center - half_diagonal).abs() < 0.01);
    }

    #[test]
    fn test_odd_side_has_cell_on_center() {
        // 2 * (45 + 10) / 10 = 11 cells per side
        let grid = Grid::generate(51.5, -0.12, 45.0, 10.0);
        assert_eq!(grid.rows(), 11);
        let cell = grid.cell_for_position(51.5, -0.12).unwrap();
        assert_eq!((cell.row, cell.col), (5, 5));
        assert!(cell.distance_from_center < 1e-6);
    }

    #[test]
    fn test_corner_cell_outside() {
        let grid = Grid::generate(0.0, 0.0, 50.0, 10.0);
        let last = grid.rows() - 1;
        for (row, col) in [(0, 0), (0, last), (last, 0), (last, last)] {
            let cell = grid.cell(row, col).unwrap();
            assert!(!cell.is_inside, "corner ({row},{col}) inside");
            assert!(cell.distance_from_center > 50.0);
        }
    }

    #[test]
    fn test_grid_is_symmetric() {
        let grid = Grid::generate(45.0, 7.0, 80.0, 10.0);
        let last = grid.rows() - 1;
        let sw = grid.cell(0, 0).unwrap();
        let ne = grid.cell(last, last).unwrap();
        assert!(((sw.lat + ne.lat) / 2.0 - 45.0).abs() < 1e-12);
        assert!(((sw.lng + ne.lng) / 2.0 - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = Grid::generate(51.5, -0.12, 75.0, 7.5);
        let b = Grid::generate(51.5, -0.12, 75.0, 7.5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_far_position_is_none() {
        let grid = Grid::generate(0.0, 0.0, 50.0, 10.0);
        assert!(grid.cell_for_position(1.0, 0.0).is_none());
        assert!(grid.cell_for_position(0.0, -1.0).is_none());
        assert_eq!(grid.containment(Coordinate::new(1.0, 0.0)), Containment::Indeterminate);
    }

    #[test]
    fn test_lookup_matches_scan() {
        let grid = Grid::generate(51.5, -0.12, 60.0, 10.0);
        let center = grid.center();
        for heading in [0.0, 45.0, 130.0, 200.0, 290.0] {
            for steps in [14_u64, 37, 52, 68] {
                let p = calculate_new_position(center, steps, heading, 1.0);
                let fast = grid.cell_for_position(p.lat, p.lng).unwrap();
                let slow = scan_nearest(&grid, p.lat, p.lng);
                assert_eq!((fast.row, fast.col), (slow.row, slow.col));
            }
        }
    }

    #[test]
    fn test_containment_inside_and_outside() {
        let grid = Grid::generate(51.5, -0.12, 50.0, 5.0);
        let center = grid.center();
        let near = calculate_new_position(center, 20, 90.0, 1.0);
        let beyond = calculate_new_position(center, 53, 0.0, 1.0);
        assert_eq!(grid.containment(near), Containment::Inside);
        assert_eq!(grid.containment(beyond), Containment::Outside);
    }
}
