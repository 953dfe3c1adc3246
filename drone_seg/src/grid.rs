/*
This file is part of the Drone Search Segmenter
Copyright (C) 2025 Drone Search Segmenter contributors

The Drone Search Segmenter is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

//! Candidate launch point generation: a regular grid over the projected
//! search polygon, with optional adaptive densification and boundary points.

use geo::{BoundingRect, Contains, Coord, EuclideanLength, LineInterpolatePoint, Point, Polygon};
use log::{info, warn};

pub const MAX_GRID_POINTS: usize = 10_000;

pub const MIN_SPACING_M: f64 = 25.0;

const ADAPTIVE_RETRY_THRESHOLD: usize = 10;

/// Evenly spaced points covering the polygon bounds, filtered to the
/// interior. When the requested spacing would produce more than
/// `max_points` raw samples, the spacing is inflated to fit.
pub fn generate_grid(
    polygon: &Polygon<f64>,
    grid_spacing_m: f64,
    max_points: usize,
) -> Vec<Coord<f64>> {
    let bounds = match polygon.bounding_rect() {
        Some(b) => b,
        None => return Vec::new(),
    };

    let x_range = bounds.max().x - bounds.min().x;
    let y_range = bounds.max().y - bounds.min().y;

    let mut spacing = grid_spacing_m;
    let mut nx = (x_range / spacing).ceil() as usize + 1;
    let mut ny = (y_range / spacing).ceil() as usize + 1;

    if nx * ny > max_points {
        let scale = ((nx * ny) as f64 / max_points as f64).sqrt();
        spacing *= scale;
        nx = (x_range / spacing).ceil() as usize + 1;
        ny = (y_range / spacing).ceil() as usize + 1;
        warn!(
            "Grid would exceed {} points, spacing adjusted to {:.1}m",
            max_points, spacing
        );
    }

    let xs = linspace(bounds.min().x, bounds.max().x, nx);
    let ys = linspace(bounds.min().y, bounds.max().y, ny);

    let mut points = Vec::new();
    for &y in &ys {
        for &x in &xs {
            let coord = Coord { x, y };
            if polygon.contains(&Point::from(coord)) {
                points.push(coord);
            }
        }
    }

    info!(
        "Generated {} grid points inside polygon at {:.1}m spacing",
        points.len(),
        spacing
    );

    points
}

/// Retries at `min_spacing_m` when the preferred spacing yields too few
/// candidates for a meaningful selection.
pub fn generate_adaptive_grid(
    polygon: &Polygon<f64>,
    preferred_spacing_m: f64,
    min_spacing_m: f64,
    max_points: usize,
) -> Vec<Coord<f64>> {
    let points = generate_grid(polygon, preferred_spacing_m, max_points);

    if points.len() < ADAPTIVE_RETRY_THRESHOLD && preferred_spacing_m > min_spacing_m {
        info!("Too few grid points, retrying at {:.1}m spacing", min_spacing_m);
        return generate_grid(polygon, min_spacing_m, max_points);
    }

    points
}

/// Adds interpolated points along the polygon boundary, dropping any that
/// land within half the boundary spacing of an existing point.
pub fn add_boundary_points(
    polygon: &Polygon<f64>,
    grid_points: Vec<Coord<f64>>,
    boundary_spacing_m: f64,
) -> Vec<Coord<f64>> {
    let boundary = polygon.exterior();
    let length = boundary.euclidean_length();

    let count = (length / boundary_spacing_m) as usize;
    if count == 0 {
        return grid_points;
    }

    let mut boundary_points = Vec::with_capacity(count);
    for i in 0..count {
        let fraction = i as f64 / count as f64;
        if let Some(point) = boundary.line_interpolate_point(fraction) {
            boundary_points.push(point.0);
        }
    }

    info!("Adding {} boundary points", boundary_points.len());

    let min_dist = boundary_spacing_m / 2.0;
    let mut unique = grid_points;
    for candidate in boundary_points {
        let too_close = unique.iter().any(|existing| {
            let dx = candidate.x - existing.x;
            let dy = candidate.y - existing.y;
            (dx * dx + dy * dy).sqrt() < min_dist
        });
        if !too_close {
            unique.push(candidate);
        }
    }

    unique
}

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![start];
    }
    let step = (end - start) / (count - 1) as f64;
    (0..count).map(|i| start + step * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square_1km() -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 1000.0, y: 0.0),
            (x: 1000.0, y: 1000.0),
            (x: 0.0, y: 1000.0),
        ]
    }

    #[test]
    fn test_generate_grid_point_count() {
        let points = generate_grid(&square_1km(), 100.0, MAX_GRID_POINTS);

        // ~ (1000/100)^2 interior points
        assert!(points.len() > 80 && points.len() < 120, "got {}", points.len());
    }

    #[test]
    fn test_all_points_strictly_inside() {
        let polygon = square_1km();
        let points = generate_grid(&polygon, 100.0, MAX_GRID_POINTS);

        for coord in &points {
            assert!(
                polygon.contains(&Point::from(*coord)),
                "point {:?} outside polygon",
                coord
            );
        }
    }

    #[test]
    fn test_max_points_cap() {
        let big: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 10_000.0, y: 0.0),
            (x: 10_000.0, y: 10_000.0),
            (x: 0.0, y: 10_000.0),
        ];

        // 10m spacing would be ~1M raw samples
        let points = generate_grid(&big, 10.0, 1000);
        assert!(points.len() <= 1000, "got {}", points.len());
        assert!(!points.is_empty());
    }

    #[test]
    fn test_adaptive_grid_retries_at_min_spacing() {
        // 100m square: 500m spacing gives < 10 points
        let small: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ];

        let coarse = generate_grid(&small, 500.0, MAX_GRID_POINTS);
        let adaptive = generate_adaptive_grid(&small, 500.0, 25.0, MAX_GRID_POINTS);

        assert!(adaptive.len() > coarse.len());
    }

    #[test]
    fn test_boundary_points_deduplicated() {
        let polygon = square_1km();
        let grid = generate_grid(&polygon, 100.0, MAX_GRID_POINTS);
        let base_count = grid.len();

        let with_boundary = add_boundary_points(&polygon, grid, 50.0);

        // 4000m perimeter at 50m spacing adds up to 80 points, minus dedups
        assert!(with_boundary.len() > base_count);
        assert!(with_boundary.len() <= base_count + 80);
    }

    #[test]
    fn test_linspace_endpoints() {
        let xs = linspace(0.0, 10.0, 3);
        assert_eq!(xs, vec![0.0, 5.0, 10.0]);

        assert_eq!(linspace(4.0, 9.0, 1), vec![4.0]);
    }
}
