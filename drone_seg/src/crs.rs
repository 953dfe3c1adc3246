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

//! Coordinate system selection and reprojection.
//!
//! All distance and area computation runs in a projected UTM system chosen
//! from the search polygon centroid; WGS84 is only used at the input and
//! output boundary. Coordinates are always (x=lon, y=lat) ordered.

use geo::{Area, Centroid, Polygon};
use log::info;
use terrain_util::vector::{coord_transform, transform_polygon, transform_xy};

use crate::error::{PipelineError, Result};

pub const WGS84_EPSG: u32 = 4326;

pub const SQ_METERS_PER_ACRE: f64 = 4046.86;

/// UTM zone (1-60) containing a longitude
pub fn utm_zone(lon: f64) -> u32 {
    (((lon + 180.0) / 6.0).floor() as u32) + 1
}

/// EPSG code of the UTM zone for a WGS84 coordinate.
/// Northern hemisphere: 32600 + zone, southern: 32700 + zone.
pub fn utm_epsg(lon: f64, lat: f64) -> u32 {
    let zone = utm_zone(lon);
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

/// Picks the UTM CRS for a WGS84 polygon and projects the polygon into it.
pub fn project_polygon(polygon: &Polygon<f64>) -> Result<(u32, Polygon<f64>)> {
    let centroid = polygon
        .centroid()
        .ok_or_else(|| PipelineError::InvalidInput("search polygon is empty".to_string()))?;

    let epsg = utm_epsg(centroid.x(), centroid.y());
    info!(
        "Using UTM EPSG:{} for polygon centered at ({:.4}, {:.4})",
        epsg,
        centroid.x(),
        centroid.y()
    );

    let transform = coord_transform(WGS84_EPSG, epsg)?;
    let projected = transform_polygon(&transform, polygon)?;

    Ok((epsg, projected))
}

pub fn transform_point(x: f64, y: f64, from_epsg: u32, to_epsg: u32) -> Result<(f64, f64)> {
    if from_epsg == to_epsg {
        return Ok((x, y));
    }
    let transform = coord_transform(from_epsg, to_epsg)?;
    Ok(transform_xy(&transform, x, y)?)
}

/// Area of a polygon in acres. Geographic polygons are projected into the
/// UTM zone of their centroid first.
pub fn polygon_area_acres(polygon: &Polygon<f64>, epsg: u32) -> Result<f64> {
    let area_m2 = if epsg == WGS84_EPSG {
        let centroid = polygon
            .centroid()
            .ok_or_else(|| PipelineError::InvalidInput("polygon is empty".to_string()))?;
        let utm = utm_epsg(centroid.x(), centroid.y());
        let transform = coord_transform(WGS84_EPSG, utm)?;
        transform_polygon(&transform, polygon)?.unsigned_area()
    } else {
        polygon.unsigned_area()
    };

    Ok(area_m2 / SQ_METERS_PER_ACRE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_utm_zone() {
        // San Francisco
        assert_eq!(utm_zone(-122.4194), 10);
        // London
        assert_eq!(utm_zone(-0.1276), 30);
    }

    #[test]
    fn test_utm_epsg() {
        // San Francisco, northern hemisphere
        assert_eq!(utm_epsg(-122.4194, 37.7749), 32610);
        // Sydney, southern hemisphere
        assert_eq!(utm_epsg(151.2093, -33.8688), 32756);
    }

    #[test]
    fn test_point_round_trip() {
        let (x, y) = transform_point(-122.4194, 37.7749, WGS84_EPSG, 32610).unwrap();
        assert!(x != -122.4194 && y != 37.7749);

        let (lon, lat) = transform_point(x, y, 32610, WGS84_EPSG).unwrap();
        assert!((lon - -122.4194).abs() < 1e-4);
        assert!((lat - 37.7749).abs() < 1e-4);
    }

    #[test]
    fn test_project_polygon() {
        let poly = polygon![
            (x: -122.5, y: 37.7),
            (x: -122.3, y: 37.7),
            (x: -122.3, y: 37.8),
            (x: -122.5, y: 37.8),
        ];

        let (epsg, projected) = project_polygon(&poly).unwrap();
        assert_eq!(epsg, 32610);
        // ~17.6 km x 11.1 km
        let area = projected.unsigned_area();
        assert!(area > 1.5e8 && area < 2.5e8, "area was {}", area);
    }

    #[test]
    fn test_area_acres_km2_at_equator() {
        // One geodesic square kilometer at the equator: 1000m of longitude
        // is 1/111319.49 deg, 1000m of latitude is 1/110574.3 deg
        let lon_side = 0.008983152841;
        let lat_side = 0.009043694770;
        let poly = polygon![
            (x: 0.0, y: 0.0),
            (x: lon_side, y: 0.0),
            (x: lon_side, y: lat_side),
            (x: 0.0, y: lat_side),
        ];

        // UTM zone 31 distorts area by ~0.2% this far from its meridian
        let acres = polygon_area_acres(&poly, WGS84_EPSG).unwrap();
        assert!((acres - 247.1).abs() < 1.0, "acres was {}", acres);
    }

    #[test]
    fn test_area_acres_projected_passthrough() {
        // 1000 m x 1000 m in a projected CRS
        let poly = polygon![
            (x: 500_000.0, y: 4_000_000.0),
            (x: 501_000.0, y: 4_000_000.0),
            (x: 501_000.0, y: 4_001_000.0),
            (x: 500_000.0, y: 4_001_000.0),
        ];

        let acres = polygon_area_acres(&poly, 32610).unwrap();
        assert!((acres - 247.105).abs() < 0.01, "acres was {}", acres);
    }
}
