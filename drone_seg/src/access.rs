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

//! Classifies candidate launch points against buffered road/trail networks.
//!
//! Candidates that satisfy the selected access policy are *primary* and are
//! preferred during segment selection; the rest are *secondary* and only
//! used to close coverage gaps.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use geo::{Contains, Coord, Geometry, LineString, MultiPolygon, Point, Polygon};
use geos::Geom;
use log::{error, info};
use serde::{Deserialize, Serialize};
use terrain_util::convert::{collect_polygons, geo_to_geos, geos_to_geo, polygon_to_geos};
use terrain_util::raster::srs_from_epsg;
use terrain_util::vector::read_line_layer;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Road,
    Trail,
    RoadAndTrail,
    OffRoad,
    Anywhere,
    None,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessType::Road => "road",
            AccessType::Trail => "trail",
            AccessType::RoadAndTrail => "road_and_trail",
            AccessType::OffRoad => "off_road",
            AccessType::Anywhere => "anywhere",
            AccessType::None => "none",
        };
        write!(f, "{}", s)
    }
}

pub struct AccessFilter {
    road_buffer: Option<MultiPolygon<f64>>,
    trail_buffer: Option<MultiPolygon<f64>>,
}

impl AccessFilter {
    /// Loads the road/trail layers relevant to the chosen access types and
    /// builds one unified buffer per layer. A layer that fails to load is
    /// treated as absent.
    pub fn load(
        roads_path: Option<&Path>,
        trails_path: Option<&Path>,
        target_epsg: u32,
        access_types: &HashSet<AccessType>,
        access_deviation_m: f64,
    ) -> Result<AccessFilter> {
        if access_types.contains(&AccessType::Anywhere) {
            return Ok(AccessFilter {
                road_buffer: None,
                trail_buffer: None,
            });
        }

        // Off-road classification needs both networks to measure "outside"
        let off_road = access_types.contains(&AccessType::OffRoad);
        let want_roads = off_road || access_types.contains(&AccessType::Road);
        let want_trails = off_road || access_types.contains(&AccessType::Trail);

        let road_buffer = if want_roads {
            Self::load_buffer(roads_path, target_epsg, access_deviation_m, "roads")?
        } else {
            None
        };

        let trail_buffer = if want_trails {
            Self::load_buffer(trails_path, target_epsg, access_deviation_m, "trails")?
        } else {
            None
        };

        Ok(AccessFilter {
            road_buffer,
            trail_buffer,
        })
    }

    fn load_buffer(
        path: Option<&Path>,
        target_epsg: u32,
        buffer_m: f64,
        label: &str,
    ) -> Result<Option<MultiPolygon<f64>>> {
        let path = match path {
            Some(p) => p,
            None => return Ok(None),
        };

        let target_srs = srs_from_epsg(target_epsg)?;
        let lines = match read_line_layer(path, &target_srs) {
            Ok(lines) => lines,
            Err(e) => {
                error!("Error loading {} from {:?}: {}", label, path, e);
                return Ok(None);
            }
        };

        if lines.is_empty() {
            return Ok(None);
        }

        let buffer = buffer_lines(&lines, buffer_m)?;
        info!(
            "Buffered {} {} features at {}m into {} polygon(s)",
            lines.len(),
            label,
            buffer_m,
            buffer.0.len()
        );

        Ok(Some(buffer))
    }

    /// Splits candidates into (primary with label, secondary) per the access
    /// policy. The precedence rules:
    ///
    /// - `anywhere`: everything is primary
    /// - road + trail requested: primary iff inside both buffers; when only
    ///   one layer exists, inside it is enough
    /// - single type requested: primary iff inside (road/trail) or outside
    ///   both (off_road)
    pub fn classify(
        &self,
        points: &[Coord<f64>],
        access_types: &HashSet<AccessType>,
    ) -> (Vec<(usize, AccessType)>, Vec<usize>) {
        if access_types.contains(&AccessType::Anywhere) {
            info!("Access type 'anywhere' selected - all points accessible");
            let primary = (0..points.len()).map(|i| (i, AccessType::Anywhere)).collect();
            return (primary, Vec::new());
        }

        let mut primary = Vec::new();
        let mut secondary = Vec::new();

        for (idx, coord) in points.iter().enumerate() {
            match self.classify_point(*coord, access_types) {
                Some(label) => primary.push((idx, label)),
                None => secondary.push(idx),
            }
        }

        info!(
            "Access classification: {} primary, {} secondary points",
            primary.len(),
            secondary.len()
        );

        (primary, secondary)
    }

    fn classify_point(
        &self,
        coord: Coord<f64>,
        access_types: &HashSet<AccessType>,
    ) -> Option<AccessType> {
        let point = Point::from(coord);
        let in_road = self
            .road_buffer
            .as_ref()
            .map_or(false, |b| b.contains(&point));
        let in_trail = self
            .trail_buffer
            .as_ref()
            .map_or(false, |b| b.contains(&point));

        let road_requested = access_types.contains(&AccessType::Road);
        let trail_requested = access_types.contains(&AccessType::Trail);

        if road_requested && trail_requested {
            if in_road && in_trail {
                return Some(AccessType::RoadAndTrail);
            }
            if in_road && self.trail_buffer.is_none() {
                return Some(AccessType::Road);
            }
            if in_trail && self.road_buffer.is_none() {
                return Some(AccessType::Trail);
            }
            return None;
        }

        if road_requested {
            return in_road.then_some(AccessType::Road);
        }

        if trail_requested {
            return in_trail.then_some(AccessType::Trail);
        }

        if access_types.contains(&AccessType::OffRoad) && !in_road && !in_trail {
            return Some(AccessType::OffRoad);
        }

        None
    }

    /// Percentage of the search polygon reachable under the access policy.
    pub fn accessible_area_pct(
        &self,
        polygon: &Polygon<f64>,
        access_types: &HashSet<AccessType>,
    ) -> Result<f64> {
        if access_types.contains(&AccessType::Anywhere) {
            return Ok(100.0);
        }

        let buffers: Vec<&MultiPolygon<f64>> = [&self.road_buffer, &self.trail_buffer]
            .into_iter()
            .flatten()
            .collect();

        if buffers.is_empty() {
            return Ok(0.0);
        }

        let polygon_geos = polygon_to_geos(polygon)?;
        let total_area = polygon_geos.area()?;
        if total_area <= 0.0 {
            return Ok(0.0);
        }

        let mut unioned = geo_to_geos(&Geometry::MultiPolygon(buffers[0].clone()))?;
        for buffer in &buffers[1..] {
            let g = geo_to_geos(&Geometry::MultiPolygon((*buffer).clone()))?;
            unioned = unioned.union(&g)?;
        }

        let accessible = polygon_geos.intersection(&unioned)?;
        Ok(accessible.area()? / total_area * 100.0)
    }
}

/// One unified buffer around a set of line features
fn buffer_lines(lines: &[LineString<f64>], buffer_m: f64) -> Result<MultiPolygon<f64>> {
    let mut buffered = Vec::with_capacity(lines.len());
    for line in lines {
        let g = geo_to_geos(&Geometry::LineString(line.clone()))?;
        buffered.push(g.buffer(buffer_m, 8)?);
    }

    let collection = geos::Geometry::create_geometry_collection(buffered)?;
    let unioned = collection.unary_union()?;

    let mut polygons = Vec::new();
    collect_polygons(geos_to_geo(&unioned)?, &mut polygons);
    Ok(MultiPolygon(polygons))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
        ]])
    }

    fn types(list: &[AccessType]) -> HashSet<AccessType> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_anywhere_everything_primary() {
        let filter = AccessFilter {
            road_buffer: None,
            trail_buffer: None,
        };

        let points = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 5.0, y: 5.0 }];
        let (primary, secondary) = filter.classify(&points, &types(&[AccessType::Anywhere]));

        assert_eq!(primary.len(), 2);
        assert!(secondary.is_empty());
        assert!(primary.iter().all(|(_, t)| *t == AccessType::Anywhere));
    }

    #[test]
    fn test_road_only() {
        let filter = AccessFilter {
            road_buffer: Some(square(0.0, 10.0)),
            trail_buffer: None,
        };

        let points = vec![Coord { x: 5.0, y: 5.0 }, Coord { x: 50.0, y: 50.0 }];
        let (primary, secondary) = filter.classify(&points, &types(&[AccessType::Road]));

        assert_eq!(primary, vec![(0, AccessType::Road)]);
        assert_eq!(secondary, vec![1]);
    }

    #[test]
    fn test_road_and_trail_needs_both() {
        let filter = AccessFilter {
            road_buffer: Some(square(0.0, 10.0)),
            trail_buffer: Some(square(5.0, 15.0)),
        };

        let points = vec![
            Coord { x: 7.0, y: 7.0 },  // in both
            Coord { x: 2.0, y: 2.0 },  // road only
            Coord { x: 12.0, y: 12.0 } // trail only
        ];
        let (primary, secondary) =
            filter.classify(&points, &types(&[AccessType::Road, AccessType::Trail]));

        assert_eq!(primary, vec![(0, AccessType::RoadAndTrail)]);
        assert_eq!(secondary, vec![1, 2]);
    }

    #[test]
    fn test_road_and_trail_falls_back_when_layer_missing() {
        let filter = AccessFilter {
            road_buffer: Some(square(0.0, 10.0)),
            trail_buffer: None,
        };

        let points = vec![Coord { x: 5.0, y: 5.0 }];
        let (primary, _) =
            filter.classify(&points, &types(&[AccessType::Road, AccessType::Trail]));

        assert_eq!(primary, vec![(0, AccessType::Road)]);
    }

    #[test]
    fn test_off_road_outside_both() {
        let filter = AccessFilter {
            road_buffer: Some(square(0.0, 10.0)),
            trail_buffer: Some(square(20.0, 30.0)),
        };

        let points = vec![
            Coord { x: 5.0, y: 5.0 },   // in road buffer
            Coord { x: 25.0, y: 25.0 }, // in trail buffer
            Coord { x: 50.0, y: 50.0 }, // clear of both
        ];
        let (primary, secondary) = filter.classify(&points, &types(&[AccessType::OffRoad]));

        assert_eq!(primary, vec![(2, AccessType::OffRoad)]);
        assert_eq!(secondary, vec![0, 1]);
    }

    #[test]
    fn test_accessible_area_pct() {
        let filter = AccessFilter {
            road_buffer: Some(square(0.0, 50.0)),
            trail_buffer: None,
        };

        let search: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ];

        let pct = filter
            .accessible_area_pct(&search, &types(&[AccessType::Road]))
            .unwrap();
        assert!((pct - 25.0).abs() < 0.1, "pct was {}", pct);

        let pct_anywhere = filter
            .accessible_area_pct(&search, &types(&[AccessType::Anywhere]))
            .unwrap();
        assert_eq!(pct_anywhere, 100.0);
    }

    #[test]
    fn test_buffer_lines_unifies() {
        let lines = vec![
            LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]),
            LineString::from(vec![(0.0, 5.0), (100.0, 5.0)]),
        ];

        // 10m buffer swallows the 5m gap between the two lines
        let buffer = buffer_lines(&lines, 10.0).unwrap();
        assert_eq!(buffer.0.len(), 1);

        let point = Point::new(50.0, 2.5);
        assert!(buffer.contains(&point));
    }
}
