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
use std::path::PathBuf;

use geo::{Area, Geometry, Polygon};
use serde::Deserialize;

use crate::access::AccessType;
use crate::error::{PipelineError, Result};
use crate::segment::SelectionWeights;

fn default_access_deviation_m() -> f64 {
    50.0
}

fn default_grid_spacing_m() -> f64 {
    50.0
}

fn default_max_workers() -> usize {
    4
}

fn default_simplify_tolerance_m() -> f64 {
    2.0
}

/// Everything the pipeline needs for one run, deserialized from JSON.
/// Geometry fields are GeoJSON in WGS84.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub project_id: String,

    pub search_polygon: geojson::Geometry,

    /// Observer height above ground, meters
    pub drone_agl_altitude: f64,

    pub preferred_segment_size_acres: f64,

    /// Maximum visual line of sight distance, meters
    pub max_vlos_m: f64,

    pub access_types: Vec<AccessType>,

    #[serde(default = "default_access_deviation_m")]
    pub access_deviation_m: f64,

    #[serde(default = "default_grid_spacing_m")]
    pub grid_spacing_m: f64,

    pub dem_path: PathBuf,

    #[serde(default)]
    pub vegetation_path: Option<PathBuf>,

    #[serde(default)]
    pub roads_path: Option<PathBuf>,

    #[serde(default)]
    pub trails_path: Option<PathBuf>,

    /// Directory for intermediate rasters
    pub output_dir: PathBuf,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_simplify_tolerance_m")]
    pub simplify_tolerance_m: f64,

    #[serde(default)]
    pub selection_weights: SelectionWeights,
}

impl PipelineConfig {
    /// Checks every recognized option and parses the search polygon.
    pub fn validate(&self) -> Result<Polygon<f64>> {
        if self.project_id.is_empty() {
            return Err(invalid("project_id must not be empty"));
        }
        if !(self.drone_agl_altitude > 0.0) {
            return Err(invalid("drone_agl_altitude must be > 0"));
        }
        if !(self.preferred_segment_size_acres > 0.0) {
            return Err(invalid("preferred_segment_size_acres must be > 0"));
        }
        if !(self.max_vlos_m > 0.0) {
            return Err(invalid("max_vlos_m must be > 0"));
        }
        if !(self.access_deviation_m >= 0.0) {
            return Err(invalid("access_deviation_m must be >= 0"));
        }
        if !(self.grid_spacing_m > 0.0) {
            return Err(invalid("grid_spacing_m must be > 0"));
        }
        if self.max_workers == 0 {
            return Err(invalid("max_workers must be > 0"));
        }

        if self.access_types.is_empty() {
            return Err(invalid("access_types must not be empty"));
        }
        for access_type in &self.access_types {
            match access_type {
                AccessType::Road
                | AccessType::Trail
                | AccessType::OffRoad
                | AccessType::Anywhere => {}
                other => {
                    return Err(invalid(&format!(
                        "access type '{}' is not selectable",
                        other
                    )))
                }
            }
        }

        self.parse_search_polygon()
    }

    fn parse_search_polygon(&self) -> Result<Polygon<f64>> {
        let geometry = Geometry::<f64>::try_from(&self.search_polygon)
            .map_err(|e| invalid(&format!("search_polygon is not valid GeoJSON: {}", e)))?;

        let polygon = match geometry {
            Geometry::Polygon(p) => p,
            Geometry::MultiPolygon(mut mp) if mp.0.len() == 1 => mp.0.remove(0),
            _ => return Err(invalid("search_polygon must be a single polygon")),
        };

        if polygon.exterior().coords().count() < 4 {
            return Err(invalid("search_polygon exterior ring is degenerate"));
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(invalid("search_polygon has zero area"));
        }

        Ok(polygon)
    }
}

fn invalid(msg: &str) -> PipelineError {
    PipelineError::InvalidInput(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PipelineConfig {
        let raw = r#"{
            "project_id": "test-project",
            "search_polygon": {
                "type": "Polygon",
                "coordinates": [[
                    [-122.5, 37.7],
                    [-122.3, 37.7],
                    [-122.3, 37.8],
                    [-122.5, 37.8],
                    [-122.5, 37.7]
                ]]
            },
            "drone_agl_altitude": 50.0,
            "preferred_segment_size_acres": 100.0,
            "max_vlos_m": 3000.0,
            "access_types": ["road", "trail"],
            "dem_path": "/data/dem.tif",
            "output_dir": "/tmp/segmenter"
        }"#;
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_valid_config_parses() {
        let config = base_config();
        let polygon = config.validate().unwrap();
        assert_eq!(polygon.exterior().coords().count(), 5);

        // defaults filled in
        assert_eq!(config.access_deviation_m, 50.0);
        assert_eq!(config.grid_spacing_m, 50.0);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.simplify_tolerance_m, 2.0);
        assert_eq!(config.selection_weights.oversize_penalty, 0.8);
    }

    #[test]
    fn test_rejects_bad_altitude() {
        let mut config = base_config();
        config.drone_agl_altitude = 0.0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_empty_access_types() {
        let mut config = base_config();
        config.access_types.clear();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_derived_access_label() {
        let mut config = base_config();
        config.access_types = vec![AccessType::RoadAndTrail];
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_non_polygon_geometry() {
        let mut config = base_config();
        config.search_polygon = geojson::Geometry::new(geojson::Value::Point(vec![0.0, 0.0]));
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_access_types_deserialize_snake_case() {
        let raw = r#"["road", "trail", "off_road", "anywhere"]"#;
        let parsed: Vec<AccessType> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed,
            vec![
                AccessType::Road,
                AccessType::Trail,
                AccessType::OffRoad,
                AccessType::Anywhere
            ]
        );
    }
}
