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
use std::path::Path;

use anyhow::{Context, Result};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{Geometry, LineString};
use log::{debug, info, warn};

mod transform;

pub use transform::*;

use crate::raster::gis_order;

/// Reads every line geometry from the first layer of a vector dataset,
/// reprojected into `target_srs`. Non-line features are skipped.
pub fn read_line_layer(path: &Path, target_srs: &SpatialRef) -> Result<Vec<LineString<f64>>> {
    let dataset =
        Dataset::open(path).with_context(|| format!("opening vector dataset {:?}", path))?;
    let mut layer = dataset.layer(0)?;

    let coord_transform = match layer.spatial_ref() {
        Some(layer_srs) => {
            let layer_srs = gis_order(layer_srs);
            if srs_matches(&layer_srs, target_srs) {
                None
            } else {
                Some(CoordTransform::new(&layer_srs, target_srs)?)
            }
        }
        None => {
            warn!(
                "Layer {:?} has no spatial reference, assuming target CRS",
                path
            );
            None
        }
    };

    let mut lines = Vec::new();
    let mut skipped = 0usize;

    for feature in layer.features() {
        let geometry = match feature.geometry() {
            Some(g) => g,
            None => continue,
        };

        match geometry.to_geo()? {
            Geometry::LineString(ls) => {
                lines.push(maybe_transform_line(&coord_transform, ls)?);
            }
            Geometry::MultiLineString(mls) => {
                for ls in mls {
                    lines.push(maybe_transform_line(&coord_transform, ls)?);
                }
            }
            other => {
                debug!("Skipping non-line geometry {:?} in {:?}", kind_of(&other), path);
                skipped += 1;
            }
        }
    }

    info!(
        "Loaded {} line features from {:?} ({} skipped)",
        lines.len(),
        path,
        skipped
    );

    Ok(lines)
}

fn maybe_transform_line(
    transform: &Option<CoordTransform>,
    line: LineString<f64>,
) -> Result<LineString<f64>> {
    match transform {
        Some(ct) => transform_line_string(ct, &line),
        None => Ok(line),
    }
}

fn kind_of(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Compares two spatial references by authority code when both expose one.
pub fn srs_matches(a: &SpatialRef, b: &SpatialRef) -> bool {
    match (a.auth_code(), b.auth_code()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}
