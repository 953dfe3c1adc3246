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
use anyhow::{anyhow, Result};
use gdal::vector::{Geometry as GdalGeometry, OGRwkbGeometryType};
use geo::{Geometry, LineString, MultiPolygon, Polygon};

pub fn geo_to_geos(geometry: &Geometry<f64>) -> Result<geos::Geometry> {
    geos::Geometry::try_from(geometry)
        .map_err(|e| anyhow!("geo -> geos conversion failed: {}", e))
}

pub fn polygon_to_geos(polygon: &Polygon<f64>) -> Result<geos::Geometry> {
    geo_to_geos(&Geometry::Polygon(polygon.clone()))
}

pub fn multi_polygon_to_geos(multi_polygon: &MultiPolygon<f64>) -> Result<geos::Geometry> {
    geo_to_geos(&Geometry::MultiPolygon(multi_polygon.clone()))
}

pub fn geos_to_geo(geometry: &geos::Geometry) -> Result<Geometry<f64>> {
    Geometry::try_from(geometry).map_err(|e| anyhow!("geos -> geo conversion failed: {}", e))
}

/// Flattens any polygonal content out of a geometry; lower dimensional
/// pieces (points, lines) are dropped.
pub fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out);
            }
        }
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        _ => {}
    }
}

fn ring_to_gdal(ring: &LineString<f64>) -> Result<GdalGeometry> {
    let mut geometry = GdalGeometry::empty(OGRwkbGeometryType::wkbLinearRing)?;
    for (i, coord) in ring.coords().enumerate() {
        geometry.set_point_2d(i, (coord.x, coord.y));
    }
    Ok(geometry)
}

pub fn polygon_to_gdal(polygon: &Polygon<f64>) -> Result<GdalGeometry> {
    let mut geometry = GdalGeometry::empty(OGRwkbGeometryType::wkbPolygon)?;
    geometry.add_geometry(ring_to_gdal(polygon.exterior())?)?;
    for ring in polygon.interiors() {
        geometry.add_geometry(ring_to_gdal(ring)?)?;
    }
    Ok(geometry)
}
