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
use anyhow::{bail, Result};
use gdal::spatial_ref::CoordTransform;
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use itertools::Itertools;

use crate::raster::srs_from_epsg;

pub fn coord_transform(from_epsg: u32, to_epsg: u32) -> Result<CoordTransform> {
    let from = srs_from_epsg(from_epsg)?;
    let to = srs_from_epsg(to_epsg)?;
    Ok(CoordTransform::new(&from, &to)?)
}

pub fn transform_xy(transform: &CoordTransform, x: f64, y: f64) -> Result<(f64, f64)> {
    let mut xs = [x];
    let mut ys = [y];
    let mut zs: [f64; 0] = [];

    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

    Ok((xs[0], ys[0]))
}

/// Uses a GDAL coordinate transform to transform a linestring point by point
pub fn transform_line_string(
    transform: &CoordTransform,
    line: &LineString<f64>,
) -> Result<LineString<f64>> {
    let mut xs = line.coords().map(|c| c.x).collect_vec();
    let mut ys = line.coords().map(|c| c.y).collect_vec();
    let mut zs: [f64; 0] = [];

    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

    Ok(LineString::from_iter(
        xs.into_iter().zip(ys).map(|(x, y)| Coord { x, y }),
    ))
}

pub fn transform_polygon(
    transform: &CoordTransform,
    polygon: &Polygon<f64>,
) -> Result<Polygon<f64>> {
    let exterior = transform_line_string(transform, polygon.exterior())?;

    let interiors = polygon
        .interiors()
        .iter()
        .map(|ring| transform_line_string(transform, ring))
        .collect::<Result<Vec<_>>>()?;

    Ok(Polygon::new(exterior, interiors))
}

pub fn transform_multi_polygon(
    transform: &CoordTransform,
    multi_polygon: &MultiPolygon<f64>,
) -> Result<MultiPolygon<f64>> {
    let polygons = multi_polygon
        .iter()
        .map(|p| transform_polygon(transform, p))
        .collect::<Result<Vec<_>>>()?;

    Ok(MultiPolygon(polygons))
}

pub fn transform_geometry(
    transform: &CoordTransform,
    geometry: &Geometry<f64>,
) -> Result<Geometry<f64>> {
    Ok(match geometry {
        Geometry::Point(p) => {
            let (x, y) = transform_xy(transform, p.x(), p.y())?;
            Geometry::Point(Point::new(x, y))
        }
        Geometry::LineString(ls) => Geometry::LineString(transform_line_string(transform, ls)?),
        Geometry::MultiLineString(mls) => {
            let lines = mls
                .iter()
                .map(|ls| transform_line_string(transform, ls))
                .collect::<Result<Vec<_>>>()?;
            Geometry::MultiLineString(MultiLineString(lines))
        }
        Geometry::Polygon(p) => Geometry::Polygon(transform_polygon(transform, p)?),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(transform_multi_polygon(transform, mp)?)
        }
        other => {
            bail!("Unsupported geometry type for transform: {:?}", other);
        }
    })
}
