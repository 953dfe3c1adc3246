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
use std::cmp::{max, min};
use std::path::Path;

use anyhow::Result;
use gdal::raster::rasterize;
use gdal::DriverManager;
use geo::BoundingRect;
use geo::Polygon as GeoPolygon;
use log::{debug, info};

use crate::convert::polygon_to_gdal;
use crate::raster::{create_raster, write_band_f64, Raster, RasterStats, DEFAULT_NO_DATA};

/// Clips a raster to a polygon: the output raster covers the pixel window of
/// the polygon's bounding box and every pixel outside the polygon is NoData.
///
/// Returns None when the polygon does not intersect the raster extent.
pub fn clip_to_polygon(
    src: &Raster,
    clip_polygon: &GeoPolygon<f64>,
    dst_path: &Path,
) -> Result<Option<Raster>> {
    let stats = &src.stats;

    let bounds = match clip_polygon.bounding_rect() {
        Some(b) => b,
        None => return Ok(None),
    };

    let col0 = max(stats.calc_col(bounds.min().x), 0);
    let row0 = max(stats.calc_row(bounds.max().y), 0);
    let col1 = min(stats.calc_col(bounds.max().x) + 1, stats.num_cols as i64);
    let row1 = min(stats.calc_row(bounds.min().y) + 1, stats.num_rows as i64);

    if col0 >= col1 || row0 >= row1 {
        debug!(
            "Clip window empty: polygon bounds {:?} vs raster {} x {}",
            bounds, stats.num_cols, stats.num_rows
        );
        return Ok(None);
    }

    let num_cols = (col1 - col0) as usize;
    let num_rows = (row1 - row0) as usize;

    let band = src.band()?;
    let mut data = vec![0f64; num_cols * num_rows];
    band.read_into_slice(
        (col0 as isize, row0 as isize),
        (num_cols, num_rows),
        (num_cols, num_rows),
        &mut data,
        None,
    )?;

    let no_data = stats.no_data_value.unwrap_or(DEFAULT_NO_DATA);

    let out_stats = RasterStats {
        origin_x: stats.calc_x_coord(col0),
        origin_y: stats.calc_y_coord(row0),
        pixel_width: stats.pixel_width,
        pixel_height: stats.pixel_height,
        num_cols,
        num_rows,
        no_data_value: Some(no_data),
        projection: stats.projection.clone(),
    };

    let mask = rasterize_mask(&out_stats, clip_polygon)?;

    let mut live_pixels = 0usize;
    for (value, inside) in data.iter_mut().zip(mask.iter()) {
        if *inside == 0 {
            *value = no_data;
        } else if !stats.is_nodata(*value) {
            live_pixels += 1;
        }
    }

    if live_pixels == 0 {
        debug!("Clip produced only NoData pixels");
        return Ok(None);
    }

    let mut dataset = create_raster(dst_path, &out_stats)?;
    write_band_f64(&mut dataset, data)?;
    dataset.flush_cache()?;
    drop(dataset);

    info!(
        "Clipped raster to {} x {} ({} live pixels): {:?}",
        num_cols, num_rows, live_pixels, dst_path
    );

    Raster::open(dst_path).map(Some)
}

/// Burns the polygon onto an in-memory raster aligned with `stats`;
/// 1 = inside, 0 = outside.
fn rasterize_mask(stats: &RasterStats, polygon: &GeoPolygon<f64>) -> Result<Vec<u8>> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset =
        driver.create_with_band_type::<u8, _>("", stats.num_cols, stats.num_rows, 1)?;

    dataset.set_geo_transform(&stats.geo_transform())?;
    dataset.set_projection(&stats.projection)?;

    let geometry = polygon_to_gdal(polygon)?;
    rasterize(&mut dataset, &[1], &[geometry], &[1.0], None)?;

    let band = dataset.rasterband(1)?;
    let size = (stats.num_cols, stats.num_rows);
    let mut mask = vec![0u8; stats.num_cols * stats.num_rows];
    band.read_into_slice((0, 0), size, size, &mut mask, None)?;

    Ok(mask)
}
