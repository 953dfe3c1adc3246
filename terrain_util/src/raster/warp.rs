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
use std::ptr;

use anyhow::{bail, Result};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use gdal_sys::{CPLErr, GDALResampleAlg};
use log::info;

use crate::raster::{create_raster, Raster, RasterStats, DEFAULT_NO_DATA};

/// Warps a raster into another spatial reference system with bilinear
/// resampling. The output keeps the source pixel count; the output pixel
/// size follows from the reprojected bounds.
pub fn reproject_raster(
    src: &Raster,
    target_srs: &SpatialRef,
    dst_path: &Path,
) -> Result<Raster> {
    let src_srs = src.spatial_ref()?;
    let transform = CoordTransform::new(&src_srs, target_srs)?;

    let stats = &src.stats;
    let mut bounds = [
        stats.origin_x,
        stats.bottom_y_coord(),
        stats.right_x_coord(),
        stats.origin_y,
    ];
    let out = transform.transform_bounds(&mut bounds, 21)?;
    let (min_x, min_y, max_x, max_y) = (out[0], out[1], out[2], out[3]);

    if !(max_x > min_x && max_y > min_y) {
        bail!("Degenerate bounds after reprojection: {:?}", out);
    }

    let out_stats = RasterStats {
        origin_x: min_x,
        origin_y: max_y,
        pixel_width: (max_x - min_x) / stats.num_cols as f64,
        pixel_height: -(max_y - min_y) / stats.num_rows as f64,
        num_cols: stats.num_cols,
        num_rows: stats.num_rows,
        no_data_value: Some(stats.no_data_value.unwrap_or(DEFAULT_NO_DATA)),
        projection: target_srs.to_wkt()?,
    };

    let mut dst = create_raster(dst_path, &out_stats)?;
    reproject_image(&src.dataset, &dst)?;
    dst.flush_cache()?;
    drop(dst);

    info!(
        "Reprojected raster {:?} -> {:?} ({:.2}m x {:.2}m pixels)",
        src.path,
        dst_path,
        out_stats.pixel_width,
        out_stats.pixel_height.abs()
    );

    Raster::open(dst_path)
}

/// Resamples a raster onto the exact grid of `template` (same origin, pixel
/// size, and shape), reprojecting on the fly when the systems differ.
pub fn resample_to_grid(
    src: &Raster,
    template: &RasterStats,
    dst_path: &Path,
) -> Result<Raster> {
    let out_stats = RasterStats {
        no_data_value: Some(src.stats.no_data_value.unwrap_or(DEFAULT_NO_DATA)),
        projection: template.projection.clone(),
        ..template.clone()
    };

    let mut dst = create_raster(dst_path, &out_stats)?;
    reproject_image(&src.dataset, &dst)?;
    dst.flush_cache()?;
    drop(dst);

    Raster::open(dst_path)
}

//Bilinear everywhere: elevation surfaces, never categorical data
fn reproject_image(src: &Dataset, dst: &Dataset) -> Result<()> {
    let rv = unsafe {
        gdal_sys::GDALReprojectImage(
            src.c_dataset(),
            ptr::null(),
            dst.c_dataset(),
            ptr::null(),
            GDALResampleAlg::GRA_Bilinear,
            0.0,
            0.0,
            None,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };

    if rv != CPLErr::CE_None {
        bail!("GDALReprojectImage failed (CPLErr {})", rv);
    }

    Ok(())
}
