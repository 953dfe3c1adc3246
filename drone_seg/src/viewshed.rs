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

//! Per-observer visibility computation.
//!
//! The production operator shells into GDAL's viewshed implementation
//! against the prepared surface raster; tests substitute synthetic
//! operators through the [`ViewshedOperator`] trait.

use std::collections::HashSet;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use gdal::Dataset;
use geo::Coord;
use log::{info, warn};
use rayon::prelude::*;
use terrain_util::raster::{Raster, RasterStats};

use crate::control::CancelToken;
use crate::dem::PreparedDem;
use crate::error::{PipelineError, Result};

/// Marker burned into viewshed rasters for visible cells
pub const VISIBLE_VALUE: f64 = 255.0;

/// Standard Earth-curvature correction
pub const CURVATURE_COEFFICIENT: f64 = 1.0;

#[derive(Debug, Clone, Default)]
pub struct Viewshed {
    pub cells: HashSet<usize>,
    pub area_m2: f64,
}

impl Viewshed {
    pub fn empty() -> Viewshed {
        Viewshed::default()
    }
}

/// A source of per-observer visibility. Implementations must tolerate
/// observers outside their raster (empty result, not an error).
pub trait ViewshedOperator: Sync {
    fn viewshed(
        &self,
        observer: Coord<f64>,
        observer_height: f64,
        max_distance: f64,
    ) -> Result<Viewshed>;
}

/// GDAL-backed viewshed with Earth-curvature correction, edge sampling
/// mode, and a hard range limit.
pub struct GdalViewshed<'a> {
    dem: &'a PreparedDem,
    scratch_dir: PathBuf,
}

impl<'a> GdalViewshed<'a> {
    pub fn new(dem: &'a PreparedDem, scratch_dir: &Path) -> GdalViewshed<'a> {
        GdalViewshed {
            dem,
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }
}

impl ViewshedOperator for GdalViewshed<'_> {
    fn viewshed(
        &self,
        observer: Coord<f64>,
        observer_height: f64,
        max_distance: f64,
    ) -> Result<Viewshed> {
        // Datasets are not shareable across threads; each call opens its own
        let raster = Raster::open(&self.dem.raster_path)?;
        let stats = &raster.stats;

        if !stats.contains_coord(observer.x, observer.y) {
            warn!(
                "Observer ({:.1}, {:.1}) is outside the DEM, skipping",
                observer.x, observer.y
            );
            return Ok(Viewshed::empty());
        }

        let col = stats.calc_col(observer.x);
        let row = stats.calc_row(observer.y);

        let mut elevation = [0f64; 1];
        raster.band()?.read_into_slice(
            (col as isize, row as isize),
            (1, 1),
            (1, 1),
            &mut elevation,
            None,
        )?;

        if stats.is_nodata(elevation[0]) {
            warn!(
                "Observer ({:.1}, {:.1}) sits on a NoData cell, skipping",
                observer.x, observer.y
            );
            return Ok(Viewshed::empty());
        }

        // Scratch raster lives only as long as this call, even on error
        let scratch = tempfile::Builder::new()
            .prefix("viewshed_")
            .suffix(".tif")
            .tempfile_in(&self.scratch_dir)?;
        let scratch_path = scratch.path().to_str().ok_or_else(|| {
            PipelineError::Viewshed("scratch path is not valid UTF-8".to_string())
        })?;

        let viewshed_ds = generate_viewshed(
            &raster,
            scratch_path,
            observer,
            observer_height,
            max_distance,
        )?;

        let vs_stats = RasterStats::new(&viewshed_ds)?;
        let size = (vs_stats.num_cols, vs_stats.num_rows);
        let mut data = vec![0f64; vs_stats.num_cols * vs_stats.num_rows];
        viewshed_ds
            .rasterband(1)?
            .read_into_slice((0, 0), size, size, &mut data, None)?;
        drop(viewshed_ds);

        // The viewshed raster is cropped to the range limit; map each
        // visible pixel back to a DEM cell through its world coordinate.
        let mut cells = HashSet::new();
        for vs_row in 0..vs_stats.num_rows {
            for vs_col in 0..vs_stats.num_cols {
                if data[vs_row * vs_stats.num_cols + vs_col] != VISIBLE_VALUE {
                    continue;
                }
                let (x, y) = vs_stats.calc_center(vs_col as i64, vs_row as i64);
                if let Some(cell_id) = self.dem.grid.cell_id_at(x, y) {
                    cells.insert(cell_id);
                }
            }
        }

        let area_m2 = cells.len() as f64 * self.dem.grid.cell_area();

        Ok(Viewshed { cells, area_m2 })
    }
}

fn generate_viewshed(
    dem: &Raster,
    output_path: &str,
    observer: Coord<f64>,
    observer_height: f64,
    max_distance: f64,
) -> Result<Dataset> {
    let band = dem.band()?;
    let driver_name = CString::new("GTiff").expect("static string");
    let target_path = CString::new(output_path)
        .map_err(|_| PipelineError::Viewshed("scratch path contains NUL".to_string()))?;

    let handle = unsafe {
        gdal_sys::GDALViewshedGenerate(
            band.c_rasterband(),
            driver_name.as_ptr(),
            target_path.as_ptr(),
            ptr::null_mut(),
            observer.x,
            observer.y,
            observer_height,
            0.0, // target height: ground level
            VISIBLE_VALUE,
            0.0, // invisible
            0.0, // out of range
            0.0, // nodata
            CURVATURE_COEFFICIENT,
            gdal_sys::GDALViewshedMode::GVM_Edge,
            max_distance,
            None,
            ptr::null_mut(),
            gdal_sys::GDALViewshedOutputType::GVOT_NORMAL,
            ptr::null_mut(),
        )
    };

    if handle.is_null() {
        return Err(PipelineError::Viewshed(format!(
            "GDALViewshedGenerate returned no dataset for observer ({:.1}, {:.1})",
            observer.x, observer.y
        )));
    }

    Ok(unsafe { Dataset::from_c_dataset(handle) })
}

/// Computes viewsheds for a batch of observers on a bounded worker pool.
///
/// Individual observer failures are logged and yield empty visibility; they
/// never abort the batch. `on_done(completed, total)` fires once per
/// finished observer.
pub fn compute_batch<V, F>(
    operator: &V,
    observers: &[Coord<f64>],
    observer_height: f64,
    max_distance: f64,
    max_workers: usize,
    cancel: &CancelToken,
    on_done: F,
) -> Result<Vec<Viewshed>>
where
    V: ViewshedOperator + ?Sized,
    F: Fn(usize, usize) + Sync,
{
    info!("Computing viewsheds for {} observers", observers.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .build()
        .map_err(|e| anyhow::anyhow!("building viewshed worker pool: {}", e))?;

    let total = observers.len();
    let completed = AtomicUsize::new(0);

    let results: Vec<Viewshed> = pool.install(|| {
        observers
            .par_iter()
            .enumerate()
            .map(|(idx, observer)| {
                if cancel.is_cancelled() {
                    return Viewshed::empty();
                }

                let viewshed =
                    match operator.viewshed(*observer, observer_height, max_distance) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Viewshed failed for observer {}: {}", idx, e);
                            Viewshed::empty()
                        }
                    };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if done % 50 == 0 {
                    info!("Processed {}/{} viewsheds", done, total);
                }
                on_done(done, total);

                viewshed
            })
            .collect()
    });

    cancel.check()?;

    let non_empty = results.iter().filter(|v| !v.cells.is_empty()).count();
    let total_cells: usize = results.iter().map(|v| v.cells.len()).sum();
    info!(
        "Completed {} viewsheds: {} with visible cells, {} visible cells total",
        results.len(),
        non_empty,
        total_cells
    );

    Ok(results)
}
