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

//! DEM preparation: clip to the VLOS-buffered search area, reproject into
//! the working UTM system, fold vegetation height into the surface, and
//! build the cell index used by the viewshed and polygon stages.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use geo::{Coord, Polygon};
use geos::Geom;
use log::{info, warn};
use terrain_util::convert::{collect_polygons, geos_to_geo, polygon_to_geos};
use terrain_util::raster::{
    clip_to_polygon, create_raster, resample_to_grid, srs_from_epsg, write_band_f64, Raster,
    RasterStats,
};
use terrain_util::vector::{srs_matches, transform_polygon};

use crate::error::{PipelineError, Result};

/// Rectangular grid of DEM cells in the projected CRS. Cell ids are
/// `row * width + col`; the index stores the world centroid of every cell.
pub struct CellGrid {
    transform: [f64; 6],
    width: usize,
    height: usize,
    epsg: u32,
    centroids: Vec<Coord<f64>>,
}

impl CellGrid {
    pub fn new(transform: [f64; 6], width: usize, height: usize, epsg: u32) -> CellGrid {
        let mut centroids = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                centroids.push(Coord {
                    x: transform[0] + transform[1] * (col as f64 + 0.5),
                    y: transform[3] + transform[5] * (row as f64 + 0.5),
                });
            }
        }

        CellGrid {
            transform,
            width,
            height,
            epsg,
            centroids,
        }
    }

    pub fn from_stats(stats: &RasterStats, epsg: u32) -> CellGrid {
        CellGrid::new(stats.geo_transform(), stats.num_cols, stats.num_rows, epsg)
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn transform(&self) -> &[f64; 6] {
        &self.transform
    }

    pub fn pixel_width(&self) -> f64 {
        self.transform[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.transform[5]
    }

    pub fn cell_area(&self) -> f64 {
        (self.pixel_width() * self.pixel_height()).abs()
    }

    pub fn cell_center(&self, cell_id: usize) -> Option<Coord<f64>> {
        self.centroids.get(cell_id).copied()
    }

    /// Cell id containing a projected coordinate, if in bounds
    pub fn cell_id_at(&self, x: f64, y: f64) -> Option<usize> {
        let col = ((x - self.transform[0]) / self.transform[1]).floor();
        let row = ((y - self.transform[3]) / self.transform[5]).floor();

        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        if col >= self.width || row >= self.height {
            return None;
        }

        Some(row * self.width + col)
    }

    pub fn centroids(&self) -> impl Iterator<Item = (usize, Coord<f64>)> + '_ {
        self.centroids.iter().copied().enumerate()
    }
}

/// The DEM after preparation, with its cell index
pub struct PreparedDem {
    pub raster_path: PathBuf,
    pub stats: RasterStats,
    pub grid: CellGrid,
}

pub struct DemProcessor {
    dem_path: PathBuf,
    vegetation_path: Option<PathBuf>,
    output_dir: PathBuf,
}

impl DemProcessor {
    pub fn new(
        dem_path: &Path,
        vegetation_path: Option<&Path>,
        output_dir: &Path,
    ) -> DemProcessor {
        DemProcessor {
            dem_path: dem_path.to_path_buf(),
            vegetation_path: vegetation_path.map(Path::to_path_buf),
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Clip, reproject, and optionally fold in vegetation height.
    ///
    /// `projected_polygon` is the search polygon already in the target CRS;
    /// the clip region is that polygon buffered by `max_vlos_m` so terrain
    /// within sight range of any interior observer is retained.
    pub fn process(
        &self,
        projected_polygon: &Polygon<f64>,
        target_epsg: u32,
        max_vlos_m: f64,
    ) -> Result<PreparedDem> {
        if !self.dem_path.exists() {
            return Err(PipelineError::MissingRaster(self.dem_path.clone()));
        }
        create_dir_all(&self.output_dir)?;

        info!("Starting DEM processing for {:?}", self.dem_path);

        let buffered = buffer_polygon(projected_polygon, max_vlos_m)?;

        let dem = Raster::open(&self.dem_path)?;
        let dem_srs = dem.spatial_ref()?;
        let target_srs = srs_from_epsg(target_epsg)?;

        // Clip in the DEM's own CRS
        let clip_polygon = if srs_matches(&dem_srs, &target_srs) {
            buffered.clone()
        } else {
            info!("DEM CRS differs from EPSG:{}, reprojecting clip polygon", target_epsg);
            let ct = gdal::spatial_ref::CoordTransform::new(&target_srs, &dem_srs)?;
            transform_polygon(&ct, &buffered)?
        };

        let clipped = clip_to_polygon(&dem, &clip_polygon, &self.output_dir.join("dem_clipped.tif"))?
            .ok_or(PipelineError::NoOverlap)?;

        let projected = if srs_matches(&clipped.spatial_ref()?, &target_srs) {
            info!("DEM already in target CRS");
            clipped
        } else {
            terrain_util::raster::reproject_raster(
                &clipped,
                &target_srs,
                &self.output_dir.join("dem_reprojected.tif"),
            )?
        };

        let surface = match &self.vegetation_path {
            Some(veg_path) if veg_path.exists() => {
                match self.add_vegetation(&projected, &buffered, target_epsg)? {
                    Some(combined) => combined,
                    None => projected,
                }
            }
            Some(missing) => {
                warn!(
                    "Vegetation raster {:?} not found, using bare terrain",
                    missing
                );
                projected
            }
            None => projected,
        };

        let grid = CellGrid::from_stats(&surface.stats, target_epsg);
        info!(
            "DEM processing complete: {} x {} cells ({:.1} m2 each)",
            grid.width(),
            grid.height(),
            grid.cell_area()
        );

        Ok(PreparedDem {
            raster_path: surface.path.clone(),
            stats: surface.stats.clone(),
            grid,
        })
    }

    /// Effective surface = terrain + vegetation height. The vegetation
    /// raster is clipped in its own CRS, then warped straight onto the DEM
    /// grid (reprojection and bilinear resampling in one pass) before the
    /// pointwise add.
    fn add_vegetation(
        &self,
        dem: &Raster,
        buffered_projected: &Polygon<f64>,
        target_epsg: u32,
    ) -> Result<Option<Raster>> {
        let veg_path = self.vegetation_path.as_ref().unwrap();
        info!("Adding vegetation height from {:?}", veg_path);

        let vegetation = Raster::open(veg_path)?;
        let veg_srs = vegetation.spatial_ref()?;
        let target_srs = srs_from_epsg(target_epsg)?;

        let clip_polygon = if srs_matches(&veg_srs, &target_srs) {
            buffered_projected.clone()
        } else {
            let ct = gdal::spatial_ref::CoordTransform::new(&target_srs, &veg_srs)?;
            transform_polygon(&ct, buffered_projected)?
        };

        let clipped = match clip_to_polygon(
            &vegetation,
            &clip_polygon,
            &self.output_dir.join("vegetation_clipped.tif"),
        )? {
            Some(r) => r,
            None => {
                warn!("Vegetation raster does not overlap the search area, skipping");
                return Ok(None);
            }
        };

        let aligned = resample_to_grid(
            &clipped,
            &dem.stats,
            &self.output_dir.join("vegetation_aligned.tif"),
        )?;

        let dem_data = dem.read_band_f64()?;
        let veg_data = aligned.read_band_f64()?;

        let combined: Vec<f64> = dem_data
            .iter()
            .zip(veg_data.iter())
            .map(|(&ground, &veg)| {
                if dem.stats.is_nodata(ground) {
                    ground
                } else if aligned.stats.is_nodata(veg) || veg < 0.0 {
                    ground
                } else {
                    ground + veg
                }
            })
            .collect();

        let out_path = self.output_dir.join("dem_with_vegetation.tif");
        let mut dataset = create_raster(&out_path, &dem.stats)?;
        write_band_f64(&mut dataset, combined)?;
        dataset.flush_cache()?;
        drop(dataset);

        Ok(Some(Raster::open(&out_path)?))
    }
}

/// Outward buffer in the projected CRS. A valid polygon buffers to a single
/// polygon; anything else is collapsed to its largest part.
pub fn buffer_polygon(polygon: &Polygon<f64>, distance_m: f64) -> Result<Polygon<f64>> {
    let g = polygon_to_geos(polygon)?;
    let buffered = g.buffer(distance_m, 8)?;

    let mut parts = Vec::new();
    collect_polygons(geos_to_geo(&buffered)?, &mut parts);

    if parts.is_empty() {
        return Err(PipelineError::InvalidInput(
            "buffering the search polygon produced no geometry".to_string(),
        ));
    }

    if parts.len() > 1 {
        use geo::Area;
        warn!(
            "Buffered polygon split into {} parts, keeping largest",
            parts.len()
        );
        parts.sort_by(|a, b| {
            b.unsigned_area()
                .partial_cmp(&a.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    Ok(parts.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn grid_10x10() -> CellGrid {
        // 10m pixels, origin at (0, 100), covering x 0..100, y 0..100
        CellGrid::new([0.0, 10.0, 0.0, 100.0, 0.0, -10.0], 10, 10, 32610)
    }

    #[test]
    fn test_cell_ids_row_major() {
        let grid = grid_10x10();
        assert_eq!(grid.len(), 100);

        // top-left cell
        assert_eq!(grid.cell_id_at(5.0, 95.0), Some(0));
        // one cell to the right
        assert_eq!(grid.cell_id_at(15.0, 95.0), Some(1));
        // second row
        assert_eq!(grid.cell_id_at(5.0, 85.0), Some(10));
        // bottom-right
        assert_eq!(grid.cell_id_at(95.0, 5.0), Some(99));
    }

    #[test]
    fn test_cell_id_out_of_bounds() {
        let grid = grid_10x10();
        assert_eq!(grid.cell_id_at(-1.0, 50.0), None);
        assert_eq!(grid.cell_id_at(101.0, 50.0), None);
        assert_eq!(grid.cell_id_at(50.0, 101.0), None);
        assert_eq!(grid.cell_id_at(50.0, -0.1), None);
    }

    #[test]
    fn test_cell_center_round_trip() {
        let grid = grid_10x10();
        for cell_id in [0usize, 7, 10, 55, 99] {
            let center = grid.cell_center(cell_id).unwrap();
            assert_eq!(grid.cell_id_at(center.x, center.y), Some(cell_id));
        }
        assert_eq!(grid.cell_center(100), None);
    }

    #[test]
    fn test_cell_area() {
        assert_eq!(grid_10x10().cell_area(), 100.0);
    }

    #[test]
    fn test_buffer_polygon_grows_area() {
        use geo::Area;

        let square: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ];

        let buffered = buffer_polygon(&square, 50.0).unwrap();
        let area = buffered.unsigned_area();

        // core + edge strips + rounded corners: 10000 + 20000 + pi*2500
        assert!(area > 3.7e4 && area < 3.82e4, "area was {}", area);
    }

    #[test]
    fn test_missing_dem_detected() {
        let processor = DemProcessor::new(
            Path::new("/nonexistent/dem.tif"),
            None,
            Path::new("/tmp/segmenter-test"),
        );

        let square: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ];

        let result = processor.process(&square, 32610, 1000.0);
        assert!(matches!(result, Err(PipelineError::MissingRaster(_))));
    }
}
