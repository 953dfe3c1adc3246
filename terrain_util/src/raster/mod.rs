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
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gdal::raster::{Buffer, RasterBand};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, GeoTransform};

mod clip;
mod warp;

pub use clip::*;
pub use warp::*;

/// Fallback used when a source raster carries no NoData marker but one is
/// needed for masking.
pub const DEFAULT_NO_DATA: f64 = -9999.0;

/// Helper struct to hold the georeferencing of a raster
#[derive(Debug, Clone, Default)]
pub struct RasterStats {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    // Negative: origin is the top-left corner
    pub pixel_height: f64,
    pub num_cols: usize,
    pub num_rows: usize,
    pub no_data_value: Option<f64>,

    //WKT projection string
    pub projection: String,
}

impl RasterStats {
    pub fn new(dataset: &Dataset) -> Result<Self> {
        let gt = dataset.geo_transform()?;
        let (num_cols, num_rows) = dataset.raster_size();
        let band = dataset.rasterband(1)?;

        Ok(RasterStats {
            origin_x: gt[0],
            origin_y: gt[3],
            pixel_width: gt[1],
            pixel_height: gt[5],
            num_cols,
            num_rows,
            no_data_value: band.no_data_value(),
            projection: dataset.projection(),
        })
    }

    pub fn geo_transform(&self) -> GeoTransform {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            self.pixel_height,
        ]
    }

    /// Projected x coordinate of the left edge of a column
    pub fn calc_x_coord(&self, col: i64) -> f64 {
        self.origin_x + self.pixel_width * col as f64
    }

    /// Projected y coordinate of the top edge of a row
    pub fn calc_y_coord(&self, row: i64) -> f64 {
        self.origin_y + self.pixel_height * row as f64
    }

    pub fn right_x_coord(&self) -> f64 {
        self.calc_x_coord(self.num_cols as i64)
    }

    pub fn bottom_y_coord(&self) -> f64 {
        self.calc_y_coord(self.num_rows as i64)
    }

    /// Centroid of the cell at (col, row)
    pub fn calc_center(&self, col: i64, row: i64) -> (f64, f64) {
        (
            self.origin_x + self.pixel_width * (col as f64 + 0.5),
            self.origin_y + self.pixel_height * (row as f64 + 0.5),
        )
    }

    //Converts projected coordinate to a column index
    pub fn calc_col(&self, x_coord: f64) -> i64 {
        ((x_coord - self.origin_x) / self.pixel_width).floor() as i64
    }

    pub fn calc_row(&self, y_coord: f64) -> i64 {
        ((y_coord - self.origin_y) / self.pixel_height).floor() as i64
    }

    pub fn contains_coord(&self, x: f64, y: f64) -> bool {
        let col = self.calc_col(x);
        let row = self.calc_row(y);
        col >= 0 && (col as usize) < self.num_cols && row >= 0 && (row as usize) < self.num_rows
    }

    pub fn cell_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    //Shortcut when dealing with f64 values & nodata.  Handles the f32 band case
    //where the f64 comparison misses because of the widened rounding error.
    pub fn is_nodata(&self, value: f64) -> bool {
        match self.no_data_value {
            None => false,
            Some(nd) => {
                if value == nd || (value.is_nan() && nd.is_nan()) {
                    return true;
                }
                value as f32 == nd as f32
            }
        }
    }
}

pub struct Raster {
    pub path: PathBuf,
    pub stats: RasterStats,
    pub dataset: Dataset,
}

impl Raster {
    pub fn open(path: &Path) -> Result<Raster> {
        let dataset =
            Dataset::open(path).with_context(|| format!("opening raster {:?}", path))?;
        let stats = RasterStats::new(&dataset)?;

        Ok(Raster {
            path: path.to_path_buf(),
            stats,
            dataset,
        })
    }

    pub fn band(&self) -> Result<RasterBand> {
        Ok(self.dataset.rasterband(1)?)
    }

    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        let srs = self.dataset.spatial_ref()?;
        Ok(gis_order(srs))
    }

    /// Reads band 1 in row-major order, converting to f64
    pub fn read_band_f64(&self) -> Result<Vec<f64>> {
        let band = self.band()?;
        let size = (self.stats.num_cols, self.stats.num_rows);
        let mut data = vec![0f64; self.stats.num_cols * self.stats.num_rows];
        band.read_into_slice((0, 0), size, size, &mut data, None)?;
        Ok(data)
    }
}

/// All transforms in this crate run lon/lat (x, y) ordered coordinates
pub fn gis_order(mut srs: SpatialRef) -> SpatialRef {
    srs.set_axis_mapping_strategy(gdal::spatial_ref::AxisMappingStrategy::TraditionalGisOrder);
    srs
}

pub fn srs_from_epsg(epsg: u32) -> Result<SpatialRef> {
    Ok(gis_order(SpatialRef::from_epsg(epsg)?))
}

/// Creates a single band f32 GTiff with the given georeferencing.
/// The band is pre-filled with the NoData value when one is set.
pub fn create_raster(path: &Path, stats: &RasterStats) -> Result<Dataset> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<f32, _>(
        path,
        stats.num_cols,
        stats.num_rows,
        1,
    )?;

    dataset.set_geo_transform(&stats.geo_transform())?;
    dataset.set_projection(&stats.projection)?;

    if let Some(nd) = stats.no_data_value {
        let mut band = dataset.rasterband(1)?;
        band.set_no_data_value(Some(nd))?;
        band.fill(nd, None)?;
    }

    Ok(dataset)
}

pub fn write_band_f64(dataset: &mut Dataset, data: Vec<f64>) -> Result<()> {
    let (num_cols, num_rows) = dataset.raster_size();
    let mut band = dataset.rasterband(1)?;
    let mut buffer = Buffer::new((num_cols, num_rows), data);
    band.write((0, 0), (num_cols, num_rows), &mut buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> RasterStats {
        RasterStats {
            origin_x: 4.0,
            origin_y: 5.0,
            pixel_height: -2.0,
            pixel_width: 1.0,
            num_rows: 4,
            num_cols: 5,
            no_data_value: Some(3.2),
            projection: "".to_string(),
        }
    }

    #[test]
    fn test_coords() {
        let r = stats();

        assert_eq!(r.calc_col(4.0), 0);
        assert_eq!(r.calc_col(4.999), 0);
        assert_eq!(r.calc_col(5.0), 1);

        assert_eq!(r.calc_row(5.0), 0);
        assert_eq!(r.calc_row(3.5), 0);
        assert_eq!(r.calc_row(2.9), 1);

        assert_eq!(r.calc_center(0, 0), (4.5, 4.0));
        assert_eq!(r.right_x_coord(), 9.0);
        assert_eq!(r.bottom_y_coord(), -3.0);
    }

    #[test]
    fn test_contains_coord() {
        let r = stats();

        assert!(r.contains_coord(4.5, 4.0));
        assert!(!r.contains_coord(3.9, 4.0));
        assert!(!r.contains_coord(9.1, 4.0));
        assert!(!r.contains_coord(4.5, -3.5));
    }

    #[test]
    fn test_is_nodata() {
        let r = stats();

        assert!(r.is_nodata(3.2));
        //f32 rounding of the same marker still matches
        assert!(r.is_nodata(3.2f32 as f64));
        assert!(!r.is_nodata(0.0));

        let no_marker = RasterStats {
            no_data_value: None,
            ..stats()
        };
        assert!(!no_marker.is_nodata(3.2));
    }

    #[test]
    fn test_cell_area() {
        use float_cmp::approx_eq;
        assert!(approx_eq!(f64, stats().cell_area(), 2.0, ulps = 2));
    }
}
