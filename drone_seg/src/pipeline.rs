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

//! Pipeline orchestration: config in, ordered segment records out.
//!
//! The pipeline is a synchronous function of its configuration with two
//! injected capabilities: a cancellation token observed at stage
//! boundaries and inside the long loops, and an optional progress
//! callback. The surrounding service runs it on a worker thread.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use geo::{Contains, Coord, Point, Polygon};
use itertools::Itertools;
use log::info;
use serde::Serialize;
use terrain_util::util::format_duration;
use terrain_util::vector::{coord_transform, transform_polygon, transform_xy};

use crate::access::{AccessFilter, AccessType};
use crate::config::PipelineConfig;
use crate::control::{CancelToken, Progress, ProgressFn};
use crate::crs::{self, SQ_METERS_PER_ACRE, WGS84_EPSG};
use crate::dem::DemProcessor;
use crate::error::{PipelineError, Result};
use crate::grid;
use crate::polygon::{BuiltSegment, CoverageValidation, PolygonBuilder};
use crate::segment::{self, PlanStatistics};
use crate::viewshed::{self, GdalViewshed};

/// A finished segment in WGS84. Areas were computed in the projected CRS
/// before the transform and carried through unchanged.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub sequence: usize,
    pub point_id: usize,
    pub polygon: Polygon<f64>,
    pub launch_point: Point<f64>,
    pub area_m2: f64,
    pub area_acres: f64,
    pub access_type: AccessType,
    pub cell_count: usize,
}

impl SegmentRecord {
    /// Segment polygon as a GeoJSON feature
    pub fn to_feature(&self) -> geojson::Feature {
        let mut properties = serde_json::Map::new();
        properties.insert("kind".to_string(), "segment".into());
        properties.insert("sequence".to_string(), self.sequence.into());
        properties.insert("area_acres".to_string(), self.area_acres.into());
        properties.insert("area_m2".to_string(), self.area_m2.into());
        properties.insert(
            "access_type".to_string(),
            self.access_type.to_string().into(),
        );
        properties.insert("cell_count".to_string(), self.cell_count.into());

        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&self.polygon))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    /// Launch point as a GeoJSON feature
    pub fn launch_point_feature(&self) -> geojson::Feature {
        let mut properties = serde_json::Map::new();
        properties.insert("kind".to_string(), "launch_point".into());
        properties.insert("sequence".to_string(), self.sequence.into());
        properties.insert(
            "access_type".to_string(),
            self.access_type.to_string().into(),
        );

        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(
                &self.launch_point,
            ))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatistics {
    pub total_segments: usize,
    pub grid_points_generated: usize,
    pub primary_points: usize,
    pub secondary_points: usize,
    pub utm_epsg: u32,
    pub accessible_area_pct: f64,
    pub uncovered_cells: usize,
    pub plan: PlanStatistics,
}

pub struct PipelineOutput {
    pub project_id: String,
    pub segments: Vec<SegmentRecord>,
    pub validation: CoverageValidation,
    pub statistics: PipelineStatistics,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Pipeline {
        Pipeline { config }
    }

    pub fn execute(
        &self,
        cancel: &CancelToken,
        progress_callback: Option<&ProgressFn>,
    ) -> Result<PipelineOutput> {
        let progress = Progress::new(progress_callback);
        let started = Instant::now();
        let config = &self.config;

        info!("Starting pipeline for project {}", config.project_id);

        let search_wgs84 = config.validate()?;

        // Step 1: pick the working CRS and project the polygon
        cancel.check()?;
        progress.report("Determining coordinate system", 2);
        let (utm_epsg, search_proj) = crs::project_polygon(&search_wgs84)?;

        // Step 2: prepare the surface raster
        cancel.check()?;
        progress.report("Processing DEM", 5);
        let dem = DemProcessor::new(
            &config.dem_path,
            config.vegetation_path.as_deref(),
            &config.output_dir,
        )
        .process(&search_proj, utm_epsg, config.max_vlos_m)?;

        // Step 3: candidate launch points
        cancel.check()?;
        progress.report("Generating candidate grid", 20);
        let grid_points = grid::generate_grid(
            &search_proj,
            config.grid_spacing_m,
            grid::MAX_GRID_POINTS,
        );
        if grid_points.is_empty() {
            return Err(PipelineError::GridEmpty);
        }
        log_grid_bounds(&grid_points);

        // Step 4: access classification
        cancel.check()?;
        progress.report("Classifying access", 25);
        let access_types: HashSet<AccessType> = config.access_types.iter().copied().collect();
        let filter = AccessFilter::load(
            config.roads_path.as_deref(),
            config.trails_path.as_deref(),
            utm_epsg,
            &access_types,
            config.access_deviation_m,
        )?;
        let (primary, secondary) = filter.classify(&grid_points, &access_types);
        let accessible_area_pct = filter.accessible_area_pct(&search_proj, &access_types)?;

        // Step 5: viewsheds, fanned out over the candidate points
        cancel.check()?;
        progress.report("Computing viewsheds", 30);
        let operator = GdalViewshed::new(&dem, &config.output_dir);
        let viewsheds = viewshed::compute_batch(
            &operator,
            &grid_points,
            config.drone_agl_altitude,
            config.max_vlos_m,
            config.max_workers,
            cancel,
            |done, total| {
                progress.report(
                    &format!("Computing viewsheds... ({}/{})", done, total),
                    (30 + done * 50 / total.max(1)).min(80) as u8,
                );
            },
        )?;

        // Step 6: greedy segment selection over polygon-clipped visibility
        cancel.check()?;
        let target_cells: HashSet<usize> = dem
            .grid
            .centroids()
            .filter(|(_, c)| search_proj.contains(&Point::from(*c)))
            .map(|(id, _)| id)
            .collect();
        info!("{} target cells inside the search polygon", target_cells.len());

        let mut visibility: HashMap<usize, HashSet<usize>> =
            HashMap::with_capacity(viewsheds.len());
        for (point_id, vs) in viewsheds.iter().enumerate() {
            visibility.insert(
                point_id,
                vs.cells.intersection(&target_cells).copied().collect(),
            );
        }

        let access_map: HashMap<usize, AccessType> = primary.iter().copied().collect();
        let primary_ids: HashSet<usize> = primary.iter().map(|(id, _)| *id).collect();

        let preferred_cells = ((config.preferred_segment_size_acres * SQ_METERS_PER_ACRE)
            / dem.grid.cell_area()) as usize;

        progress.report("Generating segments", 80);
        let plan = segment::generate_segments(
            grid_points.len(),
            &visibility,
            &access_map,
            &primary_ids,
            &target_cells,
            Some(preferred_cells.max(1)),
            &config.selection_weights,
            cancel,
            &progress,
        )?;

        // Step 7: geometry reconstruction and reconciliation
        progress.report("Building segment polygons", 85);
        let builder = PolygonBuilder::new(&dem.grid)
            .with_simplify_tolerance(config.simplify_tolerance_m);
        let built = builder.build_all(
            &plan.segments,
            &grid_points,
            &search_proj,
            cancel,
            &progress,
        )?;

        // Step 8: WGS84 output records (validation still sees projected data)
        cancel.check()?;
        let records = transform_to_wgs84(&built, utm_epsg, &progress)?;

        // Step 9: coverage report
        progress.report("Validating coverage", 95);
        let validation = builder.validate_coverage(&built, &search_proj);

        let statistics = PipelineStatistics {
            total_segments: records.len(),
            grid_points_generated: grid_points.len(),
            primary_points: primary.len(),
            secondary_points: secondary.len(),
            utm_epsg,
            accessible_area_pct,
            uncovered_cells: plan.uncovered.len(),
            plan: segment::plan_statistics(&plan, dem.grid.cell_area()),
        };

        progress.report("Complete", 100);
        info!(
            "Pipeline finished for project {} in {}: {} segments",
            config.project_id,
            format_duration(started.elapsed()),
            records.len()
        );

        Ok(PipelineOutput {
            project_id: config.project_id.clone(),
            segments: records,
            validation,
            statistics,
        })
    }
}

fn log_grid_bounds(points: &[Coord<f64>]) {
    let xs = points.iter().map(|p| p.x).minmax().into_option();
    let ys = points.iter().map(|p| p.y).minmax().into_option();
    if let (Some((min_x, max_x)), Some((min_y, max_y))) = (xs, ys) {
        info!(
            "{} grid points, X [{:.1}, {:.1}], Y [{:.1}, {:.1}]",
            points.len(),
            min_x,
            max_x,
            min_y,
            max_y
        );
    }
}

/// Projects segment polygons and launch points into WGS84. Areas stay as
/// computed in the metric CRS.
fn transform_to_wgs84(
    segments: &[BuiltSegment],
    from_epsg: u32,
    progress: &Progress,
) -> Result<Vec<SegmentRecord>> {
    let transform = coord_transform(from_epsg, WGS84_EPSG)?;
    let total = segments.len().max(1);
    let mut records = Vec::with_capacity(segments.len());

    for (idx, segment) in segments.iter().enumerate() {
        progress.report(
            &format!("Transforming to WGS84... ({}/{})", idx + 1, segments.len()),
            90 + ((idx * 4) / total) as u8,
        );

        let polygon = transform_polygon(&transform, &segment.polygon)?;
        let (lon, lat) = transform_xy(
            &transform,
            segment.launch_point.x(),
            segment.launch_point.y(),
        )?;

        records.push(SegmentRecord {
            sequence: segment.sequence,
            point_id: segment.point_id,
            polygon,
            launch_point: Point::new(lon, lat),
            area_m2: segment.area_m2,
            area_acres: segment.area_acres,
            access_type: segment.access_type,
            cell_count: segment.cell_count,
        });
    }

    Ok(records)
}
