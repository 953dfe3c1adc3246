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

//! Reconstructs segment polygons from visibility cell sets and enforces the
//! global geometric invariants: every segment is one valid polygon, clipped
//! to the search area, pairwise disjoint, with no segment nested inside
//! another.
//!
//! Multi-part geometry is never exported. Parts are stitched with a
//! conservative buffer open (never a convex hull, which would overlap the
//! neighbours), small severed parts are rescued into the nearest segment,
//! and fully nested segments are absorbed by union rather than subtracted.

use std::collections::HashSet;

use geo::{Area, Centroid, Contains, Coord, EuclideanDistance, MultiPolygon, Point, Polygon, Rect};
use geos::Geom;
use log::{error, info, warn};
use serde::Serialize;
use terrain_util::convert::{collect_polygons, geos_to_geo, multi_polygon_to_geos, polygon_to_geos};

use crate::access::AccessType;
use crate::control::{CancelToken, Progress};
use crate::crs::SQ_METERS_PER_ACRE;
use crate::dem::CellGrid;
use crate::error::Result;
use crate::segment::RawSegment;

/// Pairwise overlap above this area is reported by coverage validation
const OVERLAP_REPORT_M2: f64 = 1.0;

/// A segment with reconstructed geometry, still in the projected CRS
#[derive(Debug, Clone)]
pub struct BuiltSegment {
    pub sequence: usize,
    pub point_id: usize,
    pub launch_point: Point<f64>,
    pub polygon: Polygon<f64>,
    pub area_m2: f64,
    pub area_acres: f64,
    pub access_type: AccessType,
    pub cell_count: usize,
}

impl BuiltSegment {
    fn set_polygon(&mut self, polygon: Polygon<f64>) {
        self.area_m2 = polygon.unsigned_area();
        self.area_acres = self.area_m2 / SQ_METERS_PER_ACRE;
        self.polygon = polygon;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentOverlap {
    pub segment_a: usize,
    pub segment_b: usize,
    pub overlap_area_m2: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageValidation {
    pub coverage_percentage: f64,
    pub gap_percentage: f64,
    pub gap_area_m2: f64,
    pub overlap_count: usize,
    pub overlaps: Vec<SegmentOverlap>,
    pub is_complete: bool,
    pub validation_skipped: bool,
}

impl CoverageValidation {
    fn skipped() -> CoverageValidation {
        CoverageValidation {
            coverage_percentage: 0.0,
            gap_percentage: 0.0,
            gap_area_m2: 0.0,
            overlap_count: 0,
            overlaps: Vec::new(),
            is_complete: false,
            validation_skipped: true,
        }
    }
}

pub struct PolygonBuilder<'a> {
    grid: &'a CellGrid,
    pub simplify_tolerance: f64,
    pub min_hole_area: f64,
    pub min_part_area: f64,
    pub min_part_ratio: f64,
}

impl<'a> PolygonBuilder<'a> {
    pub fn new(grid: &'a CellGrid) -> PolygonBuilder<'a> {
        PolygonBuilder {
            grid,
            simplify_tolerance: 2.0,
            min_hole_area: 100.0,
            min_part_area: 1000.0,
            min_part_ratio: 0.05,
        }
    }

    pub fn with_simplify_tolerance(mut self, tolerance: f64) -> PolygonBuilder<'a> {
        self.simplify_tolerance = tolerance;
        self
    }

    /// Builds geometry for every planned segment, then runs the global
    /// reconciliation passes. Segments whose geometry vanishes are dropped
    /// and the survivors renumbered 1..N.
    pub fn build_all(
        &self,
        plan: &[RawSegment],
        grid_points: &[Coord<f64>],
        search_polygon: &Polygon<f64>,
        cancel: &CancelToken,
        progress: &Progress,
    ) -> Result<Vec<BuiltSegment>> {
        info!("Building polygons for {} segments", plan.len());

        let total = plan.len().max(1);
        let mut built = Vec::with_capacity(plan.len());

        for (idx, raw) in plan.iter().enumerate() {
            cancel.check()?;
            progress.report(
                &format!("Building segment polygons... ({}/{})", idx + 1, plan.len()),
                85 + ((idx * 4) / total) as u8,
            );

            let polygon = match self.build_segment_polygon(&raw.covered_cells, search_polygon)? {
                Some(p) => p,
                None => {
                    warn!("Segment {} produced no polygon, dropping", raw.sequence);
                    continue;
                }
            };

            let launch = match grid_points.get(raw.point_id) {
                Some(c) => Point::from(*c),
                None => {
                    error!("Segment {} has invalid point id {}", raw.sequence, raw.point_id);
                    continue;
                }
            };

            let area_m2 = polygon.unsigned_area();
            built.push(BuiltSegment {
                sequence: raw.sequence,
                point_id: raw.point_id,
                launch_point: launch,
                polygon,
                area_m2,
                area_acres: area_m2 / SQ_METERS_PER_ACRE,
                access_type: raw.access_type,
                cell_count: raw.cell_count,
            });
        }

        info!("Built {} segment polygons", built.len());

        let (mut segments, orphans) = self.remove_overlaps(built, cancel)?;
        self.rescue_small_parts(&mut segments, orphans)?;
        self.absorb_islands(&mut segments)?;
        self.check_centroid_containment(&segments);

        for (idx, segment) in segments.iter_mut().enumerate() {
            segment.sequence = idx + 1;
        }

        Ok(segments)
    }

    /// Cell set -> one valid polygon clipped to the search area, or None
    /// when nothing survives.
    fn build_segment_polygon(
        &self,
        cell_ids: &HashSet<usize>,
        search_polygon: &Polygon<f64>,
    ) -> Result<Option<Polygon<f64>>> {
        if cell_ids.is_empty() {
            return Ok(None);
        }

        let half_w = self.grid.pixel_width().abs() / 2.0;
        let half_h = self.grid.pixel_height().abs() / 2.0;

        let mut sorted_ids: Vec<usize> = cell_ids.iter().copied().collect();
        sorted_ids.sort_unstable();

        let mut cell_rects = Vec::with_capacity(sorted_ids.len());
        for cell_id in sorted_ids {
            if let Some(center) = self.grid.cell_center(cell_id) {
                cell_rects.push(
                    Rect::new(
                        Coord {
                            x: center.x - half_w,
                            y: center.y - half_h,
                        },
                        Coord {
                            x: center.x + half_w,
                            y: center.y + half_h,
                        },
                    )
                    .to_polygon(),
                );
            }
        }

        if cell_rects.is_empty() {
            return Ok(None);
        }

        let unified = union_all(&cell_rects)?;
        let mut merged = if unified.0.len() > 1 {
            info!(
                "Segment geometry has {} disconnected parts, applying buffer open",
                unified.0.len()
            );
            self.conservative_open(&unified)?
        } else {
            unified
        };

        // Clip to the search area
        let search_geos = polygon_to_geos(search_polygon)?;
        let clipped_geos = multi_polygon_to_geos(&merged)?.intersection(&search_geos)?;
        if clipped_geos.is_empty()? {
            return Ok(None);
        }
        merged = to_multi_polygon(&clipped_geos)?;
        if merged.0.len() > 1 {
            merged = self.conservative_open(&merged)?;
        }
        if merged.0.is_empty() {
            return Ok(None);
        }

        // Simplify, keeping ring topology intact
        if self.simplify_tolerance > 0.0 {
            let simplified = multi_polygon_to_geos(&merged)?
                .topology_preserve_simplify(self.simplify_tolerance)?;
            merged = to_multi_polygon(&simplified)?;
        }

        let repaired = ensure_valid(merged)?;

        let parts: Vec<Polygon<f64>> = repaired
            .0
            .into_iter()
            .map(|p| remove_small_holes(p, self.min_hole_area))
            .collect();

        Ok(match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            _ => Some(largest_part(parts, "segment")),
        })
    }

    /// Buffer out then most of the way back in. Stitches parts separated by
    /// less than ~0.6 pixel without expanding into neighbouring segments
    /// the way a convex hull would.
    fn conservative_open(&self, multi_polygon: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        let distance = self.grid.pixel_width().abs() * 0.3;

        let opened = multi_polygon_to_geos(multi_polygon)?
            .buffer(distance, 8)?
            .buffer(-distance * 0.9, 8)?;
        let result = to_multi_polygon(&opened)?;

        if result.0.len() > 1 {
            info!(
                "Buffer open left {} parts (kept, no convex hull)",
                result.0.len()
            );
        }

        Ok(result)
    }

    /// Pass 1: subtract earlier segments from later ones in sequence order.
    /// Severed small parts are returned for the rescue pass.
    fn remove_overlaps(
        &self,
        segments: Vec<BuiltSegment>,
        cancel: &CancelToken,
    ) -> Result<(Vec<BuiltSegment>, Vec<Polygon<f64>>)> {
        info!("Removing overlaps between {} segments", segments.len());

        let mut kept: Vec<BuiltSegment> = Vec::with_capacity(segments.len());
        let mut orphans: Vec<Polygon<f64>> = Vec::new();
        let mut previous_union: Option<geos::Geometry> = None;

        for mut segment in segments {
            cancel.check()?;

            let original_area = segment.area_m2;
            let geometry = polygon_to_geos(&segment.polygon)?;

            let remaining = match &previous_union {
                None => geometry,
                Some(union) => geometry.difference(union)?,
            };

            if remaining.is_empty()? {
                warn!(
                    "Segment {} entirely overlapped by earlier segments, dropping",
                    segment.sequence
                );
                continue;
            }

            let multi = ensure_valid(to_multi_polygon(&remaining)?)?;
            if multi.0.is_empty() {
                warn!(
                    "Segment {} left no polygonal area after overlap removal, dropping",
                    segment.sequence
                );
                continue;
            }

            let parts: Vec<Polygon<f64>> = multi
                .0
                .into_iter()
                .map(|p| remove_small_holes(p, self.min_hole_area))
                .collect();

            let (polygon, removed) = self.consolidate_parts(parts, segment.sequence);
            orphans.extend(removed);

            segment.set_polygon(polygon);

            let loss_pct = if original_area > 0.0 {
                (original_area - segment.area_m2) / original_area * 100.0
            } else {
                0.0
            };
            if loss_pct > 1.0 {
                info!(
                    "Segment {}: removed {:.1}% overlap ({:.0} -> {:.0} m2)",
                    segment.sequence, loss_pct, original_area, segment.area_m2
                );
            }

            let geometry = polygon_to_geos(&segment.polygon)?;
            previous_union = Some(match previous_union {
                None => geometry,
                Some(union) => union.union(&geometry)?,
            });

            kept.push(segment);
        }

        info!("Overlap removal kept {} segments", kept.len());

        Ok((kept, orphans))
    }

    /// Multi-part -> single polygon. Parts below both thresholds are
    /// removed; if more than one qualifying part remains, the largest wins.
    /// Everything discarded is handed back so the rescue pass can preserve
    /// the coverage.
    fn consolidate_parts(
        &self,
        mut parts: Vec<Polygon<f64>>,
        sequence: usize,
    ) -> (Polygon<f64>, Vec<Polygon<f64>>) {
        if parts.len() == 1 {
            return (parts.remove(0), Vec::new());
        }

        let total_area: f64 = parts.iter().map(|p| p.unsigned_area()).sum();
        parts.sort_by(|a, b| {
            b.unsigned_area()
                .partial_cmp(&a.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut qualified = Vec::new();
        let mut discarded = Vec::new();
        for part in parts {
            let area = part.unsigned_area();
            let ratio = if total_area > 0.0 { area / total_area } else { 0.0 };
            if area >= self.min_part_area || ratio >= self.min_part_ratio {
                qualified.push(part);
            } else {
                discarded.push(part);
            }
        }

        if !discarded.is_empty() {
            let discarded_area: f64 = discarded.iter().map(|p| p.unsigned_area()).sum();
            info!(
                "Segment {}: split off {} small part(s) totalling {:.0} m2",
                sequence,
                discarded.len(),
                discarded_area
            );
        }

        if qualified.is_empty() {
            // Largest original part survives no matter what
            let winner = discarded.remove(0);
            return (winner, discarded);
        }

        let winner = qualified.remove(0);
        if !qualified.is_empty() {
            info!(
                "Segment {}: {} qualifying part(s) beyond the largest split off for rescue",
                sequence,
                qualified.len()
            );
            discarded.extend(qualified);
        }

        (winner, discarded)
    }

    /// Pass 2: every part severed by consolidation is unioned into the
    /// segment nearest to its centroid, preserving coverage.
    fn rescue_small_parts(
        &self,
        segments: &mut [BuiltSegment],
        orphans: Vec<Polygon<f64>>,
    ) -> Result<()> {
        if segments.is_empty() || orphans.is_empty() {
            return Ok(());
        }

        info!("Rescuing {} severed part(s) into nearest segments", orphans.len());

        for orphan in orphans {
            let centroid = match orphan.centroid() {
                Some(c) => c,
                None => continue,
            };

            let mut nearest: Option<(usize, f64)> = None;
            for (idx, segment) in segments.iter().enumerate() {
                let distance = segment.polygon.euclidean_distance(&centroid);
                if nearest.map_or(true, |(_, best)| distance < best) {
                    nearest = Some((idx, distance));
                }
            }

            let (idx, _) = match nearest {
                Some(n) => n,
                None => continue,
            };

            let merged = polygon_to_geos(&segments[idx].polygon)?
                .union(&polygon_to_geos(&orphan)?)?;
            let multi = ensure_valid(to_multi_polygon(&merged)?)?;

            let polygon = match multi.0.len() {
                0 => continue,
                1 => multi.0.into_iter().next().unwrap(),
                _ => {
                    let opened = self.conservative_open(&multi)?;
                    match opened.0.len() {
                        0 => continue,
                        1 => opened.0.into_iter().next().unwrap(),
                        _ => largest_part(opened.0, "rescue receiver"),
                    }
                }
            };

            segments[idx].set_polygon(polygon);
        }

        Ok(())
    }

    /// Pass 3: a segment lying wholly inside another is absorbed by union,
    /// never subtracted. Repeats until no nested pair remains.
    fn absorb_islands(&self, segments: &mut Vec<BuiltSegment>) -> Result<()> {
        loop {
            let mut nested: Option<(usize, usize)> = None;

            'search: for outer in 0..segments.len() {
                for inner in 0..segments.len() {
                    if outer == inner {
                        continue;
                    }
                    if segments[outer].polygon.contains(&segments[inner].polygon) {
                        nested = Some((outer, inner));
                        break 'search;
                    }
                }
            }

            let (outer, inner) = match nested {
                Some(pair) => pair,
                None => return Ok(()),
            };

            info!(
                "Segment {} lies inside segment {}, absorbing by union",
                segments[inner].sequence, segments[outer].sequence
            );

            let merged = polygon_to_geos(&segments[outer].polygon)?
                .union(&polygon_to_geos(&segments[inner].polygon)?)?;
            let multi = ensure_valid(to_multi_polygon(&merged)?)?;

            let polygon = match multi.0.len() {
                0 => segments[outer].polygon.clone(),
                1 => remove_small_holes(
                    multi.0.into_iter().next().unwrap(),
                    self.min_hole_area,
                ),
                _ => largest_part(multi.0, "island absorption"),
            };

            segments[outer].set_polygon(polygon);
            segments.remove(inner);
        }
    }

    /// Final validation: no segment polygon may contain another segment's
    /// centroid. Violations are logged, not fatal.
    fn check_centroid_containment(&self, segments: &[BuiltSegment]) {
        for a in segments {
            for b in segments {
                if a.sequence == b.sequence {
                    continue;
                }
                if let Some(centroid) = b.polygon.centroid() {
                    if a.polygon.contains(&centroid) {
                        warn!(
                            "Segment {} contains the centroid of segment {}; geometry may be degenerate",
                            a.sequence, b.sequence
                        );
                    }
                }
            }
        }
    }

    /// Unions all segments and reports coverage, gaps, and pairwise
    /// overlaps against the search polygon. A union failure degrades to a
    /// skipped report rather than failing the pipeline.
    pub fn validate_coverage(
        &self,
        segments: &[BuiltSegment],
        search_polygon: &Polygon<f64>,
    ) -> CoverageValidation {
        match self.try_validate(segments, search_polygon) {
            Ok(validation) => validation,
            Err(e) => {
                error!("Coverage validation failed, reporting degraded result: {}", e);
                CoverageValidation::skipped()
            }
        }
    }

    fn try_validate(
        &self,
        segments: &[BuiltSegment],
        search_polygon: &Polygon<f64>,
    ) -> Result<CoverageValidation> {
        let search = polygon_to_geos(search_polygon)?;
        let search_area = search.area()?;

        let mut repaired = Vec::with_capacity(segments.len());
        for segment in segments {
            let g = polygon_to_geos(&segment.polygon)?;
            repaired.push(if g.is_valid() {
                g
            } else {
                warn!("Segment {} invalid before union, repairing", segment.sequence);
                g.buffer(0.0, 8)?
            });
        }

        let (coverage_area, gap_area) = if repaired.is_empty() {
            (0.0, search_area)
        } else {
            let collection = geos::Geometry::create_geometry_collection(repaired)?;
            let union = collection.unary_union()?;
            (
                search.intersection(&union)?.area()?,
                search.difference(&union)?.area()?,
            )
        };

        let coverage_percentage = if search_area > 0.0 {
            coverage_area / search_area * 100.0
        } else {
            0.0
        };
        let gap_percentage = if search_area > 0.0 {
            gap_area / search_area * 100.0
        } else {
            0.0
        };

        let mut overlaps = Vec::new();
        for i in 0..segments.len() {
            let gi = polygon_to_geos(&segments[i].polygon)?;
            for j in (i + 1)..segments.len() {
                let gj = polygon_to_geos(&segments[j].polygon)?;
                let overlap_area = gi.intersection(&gj)?.area()?;
                if overlap_area > OVERLAP_REPORT_M2 {
                    overlaps.push(SegmentOverlap {
                        segment_a: segments[i].sequence,
                        segment_b: segments[j].sequence,
                        overlap_area_m2: overlap_area,
                    });
                }
            }
        }

        info!(
            "Coverage validation: {:.2}% covered, {:.2}% gaps, {} overlaps",
            coverage_percentage,
            gap_percentage,
            overlaps.len()
        );

        let overlap_count = overlaps.len();
        overlaps.truncate(10);

        Ok(CoverageValidation {
            coverage_percentage,
            gap_percentage,
            gap_area_m2: gap_area,
            overlap_count,
            overlaps,
            is_complete: coverage_percentage >= 99.0,
            validation_skipped: false,
        })
    }
}

/// Union of many polygons via GEOS
fn union_all(polygons: &[Polygon<f64>]) -> Result<MultiPolygon<f64>> {
    let multi = MultiPolygon(polygons.to_vec());
    let unioned = multi_polygon_to_geos(&multi)?.unary_union()?;
    to_multi_polygon(&unioned)
}

/// Any polygonal geometry -> MultiPolygon, dropping lower dimensional bits
fn to_multi_polygon(geometry: &geos::Geometry) -> Result<MultiPolygon<f64>> {
    if geometry.is_empty()? {
        return Ok(MultiPolygon(Vec::new()));
    }

    let mut polygons = Vec::new();
    collect_polygons(geos_to_geo(geometry)?, &mut polygons);
    Ok(MultiPolygon(polygons))
}

/// Zero-width buffer repair, applied only when the geometry is invalid
fn ensure_valid(multi_polygon: MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    if multi_polygon.0.is_empty() {
        return Ok(multi_polygon);
    }

    let geometry = multi_polygon_to_geos(&multi_polygon)?;
    if geometry.is_valid() {
        return Ok(multi_polygon);
    }

    warn!("Repairing invalid segment geometry with zero-width buffer");
    let repaired = geometry.buffer(0.0, 8)?;
    to_multi_polygon(&repaired)
}

/// Fills interior rings below `min_hole_area`; larger holes are kept
fn remove_small_holes(polygon: Polygon<f64>, min_hole_area: f64) -> Polygon<f64> {
    if polygon.interiors().is_empty() {
        return polygon;
    }

    let (exterior, interiors) = polygon.into_inner();
    let kept: Vec<_> = interiors
        .into_iter()
        .filter(|ring| Polygon::new(ring.clone(), Vec::new()).unsigned_area() >= min_hole_area)
        .collect();

    Polygon::new(exterior, kept)
}

/// Largest part wins; the rest is logged and discarded
fn largest_part(mut parts: Vec<Polygon<f64>>, label: &str) -> Polygon<f64> {
    parts.sort_by(|a, b| {
        b.unsigned_area()
            .partial_cmp(&a.unsigned_area())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total: f64 = parts.iter().map(|p| p.unsigned_area()).sum();
    let winner = parts.remove(0);
    if !parts.is_empty() {
        let discarded: f64 = parts.iter().map(|p| p.unsigned_area()).sum();
        info!(
            "{}: collapsed {} part(s) to largest, discarding {:.0} m2 ({:.1}%)",
            label,
            parts.len() + 1,
            discarded,
            if total > 0.0 { discarded / total * 100.0 } else { 0.0 }
        );
    }

    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn grid() -> CellGrid {
        // 10m cells covering x 0..100, y 0..100
        CellGrid::new([0.0, 10.0, 0.0, 100.0, 0.0, -10.0], 10, 10, 32610)
    }

    fn search_all() -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ]
    }

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
        polygon![
            (x: min_x, y: min_y),
            (x: max_x, y: min_y),
            (x: max_x, y: max_y),
            (x: min_x, y: max_y),
        ]
    }

    fn segment(sequence: usize, polygon: Polygon<f64>) -> BuiltSegment {
        let area = polygon.unsigned_area();
        BuiltSegment {
            sequence,
            point_id: sequence - 1,
            launch_point: polygon.centroid().unwrap(),
            polygon,
            area_m2: area,
            area_acres: area / SQ_METERS_PER_ACRE,
            access_type: AccessType::Anywhere,
            cell_count: 0,
        }
    }

    #[test]
    fn test_block_of_cells_becomes_one_polygon() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        // 2x2 block in the top-left corner: ids 0, 1, 10, 11
        let cells: HashSet<usize> = [0, 1, 10, 11].into_iter().collect();
        let poly = builder
            .build_segment_polygon(&cells, &search_all())
            .unwrap()
            .unwrap();

        let area = poly.unsigned_area();
        assert!((area - 400.0).abs() < 1.0, "area was {}", area);
    }

    #[test]
    fn test_distant_cells_collapse_to_largest_part() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        // Two far-apart single cells; the buffer open cannot stitch them
        let cells: HashSet<usize> = [0, 99].into_iter().collect();
        let poly = builder
            .build_segment_polygon(&cells, &search_all())
            .unwrap()
            .unwrap();

        let area = poly.unsigned_area();
        assert!(area < 150.0, "multi-part leaked through: area {}", area);
    }

    #[test]
    fn test_clip_to_search_polygon() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        // whole top row of cells, but the search polygon only covers
        // x < 50: half the row must be clipped away
        let cells: HashSet<usize> = (0..10).collect();
        let half_search = square(0.0, 0.0, 50.0, 100.0);

        let poly = builder
            .build_segment_polygon(&cells, &half_search)
            .unwrap()
            .unwrap();

        let area = poly.unsigned_area();
        assert!((area - 500.0).abs() < 5.0, "area was {}", area);
    }

    #[test]
    fn test_remove_small_holes() {
        let outer = LineStringHelper::ring(0.0, 0.0, 100.0, 100.0);
        let small_hole = LineStringHelper::ring(10.0, 10.0, 15.0, 15.0); // 25 m2
        let big_hole = LineStringHelper::ring(50.0, 50.0, 80.0, 80.0); // 900 m2

        let poly = Polygon::new(outer, vec![small_hole, big_hole]);
        let cleaned = remove_small_holes(poly, 100.0);

        assert_eq!(cleaned.interiors().len(), 1);
        let kept_area = Polygon::new(cleaned.interiors()[0].clone(), Vec::new()).unsigned_area();
        assert!((kept_area - 900.0).abs() < 1.0);
    }

    #[test]
    fn test_consolidate_parts_thresholds() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let big = square(0.0, 0.0, 80.0, 80.0); // 6400 m2
        let small = square(90.0, 90.0, 95.0, 95.0); // 25 m2, < 5% and < 1000 m2

        let (winner, removed) = builder.consolidate_parts(vec![big, small], 1);

        assert!((winner.unsigned_area() - 6400.0).abs() < 1.0);
        assert_eq!(removed.len(), 1);
        assert!((removed[0].unsigned_area() - 25.0).abs() < 1.0);
    }

    #[test]
    fn test_consolidate_keeps_largest_when_all_small() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let a = square(0.0, 0.0, 3.0, 3.0); // 9 m2
        let b = square(10.0, 10.0, 12.0, 12.0); // 4 m2

        // ratio threshold qualifies the 9 m2 part (9/13 > 5%), so the
        // largest still wins and the other goes to rescue
        let (winner, removed) = builder.consolidate_parts(vec![a, b], 1);
        assert!((winner.unsigned_area() - 9.0).abs() < 0.5);
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn test_overlap_removal_sequence_priority() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        // second segment overlaps the first by a 20x40 strip
        let first = segment(1, square(0.0, 0.0, 50.0, 40.0));
        let second = segment(2, square(30.0, 0.0, 80.0, 40.0));

        let (kept, _orphans) = builder
            .remove_overlaps(vec![first, second], &CancelToken::new())
            .unwrap();

        assert_eq!(kept.len(), 2);
        // first keeps its full area, second loses the overlap
        assert!((kept[0].area_m2 - 2000.0).abs() < 1.0);
        assert!((kept[1].area_m2 - 1200.0).abs() < 1.0);

        // pairwise overlap is below the reporting epsilon
        let inter = polygon_to_geos(&kept[0].polygon)
            .unwrap()
            .intersection(&polygon_to_geos(&kept[1].polygon).unwrap())
            .unwrap();
        assert!(inter.area().unwrap() < 1.0);
    }

    #[test]
    fn test_fully_overlapped_segment_dropped() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let first = segment(1, square(0.0, 0.0, 60.0, 60.0));
        let swallowed = segment(2, square(10.0, 10.0, 30.0, 30.0));

        let (kept, _) = builder
            .remove_overlaps(vec![first, swallowed], &CancelToken::new())
            .unwrap();

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].sequence, 1);
    }

    #[test]
    fn test_rescue_small_parts_preserves_coverage() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let mut segments = vec![
            segment(1, square(0.0, 0.0, 40.0, 40.0)),
            segment(2, square(60.0, 60.0, 100.0, 100.0)),
        ];

        // orphan adjacent to segment 1
        let orphan = square(40.0, 0.0, 45.0, 40.0);
        let orphan_area = orphan.unsigned_area();
        let before = segments[0].area_m2;

        builder
            .rescue_small_parts(&mut segments, vec![orphan])
            .unwrap();

        assert!((segments[0].area_m2 - (before + orphan_area)).abs() < 1.0);
        // the far segment is untouched
        assert!((segments[1].area_m2 - 1600.0).abs() < 1.0);
    }

    #[test]
    fn test_island_absorbed_by_union() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let outer = segment(1, square(0.0, 0.0, 80.0, 80.0));
        let island = segment(2, square(20.0, 20.0, 40.0, 40.0));
        let outer_area = outer.area_m2;

        let mut segments = vec![outer, island];
        builder.absorb_islands(&mut segments).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].sequence, 1);
        // union with a contained polygon does not change the area
        assert!((segments[0].area_m2 - outer_area).abs() < 1.0);
    }

    #[test]
    fn test_disjoint_segments_not_absorbed() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let mut segments = vec![
            segment(1, square(0.0, 0.0, 40.0, 40.0)),
            segment(2, square(60.0, 60.0, 100.0, 100.0)),
        ];

        builder.absorb_islands(&mut segments).unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_validate_coverage_disjoint() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let segments = vec![
            segment(1, square(0.0, 0.0, 50.0, 100.0)),
            segment(2, square(50.0, 0.0, 100.0, 100.0)),
        ];

        let validation = builder.validate_coverage(&segments, &search_all());

        assert!(!validation.validation_skipped);
        assert!(validation.coverage_percentage > 99.0);
        assert!(validation.gap_percentage < 1.0);
        assert_eq!(validation.overlap_count, 0);
        assert!(validation.is_complete);
    }

    #[test]
    fn test_validate_coverage_reports_overlap_and_gap() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);

        let segments = vec![
            segment(1, square(0.0, 0.0, 60.0, 100.0)),
            segment(2, square(40.0, 0.0, 80.0, 100.0)),
        ];

        let validation = builder.validate_coverage(&segments, &search_all());

        assert_eq!(validation.overlap_count, 1);
        assert!((validation.overlaps[0].overlap_area_m2 - 2000.0).abs() < 1.0);
        // x > 80 is uncovered
        assert!(validation.gap_percentage > 19.0);
        assert!(!validation.is_complete);
    }

    #[test]
    fn test_build_all_renumbers_after_drop() {
        let g = grid();
        let builder = PolygonBuilder::new(&g);
        let grid_points = vec![
            Coord { x: 25.0, y: 75.0 },
            Coord { x: 25.0, y: 70.0 },
            Coord { x: 75.0, y: 25.0 },
        ];

        // segment 2's cells are a subset of segment 1's: it is dropped by
        // overlap removal and segment 3 must renumber to sequence 2
        let top_left: HashSet<usize> = (0..5)
            .flat_map(|row| (0..5).map(move |col| row * 10 + col))
            .collect();
        let subset: HashSet<usize> = [11, 12, 21, 22].into_iter().collect();
        let bottom_right: HashSet<usize> = (5..10)
            .flat_map(|row| (5..10).map(move |col| row * 10 + col))
            .collect();

        let plan = vec![
            RawSegment {
                sequence: 1,
                point_id: 0,
                covered_cells: top_left,
                access_type: AccessType::Anywhere,
                cell_count: 25,
            },
            RawSegment {
                sequence: 2,
                point_id: 1,
                covered_cells: subset,
                access_type: AccessType::Anywhere,
                cell_count: 4,
            },
            RawSegment {
                sequence: 3,
                point_id: 2,
                covered_cells: bottom_right,
                access_type: AccessType::Anywhere,
                cell_count: 25,
            },
        ];

        let built = builder
            .build_all(
                &plan,
                &grid_points,
                &search_all(),
                &CancelToken::new(),
                &Progress::none(),
            )
            .unwrap();

        assert_eq!(built.len(), 2);
        assert_eq!(built[0].sequence, 1);
        assert_eq!(built[1].sequence, 2);
        assert_eq!(built[1].point_id, 2);

        for segment in &built {
            assert!((segment.area_acres * SQ_METERS_PER_ACRE - segment.area_m2).abs() < 0.01);
        }
    }

    // small helper to build rectangular rings without repeating coordinates
    struct LineStringHelper;
    impl LineStringHelper {
        fn ring(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> geo::LineString<f64> {
            geo::LineString::from(vec![
                (min_x, min_y),
                (max_x, min_y),
                (max_x, max_y),
                (min_x, max_y),
                (min_x, min_y),
            ])
        }
    }
}
