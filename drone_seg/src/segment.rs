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

//! Greedy weighted max-coverage selection of search segments.
//!
//! Runs in two phases: access-compliant (primary) candidates first, then the
//! remaining candidates for whatever the primary set could not see.

use std::collections::{HashMap, HashSet};

use log::{info, warn};
use serde::Deserialize;

use crate::access::AccessType;
use crate::control::{CancelToken, Progress};
use crate::crs::SQ_METERS_PER_ACRE;
use crate::error::Result;

/// Scoring knobs for the greedy loop. A candidate's base score is its fresh
/// coverage; segments far above the preferred size are penalized and
/// segments near it get a bonus.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    /// Penalty kicks in above `oversize_ratio * preferred`
    pub oversize_ratio: f64,
    pub oversize_penalty: f64,
    /// Bonus band, as a ratio of the preferred size
    pub size_bonus_low: f64,
    pub size_bonus_high: f64,
    pub size_bonus: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        SelectionWeights {
            oversize_ratio: 1.5,
            oversize_penalty: 0.8,
            size_bonus_low: 0.7,
            size_bonus_high: 1.3,
            size_bonus: 1.2,
        }
    }
}

impl SelectionWeights {
    fn score(&self, gain: usize, preferred: Option<usize>) -> f64 {
        let mut score = gain as f64;

        if let Some(preferred) = preferred {
            let preferred = preferred as f64;
            if gain as f64 > preferred * self.oversize_ratio {
                score *= self.oversize_penalty;
            }
            let ratio = gain as f64 / preferred;
            if ratio >= self.size_bonus_low && ratio <= self.size_bonus_high {
                score *= self.size_bonus;
            }
        }

        score
    }
}

#[derive(Debug, Clone)]
pub struct RawSegment {
    /// 1-based selection order
    pub sequence: usize,
    pub point_id: usize,
    pub covered_cells: HashSet<usize>,
    pub access_type: AccessType,
    pub cell_count: usize,
}

#[derive(Debug)]
pub struct SegmentPlan {
    pub segments: Vec<RawSegment>,
    /// Target cells no candidate could see
    pub uncovered: HashSet<usize>,
    pub target_cell_count: usize,
}

/// Two-phase greedy max-coverage over the candidate visibility sets.
///
/// Visibility sets must already be intersected with the search polygon.
/// Ties are broken toward the lowest point id, making the selection
/// deterministic for identical inputs.
pub fn generate_segments(
    point_count: usize,
    visibility: &HashMap<usize, HashSet<usize>>,
    access: &HashMap<usize, AccessType>,
    primary: &HashSet<usize>,
    target_cells: &HashSet<usize>,
    preferred_size_cells: Option<usize>,
    weights: &SelectionWeights,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<SegmentPlan> {
    info!(
        "Greedy segment generation: {} target cells, {} candidates ({} primary)",
        target_cells.len(),
        point_count,
        primary.len()
    );

    let mut uncovered: HashSet<usize> = target_cells.clone();
    let mut chosen: Vec<(usize, HashSet<usize>)> = Vec::new();

    // Phase 1: access-compliant points
    let primary_candidates: Vec<usize> = (0..point_count).filter(|p| primary.contains(p)).collect();
    greedy_selection(
        &primary_candidates,
        visibility,
        &mut uncovered,
        preferred_size_cells,
        weights,
        target_cells.len(),
        &mut chosen,
        cancel,
        progress,
    )?;
    info!(
        "Phase 1 complete: {} segments, {} cells remaining",
        chosen.len(),
        uncovered.len()
    );

    // Phase 2: everything else, only if gaps remain
    if !uncovered.is_empty() {
        let phase1_count = chosen.len();
        let secondary_candidates: Vec<usize> =
            (0..point_count).filter(|p| !primary.contains(p)).collect();
        greedy_selection(
            &secondary_candidates,
            visibility,
            &mut uncovered,
            preferred_size_cells,
            weights,
            target_cells.len(),
            &mut chosen,
            cancel,
            progress,
        )?;
        info!(
            "Phase 2 complete: {} segments, {} cells remaining",
            chosen.len() - phase1_count,
            uncovered.len()
        );
    }

    if !uncovered.is_empty() {
        warn!(
            "{} cells remain uncovered; no candidate has line of sight to them",
            uncovered.len()
        );
    }

    let segments = chosen
        .into_iter()
        .enumerate()
        .map(|(idx, (point_id, covered_cells))| {
            let cell_count = covered_cells.len();
            RawSegment {
                sequence: idx + 1,
                point_id,
                covered_cells,
                access_type: access.get(&point_id).copied().unwrap_or(AccessType::None),
                cell_count,
            }
        })
        .collect::<Vec<_>>();

    info!("Total segments generated: {}", segments.len());

    Ok(SegmentPlan {
        segments,
        uncovered,
        target_cell_count: target_cells.len(),
    })
}

#[allow(clippy::too_many_arguments)]
fn greedy_selection(
    candidates: &[usize],
    visibility: &HashMap<usize, HashSet<usize>>,
    uncovered: &mut HashSet<usize>,
    preferred_size_cells: Option<usize>,
    weights: &SelectionWeights,
    initial_target: usize,
    chosen: &mut Vec<(usize, HashSet<usize>)>,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<()> {
    // Ascending ids so strict comparisons keep the lowest id on score ties
    let mut available: Vec<usize> = candidates.to_vec();
    available.sort_unstable();

    let mut iteration = 0usize;

    while !uncovered.is_empty() && !available.is_empty() {
        iteration += 1;
        cancel.check()?;

        if iteration % 5 == 0 && initial_target > 0 {
            let covered_pct =
                (initial_target - uncovered.len()) as f64 / initial_target as f64 * 100.0;
            progress.report(
                &format!(
                    "Generating segments... ({} segments, {:.0}% covered)",
                    chosen.len(),
                    covered_pct
                ),
                80 + (covered_pct * 0.02) as u8,
            );
        }

        let mut best_point: Option<usize> = None;
        let mut best_gain = 0usize;
        let mut best_score = 0.0f64;

        for &point_id in &available {
            let visible = match visibility.get(&point_id) {
                Some(v) => v,
                None => continue,
            };

            let gain = visible.intersection(uncovered).count();
            if gain == 0 {
                continue;
            }

            let score = weights.score(gain, preferred_size_cells);
            if score > best_score {
                best_score = score;
                best_gain = gain;
                best_point = Some(point_id);
            }
        }

        let point_id = match best_point {
            Some(p) if best_gain > 0 => p,
            _ => break,
        };

        let coverage: HashSet<usize> = visibility[&point_id]
            .intersection(uncovered)
            .copied()
            .collect();

        for cell in &coverage {
            uncovered.remove(cell);
        }
        available.retain(|&p| p != point_id);
        chosen.push((point_id, coverage));
    }

    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanStatistics {
    pub total_segments: usize,
    pub total_cells_covered: usize,
    pub target_cells: usize,
    pub coverage_percentage: f64,
    pub min_segment_size_cells: usize,
    pub max_segment_size_cells: usize,
    pub avg_segment_size_cells: f64,
    pub total_area_m2: f64,
    pub total_area_acres: f64,
}

pub fn plan_statistics(plan: &SegmentPlan, cell_area_m2: f64) -> PlanStatistics {
    let mut covered: HashSet<usize> = HashSet::new();
    for segment in &plan.segments {
        covered.extend(&segment.covered_cells);
    }

    let sizes: Vec<usize> = plan.segments.iter().map(|s| s.cell_count).collect();
    let total_area_m2 = covered.len() as f64 * cell_area_m2;

    PlanStatistics {
        total_segments: plan.segments.len(),
        total_cells_covered: covered.len(),
        target_cells: plan.target_cell_count,
        coverage_percentage: if plan.target_cell_count > 0 {
            covered.len() as f64 / plan.target_cell_count as f64 * 100.0
        } else {
            0.0
        },
        min_segment_size_cells: sizes.iter().copied().min().unwrap_or(0),
        max_segment_size_cells: sizes.iter().copied().max().unwrap_or(0),
        avg_segment_size_cells: if sizes.is_empty() {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
        },
        total_area_m2,
        total_area_acres: total_area_m2 / SQ_METERS_PER_ACRE,
    }
}
