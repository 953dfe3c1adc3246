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

//! Partitions a ground search polygon into visibility-defined segments, each
//! paired with a launch point from which the whole segment is line-of-sight
//! visible to a drone at a fixed height above ground.

pub mod access;
pub mod config;
pub mod control;
pub mod crs;
pub mod dem;
pub mod error;
pub mod grid;
pub mod pipeline;
pub mod polygon;
pub mod segment;
pub mod viewshed;

pub use config::PipelineConfig;
pub use control::{CancelToken, Progress, ProgressFn};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineOutput, SegmentRecord};
