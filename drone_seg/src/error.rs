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
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Dataset and configuration level failures abort the pipeline; per-observer
/// viewshed faults are absorbed by the batch and never reach the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("DEM raster not found: {0}")]
    MissingRaster(PathBuf),

    #[error("DEM does not overlap the buffered search polygon")]
    NoOverlap,

    #[error("no candidate points inside the search polygon")]
    GridEmpty,

    #[error("viewshed computation failed: {0}")]
    Viewshed(String),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error(transparent)]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("geometry operation failed: {0}")]
    Geos(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<geos::Error> for PipelineError {
    fn from(e: geos::Error) -> Self {
        PipelineError::Geos(e.to_string())
    }
}
