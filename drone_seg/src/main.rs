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
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use structopt::StructOpt;
use terrain_util::util::format_duration;

use drone_seg::crs;
use drone_seg::{CancelToken, Pipeline, PipelineConfig, PipelineOutput, ProgressFn};

#[derive(StructOpt)]
struct Cli {
    #[structopt(long, default_value = "Info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    #[structopt(help = "Run the segmentation pipeline for a project config")]
    Run(RunArgs),

    #[structopt(help = "Validate a project config without running the pipeline")]
    CheckConfig(CheckConfigArgs),
}

#[derive(StructOpt)]
struct RunArgs {
    #[structopt(long, parse(from_os_str))]
    config: PathBuf,

    #[structopt(long, parse(from_os_str), help = "Where to write the segment GeoJSON")]
    output: Option<PathBuf>,
}

#[derive(StructOpt)]
struct CheckConfigArgs {
    #[structopt(long, parse(from_os_str))]
    config: PathBuf,
}

fn run() -> Result<()> {
    let args = Cli::from_args();

    SimpleLogger::new().with_level(args.log_level).init()?;

    match &args.cmd {
        Command::Run(r) => {
            run_pipeline(r)?;
        }
        Command::CheckConfig(r) => {
            check_config(r)?;
        }
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<PipelineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {:?}", path))?;
    let config: PipelineConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {:?}", path))?;
    Ok(config)
}

fn run_pipeline(args: &RunArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| config.output_dir.join("segments.geojson"));

    let cancel = CancelToken::new();
    let progress = |message: &str, percent: u8| {
        info!("[{:3}%] {}", percent, message);
    };

    let now = Instant::now();
    let output = Pipeline::new(config)
        .execute(&cancel, Some(&progress as &ProgressFn))
        .context("pipeline execution failed")?;

    write_feature_collection(&output_path, &output)?;

    println!(
        "Project {} finished at {} in {}",
        output.project_id,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        format_duration(now.elapsed())
    );
    println!(
        "Segments: {} ({} grid points, {} primary / {} secondary)",
        output.statistics.total_segments,
        output.statistics.grid_points_generated,
        output.statistics.primary_points,
        output.statistics.secondary_points
    );
    println!(
        "Coverage: {:.2}% ({:.2}% gaps, {} overlaps)",
        output.validation.coverage_percentage,
        output.validation.gap_percentage,
        output.validation.overlap_count
    );
    println!("Wrote {:?}", output_path);

    Ok(())
}

fn check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let polygon = config.validate()?;

    let acres = crs::polygon_area_acres(&polygon, crs::WGS84_EPSG)?;
    println!(
        "Config OK: project {}, search area {:.1} acres, {} access type(s)",
        config.project_id,
        acres,
        config.access_types.len()
    );

    Ok(())
}

fn write_feature_collection(path: &PathBuf, output: &PipelineOutput) -> Result<()> {
    let mut features = Vec::with_capacity(output.segments.len() * 2);
    for segment in &output.segments {
        features.push(segment.to_feature());
        features.push(segment.launch_point_feature());
    }

    let mut foreign = serde_json::Map::new();
    foreign.insert(
        "statistics".to_string(),
        serde_json::to_value(&output.statistics)?,
    );
    foreign.insert(
        "validation".to_string(),
        serde_json::to_value(&output.validation)?,
    );

    let collection = geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, collection.to_string())
        .with_context(|| format!("writing {:?}", path))?;

    Ok(())
}

fn main() {
    run().unwrap();
}
