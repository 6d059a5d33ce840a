//! Protocol tables on disk.
//!
//! One stage per CSV row, in run order:
//!
//! ```text
//! Stage,t_min,startU,startF,endU,endF,pointCount
//! Growing,30,0.1,500,2.5,500,360
//! Resting,60,2.5,500,2.5,500,720
//! ```
//!
//! The header row is written on save and optional on load. Blank rows at the
//! end of the file are ignored.

use super::stage::Stage;
use crate::error::{FuncGenError, FuncGenResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Column names, in file order.
pub const COLUMNS: [&str; 7] = [
    "Stage",
    "t_min",
    "startU",
    "startF",
    "endU",
    "endF",
    "pointCount",
];

/// One row of a protocol table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRow {
    /// Stage name.
    #[serde(rename = "Stage")]
    pub stage: String,
    /// Duration, minutes.
    pub t_min: f64,
    /// Amplitude at the first point, Vpp.
    #[serde(rename = "startU")]
    pub start_u: f64,
    /// Frequency at the first point, Hz.
    #[serde(rename = "startF")]
    pub start_f: f64,
    /// Amplitude at the last point, Vpp.
    #[serde(rename = "endU")]
    pub end_u: f64,
    /// Frequency at the last point, Hz.
    #[serde(rename = "endF")]
    pub end_f: f64,
    /// Number of set-points.
    #[serde(rename = "pointCount")]
    pub point_count: u32,
}

impl From<ProtocolRow> for Stage {
    fn from(row: ProtocolRow) -> Self {
        Stage::ramp(
            row.stage,
            row.t_min,
            (row.start_u, row.start_f),
            (row.end_u, row.end_f),
            row.point_count,
        )
    }
}

impl From<&Stage> for ProtocolRow {
    fn from(stage: &Stage) -> Self {
        Self {
            stage: stage.name.clone(),
            t_min: stage.minutes,
            start_u: stage.start_amplitude,
            start_f: stage.start_frequency,
            end_u: stage.end_amplitude,
            end_f: stage.end_frequency,
            point_count: stage.points,
        }
    }
}

/// Read stages from a CSV file.
pub fn load_protocol(path: impl AsRef<Path>) -> FuncGenResult<Vec<Stage>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let stages = read_protocol(file)?;
    tracing::info!(path = %path.display(), stages = stages.len(), "Loaded protocol table");
    Ok(stages)
}

/// Read stages from CSV text.
pub fn read_protocol<R: Read>(reader: R) -> FuncGenResult<Vec<Stage>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for result in csv.records() {
        records.push(result?);
    }
    while records
        .last()
        .is_some_and(|r| r.iter().all(str::is_empty))
    {
        records.pop();
    }

    let mut stages = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let row_number = index + 1;
        if index == 0 && record.get(0) == Some(COLUMNS[0]) {
            continue;
        }
        if record.len() != COLUMNS.len() {
            return Err(FuncGenError::Table(format!(
                "row {}: expected {} columns, found {}",
                row_number,
                COLUMNS.len(),
                record.len()
            )));
        }
        let row: ProtocolRow = record
            .deserialize(None)
            .map_err(|e| FuncGenError::Table(format!("row {}: {}", row_number, e)))?;
        stages.push(row.into());
    }
    Ok(stages)
}

/// Write stages to a CSV file, header first.
pub fn save_protocol(path: impl AsRef<Path>, stages: &[Stage]) -> FuncGenResult<()> {
    let path = path.as_ref();
    write_protocol(File::create(path)?, stages)?;
    tracing::info!(path = %path.display(), stages = stages.len(), "Saved protocol table");
    Ok(())
}

/// Write stages as CSV text, header first.
pub fn write_protocol<W: Write>(writer: W, stages: &[Stage]) -> FuncGenResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    if stages.is_empty() {
        csv.write_record(COLUMNS)?;
    }
    for stage in stages {
        csv.serialize(ProtocolRow::from(stage))?;
    }
    csv.flush()?;
    Ok(())
}
