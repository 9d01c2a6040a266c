// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Run output directories
//!
//! ```text
//! runs/20250114_093012/
//!   outcomes.jsonl   one CaseOutcome per line, dataset order
//!   summary.json     RunSummary
//! ```

use anyhow::{Context, Result};
use axiomeval_core::{CaseOutcome, RunSummary};
use chrono::{DateTime, TimeZone};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const OUTCOMES_FILE: &str = "outcomes.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// `<runs_dir>/<YYYYmmdd_HHMMSS>`
pub fn timestamped_dir<Tz>(runs_dir: &Path, started_at: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    runs_dir.join(started_at.format("%Y%m%d_%H%M%S").to_string())
}

pub fn write_run(dir: &Path, outcomes: &[CaseOutcome], summary: &RunSummary) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create run directory {}", dir.display()))?;

    let outcomes_path = dir.join(OUTCOMES_FILE);
    let file = File::create(&outcomes_path)
        .with_context(|| format!("Failed to create {}", outcomes_path.display()))?;
    let mut writer = BufWriter::new(file);
    for outcome in outcomes {
        serde_json::to_writer(&mut writer, outcome)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    let summary_path = dir.join(SUMMARY_FILE);
    std::fs::write(&summary_path, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    Ok(())
}

pub fn read_outcomes(dir: &Path) -> Result<Vec<CaseOutcome>> {
    let path = dir.join(OUTCOMES_FILE);
    let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut outcomes = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = serde_json::from_str(&line)
            .with_context(|| format!("Invalid outcome on line {} of {}", idx + 1, path.display()))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Summary written with the run, if any
pub fn read_summary(dir: &Path) -> Result<Option<RunSummary>> {
    let path = dir.join(SUMMARY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(serde_json::from_str(&contents).with_context(|| {
        format!("Invalid summary in {}", path.display())
    })?))
}
