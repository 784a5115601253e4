//! Evaluation result files.
//!
//! Text logs are rewritten on every run: `ocr_all_readings.txt` lists every
//! dataset entry, `ocr_errors.txt` only the misreads with their character
//! confusions. `summary.json` holds the totals and the grade.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const ALL_READINGS_FILE: &str = "ocr_all_readings.txt";
pub const ERRORS_FILE: &str = "ocr_errors.txt";
pub const SUMMARY_FILE: &str = "summary.json";

const DIVIDER_WIDTH: usize = 80;

/// What happened to one dataset entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Read(String),
    /// The pipeline returned an error for this crop
    Failed(String),
    /// Image unreadable or plate box outside the image
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct Record {
    pub index: usize,
    pub file_name: String,
    pub expected: String,
    pub outcome: Outcome,
}

impl Record {
    pub fn detected(&self) -> &str {
        match &self.outcome {
            Outcome::Read(text) => text,
            Outcome::Failed(_) | Outcome::Skipped(_) => "",
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(&self.outcome, Outcome::Read(text) if *text == self.expected)
    }

    fn status(&self) -> &'static str {
        match &self.outcome {
            Outcome::Read(_) if self.is_correct() => "OK",
            Outcome::Read(_) | Outcome::Failed(_) => "FAIL",
            Outcome::Skipped(_) => "SKIP",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: usize,
    pub correct: usize,
    pub failed: usize,
    pub skipped: usize,
    pub accuracy: f64,
    pub total_seconds: f64,
    pub seconds_per_100: f64,
    pub grade: f64,
    pub finished_at: String,
}

impl Summary {
    pub fn from_records(records: &[Record], total_seconds: f64) -> Self {
        let total = records.len();
        let correct = records.iter().filter(|r| r.is_correct()).count();
        let skipped = records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped(_)))
            .count();
        let accuracy = if total > 0 {
            correct as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let seconds_per_100 = if total > 0 {
            total_seconds / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total,
            correct,
            failed: total - correct - skipped,
            skipped,
            accuracy,
            total_seconds,
            seconds_per_100,
            grade: final_grade(accuracy, seconds_per_100),
            finished_at: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string(),
        }
    }
}

/// Position-wise `expected->detected` pairs; empty unless lengths match.
pub fn character_confusions(expected: &str, detected: &str) -> Vec<String> {
    if expected.len() != detected.len() {
        return Vec::new();
    }
    expected
        .chars()
        .zip(detected.chars())
        .filter(|(e, d)| e != d)
        .map(|(e, d)| format!("{}->{}", e, d))
        .collect()
}

/// Grade from 2.0 to 5.0 in half steps. Anything under 60% accuracy or slower
/// than 60s per 100 images gets 2.0.
pub fn final_grade(accuracy_percent: f64, seconds_per_100: f64) -> f64 {
    if accuracy_percent < 60.0 || seconds_per_100 > 60.0 {
        return 2.0;
    }
    let accuracy_norm = (accuracy_percent - 60.0) / 40.0;
    let time_norm = ((60.0 - seconds_per_100) / 50.0).clamp(0.0, 1.0);
    let score = 0.7 * accuracy_norm + 0.3 * time_norm;
    let grade = 2.0 + 3.0 * score;
    (grade * 2.0).round() / 2.0
}

fn format_row(file_name: &str, expected: &str, detected: &str, status: &str) -> String {
    format!(
        "{:<30} | {:<12} | {:<12} | {}",
        file_name, expected, detected, status
    )
}

fn write_header(out: &mut impl Write, title: &str) -> std::io::Result<()> {
    writeln!(out, "{}", title)?;
    writeln!(out, "{}", format_row("FILENAME", "EXPECTED", "DETECTED", "STATUS"))?;
    writeln!(out, "{}", "-".repeat(DIVIDER_WIDTH))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).context(format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes all three report files into `dir` and returns their paths.
pub fn write_reports(dir: &Path, records: &[Record], summary: &Summary) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let all_path = dir.join(ALL_READINGS_FILE);
    let mut all = create(&all_path)?;
    write_header(&mut all, "OCR FULL LOG")?;

    let errors_path = dir.join(ERRORS_FILE);
    let mut errors = create(&errors_path)?;
    write_header(&mut errors, "OCR ERROR LOG")?;

    for record in records {
        let status = record.status();
        writeln!(
            all,
            "{}",
            format_row(&record.file_name, &record.expected, record.detected(), status)
        )?;

        if record.is_correct() {
            continue;
        }
        let note = match &record.outcome {
            Outcome::Read(detected) => {
                let confusions = character_confusions(&record.expected, detected);
                if confusions.is_empty() {
                    String::new()
                } else {
                    format!(" (Errors: {})", confusions.join(", "))
                }
            }
            Outcome::Failed(reason) | Outcome::Skipped(reason) => format!(" ({})", reason),
        };
        writeln!(
            errors,
            "{}{}",
            format_row(&record.file_name, &record.expected, record.detected(), status),
            note
        )?;
    }
    all.flush()?;
    errors.flush()?;

    let summary_path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    std::fs::write(&summary_path, json)
        .context(format!("Failed to write {}", summary_path.display()))?;

    Ok(vec![all_path, errors_path, summary_path])
}
