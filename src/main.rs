//! Plate OCR
//!
//! Reads license plates from photographs with Tesseract, correcting the
//! recognizer's systematic mistakes with plate layout rules.
//!
//! Usage:
//!   plate-ocr <image>                      read one image, print one line
//!   plate-ocr serve                        answer image paths from stdin
//!   plate-ocr evaluate <annotations.xml> <images_dir> [--limit N] [--workers N]

mod config;
mod evaluation;
mod ocr;
mod paths;
mod server;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use evaluation::EvaluationOptions;
use ocr::{PlateReader, TesseractEngine};

/// Logs a message to stderr and the log file with timestamp.
/// Stdout carries only protocol responses.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    eprint!("{}", line);
    let log_path = paths::get_logs_dir().join("plate_ocr.log");
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(line.as_bytes());
    }
}

fn main() -> Result<()> {
    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = server::panic_message(panic_info.payload());
        let location = if let Some(loc) = panic_info.location() {
            format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column())
        } else {
            String::new()
        };
        log(&format!("[PANIC]{} {}", location, msg));
    }));

    paths::ensure_directories()?;
    config::init_config();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {
            println!("{}", server::ERROR_ARGS);
            std::process::exit(1);
        }
        Some("serve") => run_serve(),
        Some("evaluate") => run_evaluate(&args[1..]),
        Some(path) => {
            run_one_shot(path);
            Ok(())
        }
    }
}

/// Locates Tesseract and builds the reader over it.
fn build_reader() -> Result<PlateReader<TesseractEngine>> {
    let config = config::get_config();
    let tesseract = ocr::ensure_tesseract(&config.tesseract)?;
    let engine = TesseractEngine::new(tesseract, &config.tesseract.language);
    Ok(PlateReader::new(engine, config.clone()))
}

fn run_serve() -> Result<()> {
    let reader = build_reader().map_err(|e| {
        log(&format!("Engine initialization failed: {:#}", e));
        e
    })?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    server::serve(&reader, stdin.lock(), stdout.lock())
}

fn run_one_shot(path: &str) {
    let line = match build_reader() {
        Ok(reader) => server::one_shot(&reader, Some(path)),
        Err(e) => format!("ERROR: {}", e),
    };
    println!("{}", line);
}

fn run_evaluate(args: &[String]) -> Result<()> {
    let config = config::get_config();
    let mut options = parse_evaluate_args(args, config.evaluation.workers)?;
    if config.evaluation.save_crops {
        options.crops_dir = Some(paths::get_debug_crops_dir());
    }

    let reader = build_reader()?;
    evaluation::run_evaluation(&reader, &options, &paths::get_evaluation_dir())?;
    Ok(())
}

fn parse_evaluate_args(args: &[String], default_workers: usize) -> Result<EvaluationOptions> {
    let mut positional = Vec::new();
    let mut limit = None;
    let mut workers = default_workers;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--limit" => {
                let value = iter.next().ok_or_else(|| anyhow!("--limit needs a value"))?;
                limit = Some(value.parse().context(format!("Invalid --limit: {}", value))?);
            }
            "--workers" => {
                let value = iter.next().ok_or_else(|| anyhow!("--workers needs a value"))?;
                workers = value
                    .parse()
                    .context(format!("Invalid --workers: {}", value))?;
            }
            _ => positional.push(arg),
        }
    }

    match positional.as_slice() {
        [annotations, images_dir] => Ok(EvaluationOptions {
            annotations: PathBuf::from(annotations.as_str()),
            images_dir: PathBuf::from(images_dir.as_str()),
            limit,
            workers: workers.max(1),
            crops_dir: None,
        }),
        _ => Err(anyhow!(
            "Usage: plate-ocr evaluate <annotations.xml> <images_dir> [--limit N] [--workers N]"
        )),
    }
}
