//! Offline accuracy evaluation over an annotated dataset.
//!
//! Work items flow through an mpsc channel to a pool of worker threads that
//! share one [`PlateReader`]. Each worker sends its [`Record`] back on a
//! second channel; records are re-ordered by dataset index before reporting.

pub mod dataset;
pub mod report;

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use crate::log;
use crate::ocr::{PlateReader, Recognizer, ReferenceAssist};
use dataset::{crop_plate, DatasetEntry};
use report::{Outcome, Record, Summary};

pub struct EvaluationOptions {
    pub annotations: PathBuf,
    pub images_dir: PathBuf,
    pub limit: Option<usize>,
    pub workers: usize,
    /// Where plate crops are saved for inspection, if anywhere
    pub crops_dir: Option<PathBuf>,
}

/// A dataset entry queued for a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub index: usize,
    pub entry: DatasetEntry,
}

/// Creates the unbounded queue feeding the workers.
pub fn create_work_queue() -> (Sender<WorkItem>, Receiver<WorkItem>) {
    channel()
}

/// Runs the whole evaluation and writes the reports into `output_dir`.
pub fn run_evaluation<R: Recognizer>(
    reader: &PlateReader<R>,
    options: &EvaluationOptions,
    output_dir: &Path,
) -> Result<Summary> {
    if !options.images_dir.is_dir() {
        return Err(anyhow!(
            "Images directory not found: {}",
            options.images_dir.display()
        ));
    }

    let mut entries = dataset::load_annotations(&options.annotations, &options.images_dir)?;
    if let Some(limit) = options.limit {
        entries.truncate(limit);
    }
    if entries.is_empty() {
        return Err(anyhow!("No annotated plates found in {}", options.annotations.display()));
    }
    log(&format!(
        "Loaded {} annotated images, evaluating with {} workers",
        entries.len(),
        options.workers.max(1)
    ));

    if let Some(dir) = &options.crops_dir {
        std::fs::create_dir_all(dir)?;
    }

    let start = Instant::now();
    let records = evaluate_entries(reader, entries, options.workers, options.crops_dir.as_deref());
    let elapsed = start.elapsed().as_secs_f64();

    let summary = Summary::from_records(&records, elapsed);
    let paths = report::write_reports(output_dir, &records, &summary)?;

    log(&format!(
        "Evaluation finished: {}/{} correct ({:.2}%), {:.2}s total, {:.2}s per 100, grade {:.1}",
        summary.correct,
        summary.total,
        summary.accuracy,
        summary.total_seconds,
        summary.seconds_per_100,
        summary.grade
    ));
    for path in &paths {
        log(&format!("  Report: {}", path.display()));
    }

    Ok(summary)
}

/// Reads every entry on `workers` threads and returns records in dataset
/// order.
pub fn evaluate_entries<R: Recognizer>(
    reader: &PlateReader<R>,
    entries: Vec<DatasetEntry>,
    workers: usize,
    crops_dir: Option<&Path>,
) -> Vec<Record> {
    let total = entries.len();
    let (work_sender, work_receiver) = create_work_queue();
    for (index, entry) in entries.into_iter().enumerate() {
        // The receiver is still alive, so this cannot fail.
        let _ = work_sender.send(WorkItem { index, entry });
    }
    drop(work_sender);

    let work_receiver = Mutex::new(work_receiver);
    let (record_sender, record_receiver) = channel();

    thread::scope(|scope| {
        for worker in 0..workers.max(1) {
            let record_sender = record_sender.clone();
            let work_receiver = &work_receiver;
            scope.spawn(move || run_worker(worker, reader, work_receiver, record_sender, crops_dir));
        }
    });
    drop(record_sender);

    let mut records: Vec<Record> = record_receiver.iter().collect();
    records.sort_by_key(|r| r.index);
    if records.len() != total {
        log(&format!(
            "Warning: {} of {} entries produced no record",
            total - records.len(),
            total
        ));
    }
    records
}

/// Worker loop: processes items until the queue is drained.
fn run_worker<R: Recognizer>(
    worker: usize,
    reader: &PlateReader<R>,
    receiver: &Mutex<Receiver<WorkItem>>,
    sender: Sender<Record>,
    crops_dir: Option<&Path>,
) {
    loop {
        let item = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };
        let Ok(item) = item else {
            break;
        };

        let record = process_item(reader, &item, crops_dir);
        if record.is_correct() {
            log(&format!(
                "Worker {}: [{}] {} OK",
                worker, item.index, item.entry.file_name
            ));
        } else {
            log(&format!(
                "Worker {}: [{}] {} expected {} got {:?}",
                worker,
                item.index,
                item.entry.file_name,
                item.entry.expected,
                record.outcome
            ));
        }

        if sender.send(record).is_err() {
            break;
        }
    }
}

fn process_item<R: Recognizer>(
    reader: &PlateReader<R>,
    item: &WorkItem,
    crops_dir: Option<&Path>,
) -> Record {
    let entry = &item.entry;
    let record = |outcome| Record {
        index: item.index,
        file_name: entry.file_name.clone(),
        expected: entry.expected.clone(),
        outcome,
    };

    let img = match image::open(&entry.path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => return record(Outcome::Skipped(format!("unreadable image: {}", e))),
    };

    let margin = reader.config().evaluation.crop_margin;
    let Some(crop) = crop_plate(&img, entry.plate_box, margin) else {
        return record(Outcome::Skipped("plate box outside image".to_string()));
    };

    if let Some(dir) = crops_dir {
        let path = dir.join(format!("CROP_{}", entry.file_name));
        if let Err(e) = crop.save(&path) {
            log(&format!("Could not save crop {}: {}", path.display(), e));
        }
    }

    let assist = ReferenceAssist::new(&entry.expected, reader.config().recognition.max_plate_len);
    match reader.read_plate_with_reference(&crop, &assist) {
        Ok(detected) => record(Outcome::Read(detected)),
        Err(e) => record(Outcome::Failed(format!("{:#}", e))),
    }
}
