//! Line-oriented front ends: a long-lived request loop for a driving process,
//! and a one-shot reader for a single image path.

use anyhow::Result;
use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::log;
use crate::ocr::{PlateReader, Recognizer};

pub const READY: &str = "READY";
pub const EXIT: &str = "EXIT";
pub const NONE: &str = "NONE";
pub const ERROR_FILE: &str = "ERROR_FILE";
pub const ERROR_PROCESS: &str = "ERROR_PROCESS";
pub const ERROR_ARGS: &str = "ERROR_ARGS";
pub const ERROR_READ: &str = "ERROR_READ";

/// Answers one image path per input line until `EXIT` or end of input.
/// Every response is one flushed line; per-image failures never end the loop.
pub fn serve<R: Recognizer>(
    reader: &PlateReader<R>,
    mut input: impl BufRead,
    mut output: impl Write,
) -> Result<()> {
    writeln!(output, "{}", READY)?;
    output.flush()?;
    log("Serving requests");

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) => {
                let request = line.trim();
                if request == EXIT {
                    break;
                }
                respond(reader, Path::new(request))
            }
            Err(_) => {
                log(&format!(
                    "Undecodable request path: {}",
                    String::from_utf8_lossy(&buf).trim()
                ));
                ERROR_FILE.to_string()
            }
        };
        writeln!(output, "{}", response)?;
        output.flush()?;
    }

    log("Request loop finished");
    Ok(())
}

fn respond<R: Recognizer>(reader: &PlateReader<R>, path: &Path) -> String {
    if !path.is_file() {
        return ERROR_FILE.to_string();
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Option<String>> {
        let img = image::open(path)?;
        reader.read_scene(&img)
    }));

    match outcome {
        Ok(Ok(Some(plate))) => plate,
        Ok(Ok(None)) => NONE.to_string(),
        Ok(Err(e)) => {
            log(&format!("Failed to process {}: {:#}", path.display(), e));
            ERROR_PROCESS.to_string()
        }
        Err(_) => {
            log(&format!("Panic while processing {}", path.display()));
            ERROR_PROCESS.to_string()
        }
    }
}

/// Reads a single image and returns the line to print.
pub fn one_shot<R: Recognizer>(reader: &PlateReader<R>, path: Option<&str>) -> String {
    let Some(path) = path else {
        return ERROR_ARGS.to_string();
    };

    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            log(&format!("Could not read {}: {}", path, e));
            return ERROR_READ.to_string();
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| reader.read_scene(&img))) {
        Ok(Ok(Some(plate))) => plate,
        Ok(Ok(None)) => NONE.to_string(),
        Ok(Err(e)) => format!("ERROR: {}", e),
        Err(payload) => format!("ERROR: {}", panic_message(payload.as_ref())),
    }
}

/// Text carried by a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
