use anyhow::{anyhow, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::TesseractConfig;
use crate::log;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

const COMMON_EXECUTABLES: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

const SYSTEM_TESSDATA: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

#[derive(Debug, Clone)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    pub tessdata: PathBuf,
}

/// Returns the directory for storing Tesseract files
pub fn get_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plate-ocr")
        .join("tesseract")
}

/// Ensures Tesseract and the configured traineddata are available.
/// Downloads the traineddata if no copy can be found.
pub fn ensure_tesseract(config: &TesseractConfig) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(config)?;

    let tessdata = match find_tessdata_dir(&config.language) {
        Ok(dir) => dir,
        Err(_) => {
            log(&format!(
                "{}.traineddata not found locally, downloading...",
                config.language
            ));
            let local = get_tesseract_dir().join("tessdata");
            fs::create_dir_all(&local)?;
            download_tessdata(&local, &config.language)?;
            local
        }
    };

    log(&format!(
        "Tesseract ready: {} (tessdata {})",
        executable.display(),
        tessdata.display()
    ));

    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Downloads trained data for `language` from the tessdata repository
fn download_tessdata(tessdata_dir: &Path, language: &str) -> Result<()> {
    let url = format!("{}/{}.traineddata", TESSDATA_REPO, language);
    let path = tessdata_dir.join(format!("{}.traineddata", language));

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "plate-ocr")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}.traineddata: HTTP {}",
            language,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&path)?;
    file.write_all(&bytes)?;

    log(&format!(
        "Downloaded {}.traineddata ({} bytes)",
        language,
        bytes.len()
    ));

    Ok(())
}

/// Finds the Tesseract executable: configured path, our local dir, PATH,
/// then common install locations.
pub fn find_tesseract_executable(config: &TesseractConfig) -> Result<PathBuf> {
    if let Some(path) = &config.executable {
        if path.exists() {
            return Ok(path.clone());
        }
        log(&format!(
            "Configured tesseract executable {} does not exist",
            path.display()
        ));
    }

    let local_exe = get_tesseract_dir().join(EXECUTABLE_NAME);
    if local_exe.exists() {
        return Ok(local_exe);
    }

    if let Ok(output) = std::process::Command::new("tesseract")
        .arg("--version")
        .output()
    {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    COMMON_EXECUTABLES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Tesseract not found. Please install Tesseract-OCR."))
}

/// Finds a tessdata directory holding `<language>.traineddata`
pub fn find_tessdata_dir(language: &str) -> Result<PathBuf> {
    let traineddata = format!("{}.traineddata", language);

    let mut candidates = vec![get_tesseract_dir().join("tessdata")];
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        candidates.push(PathBuf::from(&prefix));
        candidates.push(PathBuf::from(&prefix).join("tessdata"));
    }
    candidates.extend(SYSTEM_TESSDATA.iter().map(PathBuf::from));

    find_dir_containing(&candidates, &traineddata).ok_or_else(|| {
        anyhow!(
            "tessdata directory not found. Please ensure {} is available.",
            traineddata
        )
    })
}

fn find_dir_containing(dirs: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    dirs.iter().find(|d| d.join(file_name).exists()).cloned()
}
