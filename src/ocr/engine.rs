use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;

use super::setup::TesseractPaths;

/// Character classes the recognizer may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Alphanumeric,
    Letters,
    Digits,
}

impl Charset {
    pub fn allowlist(self) -> &'static str {
        match self {
            Charset::Alphanumeric => "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
            Charset::Letters => "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
            Charset::Digits => "0123456789",
        }
    }
}

/// How the recognizer should treat the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// A tight crop holding one line of text
    SingleLine,
    /// A photograph with text scattered anywhere
    Sparse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeOptions {
    pub charset: Option<Charset>,
    /// Words below this confidence (0.0-1.0) are dropped
    pub min_confidence: f32,
    pub layout: Layout,
}

impl RecognizeOptions {
    pub fn line(charset: Charset, min_confidence: f32) -> Self {
        Self {
            charset: Some(charset),
            min_confidence,
            layout: Layout::SingleLine,
        }
    }

    pub fn sparse() -> Self {
        Self {
            charset: None,
            min_confidence: 0.0,
            layout: Layout::Sparse,
        }
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn union(self, other: PixelRect) -> PixelRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        PixelRect {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
    pub bbox: Option<PixelRect>,
}

/// Represents a single word from OCR with confidence score
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
    pub bbox: Option<PixelRect>,
}

/// The text-recognition engine the pipeline is layered over.
///
/// Implementations must tolerate concurrent calls; the pipeline keeps no
/// state between invocations and shares one engine across worker threads.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, img: &DynamicImage, options: &RecognizeOptions) -> Result<Vec<OcrLine>>;
}

/// Flattens recognized lines into raw tokens, in detection order.
pub fn tokens(lines: &[OcrLine]) -> Vec<&str> {
    lines
        .iter()
        .flat_map(|line| line.words.iter().map(|w| w.text.as_str()))
        .collect()
}

/// Concatenates every recognized token into one raw string.
pub fn joined_text(lines: &[OcrLine]) -> String {
    tokens(lines).concat()
}

/// Tesseract run as a subprocess, one call per image.
pub struct TesseractEngine {
    executable: PathBuf,
    tessdata: PathBuf,
    language: String,
}

impl TesseractEngine {
    pub fn new(paths: TesseractPaths, language: &str) -> Self {
        Self {
            executable: paths.executable,
            tessdata: paths.tessdata,
            language: language.to_string(),
        }
    }
}

impl Recognizer for TesseractEngine {
    /// Runs Tesseract on the image.
    /// Returns structured output with lines and confidence scores.
    fn recognize(&self, img: &DynamicImage, options: &RecognizeOptions) -> Result<Vec<OcrLine>> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())
            .context("Failed to write recognizer input")?;

        // Create temporary output file (Tesseract adds .tsv extension)
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let psm = match options.layout {
            Layout::SingleLine => "7",
            Layout::Sparse => "11",
        };

        let mut command = Command::new(&self.executable);
        command
            .arg(temp_input.path())
            .arg(&output_base)
            .arg("--tessdata-dir")
            .arg(&self.tessdata)
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(psm);
        if let Some(charset) = options.charset {
            command
                .arg("-c")
                .arg(format!("tessedit_char_whitelist={}", charset.allowlist()));
        }
        let output = command.arg("tsv").output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv_content = std::fs::read_to_string(&tsv_path)
            .map_err(|e| anyhow!("Failed to read Tesseract output: {}", e))?;

        let _ = std::fs::remove_file(&tsv_path);

        Ok(parse_tsv_output(&tsv_content, options.min_confidence * 100.0))
    }
}

/// Parses Tesseract TSV output into structured OcrLine data, dropping words
/// whose confidence (0-100) is below `min_confidence`.
fn parse_tsv_output(tsv: &str, min_confidence: f32) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    for line in tsv.lines().skip(1) {
        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != 5 {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_key.is_some_and(|k| k != key) {
            push_line(&mut lines, std::mem::take(&mut current_words));
        }
        current_key = Some(key);

        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        if conf < 0.0 || conf < min_confidence {
            continue;
        }

        let bbox = match (
            fields[6].parse(),
            fields[7].parse(),
            fields[8].parse(),
            fields[9].parse(),
        ) {
            (Ok(x), Ok(y), Ok(width), Ok(height)) => Some(PixelRect {
                x,
                y,
                width,
                height,
            }),
            _ => None,
        };

        current_words.push(OcrWord {
            text: text.to_string(),
            confidence: conf,
            bbox,
        });
    }

    push_line(&mut lines, current_words);
    lines
}

fn push_line(lines: &mut Vec<OcrLine>, words: Vec<OcrWord>) {
    if words.is_empty() {
        return;
    }
    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let bbox = words
        .iter()
        .filter_map(|w| w.bbox)
        .reduce(PixelRect::union);
    lines.push(OcrLine {
        text,
        words,
        confidence,
        bbox,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn test_parse_groups_words_into_lines() {
        let content = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t200\t60\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t5\t40\t30\t91.5\tKR",
            "5\t1\t1\t1\t1\t2\t60\t6\t80\t30\t88.0\t1234A",
            "5\t1\t1\t1\t2\t1\t10\t40\t30\t10\t75.0\tPL",
        ]);

        let lines = parse_tsv_output(&content, 0.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "KR 1234A");
        assert_eq!(lines[0].words.len(), 2);
        assert_eq!(
            lines[0].bbox,
            Some(PixelRect {
                x: 10,
                y: 5,
                width: 130,
                height: 31
            })
        );
        assert!((lines[0].confidence - 89.75).abs() < 1e-3);
        assert_eq!(lines[1].text, "PL");
    }

    #[test]
    fn test_parse_drops_low_confidence_words() {
        let content = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t5\t40\t30\t45.0\tXX",
            "5\t1\t1\t1\t1\t2\t60\t6\t80\t30\t88.0\t1234",
        ]);

        let lines = parse_tsv_output(&content, 60.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "1234");
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_tsv_output(HEADER, 0.0).is_empty());
        assert!(parse_tsv_output("", 0.0).is_empty());
    }

    #[test]
    fn test_joined_text_keeps_detection_order() {
        let content = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t5\t40\t30\t90\tWA",
            "5\t1\t1\t1\t2\t1\t10\t40\t40\t30\t90\t123",
            "5\t1\t1\t1\t2\t2\t60\t40\t40\t30\t90\t45",
        ]);
        let lines = parse_tsv_output(&content, 0.0);
        assert_eq!(tokens(&lines), vec!["WA", "123", "45"]);
        assert_eq!(joined_text(&lines), "WA12345");
    }

    #[test]
    fn test_charset_allowlists() {
        assert_eq!(Charset::Digits.allowlist(), "0123456789");
        assert_eq!(Charset::Letters.allowlist().len(), 26);
        assert_eq!(Charset::Alphanumeric.allowlist().len(), 36);
    }
}
