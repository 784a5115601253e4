//! Multi-pass candidate generation.
//!
//! A primary read over the Otsu-binarized crop runs first. Only when its
//! corrected text is short enough to count as a failed read does the generator
//! escalate to the enhanced fallback image, and then to reading the letter,
//! digit and suffix bands of that same image separately.

use anyhow::Result;
use image::{DynamicImage, GrayImage, RgbImage};

use super::engine::{joined_text, Charset, RecognizeOptions, Recognizer};
use super::normalize::Corrector;
use super::preprocess::{crop_band, prepare_fallback, prepare_primary};
use crate::config::{PipelineConfig, SegmentConfig};
use crate::log;

/// Which strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Primary,
    Fallback,
    Segmented,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn new(text: String, provenance: Provenance) -> Self {
        Self { text, provenance }
    }
}

/// Escalation state of one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Primary,
    FallbackTriggered,
    SegmentedTriggered,
    Done,
}

impl Stage {
    /// The stage after this one, given the corrected length of the primary
    /// candidate. Escalation happens only when that length is at most
    /// `retry_max_len`.
    pub fn next(self, primary_len: usize, retry_max_len: usize) -> Stage {
        match self {
            Stage::Primary if primary_len <= retry_max_len => Stage::FallbackTriggered,
            Stage::Primary => Stage::Done,
            Stage::FallbackTriggered => Stage::SegmentedTriggered,
            Stage::SegmentedTriggered | Stage::Done => Stage::Done,
        }
    }
}

pub struct CandidateGenerator<'a, R: Recognizer + ?Sized, C: Corrector + ?Sized> {
    recognizer: &'a R,
    config: &'a PipelineConfig,
    corrector: &'a C,
}

impl<'a, R: Recognizer + ?Sized, C: Corrector + ?Sized> CandidateGenerator<'a, R, C> {
    pub fn new(recognizer: &'a R, config: &'a PipelineConfig, corrector: &'a C) -> Self {
        Self {
            recognizer,
            config,
            corrector,
        }
    }

    /// Produces candidates for a crop whose strip has already been removed.
    /// The primary candidate is always first.
    pub fn generate(&self, crop: &RgbImage) -> Result<Vec<Candidate>> {
        let recognition = &self.config.recognition;
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut enhanced: Option<GrayImage> = None;
        let mut stage = Stage::Primary;

        while stage != Stage::Done {
            match stage {
                Stage::Primary => {
                    let binary = prepare_primary(crop, &self.config.binarize, &self.config.cleanup);
                    let options =
                        RecognizeOptions::line(Charset::Alphanumeric, recognition.primary_confidence);
                    let text = self.read(binary, &options)?;
                    candidates.push(Candidate::new(text, Provenance::Primary));
                }
                Stage::FallbackTriggered => {
                    let image = enhanced
                        .get_or_insert_with(|| prepare_fallback(crop, &self.config.fallback));
                    let options =
                        RecognizeOptions::line(Charset::Alphanumeric, recognition.fallback_confidence);
                    let text = self.read(image.clone(), &options)?;
                    candidates.push(Candidate::new(text, Provenance::Fallback));
                }
                Stage::SegmentedTriggered => {
                    let image = enhanced
                        .get_or_insert_with(|| prepare_fallback(crop, &self.config.fallback));
                    let text = self.read_segments(image)?;
                    candidates.push(Candidate::new(text, Provenance::Segmented));
                }
                Stage::Done => break,
            }

            let primary_len = candidates.first().map_or(0, |c| c.text.len());
            let next = stage.next(primary_len, recognition.retry_max_len);
            if stage == Stage::Primary && next != Stage::Done {
                log(&format!(
                    "Primary read {:?} too short, trying enhanced image",
                    candidates[0].text
                ));
            }
            stage = next;
        }

        Ok(candidates)
    }

    fn read(&self, image: GrayImage, options: &RecognizeOptions) -> Result<String> {
        let lines = self
            .recognizer
            .recognize(&DynamicImage::ImageLuma8(image), options)?;
        Ok(self.corrector.correct(&joined_text(&lines)))
    }

    fn read_raw(&self, image: GrayImage, charset: Charset) -> Result<String> {
        let options = RecognizeOptions::line(charset, self.config.recognition.segment_confidence);
        let lines = self
            .recognizer
            .recognize(&DynamicImage::ImageLuma8(image), &options)?;
        Ok(joined_text(&lines))
    }

    fn read_segments(&self, image: &GrayImage) -> Result<String> {
        let segments = &self.config.segments;
        let letters = self.read_raw(crop_band(image, 0.0, segments.letters_end), Charset::Letters)?;
        let digits = self.read_raw(crop_band(image, segments.digits_start, 1.0), Charset::Digits)?;
        let suffix = self.read_raw(
            crop_band(image, segments.suffix_start, 1.0),
            Charset::Alphanumeric,
        )?;

        let assembled = assemble_segments(
            &letters,
            &digits,
            &suffix,
            self.corrector.prefix_hint(),
            segments,
        );
        Ok(self.corrector.correct(&assembled))
    }
}

/// Joins the band reads: up to `max_letters` letters (or the hint when fewer
/// than two were found), up to `max_digits` digits, then the last
/// alphanumeric character of the suffix band.
pub fn assemble_segments(
    letters: &str,
    digits: &str,
    suffix: &str,
    prefix_hint: Option<&str>,
    config: &SegmentConfig,
) -> String {
    let mut prefix: String = letters
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .take(config.max_letters)
        .collect();
    if prefix.len() < 2
        && let Some(hint) = prefix_hint
    {
        prefix = hint.chars().take(2).collect();
    }

    let body = digits
        .chars()
        .filter(char::is_ascii_digit)
        .take(config.max_digits);

    let tail = suffix
        .chars()
        .rev()
        .find(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase());

    prefix.chars().chain(body).chain(tail).collect()
}
