pub mod candidates;
pub mod engine;
pub mod filters;
pub mod normalize;
pub mod preprocess;
pub mod select;
pub mod setup;
#[cfg(test)]
pub mod stub;

pub use engine::{Recognizer, TesseractEngine};
pub use normalize::{clean_text, ReferenceAssist};
pub use setup::ensure_tesseract;

use anyhow::Result;
use image::{imageops, DynamicImage, RgbImage};

use crate::config::PipelineConfig;
use candidates::CandidateGenerator;
use engine::{PixelRect, RecognizeOptions};
use normalize::{Corrector, Normalizer};
use preprocess::remove_strip;

/// Plate crop → plate string, over an injected recognizer.
///
/// Holds no per-call state, so one reader can serve any number of threads as
/// long as the recognizer allows it.
pub struct PlateReader<R: Recognizer> {
    recognizer: R,
    config: PipelineConfig,
}

impl<R: Recognizer> PlateReader<R> {
    pub fn new(recognizer: R, config: PipelineConfig) -> Self {
        Self { recognizer, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reads a plate crop with reference-free correction. Returns an empty
    /// string when nothing legible was found.
    pub fn read_plate(&self, crop: &RgbImage) -> Result<String> {
        let normalizer = Normalizer::new(self.config.recognition.max_plate_len);
        self.read_with(crop, &normalizer)
    }

    /// Reads a plate crop letting the expected text steer correction and
    /// selection. Evaluation only.
    pub fn read_plate_with_reference(
        &self,
        crop: &RgbImage,
        assist: &ReferenceAssist,
    ) -> Result<String> {
        self.read_with(crop, assist)
    }

    fn read_with<C: Corrector>(&self, crop: &RgbImage, corrector: &C) -> Result<String> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(String::new());
        }

        let stripped = remove_strip(crop, &self.config.strip);
        let candidates =
            CandidateGenerator::new(&self.recognizer, &self.config, corrector).generate(&stripped)?;

        Ok(corrector
            .choose(&candidates)
            .map(|c| c.text.clone())
            .unwrap_or_default())
    }

    /// Reads a whole photograph. Each located text box is read as a plate
    /// crop and the longest valid reading wins; `None` when no reading passes
    /// validation.
    pub fn read_scene(&self, img: &DynamicImage) -> Result<Option<String>> {
        let rgb = img.to_rgb8();
        let boxes = if self.config.recognition.locate_text {
            self.locate_text(img)?
        } else {
            Vec::new()
        };

        let crops: Vec<RgbImage> = if boxes.is_empty() {
            vec![rgb]
        } else {
            crate::log(&format!("Located {} text regions", boxes.len()));
            boxes
                .iter()
                .filter_map(|b| padded_crop(&rgb, *b, self.config.recognition.text_box_padding))
                .collect()
        };

        let mut best: Option<String> = None;
        for crop in &crops {
            let plate = self.read_plate(crop)?;
            if self.config.validation.accepts(&plate)
                && best.as_ref().is_none_or(|b| plate.len() > b.len())
            {
                best = Some(plate);
            }
        }
        Ok(best)
    }

    fn locate_text(&self, img: &DynamicImage) -> Result<Vec<PixelRect>> {
        let lines = self.recognizer.recognize(img, &RecognizeOptions::sparse())?;
        Ok(lines.iter().filter_map(|line| line.bbox).collect())
    }
}

/// Crops `rect` grown by `padding` on every side, clamped to the image.
fn padded_crop(img: &RgbImage, rect: PixelRect, padding: u32) -> Option<RgbImage> {
    let (w, h) = img.dimensions();
    let x0 = rect.x.saturating_sub(padding).min(w);
    let y0 = rect.y.saturating_sub(padding).min(h);
    let x1 = (rect.x + rect.width + padding).min(w);
    let y1 = (rect.y + rect.height + padding).min(h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image())
}
