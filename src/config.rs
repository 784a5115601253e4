//! Pipeline configuration.
//!
//! Loads settings from config.json at startup. Every constant the plate
//! pipeline depends on (strip detection, thresholds, kernels, upsampling,
//! recognizer confidence) lives here so that tuning never forks code paths.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global configuration instance, initialized once at startup.
static CONFIG: OnceLock<PipelineConfig> = OnceLock::new();

/// Environment variable that overrides the config.json location.
pub const CONFIG_ENV_VAR: &str = "PLATE_OCR_CONFIG";

/// A rectangular structuring element, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub width: u32,
    pub height: u32,
}

impl Kernel {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Colored side strip detection (HSV values on the 8-bit OpenCV scale).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    /// Lowest hue counted as strip color (0-180)
    pub hue_min: u8,
    /// Highest hue counted as strip color (0-180)
    pub hue_max: u8,
    pub saturation_min: u8,
    pub value_min: u8,
    /// Fraction of the width, from the left edge, that is scanned
    pub scan_fraction: f32,
    /// A column is strip when more than this fraction of it is masked
    pub column_density: f32,
    /// Upper bound on the fraction of width that may be removed
    pub max_cut_fraction: f32,
    /// Extra columns removed after the strip edge
    pub edge_buffer: u32,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            hue_min: 90,
            hue_max: 140,
            saturation_min: 50,
            value_min: 50,
            scan_fraction: 0.30,
            column_density: 0.35,
            max_cut_fraction: 0.18,
            edge_buffer: 2,
        }
    }
}

/// Primary grayscale + Otsu binarization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarizeConfig {
    /// Crops shorter than this are upsampled before thresholding
    pub min_height: u32,
    pub upscale: f32,
    pub blur_sigma: f32,
    /// Stroke dilation applied after cleanup
    pub dilate_kernel: Kernel,
    /// White padding added around the recognizer input
    pub border: u32,
}

impl Default for BinarizeConfig {
    fn default() -> Self {
        Self {
            min_height: 60,
            upscale: 3.0,
            blur_sigma: 0.8,
            dilate_kernel: Kernel::new(2, 3),
            border: 10,
        }
    }
}

/// Blob classification used to erase borders, separator bars and speckles.
/// All values are fractions of the binary image size.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub border_min_height: f32,
    pub border_max_width: f32,
    pub bar_min_width: f32,
    pub noise_max_height: f32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            border_min_height: 0.85,
            border_max_width: 0.08,
            bar_min_width: 0.40,
            noise_max_height: 0.30,
        }
    }
}

/// Stronger enhancement used when the primary read fails.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Crops shorter than this get `small_upscale`, others `upscale`
    pub small_height: u32,
    pub small_upscale: f32,
    pub upscale: f32,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,
    /// Odd neighbourhood size of the adaptive threshold
    pub adaptive_block: u32,
    pub adaptive_offset: f32,
    pub close_kernel: Kernel,
    pub stroke_kernel: Kernel,
    pub stroke_iterations: u32,
    pub border: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            small_height: 70,
            small_upscale: 4.5,
            upscale: 3.0,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            bilateral_diameter: 5,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            adaptive_block: 31,
            adaptive_offset: 2.0,
            close_kernel: Kernel::new(2, 2),
            stroke_kernel: Kernel::new(1, 3),
            stroke_iterations: 2,
            border: 12,
        }
    }
}

/// Horizontal bands read separately by the segmented pass (fractions of width).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub letters_end: f32,
    pub digits_start: f32,
    pub suffix_start: f32,
    pub max_letters: usize,
    pub max_digits: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            letters_end: 0.45,
            digits_start: 0.35,
            suffix_start: 0.80,
            max_letters: 3,
            max_digits: 5,
        }
    }
}

/// Recognizer acceptance thresholds (0.0-1.0) and escalation policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub primary_confidence: f32,
    pub fallback_confidence: f32,
    pub segment_confidence: f32,
    /// Primary candidates at or below this length trigger the fallback passes
    pub retry_max_len: usize,
    /// Longest plate string a candidate may hold
    pub max_plate_len: usize,
    /// Locate text boxes on whole photographs before reading plates
    pub locate_text: bool,
    /// Padding around located text boxes, in pixels
    pub text_box_padding: u32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            primary_confidence: 0.70,
            fallback_confidence: 0.60,
            segment_confidence: 0.50,
            retry_max_len: 3,
            max_plate_len: 8,
            locate_text: true,
            text_box_padding: 5,
        }
    }
}

/// Length gate applied before a plate is reported by the front ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_len: 4,
            max_len: 9,
        }
    }
}

impl ValidationConfig {
    pub fn accepts(&self, plate: &str) -> bool {
        (self.min_len..=self.max_len).contains(&plate.len())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Explicit path to the tesseract executable
    pub executable: Option<PathBuf>,
    /// Traineddata language; plates are Polish
    pub language: String,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            executable: None,
            language: "pol".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Margin trimmed from each side of an annotated box
    pub crop_margin: f32,
    pub workers: usize,
    /// Write every prepared crop to the debug crops directory
    pub save_crops: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            crop_margin: 0.02,
            workers: 1,
            save_crops: false,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub strip: StripConfig,
    pub binarize: BinarizeConfig,
    pub cleanup: CleanupConfig,
    pub fallback: FallbackConfig,
    pub segments: SegmentConfig,
    pub recognition: RecognitionConfig,
    pub validation: ValidationConfig,
    pub tesseract: TesseractConfig,
    pub evaluation: EvaluationConfig,
}

/// Resolves the config path: `$PLATE_OCR_CONFIG`, else config.json next to
/// the executable.
fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("config.json")))
        .unwrap_or_else(|| Path::new("config.json").to_path_buf())
}

/// Loads configuration from `path` or returns defaults.
pub fn load_config_from(path: &Path) -> PipelineConfig {
    crate::log(&format!("Looking for config at: {}", path.display()));

    if !path.exists() {
        crate::log("config.json not found. Using default config.");
        return PipelineConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => {
                crate::log("Config loaded from config.json");
                config
            }
            Err(e) => {
                crate::log(&format!(
                    "Failed to parse config.json: {}. Using defaults.",
                    e
                ));
                PipelineConfig::default()
            }
        },
        Err(e) => {
            crate::log(&format!(
                "Failed to read config.json: {}. Using defaults.",
                e
            ));
            PipelineConfig::default()
        }
    }
}

/// Initializes the global configuration. Call once at startup.
pub fn init_config() {
    let _ = CONFIG.set(load_config_from(&config_path()));
}

/// Returns a reference to the global configuration.
/// Panics if called before init_config().
pub fn get_config() -> &'static PipelineConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call init_config() first.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{ "strip": { "max_cut_fraction": 0.15 }, "recognition": { "locate_text": false } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.strip.max_cut_fraction, 0.15);
        assert_eq!(config.strip.hue_min, 90);
        assert!(!config.recognition.locate_text);
        assert_eq!(config.recognition.max_plate_len, 8);
        assert_eq!(config.binarize.dilate_kernel, Kernel::new(2, 3));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json"));
        assert_eq!(config.fallback.border, 12);
        assert_eq!(config.tesseract.language, "pol");
    }

    #[test]
    fn test_load_invalid_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.validation.min_len, 4);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "evaluation": { "workers": 4 } }"#).unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.evaluation.workers, 4);
        assert_eq!(config.evaluation.crop_margin, 0.02);
    }

    #[test]
    fn test_validation_range() {
        let validation = ValidationConfig::default();
        assert!(!validation.accepts("KR1"));
        assert!(validation.accepts("KR12"));
        assert!(validation.accepts("KR1234567"));
        assert!(!validation.accepts("KR12345678"));
    }
}
