use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use imageproc::region_labelling::{connected_components, Connectivity};

use super::filters::{self, BLACK, WHITE};
use crate::config::{BinarizeConfig, CleanupConfig, FallbackConfig, StripConfig};

/// Removes a colored identifier strip printed along the left edge of a plate.
///
/// Columns within the scanned fraction of the width are marked as strip when
/// enough of their pixels fall inside the strip hue band. The crop starts just
/// after the first non-strip column following a strip run, never beyond
/// `max_cut_fraction` of the width. Returns the input unchanged when no strip
/// is found or the input has no area.
pub fn remove_strip(img: &RgbImage, config: &StripConfig) -> RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let cut = find_strip_edge(img, config);
    let max_cut = (w as f32 * config.max_cut_fraction) as u32;
    let cut = cut.min(max_cut);
    if cut == 0 {
        return img.clone();
    }

    let start = (cut + config.edge_buffer).min(max_cut).min(w - 1);
    crate::log(&format!(
        "Strip detected: removing {} of {} columns",
        start, w
    ));
    imageops::crop_imm(img, start, 0, w - start, h).to_image()
}

/// Returns the first column after a contiguous strip run, or the last strip
/// column if the run reaches the end of the scanned range. 0 when no strip.
fn find_strip_edge(img: &RgbImage, config: &StripConfig) -> u32 {
    let (w, h) = img.dimensions();
    let scan_limit = (w as f32 * config.scan_fraction) as u32;

    let mut cut = 0;
    let mut in_strip = false;
    for x in 0..scan_limit {
        let masked = (0..h)
            .filter(|&y| is_strip_color(img.get_pixel(x, y), config))
            .count();
        let density = masked as f32 / h as f32;

        if density > config.column_density {
            in_strip = true;
            cut = x;
        } else if in_strip {
            cut = x;
            break;
        }
    }
    cut
}

fn is_strip_color(pixel: &image::Rgb<u8>, config: &StripConfig) -> bool {
    let (hue, saturation, value) = filters::rgb_to_hsv(pixel);
    (config.hue_min..=config.hue_max).contains(&hue)
        && saturation >= config.saturation_min
        && value >= config.value_min
}

/// Scales an image by `factor` with cubic interpolation.
fn upscale(gray: &GrayImage, factor: f32) -> GrayImage {
    let w = ((gray.width() as f32 * factor).round() as u32).max(1);
    let h = ((gray.height() as f32 * factor).round() as u32).max(1);
    imageops::resize(gray, w, h, FilterType::CatmullRom)
}

/// Grayscale, upsample small crops, blur, and apply Otsu's global threshold.
pub fn binarize(img: &RgbImage, config: &BinarizeConfig) -> GrayImage {
    let mut gray = imageops::grayscale(img);
    if gray.height() < config.min_height {
        gray = upscale(&gray, config.upscale);
    }
    let blurred = gaussian_blur_f32(&gray, config.blur_sigma);
    let level = otsu_level(&blurred);
    filters::threshold(&blurred, level)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Blob {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl Blob {
    fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Erases dark regions that cannot be plate characters: full-height border
/// slivers, wide separator bars, and short speckles. Returns the number of
/// regions erased.
pub fn clean_blobs(binary: &mut GrayImage, config: &CleanupConfig) -> usize {
    let (w, h) = binary.dimensions();
    if w == 0 || h == 0 {
        return 0;
    }

    let foreground = GrayImage::from_fn(w, h, |x, y| {
        Luma([if binary.get_pixel(x, y)[0] == BLACK { WHITE } else { 0 }])
    });
    let labels = connected_components(&foreground, Connectivity::Eight, Luma([0u8]));

    let mut blobs: Vec<Option<Blob>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if blobs.len() < label {
            blobs.resize(label, None);
        }
        let blob = blobs[label - 1].get_or_insert(Blob {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        });
        blob.min_x = blob.min_x.min(x);
        blob.min_y = blob.min_y.min(y);
        blob.max_x = blob.max_x.max(x);
        blob.max_y = blob.max_y.max(y);
    }

    let (wf, hf) = (w as f32, h as f32);
    let erase: Vec<bool> = blobs
        .iter()
        .map(|blob| {
            blob.is_some_and(|b| {
                let (bw, bh) = (b.width() as f32, b.height() as f32);
                let vertical_border =
                    bh > hf * config.border_min_height && bw < wf * config.border_max_width;
                let wide_bar = bw > wf * config.bar_min_width;
                let speckle = bh < hf * config.noise_max_height && !wide_bar;
                vertical_border || wide_bar || speckle
            })
        })
        .collect();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label > 0 && erase[label - 1] {
            binary.put_pixel(x, y, Luma([WHITE]));
        }
    }

    erase.iter().filter(|&&e| e).count()
}

/// Primary recognizer input: Otsu binarization, blob cleanup, stroke
/// dilation, white border.
pub fn prepare_primary(
    img: &RgbImage,
    binarize_config: &BinarizeConfig,
    cleanup: &CleanupConfig,
) -> GrayImage {
    let mut binary = binarize(img, binarize_config);
    clean_blobs(&mut binary, cleanup);
    let dilated = filters::dilate_strokes(&binary, binarize_config.dilate_kernel, 1);
    filters::pad_white(&dilated, binarize_config.border)
}

/// Fallback recognizer input for crops the primary pass could not read:
/// stronger upsampling, local contrast equalization, edge-preserving
/// smoothing, adaptive threshold, closing, vertical stroke dilation.
pub fn prepare_fallback(img: &RgbImage, config: &FallbackConfig) -> GrayImage {
    let gray = imageops::grayscale(img);
    let factor = if gray.height() < config.small_height {
        config.small_upscale
    } else {
        config.upscale
    };
    let gray = upscale(&gray, factor);

    let equalized = filters::clahe(&gray, config.clahe_tiles, config.clahe_clip_limit);
    let smoothed = filters::bilateral(
        &equalized,
        config.bilateral_diameter,
        config.bilateral_sigma_color,
        config.bilateral_sigma_space,
    );
    let binary = filters::adaptive_threshold(&smoothed, config.adaptive_block, config.adaptive_offset);
    let closed = filters::close_strokes(&binary, config.close_kernel);
    let stroked = filters::dilate_strokes(&closed, config.stroke_kernel, config.stroke_iterations);
    filters::pad_white(&stroked, config.border)
}

/// Crops the full-height band between two width fractions. The band always
/// keeps at least one column.
pub fn crop_band(img: &GrayImage, start: f32, end: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let x0 = ((start * w as f32) as u32).min(w.saturating_sub(1));
    let x1 = ((end * w as f32) as u32).clamp(x0 + 1, w.max(x0 + 1));
    imageops::crop_imm(img, x0, 0, x1 - x0, h).to_image()
}
