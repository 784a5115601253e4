//! Low-level image filters used by the plate preprocessor.
//!
//! Binary images follow one convention throughout: text is black (0) on a
//! white (255) background. Morphology operates on the dark foreground.

use image::{GrayImage, Luma, Rgb};
use imageproc::filter::{bilateral_filter, gaussian_blur_f32};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, Mask};

use crate::config::Kernel;

pub const BLACK: u8 = 0;
pub const WHITE: u8 = 255;

/// Converts an RGB pixel to HSV on the 8-bit OpenCV scale:
/// hue in [0, 180), saturation and value in [0, 255].
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> (u8, u8, u8) {
    let [r, g, b] = pixel.0;
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta / max * 255.0 } else { 0.0 };

    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    (
        (hue / 2.0).round().min(179.0) as u8,
        saturation.round() as u8,
        max as u8,
    )
}

/// Contrast limited adaptive histogram equalization.
///
/// Builds a clipped-histogram lookup table per tile and bilinearly
/// interpolates between the four nearest tile mappings.
pub fn clahe(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if tiles == 0 || w < tiles || h < tiles {
        return gray.clone();
    }
    let (tiles, w_us, h_us) = (tiles as usize, w as usize, h as usize);
    let tile_w = w_us / tiles;
    let tile_h = h_us / tiles;

    let mut maps = vec![[0u8; 256]; tiles * tiles];
    for ty in 0..tiles {
        for tx in 0..tiles {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = if tx == tiles - 1 { w_us } else { x0 + tile_w };
            let y1 = if ty == tiles - 1 { h_us } else { y0 + tile_h };
            let area = ((x1 - x0) * (y1 - y0)) as u32;

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }

            let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let per_bin = excess / 256;
            let remainder = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += per_bin + u32::from(i < remainder);
            }

            let map = &mut maps[ty * tiles + tx];
            let mut cdf = 0u32;
            for (i, count) in hist.iter().enumerate() {
                cdf += count;
                map[i] = ((cdf as f32 / area as f32) * 255.0).round().min(255.0) as u8;
            }
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let value = gray.get_pixel(x, y)[0] as usize;
        let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let clamp = |v: f32| (v.max(0.0) as usize).min(tiles - 1);
        let (tx0, ty0) = (clamp(fx.floor()), clamp(fy.floor()));
        let (tx1, ty1) = (clamp(fx.floor() + 1.0), clamp(fy.floor() + 1.0));
        let ax = (fx - fx.floor()).clamp(0.0, 1.0);
        let ay = (fy - fy.floor()).clamp(0.0, 1.0);

        let v00 = maps[ty0 * tiles + tx0][value] as f32;
        let v10 = maps[ty0 * tiles + tx1][value] as f32;
        let v01 = maps[ty1 * tiles + tx0][value] as f32;
        let v11 = maps[ty1 * tiles + tx1][value] as f32;
        let top = v00 + (v10 - v00) * ax;
        let bottom = v01 + (v11 - v01) * ax;
        Luma([(top + (bottom - top) * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Edge-preserving smoothing over a `diameter`-wide square neighbourhood.
pub fn bilateral(gray: &GrayImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    bilateral_filter(gray, diameter.max(1), sigma_color, sigma_space)
}

/// Gaussian-weighted local threshold: a pixel turns white when it is brighter
/// than its neighbourhood mean minus `offset`.
pub fn adaptive_threshold(gray: &GrayImage, block: u32, offset: f32) -> GrayImage {
    let block = block.max(3) | 1;
    // Sigma OpenCV derives for a Gaussian of this aperture.
    let sigma = 0.3 * ((block as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let local = gaussian_blur_f32(gray, sigma);

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let threshold = local.get_pixel(x, y)[0] as f32 - offset;
        if gray.get_pixel(x, y)[0] as f32 > threshold {
            Luma([WHITE])
        } else {
            Luma([BLACK])
        }
    })
}

/// Global threshold: strictly brighter than `level` becomes white.
pub fn threshold(gray: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level {
            Luma([WHITE])
        } else {
            Luma([BLACK])
        }
    })
}

/// Rectangular structuring element anchored at `(anchor_x, anchor_y)`.
fn rect_mask(width: u32, height: u32, anchor_x: u32, anchor_y: u32) -> Mask {
    let block = GrayImage::from_pixel(width, height, Luma([WHITE]));
    Mask::from_image(&block, anchor_x as u8, anchor_y as u8)
}

/// Mask for growing dark strokes, anchored at the kernel center.
fn stroke_mask(kernel: Kernel) -> Mask {
    let (w, h) = (kernel.width.clamp(1, 255), kernel.height.clamp(1, 255));
    rect_mask(w, h, w / 2, h / 2)
}

/// Mask for thinning dark strokes. The anchor is reflected so that a closing
/// with an even-sized kernel does not shift strokes.
fn reflected_mask(kernel: Kernel) -> Mask {
    let (w, h) = (kernel.width.clamp(1, 255), kernel.height.clamp(1, 255));
    rect_mask(w, h, w - 1 - w / 2, h - 1 - h / 2)
}

/// Thickens dark strokes: a min filter over the kernel.
pub fn dilate_strokes(binary: &GrayImage, kernel: Kernel, iterations: u32) -> GrayImage {
    let mask = stroke_mask(kernel);
    (0..iterations).fold(binary.clone(), |img, _| grayscale_erode(&img, &mask))
}

/// Thins dark strokes: a max filter over the reflected kernel.
pub fn erode_strokes(binary: &GrayImage, kernel: Kernel) -> GrayImage {
    grayscale_dilate(binary, &reflected_mask(kernel))
}

/// Closes small gaps inside dark strokes.
///
/// On the dark foreground this is an intensity opening, composed by hand
/// because `grayscale_open` applies one anchor to both halves.
pub fn close_strokes(binary: &GrayImage, kernel: Kernel) -> GrayImage {
    erode_strokes(&dilate_strokes(binary, kernel, 1), kernel)
}

/// Surrounds the image with a uniform white border.
pub fn pad_white(img: &GrayImage, border: u32) -> GrayImage {
    let mut canvas = GrayImage::from_pixel(
        img.width() + 2 * border,
        img.height() + 2 * border,
        Luma([WHITE]),
    );
    image::imageops::replace(&mut canvas, img, border as i64, border as i64);
    canvas
}

#[cfg(test)]
pub fn count_dark(binary: &GrayImage) -> usize {
    binary.pixels().filter(|p| p[0] == BLACK).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_hsv_opencv_scale() {
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 255])), (120, 255, 255));
        assert_eq!(rgb_to_hsv(&Rgb([255, 0, 0])), (0, 255, 255));
        assert_eq!(rgb_to_hsv(&Rgb([0, 255, 0])), (60, 255, 255));
        let (_, s, v) = rgb_to_hsv(&Rgb([200, 200, 200]));
        assert_eq!((s, v), (0, 200));
    }

    #[test]
    fn test_clahe_keeps_uniform_image_uniform() {
        let gray = GrayImage::from_pixel(64, 32, Luma([90]));
        let out = clahe(&gray, 8, 2.0);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_too_small_is_identity() {
        let gray = GrayImage::from_fn(4, 4, |x, _| Luma([x as u8 * 10]));
        assert_eq!(clahe(&gray, 8, 2.0), gray);
    }

    #[test]
    fn test_bilateral_preserves_constant_image() {
        let gray = GrayImage::from_pixel(10, 10, Luma([123]));
        assert_eq!(bilateral(&gray, 5, 75.0, 75.0), gray);
    }

    #[test]
    fn test_bilateral_preserves_hard_edge() {
        let gray = GrayImage::from_fn(20, 10, |x, _| Luma([if x < 10 { 0 } else { 255 }]));
        let out = bilateral(&gray, 5, 20.0, 75.0);
        assert!(out.get_pixel(8, 5)[0] < 5);
        assert!(out.get_pixel(11, 5)[0] > 250);
    }

    #[test]
    fn test_adaptive_threshold_uniform_is_white() {
        let gray = GrayImage::from_pixel(40, 20, Luma([60]));
        let out = adaptive_threshold(&gray, 31, 2.0);
        assert_eq!(count_dark(&out), 0);
    }

    #[test]
    fn test_adaptive_threshold_finds_dark_stroke() {
        let gray = GrayImage::from_fn(60, 30, |x, _| {
            Luma([if (28..32).contains(&x) { 20 } else { 220 }])
        });
        let out = adaptive_threshold(&gray, 31, 2.0);
        assert_eq!(out.get_pixel(30, 15)[0], BLACK);
        assert_eq!(out.get_pixel(5, 15)[0], WHITE);
    }

    #[test]
    fn test_threshold_is_strict() {
        let gray = GrayImage::from_fn(3, 1, |x, _| Luma([[99, 100, 101][x as usize]]));
        let out = threshold(&gray, 100);
        assert_eq!(out.as_raw(), &vec![BLACK, BLACK, WHITE]);
    }

    #[test]
    fn test_dilate_strokes_grows_dark_pixel() {
        let mut binary = GrayImage::from_pixel(7, 7, Luma([WHITE]));
        binary.put_pixel(3, 3, Luma([BLACK]));

        let out = dilate_strokes(&binary, Kernel::new(1, 3), 1);
        assert_eq!(count_dark(&out), 3);
        assert_eq!(out.get_pixel(3, 2)[0], BLACK);
        assert_eq!(out.get_pixel(3, 4)[0], BLACK);
        assert_eq!(out.get_pixel(2, 3)[0], WHITE);

        let twice = dilate_strokes(&binary, Kernel::new(1, 3), 2);
        assert_eq!(count_dark(&twice), 5);
    }

    #[test]
    fn test_close_strokes_fills_gap() {
        let binary = GrayImage::from_fn(9, 9, |x, y| {
            Luma([if y == 4 && x != 4 { BLACK } else { WHITE }])
        });
        let out = close_strokes(&binary, Kernel::new(2, 2));
        assert_eq!(out.get_pixel(4, 4)[0], BLACK);
    }

    #[test]
    fn test_close_strokes_keeps_stroke_in_place() {
        let binary = GrayImage::from_fn(9, 9, |_, y| Luma([if y == 4 { BLACK } else { WHITE }]));
        let out = close_strokes(&binary, Kernel::new(2, 2));
        assert!((0..9).all(|x| out.get_pixel(x, 4)[0] == BLACK));
        assert_eq!(count_dark(&out), 9);
    }

    #[test]
    fn test_bilateral_empty_image() {
        let empty = GrayImage::new(0, 0);
        assert_eq!(bilateral(&empty, 5, 75.0, 75.0).dimensions(), (0, 0));
    }

    #[test]
    fn test_pad_white() {
        let img = GrayImage::from_pixel(5, 3, Luma([BLACK]));
        let out = pad_white(&img, 10);
        assert_eq!(out.dimensions(), (25, 23));
        assert_eq!(out.get_pixel(0, 0)[0], WHITE);
        assert_eq!(out.get_pixel(10, 10)[0], BLACK);
        assert_eq!(count_dark(&out), 15);
    }
}
