//! Pixel classifiers producing binary watermark masks.
//!
//! Every function returns a mask of the frame's size holding 0 or 255:
//! - **Color bands**: low saturation, high brightness in HSV (0-255 scale)
//! - **Blur difference**: luma far from its heavily smoothed neighbourhood
//! - **Edges**: Sobel gradient magnitude above a threshold
//! - **Stable regions**: bright blobs whose area barely changes across a
//!   threshold sweep

use image::{GrayImage, Luma, Rgb, RgbImage};

use super::components::label_where;
use crate::config::{ColorConfig, EdgeConfig, OverlayConfig, TextRegionConfig};

const ON: u8 = 255;

/// Saturation and value of an RGB pixel on the 0-255 scale.
///
/// `V = max(R, G, B)`, `S = 255 * (V - min) / V` (0 for black).
#[must_use]
pub fn saturation_value(px: Rgb<u8>) -> (u8, u8) {
    let [r, g, b] = px.0;
    let v = r.max(g).max(b);
    if v == 0 {
        return (0, 0);
    }
    let min = r.min(g).min(b);
    let s = (u32::from(v - min) * 255 + u32::from(v) / 2) / u32::from(v);
    (u8::try_from(s).unwrap_or(u8::MAX), v)
}

/// Luminance of every pixel, `0.299*R + 0.587*G + 0.114*B`, on the 0-255 scale.
#[must_use]
pub fn luma(frame: &RgbImage) -> Vec<f32> {
    frame
        .pixels()
        .map(|px| 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]))
        .collect()
}

/// Pixels inside the primary or secondary near-white band.
#[must_use]
pub fn color_mask(frame: &RgbImage, color: &ColorConfig) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let (s, v) = saturation_value(*frame.get_pixel(x, y));
        let hit = color.primary.contains(s, v)
            || color.secondary.is_some_and(|band| band.contains(s, v));
        Luma([if hit { ON } else { 0 }])
    })
}

/// Standard deviation derived from a kernel size: `0.3 * ((k - 1) / 2 - 1) + 0.8`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn gaussian_kernel(kernel: u32) -> Vec<f32> {
    let sigma = gaussian_sigma(kernel);
    let radius = (kernel / 2) as i32;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge pixel.
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    #[allow(clippy::cast_possible_wrap)]
    let n = n as isize;
    let period = 2 * (n - 1);
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i;
    }
    #[allow(clippy::cast_sign_loss)]
    let i = i as usize;
    i
}

/// Separable Gaussian blur of a single-channel float image with reflected borders.
#[must_use]
pub fn gaussian_blur(data: &[f32], width: usize, height: usize, kernel: u32) -> Vec<f32> {
    let weights = gaussian_kernel(kernel);
    #[allow(clippy::cast_possible_wrap)]
    let radius = (weights.len() / 2) as isize;

    let mut rows = vec![0.0_f32; width * height];
    for y in 0..height {
        let line = &data[y * width..(y + 1) * width];
        for x in 0..width {
            #[allow(clippy::cast_possible_wrap)]
            let cx = x as isize;
            rows[y * width + x] = weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    #[allow(clippy::cast_possible_wrap)]
                    let offset = k as isize - radius;
                    w * line[reflect(cx + offset, width)]
                })
                .sum();
        }
    }

    let mut out = vec![0.0_f32; width * height];
    for y in 0..height {
        #[allow(clippy::cast_possible_wrap)]
        let cy = y as isize;
        for x in 0..width {
            out[y * width + x] = weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    #[allow(clippy::cast_possible_wrap)]
                    let offset = k as isize - radius;
                    w * rows[reflect(cy + offset, height) * width + x]
                })
                .sum();
        }
    }
    out
}

/// Pixels whose luma differs from the blurred frame by more than the threshold.
///
/// Natural footage is mostly smooth at this scale; overlaid glyph edges are not.
#[must_use]
pub fn blur_difference_mask(frame: &RgbImage, overlay: &OverlayConfig) -> GrayImage {
    let (w, h) = frame.dimensions();
    let gray = luma(frame);
    let blurred = gaussian_blur(&gray, w as usize, h as usize, overlay.blur_kernel);
    let threshold = f32::from(overlay.diff_threshold);
    let raw = gray
        .iter()
        .zip(&blurred)
        .map(|(g, b)| if (g - b).abs() > threshold { ON } else { 0 })
        .collect();
    GrayImage::from_raw(w, h, raw).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Compute Sobel gradient magnitude for a 2D float array.
///
/// Uses 3x3 Sobel kernels. Border pixels are set to 0.
#[must_use]
pub fn sobel_magnitude(data: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut result = vec![0.0_f32; width * height];
    if width < 3 || height < 3 {
        return result;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            // y >= 1 and x >= 1, dy/dx in {-1, 0, 1}, so indices are always valid.
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            let idx = |dy: isize, dx: isize| -> f32 {
                data[((y as isize + dy) as usize) * width + (x as isize + dx) as usize]
            };

            let gx = -idx(-1, -1) + idx(-1, 1) - 2.0 * idx(0, -1) + 2.0 * idx(0, 1) - idx(1, -1)
                + idx(1, 1);

            let gy = -idx(-1, -1) - 2.0 * idx(-1, 0) - idx(-1, 1)
                + idx(1, -1)
                + 2.0 * idx(1, 0)
                + idx(1, 1);

            result[y * width + x] = (gx * gx + gy * gy).sqrt();
        }
    }

    result
}

/// Pixels on a strong luma edge.
#[must_use]
pub fn edge_mask(frame: &RgbImage, edges: &EdgeConfig) -> GrayImage {
    let (w, h) = frame.dimensions();
    let magnitude = sobel_magnitude(&luma(frame), w as usize, h as usize);
    let raw = magnitude
        .iter()
        .map(|&m| if m > edges.magnitude_threshold { ON } else { 0 })
        .collect();
    GrayImage::from_raw(w, h, raw).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Bright blobs that stay nearly the same size while the luma threshold rises.
///
/// For each pair of consecutive levels, a component above the higher level is
/// kept when its area is within `max_variation` of the component containing it
/// at the lower level, and its area lies in `[min_area, max_area]`.
#[must_use]
pub fn stable_region_mask(frame: &RgbImage, regions: &TextRegionConfig) -> GrayImage {
    let (w, h) = frame.dimensions();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let gray: Vec<u8> = luma(frame).iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect();
    let mut mask = vec![0u8; gray.len()];

    let levels: Vec<u8> = (regions.min_level..=regions.max_level)
        .step_by(usize::from(regions.level_step.max(1)))
        .collect();
    let Some((&first, rest)) = levels.split_first() else {
        return GrayImage::new(w, h);
    };

    let mut lower = label_where(w, h, |i| gray[i] >= first);
    for &level in rest {
        let upper = label_where(w, h, |i| gray[i] >= level);
        if upper.components.is_empty() {
            break;
        }

        let mut parent = vec![0u32; upper.components.len()];
        for (i, &label) in upper.labels.iter().enumerate() {
            if label != 0 {
                parent[label as usize - 1] = lower.labels[i];
            }
        }

        let stable: Vec<bool> = upper
            .components
            .iter()
            .zip(&parent)
            .map(|(c, &p)| {
                if c.area < regions.min_area || c.area > regions.max_area || p == 0 {
                    return false;
                }
                let parent_area = lower.components[p as usize - 1].area;
                #[allow(clippy::cast_precision_loss)]
                let variation = (parent_area - c.area) as f32 / c.area as f32;
                variation <= regions.max_variation
            })
            .collect();

        for (i, &label) in upper.labels.iter().enumerate() {
            if label != 0 && stable[label as usize - 1] {
                mask[i] = ON;
            }
        }
        lower = upper;
    }

    GrayImage::from_raw(w, h, mask).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Pixel-wise AND of two masks of equal size.
#[must_use]
pub fn intersect(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let raw = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&p, &q)| if p != 0 && q != 0 { ON } else { 0 })
        .collect();
    GrayImage::from_raw(a.width(), a.height(), raw).unwrap_or_else(|| GrayImage::new(a.width(), a.height()))
}
