//! Binary morphology with rectangular structuring elements.
//!
//! Masks hold 0 or 255. A rectangle is separable, so each operation runs as a
//! horizontal pass followed by a vertical pass, using running sums over each
//! line. The anchor sits at `size / 2`; pixels outside the image are ignored.

use image::GrayImage;

use crate::config::{KernelSize, MorphologyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Dilate,
    Erode,
}

/// Grow foreground regions.
#[must_use]
pub fn dilate(mask: &GrayImage, kernel: KernelSize) -> GrayImage {
    apply(mask, kernel, Op::Dilate)
}

/// Shrink foreground regions.
#[must_use]
pub fn erode(mask: &GrayImage, kernel: KernelSize) -> GrayImage {
    apply(mask, kernel, Op::Erode)
}

/// Dilate then erode: fills gaps narrower than the kernel.
#[must_use]
pub fn close(mask: &GrayImage, kernel: KernelSize) -> GrayImage {
    erode(&dilate(mask, kernel), kernel)
}

/// Erode then dilate: removes specks smaller than the kernel.
#[must_use]
pub fn open(mask: &GrayImage, kernel: KernelSize) -> GrayImage {
    dilate(&erode(mask, kernel), kernel)
}

/// Closing, opening, then repeated dilation so the strokes of one line of
/// text become a single blob.
#[must_use]
pub fn consolidate(mask: &GrayImage, config: &MorphologyConfig) -> GrayImage {
    let mut out = open(&close(mask, config.clean_kernel), config.clean_kernel);
    for _ in 0..config.dilate_iterations {
        out = dilate(&out, config.dilate_kernel);
    }
    out
}

fn apply(mask: &GrayImage, kernel: KernelSize, op: Op) -> GrayImage {
    let (w, h) = mask.dimensions();
    let (w, h) = (w as usize, h as usize);
    if w == 0 || h == 0 {
        return mask.clone();
    }

    let src: Vec<bool> = mask.as_raw().iter().map(|&v| v != 0).collect();
    let mut horizontal = vec![false; w * h];
    let mut line = vec![false; w.max(h)];
    let mut sums = vec![0u32; w.max(h) + 1];

    for y in 0..h {
        filter_line(
            &src[y * w..(y + 1) * w],
            kernel.width as usize,
            op,
            &mut sums,
            &mut horizontal[y * w..(y + 1) * w],
        );
    }

    let mut out = vec![false; w * h];
    let mut column = vec![false; h];
    for x in 0..w {
        for y in 0..h {
            column[y] = horizontal[y * w + x];
        }
        filter_line(&column, kernel.height as usize, op, &mut sums, &mut line[..h]);
        for y in 0..h {
            out[y * w + x] = line[y];
        }
    }

    let raw = out.into_iter().map(|on| if on { 255 } else { 0 }).collect();
    GrayImage::from_raw(mask.width(), mask.height(), raw).unwrap_or_else(|| mask.clone())
}

/// One-dimensional rank filter over `input` with a window of `size` anchored at `size / 2`.
fn filter_line(input: &[bool], size: usize, op: Op, sums: &mut [u32], output: &mut [bool]) {
    let n = input.len();
    sums[0] = 0;
    for (i, &on) in input.iter().enumerate() {
        sums[i + 1] = sums[i] + u32::from(on);
    }

    let size = size.max(1);
    let anchor = size / 2;
    for (x, out) in output.iter_mut().enumerate().take(n) {
        let lo = x.saturating_sub(anchor);
        let hi = (x + size - 1 - anchor).min(n - 1);
        let count = sums[hi + 1] - sums[lo];
        *out = match op {
            Op::Dilate => count > 0,
            #[allow(clippy::cast_possible_truncation)]
            Op::Erode => count as usize == hi - lo + 1,
        };
    }
}
