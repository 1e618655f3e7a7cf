//! Per-frame candidate region detection.
//!
//! Detection runs in three steps:
//! 1. A [`PixelClassifier`] marks pixels that look like overlay content.
//! 2. Morphology closes gaps, removes speckle and merges strokes into one blob
//!    per line of text.
//! 3. Connected components are filtered by size and aspect, padded, and
//!    clamped into the frame.
//!
//! Classifiers are interchangeable strategies. [`RegionDetector`] searches
//! the whole frame; [`CornerScan`] searches the four corners and keeps the one
//! with the highest aggregate score. [`DetectorPipeline`] runs any number of
//! detectors in configuration order.

pub mod components;
pub mod mask;
pub mod morphology;

use image::{imageops, GrayImage, RgbImage};

use crate::config::{
    AreaPolicy, ColorConfig, ContourFilter, CornerConfig, EdgeConfig, KernelSize, LocatorConfig,
    MorphologyConfig, OverlayConfig, Strategy, TextRegionConfig,
};
use crate::region::{BoundingBox, Candidate, Corner};

/// Marks pixels that are probably part of an overlay.
pub trait PixelClassifier: Send + Sync {
    /// Method name carried by every candidate built from this mask.
    fn method(&self) -> &'static str;

    /// Binary mask (0 or 255) of the frame's size.
    fn classify(&self, frame: &RgbImage) -> GrayImage;
}

impl<C: PixelClassifier + ?Sized> PixelClassifier for Box<C> {
    fn method(&self) -> &'static str {
        (**self).method()
    }

    fn classify(&self, frame: &RgbImage) -> GrayImage {
        (**self).classify(frame)
    }
}

/// Returns candidate boxes for one frame.
pub trait CandidateDetector: Send + Sync {
    /// Name used in logs.
    fn method(&self) -> &'static str;

    /// Candidates found in `frame`, in raster order of their contours.
    fn detect(&self, frame: &RgbImage) -> Vec<Candidate>;
}

/// Near-white pixels by HSV band alone.
#[derive(Debug, Clone, Copy)]
pub struct ColorOpacity {
    /// Accepted bands.
    pub color: ColorConfig,
}

impl PixelClassifier for ColorOpacity {
    fn method(&self) -> &'static str {
        Strategy::Color.as_str()
    }

    fn classify(&self, frame: &RgbImage) -> GrayImage {
        mask::color_mask(frame, &self.color)
    }
}

/// Near-white pixels that also stand out from a heavily blurred copy of the frame.
#[derive(Debug, Clone, Copy)]
pub struct OverlayIsolation {
    /// Accepted bands.
    pub color: ColorConfig,
    /// Blur-difference settings.
    pub overlay: OverlayConfig,
}

impl PixelClassifier for OverlayIsolation {
    fn method(&self) -> &'static str {
        Strategy::Overlay.as_str()
    }

    fn classify(&self, frame: &RgbImage) -> GrayImage {
        let color = mask::color_mask(frame, &self.color);
        let sharp = mask::blur_difference_mask(frame, &self.overlay);
        mask::intersect(&color, &sharp)
    }
}

/// Near-white pixels close to a strong gradient.
#[derive(Debug, Clone, Copy)]
pub struct EdgeFusion {
    /// Accepted bands.
    pub color: ColorConfig,
    /// Gradient settings.
    pub edges: EdgeConfig,
}

impl PixelClassifier for EdgeFusion {
    fn method(&self) -> &'static str {
        Strategy::Edges.as_str()
    }

    fn classify(&self, frame: &RgbImage) -> GrayImage {
        let color = mask::color_mask(frame, &self.color);
        let spread = KernelSize::new(self.edges.spread, self.edges.spread);
        let edges = morphology::dilate(&mask::edge_mask(frame, &self.edges), spread);
        mask::intersect(&color, &edges)
    }
}

/// Bright regions that survive a rising luma threshold with little change.
#[derive(Debug, Clone, Copy)]
pub struct TextRegions {
    /// Sweep and area bounds.
    pub regions: TextRegionConfig,
}

impl PixelClassifier for TextRegions {
    fn method(&self) -> &'static str {
        Strategy::TextRegions.as_str()
    }

    fn classify(&self, frame: &RgbImage) -> GrayImage {
        mask::stable_region_mask(frame, &self.regions)
    }
}

/// Build the classifier for a configured strategy.
#[must_use]
pub fn classifier_for(strategy: Strategy, config: &LocatorConfig) -> Box<dyn PixelClassifier> {
    match strategy {
        Strategy::Color => Box::new(ColorOpacity {
            color: config.color,
        }),
        Strategy::Overlay => Box::new(OverlayIsolation {
            color: config.color,
            overlay: config.overlay,
        }),
        Strategy::Edges => Box::new(EdgeFusion {
            color: config.color,
            edges: config.edges,
        }),
        Strategy::TextRegions => Box::new(TextRegions {
            regions: config.text_regions,
        }),
    }
}

/// Whole-frame search with one classifier.
#[derive(Debug, Clone)]
pub struct RegionDetector<C> {
    classifier: C,
    morphology: MorphologyConfig,
    filter: ContourFilter,
}

impl<C: PixelClassifier> RegionDetector<C> {
    /// Wrap a classifier with the configured cleanup and contour filter.
    pub fn new(classifier: C, config: &LocatorConfig) -> Self {
        Self {
            classifier,
            morphology: config.morphology,
            filter: config.filter,
        }
    }
}

impl<C: PixelClassifier> CandidateDetector for RegionDetector<C> {
    fn method(&self) -> &'static str {
        self.classifier.method()
    }

    fn detect(&self, frame: &RgbImage) -> Vec<Candidate> {
        let raw = self.classifier.classify(frame);
        let cleaned = morphology::consolidate(&raw, &self.morphology);
        extract_candidates(
            &cleaned,
            (0, 0),
            frame.dimensions(),
            &self.filter,
            self.classifier.method(),
        )
    }
}

/// Corner-restricted search: each corner is scored independently and only the
/// best corner's candidates are returned.
#[derive(Debug, Clone)]
pub struct CornerScan<C> {
    classifier: C,
    morphology: MorphologyConfig,
    filter: ContourFilter,
    corners: CornerConfig,
}

impl<C: PixelClassifier> CornerScan<C> {
    /// Wrap a classifier with the configured cleanup, filter and corner geometry.
    pub fn new(classifier: C, config: &LocatorConfig) -> Self {
        Self {
            classifier,
            morphology: config.morphology,
            filter: config.filter,
            corners: config.corners,
        }
    }

    /// Origin and size of a corner region in a `width x height` frame.
    #[must_use]
    pub fn corner_region(&self, corner: Corner, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let side = |fraction: f32, extent: u32| -> u32 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let share = (extent as f32 * fraction) as u32;
            share.max(self.corners.min_extent).min(extent)
        };
        let cw = side(self.corners.width_fraction, width);
        let ch = side(self.corners.height_fraction, height);
        let (x, y) = match corner {
            Corner::TopLeft => (0, 0),
            Corner::TopRight => (width - cw, 0),
            Corner::BottomLeft => (0, height - ch),
            Corner::BottomRight => (width - cw, height - ch),
        };
        (x, y, cw, ch)
    }
}

impl<C: PixelClassifier> CandidateDetector for CornerScan<C> {
    fn method(&self) -> &'static str {
        self.classifier.method()
    }

    fn detect(&self, frame: &RgbImage) -> Vec<Candidate> {
        let (width, height) = frame.dimensions();
        let raw = self.classifier.classify(frame);

        let mut best: Option<(u64, Vec<Candidate>)> = None;
        for corner in Corner::ALL {
            let (x, y, cw, ch) = self.corner_region(corner, width, height);
            if cw == 0 || ch == 0 {
                continue;
            }
            let region = imageops::crop_imm(&raw, x, y, cw, ch).to_image();
            let cleaned = morphology::consolidate(&region, &self.morphology);
            let mut found = extract_candidates(
                &cleaned,
                (x, y),
                (width, height),
                &self.filter,
                self.classifier.method(),
            );
            let score: u64 = found.iter().map(|c| u64::from(c.area)).sum();
            log::trace!("Corner {} scored {score}", corner.as_str());
            if score == 0 {
                continue;
            }
            if best.as_ref().is_none_or(|(top, _)| score > *top) {
                for candidate in &mut found {
                    candidate.corner = Some(corner);
                }
                best = Some((score, found));
            }
        }

        best.map(|(_, found)| found).unwrap_or_default()
    }
}

/// Ordered set of detectors run on every frame.
#[derive(Default)]
pub struct DetectorPipeline {
    detectors: Vec<Box<dyn CandidateDetector>>,
}

impl DetectorPipeline {
    /// One detector per configured strategy, using the corner scan when enabled.
    #[must_use]
    pub fn from_config(config: &LocatorConfig) -> Self {
        let mut pipeline = Self::default();
        for &strategy in &config.strategies {
            let classifier = classifier_for(strategy, config);
            if config.corners.enabled {
                pipeline.push(Box::new(CornerScan::new(classifier, config)));
            } else {
                pipeline.push(Box::new(RegionDetector::new(classifier, config)));
            }
        }
        pipeline
    }

    /// Append a detector.
    pub fn push(&mut self, detector: Box<dyn CandidateDetector>) {
        self.detectors.push(detector);
    }

    /// Number of detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Whether the pipeline has no detectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Method names in run order.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.method()).collect()
    }

    /// Candidates from every detector, concatenated in detector order.
    #[must_use]
    pub fn detect(&self, frame: &RgbImage) -> Vec<Candidate> {
        self.detectors
            .iter()
            .flat_map(|detector| {
                let found = detector.detect(frame);
                log::trace!("{} found {} candidate(s)", detector.method(), found.len());
                found
            })
            .collect()
    }
}

impl std::fmt::Debug for DetectorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorPipeline")
            .field("methods", &self.methods())
            .finish()
    }
}

/// Turn the components of a cleaned mask into padded, clamped candidates.
///
/// `mask` covers a region whose top-left corner sits at `origin` in a frame of
/// size `frame`. Area bounds are relative to the mask's own area.
#[must_use]
pub fn extract_candidates(
    mask: &GrayImage,
    origin: (u32, u32),
    frame: (u32, u32),
    filter: &ContourFilter,
    method: &'static str,
) -> Vec<Candidate> {
    let labels = components::label_mask(mask);
    let region_area = f64::from(mask.width()) * f64::from(mask.height());
    let min_area = match filter.area {
        AreaPolicy::Relative { min_fraction, .. } => min_fraction * region_area,
        AreaPolicy::Absolute {
            min_width,
            min_height,
            ..
        } => f64::from(min_width) * f64::from(min_height),
    };

    let mut candidates = Vec::new();
    for component in &labels.components {
        let (w, h) = (component.width(), component.height());
        let sized = match filter.area {
            AreaPolicy::Relative {
                min_fraction,
                max_fraction,
            } => {
                let share = f64::from(component.area) / region_area;
                share > min_fraction && share < max_fraction
            }
            AreaPolicy::Absolute {
                min_width,
                max_width,
                min_height,
                max_height,
            } => (min_width..=max_width).contains(&w) && (min_height..=max_height).contains(&h),
        };
        if !sized {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let aspect = w as f32 / h as f32;
        if aspect <= filter.min_aspect || aspect >= filter.max_aspect {
            continue;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let (pad_x, pad_y) = (
            (w as f32 * filter.pad_x) as i64,
            (h as f32 * filter.pad_y) as i64,
        );
        let left = i64::from(origin.0 + component.min_x);
        let top = i64::from(origin.1 + component.min_y);
        let Some(bbox) = BoundingBox::from_edges_clamped(
            left - pad_x,
            top - pad_y,
            left + i64::from(w) + pad_x,
            top + i64::from(h) + pad_y,
            frame.0,
            frame.1,
            filter.edge_guard,
        ) else {
            continue;
        };
        if bbox.w <= filter.min_extent || bbox.h <= filter.min_extent {
            continue;
        }

        let confidence = if min_area > 0.0 {
            #[allow(clippy::cast_possible_truncation)]
            let score = (f64::from(component.area) / min_area / f64::from(filter.confidence_scale))
                as f32;
            score.min(1.0)
        } else {
            1.0
        };

        candidates.push(Candidate {
            bbox,
            confidence,
            area: component.area,
            method,
            corner: None,
        });
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame_with_box(w: u32, h: u32, value: u8, bx: (u32, u32, u32, u32)) -> RgbImage {
        let (x0, y0, bw, bh) = bx;
        RgbImage::from_fn(w, h, |x, y| {
            if (x0..x0 + bw).contains(&x) && (y0..y0 + bh).contains(&y) {
                Rgb([value, value, value])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn mask_with(w: u32, h: u32, on: impl Fn(u32, u32) -> bool) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| image::Luma([if on(x, y) { 255 } else { 0 }]))
    }

    #[test]
    fn overlay_detector_pads_and_clamps_top_right_box() {
        let config = LocatorConfig::default();
        let frame = frame_with_box(640, 360, 230, (500, 20, 100, 40));
        let detector = RegionDetector::new(
            OverlayIsolation {
                color: config.color,
                overlay: config.overlay,
            },
            &config,
        );
        let found = detector.detect(&frame);
        assert_eq!(found.len(), 1, "expected one candidate, got {found:?}");
        let c = &found[0];
        // Dilated blob spans x 486..614, y 14..68; padded by 38 and 27.
        assert_eq!(c.bbox, BoundingBox::new(448, 1, 190, 94));
        assert!((c.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(c.method, "color_opacity_detection");
        assert!(c.bbox.fits(640, 360));
    }

    #[test]
    fn every_strategy_finds_a_flat_white_box() {
        let config = LocatorConfig::default();
        let frame = frame_with_box(640, 360, 250, (500, 20, 100, 40));
        for strategy in [
            Strategy::Color,
            Strategy::Overlay,
            Strategy::Edges,
            Strategy::TextRegions,
        ] {
            let detector = RegionDetector::new(classifier_for(strategy, &config), &config);
            let found = detector.detect(&frame);
            assert_eq!(found.len(), 1, "{strategy:?} found {found:?}");
            assert_eq!(found[0].bbox, BoundingBox::new(448, 1, 190, 94), "{strategy:?}");
            assert_eq!(found[0].method, strategy.as_str());
        }
    }

    #[test]
    fn black_frame_has_no_candidates() {
        let config = LocatorConfig::default();
        let pipeline = DetectorPipeline::from_config(&config);
        assert!(pipeline.detect(&RgbImage::new(320, 180)).is_empty());
    }

    #[test]
    fn filter_rejects_square_and_oversized_blobs() {
        let filter = ContourFilter::default();
        let square = mask_with(200, 200, |x, y| (50..90).contains(&x) && (50..90).contains(&y));
        assert!(extract_candidates(&square, (0, 0), (200, 200), &filter, "t").is_empty());

        let huge = mask_with(200, 100, |x, y| (10..190).contains(&x) && (20..80).contains(&y));
        assert!(extract_candidates(&huge, (0, 0), (200, 100), &filter, "t").is_empty());

        let line = mask_with(400, 100, |x, y| (10..390).contains(&x) && (50..52).contains(&y));
        assert!(extract_candidates(&line, (0, 0), (400, 100), &filter, "t").is_empty());
    }

    #[test]
    fn absolute_policy_bounds_box_size() {
        let filter = ContourFilter {
            area: AreaPolicy::Absolute {
                min_width: 30,
                max_width: 200,
                min_height: 10,
                max_height: 80,
            },
            ..ContourFilter::default()
        };
        let ok = mask_with(400, 200, |x, y| (100..160).contains(&x) && (50..70).contains(&y));
        let found = extract_candidates(&ok, (0, 0), (400, 200), &filter, "t");
        assert_eq!(found.len(), 1);
        // 60x20 padded by 18 and 10 on each side.
        assert_eq!(found[0].bbox, BoundingBox::new(82, 40, 96, 40));

        let wide = mask_with(400, 200, |x, y| (10..290).contains(&x) && (50..80).contains(&y));
        assert!(extract_candidates(&wide, (0, 0), (400, 200), &filter, "t").is_empty());
    }

    #[test]
    fn confidence_grows_with_area_and_saturates() {
        let filter = ContourFilter::default();
        // Region area 100_000 -> minimum area 100 px.
        let small = mask_with(500, 200, |x, y| (100..130).contains(&x) && (100..110).contains(&y));
        let found = extract_candidates(&small, (0, 0), (500, 200), &filter, "t");
        assert_eq!(found.len(), 1);
        assert!((found[0].confidence - 0.3).abs() < 1e-6);

        let large = mask_with(500, 200, |x, y| (100..200).contains(&x) && (100..130).contains(&y));
        let found = extract_candidates(&large, (0, 0), (500, 200), &filter, "t");
        assert!((found[0].confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn candidates_keep_edge_guard_and_positive_origin() {
        let filter = ContourFilter::default();
        let mask = mask_with(300, 100, |x, y| (250..300).contains(&x) && (0..20).contains(&y));
        let found = extract_candidates(&mask, (0, 0), (300, 100), &filter, "t");
        assert_eq!(found.len(), 1);
        let b = found[0].bbox;
        assert_eq!((b.x, b.y), (235, 1));
        assert_eq!(b.right(), 298);
        assert!(b.fits(300, 100));
    }

    #[test]
    fn corner_scan_picks_the_occupied_corner() {
        let mut config = LocatorConfig::default();
        config.corners.enabled = true;
        let frame = frame_with_box(1280, 720, 240, (1100, 650, 100, 30));
        let scan = CornerScan::new(
            ColorOpacity {
                color: config.color,
            },
            &config,
        );
        assert_eq!(
            scan.corner_region(Corner::BottomRight, 1280, 720),
            (896, 504, 384, 216)
        );

        let found = scan.detect(&frame);
        assert_eq!(found.len(), 1, "got {found:?}");
        let c = &found[0];
        assert_eq!(c.corner, Some(Corner::BottomRight));
        assert!(c.bbox.x <= 1100 && c.bbox.right() >= 1200);
        assert!(c.bbox.y <= 650 && c.bbox.bottom() >= 680);
        assert!(c.bbox.fits(1280, 720));
    }

    #[test]
    fn corner_region_respects_minimum_extent() {
        let config = LocatorConfig::default();
        let scan = CornerScan::new(
            ColorOpacity {
                color: config.color,
            },
            &config,
        );
        assert_eq!(scan.corner_region(Corner::TopRight, 200, 80), (100, 0, 100, 80));
    }

    #[test]
    fn pipeline_follows_configured_strategies() {
        let config = LocatorConfig {
            strategies: vec![Strategy::TextRegions, Strategy::Color],
            ..LocatorConfig::default()
        };
        let pipeline = DetectorPipeline::from_config(&config);
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.methods(), vec!["text_regions", "color_opacity"]);

        let frame = frame_with_box(640, 360, 250, (500, 20, 100, 40));
        let found = pipeline.detect(&frame);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bbox, found[1].bbox);
    }
}
