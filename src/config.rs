//! Tunable thresholds for every pipeline stage.
//!
//! All constants that shape detection live here so they can be tuned and
//! regression-tested without touching the algorithms. Values load from TOML;
//! any omitted field keeps its default.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Full configuration of one localization run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocatorConfig {
    /// Seconds between sampled frames.
    pub sample_interval: f64,
    /// Frame cadence used when the container reports no frame rate.
    pub unknown_fps_cadence: u64,
    /// Frame rate assumed for timestamps when the container reports none.
    pub assumed_fps: f64,
    /// Detector strategies run on every sampled frame, in order.
    pub strategies: Vec<Strategy>,
    /// Near-white color bands.
    pub color: ColorConfig,
    /// Blur-difference overlay isolation.
    pub overlay: OverlayConfig,
    /// Edge + color fusion.
    pub edges: EdgeConfig,
    /// Stable bright-region extraction.
    pub text_regions: TextRegionConfig,
    /// Mask cleanup applied before contour extraction.
    pub morphology: MorphologyConfig,
    /// Contour acceptance and padding.
    pub filter: ContourFilter,
    /// Corner-restricted search.
    pub corners: CornerConfig,
    /// Rule for merging boxes that denote the same overlay.
    pub cluster: MergeRule,
    /// Cross-frame persistence filter.
    pub tracking: TrackingConfig,
    /// Region emitted when nothing persists.
    pub fallback: FallbackPolicy,
    /// Segment construction.
    pub segments: SegmentConfig,
    /// Detect batches of frames on the thread pool when the `parallel` feature is on.
    pub parallel: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            sample_interval: 0.5,
            unknown_fps_cadence: 15,
            assumed_fps: 30.0,
            strategies: vec![Strategy::Overlay],
            color: ColorConfig::default(),
            overlay: OverlayConfig::default(),
            edges: EdgeConfig::default(),
            text_regions: TextRegionConfig::default(),
            morphology: MorphologyConfig::default(),
            filter: ContourFilter::default(),
            corners: CornerConfig::default(),
            cluster: MergeRule::default(),
            tracking: TrackingConfig::default(),
            fallback: FallbackPolicy::default(),
            segments: SegmentConfig::default(),
            parallel: true,
        }
    }
}

impl LocatorConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, [`Error::ConfigParse`]
    /// if it is not valid TOML for this schema, and [`Error::InvalidConfig`]
    /// if a value is out of range.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// See [`LocatorConfig::from_toml_file`].
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Padding applied before and after each detection when building segments.
    #[must_use]
    pub fn time_pad(&self) -> f64 {
        self.segments
            .time_pad
            .unwrap_or(self.sample_interval / 2.0)
    }

    /// Check that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        fn ensure(ok: bool, msg: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(Error::InvalidConfig(msg.to_string()))
            }
        }

        ensure(
            self.sample_interval.is_finite() && self.sample_interval > 0.0,
            "sample_interval must be positive",
        )?;
        ensure(self.unknown_fps_cadence >= 1, "unknown_fps_cadence must be at least 1")?;
        ensure(self.assumed_fps > 0.0, "assumed_fps must be positive")?;
        ensure(!self.strategies.is_empty(), "at least one strategy is required")?;
        ensure(
            self.overlay.blur_kernel >= 3 && self.overlay.blur_kernel % 2 == 1,
            "overlay.blur_kernel must be odd and at least 3",
        )?;
        ensure(self.edges.spread > 0, "edges.spread must be at least 1")?;
        ensure(
            self.text_regions.level_step > 0
                && self.text_regions.min_level < self.text_regions.max_level,
            "text_regions levels must form an increasing sweep",
        )?;
        ensure(
            self.text_regions.min_area < self.text_regions.max_area,
            "text_regions.min_area must be below max_area",
        )?;
        ensure(
            self.morphology.clean_kernel.is_valid() && self.morphology.dilate_kernel.is_valid(),
            "morphology kernels must be non-empty",
        )?;
        ensure(
            self.filter.min_aspect < self.filter.max_aspect,
            "filter.min_aspect must be below max_aspect",
        )?;
        ensure(self.filter.area.is_valid(), "filter.area bounds are inverted")?;
        ensure(
            self.filter.pad_x >= 0.0 && self.filter.pad_y >= 0.0,
            "filter padding must not be negative",
        )?;
        ensure(
            self.filter.confidence_scale > 0.0,
            "filter.confidence_scale must be positive",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.corners.width_fraction)
                && (0.0..=1.0).contains(&self.corners.height_fraction),
            "corner fractions must lie in [0, 1]",
        )?;
        if let MergeRule::Overlap { fraction } = self.cluster {
            ensure(
                fraction > 0.0 && fraction <= 1.0,
                "cluster.fraction must lie in (0, 1]",
            )?;
        }
        ensure(
            self.tracking.persistence > 0.0 && self.tracking.persistence <= 1.0,
            "tracking.persistence must lie in (0, 1]",
        )?;
        if let FallbackPolicy::Region { confidence, .. } = self.fallback {
            ensure(
                (0.0..=1.0).contains(&confidence),
                "fallback.confidence must lie in [0, 1]",
            )?;
        }
        ensure(self.time_pad() >= 0.0, "segments.time_pad must not be negative")?;
        Ok(())
    }
}

/// Interchangeable per-frame detector strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Near-white color bands only.
    Color,
    /// Color bands intersected with the blur-difference mask.
    Overlay,
    /// Color bands intersected with Sobel edges.
    Edges,
    /// Stable bright regions from a threshold sweep.
    TextRegions,
}

impl Strategy {
    /// Method name used in provenance tags and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Strategy::Color => "color_opacity",
            Strategy::Overlay => "color_opacity_detection",
            Strategy::Edges => "edge_color_fusion",
            Strategy::TextRegions => "text_regions",
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "color" => Ok(Strategy::Color),
            "overlay" => Ok(Strategy::Overlay),
            "edges" => Ok(Strategy::Edges),
            "text_regions" => Ok(Strategy::TextRegions),
            other => Err(format!(
                "unknown strategy '{other}' (expected color, overlay, edges, text-regions)"
            )),
        }
    }
}

/// An HSV band on the 0-255 saturation/value scale. Hue is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorBand {
    /// Highest saturation accepted.
    pub max_saturation: u8,
    /// Lowest value (brightness) accepted.
    pub min_value: u8,
    /// Highest value (brightness) accepted.
    pub max_value: u8,
}

impl ColorBand {
    /// Whether a pixel with the given saturation and value falls in the band.
    #[must_use]
    pub fn contains(&self, saturation: u8, value: u8) -> bool {
        saturation <= self.max_saturation && value >= self.min_value && value <= self.max_value
    }
}

/// Near-white overlay colors.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorConfig {
    /// Bright, unsaturated pixels.
    pub primary: ColorBand,
    /// Looser band for gray, opacity-blended pixels.
    pub secondary: Option<ColorBand>,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            primary: ColorBand {
                max_saturation: 40,
                min_value: 180,
                max_value: 255,
            },
            secondary: Some(ColorBand {
                max_saturation: 50,
                min_value: 150,
                max_value: 220,
            }),
        }
    }
}

/// Blur-difference settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    /// Gaussian kernel size (odd). Sigma follows `0.3 * ((k - 1) / 2 - 1) + 0.8`.
    pub blur_kernel: u32,
    /// Minimum luma difference between a pixel and its blurred surrounding.
    pub diff_threshold: u8,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 51,
            diff_threshold: 15,
        }
    }
}

/// Edge fusion settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EdgeConfig {
    /// Minimum Sobel gradient magnitude on the 0-255 luma scale.
    pub magnitude_threshold: f32,
    /// Side of the square dilation that thickens edge pixels before they are
    /// intersected with the color mask.
    pub spread: u32,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            magnitude_threshold: 100.0,
            spread: 9,
        }
    }
}

/// Threshold-sweep stable region settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextRegionConfig {
    /// First luma threshold of the sweep.
    pub min_level: u8,
    /// Last luma threshold of the sweep.
    pub max_level: u8,
    /// Distance between consecutive thresholds.
    pub level_step: u8,
    /// Largest relative area change between consecutive levels for a stable region.
    pub max_variation: f32,
    /// Smallest region kept, in pixels.
    pub min_area: u32,
    /// Largest region kept, in pixels.
    pub max_area: u32,
}

impl Default for TextRegionConfig {
    fn default() -> Self {
        Self {
            min_level: 120,
            max_level: 240,
            level_step: 20,
            max_variation: 0.5,
            min_area: 30,
            max_area: 8000,
        }
    }
}

/// Rectangular structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelSize {
    /// Horizontal extent.
    pub width: u32,
    /// Vertical extent.
    pub height: u32,
}

impl KernelSize {
    /// Create a kernel size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn is_valid(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Morphological cleanup of candidate masks.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MorphologyConfig {
    /// Kernel for the closing and opening passes.
    pub clean_kernel: KernelSize,
    /// Kernel that merges adjacent character strokes.
    pub dilate_kernel: KernelSize,
    /// Number of dilation passes.
    pub dilate_iterations: u32,
}

impl Default for MorphologyConfig {
    fn default() -> Self {
        Self {
            clean_kernel: KernelSize::new(5, 3),
            dilate_kernel: KernelSize::new(15, 8),
            dilate_iterations: 2,
        }
    }
}

/// Contour size policy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AreaPolicy {
    /// Contour area as a fraction of the searched region (both bounds exclusive).
    Relative {
        /// Lower bound.
        min_fraction: f64,
        /// Upper bound.
        max_fraction: f64,
    },
    /// Strict small-watermark bounds on the contour's box (inclusive).
    Absolute {
        /// Narrowest box.
        min_width: u32,
        /// Widest box.
        max_width: u32,
        /// Shortest box.
        min_height: u32,
        /// Tallest box.
        max_height: u32,
    },
}

impl AreaPolicy {
    fn is_valid(&self) -> bool {
        match *self {
            AreaPolicy::Relative {
                min_fraction,
                max_fraction,
            } => min_fraction >= 0.0 && min_fraction < max_fraction,
            AreaPolicy::Absolute {
                min_width,
                max_width,
                min_height,
                max_height,
            } => min_width <= max_width && min_height <= max_height,
        }
    }
}

/// Acceptance rules and padding for extracted contours.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContourFilter {
    /// Size policy.
    pub area: AreaPolicy,
    /// Lowest `w / h` accepted (exclusive).
    pub min_aspect: f32,
    /// Highest `w / h` accepted (exclusive).
    pub max_aspect: f32,
    /// Horizontal padding as a fraction of the contour width, per side.
    pub pad_x: f32,
    /// Vertical padding as a fraction of the contour height, per side.
    pub pad_y: f32,
    /// Pixels kept free at the right and bottom frame edges.
    pub edge_guard: u32,
    /// Padded boxes must be wider and taller than this.
    pub min_extent: u32,
    /// Confidence is `area / min_area / confidence_scale`, capped at 1.
    pub confidence_scale: f32,
}

impl Default for ContourFilter {
    fn default() -> Self {
        Self {
            area: AreaPolicy::Relative {
                min_fraction: 0.001,
                max_fraction: 0.15,
            },
            min_aspect: 1.5,
            max_aspect: 15.0,
            pad_x: 0.3,
            pad_y: 0.5,
            edge_guard: 2,
            min_extent: 10,
            confidence_scale: 10.0,
        }
    }
}

/// Corner-restricted search.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CornerConfig {
    /// Search only the best-scoring corner instead of the whole frame.
    pub enabled: bool,
    /// Corner region width as a fraction of the frame width.
    pub width_fraction: f32,
    /// Corner region height as a fraction of the frame height.
    pub height_fraction: f32,
    /// Minimum corner region extent in pixels (capped by the frame).
    pub min_extent: u32,
}

impl Default for CornerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width_fraction: 0.3,
            height_fraction: 0.3,
            min_extent: 100,
        }
    }
}

/// How two boxes are judged to denote the same overlay.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MergeRule {
    /// Merge when the intersection exceeds `fraction` of the smaller box.
    Overlap {
        /// Required overlap share.
        fraction: f64,
    },
    /// Merge when centers are within `max_dx`/`max_dy` (exclusive); merged
    /// bounds are grown by `margin`.
    CenterDistance {
        /// Horizontal center tolerance.
        max_dx: u32,
        /// Vertical center tolerance.
        max_dy: u32,
        /// Outward margin applied to merged bounds.
        margin: u32,
    },
}

impl Default for MergeRule {
    fn default() -> Self {
        MergeRule::Overlap { fraction: 0.3 }
    }
}

/// Whether persistent clusters collapse to one winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Keep every persistent cluster as its own region.
    #[default]
    PerRegion,
    /// Keep only the best-ranked persistent cluster.
    Single,
}

impl FromStr for TrackingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "per_region" => Ok(TrackingMode::PerRegion),
            "single" => Ok(TrackingMode::Single),
            other => Err(format!(
                "unknown tracking mode '{other}' (expected per-region or single)"
            )),
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackingMode::PerRegion => "per-region",
            TrackingMode::Single => "single",
        })
    }
}

/// Cross-frame persistence filter.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingConfig {
    /// Collapse to one winner or keep every persistent region.
    pub mode: TrackingMode,
    /// Share of sampled frames a region must appear in.
    pub persistence: f64,
    /// Absolute minimum number of supporting frames.
    pub min_support: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            mode: TrackingMode::PerRegion,
            persistence: 0.2,
            min_support: 2,
        }
    }
}

impl TrackingConfig {
    /// Supporting frames needed out of `frame_count` sampled frames.
    #[must_use]
    pub fn required_support(&self, frame_count: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let share = frame_count as f64 * self.persistence;
        share.max(f64::from(self.min_support))
    }
}

/// What to emit when no region persists.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// A fixed band inset from the upper-left corner, as fractions of the frame.
    Region {
        /// Left inset.
        x_fraction: f64,
        /// Top inset.
        y_fraction: f64,
        /// Band width.
        w_fraction: f64,
        /// Band height.
        h_fraction: f64,
        /// Confidence reported for the fallback.
        confidence: f32,
    },
    /// Emit no segments at all.
    #[serde(rename = "none")]
    Disabled,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Region {
            x_fraction: 0.1,
            y_fraction: 0.1,
            w_fraction: 0.8,
            h_fraction: 0.15,
            confidence: 0.3,
        }
    }
}

/// Segment construction.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentConfig {
    /// Pixel distance in x and y under which two detections share a segment.
    pub position_tolerance: u32,
    /// Time padding around each detection; half the sample interval when unset.
    pub time_pad: Option<f64>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 30,
            time_pad: None,
        }
    }
}
