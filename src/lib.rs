//! Locate semi-transparent watermark overlays burned into video.
//!
//! Frames are sampled at a fixed interval, scanned for near-white,
//! locally sharp regions shaped like a line of text, clustered within each
//! frame and across time, and turned into a list of `{start, end, x, y, w, h}`
//! segments tiling the whole clip. The segments are ready for a region-based
//! blur or inpaint filter; every box has `x, y >= 1` and lies inside the frame.
//!
//! When no region recurs in enough frames, a fixed fallback band is reported
//! so downstream filters always have something to act on.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use video_watermark_locator::{LocatorConfig, WatermarkLocator};
//!
//! let locator = WatermarkLocator::new(LocatorConfig::default()).expect("valid config");
//! let report = locator.locate_file(Path::new("clip.mp4")).expect("readable video");
//! for s in &report.segments {
//!     println!("{:.2}-{:.2}s: {}x{}+{}+{}", s.start, s.end, s.w, s.h, s.x, s.y);
//! }
//! ```
//!
//! # Synthetic frames
//!
//! Any [`FrameSource`] can feed the pipeline. [`FnSource`] renders frames
//! from a closure, which is convenient for tests:
//!
//! ```no_run
//! use image::{Rgb, RgbImage};
//! use video_watermark_locator::{FnSource, LocatorConfig, WatermarkLocator};
//!
//! let mut clip = FnSource::new(640, 360, 30.0, 300, |_| {
//!     RgbImage::from_fn(640, 360, |x, y| {
//!         let inside = (500..600).contains(&x) && (20..60).contains(&y);
//!         if inside { Rgb([230, 230, 230]) } else { Rgb([0, 0, 0]) }
//!     })
//! });
//! let locator = WatermarkLocator::new(LocatorConfig::default()).unwrap();
//! let report = locator.locate(&mut clip).unwrap();
//! assert!(report.watermark_detected);
//! println!("{}", report.to_json(true).unwrap());
//! ```

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod detection;
mod engine;
pub mod error;
pub mod region;
pub mod sampler;
pub mod segments;
pub mod tracker;

pub use config::{LocatorConfig, MergeRule, Strategy, TrackingMode};
pub use engine::{LocateReport, WatermarkLocator, WatermarkSummary, FALLBACK_METHOD};
pub use error::{Error, Result};
pub use region::{BoundingBox, Candidate, Corner};
pub use sampler::{FfmpegSource, FnSource, FrameSource, VideoInfo};
pub use segments::Segment;
