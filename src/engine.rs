//! End-to-end localization: sampling, detection, clustering, tracking and
//! segment construction, assembled into one report.

use std::path::Path;

use image::RgbImage;
use serde::Serialize;

use crate::cluster::{cluster_candidates, Cluster};
use crate::config::{LocatorConfig, TrackingMode};
use crate::detection::DetectorPipeline;
use crate::error::Result;
use crate::sampler::{FfmpegSource, Frame, FrameSampler, FrameSource, VideoInfo};
use crate::segments::{timeline_end, Segment, SegmentBuilder};
use crate::tracker::{fallback_region, TemporalTracker, TrackOutcome};

/// Method reported for the fallback region.
pub const FALLBACK_METHOD: &str = "fallback_center";

/// The region behind the verdict: the best persistent cluster or the fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatermarkSummary {
    /// A persistent cluster was found.
    pub found: bool,
    /// The region is the fallback band.
    pub fallback: bool,
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
    /// Highest supporting confidence, or the fallback confidence.
    pub confidence: f32,
    /// Sampled frames supporting the cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<u32>,
    /// Detector method, or `fallback_center`.
    pub method: &'static str,
}

/// Result of one localization run, serialized as the tool's JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocateReport {
    /// Always true; failures are reported as errors instead.
    pub success: bool,
    /// Source video metadata.
    pub video_info: VideoInfo,
    /// Whether a persistent watermark was found.
    pub watermark_detected: bool,
    /// Primary region over time, tiling the timeline.
    pub segments: Vec<Segment>,
    /// Further simultaneous regions, each tiling the timeline on its own.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_regions: Vec<Vec<Segment>>,
    /// Number of sampled frames.
    pub frames_analyzed: usize,
    /// Best cluster or fallback region. Absent when fallback is disabled and
    /// nothing was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<WatermarkSummary>,
}

impl LocateReport {
    /// Serialize the report as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialize`] if serialization fails.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let text = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }
}

/// Locates watermarks in videos.
///
/// Create once with [`WatermarkLocator::new()`] and reuse for any number of
/// videos; runs share no state.
pub struct WatermarkLocator {
    config: LocatorConfig,
    pipeline: DetectorPipeline,
}

impl WatermarkLocator {
    /// Create a locator with one detector per configured strategy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if a configuration value is out of range.
    pub fn new(config: LocatorConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = DetectorPipeline::from_config(&config);
        log::debug!("Detector pipeline: {:?}", pipeline.methods());
        Ok(Self { config, pipeline })
    }

    /// Create a locator with a caller-built detector pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if a configuration value is out of range.
    pub fn with_pipeline(config: LocatorConfig, pipeline: DetectorPipeline) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, pipeline })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Detect and spatially cluster candidates in one frame.
    #[must_use]
    pub fn detect_frame(&self, frame: &RgbImage) -> Vec<Cluster> {
        let candidates = self.pipeline.detect(frame);
        cluster_candidates(&candidates, self.config.cluster, frame.width(), frame.height())
    }

    /// Analyse a video file decoded with ffmpeg.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SourceUnavailable`] if the file cannot be opened
    /// and [`crate::Error::NoFramesExtracted`] if it decodes to nothing.
    pub fn locate_file(&self, path: &Path) -> Result<LocateReport> {
        let mut source = FfmpegSource::new(path);
        self.locate(&mut source)
    }

    /// Analyse any frame source.
    ///
    /// # Errors
    ///
    /// See [`WatermarkLocator::locate_file`].
    pub fn locate<S: FrameSource + ?Sized>(&self, source: &mut S) -> Result<LocateReport> {
        let sampler = FrameSampler::new(&self.config);
        let mut tracker = TemporalTracker::new(self.config.cluster);
        let batch_size = self.batch_size();
        let mut batch: Vec<Frame> = Vec::with_capacity(batch_size);
        let mut last_timestamp = 0.0_f64;

        let summary = sampler.run(source, |frame| {
            last_timestamp = frame.timestamp;
            batch.push(frame);
            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut tracker);
            }
            Ok(())
        })?;
        self.flush(&mut batch, &mut tracker);

        let mut info = summary.info;
        let outcome = tracker.finish(&self.config.tracking);
        let end = timeline_end(info.duration, last_timestamp, self.config.sample_interval);
        if info.fps.is_some() && end > info.duration {
            log::warn!(
                "Reported duration {:.2}s ends before the last sample; extending to {end:.2}s",
                info.duration
            );
            info.duration = end;
        }
        let report = self.assemble(info, summary.frames_sampled, &outcome, end);

        log::info!(
            "{}: watermark_detected={} segments={} additional_regions={}",
            source.location().display(),
            report.watermark_detected,
            report.segments.len(),
            report.additional_regions.len()
        );
        Ok(report)
    }

    fn batch_size(&self) -> usize {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel {
                return rayon::current_num_threads().max(1) * 2;
            }
        }
        1
    }

    /// Detect a batch of frames and feed the results to the tracker in order.
    fn flush(&self, batch: &mut Vec<Frame>, tracker: &mut TemporalTracker) {
        if batch.is_empty() {
            return;
        }
        let results = self.detect_batch(batch);
        for (frame, clusters) in batch.drain(..).zip(results) {
            log::debug!(
                "Frame {} at {:.2}s: {} cluster(s)",
                frame.index,
                frame.timestamp,
                clusters.len()
            );
            tracker.observe_frame(frame.timestamp, clusters);
        }
    }

    fn detect_batch(&self, frames: &[Frame]) -> Vec<Vec<Cluster>> {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel && frames.len() > 1 {
                use rayon::prelude::*;
                return frames
                    .par_iter()
                    .map(|frame| self.detect_frame(&frame.image))
                    .collect();
            }
        }

        frames
            .iter()
            .map(|frame| self.detect_frame(&frame.image))
            .collect()
    }

    fn assemble(
        &self,
        info: VideoInfo,
        frames_analyzed: usize,
        outcome: &TrackOutcome,
        end: f64,
    ) -> LocateReport {
        let builder = SegmentBuilder::new(&self.config, info.width, info.height);

        if let Some(winner) = outcome.winner() {
            let mut lanes = match self.config.tracking.mode {
                TrackingMode::Single => vec![builder.build(&winner.detections, end)],
                TrackingMode::PerRegion => builder.lanes(&outcome.tracks, end),
            };
            let segments = if lanes.is_empty() {
                Vec::new()
            } else {
                lanes.remove(0)
            };
            log::info!(
                "Watermark at {} seen in {} of {} frame(s) (confidence {:.2}, {})",
                winner.bounds,
                winner.frames,
                outcome.frames_observed,
                winner.confidence,
                winner.method
            );
            let b = winner.bounds;
            return LocateReport {
                success: true,
                video_info: info,
                watermark_detected: true,
                segments,
                additional_regions: lanes,
                frames_analyzed,
                watermark: Some(WatermarkSummary {
                    found: true,
                    fallback: false,
                    x: b.x,
                    y: b.y,
                    w: b.w,
                    h: b.h,
                    confidence: winner.confidence,
                    detections: Some(winner.frames),
                    method: winner.method,
                }),
            };
        }

        let fallback = fallback_region(&self.config.fallback, info.width, info.height);
        match fallback {
            Some((b, _)) => log::info!(
                "None of {} region(s) persisted in {:.1} of {} frame(s); using fallback {b}",
                outcome.clusters_seen,
                outcome.required_support,
                outcome.frames_observed
            ),
            None => log::info!(
                "None of {} region(s) persisted in {:.1} of {} frame(s); fallback disabled",
                outcome.clusters_seen,
                outcome.required_support,
                outcome.frames_observed
            ),
        }

        LocateReport {
            success: true,
            video_info: info,
            watermark_detected: false,
            segments: fallback
                .map(|(b, _)| vec![Segment::spanning(b, end)])
                .unwrap_or_default(),
            additional_regions: Vec::new(),
            frames_analyzed,
            watermark: fallback.map(|(b, confidence)| WatermarkSummary {
                found: false,
                fallback: true,
                x: b.x,
                y: b.y,
                w: b.w,
                h: b.h,
                confidence,
                detections: None,
                method: FALLBACK_METHOD,
            }),
        }
    }
}

impl std::fmt::Debug for WatermarkLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkLocator")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
