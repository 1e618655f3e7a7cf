//! Frame sampling at a fixed time cadence.
//!
//! A [`FrameSource`] knows how to probe a video and decode every `n`-th frame.
//! [`FrameSampler`] turns the configured interval in seconds into that cadence,
//! stamps each decoded frame with its time, and hands frames to the caller one
//! at a time so nothing beyond the current frame needs to stay in memory.

use std::path::{Path, PathBuf};

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use image::RgbImage;
use serde::Serialize;

use crate::config::LocatorConfig;
use crate::error::{Error, Result};

/// Global properties of the analysed video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Duration in seconds, `total_frames / fps` (0 when fps is unknown).
    pub duration: f64,
    /// Frame rate, absent when the container does not report one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Frame count reported by the container.
    #[serde(skip)]
    pub total_frames: u64,
}

impl VideoInfo {
    /// Build the metadata, deriving the duration from frame count and rate.
    #[must_use]
    pub fn new(width: u32, height: u32, fps: f64, total_frames: u64) -> Self {
        let known = fps.is_finite() && fps > 0.0;
        #[allow(clippy::cast_precision_loss)]
        let duration = if known {
            total_frames as f64 / fps
        } else {
            0.0
        };
        Self {
            width,
            height,
            duration,
            fps: known.then_some(fps),
            total_frames,
        }
    }
}

/// One sampled frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Index of the frame in the source stream.
    pub index: u64,
    /// Presentation time in seconds.
    pub timestamp: f64,
    /// Decoded RGB pixels.
    pub image: RgbImage,
}

/// Anything that can be probed and decoded into RGB frames.
pub trait FrameSource {
    /// Path or label used in error messages.
    fn location(&self) -> &Path;

    /// Read the video's metadata without decoding frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] when the source cannot be opened.
    fn probe(&mut self) -> Result<VideoInfo>;

    /// Decode frames `0, cadence, 2 * cadence, ...` in order, passing each
    /// frame's source index and pixels to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] when decoding cannot start, or the
    /// first error returned by `sink`.
    fn decode(
        &mut self,
        cadence: u64,
        sink: &mut dyn FnMut(u64, RgbImage) -> Result<()>,
    ) -> Result<()>;
}

/// Video file decoded by an external `ffmpeg`, probed with `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    path: PathBuf,
}

impl FfmpegSource {
    /// Create a source for a video file. Nothing is opened until [`FrameSource::probe`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for FfmpegSource {
    fn location(&self) -> &Path {
        &self.path
    }

    fn probe(&mut self) -> Result<VideoInfo> {
        if !self.path.is_file() {
            return Err(Error::source_unavailable(&self.path, "file not found"));
        }

        log::debug!("Running ffprobe on {}", self.path.display());
        let metadata = ffprobe::ffprobe(&self.path)
            .map_err(|e| Error::source_unavailable(&self.path, format!("ffprobe failed: {e:?}")))?;

        let stream = metadata
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| Error::source_unavailable(&self.path, "no video stream"))?;

        let dimension = |v: Option<i64>| v.and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
        let width = dimension(stream.width);
        let height = dimension(stream.height);

        let fps = parse_frame_rate(&stream.r_frame_rate)
            .or_else(|| parse_frame_rate(&stream.avg_frame_rate))
            .unwrap_or(0.0);

        let total_frames = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .or_else(|| {
                let duration = stream
                    .duration
                    .as_deref()
                    .or(metadata.format.duration.as_deref())
                    .and_then(|d| d.parse::<f64>().ok())?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let estimate = (duration * fps).round() as u64;
                (fps > 0.0 && duration > 0.0).then_some(estimate)
            })
            .unwrap_or(0);

        Ok(VideoInfo::new(width, height, fps, total_frames))
    }

    fn decode(
        &mut self,
        cadence: u64,
        sink: &mut dyn FnMut(u64, RgbImage) -> Result<()>,
    ) -> Result<()> {
        let select = format!("select='not(mod(n,{cadence}))'");
        let mut command = FfmpegCommand::new();
        command
            .hide_banner()
            .input(self.path.to_string_lossy())
            .args(["-vf", select.as_str(), "-vsync", "vfr"])
            .rawvideo();

        log::debug!(
            "Decoding every {cadence} frame(s) of {} with ffmpeg",
            self.path.display()
        );
        let mut child = command
            .spawn()
            .map_err(|e| Error::source_unavailable(&self.path, format!("ffmpeg failed to start: {e}")))?;
        let events = child
            .iter()
            .map_err(|e| Error::source_unavailable(&self.path, format!("ffmpeg output unreadable: {e}")))?;

        let mut index = 0u64;
        for event in events {
            match event {
                FfmpegEvent::OutputFrame(frame) => {
                    let Some(image) = RgbImage::from_raw(frame.width, frame.height, frame.data)
                    else {
                        log::warn!("Dropping malformed frame at index {index}");
                        index += cadence;
                        continue;
                    };
                    if let Err(e) = sink(index, image) {
                        let _ = child.kill();
                        return Err(e);
                    }
                    index += cadence;
                }
                FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, line) | FfmpegEvent::Error(line) => {
                    log::warn!("ffmpeg: {line}");
                }
                _ => {}
            }
        }

        if let Err(e) = child.wait() {
            log::warn!("ffmpeg did not exit cleanly: {e}");
        }
        Ok(())
    }
}

/// Frames produced by a closure, for synthetic clips and tests.
pub struct FnSource<F> {
    label: PathBuf,
    info: VideoInfo,
    render: F,
}

impl<F> FnSource<F>
where
    F: FnMut(u64) -> RgbImage,
{
    /// Create a clip of `total_frames` frames at `fps`, rendering frame `i` with `render(i)`.
    pub fn new(width: u32, height: u32, fps: f64, total_frames: u64, render: F) -> Self {
        Self {
            label: PathBuf::from("<synthetic>"),
            info: VideoInfo::new(width, height, fps, total_frames),
            render,
        }
    }
}

impl<F> FrameSource for FnSource<F>
where
    F: FnMut(u64) -> RgbImage,
{
    fn location(&self) -> &Path {
        &self.label
    }

    fn probe(&mut self) -> Result<VideoInfo> {
        Ok(self.info)
    }

    fn decode(
        &mut self,
        cadence: u64,
        sink: &mut dyn FnMut(u64, RgbImage) -> Result<()>,
    ) -> Result<()> {
        let step = usize::try_from(cadence.max(1)).unwrap_or(usize::MAX);
        for index in (0..self.info.total_frames).step_by(step) {
            sink(index, (self.render)(index))?;
        }
        Ok(())
    }
}

/// Outcome of a sampling pass.
#[derive(Debug, Clone, Copy)]
pub struct SampleSummary {
    /// Metadata of the source, with dimensions taken from decoded frames when
    /// the probe did not report them.
    pub info: VideoInfo,
    /// Number of frames handed to the visitor.
    pub frames_sampled: usize,
    /// Source frames between two samples.
    pub cadence: u64,
}

/// Converts a sampling interval in seconds into a frame cadence and timestamps.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    interval: f64,
    unknown_fps_cadence: u64,
    assumed_fps: f64,
}

impl FrameSampler {
    /// Create a sampler from the run configuration.
    #[must_use]
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            interval: config.sample_interval,
            unknown_fps_cadence: config.unknown_fps_cadence.max(1),
            assumed_fps: config.assumed_fps,
        }
    }

    /// Source frames between two samples: `round(fps * interval)`, at least 1.
    #[must_use]
    pub fn cadence(&self, fps: Option<f64>) -> u64 {
        match fps {
            Some(fps) if fps > 0.0 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let frames = (fps * self.interval).round() as u64;
                frames.max(1)
            }
            _ => self.unknown_fps_cadence,
        }
    }

    /// Presentation time of a source frame.
    #[must_use]
    pub fn timestamp(&self, index: u64, fps: Option<f64>) -> f64 {
        let fps = fps.filter(|f| *f > 0.0).unwrap_or(self.assumed_fps);
        #[allow(clippy::cast_precision_loss)]
        let index = index as f64;
        index / fps
    }

    /// Probe `source`, then decode and visit sampled frames in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] when the source cannot be opened,
    /// [`Error::NoFramesExtracted`] when it yields no frames, or the first
    /// error returned by `visit`.
    pub fn run<S, V>(&self, source: &mut S, mut visit: V) -> Result<SampleSummary>
    where
        S: FrameSource + ?Sized,
        V: FnMut(Frame) -> Result<()>,
    {
        let mut info = source.probe()?;
        if info.fps.is_none() {
            log::warn!(
                "{} reports no frame rate; sampling every {} frames",
                source.location().display(),
                self.unknown_fps_cadence
            );
        }
        let cadence = self.cadence(info.fps);

        let mut frames_sampled = 0usize;
        let mut decoded_size = None;
        source.decode(cadence, &mut |index: u64, image: RgbImage| {
            decoded_size.get_or_insert(image.dimensions());
            frames_sampled += 1;
            visit(Frame {
                index,
                timestamp: self.timestamp(index, info.fps),
                image,
            })
        })?;

        if frames_sampled == 0 {
            return Err(Error::NoFramesExtracted {
                path: source.location().to_path_buf(),
            });
        }

        if let Some((w, h)) = decoded_size {
            if (w, h) != (info.width, info.height) {
                log::warn!(
                    "Probed size {}x{} differs from decoded size {w}x{h}; using decoded size",
                    info.width,
                    info.height
                );
                info.width = w;
                info.height = h;
            }
        }

        log::info!(
            "Sampled {frames_sampled} frame(s) every {cadence} source frame(s) from {}",
            source.location().display()
        );
        Ok(SampleSummary {
            info,
            frames_sampled,
            cadence,
        })
    }
}

/// Parse an ffprobe frame rate such as `"30000/1001"` or `"25"`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
