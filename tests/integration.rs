use image::{Rgb, RgbImage};
use video_watermark_locator::config::FallbackPolicy;
use video_watermark_locator::detection::{CandidateDetector, DetectorPipeline};
use video_watermark_locator::{
    BoundingBox, Candidate, FnSource, LocateReport, LocatorConfig, Segment, TrackingMode,
    WatermarkLocator,
};

const W: u32 = 640;
const H: u32 = 360;
const BACKGROUND: u8 = 40;

/// Blend white at 80% opacity over a dark background inside each box.
fn frame_with(boxes: &[(u32, u32, u32, u32)]) -> RgbImage {
    let overlay = (f32::from(BACKGROUND) + 0.8 * (255.0 - f32::from(BACKGROUND))) as u8;
    RgbImage::from_fn(W, H, |x, y| {
        let inside = boxes
            .iter()
            .any(|&(bx, by, bw, bh)| (bx..bx + bw).contains(&x) && (by..by + bh).contains(&y));
        let v = if inside { overlay } else { BACKGROUND };
        Rgb([v, v, v])
    })
}

fn locate<F: FnMut(u64) -> RgbImage>(config: LocatorConfig, frames: u64, render: F) -> LocateReport {
    let locator = WatermarkLocator::new(config).unwrap();
    let mut source = FnSource::new(W, H, 30.0, frames, render);
    locator.locate(&mut source).unwrap()
}

fn assert_tiles(segments: &[Segment], end: f64) {
    assert!(!segments.is_empty(), "no segments");
    assert!(segments[0].start.abs() < 1e-9, "first segment starts at {}", segments[0].start);
    let last = segments[segments.len() - 1].end;
    assert!((last - end).abs() < 1e-9, "last segment ends at {last}, expected {end}");
    for pair in segments.windows(2) {
        assert!(pair[0].start < pair[1].start, "segments out of order");
        assert!(
            (pair[0].end - pair[1].start).abs() < 1e-9,
            "gap or overlap between {:?} and {:?}",
            pair[0],
            pair[1]
        );
    }
    for s in segments {
        assert!(s.start < s.end, "empty segment {s:?}");
        assert!(s.x >= 1 && s.y >= 1, "origin must be positive: {s:?}");
        assert!(s.x + s.w <= W && s.y + s.h <= H, "segment leaves the frame: {s:?}");
    }
}

fn covers(s: &Segment, (x, y, w, h): (u32, u32, u32, u32)) -> bool {
    s.x <= x && s.y <= y && s.x + s.w >= x + w && s.y + s.h >= y + h
}

#[test]
fn static_watermark_yields_one_full_length_segment() {
    let mark = (500, 20, 100, 40);
    let report = locate(LocatorConfig::default(), 300, |_| frame_with(&[mark]));

    assert!(report.success);
    assert!(report.watermark_detected);
    assert_eq!(report.frames_analyzed, 20);
    assert_eq!((report.video_info.width, report.video_info.height), (W, H));
    assert!((report.video_info.duration - 10.0).abs() < 1e-9);

    assert_eq!(report.segments.len(), 1);
    assert_tiles(&report.segments, 10.0);
    let s = &report.segments[0];
    assert!(covers(s, mark), "{s:?} does not cover the watermark");
    assert!(s.x.abs_diff(500) <= 60 && s.y.abs_diff(20) <= 30, "{s:?} too far from watermark");

    let summary = report.watermark.unwrap();
    assert!(summary.found && !summary.fallback);
    assert_eq!(summary.detections, Some(20));
    assert_eq!(summary.method, "color_opacity_detection");
    assert!(report.additional_regions.is_empty());
}

#[test]
fn black_clip_falls_back_to_default_band() {
    let report = locate(LocatorConfig::default(), 150, |_| RgbImage::new(W, H));

    assert!(!report.watermark_detected);
    assert_eq!(report.segments.len(), 1);
    assert_tiles(&report.segments, 5.0);
    let s = &report.segments[0];
    assert_eq!((s.x, s.y, s.w, s.h), (64, 36, 512, 54));

    let summary = report.watermark.unwrap();
    assert!(summary.fallback && !summary.found);
    assert!((summary.confidence - 0.3).abs() < f32::EPSILON);
    assert_eq!(summary.method, "fallback_center");
}

#[test]
fn jumping_watermark_splits_into_two_segments() {
    let top_left = (10, 10, 100, 30);
    let bottom_right = (500, 300, 100, 30);
    let report = locate(LocatorConfig::default(), 180, |i| {
        if i < 90 {
            frame_with(&[top_left])
        } else {
            frame_with(&[bottom_right])
        }
    });

    assert!(report.watermark_detected);
    assert_eq!(report.segments.len(), 2, "{:?}", report.segments);
    assert_tiles(&report.segments, 6.0);
    let boundary = report.segments[0].end;
    assert!((boundary - 3.0).abs() <= 0.5, "boundary at {boundary}");
    assert!(covers(&report.segments[0], top_left));
    assert!(covers(&report.segments[1], bottom_right));
    assert!(report.additional_regions.is_empty());
}

#[test]
fn returning_watermark_gets_three_ordered_segments() {
    let home = (10, 10, 100, 30);
    let away = (500, 300, 100, 30);
    let report = locate(LocatorConfig::default(), 270, |i| {
        if (90..180).contains(&i) {
            frame_with(&[away])
        } else {
            frame_with(&[home])
        }
    });

    assert!(report.watermark_detected);
    assert!(report.additional_regions.is_empty(), "{:?}", report.additional_regions);
    assert_eq!(report.segments.len(), 3, "{:?}", report.segments);
    assert_tiles(&report.segments, 9.0);
    let [first, middle, last] = [&report.segments[0], &report.segments[1], &report.segments[2]];
    assert!(covers(first, home) && covers(last, home));
    assert!(covers(middle, away));
    assert!(!covers(first, away) && !covers(middle, home));
    assert!((first.end - 3.0).abs() <= 0.5, "first boundary at {}", first.end);
    assert!((middle.end - 6.0).abs() <= 0.5, "second boundary at {}", middle.end);
}

#[test]
fn simultaneous_watermarks_are_kept_apart() {
    let top_left = (10, 10, 100, 30);
    let bottom_right = (500, 300, 100, 30);
    let report = locate(LocatorConfig::default(), 150, |_| {
        frame_with(&[top_left, bottom_right])
    });

    assert!(report.watermark_detected);
    assert_eq!(report.segments.len(), 1);
    assert_eq!(report.additional_regions.len(), 1);
    assert_tiles(&report.segments, 5.0);
    assert_tiles(&report.additional_regions[0], 5.0);
    assert!(covers(&report.segments[0], top_left));
    assert!(covers(&report.additional_regions[0][0], bottom_right));
    assert!(!covers(&report.segments[0], bottom_right));
}

#[test]
fn single_mode_reports_only_the_winner() {
    let mut config = LocatorConfig::default();
    config.tracking.mode = TrackingMode::Single;
    let report = locate(config, 150, |_| {
        frame_with(&[(10, 10, 100, 30), (500, 300, 100, 30)])
    });

    assert!(report.watermark_detected);
    assert_eq!(report.segments.len(), 1);
    assert!(report.additional_regions.is_empty());
    assert_tiles(&report.segments, 5.0);
}

#[test]
fn persistence_bar_decides_between_detection_and_fallback() {
    let mark = (500, 20, 100, 40);
    // 20 sampled frames at 20% persistence need 4 supporting frames.
    for (hits, detected) in [(4u64, true), (3, false)] {
        let report = locate(LocatorConfig::default(), 300, |i| {
            if i < hits * 15 {
                frame_with(&[mark])
            } else {
                RgbImage::from_pixel(W, H, Rgb([BACKGROUND; 3]))
            }
        });
        assert_eq!(report.frames_analyzed, 20);
        assert_eq!(report.watermark_detected, detected, "{hits} supporting frames");
        assert_eq!(report.segments.len(), 1);
        assert_tiles(&report.segments, 10.0);
    }
}

#[test]
fn runs_are_deterministic() {
    let render = |i: u64| {
        if i < 90 {
            frame_with(&[(10, 10, 100, 30)])
        } else {
            frame_with(&[(500, 300, 100, 30)])
        }
    };
    let first = locate(LocatorConfig::default(), 180, render).to_json(false).unwrap();
    let second = locate(LocatorConfig::default(), 180, render).to_json(false).unwrap();
    assert_eq!(first, second);
}

#[test]
fn disabled_fallback_reports_no_segments() {
    let config = LocatorConfig {
        fallback: FallbackPolicy::Disabled,
        ..LocatorConfig::default()
    };
    let report = locate(config, 150, |_| RgbImage::new(W, H));
    assert!(!report.watermark_detected);
    assert!(report.segments.is_empty());
    assert!(report.watermark.is_none());
}

#[test]
fn unknown_frame_rate_uses_assumed_cadence() {
    let locator = WatermarkLocator::new(LocatorConfig::default()).unwrap();
    let mut source = FnSource::new(W, H, 0.0, 150, |_| RgbImage::new(W, H));
    let report = locator.locate(&mut source).unwrap();

    assert!(report.video_info.fps.is_none());
    assert!(report.video_info.duration.abs() < f64::EPSILON);
    assert_eq!(report.frames_analyzed, 10);
    // Last sample at 135 / 30 = 4.5s, plus one interval.
    assert_tiles(&report.segments, 5.0);

    let json = report.to_json(false).unwrap();
    assert!(!json.contains("\"fps\""));
}

#[test]
fn report_json_matches_output_contract() {
    let report = locate(LocatorConfig::default(), 60, |_| frame_with(&[(500, 20, 100, 40)]));
    let value: serde_json::Value = serde_json::from_str(&report.to_json(true).unwrap()).unwrap();

    assert_eq!(value["success"], true);
    assert_eq!(value["watermark_detected"], true);
    assert_eq!(value["video_info"]["width"], 640);
    assert_eq!(value["video_info"]["height"], 360);
    assert!(value["video_info"]["fps"].is_number());
    let segment = &value["segments"][0];
    for key in ["start", "end", "x", "y", "w", "h"] {
        assert!(segment[key].is_number(), "segment lacks {key}");
    }
    assert!(value["watermark"]["confidence"].is_number());
    assert!(value.get("additional_regions").is_none());
}

#[test]
fn detection_strategies_agree_on_a_clean_overlay() {
    use video_watermark_locator::Strategy;

    let mark = (500, 20, 100, 40);
    for strategy in [Strategy::Color, Strategy::Edges, Strategy::TextRegions] {
        let config = LocatorConfig {
            strategies: vec![strategy],
            ..LocatorConfig::default()
        };
        let report = locate(config, 60, |_| frame_with(&[mark]));
        assert!(report.watermark_detected, "{strategy:?} missed the watermark");
        assert!(covers(&report.segments[0], mark), "{strategy:?}");
    }
}

/// Reports a fixed box on every frame whose top-left pixel is bright.
struct FlaggedFrames;

impl CandidateDetector for FlaggedFrames {
    fn method(&self) -> &'static str {
        "flagged_frames"
    }

    fn detect(&self, frame: &RgbImage) -> Vec<Candidate> {
        if frame.get_pixel(0, 0)[0] < 128 {
            return Vec::new();
        }
        vec![Candidate {
            bbox: BoundingBox::new(20, 300, 120, 40),
            confidence: 0.8,
            area: 4800,
            method: "flagged_frames",
            corner: None,
        }]
    }
}

#[test]
fn custom_pipeline_drives_the_report() {
    let mut pipeline = DetectorPipeline::default();
    pipeline.push(Box::new(FlaggedFrames));
    let locator = WatermarkLocator::with_pipeline(LocatorConfig::default(), pipeline).unwrap();

    // 10 of 20 sampled frames are flagged.
    let mut source = FnSource::new(W, H, 30.0, 300, |i| {
        let v = if (i / 15) % 2 == 0 { 255 } else { 0 };
        RgbImage::from_pixel(W, H, Rgb([v, v, v]))
    });
    let report = locator.locate(&mut source).unwrap();

    assert!(report.watermark_detected);
    assert_tiles(&report.segments, 10.0);
    let summary = report.watermark.unwrap();
    assert_eq!((summary.x, summary.y, summary.w, summary.h), (20, 300, 120, 40));
    assert_eq!(summary.detections, Some(10));
    assert_eq!(summary.method, "flagged_frames");
    assert!(report.segments.iter().all(|s| s.bbox() == BoundingBox::new(20, 300, 120, 40)));
}

#[test]
fn with_pipeline_still_validates_config() {
    let config = LocatorConfig {
        sample_interval: -1.0,
        ..LocatorConfig::default()
    };
    assert!(WatermarkLocator::with_pipeline(config, DetectorPipeline::default()).is_err());
}
