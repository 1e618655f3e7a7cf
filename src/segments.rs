//! Time segments with stable geometry.
//!
//! A segment list tiles `[0, end]` exactly: sorted, no gaps, no overlaps,
//! first start at 0 and last end at `end`. Within a segment the box only
//! grows, so a jittering overlay stays covered.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::LocatorConfig;
use crate::region::BoundingBox;
use crate::tracker::{Detection, Track};

/// A time interval with a fixed box, as consumed by region filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Segment {
    /// Start time in seconds (inclusive).
    pub start: f64,
    /// End time in seconds (exclusive).
    pub end: f64,
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

impl Segment {
    /// One segment spanning `[0, end]`.
    #[must_use]
    pub fn spanning(bbox: BoundingBox, end: f64) -> Self {
        Self {
            start: 0.0,
            end,
            x: bbox.x,
            y: bbox.y,
            w: bbox.w,
            h: bbox.h,
        }
    }

    /// The segment's box.
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.x, self.y, self.w, self.h)
    }
}

/// End of the analysed timeline: the duration when it lies past the last
/// sample, otherwise one interval past the last sample.
#[must_use]
pub fn timeline_end(duration: f64, last_timestamp: f64, interval: f64) -> f64 {
    if duration > last_timestamp {
        duration
    } else {
        last_timestamp + interval
    }
}

#[derive(Debug, Clone, Copy)]
struct Draft {
    start: f64,
    end: f64,
    first_ts: f64,
    last_ts: f64,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Turns timestamped detections into a tiling segment list.
#[derive(Debug, Clone, Copy)]
pub struct SegmentBuilder {
    tolerance: u32,
    pad: f64,
    frame_width: u32,
    frame_height: u32,
}

impl SegmentBuilder {
    /// Builder for a `frame_width x frame_height` video.
    #[must_use]
    pub fn new(config: &LocatorConfig, frame_width: u32, frame_height: u32) -> Self {
        Self {
            tolerance: config.segments.position_tolerance,
            pad: config.time_pad(),
            frame_width,
            frame_height,
        }
    }

    fn near(&self, draft: &Draft, x: u32, y: u32) -> bool {
        draft.x.abs_diff(x) <= self.tolerance && draft.y.abs_diff(y) <= self.tolerance
    }

    /// Move to the midpoint of the two origins and keep the larger size.
    fn absorb(&self, draft: &mut Draft, x: u32, y: u32, w: u32, h: u32) {
        draft.x = (draft.x + x) / 2;
        draft.y = (draft.y + y) / 2;
        draft.w = draft.w.max(w).min(self.frame_width.saturating_sub(draft.x)).max(1);
        draft.h = draft.h.max(h).min(self.frame_height.saturating_sub(draft.y)).max(1);
    }

    fn open(&self, detection: &Detection) -> Draft {
        let b = detection.bbox;
        Draft {
            start: (detection.timestamp - self.pad).max(0.0),
            end: detection.timestamp + self.pad,
            first_ts: detection.timestamp,
            last_ts: detection.timestamp,
            x: b.x,
            y: b.y,
            w: b.w,
            h: b.h,
        }
    }

    /// Segments tiling `[0, end]` for one lane of detections.
    ///
    /// `end` must lie past the latest detection. Returns an empty list when
    /// there are no detections.
    #[must_use]
    pub fn build(&self, detections: &[Detection], end: f64) -> Vec<Segment> {
        let mut sorted: Vec<&Detection> = detections.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let mut drafts: Vec<Draft> = Vec::new();
        for detection in sorted {
            let b = detection.bbox;
            match drafts.last_mut() {
                Some(current) if self.near(current, b.x, b.y) => {
                    current.end = detection.timestamp + self.pad;
                    current.last_ts = detection.timestamp;
                    self.absorb(current, b.x, b.y, b.w, b.h);
                }
                _ => drafts.push(self.open(detection)),
            }
        }

        let (Some(first), Some(last)) = (drafts.first().copied(), drafts.last().copied()) else {
            return Vec::new();
        };
        drafts[0].start = 0.0;
        if let Some(tail) = drafts.last_mut() {
            tail.end = end;
        }
        log::trace!(
            "Sweep produced {} draft(s) between {:.2}s and {:.2}s",
            drafts.len(),
            first.first_ts,
            last.last_ts
        );

        let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());
        for mut next in drafts {
            if let Some(prev) = merged.last_mut() {
                if self.near(prev, next.x, next.y) {
                    prev.end = next.end;
                    prev.last_ts = next.last_ts;
                    self.absorb(prev, next.x, next.y, next.w, next.h);
                    continue;
                }
                if next.start > prev.start {
                    prev.end = next.start;
                } else {
                    let boundary = (prev.last_ts + next.first_ts) / 2.0;
                    if boundary > prev.start && boundary < next.end {
                        prev.end = boundary;
                        next.start = boundary;
                    } else {
                        next.start = prev.start;
                        merged.pop();
                    }
                }
            }
            merged.push(next);
        }

        merged
            .into_iter()
            .map(|d| Segment {
                start: d.start,
                end: d.end,
                x: d.x,
                y: d.y,
                w: d.w,
                h: d.h,
            })
            .collect()
    }

    /// One tiling segment list per lane.
    ///
    /// Tracks are taken best first. Each joins the first lane that holds no
    /// detection from the same sampled frame, so a watermark that moves (and
    /// possibly returns) shares a lane while simultaneous watermarks get their own.
    #[must_use]
    pub fn lanes(&self, tracks: &[Track], end: f64) -> Vec<Vec<Segment>> {
        let mut lanes: Vec<(BTreeSet<usize>, Vec<&Track>)> = Vec::new();
        'tracks: for track in tracks {
            let samples: BTreeSet<usize> = track.detections.iter().map(|d| d.sample).collect();
            for (occupied, members) in &mut lanes {
                if occupied.is_disjoint(&samples) {
                    occupied.extend(&samples);
                    members.push(track);
                    continue 'tracks;
                }
            }
            lanes.push((samples, vec![track]));
        }

        lanes
            .iter()
            .map(|(_, members)| {
                let detections: Vec<Detection> = members
                    .iter()
                    .flat_map(|track| track.detections.iter().cloned())
                    .collect();
                self.build(&detections, end)
            })
            .collect()
    }
}
