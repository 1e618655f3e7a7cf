//! Cross-frame persistence filter.
//!
//! [`TemporalTracker`] owns every position cluster seen during one run, in an
//! arena indexed by [`ClusterId`]. Each frame's spatial clusters are matched
//! against the arena with the same [`MergeRule`] used within a frame. Once all
//! frames are in, [`TemporalTracker::finish`] ranks the clusters and keeps the
//! ones that recur in enough frames to be trusted.

use crate::cluster::Cluster;
use crate::config::{FallbackPolicy, MergeRule, TrackingConfig, TrackingMode};
use crate::region::BoundingBox;

/// Index of a cluster in the tracker's arena, in creation order.
pub type ClusterId = usize;

/// One spatial cluster observed in one sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Position of the frame in the sampled sequence.
    pub sample: usize,
    /// Frame time in seconds.
    pub timestamp: f64,
    /// Cluster bounds.
    pub bbox: BoundingBox,
    /// Cluster confidence.
    pub confidence: f32,
    /// Raw candidates merged into the spatial cluster.
    pub fragments: u32,
    /// Detector method.
    pub method: &'static str,
}

#[derive(Debug, Clone)]
struct TrackState {
    bounds: BoundingBox,
    confidence: f32,
    method: &'static str,
    frames: u32,
    fragments: u32,
    last_sample: usize,
    detections: Vec<Detection>,
}

impl TrackState {
    fn score(&self) -> f64 {
        f64::from(self.frames) * f64::from(self.confidence)
    }
}

/// Running state of the persistence filter for one video.
#[derive(Debug, Clone)]
pub struct TemporalTracker {
    rule: MergeRule,
    clusters: Vec<TrackState>,
    frames_observed: usize,
}

impl TemporalTracker {
    /// Empty tracker merging with `rule`.
    #[must_use]
    pub fn new(rule: MergeRule) -> Self {
        Self {
            rule,
            clusters: Vec::new(),
            frames_observed: 0,
        }
    }

    /// Record the clusters found in the next sampled frame.
    ///
    /// Frames must arrive in timestamp order. A frame with no clusters still
    /// counts toward the persistence denominator.
    pub fn observe_frame(&mut self, timestamp: f64, clusters: Vec<Cluster>) {
        let sample = self.frames_observed;
        for cluster in clusters {
            self.observe(Detection {
                sample,
                timestamp,
                bbox: cluster.bounds,
                confidence: cluster.confidence,
                fragments: cluster.count,
                method: cluster.method,
            });
        }
        self.frames_observed += 1;
    }

    /// Merge one detection into the first matching cluster, or start a new one.
    pub fn observe(&mut self, detection: Detection) -> ClusterId {
        let rule = self.rule;
        let existing = self
            .clusters
            .iter()
            .position(|c| rule.matches(&c.bounds, &detection.bbox));

        if let Some(id) = existing {
            let state = &mut self.clusters[id];
            state.bounds = state.bounds.union(&detection.bbox);
            state.confidence = state.confidence.max(detection.confidence);
            state.fragments += detection.fragments;
            if state.last_sample != detection.sample {
                state.frames += 1;
                state.last_sample = detection.sample;
            }
            state.detections.push(detection);
            id
        } else {
            self.clusters.push(TrackState {
                bounds: detection.bbox,
                confidence: detection.confidence,
                method: detection.method,
                frames: 1,
                fragments: detection.fragments,
                last_sample: detection.sample,
                detections: vec![detection],
            });
            self.clusters.len() - 1
        }
    }

    /// Number of frames recorded so far.
    #[must_use]
    pub fn frames_observed(&self) -> usize {
        self.frames_observed
    }

    /// Number of position clusters created so far.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Rank clusters by `frames * confidence` and keep the persistent ones.
    ///
    /// A cluster persists when it was seen in at least
    /// `max(min_support, frames_observed * persistence)` frames. In
    /// [`TrackingMode::Single`] only the top-ranked cluster is considered.
    #[must_use]
    pub fn finish(self, tracking: &TrackingConfig) -> TrackOutcome {
        let required = tracking.required_support(self.frames_observed);
        let cluster_count = self.clusters.len();

        let mut ranked: Vec<(ClusterId, TrackState)> = self.clusters.into_iter().enumerate().collect();
        ranked.sort_by(|(ia, a), (ib, b)| {
            b.score()
                .total_cmp(&a.score())
                .then(b.fragments.cmp(&a.fragments))
                .then(ia.cmp(ib))
        });

        if tracking.mode == TrackingMode::Single {
            ranked.truncate(1);
        }

        let tracks: Vec<Track> = ranked
            .into_iter()
            .filter(|(_, state)| f64::from(state.frames) >= required)
            .map(|(id, state)| Track {
                id,
                bounds: state.bounds,
                confidence: state.confidence,
                method: state.method,
                frames: state.frames,
                fragments: state.fragments,
                detections: state.detections,
            })
            .collect();

        log::debug!(
            "{} of {cluster_count} cluster(s) persist in at least {required:.1} of {} frame(s)",
            tracks.len(),
            self.frames_observed
        );

        TrackOutcome {
            tracks,
            frames_observed: self.frames_observed,
            clusters_seen: cluster_count,
            required_support: required,
        }
    }
}

/// A cluster that cleared the persistence bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Arena id, in creation order.
    pub id: ClusterId,
    /// Union of all supporting detections.
    pub bounds: BoundingBox,
    /// Highest supporting confidence.
    pub confidence: f32,
    /// Method of the first supporting detection.
    pub method: &'static str,
    /// Distinct sampled frames supporting the cluster.
    pub frames: u32,
    /// Raw candidates absorbed over all frames.
    pub fragments: u32,
    /// Supporting detections in timestamp order.
    pub detections: Vec<Detection>,
}

impl Track {
    /// Times of the first and last supporting detection.
    #[must_use]
    pub fn span(&self) -> (f64, f64) {
        let first = self.detections.first().map_or(0.0, |d| d.timestamp);
        let last = self.detections.last().map_or(first, |d| d.timestamp);
        (first, last)
    }
}

/// Result of the persistence filter.
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    /// Persistent tracks, best first. Empty when nothing persisted.
    pub tracks: Vec<Track>,
    /// Sampled frames seen by the tracker.
    pub frames_observed: usize,
    /// Position clusters created during the run.
    pub clusters_seen: usize,
    /// Supporting frames a cluster needed.
    pub required_support: f64,
}

impl TrackOutcome {
    /// The best persistent track.
    #[must_use]
    pub fn winner(&self) -> Option<&Track> {
        self.tracks.first()
    }
}

/// Region and confidence to report when nothing persists, or `None` when the
/// policy is disabled or the frame is too small to hold a box with `x, y >= 1`.
#[must_use]
pub fn fallback_region(policy: &FallbackPolicy, width: u32, height: u32) -> Option<(BoundingBox, f32)> {
    let FallbackPolicy::Region {
        x_fraction,
        y_fraction,
        w_fraction,
        h_fraction,
        confidence,
    } = *policy
    else {
        return None;
    };

    #[allow(clippy::cast_possible_truncation)]
    let scaled = |fraction: f64, extent: u32| (fraction * f64::from(extent)) as i64;
    let (w, h) = (i64::from(width), i64::from(height));
    let x = scaled(x_fraction, width).max(1);
    let y = scaled(y_fraction, height).max(1);
    let bw = scaled(w_fraction, width).min(w - 3).max(1);
    let bh = scaled(h_fraction, height).min(h - 3).max(1);

    BoundingBox::from_edges_clamped(x, y, x + bw, y + bh, width, height, 0)
        .map(|bbox| (bbox, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: MergeRule = MergeRule::Overlap { fraction: 0.3 };

    fn cluster(x: u32, y: u32, confidence: f32) -> Cluster {
        Cluster {
            bounds: BoundingBox::new(x, y, 120, 40),
            count: 1,
            confidence,
            method: "test",
        }
    }

    /// `hits` frames with a cluster at (x, y) out of `total` sampled frames.
    fn run(total: usize, hits: usize, tracking: &TrackingConfig) -> TrackOutcome {
        let mut tracker = TemporalTracker::new(RULE);
        for i in 0..total {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 * 0.5;
            let found = if i < hits { vec![cluster(400, 20, 0.9)] } else { Vec::new() };
            tracker.observe_frame(t, found);
        }
        tracker.finish(tracking)
    }

    #[test]
    fn persistence_threshold_is_inclusive() {
        let tracking = TrackingConfig::default();
        // 20 frames at 20% need exactly 4.
        assert!(run(20, 4, &tracking).winner().is_some());
        assert!(run(20, 3, &tracking).winner().is_none());
    }

    #[test]
    fn at_least_two_frames_are_required() {
        let tracking = TrackingConfig::default();
        assert!(run(5, 1, &tracking).winner().is_none());
        assert!(run(5, 2, &tracking).winner().is_some());
        assert!(run(1, 1, &tracking).winner().is_none());
    }

    #[test]
    fn merge_grows_bounds_and_keeps_max_confidence() {
        let mut tracker = TemporalTracker::new(RULE);
        tracker.observe_frame(0.0, vec![cluster(100, 100, 0.4)]);
        tracker.observe_frame(0.5, vec![cluster(110, 104, 0.7)]);
        tracker.observe_frame(1.0, vec![cluster(105, 102, 0.5)]);
        assert_eq!(tracker.cluster_count(), 1);

        let outcome = tracker.finish(&TrackingConfig::default());
        let track = outcome.winner().unwrap();
        assert_eq!(track.bounds, BoundingBox::new(100, 100, 130, 44));
        assert!((track.confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(track.frames, 3);
        assert_eq!(track.detections.len(), 3);
        assert_eq!(track.span(), (0.0, 1.0));
    }

    #[test]
    fn two_hits_in_one_frame_count_once() {
        let mut tracker = TemporalTracker::new(RULE);
        tracker.observe_frame(0.0, vec![cluster(100, 100, 0.5), cluster(120, 100, 0.5)]);
        tracker.observe_frame(0.5, Vec::new());
        let outcome = tracker.finish(&TrackingConfig::default());
        assert!(outcome.winner().is_none());
        assert_eq!(outcome.clusters_seen, 1);
    }

    #[test]
    fn per_region_keeps_every_persistent_cluster() {
        let mut tracker = TemporalTracker::new(RULE);
        for i in 0..10 {
            let t = f64::from(i) * 0.5;
            let mut found = vec![cluster(10, 10, 0.5)];
            if i % 2 == 0 {
                found.push(cluster(400, 300, 1.0));
            }
            tracker.observe_frame(t, found);
        }

        let outcome = tracker.finish(&TrackingConfig::default());
        assert_eq!(outcome.tracks.len(), 2);
        // Equal scores (10 * 0.5 and 5 * 1.0) are ordered by fragment count.
        assert_eq!(outcome.tracks[0].bounds.x, 10);
        assert_eq!(outcome.tracks[1].bounds.x, 400);
    }

    #[test]
    fn single_mode_keeps_only_the_winner() {
        let tracking = TrackingConfig {
            mode: TrackingMode::Single,
            ..TrackingConfig::default()
        };
        let mut tracker = TemporalTracker::new(RULE);
        for i in 0..10 {
            let t = f64::from(i) * 0.5;
            tracker.observe_frame(t, vec![cluster(10, 10, 0.5), cluster(400, 300, 0.9)]);
        }
        let outcome = tracker.finish(&tracking);
        assert_eq!(outcome.tracks.len(), 1);
        assert_eq!(outcome.winner().unwrap().bounds.x, 400);
    }

    #[test]
    fn single_mode_does_not_fall_through_to_runner_up() {
        let tracking = TrackingConfig {
            mode: TrackingMode::Single,
            ..TrackingConfig::default()
        };
        let mut tracker = TemporalTracker::new(RULE);
        // Top score from one bright frame; the runner-up persists but loses the ranking.
        tracker.observe_frame(0.0, vec![cluster(400, 300, 1.0)]);
        for i in 1..10 {
            let t = f64::from(i) * 0.5;
            tracker.observe_frame(t, vec![cluster(10, 10, 0.05)]);
        }
        let outcome = tracker.finish(&tracking);
        assert!(outcome.winner().is_none());
    }

    #[test]
    fn fallback_band_is_inset_and_floored() {
        let (bbox, confidence) = fallback_region(&FallbackPolicy::default(), 640, 360).unwrap();
        assert_eq!(bbox, BoundingBox::new(64, 36, 512, 54));
        assert!((confidence - 0.3).abs() < f32::EPSILON);

        let (tiny, _) = fallback_region(&FallbackPolicy::default(), 8, 6).unwrap();
        assert_eq!((tiny.x, tiny.y), (1, 1));
        assert!(tiny.fits(8, 6));
    }

    #[test]
    fn disabled_fallback_yields_nothing() {
        assert!(fallback_region(&FallbackPolicy::Disabled, 640, 360).is_none());
        assert!(fallback_region(&FallbackPolicy::default(), 1, 1).is_none());
    }
}
