//! Spatial clustering of one frame's candidates.
//!
//! Text broken into several contours, or found by more than one strategy,
//! yields overlapping boxes. Merging runs to a fixed point so the result does
//! not depend on the order in which candidates arrive.

use crate::config::MergeRule;
use crate::region::{BoundingBox, Candidate};

/// Consolidated box for one overlay instance within a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Union of the merged candidates, grown by the rule's margin.
    pub bounds: BoundingBox,
    /// Number of raw candidates absorbed.
    pub count: u32,
    /// Highest candidate confidence.
    pub confidence: f32,
    /// Method of the first candidate absorbed.
    pub method: &'static str,
}

impl MergeRule {
    /// Whether two boxes denote the same overlay.
    #[must_use]
    pub fn matches(&self, a: &BoundingBox, b: &BoundingBox) -> bool {
        match *self {
            MergeRule::Overlap { fraction } => {
                let smaller = a.area().min(b.area());
                #[allow(clippy::cast_precision_loss)]
                let shared = a.intersection_area(b) as f64;
                #[allow(clippy::cast_precision_loss)]
                let needed = smaller as f64 * fraction;
                smaller > 0 && shared > needed
            }
            MergeRule::CenterDistance { max_dx, max_dy, .. } => {
                let (ax, ay) = a.center();
                let (bx, by) = b.center();
                (ax - bx).abs() < f64::from(max_dx) && (ay - by).abs() < f64::from(max_dy)
            }
        }
    }

    /// Outward margin added to merged bounds.
    #[must_use]
    pub const fn margin(&self) -> u32 {
        match *self {
            MergeRule::Overlap { .. } => 0,
            MergeRule::CenterDistance { margin, .. } => margin,
        }
    }
}

/// Merge a frame's candidates into clusters.
///
/// Any two clusters that match under `rule` are replaced by their union until
/// no pair matches. Clusters are returned in order of their earliest candidate.
#[must_use]
pub fn cluster_candidates(
    candidates: &[Candidate],
    rule: MergeRule,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = candidates
        .iter()
        .map(|c| Cluster {
            bounds: c.bbox,
            count: 1,
            confidence: c.confidence,
            method: c.method,
        })
        .collect();

    while let Some((i, j)) = find_pair(&clusters, rule) {
        let absorbed = clusters.remove(j);
        let target = &mut clusters[i];
        target.bounds = target.bounds.union(&absorbed.bounds);
        target.count += absorbed.count;
        target.confidence = target.confidence.max(absorbed.confidence);
    }

    let margin = rule.margin();
    if margin > 0 {
        for cluster in &mut clusters {
            cluster.bounds = cluster.bounds.expanded(margin, frame_width, frame_height);
        }
    }
    clusters
}

fn find_pair(clusters: &[Cluster], rule: MergeRule) -> Option<(usize, usize)> {
    for i in 0..clusters.len() {
        for j in i + 1..clusters.len() {
            if rule.matches(&clusters[i].bounds, &clusters[j].bounds) {
                return Some((i, j));
            }
        }
    }
    None
}
