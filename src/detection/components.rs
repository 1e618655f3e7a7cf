//! 8-connected component labelling of binary masks.
//!
//! The outer boundary of an 8-connected blob is exactly an external contour,
//! so component bounding boxes and pixel counts stand in for contour extraction.

use image::GrayImage;

/// Statistics of one connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    /// Leftmost column.
    pub min_x: u32,
    /// Topmost row.
    pub min_y: u32,
    /// Rightmost column (inclusive).
    pub max_x: u32,
    /// Bottom row (inclusive).
    pub max_y: u32,
    /// Number of pixels.
    pub area: u32,
}

impl Component {
    /// Bounding box width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    /// Bounding box height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Label image plus per-component statistics.
///
/// `labels[i] == 0` marks background; otherwise pixel `i` belongs to
/// `components[labels[i] - 1]`. Components are numbered in raster order of
/// their first pixel.
#[derive(Debug, Clone)]
pub struct Labels {
    /// Per-pixel component ids.
    pub labels: Vec<u32>,
    /// Component statistics.
    pub components: Vec<Component>,
}

/// Label the non-zero pixels of a mask.
#[must_use]
pub fn label_mask(mask: &GrayImage) -> Labels {
    let raw = mask.as_raw();
    label_where(mask.width(), mask.height(), |i| raw[i] != 0)
}

/// Label the pixels of a `width x height` grid for which `foreground(index)` holds.
pub fn label_where(width: u32, height: u32, foreground: impl Fn(usize) -> bool) -> Labels {
    let w = width as usize;
    let h = height as usize;
    let mut labels = vec![0u32; w * h];
    if w == 0 || h == 0 {
        return Labels {
            labels,
            components: Vec::new(),
        };
    }

    let mut sets = DisjointSet::default();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if !foreground(idx) {
                continue;
            }

            let mut neighbors = [0u32; 4];
            let mut count = 0;
            let mut push = |label: u32| {
                if label != 0 {
                    neighbors[count] = label;
                    count += 1;
                }
            };
            if x > 0 {
                push(labels[idx - 1]);
            }
            if y > 0 {
                push(labels[idx - w]);
                if x > 0 {
                    push(labels[idx - w - 1]);
                }
                if x + 1 < w {
                    push(labels[idx - w + 1]);
                }
            }

            labels[idx] = if count == 0 {
                sets.make_set()
            } else {
                let base = neighbors[0];
                for &other in &neighbors[1..count] {
                    sets.union(base, other);
                }
                base
            };
        }
    }

    // Second pass: resolve provisional labels to compact ids in raster order.
    let mut compact = vec![0u32; sets.len() + 1];
    let mut components: Vec<Component> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if labels[idx] == 0 {
                continue;
            }
            let root = sets.find(labels[idx]) as usize;
            if compact[root] == 0 {
                components.push(Component {
                    min_x: x as u32,
                    min_y: y as u32,
                    max_x: x as u32,
                    max_y: y as u32,
                    area: 0,
                });
                compact[root] = u32::try_from(components.len()).unwrap_or(u32::MAX);
            }
            let id = compact[root];
            labels[idx] = id;

            let c = &mut components[id as usize - 1];
            #[allow(clippy::cast_possible_truncation)]
            {
                c.min_x = c.min_x.min(x as u32);
                c.max_x = c.max_x.max(x as u32);
                c.max_y = y as u32;
            }
            c.area += 1;
        }
    }

    Labels { labels, components }
}

/// Union-find over provisional labels, 1-based.
#[derive(Debug, Default)]
struct DisjointSet {
    parent: Vec<u32>,
}

impl DisjointSet {
    fn len(&self) -> usize {
        self.parent.len()
    }

    fn make_set(&mut self) -> u32 {
        let label = u32::try_from(self.parent.len() + 1).unwrap_or(u32::MAX);
        self.parent.push(label);
        label
    }

    fn find(&mut self, mut label: u32) -> u32 {
        while self.parent[label as usize - 1] != label {
            let grand = self.parent[self.parent[label as usize - 1] as usize - 1];
            self.parent[label as usize - 1] = grand;
            label = grand;
        }
        label
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Keep the smaller label as root so ids stay stable.
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child as usize - 1] = root;
        }
    }
}
