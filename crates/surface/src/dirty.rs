//! Dirty-region tracking and coalescing.
//!
//! Marks are merged on insert: a new rect absorbs every pending rect it
//! overlaps or shares an edge with, repeatedly, so the pending set never holds
//! two touching rects. Redraw cost therefore follows edited area rather than
//! edit count.

use model::{DirtyRect, RasterSize};
use smallvec::SmallVec;

pub const DEFAULT_FULL_SURFACE_COLLAPSE_RATIO: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirtyRegionConfig {
    /// Once the pending area exceeds this fraction of the raster, the set
    /// collapses to a single full-surface rect.
    pub full_surface_collapse_ratio: f32,
}

impl Default for DirtyRegionConfig {
    fn default() -> Self {
        Self {
            full_surface_collapse_ratio: DEFAULT_FULL_SURFACE_COLLAPSE_RATIO,
        }
    }
}

/// Disjoint rects drained from a [`DirtyRegionTracker`], in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    rects: SmallVec<[DirtyRect; 8]>,
}

impl DirtySet {
    pub fn rects(&self) -> &[DirtyRect] {
        &self.rects
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn total_area(&self) -> u64 {
        self.rects.iter().map(|rect| rect.area()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = DirtyRect> + '_ {
        self.rects.iter().copied()
    }

    pub(crate) fn push(&mut self, rect: DirtyRect) {
        self.rects.push(rect);
    }
}

impl IntoIterator for DirtySet {
    type Item = DirtyRect;
    type IntoIter = smallvec::IntoIter<[DirtyRect; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.rects.into_iter()
    }
}

impl FromIterator<DirtyRect> for DirtySet {
    fn from_iter<I: IntoIterator<Item = DirtyRect>>(iter: I) -> Self {
        Self {
            rects: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirtyRegionTracker {
    size: RasterSize,
    config: DirtyRegionConfig,
    pending: DirtySet,
    full_surface: bool,
}

impl DirtyRegionTracker {
    pub fn new(size: RasterSize, config: DirtyRegionConfig) -> Self {
        Self {
            size,
            config,
            pending: DirtySet::default(),
            full_surface: false,
        }
    }

    pub fn config(&self) -> DirtyRegionConfig {
        self.config
    }

    pub fn size(&self) -> RasterSize {
        self.size
    }

    /// Inserts `rect`, clipped to the raster. Returns `false` when nothing
    /// new was recorded (rect outside the raster, or the whole surface is
    /// already pending).
    pub fn mark(&mut self, rect: DirtyRect) -> bool {
        let Some(clipped) = rect.clip_to(self.size) else {
            return false;
        };
        if self.full_surface {
            return false;
        }

        let mut merged = clipped;
        loop {
            let before = self.pending.rects.len();
            self.pending.rects.retain(|existing| {
                if existing.touches(merged) {
                    merged = merged.union(*existing);
                    false
                } else {
                    true
                }
            });
            if self.pending.rects.len() == before {
                break;
            }
        }
        self.pending.push(merged);

        let surface_area = self.size.area() as f64;
        let collapse_area = surface_area * f64::from(self.config.full_surface_collapse_ratio);
        if self.pending.total_area() as f64 > collapse_area {
            tracing::trace!(
                target: "surface::dirty",
                pending_rects = self.pending.len(),
                "dirty set collapsed to full surface"
            );
            self.collapse_to_full_surface();
        }
        true
    }

    pub fn mark_full_surface(&mut self) {
        self.collapse_to_full_surface();
    }

    /// Puts deferred rects back for the next drain.
    pub fn requeue(&mut self, deferred: DirtySet) {
        for rect in deferred {
            self.mark(rect);
        }
    }

    /// Removes and returns everything pending, leaving the tracker empty.
    pub fn drain(&mut self) -> DirtySet {
        self.full_surface = false;
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &DirtySet {
        &self.pending
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_full_surface(&self) -> bool {
        self.full_surface
    }

    fn collapse_to_full_surface(&mut self) {
        self.pending = DirtySet::default();
        self.pending.push(self.size.full_rect());
        self.full_surface = true;
    }
}
