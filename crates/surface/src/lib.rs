//! Authoritative raster buffer for one editing session.
//!
//! The surface is the single source of truth: there is no edit buffering, and
//! every successful write is reported to the surface's own
//! [`DirtyRegionTracker`]. Reads always copy out.

pub mod dirty;

use model::{DirtyRect, RasterSize, Rgba8};
use thiserror::Error;

pub use dirty::{DirtyRegionConfig, DirtyRegionTracker, DirtySet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("rect {rect:?} exceeds raster bounds {width}x{height}")]
    OutOfBounds {
        rect: DirtyRect,
        width: u32,
        height: u32,
    },
    #[error("rect {rect:?} needs {expected} pixels, got {actual}")]
    PixelCountMismatch {
        rect: DirtyRect,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone)]
pub struct PixelSurface {
    size: RasterSize,
    pixels: Box<[Rgba8]>,
    tracker: DirtyRegionTracker,
    edit_sequence: u64,
}

impl PixelSurface {
    pub fn new(size: RasterSize, dirty_config: DirtyRegionConfig) -> Self {
        Self::with_fill(size, Rgba8::TRANSPARENT, dirty_config)
    }

    pub fn with_fill(size: RasterSize, fill: Rgba8, dirty_config: DirtyRegionConfig) -> Self {
        Self {
            size,
            pixels: vec![fill; size.pixel_count()].into_boxed_slice(),
            tracker: DirtyRegionTracker::new(size, dirty_config),
            edit_sequence: 0,
        }
    }

    pub fn size(&self) -> RasterSize {
        self.size
    }

    /// Number of successful writes so far.
    pub fn edit_sequence(&self) -> u64 {
        self.edit_sequence
    }

    /// Replaces the pixels inside `rect` with `pixels` (row-major, `rect`
    /// sized). On error the raster is unchanged and nothing is marked.
    pub fn write(&mut self, rect: DirtyRect, pixels: &[Rgba8]) -> Result<(), SurfaceError> {
        self.check_bounds(rect)?;
        let expected = rect.area() as usize;
        if pixels.len() != expected {
            return Err(SurfaceError::PixelCountMismatch {
                rect,
                expected,
                actual: pixels.len(),
            });
        }

        let row_len = rect.width() as usize;
        for (row, source) in pixels.chunks_exact(row_len).enumerate() {
            let start = self.row_start(rect, row);
            self.pixels[start..start + row_len].copy_from_slice(source);
        }
        self.commit_write(rect);
        Ok(())
    }

    pub fn fill(&mut self, rect: DirtyRect, color: Rgba8) -> Result<(), SurfaceError> {
        self.check_bounds(rect)?;
        let row_len = rect.width() as usize;
        for row in 0..rect.height() as usize {
            let start = self.row_start(rect, row);
            self.pixels[start..start + row_len].fill(color);
        }
        self.commit_write(rect);
        Ok(())
    }

    /// Copies the pixels inside `rect`, row-major.
    pub fn read(&self, rect: DirtyRect) -> Result<Vec<Rgba8>, SurfaceError> {
        self.check_bounds(rect)?;
        let row_len = rect.width() as usize;
        let mut out = Vec::with_capacity(rect.area() as usize);
        for row in 0..rect.height() as usize {
            let start = self.row_start(rect, row);
            out.extend_from_slice(&self.pixels[start..start + row_len]);
        }
        Ok(out)
    }

    pub fn read_all(&self) -> Vec<Rgba8> {
        self.pixels.to_vec()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8> {
        self.size.index_of(x, y).map(|index| self.pixels[index])
    }

    pub fn tracker(&self) -> &DirtyRegionTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut DirtyRegionTracker {
        &mut self.tracker
    }

    fn check_bounds(&self, rect: DirtyRect) -> Result<(), SurfaceError> {
        if self.size.contains_rect(rect) {
            Ok(())
        } else {
            Err(SurfaceError::OutOfBounds {
                rect,
                width: self.size.width(),
                height: self.size.height(),
            })
        }
    }

    fn row_start(&self, rect: DirtyRect, row: usize) -> usize {
        (rect.y() as usize + row) * self.size.width() as usize + rect.x() as usize
    }

    fn commit_write(&mut self, rect: DirtyRect) {
        self.edit_sequence += 1;
        self.tracker.mark(rect);
        tracing::trace!(
            target: "surface",
            edit_sequence = self.edit_sequence,
            x = rect.x(),
            y = rect.y(),
            width = rect.width(),
            height = rect.height(),
            "surface write"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: u32, y: u32, width: u32, height: u32) -> DirtyRect {
        DirtyRect::new(x, y, width, height).expect("valid test rect")
    }

    fn surface(width: u32, height: u32) -> PixelSurface {
        PixelSurface::new(
            RasterSize::new(width, height).expect("size"),
            DirtyRegionConfig::default(),
        )
    }

    #[test]
    fn write_touches_only_the_target_rect() {
        let mut surface = surface(4, 4);
        let red = Rgba8::new(255, 0, 0, 255);
        surface
            .write(rect(1, 1, 2, 2), &[red; 4])
            .expect("in-bounds write");

        for y in 0..4 {
            for x in 0..4 {
                let inside = (1..3).contains(&x) && (1..3).contains(&y);
                let expected = if inside { red } else { Rgba8::TRANSPARENT };
                assert_eq!(surface.pixel(x, y), Some(expected), "pixel ({x}, {y})");
            }
        }
        assert_eq!(surface.edit_sequence(), 1);
        assert_eq!(surface.tracker().pending().rects(), &[rect(1, 1, 2, 2)]);
    }

    #[test]
    fn out_of_bounds_write_is_rejected_without_side_effects() {
        let mut surface = surface(8, 8);
        let error = surface
            .write(rect(6, 6, 4, 4), &[Rgba8::BLACK; 16])
            .expect_err("rect leaves the raster");

        assert!(matches!(error, SurfaceError::OutOfBounds { .. }));
        assert_eq!(surface.edit_sequence(), 0);
        assert!(!surface.tracker().is_dirty());
        assert!(surface.read_all().iter().all(|p| *p == Rgba8::TRANSPARENT));
    }

    #[test]
    fn pixel_count_must_match_rect_area() {
        let mut surface = surface(8, 8);
        let error = surface
            .write(rect(0, 0, 2, 2), &[Rgba8::BLACK; 3])
            .expect_err("short pixel slice");
        assert_eq!(
            error,
            SurfaceError::PixelCountMismatch {
                rect: rect(0, 0, 2, 2),
                expected: 4,
                actual: 3,
            }
        );
        assert!(!surface.tracker().is_dirty());
    }

    #[test]
    fn read_returns_row_major_copy() {
        let mut surface = surface(3, 3);
        let pixels: Vec<Rgba8> = (0..9).map(|i| Rgba8::new(i, 0, 0, 255)).collect();
        surface
            .write(rect(0, 0, 3, 3), &pixels)
            .expect("full write");

        let copy = surface.read(rect(1, 1, 2, 2)).expect("read");
        assert_eq!(
            copy.iter().map(|p| p.r).collect::<Vec<_>>(),
            vec![4, 5, 7, 8]
        );

        surface
            .fill(rect(1, 1, 1, 1), Rgba8::WHITE)
            .expect("fill");
        assert_eq!(copy[0].r, 4, "earlier read must not alias the raster");
        assert_eq!(surface.pixel(1, 1), Some(Rgba8::WHITE));
        assert_eq!(surface.edit_sequence(), 2);
    }

    #[test]
    fn consecutive_writes_coalesce_in_the_tracker() {
        let mut surface = surface(512, 512);
        surface
            .fill(rect(0, 0, 8, 8), Rgba8::BLACK)
            .expect("first");
        surface
            .fill(rect(4, 4, 8, 8), Rgba8::BLACK)
            .expect("second");

        let drained = surface.tracker_mut().drain();
        assert_eq!(drained.rects(), &[rect(0, 0, 12, 12)]);
    }
}
