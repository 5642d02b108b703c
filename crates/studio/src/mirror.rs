use frame_scheduler::{BackingStore, RegionRedrawError};
use model::{DirtyRect, RasterSize, Rgba8};

/// In-memory canvas the headless host redraws into.
#[derive(Debug, Clone)]
pub struct MirrorCanvas {
    size: RasterSize,
    pixels: Vec<Rgba8>,
    redrawn_regions: u64,
}

impl MirrorCanvas {
    pub fn new(size: RasterSize, background: Rgba8) -> Self {
        Self {
            size,
            pixels: vec![background; size.pixel_count()],
            redrawn_regions: 0,
        }
    }

    pub fn size(&self) -> RasterSize {
        self.size
    }

    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8> {
        self.size.index_of(x, y).map(|index| self.pixels[index])
    }

    pub fn redrawn_regions(&self) -> u64 {
        self.redrawn_regions
    }
}

impl BackingStore for MirrorCanvas {
    fn redraw_region(
        &mut self,
        rect: DirtyRect,
        pixels: &[Rgba8],
    ) -> Result<(), RegionRedrawError> {
        if !self.size.contains_rect(rect) {
            return Err(RegionRedrawError(format!(
                "{rect:?} is outside the {}x{} canvas",
                self.size.width(),
                self.size.height()
            )));
        }
        if pixels.len() as u64 != rect.area() {
            return Err(RegionRedrawError(format!(
                "{rect:?} expects {} pixels, got {}",
                rect.area(),
                pixels.len()
            )));
        }
        let width = self.size.width() as usize;
        for (row, source) in pixels.chunks_exact(rect.width() as usize).enumerate() {
            let start = (rect.y() as usize + row) * width + rect.x() as usize;
            self.pixels[start..start + source.len()].copy_from_slice(source);
        }
        self.redrawn_regions += 1;
        Ok(())
    }
}
