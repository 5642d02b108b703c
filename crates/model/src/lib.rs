use bytemuck::{Pod, Zeroable};
use thiserror::Error;

pub const BYTES_PER_PIXEL: usize = 4;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);
    pub const BLACK: Self = Self::new(0, 0, 0, 255);
    pub const WHITE: Self = Self::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("raster dimensions must be non-zero, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },
    #[error("rect extent must be non-zero, got {width}x{height}")]
    EmptyRect { width: u32, height: u32 },
    #[error("rect at ({x}, {y}) with extent {width}x{height} overflows the coordinate space")]
    RectOverflow {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Immutable raster dimensions.
///
/// All rects handed to the surface and the dirty tracker are validated
/// against one of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RasterSize {
    width: u32,
    height: u32,
}

impl RasterSize {
    pub fn new(width: u32, height: u32) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::ZeroSize { width, height });
        }
        Ok(Self { width, height })
    }

    pub const fn width(self) -> u32 {
        self.width
    }

    pub const fn height(self) -> u32 {
        self.height
    }

    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn full_rect(self) -> DirtyRect {
        DirtyRect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    pub fn contains_rect(self, rect: DirtyRect) -> bool {
        rect.right() <= u64::from(self.width) && rect.bottom() <= u64::from(self.height)
    }

    pub fn index_of(self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }
}

/// Axis-aligned rectangle in raster pixel coordinates.
///
/// `width > 0 && height > 0` holds for every value; construction goes
/// through [`DirtyRect::new`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DirtyRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl DirtyRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::EmptyRect { width, height });
        }
        if x.checked_add(width).is_none() || y.checked_add(height).is_none() {
            return Err(GeometryError::RectOverflow {
                x,
                y,
                width,
                height,
            });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub const fn x(self) -> u32 {
        self.x
    }

    pub const fn y(self) -> u32 {
        self.y
    }

    pub const fn width(self) -> u32 {
        self.width
    }

    pub const fn height(self) -> u32 {
        self.height
    }

    /// Exclusive right edge.
    pub const fn right(self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub const fn bottom(self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Positive-area overlap.
    pub fn intersects(self, other: Self) -> bool {
        overlap_len(self.x, self.right(), other.x, other.right()) > 0
            && overlap_len(self.y, self.bottom(), other.y, other.bottom()) > 0
    }

    /// Overlap or a shared edge of positive length. Rects meeting only at a
    /// corner do not touch.
    pub fn touches(self, other: Self) -> bool {
        let x_overlap = overlap_len(self.x, self.right(), other.x, other.right());
        let y_overlap = overlap_len(self.y, self.bottom(), other.y, other.bottom());
        (x_overlap > 0 && y_overlap >= 0) || (x_overlap >= 0 && y_overlap > 0)
    }

    pub fn union(self, other: Self) -> Self {
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        // Both inputs fit in u32 space, so their bounding box does too.
        Self {
            x: min_x,
            y: min_y,
            width: (max_x - u64::from(min_x)) as u32,
            height: (max_y - u64::from(min_y)) as u32,
        }
    }

    pub fn intersection(self, other: Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.right().min(other.right());
        let max_y = self.bottom().min(other.bottom());
        Some(Self {
            x: min_x,
            y: min_y,
            width: (max_x - u64::from(min_x)) as u32,
            height: (max_y - u64::from(min_y)) as u32,
        })
    }

    pub fn clip_to(self, size: RasterSize) -> Option<Self> {
        self.intersection(size.full_rect())
    }

    pub fn contains_point(self, x: u32, y: u32) -> bool {
        x >= self.x && u64::from(x) < self.right() && y >= self.y && u64::from(y) < self.bottom()
    }
}

/// Signed length of the overlap between `[a0, a1)` and `[b0, b1)`.
/// Zero means the intervals abut, negative means a gap.
fn overlap_len(a0: u32, a1: u64, b0: u32, b1: u64) -> i64 {
    let start = u64::from(a0.max(b0));
    let end = a1.min(b1);
    end as i64 - start as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: u32, y: u32, width: u32, height: u32) -> DirtyRect {
        DirtyRect::new(x, y, width, height).expect("valid test rect")
    }

    #[test]
    fn rejects_empty_and_overflowing_rects() {
        assert_eq!(
            DirtyRect::new(0, 0, 0, 4),
            Err(GeometryError::EmptyRect {
                width: 0,
                height: 4
            })
        );
        assert!(matches!(
            DirtyRect::new(u32::MAX, 0, 2, 2),
            Err(GeometryError::RectOverflow { .. })
        ));
        assert!(RasterSize::new(0, 10).is_err());
    }

    #[test]
    fn shared_edge_touches_but_corner_does_not() {
        let base = rect(0, 0, 4, 4);
        assert!(base.touches(rect(4, 0, 2, 4)));
        assert!(base.touches(rect(0, 4, 4, 1)));
        assert!(!base.touches(rect(4, 4, 2, 2)));
        assert!(!base.touches(rect(5, 0, 2, 2)));
        assert!(!base.intersects(rect(4, 0, 2, 4)));
        assert!(base.intersects(rect(3, 3, 2, 2)));
    }

    #[test]
    fn union_and_intersection_cover_expected_bounds() {
        let a = rect(0, 0, 8, 8);
        let b = rect(4, 4, 8, 8);
        assert_eq!(a.union(b), rect(0, 0, 12, 12));
        assert_eq!(a.intersection(b), Some(rect(4, 4, 4, 4)));
        assert_eq!(a.intersection(rect(8, 0, 1, 1)), None);
    }

    #[test]
    fn clip_to_keeps_only_the_in_bounds_part() {
        let size = RasterSize::new(16, 16).expect("size");
        assert_eq!(rect(12, 12, 8, 8).clip_to(size), Some(rect(12, 12, 4, 4)));
        assert_eq!(rect(16, 0, 4, 4).clip_to(size), None);
        assert!(size.contains_rect(rect(0, 0, 16, 16)));
        assert!(!size.contains_rect(rect(1, 0, 16, 16)));
    }

    #[test]
    fn rgba_is_four_tightly_packed_bytes() {
        let pixels = [Rgba8::new(1, 2, 3, 4), Rgba8::WHITE];
        let bytes: &[u8] = bytemuck::cast_slice(&pixels);
        assert_eq!(bytes.len(), 2 * BYTES_PER_PIXEL);
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
    }
}
