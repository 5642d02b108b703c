use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use model::RasterSize;
use protocol::{Snapshot, Version};

use crate::{BackendError, TextureBackend};

/// Matches the smallest `max_texture_dimension_2d` wgpu guarantees.
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

/// Byte copy of an uploaded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTexture {
    version: Version,
    size: RasterSize,
    bytes: Box<[u8]>,
}

impl CpuTexture {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn size(&self) -> RasterSize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Host-memory texture mirror. Counts live resources so tests can prove that
/// nothing is leaked or disposed twice.
#[derive(Debug, Clone)]
pub struct CpuTextureBackend {
    max_dimension: u32,
    live: Arc<AtomicUsize>,
    uploads: Arc<AtomicU64>,
}

impl Default for CpuTextureBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl CpuTextureBackend {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension,
            live: Arc::new(AtomicUsize::new(0)),
            uploads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resources uploaded and not yet disposed. Shared between clones.
    pub fn live_resources(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Acquire)
    }
}

impl TextureBackend for CpuTextureBackend {
    type Resource = CpuTexture;

    fn upload(&self, snapshot: &Snapshot) -> Result<CpuTexture, BackendError> {
        let size = snapshot.size();
        if size.width() > self.max_dimension || size.height() > self.max_dimension {
            return Err(BackendError::TooLarge {
                width: size.width(),
                height: size.height(),
                max: self.max_dimension,
            });
        }
        self.uploads.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(CpuTexture {
            version: snapshot.version(),
            size,
            bytes: snapshot.as_bytes().into(),
        })
    }

    fn dispose(&self, resource: CpuTexture) {
        let previous = self.live.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "disposed {} twice", resource.version);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use model::Rgba8;

    use super::*;

    fn snapshot(version: u64, width: u32, height: u32) -> Snapshot {
        let size = RasterSize::new(width, height).expect("size");
        Snapshot::new(
            Version::new(version),
            size,
            vec![Rgba8::new(1, 2, 3, 4); size.pixel_count()],
            0,
            Instant::now(),
        )
        .expect("snapshot")
    }

    #[test]
    fn upload_copies_bytes_and_tracks_liveness() {
        let backend = CpuTextureBackend::default();
        let texture = backend.upload(&snapshot(1, 2, 1)).expect("upload");
        assert_eq!(texture.bytes(), &[1, 2, 3, 4, 1, 2, 3, 4]);
        assert_eq!(texture.version(), Version::new(1));
        assert_eq!(backend.live_resources(), 1);

        backend.dispose(texture);
        assert_eq!(backend.live_resources(), 0);
        assert_eq!(backend.uploads(), 1);
    }

    #[test]
    fn rejects_textures_over_the_limit() {
        let backend = CpuTextureBackend::new(32);
        assert_eq!(
            backend.upload(&snapshot(1, 64, 8)),
            Err(BackendError::TooLarge {
                width: 64,
                height: 8,
                max: 32
            })
        );
        assert_eq!(backend.live_resources(), 0);
    }
}
