use std::sync::Arc;

use protocol::{ApplyTicket, Snapshot, TextureApplier, Version};

use crate::{Prepared, TextureBackend, TextureSlot, prepare, settle};

/// Uploads on the caller's thread; every ticket is resolved before `apply`
/// returns.
pub struct InlineTextureApplier<B: TextureBackend> {
    backend: B,
    slot: TextureSlot<B::Resource>,
}

impl<B: TextureBackend> InlineTextureApplier<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slot: TextureSlot::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn with_live_texture<T>(&self, f: impl FnOnce(Version, &B::Resource) -> T) -> Option<T> {
        self.slot.live().map(|(version, resource)| f(version, resource))
    }
}

impl<B: TextureBackend> TextureApplier for InlineTextureApplier<B> {
    fn apply(&mut self, snapshot: Arc<Snapshot>) -> ApplyTicket {
        let version = snapshot.version();
        let result = prepare(&self.backend, &snapshot, self.slot.applied_version()).map(
            |prepared| match prepared {
                Prepared::Stale(outcome) => outcome,
                Prepared::Uploaded(resource) => {
                    settle(&self.backend, &mut self.slot, version, resource)
                }
            },
        );
        ApplyTicket::resolved(version, result)
    }

    fn applied_version(&self) -> Version {
        self.slot.applied_version()
    }
}

impl<B: TextureBackend> Drop for InlineTextureApplier<B> {
    fn drop(&mut self) {
        if let Some((_, resource)) = self.slot.take() {
            self.backend.dispose(resource);
        }
    }
}

impl<B: TextureBackend> std::fmt::Debug for InlineTextureApplier<B> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("InlineTextureApplier")
            .field("applied_version", &self.slot.applied_version())
            .finish_non_exhaustive()
    }
}
