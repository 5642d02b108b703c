//! Texture-side end of the sync bridge.
//!
//! Uploads are free to finish in any order. The only thing that decides what
//! becomes visible is [`TextureSlot::offer`]: a resource is installed iff its
//! version is strictly newer than the live one, and every resource that is not
//! (or is no longer) live goes straight back to the backend for disposal.

mod backend;
mod cpu;
mod inline;
mod slot;
mod threaded;
#[cfg(feature = "gpu")]
mod wgpu_backend;

use protocol::{ApplyError, ApplyOutcome, Snapshot, Version};

pub use backend::{BackendError, TextureBackend};
pub use cpu::{CpuTexture, CpuTextureBackend, DEFAULT_MAX_DIMENSION};
pub use inline::InlineTextureApplier;
pub use slot::{SlotOffer, TextureSlot};
pub use threaded::{ApplierError, ThreadedTextureApplier};
#[cfg(feature = "gpu")]
pub use wgpu_backend::{TEXTURE_FORMAT, WgpuTexture, WgpuTextureBackend};

enum Prepared<R> {
    Stale(ApplyOutcome),
    Uploaded(R),
}

/// Uploads `snapshot` unless `applied` already makes it stale. The version
/// check here only saves work; [`settle`] makes the final decision.
fn prepare<B: TextureBackend>(
    backend: &B,
    snapshot: &Snapshot,
    applied: Version,
) -> Result<Prepared<B::Resource>, ApplyError> {
    let version = snapshot.version();
    if version <= applied {
        tracing::debug!(target: "texture_applier", %version, %applied, "skipping stale upload");
        return Ok(Prepared::Stale(ApplyOutcome::Stale { version, applied }));
    }
    backend
        .upload(snapshot)
        .map(Prepared::Uploaded)
        .map_err(|error| {
            tracing::warn!(target: "texture_applier", %version, %error, "texture upload failed");
            ApplyError::Upload {
                version,
                reason: error.to_string(),
            }
        })
}

fn settle<B: TextureBackend>(
    backend: &B,
    slot: &mut TextureSlot<B::Resource>,
    version: Version,
    resource: B::Resource,
) -> ApplyOutcome {
    match slot.offer(version, resource) {
        SlotOffer::Accepted { replaced } => {
            let replaced = replaced.map(|(previous, resource)| {
                backend.dispose(resource);
                previous
            });
            tracing::trace!(target: "texture_applier", %version, "texture swapped in");
            ApplyOutcome::Applied { version, replaced }
        }
        SlotOffer::Rejected { applied, resource } => {
            backend.dispose(resource);
            tracing::warn!(
                target: "texture_applier",
                %version,
                %applied,
                "discarding out-of-order upload"
            );
            ApplyOutcome::Stale { version, applied }
        }
    }
}
