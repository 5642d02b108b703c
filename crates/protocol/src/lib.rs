//! Contracts shared by the sync bridge and its texture consumers.
//!
//! A [`Snapshot`] is the only value that crosses from the editing side to the
//! texture side. It is immutable and stamped with a [`Version`]; consumers
//! order and reject deliveries purely by that version.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use model::{RasterSize, Rgba8};
use thiserror::Error;

/// Monotonic snapshot version.
///
/// `Version::ZERO` stands for "nothing extracted yet"; the first extraction is
/// version 1. Versions are never reused and never decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Self = Self(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot of {width}x{height} expects {expected} pixels, got {actual}")]
    PixelCountMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("snapshot version must be greater than zero")]
    ZeroVersion,
}

/// Immutable, version-stamped copy of the raster at extraction time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: Version,
    size: RasterSize,
    pixels: Arc<[Rgba8]>,
    source_edit_sequence: u64,
    extracted_at: Instant,
}

impl Snapshot {
    pub fn new(
        version: Version,
        size: RasterSize,
        pixels: Vec<Rgba8>,
        source_edit_sequence: u64,
        extracted_at: Instant,
    ) -> Result<Self, SnapshotError> {
        if version == Version::ZERO {
            return Err(SnapshotError::ZeroVersion);
        }
        if pixels.len() != size.pixel_count() {
            return Err(SnapshotError::PixelCountMismatch {
                width: size.width(),
                height: size.height(),
                expected: size.pixel_count(),
                actual: pixels.len(),
            });
        }
        Ok(Self {
            version,
            size,
            pixels: pixels.into(),
            source_edit_sequence,
            extracted_at,
        })
    }

    pub fn version(&self) -> Version {
        self.version
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

    /// Tightly packed RGBA8 rows, ready for a texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Surface write counter observed when this snapshot was taken.
    pub fn source_edit_sequence(&self) -> u64 {
        self.source_edit_sequence
    }

    pub fn extracted_at(&self) -> Instant {
        self.extracted_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot is now the live texture content.
    Applied {
        version: Version,
        replaced: Option<Version>,
    },
    /// A newer version was already live; the upload was discarded.
    Stale { version: Version, applied: Version },
}

impl ApplyOutcome {
    pub fn version(self) -> Version {
        match self {
            ApplyOutcome::Applied { version, .. } | ApplyOutcome::Stale { version, .. } => version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("texture upload for {version} failed: {reason}")]
    Upload { version: Version, reason: String },
    #[error("apply of {version} was dropped before reporting a result")]
    Abandoned { version: Version },
    #[error("texture applier cannot accept {version}: worker unavailable")]
    WorkerUnavailable { version: Version },
}

pub type ApplyResult = Result<ApplyOutcome, ApplyError>;

/// Pending result of [`TextureApplier::apply`].
///
/// The tick loop polls it with [`ApplyTicket::try_complete`]; blocking hosts
/// may use [`ApplyTicket::wait`]. A completer that is dropped without
/// reporting resolves the ticket as [`ApplyError::Abandoned`].
#[derive(Debug)]
pub struct ApplyTicket {
    version: Version,
    receiver: Receiver<ApplyResult>,
}

impl ApplyTicket {
    /// A ticket that is already resolved.
    pub fn resolved(version: Version, result: ApplyResult) -> Self {
        let (completer, ticket) = apply_ticket(version);
        completer.complete(result);
        ticket
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the result once, then `Abandoned` on later calls.
    pub fn try_complete(&self) -> Option<ApplyResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ApplyError::Abandoned {
                version: self.version,
            })),
        }
    }

    pub fn wait(&self, timeout: Duration) -> Option<ApplyResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ApplyError::Abandoned {
                version: self.version,
            })),
        }
    }
}

/// Sending half of an [`ApplyTicket`]; consumed by the single completion.
#[derive(Debug)]
pub struct ApplyCompleter {
    version: Version,
    sender: Sender<ApplyResult>,
}

impl ApplyCompleter {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn complete(self, result: ApplyResult) {
        // The ticket may already be gone; its owner no longer cares.
        let _ = self.sender.try_send(result);
    }
}

pub fn apply_ticket(version: Version) -> (ApplyCompleter, ApplyTicket) {
    let (sender, receiver) = bounded(1);
    (
        ApplyCompleter { version, sender },
        ApplyTicket { version, receiver },
    )
}

/// External texture consumer.
///
/// Implementations must accept a completed upload iff its version is strictly
/// greater than [`TextureApplier::applied_version`], regardless of the order
/// in which `apply` was called or uploads finished.
pub trait TextureApplier {
    fn apply(&mut self, snapshot: Arc<Snapshot>) -> ApplyTicket;

    fn applied_version(&self) -> Version;
}

impl<T: TextureApplier + ?Sized> TextureApplier for Box<T> {
    fn apply(&mut self, snapshot: Arc<Snapshot>) -> ApplyTicket {
        (**self).apply(snapshot)
    }

    fn applied_version(&self) -> Version {
        (**self).applied_version()
    }
}

/// Something that wants to hear about finished redraw work.
pub trait SyncTrigger {
    fn arm(&mut self, now: Instant);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(width: u32, height: u32) -> RasterSize {
        RasterSize::new(width, height).expect("valid size")
    }

    #[test]
    fn versions_order_and_advance() {
        let first = Version::ZERO.next().expect("next");
        assert_eq!(first.get(), 1);
        assert!(first > Version::ZERO);
        assert_eq!(Version::new(u64::MAX).next(), None);
        assert_eq!(first.to_string(), "v1");
    }

    #[test]
    fn snapshot_rejects_mismatched_pixel_count() {
        let error = Snapshot::new(
            Version::new(1),
            size(2, 2),
            vec![Rgba8::BLACK; 3],
            0,
            Instant::now(),
        )
        .expect_err("3 pixels cannot fill 2x2");
        assert_eq!(
            error,
            SnapshotError::PixelCountMismatch {
                width: 2,
                height: 2,
                expected: 4,
                actual: 3,
            }
        );
        assert!(matches!(
            Snapshot::new(Version::ZERO, size(1, 1), vec![Rgba8::BLACK], 0, Instant::now()),
            Err(SnapshotError::ZeroVersion)
        ));
    }

    #[test]
    fn snapshot_exposes_packed_bytes() {
        let snapshot = Snapshot::new(
            Version::new(3),
            size(2, 1),
            vec![Rgba8::new(1, 2, 3, 4), Rgba8::new(5, 6, 7, 8)],
            9,
            Instant::now(),
        )
        .expect("snapshot");
        assert_eq!(snapshot.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(snapshot.pixel(1, 0), Some(Rgba8::new(5, 6, 7, 8)));
        assert_eq!(snapshot.pixel(2, 0), None);
        assert_eq!(snapshot.source_edit_sequence(), 9);
    }

    #[test]
    fn ticket_resolves_once_then_reports_abandoned() {
        let version = Version::new(4);
        let (completer, ticket) = apply_ticket(version);
        assert_eq!(ticket.try_complete(), None);

        completer.complete(Ok(ApplyOutcome::Applied {
            version,
            replaced: None,
        }));
        assert_eq!(
            ticket.try_complete(),
            Some(Ok(ApplyOutcome::Applied {
                version,
                replaced: None
            }))
        );
        assert_eq!(
            ticket.try_complete(),
            Some(Err(ApplyError::Abandoned { version }))
        );
    }

    #[test]
    fn dropped_completer_abandons_ticket() {
        let version = Version::new(8);
        let (completer, ticket) = apply_ticket(version);
        drop(completer);
        assert_eq!(
            ticket.wait(Duration::from_millis(10)),
            Some(Err(ApplyError::Abandoned { version }))
        );
    }

    #[test]
    fn resolved_ticket_is_immediately_complete() {
        let version = Version::new(2);
        let ticket = ApplyTicket::resolved(
            version,
            Ok(ApplyOutcome::Stale {
                version,
                applied: Version::new(5),
            }),
        );
        assert_eq!(ticket.version(), version);
        assert!(matches!(
            ticket.try_complete(),
            Some(Ok(ApplyOutcome::Stale { .. }))
        ));
    }
}
