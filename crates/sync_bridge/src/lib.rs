//! Debounced, versioned hand-off from the editing surface to the texture
//! consumer.
//!
//! The bridge is an explicit state machine driven by the host's frame loop:
//!
//! ```text
//! Idle --arm--> Armed --debounce elapsed--> Extracting --> Applying --ticket resolved--> Idle
//! ```
//!
//! `arm` while armed restarts the debounce. `arm` while extracting or applying
//! only sets `pending_rearm`, which re-arms the bridge the moment it returns
//! to `Idle`. Every path out of `Extracting` and `Applying` ends in `Idle`.

pub mod resample;

use std::sync::Arc;
use std::time::{Duration, Instant};

use model::{GeometryError, RasterSize, Rgba8};
use perf_monitor::{SyncProbe, SyncSample};
use protocol::{
    ApplyError, ApplyOutcome, ApplyResult, ApplyTicket, Snapshot, SnapshotError, SyncTrigger,
    TextureApplier, Version,
};
use surface::{PixelSurface, SurfaceError};
use thiserror::Error;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
/// Minecraft skin texture resolution.
pub const DEFAULT_OUTPUT_WIDTH: u32 = 64;
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBridgeConfig {
    /// Trailing-edge debounce, restarted by every `arm` while armed.
    pub debounce: Duration,
    /// Upper bound on how long a continuous burst can postpone extraction,
    /// measured from the burst's first `arm`.
    pub max_debounce_wait: Option<Duration>,
    pub output_width: u32,
    pub output_height: u32,
}

impl Default for SyncBridgeConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_debounce_wait: None,
            output_width: DEFAULT_OUTPUT_WIDTH,
            output_height: DEFAULT_OUTPUT_HEIGHT,
        }
    }
}

impl SyncBridgeConfig {
    pub fn output_size(&self) -> Result<RasterSize, SyncConfigError> {
        Ok(RasterSize::new(self.output_width, self.output_height)?)
    }

    pub fn validate(&self) -> Result<(), SyncConfigError> {
        self.output_size()?;
        match self.max_debounce_wait {
            Some(max_wait) if max_wait < self.debounce => {
                Err(SyncConfigError::MaxWaitBelowDebounce {
                    debounce: self.debounce,
                    max_wait,
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncConfigError {
    #[error("invalid output size: {0}")]
    OutputSize(#[from] GeometryError),
    #[error("max debounce wait {max_wait:?} is shorter than the debounce {debounce:?}")]
    MaxWaitBelowDebounce {
        debounce: Duration,
        max_wait: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("surface read failed: {0}")]
    Surface(#[from] SurfaceError),
    #[error("snapshot source failed: {0}")]
    Source(String),
    #[error("source raster has {actual} pixels, expected {expected}")]
    SourceLength { expected: usize, actual: usize },
    #[error("snapshot rejected: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("snapshot version space exhausted")]
    VersionExhausted,
}

/// Full-resolution copy of a raster, taken at extraction time.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub size: RasterSize,
    pub pixels: Vec<Rgba8>,
    pub edit_sequence: u64,
}

/// Where extraction copies the raster from.
pub trait SnapshotSource {
    fn capture(&self) -> Result<SourceFrame, ExtractionError>;
}

impl SnapshotSource for PixelSurface {
    fn capture(&self) -> Result<SourceFrame, ExtractionError> {
        let size = self.size();
        Ok(SourceFrame {
            size,
            pixels: self.read(size.full_rect())?,
            edit_sequence: self.edit_sequence(),
        })
    }
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for &T {
    fn capture(&self) -> Result<SourceFrame, ExtractionError> {
        (**self).capture()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Armed,
    Extracting,
    Applying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncBridgeStats {
    pub arms: u64,
    pub extractions: u64,
    pub extraction_failures: u64,
    pub applied: u64,
    pub stale: u64,
    pub apply_failures: u64,
    pub rearms: u64,
}

/// Outcome of one [`SyncBridge::poll`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncPoll {
    pub extracted: Option<Version>,
    pub extraction_error: Option<ExtractionError>,
    pub completed: Option<ApplyResult>,
}

impl SyncPoll {
    pub fn is_quiet(&self) -> bool {
        self.extracted.is_none() && self.extraction_error.is_none() && self.completed.is_none()
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Armed {
        burst_started: Instant,
        fire_at: Instant,
    },
    Extracting {
        burst_started: Instant,
    },
    Applying {
        burst_started: Instant,
        ticket: ApplyTicket,
    },
}

#[derive(Debug)]
pub struct SyncBridge {
    config: SyncBridgeConfig,
    output_size: RasterSize,
    phase: Phase,
    last_version: Version,
    pending_rearm: bool,
    stats: SyncBridgeStats,
    probe: Option<SyncProbe>,
}

impl SyncBridge {
    pub fn new(config: SyncBridgeConfig) -> Result<Self, SyncConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            output_size: config.output_size()?,
            phase: Phase::Idle,
            last_version: Version::ZERO,
            pending_rearm: false,
            stats: SyncBridgeStats::default(),
            probe: None,
        })
    }

    pub fn attach_probe(&mut self, probe: SyncProbe) {
        self.probe = Some(probe);
    }

    pub fn config(&self) -> SyncBridgeConfig {
        self.config
    }

    pub fn output_size(&self) -> RasterSize {
        self.output_size
    }

    pub fn state(&self) -> SyncState {
        match self.phase {
            Phase::Idle => SyncState::Idle,
            Phase::Armed { .. } => SyncState::Armed,
            Phase::Extracting { .. } => SyncState::Extracting,
            Phase::Applying { .. } => SyncState::Applying,
        }
    }

    /// Version of the most recent successful extraction.
    pub fn last_version(&self) -> Version {
        self.last_version
    }

    pub fn pending_rearm(&self) -> bool {
        self.pending_rearm
    }

    pub fn stats(&self) -> SyncBridgeStats {
        self.stats
    }

    /// When the armed debounce fires, if armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Armed { fire_at, .. } => Some(fire_at),
            _ => None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.stats.arms += 1;
        match self.phase {
            Phase::Idle => self.start_debounce(now, now),
            Phase::Armed { burst_started, .. } => self.start_debounce(burst_started, now),
            Phase::Extracting { .. } | Phase::Applying { .. } => {
                if !self.pending_rearm {
                    tracing::trace!(target: "sync_bridge", state = ?self.state(), "re-arm deferred");
                }
                self.pending_rearm = true;
            }
        }
    }

    /// Manual "force update": identical to an edit-triggered arm.
    pub fn request_sync(&mut self, now: Instant) {
        tracing::debug!(target: "sync_bridge", "sync requested");
        self.arm(now);
    }

    /// Advances the state machine. Call once per frame, after the scheduler
    /// tick.
    pub fn poll<S, A>(&mut self, now: Instant, source: &S, applier: &mut A) -> SyncPoll
    where
        S: SnapshotSource + ?Sized,
        A: TextureApplier + ?Sized,
    {
        let mut report = SyncPoll::default();

        let completion = match &self.phase {
            Phase::Applying { ticket, .. } => ticket.try_complete(),
            _ => None,
        };
        if let Some(result) = completion {
            self.finish(now, &result);
            report.completed = Some(result);
        }

        let due = matches!(self.phase, Phase::Armed { fire_at, .. } if now >= fire_at);
        if !due {
            return report;
        }
        let Phase::Armed { burst_started, .. } = self.phase else {
            return report;
        };

        self.phase = Phase::Extracting { burst_started };
        let snapshot = match self.extract(now, source) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                self.stats.extraction_failures += 1;
                tracing::warn!(
                    target: "sync_bridge",
                    %error,
                    version = %self.last_version,
                    "snapshot extraction failed"
                );
                self.return_to_idle(now);
                report.extraction_error = Some(error);
                return report;
            }
        };

        let version = snapshot.version();
        report.extracted = Some(version);
        let ticket = applier.apply(Arc::new(snapshot));
        tracing::trace!(target: "sync_bridge", %version, "applying");
        let immediate = ticket.try_complete();
        self.phase = Phase::Applying {
            burst_started,
            ticket,
        };
        if let Some(result) = immediate {
            self.finish(now, &result);
            report.completed = Some(result);
        }
        report
    }

    fn start_debounce(&mut self, burst_started: Instant, now: Instant) {
        let mut fire_at = now + self.config.debounce;
        if let Some(max_wait) = self.config.max_debounce_wait {
            fire_at = fire_at.min(burst_started + max_wait);
        }
        if matches!(self.phase, Phase::Idle) {
            tracing::trace!(target: "sync_bridge", "armed");
        }
        self.phase = Phase::Armed {
            burst_started,
            fire_at,
        };
    }

    fn extract<S: SnapshotSource + ?Sized>(
        &mut self,
        now: Instant,
        source: &S,
    ) -> Result<Snapshot, ExtractionError> {
        let started = Instant::now();
        let version = self
            .last_version
            .next()
            .ok_or(ExtractionError::VersionExhausted)?;
        let frame = source.capture()?;
        let pixels = resample::nearest(frame.size, &frame.pixels, self.output_size)?;
        let snapshot = Snapshot::new(version, self.output_size, pixels, frame.edit_sequence, now)?;

        self.last_version = version;
        self.stats.extractions += 1;
        let duration = started.elapsed();
        if let Some(probe) = self.probe.as_mut() {
            probe.record(SyncSample::Extracted { version, duration });
        }
        tracing::debug!(
            target: "sync_bridge",
            %version,
            edit_sequence = frame.edit_sequence,
            duration_us = duration.as_micros() as u64,
            "snapshot extracted"
        );
        Ok(snapshot)
    }

    fn finish(&mut self, now: Instant, result: &ApplyResult) {
        let burst_started = match self.phase {
            Phase::Applying { burst_started, .. } => burst_started,
            _ => now,
        };
        let (version, applied) = match result {
            Ok(ApplyOutcome::Applied { version, replaced }) => {
                self.stats.applied += 1;
                tracing::debug!(
                    target: "sync_bridge",
                    %version,
                    replaced = ?replaced.map(|v| v.get()),
                    "texture applied"
                );
                (*version, true)
            }
            Ok(ApplyOutcome::Stale { version, applied }) => {
                self.stats.stale += 1;
                tracing::warn!(
                    target: "sync_bridge",
                    %version,
                    %applied,
                    "stale snapshot dropped by applier"
                );
                (*version, false)
            }
            Err(error) => {
                self.stats.apply_failures += 1;
                tracing::warn!(target: "sync_bridge", %error, "texture apply failed");
                (apply_error_version(error), false)
            }
        };
        if let Some(probe) = self.probe.as_mut() {
            probe.record(SyncSample::Completed {
                version,
                arm_to_complete: now.saturating_duration_since(burst_started),
                applied,
            });
        }
        self.return_to_idle(now);
    }

    fn return_to_idle(&mut self, now: Instant) {
        self.phase = Phase::Idle;
        if self.pending_rearm {
            self.pending_rearm = false;
            self.stats.rearms += 1;
            tracing::debug!(target: "sync_bridge", "re-arming for edits made during sync");
            self.start_debounce(now, now);
        }
    }
}

impl SyncTrigger for SyncBridge {
    fn arm(&mut self, now: Instant) {
        SyncBridge::arm(self, now);
    }
}

fn apply_error_version(error: &ApplyError) -> Version {
    match error {
        ApplyError::Upload { version, .. }
        | ApplyError::Abandoned { version }
        | ApplyError::WorkerUnavailable { version } => *version,
    }
}
