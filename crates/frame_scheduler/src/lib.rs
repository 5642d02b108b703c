//! Cooperative per-frame redraw scheduler.
//!
//! One [`FrameScheduler::tick`] per host frame callback: drain the surface's
//! dirty set, redraw regions into the backing store until the redraw deadline
//! or the region quota is hit, and put everything left over back into the
//! tracker for the next tick.

mod clock;

use std::time::{Duration, Instant};

use model::{DirtyRect, Rgba8};
use perf_monitor::{QualityAdvice, TickProbe, TickSample};
use protocol::SyncTrigger;
use surface::{DirtySet, PixelSurface};
use thiserror::Error;

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::ManualClock;
pub use clock::{FrameClock, SystemClock};

/// 60 Hz.
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_micros(16_667);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSchedulerConfig {
    pub frame_budget: Duration,
    /// Share of the frame budget redraw may use before deferring the rest.
    pub budget_usage_ratio: f32,
    pub max_regions_per_tick: u32,
    pub min_regions_per_tick: u32,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget: DEFAULT_FRAME_BUDGET,
            budget_usage_ratio: 0.8,
            max_regions_per_tick: 128,
            min_regions_per_tick: 8,
        }
    }
}

impl FrameSchedulerConfig {
    pub fn redraw_deadline(&self) -> Duration {
        self.frame_budget.mul_f32(self.budget_usage_ratio)
    }

    pub fn validate(&self) -> Result<(), FrameSchedulerConfigError> {
        if self.frame_budget.is_zero() {
            return Err(FrameSchedulerConfigError::ZeroBudget);
        }
        if !self.budget_usage_ratio.is_finite()
            || self.budget_usage_ratio <= 0.0
            || self.budget_usage_ratio > 1.0
        {
            return Err(FrameSchedulerConfigError::InvalidUsageRatio(
                self.budget_usage_ratio,
            ));
        }
        if self.min_regions_per_tick == 0 {
            return Err(FrameSchedulerConfigError::ZeroRegionQuota);
        }
        if self.min_regions_per_tick > self.max_regions_per_tick {
            return Err(FrameSchedulerConfigError::QuotaBoundsInverted {
                min: self.min_regions_per_tick,
                max: self.max_regions_per_tick,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FrameSchedulerConfigError {
    #[error("frame budget must be non-zero")]
    ZeroBudget,
    #[error("budget usage ratio must be in (0, 1], got {0}")]
    InvalidUsageRatio(f32),
    #[error("min_regions_per_tick must be at least 1")]
    ZeroRegionQuota,
    #[error("min_regions_per_tick ({min}) exceeds max_regions_per_tick ({max})")]
    QuotaBoundsInverted { min: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("region redraw failed: {0}")]
pub struct RegionRedrawError(pub String);

/// Render-host canvas the scheduler redraws dirty regions into.
pub trait BackingStore {
    fn redraw_region(&mut self, rect: DirtyRect, pixels: &[Rgba8])
    -> Result<(), RegionRedrawError>;
}

impl<T: BackingStore + ?Sized> BackingStore for Box<T> {
    fn redraw_region(
        &mut self,
        rect: DirtyRect,
        pixels: &[Rgba8],
    ) -> Result<(), RegionRedrawError> {
        (**self).redraw_region(rect, pixels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Waiting,
    Ticking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickInput {
    pub frame_sequence_id: u64,
    pub quality_advice: QualityAdvice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickCutoff {
    Budget,
    Quota,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub frame_sequence_id: u64,
    pub drained_regions: usize,
    pub redrawn_regions: usize,
    /// Regions whose redraw failed; they are requeued.
    pub failed_regions: usize,
    /// Regions not attempted because of `cutoff`; they are requeued.
    pub deferred_regions: usize,
    pub redrawn_area: u64,
    pub elapsed: Duration,
    pub cutoff: Option<TickCutoff>,
    pub region_quota: u32,
    pub sync_armed: bool,
}

pub struct FrameScheduler {
    config: FrameSchedulerConfig,
    clock: Box<dyn FrameClock>,
    phase: SchedulerPhase,
    region_quota: u32,
    last_tick_started: Option<Instant>,
    /// Surface edit sequence at the last arm.
    armed_edit: Option<u64>,
    probe: Option<TickProbe>,
}

impl FrameScheduler {
    pub fn new(config: FrameSchedulerConfig) -> Result<Self, FrameSchedulerConfigError> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(
        config: FrameSchedulerConfig,
        clock: Box<dyn FrameClock>,
    ) -> Result<Self, FrameSchedulerConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            phase: SchedulerPhase::Waiting,
            region_quota: config.max_regions_per_tick,
            last_tick_started: None,
            armed_edit: None,
            probe: None,
        })
    }

    pub fn attach_probe(&mut self, probe: TickProbe) {
        self.probe = Some(probe);
    }

    pub fn config(&self) -> FrameSchedulerConfig {
        self.config
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn region_quota(&self) -> u32 {
        self.region_quota
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn tick<B, T>(
        &mut self,
        input: TickInput,
        surface: &mut PixelSurface,
        store: &mut B,
        sync: &mut T,
    ) -> TickReport
    where
        B: BackingStore + ?Sized,
        T: SyncTrigger + ?Sized,
    {
        self.phase = SchedulerPhase::Ticking;
        let started = self.clock.now();
        let frame_time = self
            .last_tick_started
            .map(|previous| started.saturating_duration_since(previous));
        self.last_tick_started = Some(started);
        self.apply_quality_advice(input.quality_advice);

        let drained = surface.tracker_mut().drain();
        let deadline = self.config.redraw_deadline();
        let mut requeue: Vec<DirtyRect> = Vec::new();
        let mut cutoff = None;
        let mut attempted = 0u32;
        let mut redrawn_regions = 0usize;
        let mut failed_regions = 0usize;
        let mut deferred_regions = 0usize;
        let mut redrawn_area = 0u64;

        for rect in drained.iter() {
            if cutoff.is_none() {
                if attempted >= self.region_quota {
                    cutoff = Some(TickCutoff::Quota);
                } else if self.clock.now().saturating_duration_since(started) >= deadline {
                    cutoff = Some(TickCutoff::Budget);
                }
            }
            if cutoff.is_some() {
                deferred_regions += 1;
                requeue.push(rect);
                continue;
            }

            attempted += 1;
            match redraw_region(surface, store, rect) {
                Ok(()) => {
                    redrawn_regions += 1;
                    redrawn_area += rect.area();
                }
                Err(error) => {
                    failed_regions += 1;
                    tracing::warn!(
                        target: "frame_scheduler",
                        frame = input.frame_sequence_id,
                        x = rect.x(),
                        y = rect.y(),
                        width = rect.width(),
                        height = rect.height(),
                        %error,
                        "region redraw failed; requeued"
                    );
                    requeue.push(rect);
                }
            }
        }

        if !requeue.is_empty() {
            surface
                .tracker_mut()
                .requeue(requeue.into_iter().collect::<DirtySet>());
        }

        // A region that keeps failing arms once per edit, so it cannot hold
        // back the sync of the rest of the surface or postpone it forever.
        let ended = self.clock.now();
        let edit = surface.edit_sequence();
        let sync_armed =
            redrawn_regions > 0 || (failed_regions > 0 && self.armed_edit != Some(edit));
        if sync_armed {
            self.armed_edit = Some(edit);
            sync.arm(ended);
        }

        let elapsed = ended.saturating_duration_since(started);
        if let Some(TickCutoff::Budget) = cutoff {
            tracing::debug!(
                target: "frame_scheduler",
                frame = input.frame_sequence_id,
                deferred_regions,
                elapsed_us = elapsed.as_micros() as u64,
                "frame budget exhausted"
            );
        }
        if let Some(probe) = self.probe.as_mut() {
            probe.record(TickSample {
                frame_time: frame_time.unwrap_or(elapsed),
                work_time: elapsed,
                budget_exhausted: cutoff == Some(TickCutoff::Budget),
            });
        }

        self.phase = SchedulerPhase::Waiting;
        TickReport {
            frame_sequence_id: input.frame_sequence_id,
            drained_regions: drained.len(),
            redrawn_regions,
            failed_regions,
            deferred_regions,
            redrawn_area,
            elapsed,
            cutoff,
            region_quota: self.region_quota,
            sync_armed,
        }
    }

    fn apply_quality_advice(&mut self, advice: QualityAdvice) {
        let floor = self.config.min_regions_per_tick;
        let ceiling = self.config.max_regions_per_tick;
        let next = match advice {
            QualityAdvice::Normal => self.region_quota.saturating_mul(2),
            QualityAdvice::Reduce => self.region_quota / 2,
        }
        .clamp(floor, ceiling);
        if next != self.region_quota {
            tracing::debug!(
                target: "frame_scheduler",
                from = self.region_quota,
                to = next,
                ?advice,
                "region quota adjusted"
            );
            self.region_quota = next;
        }
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FrameScheduler")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("region_quota", &self.region_quota)
            .finish_non_exhaustive()
    }
}

fn redraw_region<B: BackingStore + ?Sized>(
    surface: &PixelSurface,
    store: &mut B,
    rect: DirtyRect,
) -> Result<(), RegionRedrawError> {
    let pixels = surface
        .read(rect)
        .map_err(|error| RegionRedrawError(error.to_string()))?;
    store.redraw_region(rect, &pixels)
}
