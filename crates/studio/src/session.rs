use frame_scheduler::{
    BackingStore, FrameClock, FrameScheduler, SystemClock, TickInput, TickReport,
};
use model::{DirtyRect, Rgba8};
use perf_monitor::{MonitorStats, PerformanceAlert, PerformanceMonitor, QualityAdvice};
use protocol::{TextureApplier, Version};
use surface::{PixelSurface, SurfaceError};
use sync_bridge::{SyncBridge, SyncBridgeStats, SyncPoll, SyncState};

use crate::config::{ConfigError, SessionConfig};

/// What one [`EditorSession::frame`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub tick: TickReport,
    pub sync: SyncPoll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDiagnostics {
    pub frames: u64,
    pub edit_sequence: u64,
    pub pending_regions: usize,
    pub region_quota: u32,
    pub sync_state: SyncState,
    pub last_extracted: Version,
    pub applied_version: Version,
    pub average_fps: Option<f64>,
    pub min_fps: Option<f64>,
    pub quality_advice: QualityAdvice,
    pub sync: SyncBridgeStats,
    pub monitor: MonitorStats,
}

/// One editing session: the surface plus everything that keeps the canvas
/// and the preview texture up to date with it.
pub struct EditorSession<A: TextureApplier, S: BackingStore> {
    surface: PixelSurface,
    scheduler: FrameScheduler,
    bridge: SyncBridge,
    monitor: PerformanceMonitor,
    applier: A,
    store: S,
    frames: u64,
}

impl<A: TextureApplier, S: BackingStore> EditorSession<A, S> {
    pub fn new(config: &SessionConfig, applier: A, store: S) -> Result<Self, ConfigError> {
        Self::with_clock(config, Box::new(SystemClock), applier, store)
    }

    pub fn with_clock(
        config: &SessionConfig,
        clock: Box<dyn FrameClock>,
        applier: A,
        store: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let surface = PixelSurface::with_fill(
            config.canvas_size()?,
            config.background(),
            config.dirty_config()?,
        );
        let mut scheduler = FrameScheduler::with_clock(config.scheduler_config()?, clock)?;
        let mut bridge = SyncBridge::new(config.sync_config())?;
        let (monitor, tick_probe, sync_probe) = PerformanceMonitor::new(config.monitor_config())?;
        scheduler.attach_probe(tick_probe);
        bridge.attach_probe(sync_probe);
        tracing::info!(
            target: "studio",
            width = config.canvas_width,
            height = config.canvas_height,
            texture_width = config.texture_width,
            texture_height = config.texture_height,
            "editor session started"
        );
        Ok(Self {
            surface,
            scheduler,
            bridge,
            monitor,
            applier,
            store,
            frames: 0,
        })
    }

    pub fn write(&mut self, rect: DirtyRect, pixels: &[Rgba8]) -> Result<(), SurfaceError> {
        self.surface.write(rect, pixels)
    }

    pub fn fill(&mut self, rect: DirtyRect, color: Rgba8) -> Result<(), SurfaceError> {
        self.surface.fill(rect, color)
    }

    /// Render-host frame callback: redraw, advance the sync, fold in samples.
    pub fn frame(&mut self) -> FrameReport {
        self.frames += 1;
        let input = TickInput {
            frame_sequence_id: self.frames,
            quality_advice: self.monitor.quality_advice(),
        };
        let tick = self.scheduler.tick(
            input,
            &mut self.surface,
            &mut self.store,
            &mut self.bridge,
        );
        let sync = self
            .bridge
            .poll(self.scheduler.now(), &self.surface, &mut self.applier);
        self.monitor.poll();
        FrameReport { tick, sync }
    }

    /// Manual "sync now" from the UI. Behaves like any other edit trigger.
    pub fn request_sync(&mut self) {
        let now = self.scheduler.now();
        self.bridge.request_sync(now);
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        SessionDiagnostics {
            frames: self.frames,
            edit_sequence: self.surface.edit_sequence(),
            pending_regions: self.surface.tracker().pending().len(),
            region_quota: self.scheduler.region_quota(),
            sync_state: self.bridge.state(),
            last_extracted: self.bridge.last_version(),
            applied_version: self.applier.applied_version(),
            average_fps: self.monitor.average_fps(),
            min_fps: self.monitor.min_fps(),
            quality_advice: self.monitor.quality_advice(),
            sync: self.bridge.stats(),
            monitor: self.monitor.stats(),
        }
    }

    pub fn take_alerts(&mut self) -> Vec<PerformanceAlert> {
        self.monitor.take_alerts()
    }

    pub fn surface(&self) -> &PixelSurface {
        &self.surface
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    pub fn bridge(&self) -> &SyncBridge {
        &self.bridge
    }
}

impl<A: TextureApplier, S: BackingStore> std::fmt::Debug for EditorSession<A, S> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EditorSession")
            .field("frames", &self.frames)
            .field("scheduler", &self.scheduler)
            .field("bridge", &self.bridge)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}
