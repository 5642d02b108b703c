use std::path::{Path, PathBuf};
use std::time::Duration;

use frame_scheduler::{FrameSchedulerConfig, FrameSchedulerConfigError};
use model::{GeometryError, RasterSize, Rgba8};
use perf_monitor::{MonitorConfigError, PerformanceMonitorConfig};
use serde::{Deserialize, Serialize};
use surface::DirtyRegionConfig;
use sync_bridge::{SyncBridgeConfig, SyncConfigError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid session config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid canvas size: {0}")]
    Canvas(#[from] GeometryError),
    #[error("full_surface_collapse_ratio must be in (0, 1], got {0}")]
    CollapseRatio(f32),
    #[error("frame_budget_ms must be a positive number, got {0}")]
    FrameBudget(f64),
    #[error("texture_workers must be at least 1")]
    NoTextureWorkers,
    #[error(transparent)]
    Scheduler(#[from] FrameSchedulerConfigError),
    #[error(transparent)]
    Sync(#[from] SyncConfigError),
    #[error(transparent)]
    Monitor(#[from] MonitorConfigError),
}

/// Everything an editing session needs, in the units a settings file uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub background: [u8; 4],
    pub full_surface_collapse_ratio: f32,
    pub frame_budget_ms: f64,
    pub budget_usage_ratio: f32,
    pub max_regions_per_tick: u32,
    pub min_regions_per_tick: u32,
    pub debounce_ms: u64,
    pub max_debounce_wait_ms: Option<u64>,
    pub texture_width: u32,
    pub texture_height: u32,
    pub texture_workers: usize,
    pub fps_window: usize,
    pub low_fps_threshold: f64,
    pub low_fps_windows: u32,
    pub slow_sync_ms: u64,
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let scheduler = FrameSchedulerConfig::default();
        let sync = SyncBridgeConfig::default();
        let monitor = PerformanceMonitorConfig::default();
        Self {
            canvas_width: 512,
            canvas_height: 512,
            background: [0, 0, 0, 0],
            full_surface_collapse_ratio: DirtyRegionConfig::default().full_surface_collapse_ratio,
            frame_budget_ms: scheduler.frame_budget.as_secs_f64() * 1000.0,
            budget_usage_ratio: scheduler.budget_usage_ratio,
            max_regions_per_tick: scheduler.max_regions_per_tick,
            min_regions_per_tick: scheduler.min_regions_per_tick,
            debounce_ms: sync.debounce.as_millis() as u64,
            max_debounce_wait_ms: None,
            texture_width: sync.output_width,
            texture_height: sync.output_height,
            texture_workers: 2,
            fps_window: monitor.window_len,
            low_fps_threshold: monitor.low_fps_threshold,
            low_fps_windows: monitor.consecutive_windows,
            slow_sync_ms: monitor.slow_sync_threshold.as_millis() as u64,
            debug: false,
        }
    }
}

impl SessionConfig {
    /// Reads a JSON settings file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        tracing::debug!(target: "studio", path = %path.display(), "session config loaded");
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.canvas_size()?;
        self.dirty_config()?;
        self.scheduler_config()?.validate()?;
        self.sync_config().validate()?;
        self.monitor_config().validate()?;
        if self.texture_workers == 0 {
            return Err(ConfigError::NoTextureWorkers);
        }
        Ok(())
    }

    pub fn canvas_size(&self) -> Result<RasterSize, ConfigError> {
        Ok(RasterSize::new(self.canvas_width, self.canvas_height)?)
    }

    pub fn background(&self) -> Rgba8 {
        let [r, g, b, a] = self.background;
        Rgba8::new(r, g, b, a)
    }

    pub fn dirty_config(&self) -> Result<DirtyRegionConfig, ConfigError> {
        let ratio = self.full_surface_collapse_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::CollapseRatio(ratio));
        }
        Ok(DirtyRegionConfig {
            full_surface_collapse_ratio: ratio,
        })
    }

    pub fn scheduler_config(&self) -> Result<FrameSchedulerConfig, ConfigError> {
        let frame_budget = Duration::try_from_secs_f64(self.frame_budget_ms / 1000.0)
            .ok()
            .filter(|budget| !budget.is_zero())
            .ok_or(ConfigError::FrameBudget(self.frame_budget_ms))?;
        Ok(FrameSchedulerConfig {
            frame_budget,
            budget_usage_ratio: self.budget_usage_ratio,
            max_regions_per_tick: self.max_regions_per_tick,
            min_regions_per_tick: self.min_regions_per_tick,
        })
    }

    pub fn sync_config(&self) -> SyncBridgeConfig {
        SyncBridgeConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_debounce_wait: self.max_debounce_wait_ms.map(Duration::from_millis),
            output_width: self.texture_width,
            output_height: self.texture_height,
        }
    }

    pub fn monitor_config(&self) -> PerformanceMonitorConfig {
        PerformanceMonitorConfig {
            window_len: self.fps_window,
            low_fps_threshold: self.low_fps_threshold,
            consecutive_windows: self.low_fps_windows,
            slow_sync_threshold: Duration::from_millis(self.slow_sync_ms),
            ..PerformanceMonitorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_component_defaults() {
        let config = SessionConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.sync_config(), SyncBridgeConfig::default());
        assert_eq!(
            config.canvas_size().expect("canvas"),
            RasterSize::new(512, 512).expect("size")
        );
        let scheduler = config.scheduler_config().expect("scheduler");
        assert_eq!(scheduler.max_regions_per_tick, 128);
        assert!(
            scheduler
                .frame_budget
                .abs_diff(FrameSchedulerConfig::default().frame_budget)
                < Duration::from_micros(1)
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = SessionConfig::from_json(
            r#"{ "canvas_width": 256, "debounce_ms": 40, "max_debounce_wait_ms": 400 }"#,
        )
        .expect("config");
        assert_eq!(config.canvas_width, 256);
        assert_eq!(config.canvas_height, 512);
        let sync = config.sync_config();
        assert_eq!(sync.debounce, Duration::from_millis(40));
        assert_eq!(sync.max_debounce_wait, Some(Duration::from_millis(400)));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            SessionConfig::from_json(r#"{ "canvas_width": 0 }"#),
            Err(ConfigError::Canvas(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "min_regions_per_tick": 500 }"#),
            Err(ConfigError::Scheduler(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "full_surface_collapse_ratio": 1.5 }"#),
            Err(ConfigError::CollapseRatio(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "texture_workers": 0 }"#),
            Err(ConfigError::NoTextureWorkers)
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "frame_budget_ms": 1e300 }"#),
            Err(ConfigError::FrameBudget(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "frame_budget_ms": -5 }"#),
            Err(ConfigError::FrameBudget(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "fps_window": 0 }"#),
            Err(ConfigError::Monitor(MonitorConfigError::EmptyWindow))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "low_fps_windows": 0, "fps_window": 2 }"#),
            Err(ConfigError::Monitor(
                MonitorConfigError::ZeroConsecutiveWindows
            ))
        ));
        assert!(matches!(
            SessionConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = SessionConfig::load("/nonexistent/studio.json").expect_err("missing");
        assert!(error.to_string().contains("/nonexistent/studio.json"));
    }
}
