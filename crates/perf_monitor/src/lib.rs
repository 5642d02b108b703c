//! Frame-rate and sync-latency observer.
//!
//! The scheduler and the bridge only ever hold a probe: a lock-free SPSC ring
//! producer whose `record` never blocks. A full ring drops the sample and
//! counts it. The monitor drains the rings when the host polls it and never
//! reaches back into the components it observes; its only output besides
//! diagnostics is an advisory [`QualityAdvice`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use protocol::Version;
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceMonitorConfig {
    /// Tick samples per rolling window.
    pub window_len: usize,
    pub low_fps_threshold: f64,
    /// Consecutive low windows before [`PerformanceAlert::LowFrameRate`].
    pub consecutive_windows: u32,
    pub slow_sync_threshold: Duration,
    pub probe_capacity: usize,
    pub max_alerts: usize,
}

impl Default for PerformanceMonitorConfig {
    fn default() -> Self {
        Self {
            window_len: 60,
            low_fps_threshold: 50.0,
            consecutive_windows: 3,
            slow_sync_threshold: Duration::from_millis(500),
            probe_capacity: 256,
            max_alerts: 32,
        }
    }
}

impl PerformanceMonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorConfigError> {
        if self.window_len == 0 {
            return Err(MonitorConfigError::EmptyWindow);
        }
        if self.consecutive_windows == 0 {
            return Err(MonitorConfigError::ZeroConsecutiveWindows);
        }
        if !(self.low_fps_threshold.is_finite() && self.low_fps_threshold > 0.0) {
            return Err(MonitorConfigError::InvalidFpsThreshold(
                self.low_fps_threshold,
            ));
        }
        if self.probe_capacity == 0 {
            return Err(MonitorConfigError::EmptyProbe);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MonitorConfigError {
    #[error("window_len must be at least 1")]
    EmptyWindow,
    #[error("consecutive_windows must be at least 1")]
    ZeroConsecutiveWindows,
    #[error("low fps threshold must be a positive number, got {0}")]
    InvalidFpsThreshold(f64),
    #[error("probe_capacity must be at least 1")]
    EmptyProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSample {
    /// Wall-clock time since the previous tick started (the realised frame
    /// time), or the tick's own duration for the first tick.
    pub frame_time: Duration,
    pub work_time: Duration,
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSample {
    Extracted {
        version: Version,
        duration: Duration,
    },
    Completed {
        version: Version,
        arm_to_complete: Duration,
        applied: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PerformanceAlert {
    LowFrameRate { average_fps: f64, windows: u32 },
    SlowSync { version: Version, latency: Duration },
}

/// Advisory input for the scheduler's per-tick work quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityAdvice {
    #[default]
    Normal,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorStats {
    pub total_ticks: u64,
    pub budget_exhausted_ticks: u64,
    pub extractions: u64,
    pub completions: u64,
    pub dropped_samples: u64,
}

pub struct TickProbe {
    producer: Producer<TickSample>,
    dropped: Arc<AtomicU64>,
}

impl TickProbe {
    pub fn record(&mut self, sample: TickSample) {
        if self.producer.push(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for TickProbe {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TickProbe")
            .field("free_slots", &self.producer.slots())
            .finish()
    }
}

pub struct SyncProbe {
    producer: Producer<SyncSample>,
    dropped: Arc<AtomicU64>,
}

impl SyncProbe {
    pub fn record(&mut self, sample: SyncSample) {
        if self.producer.push(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for SyncProbe {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncProbe")
            .field("free_slots", &self.producer.slots())
            .finish()
    }
}

pub struct PerformanceMonitor {
    config: PerformanceMonitorConfig,
    tick_samples: Consumer<TickSample>,
    sync_samples: Consumer<SyncSample>,
    frame_times: VecDeque<Duration>,
    samples_in_window: usize,
    consecutive_low_windows: u32,
    sync_latencies: VecDeque<Duration>,
    alerts: VecDeque<PerformanceAlert>,
    advice: QualityAdvice,
    stats: MonitorStats,
    dropped: Arc<AtomicU64>,
}

impl PerformanceMonitor {
    pub fn new(
        config: PerformanceMonitorConfig,
    ) -> Result<(Self, TickProbe, SyncProbe), MonitorConfigError> {
        config.validate()?;
        let dropped = Arc::new(AtomicU64::new(0));
        let (tick_producer, tick_consumer) = RingBuffer::new(config.probe_capacity);
        let (sync_producer, sync_consumer) = RingBuffer::new(config.probe_capacity);

        let monitor = Self {
            config,
            tick_samples: tick_consumer,
            sync_samples: sync_consumer,
            frame_times: VecDeque::with_capacity(config.window_len),
            samples_in_window: 0,
            consecutive_low_windows: 0,
            sync_latencies: VecDeque::with_capacity(config.window_len),
            alerts: VecDeque::new(),
            advice: QualityAdvice::Normal,
            stats: MonitorStats::default(),
            dropped: dropped.clone(),
        };
        let tick_probe = TickProbe {
            producer: tick_producer,
            dropped: dropped.clone(),
        };
        let sync_probe = SyncProbe {
            producer: sync_producer,
            dropped,
        };
        Ok((monitor, tick_probe, sync_probe))
    }

    pub fn config(&self) -> PerformanceMonitorConfig {
        self.config
    }

    /// Drains both probe rings. Returns the number of samples consumed.
    pub fn poll(&mut self) -> usize {
        let mut consumed = 0;
        while let Ok(sample) = self.tick_samples.pop() {
            self.observe_tick(sample);
            consumed += 1;
        }
        while let Ok(sample) = self.sync_samples.pop() {
            self.observe_sync(sample);
            consumed += 1;
        }
        self.stats.dropped_samples = self.dropped.load(Ordering::Relaxed);
        consumed
    }

    /// Average frame rate over the rolling window.
    pub fn average_fps(&self) -> Option<f64> {
        if self.frame_times.is_empty() {
            return None;
        }
        let total: Duration = self.frame_times.iter().sum();
        let mean_seconds = total.as_secs_f64() / self.frame_times.len() as f64;
        fps_from_seconds(mean_seconds)
    }

    /// Frame rate of the slowest frame in the rolling window.
    pub fn min_fps(&self) -> Option<f64> {
        let slowest = self.frame_times.iter().max()?;
        fps_from_seconds(slowest.as_secs_f64())
    }

    pub fn average_sync_latency(&self) -> Option<Duration> {
        if self.sync_latencies.is_empty() {
            return None;
        }
        let total: Duration = self.sync_latencies.iter().sum();
        Some(total / self.sync_latencies.len() as u32)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &PerformanceAlert> + '_ {
        self.alerts.iter()
    }

    pub fn take_alerts(&mut self) -> Vec<PerformanceAlert> {
        self.alerts.drain(..).collect()
    }

    pub fn quality_advice(&self) -> QualityAdvice {
        self.advice
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    fn observe_tick(&mut self, sample: TickSample) {
        self.stats.total_ticks += 1;
        if sample.budget_exhausted {
            self.stats.budget_exhausted_ticks += 1;
        }

        if self.frame_times.len() == self.config.window_len {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(sample.frame_time);

        self.samples_in_window += 1;
        if self.samples_in_window < self.config.window_len {
            return;
        }
        self.samples_in_window = 0;
        self.close_window();
    }

    fn close_window(&mut self) {
        let Some(average_fps) = self.average_fps() else {
            return;
        };
        if average_fps >= self.config.low_fps_threshold {
            if self.advice == QualityAdvice::Reduce {
                tracing::debug!(target: "perf_monitor", average_fps, "frame rate recovered");
            }
            self.consecutive_low_windows = 0;
            self.advice = QualityAdvice::Normal;
            return;
        }

        self.consecutive_low_windows = self.consecutive_low_windows.saturating_add(1);
        if self.consecutive_low_windows == self.config.consecutive_windows {
            tracing::warn!(
                target: "perf_monitor",
                average_fps,
                windows = self.consecutive_low_windows,
                threshold = self.config.low_fps_threshold,
                "sustained low frame rate"
            );
            self.push_alert(PerformanceAlert::LowFrameRate {
                average_fps,
                windows: self.consecutive_low_windows,
            });
        }
        if self.consecutive_low_windows >= self.config.consecutive_windows {
            self.advice = QualityAdvice::Reduce;
        }
    }

    fn observe_sync(&mut self, sample: SyncSample) {
        match sample {
            SyncSample::Extracted { .. } => {
                self.stats.extractions += 1;
            }
            SyncSample::Completed {
                version,
                arm_to_complete,
                applied,
            } => {
                self.stats.completions += 1;
                if !applied {
                    return;
                }
                if self.sync_latencies.len() == self.config.window_len {
                    self.sync_latencies.pop_front();
                }
                self.sync_latencies.push_back(arm_to_complete);
                if arm_to_complete > self.config.slow_sync_threshold {
                    tracing::warn!(
                        target: "perf_monitor",
                        %version,
                        latency_ms = arm_to_complete.as_secs_f64() * 1000.0,
                        "slow texture sync"
                    );
                    self.push_alert(PerformanceAlert::SlowSync {
                        version,
                        latency: arm_to_complete,
                    });
                }
            }
        }
    }

    fn push_alert(&mut self, alert: PerformanceAlert) {
        if self.config.max_alerts == 0 {
            return;
        }
        if self.alerts.len() == self.config.max_alerts {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("advice", &self.advice)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn fps_from_seconds(seconds: f64) -> Option<f64> {
    if seconds > 0.0 { Some(1.0 / seconds) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(frame_ms: u64) -> TickSample {
        TickSample {
            frame_time: Duration::from_millis(frame_ms),
            work_time: Duration::from_millis(1),
            budget_exhausted: false,
        }
    }

    fn small_config() -> PerformanceMonitorConfig {
        PerformanceMonitorConfig {
            window_len: 4,
            low_fps_threshold: 50.0,
            consecutive_windows: 2,
            ..PerformanceMonitorConfig::default()
        }
    }

    #[test]
    fn reports_nothing_before_first_sample() {
        let (monitor, _tick, _sync) =
            PerformanceMonitor::new(PerformanceMonitorConfig::default()).expect("monitor");
        assert_eq!(monitor.average_fps(), None);
        assert_eq!(monitor.min_fps(), None);
        assert_eq!(monitor.alerts().count(), 0);
    }

    #[test]
    fn rejects_configs_that_cannot_alert() {
        let empty_window = PerformanceMonitorConfig {
            window_len: 0,
            ..small_config()
        };
        assert_eq!(
            PerformanceMonitor::new(empty_window).err(),
            Some(MonitorConfigError::EmptyWindow)
        );

        // With no required windows the advice would flip to Reduce without
        // a LowFrameRate alert ever being raised.
        let no_windows = PerformanceMonitorConfig {
            consecutive_windows: 0,
            ..small_config()
        };
        assert_eq!(
            no_windows.validate(),
            Err(MonitorConfigError::ZeroConsecutiveWindows)
        );

        let bad_threshold = PerformanceMonitorConfig {
            low_fps_threshold: f64::NAN,
            ..small_config()
        };
        assert!(matches!(
            bad_threshold.validate(),
            Err(MonitorConfigError::InvalidFpsThreshold(_))
        ));

        let no_probe = PerformanceMonitorConfig {
            probe_capacity: 0,
            ..small_config()
        };
        assert_eq!(no_probe.validate(), Err(MonitorConfigError::EmptyProbe));
    }

    #[test]
    fn average_and_min_fps_follow_rolling_window() {
        let (mut monitor, mut probe, _sync) =
            PerformanceMonitor::new(small_config()).expect("monitor");
        for frame_ms in [10, 10, 20, 40] {
            probe.record(tick(frame_ms));
        }
        assert_eq!(monitor.poll(), 4);

        let average = monitor.average_fps().expect("average");
        assert!((average - 50.0).abs() < 1e-9, "average was {average}");
        let min = monitor.min_fps().expect("min");
        assert!((min - 25.0).abs() < 1e-9, "min was {min}");

        // Oldest samples fall out of the window.
        for _ in 0..4 {
            probe.record(tick(10));
        }
        monitor.poll();
        let average = monitor.average_fps().expect("average");
        assert!((average - 100.0).abs() < 1e-9, "average was {average}");
    }

    #[test]
    fn low_frame_rate_alert_needs_consecutive_windows() {
        let (mut monitor, mut probe, _sync) =
            PerformanceMonitor::new(small_config()).expect("monitor");
        for _ in 0..4 {
            probe.record(tick(40));
        }
        monitor.poll();
        assert_eq!(monitor.alerts().count(), 0);
        assert_eq!(monitor.quality_advice(), QualityAdvice::Normal);

        for _ in 0..4 {
            probe.record(tick(40));
        }
        monitor.poll();
        let alerts = monitor.take_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(
            alerts[0],
            PerformanceAlert::LowFrameRate { windows: 2, .. }
        ));
        assert_eq!(monitor.quality_advice(), QualityAdvice::Reduce);

        for _ in 0..4 {
            probe.record(tick(10));
        }
        monitor.poll();
        assert_eq!(monitor.quality_advice(), QualityAdvice::Normal);
        assert_eq!(monitor.alerts().count(), 0);
    }

    #[test]
    fn full_probe_drops_instead_of_blocking() {
        let config = PerformanceMonitorConfig {
            probe_capacity: 2,
            ..small_config()
        };
        let (mut monitor, mut probe, _sync) =
            PerformanceMonitor::new(config).expect("monitor");
        for _ in 0..5 {
            probe.record(tick(16));
        }
        assert_eq!(monitor.poll(), 2);
        assert_eq!(monitor.stats().dropped_samples, 3);
        assert_eq!(monitor.stats().total_ticks, 2);
    }

    #[test]
    fn slow_applied_sync_raises_alert() {
        let (mut monitor, _tick, mut sync) =
            PerformanceMonitor::new(small_config()).expect("monitor");
        sync.record(SyncSample::Extracted {
            version: Version::new(1),
            duration: Duration::from_millis(2),
        });
        sync.record(SyncSample::Completed {
            version: Version::new(1),
            arm_to_complete: Duration::from_millis(120),
            applied: true,
        });
        sync.record(SyncSample::Completed {
            version: Version::new(2),
            arm_to_complete: Duration::from_millis(900),
            applied: true,
        });
        sync.record(SyncSample::Completed {
            version: Version::new(3),
            arm_to_complete: Duration::from_millis(5_000),
            applied: false,
        });
        monitor.poll();

        assert_eq!(monitor.stats().extractions, 1);
        assert_eq!(monitor.stats().completions, 3);
        assert_eq!(
            monitor.average_sync_latency(),
            Some(Duration::from_millis(510))
        );
        let alerts: Vec<_> = monitor.alerts().copied().collect();
        assert_eq!(
            alerts,
            vec![PerformanceAlert::SlowSync {
                version: Version::new(2),
                latency: Duration::from_millis(900),
            }]
        );
    }

    #[test]
    fn alert_history_is_bounded() {
        let config = PerformanceMonitorConfig {
            max_alerts: 2,
            ..small_config()
        };
        let (mut monitor, _tick, mut sync) =
            PerformanceMonitor::new(config).expect("monitor");
        for raw in 1..=3 {
            sync.record(SyncSample::Completed {
                version: Version::new(raw),
                arm_to_complete: Duration::from_secs(1),
                applied: true,
            });
        }
        monitor.poll();
        let versions: Vec<_> = monitor
            .alerts()
            .map(|alert| match alert {
                PerformanceAlert::SlowSync { version, .. } => version.get(),
                PerformanceAlert::LowFrameRate { .. } => 0,
            })
            .collect();
        assert_eq!(versions, vec![2, 3]);
    }
}
