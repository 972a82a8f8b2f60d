use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW_SIZE: usize = 120;
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Read-only view of a sync loop's health, published after every tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncMetrics {
    pub frames_synced: u64,
    pub ticks: u64,
    /// Ticks during the last second.
    pub fps: f64,
    pub avg_lag_ms: f64,
    pub last_sync_lag_ms: Option<f64>,
    pub worst_lag_ms: f64,
    pub os_call_timeouts: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncStats {
    window_size: usize,
    lag_ms_window: VecDeque<f64>,
    tick_window: VecDeque<Instant>,
    change_observed_at: Option<Instant>,
    frames_synced: u64,
    ticks: u64,
    last_lag_ms: Option<f64>,
    os_call_timeouts: u64,
    last_error: Option<String>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SyncStats {
    pub fn new(rolling_window: usize) -> Self {
        Self {
            window_size: rolling_window.max(1),
            lag_ms_window: VecDeque::with_capacity(rolling_window.max(1)),
            tick_window: VecDeque::new(),
            change_observed_at: None,
            frames_synced: 0,
            ticks: 0,
            last_lag_ms: None,
            os_call_timeouts: 0,
            last_error: None,
        }
    }

    pub fn record_tick(&mut self, now: Instant) {
        self.ticks = self.ticks.saturating_add(1);
        self.tick_window.push_back(now);
        while let Some(stamp) = self.tick_window.front().copied() {
            if now.saturating_duration_since(stamp) <= RATE_WINDOW {
                break;
            }
            let _ = self.tick_window.pop_front();
        }
    }

    /// Start the lag clock, unless a change is already pending.
    pub fn observe_change(&mut self, now: Instant) {
        if self.change_observed_at.is_none() {
            self.change_observed_at = Some(now);
        }
    }

    pub fn has_pending_change(&self) -> bool {
        self.change_observed_at.is_some()
    }

    /// Forget a pending change, e.g. when the container was hidden.
    pub fn discard_change(&mut self) {
        self.change_observed_at = None;
    }

    pub fn record_move(&mut self) {
        self.frames_synced = self.frames_synced.saturating_add(1);
    }

    /// The window reached the target; close the lag measurement.
    pub fn record_converged(&mut self, now: Instant) {
        let Some(started) = self.change_observed_at.take() else {
            return;
        };
        let ms = now.saturating_duration_since(started).as_secs_f64() * 1000.0;
        self.last_lag_ms = Some(ms);
        self.lag_ms_window.push_back(ms);
        while self.lag_ms_window.len() > self.window_size {
            let _ = self.lag_ms_window.pop_front();
        }
    }

    pub fn record_timeout(&mut self) {
        self.os_call_timeouts = self.os_call_timeouts.saturating_add(1);
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn snapshot(&self) -> SyncMetrics {
        SyncMetrics {
            frames_synced: self.frames_synced,
            ticks: self.ticks,
            fps: self.tick_window.len() as f64,
            avg_lag_ms: avg(&self.lag_ms_window),
            last_sync_lag_ms: self.last_lag_ms,
            worst_lag_ms: self.lag_ms_window.iter().copied().fold(0.0, f64::max),
            os_call_timeouts: self.os_call_timeouts,
            last_error: self.last_error.clone(),
        }
    }
}

fn avg(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_window_keeps_recent_samples_only() {
        let mut stats = SyncStats::new(2);
        let base = Instant::now();
        for (start, end) in [(0, 10), (20, 50), (60, 80)] {
            stats.observe_change(base + Duration::from_millis(start));
            stats.record_converged(base + Duration::from_millis(end));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.last_sync_lag_ms, Some(20.0));
        assert!((snap.avg_lag_ms - 25.0).abs() < 0.001);
        assert_eq!(snap.worst_lag_ms, 30.0);
    }

    #[test]
    fn lag_starts_at_first_observation() {
        let mut stats = SyncStats::default();
        let base = Instant::now();
        stats.observe_change(base);
        stats.observe_change(base + Duration::from_millis(30));
        stats.record_converged(base + Duration::from_millis(45));
        assert_eq!(stats.snapshot().last_sync_lag_ms, Some(45.0));

        stats.record_converged(base + Duration::from_millis(90));
        assert_eq!(stats.snapshot().last_sync_lag_ms, Some(45.0));
    }

    #[test]
    fn fps_counts_ticks_in_last_second() {
        let mut stats = SyncStats::default();
        let base = Instant::now();
        for i in 0..30 {
            stats.record_tick(base + Duration::from_millis(i * 50));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.ticks, 30);
        assert_eq!(snap.fps, 21.0);
    }
}
