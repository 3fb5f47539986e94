//! PerformanceMetrics - notifier 実行時間と成功/失敗の集計
//!
//! 全体（global）と notifier 名ごとの 2 段で集計する。
//! duration は秒（f64）で保持するので、そのまま JSON にできる。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::{Clock, SystemClock};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_notifications: u64,
    pub total_success: u64,
    pub total_failure: u64,
    pub total_duration: f64,
    pub avg_duration: f64,
    pub last_notification: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifierMetrics {
    pub count: u64,
    pub success: u64,
    pub failure: u64,
    pub total_duration: f64,
    pub avg_duration: f64,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub last_duration: Option<f64>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Error of the most recent failure; kept across later successes.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub global: GlobalMetrics,
    pub notifiers: BTreeMap<String, NotifierMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummary {
    #[serde(flatten)]
    pub global: GlobalMetrics,
    /// success / total in [0, 1]; `None` until something was recorded.
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub global: GlobalSummary,
    pub notifiers: BTreeMap<String, NotifierMetrics>,
}

pub struct PerformanceMetrics {
    clock: Arc<dyn Clock>,
    inner: Mutex<MetricsSnapshot>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, MetricsSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one notifier execution.
    pub fn record(&self, notifier: &str, duration: Duration, success: bool, error: Option<&str>) {
        let now = self.clock.now();
        let secs = duration.as_secs_f64();
        let mut inner = self.inner();

        let g = &mut inner.global;
        g.total_notifications += 1;
        g.total_duration += secs;
        if success {
            g.total_success += 1;
        } else {
            g.total_failure += 1;
        }
        g.avg_duration = g.total_duration / g.total_notifications as f64;
        g.last_notification = Some(now);

        let m = inner.notifiers.entry(notifier.to_string()).or_default();
        m.count += 1;
        m.total_duration += secs;
        m.last_duration = Some(secs);
        m.last_timestamp = Some(now);
        if success {
            m.success += 1;
        } else {
            m.failure += 1;
            m.last_error = error.map(str::to_string);
        }
        m.min_duration = Some(m.min_duration.map_or(secs, |min| min.min(secs)));
        m.max_duration = Some(m.max_duration.map_or(secs, |max| max.max(secs)));
        m.avg_duration = m.total_duration / m.count as f64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner().clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        let MetricsSnapshot { global, notifiers } = self.snapshot();
        let success_rate = (global.total_notifications > 0)
            .then(|| global.total_success as f64 / global.total_notifications as f64);
        MetricsSummary {
            global: GlobalSummary {
                global,
                success_rate,
            },
            notifiers,
        }
    }

    pub fn reset(&self) {
        *self.inner() = MetricsSnapshot::default();
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    #[test]
    fn records_global_and_per_notifier() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let metrics = PerformanceMetrics::with_clock(Arc::new(FixedClock::new(t0)));

        metrics.record("meteo", Duration::from_millis(100), true, None);
        metrics.record("meteo", Duration::from_millis(300), false, Some("smtp down"));
        metrics.record("sante", Duration::from_millis(200), true, None);

        let snap = metrics.snapshot();
        assert_eq!(snap.global.total_notifications, 3);
        assert_eq!(snap.global.total_success, 2);
        assert_eq!(snap.global.total_failure, 1);
        assert!((snap.global.avg_duration - 0.2).abs() < 1e-9);
        assert_eq!(snap.global.last_notification, Some(t0));

        let meteo = &snap.notifiers["meteo"];
        assert_eq!(meteo.count, 2);
        assert_eq!(meteo.success, 1);
        assert_eq!(meteo.failure, 1);
        assert_eq!(meteo.min_duration, Some(0.1));
        assert_eq!(meteo.max_duration, Some(0.3));
        assert_eq!(meteo.last_duration, Some(0.3));
        assert_eq!(meteo.last_error.as_deref(), Some("smtp down"));
        assert!((meteo.avg_duration - 0.2).abs() < 1e-9);
    }

    #[test]
    fn summary_adds_success_rate() {
        let metrics = PerformanceMetrics::new();
        assert_eq!(metrics.summary().global.success_rate, None);

        metrics.record("infra", Duration::ZERO, true, None);
        metrics.record("infra", Duration::ZERO, true, None);
        metrics.record("infra", Duration::ZERO, true, None);
        metrics.record("infra", Duration::ZERO, false, Some("x"));

        let summary = metrics.summary();
        assert_eq!(summary.global.success_rate, Some(0.75));

        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["global"]["total_notifications"], 4);
        assert_eq!(v["global"]["success_rate"], 0.75);
        assert_eq!(v["notifiers"]["infra"]["failure"], 1);
    }

    #[test]
    fn reset_clears_everything() {
        let metrics = PerformanceMetrics::new();
        metrics.record("meteo", Duration::from_millis(5), true, None);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
