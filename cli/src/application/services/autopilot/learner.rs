//! Usage pattern learner: work hours, idle periods and CPU averages from
//! provider history.

use anyhow::Result;
use chrono::{DateTime, Datelike as _, Duration as ChronoDuration, Timelike as _, Utc};
use tracing::warn;

use crate::application::ports::{Clock, CloudClient};
use crate::domain::autopilot::{EventKind, IdlePeriod, UsagePattern, VmEvent, WorkHours};

/// Events needed for full work-hours confidence.
const MIN_EVENTS_FOR_CONFIDENCE: usize = 10;

/// Days sharing at least this fraction of the modal day's frequency count
/// as work days.
const WORK_DAY_FREQUENCY_RATIO: f64 = 0.2;

/// Assumed workday length in hours.
const WORKDAY_HOURS: u32 = 8;

/// Learns usage patterns from activity logs and metric history.
pub struct PatternLearner<'a, C, K> {
    cloud: &'a C,
    clock: &'a K,
}

impl<'a, C: CloudClient, K: Clock> PatternLearner<'a, C, K> {
    #[must_use]
    pub fn new(cloud: &'a C, clock: &'a K) -> Self {
        Self { cloud, clock }
    }

    /// Analyse one VM's usage over the window. Provider query failures
    /// degrade to an empty event set rather than propagating.
    ///
    /// # Errors
    ///
    /// Currently infallible beyond allocation; kept fallible for parity
    /// with the other services.
    pub async fn analyze_vm_history(
        &self,
        resource_group: &str,
        vm_name: &str,
        days: i64,
    ) -> Result<UsagePattern> {
        let now = self.clock.now();
        let events = self.query_events(resource_group, vm_name, days).await;
        let work_hours = detect_work_hours(&events, MIN_EVENTS_FOR_CONFIDENCE);
        let idle_periods = calculate_idle_periods(&events, now);
        let average_idle_minutes = if idle_periods.is_empty() {
            0.0
        } else {
            idle_periods.iter().map(|p| p.duration_minutes).sum::<f64>()
                / idle_periods.len() as f64
        };
        let cpu_average = self.query_cpu_average(resource_group, vm_name, days).await;
        let last_active = events
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(now);

        let recommendations = build_recommendations(
            &work_hours,
            average_idle_minutes,
            cpu_average,
            &events,
            now,
        );

        Ok(UsagePattern {
            vm_name: vm_name.to_string(),
            work_hours,
            average_idle_minutes,
            last_active,
            cpu_average,
            recommendations,
        })
    }

    async fn query_events(&self, resource_group: &str, vm_name: &str, days: i64) -> Vec<VmEvent> {
        let start = self.clock.now() - ChronoDuration::days(days);
        let raw = match self.cloud.activity_log(resource_group, vm_name, start).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(vm = vm_name, error = %e, "failed to query activity logs");
                return Vec::new();
            }
        };
        parse_events(&raw)
    }

    async fn query_cpu_average(&self, resource_group: &str, vm_name: &str, days: i64) -> f64 {
        let start = self.clock.now() - ChronoDuration::days(days);
        let raw = match self
            .cloud
            .metric_average(resource_group, vm_name, "Percentage CPU", start)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(vm = vm_name, error = %e, "failed to query CPU metrics");
                return 0.0;
            }
        };
        average_cpu(&raw)
    }
}

/// Classify raw activity rows into start/stop events. Operation names
/// containing "Start" are starts; "Deallocate" or "Stop" are stops; the
/// rest are ignored.
#[must_use]
pub fn parse_events(raw: &serde_json::Value) -> Vec<VmEvent> {
    let Some(rows) = raw.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let operation = row.get("operation")?.as_str()?;
            let kind = if operation.contains("Start") {
                EventKind::Start
            } else if operation.contains("Deallocate") || operation.contains("Stop") {
                EventKind::Stop
            } else {
                return None;
            };
            let timestamp = row
                .get("timestamp")?
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
                .to_utc();
            Some(VmEvent { timestamp, kind })
        })
        .collect()
}

/// Mean of the hourly CPU averages in a provider metrics document.
#[must_use]
pub fn average_cpu(raw: &serde_json::Value) -> f64 {
    let mut values: Vec<f64> = Vec::new();
    if let Some(metrics) = raw.get("value").and_then(|v| v.as_array()) {
        for metric in metrics {
            let Some(series) = metric.get("timeseries").and_then(|t| t.as_array()) else {
                continue;
            };
            for ts in series {
                let Some(data) = ts.get("data").and_then(|d| d.as_array()) else {
                    continue;
                };
                values.extend(data.iter().filter_map(|point| {
                    point.get("average").and_then(serde_json::Value::as_f64)
                }));
            }
        }
    }
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Detect a work-hours window from start events: the modal start hour
/// opens an 8-hour window; days with at least 20% of the modal day's
/// frequency count as work days.
#[must_use]
pub fn detect_work_hours(events: &[VmEvent], min_events: usize) -> WorkHours {
    if events.is_empty() {
        return WorkHours::default();
    }
    let starts: Vec<&VmEvent> = events
        .iter()
        .filter(|e| e.kind == EventKind::Start)
        .collect();
    if starts.is_empty() {
        return WorkHours {
            days: Vec::new(),
            ..WorkHours::default()
        };
    }

    let mut hour_counts = [0usize; 24];
    for event in &starts {
        hour_counts[event.timestamp.hour() as usize] += 1;
    }
    let start_hour = hour_counts
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)
        .map_or(9, |(hour, _)| hour as u32);
    let end_hour = (start_hour + WORKDAY_HOURS) % 24;

    let mut day_counts: std::collections::BTreeMap<String, usize> =
        std::collections::BTreeMap::new();
    for event in &starts {
        *day_counts.entry(weekday_key(event.timestamp)).or_default() += 1;
    }
    let max_frequency = day_counts.values().copied().max().unwrap_or(0);
    let threshold = (max_frequency as f64) * WORK_DAY_FREQUENCY_RATIO;
    let days: Vec<String> = day_counts
        .into_iter()
        .filter(|(_, count)| (*count as f64) >= threshold)
        .map(|(day, _)| day)
        .collect();

    let confidence = (starts.len() as f64 / min_events as f64).min(1.0);

    WorkHours {
        start_hour,
        end_hour,
        days,
        confidence,
    }
}

/// Pair chronologically sorted stop -> start events into idle periods; a
/// trailing stop opens a period ending "now".
#[must_use]
pub fn calculate_idle_periods(events: &[VmEvent], now: DateTime<Utc>) -> Vec<IdlePeriod> {
    let mut sorted: Vec<&VmEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut periods = Vec::new();
    let mut last_stop: Option<DateTime<Utc>> = None;
    for event in sorted {
        match event.kind {
            EventKind::Stop => last_stop = Some(event.timestamp),
            EventKind::Start => {
                if let Some(stop) = last_stop.take() {
                    periods.push(IdlePeriod {
                        start: stop,
                        end: Some(event.timestamp),
                        duration_minutes: (event.timestamp - stop).num_seconds() as f64 / 60.0,
                    });
                }
            }
        }
    }
    if let Some(stop) = last_stop {
        periods.push(IdlePeriod {
            start: stop,
            end: None,
            duration_minutes: (now - stop).num_seconds() as f64 / 60.0,
        });
    }
    periods
}

/// 3-letter lowercase weekday key.
#[must_use]
pub fn weekday_key(timestamp: DateTime<Utc>) -> String {
    match timestamp.weekday() {
        chrono::Weekday::Mon => "mon",
        chrono::Weekday::Tue => "tue",
        chrono::Weekday::Wed => "wed",
        chrono::Weekday::Thu => "thu",
        chrono::Weekday::Fri => "fri",
        chrono::Weekday::Sat => "sat",
        chrono::Weekday::Sun => "sun",
    }
    .to_string()
}

fn build_recommendations(
    work_hours: &WorkHours,
    average_idle_minutes: f64,
    cpu_average: f64,
    events: &[VmEvent],
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if average_idle_minutes > 180.0 {
        recommendations.push(format!(
            "VM is idle for an average of {average_idle_minutes:.0} minutes. \
             Consider stopping during idle periods."
        ));
    }
    if cpu_average > 0.0 && cpu_average < 15.0 {
        recommendations.push(format!(
            "CPU utilization is low ({cpu_average:.1}%). Consider downsizing the VM."
        ));
    }
    if let Some(last) = events.iter().map(|e| e.timestamp).max() {
        let days_idle = (now - last).num_days();
        if days_idle > 7 {
            recommendations.push(format!(
                "VM has not been used in {days_idle} days. Consider deallocating or deleting."
            ));
        }
    }
    if work_hours.confidence < 0.5 {
        recommendations.push(
            "Insufficient data to determine work hours. Consider manual configuration."
                .to_string(),
        );
    }
    recommendations
}
