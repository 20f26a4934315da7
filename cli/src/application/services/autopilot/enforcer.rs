//! Budget enforcer: budget checks, action planning, rate-limited
//! execution.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Timelike as _};
use tracing::warn;

use crate::application::ports::{Clock, CloudClient, ProgressSink};
use crate::application::services::autopilot::learner::weekday_key;
use crate::domain::autopilot::{
    Action, ActionKind, ActionResult, AutopilotConfig, BudgetStatus, UsagePattern, WorkHours,
};
use crate::domain::vm::VmRecord;
use crate::infra::audit::AuditLog;

/// Maximum non-dry-run actions per rolling hour.
const MAX_ACTIONS_PER_HOUR: usize = 5;

/// Action is warranted once spend reaches this fraction of the budget.
const BUDGET_ACTION_FRACTION: f64 = 0.9;

/// Estimated monthly savings per action kind; coarse planning figures.
const STOP_SAVINGS: f64 = 50.0;
const DOWNSIZE_SAVINGS: f64 = 30.0;

/// True when `now` falls inside the configured work hours: the weekday key
/// must be configured and `start_hour <= hour < end_hour`.
#[must_use]
pub fn is_work_hours(hours: &WorkHours, now: chrono::DateTime<chrono::Utc>) -> bool {
    if !hours.days.contains(&weekday_key(now)) {
        return false;
    }
    let hour = now.hour();
    hours.start_hour <= hour && hour < hours.end_hour
}

/// Enforces budget constraints and executes lifecycle actions safely.
pub struct BudgetEnforcer<'a, C, K> {
    cloud: &'a C,
    clock: &'a K,
    audit: AuditLog,
    action_history: VecDeque<chrono::DateTime<chrono::Utc>>,
}

impl<'a, C: CloudClient, K: Clock> BudgetEnforcer<'a, C, K> {
    /// Enforcer auditing to the default autopilot log.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new(cloud: &'a C, clock: &'a K) -> Result<Self> {
        Ok(Self::with_audit(cloud, clock, AuditLog::autopilot()?))
    }

    #[must_use]
    pub fn with_audit(cloud: &'a C, clock: &'a K, audit: AuditLog) -> Self {
        Self {
            cloud,
            clock,
            audit,
            action_history: VecDeque::with_capacity(MAX_ACTIONS_PER_HOUR * 4),
        }
    }

    /// Compare current spend against the configured monthly limit.
    ///
    /// # Errors
    ///
    /// Returns an error when the cost interface fails.
    pub async fn check_budget(
        &self,
        config: &AutopilotConfig,
        resource_group: &str,
    ) -> Result<BudgetStatus> {
        let current = self.cloud.monthly_spend(resource_group).await?;
        let budget = config.budget_monthly;
        let overage = (current - budget).max(0.0);
        let overage_percent = if budget > 0.0 {
            overage / budget * 100.0
        } else {
            0.0
        };
        Ok(BudgetStatus {
            current_monthly: current,
            budget_monthly: budget,
            overage,
            overage_percent,
            needs_action: current >= budget * BUDGET_ACTION_FRACTION,
        })
    }

    /// Plan actions from patterns and budget position. Protected VMs are
    /// skipped; a VM missing from the snapshot is treated as protected
    /// (fail closed). Sorted by estimated savings, descending.
    #[must_use]
    pub fn recommend_actions(
        &self,
        patterns: &[UsagePattern],
        status: &BudgetStatus,
        config: &AutopilotConfig,
        vms: &[VmRecord],
    ) -> Vec<Action> {
        if !status.needs_action {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for pattern in patterns {
            if self.is_protected(&pattern.vm_name, vms, config) {
                continue;
            }
            if pattern.average_idle_minutes > config.idle_threshold_minutes
                && !is_work_hours(&pattern.work_hours, self.clock.now())
            {
                actions.push(Action {
                    kind: ActionKind::Stop,
                    vm_name: pattern.vm_name.clone(),
                    reason: format!(
                        "VM idle for {:.0} minutes",
                        pattern.average_idle_minutes
                    ),
                    estimated_monthly_savings: STOP_SAVINGS,
                });
            }
            if pattern.cpu_average < config.cpu_threshold_percent {
                actions.push(Action {
                    kind: ActionKind::Downsize,
                    vm_name: pattern.vm_name.clone(),
                    reason: format!("Low CPU utilization ({:.1}%)", pattern.cpu_average),
                    estimated_monthly_savings: DOWNSIZE_SAVINGS,
                });
            }
        }
        actions.sort_by(|a, b| {
            b.estimated_monthly_savings
                .partial_cmp(&a.estimated_monthly_savings)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        actions
    }

    /// A VM is protected when any of its tag values matches the configured
    /// protected list, case-insensitively. A VM whose tags cannot be read
    /// (absent from the snapshot) is protected.
    fn is_protected(&self, vm_name: &str, vms: &[VmRecord], config: &AutopilotConfig) -> bool {
        let Some(vm) = vms.iter().find(|vm| vm.name == vm_name) else {
            warn!(vm = vm_name, "tags unavailable, treating VM as protected");
            return true;
        };
        vm.tags.values().any(|value| {
            config
                .protected_tags
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(value))
        })
    }

    /// Execute one action under the rolling rate limit.
    ///
    /// Dry runs never contact the provider and never count against the
    /// limit. Every execution is audited; audit failures never fail the
    /// action.
    pub async fn execute_action(
        &mut self,
        action: &Action,
        resource_group: &str,
        dry_run: bool,
    ) -> ActionResult {
        let now = self.clock.now();

        if !dry_run && !self.rate_limit_allows(now) {
            return ActionResult {
                action: action.clone(),
                success: false,
                message: format!(
                    "Rate limit exceeded (max {MAX_ACTIONS_PER_HOUR} actions per hour)"
                ),
                timestamp: now,
            };
        }

        let (success, message) = if dry_run {
            (
                true,
                format!("[DRY-RUN] Would {} VM: {}", action.kind, action.vm_name),
            )
        } else {
            match action.kind {
                ActionKind::Stop => match self
                    .cloud
                    .stop_vm(&action.vm_name, resource_group, true)
                    .await
                {
                    Ok(()) => (true, format!("Successfully stopped VM: {}", action.vm_name)),
                    Err(e) => (false, format!("Execution failed: {e}")),
                },
                ActionKind::Downsize => (
                    false,
                    format!("Downsize not yet implemented for: {}", action.vm_name),
                ),
                ActionKind::Alert => (true, format!("Sent alert for: {}", action.vm_name)),
            }
        };

        let result = ActionResult {
            action: action.clone(),
            success,
            message,
            timestamp: now,
        };

        self.audit.append(serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "action_type": action.kind.as_str(),
            "vm_name": action.vm_name,
            "reason": action.reason,
            "dry_run": dry_run,
            "success": result.success,
            "message": result.message,
        }));

        if !dry_run {
            self.action_history.push_back(now);
        }
        result
    }

    /// Execute a batch. Confirmation required without dry-run refuses the
    /// whole batch; execution stops at the first non-dry-run failure.
    pub async fn execute_actions(
        &mut self,
        actions: &[Action],
        resource_group: &str,
        dry_run: bool,
        require_confirmation: bool,
        progress: &dyn ProgressSink,
    ) -> Vec<ActionResult> {
        if actions.is_empty() {
            return Vec::new();
        }
        if require_confirmation && !dry_run {
            progress.warn("confirmation required - actions not executed");
            return Vec::new();
        }

        let mut results = Vec::new();
        for action in actions {
            let result = self.execute_action(action, resource_group, dry_run).await;
            let stop = !result.success && !dry_run;
            if result.success {
                progress.success(&result.message);
            } else {
                progress.warn(&result.message);
            }
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    fn rate_limit_allows(&mut self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let cutoff = now - ChronoDuration::hours(1);
        while self
            .action_history
            .front()
            .is_some_and(|ts| *ts <= cutoff)
        {
            self.action_history.pop_front();
        }
        if self.action_history.len() >= MAX_ACTIONS_PER_HOUR {
            warn!(
                recent = self.action_history.len(),
                "autopilot rate limit reached"
            );
            return false;
        }
        true
    }

    /// Non-dry-run actions executed in the last hour.
    #[must_use]
    pub fn actions_last_hour(&self) -> usize {
        let cutoff = self.clock.now() - ChronoDuration::hours(1);
        self.action_history.iter().filter(|ts| **ts > cutoff).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::application::ports::NullSink;
    use crate::application::services::test_support::{
        cloud_client_stub, impl_cloud_client_stubs, running_vm,
    };

    /// Mutable clock for rate-limit window tests.
    struct SteppingClock(Mutex<chrono::DateTime<Utc>>);

    impl SteppingClock {
        fn at(hour: u32) -> Self {
            Self(Mutex::new(
                // 2026-08-01 is a Saturday.
                Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0)
                    .single()
                    .expect("valid timestamp"),
            ))
        }
        fn advance_minutes(&self, minutes: i64) {
            let mut guard = self.0.lock().expect("lock");
            *guard += ChronoDuration::minutes(minutes);
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            *self.0.lock().expect("lock")
        }
    }

    struct SpendCloud {
        spend: f64,
        stops: Mutex<Vec<String>>,
    }

    impl SpendCloud {
        fn new(spend: f64) -> Self {
            Self {
                spend,
                stops: Mutex::new(Vec::new()),
            }
        }
    }

    impl CloudClient for SpendCloud {
        async fn monthly_spend(&self, _: &str) -> Result<f64> {
            Ok(self.spend)
        }
        async fn stop_vm(&self, name: &str, _: &str, _: bool) -> Result<()> {
            self.stops.lock().expect("lock").push(name.to_string());
            Ok(())
        }
        impl_cloud_client_stubs!(
            list_vms,
            start_vm,
            activity_log,
            metric_average,
            update_vm_key
        );
    }

    fn audit(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::with_path(dir.path().join("autopilot_log.jsonl"))
    }

    fn pattern(name: &str, idle_minutes: f64, cpu: f64) -> UsagePattern {
        UsagePattern {
            vm_name: name.to_string(),
            work_hours: WorkHours {
                start_hour: 9,
                end_hour: 17,
                days: vec!["mon".to_string(), "tue".to_string()],
                confidence: 1.0,
            },
            average_idle_minutes: idle_minutes,
            last_active: Utc::now(),
            cpu_average: cpu,
            recommendations: Vec::new(),
        }
    }

    fn over_budget() -> BudgetStatus {
        BudgetStatus {
            current_monthly: 95.0,
            budget_monthly: 100.0,
            overage: 0.0,
            overage_percent: 0.0,
            needs_action: true,
        }
    }

    #[test]
    fn work_hours_respect_configured_days() {
        let hours = WorkHours {
            start_hour: 9,
            end_hour: 17,
            days: vec!["mon".to_string()],
            confidence: 1.0,
        };
        // Monday 10:00 is inside; Saturday 10:00 is not a work day.
        let monday = Utc
            .with_ymd_and_hms(2026, 8, 3, 10, 0, 0)
            .single()
            .expect("valid timestamp");
        let saturday = Utc
            .with_ymd_and_hms(2026, 8, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp");
        assert!(is_work_hours(&hours, monday));
        assert!(!is_work_hours(&hours, saturday));
        // Hour bounds are half-open.
        let monday_end = Utc
            .with_ymd_and_hms(2026, 8, 3, 17, 0, 0)
            .single()
            .expect("valid timestamp");
        assert!(!is_work_hours(&hours, monday_end));
    }

    #[tokio::test]
    async fn budget_needs_action_at_ninety_percent() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let config = AutopilotConfig::default();

        let status = enforcer.check_budget(&config, "rg").await.expect("check");
        assert!(status.needs_action);
        assert!(status.overage.abs() < f64::EPSILON, "not over yet");

        let under = SpendCloud::new(50.0);
        let enforcer = BudgetEnforcer::with_audit(&under, &clock, audit(&dir));
        let status = enforcer.check_budget(&config, "rg").await.expect("check");
        assert!(!status.needs_action);
    }

    #[test]
    fn no_actions_when_budget_is_healthy() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(0.0);
        let enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let healthy = BudgetStatus {
            needs_action: false,
            ..over_budget()
        };
        let actions = enforcer.recommend_actions(
            &[pattern("vm-idle", 500.0, 2.0)],
            &healthy,
            &AutopilotConfig::default(),
            &[running_vm("vm-idle", "1.1.1.1")],
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn idle_vm_outside_work_hours_gets_stop_sorted_first() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        // Saturday is outside the configured mon/tue work days.
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let actions = enforcer.recommend_actions(
            &[pattern("vm-idle", 500.0, 2.0)],
            &over_budget(),
            &AutopilotConfig::default(),
            &[running_vm("vm-idle", "1.1.1.1")],
        );
        // Stop (idle) and Downsize (low CPU), savings-descending.
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Stop);
        assert_eq!(actions[0].vm_name, "vm-idle");
        assert_eq!(actions[1].kind, ActionKind::Downsize);
        assert!(
            actions[0].estimated_monthly_savings >= actions[1].estimated_monthly_savings
        );
    }

    #[test]
    fn protected_tags_and_unknown_vms_are_skipped() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));

        let mut protected = running_vm("vm-prod", "1.1.1.1");
        protected
            .tags
            .insert("env".to_string(), "Production".to_string());

        let actions = enforcer.recommend_actions(
            &[pattern("vm-prod", 500.0, 2.0), pattern("vm-ghost", 500.0, 2.0)],
            &over_budget(),
            &AutopilotConfig::default(),
            &[protected],
        );
        assert!(
            actions.is_empty(),
            "protected and unreadable VMs must be skipped, got {actions:?}"
        );
    }

    #[tokio::test]
    async fn dry_run_reports_without_touching_the_provider_or_the_limit() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let mut enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let action = Action {
            kind: ActionKind::Stop,
            vm_name: "vm-idle".to_string(),
            reason: "idle".to_string(),
            estimated_monthly_savings: STOP_SAVINGS,
        };

        let result = enforcer.execute_action(&action, "rg", true).await;
        assert!(result.success);
        assert!(result.message.starts_with("[DRY-RUN]"), "{}", result.message);
        assert!(cloud.stops.lock().expect("lock").is_empty());
        assert_eq!(enforcer.actions_last_hour(), 0);
    }

    #[tokio::test]
    async fn stop_action_dispatches_to_the_provider() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let mut enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let action = Action {
            kind: ActionKind::Stop,
            vm_name: "vm-idle".to_string(),
            reason: "idle".to_string(),
            estimated_monthly_savings: STOP_SAVINGS,
        };

        let result = enforcer.execute_action(&action, "rg", false).await;
        assert!(result.success);
        assert_eq!(cloud.stops.lock().expect("lock").as_slice(), ["vm-idle"]);
        assert_eq!(enforcer.actions_last_hour(), 1);
    }

    #[tokio::test]
    async fn downsize_is_reserved_and_reports_non_success() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let mut enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let action = Action {
            kind: ActionKind::Downsize,
            vm_name: "vm-small".to_string(),
            reason: "low cpu".to_string(),
            estimated_monthly_savings: DOWNSIZE_SAVINGS,
        };
        let result = enforcer.execute_action(&action, "rg", false).await;
        assert!(!result.success);
        assert!(result.message.contains("not yet implemented"));
    }

    #[tokio::test]
    async fn rate_limit_blocks_the_sixth_action_within_an_hour() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let mut enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let action = Action {
            kind: ActionKind::Stop,
            vm_name: "vm-idle".to_string(),
            reason: "idle".to_string(),
            estimated_monthly_savings: STOP_SAVINGS,
        };

        for _ in 0..5 {
            let result = enforcer.execute_action(&action, "rg", false).await;
            assert!(result.success);
            clock.advance_minutes(5);
        }
        let sixth = enforcer.execute_action(&action, "rg", false).await;
        assert!(!sixth.success);
        assert!(sixth.message.starts_with("Rate limit exceeded"));
        // The violation does not count against the limit.
        assert_eq!(enforcer.actions_last_hour(), 5);

        // Once the window slides past the earliest action, one more slot
        // opens.
        clock.advance_minutes(41);
        let seventh = enforcer.execute_action(&action, "rg", false).await;
        assert!(seventh.success, "window must slide: {}", seventh.message);
    }

    #[tokio::test]
    async fn batch_refuses_without_confirmation_and_stops_on_failure() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let mut enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let stop = Action {
            kind: ActionKind::Stop,
            vm_name: "vm-1".to_string(),
            reason: "idle".to_string(),
            estimated_monthly_savings: STOP_SAVINGS,
        };
        let downsize = Action {
            kind: ActionKind::Downsize,
            vm_name: "vm-2".to_string(),
            reason: "low cpu".to_string(),
            estimated_monthly_savings: DOWNSIZE_SAVINGS,
        };

        let refused = enforcer
            .execute_actions(
                &[stop.clone(), downsize.clone()],
                "rg",
                false,
                true,
                &NullSink,
            )
            .await;
        assert!(refused.is_empty());

        // Downsize fails, so the trailing stop is never attempted.
        let results = enforcer
            .execute_actions(&[downsize, stop], "rg", false, false, &NullSink)
            .await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }

    #[tokio::test]
    async fn executed_actions_are_audited() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let clock = SteppingClock::at(10);
        let cloud = SpendCloud::new(95.0);
        let mut enforcer = BudgetEnforcer::with_audit(&cloud, &clock, audit(&dir));
        let action = Action {
            kind: ActionKind::Stop,
            vm_name: "vm-idle".to_string(),
            reason: "idle".to_string(),
            estimated_monthly_savings: STOP_SAVINGS,
        };
        enforcer.execute_action(&action, "rg", true).await;

        let text = std::fs::read_to_string(dir.path().join("autopilot_log.jsonl"))
            .expect("audit log");
        let record: serde_json::Value =
            serde_json::from_str(text.lines().next().expect("one line")).expect("json");
        assert_eq!(record["action_type"], "stop");
        assert_eq!(record["vm_name"], "vm-idle");
        assert_eq!(record["dry_run"], true);
    }
}
