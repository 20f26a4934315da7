//! Autopilot control loop: learn, check budget, recommend, execute,
//! audit.

pub mod enforcer;
pub mod learner;

use anyhow::Result;

use crate::application::ports::{Clock, CloudClient, ProgressSink};
use crate::application::services::directory::VmDirectory;
use crate::domain::autopilot::{ActionResult, AutopilotConfig, BudgetStatus, UsagePattern};
use enforcer::BudgetEnforcer;
use learner::PatternLearner;

/// Outcome of one autopilot tick.
#[derive(Debug)]
pub struct TickReport {
    pub patterns: Vec<UsagePattern>,
    pub budget: BudgetStatus,
    pub planned: usize,
    pub results: Vec<ActionResult>,
}

/// One periodic pass over the fleet.
pub struct AutopilotLoop<'a, C, K> {
    cloud: &'a C,
    clock: &'a K,
    config: AutopilotConfig,
}

impl<'a, C: CloudClient, K: Clock> AutopilotLoop<'a, C, K> {
    #[must_use]
    pub fn new(cloud: &'a C, clock: &'a K, config: AutopilotConfig) -> Self {
        Self {
            cloud,
            clock,
            config,
        }
    }

    /// Run one tick: analyse every VM, check the budget, plan, and
    /// execute (dry-run unless `execute` is set). Per-VM analysis
    /// failures are reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or the cost interface fails.
    pub async fn tick(
        &self,
        enforcer: &mut BudgetEnforcer<'a, C, K>,
        resource_group: &str,
        execute: bool,
        progress: &dyn ProgressSink,
    ) -> Result<TickReport> {
        let directory = VmDirectory::new(self.cloud);
        let vms = directory.list(resource_group, true).await?;
        progress.step(&format!("analyzing {} VMs...", vms.len()));

        let learner = PatternLearner::new(self.cloud, self.clock);
        let mut patterns = Vec::new();
        for vm in &vms {
            match learner
                .analyze_vm_history(resource_group, &vm.name, self.config.analysis_days)
                .await
            {
                Ok(pattern) => patterns.push(pattern),
                Err(e) => progress.warn(&format!("failed to analyze {}: {e}", vm.name)),
            }
        }

        let budget = enforcer.check_budget(&self.config, resource_group).await?;
        progress.step(&format!(
            "budget: ${:.2} / ${:.2}{}",
            budget.current_monthly,
            budget.budget_monthly,
            if budget.needs_action {
                " (action needed)"
            } else {
                ""
            }
        ));

        let actions = enforcer.recommend_actions(&patterns, &budget, &self.config, &vms);
        let planned = actions.len();
        for action in &actions {
            progress.step(&format!(
                "  - {}: {} ({})",
                action.kind, action.vm_name, action.reason
            ));
        }

        // Without --execute every action is a dry run; confirmation
        // collection happens in the command layer, so the batch runs
        // unconfirmed here.
        let results = enforcer
            .execute_actions(&actions, resource_group, !execute, false, progress)
            .await;

        Ok(TickReport {
            patterns,
            budget,
            planned,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::application::ports::NullSink;
    use crate::application::services::test_support::{
        FixedClock, cloud_client_stub, impl_cloud_client_stubs,
    };
    use crate::domain::autopilot::ActionKind;
    use crate::infra::audit::AuditLog;

    /// One idle VM over budget: the §8 dry-run scenario.
    struct ScenarioCloud {
        stops: Mutex<Vec<String>>,
    }

    impl CloudClient for ScenarioCloud {
        async fn list_vms(&self, _: &str, _: bool) -> Result<serde_json::Value> {
            Ok(serde_json::json!([{
                "name": "vm-idle",
                "resourceGroup": "rg",
                "location": "eastus",
                "powerState": "VM running",
                "tags": {"team": "research"},
            }]))
        }
        async fn activity_log(
            &self,
            _: &str,
            _: &str,
            _: chrono::DateTime<Utc>,
        ) -> Result<serde_json::Value> {
            // A long stop -> start gap yields a large average idle, plus a
            // trailing stop so the VM reads as currently idle.
            Ok(serde_json::json!([
                {"timestamp": "2026-07-20T18:00:00+00:00", "operation": "Deallocate Virtual Machine"},
                {"timestamp": "2026-07-21T09:00:00+00:00", "operation": "Start Virtual Machine"},
                {"timestamp": "2026-07-21T18:00:00+00:00", "operation": "Deallocate Virtual Machine"},
            ]))
        }
        async fn metric_average(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: chrono::DateTime<Utc>,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!({
                "value": [{"timeseries": [{"data": [{"average": 3.0}]}]}]
            }))
        }
        async fn monthly_spend(&self, _: &str) -> Result<f64> {
            Ok(95.0)
        }
        async fn stop_vm(&self, name: &str, _: &str, _: bool) -> Result<()> {
            self.stops.lock().expect("lock").push(name.to_string());
            Ok(())
        }
        impl_cloud_client_stubs!(start_vm, update_vm_key);
    }

    #[tokio::test]
    async fn dry_run_tick_plans_stop_without_executing() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cloud = ScenarioCloud {
            stops: Mutex::new(Vec::new()),
        };
        // Saturday, far outside any learned work hours.
        let clock = FixedClock(
            Utc.with_ymd_and_hms(2026, 8, 1, 3, 0, 0)
                .single()
                .expect("valid timestamp"),
        );
        let config = AutopilotConfig {
            budget_monthly: 100.0,
            ..AutopilotConfig::default()
        };
        let autopilot = AutopilotLoop::new(&cloud, &clock, config);
        let mut enforcer = BudgetEnforcer::with_audit(
            &cloud,
            &clock,
            AuditLog::with_path(dir.path().join("autopilot_log.jsonl")),
        );

        let report = autopilot
            .tick(&mut enforcer, "rg", false, &NullSink)
            .await
            .expect("tick");

        assert!(report.budget.needs_action);
        let stop_results: Vec<&ActionResult> = report
            .results
            .iter()
            .filter(|r| r.action.kind == ActionKind::Stop)
            .collect();
        assert_eq!(stop_results.len(), 1);
        assert_eq!(stop_results[0].action.vm_name, "vm-idle");
        assert!(stop_results[0].success);
        assert!(stop_results[0].message.starts_with("[DRY-RUN]"));

        // Dry run: no provider contact, nothing in the rate-limit window.
        assert!(cloud.stops.lock().expect("lock").is_empty());
        assert_eq!(enforcer.actions_last_hour(), 0);
    }

    #[tokio::test]
    async fn execute_tick_dispatches_the_stop() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cloud = ScenarioCloud {
            stops: Mutex::new(Vec::new()),
        };
        let clock = FixedClock(
            Utc.with_ymd_and_hms(2026, 8, 1, 3, 0, 0)
                .single()
                .expect("valid timestamp"),
        );
        let autopilot = AutopilotLoop::new(&cloud, &clock, AutopilotConfig::default());
        let mut enforcer = BudgetEnforcer::with_audit(
            &cloud,
            &clock,
            AuditLog::with_path(dir.path().join("autopilot_log.jsonl")),
        );

        let report = autopilot
            .tick(&mut enforcer, "rg", true, &NullSink)
            .await
            .expect("tick");
        assert!(report.planned >= 1);
        assert!(
            cloud
                .stops
                .lock()
                .expect("lock")
                .contains(&"vm-idle".to_string())
        );
    }
}
