//! Metrics samples and the probe-output parser.
//!
//! The probe runs `uptime && free -m && top -bn1 -o %CPU | head -n 15` on the
//! target and this module turns the combined output into a [`MetricsSample`].

use std::time::Duration;

/// Maximum number of processes retained per sample.
const TOP_PROCESS_LIMIT: usize = 3;

/// Commands longer than this are truncated in process rows.
const COMMAND_MAX_LEN: usize = 40;

/// One process row from `top`, by descending CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: String,
    pub user: String,
    pub cpu: f64,
    pub mem: f64,
    pub command: String,
}

/// One probe result. When `success` is false the numeric fields may be
/// absent; consumers must check `success` first.
#[derive(Debug, Clone)]
pub struct MetricsSample {
    pub vm_name: String,
    pub success: bool,
    /// 1, 5 and 15 minute load averages.
    pub load_avg: Option<(f64, f64, f64)>,
    /// Sum of the retained processes' CPU percentages. An approximation of
    /// total CPU, not an accurate reading.
    pub cpu_percent: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_total_mb: Option<u64>,
    pub memory_percent: Option<f64>,
    pub top_processes: Vec<ProcessSample>,
    pub error_message: Option<String>,
    pub probe_duration: Duration,
}

impl MetricsSample {
    /// A failed sample carrying only an error message.
    #[must_use]
    pub fn offline(vm_name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            vm_name: vm_name.into(),
            success: false,
            load_avg: None,
            cpu_percent: None,
            memory_used_mb: None,
            memory_total_mb: None,
            memory_percent: None,
            top_processes: Vec::new(),
            error_message: Some(error.into()),
            probe_duration: duration,
        }
    }
}

/// Parse the combined uptime/free/top output into a successful sample.
#[must_use]
pub fn parse_probe_output(vm_name: &str, output: &str, duration: Duration) -> MetricsSample {
    let lines: Vec<&str> = output.lines().collect();

    let load_avg = lines.first().and_then(|first| parse_load_average(first));
    let (memory_total_mb, memory_used_mb, memory_percent) = parse_memory(&lines);
    let top_processes = parse_processes(&lines);
    let cpu_percent = if top_processes.is_empty() {
        None
    } else {
        Some(top_processes.iter().map(|p| p.cpu).sum())
    };

    MetricsSample {
        vm_name: vm_name.to_string(),
        success: true,
        load_avg,
        cpu_percent,
        memory_used_mb,
        memory_total_mb,
        memory_percent,
        top_processes,
        error_message: None,
        probe_duration: duration,
    }
}

/// Extract `(1m, 5m, 15m)` from an uptime line containing `load average:`.
fn parse_load_average(line: &str) -> Option<(f64, f64, f64)> {
    let (_, tail) = line.split_once("load average:")?;
    let loads: Vec<f64> = tail
        .split(',')
        .take(3)
        .filter_map(|part| part.trim().parse::<f64>().ok())
        .collect();
    match loads.as_slice() {
        [one, five, fifteen] => Some((*one, *five, *fifteen)),
        _ => None,
    }
}

/// Extract totals from the `Mem:` line of `free -m`: column 1 total,
/// column 2 used. Percent is zero when the total is zero.
fn parse_memory(lines: &[&str]) -> (Option<u64>, Option<u64>, Option<f64>) {
    for line in lines {
        if let Some(rest) = line.strip_prefix("Mem:") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            let (Some(total), Some(used)) = (
                parts.first().and_then(|p| p.parse::<u64>().ok()),
                parts.get(1).and_then(|p| p.parse::<u64>().ok()),
            ) else {
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let percent = if total > 0 {
                used as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            return (Some(total), Some(used), Some(percent));
        }
    }
    (None, None, None)
}

/// Process rows follow a header containing PID, USER and COMMAND. Rows with
/// at least 11 whitespace fields yield a sample; the first three with
/// strictly positive CPU are kept.
fn parse_processes(lines: &[&str]) -> Vec<ProcessSample> {
    let mut processes = Vec::new();
    let mut in_process_list = false;

    for line in lines {
        if line.contains("PID") && line.contains("USER") && line.contains("COMMAND") {
            in_process_list = true;
            continue;
        }
        if !in_process_list || line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 11 {
            continue;
        }
        let (Some(cpu), Some(mem)) = (
            parts.get(8).and_then(|p| p.parse::<f64>().ok()),
            parts.get(9).and_then(|p| p.parse::<f64>().ok()),
        ) else {
            continue;
        };
        if processes.len() < TOP_PROCESS_LIMIT && cpu > 0.0 {
            let command: String = parts.get(11..).unwrap_or(&[]).join(" ");
            processes.push(ProcessSample {
                pid: parts[0].to_string(),
                user: parts[1].to_string(),
                cpu,
                mem,
                command: command.chars().take(COMMAND_MAX_LEN).collect(),
            });
        }
    }
    processes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_OUTPUT: &str = "\
 17:23:01 up 12 days,  3:04,  1 user,  load average: 0.52, 0.58, 0.59
               total        used        free      shared  buff/cache   available
Mem:           15995        4021        8123          12        3851       11621
Swap:              0           0           0
top - 17:23:01 up 12 days,  3:04,  1 user,  load average: 0.52, 0.58, 0.59
Tasks: 241 total,   1 running, 240 sleeping,   0 stopped,   0 zombie
    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
   1201 worker    20   0 4980204 812332  40112 S  42.3   5.1 812:10.33 python3 train.py --epochs 50
   2233 worker    20   0 1220400 120332  20112 S  12.0   0.8  12:10.01 node server.js
    877 root      20   0  180204  12332   8112 S   0.7   0.1   1:00.22 containerd
     12 root      20   0       0      0      0 S   0.0   0.0   0:04.01 ksoftirqd/0
";

    #[test]
    fn parses_load_average() {
        let sample = parse_probe_output("vm-a", SAMPLE_OUTPUT, Duration::from_secs(1));
        assert!(sample.success);
        assert_eq!(sample.load_avg, Some((0.52, 0.58, 0.59)));
    }

    #[test]
    fn parses_memory_with_percent() {
        let sample = parse_probe_output("vm-a", SAMPLE_OUTPUT, Duration::from_secs(1));
        assert_eq!(sample.memory_total_mb, Some(15995));
        assert_eq!(sample.memory_used_mb, Some(4021));
        let percent = sample.memory_percent.expect("percent");
        assert!((percent - 25.139).abs() < 0.01, "got {percent}");
    }

    #[test]
    fn keeps_first_three_processes_with_positive_cpu() {
        let sample = parse_probe_output("vm-a", SAMPLE_OUTPUT, Duration::from_secs(1));
        assert_eq!(sample.top_processes.len(), 3);
        assert_eq!(sample.top_processes[0].pid, "1201");
        assert_eq!(sample.top_processes[0].user, "worker");
        assert!((sample.top_processes[0].cpu - 42.3).abs() < f64::EPSILON);
        // The zero-CPU kernel thread is excluded.
        assert!(sample.top_processes.iter().all(|p| p.cpu > 0.0));
    }

    #[test]
    fn cpu_percent_is_sum_of_retained_processes() {
        let sample = parse_probe_output("vm-a", SAMPLE_OUTPUT, Duration::from_secs(1));
        let cpu = sample.cpu_percent.expect("cpu");
        assert!((cpu - 55.0).abs() < 0.01, "got {cpu}");
    }

    #[test]
    fn long_commands_are_truncated_to_40_chars() {
        let sample = parse_probe_output("vm-a", SAMPLE_OUTPUT, Duration::from_secs(1));
        assert!(sample.top_processes[0].command.len() <= 40);
        assert!(sample.top_processes[0].command.starts_with("python3 train.py"));
    }

    #[test]
    fn zero_total_memory_yields_zero_percent() {
        let output = "up, load average: 0.1, 0.1, 0.1\nMem: 0 0 0\n";
        let sample = parse_probe_output("vm-a", output, Duration::ZERO);
        assert_eq!(sample.memory_percent, Some(0.0));
    }

    #[test]
    fn garbage_output_yields_empty_but_successful_sample() {
        let sample = parse_probe_output("vm-a", "not metrics at all", Duration::ZERO);
        assert!(sample.success);
        assert!(sample.load_avg.is_none());
        assert!(sample.cpu_percent.is_none());
        assert!(sample.top_processes.is_empty());
    }

    #[test]
    fn offline_sample_carries_error() {
        let sample = MetricsSample::offline("vm-b", "Timeout after 5s", Duration::from_secs(5));
        assert!(!sample.success);
        assert_eq!(sample.error_message.as_deref(), Some("Timeout after 5s"));
        assert_eq!(sample.probe_duration, Duration::from_secs(5));
    }
}
