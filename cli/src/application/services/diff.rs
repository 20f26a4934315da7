//! Result diff: group per-VM outputs and report their differences.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::fleet::OpResult;

/// Bytes of each group's content shown in the report.
const GROUP_PREVIEW_LIMIT: usize = 500;

/// Literal returned when every VM produced the same output.
pub const IDENTICAL_MESSAGE: &str = "All VM outputs are identical - no differences found";

/// Generate a diff report across per-VM outputs.
///
/// Outputs are grouped by content (after sanitization unless disabled);
/// a single group short-circuits to [`IDENTICAL_MESSAGE`].
#[must_use]
pub fn generate_diff(results: &[OpResult], sanitize: bool) -> String {
    if results.len() < 2 {
        return "Cannot generate diff: need at least 2 results".to_string();
    }

    // Group by output, preserving first-seen order.
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for result in results {
        let mut output = result.output.clone().unwrap_or_default();
        if sanitize {
            output = sanitize_output(&output);
        }
        match groups.iter_mut().find(|(content, _)| content == &output) {
            Some((_, vms)) => vms.push(result.vm_name.clone()),
            None => groups.push((output, vec![result.vm_name.clone()])),
        }
    }

    if groups.len() == 1 {
        return IDENTICAL_MESSAGE.to_string();
    }

    let mut report: Vec<String> = vec![
        "Command Output Differences:".to_string(),
        "=".repeat(60),
        String::new(),
    ];

    for (index, (content, vms)) in groups.iter().enumerate() {
        report.push(format!("Output Group {} (VMs: {}):", index + 1, vms.join(", ")));
        report.push("-".repeat(60));
        let preview: String = content.chars().take(GROUP_PREVIEW_LIMIT).collect();
        report.push(preview);
        if content.len() > GROUP_PREVIEW_LIMIT {
            report.push("... (truncated)".to_string());
        }
        report.push(String::new());
    }

    report.push("Unified Diff (Group 1 vs Group 2):".to_string());
    report.push("-".repeat(60));
    report.extend(unified_diff(&groups[0].0, &groups[1].0));

    report.join("\n")
}

/// Replace values of credential-like keys with a redaction token.
#[must_use]
pub fn sanitize_output(output: &str) -> String {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    #[allow(clippy::expect_used)] // patterns are compile-time constants
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r"(?i)password[=:]\S+", "password=***"),
            (r"(?i)token[=:]\S+", "token=***"),
            (r"(?i)api[_-]?key[=:]\S+", "api_key=***"),
            (r"(?i)secret[=:]\S+", "secret=***"),
        ]
        .iter()
        .map(|(pattern, replacement)| {
            (Regex::new(pattern).expect("valid sanitize pattern"), *replacement)
        })
        .collect()
    });

    let mut sanitized = output.to_string();
    for (pattern, replacement) in patterns {
        sanitized = pattern.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}

/// Minimal line-based unified diff between two texts, one hunk spanning
/// both inputs.
fn unified_diff(left: &str, right: &str) -> Vec<String> {
    let a: Vec<&str> = left.lines().collect();
    let b: Vec<&str> = right.lines().collect();

    // LCS table.
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut lines = vec![
        "--- Group 1".to_string(),
        "+++ Group 2".to_string(),
        format!("@@ -1,{} +1,{} @@", a.len(), b.len()),
    ];
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            lines.push(format!(" {}", a[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            lines.push(format!("-{}", a[i]));
            i += 1;
        } else {
            lines.push(format!("+{}", b[j]));
            j += 1;
        }
    }
    for line in &a[i..] {
        lines.push(format!("-{line}"));
    }
    for line in &b[j..] {
        lines.push(format!("+{line}"));
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn result(vm: &str, output: &str) -> OpResult {
        OpResult {
            vm_name: vm.to_string(),
            success: true,
            message: "Exit code: 0".to_string(),
            output: Some(output.to_string()),
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn fewer_than_two_results_cannot_diff() {
        let report = generate_diff(&[result("vm-a", "x")], true);
        assert!(report.starts_with("Cannot generate diff"));
    }

    #[test]
    fn identical_outputs_report_no_differences() {
        let report = generate_diff(&[result("vm-a", "same"), result("vm-b", "same")], true);
        assert_eq!(report, IDENTICAL_MESSAGE);
    }

    #[test]
    fn differing_outputs_are_grouped_with_vm_names() {
        let report = generate_diff(
            &[
                result("vm-a", "kernel 6.1"),
                result("vm-b", "kernel 6.8"),
                result("vm-c", "kernel 6.1"),
            ],
            true,
        );
        assert!(report.contains("Output Group 1 (VMs: vm-a, vm-c):"));
        assert!(report.contains("Output Group 2 (VMs: vm-b):"));
        assert!(report.contains("Unified Diff (Group 1 vs Group 2):"));
        assert!(report.contains("-kernel 6.1"));
        assert!(report.contains("+kernel 6.8"));
    }

    #[test]
    fn long_outputs_are_truncated_in_preview() {
        let long_a = "a".repeat(800);
        let report = generate_diff(&[result("vm-a", &long_a), result("vm-b", "short")], true);
        assert!(report.contains("... (truncated)"));
    }

    #[test]
    fn sanitization_masks_credential_values() {
        let sanitized = sanitize_output(
            "password=hunter2 TOKEN:abc123 Api-Key=zzz secret=shh normal=fine",
        );
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc123"));
        assert!(!sanitized.contains("zzz"));
        assert!(!sanitized.contains("shh"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
        assert!(sanitized.contains("api_key=***"));
        assert!(sanitized.contains("secret=***"));
        assert!(sanitized.contains("normal=fine"));
    }

    #[test]
    fn sanitization_can_merge_otherwise_distinct_outputs() {
        let report = generate_diff(
            &[
                result("vm-a", "token=aaa"),
                result("vm-b", "token=bbb"),
            ],
            true,
        );
        assert_eq!(report, IDENTICAL_MESSAGE);
    }
}
