//! Declarative VM selectors: tag filters, glob patterns, running-only.

use crate::domain::error::SelectorError;
use crate::domain::vm::VmRecord;

/// A `key=value` tag filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    /// Parse a tag filter from `key=value` syntax. Splits on the first `=`
    /// only, so values may contain further `=` characters.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError`] when the `=` is missing or the key is empty.
    pub fn parse(raw: &str) -> Result<Self, SelectorError> {
        let Some((key, value)) = raw.split_once('=') else {
            return Err(SelectorError::InvalidTagFilter(raw.to_string()));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(SelectorError::EmptyTagKey(raw.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// A VM matches when it carries the exact tag key with the exact value.
    /// Unknown keys match nothing.
    #[must_use]
    pub fn matches(&self, vm: &VmRecord) -> bool {
        vm.tags.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

/// Declarative filter over directory snapshots. Selectors compose by
/// intersection: applying a list keeps only VMs matching every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Tag(TagFilter),
    Pattern(String),
    RunningOnly,
}

impl Selector {
    /// Apply this selector to a snapshot, returning the matching subset.
    #[must_use]
    pub fn apply(&self, vms: &[VmRecord]) -> Vec<VmRecord> {
        vms.iter()
            .filter(|vm| match self {
                Self::All => true,
                Self::Tag(filter) => filter.matches(vm),
                Self::Pattern(glob) => glob_match(glob, &vm.name),
                Self::RunningOnly => vm.is_running(),
            })
            .cloned()
            .collect()
    }
}

/// Resolve a selector list against a snapshot by intersection.
#[must_use]
pub fn resolve(selectors: &[Selector], vms: &[VmRecord]) -> Vec<VmRecord> {
    let mut current: Vec<VmRecord> = vms.to_vec();
    for selector in selectors {
        current = selector.apply(&current);
    }
    current
}

/// Shell-style glob match supporting `*` (any run) and `?` (any single
/// character). Iterative with single-star backtracking.
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = name.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::glob_match;

    proptest! {
        /// A lone `*` matches any name.
        #[test]
        fn prop_star_matches_everything(name in "[a-zA-Z0-9_-]{0,32}") {
            prop_assert!(glob_match("*", &name));
        }

        /// A pattern without wildcards matches exactly itself.
        #[test]
        fn prop_literal_pattern_is_exact(name in "[a-zA-Z0-9_-]{1,32}") {
            prop_assert!(glob_match(&name, &name));
            let altered = format!("{name}x");
            prop_assert!(!glob_match(&name, &altered));
        }

        /// `<prefix>*` matches any name with that prefix.
        #[test]
        fn prop_prefix_star_matches_prefixed(
            prefix in "[a-z]{1,8}",
            tail in "[a-z0-9-]{0,16}",
        ) {
            let pattern = format!("{prefix}*");
            let name = format!("{prefix}{tail}");
            prop_assert!(glob_match(&pattern, &name));
        }

        /// `?` consumes exactly one character.
        #[test]
        fn prop_question_consumes_one(name in "[a-z]{1,16}") {
            let pattern = format!("{}?", &name[..name.len() - 1]);
            prop_assert!(glob_match(&pattern, &name));
        }
    }
}
