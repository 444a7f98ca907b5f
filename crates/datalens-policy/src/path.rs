use datalens_core::{RoleId, SourceId};

use crate::types::{AccessDecision, RuleTable};

/// Canonical denial reasons. One string per deny class, so the reported
/// reason never depends on glob declaration order.
pub const DENY_NO_POLICY: &str = "no policy for role";
pub const DENY_SOURCE_DISABLED: &str = "source disabled";
pub const DENY_SOURCE_NOT_PERMITTED: &str = "source not permitted";
pub const DENY_NO_MATCHING_PATH: &str = "no matching path rule";

/// Decide whether `role` may touch `path` on the given source.
///
/// Checks run in order: path rule exists for the role, the source is
/// enabled, the source is permitted, and at least one allowed glob matches
/// the path. Every failure denies; the authorizer has no error path.
pub fn authorize(
    table: &RuleTable,
    role: &RoleId,
    source_id: &SourceId,
    source_enabled: bool,
    path: &str,
) -> AccessDecision {
    let rule = match table.path_rule(role) {
        Some(rule) => rule,
        None => return AccessDecision::denied(DENY_NO_POLICY),
    };

    if !source_enabled {
        return AccessDecision::denied(DENY_SOURCE_DISABLED);
    }

    if !rule.permits_source(source_id) {
        return AccessDecision::denied(DENY_SOURCE_NOT_PERMITTED);
    }

    if rule.allowed_globs.iter().any(|glob| glob_matches(glob, path)) {
        AccessDecision::granted()
    } else {
        AccessDecision::denied(DENY_NO_MATCHING_PATH)
    }
}

/// Segment-wise shell-glob match.
///
/// `*` inside a segment matches any run of non-separator characters; a
/// pattern of just `*` matches every path. Patterns never match across
/// `/` boundaries, so `/HR/*` matches `/HR/salaries.csv` but not
/// `/HR/2024/salaries.csv`.
pub fn glob_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(path_segments.iter())
        .all(|(glob, segment)| segment_matches(glob, segment))
}

/// Match one glob segment against one path segment, backtracking on `*`.
fn segment_matches(pattern: &str, segment: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let segment: Vec<char> = segment.chars().collect();

    let (mut p, mut s) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while s < segment.len() {
        if p < pattern.len() && pattern[p] == segment[s] {
            p += 1;
            s += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = s;
            p += 1;
        } else if let Some(star_pos) = star {
            // Retry: let the last star swallow one more character.
            p = star_pos + 1;
            mark += 1;
            s = mark;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
