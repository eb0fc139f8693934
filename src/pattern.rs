//! Claim pattern normalization and overlap detection.
//!
//! Two patterns overlap when some concrete path could match both. The test is
//! conservative: when the intersection of two wildcard segments cannot be
//! decided cheaply they are treated as overlapping, so ambiguity produces an
//! extra conflict rather than a silent double edit.
//!
//! A claim over a path also covers everything beneath it, so `src/payments`
//! overlaps `src/payments/charge.ts` just as `src/payments/**` does.

use glob::Pattern;

use crate::error::{Result, WardenError};

/// Normalize a user-supplied pattern into its canonical `/`-separated form.
///
/// Backslashes become slashes, leading `./` and `/` are stripped, and empty or
/// `.` segments are dropped. Empty patterns, `..` segments and segments that
/// are not valid globs are rejected.
pub fn normalize(pattern: &str) -> Result<String> {
    let unified = pattern.trim().replace('\\', "/");
    let mut segments = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(WardenError::InvalidInput(format!(
                    "pattern '{}' escapes the project root",
                    pattern
                )))
            }
            s => {
                if let Err(e) = Pattern::new(s) {
                    return Err(WardenError::InvalidInput(format!(
                        "pattern '{}' is not a valid glob: {}",
                        pattern, e
                    )));
                }
                segments.push(s)
            }
        }
    }

    if segments.is_empty() {
        return Err(WardenError::InvalidInput("pattern is empty".to_string()));
    }

    Ok(segments.join("/"))
}

/// Whether some path could match both normalized patterns.
pub fn overlaps(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    let mut left: Vec<&str> = a.split('/').collect();
    let mut right: Vec<&str> = b.split('/').collect();
    // Claims cover their subtree.
    left.push("**");
    right.push("**");

    segments_overlap(&left, &right)
}

/// Dynamic program over segment suffixes: `dp[i][j]` is true when
/// `left[i..]` and `right[j..]` can match a common path. `**` matches zero or
/// more whole segments.
fn segments_overlap(left: &[&str], right: &[&str]) -> bool {
    let (n, m) = (left.len(), right.len());
    let mut dp = vec![vec![false; m + 1]; n + 1];
    dp[n][m] = true;

    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            if i == n && j == m {
                continue;
            }

            let l = left.get(i).copied();
            let r = right.get(j).copied();

            dp[i][j] = match (l, r) {
                (Some("**"), _) => dp[i + 1][j] || (j < m && dp[i][j + 1]),
                (_, Some("**")) => dp[i][j + 1] || (i < n && dp[i + 1][j]),
                (Some(l), Some(r)) => segment_overlap(l, r) && dp[i + 1][j + 1],
                _ => false,
            };
        }
    }

    dp[0][0]
}

fn is_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

/// Whether two single path segments can match a common name.
fn segment_overlap(a: &str, b: &str) -> bool {
    match (is_wildcard(a), is_wildcard(b)) {
        (false, false) => a == b,
        (true, false) => segment_matches(a, b),
        (false, true) => segment_matches(b, a),
        (true, true) => wildcards_may_intersect(a, b),
    }
}

/// Match a literal name against a segment glob. Alternations are not
/// understood by `glob` and are assumed to match.
fn segment_matches(pattern: &str, name: &str) -> bool {
    if pattern.contains('{') {
        return true;
    }
    Pattern::new(pattern).map_or(true, |p| p.matches(name))
}

/// Two wildcard segments can share a name unless their literal prefixes or
/// literal suffixes are incompatible. Segments with character classes or
/// alternations always may.
fn wildcards_may_intersect(a: &str, b: &str) -> bool {
    if a.contains(['[', '{']) || b.contains(['[', '{']) {
        return true;
    }

    const META: [char; 2] = ['*', '?'];

    let prefix = |s: &str| s.find(META).unwrap_or(s.len());
    let suffix = |s: &str| s.rfind(META).map_or(0, |i| i + 1);

    let (a_pre, b_pre) = (&a[..prefix(a)], &b[..prefix(b)]);
    let (a_suf, b_suf) = (&a[suffix(a)..], &b[suffix(b)..]);

    (a_pre.starts_with(b_pre) || b_pre.starts_with(a_pre))
        && (a_suf.ends_with(b_suf) || b_suf.ends_with(a_suf))
}
