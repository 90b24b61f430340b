//! Tolerant version comparison.
//!
//! Installed software reports versions in every shape imaginable: dotted
//! numbers, dates, marketing names, build strings. [`Version`] orders them in
//! stages:
//!
//! 1. When both sides are purely dotted-numeric (separators `.`, `-`, `_`,
//!    `+`), they are compared as numeric tuples, missing trailing components
//!    counting as zero.
//! 2. Otherwise every component is split into digit and letter runs and
//!    compared position by position: numbers numerically, text
//!    lexicographically, a number above text. A missing component sorts
//!    below a non-zero number and above text, so `1.0` > `1.0-beta`.
//! 3. Malformed versions (empty, placeholders such as "Unknown") cannot be
//!    ordered at all: `partial_cmp` returns `None`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Strings sources print when they do not actually know a version.
const PLACEHOLDERS: &[&str] = &["unknown", "n/a", "na", "none", "latest", "-", "?"];

/// How precisely a version string could be parsed, least precise first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    Malformed,
    /// Letters only, e.g. a marketing name.
    Textual,
    /// Digits and letters, e.g. `2.1rc3` or `24H2 build 5`.
    Mixed,
    /// Dotted numeric, e.g. `1.10.0` or `2024-05-01`.
    Numeric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Digit run with leading zeros stripped (arbitrary length).
    Num(String),
    Text(String),
}

impl Token {
    fn is_zero(&self) -> bool {
        matches!(self, Token::Num(n) if n.is_empty())
    }
}

fn cmp_numeric(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_tokens(a: &Token, b: &Token) -> Ordering {
    match (a, b) {
        (Token::Num(x), Token::Num(y)) => cmp_numeric(x, y),
        (Token::Num(_), Token::Text(_)) => Ordering::Greater,
        (Token::Text(_), Token::Num(_)) => Ordering::Less,
        (Token::Text(x), Token::Text(y)) => x.cmp(y),
    }
}

/// A parsed version string.
///
/// Equality and ordering follow the staged comparison described in the
/// module docs; two malformed versions are never equal to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Version {
    raw: String,
    normalized: String,
    tokens: Vec<Token>,
    kind: VersionKind,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let normalized = normalize(raw);
        let (tokens, kind) = tokenize(&normalized);
        Self {
            raw: raw.trim().to_string(),
            normalized,
            tokens,
            kind,
        }
    }

    /// The string as reported by the source (trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> VersionKind {
        self.kind
    }

    pub fn is_malformed(&self) -> bool {
        self.kind == VersionKind::Malformed
    }

    /// True when `self` sorts at or above `other`; false when below or undecidable.
    pub fn is_at_least(&self, other: &Version) -> bool {
        matches!(
            self.partial_cmp(other),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }

    fn numeric_cmp(&self, other: &Version) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        let zero = Token::Num(String::new());
        for i in 0..len {
            let a = self.tokens.get(i).unwrap_or(&zero);
            let b = other.tokens.get(i).unwrap_or(&zero);
            match cmp_tokens(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    fn mixed_cmp(&self, other: &Version) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            let ord = match (self.tokens.get(i), other.tokens.get(i)) {
                (Some(a), Some(b)) => cmp_tokens(a, b),
                (None, Some(b)) => missing_vs(b).reverse(),
                (Some(a), None) => missing_vs(a),
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Ordering of a present token against a missing one.
fn missing_vs(present: &Token) -> Ordering {
    match present {
        t if t.is_zero() => Ordering::Equal,
        Token::Num(_) => Ordering::Greater,
        // A suffix such as "-beta" marks a pre-release
        Token::Text(_) => Ordering::Less,
    }
}

fn normalize(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = collapsed.to_lowercase();
    match lowered.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest.to_string(),
        _ => lowered,
    }
}

fn tokenize(normalized: &str) -> (Vec<Token>, VersionKind) {
    if normalized.is_empty() || PLACEHOLDERS.contains(&normalized) {
        return (Vec::new(), VersionKind::Malformed);
    }

    let mut tokens = Vec::new();
    let mut all_components_numeric = true;
    let mut has_digit = false;

    for component in normalized.split(|c: char| !c.is_alphanumeric()) {
        if component.is_empty() {
            continue;
        }
        if !component.chars().all(|c| c.is_ascii_digit()) {
            all_components_numeric = false;
        }

        let mut run = String::new();
        let mut run_is_digit = false;
        for c in component.chars() {
            let is_digit = c.is_ascii_digit();
            if !run.is_empty() && is_digit != run_is_digit {
                tokens.push(make_token(&run, run_is_digit));
                run.clear();
            }
            run_is_digit = is_digit;
            has_digit |= is_digit;
            run.push(c);
        }
        if !run.is_empty() {
            tokens.push(make_token(&run, run_is_digit));
        }
    }

    let kind = if tokens.is_empty() {
        VersionKind::Malformed
    } else if all_components_numeric {
        VersionKind::Numeric
    } else if has_digit {
        VersionKind::Mixed
    } else {
        VersionKind::Textual
    };
    (tokens, kind)
}

fn make_token(run: &str, is_digit: bool) -> Token {
    if is_digit {
        Token::Num(run.trim_start_matches('0').to_string())
    } else {
        Token::Text(run.to_string())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_malformed() || other.is_malformed() {
            return None;
        }
        if self.normalized == other.normalized {
            return Some(Ordering::Equal);
        }
        if self.kind == VersionKind::Numeric && other.kind == VersionKind::Numeric {
            Some(self.numeric_cmp(other))
        } else {
            Some(self.mixed_cmp(other))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<String> for Version {
    fn from(raw: String) -> Self {
        Version::parse(&raw)
    }
}

impl From<&str> for Version {
    fn from(raw: &str) -> Self {
        Version::parse(raw)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(a: &str, b: &str) -> Option<Ordering> {
        Version::parse(a).partial_cmp(&Version::parse(b))
    }

    #[test]
    fn test_dotted_numeric_is_numeric_not_lexicographic() {
        assert_eq!(cmp("1.10.0", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(cmp("102.0", "101.0"), Some(Ordering::Greater));
        assert_eq!(cmp("2.0", "10.0"), Some(Ordering::Less));
    }

    #[test]
    fn test_numeric_agrees_with_tuple_comparison() {
        let parts = [0u64, 1, 2, 9, 10, 99, 100];
        for a in parts {
            for b in parts {
                for c in [0u64, 3, 12] {
                    let left = format!("{}.{}.{}", a, b, c);
                    let right = format!("{}.{}.{}", b, c, a);
                    let expected = (a, b, c).cmp(&(b, c, a));
                    assert_eq!(cmp(&left, &right), Some(expected), "{} vs {}", left, right);
                }
            }
        }
    }

    #[test]
    fn test_missing_trailing_zero_components_are_equal() {
        assert_eq!(cmp("1.0", "1.0.0"), Some(Ordering::Equal));
        assert_eq!(cmp("1.0.0.0", "1"), Some(Ordering::Equal));
        assert_eq!(cmp("1.0.1", "1.0"), Some(Ordering::Greater));
    }

    #[test]
    fn test_separators_and_prefix_are_normalized() {
        assert_eq!(cmp("v1.2.3", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(cmp("1_2-3", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(cmp("  1.2.3 ", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(cmp("007.1", "7.1"), Some(Ordering::Equal));
    }

    #[test]
    fn test_date_versions() {
        assert_eq!(cmp("2024-05-01", "2023-12-31"), Some(Ordering::Greater));
        assert_eq!(Version::parse("2024.05.01").kind(), VersionKind::Numeric);
    }

    #[test]
    fn test_huge_build_numbers_do_not_overflow() {
        assert_eq!(
            cmp("1.123456789012345678901234567890", "1.99"),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_mixed_versions() {
        assert_eq!(cmp("2.1rc10", "2.1rc9"), Some(Ordering::Greater));
        assert_eq!(cmp("1.0", "1.0-beta"), Some(Ordering::Greater));
        assert_eq!(cmp("1.0.1-beta", "1.0"), Some(Ordering::Greater));
        assert_eq!(Version::parse("2.1rc3").kind(), VersionKind::Mixed);
    }

    #[test]
    fn test_numbers_beat_text_at_same_position() {
        // A source reporting a marketing name must not hide a numeric update
        assert_eq!(cmp("2.5", "2.beta"), Some(Ordering::Greater));
        assert_eq!(cmp("Edition 2024", "Edition 2023"), Some(Ordering::Greater));
    }

    #[test]
    fn test_textual_versions_compare_lexicographically() {
        assert_eq!(Version::parse("Stable").kind(), VersionKind::Textual);
        assert_eq!(cmp("stable", "beta"), Some(Ordering::Greater));
        assert_eq!(cmp("Stable", "stable"), Some(Ordering::Equal));
    }

    #[test]
    fn test_malformed_versions_are_undecidable() {
        for raw in ["", "   ", "Unknown", "N/A", "-", "---", "latest"] {
            let v = Version::parse(raw);
            assert!(v.is_malformed(), "{:?} should be malformed", raw);
            assert_eq!(v.partial_cmp(&Version::parse("1.0")), None);
            assert_eq!(v.partial_cmp(&Version::parse(raw)), None);
            assert_ne!(v, Version::parse(raw));
        }
    }

    #[test]
    fn test_is_at_least() {
        assert!(Version::parse("102.0").is_at_least(&Version::parse("102.0")));
        assert!(Version::parse("102.0.1").is_at_least(&Version::parse("102.0")));
        assert!(!Version::parse("101.9").is_at_least(&Version::parse("102.0")));
        assert!(!Version::parse("unknown").is_at_least(&Version::parse("102.0")));
    }

    #[test]
    fn test_kind_precision_order() {
        assert!(VersionKind::Numeric > VersionKind::Mixed);
        assert!(VersionKind::Mixed > VersionKind::Textual);
        assert!(VersionKind::Textual > VersionKind::Malformed);
    }

    #[test]
    fn test_serde_uses_raw_string() {
        let v = Version::parse(" v1.2.3 ");
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"v1.2.3\"");
        let back: Version = serde_json::from_str("\"1.2.3\"").unwrap();
        assert_eq!(back, v);
        assert_eq!(v.to_string(), "v1.2.3");
    }
}
