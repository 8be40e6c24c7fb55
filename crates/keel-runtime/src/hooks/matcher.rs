//! Tool-name matchers, resolved once when hook configuration is loaded.

use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;

/// Characters that turn a matcher string into a regular expression.
/// `*` alone is treated as a wildcard, not a regex quantifier.
const REGEX_META: &[char] = &[
    '.', '|', '(', ')', '[', ']', '+', '?', '^', '$', '{', '}', '\\',
];

#[derive(Debug, Clone)]
pub enum ToolMatcher {
    /// No matcher, empty string, or a lone `*`
    Any,
    Exact(String),
    /// `*`-glob such as `mcp__*`, compiled to an anchored regex
    Wildcard { source: String, regex: Regex },
    /// Anchored regular expression, e.g. `Write|Edit`
    Pattern { source: String, regex: Regex },
}

impl ToolMatcher {
    pub fn parse(matcher: Option<&str>) -> Result<Self> {
        let matcher = matcher.map(str::trim).unwrap_or_default();
        if matcher.is_empty() || matcher == "*" {
            return Ok(ToolMatcher::Any);
        }

        if matcher.contains(REGEX_META) {
            let regex = Regex::new(&format!("^(?:{})$", matcher))
                .context(format!("invalid matcher pattern: {}", matcher))?;
            return Ok(ToolMatcher::Pattern {
                source: matcher.to_string(),
                regex,
            });
        }

        if matcher.contains('*') {
            let body = matcher
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("^{}$", body))
                .context(format!("invalid wildcard matcher: {}", matcher))?;
            return Ok(ToolMatcher::Wildcard {
                source: matcher.to_string(),
                regex,
            });
        }

        Ok(ToolMatcher::Exact(matcher.to_string()))
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            ToolMatcher::Any => true,
            ToolMatcher::Exact(expected) => expected == tool_name,
            ToolMatcher::Wildcard { regex, .. } | ToolMatcher::Pattern { regex, .. } => {
                regex.is_match(tool_name)
            }
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ToolMatcher::Any)
    }
}

impl fmt::Display for ToolMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolMatcher::Any => f.write_str("*"),
            ToolMatcher::Exact(s) => f.write_str(s),
            ToolMatcher::Wildcard { source, .. } | ToolMatcher::Pattern { source, .. } => {
                f.write_str(source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_star_match_everything() {
        for raw in [None, Some(""), Some("*"), Some("  ")] {
            let m = ToolMatcher::parse(raw).unwrap();
            assert!(m.is_any());
            assert!(m.matches("anything"));
        }
    }

    #[test]
    fn test_exact() {
        let m = ToolMatcher::parse(Some("write_file")).unwrap();
        assert!(matches!(m, ToolMatcher::Exact(_)));
        assert!(m.matches("write_file"));
        assert!(!m.matches("write_file2"));
        assert!(!m.matches("read_file"));
    }

    #[test]
    fn test_wildcard() {
        let m = ToolMatcher::parse(Some("mcp__*")).unwrap();
        assert!(matches!(m, ToolMatcher::Wildcard { .. }));
        assert!(m.matches("mcp__github"));
        assert!(!m.matches("shell"));

        let m = ToolMatcher::parse(Some("*_file")).unwrap();
        assert!(m.matches("read_file"));
        assert!(!m.matches("file_read"));
    }

    #[test]
    fn test_alternation_pattern() {
        let m = ToolMatcher::parse(Some("Write|Edit")).unwrap();
        assert!(matches!(m, ToolMatcher::Pattern { .. }));
        assert!(m.matches("Write"));
        assert!(m.matches("Edit"));
        assert!(!m.matches("Read"));
        // anchored: no substring hits
        assert!(!m.matches("MultiEdit"));
    }

    #[test]
    fn test_invalid_pattern_rejected_at_load() {
        assert!(ToolMatcher::parse(Some("(unclosed")).is_err());
    }

    #[test]
    fn test_display_keeps_source() {
        assert_eq!(ToolMatcher::parse(Some("a|b")).unwrap().to_string(), "a|b");
        assert_eq!(ToolMatcher::parse(None).unwrap().to_string(), "*");
    }
}
