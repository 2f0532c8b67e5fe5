//! Classification rule index
//!
//! User rules map a pattern to a label such as `"Productive:code"`. Each raw
//! pattern is parsed once into a [`Pattern`] and grouped by kind so lookup can
//! apply a fixed precedence: exact host, then domain suffix, then substring,
//! then regular expression.

use crate::signals::{host_matches, normalize_host};
use crate::types::Category;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Label returned when no rule matches
pub const DEFAULT_LABEL: &str = "Neutral";

/// Characters that mark a pattern as a regular expression
const REGEX_META: &[char] = &['^', '$', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '\\'];

/// A parsed rule pattern
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    DomainSuffix(String),
    Substring(String),
    Regex(Regex),
}

impl Pattern {
    /// Parse a raw rule key.
    ///
    /// Returns `None` for empty keys and invalid regular expressions.
    pub fn parse(raw: &str) -> Option<Pattern> {
        let key = strip_annotation(raw.trim());
        if key.is_empty() {
            return None;
        }

        // `=host` pins a single host without matching its subdomains
        if let Some(exact) = key.strip_prefix('=') {
            let host = normalize_host(exact);
            return (!host.is_empty()).then_some(Pattern::Exact(host));
        }

        if key.contains(REGEX_META) {
            return match RegexBuilder::new(key).case_insensitive(true).build() {
                Ok(re) => Some(Pattern::Regex(re)),
                Err(e) => {
                    debug!(pattern = key, error = %e, "dropping invalid rule pattern");
                    None
                }
            };
        }

        if key.contains('.') {
            let domain = normalize_host(key);
            return if domain.is_empty() {
                None
            } else {
                Some(Pattern::DomainSuffix(domain))
            };
        }

        Some(Pattern::Substring(key.to_ascii_lowercase()))
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            Pattern::Exact(exact) => host == exact,
            Pattern::DomainSuffix(domain) => host_matches(host, domain),
            Pattern::Substring(needle) => host.contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(host),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Pattern::Exact(_) => "exact",
            Pattern::DomainSuffix(_) => "domain",
            Pattern::Substring(_) => "substring",
            Pattern::Regex(_) => "regex",
        }
    }
}

/// A pattern paired with its label
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub pattern: Pattern,
    pub label: String,
}

/// Compiled lookup over all user rules
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    exact: HashMap<String, String>,
    suffix: Vec<CompiledRule>,
    substring: Vec<CompiledRule>,
    regex: Vec<CompiledRule>,
    compiled: usize,
    dropped: usize,
}

impl RuleIndex {
    /// Compile a pattern → label map. Bad patterns are skipped, never fatal.
    pub fn compile(rules: &BTreeMap<String, String>) -> Self {
        let mut index = RuleIndex::default();
        let mut pinned = HashSet::new();

        for (raw, label) in rules {
            let label = label.trim().to_string();
            let parsed = Pattern::parse(raw);
            if parsed.is_some() {
                index.compiled += 1;
            }
            match parsed {
                Some(Pattern::DomainSuffix(domain)) => {
                    // a pinned `=host` rule for the same host keeps precedence
                    if !pinned.contains(&domain) {
                        index.exact.insert(domain.clone(), label.clone());
                    }
                    index.suffix.push(CompiledRule {
                        pattern: Pattern::DomainSuffix(domain),
                        label,
                    });
                }
                Some(Pattern::Exact(host)) => {
                    pinned.insert(host.clone());
                    index.exact.insert(host, label);
                }
                Some(pattern @ Pattern::Substring(_)) => {
                    index.substring.push(CompiledRule { pattern, label });
                }
                Some(pattern @ Pattern::Regex(_)) => {
                    index.regex.push(CompiledRule { pattern, label });
                }
                None => index.dropped += 1,
            }
        }

        // most specific first, so overlapping rules resolve the same way every time
        index.suffix.sort_by_key(|rule| std::cmp::Reverse(pattern_len(&rule.pattern)));
        index.substring.sort_by_key(|rule| std::cmp::Reverse(pattern_len(&rule.pattern)));

        debug!(
            exact = index.exact.len(),
            substring = index.substring.len(),
            regex = index.regex.len(),
            dropped = index.dropped,
            "compiled classification rules"
        );
        index
    }

    /// Label for a host, or [`DEFAULT_LABEL`]
    pub fn classify(&self, host: &str) -> &str {
        let host = normalize_host(host);

        if let Some(label) = self.exact.get(&host) {
            return label;
        }

        [&self.suffix, &self.substring, &self.regex]
            .into_iter()
            .flat_map(|group| group.iter())
            .find(|rule| rule.pattern.matches(&host))
            .map(|rule| rule.label.as_str())
            .unwrap_or(DEFAULT_LABEL)
    }

    /// Canonical bucket for a host
    pub fn classify_base(&self, host: &str) -> Category {
        Category::from_label(self.classify(host))
    }

    /// Rules that compiled
    pub fn len(&self) -> usize {
        self.compiled
    }

    pub fn is_empty(&self) -> bool {
        self.compiled == 0
    }

    /// Rules dropped at compile time
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

fn pattern_len(pattern: &Pattern) -> usize {
    match pattern {
        Pattern::Exact(s) | Pattern::DomainSuffix(s) | Pattern::Substring(s) => s.len(),
        Pattern::Regex(re) => re.as_str().len(),
    }
}

/// Drop a trailing `:note` annotation (`"github.com:work"` → `"github.com"`).
///
/// Only a plain word after the last `:` counts, so regex groups such as
/// `(?i:foo)` are left alone.
fn strip_annotation(key: &str) -> &str {
    match key.rsplit_once(':') {
        Some((head, note))
            if !head.is_empty()
                && !note.is_empty()
                && note.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
        {
            head
        }
        _ => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_pattern_detection() {
        assert!(matches!(Pattern::parse("example.com"), Some(Pattern::DomainSuffix(_))));
        assert!(matches!(Pattern::parse("youtube"), Some(Pattern::Substring(_))));
        assert!(matches!(Pattern::parse("^news\\..*$"), Some(Pattern::Regex(_))));
        assert!(matches!(Pattern::parse("github.com:work"), Some(Pattern::DomainSuffix(d)) if d == "github.com"));
        assert!(matches!(Pattern::parse("=Example.com"), Some(Pattern::Exact(h)) if h == "example.com"));
        assert!(Pattern::parse("   ").is_none());
        assert!(Pattern::parse("([unclosed").is_none());
    }

    #[test]
    fn test_exact_beats_domain_suffix() {
        let index = RuleIndex::compile(&rules(&[
            ("example.com", "Distracting"),
            ("mail.example.com", "Productive:mail"),
        ]));
        assert_eq!(index.classify("mail.example.com"), "Productive:mail");
        assert_eq!(index.classify("video.example.com"), "Distracting");
    }

    #[test]
    fn test_pinned_exact_rule_skips_subdomains() {
        let index = RuleIndex::compile(&rules(&[("=news.example", "Distracting")]));
        assert_eq!(index.classify("news.example"), "Distracting");
        assert_eq!(index.classify("sports.news.example"), DEFAULT_LABEL);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_pinned_exact_rule_beats_domain_rule_for_same_host() {
        let index = RuleIndex::compile(&rules(&[
            ("=example.com", "Productive"),
            ("example.com", "Distracting"),
        ]));
        assert_eq!(index.classify("example.com"), "Productive");
        assert_eq!(index.classify("www.example.com"), "Distracting");
    }

    #[test]
    fn test_domain_suffix_is_one_directional() {
        let index = RuleIndex::compile(&rules(&[("docs.example.com", "Productive")]));
        assert_eq!(index.classify("api.docs.example.com"), "Productive");
        assert_eq!(index.classify("example.com"), DEFAULT_LABEL);
        assert_eq!(index.classify("notdocs.example.com"), DEFAULT_LABEL);
    }

    #[test]
    fn test_precedence_substring_then_regex() {
        let index = RuleIndex::compile(&rules(&[
            ("tube", "Distracting"),
            (".*tube.*", "Productive"),
            ("^learn", "Productive:study"),
        ]));
        assert_eq!(index.classify("youtube.com"), "Distracting");
        assert_eq!(index.classify("LEARN.example.org"), "Productive:study");
    }

    #[test]
    fn test_invalid_regex_does_not_abort_compile() {
        let index = RuleIndex::compile(&rules(&[("(bad", "Productive"), ("reddit.com", "Distracting")]));
        assert_eq!(index.dropped(), 1);
        assert_eq!(index.classify("reddit.com"), "Distracting");
        assert_eq!(index.classify("bad.com"), DEFAULT_LABEL);
    }

    #[test]
    fn test_classify_base_coerces_unknown_labels() {
        let index = RuleIndex::compile(&rules(&[
            ("wiki.org", "Learning"),
            ("github.com", "productive:code"),
        ]));
        assert_eq!(index.classify_base("wiki.org"), Category::Neutral);
        assert_eq!(index.classify_base("www.github.com"), Category::Productive);
        assert_eq!(index.classify_base("unknown.net"), Category::Neutral);
    }
}
