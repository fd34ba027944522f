//! Table references and partition filter detection
//!
//! Both checks work on normalized SQL (see `statement::normalize`), so
//! literals and comments cannot fake a reference or a predicate.

use std::sync::OnceLock;

use regex::Regex;

struct ReferenceRules {
    backticked: Regex,
    bare_after_keyword: Regex,
}

fn rules() -> Option<&'static ReferenceRules> {
    static RULES: OnceLock<Option<ReferenceRules>> = OnceLock::new();
    RULES
        .get_or_init(|| {
            Some(ReferenceRules {
                backticked: Regex::new(r"`([^`]+)`").ok()?,
                bare_after_keyword: Regex::new(
                    r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-$]+){1,2})\b",
                )
                .ok()?,
            })
        })
        .as_ref()
}

/// Fully qualified tables referenced by the statement, lowercased, deduplicated
/// in order of appearance.
///
/// A backticked identifier counts as a table when it contains a dot
/// (`project.dataset.table` or `dataset.table`); a bare dotted name counts when
/// it follows `FROM` or `JOIN`. Returns `None` when the rules are unavailable.
pub fn referenced_tables(normalized: &str) -> Option<Vec<String>> {
    let rules = rules()?;
    let mut tables: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim().to_ascii_lowercase();
        if name.contains('.') && !tables.contains(&name) {
            tables.push(name);
        }
    };
    for cap in rules.backticked.captures_iter(normalized) {
        if let Some(m) = cap.get(1) {
            push(m.as_str());
        }
    }
    for cap in rules.bare_after_keyword.captures_iter(normalized) {
        if let Some(m) = cap.get(1) {
            push(m.as_str());
        }
    }
    Some(tables)
}

/// Matcher for a predicate bounding one partition column.
#[derive(Debug, Clone)]
pub struct PartitionFilter {
    column: String,
    pattern: Regex,
}

impl PartitionFilter {
    /// Build a matcher for `column`, with or without a table alias.
    ///
    /// Recognized forms: `col = ..`, `col BETWEEN ..`, `col IN (..)`, `col <op>
    /// ..` and `.. <op> col` for the comparison operators.
    pub fn new(column: &str) -> Result<Self, regex::Error> {
        let col = regex::escape(column);
        let pattern = Regex::new(&format!(
            r"(?i)(?:\b(?:[A-Za-z_][A-Za-z0-9_]*\.)?`?{col}`?\s*(?:<=|>=|=|<|>|BETWEEN\b|IN\b))|(?:(?:<=|>=|=|<|>)\s*(?:[A-Za-z_][A-Za-z0-9_]*\.)?`?{col}`?\b)"
        ))?;
        Ok(Self {
            column: column.to_string(),
            pattern,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn is_bounded(&self, normalized: &str) -> bool {
        self.pattern.is_match(normalized)
    }
}
