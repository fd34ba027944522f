//! Statement shape rules
//!
//! Local checks that run before any remote call. The SQL is first normalized
//! (comments removed, string literals masked) so that keywords inside literals
//! such as `LIKE '%delete%'` never trigger a rule, and keywords hidden in
//! comments never escape one.

use std::sync::OnceLock;

use chamado_core::RejectionReason;
use regex::Regex;

/// A local rejection with its internal detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl StaticRejection {
    fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Strip comments and mask string literals.
///
/// `-- ...`, `# ...` and `/* ... */` comments become a single space. The body
/// of every `'...'` or `"..."` literal is dropped, leaving `''`. Backticked
/// identifiers are kept verbatim.
pub fn normalize(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                i = skip_line(&chars, i);
                out.push(' ');
            }
            '#' => {
                i = skip_line(&chars, i);
                out.push(' ');
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                out.push(' ');
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i = (i + 1).min(chars.len());
                out.push(quote);
                out.push(quote);
            }
            '`' => {
                out.push(c);
                i += 1;
                while i < chars.len() && chars[i] != '`' {
                    out.push(chars[i]);
                    i += 1;
                }
                if i < chars.len() {
                    out.push('`');
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out.trim().to_string()
}

fn skip_line(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

// ============================================================================
// Rules
// ============================================================================

/// Keywords that modify data or schema, or control transactions and jobs.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "MERGE",
    "TRUNCATE",
    "CREATE",
    "DROP",
    "ALTER",
    "GRANT",
    "REVOKE",
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "CALL",
    "EXPORT",
    "EXECUTE IMMEDIATE",
    "LOAD DATA",
];

/// Compiled shape rules, built once.
struct ShapeRules {
    forbidden: Regex,
    read_only_start: Regex,
    select_star: Regex,
}

impl ShapeRules {
    fn compile() -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = FORBIDDEN_KEYWORDS
            .iter()
            .map(|k| k.split(' ').collect::<Vec<_>>().join(r"\s+"))
            .collect();
        Ok(Self {
            forbidden: Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?,
            read_only_start: Regex::new(r"(?i)^\(*\s*(?:SELECT|WITH)\b")?,
            select_star: Regex::new(
                r"(?i)\bSELECT\s+(?:DISTINCT\s+|ALL\s+)?(?:[A-Za-z_][A-Za-z0-9_]*\.)?\*",
            )?,
        })
    }
}

fn rules() -> Option<&'static ShapeRules> {
    static RULES: OnceLock<Option<ShapeRules>> = OnceLock::new();
    RULES.get_or_init(|| ShapeRules::compile().ok()).as_ref()
}

/// Run the shape rules over normalized SQL, in order.
///
/// 1. empty statement -> `syntax_error`
/// 2. modification keyword -> `forbidden_statement`
/// 3. any `;` -> `multi_statement`
/// 4. not starting with `SELECT` / `WITH` -> `forbidden_statement`
/// 5. `SELECT *` -> `select_star`
pub fn check_shape(normalized: &str) -> Result<(), StaticRejection> {
    let Some(rules) = rules() else {
        return Err(StaticRejection::new(
            RejectionReason::ForbiddenStatement,
            "statement rules unavailable",
        ));
    };
    if normalized.is_empty() {
        return Err(StaticRejection::new(
            RejectionReason::SyntaxError,
            "empty statement",
        ));
    }
    if let Some(m) = rules.forbidden.find(normalized) {
        return Err(StaticRejection::new(
            RejectionReason::ForbiddenStatement,
            format!("modification keyword {:?}", m.as_str().to_uppercase()),
        ));
    }
    if normalized.contains(';') {
        return Err(StaticRejection::new(
            RejectionReason::MultiStatement,
            "statement separator found",
        ));
    }
    if !rules.read_only_start.is_match(normalized) {
        return Err(StaticRejection::new(
            RejectionReason::ForbiddenStatement,
            "statement does not start with SELECT or WITH",
        ));
    }
    if rules.select_star.is_match(normalized) {
        return Err(StaticRejection::new(
            RejectionReason::SelectStar,
            "SELECT * is not allowed",
        ));
    }
    Ok(())
}

/// Whether raw SQL contains a modification keyword outside literals/comments.
pub fn has_forbidden_keyword(sql: &str) -> bool {
    rules().map_or(true, |r| r.forbidden.is_match(&normalize(sql)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(sql: &str) -> Option<RejectionReason> {
        check_shape(&normalize(sql)).err().map(|r| r.reason)
    }

    #[test]
    fn test_plain_select_passes() {
        assert_eq!(reason("SELECT COUNT(1) AS total FROM `a.b.c` WHERE x = 1"), None);
        assert_eq!(reason("WITH t AS (SELECT 1 AS n) SELECT n FROM t"), None);
        assert_eq!(reason("(SELECT 1)"), None);
    }

    #[test]
    fn test_forbidden_keywords() {
        assert_eq!(
            reason("DELETE FROM `a.b.c` WHERE true"),
            Some(RejectionReason::ForbiddenStatement)
        );
        assert_eq!(
            reason("select 1 from t where x in (select 1) union all select 1 from t; drop table t"),
            Some(RejectionReason::ForbiddenStatement)
        );
        assert_eq!(
            reason("EXECUTE   IMMEDIATE 'SELECT 1'"),
            Some(RejectionReason::ForbiddenStatement)
        );
        assert_eq!(
            reason("load data into t from files()"),
            Some(RejectionReason::ForbiddenStatement)
        );
    }

    #[test]
    fn test_forbidden_checked_before_separator() {
        assert_eq!(
            reason("SELECT 1; INSERT INTO t VALUES (1)"),
            Some(RejectionReason::ForbiddenStatement)
        );
    }

    #[test]
    fn test_separator_is_multi_statement() {
        assert_eq!(reason("SELECT 1; SELECT 2"), Some(RejectionReason::MultiStatement));
        assert_eq!(reason("SELECT 1;"), Some(RejectionReason::MultiStatement));
    }

    #[test]
    fn test_must_start_read_only() {
        assert_eq!(
            reason("SHOW TABLES"),
            Some(RejectionReason::ForbiddenStatement)
        );
    }

    #[test]
    fn test_select_star() {
        assert_eq!(reason("SELECT * FROM t"), Some(RejectionReason::SelectStar));
        assert_eq!(reason("select distinct c.* from t c"), Some(RejectionReason::SelectStar));
        assert_eq!(reason("SELECT COUNT(*) AS total FROM t"), None);
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        let sql = "SELECT COUNT(1) AS total FROM t WHERE LOWER(tipo) LIKE '%delete; drop%'";
        assert_eq!(reason(sql), None);
    }

    #[test]
    fn test_keywords_inside_comments_are_ignored() {
        assert_eq!(reason("SELECT 1 -- update later"), None);
        assert_eq!(reason("SELECT /* drop */ 1"), None);
    }

    #[test]
    fn test_empty_is_syntax_error() {
        assert_eq!(reason("   "), Some(RejectionReason::SyntaxError));
        assert_eq!(reason("-- only a comment"), Some(RejectionReason::SyntaxError));
    }

    #[test]
    fn test_identifier_containing_keyword_is_not_forbidden() {
        assert_eq!(reason("SELECT data_update_at FROM t"), None);
    }

    #[test]
    fn test_normalize_masks_literals_keeps_backticks() {
        let n = normalize("SELECT 'a;b' FROM `p.d.t` -- c\nWHERE \"x\" = 1");
        assert_eq!(n, "SELECT '' FROM `p.d.t`  \nWHERE \"\" = 1");
    }
}
