//! Safety gate between synthesized queries and the executor.
//!
//! A pure text-level policy over disallowed tokens and structural shape: it
//! has no semantic understanding of the statement. A mutating keyword inside
//! a quoted string literal is rejected even though it would be harmless, and
//! a sufficiently obfuscated statement could in principle slip through token
//! matching. That trade-off is deliberate; the read-only transaction and
//! statement timeout in the executor are the second layer behind this gate,
//! and this gate is not a complete injection defense on its own.

use crate::synth::CandidateQuery;
use aula_common::AssistantError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Row cap appended when the model omitted one
pub const DEFAULT_ROW_CAP: usize = 200;

static MUTATING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|TRUNCATE|ALTER|CREATE|GRANT|REVOKE|MERGE)\b")
        .expect("valid regex")
});

static LEADING_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*SELECT\b").expect("valid regex"));

static EXPLICIT_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+\b").expect("valid regex"));

/// A query that passed the safety policy.
///
/// Single-statement, read-only, row-bounded. The field is private: only
/// `validate` constructs one, so executors can demand this type and never
/// see untrusted text.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    sql: String,
}

impl ValidatedQuery {
    pub fn as_sql(&self) -> &str {
        &self.sql
    }
}

/// Apply the safety policy to a candidate query.
///
/// Rejects mutating keywords anywhere in the text, statements that do not
/// begin with SELECT, and multi-statement input. A missing row cap is
/// repaired by appending `LIMIT 200` — the only mutation this function is
/// allowed to perform.
pub fn validate(candidate: &CandidateQuery) -> Result<ValidatedQuery, AssistantError> {
    let sql = candidate.text();

    if let Some(m) = MUTATING_KEYWORD.find(sql) {
        return Err(AssistantError::UnsafeQuery(format!(
            "mutating keyword {} is not allowed; only SELECT queries are permitted",
            m.as_str().to_uppercase()
        )));
    }

    if !LEADING_SELECT.is_match(sql) {
        return Err(AssistantError::UnsafeQuery(
            "only a single SELECT statement is allowed".to_string(),
        ));
    }

    // A separator anywhere before the final trailing terminator means more
    // than one statement
    let trimmed = sql.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    if body.contains(';') {
        return Err(AssistantError::UnsafeQuery(
            "multiple statements detected; provide exactly one SELECT".to_string(),
        ));
    }

    let sql = if EXPLICIT_LIMIT.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{} LIMIT {};", body.trim_end(), DEFAULT_ROW_CAP)
    };

    Ok(ValidatedQuery { sql })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(sql: &str) -> CandidateQuery {
        CandidateQuery::new(sql)
    }

    #[test]
    fn test_rejects_every_mutating_keyword() {
        for kw in [
            "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT",
            "REVOKE", "MERGE",
        ] {
            let sql = format!("SELECT 1; {} TABLE students", kw);
            assert!(
                validate(&candidate(&sql)).is_err(),
                "{} should be rejected",
                kw
            );
        }
    }

    #[test]
    fn test_rejects_lowercase_keyword_mid_text() {
        let result = validate(&candidate(
            "SELECT * FROM students WHERE 1=1 LIMIT 5; delete from grades",
        ));
        assert!(matches!(result, Err(AssistantError::UnsafeQuery(_))));
    }

    #[test]
    fn test_rejects_keyword_anywhere_case_insensitive() {
        let result = validate(&candidate("SELECT 1 UNION SELECT 2 FROM x; DrOp TABLE y"));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_select() {
        let result = validate(&candidate("EXPLAIN SELECT * FROM grades LIMIT 5"));
        assert!(matches!(result, Err(AssistantError::UnsafeQuery(_))));
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let result = validate(&candidate(
            "SELECT * FROM students LIMIT 5; SELECT * FROM grades LIMIT 5;",
        ));
        assert!(matches!(result, Err(AssistantError::UnsafeQuery(_))));
    }

    #[test]
    fn test_single_trailing_terminator_is_fine() {
        let result = validate(&candidate("SELECT full_name FROM students LIMIT 10;"));
        assert!(result.is_ok());
    }

    #[test]
    fn test_appends_default_cap_when_missing() {
        let validated = validate(&candidate(
            "SELECT full_name FROM students ORDER BY full_name",
        ))
        .unwrap();
        assert_eq!(
            validated.as_sql(),
            "SELECT full_name FROM students ORDER BY full_name LIMIT 200;"
        );
    }

    #[test]
    fn test_cap_repair_strips_trailing_terminator_first() {
        let validated = validate(&candidate("SELECT * FROM grades;")).unwrap();
        assert_eq!(validated.as_sql(), "SELECT * FROM grades LIMIT 200;");
    }

    #[test]
    fn test_existing_limit_left_untouched() {
        let sql = "SELECT score FROM grades ORDER BY score DESC LIMIT 5;";
        let validated = validate(&candidate(sql)).unwrap();
        assert_eq!(validated.as_sql(), sql);
    }

    #[test]
    fn test_ordering_preserved_through_repair() {
        let validated = validate(&candidate(
            "SELECT s.full_name, g.score FROM grades g JOIN students s ON s.student_id = g.student_id ORDER BY g.score DESC",
        ))
        .unwrap();
        assert!(validated.as_sql().contains("ORDER BY g.score DESC"));
        assert!(validated.as_sql().ends_with("LIMIT 200;"));
    }

    #[test]
    fn test_quoted_literal_keyword_still_rejected() {
        // Known weak boundary of the token policy: harmless quoted text
        // containing a keyword is rejected rather than parsed
        let result = validate(&candidate(
            "SELECT * FROM units WHERE unit_title = 'How to DROP a class' LIMIT 5",
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_leading_whitespace_select_accepted() {
        assert!(validate(&candidate("  \n SELECT 1 LIMIT 1")).is_ok());
    }
}
