//! DDL statement detection
//!
//! A statement is DDL when its first keyword is one of
//! `CREATE | ALTER | DROP | TRUNCATE | GRANT | REVOKE | COMMENT`,
//! case-insensitively. DML and `SELECT` are not DDL.

const DDL_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT", "REVOKE", "COMMENT",
];

/// Whether the query's first token is a DDL keyword
pub fn is_ddl(query: &str) -> bool {
    let trimmed = query.trim_start();
    let first = trimmed
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("");
    DDL_KEYWORDS
        .iter()
        .any(|kw| first.eq_ignore_ascii_case(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_statements_detected() {
        assert!(is_ddl("CREATE TABLE t(id serial primary key)"));
        assert!(is_ddl("  create index on t(id)"));
        assert!(is_ddl("ALTER TABLE t ADD COLUMN x int"));
        assert!(is_ddl("drop table t"));
        assert!(is_ddl("TRUNCATE t"));
        assert!(is_ddl("GRANT SELECT ON t TO role"));
        assert!(is_ddl("revoke all on t from role"));
        assert!(is_ddl("COMMENT ON TABLE t IS 'x'"));
    }

    #[test]
    fn dml_and_select_skipped() {
        assert!(!is_ddl("SELECT 1"));
        assert!(!is_ddl("select * from created_things"));
        assert!(!is_ddl("INSERT INTO t VALUES (1)"));
        assert!(!is_ddl("UPDATE t SET x = 1"));
        assert!(!is_ddl("DELETE FROM t"));
        assert!(!is_ddl("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_ddl(""));
        assert!(!is_ddl("   "));
    }

    #[test]
    fn prefix_must_be_whole_token() {
        // "CREATED" is not "CREATE"
        assert!(!is_ddl("CREATED_VIEW"));
        assert!(!is_ddl("ALTERNATIVE"));
    }
}
