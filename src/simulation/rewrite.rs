//! Namespace rewriting
//!
//! Sandbox isolation is textual: references to the `public` namespace are
//! pointed at the sandbox schema and the search path is set ahead of the
//! script. A live backend would scope execution to the schema instead.

use crate::sql::lexer::{self, Region};
use once_cell::sync::Lazy;
use regex::Regex;

static PUBLIC_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpublic\.").expect("public prefix regex"));

/// Schema name for a sandbox id
pub fn sandbox_schema_name(prefix: &str, sandbox_id: &str) -> String {
    format!("{}{}", prefix, sandbox_id)
}

/// Point `public.` references at `schema` and prepend a search path.
///
/// Occurrences inside string literals, quoted identifiers and comments are
/// left untouched.
pub fn rewrite_for_sandbox(sql: &str, schema: &str) -> String {
    let code_offsets: Vec<usize> = lexer::scan(sql)
        .filter(|(_, _, region)| *region == Region::Code)
        .map(|(idx, _, _)| idx)
        .collect();

    let mut rewritten = String::with_capacity(sql.len() + schema.len() * 2 + 32);
    rewritten.push_str(&format!("SET search_path TO {}, public;\n", schema));

    let mut last = 0;
    for found in PUBLIC_PREFIX.find_iter(sql) {
        if code_offsets.binary_search(&found.start()).is_err() {
            continue;
        }
        rewritten.push_str(&sql[last..found.start()]);
        rewritten.push_str(schema);
        rewritten.push('.');
        last = found.end();
    }
    rewritten.push_str(&sql[last..]);
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rewrite_public_references() {
        let rewritten = rewrite_for_sandbox("SELECT * FROM public.users;", "_sandbox_x");
        assert!(rewritten.starts_with("SET search_path TO _sandbox_x"));
        assert!(rewritten.contains("_sandbox_x.users"));
        assert!(!rewritten.contains("public.users"));
    }

    #[test]
    fn test_rewrite_is_case_insensitive() {
        let rewritten = rewrite_for_sandbox("INSERT INTO PUBLIC.orders SELECT * FROM Public.carts", "_sandbox_a");
        assert_eq!(
            rewritten,
            "SET search_path TO _sandbox_a, public;\nINSERT INTO _sandbox_a.orders SELECT * FROM _sandbox_a.carts"
        );
    }

    #[test]
    fn test_rewrite_skips_literals_and_lookalikes() {
        let sql = "UPDATE notes SET body = 'see public.users' WHERE republic.id = 1";
        let rewritten = rewrite_for_sandbox(sql, "_sandbox_b");
        assert!(rewritten.ends_with(sql));
    }

    #[test]
    fn test_schema_name() {
        assert_eq!(sandbox_schema_name("_sandbox_", "abc123"), "_sandbox_abc123");
    }
}
