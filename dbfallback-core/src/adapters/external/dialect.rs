//! MySQL-to-PostgreSQL query rewriting.
//!
//! Query templates handed to this layer use MySQL conventions: backtick
//! identifiers, `?` placeholders and MySQL type names. Before execution the
//! external adapter rewrites them into the PostgreSQL dialect. This is a
//! best-effort syntactic rewrite, not a SQL compiler — callers must avoid
//! dialect-specific constructs the rewriter does not cover.
//!
//! Covered rewrites:
//! - backtick identifiers → double-quoted identifiers
//! - `?` placeholders → `$1`, `$2`, ... (skipping string literals)
//! - `AUTO_INCREMENT` → `SERIAL`
//! - `INT(n)` / `BIGINT(n)` / `SMALLINT(n)` → width dropped
//! - `TINYINT(n)` → `SMALLINT`
//! - `MEDIUMTEXT` / `LONGTEXT` → `TEXT`

use std::sync::OnceLock;

use regex::Regex;

fn tinyint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bTINYINT(\s*\(\s*\d+\s*\))?").expect("tinyint pattern")
    })
}

fn widened_int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(BIGINT|SMALLINT|INT)\s*\(\s*\d+\s*\)").expect("int width pattern")
    })
}

fn long_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(MEDIUMTEXT|LONGTEXT)\b").expect("text pattern"))
}

fn auto_increment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bAUTO_INCREMENT\b").expect("auto_increment pattern"))
}

/// Rewrites a MySQL-flavored query template into PostgreSQL syntax.
pub fn translate(query: &str) -> String {
    let rewritten = rewrite_quoting_and_placeholders(query);
    let rewritten = tinyint_re().replace_all(&rewritten, "SMALLINT");
    let rewritten = widened_int_re().replace_all(&rewritten, |caps: &regex::Captures<'_>| {
        normalize_int(&caps[1])
    });
    let rewritten = long_text_re().replace_all(&rewritten, "TEXT");
    auto_increment_re().replace_all(&rewritten, "SERIAL").into_owned()
}

fn normalize_int(keyword: &str) -> String {
    match keyword.to_uppercase().as_str() {
        "BIGINT" => "BIGINT".to_string(),
        "SMALLINT" => "SMALLINT".to_string(),
        _ => "INTEGER".to_string(),
    }
}

/// Single pass over the template converting backticks to double quotes and
/// `?` placeholders to `$n`, leaving the contents of single- and
/// double-quoted literals untouched.
fn rewrite_quoting_and_placeholders(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 8);
    let mut placeholder = 0u32;
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;

    for ch in query.chars() {
        match ch {
            '\'' if !in_double && !in_backtick => {
                in_single = !in_single;
                out.push(ch);
            }
            '"' if !in_single && !in_backtick => {
                in_double = !in_double;
                out.push(ch);
            }
            '`' if !in_single && !in_double => {
                in_backtick = !in_backtick;
                out.push('"');
            }
            '?' if !in_single && !in_double && !in_backtick => {
                placeholder += 1;
                out.push('$');
                out.push_str(&placeholder.to_string());
            }
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_increment_column_definition() {
        let rewritten = translate("`col` INT(11) AUTO_INCREMENT");
        assert_eq!(rewritten, "\"col\" INTEGER SERIAL");
        assert!(!rewritten.contains('`'));
        assert!(!rewritten.to_uppercase().contains("AUTO_INCREMENT"));
    }

    #[test]
    fn test_backticks_become_double_quotes() {
        assert_eq!(
            translate("SELECT `id`, `name` FROM `app_clients`"),
            "SELECT \"id\", \"name\" FROM \"app_clients\""
        );
    }

    #[test]
    fn test_placeholders_are_numbered() {
        assert_eq!(
            translate("SELECT * FROM `t` WHERE `a` = ? AND `b` = ?"),
            "SELECT * FROM \"t\" WHERE \"a\" = $1 AND \"b\" = $2"
        );
    }

    #[test]
    fn test_placeholder_inside_string_literal_untouched() {
        assert_eq!(
            translate("SELECT * FROM `t` WHERE `q` = 'why?' AND `id` = ?"),
            "SELECT * FROM \"t\" WHERE \"q\" = 'why?' AND \"id\" = $1"
        );
    }

    #[test]
    fn test_type_rewrites() {
        assert_eq!(translate("TINYINT(1)"), "SMALLINT");
        assert_eq!(translate("TINYINT"), "SMALLINT");
        assert_eq!(translate("BIGINT(20)"), "BIGINT");
        assert_eq!(translate("SMALLINT(6)"), "SMALLINT");
        assert_eq!(translate("MEDIUMTEXT"), "TEXT");
        assert_eq!(translate("longtext"), "TEXT");
    }

    #[test]
    fn test_create_table_template() {
        let ddl = "CREATE TABLE `app_clients` (\
                   `id` INT(11) AUTO_INCREMENT, \
                   `notes` MEDIUMTEXT, \
                   `active` TINYINT(1))";
        let rewritten = translate(ddl);
        assert!(rewritten.contains("\"id\" INTEGER SERIAL"));
        assert!(rewritten.contains("\"notes\" TEXT"));
        assert!(rewritten.contains("\"active\" SMALLINT"));
    }

    #[test]
    fn test_plain_postgres_query_passes_through() {
        let query = "SELECT \"id\" FROM \"t\" WHERE \"id\" = $1";
        assert_eq!(translate(query), query);
    }

    #[test]
    fn test_word_boundaries_respected() {
        // INTEGER must not be re-rewritten, and identifiers containing
        // type-like substrings stay intact.
        assert_eq!(translate("`integer_points` INTEGER"), "\"integer_points\" INTEGER");
        assert_eq!(translate("`print_label` TEXT"), "\"print_label\" TEXT");
    }
}
