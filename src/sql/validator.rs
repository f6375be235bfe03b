//! SQL Safety Validator
//!
//! Static analysis of raw SQL text before it goes anywhere near a sandbox or
//! a reviewer. Every issue is collected; callers always see the full set.

use crate::sql::lexer::{self, ParenBalance, Region};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Postgres truncates identifiers longer than this (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

pub const DEFAULT_MAX_QUERY_LENGTH: usize = 1_000_000;

/// Machine-checkable codes for blocking issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    DangerousOperation,
    ForbiddenKeyword,
    SyntaxError,
    SqlTooLarge,
    EmptyQuery,
    ReservedKeyword,
    IdentifierTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Critical,
}

/// A blocking issue found during validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Codes for non-blocking advice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    SelectStar,
    MissingWhere,
    NowFunction,
    UnindexedForeignKey,
    NonSnakeCase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub code: WarningCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Result of validating a SQL string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Critical)
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// The most severe error, first reported wins on ties
    pub fn primary_error(&self) -> Option<&ValidationError> {
        self.errors
            .iter()
            .fold(None, |best: Option<&ValidationError>, e| match best {
                Some(b) if b.severity >= e.severity => Some(b),
                _ => Some(e),
            })
    }
}

/// Validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidatorOptions {
    /// Character limit for a single SQL submission
    pub max_query_length: usize,
    /// Lift the TRUNCATE ban
    pub allow_truncate: bool,
    /// Keywords rejected outright (multi-word entries match any whitespace)
    pub forbidden_keywords: Vec<String>,
    /// Emit best-practice warnings
    pub check_best_practices: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            allow_truncate: false,
            forbidden_keywords: vec!["TRUNCATE".to_string(), "DROP SCHEMA".to_string()],
            check_best_practices: true,
        }
    }
}

struct DangerousPattern {
    regex: Regex,
    description: &'static str,
}

static DANGEROUS_PATTERNS: Lazy<Vec<DangerousPattern>> = Lazy::new(|| {
    [
        (r"(?i)\b(?:CREATE|DROP)\s+DATABASE\b", "creating or dropping a database"),
        (r"(?i)\bALTER\s+SYSTEM\b", "changing server configuration"),
        (r"(?i)\bCOPY\b[^;]*\bFROM\s+PROGRAM\b", "running a shell program through COPY"),
        (r"(?i)\bpg_terminate_backend\b", "terminating backend processes"),
        (r"(?i)\bpg_cancel_backend\b", "cancelling other sessions' queries"),
    ]
    .into_iter()
    .map(|(pattern, description)| DangerousPattern {
        regex: Regex::new(pattern).expect("dangerous pattern must compile"),
        description,
    })
    .collect()
});

static RESERVED_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
        "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
        "current_date", "current_role", "current_time", "current_timestamp", "current_user",
        "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
        "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
        "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
        "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
        "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
        "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
        "window", "with",
    ]
    .into_iter()
    .collect()
});

const IDENT: &str = r#"("[^"]+"|[A-Za-z_][A-Za-z0-9_$]*)"#;

static SNAKE_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("snake_case regex"));

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?i)\bCREATE\s+(?:TEMP(?:ORARY)?\s+|UNLOGGED\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:(?:"[^"]+"|\w+)\.)?{IDENT}"#
    ))
    .expect("create table regex")
});

static ADD_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\bADD\s+COLUMN\s+(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}"))
        .expect("add column regex")
});

static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\bCREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}\s+ON\b"
    ))
    .expect("create index regex")
});

static ALTER_ADD_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?i)\bALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?(?:(?:"[^"]+"|\w+)\.)?{IDENT}\s+ADD\s+(?:COLUMN\s+)?(?:IF\s+NOT\s+EXISTS\s+)?{IDENT}[^;]*\bREFERENCES\b"#
    ))
    .expect("alter add reference regex")
});

static TABLE_FK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^(?:CONSTRAINT\s+\S+\s+)?FOREIGN\s+KEY\s*\(\s*"?(\w+)"?\s*\)"#)
        .expect("table foreign key regex")
});

static SELECT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?\*").expect("select star regex"));
static DELETE_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*DELETE\s+FROM\b").expect("delete regex"));
static UPDATE_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*UPDATE\b").expect("update regex"));
static WHERE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").expect("where regex"));
static NOW_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bNOW\s*\(\s*\)").expect("now regex"));
static REFERENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bREFERENCES\b").expect("references regex"));
static INLINE_INDEXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:PRIMARY\s+KEY|UNIQUE)\b").expect("inline index regex"));

/// Table-level clauses that open a column-list element but declare no column
const TABLE_CLAUSES: [&str; 7] = [
    "constraint", "primary", "foreign", "unique", "check", "exclude", "like",
];

#[derive(Default)]
struct Issues {
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
}

impl Issues {
    fn error(&mut self, code: ValidationCode, severity: Severity, message: String, detail: Option<String>) {
        self.errors.push(ValidationError { code, message, severity, detail });
    }

    fn warn(&mut self, code: WarningCode, message: String, suggestion: Option<&str>) {
        self.warnings.push(ValidationWarning {
            code,
            message,
            suggestion: suggestion.map(str::to_string),
        });
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Static SQL safety validator
pub struct SqlValidator {
    options: ValidatorOptions,
    forbidden: Vec<(String, Regex)>,
}

impl SqlValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        let forbidden = options
            .forbidden_keywords
            .iter()
            .filter(|kw| !(options.allow_truncate && kw.trim().eq_ignore_ascii_case("truncate")))
            .filter_map(|kw| match Regex::new(&keyword_pattern(kw)) {
                Ok(re) => Some((kw.trim().to_uppercase(), re)),
                Err(e) => {
                    warn!("Ignoring forbidden keyword {:?}: {}", kw, e);
                    None
                }
            })
            .collect();

        Self { options, forbidden }
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Validate a SQL string, collecting every issue found
    pub fn validate(&self, sql: &str) -> ValidationResult {
        let mut issues = Issues::default();

        if sql.trim().is_empty() {
            issues.error(
                ValidationCode::EmptyQuery,
                Severity::Error,
                "SQL is empty".to_string(),
                None,
            );
            return issues.finish();
        }

        let length = sql.chars().count();
        if length > self.options.max_query_length {
            issues.error(
                ValidationCode::SqlTooLarge,
                Severity::Critical,
                format!(
                    "SQL is {} characters long, the limit is {}",
                    length, self.options.max_query_length
                ),
                None,
            );
        }

        let code = lexer::code_view(sql);
        self.check_dangerous_patterns(sql, &mut issues);
        self.check_forbidden_keywords(&code, &mut issues);

        // Oversized input only gets the linear pattern scans
        if length > self.options.max_query_length {
            debug!("SQL over the length limit, skipping structural checks");
            return issues.finish();
        }

        check_balance(sql, &mut issues);

        for statement in lexer::split_statements(sql) {
            let code = lexer::code_view(statement);
            check_declared_identifiers(&code, &mut issues);
            if self.options.check_best_practices {
                check_statement_practices(&code, &mut issues);
            }
        }

        if self.options.check_best_practices {
            check_foreign_key_indexes(&code, &mut issues);
        }

        if !issues.errors.is_empty() {
            debug!("SQL rejected with {} error(s)", issues.errors.len());
        }
        issues.finish()
    }

    /// Normalised form for display and hashing; never executed
    pub fn sanitize(&self, sql: &str) -> String {
        sanitize(sql)
    }

    fn check_dangerous_patterns(&self, sql: &str, issues: &mut Issues) {
        for pattern in DANGEROUS_PATTERNS.iter() {
            if let Some(found) = pattern.regex.find(sql) {
                issues.error(
                    ValidationCode::DangerousOperation,
                    Severity::Critical,
                    format!("Dangerous operation detected: {}", pattern.description),
                    Some(found.as_str().to_string()),
                );
            }
        }
    }

    fn check_forbidden_keywords(&self, sql: &str, issues: &mut Issues) {
        for (keyword, regex) in &self.forbidden {
            if regex.is_match(sql) {
                issues.error(
                    ValidationCode::ForbiddenKeyword,
                    Severity::Critical,
                    format!("Forbidden keyword: {}", keyword),
                    None,
                );
            }
        }
    }
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new(ValidatorOptions::default())
    }
}

/// Strip comments outside literals, collapse whitespace, trim
pub fn sanitize(sql: &str) -> String {
    lexer::collapse_whitespace(&lexer::strip_comments(sql))
}

/// Check a single identifier against naming rules
pub fn validate_identifier(name: &str) -> ValidationResult {
    let mut issues = Issues::default();
    check_identifier(name, &mut issues);
    issues.finish()
}

fn keyword_pattern(keyword: &str) -> String {
    let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
    format!(r"(?i)\b{}\b", words.join(r"\s+"))
}

fn check_balance(sql: &str, issues: &mut Issues) {
    match lexer::paren_balance(sql) {
        ParenBalance::Balanced => {}
        ParenBalance::Unclosed { depth } => issues.error(
            ValidationCode::SyntaxError,
            Severity::Error,
            format!("Unbalanced parentheses: {} left open", depth),
            None,
        ),
        ParenBalance::UnexpectedClose { position } => issues.error(
            ValidationCode::SyntaxError,
            Severity::Error,
            "Unbalanced parentheses: unexpected ')'".to_string(),
            Some(format!("at offset {}", position)),
        ),
    }

    if let Some(region) = lexer::unterminated_region(sql) {
        let what = match region {
            Region::SingleQuoted => "string literal",
            Region::DoubleQuoted => "quoted identifier",
            Region::DollarQuoted => "dollar-quoted body",
            Region::BlockComment => "block comment",
            Region::Code | Region::LineComment => return,
        };
        issues.error(
            ValidationCode::SyntaxError,
            Severity::Error,
            format!("Unterminated {}", what),
            None,
        );
    }
}

fn check_identifier(raw: &str, issues: &mut Issues) {
    let quoted = raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"');
    let name = if quoted { &raw[1..raw.len() - 1] } else { raw };

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        issues.error(
            ValidationCode::IdentifierTooLong,
            Severity::Error,
            format!(
                "Identifier '{}' exceeds {} characters",
                name, MAX_IDENTIFIER_LENGTH
            ),
            None,
        );
    }

    if !quoted && RESERVED_KEYWORDS.contains(name.to_lowercase().as_str()) {
        issues.error(
            ValidationCode::ReservedKeyword,
            Severity::Error,
            format!("'{}' is a reserved keyword and cannot be used as an identifier", name),
            None,
        );
    }

    if !SNAKE_CASE.is_match(name) {
        issues.warn(
            WarningCode::NonSnakeCase,
            format!("Identifier '{}' is not snake_case", name),
            Some("Use lowercase letters, digits and underscores"),
        );
    }
}

/// Identifiers this statement declares: tables, columns, indexes
fn check_declared_identifiers(code: &str, issues: &mut Issues) {
    if let Some(caps) = CREATE_TABLE.captures(code) {
        if let Some(name) = caps.get(1) {
            check_identifier(name.as_str(), issues);
        }
        for column in create_table_columns(code, caps.get(0).map_or(0, |m| m.end())) {
            check_identifier(column, issues);
        }
    }

    for caps in ADD_COLUMN.captures_iter(code) {
        if let Some(name) = caps.get(1) {
            check_identifier(name.as_str(), issues);
        }
    }

    if let Some(name) = CREATE_INDEX.captures(code).and_then(|c| c.get(1)) {
        check_identifier(name.as_str(), issues);
    }
}

/// Column names declared in a CREATE TABLE body starting after `from`
fn create_table_columns(code: &str, from: usize) -> Vec<&str> {
    let Some(open) = code.get(from..).and_then(|rest| rest.find('(')) else {
        return Vec::new();
    };
    let Some(body) = lexer::enclosed(code, from + open) else {
        return Vec::new();
    };

    lexer::split_top_level(body, ',')
        .into_iter()
        .filter_map(|element| element.split_whitespace().next())
        .filter(|first| !TABLE_CLAUSES.contains(&first.to_lowercase().as_str()))
        .collect()
}

fn check_statement_practices(code: &str, issues: &mut Issues) {
    if SELECT_STAR.is_match(code) {
        issues.warn(
            WarningCode::SelectStar,
            "SELECT * returns every column, including ones added later".to_string(),
            Some("List the columns you need explicitly"),
        );
    }

    let unguarded = if DELETE_STMT.is_match(code) {
        Some("DELETE")
    } else if UPDATE_STMT.is_match(code) {
        Some("UPDATE")
    } else {
        None
    };
    if let Some(verb) = unguarded {
        if !WHERE_CLAUSE.is_match(code) {
            issues.warn(
                WarningCode::MissingWhere,
                format!("{} without WHERE affects every row in the table", verb),
                Some("Add a WHERE clause, or use WHERE true if a full-table change is intended"),
            );
        }
    }

    if NOW_CALL.is_match(code) {
        issues.warn(
            WarningCode::NowFunction,
            "NOW() is Postgres-specific".to_string(),
            Some("Prefer the standard CURRENT_TIMESTAMP"),
        );
    }
}

/// Warn for every foreign key column that no index in the same SQL covers
fn check_foreign_key_indexes(code: &str, issues: &mut Issues) {
    for (table, column) in referenced_columns(code) {
        if !has_leading_index(code, &table, &column) {
            issues.warn(
                WarningCode::UnindexedForeignKey,
                format!("Foreign key {}.{} has no index", table, column),
                Some("Index foreign key columns to keep joins and cascading deletes fast"),
            );
        }
    }
}

fn referenced_columns(code: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for statement in lexer::split_statements(code) {
        if let Some(caps) = CREATE_TABLE.captures(statement) {
            let table = caps.get(1).map_or("", |m| m.as_str());
            let from = caps.get(0).map_or(0, |m| m.end());
            let Some(body) = statement
                .get(from..)
                .and_then(|rest| rest.find('('))
                .and_then(|open| lexer::enclosed(statement, from + open))
            else {
                continue;
            };

            for element in lexer::split_top_level(body, ',') {
                if !REFERENCES.is_match(element) {
                    continue;
                }
                if let Some(fk) = TABLE_FK.captures(element).and_then(|c| c.get(1)) {
                    pairs.push((unquote(table), unquote(fk.as_str())));
                    continue;
                }
                let Some(column) = element.split_whitespace().next() else {
                    continue;
                };
                if TABLE_CLAUSES.contains(&column.to_lowercase().as_str()) {
                    continue;
                }
                if !INLINE_INDEXED.is_match(element) {
                    pairs.push((unquote(table), unquote(column)));
                }
            }
        }

        for caps in ALTER_ADD_REFERENCE.captures_iter(statement) {
            if let (Some(table), Some(column)) = (caps.get(1), caps.get(2)) {
                if !INLINE_INDEXED.is_match(caps.get(0).map_or("", |m| m.as_str())) {
                    pairs.push((unquote(table.as_str()), unquote(column.as_str())));
                }
            }
        }
    }

    pairs
}

fn has_leading_index(code: &str, table: &str, column: &str) -> bool {
    let pattern = format!(
        r#"(?i)\bCREATE\s+(?:UNIQUE\s+)?INDEX\b[^;]*?\bON\s+(?:(?:"[^"]+"|\w+)\.)?"?{}"?\s*(?:USING\s+\w+\s*)?\(\s*"?{}"?\s*[,)]"#,
        regex::escape(table),
        regex::escape(column)
    );
    Regex::new(&pattern)
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

fn unquote(ident: &str) -> String {
    ident.trim_matches('"').to_string()
}
