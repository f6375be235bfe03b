//! Quote-aware SQL scanner
//!
//! A single left-to-right pass that knows, for every character, whether it
//! sits in plain code, a quoted literal, a dollar-quoted body or a comment.
//! Statement splitting, parenthesis balance, comment stripping and the
//! sandbox row estimator are all built on this one state machine.

use std::iter::Peekable;
use std::str::CharIndices;

/// Lexical region a character belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Code,
    SingleQuoted,
    DoubleQuoted,
    DollarQuoted,
    LineComment,
    BlockComment,
}

impl Region {
    pub fn is_comment(self) -> bool {
        matches!(self, Region::LineComment | Region::BlockComment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Code,
    SingleQuoted,
    DoubleQuoted,
    DollarQuoted { tag: String },
    LineComment,
    BlockComment { opened_at: usize },
}

/// Iterator over `(byte_index, char, region)` triples.
///
/// Quote state toggles on `'` and `"` unless the quote is escaped by a
/// preceding backslash. Doubled quotes (`''`) fall out naturally as a close
/// followed by a re-open.
pub struct Scanner<'a> {
    sql: &'a str,
    chars: Peekable<CharIndices<'a>>,
    state: State,
    prev: Option<char>,
    /// Characters of a `$tag$` delimiter still to be reported as quoted
    pending: usize,
    close_after_pending: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self {
            sql,
            chars: sql.char_indices().peekable(),
            state: State::Code,
            prev: None,
            pending: 0,
            close_after_pending: false,
        }
    }

    /// Region left open at the current position, if it is one that must be
    /// closed before the end of input.
    pub fn unterminated(&self) -> Option<Region> {
        match self.state {
            State::SingleQuoted => Some(Region::SingleQuoted),
            State::DoubleQuoted => Some(Region::DoubleQuoted),
            State::DollarQuoted { .. } => Some(Region::DollarQuoted),
            State::BlockComment { .. } => Some(Region::BlockComment),
            State::Code | State::LineComment => None,
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = (usize, char, Region);

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, ch) = self.chars.next()?;

        if self.pending > 0 {
            self.pending -= 1;
            if self.pending == 0 && self.close_after_pending {
                self.close_after_pending = false;
                self.state = State::Code;
            }
            self.prev = Some(ch);
            return Some((idx, ch, Region::DollarQuoted));
        }

        let escaped = self.prev == Some('\\');
        let next_ch = self.chars.peek().map(|&(_, c)| c);

        let (region, transition) = match &self.state {
            State::Code => match ch {
                '\'' if !escaped => (Region::SingleQuoted, Some(State::SingleQuoted)),
                '"' if !escaped => (Region::DoubleQuoted, Some(State::DoubleQuoted)),
                '-' if next_ch == Some('-') => (Region::LineComment, Some(State::LineComment)),
                '/' if next_ch == Some('*') => (
                    Region::BlockComment,
                    Some(State::BlockComment { opened_at: idx }),
                ),
                '$' if !self.prev.is_some_and(is_identifier_char) => match dollar_tag(&self.sql[idx..]) {
                    Some(tag) => {
                        self.pending = tag.len() - 1;
                        (
                            Region::DollarQuoted,
                            Some(State::DollarQuoted { tag: tag.to_string() }),
                        )
                    }
                    None => (Region::Code, None),
                },
                _ => (Region::Code, None),
            },
            State::SingleQuoted => {
                let close = ch == '\'' && !escaped;
                (Region::SingleQuoted, close.then_some(State::Code))
            }
            State::DoubleQuoted => {
                let close = ch == '"' && !escaped;
                (Region::DoubleQuoted, close.then_some(State::Code))
            }
            State::DollarQuoted { tag } => {
                if ch == '$' && self.sql[idx..].starts_with(tag.as_str()) {
                    self.pending = tag.len() - 1;
                    if self.pending == 0 {
                        (Region::DollarQuoted, Some(State::Code))
                    } else {
                        self.close_after_pending = true;
                        (Region::DollarQuoted, None)
                    }
                } else {
                    (Region::DollarQuoted, None)
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    (Region::Code, Some(State::Code))
                } else {
                    (Region::LineComment, None)
                }
            }
            State::BlockComment { opened_at } => {
                // "/*/" must not close itself
                let close = ch == '/' && self.prev == Some('*') && idx >= opened_at + 3;
                (Region::BlockComment, close.then_some(State::Code))
            }
        };

        if let Some(next_state) = transition {
            self.state = next_state;
        }
        self.prev = Some(ch);
        Some((idx, ch, region))
    }
}

/// Match a dollar-quote delimiter (`$$` or `$tag$`) at the start of `rest`.
fn dollar_tag(rest: &str) -> Option<&str> {
    let body = rest.get(1..)?;
    let end = body.find('$')?;
    let tag = &body[..end];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    valid.then(|| &rest[..end + 2])
}

/// `$` after one of these belongs to an identifier, not a delimiter
fn is_identifier_char(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

/// Scan `sql`.
pub fn scan(sql: &str) -> Scanner<'_> {
    Scanner::new(sql)
}

/// Outcome of the parenthesis balance check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParenBalance {
    Balanced,
    /// Input ended with this many parentheses still open
    Unclosed { depth: usize },
    /// A `)` at this byte offset had no matching `(`
    UnexpectedClose { position: usize },
}

/// Track parenthesis depth over code regions only.
pub fn paren_balance(sql: &str) -> ParenBalance {
    let mut depth: usize = 0;
    for (idx, ch, region) in scan(sql) {
        if region != Region::Code {
            continue;
        }
        match ch {
            '(' => depth += 1,
            ')' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return ParenBalance::UnexpectedClose { position: idx },
            },
            _ => {}
        }
    }
    if depth == 0 {
        ParenBalance::Balanced
    } else {
        ParenBalance::Unclosed { depth }
    }
}

/// Region left open at the end of `sql`, if any.
pub fn unterminated_region(sql: &str) -> Option<Region> {
    let mut scanner = scan(sql);
    scanner.by_ref().for_each(drop);
    scanner.unterminated()
}

/// Split `sql` into statements on `;` in code regions.
///
/// Returned slices are trimmed; empty and comment-only statements are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    split_on(sql, ';', false)
}

/// Split on `delim` at parenthesis depth zero, e.g. the elements of a
/// column list.
pub fn split_top_level(sql: &str, delim: char) -> Vec<&str> {
    split_on(sql, delim, true)
}

fn split_on(sql: &str, delim: char, top_level_only: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth: usize = 0;

    for (idx, ch, region) in scan(sql) {
        if region != Region::Code {
            continue;
        }
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == delim && (!top_level_only || depth == 0) => {
                push_part(&mut parts, &sql[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    push_part(&mut parts, &sql[start..]);
    parts
}

fn push_part<'a>(parts: &mut Vec<&'a str>, part: &'a str) {
    let trimmed = part.trim();
    if !trimmed.is_empty() && !strip_comments(trimmed).trim().is_empty() {
        parts.push(trimmed);
    }
}

/// Contents of the parenthesised group opening at byte offset `open_at`.
pub fn enclosed(sql: &str, open_at: usize) -> Option<&str> {
    let rest = sql.get(open_at..)?;
    if !rest.starts_with('(') {
        return None;
    }
    let mut depth: usize = 0;
    for (idx, ch, region) in scan(rest) {
        if region != Region::Code {
            continue;
        }
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[1..idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove `--` and `/* */` comments that sit outside literals.
///
/// Each comment is replaced by a single space so neighbouring tokens never
/// fuse together.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_comment = false;
    for (_, ch, region) in scan(sql) {
        if region.is_comment() {
            if !in_comment {
                out.push(' ');
                in_comment = true;
            }
            continue;
        }
        in_comment = false;
        out.push(ch);
    }
    out
}

/// Blank out string literals, dollar-quoted bodies and comments, keeping
/// code and double-quoted identifiers. Used by pattern checks that must not
/// fire on literal text.
pub fn code_view(sql: &str) -> String {
    scan(sql)
        .map(|(_, ch, region)| match region {
            Region::Code | Region::DoubleQuoted => ch,
            _ if ch == '\n' => '\n',
            _ => ' ',
        })
        .collect()
}

/// Collapse whitespace runs in code regions to a single space and trim.
pub fn collapse_whitespace(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last_was_space = false;
    for (_, ch, region) in scan(sql) {
        if region == Region::Code && ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        last_was_space = false;
        out.push(ch);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_ignores_semicolons_in_literals() {
        let sql = "INSERT INTO notes (body) VALUES ('a;b'); SELECT \"x;y\" FROM t;";
        let statements = split_statements(sql);
        assert_eq!(
            statements,
            vec![
                "INSERT INTO notes (body) VALUES ('a;b')",
                "SELECT \"x;y\" FROM t"
            ]
        );
    }

    #[test]
    fn test_split_respects_dollar_quoted_bodies() {
        let sql = "CREATE FUNCTION f() RETURNS void LANGUAGE plpgsql AS $$ BEGIN PERFORM 1; END; $$; SELECT 1;";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("$$"));
        assert_eq!(statements[1], "SELECT 1");
    }

    #[test]
    fn test_dollar_inside_identifier_is_not_a_quote() {
        let sql = "SELECT price$usd$ FROM t; SELECT 2";
        assert_eq!(split_statements(sql), vec!["SELECT price$usd$ FROM t", "SELECT 2"]);
        assert_eq!(unterminated_region(sql), None);

        let tagged = "SELECT $body$ a; b $body$; SELECT 3";
        assert_eq!(split_statements(tagged).len(), 2);
    }

    #[test]
    fn test_split_drops_comment_only_tail() {
        let statements = split_statements("SELECT 1; -- trailing note");
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn test_escaped_quote_does_not_close_literal() {
        let sql = r"SELECT 'it\'s; fine'; SELECT 2";
        assert_eq!(split_statements(sql).len(), 2);
    }

    #[test]
    fn test_paren_balance() {
        assert_eq!(paren_balance("SELECT (1 + (2))"), ParenBalance::Balanced);
        assert_eq!(paren_balance("SELECT ((1)"), ParenBalance::Unclosed { depth: 1 });
        assert_eq!(
            paren_balance("SELECT 1)"),
            ParenBalance::UnexpectedClose { position: 8 }
        );
        assert_eq!(paren_balance("SELECT ')('"), ParenBalance::Balanced);
        assert_eq!(paren_balance("SELECT 1 -- )"), ParenBalance::Balanced);
    }

    #[test]
    fn test_unterminated_literal() {
        assert_eq!(unterminated_region("SELECT 'abc"), Some(Region::SingleQuoted));
        assert_eq!(unterminated_region("SELECT 'abc'"), None);
        assert_eq!(unterminated_region("SELECT 1 /* open"), Some(Region::BlockComment));
    }

    #[test]
    fn test_strip_comments_keeps_literals() {
        let sql = "SELECT '-- not a comment' /* gone */ FROM t -- gone too\nWHERE x = 1";
        let stripped = strip_comments(sql);
        assert!(stripped.contains("'-- not a comment'"));
        assert!(!stripped.contains("gone"));
        assert!(stripped.contains("WHERE x = 1"));
    }

    #[test]
    fn test_block_comment_needs_real_close() {
        let stripped = strip_comments("a /*/ b */ c");
        assert!(!stripped.contains('b'));
        assert!(stripped.starts_with('a') && stripped.ends_with('c'));
    }

    #[test]
    fn test_enclosed_group() {
        let sql = "CREATE TABLE t (id int, CHECK (id > 0)) WITH (fillfactor = 70)";
        let open = sql.find('(').unwrap();
        assert_eq!(enclosed(sql, open), Some("id int, CHECK (id > 0)"));
    }

    #[test]
    fn test_split_top_level() {
        let parts = split_top_level("id int, amount numeric(10, 2), CHECK (amount > 0)", ',');
        assert_eq!(parts, vec!["id int", "amount numeric(10, 2)", "CHECK (amount > 0)"]);
    }

    #[test]
    fn test_code_view_blanks_literals() {
        let view = code_view("SELECT * FROM t WHERE a = 'SELECT *'");
        assert_eq!(view.matches("SELECT *").count(), 1);
    }

    #[test]
    fn test_collapse_whitespace_leaves_literals() {
        assert_eq!(
            collapse_whitespace("  SELECT   'a   b'\n\tFROM  t  "),
            "SELECT 'a   b' FROM t"
        );
    }

    #[test]
    fn test_positional_parameters_are_code() {
        let regions: Vec<Region> = scan("SELECT $1, $2").map(|(_, _, r)| r).collect();
        assert!(regions.iter().all(|r| *r == Region::Code));
    }
}
