//! Normalization of SQL text into a literal-free pattern.
//!
//! Replaces concrete values (string/number/boolean literals, bind parameters)
//! with `?` so that `select * from games where id = 5` and
//! `select * from games where id = 999` produce the same pattern.
//! Placeholder lists are collapsed too, which makes `in (?, ?, ?)` and
//! `in (?)` indistinguishable.

/// Lexical token of a SQL statement after literal stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Keyword or identifier, lowercased. Quoted identifiers lose their quotes.
    Word(String),
    /// Any literal value or bind parameter.
    Placeholder,
    /// Single punctuation character: `( ) , . ; * =` etc.
    Punct(char),
    /// Multi-character operator: `<=`, `<>`, `::`, `||`, ...
    Op(&'static str),
}

/// Result of lexing: tokens plus the byte offset of an unterminated literal, if any.
pub(crate) struct Lexed {
    pub tokens: Vec<Token>,
    pub unterminated_at: Option<usize>,
}

const MULTI_CHAR_OPS: &[&str] = &["::", "<=", ">=", "<>", "!=", "||", "->>", "->", "#>>", "#>"];

/// Keywords that take an operand to their right; a `-` after them is a sign.
const OPERAND_KEYWORDS: &[&str] = &[
    "select", "where", "and", "or", "not", "case", "when", "then", "else", "return", "returning",
    "limit", "offset", "by", "in", "is", "between", "like", "ilike", "values", "set", "on",
    "having", "as", "distinct", "all", "any", "some", "interval", "escape", "fetch", "top",
];

/// True when the previous token ends an operand, making a following `-` binary.
fn ends_operand(prev: Option<&Token>) -> bool {
    match prev {
        Some(Token::Word(w)) => !OPERAND_KEYWORDS.contains(&w.as_str()),
        Some(Token::Placeholder | Token::Punct(')')) => true,
        _ => false,
    }
}

/// Normalize SQL text into a single-line, lowercase, literal-free pattern.
pub fn normalize(sql: &str) -> String {
    let lexed = lex(sql);
    render(&collapse(lexed.tokens))
}

/// Split SQL text into tokens, stripping comments and replacing literals.
pub(crate) fn lex(sql: &str) -> Lexed {
    let bytes = sql.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut unterminated_at = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        // Whitespace
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // -- line comment
        if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        // /* block comment */
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            match find_from(bytes, i + 2, b"*/") {
                Some(end) => i = end + 2,
                None => i = bytes.len(),
            }
            continue;
        }

        // 'string literal' with '' escapes
        if c == b'\'' {
            match skip_single_quoted(bytes, i) {
                Some(end) => i = end,
                None => {
                    unterminated_at.get_or_insert(i);
                    i = bytes.len();
                }
            }
            tokens.push(Token::Placeholder);
            continue;
        }

        // "quoted identifier" or `backtick identifier`
        if c == b'"' || c == b'`' {
            match bytes[i + 1..].iter().position(|&b| b == c) {
                Some(off) => {
                    let ident = &sql[i + 1..i + 1 + off];
                    tokens.push(Token::Word(ident.to_lowercase()));
                    i += off + 2;
                }
                None => {
                    unterminated_at.get_or_insert(i);
                    i = bytes.len();
                }
            }
            continue;
        }

        // $1 positional parameter, $$dollar quoted$$ or $tag$dollar quoted$tag$
        if c == b'$' {
            if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Placeholder);
                continue;
            }
            if let Some(tag_end) = dollar_tag_end(bytes, i) {
                let tag = &bytes[i..=tag_end];
                match find_from(bytes, tag_end + 1, tag) {
                    Some(close) => i = close + tag.len(),
                    None => {
                        unterminated_at.get_or_insert(i);
                        i = bytes.len();
                    }
                }
                tokens.push(Token::Placeholder);
                continue;
            }
        }

        // ? positional parameter
        if c == b'?' {
            tokens.push(Token::Placeholder);
            i += 1;
            continue;
        }

        // :name / @name named parameters (but not :: casts)
        if (c == b':' || c == b'@') && bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) {
            i += 1;
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            tokens.push(Token::Placeholder);
            continue;
        }

        // Numbers, including a unary minus when it cannot be a binary operator.
        let unary_minus = c == b'-'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)
            && !ends_operand(tokens.last());
        let leading_dot = c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if c.is_ascii_digit() || unary_minus || leading_dot {
            i = skip_number(bytes, if unary_minus { i + 1 } else { i });
            tokens.push(Token::Placeholder);
            continue;
        }

        // Keywords and identifiers
        if is_ident_start(c) {
            let start = i;
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            let word = sql[start..i].to_lowercase();
            if word == "true" || word == "false" {
                tokens.push(Token::Placeholder);
            } else {
                tokens.push(Token::Word(word));
            }
            continue;
        }

        // Multi-character operators
        if let Some(op) = MULTI_CHAR_OPS
            .iter()
            .find(|op| bytes[i..].starts_with(op.as_bytes()))
        {
            tokens.push(Token::Op(*op));
            i += op.len();
            continue;
        }

        // Everything else: single punctuation. Non-ASCII characters are kept whole.
        let ch = sql[i..].chars().next().unwrap_or(' ');
        tokens.push(Token::Punct(ch));
        i += ch.len_utf8();
    }

    // Trailing statement terminators carry no structure.
    while tokens.last() == Some(&Token::Punct(';')) {
        tokens.pop();
    }

    Lexed {
        tokens,
        unterminated_at,
    }
}

/// Collapse placeholder lists so parameter counts do not affect the pattern.
///
/// `? , ? , ?` → `?` and `( ? ) , ( ? )` → `( ? )`.
fn collapse(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());

    for tok in tokens {
        match tok {
            Token::Placeholder
                if out.len() >= 2
                    && out[out.len() - 1] == Token::Punct(',')
                    && out[out.len() - 2] == Token::Placeholder =>
            {
                out.pop();
            }
            Token::Punct(')') => {
                out.push(tok);
                if ends_with_repeated_tuple(&out) {
                    out.truncate(out.len() - 4);
                }
            }
            _ => out.push(tok),
        }
    }

    out
}

fn ends_with_repeated_tuple(out: &[Token]) -> bool {
    const TUPLE: [Token; 3] = [Token::Punct('('), Token::Placeholder, Token::Punct(')')];
    let n = out.len();
    n >= 7 && out[n - 3..] == TUPLE && out[n - 4] == Token::Punct(',') && out[n - 7..n - 4] == TUPLE
}

/// Render tokens as a single line with conventional spacing.
fn render(tokens: &[Token]) -> String {
    let mut result = String::new();
    let mut prev: Option<&Token> = None;

    for tok in tokens {
        let glue = matches!(tok, Token::Punct(',' | ')' | '.' | ';') | Token::Op("::"))
            || matches!(prev, Some(Token::Punct('(' | '.') | Token::Op("::")));
        if prev.is_some() && !glue {
            result.push(' ');
        }
        match tok {
            Token::Word(w) => result.push_str(w),
            Token::Placeholder => result.push('?'),
            Token::Punct(c) => result.push(*c),
            Token::Op(op) => result.push_str(op),
        }
        prev = Some(tok);
    }

    result
}

// ============================================================
// Byte scanning helpers
// ============================================================

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn find_from(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Returns the index just past the closing quote, or `None` if unterminated.
fn skip_single_quoted(bytes: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}

/// For `$$` or `$tag$` at `start`, returns the index of the closing `$` of the tag.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    (bytes.get(i) == Some(&b'$')).then_some(i)
}

fn skip_number(bytes: &[u8], mut i: usize) -> usize {
    // 0x1F hex literal
    if bytes[i] == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'X')) {
        i += 2;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        return i;
    }
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' | b'.' | b'_' => i += 1,
            b'e' | b'E' => {
                i += 1;
                if matches!(bytes.get(i), Some(b'+' | b'-')) {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_numbers() {
        assert_eq!(
            normalize("SELECT * FROM games WHERE id = 5"),
            "select * from games where id = ?"
        );
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(
            normalize("select  *\n\tFROM   Games\nwhere ID=1"),
            "select * from games where id = ?"
        );
    }

    #[test]
    fn test_normalize_string_literals() {
        assert_eq!(
            normalize("select id from teams where name = 'O''Brien FC'"),
            "select id from teams where name = ?"
        );
    }

    #[test]
    fn test_normalize_parameter_markers() {
        let expected = "select * from players where team_id = ? and active = ?";
        assert_eq!(
            normalize("select * from players where team_id = $1 and active = $2"),
            expected
        );
        assert_eq!(
            normalize("select * from players where team_id = ? and active = ?"),
            expected
        );
        assert_eq!(
            normalize("select * from players where team_id = :team and active = @active"),
            expected
        );
        assert_eq!(
            normalize("select * from players where team_id = 7 and active = true"),
            expected
        );
    }

    #[test]
    fn test_normalize_in_list_counts() {
        assert_eq!(
            normalize("select * from games where id in (1, 2, 3)"),
            normalize("select * from games where id in ($1)")
        );
        assert_eq!(
            normalize("select * from games where id in (1, 2, 3)"),
            "select * from games where id in (?)"
        );
    }

    #[test]
    fn test_normalize_multi_row_values() {
        assert_eq!(
            normalize("insert into scores (a, b) values (1, 2), (3, 4), (5, 6)"),
            "insert into scores (a, b) values (?)"
        );
        assert_eq!(
            normalize("insert into scores (a, b) values ($1, $2)"),
            "insert into scores (a, b) values (?)"
        );
    }

    #[test]
    fn test_normalize_negative_numbers() {
        assert_eq!(
            normalize("update teams set points = -3 where id = 1"),
            normalize("update teams set points = 10 where id = 2")
        );
        // Binary minus is structure, not a literal sign.
        assert_eq!(
            normalize("select points-1 from teams"),
            "select points - ? from teams"
        );
    }

    #[test]
    fn test_normalize_sign_after_keyword() {
        assert_eq!(normalize("select -1 from t"), normalize("select 1 from t"));
        assert_eq!(
            normalize("select case when a > 0 then -1 else -2 end from t"),
            normalize("select case when a > 0 then 1 else 2 end from t")
        );
        assert_eq!(
            normalize("select * from t where a = 1 and -5 < b limit -1"),
            normalize("select * from t where a = 1 and 5 < b limit 1")
        );
        assert_eq!(normalize("select a -1 from t"), "select a - ? from t");
    }

    #[test]
    fn test_normalize_comments_stripped() {
        assert_eq!(
            normalize("select 1 -- trailing\n/* block */ from dual;"),
            "select ? from dual"
        );
    }

    #[test]
    fn test_normalize_casts_and_qualified_names() {
        assert_eq!(
            normalize("SELECT g.id::text FROM public.games g"),
            "select g.id::text from public.games g"
        );
    }

    #[test]
    fn test_normalize_quoted_identifiers() {
        assert_eq!(
            normalize(r#"select "Name" from "Teams""#),
            "select name from teams"
        );
    }

    #[test]
    fn test_normalize_dollar_quoted() {
        assert_eq!(
            normalize("select $$it's a body$$ from dual"),
            "select ? from dual"
        );
    }

    #[test]
    fn test_lex_reports_unterminated_literal() {
        let lexed = lex("select * from games where name = 'oops");
        assert_eq!(lexed.unterminated_at, Some(33));
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  ;  "), "");
    }
}
