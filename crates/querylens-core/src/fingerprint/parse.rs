//! Structural metadata extraction: operation kind, referenced tables, complexity.

use super::normalize::{Token, lex};
use super::{OpKind, ParseError, QueryShape};

/// Maximum complexity score.
pub const MAX_COMPLEXITY: u8 = 10;

/// Words that can never be a table name right after a table-introducing keyword.
const RESERVED: &[&str] = &[
    "select", "where", "set", "values", "on", "using", "as", "join", "left", "right", "inner",
    "outer", "full", "cross", "natural", "group", "order", "limit", "offset", "having", "union",
    "returning", "default", "lateral",
];

/// Modifiers skipped between a table-introducing keyword and the table name.
const MODIFIERS: &[&str] = &["only", "if", "not", "exists", "lateral", "unlogged", "temporary"];

/// Parse raw SQL into a [`QueryShape`].
///
/// Fails on empty input or an unterminated literal; callers on the ingestion
/// path fall back to [`QueryShape::unknown`].
pub fn parse(sql: &str) -> Result<QueryShape, ParseError> {
    let lexed = lex(sql);
    if let Some(pos) = lexed.unterminated_at {
        return Err(ParseError::UnterminatedLiteral(pos));
    }
    let tokens = lexed.tokens;
    let Some(first) = tokens.iter().find_map(word) else {
        return Err(ParseError::Empty);
    };

    Ok(QueryShape {
        op_kind: op_kind(first),
        tables: extract_tables(&tokens),
        complexity: complexity(&tokens),
    })
}

fn word(tok: &Token) -> Option<&str> {
    match tok {
        Token::Word(w) => Some(w.as_str()),
        _ => None,
    }
}

fn op_kind(first: &str) -> OpKind {
    match first {
        "select" | "with" => OpKind::Select,
        "insert" => OpKind::Insert,
        "update" => OpKind::Update,
        "delete" => OpKind::Delete,
        "create" | "alter" | "drop" | "truncate" => OpKind::Ddl,
        _ => OpKind::Unknown,
    }
}

// ============================================================
// Tables
// ============================================================

fn extract_tables(tokens: &[Token]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !tables.contains(&name) {
            tables.push(name);
        }
    };

    let mut i = 0;
    while i < tokens.len() {
        let Some(kw) = word(&tokens[i]) else {
            i += 1;
            continue;
        };
        let introduces = match kw {
            "from" | "into" | "join" | "table" => true,
            // `on conflict do update set` and `for update` are not table references.
            "update" => {
                tokens.get(i + 1).and_then(word) != Some("set")
                    && (i == 0 || word(&tokens[i - 1]) != Some("for"))
            }
            _ => false,
        };
        if !introduces {
            i += 1;
            continue;
        }

        let mut j = skip_modifiers(tokens, i + 1);
        loop {
            let Some((name, next)) = qualified_name(tokens, j) else {
                break;
            };
            push(name);
            j = next;
            // `from a, b` / `from a x, b y` / `from a as x, b`
            if kw != "from" {
                break;
            }
            j = skip_alias(tokens, j);
            if tokens.get(j) != Some(&Token::Punct(',')) {
                break;
            }
            j += 1;
        }
        i = j.max(i + 1);
    }

    tables
}

fn skip_modifiers(tokens: &[Token], mut j: usize) -> usize {
    while tokens
        .get(j)
        .and_then(word)
        .is_some_and(|w| MODIFIERS.contains(&w))
    {
        j += 1;
    }
    j
}

fn skip_alias(tokens: &[Token], mut j: usize) -> usize {
    if tokens.get(j).and_then(word) == Some("as") {
        j += 1;
    }
    if tokens
        .get(j)
        .and_then(word)
        .is_some_and(|w| !RESERVED.contains(&w))
    {
        j += 1;
    }
    j
}

/// Reads `name` or `schema.name` at `j`; returns the name and the index after it.
fn qualified_name(tokens: &[Token], j: usize) -> Option<(String, usize)> {
    let first = tokens.get(j).and_then(word)?;
    if RESERVED.contains(&first) {
        return None;
    }
    let mut name = first.to_string();
    let mut k = j + 1;
    while tokens.get(k) == Some(&Token::Punct('.')) {
        let Some(part) = tokens.get(k + 1).and_then(word) else {
            break;
        };
        name.push('.');
        name.push_str(part);
        k += 2;
    }
    Some((name, k))
}

// ============================================================
// Complexity
// ============================================================

/// Weighted structural score: 1 + 2 per join + 2 per subselect + 1 each for
/// group by, having, order by, limit, union, distinct. Capped at [`MAX_COMPLEXITY`].
fn complexity(tokens: &[Token]) -> u8 {
    let words: Vec<&str> = tokens.iter().filter_map(word).collect();
    let count = |w: &str| words.iter().filter(|x| **x == w).count() as u32;
    let count_pair = |a: &str, b: &str| {
        words
            .windows(2)
            .filter(|p| p[0] == a && p[1] == b)
            .count() as u32
    };

    let selects = count("select");
    let top_level_select = u32::from(words.first().is_some_and(|w| *w == "select"));
    let subselects = selects.saturating_sub(top_level_select);

    let score = 1
        + 2 * count("join")
        + 2 * subselects
        + count_pair("group", "by")
        + count("having")
        + count_pair("order", "by")
        + count("limit")
        + count("union")
        + count("distinct");

    score.min(u32::from(MAX_COMPLEXITY)) as u8
}
