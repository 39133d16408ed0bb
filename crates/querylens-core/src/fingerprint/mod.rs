//! Query fingerprinting.
//!
//! A fingerprint identifies the structural shape of a statement independent
//! of its literal values: `select * from games where id = 5` and
//! `select * from games where id = 999` share one fingerprint, while
//! `select * from games` and `select * from teams` do not.
//!
//! The id is `q_` followed by the base-36 xxh3-64 hash of the normalized text.
//! Distinct shapes colliding on the same 64-bit hash is an accepted risk.

mod normalize;
mod parse;

pub use normalize::normalize;
pub use parse::{MAX_COMPLEXITY, parse};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Error returned by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty query text")]
    Empty,
    #[error("unterminated literal starting at byte {0}")]
    UnterminatedLiteral(usize),
}

/// Stable identifier for a query shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint raw SQL text.
    pub fn of(sql: &str) -> Self {
        Self::from_normalized(&normalize(sql))
    }

    /// Fingerprint text that has already been through [`normalize`].
    pub fn from_normalized(normalized: &str) -> Self {
        Fingerprint(format!("q_{}", to_base36(xxh3_64(normalized.as_bytes()))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

// ============================================================
// Query shape
// ============================================================

/// Statement category derived from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Unknown,
}

impl OpKind {
    pub fn label(self) -> &'static str {
        match self {
            OpKind::Select => "select",
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Ddl => "ddl",
            OpKind::Unknown => "unknown",
        }
    }

    /// Insert, update and delete count as writes for access-pattern purposes.
    pub fn is_write(self) -> bool {
        matches!(self, OpKind::Insert | OpKind::Update | OpKind::Delete)
    }
}

/// Structural metadata of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryShape {
    pub op_kind: OpKind,
    /// Referenced tables, de-duplicated in order of appearance.
    pub tables: Vec<String>,
    /// 1..=10
    pub complexity: u8,
}

impl QueryShape {
    /// Shape used when the statement cannot be parsed.
    pub fn unknown() -> Self {
        Self {
            op_kind: OpKind::Unknown,
            tables: Vec::new(),
            complexity: 1,
        }
    }

    /// The first referenced table, or `"unknown"`.
    pub fn primary_table(&self) -> &str {
        self.tables.first().map(String::as_str).unwrap_or("unknown")
    }
}

/// Fingerprint plus shape, computed once per ingested statement.
#[derive(Debug, Clone)]
pub struct Analyzed {
    pub fingerprint: Fingerprint,
    pub normalized: String,
    pub shape: QueryShape,
}

/// Normalize, fingerprint and parse in one call. Never fails: unparsable
/// statements get [`QueryShape::unknown`].
pub fn analyze(sql: &str) -> Analyzed {
    let normalized = normalize(sql);
    let fingerprint = Fingerprint::from_normalized(&normalized);
    let shape = parse(sql).unwrap_or_else(|e| {
        tracing::trace!(error = %e, fingerprint = %fingerprint, "unparsable statement");
        QueryShape::unknown()
    });
    Analyzed {
        fingerprint,
        normalized,
        shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_literal_variants_share_fingerprint() {
        assert_eq!(
            Fingerprint::of("SELECT * FROM games WHERE id = 5"),
            Fingerprint::of("SELECT * FROM games WHERE id = 999")
        );
        assert_eq!(
            Fingerprint::of("select * from teams where name = 'Rovers'"),
            Fingerprint::of("select  *  from teams\nwhere name = $1")
        );
    }

    #[test]
    fn test_distinct_shapes_differ() {
        assert_ne!(
            Fingerprint::of("SELECT * FROM games"),
            Fingerprint::of("SELECT * FROM teams")
        );
        assert_ne!(
            Fingerprint::of("select id from games where id = 1"),
            Fingerprint::of("select id from games where home_id = 1")
        );
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = Fingerprint::of("select 1");
        assert!(fp.as_str().starts_with("q_"));
        assert!(
            fp.as_str()[2..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
        // Deterministic across calls.
        assert_eq!(fp, Fingerprint::of("select 1"));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u64::MAX), "3w5e11264sgsf");
    }

    #[test]
    fn test_analyze_falls_back_on_parse_error() {
        let a = analyze("select * from games where name = 'broken");
        assert_eq!(a.shape, QueryShape::unknown());
        assert_eq!(a.shape.primary_table(), "unknown");
        assert!(a.fingerprint.as_str().starts_with("q_"));
    }

    #[test]
    fn test_analyze_shape() {
        let a = analyze("select * from games g join teams t on t.id = g.home_id");
        assert_eq!(a.shape.op_kind, OpKind::Select);
        assert_eq!(a.shape.primary_table(), "games");
        assert_eq!(a.shape.complexity, 3);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_literals(
            id in any::<i64>(),
            name in "[a-zA-Z0-9 ']{0,24}",
            ids in prop::collection::vec(0u32..100_000, 1..20),
        ) {
            let quoted = name.replace('\'', "''");
            let list = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ");
            let a = format!(
                "select * from players where id = {id} and name = '{quoted}' and team_id in ({list})"
            );
            let b = "select * from players where id = $1 and name = $2 and team_id in ($3, $4)";
            prop_assert_eq!(Fingerprint::of(&a), Fingerprint::of(b));
        }

        #[test]
        fn prop_fingerprint_ignores_sign(n in any::<i64>()) {
            let a = format!(
                "select {n}, case when x > {n} then {n} else {n} end from t where y = {n} limit {n}"
            );
            let b = "select 1, case when x > 1 then 1 else 1 end from t where y = 1 limit 1";
            prop_assert_eq!(Fingerprint::of(&a), Fingerprint::of(b));
        }
    }
}
