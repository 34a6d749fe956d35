//! Sort order and comparator vocabulary for listings and keyset predicates.

use crate::types::SurrogateKey;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing a [`SortOrder`] or [`Comparator`] fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: {input:?}")]
pub struct ParseOrderingError {
    what: &'static str,
    input: String,
}

/// Direction of a listing, always by surrogate key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Smallest key first.
    #[default]
    Asc,
    /// Largest key first.
    Desc,
}

impl SortOrder {
    /// Canonical lowercase rendering (`asc` / `desc`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// Keyword used in rendered `ORDER BY` clauses.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = ParseOrderingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Err(ParseOrderingError {
                what: "sort order",
                input: s.to_string(),
            })
        }
    }
}

/// Relational operator of a keyset predicate `key <op> reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl Comparator {
    /// All comparators, in declaration order.
    pub const ALL: [Self; 6] = [Self::Eq, Self::Neq, Self::Lt, Self::Lte, Self::Gt, Self::Gte];

    /// Canonical symbolic rendering.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }

    /// Evaluates `key <self> reference`.
    #[must_use]
    pub fn matches(self, key: SurrogateKey, reference: SurrogateKey) -> bool {
        match self {
            Self::Eq => key == reference,
            Self::Neq => key != reference,
            Self::Lt => key < reference,
            Self::Lte => key <= reference,
            Self::Gt => key > reference,
            Self::Gte => key >= reference,
        }
    }

    /// Smallest contiguous key range containing every match.
    ///
    /// `Neq` is not contiguous, so it yields the full range and callers must
    /// still filter with [`Comparator::matches`].
    #[must_use]
    pub fn key_range(self, reference: SurrogateKey) -> (Bound<SurrogateKey>, Bound<SurrogateKey>) {
        match self {
            Self::Eq => (Bound::Included(reference), Bound::Included(reference)),
            Self::Neq => (Bound::Unbounded, Bound::Unbounded),
            Self::Lt => (Bound::Unbounded, Bound::Excluded(reference)),
            Self::Lte => (Bound::Unbounded, Bound::Included(reference)),
            Self::Gt => (Bound::Excluded(reference), Bound::Unbounded),
            Self::Gte => (Bound::Included(reference), Bound::Unbounded),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Comparator {
    type Err = ParseOrderingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Neq),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            _ => Err(ParseOrderingError {
                what: "comparator",
                input: s.to_string(),
            }),
        }
    }
}
