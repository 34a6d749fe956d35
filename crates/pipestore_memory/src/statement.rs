//! Statement grammar understood by `exec` and `copy_from`.
//!
//! ```text
//! DELETE FROM <collection> [WHERE id <op> <operand>]
//! TRUNCATE [TABLE] <collection>
//! COPY <collection> FROM STDIN
//! ```
//!
//! Keywords are case-insensitive and tokens are separated by whitespace.
//! `<collection>` and `<operand>` may be a `$n` placeholder bound to the
//! n-th parameter (1-based); collections bind to text, operands to
//! non-negative integers. A trailing `;` is ignored.

use crate::store::KeyFilter;
use pipestore_core::codec::KEY_COLUMN;
use pipestore_core::{Comparator, StorageError, StorageResult, SurrogateKey, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Statement {
    Delete {
        collection: String,
        filter: Option<KeyFilter>,
    },
    Truncate {
        collection: String,
    },
    Copy {
        collection: String,
    },
}

impl Statement {
    pub(crate) fn parse(query: &str, params: &[Value]) -> StorageResult<Self> {
        let body = query.trim().trim_end_matches(';');
        let mut parser = Parser {
            tokens: body.split_whitespace().collect(),
            pos: 0,
            params,
        };
        let statement = parser.statement()?;
        parser.finish()?;
        Ok(statement)
    }
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
    params: &'a [Value],
}

impl<'a> Parser<'a> {
    fn statement(&mut self) -> StorageResult<Statement> {
        let verb = self.next("a statement")?;
        if verb.eq_ignore_ascii_case("DELETE") {
            self.keyword("FROM")?;
            let collection = self.collection()?;
            let filter = if self.peek_keyword("WHERE") {
                self.pos += 1;
                Some(self.filter()?)
            } else {
                None
            };
            Ok(Statement::Delete { collection, filter })
        } else if verb.eq_ignore_ascii_case("TRUNCATE") {
            if self.peek_keyword("TABLE") {
                self.pos += 1;
            }
            Ok(Statement::Truncate {
                collection: self.collection()?,
            })
        } else if verb.eq_ignore_ascii_case("COPY") {
            let collection = self.collection()?;
            self.keyword("FROM")?;
            self.keyword("STDIN")?;
            Ok(Statement::Copy { collection })
        } else {
            Err(StorageError::invalid_statement(format!(
                "unsupported statement `{verb}`"
            )))
        }
    }

    fn filter(&mut self) -> StorageResult<KeyFilter> {
        let column = self.next("a column")?;
        if column != KEY_COLUMN {
            return Err(StorageError::invalid_statement(format!(
                "only `{KEY_COLUMN}` can be filtered on, got `{column}`"
            )));
        }
        let op = self.next("a comparator")?;
        let comparator = op
            .parse::<Comparator>()
            .map_err(|e| StorageError::invalid_statement(e.to_string()))?;
        let reference = self.operand()?;
        Ok(KeyFilter {
            comparator,
            reference,
        })
    }

    fn collection(&mut self) -> StorageResult<String> {
        let token = self.next("a collection name")?;
        let name = match self.placeholder(token)? {
            Some(value) => value
                .as_text()
                .ok_or_else(|| {
                    StorageError::invalid_statement(format!(
                        "{token} must bind text, got {}",
                        value.type_name()
                    ))
                })?
                .to_string(),
            None => token.to_string(),
        };
        if is_identifier(&name) {
            Ok(name)
        } else {
            Err(StorageError::invalid_statement(format!(
                "invalid collection name `{name}`"
            )))
        }
    }

    fn operand(&mut self) -> StorageResult<SurrogateKey> {
        let token = self.next("a key")?;
        let key = match self.placeholder(token)? {
            Some(value) => value.as_u64().ok_or_else(|| {
                StorageError::invalid_statement(format!(
                    "{token} must bind a non-negative integer, got {}",
                    value.type_name()
                ))
            })?,
            None => token.parse::<u64>().map_err(|_| {
                StorageError::invalid_statement(format!("invalid key literal `{token}`"))
            })?,
        };
        Ok(SurrogateKey::new(key))
    }

    fn placeholder(&self, token: &str) -> StorageResult<Option<&'a Value>> {
        let Some(index) = token.strip_prefix('$') else {
            return Ok(None);
        };
        index
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .and_then(|n| self.params.get(n - 1))
            .map(Some)
            .ok_or_else(|| {
                StorageError::invalid_statement(format!(
                    "placeholder {token} has no parameter ({} supplied)",
                    self.params.len()
                ))
            })
    }

    fn next(&mut self, expected: &str) -> StorageResult<&'a str> {
        let token = self.tokens.get(self.pos).copied().ok_or_else(|| {
            StorageError::invalid_statement(format!("expected {expected}, found end of statement"))
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.tokens
            .get(self.pos)
            .is_some_and(|t| t.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> StorageResult<()> {
        let token = self.next(keyword)?;
        if token.eq_ignore_ascii_case(keyword) {
            Ok(())
        } else {
            Err(StorageError::invalid_statement(format!(
                "expected {keyword}, found `{token}`"
            )))
        }
    }

    fn finish(&self) -> StorageResult<()> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(extra) => Err(StorageError::invalid_statement(format!(
                "unexpected `{extra}`"
            ))),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> StorageResult<Statement> {
        Statement::parse(query, &[])
    }

    #[test]
    fn delete_all() {
        assert_eq!(
            parse("DELETE FROM blocks").unwrap(),
            Statement::Delete {
                collection: "blocks".into(),
                filter: None,
            }
        );
    }

    #[test]
    fn delete_with_bound_key() {
        let stmt = Statement::parse("delete from blocks where id >= $1;", &[Value::from(100u64)]).unwrap();
        assert_eq!(
            stmt,
            Statement::Delete {
                collection: "blocks".into(),
                filter: Some(KeyFilter {
                    comparator: Comparator::Gte,
                    reference: SurrogateKey::new(100),
                }),
            }
        );
    }

    #[test]
    fn delete_with_literal_key() {
        let Statement::Delete { filter, .. } = parse("DELETE FROM ops WHERE id != 7").unwrap() else {
            panic!("expected delete");
        };
        assert_eq!(
            filter,
            Some(KeyFilter {
                comparator: Comparator::Neq,
                reference: SurrogateKey::new(7),
            })
        );
    }

    #[test]
    fn truncate_forms() {
        let expected = Statement::Truncate {
            collection: "ops".into(),
        };
        assert_eq!(parse("TRUNCATE ops").unwrap(), expected);
        assert_eq!(parse("truncate table ops").unwrap(), expected);
    }

    #[test]
    fn copy_with_bound_collection() {
        let stmt = Statement::parse("COPY $1 FROM STDIN", &[Value::from("operations")]).unwrap();
        assert_eq!(
            stmt,
            Statement::Copy {
                collection: "operations".into(),
            }
        );
    }

    #[test]
    fn rejects_malformed_statements() {
        for query in [
            "",
            "SELECT * FROM blocks",
            "DELETE blocks",
            "DELETE FROM",
            "DELETE FROM blocks WHERE level > 3",
            "DELETE FROM blocks WHERE id ~ 3",
            "DELETE FROM blocks WHERE id > -1",
            "DELETE FROM blocks WHERE id > 3 AND id < 9",
            "TRUNCATE \"blocks\"",
            "COPY blocks TO STDOUT",
        ] {
            let err = parse(query).unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidStatement { .. }),
                "{query}: {err}"
            );
        }
    }

    #[test]
    fn rejects_bad_placeholders() {
        assert!(Statement::parse("DELETE FROM blocks WHERE id > $2", &[Value::from(1u64)]).is_err());
        assert!(Statement::parse("DELETE FROM blocks WHERE id > $0", &[Value::from(1u64)]).is_err());
        assert!(Statement::parse("DELETE FROM blocks WHERE id > $1", &[Value::from("x")]).is_err());
        assert!(Statement::parse("TRUNCATE $1", &[Value::from(3u64)]).is_err());
        assert!(Statement::parse("TRUNCATE $1", &[Value::from("a b")]).is_err());
    }
}
