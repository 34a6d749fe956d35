//! Row encoding.
//!
//! Rows are CBOR maps produced by serde. An ingestion stream for
//! `copy_from` is a plain concatenation of such maps.

use crate::error::{StorageError, StorageResult};
use crate::types::SurrogateKey;
use bytes::Bytes;
use ciborium::value::{Integer, Value as Cbor};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, BufRead, BufReader, Read, Write};

/// Column holding the surrogate key inside an encoded row.
pub const KEY_COLUMN: &str = "id";

fn decode_error(err: ciborium::de::Error<io::Error>) -> StorageError {
    match err {
        ciborium::de::Error::Io(io) => StorageError::Io(io),
        other => StorageError::codec(other.to_string()),
    }
}

fn encode_error(err: ciborium::ser::Error<io::Error>) -> StorageError {
    match err {
        ciborium::ser::Error::Io(io) => StorageError::Io(io),
        other => StorageError::codec(other.to_string()),
    }
}

/// Encodes a model into row bytes.
pub fn encode_row<M: Serialize + ?Sized>(model: &M) -> StorageResult<Bytes> {
    let mut buf = Vec::new();
    ciborium::into_writer(model, &mut buf).map_err(encode_error)?;
    Ok(Bytes::from(buf))
}

/// Decodes row bytes into a model.
pub fn decode_row<M: DeserializeOwned>(bytes: &[u8]) -> StorageResult<M> {
    ciborium::from_reader(bytes).map_err(decode_error)
}

/// Writes models as an ingestion stream and returns the number of rows.
pub fn write_rows<'a, W, M, I>(mut writer: W, models: I) -> StorageResult<u64>
where
    W: Write,
    M: Serialize + 'a,
    I: IntoIterator<Item = &'a M>,
{
    let mut rows = 0u64;
    for model in models {
        ciborium::into_writer(model, &mut writer).map_err(encode_error)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

/// An untyped row read from an ingestion stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    fields: Vec<(Cbor, Cbor)>,
}

impl RawRow {
    /// Builds a row from a decoded CBOR value, which must be a map.
    pub fn from_cbor(value: Cbor) -> StorageResult<Self> {
        match value {
            Cbor::Map(fields) => Ok(Self { fields }),
            _ => Err(StorageError::codec("row is not a map")),
        }
    }

    fn key_field(&self) -> Option<usize> {
        self.fields
            .iter()
            .position(|(name, _)| name.as_text() == Some(KEY_COLUMN))
    }

    /// Returns the explicit key carried by the row.
    ///
    /// A missing, null or zero `id` column means the engine assigns the key.
    pub fn key(&self) -> StorageResult<Option<SurrogateKey>> {
        let Some(idx) = self.key_field() else {
            return Ok(None);
        };
        match &self.fields[idx].1 {
            Cbor::Null => Ok(None),
            Cbor::Integer(raw) => {
                let key = u64::try_from(*raw)
                    .map_err(|_| StorageError::codec("id column is negative"))?;
                Ok(Some(SurrogateKey::new(key)).filter(|k| k.is_assigned()))
            }
            _ => Err(StorageError::codec("id column is not an integer")),
        }
    }

    /// Writes `key` into the `id` column, adding the column if missing.
    pub fn set_key(&mut self, key: SurrogateKey) {
        let value = Cbor::Integer(Integer::from(key.as_u64()));
        match self.key_field() {
            Some(idx) => self.fields[idx].1 = value,
            None => self.fields.push((Cbor::Text(KEY_COLUMN.to_string()), value)),
        }
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the row back into bytes.
    pub fn encode(&self) -> StorageResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(&Cbor::Map(self.fields.clone()), &mut buf).map_err(encode_error)?;
        Ok(Bytes::from(buf))
    }
}

/// Iterator over the rows of an ingestion stream.
///
/// Yields `Err` for a malformed row; the stream should be abandoned after
/// the first error.
pub struct RowReader<R> {
    inner: BufReader<R>,
    rows_read: u64,
}

impl<R: Read> RowReader<R> {
    /// Wraps `reader` with a buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity.max(1), reader),
            rows_read: 0,
        }
    }

    /// Number of rows yielded so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn read_row(&mut self) -> StorageResult<Option<RawRow>> {
        if self.inner.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let value: Cbor = ciborium::from_reader(&mut self.inner).map_err(decode_error)?;
        self.rows_read += 1;
        RawRow::from_cbor(value).map(Some)
    }
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = StorageResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_row().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Transfer {
        id: SurrogateKey,
        from: String,
        amount: i64,
    }

    fn transfer(id: u64, amount: i64) -> Transfer {
        Transfer {
            id: SurrogateKey::new(id),
            from: "tz1".to_string(),
            amount,
        }
    }

    #[test]
    fn encoded_row_decodes_to_same_model() {
        let t = transfer(4, -20);
        let bytes = encode_row(&t).unwrap();
        assert_eq!(decode_row::<Transfer>(&bytes).unwrap(), t);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let bytes = encode_row(&"just text").unwrap();
        let err = decode_row::<Transfer>(&bytes).unwrap_err();
        assert!(matches!(err, StorageError::Codec { .. }));
    }

    #[test]
    fn stream_of_rows() {
        let rows = vec![transfer(0, 1), transfer(7, 2), transfer(0, 3)];
        let mut stream = Vec::new();
        assert_eq!(write_rows(&mut stream, &rows).unwrap(), 3);

        let mut reader = RowReader::with_capacity(8, stream.as_slice());
        let keys: Vec<_> = reader
            .by_ref()
            .map(|row| row.unwrap().key().unwrap())
            .collect();
        assert_eq!(keys, vec![None, Some(SurrogateKey::new(7)), None]);
        assert_eq!(reader.rows_read(), 3);
    }

    #[test]
    fn empty_stream_has_no_rows() {
        let mut reader = RowReader::with_capacity(16, io::empty());
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut stream = Vec::new();
        write_rows(&mut stream, &[transfer(1, 1)]).unwrap();
        stream.truncate(stream.len() - 2);

        let mut reader = RowReader::with_capacity(64, stream.as_slice());
        assert!(reader.next().unwrap().is_err());
    }

    #[test]
    fn set_key_adds_missing_column() {
        let mut row = RawRow::from_cbor(Cbor::Map(vec![(
            Cbor::Text("amount".into()),
            Cbor::Integer(5.into()),
        )]))
        .unwrap();
        assert_eq!(row.key().unwrap(), None);

        row.set_key(SurrogateKey::new(11));
        assert_eq!(row.key().unwrap(), Some(SurrogateKey::new(11)));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn non_map_row_is_rejected() {
        assert!(RawRow::from_cbor(Cbor::Bool(true)).is_err());
        let bad_key = RawRow::from_cbor(Cbor::Map(vec![(
            Cbor::Text("id".into()),
            Cbor::Text("seven".into()),
        )]))
        .unwrap();
        assert!(bad_key.key().is_err());
    }
}
