//! Row ↔ persisted record codec.
//!
//! A persisted record is a CBOR map `{ "id": u64, "fields": { column: value } }`
//! keyed by column name, so records stay readable if columns are reordered.
//! Values are coerced to their persisted form:
//!
//! | column type | persisted as |
//! |---|---|
//! | `Bytes` | lowercase hex text |
//! | `DateTime` | integer milliseconds |
//! | others | native CBOR |
//!
//! Index keys are encoded as CBOR arrays of the same coerced values, which
//! gives identical bytes for identical keys.

use crate::error::{CoreError, CoreResult};
use crate::row::Row;
use crate::schema::{ColumnType, IndexKey, TableSchema};
use crate::types::RowId;
use crate::value::Value;
use ciborium::value::{Integer, Value as Cbor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    id: u64,
    fields: BTreeMap<String, Cbor>,
}

/// Encodes and decodes rows of one table.
#[derive(Debug, Clone, Copy)]
pub struct RowCodec<'a> {
    schema: &'a TableSchema,
}

impl<'a> RowCodec<'a> {
    /// Creates a codec for a table.
    #[must_use]
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    /// Serializes a row into a persisted record.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the row does not match the table's columns.
    pub fn encode(&self, row: &Row) -> CoreResult<Vec<u8>> {
        let columns = self.schema.columns();
        if row.values().len() != columns.len() {
            return Err(CoreError::codec(format!(
                "{} has {} values, {} expects {}",
                row.id(),
                row.values().len(),
                self.schema.name(),
                columns.len()
            )));
        }
        let fields = columns
            .iter()
            .zip(row.values())
            .map(|(c, v)| (c.name.clone(), to_persisted(v)))
            .collect();
        let record = PersistedRecord {
            id: row.id().as_u64(),
            fields,
        };
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&record, &mut bytes)
            .map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserializes a persisted record.
    ///
    /// Missing nullable columns decode as `Null`.
    ///
    /// # Errors
    ///
    /// Returns a codec error for malformed bytes, a record whose id differs
    /// from `expected`, or a field that cannot be coerced to its column type.
    pub fn decode(&self, expected: RowId, bytes: &[u8]) -> CoreResult<Row> {
        let mut record: PersistedRecord =
            ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))?;
        if record.id != expected.as_u64() {
            return Err(CoreError::codec(format!(
                "record id {} stored under {}",
                record.id, expected
            )));
        }
        let values = self
            .schema
            .columns()
            .iter()
            .map(|c| match record.fields.remove(&c.name) {
                Some(field) => from_persisted(c.ty, field)
                    .map_err(|e| CoreError::codec(format!("column {}: {e}", c.name))),
                None if c.nullable => Ok(Value::Null),
                None => Err(CoreError::codec(format!("missing column {}", c.name))),
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Row::new(expected, values))
    }
}

/// Encodes an index key to the bytes stored by the persistence adapter.
///
/// # Errors
///
/// Returns a codec error if serialization fails.
pub fn encode_index_key(key: &IndexKey) -> CoreResult<Vec<u8>> {
    let array = Cbor::Array(key.0.iter().map(to_persisted).collect());
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&array, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(bytes)
}

fn to_persisted(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(i) | Value::DateTime(i) => Cbor::Integer(Integer::from(*i)),
        Value::Text(s) => Cbor::Text(s.clone()),
        Value::Bytes(b) => Cbor::Text(hex::encode(b)),
    }
}

fn from_persisted(ty: ColumnType, field: Cbor) -> Result<Value, String> {
    match (ty, field) {
        (_, Cbor::Null) => Ok(Value::Null),
        (ColumnType::Bool, Cbor::Bool(b)) => Ok(Value::Bool(b)),
        (ColumnType::Integer, Cbor::Integer(i)) => to_i64(i).map(Value::Integer),
        (ColumnType::DateTime, Cbor::Integer(i)) => to_i64(i).map(Value::DateTime),
        (ColumnType::Text, Cbor::Text(s)) => Ok(Value::Text(s)),
        (ColumnType::Bytes, Cbor::Text(s)) => {
            hex::decode(&s).map(Value::Bytes).map_err(|e| e.to_string())
        }
        (ty, other) => Err(format!("cannot read {other:?} as {ty:?}")),
    }
}

fn to_i64(i: Integer) -> Result<i64, String> {
    i64::try_from(i).map_err(|_| "integer out of range".to_string())
}
