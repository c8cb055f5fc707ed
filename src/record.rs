//! Schemaless record model and conversions between records and typed frames.
//!
//! Records are what the database driver speaks: ordered maps of field name to
//! loosely-typed value. Frames are what the engine computes with. Conversion
//! in both directions is schema-driven so nested list/struct columns and
//! binary identifier columns keep their declared types.

use crate::objectid::{is_objectid_hex, ObjectId};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use indexmap::IndexMap;
use polars::prelude::*;

/// A single field value, as handed to / received from the database driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    ObjectId(ObjectId),
    Array(Vec<Value>),
    Document(IndexMap<String, Value>),
}

/// An unordered mapping from field name to value (insertion-ordered in
/// practice so inserts are stable).
pub type Record = IndexMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Recursively re-encode 24-char hex strings (including inside arrays and
/// documents) into binary identifiers. Non-hex values pass through.
pub fn convert_objectids(value: Value) -> Value {
    match value {
        Value::String(s) if is_objectid_hex(&s) => match ObjectId::parse_hex(&s) {
            Ok(oid) => Value::ObjectId(oid),
            Err(_) => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(convert_objectids).collect()),
        Value::Document(doc) => Value::Document(
            doc.into_iter()
                .map(|(k, v)| (k, convert_objectids(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Convert a `[{k, v}, ...]` key-value array into a document. Entries without
/// both keys are skipped; non-array values pass through unchanged.
pub fn array_to_object(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut doc = IndexMap::new();
            for item in items {
                if let Value::Document(mut fields) = item {
                    if let (Some(Value::String(k)), Some(v)) =
                        (fields.shift_remove("k"), fields.shift_remove("v"))
                    {
                        doc.insert(k, v);
                    }
                }
            }
            Value::Document(doc)
        }
        other => other,
    }
}

/// Inverse of [`array_to_object`]: a document becomes a `[{k, v}, ...]` array.
pub fn object_to_array(value: Value) -> Value {
    match value {
        Value::Document(doc) => Value::Array(
            doc.into_iter()
                .map(|(k, v)| {
                    let mut entry = IndexMap::new();
                    entry.insert("k".to_string(), Value::String(k));
                    entry.insert("v".to_string(), v);
                    Value::Document(entry)
                })
                .collect(),
        ),
        other => other,
    }
}

/// Extract every row of a frame as a record. Nulls are preserved as
/// `Value::Null` so the insert-preparation step can drop or default them.
pub fn records_from_frame(df: &DataFrame) -> Result<Vec<Record>> {
    let height = df.height();
    let mut columns: Vec<(String, Vec<Value>)> = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        let series = col.as_materialized_series();
        columns.push((series.name().to_string(), column_values(series)?));
    }

    let mut records = Vec::with_capacity(height);
    for i in 0..height {
        let mut record = Record::new();
        for (name, values) in &columns {
            record.insert(name.clone(), values[i].clone());
        }
        records.push(record);
    }
    Ok(records)
}

/// Read a whole series into values, recursing through list and struct types.
fn column_values(series: &Series) -> Result<Vec<Value>> {
    let values = match series.dtype() {
        DataType::Boolean => series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Bool))
            .collect(),
        DataType::Int32 => series
            .i32()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Int32))
            .collect(),
        DataType::Int64 => series
            .i64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Int64))
            .collect(),
        DataType::UInt32 | DataType::UInt64 | DataType::Int16 | DataType::Int8 => {
            let cast = series.cast(&DataType::Int64)?;
            cast.i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::Int64))
                .collect()
        }
        DataType::Float32 => series
            .f32()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |f| Value::Float64(f as f64)))
            .collect(),
        DataType::Float64 => series
            .f64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Float64))
            .collect(),
        DataType::String => series
            .str()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
            .collect(),
        DataType::Binary => series
            .binary()?
            .into_iter()
            .map(|v| match v {
                Some(bytes) if bytes.len() == 12 => {
                    let mut buf = [0u8; 12];
                    buf.copy_from_slice(bytes);
                    Value::ObjectId(ObjectId::from_bytes(buf))
                }
                Some(bytes) => Value::String(hex::encode(bytes)),
                None => Value::Null,
            })
            .collect(),
        DataType::Datetime(_, _) => {
            let ms = series.cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
            let phys = ms.cast(&DataType::Int64)?;
            phys.i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::DateTime))
                .collect()
        }
        DataType::Date => {
            let ms = series.cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
            let phys = ms.cast(&DataType::Int64)?;
            phys.i64()?
                .into_iter()
                .map(|v| v.map_or(Value::Null, Value::DateTime))
                .collect()
        }
        DataType::List(_) => {
            let mut out = Vec::with_capacity(series.len());
            for inner in series.list()?.into_iter() {
                match inner {
                    Some(inner) => out.push(Value::Array(column_values(&inner)?)),
                    None => out.push(Value::Null),
                }
            }
            out
        }
        DataType::Struct(_) => {
            let ca = series.struct_()?;
            let fields = ca.fields_as_series();
            let mut field_values = Vec::with_capacity(fields.len());
            for field in &fields {
                field_values.push((field.name().to_string(), column_values(field)?));
            }
            let validity = series.is_null();
            let mut out = Vec::with_capacity(series.len());
            for i in 0..series.len() {
                if validity.get(i).unwrap_or(false) {
                    out.push(Value::Null);
                    continue;
                }
                let mut doc = IndexMap::new();
                for (name, values) in &field_values {
                    doc.insert(name.clone(), values[i].clone());
                }
                out.push(Value::Document(doc));
            }
            out
        }
        DataType::Null => vec![Value::Null; series.len()],
        other => {
            return Err(eyre!(
                "Unsupported column type {:?} for column {}",
                other,
                series.name()
            ))
        }
    };
    Ok(values)
}

/// Build a typed frame from driver records according to the given schema.
/// Missing fields become nulls; extra record fields are ignored.
pub fn frame_from_records(schema: &Schema, records: &[Record]) -> Result<DataFrame> {
    if records.is_empty() {
        return Ok(DataFrame::empty_with_schema(schema));
    }

    let mut columns: Vec<Column> = Vec::with_capacity(schema.len());
    for (name, dtype) in schema.iter() {
        let values: Vec<&Value> = records
            .iter()
            .map(|r| r.get(name.as_str()).unwrap_or(&Value::Null))
            .collect();
        let series = series_from_values(name.as_str(), dtype, &values)?;
        columns.push(series.into_column());
    }
    DataFrame::new(columns).map_err(Into::into)
}

fn series_from_values(name: &str, dtype: &DataType, values: &[&Value]) -> Result<Series> {
    let name: PlSmallStr = name.into();
    let series = match dtype {
        DataType::Boolean => BooleanChunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            }),
        )
        .into_series(),
        DataType::Int32 => Int32Chunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::Int32(n) => Some(*n),
                Value::Int64(n) => Some(*n as i32),
                Value::Float64(f) => Some(*f as i32),
                _ => None,
            }),
        )
        .into_series(),
        DataType::Int64 => Int64Chunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::Int64(n) => Some(*n),
                Value::Int32(n) => Some(*n as i64),
                Value::Float64(f) => Some(*f as i64),
                _ => None,
            }),
        )
        .into_series(),
        DataType::Float32 => Float32Chunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::Float64(f) => Some(*f as f32),
                Value::Int32(n) => Some(*n as f32),
                Value::Int64(n) => Some(*n as f32),
                _ => None,
            }),
        )
        .into_series(),
        DataType::Float64 => Float64Chunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::Float64(f) => Some(*f),
                Value::Int32(n) => Some(*n as f64),
                Value::Int64(n) => Some(*n as f64),
                _ => None,
            }),
        )
        .into_series(),
        DataType::String => StringChunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::String(s) => Some(s.as_str()),
                _ => None,
            }),
        )
        .into_series(),
        DataType::Binary => BinaryChunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::ObjectId(oid) => Some(oid.bytes().as_slice()),
                _ => None,
            }),
        )
        .into_series(),
        DataType::Datetime(_, _) => Int64Chunked::from_iter_options(
            name,
            values.iter().map(|v| match v {
                Value::DateTime(ms) => Some(*ms),
                Value::Int64(ms) => Some(*ms),
                _ => None,
            }),
        )
        .into_datetime(TimeUnit::Milliseconds, None)
        .into_series(),
        DataType::List(inner) => {
            let mut rows: Vec<Option<Series>> = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    Value::Array(items) => {
                        let refs: Vec<&Value> = items.iter().collect();
                        rows.push(Some(series_from_values("", inner, &refs)?));
                    }
                    _ => rows.push(None),
                }
            }
            let mut ca: ListChunked = rows.into_iter().collect();
            ca.rename(name);
            ca.into_series().cast(dtype)?
        }
        DataType::Struct(fields) => {
            let mut field_series = Vec::with_capacity(fields.len());
            for field in fields {
                let field_values: Vec<&Value> = values
                    .iter()
                    .map(|v| match v {
                        Value::Document(doc) => doc.get(field.name().as_str()).unwrap_or(&Value::Null),
                        _ => &Value::Null,
                    })
                    .collect();
                field_series.push(series_from_values(
                    field.name().as_str(),
                    field.dtype(),
                    &field_values,
                )?);
            }
            let validity: Bitmap = values.iter().map(|v| matches!(v, Value::Document(_))).collect();
            let ca = StructChunked::from_series(name, values.len(), field_series.iter())?;
            ca.with_outer_validity(Some(validity)).into_series()
        }
        other => return Err(eyre!("Unsupported schema type {:?} for field {}", other, name)),
    };
    Ok(series)
}
