//! Dynamic row decoding.
//!
//! Rows come back with arbitrary column sets, so each column is decoded
//! into a JSON value by its Postgres type name. Timestamps render as
//! RFC 3339 strings so the cache wire format stays plain JSON.

use serde_json::{Number, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::entity::FieldMap;

use super::DbError;

pub(crate) fn decode_row(row: &PgRow) -> Result<FieldMap, DbError> {
    let mut map = FieldMap::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())
            .map_err(|err| DbError::decode(format!("column `{}`: {err}", column.name())))?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn number(n: impl Into<Number>) -> Value {
    Value::Number(n.into())
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn decode_column(row: &PgRow, ordinal: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "INT2" => row
            .try_get::<Option<i16>, _>(ordinal)?
            .map_or(Value::Null, number),
        "INT4" => row
            .try_get::<Option<i32>, _>(ordinal)?
            .map_or(Value::Null, number),
        "INT8" => row
            .try_get::<Option<i64>, _>(ordinal)?
            .map_or(Value::Null, number),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(ordinal)?
            .map_or(Value::Null, |f| float(f64::from(f))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(ordinal)?
            .map_or(Value::Null, float),
        "BOOL" => row
            .try_get::<Option<bool>, _>(ordinal)?
            .map_or(Value::Null, Value::Bool),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => row
            .try_get::<Option<String>, _>(ordinal)?
            .map_or(Value::Null, Value::String),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(ordinal)?
            .map_or(Value::Null, |u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<OffsetDateTime>, _>(ordinal)?
            .map_or(Value::Null, |ts| {
                Value::String(ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string()))
            }),
        "TIMESTAMP" => row
            .try_get::<Option<PrimitiveDateTime>, _>(ordinal)?
            .map_or(Value::Null, |ts| Value::String(ts.to_string())),
        "DATE" => row
            .try_get::<Option<Date>, _>(ordinal)?
            .map_or(Value::Null, |d| Value::String(d.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(ordinal)?
            .unwrap_or(Value::Null),
        "TEXT[]" | "VARCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(ordinal)?
            .map_or(Value::Null, |v| {
                Value::Array(v.into_iter().map(Value::String).collect())
            }),
        "INT4[]" => row
            .try_get::<Option<Vec<i32>>, _>(ordinal)?
            .map_or(Value::Null, |v| {
                Value::Array(v.into_iter().map(number).collect())
            }),
        "INT8[]" => row
            .try_get::<Option<Vec<i64>>, _>(ordinal)?
            .map_or(Value::Null, |v| {
                Value::Array(v.into_iter().map(number).collect())
            }),
        "FLOAT8[]" => row
            .try_get::<Option<Vec<f64>>, _>(ordinal)?
            .map_or(Value::Null, |v| {
                Value::Array(v.into_iter().map(float).collect())
            }),
        other => {
            // Best effort for uncommon types before giving up as NULL.
            if let Ok(v) = row.try_get::<Option<String>, _>(ordinal) {
                v.map_or(Value::Null, Value::String)
            } else if let Ok(v) = row.try_get::<Option<i64>, _>(ordinal) {
                v.map_or(Value::Null, number)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(ordinal) {
                v.map_or(Value::Null, float)
            } else {
                debug!(column_type = other, "undecodable column type, storing null");
                Value::Null
            }
        }
    };
    Ok(value)
}
