//! Tagged cell values and the coercion/formatting pair used by the criteria
//! compiler and the merge engine.
//!
//! Matrix cells arrive from loosely-typed spreadsheet frontends, so
//! [`coerce`] is deliberately total: a cell that fails to parse for its
//! column's logical type degrades to the raw value instead of erroring.
//! [`format_value`] is the inverse direction, producing the display text the
//! compiler also uses to decide whether a criterion cell is empty.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::{Error, Result};
use crate::schema::Catalog;

/// `YYYY-MM-DD`.
pub(crate) const DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");
/// `HH:MM:SS`.
pub(crate) const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");
/// `YYYY-MM-DD HH:MM:SS`.
pub(crate) const DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Tokens accepted as `true` by boolean coercion, compared case-insensitively.
const TRUTHY_TOKENS: [&str; 6] = ["true", "1", "yes", "y", "sim", "s"];

/// Logical type family of a column, derived from its declared SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    /// Structured JSON payloads.
    Json,
    /// Date plus time of day.
    DateTime,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Signed integers.
    Integer,
    /// Floating point / numeric / decimal.
    Float,
    /// Booleans.
    Boolean,
    /// Everything else, kept as text.
    Text,
}

impl LogicalType {
    /// Maps a declared SQL type (e.g. `VARCHAR(50)`, `TIMESTAMP`) onto its
    /// family by substring, most specific family first so `DATETIME` does
    /// not land in the date branch.
    pub fn from_declared(declared: &str) -> Self {
        let d = declared.to_ascii_lowercase();
        if d.contains("json") {
            LogicalType::Json
        } else if d.contains("datetime") || d.contains("timestamp") {
            LogicalType::DateTime
        } else if d.contains("date") {
            LogicalType::Date
        } else if d.contains("time") {
            LogicalType::Time
        } else if d.contains("bool") {
            LogicalType::Boolean
        } else if d.contains("int") {
            LogicalType::Integer
        } else if ["float", "double", "numeric", "real", "decimal"]
            .iter()
            .any(|t| d.contains(t))
        {
            LogicalType::Float
        } else {
            LogicalType::Text
        }
    }
}

/// A single matrix cell, tagged with its runtime type.
///
/// The tagged union replaces the duck typing of spreadsheet cells: every
/// value flowing through the compiler, merge engine, and storage driver is
/// one of these variants, with [`coerce`] as the only place raw input is
/// reinterpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL / absent cell.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Calendar date.
    Date(time::Date),
    /// Time of day.
    Time(time::Time),
    /// Date plus time of day, no zone.
    DateTime(time::PrimitiveDateTime),
    /// Structured JSON payload.
    Json(serde_json::Value),
}

impl Value {
    /// True for the `Null` variant.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Orders two values when their types admit an ordering, coercing
    /// between the integer and float families. Mixed or unordered types
    /// return `None` and comparison predicates treat that as no match.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with integer/float cross-family coercion. `Null` equals
    /// only `Null`; predicate evaluation filters nulls out before calling
    /// this, matching SQL comparison semantics.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match self.compare(other) {
            Some(ord) => ord == Ordering::Equal,
            None => self == other,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => t.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::Json(j) => j.to_string().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => match d.format(DATE_FORMAT) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => Err(fmt::Error),
            },
            Value::Time(t) => match t.format(TIME_FORMAT) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => Err(fmt::Error),
            },
            Value::DateTime(dt) => match dt.format(DATETIME_FORMAT) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => Err(fmt::Error),
            },
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => {
                serializer.serialize_str(&self.to_string())
            }
            Value::Json(j) => j.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CellVisitor;

        impl<'de> Visitor<'de> for CellVisitor {
            type Value = Value;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a JSON scalar, array, or object")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
                if let Ok(i) = i64::try_from(v) {
                    Ok(Value::Int(i))
                } else {
                    Ok(Value::Float(v as f64))
                }
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
                Ok(Value::Text(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
                Ok(Value::Text(v))
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_seq<A>(self, seq: A) -> std::result::Result<Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let json =
                    serde_json::Value::deserialize(de::value::SeqAccessDeserializer::new(seq))?;
                Ok(Value::Json(json))
            }

            fn visit_map<A>(self, map: A) -> std::result::Result<Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let json =
                    serde_json::Value::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(Value::Json(json))
            }
        }

        deserializer.deserialize_any(CellVisitor)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            container => Value::Json(container),
        }
    }
}

/// Converts a raw cell into its column's logical type.
///
/// Total by design: untrusted spreadsheet data must never abort a whole
/// matrix, so any parse failure returns the raw value unchanged.
pub fn coerce(raw: Value, ty: LogicalType) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    match ty {
        LogicalType::Json => match raw {
            Value::Json(_) => raw,
            Value::Text(ref s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(parsed) => Value::Json(parsed),
                Err(_) => raw,
            },
            other => other,
        },
        LogicalType::Integer => match raw {
            Value::Int(_) => raw,
            Value::Bool(b) => Value::Int(i64::from(b)),
            Value::Float(f) => Value::Int(f.trunc() as i64),
            Value::Text(ref s) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => raw,
            },
            other => other,
        },
        LogicalType::Float => match raw {
            Value::Float(_) => raw,
            Value::Int(i) => Value::Float(i as f64),
            Value::Bool(b) => Value::Float(f64::from(u8::from(b))),
            Value::Text(ref s) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => raw,
            },
            other => other,
        },
        LogicalType::Boolean => match raw {
            Value::Bool(_) => raw,
            Value::Int(i) => Value::Bool(i != 0),
            Value::Float(f) => Value::Bool(f != 0.0),
            Value::Text(ref s) => {
                let token = s.trim().to_ascii_lowercase();
                Value::Bool(TRUTHY_TOKENS.contains(&token.as_str()))
            }
            _ => Value::Bool(false),
        },
        LogicalType::Date => match raw {
            Value::Date(_) => raw,
            Value::DateTime(dt) => Value::Date(dt.date()),
            Value::Text(ref s) => match time::Date::parse(s.trim(), DATE_FORMAT) {
                Ok(d) => Value::Date(d),
                Err(_) => raw,
            },
            other => other,
        },
        LogicalType::Time => match raw {
            Value::Time(_) => raw,
            Value::DateTime(dt) => Value::Time(dt.time()),
            Value::Text(ref s) => match time::Time::parse(s.trim(), TIME_FORMAT) {
                Ok(t) => Value::Time(t),
                Err(_) => raw,
            },
            other => other,
        },
        LogicalType::DateTime => match raw {
            Value::DateTime(_) => raw,
            Value::Text(ref s) => {
                match time::PrimitiveDateTime::parse(s.trim(), DATETIME_FORMAT) {
                    Ok(dt) => Value::DateTime(dt),
                    Err(_) => raw,
                }
            }
            other => other,
        },
        LogicalType::Text => raw,
    }
}

/// Renders a value as display text for its logical type.
///
/// Integers pick up `.` thousands separators, floats one decimal with
/// `,`/`.` locale-style separators, JSON arrays join with `"; "`, null is
/// the empty string, everything else goes through [`Value`]'s `Display`.
pub fn format_value(value: &Value, ty: LogicalType) -> String {
    if value.is_null() {
        return String::new();
    }
    match ty {
        LogicalType::Json => match value {
            Value::Json(serde_json::Value::Array(items)) => join_json_items(items),
            Value::Json(other) => other.to_string(),
            Value::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(serde_json::Value::Array(items)) => join_json_items(&items),
                Ok(other) => other.to_string(),
                Err(_) => s.clone(),
            },
            other => other.to_string(),
        },
        LogicalType::Integer => match value {
            Value::Int(i) => group_thousands(*i),
            Value::Float(f) if f.fract() == 0.0 => group_thousands(f.trunc() as i64),
            Value::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => group_thousands(i),
                Err(_) => s.clone(),
            },
            other => other.to_string(),
        },
        LogicalType::Float => match value {
            Value::Float(f) => decimal_comma(*f),
            Value::Int(i) => decimal_comma(*i as f64),
            Value::Text(s) => match s.trim().parse::<f64>() {
                Ok(f) => decimal_comma(f),
                Err(_) => s.clone(),
            },
            other => other.to_string(),
        },
        _ => value.to_string(),
    }
}

/// Resolves a logical type either directly or via a `(table, column)`
/// catalog lookup, per the coercion contract.
pub fn resolve_logical_type(
    catalog: &Catalog,
    ty: Option<LogicalType>,
    table: Option<&str>,
    column: Option<&str>,
) -> Result<LogicalType> {
    if let Some(ty) = ty {
        return Ok(ty);
    }
    match (table, column) {
        (Some(table), Some(column)) => catalog.logical_type(table, column),
        _ => Err(Error::Configuration(
            "logical type not given and no (table, column) to resolve it from".into(),
        )),
    }
}

fn join_json_items(items: &[serde_json::Value]) -> String {
    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn decimal_comma(v: f64) -> String {
    let rendered = format!("{:.1}", v.abs());
    let Some((int_part, frac)) = rendered.split_once('.') else {
        return rendered;
    };
    let grouped = match int_part.parse::<i64>() {
        Ok(i) => group_thousands(i),
        Err(_) => int_part.to_owned(),
    };
    let sign = if v < 0.0 { "-" } else { "" };
    format!("{sign}{grouped},{frac}")
}
