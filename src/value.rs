//! Attribute values.
//!
//! [`AttrValue`] is the runtime form of a primary or custom attribute value.
//! Serialization follows the metadata record conventions: datetimes are
//! ISO-8601 with an explicit `+00:00` offset, tuples are JSON arrays, and
//! non-finite floats use string sentinels (`"NaN"`, `"Infinity"`,
//! `"-Infinity"`) since strict JSON cannot carry them.
//!
//! Decoding is schema-guided: the caller supplies the expected
//! [`AttrKind`](crate::schema::AttrKind) so that a datetime string and a plain
//! string attribute are never confused.

use chrono::{DateTime, SecondsFormat, Utc};
use num::complex::Complex64;
use thiserror::Error;

use crate::schema::AttrKind;

/// Format a datetime in the canonical on-disk form: ISO-8601 UTC with an
/// explicit `+00:00` offset.
#[must_use]
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parse an ISO-8601 datetime with an explicit offset, normalizing to UTC.
///
/// # Errors
/// Returns [`ValueError::InvalidDatetime`] if `raw` is not an ISO-8601
/// datetime with an explicit offset.
pub fn parse_datetime_utc(raw: &str) -> Result<DateTime<Utc>, ValueError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValueError::InvalidDatetime(raw.to_string()))
}

/// An attribute value error.
#[derive(Clone, Debug, Error)]
pub enum ValueError {
    /// A string that is not an ISO-8601 datetime with an explicit offset.
    #[error("{0:?} is not an ISO-8601 datetime with an explicit offset")]
    InvalidDatetime(String),
    /// A JSON value that does not decode as the expected attribute kind.
    #[error("value {value} does not decode as a {kind} attribute")]
    KindMismatch {
        /// The expected attribute kind.
        kind: AttrKind,
        /// The offending JSON value.
        value: serde_json::Value,
    },
}

/// The value of a primary or custom attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// An absent custom attribute value.
    Null,
    /// A signed integer.
    Int(i64),
    /// A float; may be NaN or infinite.
    Float(f64),
    /// A complex number.
    Complex(Complex64),
    /// A string.
    Str(String),
    /// A tuple of values.
    Tuple(Vec<AttrValue>),
    /// A UTC datetime.
    Datetime(DateTime<Utc>),
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Datetime(v)
    }
}

pub(crate) fn float_to_json(v: f64) -> serde_json::Value {
    if v.is_nan() {
        serde_json::Value::String("NaN".to_string())
    } else if v == f64::INFINITY {
        serde_json::Value::String("Infinity".to_string())
    } else if v == f64::NEG_INFINITY {
        serde_json::Value::String("-Infinity".to_string())
    } else {
        serde_json::json!(v)
    }
}

pub(crate) fn float_from_json(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

impl AttrValue {
    /// Returns true if the value is [`AttrValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if the value conforms to `kind`.
    #[must_use]
    pub fn matches_kind(&self, kind: AttrKind) -> bool {
        matches!(
            (self, kind),
            (Self::Int(_), AttrKind::Int)
                | (Self::Float(_), AttrKind::Float)
                | (Self::Complex(_), AttrKind::Complex)
                | (Self::Str(_), AttrKind::Str)
                | (Self::Tuple(_), AttrKind::Tuple)
                | (Self::Datetime(_), AttrKind::Datetime)
        )
    }

    /// The canonical textual form used for deterministic id derivation and
    /// symlink path segments (before filesystem escaping).
    #[must_use]
    pub fn canonical_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Complex(v) => format!("{}{:+}j", v.re, v.im),
            Self::Str(v) => v.clone(),
            Self::Tuple(values) => values
                .iter()
                .map(Self::canonical_string)
                .collect::<Vec<_>>()
                .join("~"),
            Self::Datetime(dt) => format_datetime(dt),
        }
    }

    /// Encode the value as a JSON value in the canonical metadata form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int(v) => serde_json::json!(v),
            Self::Float(v) => float_to_json(*v),
            Self::Complex(v) => {
                serde_json::Value::Array(vec![float_to_json(v.re), float_to_json(v.im)])
            }
            Self::Str(v) => serde_json::Value::String(v.clone()),
            Self::Tuple(values) => {
                serde_json::Value::Array(values.iter().map(Self::to_json).collect())
            }
            Self::Datetime(dt) => serde_json::Value::String(format_datetime(dt)),
        }
    }

    /// Decode a JSON value as an attribute of kind `kind`.
    ///
    /// # Errors
    /// Returns [`ValueError::KindMismatch`] if the value does not decode as
    /// `kind`, or [`ValueError::InvalidDatetime`] for a malformed datetime.
    pub fn from_json(kind: AttrKind, value: &serde_json::Value) -> Result<Self, ValueError> {
        let mismatch = || ValueError::KindMismatch {
            kind,
            value: value.clone(),
        };
        if value.is_null() {
            return Ok(Self::Null);
        }
        match kind {
            AttrKind::Int => value.as_i64().map(Self::Int).ok_or_else(mismatch),
            AttrKind::Float => float_from_json(value).map(Self::Float).ok_or_else(mismatch),
            AttrKind::Complex => match value.as_array().map(Vec::as_slice) {
                Some([re, im]) => {
                    let re = float_from_json(re).ok_or_else(mismatch)?;
                    let im = float_from_json(im).ok_or_else(mismatch)?;
                    Ok(Self::Complex(Complex64::new(re, im)))
                }
                _ => Err(mismatch()),
            },
            AttrKind::Str => value
                .as_str()
                .map(|s| Self::Str(s.to_string()))
                .ok_or_else(mismatch),
            AttrKind::Tuple => {
                let values = value.as_array().ok_or_else(mismatch)?;
                values
                    .iter()
                    .map(Self::from_json_scalar)
                    .collect::<Option<Vec<_>>>()
                    .map(Self::Tuple)
                    .ok_or_else(mismatch)
            }
            AttrKind::Datetime => {
                let raw = value.as_str().ok_or_else(mismatch)?;
                parse_datetime_utc(raw).map(Self::Datetime)
            }
        }
    }

    /// Decode a tuple element without a schema: integers, floats, strings and
    /// nested arrays only.
    fn from_json_scalar(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Array(values) => values
                .iter()
                .map(Self::from_json_scalar)
                .collect::<Option<Vec<_>>>()
                .map(Self::Tuple),
            _ => None,
        }
    }
}

/// A tuple of integers, the form of the `v_position` tile attribute.
#[must_use]
pub fn int_tuple(values: &[u64]) -> AttrValue {
    AttrValue::Tuple(
        values
            .iter()
            .map(|v| AttrValue::Int(*v as i64))
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn datetime_round_trip_normalizes_to_utc() {
        let dt = parse_datetime_utc("2023-01-01T03:00:00+03:00").unwrap();
        assert_eq!(format_datetime(&dt), "2023-01-01T00:00:00+00:00");
        assert!(parse_datetime_utc("2023-01-01T03:00:00").is_err());
    }

    #[test]
    fn float_sentinels() {
        let nan = AttrValue::Float(f64::NAN);
        assert_eq!(nan.to_json(), serde_json::json!("NaN"));
        let back = AttrValue::from_json(AttrKind::Float, &nan.to_json()).unwrap();
        match back {
            AttrValue::Float(v) => assert!(v.is_nan()),
            _ => panic!("expected a float"),
        }
        assert_eq!(
            AttrValue::Float(f64::NEG_INFINITY).to_json(),
            serde_json::json!("-Infinity")
        );
    }

    #[test]
    fn kind_guided_decoding() {
        let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let value = AttrValue::Datetime(dt).to_json();
        assert_eq!(
            AttrValue::from_json(AttrKind::Datetime, &value).unwrap(),
            AttrValue::Datetime(dt)
        );
        // The same JSON string decodes as a plain string under a Str schema.
        assert_eq!(
            AttrValue::from_json(AttrKind::Str, &value).unwrap(),
            AttrValue::Str("2023-01-01T00:00:00+00:00".to_string())
        );
        assert!(AttrValue::from_json(AttrKind::Int, &value).is_err());
    }

    #[test]
    fn tuple_round_trip() {
        let tuple = int_tuple(&[0, 2, 1]);
        assert_eq!(tuple.to_json(), serde_json::json!([0, 2, 1]));
        assert_eq!(
            AttrValue::from_json(AttrKind::Tuple, &tuple.to_json()).unwrap(),
            tuple
        );
        assert_eq!(tuple.canonical_string(), "0~2~1");
    }
}
