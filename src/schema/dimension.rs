//! Dimension schemas and resolved dimensions.
//!
//! A [`DimensionSchema`] describes one axis of every array in a collection:
//! its name, its size and its *kind*. The kind decides which fancy indexers
//! the slicing algebra accepts on that axis:
//!  - [`DimensionSchema::Plain`]: integers only.
//!  - [`DimensionSchema::Scaled`]: floats on an affine scale `v = start + i * step`.
//!  - [`DimensionSchema::Labeled`]: an explicit sequence of unique labels.
//!  - [`DimensionSchema::Time`]: datetimes on an affine time scale.
//!
//! A time dimension may anchor its start to an attribute of each individual
//! array (the [`TimeStart::Attribute`] reference form). Resolving a schema
//! against the attribute values of a concrete array yields a [`Dimension`],
//! the form the slicing algebra operates on.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{format_datetime, parse_datetime_utc, AttrValue};

use super::SchemaError;

/// A label on a labeled dimension: a string or a float.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    /// A string label.
    Str(String),
    /// A float label.
    Float(f64),
}

impl core::fmt::Display for Label {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<f64> for Label {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// The start of a time dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeStart {
    /// A fixed UTC timestamp shared by every array in the collection.
    Fixed(DateTime<Utc>),
    /// A reference to a datetime attribute of each individual array
    /// (the `$attribute` form).
    Attribute(String),
}

impl serde::Serialize for TimeStart {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed(dt) => s.serialize_str(&format_datetime(dt)),
            Self::Attribute(name) => s.serialize_str(&format!("${name}")),
        }
    }
}

impl<'de> serde::Deserialize<'de> for TimeStart {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        if let Some(name) = raw.strip_prefix('$') {
            Ok(Self::Attribute(name.to_string()))
        } else {
            parse_datetime_utc(&raw)
                .map(Self::Fixed)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Serialize a [`Duration`] as whole seconds.
mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(step: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(step.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(d)?))
    }
}

/// The schema of one dimension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DimensionSchema {
    /// A dimension indexed by integers only.
    Plain {
        /// Dimension name, unique within the schema.
        name: String,
        /// Number of cells.
        size: u64,
    },
    /// A dimension carrying a regular scale `v = start_value + i * step`.
    Scaled {
        /// Dimension name, unique within the schema.
        name: String,
        /// Number of cells.
        size: u64,
        /// Scale value of cell 0.
        start_value: f64,
        /// Scale step per cell; non-zero, may be negative.
        step: f64,
        /// Optional display name of the scale.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale_name: Option<String>,
    },
    /// A dimension indexed by an explicit sequence of unique labels.
    Labeled {
        /// Dimension name, unique within the schema.
        name: String,
        /// Number of cells; equals the number of labels.
        size: u64,
        /// One label per cell.
        labels: Vec<Label>,
    },
    /// A time series dimension.
    Time {
        /// Dimension name, unique within the schema.
        name: String,
        /// Number of cells.
        size: u64,
        /// Timestamp of cell 0, fixed or per-array.
        start_value: TimeStart,
        /// Positive step between cells.
        #[serde(with = "duration_seconds")]
        step: Duration,
    },
}

fn validate_name_and_size(name: &str, size: u64) -> Result<(), SchemaError> {
    if name.is_empty() || name.trim().is_empty() {
        return Err(SchemaError::InvalidDimension(
            "dimension name shall be a non-empty string".to_string(),
        ));
    }
    if size == 0 {
        return Err(SchemaError::InvalidDimension(format!(
            "dimension {name:?} size shall be positive"
        )));
    }
    Ok(())
}

impl DimensionSchema {
    /// Create a plain dimension.
    ///
    /// The name is validated lazily by [`ArraySchema::new`](super::ArraySchema::new).
    #[must_use]
    pub fn plain(name: &str, size: u64) -> Self {
        Self::Plain {
            name: name.to_string(),
            size,
        }
    }

    /// Create a scaled dimension.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidDimension`] if `step` is zero or not
    /// finite, or `start_value` is not finite.
    pub fn scaled(
        name: &str,
        size: u64,
        start_value: f64,
        step: f64,
        scale_name: Option<&str>,
    ) -> Result<Self, SchemaError> {
        validate_name_and_size(name, size)?;
        if step == 0.0 || !step.is_finite() || !start_value.is_finite() {
            return Err(SchemaError::InvalidDimension(format!(
                "dimension {name:?} scale shall have a finite start and a non-zero finite step"
            )));
        }
        if let Some(scale_name) = scale_name {
            if scale_name.trim().is_empty() {
                return Err(SchemaError::InvalidDimension(format!(
                    "dimension {name:?} scale name shall be a non-empty string"
                )));
            }
        }
        Ok(Self::Scaled {
            name: name.to_string(),
            size,
            start_value,
            step,
            scale_name: scale_name.map(ToString::to_string),
        })
    }

    /// Create a labeled dimension; its size is the number of labels.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidDimension`] if `labels` is empty or
    /// contains duplicates.
    pub fn labeled(name: &str, labels: Vec<Label>) -> Result<Self, SchemaError> {
        validate_name_and_size(name, labels.len() as u64)?;
        let mut seen = std::collections::HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.to_string()) {
                return Err(SchemaError::InvalidDimension(format!(
                    "dimension {name:?} labels shall be unique, {label} is repeated"
                )));
            }
        }
        Ok(Self::Labeled {
            name: name.to_string(),
            size: labels.len() as u64,
            labels,
        })
    }

    /// Create a time dimension.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidDimension`] if `step` is not positive or
    /// an attribute reference is empty.
    pub fn time(
        name: &str,
        size: u64,
        start_value: TimeStart,
        step: Duration,
    ) -> Result<Self, SchemaError> {
        validate_name_and_size(name, size)?;
        if step <= Duration::zero() {
            return Err(SchemaError::InvalidDimension(format!(
                "time dimension {name:?} step shall be a positive duration"
            )));
        }
        if let TimeStart::Attribute(attribute) = &start_value {
            if attribute.trim().is_empty() {
                return Err(SchemaError::InvalidDimension(format!(
                    "time dimension {name:?} start reference shall name an attribute"
                )));
            }
        }
        Ok(Self::Time {
            name: name.to_string(),
            size,
            start_value: start_value.clone(),
            step,
        })
    }

    /// The dimension name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Plain { name, .. }
            | Self::Scaled { name, .. }
            | Self::Labeled { name, .. }
            | Self::Time { name, .. } => name,
        }
    }

    /// The dimension size.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Plain { size, .. }
            | Self::Scaled { size, .. }
            | Self::Labeled { size, .. }
            | Self::Time { size, .. } => *size,
        }
    }

    /// The attribute referenced by a [`TimeStart::Attribute`] start, if any.
    #[must_use]
    pub fn time_reference(&self) -> Option<&str> {
        match self {
            Self::Time {
                start_value: TimeStart::Attribute(attribute),
                ..
            } => Some(attribute),
            _ => None,
        }
    }

    /// Resolve the schema against the attribute values of a concrete array.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnresolvedTimeReference`] if a referenced
    /// attribute is absent or is not a datetime.
    pub fn resolve(&self, attributes: &[(String, AttrValue)]) -> Result<Dimension, SchemaError> {
        Ok(match self.clone() {
            Self::Plain { name, size } => Dimension::Plain { name, size },
            Self::Scaled {
                name,
                size,
                start_value,
                step,
                ..
            } => Dimension::Scaled {
                name,
                size,
                start_value,
                step,
            },
            Self::Labeled { name, size, labels } => Dimension::Labeled { name, size, labels },
            Self::Time {
                name,
                size,
                start_value,
                step,
            } => {
                let start = match start_value {
                    TimeStart::Fixed(start) => start,
                    TimeStart::Attribute(attribute) => {
                        match attributes.iter().find(|(name, _)| *name == attribute) {
                            Some((_, AttrValue::Datetime(start))) => *start,
                            _ => {
                                return Err(SchemaError::UnresolvedTimeReference {
                                    dimension: name,
                                    attribute,
                                })
                            }
                        }
                    }
                };
                Dimension::Time {
                    name,
                    size,
                    start,
                    step,
                }
            }
        })
    }
}

/// A dimension of a concrete array, with time references resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum Dimension {
    /// See [`DimensionSchema::Plain`].
    Plain {
        /// Dimension name.
        name: String,
        /// Number of cells.
        size: u64,
    },
    /// See [`DimensionSchema::Scaled`].
    Scaled {
        /// Dimension name.
        name: String,
        /// Number of cells.
        size: u64,
        /// Scale value of cell 0.
        start_value: f64,
        /// Scale step per cell.
        step: f64,
    },
    /// See [`DimensionSchema::Labeled`].
    Labeled {
        /// Dimension name.
        name: String,
        /// Number of cells.
        size: u64,
        /// One label per cell.
        labels: Vec<Label>,
    },
    /// See [`DimensionSchema::Time`], with the start resolved to a timestamp.
    Time {
        /// Dimension name.
        name: String,
        /// Number of cells.
        size: u64,
        /// Timestamp of cell 0.
        start: DateTime<Utc>,
        /// Step between cells.
        step: Duration,
    },
}

impl Dimension {
    /// The dimension name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Plain { name, .. }
            | Self::Scaled { name, .. }
            | Self::Labeled { name, .. }
            | Self::Time { name, .. } => name,
        }
    }

    /// The dimension size.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Plain { size, .. }
            | Self::Scaled { size, .. }
            | Self::Labeled { size, .. }
            | Self::Time { size, .. } => *size,
        }
    }

    /// The scale value of cell `index` on a scaled dimension.
    #[must_use]
    pub fn scale_value(&self, index: u64) -> Option<f64> {
        match self {
            Self::Scaled {
                start_value, step, ..
            } => Some(start_value + index as f64 * step),
            _ => None,
        }
    }

    /// The timestamp of cell `index` on a time dimension.
    #[must_use]
    pub fn timestamp(&self, index: u64) -> Option<DateTime<Utc>> {
        match self {
            Self::Time { start, step, .. } => Some(*start + *step * i32::try_from(index).ok()?),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn dimension_schema_validation() {
        assert!(DimensionSchema::scaled("y", 3, 90.0, -1.0, None).is_ok());
        assert!(DimensionSchema::scaled("y", 3, 90.0, 0.0, None).is_err());
        assert!(DimensionSchema::scaled("y", 0, 90.0, -1.0, None).is_err());
        assert!(DimensionSchema::scaled("", 3, 90.0, -1.0, None).is_err());
        assert!(DimensionSchema::labeled("w", vec!["t".into(), "h".into()]).is_ok());
        assert!(DimensionSchema::labeled("w", vec!["t".into(), "t".into()]).is_err());
        assert!(DimensionSchema::labeled("w", vec![]).is_err());
        assert!(DimensionSchema::time(
            "dt",
            24,
            TimeStart::Attribute("dt".to_string()),
            Duration::hours(1),
        )
        .is_ok());
        assert!(DimensionSchema::time(
            "dt",
            24,
            TimeStart::Attribute("dt".to_string()),
            Duration::zero(),
        )
        .is_err());
    }

    #[test]
    fn time_dimension_resolution() {
        let schema = DimensionSchema::time(
            "dt",
            24,
            TimeStart::Attribute("dt".to_string()),
            Duration::hours(1),
        )
        .unwrap();
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let attributes = vec![("dt".to_string(), AttrValue::Datetime(start))];
        let dimension = schema.resolve(&attributes).unwrap();
        assert_eq!(dimension.timestamp(0), Some(start));
        assert_eq!(dimension.timestamp(2), Some(start + Duration::hours(2)));
        assert!(schema.resolve(&[]).is_err());
    }

    #[test]
    fn dimension_schema_serialization() {
        let schema = DimensionSchema::scaled("y", 3, 90.0, -1.0, None).unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"scaled","name":"y","size":3,"start_value":90.0,"step":-1.0}"#
        );
        let back: DimensionSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
