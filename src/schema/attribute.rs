//! Attribute schemas.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::AttrValue;

/// The kind of an attribute value.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrKind {
    /// A signed integer.
    #[display("int")]
    Int,
    /// A float.
    #[display("float")]
    Float,
    /// A complex number.
    #[display("complex")]
    Complex,
    /// A string.
    #[display("string")]
    #[serde(rename = "string")]
    Str,
    /// A tuple of values.
    #[display("tuple")]
    Tuple,
    /// A UTC datetime.
    #[display("datetime")]
    Datetime,
}

/// The schema of one attribute.
///
/// Primary attribute values form the lookup key of an array; they are
/// mandatory and immutable after creation. Custom attribute values are
/// mutable through the update entry point, with one exception: a custom
/// datetime attribute must be provided at creation and can never become null.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// Attribute name, unique within the schema.
    pub name: String,
    /// The kind of the attribute values.
    #[serde(rename = "dtype")]
    pub kind: AttrKind,
    /// Whether the attribute is part of the primary key.
    pub primary: bool,
}

/// An attribute value that violates its schema.
#[derive(Clone, Debug, Error)]
pub enum AttributeError {
    /// A value of the wrong kind.
    #[error("attribute {name:?} expects a {kind} value")]
    KindMismatch {
        /// Attribute name.
        name: String,
        /// Expected kind.
        kind: AttrKind,
    },
    /// A missing mandatory value.
    #[error("attribute {0:?} value is missing")]
    Missing(String),
    /// A null where null is not allowed.
    #[error("attribute {0:?} cannot be null")]
    NullForbidden(String),
    /// A value for an attribute the schema does not declare.
    #[error("attribute {0:?} is not declared in the schema")]
    Undeclared(String),
    /// An attempt to change a primary attribute value.
    #[error("primary attribute {0:?} is immutable")]
    Immutable(String),
}

impl AttributeSchema {
    /// Create an attribute schema.
    #[must_use]
    pub fn new(name: &str, kind: AttrKind, primary: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            primary,
        }
    }

    /// Validate a value against this schema.
    ///
    /// Primary values can never be null. Custom values may be null unless the
    /// attribute is a datetime.
    ///
    /// # Errors
    /// Returns an [`AttributeError`] if the value is null where forbidden or
    /// of the wrong kind.
    pub fn validate_value(&self, value: &AttrValue) -> Result<(), AttributeError> {
        if value.is_null() {
            if self.primary || self.kind == AttrKind::Datetime {
                return Err(AttributeError::NullForbidden(self.name.clone()));
            }
            return Ok(());
        }
        if value.matches_kind(self.kind) {
            Ok(())
        } else {
            Err(AttributeError::KindMismatch {
                name: self.name.clone(),
                kind: self.kind,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn attribute_value_validation() {
        let primary = AttributeSchema::new("dt", AttrKind::Datetime, true);
        let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert!(primary.validate_value(&AttrValue::Datetime(dt)).is_ok());
        assert!(primary.validate_value(&AttrValue::Null).is_err());
        assert!(primary.validate_value(&AttrValue::Int(1)).is_err());

        let custom = AttributeSchema::new("note", AttrKind::Str, false);
        assert!(custom.validate_value(&AttrValue::Null).is_ok());
        assert!(custom.validate_value(&AttrValue::Str("x".into())).is_ok());

        // A custom datetime attribute may not be null.
        let custom_dt = AttributeSchema::new("issued", AttrKind::Datetime, false);
        assert!(custom_dt.validate_value(&AttrValue::Null).is_err());
    }

    #[test]
    fn attribute_schema_serialization() {
        let schema = AttributeSchema::new("dt", AttrKind::Datetime, true);
        assert_eq!(
            serde_json::to_string(&schema).unwrap(),
            r#"{"name":"dt","dtype":"datetime","primary":true}"#
        );
    }
}
