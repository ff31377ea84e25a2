//! The per-array metadata record.
//!
//! One UTF-8 JSON document per array or virtual array, stored next to the
//! body and targeted by the primary-attribute symlinks:
//!
//! ```json
//! { "id": "<uuid>",
//!   "collection": "<name>",
//!   "primary_attributes":  { "<name>": <value> },
//!   "custom_attributes":   { "<name>": <value> },
//!   "schema_version":      1 }
//! ```
//!
//! Attribute keys keep the schema's declared order. Decoding is guided by
//! the attribute schemas, so datetimes and strings are never confused.

use uuid::Uuid;

use crate::value::AttrValue;

use crate::schema::AttributeSchema;

/// The metadata record of one array or virtual array.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayMeta {
    /// The array id.
    pub id: Uuid,
    /// The owning collection name.
    pub collection: String,
    /// Primary attribute values, in declared order.
    pub primary_attributes: Vec<(String, AttrValue)>,
    /// Custom attribute values, in declared order.
    pub custom_attributes: Vec<(String, AttrValue)>,
    /// The record format version.
    pub schema_version: u32,
}

fn attributes_to_json(attributes: &[(String, AttrValue)]) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(attributes.len());
    for (name, value) in attributes {
        map.insert(name.clone(), value.to_json());
    }
    serde_json::Value::Object(map)
}

fn attributes_from_json(
    value: &serde_json::Value,
    schemas: impl Iterator<Item = AttributeSchema>,
) -> Result<Vec<(String, AttrValue)>, String> {
    let map = value.as_object().ok_or("attributes shall be an object")?;
    let mut attributes = Vec::new();
    for schema in schemas {
        let raw = map
            .get(&schema.name)
            .ok_or_else(|| format!("attribute {:?} is missing", schema.name))?;
        let value = AttrValue::from_json(schema.kind, raw).map_err(|error| error.to_string())?;
        attributes.push((schema.name, value));
    }
    Ok(attributes)
}

impl ArrayMeta {
    /// Encode the record with stable key order.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut record = serde_json::Map::with_capacity(5);
        record.insert("id".to_string(), serde_json::json!(self.id.to_string()));
        record.insert(
            "collection".to_string(),
            serde_json::json!(self.collection),
        );
        record.insert(
            "primary_attributes".to_string(),
            attributes_to_json(&self.primary_attributes),
        );
        record.insert(
            "custom_attributes".to_string(),
            attributes_to_json(&self.custom_attributes),
        );
        record.insert(
            "schema_version".to_string(),
            serde_json::json!(self.schema_version),
        );
        serde_json::Value::Object(record)
    }

    /// Decode a record, guided by the schema's attribute list.
    ///
    /// # Errors
    /// Returns a reason string if any field is missing or ill-typed.
    pub fn from_json(
        value: &serde_json::Value,
        attributes: &[AttributeSchema],
    ) -> Result<Self, String> {
        let record = value.as_object().ok_or("record shall be an object")?;
        let id = record
            .get("id")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or("\"id\" shall be a uuid")?;
        let collection = record
            .get("collection")
            .and_then(serde_json::Value::as_str)
            .ok_or("\"collection\" shall be a string")?
            .to_string();
        let primary_attributes = attributes_from_json(
            record
                .get("primary_attributes")
                .ok_or("\"primary_attributes\" is missing")?,
            attributes.iter().filter(|a| a.primary).cloned(),
        )?;
        let custom_attributes = attributes_from_json(
            record
                .get("custom_attributes")
                .ok_or("\"custom_attributes\" is missing")?,
            attributes.iter().filter(|a| !a.primary).cloned(),
        )?;
        let schema_version = record
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or("\"schema_version\" shall be an integer")? as u32;
        Ok(Self {
            id,
            collection,
            primary_attributes,
            custom_attributes,
            schema_version,
        })
    }

    /// All attribute values, primary first, in declared order.
    #[must_use]
    pub fn all_attributes(&self) -> Vec<(String, AttrValue)> {
        self.primary_attributes
            .iter()
            .chain(&self.custom_attributes)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::schema::AttrKind;

    use super::*;

    #[test]
    fn record_round_trip_keeps_declared_order() {
        let dt = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let meta = ArrayMeta {
            id: Uuid::nil(),
            collection: "weather".to_string(),
            primary_attributes: vec![
                ("zone".to_string(), AttrValue::Str("north".to_string())),
                ("dt".to_string(), AttrValue::Datetime(dt)),
            ],
            custom_attributes: vec![("note".to_string(), AttrValue::Null)],
            schema_version: 1,
        };
        let json = meta.to_json();
        let encoded = serde_json::to_string(&json).unwrap();
        // Keys keep declared order, datetimes carry the explicit offset.
        let zone = encoded.find("\"zone\"").unwrap();
        let dt_key = encoded.find("\"dt\"").unwrap();
        assert!(zone < dt_key);
        assert!(encoded.contains("2023-01-01T00:00:00+00:00"));

        let attributes = vec![
            AttributeSchema::new("zone", AttrKind::Str, true),
            AttributeSchema::new("dt", AttrKind::Datetime, true),
            AttributeSchema::new("note", AttrKind::Str, false),
        ];
        let back = ArrayMeta::from_json(&json, &attributes).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn corrupt_records_are_rejected() {
        let attributes = vec![AttributeSchema::new("dt", AttrKind::Datetime, true)];
        assert!(ArrayMeta::from_json(&serde_json::json!([]), &attributes).is_err());
        let missing = serde_json::json!({
            "id": "00000000-0000-0000-0000-000000000000",
            "collection": "weather",
            "primary_attributes": {},
            "custom_attributes": {},
            "schema_version": 1,
        });
        assert!(ArrayMeta::from_json(&missing, &attributes).is_err());
    }
}
