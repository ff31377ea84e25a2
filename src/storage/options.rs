//! Storage options: chunking and compression knobs.
//!
//! The options live in the collection manifest and are opaque to the engine
//! core; the storage adapter validates and applies them when opening a
//! dataset.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid storage options for a dataset shape.
#[derive(Clone, Debug, Error)]
#[error("invalid storage options: {0}")]
pub struct InvalidStorageOptionsError(pub String);

/// The chunk layout of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ChunkSpec {
    /// Unchunked.
    #[default]
    None,
    /// The adapter picks a chunk shape.
    Auto,
    /// An explicit chunk shape; every value must divide the dataset shape.
    Explicit(Vec<u64>),
}

impl Serialize for ChunkSpec {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => s.serialize_none(),
            Self::Auto => s.serialize_bool(true),
            Self::Explicit(chunks) => chunks.serialize(s),
        }
    }
}

impl<'de> Deserialize<'de> for ChunkSpec {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = ChunkSpec;

            fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "null, true, or a list of chunk sizes")
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ChunkSpec::None)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ChunkSpec::None)
            }

            fn visit_bool<E: serde::de::Error>(self, auto: bool) -> Result<Self::Value, E> {
                if auto {
                    Ok(ChunkSpec::Auto)
                } else {
                    Ok(ChunkSpec::None)
                }
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut chunks = Vec::new();
                while let Some(size) = seq.next_element()? {
                    chunks.push(size);
                }
                Ok(ChunkSpec::Explicit(chunks))
            }
        }

        d.deserialize_any(Visitor)
    }
}

/// A compression filter and its level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    /// The filter name, adapter-defined.
    pub name: String,
    /// The filter level, if the filter takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
}

/// Chunking and compression options of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageOptions {
    /// The chunk layout.
    pub chunks: ChunkSpec,
    /// The compression filter, if any.
    pub compression: Option<Compression>,
}

impl StorageOptions {
    /// Validate the options against a dataset shape.
    ///
    /// # Errors
    /// Returns [`InvalidStorageOptionsError`] if an explicit chunk shape has
    /// the wrong dimensionality or does not divide the shape.
    pub fn validate(&self, shape: &[u64]) -> Result<(), InvalidStorageOptionsError> {
        if let ChunkSpec::Explicit(chunks) = &self.chunks {
            if chunks.len() != shape.len() {
                return Err(InvalidStorageOptionsError(format!(
                    "chunk shape {chunks:?} does not match dimensionality of shape {shape:?}"
                )));
            }
            for (chunk, size) in std::iter::zip(chunks, shape) {
                if *chunk == 0 || size % chunk != 0 {
                    return Err(InvalidStorageOptionsError(format!(
                        "chunk size {chunk} does not divide dimension size {size}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_spec_serialization() {
        let options = StorageOptions::default();
        assert_eq!(
            serde_json::to_string(&options).unwrap(),
            r#"{"chunks":null,"compression":null}"#
        );
        let options = StorageOptions {
            chunks: ChunkSpec::Auto,
            compression: Some(Compression {
                name: "zlib".to_string(),
                level: Some(6),
            }),
        };
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(
            json,
            r#"{"chunks":true,"compression":{"name":"zlib","level":6}}"#
        );
        let back: StorageOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
        let back: StorageOptions =
            serde_json::from_str(r#"{"chunks":[12,3],"compression":null}"#).unwrap();
        assert_eq!(back.chunks, ChunkSpec::Explicit(vec![12, 3]));
    }

    #[test]
    fn chunk_validation() {
        let options = StorageOptions {
            chunks: ChunkSpec::Explicit(vec![12, 3]),
            compression: None,
        };
        assert!(options.validate(&[24, 3]).is_ok());
        assert!(options.validate(&[24, 4]).is_err());
        assert!(options.validate(&[24]).is_err());
        assert!(StorageOptions::default().validate(&[24, 3]).is_ok());
    }
}
