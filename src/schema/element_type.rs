//! Element types.
//!
//! Every cell of every array in a collection holds a value of the collection's
//! [`ElementType`]. The element type selects one monomorphic I/O path through
//! the crate (see [`crate::buffer`]), so the hot read/update paths stay free of
//! per-element branching.

use derive_more::Display;
use thiserror::Error;

/// The element type of a collection.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[non_exhaustive]
pub enum ElementType {
    /// `int8`
    #[display("int8")]
    I8,
    /// `int16`
    #[display("int16")]
    I16,
    /// `int32`
    #[display("int32")]
    I32,
    /// `int64`
    #[display("int64")]
    I64,
    /// `float16`
    #[display("float16")]
    F16,
    /// `float32`
    #[display("float32")]
    F32,
    /// `float64`
    #[display("float64")]
    F64,
    /// `complex64`
    #[display("complex64")]
    C64,
    /// `complex128`
    #[display("complex128")]
    C128,
}

impl ElementType {
    /// The identifier written to manifests, e.g. `"float32"`.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F16 => "float16",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::C64 => "complex64",
            Self::C128 => "complex128",
        }
    }

    /// The size in bytes of a single element.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::I8 => 1,
            Self::I16 | Self::F16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 | Self::C64 => 8,
            Self::C128 => 16,
        }
    }

    /// Returns true for the signed integer types.
    #[must_use]
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Returns true for the floating point types.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// Returns true for the complex types.
    #[must_use]
    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::C64 | Self::C128)
    }
}

/// An unsupported element type identifier.
#[derive(Clone, Debug, Error)]
#[error("element type {0:?} is not supported")]
pub struct UnsupportedElementTypeError(String);

impl TryFrom<&str> for ElementType {
    type Error = UnsupportedElementTypeError;

    fn try_from(identifier: &str) -> Result<Self, Self::Error> {
        match identifier {
            "int8" => Ok(Self::I8),
            "int16" => Ok(Self::I16),
            "int32" => Ok(Self::I32),
            "int64" => Ok(Self::I64),
            "float16" => Ok(Self::F16),
            "float32" => Ok(Self::F32),
            "float64" => Ok(Self::F64),
            "complex64" => Ok(Self::C64),
            "complex128" => Ok(Self::C128),
            _ => Err(UnsupportedElementTypeError(identifier.to_string())),
        }
    }
}

impl serde::Serialize for ElementType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.identifier())
    }
}

impl<'de> serde::Deserialize<'de> for ElementType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let identifier = String::deserialize(d)?;
        Self::try_from(identifier.as_str()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_identifiers_round_trip() {
        for element_type in [
            ElementType::I8,
            ElementType::I16,
            ElementType::I32,
            ElementType::I64,
            ElementType::F16,
            ElementType::F32,
            ElementType::F64,
            ElementType::C64,
            ElementType::C128,
        ] {
            assert_eq!(
                ElementType::try_from(element_type.identifier()).unwrap(),
                element_type
            );
        }
        assert!(ElementType::try_from("float128").is_err());
    }

    #[test]
    fn element_type_sizes() {
        assert_eq!(ElementType::I8.size(), 1);
        assert_eq!(ElementType::F16.size(), 2);
        assert_eq!(ElementType::F64.size(), 8);
        assert_eq!(ElementType::C128.size(), 16);
    }
}
