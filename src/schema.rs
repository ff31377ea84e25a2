//! Collection schemas.
//!
//! A schema describes every array in a collection: its ordered dimensions,
//! its attributes, its element type and its fill value. A collection holds
//! either plain arrays ([`ArraySchema`]) or virtual arrays ([`VArraySchema`]),
//! never both, and the schema is immutable once the collection manifest has
//! been written.
//!
//! A virtual array is split into a regular grid of tiles by its `vgrid`, an
//! ordered sequence of divisors, one per dimension. Each tile is an ordinary
//! array with shape `arrays_shape = shape / vgrid`, stored under the same
//! collection with the derived [`VArraySchema::tile_schema`].

mod attribute;
mod dimension;
mod element_type;

pub use attribute::{AttrKind, AttributeError, AttributeSchema};
pub use dimension::{Dimension, DimensionSchema, Label, TimeStart};
pub use element_type::{ElementType, UnsupportedElementTypeError};

use thiserror::Error;

use crate::buffer::Scalar;
use crate::value::AttrValue;

/// Name of the derived primary attribute holding a tile's parent virtual
/// array id.
pub const TILE_VID_ATTRIBUTE: &str = "vid";
/// Name of the derived primary attribute holding a tile's grid position.
pub const TILE_POSITION_ATTRIBUTE: &str = "v_position";

/// A schema validation error.
#[derive(Clone, Debug, Error)]
pub enum SchemaError {
    /// An invalid dimension definition.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),
    /// A schema without dimensions.
    #[error("a schema shall have at least one dimension")]
    NoDimensions,
    /// A repeated dimension name.
    #[error("dimension name {0:?} is repeated")]
    DuplicateDimensionName(String),
    /// A repeated attribute name.
    #[error("attribute name {0:?} is repeated")]
    DuplicateAttributeName(String),
    /// A time dimension start reference without a matching datetime attribute.
    #[error("time dimension {dimension:?} references attribute {attribute:?} which is not declared with a datetime dtype")]
    MissingTimeAttribute {
        /// The time dimension name.
        dimension: String,
        /// The referenced attribute name.
        attribute: String,
    },
    /// A time dimension reference that cannot be resolved for an array.
    #[error("time dimension {dimension:?} start reference {attribute:?} is not a datetime value")]
    UnresolvedTimeReference {
        /// The time dimension name.
        dimension: String,
        /// The referenced attribute name.
        attribute: String,
    },
    /// A fill value of the wrong element type.
    #[error("fill value {fill} is incompatible with element type {element_type}")]
    IncompatibleFillValue {
        /// The schema element type.
        element_type: ElementType,
        /// The offending fill value.
        fill: Scalar,
    },
    /// A `vgrid` of the wrong length or with non-positive entries.
    #[error("vgrid shall hold one positive divisor per dimension, got {0:?}")]
    InvalidGrid(Vec<u64>),
    /// A `vgrid` entry that does not divide its dimension.
    #[error("dimension {dimension:?} of size {size} is not divisible by vgrid entry {divisor}")]
    IndivisibleGrid {
        /// The dimension name.
        dimension: String,
        /// The dimension size.
        size: u64,
        /// The offending divisor.
        divisor: u64,
    },
    /// Both `vgrid` and `arrays_shape` supplied.
    #[error("vgrid and arrays_shape are mutually exclusive, supply exactly one")]
    AmbiguousGrid,
    /// Neither `vgrid` nor `arrays_shape` supplied.
    #[error("a virtual array schema requires a vgrid or an arrays_shape")]
    MissingGrid,
}

fn validate_dimensions_and_attributes(
    dimensions: &[DimensionSchema],
    attributes: &[AttributeSchema],
) -> Result<(), SchemaError> {
    if dimensions.is_empty() {
        return Err(SchemaError::NoDimensions);
    }
    let mut names = std::collections::HashSet::new();
    for dimension in dimensions {
        if !names.insert(dimension.name()) {
            return Err(SchemaError::DuplicateDimensionName(
                dimension.name().to_string(),
            ));
        }
    }
    let mut names = std::collections::HashSet::new();
    for attribute in attributes {
        if !names.insert(attribute.name.as_str()) {
            return Err(SchemaError::DuplicateAttributeName(attribute.name.clone()));
        }
    }
    for dimension in dimensions {
        if let Some(reference) = dimension.time_reference() {
            let resolvable = attributes
                .iter()
                .any(|a| a.name == reference && a.kind == AttrKind::Datetime);
            if !resolvable {
                return Err(SchemaError::MissingTimeAttribute {
                    dimension: dimension.name().to_string(),
                    attribute: reference.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn resolve_fill_value(
    element_type: ElementType,
    fill_value: Option<Scalar>,
) -> Result<Scalar, SchemaError> {
    match fill_value {
        None => Ok(Scalar::default_fill(element_type)),
        Some(fill) if fill.element_type() == element_type => Ok(fill),
        Some(fill) => Err(SchemaError::IncompatibleFillValue { element_type, fill }),
    }
}

/// The schema of the plain arrays in a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct ArraySchema {
    dimensions: Vec<DimensionSchema>,
    attributes: Vec<AttributeSchema>,
    element_type: ElementType,
    fill_value: Scalar,
}

impl ArraySchema {
    /// Create an array schema.
    ///
    /// A missing `fill_value` defaults to NaN for float and complex element
    /// types and to the type minimum for integers.
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if the dimensions or attributes are invalid,
    /// a time dimension references a missing attribute, or the fill value
    /// does not match the element type.
    pub fn new(
        dimensions: Vec<DimensionSchema>,
        attributes: Vec<AttributeSchema>,
        element_type: ElementType,
        fill_value: Option<Scalar>,
    ) -> Result<Self, SchemaError> {
        validate_dimensions_and_attributes(&dimensions, &attributes)?;
        let fill_value = resolve_fill_value(element_type, fill_value)?;
        Ok(Self {
            dimensions,
            attributes,
            element_type,
            fill_value,
        })
    }

    /// The ordered dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[DimensionSchema] {
        &self.dimensions
    }

    /// The ordered attributes.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }

    /// The element type.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// The fill value.
    #[must_use]
    pub fn fill_value(&self) -> Scalar {
        self.fill_value
    }

    /// The array shape.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.dimensions.iter().map(DimensionSchema::size).collect()
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.dimensions.len()
    }

    /// The primary attributes, in declared order.
    pub fn primary_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| a.primary)
    }

    /// The custom attributes, in declared order.
    pub fn custom_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| !a.primary)
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Resolve the dimension schemas against the attribute values of a
    /// concrete array.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnresolvedTimeReference`] if a time reference
    /// cannot be satisfied by `attributes`.
    pub fn resolve_dimensions(
        &self,
        attributes: &[(String, AttrValue)],
    ) -> Result<Vec<Dimension>, SchemaError> {
        self.dimensions
            .iter()
            .map(|d| d.resolve(attributes))
            .collect()
    }
}

/// The schema of the virtual arrays in a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct VArraySchema {
    dimensions: Vec<DimensionSchema>,
    attributes: Vec<AttributeSchema>,
    element_type: ElementType,
    fill_value: Scalar,
    vgrid: Vec<u64>,
}

impl VArraySchema {
    /// Create a virtual array schema.
    ///
    /// Exactly one of `vgrid` (divisor per dimension) and `arrays_shape`
    /// (tile shape per dimension) shall be supplied; the two are equivalent
    /// and the `vgrid` is stored canonically. Supplying both is rejected as
    /// ambiguous.
    ///
    /// # Errors
    /// Returns a [`SchemaError`] on any validation failure, including a grid
    /// that does not divide the dimensions exactly.
    pub fn new(
        dimensions: Vec<DimensionSchema>,
        attributes: Vec<AttributeSchema>,
        element_type: ElementType,
        fill_value: Option<Scalar>,
        vgrid: Option<Vec<u64>>,
        arrays_shape: Option<Vec<u64>>,
    ) -> Result<Self, SchemaError> {
        validate_dimensions_and_attributes(&dimensions, &attributes)?;
        let fill_value = resolve_fill_value(element_type, fill_value)?;
        let divisors = match (vgrid, arrays_shape) {
            (Some(_), Some(_)) => return Err(SchemaError::AmbiguousGrid),
            (None, None) => return Err(SchemaError::MissingGrid),
            (Some(vgrid), None) => {
                Self::validate_grid(&dimensions, &vgrid, |dimension, divisor| {
                    dimension.size() % divisor == 0
                })?;
                vgrid
            }
            (None, Some(arrays_shape)) => {
                Self::validate_grid(&dimensions, &arrays_shape, |dimension, tile| {
                    dimension.size() % tile == 0
                })?;
                std::iter::zip(&dimensions, &arrays_shape)
                    .map(|(dimension, tile)| dimension.size() / tile)
                    .collect()
            }
        };
        Ok(Self {
            dimensions,
            attributes,
            element_type,
            fill_value,
            vgrid: divisors,
        })
    }

    fn validate_grid(
        dimensions: &[DimensionSchema],
        grid: &[u64],
        divides: impl Fn(&DimensionSchema, u64) -> bool,
    ) -> Result<(), SchemaError> {
        if grid.len() != dimensions.len() || grid.iter().any(|g| *g == 0) {
            return Err(SchemaError::InvalidGrid(grid.to_vec()));
        }
        for (dimension, divisor) in std::iter::zip(dimensions, grid) {
            if !divides(dimension, *divisor) {
                return Err(SchemaError::IndivisibleGrid {
                    dimension: dimension.name().to_string(),
                    size: dimension.size(),
                    divisor: *divisor,
                });
            }
        }
        Ok(())
    }

    /// The ordered dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[DimensionSchema] {
        &self.dimensions
    }

    /// The ordered attributes.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeSchema] {
        &self.attributes
    }

    /// The element type.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// The fill value.
    #[must_use]
    pub fn fill_value(&self) -> Scalar {
        self.fill_value
    }

    /// The virtual array shape.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.dimensions.iter().map(DimensionSchema::size).collect()
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.dimensions.len()
    }

    /// The tile grid divisors, one per dimension.
    #[must_use]
    pub fn vgrid(&self) -> &[u64] {
        &self.vgrid
    }

    /// The tile shape, `shape / vgrid` elementwise.
    #[must_use]
    pub fn arrays_shape(&self) -> Vec<u64> {
        std::iter::zip(&self.dimensions, &self.vgrid)
            .map(|(dimension, divisor)| dimension.size() / divisor)
            .collect()
    }

    /// The primary attributes, in declared order.
    pub fn primary_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| a.primary)
    }

    /// The custom attributes, in declared order.
    pub fn custom_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| !a.primary)
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Resolve the dimension schemas against the attribute values of a
    /// concrete virtual array.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnresolvedTimeReference`] if a time reference
    /// cannot be satisfied by `attributes`.
    pub fn resolve_dimensions(
        &self,
        attributes: &[(String, AttrValue)],
    ) -> Result<Vec<Dimension>, SchemaError> {
        self.dimensions
            .iter()
            .map(|d| d.resolve(attributes))
            .collect()
    }

    /// Derive the schema of the tiles backing the virtual arrays.
    ///
    /// Tiles are plain arrays of shape [`arrays_shape`](Self::arrays_shape)
    /// keyed by the primary attributes `vid` (the parent virtual array id)
    /// and `v_position` (the tile's grid position). Labels and scales do not
    /// subdivide, so those dimensions become plain; a time dimension whose
    /// start references an attribute keeps the reference under a
    /// `parent.`-prefixed custom attribute filled in at tile creation.
    #[must_use]
    pub fn tile_schema(&self) -> ArraySchema {
        let mut attributes = vec![
            AttributeSchema::new(TILE_VID_ATTRIBUTE, AttrKind::Str, true),
            AttributeSchema::new(TILE_POSITION_ATTRIBUTE, AttrKind::Tuple, true),
        ];
        let dimensions = std::iter::zip(&self.dimensions, &self.vgrid)
            .map(|(dimension, divisor)| {
                let size = dimension.size() / divisor;
                match dimension {
                    DimensionSchema::Time {
                        name,
                        start_value,
                        step,
                        ..
                    } => {
                        let start_value = match start_value {
                            TimeStart::Fixed(start) => TimeStart::Fixed(*start),
                            TimeStart::Attribute(attribute) => {
                                let derived = format!("parent.{attribute}");
                                attributes.push(AttributeSchema::new(
                                    &derived,
                                    AttrKind::Datetime,
                                    false,
                                ));
                                TimeStart::Attribute(derived)
                            }
                        };
                        DimensionSchema::Time {
                            name: name.clone(),
                            size,
                            start_value,
                            step: *step,
                        }
                    }
                    other => DimensionSchema::Plain {
                        name: other.name().to_string(),
                        size,
                    },
                }
            })
            .collect();
        ArraySchema {
            dimensions,
            attributes,
            element_type: self.element_type,
            fill_value: self.fill_value,
        }
    }
}

/// The schema of a collection: plain arrays or virtual arrays.
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionSchema {
    /// A collection of plain arrays.
    Array(ArraySchema),
    /// A collection of virtual arrays.
    Varray(VArraySchema),
}

impl From<ArraySchema> for CollectionSchema {
    fn from(schema: ArraySchema) -> Self {
        Self::Array(schema)
    }
}

impl From<VArraySchema> for CollectionSchema {
    fn from(schema: VArraySchema) -> Self {
        Self::Varray(schema)
    }
}

impl CollectionSchema {
    /// The ordered dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[DimensionSchema] {
        match self {
            Self::Array(schema) => schema.dimensions(),
            Self::Varray(schema) => schema.dimensions(),
        }
    }

    /// The ordered attributes.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeSchema] {
        match self {
            Self::Array(schema) => schema.attributes(),
            Self::Varray(schema) => schema.attributes(),
        }
    }

    /// The element type.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Array(schema) => schema.element_type(),
            Self::Varray(schema) => schema.element_type(),
        }
    }

    /// The fill value.
    #[must_use]
    pub fn fill_value(&self) -> Scalar {
        match self {
            Self::Array(schema) => schema.fill_value(),
            Self::Varray(schema) => schema.fill_value(),
        }
    }

    /// The shape of every array in the collection.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        match self {
            Self::Array(schema) => schema.shape(),
            Self::Varray(schema) => schema.shape(),
        }
    }
}

/// Normalize creation-time attribute values against `attributes`.
///
/// Returns the primary and custom value maps in declared order. Every primary
/// attribute must be supplied; custom attributes default to null except
/// datetimes, which must be supplied.
///
/// # Errors
/// Returns an [`AttributeError`] for missing, undeclared or ill-typed values.
pub fn normalize_attribute_values(
    attributes: &[AttributeSchema],
    primary: &[(String, AttrValue)],
    custom: &[(String, AttrValue)],
) -> Result<(Vec<(String, AttrValue)>, Vec<(String, AttrValue)>), AttributeError> {
    for (name, _) in primary.iter().chain(custom) {
        if !attributes.iter().any(|a| &a.name == name) {
            return Err(AttributeError::Undeclared(name.clone()));
        }
    }
    let mut primary_values = Vec::new();
    let mut custom_values = Vec::new();
    for attribute in attributes {
        let supplied = if attribute.primary { primary } else { custom };
        let value = supplied
            .iter()
            .find(|(name, _)| *name == attribute.name)
            .map(|(_, value)| value.clone());
        let value = match value {
            Some(value) => value,
            None if attribute.primary => {
                return Err(AttributeError::Missing(attribute.name.clone()))
            }
            None => AttrValue::Null,
        };
        attribute.validate_value(&value)?;
        if attribute.primary {
            primary_values.push((attribute.name.clone(), value));
        } else {
            custom_values.push((attribute.name.clone(), value));
        }
    }
    Ok((primary_values, custom_values))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn dimensions() -> Vec<DimensionSchema> {
        vec![
            DimensionSchema::plain("y", 100),
            DimensionSchema::plain("x", 200),
        ]
    }

    #[test]
    fn array_schema_validation() {
        assert!(ArraySchema::new(dimensions(), vec![], ElementType::F64, None).is_ok());
        assert!(matches!(
            ArraySchema::new(vec![], vec![], ElementType::F64, None),
            Err(SchemaError::NoDimensions)
        ));
        assert!(matches!(
            ArraySchema::new(
                vec![
                    DimensionSchema::plain("y", 100),
                    DimensionSchema::plain("y", 200),
                ],
                vec![],
                ElementType::F64,
                None,
            ),
            Err(SchemaError::DuplicateDimensionName(_))
        ));
        assert!(matches!(
            ArraySchema::new(
                dimensions(),
                vec![],
                ElementType::F64,
                Some(Scalar::I32(0)),
            ),
            Err(SchemaError::IncompatibleFillValue { .. })
        ));
    }

    #[test]
    fn time_reference_must_be_declared() {
        let dimensions = vec![DimensionSchema::time(
            "dt",
            24,
            TimeStart::Attribute("dt".to_string()),
            Duration::hours(1),
        )
        .unwrap()];
        assert!(matches!(
            ArraySchema::new(dimensions.clone(), vec![], ElementType::F64, None),
            Err(SchemaError::MissingTimeAttribute { .. })
        ));
        let attributes = vec![AttributeSchema::new("dt", AttrKind::Datetime, true)];
        assert!(ArraySchema::new(dimensions, attributes, ElementType::F64, None).is_ok());
    }

    #[test]
    fn varray_schema_grid() {
        let schema = VArraySchema::new(
            dimensions(),
            vec![],
            ElementType::F64,
            None,
            Some(vec![50, 20]),
            None,
        )
        .unwrap();
        assert_eq!(schema.vgrid(), &[50, 20]);
        assert_eq!(schema.arrays_shape(), vec![2, 10]);

        // arrays_shape is the equivalent formulation.
        let schema = VArraySchema::new(
            dimensions(),
            vec![],
            ElementType::F64,
            None,
            None,
            Some(vec![2, 10]),
        )
        .unwrap();
        assert_eq!(schema.vgrid(), &[50, 20]);

        assert!(matches!(
            VArraySchema::new(
                dimensions(),
                vec![],
                ElementType::F64,
                None,
                Some(vec![50, 20]),
                Some(vec![2, 10]),
            ),
            Err(SchemaError::AmbiguousGrid)
        ));
        assert!(matches!(
            VArraySchema::new(dimensions(), vec![], ElementType::F64, None, None, None),
            Err(SchemaError::MissingGrid)
        ));
        assert!(matches!(
            VArraySchema::new(
                dimensions(),
                vec![],
                ElementType::F64,
                None,
                Some(vec![3, 20]),
                None,
            ),
            Err(SchemaError::IndivisibleGrid { .. })
        ));
    }

    #[test]
    fn tile_schema_derivation() {
        let dimensions = vec![
            DimensionSchema::time(
                "dt",
                24,
                TimeStart::Attribute("dt".to_string()),
                Duration::hours(1),
            )
            .unwrap(),
            DimensionSchema::scaled("y", 4, 90.0, -1.0, None).unwrap(),
        ];
        let attributes = vec![AttributeSchema::new("dt", AttrKind::Datetime, true)];
        let schema = VArraySchema::new(
            dimensions,
            attributes,
            ElementType::F32,
            None,
            Some(vec![2, 2]),
            None,
        )
        .unwrap();
        let tile_schema = schema.tile_schema();
        assert_eq!(tile_schema.shape(), vec![12, 2]);
        assert!(matches!(
            &tile_schema.dimensions()[1],
            DimensionSchema::Plain { .. }
        ));
        assert_eq!(
            tile_schema.dimensions()[0].time_reference(),
            Some("parent.dt")
        );
        let names: Vec<_> = tile_schema
            .attributes()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["vid", "v_position", "parent.dt"]);
    }

    #[test]
    fn attribute_value_normalization() {
        let attributes = vec![
            AttributeSchema::new("run", AttrKind::Int, true),
            AttributeSchema::new("note", AttrKind::Str, false),
        ];
        let (primary, custom) = normalize_attribute_values(
            &attributes,
            &[("run".to_string(), AttrValue::Int(3))],
            &[],
        )
        .unwrap();
        assert_eq!(primary, vec![("run".to_string(), AttrValue::Int(3))]);
        assert_eq!(custom, vec![("note".to_string(), AttrValue::Null)]);

        assert!(matches!(
            normalize_attribute_values(&attributes, &[], &[]),
            Err(AttributeError::Missing(_))
        ));
        assert!(matches!(
            normalize_attribute_values(
                &attributes,
                &[("other".to_string(), AttrValue::Int(3))],
                &[],
            ),
            Err(AttributeError::Undeclared(_))
        ));
    }
}
