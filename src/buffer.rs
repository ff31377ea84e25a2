//! Typed dense buffers.
//!
//! The element type of a collection is known at the schema level, so the
//! engine resolves one monomorphic I/O path per element type instead of
//! carrying a dynamically typed buffer through the hot read/update paths.
//! [`TypedBuffer`] is the runtime-tagged carrier: one dense `Vec` variant per
//! [`ElementType`], with the generic paths behind the [`Element`] trait.
//!
//! Buffers of a losslessly convertible element type are accepted on update
//! and widened with [`TypedBuffer::convert_to`]; anything lossy is a dtype
//! mismatch.

use half::f16;
use num::complex::{Complex32, Complex64};
use thiserror::Error;

use crate::schema::ElementType;
use crate::slicing::{Bounds, BoundsOutOfShapeError};
use crate::value::{float_from_json, float_to_json};

/// A single element value, tagged by element type.
///
/// Used for fill values and single-cell access. Equality is bitwise, so a
/// NaN fill value compares equal to itself.
#[derive(Copy, Clone, Debug)]
pub enum Scalar {
    /// An `int8` value.
    I8(i8),
    /// An `int16` value.
    I16(i16),
    /// An `int32` value.
    I32(i32),
    /// An `int64` value.
    I64(i64),
    /// A `float16` value.
    F16(f16),
    /// A `float32` value.
    F32(f32),
    /// A `float64` value.
    F64(f64),
    /// A `complex64` value.
    C64(Complex32),
    /// A `complex128` value.
    C128(Complex64),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::I8(a), Self::I8(b)) => a == b,
            (Self::I16(a), Self::I16(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F16(a), Self::F16(b)) => a.to_bits() == b.to_bits(),
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::C64(a), Self::C64(b)) => {
                a.re.to_bits() == b.re.to_bits() && a.im.to_bits() == b.im.to_bits()
            }
            (Self::C128(a), Self::C128(b)) => {
                a.re.to_bits() == b.re.to_bits() && a.im.to_bits() == b.im.to_bits()
            }
            _ => false,
        }
    }
}

impl core::fmt::Display for Scalar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F16(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::C64(v) => write!(f, "{}{:+}j", v.re, v.im),
            Self::C128(v) => write!(f, "{}{:+}j", v.re, v.im),
        }
    }
}

impl Scalar {
    /// The element type of the scalar.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::I8(_) => ElementType::I8,
            Self::I16(_) => ElementType::I16,
            Self::I32(_) => ElementType::I32,
            Self::I64(_) => ElementType::I64,
            Self::F16(_) => ElementType::F16,
            Self::F32(_) => ElementType::F32,
            Self::F64(_) => ElementType::F64,
            Self::C64(_) => ElementType::C64,
            Self::C128(_) => ElementType::C128,
        }
    }

    /// The default fill value of an element type: NaN for float and complex
    /// types, the type minimum for integers.
    #[must_use]
    pub fn default_fill(element_type: ElementType) -> Self {
        match element_type {
            ElementType::I8 => Self::I8(i8::MIN),
            ElementType::I16 => Self::I16(i16::MIN),
            ElementType::I32 => Self::I32(i32::MIN),
            ElementType::I64 => Self::I64(i64::MIN),
            ElementType::F16 => Self::F16(f16::NAN),
            ElementType::F32 => Self::F32(f32::NAN),
            ElementType::F64 => Self::F64(f64::NAN),
            ElementType::C64 => Self::C64(Complex32::new(f32::NAN, f32::NAN)),
            ElementType::C128 => Self::C128(Complex64::new(f64::NAN, f64::NAN)),
        }
    }

    /// Encode the scalar in the canonical manifest form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::I8(v) => serde_json::json!(v),
            Self::I16(v) => serde_json::json!(v),
            Self::I32(v) => serde_json::json!(v),
            Self::I64(v) => serde_json::json!(v),
            Self::F16(v) => float_to_json(f64::from(*v)),
            Self::F32(v) => float_to_json(f64::from(*v)),
            Self::F64(v) => float_to_json(*v),
            Self::C64(v) => serde_json::Value::Array(vec![
                float_to_json(f64::from(v.re)),
                float_to_json(f64::from(v.im)),
            ]),
            Self::C128(v) => {
                serde_json::Value::Array(vec![float_to_json(v.re), float_to_json(v.im)])
            }
        }
    }

    /// Decode a scalar of `element_type` from the canonical manifest form.
    ///
    /// # Errors
    /// Returns [`BufferError::IncompatibleScalar`] if the value does not
    /// decode as `element_type`.
    pub fn from_json(
        element_type: ElementType,
        value: &serde_json::Value,
    ) -> Result<Self, BufferError> {
        let mismatch = || BufferError::IncompatibleScalar(value.to_string(), element_type);
        let int = |max: i64, min: i64| -> Result<i64, BufferError> {
            match value.as_i64() {
                Some(v) if v >= min && v <= max => Ok(v),
                _ => Err(mismatch()),
            }
        };
        let float = || float_from_json(value).ok_or_else(mismatch);
        let complex = || -> Result<(f64, f64), BufferError> {
            match value.as_array().map(Vec::as_slice) {
                Some([re, im]) => Ok((
                    float_from_json(re).ok_or_else(mismatch)?,
                    float_from_json(im).ok_or_else(mismatch)?,
                )),
                _ => Err(mismatch()),
            }
        };
        Ok(match element_type {
            ElementType::I8 => Self::I8(int(i64::from(i8::MAX), i64::from(i8::MIN))? as i8),
            ElementType::I16 => Self::I16(int(i64::from(i16::MAX), i64::from(i16::MIN))? as i16),
            ElementType::I32 => Self::I32(int(i64::from(i32::MAX), i64::from(i32::MIN))? as i32),
            ElementType::I64 => Self::I64(int(i64::MAX, i64::MIN)?),
            ElementType::F16 => Self::F16(f16::from_f64(float()?)),
            ElementType::F32 => Self::F32(float()? as f32),
            ElementType::F64 => Self::F64(float()?),
            ElementType::C64 => {
                let (re, im) = complex()?;
                Self::C64(Complex32::new(re as f32, im as f32))
            }
            ElementType::C128 => {
                let (re, im) = complex()?;
                Self::C128(Complex64::new(re, im))
            }
        })
    }
}

/// One element type's view of the buffer machinery.
///
/// Implemented for the nine element types; generic code paths take a
/// `T: Element` and are selected once per operation via
/// [`TypedBuffer::element_type`].
pub trait Element: Copy + PartialEq + Send + Sync + 'static {
    /// The element type tag.
    const ELEMENT_TYPE: ElementType;

    /// Extract the matching scalar value.
    fn from_scalar(scalar: Scalar) -> Option<Self>;

    /// Append the native-endian byte representation.
    fn write_ne_bytes(self, out: &mut Vec<u8>);

    /// Read one element from exactly `size()` native-endian bytes.
    fn read_ne_bytes(bytes: &[u8]) -> Self;

    /// Wrap a vector in the matching [`TypedBuffer`] variant.
    fn into_buffer(data: Vec<Self>) -> TypedBuffer;

    /// Borrow the matching variant's data.
    fn slice(buffer: &TypedBuffer) -> Option<&[Self]>;

    /// Mutably borrow the matching variant's data.
    fn slice_mut(buffer: &mut TypedBuffer) -> Option<&mut [Self]>;

    /// Bitwise equality; NaN compares equal to an identical NaN.
    fn bits_eq(self, other: Self) -> bool;
}

macro_rules! impl_int_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn write_ne_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_ne_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0_u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            fn into_buffer(data: Vec<Self>) -> TypedBuffer {
                TypedBuffer::$variant(data)
            }

            fn slice(buffer: &TypedBuffer) -> Option<&[Self]> {
                match buffer {
                    TypedBuffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut TypedBuffer) -> Option<&mut [Self]> {
                match buffer {
                    TypedBuffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn bits_eq(self, other: Self) -> bool {
                self == other
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn write_ne_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_ne_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0_u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            fn into_buffer(data: Vec<Self>) -> TypedBuffer {
                TypedBuffer::$variant(data)
            }

            fn slice(buffer: &TypedBuffer) -> Option<&[Self]> {
                match buffer {
                    TypedBuffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut TypedBuffer) -> Option<&mut [Self]> {
                match buffer {
                    TypedBuffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn bits_eq(self, other: Self) -> bool {
                self.to_bits() == other.to_bits()
            }
        }
    };
}

macro_rules! impl_complex_element {
    ($t:ty, $part:ty, $variant:ident) => {
        impl Element for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn write_ne_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.re.to_ne_bytes());
                out.extend_from_slice(&self.im.to_ne_bytes());
            }

            fn read_ne_bytes(bytes: &[u8]) -> Self {
                let part = std::mem::size_of::<$part>();
                let mut raw = [0_u8; std::mem::size_of::<$part>()];
                raw.copy_from_slice(&bytes[..part]);
                let re = <$part>::from_ne_bytes(raw);
                raw.copy_from_slice(&bytes[part..]);
                let im = <$part>::from_ne_bytes(raw);
                Self::new(re, im)
            }

            fn into_buffer(data: Vec<Self>) -> TypedBuffer {
                TypedBuffer::$variant(data)
            }

            fn slice(buffer: &TypedBuffer) -> Option<&[Self]> {
                match buffer {
                    TypedBuffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut TypedBuffer) -> Option<&mut [Self]> {
                match buffer {
                    TypedBuffer::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn bits_eq(self, other: Self) -> bool {
                self.re.to_bits() == other.re.to_bits()
                    && self.im.to_bits() == other.im.to_bits()
            }
        }
    };
}

impl_int_element!(i8, I8);
impl_int_element!(i16, I16);
impl_int_element!(i32, I32);
impl_int_element!(i64, I64);
impl_float_element!(f16, F16);
impl_float_element!(f32, F32);
impl_float_element!(f64, F64);
impl_complex_element!(Complex32, f32, C64);
impl_complex_element!(Complex64, f64, C128);

/// A buffer incompatible with its target.
#[derive(Clone, Debug, Error)]
pub enum BufferError {
    /// An element type with no lossless conversion to the target.
    #[error("a buffer of {got} cannot be losslessly converted to {expected}")]
    DtypeMismatch {
        /// Required element type.
        expected: ElementType,
        /// Supplied element type.
        got: ElementType,
    },
    /// A buffer of the wrong length.
    #[error("buffer holds {got} elements, expected {expected}")]
    LengthMismatch {
        /// Required number of elements.
        expected: usize,
        /// Supplied number of elements.
        got: usize,
    },
    /// A region outside the buffer's shape.
    #[error(transparent)]
    OutOfShape(#[from] BoundsOutOfShapeError),
    /// A byte stream that does not hold a whole number of elements.
    #[error("a byte stream of length {0} does not hold whole {1} elements")]
    RaggedBytes(usize, ElementType),
    /// A JSON value that does not decode as a scalar of the element type.
    #[error("value {0} does not decode as a {1} scalar")]
    IncompatibleScalar(String, ElementType),
}

/// A dense buffer, tagged by element type.
///
/// Elements are stored in row-major order of the region they describe.
#[derive(Clone, PartialEq, Debug)]
pub enum TypedBuffer {
    /// `int8` elements.
    I8(Vec<i8>),
    /// `int16` elements.
    I16(Vec<i16>),
    /// `int32` elements.
    I32(Vec<i32>),
    /// `int64` elements.
    I64(Vec<i64>),
    /// `float16` elements.
    F16(Vec<f16>),
    /// `float32` elements.
    F32(Vec<f32>),
    /// `float64` elements.
    F64(Vec<f64>),
    /// `complex64` elements.
    C64(Vec<Complex32>),
    /// `complex128` elements.
    C128(Vec<Complex64>),
}

macro_rules! map_variants {
    ($buffer:expr, $data:ident => $expr:expr) => {
        match $buffer {
            $crate::buffer::TypedBuffer::I8($data) => $expr,
            $crate::buffer::TypedBuffer::I16($data) => $expr,
            $crate::buffer::TypedBuffer::I32($data) => $expr,
            $crate::buffer::TypedBuffer::I64($data) => $expr,
            $crate::buffer::TypedBuffer::F16($data) => $expr,
            $crate::buffer::TypedBuffer::F32($data) => $expr,
            $crate::buffer::TypedBuffer::F64($data) => $expr,
            $crate::buffer::TypedBuffer::C64($data) => $expr,
            $crate::buffer::TypedBuffer::C128($data) => $expr,
        }
    };
}

pub(crate) use map_variants;

impl TypedBuffer {
    /// The element type of the buffer.
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::I8(_) => ElementType::I8,
            Self::I16(_) => ElementType::I16,
            Self::I32(_) => ElementType::I32,
            Self::I64(_) => ElementType::I64,
            Self::F16(_) => ElementType::F16,
            Self::F32(_) => ElementType::F32,
            Self::F64(_) => ElementType::F64,
            Self::C64(_) => ElementType::C64,
            Self::C128(_) => ElementType::C128,
        }
    }

    /// The number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        map_variants!(self, data => data.len())
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A buffer of `len` copies of `fill`.
    #[must_use]
    pub fn filled(fill: Scalar, len: usize) -> Self {
        match fill {
            Scalar::I8(v) => Self::I8(vec![v; len]),
            Scalar::I16(v) => Self::I16(vec![v; len]),
            Scalar::I32(v) => Self::I32(vec![v; len]),
            Scalar::I64(v) => Self::I64(vec![v; len]),
            Scalar::F16(v) => Self::F16(vec![v; len]),
            Scalar::F32(v) => Self::F32(vec![v; len]),
            Scalar::F64(v) => Self::F64(vec![v; len]),
            Scalar::C64(v) => Self::C64(vec![v; len]),
            Scalar::C128(v) => Self::C128(vec![v; len]),
        }
    }

    /// Wrap a typed vector.
    #[must_use]
    pub fn from_elements<T: Element>(data: Vec<T>) -> Self {
        T::into_buffer(data)
    }

    /// Borrow the elements if `T` matches the buffer's element type.
    #[must_use]
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    /// Mutably borrow the elements if `T` matches the buffer's element type.
    #[must_use]
    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        T::slice_mut(self)
    }

    /// The element at `index`, if in range.
    #[must_use]
    pub fn scalar_at(&self, index: usize) -> Option<Scalar> {
        match self {
            Self::I8(data) => data.get(index).map(|v| Scalar::I8(*v)),
            Self::I16(data) => data.get(index).map(|v| Scalar::I16(*v)),
            Self::I32(data) => data.get(index).map(|v| Scalar::I32(*v)),
            Self::I64(data) => data.get(index).map(|v| Scalar::I64(*v)),
            Self::F16(data) => data.get(index).map(|v| Scalar::F16(*v)),
            Self::F32(data) => data.get(index).map(|v| Scalar::F32(*v)),
            Self::F64(data) => data.get(index).map(|v| Scalar::F64(*v)),
            Self::C64(data) => data.get(index).map(|v| Scalar::C64(*v)),
            Self::C128(data) => data.get(index).map(|v| Scalar::C128(*v)),
        }
    }

    /// Returns true if every element equals `value` bitwise. NaN fill values
    /// compare equal to themselves.
    #[must_use]
    pub fn is_all(&self, value: Scalar) -> bool {
        fn all_eq<T: Element>(data: &[T], value: Scalar) -> bool {
            match T::from_scalar(value) {
                Some(value) => data.iter().all(|v| v.bits_eq(value)),
                None => false,
            }
        }
        map_variants!(self, data => all_eq(data, value))
    }

    /// The native-endian byte representation, row-major.
    #[must_use]
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        fn to_bytes<T: Element>(data: &[T]) -> Vec<u8> {
            let mut out = Vec::with_capacity(data.len() * T::ELEMENT_TYPE.size());
            for element in data {
                element.write_ne_bytes(&mut out);
            }
            out
        }
        map_variants!(self, data => to_bytes(data))
    }

    /// Decode a native-endian byte stream.
    ///
    /// # Errors
    /// Returns [`BufferError::RaggedBytes`] if `bytes` does not hold a whole
    /// number of elements.
    pub fn from_ne_bytes(element_type: ElementType, bytes: &[u8]) -> Result<Self, BufferError> {
        fn from_bytes<T: Element>(bytes: &[u8]) -> Result<TypedBuffer, BufferError> {
            let size = T::ELEMENT_TYPE.size();
            if bytes.len() % size != 0 {
                return Err(BufferError::RaggedBytes(bytes.len(), T::ELEMENT_TYPE));
            }
            Ok(T::into_buffer(
                bytes.chunks_exact(size).map(T::read_ne_bytes).collect(),
            ))
        }
        match element_type {
            ElementType::I8 => from_bytes::<i8>(bytes),
            ElementType::I16 => from_bytes::<i16>(bytes),
            ElementType::I32 => from_bytes::<i32>(bytes),
            ElementType::I64 => from_bytes::<i64>(bytes),
            ElementType::F16 => from_bytes::<f16>(bytes),
            ElementType::F32 => from_bytes::<f32>(bytes),
            ElementType::F64 => from_bytes::<f64>(bytes),
            ElementType::C64 => from_bytes::<Complex32>(bytes),
            ElementType::C128 => from_bytes::<Complex64>(bytes),
        }
    }

    /// Convert to `element_type`, allowing only lossless widenings
    /// (e.g. `int8` → `int32`, `float32` → `float64` or `complex64`).
    ///
    /// # Errors
    /// Returns [`BufferError::DtypeMismatch`] if the conversion would be
    /// lossy.
    pub fn convert_to(&self, element_type: ElementType) -> Result<Self, BufferError> {
        fn map<A: Copy, B>(data: &[A], f: impl Fn(A) -> B) -> Vec<B> {
            data.iter().copied().map(f).collect()
        }
        if self.element_type() == element_type {
            return Ok(self.clone());
        }
        use ElementType as E;
        Ok(match (self, element_type) {
            (Self::I8(v), E::I16) => Self::I16(map(v, i16::from)),
            (Self::I8(v), E::I32) => Self::I32(map(v, i32::from)),
            (Self::I8(v), E::I64) => Self::I64(map(v, i64::from)),
            (Self::I8(v), E::F32) => Self::F32(map(v, f32::from)),
            (Self::I8(v), E::F64) => Self::F64(map(v, f64::from)),
            (Self::I8(v), E::C64) => Self::C64(map(v, |x| Complex32::new(f32::from(x), 0.0))),
            (Self::I8(v), E::C128) => Self::C128(map(v, |x| Complex64::new(f64::from(x), 0.0))),
            (Self::I16(v), E::I32) => Self::I32(map(v, i32::from)),
            (Self::I16(v), E::I64) => Self::I64(map(v, i64::from)),
            (Self::I16(v), E::F32) => Self::F32(map(v, f32::from)),
            (Self::I16(v), E::F64) => Self::F64(map(v, f64::from)),
            (Self::I16(v), E::C64) => Self::C64(map(v, |x| Complex32::new(f32::from(x), 0.0))),
            (Self::I16(v), E::C128) => Self::C128(map(v, |x| Complex64::new(f64::from(x), 0.0))),
            (Self::I32(v), E::I64) => Self::I64(map(v, i64::from)),
            (Self::I32(v), E::F64) => Self::F64(map(v, f64::from)),
            (Self::I32(v), E::C128) => Self::C128(map(v, |x| Complex64::new(f64::from(x), 0.0))),
            (Self::F16(v), E::F32) => Self::F32(map(v, f32::from)),
            (Self::F16(v), E::F64) => Self::F64(map(v, f64::from)),
            (Self::F16(v), E::C64) => Self::C64(map(v, |x| Complex32::new(f32::from(x), 0.0))),
            (Self::F16(v), E::C128) => Self::C128(map(v, |x| Complex64::new(f64::from(x), 0.0))),
            (Self::F32(v), E::F64) => Self::F64(map(v, f64::from)),
            (Self::F32(v), E::C64) => Self::C64(map(v, |x| Complex32::new(x, 0.0))),
            (Self::F32(v), E::C128) => Self::C128(map(v, |x| Complex64::new(f64::from(x), 0.0))),
            (Self::F64(v), E::C128) => Self::C128(map(v, |x| Complex64::new(x, 0.0))),
            (Self::C64(v), E::C128) => Self::C128(map(v, |x| {
                Complex64::new(f64::from(x.re), f64::from(x.im))
            })),
            _ => {
                return Err(BufferError::DtypeMismatch {
                    expected: element_type,
                    got: self.element_type(),
                })
            }
        })
    }

    /// Extract the elements of `region` from a buffer shaped `shape`.
    ///
    /// # Errors
    /// Returns a [`BufferError`] if the region does not fit in `shape` or the
    /// buffer length does not match `shape`.
    pub fn extract_region(&self, shape: &[u64], region: &Bounds) -> Result<Self, BufferError> {
        fn extract<T: Element>(
            data: &[T],
            shape: &[u64],
            region: &Bounds,
        ) -> Result<TypedBuffer, BufferError> {
            check_len(data.len(), shape)?;
            let mut out = Vec::with_capacity(region.num_elements() as usize);
            for (offset, len) in region.contiguous_spans(shape)? {
                let offset = offset as usize;
                out.extend_from_slice(&data[offset..offset + len as usize]);
            }
            Ok(T::into_buffer(out))
        }
        map_variants!(self, data => extract(data, shape, region))
    }

    /// Write `source` into `region` of a buffer shaped `shape`.
    ///
    /// # Errors
    /// Returns a [`BufferError`] if the element types differ, the region does
    /// not fit in `shape`, or a buffer length is wrong.
    pub fn write_region(
        &mut self,
        shape: &[u64],
        region: &Bounds,
        source: &Self,
    ) -> Result<(), BufferError> {
        fn write<T: Element>(
            data: &mut [T],
            shape: &[u64],
            region: &Bounds,
            source: &TypedBuffer,
        ) -> Result<(), BufferError> {
            check_len(data.len(), shape)?;
            let source = T::slice(source).ok_or(BufferError::DtypeMismatch {
                expected: T::ELEMENT_TYPE,
                got: source.element_type(),
            })?;
            if source.len() as u64 != region.num_elements() {
                return Err(BufferError::LengthMismatch {
                    expected: region.num_elements() as usize,
                    got: source.len(),
                });
            }
            let mut cursor = 0_usize;
            for (offset, len) in region.contiguous_spans(shape)? {
                let offset = offset as usize;
                let len = len as usize;
                data[offset..offset + len].copy_from_slice(&source[cursor..cursor + len]);
                cursor += len;
            }
            Ok(())
        }
        map_variants!(self, data => write(data, shape, region, source))
    }

    /// Set every element of `region` to `fill`.
    ///
    /// # Errors
    /// Returns a [`BufferError`] if the region does not fit in `shape`, the
    /// buffer length is wrong, or `fill` has the wrong element type.
    pub fn fill_region(
        &mut self,
        shape: &[u64],
        region: &Bounds,
        fill: Scalar,
    ) -> Result<(), BufferError> {
        fn fill_in<T: Element>(
            data: &mut [T],
            shape: &[u64],
            region: &Bounds,
            fill: Scalar,
        ) -> Result<(), BufferError> {
            check_len(data.len(), shape)?;
            let fill = T::from_scalar(fill).ok_or(BufferError::DtypeMismatch {
                expected: T::ELEMENT_TYPE,
                got: fill.element_type(),
            })?;
            for (offset, len) in region.contiguous_spans(shape)? {
                let offset = offset as usize;
                data[offset..offset + len as usize].fill(fill);
            }
            Ok(())
        }
        map_variants!(self, data => fill_in(data, shape, region, fill))
    }
}

fn check_len(len: usize, shape: &[u64]) -> Result<(), BufferError> {
    let expected = shape.iter().product::<u64>() as usize;
    if len == expected {
        Ok(())
    } else {
        Err(BufferError::LengthMismatch { expected, got: len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let buffer = TypedBuffer::F32(vec![1.5, -2.0, f32::NAN]);
        let bytes = buffer.to_ne_bytes();
        assert_eq!(bytes.len(), 12);
        let back = TypedBuffer::from_ne_bytes(ElementType::F32, &bytes).unwrap();
        assert!(!back.is_all(Scalar::F32(1.5)));
        let slice = back.as_slice::<f32>().unwrap();
        assert_eq!(slice[0], 1.5);
        assert!(slice[2].is_nan());
        assert!(TypedBuffer::from_ne_bytes(ElementType::F32, &bytes[..7]).is_err());
    }

    #[test]
    fn complex_bytes_round_trip() {
        let buffer = TypedBuffer::C128(vec![Complex64::new(1.0, -2.0)]);
        let back = TypedBuffer::from_ne_bytes(ElementType::C128, &buffer.to_ne_bytes()).unwrap();
        assert_eq!(back, buffer);
    }

    #[test]
    fn lossless_widening() {
        let ints = TypedBuffer::I8(vec![1, 2, 3]);
        assert_eq!(
            ints.convert_to(ElementType::I32).unwrap(),
            TypedBuffer::I32(vec![1, 2, 3])
        );
        assert_eq!(
            ints.convert_to(ElementType::F64).unwrap(),
            TypedBuffer::F64(vec![1.0, 2.0, 3.0])
        );
        let floats = TypedBuffer::F64(vec![1.0]);
        assert!(matches!(
            floats.convert_to(ElementType::F32),
            Err(BufferError::DtypeMismatch { .. })
        ));
        assert!(matches!(
            TypedBuffer::I64(vec![1]).convert_to(ElementType::F64),
            Err(BufferError::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn nan_fill_compares_equal() {
        let buffer = TypedBuffer::filled(Scalar::F64(f64::NAN), 4);
        assert!(buffer.is_all(Scalar::F64(f64::NAN)));
        assert!(!buffer.is_all(Scalar::F64(0.0)));
    }

    #[test]
    fn region_round_trip() {
        // 4x4 buffer of zeros; write a 2x2 block, read it back.
        let mut buffer = TypedBuffer::filled(Scalar::I32(0), 16);
        let region = Bounds::from_ranges(&[1..3, 1..3]);
        let block = TypedBuffer::I32(vec![1, 2, 3, 4]);
        buffer.write_region(&[4, 4], &region, &block).unwrap();
        assert_eq!(buffer.extract_region(&[4, 4], &region).unwrap(), block);
        assert_eq!(
            buffer.as_slice::<i32>().unwrap(),
            &[0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0, 0, 0, 0, 0]
        );
        buffer
            .fill_region(&[4, 4], &region, Scalar::I32(9))
            .unwrap();
        assert_eq!(
            buffer.extract_region(&[4, 4], &region).unwrap(),
            TypedBuffer::I32(vec![9, 9, 9, 9])
        );
    }

    #[test]
    fn scalar_json_round_trip() {
        let fill = Scalar::F64(f64::NAN);
        let json = fill.to_json();
        assert_eq!(json, serde_json::json!("NaN"));
        match Scalar::from_json(ElementType::F64, &json).unwrap() {
            Scalar::F64(v) => assert!(v.is_nan()),
            _ => panic!("expected a float64 scalar"),
        }
        assert!(Scalar::from_json(ElementType::I8, &serde_json::json!(1000)).is_err());
        assert_eq!(
            Scalar::from_json(ElementType::C64, &serde_json::json!([1.0, 2.0])).unwrap(),
            Scalar::C64(Complex32::new(1.0, 2.0))
        );
    }
}
