//! Conversion of scalar values to and from target byte order.
//!
//! Every typed memory access goes through this module. Values are encoded
//! in host-native order and reversed when the target uses the opposite
//! endianness. Pointers additionally pass through [`convert_pointer`], which
//! applies the [`TruncationPolicy`] whenever the host and target pointer
//! widths differ.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{MemcaveError, Va};

/// Encoded bytes of a single scalar value.
pub type ValueBytes = SmallVec<[u8; 8]>;

/// Byte order of the target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    /// The byte order of the host.
    #[default]
    Default,

    /// Least significant byte first.
    Little,

    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// Returns the byte order of the host.
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        }
        else {
            Self::Big
        }
    }

    /// Resolves [`Endianness::Default`] to the host byte order.
    pub const fn resolve(self) -> Self {
        match self {
            Self::Default => Self::host(),
            other => other,
        }
    }

    /// Checks whether values in this byte order need no reversal.
    pub fn is_host(self) -> bool {
        self.resolve() == Self::host()
    }
}

/// Pointer width of the target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerWidth {
    /// The pointer width of the host.
    #[default]
    Default,

    /// 32-bit pointers.
    Bits32,

    /// 64-bit pointers.
    Bits64,
}

impl PointerWidth {
    /// Returns the pointer width of the host.
    pub const fn host() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Bits64
        }
        else {
            Self::Bits32
        }
    }

    /// Resolves [`PointerWidth::Default`] to the host pointer width.
    pub const fn resolve(self) -> Self {
        match self {
            Self::Default => Self::host(),
            other => other,
        }
    }

    /// Returns the size of a pointer in bytes.
    pub const fn bytes(self) -> usize {
        match self.resolve() {
            Self::Bits32 => 4,
            _ => 8,
        }
    }

    /// Returns the size of a pointer in bits.
    pub const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// How pointers are converted when host and target pointer widths differ.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TruncationPolicy {
    /// Refuse the conversion.
    #[default]
    Throw,

    /// Convert, and fail if the value does not survive the round trip.
    SafeTruncate,

    /// Convert, discarding any bits that do not fit.
    UnsafeTruncate,
}

/// Codec settings of a target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Byte order of the target.
    pub endianness: Endianness,

    /// Pointer width of the target.
    pub pointer_width: PointerWidth,

    /// Pointer conversion policy.
    pub truncation_policy: TruncationPolicy,
}

impl CodecConfig {
    /// Encodes a value with these settings.
    pub fn encode(&self, value: &Value) -> Result<ValueBytes, MemcaveError> {
        encode(
            value,
            self.endianness,
            self.pointer_width,
            self.truncation_policy,
        )
    }

    /// Decodes a value with these settings.
    pub fn decode(&self, bytes: &[u8], value_type: ValueType) -> Result<Value, MemcaveError> {
        decode(
            bytes,
            value_type,
            self.endianness,
            self.pointer_width,
            self.truncation_policy,
        )
    }

    /// Returns the encoded size of a value type with these settings.
    pub fn size_of(&self, value_type: ValueType) -> usize {
        value_type.size(self.pointer_width)
    }
}

/// Type of a scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Single precision float.
    F32,
    /// Double precision float.
    F64,
    /// Target pointer.
    Pointer,
}

impl ValueType {
    /// Returns the encoded size in bytes.
    ///
    /// The size of [`ValueType::Pointer`] depends on the target pointer width.
    pub const fn size(self, pointer_width: PointerWidth) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Pointer => pointer_width.bytes(),
        }
    }

    /// Returns the canonical name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Pointer => "pointer",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = MemcaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "u8" | "byte" => Self::U8,
            "i16" | "short" => Self::I16,
            "i32" | "int" => Self::I32,
            "i64" | "long" => Self::I64,
            "u16" | "ushort" => Self::U16,
            "u32" | "uint" => Self::U32,
            "u64" | "ulong" => Self::U64,
            "f32" | "float" => Self::F32,
            "f64" | "double" => Self::F64,
            "pointer" | "ptr" => Self::Pointer,
            _ => return Err(MemcaveError::UnsupportedType(s.to_string())),
        })
    }
}

/// A scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Single precision float.
    F32(f32),
    /// Double precision float.
    F64(f64),
    /// Pointer, held at host width.
    Pointer(Va),
}

impl Value {
    /// Returns the type of the value.
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::U8(_) => ValueType::U8,
            Self::I16(_) => ValueType::I16,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::U16(_) => ValueType::U16,
            Self::U32(_) => ValueType::U32,
            Self::U64(_) => ValueType::U64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Pointer(_) => ValueType::Pointer,
        }
    }
}

/// A Rust type that maps onto exactly one [`ValueType`].
pub trait Scalar: Copy {
    /// The codec type of `Self`.
    const TYPE: ValueType;

    /// Wraps `self` into a [`Value`].
    fn into_value(self) -> Value;

    /// Unwraps a [`Value`] of the matching type.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($($type:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $type {
                const TYPE: ValueType = ValueType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            }

            impl From<$type> for Value {
                fn from(value: $type) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_scalar! {
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Va => Pointer,
}

/// Converts a pointer value between pointer widths.
///
/// Equal widths pass the value through unchanged, provided it fits.
/// Otherwise the `policy` decides: [`TruncationPolicy::Throw`] refuses,
/// [`TruncationPolicy::SafeTruncate`] converts and rejects any value whose
/// discarded high bits are nonzero, and [`TruncationPolicy::UnsafeTruncate`]
/// masks the value to the destination width.
pub fn convert_pointer(
    value: u64,
    from: PointerWidth,
    to: PointerWidth,
    policy: TruncationPolicy,
) -> Result<u64, MemcaveError> {
    let from = from.resolve();
    let to = to.resolve();

    if from != to && policy == TruncationPolicy::Throw {
        return Err(MemcaveError::PointerSizeMismatch { from, to });
    }

    let converted = match to {
        PointerWidth::Bits32 => value & u64::from(u32::MAX),
        _ => value,
    };

    // Widening the converted value back must reproduce the original.
    if (from == to || policy == TruncationPolicy::SafeTruncate) && converted != value {
        return Err(MemcaveError::PointerDataLoss { value, width: to });
    }

    Ok(converted)
}

/// Encodes a value into target byte order.
pub fn encode(
    value: &Value,
    endianness: Endianness,
    pointer_width: PointerWidth,
    policy: TruncationPolicy,
) -> Result<ValueBytes, MemcaveError> {
    let mut bytes = match *value {
        Value::U8(value) => return Ok(smallvec::smallvec![value]),
        Value::I16(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::I32(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::I64(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::U16(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::U32(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::U64(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::F32(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::F64(value) => ValueBytes::from_slice(&value.to_ne_bytes()),
        Value::Pointer(va) => {
            let target = pointer_width.resolve();
            let value = convert_pointer(va.0, PointerWidth::host(), target, policy)?;

            match target {
                PointerWidth::Bits32 => ValueBytes::from_slice(&(value as u32).to_ne_bytes()),
                _ => ValueBytes::from_slice(&value.to_ne_bytes()),
            }
        }
    };

    if !endianness.is_host() {
        bytes.reverse();
    }

    Ok(bytes)
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], MemcaveError> {
    bytes.try_into().map_err(|_| MemcaveError::SizeMismatch {
        expected: N,
        actual: bytes.len(),
    })
}

/// Decodes a value from target byte order.
///
/// The length of `bytes` must equal the encoded size of `value_type`.
pub fn decode(
    bytes: &[u8],
    value_type: ValueType,
    endianness: Endianness,
    pointer_width: PointerWidth,
    policy: TruncationPolicy,
) -> Result<Value, MemcaveError> {
    let expected = value_type.size(pointer_width);
    if bytes.len() != expected {
        return Err(MemcaveError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let mut bytes = ValueBytes::from_slice(bytes);
    if !endianness.is_host() {
        bytes.reverse();
    }

    Ok(match value_type {
        ValueType::U8 => Value::U8(bytes[0]),
        ValueType::I16 => Value::I16(i16::from_ne_bytes(array(&bytes)?)),
        ValueType::I32 => Value::I32(i32::from_ne_bytes(array(&bytes)?)),
        ValueType::I64 => Value::I64(i64::from_ne_bytes(array(&bytes)?)),
        ValueType::U16 => Value::U16(u16::from_ne_bytes(array(&bytes)?)),
        ValueType::U32 => Value::U32(u32::from_ne_bytes(array(&bytes)?)),
        ValueType::U64 => Value::U64(u64::from_ne_bytes(array(&bytes)?)),
        ValueType::F32 => Value::F32(f32::from_ne_bytes(array(&bytes)?)),
        ValueType::F64 => Value::F64(f64::from_ne_bytes(array(&bytes)?)),
        ValueType::Pointer => {
            let target = pointer_width.resolve();
            let raw = match target {
                PointerWidth::Bits32 => u64::from(u32::from_ne_bytes(array(&bytes)?)),
                _ => u64::from_ne_bytes(array(&bytes)?),
            };

            Value::Pointer(Va(convert_pointer(
                raw,
                target,
                PointerWidth::host(),
                policy,
            )?))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const ENDIANNESS: [Endianness; 3] = [Endianness::Default, Endianness::Little, Endianness::Big];

    fn samples() -> Vec<Value> {
        vec![
            Value::U8(0xab),
            Value::I16(-2),
            Value::I32(-123_456),
            Value::I64(i64::MIN + 7),
            Value::U16(0xbeef),
            Value::U32(0xdead_beef),
            Value::U64(0x0123_4567_89ab_cdef),
            Value::F32(3.5),
            Value::F64(-1.0e300),
            Value::Pointer(Va(0x7ff0_1234)),
        ]
    }

    #[test]
    fn round_trip_at_host_width() -> Result<(), MemcaveError> {
        for endianness in ENDIANNESS {
            for value in samples() {
                for policy in [
                    TruncationPolicy::Throw,
                    TruncationPolicy::SafeTruncate,
                    TruncationPolicy::UnsafeTruncate,
                ] {
                    let bytes = encode(&value, endianness, PointerWidth::Default, policy)?;
                    assert_eq!(bytes.len(), value.value_type().size(PointerWidth::Default));

                    let decoded = decode(
                        &bytes,
                        value.value_type(),
                        endianness,
                        PointerWidth::Default,
                        policy,
                    )?;
                    assert_eq!(decoded, value);
                }
            }
        }

        Ok(())
    }

    #[test]
    fn byte_order() -> Result<(), MemcaveError> {
        let value = Value::U32(0x1122_3344);
        let config = CodecConfig {
            endianness: Endianness::Big,
            ..Default::default()
        };
        assert_eq!(config.encode(&value)?.as_slice(), &[0x11, 0x22, 0x33, 0x44]);

        let config = CodecConfig {
            endianness: Endianness::Little,
            ..Default::default()
        };
        assert_eq!(config.encode(&value)?.as_slice(), &[0x44, 0x33, 0x22, 0x11]);
        Ok(())
    }

    #[test]
    fn single_byte_ignores_endianness() -> Result<(), MemcaveError> {
        for endianness in ENDIANNESS {
            let bytes = encode(
                &Value::U8(0x7f),
                endianness,
                PointerWidth::Default,
                TruncationPolicy::Throw,
            )?;
            assert_eq!(bytes.as_slice(), &[0x7f]);
        }

        Ok(())
    }

    #[test]
    fn wrong_length_is_rejected() {
        let config = CodecConfig::default();

        let err = config.decode(&[], ValueType::U8).unwrap_err();
        assert!(matches!(
            err,
            MemcaveError::SizeMismatch {
                expected: 1,
                actual: 0
            }
        ));

        let err = config.decode(&[0; 3], ValueType::U32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn pointer_conversion_throw() {
        let err = convert_pointer(
            0x1234,
            PointerWidth::Bits64,
            PointerWidth::Bits32,
            TruncationPolicy::Throw,
        )
        .unwrap_err();
        assert!(matches!(err, MemcaveError::PointerSizeMismatch { .. }));

        let err = convert_pointer(
            0x1234,
            PointerWidth::Bits32,
            PointerWidth::Bits64,
            TruncationPolicy::Throw,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Pointer);
    }

    #[test]
    fn pointer_conversion_safe_truncate() -> Result<(), MemcaveError> {
        let narrowed = convert_pointer(
            0x1234,
            PointerWidth::Bits64,
            PointerWidth::Bits32,
            TruncationPolicy::SafeTruncate,
        )?;
        assert_eq!(narrowed, 0x1234);

        let widened = convert_pointer(
            narrowed,
            PointerWidth::Bits32,
            PointerWidth::Bits64,
            TruncationPolicy::SafeTruncate,
        )?;
        assert_eq!(widened, 0x1234);

        let err = convert_pointer(
            0x1_0000_0000,
            PointerWidth::Bits64,
            PointerWidth::Bits32,
            TruncationPolicy::SafeTruncate,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MemcaveError::PointerDataLoss {
                value: 0x1_0000_0000,
                width: PointerWidth::Bits32
            }
        ));

        Ok(())
    }

    #[test]
    fn pointer_conversion_unsafe_truncate() -> Result<(), MemcaveError> {
        let narrowed = convert_pointer(
            0x1_0000_1234,
            PointerWidth::Bits64,
            PointerWidth::Bits32,
            TruncationPolicy::UnsafeTruncate,
        )?;
        assert_eq!(narrowed, 0x1234);
        Ok(())
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn pointer_encode_to_narrower_target() -> Result<(), MemcaveError> {
        let config = CodecConfig {
            endianness: Endianness::Little,
            pointer_width: PointerWidth::Bits32,
            truncation_policy: TruncationPolicy::SafeTruncate,
        };

        let bytes = config.encode(&Value::Pointer(Va(0x1234)))?;
        assert_eq!(bytes.as_slice(), &[0x34, 0x12, 0x00, 0x00]);
        assert_eq!(
            config.decode(&bytes, ValueType::Pointer)?,
            Value::Pointer(Va(0x1234))
        );

        let err = config
            .encode(&Value::Pointer(Va(0x1_0000_0000)))
            .unwrap_err();
        assert!(matches!(err, MemcaveError::PointerDataLoss { .. }));
        Ok(())
    }

    #[test]
    fn value_type_names() -> Result<(), MemcaveError> {
        assert_eq!("u32".parse::<ValueType>()?, ValueType::U32);
        assert_eq!("Double".parse::<ValueType>()?, ValueType::F64);
        assert_eq!("ptr".parse::<ValueType>()?, ValueType::Pointer);

        let err = "i128".parse::<ValueType>().unwrap_err();
        assert!(matches!(err, MemcaveError::UnsupportedType(name) if name == "i128"));
        Ok(())
    }

    #[test]
    fn scalar_mapping() {
        assert_eq!(u16::TYPE, ValueType::U16);
        assert_eq!(Va::from_value(Value::Pointer(Va(8))), Some(Va(8)));
        assert_eq!(u32::from_value(Value::I32(1)), None);
        assert_eq!(Value::from(1.5f64).value_type(), ValueType::F64);
    }
}
