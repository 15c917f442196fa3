//! x86 branch encoding.
//!
//! Produces `CALL rel32`, short `JMP/Jcc rel8` and near `JMP/Jcc rel32`
//! instructions for detouring code into code caves. Every encoder pads its
//! output with `NOP` up to the caller-supplied size, so that a patch always
//! covers whole original instructions.
//!
//! Displacements are computed in 128-bit arithmetic and range-checked
//! before being narrowed. For 32-bit targets the address space wraps, so
//! displacements are taken modulo 2^32.

mod branch;

use memcave_core::{CodecConfig, MemcaveError, PointerWidth, Va, Value};
use smallvec::SmallVec;

pub use self::branch::{Branch, BranchDistance, BranchKind};

/// `NOP`.
pub const NOP: u8 = 0x90;

/// `INT3`.
pub const INT3: u8 = 0xcc;

/// `CALL rel32`.
pub const CALL_REL32: u8 = 0xe8;

/// Escape byte of the two-byte opcode map.
pub const TWO_BYTE_ESCAPE: u8 = 0x0f;

/// Length of `CALL rel32`.
pub const CALL_LENGTH: usize = 5;

/// Length of a short `JMP/Jcc rel8`.
pub const SHORT_JUMP_LENGTH: usize = 2;

/// Encoded instruction bytes, padding included.
pub type InstructionBytes = SmallVec<[u8; 16]>;

/// Computes `to - from - length`, the displacement of a relative branch of
/// `length` bytes located at `from`.
fn displacement(
    from: Va,
    to: Va,
    length: usize,
    pointer_width: PointerWidth,
) -> Result<i128, MemcaveError> {
    let pointer_width = pointer_width.resolve();

    if pointer_width == PointerWidth::Bits32 {
        for address in [from, to] {
            if address.0 > u64::from(u32::MAX) {
                return Err(MemcaveError::PointerDataLoss {
                    value: address.0,
                    width: pointer_width,
                });
            }
        }
    }

    let displacement = i128::from(to.0) - i128::from(from.0) - length as i128;

    match pointer_width {
        PointerWidth::Bits32 => Ok(i128::from(displacement as i32)),
        _ => Ok(displacement),
    }
}

fn pad(mut bytes: InstructionBytes, padding_size: usize) -> InstructionBytes {
    bytes.resize(padding_size, NOP);
    bytes
}

fn check_size(required: usize, padding_size: usize) -> Result<(), MemcaveError> {
    if padding_size < required {
        return Err(MemcaveError::InstructionTooLarge {
            required,
            available: padding_size,
        });
    }

    Ok(())
}

fn rel32(
    opcode: &[u8],
    from: Va,
    to: Va,
    padding_size: usize,
    codec: &CodecConfig,
) -> Result<InstructionBytes, MemcaveError> {
    let length = opcode.len() + 4;
    check_size(length, padding_size)?;

    let displacement = displacement(from, to, length, codec.pointer_width)?;
    let displacement = i32::try_from(displacement)
        .map_err(|_| MemcaveError::DisplacementOutOfRange {
            displacement,
            width: 4,
        })?;

    let mut bytes = InstructionBytes::from_slice(opcode);
    bytes.extend_from_slice(&codec.encode(&Value::I32(displacement))?);
    Ok(pad(bytes, padding_size))
}

/// Encodes `CALL rel32` at `from`, targeting `to`.
///
/// The instruction is followed by `padding_size - 5` `NOP` bytes.
pub fn encode_call(
    from: Va,
    to: Va,
    padding_size: usize,
    codec: &CodecConfig,
) -> Result<InstructionBytes, MemcaveError> {
    rel32(&[CALL_REL32], from, to, padding_size, codec)
}

/// Encodes a short (`rel8`) jump at `from`, targeting `to`.
///
/// The displacement must fit in a signed byte.
pub fn encode_near_jump(
    kind: BranchKind,
    from: Va,
    to: Va,
    padding_size: usize,
    pointer_width: PointerWidth,
) -> Result<InstructionBytes, MemcaveError> {
    let opcode = kind.rel8_opcode().ok_or_else(|| {
        MemcaveError::UnsupportedInstructionKind(format!("{kind} has no rel8 form"))
    })?;

    check_size(SHORT_JUMP_LENGTH, padding_size)?;

    let displacement = displacement(from, to, SHORT_JUMP_LENGTH, pointer_width)?;
    let displacement =
        i8::try_from(displacement).map_err(|_| MemcaveError::DisplacementOutOfRange {
            displacement,
            width: 1,
        })?;

    let bytes = InstructionBytes::from_slice(&[opcode, displacement as u8]);
    Ok(pad(bytes, padding_size))
}

/// Encodes a near (`rel32`) jump at `from`, targeting `to`.
///
/// `JMP` takes a one-byte opcode, conditional jumps take two.
pub fn encode_far_jump(
    kind: BranchKind,
    from: Va,
    to: Va,
    padding_size: usize,
    codec: &CodecConfig,
) -> Result<InstructionBytes, MemcaveError> {
    if kind == BranchKind::Call {
        return Err(MemcaveError::UnsupportedInstructionKind(format!(
            "{kind} is not a jump"
        )));
    }

    rel32(&kind.rel32_opcode(), from, to, padding_size, codec)
}

/// Encodes a [`Branch`] directive at `from`, targeting `to`.
pub fn encode_branch(
    branch: Branch,
    from: Va,
    to: Va,
    padding_size: usize,
    codec: &CodecConfig,
) -> Result<InstructionBytes, MemcaveError> {
    match (branch.kind, branch.distance) {
        (BranchKind::Call, BranchDistance::Far) => encode_call(from, to, padding_size, codec),
        (kind, BranchDistance::Near) => {
            encode_near_jump(kind, from, to, padding_size, codec.pointer_width)
        }
        (kind, BranchDistance::Far) => encode_far_jump(kind, from, to, padding_size, codec),
    }
}
