use memcave_core::{MemcaveError, ProcessDriver, Scalar, Target, Va};

/// Representation of memory for hexdump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Display memory as 8-bit values.
    U8,

    /// Display memory as 32-bit values.
    U32,

    /// Display memory as 64-bit values.
    U64,
}

impl Representation {
    fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    /// Width of one rendered column, including its leading spaces.
    fn column(self) -> usize {
        match self {
            Self::U8 => 3,
            Self::U32 => 12,
            Self::U64 => 24,
        }
    }
}

/// Renders a hexdump of `count` bytes of target memory at `address`.
///
/// Multi-byte columns are decoded with the target's byte order. A trailing
/// group shorter than the column width is left blank in the value columns
/// but still shown in the ASCII column.
pub fn hexdump<Driver>(
    target: &Target<Driver>,
    address: impl Into<Va>,
    count: usize,
    representation: Representation,
) -> Result<String, MemcaveError>
where
    Driver: ProcessDriver,
{
    let address = address.into();
    let buf = target.read_bytes(address, count)?;

    let mut out = String::new();
    out.push_str(
        "--------------------|  0  1  2  3  4  5  6  7  8  9  A  B  C  D  E  F | 0123456789ABCDEF\n",
    );

    let width = representation.width();
    let per_row = 16 / width;

    for (index, chunk) in buf.chunks(16).enumerate() {
        let row = address.0.wrapping_add((index * 16) as u64);
        out.push_str(&format!(" 0x{row:016X} |"));

        let mut columns = 0;
        for word in chunk.chunks_exact(width) {
            let column = match representation {
                Representation::U8 => format!(" {:02X}", word[0]),
                Representation::U32 => format!("  0x{:08X}", decode::<_, u32>(target, word)?),
                Representation::U64 => format!("      0x{:016X}", decode::<_, u64>(target, word)?),
            };

            out.push_str(&column);
            columns += 1;
        }

        for _ in columns..per_row {
            out.push_str(&" ".repeat(representation.column()));
        }

        out.push_str(" | ");

        for &byte in chunk {
            out.push(if byte.is_ascii_graphic() {
                byte as char
            }
            else {
                '.'
            });
        }

        for _ in chunk.len()..16 {
            out.push(' ');
        }

        out.push('\n');
    }

    Ok(out)
}

fn decode<Driver, T>(target: &Target<Driver>, bytes: &[u8]) -> Result<T, MemcaveError>
where
    Driver: ProcessDriver,
    T: Scalar,
{
    let value = target.decode(bytes, T::TYPE)?;
    T::from_value(value).ok_or(MemcaveError::ValueTypeMismatch {
        expected: T::TYPE,
        actual: value.value_type(),
    })
}
