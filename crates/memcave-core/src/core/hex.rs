use std::fmt;

/// A hexadecimal representation of a value.
///
/// Integers are zero-padded to their natural width. Byte slices are shown
/// as space-separated pairs, which is how patches and images are logged.
///
/// # Examples
///
/// ```
/// # use memcave_core::Hex;
/// assert_eq!(format!("{}", Hex(42u16)), "0x002a");
/// assert_eq!(format!("{}", Hex(&[0xe8u8, 0xfb][..])), "e8 fb");
/// ```
pub struct Hex<T>(pub T);

macro_rules! impl_integer {
    ($($type:ty),*) => {
        $(
            impl fmt::Display for Hex<$type> {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "0x{:0width$x}", self.0, width = size_of::<$type>() * 2)
                }
            }

            impl fmt::Debug for Hex<$type> {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    fmt::Display::fmt(self, f)
                }
            }
        )*
    };
}

impl_integer!(u8, u16, u32, u64, i8, i16, i32, i64);

fn fmt_bytes(f: &mut fmt::Formatter, bytes: &[u8]) -> fmt::Result {
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            f.write_str(" ")?;
        }

        write!(f, "{byte:02x}")?;
    }

    Ok(())
}

impl fmt::Display for Hex<&[u8]> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_bytes(f, self.0)
    }
}

impl fmt::Debug for Hex<&[u8]> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        fmt_bytes(f, self.0)?;
        write!(f, "]")
    }
}

impl fmt::Display for Hex<&Vec<u8>> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_bytes(f, self.0)
    }
}

impl fmt::Debug for Hex<&Vec<u8>> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&Hex(self.0.as_slice()), f)
    }
}
