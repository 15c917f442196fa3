//! memcave utilities

#[cfg(feature = "alteration")]
pub mod alteration;

#[cfg(feature = "injector")]
pub mod injector;

mod hexdump;
pub use self::hexdump::{Representation, hexdump};
