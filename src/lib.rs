//! Code cave injection and reversible memory patching for live processes.
//!
//! memcave writes blocks of machine code ("code caves") and typed variables
//! into the address space of another process, and patches existing code to
//! branch into them. Everything is expressed against the [`ProcessDriver`]
//! capability, so the same schema can be dry-run against a simulated
//! address space and then injected into a real process.
//!
//! The crate is a facade over the workspace members:
//!
//! - [`memcave_core`] (re-exported at the root): addresses, the value codec,
//!   the [`Target`] wrapper and [`MemcaveError`].
//! - [`arch`]: x86 branch encoding.
//! - [`driver`]: process drivers.
//! - [`utils`]: the [`injector`](utils::injector) and
//!   [`alteration`](utils::alteration) modules and a hexdump helper.

pub use memcave_core::*;

/// Instruction encoding.
#[cfg(feature = "arch-x86")]
pub mod arch {
    pub use memcave_arch_x86 as x86;
}

/// Process drivers.
pub mod driver {
    #[cfg(feature = "driver-memory")]
    pub use memcave_driver_memory as memory;
}

/// Injection and alteration utilities.
#[cfg(feature = "utils")]
pub mod utils {
    pub use memcave_utils::*;
}
