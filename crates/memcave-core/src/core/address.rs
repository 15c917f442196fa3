use serde::{Deserialize, Serialize};

use super::macros::impl_address;

impl_address!(Va, u64, "Virtual address in the target process");

impl Va {
    /// Checks if the virtual address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// An address in the target process, possibly relative to a loaded module.
///
/// Module-relative addresses survive ASLR: the module base is looked up
/// through the driver each time the address is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryAddress {
    /// An absolute address.
    Absolute(Va),

    /// An offset from the base address of a loaded module.
    ModuleOffset {
        /// Module name, as reported by the driver (e.g. `game.exe`).
        module: String,

        /// Offset from the module base.
        offset: i64,
    },
}

impl MemoryAddress {
    /// Creates a module-relative address.
    pub fn module(module: impl Into<String>, offset: i64) -> Self {
        Self::ModuleOffset {
            module: module.into(),
            offset,
        }
    }
}

impl From<Va> for MemoryAddress {
    fn from(value: Va) -> Self {
        Self::Absolute(value)
    }
}

impl From<u64> for MemoryAddress {
    fn from(value: u64) -> Self {
        Self::Absolute(Va(value))
    }
}

impl std::fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Absolute(va) => write!(f, "{va}"),
            Self::ModuleOffset { module, offset } if *offset < 0 => {
                write!(f, "{module}-0x{:x}", offset.unsigned_abs())
            }
            Self::ModuleOffset { module, offset } => write!(f, "{module}+0x{offset:x}"),
        }
    }
}
