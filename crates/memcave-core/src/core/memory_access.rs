use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Page protection requested when allocating target memory.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MemoryAccess: u8 {
        /// Readable.
        const R = 0b001;

        /// Writable.
        const W = 0b010;

        /// Executable.
        const X = 0b100;

        /// Readable and writable.
        const RW = Self::R.bits() | Self::W.bits();

        /// Readable and executable.
        const RX = Self::R.bits() | Self::X.bits();

        /// Readable, writable and executable. Code caves are allocated with
        /// this protection.
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

impl std::fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let flag = |bit, c| if self.contains(bit) { c } else { '-' };

        write!(
            f,
            "{}{}{}",
            flag(MemoryAccess::R, 'r'),
            flag(MemoryAccess::W, 'w'),
            flag(MemoryAccess::X, 'x')
        )
    }
}
