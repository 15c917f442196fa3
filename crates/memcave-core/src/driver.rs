use crate::{MemcaveError, MemoryAccess, Va};

/// A trait for implementing a process driver.
///
/// The driver owns the handle to a live target process and performs the raw
/// byte transfers and page allocations. It knows nothing about value types,
/// byte order or layouts.
pub trait ProcessDriver {
    /// Reads memory starting at `address` into `buffer`.
    ///
    /// Returns the number of bytes actually read, which may be less than the
    /// length of `buffer`.
    fn read_memory(&self, address: Va, buffer: &mut [u8]) -> Result<usize, MemcaveError>;

    /// Writes `data` to memory starting at `address`.
    ///
    /// Returns the number of bytes actually written.
    fn write_memory(&self, address: Va, data: &[u8]) -> Result<usize, MemcaveError>;

    /// Allocates `size` bytes with the given protection.
    ///
    /// Returns a NULL address if the allocation was refused.
    fn allocate(&self, size: u64, access: MemoryAccess) -> Result<Va, MemcaveError>;

    /// Frees an allocation previously returned by [`allocate`].
    ///
    /// [`allocate`]: Self::allocate
    fn free(&self, address: Va) -> Result<(), MemcaveError>;

    /// Checks whether the target process has exited.
    fn has_exited(&self) -> bool;

    /// Returns the base address of a loaded module, if present.
    fn module_base(&self, name: &str) -> Result<Option<Va>, MemcaveError> {
        let _ = name;
        Err(MemcaveError::NotSupported)
    }
}
