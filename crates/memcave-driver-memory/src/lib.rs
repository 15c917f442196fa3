//! memcave driver for a simulated address space.
//!
//! [`MemoryProcessDriver`] behaves like a live process without touching the
//! OS: regions are plain vectors, allocations come from a bump allocator and
//! modules are a name-to-base table. It is used for dry runs of an injection
//! schema and throughout the test suites.
//!
//! Faults can be injected to exercise error paths: allocations can be
//! refused, writes can be cut short, and the process can be marked as
//! exited.

mod driver;
mod error;

use memcave_core::{MemcaveError, MemoryAccess, ProcessDriver, Va};

pub use self::error::Error;
use self::driver::MemoryDriver;

/// memcave driver for a simulated address space.
pub struct MemoryProcessDriver {
    inner: MemoryDriver,
}

impl Default for MemoryProcessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProcessDriver {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self {
            inner: MemoryDriver::new(),
        }
    }

    /// Maps `data` at `address`.
    pub fn map(
        &self,
        address: impl Into<Va>,
        data: impl Into<Vec<u8>>,
        access: MemoryAccess,
    ) -> Result<(), MemcaveError> {
        Ok(self.inner.map(address.into(), data.into(), access)?)
    }

    /// Maps `image` at `base` and registers it as module `name`.
    ///
    /// Module names are matched case-insensitively.
    pub fn map_module(
        &self,
        name: &str,
        base: impl Into<Va>,
        image: impl Into<Vec<u8>>,
    ) -> Result<(), MemcaveError> {
        let base = base.into();
        self.inner.map(base, image.into(), MemoryAccess::RX)?;
        self.inner.add_module(name, base);
        Ok(())
    }

    /// Marks the process as exited or running.
    pub fn set_exited(&self, exited: bool) {
        self.inner.set_exited(exited);
    }

    /// Makes every subsequent allocation return NULL.
    pub fn refuse_allocations(&self, refuse: bool) {
        self.inner.refuse_allocations(refuse);
    }

    /// Cuts every subsequent write short after `limit` bytes.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.inner.set_write_limit(limit);
    }

    /// Returns the number of allocation requests made so far.
    pub fn allocation_count(&self) -> usize {
        self.inner.allocation_count()
    }

    /// Returns the number of successful frees made so far.
    pub fn free_count(&self) -> usize {
        self.inner.free_count()
    }

    /// Returns the address and size of every allocation not yet freed.
    pub fn live_allocations(&self) -> Vec<(Va, usize)> {
        self.inner.live_allocations()
    }

    /// Returns the protection of the region containing `address`.
    pub fn protection(&self, address: impl Into<Va>) -> Option<MemoryAccess> {
        self.inner.protection(address.into())
    }
}

impl ProcessDriver for MemoryProcessDriver {
    fn read_memory(&self, address: Va, buffer: &mut [u8]) -> Result<usize, MemcaveError> {
        Ok(self.inner.read_memory(address, buffer)?)
    }

    fn write_memory(&self, address: Va, data: &[u8]) -> Result<usize, MemcaveError> {
        Ok(self.inner.write_memory(address, data)?)
    }

    fn allocate(&self, size: u64, access: MemoryAccess) -> Result<Va, MemcaveError> {
        Ok(self.inner.allocate(size, access)?)
    }

    fn free(&self, address: Va) -> Result<(), MemcaveError> {
        Ok(self.inner.free(address)?)
    }

    fn has_exited(&self) -> bool {
        self.inner.has_exited()
    }

    fn module_base(&self, name: &str) -> Result<Option<Va>, MemcaveError> {
        Ok(self.inner.module_base(name)?)
    }
}
