use memcave_core::Va;

/// Error type for the memory driver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The simulated process has exited.
    #[error("The process has exited")]
    ProcessExited,

    /// The address does not start an allocation.
    #[error("No allocation at {0}")]
    NotAllocated(Va),

    /// The new region overlaps an existing one.
    #[error("Region at {0} overlaps an existing mapping")]
    Overlap(Va),
}

impl From<Error> for memcave_core::MemcaveError {
    fn from(value: Error) -> Self {
        Self::Driver(Box::new(value))
    }
}
