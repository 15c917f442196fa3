//! Core memcave functionality.
//!
//! This crate provides the pieces every other memcave crate is built on:
//! the [`ProcessDriver`] capability trait, the endianness and pointer-width
//! aware value [`codec`], and the [`Target`], which combines the two into
//! typed reads and writes against a live process.

pub mod codec;
mod core;
mod driver;
mod error;

use zerocopy::{FromBytes, Immutable, IntoBytes};

pub use self::{
    codec::{
        CodecConfig, Endianness, PointerWidth, Scalar, TruncationPolicy, Value, ValueBytes,
        ValueType,
    },
    core::{Hex, MemoryAccess, MemoryAddress, Va},
    driver::ProcessDriver,
    error::{ErrorKind, MemcaveError, SchemaError},
};

/// A target process, as seen through a [`ProcessDriver`].
///
/// The target holds the codec settings used for every typed access. No
/// memory is cached: each call goes straight to the driver.
pub struct Target<Driver>
where
    Driver: ProcessDriver,
{
    driver: Option<Driver>,
    codec: CodecConfig,
}

impl<Driver> Target<Driver>
where
    Driver: ProcessDriver,
{
    /// Creates a new `Target` attached to the process behind `driver`.
    ///
    /// Endianness and pointer width default to those of the host, and
    /// pointer width mismatches are refused.
    pub fn new(driver: Driver) -> Self {
        Self {
            driver: Some(driver),
            codec: CodecConfig::default(),
        }
    }

    /// Creates a new `Target` with no process attached.
    pub fn detached() -> Self {
        Self {
            driver: None,
            codec: CodecConfig::default(),
        }
    }

    /// Sets the byte order of the target.
    pub fn with_endianness(self, endianness: Endianness) -> Self {
        Self {
            codec: CodecConfig {
                endianness,
                ..self.codec
            },
            ..self
        }
    }

    /// Sets the pointer width of the target.
    pub fn with_pointer_width(self, pointer_width: PointerWidth) -> Self {
        Self {
            codec: CodecConfig {
                pointer_width,
                ..self.codec
            },
            ..self
        }
    }

    /// Sets the pointer conversion policy.
    pub fn with_truncation_policy(self, truncation_policy: TruncationPolicy) -> Self {
        Self {
            codec: CodecConfig {
                truncation_policy,
                ..self.codec
            },
            ..self
        }
    }

    /// Replaces all codec settings at once.
    pub fn with_codec(self, codec: CodecConfig) -> Self {
        Self { codec, ..self }
    }

    /// Returns the codec settings.
    pub fn codec(&self) -> &CodecConfig {
        &self.codec
    }

    /// Returns the configured byte order.
    pub fn endianness(&self) -> Endianness {
        self.codec.endianness
    }

    /// Sets the byte order of the target.
    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.codec.endianness = endianness;
    }

    /// Returns the configured pointer width.
    pub fn pointer_width(&self) -> PointerWidth {
        self.codec.pointer_width
    }

    /// Sets the pointer width of the target.
    pub fn set_pointer_width(&mut self, pointer_width: PointerWidth) {
        self.codec.pointer_width = pointer_width;
    }

    /// Returns the configured pointer conversion policy.
    pub fn truncation_policy(&self) -> TruncationPolicy {
        self.codec.truncation_policy
    }

    /// Sets the pointer conversion policy.
    pub fn set_truncation_policy(&mut self, truncation_policy: TruncationPolicy) {
        self.codec.truncation_policy = truncation_policy;
    }

    /// Returns the size of a target pointer in bytes.
    pub fn pointer_size(&self) -> usize {
        self.codec.pointer_width.bytes()
    }

    /// Attaches the process behind `driver`.
    pub fn attach(&mut self, driver: Driver) -> Result<(), MemcaveError> {
        if self.driver.is_some() {
            return Err(MemcaveError::AlreadyAttached);
        }

        self.driver = Some(driver);
        Ok(())
    }

    /// Detaches the current process, returning its driver.
    pub fn detach(&mut self) -> Option<Driver> {
        self.driver.take()
    }

    /// Checks whether a process is attached.
    pub fn is_attached(&self) -> bool {
        self.driver.is_some()
    }

    /// Checks whether a process is attached and still running.
    pub fn is_alive(&self) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|driver| !driver.has_exited())
    }

    /// Returns the driver of the attached process.
    pub fn driver(&self) -> Result<&Driver, MemcaveError> {
        self.driver.as_ref().ok_or(MemcaveError::NotAttached)
    }

    /// Returns the driver, after checking that the host can address the target.
    fn io_driver(&self) -> Result<&Driver, MemcaveError> {
        let driver = self.driver()?;

        let host = PointerWidth::host();
        let target = self.codec.pointer_width.resolve();
        if target.bits() > host.bits() {
            return Err(MemcaveError::UnsupportedPointerWidth { target, host });
        }

        Ok(driver)
    }

    /// Resolves a [`MemoryAddress`] to an absolute address.
    pub fn resolve(&self, address: &MemoryAddress) -> Result<Va, MemcaveError> {
        match address {
            MemoryAddress::Absolute(va) => Ok(*va),
            MemoryAddress::ModuleOffset { module, offset } => {
                let base = self
                    .driver()?
                    .module_base(module)?
                    .ok_or_else(|| MemcaveError::ModuleNotFound(module.clone()))?;

                base.checked_offset(*offset)
                    .ok_or_else(|| MemcaveError::NotFound(address.to_string()))
            }
        }
    }

    /// Allocates memory in the target.
    pub fn allocate(&self, size: u64, access: MemoryAccess) -> Result<Va, MemcaveError> {
        let address = self.driver()?.allocate(size, access)?;
        if address.is_null() {
            return Err(MemcaveError::AllocationFailed { size });
        }

        tracing::debug!(%address, size, %access, "allocated target memory");
        Ok(address)
    }

    /// Frees memory previously allocated in the target.
    pub fn free(&self, address: Va) -> Result<(), MemcaveError> {
        self.driver()?.free(address)?;
        tracing::debug!(%address, "freed target memory");
        Ok(())
    }

    /// Reads memory from the target.
    pub fn read(&self, address: impl Into<Va>, buffer: &mut [u8]) -> Result<(), MemcaveError> {
        let address = address.into();
        let transferred = self.io_driver()?.read_memory(address, buffer)?;

        if transferred != buffer.len() {
            return Err(MemcaveError::ReadFailed {
                address,
                size: buffer.len(),
                transferred,
            });
        }

        Ok(())
    }

    /// Reads `length` bytes from the target.
    pub fn read_bytes(&self, address: impl Into<Va>, length: usize) -> Result<Vec<u8>, MemcaveError> {
        let mut buffer = vec![0u8; length];
        self.read(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Writes memory to the target.
    pub fn write(&self, address: impl Into<Va>, data: &[u8]) -> Result<(), MemcaveError> {
        let address = address.into();
        let driver = self.io_driver()?;

        if data.is_empty() {
            return Ok(());
        }

        let transferred = driver.write_memory(address, data)?;
        if transferred != data.len() {
            return Err(MemcaveError::WriteFailed {
                address,
                size: data.len(),
                transferred,
            });
        }

        tracing::trace!(%address, data = %Hex(data), "wrote target memory");
        Ok(())
    }

    /// Encodes a value with the target's codec settings.
    pub fn encode(&self, value: &Value) -> Result<ValueBytes, MemcaveError> {
        self.codec.encode(value)
    }

    /// Decodes a value with the target's codec settings.
    pub fn decode(&self, bytes: &[u8], value_type: ValueType) -> Result<Value, MemcaveError> {
        self.codec.decode(bytes, value_type)
    }

    /// Reads a value of the given type from the target.
    pub fn read_value(
        &self,
        address: impl Into<Va>,
        value_type: ValueType,
    ) -> Result<Value, MemcaveError> {
        let bytes = self.read_bytes(address, self.codec.size_of(value_type))?;
        self.decode(&bytes, value_type)
    }

    /// Writes a value to the target.
    pub fn write_value(&self, address: impl Into<Va>, value: &Value) -> Result<(), MemcaveError> {
        let bytes = self.encode(value)?;
        self.write(address, &bytes)
    }

    /// Reads a scalar from the target.
    pub fn read_scalar<T>(&self, address: impl Into<Va>) -> Result<T, MemcaveError>
    where
        T: Scalar,
    {
        let value = self.read_value(address, T::TYPE)?;
        T::from_value(value).ok_or(MemcaveError::ValueTypeMismatch {
            expected: T::TYPE,
            actual: value.value_type(),
        })
    }

    /// Writes a scalar to the target.
    pub fn write_scalar<T>(&self, address: impl Into<Va>, value: T) -> Result<(), MemcaveError>
    where
        T: Scalar,
    {
        self.write_value(address, &value.into_value())
    }

    /// Reads a single byte from the target.
    pub fn read_u8(&self, address: impl Into<Va>) -> Result<u8, MemcaveError> {
        self.read_scalar(address)
    }

    /// Reads a 16-bit unsigned integer from the target.
    pub fn read_u16(&self, address: impl Into<Va>) -> Result<u16, MemcaveError> {
        self.read_scalar(address)
    }

    /// Reads a 32-bit unsigned integer from the target.
    pub fn read_u32(&self, address: impl Into<Va>) -> Result<u32, MemcaveError> {
        self.read_scalar(address)
    }

    /// Reads a 64-bit unsigned integer from the target.
    pub fn read_u64(&self, address: impl Into<Va>) -> Result<u64, MemcaveError> {
        self.read_scalar(address)
    }

    /// Reads a target pointer.
    pub fn read_va(&self, address: impl Into<Va>) -> Result<Va, MemcaveError> {
        self.read_scalar(address)
    }

    /// Writes a target pointer.
    pub fn write_va(&self, address: impl Into<Va>, value: Va) -> Result<(), MemcaveError> {
        self.write_scalar(address, value)
    }

    /// Reads a struct in host layout from the target.
    ///
    /// No byte order conversion is applied.
    pub fn read_struct<T>(&self, address: impl Into<Va>) -> Result<T, MemcaveError>
    where
        T: FromBytes + IntoBytes,
    {
        let mut result = T::new_zeroed();
        self.read(address, result.as_mut_bytes())?;
        Ok(result)
    }

    /// Writes a struct in host layout to the target.
    ///
    /// No byte order conversion is applied.
    pub fn write_struct<T>(&self, address: impl Into<Va>, value: T) -> Result<(), MemcaveError>
    where
        T: IntoBytes + Immutable,
    {
        self.write(address, value.as_bytes())
    }
}
