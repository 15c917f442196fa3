//! Code cave injection.
//!
//! An [`Injector`] places a [`Schema`] of code caves and variables into one
//! contiguous block of executable memory in the target process. The block
//! is either allocated by the injector itself or supplied by the caller.
//!
//! Code caves are described by [`Artifact`]s: literal bytes, pointers to
//! other injected items, and generated `CALL`/`JMP` instructions whose
//! displacements are computed from the final placement. Variables are
//! scalar values written after the code caves, and can be read and written
//! once injected.
//!
//! # Examples
//!
//! ```
//! use memcave_core::{MemoryAddress, Target};
//! use memcave_driver_memory::MemoryProcessDriver;
//! use memcave_utils::injector::{
//!     Artifact, BranchTarget, CodeCave, Identifier, Injector, NoIdentifier, Schema,
//! };
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Cave {
//!     Detour,
//! }
//!
//! impl Identifier for Cave {
//!     const ALL: &'static [Self] = &[Cave::Detour];
//! }
//!
//! # fn main() -> Result<(), memcave_core::MemcaveError> {
//! let schema = Schema::<Cave, NoIdentifier>::new(
//!     [CodeCave::new(
//!         Cave::Detour,
//!         [
//!             Artifact::bytes([0x90, 0x90]),
//!             Artifact::call(BranchTarget::Address(MemoryAddress::from(0x401000u64))),
//!             Artifact::bytes([0xc3]),
//!         ],
//!     )],
//!     [],
//! )?;
//!
//! let mut injector = Injector::new(schema).with_target(Target::new(MemoryProcessDriver::new()));
//! let base = injector.inject()?;
//! assert_eq!(injector.code_cave_address(Cave::Detour)?, base);
//!
//! injector.reset()?;
//! # Ok(())
//! # }
//! ```

mod layout;
mod schema;

use memcave_arch_x86::{Branch, encode_branch};
use memcave_core::{
    Hex, MemcaveError, MemoryAccess, MemoryAddress, ProcessDriver, Target, Va, Value, ValueBytes,
};

pub use self::{
    layout::{
        DEFAULT_CODE_CAVE_SEPARATOR, DEFAULT_SECTION_SEPARATOR, Layout, SectionSeparatorPolicy,
    },
    schema::{Artifact, BranchTarget, CodeCave, Identifier, NoIdentifier, Schema, Variable},
};

/// Whether the schema currently lives in the target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionState {
    /// Nothing is injected.
    #[default]
    NotInjected,

    /// The image has been written.
    Injected {
        /// Start of the injected region.
        base: Va,

        /// Whether the injector allocated the region and must free it.
        owns_allocation: bool,
    },
}

/// Injects a schema of code caves and variables into a target.
pub struct Injector<Driver, C, V>
where
    Driver: ProcessDriver,
    C: Identifier,
    V: Identifier,
{
    schema: Schema<C, V>,
    target: Option<Target<Driver>>,
    code_cave_separator: Vec<u8>,
    section_separator: Vec<u8>,
    section_separator_policy: SectionSeparatorPolicy,
    state: InjectionState,
}

impl<Driver, C, V> Injector<Driver, C, V>
where
    Driver: ProcessDriver,
    C: Identifier,
    V: Identifier,
{
    /// Creates a new `Injector` without a target.
    pub fn new(schema: Schema<C, V>) -> Self {
        Self {
            schema,
            target: None,
            code_cave_separator: DEFAULT_CODE_CAVE_SEPARATOR.to_vec(),
            section_separator: DEFAULT_SECTION_SEPARATOR.to_vec(),
            section_separator_policy: SectionSeparatorPolicy::default(),
            state: InjectionState::NotInjected,
        }
    }

    /// Sets the target.
    pub fn with_target(self, target: Target<Driver>) -> Self {
        Self {
            target: Some(target),
            ..self
        }
    }

    /// Sets the separator written between code caves.
    pub fn with_code_cave_separator(self, separator: impl Into<Vec<u8>>) -> Self {
        Self {
            code_cave_separator: separator.into(),
            ..self
        }
    }

    /// Sets the separator written between the code caves and the variables.
    pub fn with_section_separator(self, separator: impl Into<Vec<u8>>) -> Self {
        Self {
            section_separator: separator.into(),
            ..self
        }
    }

    /// Sets when the section separator is written.
    pub fn with_section_separator_policy(self, policy: SectionSeparatorPolicy) -> Self {
        Self {
            section_separator_policy: policy,
            ..self
        }
    }

    /// Replaces the target, returning the previous one.
    ///
    /// Fails with [`MemcaveError::AlreadyInjected`] while injected.
    pub fn set_target(
        &mut self,
        target: Target<Driver>,
    ) -> Result<Option<Target<Driver>>, MemcaveError> {
        self.check_not_injected()?;
        Ok(self.target.replace(target))
    }

    /// Removes the target.
    ///
    /// Fails with [`MemcaveError::AlreadyInjected`] while injected.
    pub fn take_target(&mut self) -> Result<Option<Target<Driver>>, MemcaveError> {
        self.check_not_injected()?;
        Ok(self.target.take())
    }

    /// Returns the target, if configured.
    pub fn target(&self) -> Option<&Target<Driver>> {
        self.target.as_ref()
    }

    /// Sets the separator written between code caves.
    pub fn set_code_cave_separator(&mut self, separator: impl Into<Vec<u8>>) {
        self.code_cave_separator = separator.into();
    }

    /// Returns the separator written between code caves.
    pub fn code_cave_separator(&self) -> &[u8] {
        &self.code_cave_separator
    }

    /// Sets the separator written between the code caves and the variables.
    pub fn set_section_separator(&mut self, separator: impl Into<Vec<u8>>) {
        self.section_separator = separator.into();
    }

    /// Returns the separator written between the code caves and the variables.
    pub fn section_separator(&self) -> &[u8] {
        &self.section_separator
    }

    /// Sets when the section separator is written.
    pub fn set_section_separator_policy(&mut self, policy: SectionSeparatorPolicy) {
        self.section_separator_policy = policy;
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema<C, V> {
        &self.schema
    }

    /// Returns the injection state.
    pub fn state(&self) -> InjectionState {
        self.state
    }

    /// Checks whether the schema is injected.
    pub fn is_injected(&self) -> bool {
        matches!(self.state, InjectionState::Injected { .. })
    }

    /// Returns the start of the injected region.
    pub fn base_address(&self) -> Result<Va, MemcaveError> {
        match self.state {
            InjectionState::Injected { base, .. } => Ok(base),
            InjectionState::NotInjected => Err(MemcaveError::NotInjected),
        }
    }

    fn check_not_injected(&self) -> Result<(), MemcaveError> {
        if self.is_injected() {
            return Err(MemcaveError::AlreadyInjected);
        }

        Ok(())
    }

    fn configured_target(&self) -> Result<&Target<Driver>, MemcaveError> {
        self.target.as_ref().ok_or(MemcaveError::NotConfigured)
    }

    fn attached_target(&self) -> Result<&Target<Driver>, MemcaveError> {
        let target = self.configured_target()?;
        if !target.is_alive() {
            return Err(MemcaveError::NotAttached);
        }

        Ok(target)
    }

    /// Returns the layout for the configured target.
    ///
    /// Sizes of pointer-sized items depend on the target pointer width, so
    /// a target must be configured.
    pub fn layout(&self) -> Result<Layout<'_, C, V>, MemcaveError> {
        let target = self.configured_target()?;

        Ok(Layout::new(
            &self.schema,
            &self.code_cave_separator,
            &self.section_separator,
            self.section_separator_policy,
            target.pointer_width(),
        ))
    }

    /// Returns the number of bytes the injected region occupies.
    pub fn required_size(&self) -> Result<u64, MemcaveError> {
        self.layout()?.total_size()
    }

    fn write_image(&self, target: &Target<Driver>, base: Va) -> Result<(), MemcaveError> {
        let layout = self.layout()?;
        let image = layout.image(base, target)?;
        debug_assert_eq!(image.len() as u64, layout.total_size()?);

        target.write(base, &image)
    }

    /// Allocates memory in the target and injects the schema into it.
    ///
    /// Returns the start of the injected region. If the schema occupies no
    /// bytes at all, nothing is allocated and the region starts at NULL.
    pub fn inject(&mut self) -> Result<Va, MemcaveError> {
        self.check_not_injected()?;

        let target = self.attached_target()?;
        let size = self.layout()?.total_size()?;

        if size == 0 {
            tracing::debug!("empty schema, nothing to inject");
            self.state = InjectionState::Injected {
                base: Va(0),
                owns_allocation: false,
            };
            return Ok(Va(0));
        }

        let base = target.allocate(size, MemoryAccess::RWX)?;

        if let Err(err) = self.write_image(target, base) {
            if let Err(free_err) = target.free(base) {
                tracing::error!(%base, %free_err, "failed to release allocation");
            }

            return Err(err);
        }

        tracing::debug!(%base, size, "injected");
        self.state = InjectionState::Injected {
            base,
            owns_allocation: true,
        };

        Ok(base)
    }

    /// Injects the schema at a caller-managed address.
    ///
    /// The memory at `base` must be at least [`required_size`] bytes long.
    /// It is never freed by the injector. Fails with
    /// [`MemcaveError::AddressOverflow`] if the region would run past the
    /// end of the address space.
    ///
    /// [`required_size`]: Self::required_size
    pub fn inject_at(&mut self, base: Va) -> Result<(), MemcaveError> {
        self.check_not_injected()?;

        let target = self.attached_target()?;
        let last = self.layout()?.total_size()?.saturating_sub(1);
        if base.checked_add(last).is_none() {
            return Err(MemcaveError::AddressOverflow { base, offset: last });
        }

        self.write_image(target, base)?;

        tracing::debug!(%base, "injected at caller-supplied address");
        self.state = InjectionState::Injected {
            base,
            owns_allocation: false,
        };

        Ok(())
    }

    /// Forgets the injected region, freeing it if the injector owns it and
    /// the process is still running.
    ///
    /// The injector is `NotInjected` afterwards, even if freeing fails.
    pub fn reset(&mut self) -> Result<(), MemcaveError> {
        let state = std::mem::take(&mut self.state);

        let base = match state {
            InjectionState::Injected {
                base,
                owns_allocation: true,
            } => base,
            _ => return Ok(()),
        };

        match &self.target {
            Some(target) if target.is_alive() => {
                tracing::debug!(%base, "releasing injected region");
                target.free(base).inspect_err(|err| {
                    tracing::error!(%base, %err, "failed to release injected region");
                })
            }
            _ => {
                tracing::debug!(%base, "process gone, injected region not released");
                Ok(())
            }
        }
    }

    /// Returns the address of an injected code cave.
    pub fn code_cave_address(&self, id: C) -> Result<Va, MemcaveError> {
        let base = self.base_address()?;
        self.layout()?.code_cave_address(base, id)
    }

    /// Returns the address of an injected variable.
    pub fn variable_address(&self, id: V) -> Result<Va, MemcaveError> {
        let base = self.base_address()?;
        self.layout()?.variable_address(base, id)
    }

    /// Returns the address of an injected variable, encoded as a target
    /// pointer.
    ///
    /// Useful for patching the address into target code.
    pub fn variable_address_bytes(&self, id: V) -> Result<ValueBytes, MemcaveError> {
        let address = self.variable_address(id)?;
        self.configured_target()?
            .encode(&Value::Pointer(address))
    }

    /// Reads the current value of an injected variable.
    pub fn read_variable(&self, id: V) -> Result<Value, MemcaveError> {
        let address = self.variable_address(id)?;
        let value_type = self.schema.variable(id)?.value_type();
        self.configured_target()?.read_value(address, value_type)
    }

    /// Writes an injected variable.
    ///
    /// The value must have the type of the variable's initial value.
    pub fn write_variable(&self, id: V, value: impl Into<Value>) -> Result<(), MemcaveError> {
        let value = value.into();
        let expected = self.schema.variable(id)?.value_type();
        if value.value_type() != expected {
            return Err(MemcaveError::ValueTypeMismatch {
                expected,
                actual: value.value_type(),
            });
        }

        let address = self.variable_address(id)?;
        self.configured_target()?.write_value(address, &value)
    }

    /// Resolves the destination of a branch.
    pub fn resolve_branch_target(&self, destination: &BranchTarget<C, V>) -> Result<Va, MemcaveError> {
        let target = self.configured_target()?;

        match destination {
            BranchTarget::Address(address) => target.resolve(address),
            _ => self
                .layout()?
                .resolve_branch_target(self.base_address()?, destination, target),
        }
    }

    /// Writes a branch instruction into target code.
    ///
    /// The instruction is padded with `NOP` up to `padding_size` bytes.
    pub fn write_branch(
        &self,
        at: &MemoryAddress,
        branch: Branch,
        destination: &BranchTarget<C, V>,
        padding_size: usize,
    ) -> Result<(), MemcaveError> {
        let target = self.attached_target()?;
        let from = target.resolve(at)?;
        let to = self.resolve_branch_target(destination)?;

        let bytes = encode_branch(branch, from, to, padding_size, target.codec())?;
        tracing::debug!(%from, %to, %branch, bytes = %Hex(&bytes[..]), "writing branch");
        target.write(from, &bytes)
    }
}

#[cfg(test)]
mod tests;
