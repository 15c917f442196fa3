//! Reversible memory alterations.
//!
//! A [`MemoryAlteration`] overwrites a range of target code and can put the
//! original bytes back. The original bytes are captured once, when the
//! alteration is created, and never refreshed.
//!
//! Three kinds of patches are supported:
//! - [`Patch::Nop`] fills the range with `NOP`.
//! - [`Patch::Bytes`] writes caller-supplied bytes.
//! - [`Patch::Branch`] writes a `CALL`/`JMP` to an absolute address or to an
//!   injected code cave, padded with `NOP` to the length of the range.
//!
//! Enabling and disabling go through an [`Injector`], which supplies the
//! target and resolves code cave destinations.

mod set;

use std::{any::Any, fmt};

use memcave_arch_x86::{Branch, NOP, encode_branch};
use memcave_core::{Hex, MemcaveError, MemoryAddress, ProcessDriver, Target, Va};

pub use self::set::{AlterationHandle, AlterationSets};
use crate::injector::{Identifier, Injector};

/// A code cave identifier of any identifier type.
///
/// The concrete type is checked against the injector when the alteration
/// is enabled.
pub struct CaveRef {
    id: Box<dyn Any>,
    type_name: &'static str,
    debug: String,
}

impl CaveRef {
    /// Wraps a code cave identifier.
    pub fn new<C>(id: C) -> Self
    where
        C: Identifier,
    {
        Self {
            id: Box::new(id),
            type_name: std::any::type_name::<C>(),
            debug: format!("{id:?}"),
        }
    }

    /// Returns the name of the identifier type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the identifier if it is of type `C`.
    pub fn get<C>(&self) -> Result<C, MemcaveError>
    where
        C: Identifier,
    {
        self.id
            .downcast_ref::<C>()
            .copied()
            .ok_or(MemcaveError::UnmatchedTarget {
                expected: std::any::type_name::<C>(),
                found: self.type_name,
            })
    }
}

impl fmt::Debug for CaveRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{}", self.type_name, self.debug)
    }
}

/// Destination of a branch alteration.
#[derive(Debug)]
pub enum DetourTarget {
    /// An address in the target.
    Address(MemoryAddress),

    /// An injected code cave.
    CodeCave(CaveRef),
}

impl DetourTarget {
    /// Branches to an injected code cave.
    pub fn code_cave<C>(id: C) -> Self
    where
        C: Identifier,
    {
        Self::CodeCave(CaveRef::new(id))
    }
}

impl From<MemoryAddress> for DetourTarget {
    fn from(value: MemoryAddress) -> Self {
        Self::Address(value)
    }
}

impl From<Va> for DetourTarget {
    fn from(value: Va) -> Self {
        Self::Address(MemoryAddress::Absolute(value))
    }
}

/// What an enabled alteration writes.
#[derive(Debug)]
pub enum Patch {
    /// `NOP` over the whole range.
    Nop,

    /// Fixed bytes, exactly as long as the range.
    Bytes(Vec<u8>),

    /// A branch padded with `NOP` to the length of the range.
    Branch {
        /// The instruction to generate.
        branch: Branch,

        /// Where it branches to.
        target: DetourTarget,
    },
}

/// A reversible patch of target memory.
#[derive(Debug)]
pub struct MemoryAlteration {
    address: Va,
    original: Vec<u8>,
    patch: Patch,
}

impl MemoryAlteration {
    /// Creates an alteration that fills `length` bytes with `NOP`.
    pub fn nop<Driver>(
        target: &Target<Driver>,
        address: impl Into<MemoryAddress>,
        length: usize,
    ) -> Result<Self, MemcaveError>
    where
        Driver: ProcessDriver,
    {
        Self::capture(target, address.into(), length, Patch::Nop)
    }

    /// Creates an alteration that writes `bytes`.
    pub fn bytes<Driver>(
        target: &Target<Driver>,
        address: impl Into<MemoryAddress>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Self, MemcaveError>
    where
        Driver: ProcessDriver,
    {
        let bytes = bytes.into();
        Self::capture(target, address.into(), bytes.len(), Patch::Bytes(bytes))
    }

    /// Creates an alteration that writes a branch over `length` bytes.
    pub fn branch<Driver>(
        target: &Target<Driver>,
        address: impl Into<MemoryAddress>,
        branch: Branch,
        destination: impl Into<DetourTarget>,
        length: usize,
    ) -> Result<Self, MemcaveError>
    where
        Driver: ProcessDriver,
    {
        let patch = Patch::Branch {
            branch,
            target: destination.into(),
        };

        Self::capture(target, address.into(), length, patch)
    }

    fn capture<Driver>(
        target: &Target<Driver>,
        address: MemoryAddress,
        length: usize,
        patch: Patch,
    ) -> Result<Self, MemcaveError>
    where
        Driver: ProcessDriver,
    {
        if !target.is_alive() {
            return Err(MemcaveError::NotAttached);
        }

        let address = target.resolve(&address)?;
        let original = target.read_bytes(address, length)?;

        Ok(Self {
            address,
            original,
            patch,
        })
    }

    /// Returns the patched address.
    pub fn address(&self) -> Va {
        self.address
    }

    /// Returns the length of the patched range.
    pub fn len(&self) -> usize {
        self.original.len()
    }

    /// Checks whether the patched range is empty.
    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// Returns the patch.
    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// Returns the bytes captured when the alteration was created.
    pub fn disable_bytes(&self) -> &[u8] {
        &self.original
    }

    /// Computes the bytes written when the alteration is enabled.
    pub fn enable_bytes<Driver, C, V>(
        &self,
        injector: &Injector<Driver, C, V>,
    ) -> Result<Vec<u8>, MemcaveError>
    where
        Driver: ProcessDriver,
        C: Identifier,
        V: Identifier,
    {
        match &self.patch {
            Patch::Nop => Ok(vec![NOP; self.original.len()]),
            Patch::Bytes(bytes) => {
                if bytes.len() != self.original.len() {
                    return Err(MemcaveError::SizeMismatch {
                        expected: self.original.len(),
                        actual: bytes.len(),
                    });
                }

                Ok(bytes.clone())
            }
            Patch::Branch { branch, target } => {
                let to = match target {
                    DetourTarget::Address(address) => injector_target(injector)?.resolve(address)?,
                    DetourTarget::CodeCave(cave) => injector.code_cave_address(cave.get::<C>()?)?,
                };

                let codec = injector_target(injector)?.codec();
                let bytes = encode_branch(*branch, self.address, to, self.original.len(), codec)?;
                Ok(bytes.to_vec())
            }
        }
    }

    /// Enables or disables the alteration.
    pub fn set_enabled<Driver, C, V>(
        &self,
        injector: &Injector<Driver, C, V>,
        enabled: bool,
    ) -> Result<(), MemcaveError>
    where
        Driver: ProcessDriver,
        C: Identifier,
        V: Identifier,
    {
        let target = injector_target(injector)?;

        if enabled {
            let bytes = self.enable_bytes(injector)?;
            tracing::debug!(address = %self.address, bytes = %Hex(&bytes), "enabling alteration");
            target.write(self.address, &bytes)
        }
        else {
            tracing::debug!(address = %self.address, "disabling alteration");
            target.write(self.address, &self.original)
        }
    }

    /// Checks whether the target currently holds the enabled bytes.
    pub fn is_enabled<Driver, C, V>(
        &self,
        injector: &Injector<Driver, C, V>,
    ) -> Result<bool, MemcaveError>
    where
        Driver: ProcessDriver,
        C: Identifier,
        V: Identifier,
    {
        let current = injector_target(injector)?.read_bytes(self.address, self.original.len())?;
        Ok(current == self.enable_bytes(injector)?)
    }
}

fn injector_target<Driver, C, V>(
    injector: &Injector<Driver, C, V>,
) -> Result<&Target<Driver>, MemcaveError>
where
    Driver: ProcessDriver,
    C: Identifier,
    V: Identifier,
{
    injector.target().ok_or(MemcaveError::NotConfigured)
}
