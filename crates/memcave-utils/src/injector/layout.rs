use memcave_arch_x86::{INT3, NOP, encode_branch};
use memcave_core::{MemcaveError, PointerWidth, ProcessDriver, Target, Va, Value};

use super::{Artifact, BranchTarget, Identifier, Schema};

/// Default separator between two code caves.
pub const DEFAULT_CODE_CAVE_SEPARATOR: [u8; 8] = [NOP; 8];

/// Default separator between the code cave and variable sections.
pub const DEFAULT_SECTION_SEPARATOR: [u8; 8] = [INT3; 8];

/// When the section separator is part of the image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionSeparatorPolicy {
    /// Only if at least one code cave is declared.
    #[default]
    WhenCodeCavesPresent,

    /// Always, even between an empty code cave section and the variables.
    Always,
}

/// Placement of code caves and variables inside the injected region.
///
/// The region is laid out as:
///
/// ```text
/// cave 0 | cave separator | cave 1 | ... | cave N | section separator | var 0 | var 1 | ...
/// ```
///
/// Offsets are recomputed on every query from the schema, the separators
/// and the target pointer width.
pub struct Layout<'a, C, V> {
    schema: &'a Schema<C, V>,
    code_cave_separator: &'a [u8],
    section_separator: &'a [u8],
    policy: SectionSeparatorPolicy,
    pointer_width: PointerWidth,
}

impl<'a, C, V> Layout<'a, C, V>
where
    C: Identifier,
    V: Identifier,
{
    /// Creates a layout.
    pub fn new(
        schema: &'a Schema<C, V>,
        code_cave_separator: &'a [u8],
        section_separator: &'a [u8],
        policy: SectionSeparatorPolicy,
        pointer_width: PointerWidth,
    ) -> Self {
        Self {
            schema,
            code_cave_separator,
            section_separator,
            policy,
            pointer_width,
        }
    }

    /// Returns the size of a code cave.
    pub fn code_cave_size(&self, id: C) -> Result<u64, MemcaveError> {
        Ok(self.schema.code_cave(id)?.size(self.pointer_width)? as u64)
    }

    /// Returns the size of a variable.
    pub fn variable_size(&self, id: V) -> Result<u64, MemcaveError> {
        Ok(self.schema.variable(id)?.size(self.pointer_width) as u64)
    }

    /// Returns the offset of a code cave from the start of the region.
    pub fn code_cave_offset(&self, id: C) -> Result<u64, MemcaveError> {
        let mut offset = 0;

        for cave in self.schema.code_caves() {
            if *cave.id() == id {
                return Ok(offset);
            }

            offset += cave.size(self.pointer_width)? as u64;
            offset += self.code_cave_separator.len() as u64;
        }

        Err(MemcaveError::NotFound(format!("{id:?}")))
    }

    /// Checks whether the section separator is part of the image.
    pub fn has_section_separator(&self) -> bool {
        match self.policy {
            SectionSeparatorPolicy::Always => true,
            SectionSeparatorPolicy::WhenCodeCavesPresent => self.schema.code_caves().len() > 0,
        }
    }

    /// Returns the offset of the first variable from the start of the region.
    pub fn variable_section_offset(&self) -> Result<u64, MemcaveError> {
        let mut offset = 0;

        for (index, cave) in self.schema.code_caves().enumerate() {
            if index > 0 {
                offset += self.code_cave_separator.len() as u64;
            }

            offset += cave.size(self.pointer_width)? as u64;
        }

        if self.has_section_separator() {
            offset += self.section_separator.len() as u64;
        }

        Ok(offset)
    }

    /// Returns the offset of a variable from the start of the region.
    pub fn variable_offset(&self, id: V) -> Result<u64, MemcaveError> {
        let mut offset = self.variable_section_offset()?;

        for variable in self.schema.variables() {
            if *variable.id() == id {
                return Ok(offset);
            }

            offset += variable.size(self.pointer_width) as u64;
        }

        Err(MemcaveError::NotFound(format!("{id:?}")))
    }

    /// Returns the size of the whole region.
    pub fn total_size(&self) -> Result<u64, MemcaveError> {
        let variables = self
            .schema
            .variables()
            .map(|variable| variable.size(self.pointer_width) as u64)
            .sum::<u64>();

        Ok(self.variable_section_offset()? + variables)
    }

    /// Returns the address of a code cave for a region injected at `base`.
    pub fn code_cave_address(&self, base: Va, id: C) -> Result<Va, MemcaveError> {
        offset_address(base, self.code_cave_offset(id)?)
    }

    /// Returns the address of a variable for a region injected at `base`.
    pub fn variable_address(&self, base: Va, id: V) -> Result<Va, MemcaveError> {
        offset_address(base, self.variable_offset(id)?)
    }

    /// Resolves the destination of a branch for a region injected at `base`.
    pub fn resolve_branch_target<Driver>(
        &self,
        base: Va,
        destination: &BranchTarget<C, V>,
        target: &Target<Driver>,
    ) -> Result<Va, MemcaveError>
    where
        Driver: ProcessDriver,
    {
        match destination {
            BranchTarget::Address(address) => target.resolve(address),
            BranchTarget::CodeCave(id) => self.code_cave_address(base, *id),
            BranchTarget::Variable(id) => self.variable_address(base, *id),
        }
    }

    /// Serializes the region as it will be written at `base`.
    pub fn image<Driver>(&self, base: Va, target: &Target<Driver>) -> Result<Vec<u8>, MemcaveError>
    where
        Driver: ProcessDriver,
    {
        let mut image = Vec::with_capacity(self.total_size()? as usize);

        for (index, cave) in self.schema.code_caves().enumerate() {
            if index > 0 {
                image.extend_from_slice(self.code_cave_separator);
            }

            for artifact in cave.artifacts() {
                match artifact {
                    Artifact::Bytes(bytes) => image.extend_from_slice(bytes),
                    Artifact::VariableAddress(id) => {
                        let address = self.variable_address(base, *id)?;
                        image.extend_from_slice(&target.encode(&Value::Pointer(address))?);
                    }
                    Artifact::CodeCaveAddress(id) => {
                        let address = self.code_cave_address(base, *id)?;
                        image.extend_from_slice(&target.encode(&Value::Pointer(address))?);
                    }
                    Artifact::Branch {
                        branch,
                        target: destination,
                    } => {
                        let from = offset_address(base, image.len() as u64)?;
                        let to = self.resolve_branch_target(base, destination, target)?;
                        let bytes = encode_branch(*branch, from, to, branch.size()?, target.codec())?;
                        image.extend_from_slice(&bytes);
                    }
                }
            }
        }

        if self.has_section_separator() {
            image.extend_from_slice(self.section_separator);
        }

        for variable in self.schema.variables() {
            image.extend_from_slice(&target.encode(variable.initial_value())?);
        }

        Ok(image)
    }
}

fn offset_address(base: Va, offset: u64) -> Result<Va, MemcaveError> {
    base.checked_add(offset)
        .ok_or(MemcaveError::AddressOverflow { base, offset })
}
