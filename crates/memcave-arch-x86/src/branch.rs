use std::fmt;

use memcave_core::MemcaveError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{CALL_LENGTH, CALL_REL32, SHORT_JUMP_LENGTH, TWO_BYTE_ESCAPE};

/// Kind of relative branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    /// `CALL`.
    Call,
    /// `JMP`.
    Jmp,
    /// `JA` (unsigned above).
    Ja,
    /// `JAE` (unsigned above or equal).
    Jae,
    /// `JB` (unsigned below).
    Jb,
    /// `JBE` (unsigned below or equal).
    Jbe,
    /// `JG` (signed greater).
    Jg,
    /// `JGE` (signed greater or equal).
    Jge,
    /// `JL` (signed less).
    Jl,
    /// `JLE` (signed less or equal).
    Jle,
    /// `JE`.
    Je,
    /// `JNE`.
    Jne,
}

impl BranchKind {
    /// Returns the condition code of a conditional jump.
    fn condition(self) -> Option<u8> {
        Some(match self {
            Self::Call | Self::Jmp => return None,
            Self::Jb => 0x2,
            Self::Jae => 0x3,
            Self::Je => 0x4,
            Self::Jne => 0x5,
            Self::Jbe => 0x6,
            Self::Ja => 0x7,
            Self::Jl => 0xc,
            Self::Jge => 0xd,
            Self::Jle => 0xe,
            Self::Jg => 0xf,
        })
    }

    /// Checks whether the branch depends on flags.
    pub fn is_conditional(self) -> bool {
        self.condition().is_some()
    }

    /// Returns the opcode of the `rel8` form, if there is one.
    pub fn rel8_opcode(self) -> Option<u8> {
        match self {
            Self::Call => None,
            Self::Jmp => Some(0xeb),
            _ => self.condition().map(|cc| 0x70 | cc),
        }
    }

    /// Returns the opcode of the `rel32` form.
    pub fn rel32_opcode(self) -> SmallVec<[u8; 2]> {
        match self {
            Self::Call => smallvec::smallvec![CALL_REL32],
            Self::Jmp => smallvec::smallvec![0xe9],
            _ => match self.condition() {
                Some(cc) => smallvec::smallvec![TWO_BYTE_ESCAPE, 0x80 | cc],
                None => SmallVec::new(),
            },
        }
    }

    /// Returns the mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Jmp => "jmp",
            Self::Ja => "ja",
            Self::Jae => "jae",
            Self::Jb => "jb",
            Self::Jbe => "jbe",
            Self::Jg => "jg",
            Self::Jge => "jge",
            Self::Jl => "jl",
            Self::Jle => "jle",
            Self::Je => "je",
            Self::Jne => "jne",
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Displacement width of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchDistance {
    /// One-byte displacement (`rel8`), reaching -128..=127 bytes.
    Near,

    /// Four-byte displacement (`rel32`).
    Far,
}

/// A branch instruction to be generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Branch {
    /// The kind of branch.
    pub kind: BranchKind,

    /// The displacement width.
    pub distance: BranchDistance,
}

impl Branch {
    /// `CALL rel32`.
    pub const fn call() -> Self {
        Self {
            kind: BranchKind::Call,
            distance: BranchDistance::Far,
        }
    }

    /// A branch with a one-byte displacement.
    pub const fn near(kind: BranchKind) -> Self {
        Self {
            kind,
            distance: BranchDistance::Near,
        }
    }

    /// A branch with a four-byte displacement.
    pub const fn far(kind: BranchKind) -> Self {
        Self {
            kind,
            distance: BranchDistance::Far,
        }
    }

    /// Returns the length of the instruction, without padding.
    pub fn size(self) -> Result<usize, MemcaveError> {
        match (self.kind, self.distance) {
            (BranchKind::Call, BranchDistance::Near) => Err(
                MemcaveError::UnsupportedInstructionKind(format!("{self} has no encoding")),
            ),
            (BranchKind::Call, BranchDistance::Far) => Ok(CALL_LENGTH),
            (_, BranchDistance::Near) => Ok(SHORT_JUMP_LENGTH),
            (kind, BranchDistance::Far) => Ok(kind.rel32_opcode().len() + 4),
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.distance {
            BranchDistance::Near => write!(f, "{} rel8", self.kind),
            BranchDistance::Far => write!(f, "{} rel32", self.kind),
        }
    }
}
