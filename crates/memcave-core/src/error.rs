use crate::{PointerWidth, Va, ValueType};

/// An error that can occur when working with a target process.
#[derive(thiserror::Error, Debug)]
pub enum MemcaveError {
    /// An error occurred in the process driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error>),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The injection schema is malformed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// No target is configured on the injector.
    #[error("No target is configured")]
    NotConfigured,

    /// The target has no live process attached.
    #[error("No process is attached to the target")]
    NotAttached,

    /// The target already has a process attached.
    #[error("A process is already attached to the target")]
    AlreadyAttached,

    /// The injector has not injected anything yet.
    #[error("Nothing has been injected")]
    NotInjected,

    /// The injector has already injected its image.
    #[error("The image has already been injected")]
    AlreadyInjected,

    /// A buffer length does not match the length its type requires.
    #[error("Size mismatch (expected: {expected}, actual: {actual})")]
    SizeMismatch {
        /// The length the type requires.
        expected: usize,

        /// The length that was supplied.
        actual: usize,
    },

    /// The scalar type is not supported by the codec.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// The target pointer width is wider than the host can represent.
    #[error("Target pointer width {target} exceeds host pointer width {host}")]
    UnsupportedPointerWidth {
        /// The configured target pointer width.
        target: PointerWidth,

        /// The host pointer width.
        host: PointerWidth,
    },

    /// Host and target pointer widths differ and the policy forbids conversion.
    #[error("Pointer size mismatch (from: {from}, to: {to})")]
    PointerSizeMismatch {
        /// The width the pointer is converted from.
        from: PointerWidth,

        /// The width the pointer is converted to.
        to: PointerWidth,
    },

    /// Converting a pointer between widths would discard significant bits.
    #[error("Pointer 0x{value:x} does not fit in {width}")]
    PointerDataLoss {
        /// The pointer value.
        value: u64,

        /// The width the value had to fit in.
        width: PointerWidth,
    },

    /// An offset from a base address runs past the end of the address space.
    #[error("Address {base} + 0x{offset:x} overflows")]
    AddressOverflow {
        /// The base address.
        base: Va,

        /// The offset from the base address.
        offset: u64,
    },

    /// The encoded instruction does not fit in the available space.
    #[error("Instruction too large (required: {required}, available: {available})")]
    InstructionTooLarge {
        /// The size of the encoded instruction.
        required: usize,

        /// The padding size the caller allowed.
        available: usize,
    },

    /// The branch displacement cannot be encoded in the instruction form.
    #[error("Displacement {displacement} out of range for a {width}-byte operand")]
    DisplacementOutOfRange {
        /// The computed displacement.
        displacement: i128,

        /// The operand width in bytes.
        width: usize,
    },

    /// The instruction kind has no encoding in the requested form.
    #[error("Unsupported instruction kind: {0}")]
    UnsupportedInstructionKind(String),

    /// The target refused to allocate memory.
    #[error("Failed to allocate {size} bytes")]
    AllocationFailed {
        /// The requested allocation size.
        size: u64,
    },

    /// A read from the target did not fully succeed.
    #[error("Failed to read {size} bytes at {address} ({transferred} transferred)")]
    ReadFailed {
        /// The address of the read.
        address: Va,

        /// The requested length.
        size: usize,

        /// The number of bytes actually read.
        transferred: usize,
    },

    /// A write to the target did not fully succeed.
    #[error("Failed to write {size} bytes at {address} ({transferred} transferred)")]
    WriteFailed {
        /// The address of the write.
        address: Va,

        /// The requested length.
        size: usize,

        /// The number of bytes actually written.
        transferred: usize,
    },

    /// A branch refers to a code cave of a different identifier type.
    #[error("Branch target of type {found} does not match injector type {expected}")]
    UnmatchedTarget {
        /// The identifier type the injector uses.
        expected: &'static str,

        /// The identifier type the branch was configured with.
        found: &'static str,
    },

    /// A value does not have the type declared for its destination.
    #[error("Value type mismatch (expected: {expected}, actual: {actual})")]
    ValueTypeMismatch {
        /// The declared type.
        expected: ValueType,

        /// The type of the supplied value.
        actual: ValueType,
    },

    /// The identifier is not part of the schema.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The module is not loaded in the target.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Operation not supported.
    #[error("Operation not supported.")]
    NotSupported,
}

/// A structural problem in an injection schema.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The code cave identifier has more than one descriptor.
    #[error("Code cave {0} is declared more than once")]
    DuplicateCodeCave(String),

    /// The code cave identifier has no descriptor.
    #[error("Code cave {0} has no descriptor")]
    MissingCodeCave(String),

    /// The variable identifier has more than one descriptor.
    #[error("Variable {0} is declared more than once")]
    DuplicateVariable(String),

    /// The variable identifier has no descriptor.
    #[error("Variable {0} has no descriptor")]
    MissingVariable(String),

    /// A descriptor uses an identifier missing from its identifier set.
    #[error("{0} is not part of its identifier set")]
    Undeclared(String),

    /// A branch directive inside a code cave cannot be encoded.
    #[error("Code cave {cave} contains an unencodable branch: {branch}")]
    UnencodableBranch {
        /// The code cave containing the directive.
        cave: String,

        /// The offending directive.
        branch: String,
    },
}

/// Coarse classification of a [`MemcaveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing descriptor, unsupported type.
    Schema,

    /// Wrong lifecycle state.
    State,

    /// Buffer or type length mismatch.
    SizeMismatch,

    /// Pointer width conversion failure.
    Pointer,

    /// Instruction encoding failure.
    Encoding,

    /// Memory transfer or allocation failure.
    Io,

    /// Branch alteration referencing a foreign identifier type.
    UnmatchedTarget,

    /// Failure reported by the driver itself.
    Driver,
}

impl MemcaveError {
    /// Returns the coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) | Self::UnsupportedType(_) | Self::NotFound(_) => ErrorKind::Schema,
            Self::NotConfigured
            | Self::NotAttached
            | Self::AlreadyAttached
            | Self::NotInjected
            | Self::AlreadyInjected => ErrorKind::State,
            Self::SizeMismatch { .. } | Self::ValueTypeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::UnsupportedPointerWidth { .. }
            | Self::PointerSizeMismatch { .. }
            | Self::PointerDataLoss { .. }
            | Self::AddressOverflow { .. } => ErrorKind::Pointer,
            Self::InstructionTooLarge { .. }
            | Self::DisplacementOutOfRange { .. }
            | Self::UnsupportedInstructionKind(_) => ErrorKind::Encoding,
            Self::AllocationFailed { .. }
            | Self::ReadFailed { .. }
            | Self::WriteFailed { .. }
            | Self::ModuleNotFound(_)
            | Self::Io(_) => ErrorKind::Io,
            Self::UnmatchedTarget { .. } => ErrorKind::UnmatchedTarget,
            Self::Driver(_) | Self::NotSupported => ErrorKind::Driver,
        }
    }
}
