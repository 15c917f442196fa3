use std::{fmt, hash::Hash};

use indexmap::{IndexMap, map::Entry};
use memcave_arch_x86::{Branch, BranchKind};
use memcave_core::{MemcaveError, MemoryAddress, PointerWidth, SchemaError, Value, ValueType};

/// A closed set of identifiers naming code caves or variables.
///
/// # Examples
///
/// ```
/// # use memcave_utils::injector::Identifier;
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// enum Cave {
///     Health,
///     Ammo,
/// }
///
/// impl Identifier for Cave {
///     const ALL: &'static [Self] = &[Cave::Health, Cave::Ammo];
/// }
/// ```
pub trait Identifier: Copy + Eq + Hash + fmt::Debug + 'static {
    /// Every identifier of the set, in declaration order.
    ///
    /// The declaration order is the layout order.
    const ALL: &'static [Self];
}

/// The empty identifier set, for schemas without code caves or variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoIdentifier {}

impl Identifier for NoIdentifier {
    const ALL: &'static [Self] = &[];
}

/// Destination of a generated branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget<C, V> {
    /// An address outside the injected region.
    Address(MemoryAddress),

    /// An injected code cave.
    CodeCave(C),

    /// An injected variable.
    Variable(V),
}

/// One element of a code cave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact<C, V> {
    /// Literal machine code.
    Bytes(Vec<u8>),

    /// The pointer-sized injected address of a variable.
    VariableAddress(V),

    /// The pointer-sized injected address of a code cave.
    CodeCaveAddress(C),

    /// A generated relative branch.
    Branch {
        /// The instruction to generate.
        branch: Branch,

        /// Where it branches to.
        target: BranchTarget<C, V>,
    },
}

impl<C, V> Artifact<C, V> {
    /// Literal machine code.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// `CALL rel32` to `target`.
    pub fn call(target: BranchTarget<C, V>) -> Self {
        Self::Branch {
            branch: Branch::call(),
            target,
        }
    }

    /// A `rel32` jump of the given kind to `target`.
    pub fn jump(kind: BranchKind, target: BranchTarget<C, V>) -> Self {
        Self::Branch {
            branch: Branch::far(kind),
            target,
        }
    }

    /// Returns the size of the artifact in bytes.
    pub fn size(&self, pointer_width: PointerWidth) -> Result<usize, MemcaveError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.len()),
            Self::VariableAddress(_) | Self::CodeCaveAddress(_) => Ok(pointer_width.bytes()),
            Self::Branch { branch, .. } => branch.size(),
        }
    }
}

/// A block of code to inject.
#[derive(Debug, Clone)]
pub struct CodeCave<C, V> {
    id: C,
    artifacts: Vec<Artifact<C, V>>,
}

impl<C, V> CodeCave<C, V> {
    /// Creates a code cave from its artifacts, in byte order.
    pub fn new(id: C, artifacts: impl IntoIterator<Item = Artifact<C, V>>) -> Self {
        Self {
            id,
            artifacts: artifacts.into_iter().collect(),
        }
    }

    /// Returns the identifier.
    pub fn id(&self) -> &C {
        &self.id
    }

    /// Returns the artifacts.
    pub fn artifacts(&self) -> &[Artifact<C, V>] {
        &self.artifacts
    }

    /// Returns the size of the code cave in bytes.
    pub fn size(&self, pointer_width: PointerWidth) -> Result<usize, MemcaveError> {
        self.artifacts
            .iter()
            .map(|artifact| artifact.size(pointer_width))
            .sum()
    }
}

/// A value to inject alongside the code caves.
#[derive(Debug, Clone)]
pub struct Variable<V> {
    id: V,
    initial_value: Value,
}

impl<V> Variable<V> {
    /// Creates a variable with its initial value.
    ///
    /// The type of the initial value is the type of the variable.
    pub fn new(id: V, initial_value: impl Into<Value>) -> Self {
        Self {
            id,
            initial_value: initial_value.into(),
        }
    }

    /// Returns the identifier.
    pub fn id(&self) -> &V {
        &self.id
    }

    /// Returns the initial value.
    pub fn initial_value(&self) -> &Value {
        &self.initial_value
    }

    /// Returns the type.
    pub fn value_type(&self) -> ValueType {
        self.initial_value.value_type()
    }

    /// Returns the size of the variable in bytes.
    pub fn size(&self, pointer_width: PointerWidth) -> usize {
        self.value_type().size(pointer_width)
    }
}

/// A validated set of code caves and variables, in declaration order.
#[derive(Debug, Clone)]
pub struct Schema<C, V> {
    code_caves: IndexMap<C, CodeCave<C, V>>,
    variables: IndexMap<V, Variable<V>>,
}

impl<C, V> Schema<C, V>
where
    C: Identifier,
    V: Identifier,
{
    /// Creates a schema.
    ///
    /// Every identifier of `C` and `V` must have exactly one descriptor.
    /// Descriptors are reordered to follow [`Identifier::ALL`].
    pub fn new(
        code_caves: impl IntoIterator<Item = CodeCave<C, V>>,
        variables: impl IntoIterator<Item = Variable<V>>,
    ) -> Result<Self, MemcaveError> {
        let code_caves = order(
            code_caves.into_iter().map(|cave| (cave.id, cave)),
            SchemaError::DuplicateCodeCave,
            SchemaError::MissingCodeCave,
        )?;

        let variables = order(
            variables.into_iter().map(|variable| (variable.id, variable)),
            SchemaError::DuplicateVariable,
            SchemaError::MissingVariable,
        )?;

        for cave in code_caves.values() {
            for artifact in &cave.artifacts {
                if let Artifact::Branch { branch, .. } = artifact {
                    branch
                        .size()
                        .map_err(|_| SchemaError::UnencodableBranch {
                            cave: format!("{:?}", cave.id),
                            branch: branch.to_string(),
                        })?;
                }
            }
        }

        Ok(Self {
            code_caves,
            variables,
        })
    }

    /// Returns the code caves in layout order.
    pub fn code_caves(&self) -> impl ExactSizeIterator<Item = &CodeCave<C, V>> {
        self.code_caves.values()
    }

    /// Returns the variables in layout order.
    pub fn variables(&self) -> impl ExactSizeIterator<Item = &Variable<V>> {
        self.variables.values()
    }

    /// Returns the code cave with the given identifier.
    pub fn code_cave(&self, id: C) -> Result<&CodeCave<C, V>, MemcaveError> {
        self.code_caves
            .get(&id)
            .ok_or_else(|| MemcaveError::NotFound(format!("{id:?}")))
    }

    /// Returns the variable with the given identifier.
    pub fn variable(&self, id: V) -> Result<&Variable<V>, MemcaveError> {
        self.variables
            .get(&id)
            .ok_or_else(|| MemcaveError::NotFound(format!("{id:?}")))
    }
}

/// Collects descriptors keyed by identifier and reorders them to follow
/// `I::ALL`.
fn order<I, T>(
    descriptors: impl Iterator<Item = (I, T)>,
    duplicate: fn(String) -> SchemaError,
    missing: fn(String) -> SchemaError,
) -> Result<IndexMap<I, T>, MemcaveError>
where
    I: Identifier,
{
    let mut collected = IndexMap::new();
    for (id, descriptor) in descriptors {
        match collected.entry(id) {
            Entry::Occupied(_) => return Err(duplicate(format!("{id:?}")).into()),
            Entry::Vacant(entry) => {
                entry.insert(descriptor);
            }
        }
    }

    let mut ordered = IndexMap::with_capacity(collected.len());
    for &id in I::ALL {
        match collected.swap_remove(&id) {
            Some(descriptor) => {
                ordered.insert(id, descriptor);
            }
            None if ordered.contains_key(&id) => {}
            None => return Err(missing(format!("{id:?}")).into()),
        }
    }

    if let Some(id) = collected.keys().next() {
        return Err(SchemaError::Undeclared(format!("{id:?}")).into());
    }

    Ok(ordered)
}
