use memcave_arch_x86::{BranchKind, INT3, NOP};
use memcave_core::{
    Endianness, ErrorKind, PointerWidth, SchemaError, TruncationPolicy, ValueType,
};
use memcave_driver_memory::MemoryProcessDriver;

use super::*;

///////////////////////////////////////////////////////////////////////////////
// Fixtures
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Cave {
    Entry,
    Hook,
    Exit,
}

impl Identifier for Cave {
    const ALL: &'static [Self] = &[Cave::Entry, Cave::Hook, Cave::Exit];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Var {
    Counter,
    Scale,
    Origin,
}

impl Identifier for Var {
    const ALL: &'static [Self] = &[Var::Counter, Var::Scale, Var::Origin];
}

const MODULE_BASE: u64 = 0x40_0000;

type TestInjector<C, V> = Injector<MemoryProcessDriver, C, V>;

fn target() -> Target<MemoryProcessDriver> {
    let driver = MemoryProcessDriver::new();
    driver
        .map_module("game.exe", MODULE_BASE, vec![0xcc; 0x100])
        .expect("module mapping");

    Target::new(driver)
        .with_endianness(Endianness::Little)
        .with_pointer_width(PointerWidth::Bits32)
        .with_truncation_policy(TruncationPolicy::SafeTruncate)
}

/// Entry (12 bytes), Hook (7 bytes), Exit (1 byte); three 4-byte variables.
fn schema() -> Schema<Cave, Var> {
    Schema::new(
        [
            // Declared out of order on purpose.
            CodeCave::new(Cave::Exit, [Artifact::bytes([0xc3])]),
            CodeCave::new(
                Cave::Entry,
                [
                    Artifact::bytes([0x50]),
                    Artifact::call(BranchTarget::CodeCave(Cave::Hook)),
                    Artifact::bytes([0x58]),
                    Artifact::jump(
                        BranchKind::Jmp,
                        BranchTarget::Address(MemoryAddress::module("game.exe", 5)),
                    ),
                ],
            ),
            CodeCave::new(
                Cave::Hook,
                [
                    Artifact::bytes([0xff, 0x05]),
                    Artifact::VariableAddress(Var::Counter),
                    Artifact::bytes([0xc3]),
                ],
            ),
        ],
        [
            Variable::new(Var::Counter, 0u32),
            Variable::new(Var::Scale, 1.5f32),
            Variable::new(Var::Origin, Va(MODULE_BASE)),
        ],
    )
    .expect("valid schema")
}

fn injector() -> TestInjector<Cave, Var> {
    Injector::new(schema()).with_target(target())
}

fn driver<C, V>(injector: &TestInjector<C, V>) -> &MemoryProcessDriver
where
    C: Identifier,
    V: Identifier,
{
    injector
        .target()
        .expect("target")
        .driver()
        .expect("driver")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn empty_injector() -> TestInjector<NoIdentifier, NoIdentifier> {
    let schema = Schema::new([], []).expect("valid schema");
    Injector::new(schema).with_target(target())
}

fn variables_only() -> Schema<NoIdentifier, Var> {
    Schema::new(
        [],
        [
            Variable::new(Var::Origin, Va(0)),
            Variable::new(Var::Scale, 0.5f32),
            Variable::new(Var::Counter, 7u32),
        ],
    )
    .expect("valid schema")
}

///////////////////////////////////////////////////////////////////////////////
// Schema validation
///////////////////////////////////////////////////////////////////////////////

#[test]
fn schema_follows_declaration_order() {
    let schema = schema();
    let caves = schema.code_caves().map(|cave| *cave.id()).collect::<Vec<_>>();
    assert_eq!(caves, [Cave::Entry, Cave::Hook, Cave::Exit]);
}

#[test]
fn schema_duplicate_code_cave() {
    let err = Schema::<Cave, NoIdentifier>::new(
        [
            CodeCave::new(Cave::Entry, []),
            CodeCave::new(Cave::Hook, []),
            CodeCave::new(Cave::Exit, []),
            CodeCave::new(Cave::Hook, []),
        ],
        [],
    )
    .unwrap_err();

    assert!(matches!(
        err,
        MemcaveError::Schema(SchemaError::DuplicateCodeCave(ref id)) if id == "Hook"
    ));
    assert_eq!(err.kind(), ErrorKind::Schema);
}

#[test]
fn schema_missing_variable() {
    let err = Schema::<NoIdentifier, Var>::new(
        [],
        [
            Variable::new(Var::Counter, 0u32),
            Variable::new(Var::Origin, Va(0)),
        ],
    )
    .unwrap_err();

    assert!(matches!(
        err,
        MemcaveError::Schema(SchemaError::MissingVariable(ref id)) if id == "Scale"
    ));
}

#[test]
fn schema_undeclared_identifier() {
    // One descriptor uses an identifier its set does not declare.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Partial {
        Listed,
        Unlisted,
    }

    impl Identifier for Partial {
        const ALL: &'static [Self] = &[Partial::Listed];
    }

    let err = Schema::<NoIdentifier, Partial>::new(
        [],
        [
            Variable::new(Partial::Listed, 0u8),
            Variable::new(Partial::Unlisted, 0u8),
        ],
    )
    .unwrap_err();

    assert!(matches!(
        err,
        MemcaveError::Schema(SchemaError::Undeclared(ref id)) if id == "Unlisted"
    ));
}

#[test]
fn schema_unencodable_branch() {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Single {
        Only,
    }

    impl Identifier for Single {
        const ALL: &'static [Self] = &[Single::Only];
    }

    let err = Schema::<Single, NoIdentifier>::new(
        [CodeCave::new(
            Single::Only,
            [Artifact::Branch {
                branch: Branch::near(BranchKind::Call),
                target: BranchTarget::CodeCave(Single::Only),
            }],
        )],
        [],
    )
    .unwrap_err();

    assert!(matches!(
        err,
        MemcaveError::Schema(SchemaError::UnencodableBranch { .. })
    ));
}

///////////////////////////////////////////////////////////////////////////////
// Layout
///////////////////////////////////////////////////////////////////////////////

#[test]
fn layout_requires_target() {
    let injector = TestInjector::new(schema());
    let err = injector.required_size().unwrap_err();
    assert!(matches!(err, MemcaveError::NotConfigured));
}

#[test]
fn code_cave_offsets() -> Result<(), MemcaveError> {
    let injector = injector();
    let layout = injector.layout()?;

    assert_eq!(layout.code_cave_offset(Cave::Entry)?, 0);
    assert_eq!(layout.code_cave_size(Cave::Entry)?, 12);
    assert_eq!(layout.code_cave_offset(Cave::Hook)?, 20);
    assert_eq!(layout.code_cave_size(Cave::Hook)?, 7);
    assert_eq!(layout.code_cave_offset(Cave::Exit)?, 35);

    let mut previous = None;
    for &cave in Cave::ALL {
        let offset = layout.code_cave_offset(cave)?;
        assert!(previous.is_none_or(|previous| offset > previous));
        previous = Some(offset);
    }

    Ok(())
}

#[test]
fn variable_offsets() -> Result<(), MemcaveError> {
    let injector = injector();
    let layout = injector.layout()?;

    assert!(layout.has_section_separator());
    assert_eq!(layout.variable_section_offset()?, 44);
    assert_eq!(layout.variable_offset(Var::Counter)?, 44);
    assert_eq!(layout.variable_offset(Var::Scale)?, 48);
    assert_eq!(layout.variable_offset(Var::Origin)?, 52);
    assert_eq!(layout.variable_size(Var::Origin)?, 4);
    assert_eq!(layout.total_size()?, 56);
    Ok(())
}

#[test]
fn separators_are_configurable() -> Result<(), MemcaveError> {
    let injector = injector()
        .with_code_cave_separator([])
        .with_section_separator([0xcc, 0xcc]);
    let layout = injector.layout()?;

    assert_eq!(layout.code_cave_offset(Cave::Hook)?, 12);
    assert_eq!(layout.code_cave_offset(Cave::Exit)?, 19);
    assert_eq!(layout.variable_offset(Var::Counter)?, 22);
    assert_eq!(layout.total_size()?, 34);
    Ok(())
}

#[test]
fn pointer_width_changes_sizes() -> Result<(), MemcaveError> {
    let injector = Injector::new(schema())
        .with_target(target().with_pointer_width(PointerWidth::Bits64));
    let layout = injector.layout()?;

    assert_eq!(layout.code_cave_size(Cave::Hook)?, 11);
    assert_eq!(layout.variable_size(Var::Origin)?, 8);
    assert_eq!(layout.total_size()?, 64);
    Ok(())
}

#[test]
fn variables_only_omit_section_separator() -> Result<(), MemcaveError> {
    let injector = Injector::new(variables_only()).with_target(target());
    let layout = injector.layout()?;

    assert!(!layout.has_section_separator());
    assert_eq!(layout.variable_offset(Var::Counter)?, 0);
    assert_eq!(layout.variable_offset(Var::Origin)?, 8);
    assert_eq!(layout.total_size()?, 12);
    Ok(())
}

#[test]
fn variables_only_with_separator_always() -> Result<(), MemcaveError> {
    let mut injector = Injector::new(variables_only())
        .with_target(target())
        .with_section_separator_policy(SectionSeparatorPolicy::Always);

    let layout = injector.layout()?;
    assert!(layout.has_section_separator());
    assert_eq!(layout.variable_offset(Var::Counter)?, 8);
    assert_eq!(layout.total_size()?, 20);

    let base = injector.inject()?;
    let image = injector.target().expect("target").read_bytes(base, 20)?;
    assert_eq!(&image[..8], &[INT3; 8]);
    assert_eq!(injector.read_variable(Var::Counter)?, Value::U32(7));
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Injection
///////////////////////////////////////////////////////////////////////////////

#[test]
fn image_contents() -> Result<(), MemcaveError> {
    let mut injector = injector();
    let base = injector.inject()?;
    let size = injector.required_size()?;

    let live = driver(&injector).live_allocations();
    assert_eq!(live, vec![(base, size as usize)]);
    assert_eq!(driver(&injector).protection(base), Some(MemoryAccess::RWX));

    let image = injector.target().expect("target").read_bytes(base, 56)?;

    // Entry: push; call Hook; pop; jmp game.exe+5
    assert_eq!(image[0], 0x50);
    assert_eq!(&image[1..6], &[0xe8, 14, 0, 0, 0]);
    assert_eq!(image[6], 0x58);
    let displacement = (MODULE_BASE + 5) as i64 - (base.0 + 7) as i64 - 5;
    assert_eq!(image[7], 0xe9);
    assert_eq!(&image[8..12], &(displacement as i32).to_le_bytes());
    assert_eq!(&image[12..20], &[NOP; 8]);

    // Hook: inc dword [Counter]; ret
    assert_eq!(&image[20..22], &[0xff, 0x05]);
    assert_eq!(&image[22..26], &((base.0 + 44) as u32).to_le_bytes());
    assert_eq!(image[26], 0xc3);
    assert_eq!(&image[27..35], &[NOP; 8]);

    // Exit
    assert_eq!(image[35], 0xc3);
    assert_eq!(&image[36..44], &[INT3; 8]);

    // Variables
    assert_eq!(&image[44..48], &0u32.to_le_bytes());
    assert_eq!(&image[48..52], &1.5f32.to_le_bytes());
    assert_eq!(&image[52..56], &(MODULE_BASE as u32).to_le_bytes());
    Ok(())
}

#[test]
fn code_cave_address_artifact() -> Result<(), MemcaveError> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Table {
        Vtable,
        Method,
    }

    impl Identifier for Table {
        const ALL: &'static [Self] = &[Table::Vtable, Table::Method];
    }

    let schema = Schema::<Table, NoIdentifier>::new(
        [
            CodeCave::new(Table::Vtable, [Artifact::CodeCaveAddress(Table::Method)]),
            CodeCave::new(Table::Method, [Artifact::bytes([0xc3])]),
        ],
        [],
    )?;

    let mut injector = Injector::new(schema).with_target(target());
    let base = injector.inject()?;

    let target = injector.target().expect("target");
    assert_eq!(target.read_va(base)?, base + 12);
    assert_eq!(injector.code_cave_address(Table::Method)?, base + 12);
    Ok(())
}

#[test]
fn image_size_matches_required_size() -> Result<(), MemcaveError> {
    for policy in [
        SectionSeparatorPolicy::WhenCodeCavesPresent,
        SectionSeparatorPolicy::Always,
    ] {
        let mut injector = injector().with_section_separator_policy(policy);
        let required = injector.required_size()?;
        let base = injector.inject()?;

        let live = driver(&injector).live_allocations();
        assert_eq!(live, vec![(base, required as usize)]);
        injector.reset()?;
    }

    Ok(())
}

#[test]
fn empty_schema_never_allocates() -> Result<(), MemcaveError> {
    let mut injector = empty_injector();
    assert_eq!(injector.required_size()?, 0);

    assert_eq!(injector.inject()?, Va(0));
    assert!(injector.is_injected());
    assert_eq!(driver(&injector).allocation_count(), 0);

    injector.reset()?;
    assert_eq!(driver(&injector).free_count(), 0);
    Ok(())
}

#[test]
fn inject_requires_configured_target() {
    let mut injector = TestInjector::new(schema());
    let err = injector.inject().unwrap_err();
    assert!(matches!(err, MemcaveError::NotConfigured));
}

#[test]
fn inject_requires_live_process() -> Result<(), MemcaveError> {
    let mut detached = TestInjector::new(schema()).with_target(Target::detached());
    let err = detached.inject().unwrap_err();
    assert!(matches!(err, MemcaveError::NotAttached));

    let mut injector = injector();
    driver(&injector).set_exited(true);
    let err = injector.inject().unwrap_err();
    assert!(matches!(err, MemcaveError::NotAttached));
    assert!(!injector.is_injected());
    Ok(())
}

#[test]
fn inject_refused_allocation() {
    let mut injector = injector();
    driver(&injector).refuse_allocations(true);

    let err = injector.inject().unwrap_err();
    assert!(matches!(err, MemcaveError::AllocationFailed { size: 56 }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!injector.is_injected());
}

#[test]
fn failed_write_releases_allocation() {
    init_tracing();

    let mut injector = injector();
    driver(&injector).set_write_limit(Some(4));

    let err = injector.inject().unwrap_err();
    assert!(matches!(
        err,
        MemcaveError::WriteFailed {
            size: 56,
            transferred: 4,
            ..
        }
    ));

    assert!(!injector.is_injected());
    assert!(driver(&injector).live_allocations().is_empty());
    assert_eq!(driver(&injector).free_count(), 1);
}

#[test]
fn failed_encoding_releases_allocation() {
    let schema = Schema::<NoIdentifier, Var>::new(
        [],
        [
            Variable::new(Var::Counter, 0u32),
            Variable::new(Var::Scale, 0f32),
            Variable::new(Var::Origin, Va(0x1_0000_0000)),
        ],
    )
    .expect("valid schema");

    let mut injector = Injector::new(schema).with_target(target());
    let err = injector.inject().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pointer);
    assert!(driver(&injector).live_allocations().is_empty());
}

#[test]
fn inject_twice() -> Result<(), MemcaveError> {
    let mut injector = injector();
    injector.inject()?;

    let err = injector.inject().unwrap_err();
    assert!(matches!(err, MemcaveError::AlreadyInjected));

    let err = injector.inject_at(Va(0x2000)).unwrap_err();
    assert!(matches!(err, MemcaveError::AlreadyInjected));
    assert_eq!(driver(&injector).allocation_count(), 1);
    Ok(())
}

#[test]
fn inject_at_caller_memory() -> Result<(), MemcaveError> {
    let mut injector = injector();
    let base = Va(0x50_0000);
    driver(&injector).map(base, vec![0u8; 0x100], MemoryAccess::RWX)?;

    injector.inject_at(base)?;
    assert_eq!(injector.base_address()?, base);
    assert_eq!(injector.code_cave_address(Cave::Hook)?, base + 20);
    assert_eq!(injector.read_variable(Var::Scale)?, Value::F32(1.5));
    assert_eq!(driver(&injector).allocation_count(), 0);

    injector.reset()?;
    assert!(!injector.is_injected());
    assert_eq!(driver(&injector).free_count(), 0);
    Ok(())
}

#[test]
fn inject_at_end_of_address_space() -> Result<(), MemcaveError> {
    let mut injector = Injector::new(schema())
        .with_target(target().with_pointer_width(PointerWidth::Bits64));

    let err = injector.inject_at(Va(u64::MAX - 4)).unwrap_err();
    assert!(matches!(
        err,
        MemcaveError::AddressOverflow {
            base: Va(0xffff_ffff_ffff_fffb),
            offset: 63,
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Pointer);
    assert!(!injector.is_injected());

    // The last byte of the region may be the last byte of the address space.
    let layout = injector.layout()?;
    let base = Va(u64::MAX - 63);
    assert_eq!(layout.variable_address(base, Var::Origin)?, Va(u64::MAX - 7));
    assert!(matches!(
        layout.code_cave_address(Va(u64::MAX - 10), Cave::Exit),
        Err(MemcaveError::AddressOverflow { offset: 39, .. })
    ));
    Ok(())
}

#[test]
fn image_past_end_of_address_space() -> Result<(), MemcaveError> {
    let injector = Injector::new(schema())
        .with_target(target().with_pointer_width(PointerWidth::Bits64));
    let target = injector.target().expect("target");

    let err = injector
        .layout()?
        .image(Va(u64::MAX - 4), target)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pointer);
    Ok(())
}

#[test]
fn target_is_locked_while_injected() -> Result<(), MemcaveError> {
    let mut injector = injector();
    injector.inject()?;

    assert!(matches!(
        injector.set_target(target()),
        Err(MemcaveError::AlreadyInjected)
    ));
    assert!(matches!(
        injector.take_target(),
        Err(MemcaveError::AlreadyInjected)
    ));
    assert!(injector.target().is_some());

    injector.reset()?;
    assert!(injector.take_target()?.is_some());
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Reset
///////////////////////////////////////////////////////////////////////////////

#[test]
fn reset_frees_once() -> Result<(), MemcaveError> {
    let mut injector = injector();
    injector.inject()?;

    injector.reset()?;
    injector.reset()?;
    assert_eq!(injector.state(), InjectionState::NotInjected);
    assert_eq!(driver(&injector).free_count(), 1);
    assert!(driver(&injector).live_allocations().is_empty());
    Ok(())
}

#[test]
fn reset_after_exit_does_not_free() -> Result<(), MemcaveError> {
    let mut injector = injector();
    injector.inject()?;
    driver(&injector).set_exited(true);

    injector.reset()?;
    assert!(!injector.is_injected());
    assert_eq!(driver(&injector).free_count(), 0);
    Ok(())
}

#[test]
fn failed_release_still_resets() -> Result<(), MemcaveError> {
    init_tracing();

    let mut injector = injector();
    let base = injector.inject()?;

    // Release the region behind the injector's back.
    driver(&injector).free(base)?;

    let err = injector.reset().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Driver);
    assert_eq!(injector.state(), InjectionState::NotInjected);
    assert!(matches!(injector.base_address(), Err(MemcaveError::NotInjected)));

    injector.reset()?;
    assert_eq!(driver(&injector).free_count(), 1);
    Ok(())
}

#[test]
fn reset_then_inject_again() -> Result<(), MemcaveError> {
    let mut injector = injector();
    let first = injector.inject()?;
    injector.reset()?;

    let second = injector.inject()?;
    assert_ne!(first, second);
    assert_eq!(driver(&injector).live_allocations().len(), 1);
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Address resolution and variables
///////////////////////////////////////////////////////////////////////////////

#[test]
fn resolution_requires_injection() {
    let injector = injector();

    for &cave in Cave::ALL {
        let err = injector.code_cave_address(cave).unwrap_err();
        assert!(matches!(err, MemcaveError::NotInjected));
        assert_eq!(err.kind(), ErrorKind::State);
    }

    for &var in Var::ALL {
        let err = injector.variable_address(var).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }
}

#[test]
fn addresses_after_injection() -> Result<(), MemcaveError> {
    let mut injector = injector();
    let base = injector.inject()?;

    assert_eq!(injector.code_cave_address(Cave::Entry)?, base);
    assert_eq!(injector.code_cave_address(Cave::Exit)?, base + 35);
    assert_eq!(injector.variable_address(Var::Scale)?, base + 48);
    assert_eq!(
        injector.variable_address_bytes(Var::Counter)?.as_slice(),
        &((base.0 + 44) as u32).to_le_bytes()
    );
    Ok(())
}

#[test]
fn variables_read_write() -> Result<(), MemcaveError> {
    let mut injector = injector();
    injector.inject()?;

    assert_eq!(injector.read_variable(Var::Counter)?, Value::U32(0));
    assert_eq!(injector.read_variable(Var::Origin)?, Value::Pointer(Va(MODULE_BASE)));

    injector.write_variable(Var::Counter, 41u32)?;
    assert_eq!(injector.read_variable(Var::Counter)?, Value::U32(41));

    let err = injector.write_variable(Var::Counter, 41u64).unwrap_err();
    assert!(matches!(
        err,
        MemcaveError::ValueTypeMismatch {
            expected: ValueType::U32,
            actual: ValueType::U64,
        }
    ));
    Ok(())
}

#[test]
fn write_branch_into_module() -> Result<(), MemcaveError> {
    let mut injector = injector();
    let base = injector.inject()?;

    let at = MemoryAddress::module("game.exe", 0x10);
    injector.write_branch(
        &at,
        Branch::far(BranchKind::Jmp),
        &BranchTarget::CodeCave(Cave::Entry),
        7,
    )?;

    let target = injector.target().expect("target");
    let bytes = target.read_bytes(MODULE_BASE + 0x10, 7)?;
    let displacement = base.0 as i64 - (MODULE_BASE + 0x10) as i64 - 5;
    assert_eq!(bytes[0], 0xe9);
    assert_eq!(&bytes[1..5], &(displacement as i32).to_le_bytes());
    assert_eq!(&bytes[5..], &[NOP, NOP]);
    Ok(())
}
