//! Deoptimization entry tables
//!
//! Entries are generated on demand, grow by doubling and map back to their
//! ids; each bailout type owns a disjoint address range.

use deoptimizer::{
    BailoutType, Builtins, DeoptError, DeoptimizerConfig, ExecutionContext, GetEntryMode,
    JumpTableEntry, ENTRY_REGION_BASE, MAX_NUMBER_OF_ENTRIES,
};
use integration_tests::init_tracing;

fn context(config: DeoptimizerConfig) -> ExecutionContext {
    init_tracing();
    ExecutionContext::new(config).unwrap()
}

#[test]
fn test_entries_round_trip() {
    let mut context = context(DeoptimizerConfig::default());
    let first = context
        .get_deoptimization_entry(0, BailoutType::Eager, GetEntryMode::EnsureEntryCode)
        .unwrap()
        .unwrap();
    assert_eq!(first, ENTRY_REGION_BASE);
    for id in [1, 17, 63] {
        let address = context
            .get_deoptimization_entry(id, BailoutType::Eager, GetEntryMode::CalculateEntryAddress)
            .unwrap()
            .unwrap();
        let entry_size = context.data().generator().table_entry_size();
        assert_eq!(address, first + id as usize * entry_size);
        assert_eq!(
            context.get_deoptimization_id(address, BailoutType::Eager),
            Some(id)
        );
    }
    assert_eq!(
        context.data().entry_table(BailoutType::Eager).unwrap().entry_count(),
        64
    );
}

#[test]
fn test_tables_grow_by_doubling() {
    let mut context = context(DeoptimizerConfig::default());
    assert_eq!(
        context.get_deoptimization_entry(100, BailoutType::Lazy, GetEntryMode::CalculateEntryAddress),
        Ok(None)
    );
    context
        .get_deoptimization_entry(100, BailoutType::Lazy, GetEntryMode::EnsureEntryCode)
        .unwrap();
    assert_eq!(
        context.data().entry_table(BailoutType::Lazy).unwrap().entry_count(),
        128
    );
    context
        .get_deoptimization_entry(1000, BailoutType::Lazy, GetEntryMode::EnsureEntryCode)
        .unwrap();
    assert_eq!(
        context.data().entry_table(BailoutType::Lazy).unwrap().entry_count(),
        1024
    );
}

#[test]
fn test_tables_are_disjoint() {
    let mut context = context(DeoptimizerConfig::default());
    let mut entries = Vec::new();
    for bailout_type in BailoutType::WITH_ENTRY_TABLES {
        let address = context
            .get_deoptimization_entry(0, bailout_type, GetEntryMode::EnsureEntryCode)
            .unwrap()
            .unwrap();
        entries.push((bailout_type, address));
    }
    for (bailout_type, address) in &entries {
        for other in BailoutType::WITH_ENTRY_TABLES {
            let expected = (other == *bailout_type).then_some(0);
            assert_eq!(context.get_deoptimization_id(*address, other), expected);
        }
    }
    assert!(entries.windows(2).all(|pair| pair[0].1 < pair[1].1));
}

#[test]
fn test_generated_code_pushes_id_and_type() {
    let mut context = context(DeoptimizerConfig::default());
    context
        .get_deoptimization_entry(5, BailoutType::Soft, GetEntryMode::EnsureEntryCode)
        .unwrap();
    let table = context.data().entry_table(BailoutType::Soft).unwrap();
    let entry_size = context.data().generator().table_entry_size();
    let code = table.code();

    // push imm32 <id>
    let entry = &code[5 * entry_size..6 * entry_size];
    assert_eq!(entry[0], 0x68);
    assert_eq!(entry[1..5], 5u32.to_le_bytes());

    // The shared tail pushes the bailout type and jumps to the deoptimizer.
    let tail = &code[64 * entry_size..];
    assert_eq!(tail[0..2], [0x6A, BailoutType::Soft as u8]);
    let target = Builtins::default().deoptimizer_entry as u64;
    assert_eq!(tail[4..12], target.to_le_bytes());
}

#[test]
fn test_exhausted_table_aborts_context() {
    let mut context = context(DeoptimizerConfig::default());
    let id = MAX_NUMBER_OF_ENTRIES as u32;
    assert_eq!(
        context.get_deoptimization_entry(id, BailoutType::Eager, GetEntryMode::EnsureEntryCode),
        Err(DeoptError::EntryTableExhausted {
            id,
            bailout_type: BailoutType::Eager,
            max: MAX_NUMBER_OF_ENTRIES,
        })
    );
    assert!(context.is_aborted());
    assert!(context
        .abort_reason()
        .unwrap()
        .contains("exceeds the maximum of 16384 entries"));
}

#[test]
fn test_last_entry_is_available() {
    let mut context = context(DeoptimizerConfig::default());
    let id = MAX_NUMBER_OF_ENTRIES as u32 - 1;
    assert!(context
        .get_deoptimization_entry(id, BailoutType::Eager, GetEntryMode::EnsureEntryCode)
        .unwrap()
        .is_some());
    assert_eq!(
        context.data().entry_table(BailoutType::Eager).unwrap().entry_count(),
        MAX_NUMBER_OF_ENTRIES
    );
}

#[test]
fn test_custom_limits() {
    let config = DeoptimizerConfig::default().with_entry_limits(16, 128);
    let mut context = context(config);
    context
        .get_deoptimization_entry(0, BailoutType::Eager, GetEntryMode::EnsureEntryCode)
        .unwrap();
    assert_eq!(
        context.data().entry_table(BailoutType::Eager).unwrap().entry_count(),
        16
    );
    assert!(matches!(
        context.get_deoptimization_entry(128, BailoutType::Eager, GetEntryMode::EnsureEntryCode),
        Err(DeoptError::EntryTableExhausted { max: 128, .. })
    ));
}

#[test]
fn test_debugger_has_no_entry_table() {
    let mut context = context(DeoptimizerConfig::default());
    assert_eq!(
        context.get_deoptimization_entry(0, BailoutType::Debugger, GetEntryMode::EnsureEntryCode),
        Err(DeoptError::NoEntryTable(BailoutType::Debugger))
    );
    assert_eq!(context.get_deoptimization_id(ENTRY_REGION_BASE, BailoutType::Debugger), None);
}

#[test]
fn test_jump_table_listing() {
    let mut context = context(DeoptimizerConfig::default());
    let mut addresses = Vec::new();
    for id in [3, 3, 9] {
        addresses.push(
            context
                .get_deoptimization_entry(id, BailoutType::Eager, GetEntryMode::EnsureEntryCode)
                .unwrap()
                .unwrap(),
        );
    }

    let mut separate = context.new_jump_table();
    let mut shared = ExecutionContext::new(
        DeoptimizerConfig::default().with_reuse_jump_table_entries(true),
    )
    .unwrap()
    .new_jump_table();
    for address in &addresses {
        let entry = JumpTableEntry {
            address: *address,
            bailout_type: BailoutType::Eager,
            needs_frame: false,
        };
        shared.add(entry);
        separate.add(entry);
    }
    assert_eq!(shared.len(), 2);
    assert_eq!(separate.len(), 3);

    let listing = context.data().describe_jump_table(&shared);
    assert_eq!(listing.lines().count(), 2);
    assert!(listing.contains("jump table entry 0: eager deoptimization entry 3"));
    assert!(listing.contains("jump table entry 1: eager deoptimization entry 9"));
}
