//! Unit tests for function metadata

use core_types::{BailoutId, ResumeState, SharedFunctionInfo, UnoptimizedCode};

#[test]
fn test_unoptimized_code_outputs() {
    let mut code = UnoptimizedCode::new(0x4000);
    code.add_output(BailoutId(1), 8, ResumeState::NoRegisters);
    code.add_output(BailoutId(5), 24, ResumeState::TosRegister);
    assert_eq!(code.outputs().len(), 2);
    assert_eq!(code.output_for(BailoutId(1)).map(|e| e.pc_offset), Some(8));
}

#[test]
fn test_shared_function_info() {
    let shared = SharedFunctionInfo::new("add", 2, UnoptimizedCode::new(0x4000));
    assert_eq!(shared.name, "add");
    assert_eq!(shared.parameter_count(), 3);
    assert_eq!(shared.code.instruction_start, 0x4000);
}

#[test]
fn test_bailout_id_none() {
    assert!(BailoutId::NONE.is_none());
    assert!(!BailoutId::FUNCTION_ENTRY.is_none());
    assert_eq!(BailoutId(12).to_int(), 12);
}
