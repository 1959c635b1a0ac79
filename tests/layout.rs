//! Integration tests for struct layout computation.
//!
//! These tests verify the layout laws the evaluation driver relies on when
//! allocating the staged struct: monotonic aligned offsets, the max-alignment
//! rule, and rejection of entities the layout cannot represent.

use std::sync::{Arc, RwLock};

use procstage::prelude::*;

fn register_context(registers: &[(&str, usize)]) -> RegisterContextRef {
    let mut bank = RegisterBank::new();
    for (name, size) in registers {
        bank.set_register(name, vec![0; *size]);
    }
    Arc::new(RwLock::new(bank))
}

#[test]
fn empty_layout_has_unit_alignment() {
    let materializer = Materializer::new();

    assert_eq!(materializer.struct_byte_size(), 0);
    assert_eq!(materializer.struct_alignment(), 1);
}

#[test]
fn eight_byte_variable_then_one_byte_register() -> Result<()> {
    let mut materializer = Materializer::new();

    let variable_offset = materializer.add_variable(Variable::with_host_value(
        "counter",
        ValueType::new(8, 8),
        vec![0; 8],
    ))?;
    let register_offset = materializer.add_register(
        RegisterInfo::new("al", 1),
        register_context(&[("al", 1)]),
    )?;

    assert_eq!(variable_offset, 0);
    assert_eq!(register_offset, 8);
    assert_eq!(materializer.struct_byte_size(), 9);
    assert_eq!(materializer.struct_alignment(), 8);
    Ok(())
}

#[test]
fn mixed_entities_obey_the_layout_laws() -> Result<()> {
    let registers = register_context(&[("al", 1), ("rdx", 8)]);
    let mut materializer = Materializer::new();

    let mut offsets = Vec::new();
    offsets.push((
        materializer.add_register(RegisterInfo::new("al", 1), registers.clone())?,
        1u64,
        1u64,
    ));
    offsets.push((
        materializer.add_symbol(Symbol::new("g_table", 0x5000))?,
        8,
        8,
    ));
    offsets.push((
        materializer.add_variable(Variable::with_host_value(
            "x",
            ValueType::new(2, 2),
            vec![0; 2],
        ))?,
        2,
        2,
    ));
    offsets.push((
        materializer.add_persistent_variable(
            ExpressionVariable::new("$p", ValueType::new(16, 16), VariableFlags::empty(), vec![0; 16]),
            None,
        )?,
        8,
        8,
    ));
    offsets.push((
        materializer.add_result_variable(ValueType::new(4, 4), false, false, None)?,
        8,
        8,
    ));
    offsets.push((
        materializer.add_register(RegisterInfo::new("rdx", 8), registers)?,
        8,
        8,
    ));

    // Offsets are non-decreasing, aligned, and inside the struct
    let total = materializer.struct_byte_size();
    let mut previous = 0;
    for (offset, size, alignment) in offsets {
        assert!(offset >= previous);
        assert_eq!(offset % alignment, 0);
        assert!(offset + size <= total);
        previous = offset;
    }

    // Struct alignment is the max over all members
    assert_eq!(materializer.struct_alignment(), 8);
    Ok(())
}

#[test]
fn layout_rejects_impossible_entities() {
    let mut materializer = Materializer::new();

    // A symbol that never resolved
    assert!(matches!(
        materializer.add_symbol(Symbol::new("ghost", 0)),
        Err(Error::Layout { .. })
    ));

    // A register descriptor with no width
    assert!(matches!(
        materializer.add_register(RegisterInfo::new("void", 0), register_context(&[])),
        Err(Error::Layout { .. })
    ));

    // A host value whose buffer disagrees with its type
    assert!(matches!(
        materializer.add_variable(Variable::with_host_value(
            "short",
            ValueType::new(8, 8),
            vec![0; 2],
        )),
        Err(Error::Layout { .. })
    ));

    // A persistent variable with a non-power-of-two alignment
    assert!(matches!(
        materializer.add_persistent_variable(
            ExpressionVariable::new("$odd", ValueType::new(8, 3), VariableFlags::empty(), vec![0; 8]),
            None,
        ),
        Err(Error::Layout { .. })
    ));

    // Rejected requests never land in the layout
    assert_eq!(materializer.entity_count(), 0);
    assert_eq!(materializer.struct_byte_size(), 0);
}

#[test]
fn the_first_materialization_seals_the_layout() -> Result<()> {
    let map: MemoryMapRef = Arc::new(RwLock::new(ProcessMemory::new(4096)));
    let mut materializer = Materializer::new();

    materializer.add_variable(Variable::with_host_value(
        "v",
        ValueType::new(4, 4),
        vec![0; 4],
    ))?;

    let base = map
        .write()
        .unwrap()
        .allocate(materializer.struct_byte_size(), materializer.struct_alignment())?;
    let _session = materializer.materialize(None, &map, base)?;

    assert!(matches!(
        materializer.add_symbol(Symbol::new("late", 0x9000)),
        Err(Error::Layout { .. })
    ));
    Ok(())
}
