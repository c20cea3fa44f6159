//! Human readable bytecode listings

use std::fmt::Write;

use crate::array::BytecodeArray;
use crate::decoder::DecodedInstruction;
use crate::handler_table::HandlerRange;
use crate::operand::{OperandType, Register};

/// Render `array` with its header, instruction listing, constant pool and
/// handler table.
pub fn disassemble(array: &BytecodeArray) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Parameter count {}", array.parameter_count());
    let _ = writeln!(out, "Frame size {}", array.frame_size());
    let _ = writeln!(out, "Bytecode length {}", array.len());

    for item in array.iter() {
        match item {
            Ok(instruction) => {
                let _ = writeln!(out, "{}", instruction_line(array, &instruction));
            }
            Err(err) => {
                let _ = writeln!(out, "  <{}>", err);
                break;
            }
        }
    }

    let pool = array.constant_pool();
    let _ = writeln!(out, "Constant pool (size = {})", pool.len());
    for (idx, constant) in pool.iter().enumerate() {
        let _ = writeln!(out, "{:>6}: {}", idx, constant.preview());
    }

    let handlers = array.handler_table();
    let _ = writeln!(out, "Handler Table (size = {})", handlers.len());
    for range in handlers.iter() {
        let _ = writeln!(out, "{}", handler_line(range, array.parameter_count()));
    }
    out
}

/// One listing line: `offset marker mnemonic operands`
pub fn instruction_line(array: &BytecodeArray, instruction: &DecodedInstruction) -> String {
    let marker = match array.source_positions().at(instruction.offset() as u32) {
        Some(entry) if entry.is_statement => "S>",
        Some(_) => "E>",
        None => "  ",
    };
    let mut line = format!(
        "{:>6} {} {}{}",
        instruction.offset(),
        marker,
        instruction.opcode().name(),
        instruction.scale().suffix()
    );
    let operands = format_operands(array, instruction);
    if !operands.is_empty() {
        line.push(' ');
        line.push_str(&operands.join(", "));
    }
    line
}

fn format_operands(array: &BytecodeArray, instruction: &DecodedInstruction) -> Vec<String> {
    let opcode = instruction.opcode();
    let parameter_count = array.parameter_count();
    let mut parts = Vec::with_capacity(instruction.operand_count());

    for (i, ty) in opcode.operand_types().iter().enumerate() {
        let raw = instruction.raw_operand(i);
        let text = match ty {
            OperandType::Reg | OperandType::RegOut => {
                Register(raw as i32).describe(parameter_count)
            }
            OperandType::RegList => {
                let list = instruction.register_list_operand(i);
                match list.last() {
                    None => format!("{}-", list.first().describe(parameter_count)),
                    Some(last) if last == list.first() => last.describe(parameter_count),
                    Some(last) => format!(
                        "{}-{}",
                        list.first().describe(parameter_count),
                        last.describe(parameter_count)
                    ),
                }
            }
            // Printed as part of the list
            OperandType::RegCount if i > 0 && opcode.operand_type(i - 1) == OperandType::RegList => {
                continue;
            }
            OperandType::Imm => format!("[{}]", raw as i32),
            OperandType::Flag8 => format!("#{}", raw),
            OperandType::RuntimeId => match instruction.runtime_function(i) {
                Some(function) => format!("[{}]", function.name()),
                None => format!("[runtime {}]", raw),
            },
            OperandType::IntrinsicId => match instruction.intrinsic(i) {
                Some(intrinsic) => format!("[{}]", intrinsic.name()),
                None => format!("[intrinsic {}]", raw),
            },
            OperandType::UImm | OperandType::Idx | OperandType::Slot | OperandType::RegCount => {
                format!("[{}]", raw)
            }
        };
        parts.push(text);
    }

    if opcode.is_jump() {
        let target = match instruction.jump_target(array.constant_pool()) {
            Ok(target) => format!("(@{})", target),
            Err(_) => "(@?)".to_string(),
        };
        if let Some(first) = parts.first_mut() {
            first.push(' ');
            first.push_str(&target);
        }
    } else if opcode.is_switch() {
        if let Ok(targets) = instruction.switch_targets(array.constant_pool()) {
            let table = targets
                .iter()
                .map(|(case, target)| format!("{}: @{}", case, target))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("{{{}}}", table));
        }
    }
    parts
}

fn handler_line(range: &HandlerRange, parameter_count: u32) -> String {
    format!(
        "   ({}, {})  ->  {} (prediction={:?}, data={})",
        range.start,
        range.end,
        range.handler_offset,
        range.prediction,
        Register(range.data).describe(parameter_count)
    )
}
