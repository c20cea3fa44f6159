//! Control-flow integrity checks for bytecode arrays
//!
//! A bytecode array has to pass [`Verifier::check`] before anything executes
//! it. The dispatch loop uses jump deltas, switch tables and handler offsets
//! unchecked, so a stream that fails here is treated as hostile:
//! [`BytecodeArray::verify`](crate::BytecodeArray::verify) panics rather than
//! returning the error.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::array::BytecodeArray;
use crate::decoder::{BytecodeIterator, DecodedInstruction, TargetError};
use crate::error::BytecodeError;

/// How thoroughly to verify
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Jump, switch and handler-table checks
    #[default]
    Light,
    /// Mode for adversarial and fuzz inputs. Runs the light checks.
    Full,
}

/// Why a handler range was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFault {
    /// `start > end`
    InvertedRange,
    /// `end` past the end of the stream
    EndOutOfBounds,
    /// Handler offset is not an instruction start
    MisalignedHandler,
}

impl std::fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InvertedRange => "start is after end",
            Self::EndOutOfBounds => "end is past the bytecode length",
            Self::MisalignedHandler => "handler offset is not an instruction start",
        })
    }
}

/// Verification failure
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Jump or switch target outside `[0, length)`
    #[error("out of bounds: jump at {offset} targets {target}")]
    TargetOutOfBounds {
        /// Offset of the jump
        offset: usize,
        /// Absolute target
        target: i64,
    },

    /// Constant pool index outside the pool
    #[error("out of bounds: instruction at {offset} references constant {index}")]
    ConstantOutOfBounds {
        /// Offset of the instruction
        offset: usize,
        /// Pool index
        index: u32,
    },

    /// Target inside an instruction rather than at its start
    #[error("invalid control-flow: jump at {offset} targets {target}, which is not an instruction start")]
    MisalignedTarget {
        /// Offset of the jump
        offset: usize,
        /// Absolute target
        target: usize,
    },

    /// Constant jump whose pool entry is not a jump offset
    #[error("invalid control-flow: constant {index} used by the jump at {offset} is not a jump offset")]
    NotAJumpOffset {
        /// Offset of the jump
        offset: usize,
        /// Pool index
        index: u32,
    },

    /// Malformed handler-table entry
    #[error("invalid exception handler: entry {index}: {fault}")]
    InvalidHandler {
        /// Handler-table index
        index: usize,
        /// What is wrong with it
        fault: HandlerFault,
    },

    /// Stream that does not decode
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(#[from] BytecodeError),
}

impl VerifyError {
    /// Failure class: `"out of bounds"`, `"invalid control-flow"`,
    /// `"invalid exception handler"` or `"invalid bytecode"`
    pub fn diagnosis(&self) -> &'static str {
        match self {
            Self::TargetOutOfBounds { .. } | Self::ConstantOutOfBounds { .. } => "out of bounds",
            Self::MisalignedTarget { .. } | Self::NotAJumpOffset { .. } => "invalid control-flow",
            Self::InvalidHandler { .. } => "invalid exception handler",
            Self::InvalidBytecode(_) => "invalid bytecode",
        }
    }

    /// Error for an unresolvable target of the instruction at `offset`
    pub fn from_target(offset: usize, err: TargetError) -> Self {
        match err {
            TargetError::ConstantOutOfBounds(index) => Self::ConstantOutOfBounds { offset, index },
            TargetError::NotAJumpOffset(index) => Self::NotAJumpOffset { offset, index },
        }
    }
}

/// Bytecode verifier
pub struct Verifier;

impl Verifier {
    /// Check `array` without side effects.
    ///
    /// Decoding errors come first, then jump and switch targets in stream
    /// order, then handler ranges in table order.
    pub fn check(array: &BytecodeArray, mode: VerificationMode) -> Result<(), VerifyError> {
        match mode {
            VerificationMode::Light => Self::check_light(array),
            VerificationMode::Full => Self::check_full(array),
        }
    }

    fn check_full(array: &BytecodeArray) -> Result<(), VerifyError> {
        Self::check_light(array)
    }

    fn check_light(array: &BytecodeArray) -> Result<(), VerifyError> {
        let instructions = BytecodeIterator::new(array.bytes()).collect::<Result<Vec<_>, _>>()?;
        let starts: FxHashSet<usize> = instructions.iter().map(DecodedInstruction::offset).collect();
        let length = array.len();

        let check_target = |offset: usize, target: i64| -> Result<(), VerifyError> {
            if target < 0 || target >= length as i64 {
                return Err(VerifyError::TargetOutOfBounds { offset, target });
            }
            if !starts.contains(&(target as usize)) {
                return Err(VerifyError::MisalignedTarget {
                    offset,
                    target: target as usize,
                });
            }
            Ok(())
        };

        for instruction in &instructions {
            let offset = instruction.offset();
            let opcode = instruction.opcode();
            if opcode.is_jump() {
                let target = instruction
                    .jump_target(array.constant_pool())
                    .map_err(|err| VerifyError::from_target(offset, err))?;
                check_target(offset, target)?;
            } else if opcode.is_switch() {
                let targets = instruction
                    .switch_targets(array.constant_pool())
                    .map_err(|err| VerifyError::from_target(offset, err))?;
                for (_, target) in targets {
                    check_target(offset, target)?;
                }
            }
        }

        for (index, range) in array.handler_table().iter().enumerate() {
            let fault = if range.start > range.end {
                Some(HandlerFault::InvertedRange)
            } else if range.end as usize > length {
                Some(HandlerFault::EndOutOfBounds)
            } else if !starts.contains(&(range.handler_offset as usize)) {
                Some(HandlerFault::MisalignedHandler)
            } else {
                None
            };
            if let Some(fault) = fault {
                return Err(VerifyError::InvalidHandler { index, fault });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{Constant, ConstantPool};
    use crate::handler_table::{CatchPrediction, HandlerRange, HandlerTable};
    use crate::instruction::Opcode;
    use crate::operand::Register;
    use proptest::prelude::*;

    fn array(bytes: Vec<u8>) -> BytecodeArray {
        BytecodeArray::new(bytes, ConstantPool::new(), HandlerTable::new(), 0, 1)
    }

    fn with_handler(bytes: Vec<u8>, start: u32, end: u32, handler_offset: u32) -> BytecodeArray {
        let table = HandlerTable::from(vec![HandlerRange {
            start,
            end,
            handler_offset,
            data: Register::current_context().index(),
            prediction: CatchPrediction::Caught,
        }]);
        BytecodeArray::new(bytes, ConstantPool::new(), table, 0, 1)
    }

    fn diagnose(array: &BytecodeArray) -> Option<&'static str> {
        Verifier::check(array, VerificationMode::Light)
            .err()
            .map(|err| err.diagnosis())
    }

    #[test]
    fn test_accepts_jump_to_next_instruction() {
        let array = array(vec![Opcode::Jump as u8, 2, Opcode::Return as u8]);
        assert!(Verifier::check(&array, VerificationMode::Light).is_ok());
        assert!(Verifier::check(&array, VerificationMode::Full).is_ok());
    }

    #[test]
    fn test_rejects_constant_index_out_of_pool() {
        let array = array(vec![Opcode::JumpConstant as u8, 7, Opcode::Return as u8]);
        assert_eq!(diagnose(&array), Some("out of bounds"));
    }

    #[test]
    fn test_rejects_target_inside_instruction() {
        let array = array(vec![Opcode::Jump as u8, 1, Opcode::Return as u8]);
        assert_eq!(diagnose(&array), Some("invalid control-flow"));
    }

    #[test]
    fn test_rejects_target_past_end() {
        let forwards = array(vec![Opcode::Jump as u8, 3, Opcode::Return as u8]);
        assert_eq!(diagnose(&forwards), Some("out of bounds"));
        let backwards = array(vec![Opcode::Return as u8, Opcode::JumpLoop as u8, 0xFC, 0]);
        assert_eq!(diagnose(&backwards), Some("out of bounds"));
    }

    #[test]
    fn test_rejects_wrong_constant_kind() {
        let mut pool = ConstantPool::new();
        pool.add_number(2.0);
        let array = BytecodeArray::new(
            vec![Opcode::JumpConstant as u8, 0, Opcode::Return as u8],
            pool,
            HandlerTable::new(),
            0,
            1,
        );
        assert_eq!(diagnose(&array), Some("invalid control-flow"));
    }

    #[test]
    fn test_switch_table_targets() {
        // SwitchOnSmiNoFeedback [0] [2] [0]; Return; Return
        let bytes = vec![Opcode::SwitchOnSmiNoFeedback as u8, 0, 2, 0, Opcode::Return as u8, Opcode::Return as u8];
        let good = ConstantPool::from(vec![Constant::JumpOffset(4), Constant::JumpOffset(5)]);
        let array = BytecodeArray::new(bytes.clone(), good, HandlerTable::new(), 0, 1);
        assert_eq!(diagnose(&array), None);

        let short = ConstantPool::from(vec![Constant::JumpOffset(4)]);
        let array = BytecodeArray::new(bytes.clone(), short, HandlerTable::new(), 0, 1);
        assert_eq!(diagnose(&array), Some("out of bounds"));

        let misaligned = ConstantPool::from(vec![Constant::JumpOffset(4), Constant::JumpOffset(2)]);
        let array = BytecodeArray::new(bytes, misaligned, HandlerTable::new(), 0, 1);
        assert_eq!(diagnose(&array), Some("invalid control-flow"));
    }

    #[test]
    fn test_rejects_inverted_handler_range() {
        let array = with_handler(vec![Opcode::LdaZero as u8, Opcode::Return as u8], 1, 0, 1);
        assert_eq!(diagnose(&array), Some("invalid exception handler"));
    }

    #[test]
    fn test_rejects_handler_end_past_length() {
        let array = with_handler(vec![Opcode::LdaZero as u8, Opcode::Return as u8], 0, 3, 1);
        assert_eq!(diagnose(&array), Some("invalid exception handler"));
    }

    #[test]
    fn test_rejects_misaligned_handler_offset() {
        // LdaSmi [5]; Return; handler points into LdaSmi's operand
        let array = with_handler(vec![Opcode::LdaSmi as u8, 5, Opcode::Return as u8], 0, 2, 1);
        assert_eq!(diagnose(&array), Some("invalid exception handler"));
    }

    #[test]
    fn test_accepts_empty_handler_range() {
        let array = with_handler(vec![Opcode::LdaZero as u8, Opcode::Return as u8], 1, 1, 1);
        assert_eq!(diagnose(&array), None);
    }

    #[test]
    fn test_rejects_undecodable_stream() {
        let array = array(vec![Opcode::Return as u8, Opcode::Wide as u8]);
        assert_eq!(diagnose(&array), Some("invalid bytecode"));
    }

    #[test]
    fn test_rejects_instructions_without_handler() {
        let prefixed = array(vec![Opcode::Wide as u8, Opcode::Return as u8]);
        assert_eq!(diagnose(&prefixed), Some("invalid bytecode"));

        let illegal = array(vec![Opcode::LdaZero as u8, Opcode::Illegal as u8]);
        assert_eq!(diagnose(&illegal), Some("invalid bytecode"));
    }

    #[test]
    fn test_check_is_idempotent() {
        let good = array(vec![Opcode::Jump as u8, 2, Opcode::Return as u8]);
        let bad = array(vec![Opcode::Jump as u8, 1, Opcode::Return as u8]);
        for array in [good, bad] {
            let snapshot = array.clone();
            let first = Verifier::check(&array, VerificationMode::Light).map_err(|e| e.to_string());
            let second = Verifier::check(&array, VerificationMode::Light).map_err(|e| e.to_string());
            assert_eq!(first, second);
            assert_eq!(array, snapshot);
        }
    }

    #[test]
    fn test_verify_publishes() {
        let array = array(vec![Opcode::Jump as u8, 2, Opcode::Return as u8]);
        assert!(!array.is_published());
        array.verify(VerificationMode::Light);
        assert!(array.is_published());
        array.verify(VerificationMode::Light);
        assert!(array.is_published());
    }

    #[test]
    #[should_panic(expected = "invalid control-flow")]
    fn test_verify_panics_on_failure() {
        array(vec![Opcode::Jump as u8, 1, Opcode::Return as u8]).verify(VerificationMode::Light);
    }

    proptest! {
        #[test]
        fn test_check_never_panics(
            bytes in proptest::collection::vec(any::<u8>(), 0..64),
            pool in proptest::collection::vec(any::<i32>(), 0..4),
        ) {
            let pool = ConstantPool::from(pool.into_iter().map(Constant::JumpOffset).collect::<Vec<_>>());
            let array = BytecodeArray::new(bytes, pool, HandlerTable::new(), 0, 1);
            let _ = Verifier::check(&array, VerificationMode::Full);
        }

        #[test]
        fn test_accepted_targets_are_instruction_starts(
            bytes in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let array = BytecodeArray::new(bytes, ConstantPool::new(), HandlerTable::new(), 0, 1);
            if Verifier::check(&array, VerificationMode::Light).is_ok() {
                let instructions: Vec<_> = array.iter().collect::<Result<_, _>>().unwrap();
                let starts: FxHashSet<usize> = instructions.iter().map(|i| i.offset()).collect();
                for instruction in instructions.iter().filter(|i| i.opcode().is_jump()) {
                    let target = instruction.jump_target(array.constant_pool()).unwrap();
                    prop_assert!(starts.contains(&(target as usize)));
                }
            }
        }
    }
}
