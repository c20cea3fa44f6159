//! End-to-end generator tests
//!
//! Each test builds a small analysed syntax tree, compiles it and checks the
//! emitted bytecode. Every array returned by the compiler has already passed
//! verification.

use tern_vm_bytecode::{
    BytecodeArray, Constant, DecodedInstruction, Opcode, Register, RuntimeFunction, Script,
    VerificationMode, Verifier,
};
use tern_vm_compiler::ast::{
    BinaryOp, Block, CatchClause, CompareOp, Declaration, Expression, FunctionKind,
    FunctionLiteral, HeapScope, LanguageMode, LogicalOp, Statement, StatementKind, SwitchCase,
    UnaryOp, Variable, VariableLocation, VariableMode,
};
use tern_vm_compiler::{Compiler, CompilerConfig};

fn compile(literal: &FunctionLiteral) -> Script {
    Compiler::new().compile(literal, "test.js").unwrap()
}

fn script_with_locals(locals: u32, body: Vec<Statement>) -> FunctionLiteral {
    let mut literal = FunctionLiteral::script(body);
    literal.stack_local_count = locals;
    literal
}

fn decode(array: &BytecodeArray) -> Vec<DecodedInstruction> {
    array.iter().map(|i| i.unwrap()).collect()
}

fn opcodes(array: &BytecodeArray) -> Vec<Opcode> {
    decode(array).iter().map(|i| i.opcode()).collect()
}

fn count(array: &BytecodeArray, opcode: Opcode) -> usize {
    opcodes(array).iter().filter(|op| **op == opcode).count()
}

fn name_operand(array: &BytecodeArray, instruction: &DecodedInstruction, i: usize) -> String {
    let constant = array.constant_pool().get(instruction.constant_index(i).0).unwrap();
    String::from_utf16(constant.as_string().unwrap()).unwrap()
}

fn assign(variable: &Variable, value: Expression) -> Statement {
    Statement::expression(Expression::assign(Expression::var(variable), value))
}

#[test]
fn test_add_smi_literal() {
    let literal = FunctionLiteral::script(vec![Statement::return_(Some(Expression::binary(
        BinaryOp::Add,
        Expression::number(1.0),
        Expression::number(2.0),
    )))]);
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(
        opcodes(array),
        vec![Opcode::StackCheck, Opcode::LdaSmi, Opcode::AddSmi, Opcode::Return]
    );
    assert!(array.is_published());
    assert_eq!(array.frame_size(), 0);
}

#[test]
fn test_implicit_return_undefined() {
    let script = compile(&FunctionLiteral::script(vec![]));
    assert_eq!(
        opcodes(&script.functions[0]),
        vec![Opcode::StackCheck, Opcode::LdaUndefined, Opcode::Return]
    );
}

#[test]
fn test_while_loop() {
    let x = Variable::local("x", 0);
    let literal = script_with_locals(
        1,
        vec![
            Statement::declare(x.clone(), Some(Expression::number(0.0))),
            Statement::while_(
                1,
                Expression::compare(CompareOp::Lt, Expression::var(&x), Expression::number(10.0)),
                Statement::block(vec![assign(
                    &x,
                    Expression::binary(BinaryOp::Add, Expression::var(&x), Expression::number(1.0)),
                )]),
            ),
            Statement::return_(Some(Expression::var(&x))),
        ],
    );
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(
        opcodes(array),
        vec![
            Opcode::StackCheck,
            Opcode::LdaZero,
            Opcode::Star,
            Opcode::LdaSmi,
            Opcode::TestLessThan,
            Opcode::JumpIfFalse,
            Opcode::Ldar,
            Opcode::AddSmi,
            Opcode::Star,
            Opcode::JumpLoop,
            Opcode::Ldar,
            Opcode::Return,
        ]
    );

    let decoded = decode(array);
    let pool = array.constant_pool();
    // Compare uses x's register directly
    assert_eq!(decoded[4].register_operand(0), Register(0));
    // Back-edge lands on the condition, the exit right after the back-edge
    assert_eq!(decoded[9].jump_target(pool).unwrap(), decoded[3].offset() as i64);
    assert_eq!(decoded[5].jump_target(pool).unwrap(), decoded[10].offset() as i64);
    assert_eq!(array.frame_size(), 1);
}

#[test]
fn test_continues_share_single_back_edge() {
    let i = Variable::local("i", 0);
    let body = Statement::block(vec![
        Statement::if_(
            Expression::compare(CompareOp::StrictEq, Expression::var(&i), Expression::number(1.0)),
            Statement::continue_(1),
            None,
        ),
        Statement::if_(
            Expression::compare(CompareOp::StrictEq, Expression::var(&i), Expression::number(2.0)),
            Statement::continue_(1),
            None,
        ),
        Statement::if_(
            Expression::compare(CompareOp::StrictEq, Expression::var(&i), Expression::number(5.0)),
            Statement::break_(1),
            None,
        ),
    ]);
    let literal = script_with_locals(
        1,
        vec![Statement::for_(
            1,
            Some(Statement::declare(i.clone(), Some(Expression::number(0.0)))),
            Some(Expression::compare(CompareOp::Lt, Expression::var(&i), Expression::number(10.0))),
            Some(Expression::count(
                tern_vm_compiler::ast::CountOp::Increment,
                true,
                Expression::var(&i),
            )),
            body,
        )],
    );
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(count(array, Opcode::JumpLoop), 1);
    // Two continues and one break, all forward
    assert_eq!(count(array, Opcode::Jump), 3);

    let pool = array.constant_pool();
    let decoded = decode(array);
    let back_edge = decoded.iter().find(|i| i.opcode() == Opcode::JumpLoop).unwrap();
    for jump in decoded.iter().filter(|i| i.opcode() == Opcode::Jump) {
        assert!(jump.jump_target(pool).unwrap() > jump.offset() as i64);
        assert!(jump.jump_target(pool).unwrap() <= back_edge.offset() as i64 + back_edge.size() as i64);
    }
}

#[test]
fn test_do_while_with_true_condition() {
    let literal = FunctionLiteral::script(vec![Statement::do_while(
        1,
        Statement::block(vec![Statement::break_(1)]),
        Expression::boolean(true),
    )]);
    let script = compile(&literal);
    assert!(Verifier::check(&script.functions[0], VerificationMode::Full).is_ok());
    // No condition test for a literal `true`
    assert_eq!(count(&script.functions[0], Opcode::JumpIfFalse), 0);
    assert_eq!(count(&script.functions[0], Opcode::JumpIfToBooleanFalse), 0);
}

fn switch_script(values: &[f64]) -> FunctionLiteral {
    let x = Variable::local("x", 0);
    let y = Variable::local("y", 1);
    let mut cases: Vec<SwitchCase> = values
        .iter()
        .enumerate()
        .map(|(i, value)| SwitchCase {
            test: Some(Expression::number(*value)),
            body: vec![assign(&y, Expression::number(i as f64 + 10.0)), Statement::break_(1)],
        })
        .collect();
    cases.push(SwitchCase {
        test: None,
        body: vec![assign(&y, Expression::number(-1.0))],
    });
    script_with_locals(
        2,
        vec![
            Statement::switch(1, Expression::var(&x), cases),
            Statement::return_(Some(Expression::var(&y))),
        ],
    )
}

#[test]
fn test_dense_switch_uses_jump_table() {
    let script = compile(&switch_script(&[0.0, 1.0, 2.0, 3.0]));
    let array = &script.functions[0];
    let pool = array.constant_pool();

    assert_eq!(count(array, Opcode::SwitchOnSmiNoFeedback), 1);
    assert_eq!(count(array, Opcode::TestEqualStrict), 0);

    let decoded = decode(array);
    let switch = decoded
        .iter()
        .find(|i| i.opcode() == Opcode::SwitchOnSmiNoFeedback)
        .unwrap();
    let targets = switch.switch_targets(pool).unwrap();
    assert_eq!(targets.len(), 4);
    for (i, (value, target)) in targets.iter().enumerate() {
        assert_eq!(*value, i as i64);
        // Each case body starts by loading its Smi
        let body = decoded.iter().find(|d| d.offset() as i64 == *target).unwrap();
        assert_eq!(body.opcode(), Opcode::LdaSmi);
        assert_eq!(body.signed_operand(0), i as i32 + 10);
    }
}

#[test]
fn test_sparse_switch_uses_compare_chain() {
    let script = compile(&switch_script(&[0.0, 100.0, 5000.0, 7.0]));
    let array = &script.functions[0];

    assert_eq!(count(array, Opcode::SwitchOnSmiNoFeedback), 0);
    assert_eq!(count(array, Opcode::TestEqualStrict), 4);
    assert_eq!(count(array, Opcode::JumpIfTrue), 4);
    // Tag lives in the first temporary
    assert_eq!(array.frame_size(), 3);
}

#[test]
fn test_small_switch_below_threshold() {
    let config = CompilerConfig {
        jump_table_min_cases: 3,
        ..CompilerConfig::default()
    };
    let compiler = Compiler::with_config(config);
    let dense = compiler.compile(&switch_script(&[4.0, 5.0, 6.0]), "t.js").unwrap();
    let small = compiler.compile(&switch_script(&[4.0, 5.0]), "t.js").unwrap();
    assert_eq!(count(&dense.functions[0], Opcode::SwitchOnSmiNoFeedback), 1);
    assert_eq!(count(&small.functions[0], Opcode::SwitchOnSmiNoFeedback), 0);
}

#[test]
fn test_try_catch_handler_entry() {
    let e = Variable::local("e", 0);
    let literal = script_with_locals(
        1,
        vec![Statement::new(StatementKind::TryCatch {
            block: Block::new(vec![Statement::throw(Expression::number(1.0))]),
            handler: CatchClause {
                variable: Some(e.clone()),
                scope: None,
                body: Block::new(vec![Statement::return_(Some(Expression::var(&e)))]),
            },
        })],
    );
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(
        opcodes(array),
        vec![
            Opcode::StackCheck,
            Opcode::Mov,
            Opcode::LdaSmi,
            Opcode::Throw,
            Opcode::Star,
            Opcode::Return,
            Opcode::LdaUndefined,
            Opcode::Return,
        ]
    );

    let decoded = decode(array);
    let range = array.handler_table().get(0).unwrap();
    assert_eq!(array.handler_table().len(), 1);
    assert_eq!(range.start as usize, decoded[2].offset());
    assert_eq!(range.end as usize, decoded[4].offset());
    assert_eq!(range.handler_offset as usize, decoded[4].offset());
    // Context saved in the first temporary
    assert_eq!(range.data, 1);
    assert_eq!(decoded[1].register_operand(1), Register(1));
}

#[test]
fn test_catch_variable_in_context() {
    let e = Variable::context("e", VariableMode::Var, 0, 0);
    let literal = FunctionLiteral::script(vec![Statement::new(StatementKind::TryCatch {
        block: Block::new(vec![Statement::throw(Expression::number(1.0))]),
        handler: CatchClause {
            variable: Some(e.clone()),
            scope: Some(HeapScope::new(["e"])),
            body: Block::new(vec![Statement::expression(Expression::var(&e))]),
        },
    })]);
    let script = compile(&literal);
    let array = &script.functions[0];

    let ops = opcodes(array);
    let catch = ops.iter().position(|op| *op == Opcode::CreateCatchContext).unwrap();
    assert_eq!(
        &ops[catch..],
        &[
            Opcode::CreateCatchContext,
            Opcode::PushContext,
            Opcode::LdaCurrentContextSlot,
            Opcode::PopContext,
            Opcode::LdaUndefined,
            Opcode::Return,
        ]
    );
    let constants: Vec<_> = array.constant_pool().iter().collect();
    assert!(constants.iter().any(|c| matches!(c, Constant::Scope(info) if info.names == ["e"])));
}

#[test]
fn test_function_and_block_contexts() {
    let a = Variable::context("a", VariableMode::Var, 0, 0);
    let b = Variable::context("b", VariableMode::Let, 0, 0);
    let a_from_block = Variable::context("a", VariableMode::Var, 1, 0);

    let mut block = Block::new(vec![
        Statement::declare(b.clone(), Some(Expression::number(1.0))),
        Statement::return_(Some(Expression::var(&a_from_block))),
    ]);
    block.scope = Some(HeapScope::new(["b"]));
    block.declarations = vec![Declaration::variable(b.clone())];

    let mut literal = FunctionLiteral::new("f", FunctionKind::Normal);
    literal.parameters = vec![a];
    literal.scope = Some(HeapScope::new(["a"]));
    literal.body = vec![Statement::new(StatementKind::Block(block))];

    let script = compile(&literal);
    let array = &script.functions[0];
    assert_eq!(
        opcodes(array),
        vec![
            Opcode::StackCheck,
            Opcode::CreateFunctionContext,
            Opcode::PushContext,
            Opcode::Ldar,
            Opcode::StaCurrentContextSlot,
            Opcode::CreateBlockContext,
            Opcode::PushContext,
            Opcode::LdaTheHole,
            Opcode::StaCurrentContextSlot,
            Opcode::LdaSmi,
            Opcode::StaCurrentContextSlot,
            Opcode::LdaContextSlot,
            Opcode::Return,
        ]
    );

    let decoded = decode(array);
    assert_eq!(decoded[2].register_operand(0), Register(0));
    assert_eq!(decoded[3].register_operand(0), Register::from_parameter_index(1, 2));
    assert_eq!(decoded[6].register_operand(0), Register(1));
    // Outer context is read through its save register
    assert_eq!(decoded[11].register_operand(0), Register(1));
    assert_eq!(array.frame_size(), 2);
}

#[test]
fn test_break_out_of_block_context_pops_it() {
    let v = Variable::context("v", VariableMode::Let, 0, 0);
    let mut block = Block::new(vec![
        Statement::declare(v.clone(), Some(Expression::number(1.0))),
        Statement::break_(1),
    ]);
    block.scope = Some(HeapScope::new(["v"]));
    let literal = FunctionLiteral::script(vec![Statement::while_(
        1,
        Expression::boolean(true),
        Statement::new(StatementKind::Block(block)),
    )]);
    let script = compile(&literal);
    let ops = opcodes(&script.functions[0]);
    let jump = ops.iter().position(|op| *op == Opcode::Jump).unwrap();
    assert_eq!(ops[jump - 1], Opcode::PopContext);
}

#[test]
fn test_let_load_checks_hole() {
    let x = Variable::local("x", 0).with_mode(VariableMode::Let);
    let mut literal = script_with_locals(1, vec![Statement::return_(Some(Expression::var(&x)))]);
    literal.declarations = vec![Declaration::variable(x.clone())];
    let script = compile(&literal);
    // The reload of r0 right after its store is elided
    assert_eq!(
        opcodes(&script.functions[0]),
        vec![
            Opcode::StackCheck,
            Opcode::LdaTheHole,
            Opcode::Star,
            Opcode::ThrowReferenceErrorIfHole,
            Opcode::Return,
        ]
    );
}

#[test]
fn test_const_assignment_throws() {
    let c = Variable::local("c", 0).with_mode(VariableMode::Const);
    let mut literal = script_with_locals(
        1,
        vec![
            Statement::declare(c.clone(), Some(Expression::number(1.0))),
            assign(&c, Expression::number(2.0)),
        ],
    );
    literal.declarations = vec![Declaration::variable(c.clone())];
    let script = compile(&literal);
    let array = &script.functions[0];

    let decoded = decode(array);
    let stores_to_c = decoded
        .iter()
        .filter(|i| i.opcode() == Opcode::Star && i.register_operand(0) == Register(0))
        .count();
    // Hole initialization and the declaration; never the assignment
    assert_eq!(stores_to_c, 2);
    let call = decoded.iter().find(|i| i.opcode() == Opcode::CallRuntime).unwrap();
    assert_eq!(call.runtime_function(0), Some(RuntimeFunction::ThrowConstAssignError));
    assert_eq!(call.register_list_operand(1).count(), 1);
}

#[test]
fn test_global_declarations_are_batched() {
    let mut g = FunctionLiteral::new("g", FunctionKind::Normal);
    g.body = vec![Statement::return_(Some(Expression::number(7.0)))];

    let mut literal = FunctionLiteral::script(vec![]);
    literal.declarations = vec![
        Declaration::variable(Variable::global("a")),
        Declaration::variable(Variable::global("b")),
        Declaration::function(Variable::global("g"), g),
    ];
    let script = compile(&literal);
    assert_eq!(script.functions.len(), 2);

    let array = &script.functions[0];
    assert_eq!(count(array, Opcode::CallRuntime), 1);
    let call = decode(array)
        .into_iter()
        .find(|i| i.opcode() == Opcode::CallRuntime)
        .unwrap();
    assert_eq!(call.runtime_function(0), Some(RuntimeFunction::DeclareGlobals));
    assert_eq!(call.register_list_operand(1).count(), 2);

    let batch = array
        .constant_pool()
        .iter()
        .find_map(|c| match c {
            Constant::GlobalDeclarations(batch) => Some(batch.clone()),
            _ => None,
        })
        .unwrap();
    let names: Vec<_> = batch.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "g"]);
}

#[test]
fn test_nested_function_literal() {
    let mut inner = FunctionLiteral::new("inner", FunctionKind::Arrow);
    inner.parameters = vec![Variable::parameter("p", 0)];
    inner.body = vec![Statement::return_(Some(Expression::var(&Variable::parameter("p", 0))))];

    let literal = FunctionLiteral::script(vec![Statement::return_(Some(Expression::function(
        inner,
    )))]);
    let script = compile(&literal);
    assert_eq!(script.functions.len(), 2);
    assert!(script.functions.iter().all(BytecodeArray::is_published));

    let outer = &script.functions[0];
    let closure = decode(outer)
        .into_iter()
        .find(|i| i.opcode() == Opcode::CreateClosure)
        .unwrap();
    // Arrow flag
    assert_eq!(closure.unsigned_operand(2), 1);
    match outer.constant_pool().get(closure.unsigned_operand(0)) {
        Some(Constant::SharedFunction(info)) => {
            assert_eq!(info.literal_id, 1);
            assert_eq!(info.formal_parameter_count, 1);
        }
        other => panic!("expected shared function, got {:?}", other),
    }
    assert_eq!(script.functions[1].parameter_count(), 2);
}

#[test]
fn test_parameter_operands_are_used_in_place() {
    let a = Variable::parameter("a", 0);
    let b = Variable::parameter("b", 1);
    let mut literal = FunctionLiteral::new("add", FunctionKind::Normal);
    literal.parameters = vec![a.clone(), b.clone()];
    literal.body = vec![Statement::return_(Some(Expression::binary(
        BinaryOp::Mul,
        Expression::var(&a),
        Expression::var(&b),
    )))];
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(
        opcodes(array),
        vec![Opcode::StackCheck, Opcode::Ldar, Opcode::Mul, Opcode::Return]
    );
    let decoded = decode(array);
    assert_eq!(decoded[1].register_operand(0), Register::from_parameter_index(2, 3));
    assert_eq!(decoded[2].register_operand(0), Register::from_parameter_index(1, 3));
    assert_eq!(array.frame_size(), 0);
}

#[test]
fn test_operand_spilled_when_right_side_assigns() {
    let x = Variable::local("x", 0);
    // x + (x = 5)
    let literal = script_with_locals(
        1,
        vec![Statement::return_(Some(Expression::binary(
            BinaryOp::Sub,
            Expression::var(&x),
            Expression::assign(Expression::var(&x), Expression::number(5.0)),
        )))],
    );
    let script = compile(&literal);
    let array = &script.functions[0];
    let sub = decode(array).into_iter().find(|i| i.opcode() == Opcode::Sub).unwrap();
    assert_eq!(sub.register_operand(0), Register(1));
    assert_eq!(array.frame_size(), 2);
}

#[test]
fn test_far_forward_jump_uses_constant_pool() {
    let x = Variable::local("x", 0);
    let body = (0..60).map(|i| assign(&x, Expression::number(i as f64 + 1.0))).collect();
    let literal = script_with_locals(
        1,
        vec![Statement::if_(Expression::var(&x), Statement::block(body), None)],
    );
    let script = compile(&literal);
    let array = &script.functions[0];

    let decoded = decode(array);
    let jump = decoded
        .iter()
        .find(|i| i.opcode() == Opcode::JumpIfToBooleanFalseConstant)
        .unwrap();
    let pool = array.constant_pool();
    assert!(matches!(pool.get(jump.unsigned_operand(0)), Some(Constant::JumpOffset(d)) if *d > 127));
    let target = jump.jump_target(pool).unwrap();
    assert_eq!(decoded.last().unwrap().opcode(), Opcode::Return);
    assert_eq!(
        decoded.iter().find(|i| i.offset() as i64 == target).unwrap().opcode(),
        Opcode::LdaUndefined
    );
}

#[test]
fn test_dead_code_after_return_is_dropped() {
    let x = Variable::local("x", 0);
    let literal = script_with_locals(
        1,
        vec![
            Statement::return_(Some(Expression::number(1.0))),
            assign(&x, Expression::number(2.0)),
            Statement::throw(Expression::var(&x)),
        ],
    );
    let script = compile(&literal);
    assert_eq!(
        opcodes(&script.functions[0]),
        vec![Opcode::StackCheck, Opcode::LdaSmi, Opcode::Return]
    );
}

#[test]
fn test_logical_and_conditional() {
    let x = Variable::local("x", 0);
    let y = Variable::local("y", 1);
    let literal = script_with_locals(
        2,
        vec![
            Statement::expression(Expression::logical(
                LogicalOp::And,
                Expression::var(&x),
                Expression::var(&y),
            )),
            Statement::expression(Expression::logical(
                LogicalOp::Nullish,
                Expression::var(&x),
                Expression::number(3.0),
            )),
            Statement::return_(Some(Expression::Conditional {
                condition: Box::new(Expression::unary(UnaryOp::Not, Expression::var(&x))),
                then: Box::new(Expression::var(&y)),
                otherwise: Box::new(Expression::undefined()),
            })),
        ],
    );
    let script = compile(&literal);
    let array = &script.functions[0];
    assert_eq!(count(array, Opcode::JumpIfToBooleanFalse), 1);
    assert_eq!(count(array, Opcode::JumpIfNotUndefinedOrNull), 1);
    assert_eq!(count(array, Opcode::ToBooleanLogicalNot), 1);
    // `!x` is known boolean
    assert_eq!(count(array, Opcode::JumpIfFalse), 1);
    assert!(Verifier::check(array, VerificationMode::Full).is_ok());
}

#[test]
fn test_property_call_passes_receiver() {
    let o = Variable::local("o", 0);
    let literal = script_with_locals(
        1,
        vec![Statement::return_(Some(Expression::call(
            Expression::named_property(Expression::var(&o), "m"),
            vec![Expression::number(1.0), Expression::number(2.0)],
        )))],
    );
    let script = compile(&literal);
    let array = &script.functions[0];

    let call = decode(array)
        .into_iter()
        .find(|i| i.opcode() == Opcode::CallProperty)
        .unwrap();
    let args = call.register_list_operand(1);
    assert_eq!(args.count(), 3);
    assert_eq!(args.first(), Register(2));
    assert_eq!(call.register_operand(0), Register(1));
    assert_eq!(array.frame_size(), 5);
}

#[test]
fn test_source_positions() {
    let literal = FunctionLiteral::script(vec![
        Statement::expression(Expression::number(1.0)).at(10),
        Statement::return_(Some(Expression::number(2.0))).at(20),
    ]);
    let script = compile(&literal);
    let array = &script.functions[0];
    let decoded = decode(array);
    let positions = array.source_positions();

    assert_eq!(positions.position_for(decoded[1].offset() as u32), Some(10));
    assert_eq!(positions.position_for(decoded[2].offset() as u32), Some(20));
    assert!(positions.at(decoded[1].offset() as u32).unwrap().is_statement);
}

#[test]
fn test_function_nesting_limit() {
    let mut literal = FunctionLiteral::new("f4", FunctionKind::Normal);
    for depth in (0..4).rev() {
        let mut outer = FunctionLiteral::new(format!("f{}", depth), FunctionKind::Normal);
        outer.body = vec![Statement::return_(Some(Expression::function(literal)))];
        literal = outer;
    }
    let config = CompilerConfig {
        max_function_nesting: 3,
        ..CompilerConfig::default()
    };
    let err = Compiler::with_config(config).compile(&literal, "deep.js").unwrap_err();
    assert!(err.is_stack_overflow());
    assert!(err.to_string().contains("f4"));

    // Same tree within the default limit
    assert_eq!(compile(&literal).functions.len(), 5);
}

#[test]
fn test_expression_depth_limit() {
    let x = Variable::local("x", 0);
    let mut expression = Expression::var(&x);
    for _ in 0..20 {
        expression = Expression::binary(BinaryOp::Mul, Expression::var(&x), expression);
    }
    // Inside a loop and a switch so abandoned control scopes are exercised
    let literal = script_with_locals(
        1,
        vec![Statement::while_(
            1,
            Expression::boolean(true),
            Statement::switch(
                2,
                Expression::var(&x),
                vec![SwitchCase {
                    test: None,
                    body: vec![Statement::break_(1), Statement::return_(Some(expression))],
                }],
            ),
        )],
    );
    let config = CompilerConfig {
        max_expression_depth: 8,
        ..CompilerConfig::default()
    };
    let err = Compiler::with_config(config).compile(&literal, "deep.js").unwrap_err();
    assert!(err.is_stack_overflow());
}

#[test]
fn test_array_and_object_literals() {
    let literal = FunctionLiteral::script(vec![
        Statement::expression(Expression::Array(vec![
            Expression::number(1.0),
            Expression::string("two"),
        ])),
        Statement::return_(Some(Expression::Object(vec![(
            "k".to_string(),
            Expression::number(0.5),
        )]))),
    ]);
    let script = compile(&literal);
    let array = &script.functions[0];
    assert_eq!(count(array, Opcode::CreateArrayLiteral), 1);
    assert_eq!(count(array, Opcode::SetKeyedProperty), 2);
    assert_eq!(count(array, Opcode::CreateObjectLiteral), 1);
    assert_eq!(count(array, Opcode::SetNamedProperty), 1);
    assert!(array.constant_pool().iter().any(|c| c.as_number() == Some(0.5)));
}

#[test]
#[should_panic(expected = "try/finally")]
fn test_try_finally_is_unsupported() {
    let literal = FunctionLiteral::script(vec![Statement::new(StatementKind::TryFinally {
        block: Block::default(),
        finalizer: Block::default(),
    })]);
    let _ = compile(&literal);
}

#[test]
fn test_global_and_unresolved_variables() {
    let g = Variable::global("g");
    let u = Variable::unresolved("u");
    let literal = FunctionLiteral::script(vec![
        assign(&g, Expression::var(&u)),
        assign(&u, Expression::number(1.0)),
        Statement::return_(Some(Expression::unary(UnaryOp::TypeOf, Expression::var(&g)))),
    ]);
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(
        opcodes(array),
        vec![
            Opcode::StackCheck,
            Opcode::LdaGlobal,
            Opcode::StaGlobal,
            Opcode::LdaSmi,
            Opcode::StaGlobal,
            Opcode::LdaGlobalInsideTypeof,
            Opcode::TypeOf,
            Opcode::Return,
        ]
    );

    let decoded = decode(array);
    assert_eq!(name_operand(array, &decoded[1], 0), "u");
    assert_eq!(name_operand(array, &decoded[2], 0), "g");
    assert_eq!(name_operand(array, &decoded[4], 0), "u");
    assert_eq!(name_operand(array, &decoded[5], 0), "g");
    // One feedback slot per access, in emission order
    let slots: Vec<_> = [1, 2, 4, 5].iter().map(|&i| decoded[i].raw_operand(1)).collect();
    assert_eq!(slots, vec![0, 1, 2, 3]);
    assert_eq!(array.feedback_slot_count(), 4);
}

#[test]
fn test_lookup_variables() {
    let w = Variable::new("w", VariableMode::Var, VariableLocation::Lookup);
    let literal = FunctionLiteral::script(vec![
        assign(&w, Expression::var(&w)),
        Statement::return_(Some(Expression::unary(UnaryOp::TypeOf, Expression::var(&w)))),
    ]);
    let script = compile(&literal);
    let array = &script.functions[0];

    assert_eq!(
        opcodes(array),
        vec![
            Opcode::StackCheck,
            Opcode::LdaLookupSlot,
            Opcode::StaLookupSlot,
            Opcode::LdaLookupSlotInsideTypeof,
            Opcode::TypeOf,
            Opcode::Return,
        ]
    );
    let decoded = decode(array);
    for instruction in &decoded[1..=3] {
        assert_eq!(name_operand(array, instruction, 0), "w");
    }
    // Sloppy store
    assert_eq!(decoded[2].raw_operand(1), 0);
    assert_eq!(array.feedback_slot_count(), 0);
}

#[test]
fn test_strict_lookup_store() {
    let w = Variable::new("w", VariableMode::Var, VariableLocation::Lookup);
    let mut literal = FunctionLiteral::script(vec![assign(&w, Expression::number(2.0))]);
    literal.language_mode = LanguageMode::Strict;
    let script = compile(&literal);
    let array = &script.functions[0];

    let decoded = decode(array);
    let store = decoded.iter().find(|i| i.opcode() == Opcode::StaLookupSlot).unwrap();
    assert_eq!(name_operand(array, store, 0), "w");
    assert_eq!(store.raw_operand(1), 1);
}

#[test]
fn test_context_slot_stores() {
    let a = Variable::context("a", VariableMode::Var, 0, 0);
    let b = Variable::context("b", VariableMode::Var, 0, 0);
    let a_from_block = Variable::context("a", VariableMode::Var, 1, 0);
    let far = Variable::context("far", VariableMode::Var, 5, 2);

    let mut block = Block::new(vec![
        assign(&b, Expression::number(1.0)),
        assign(&a_from_block, Expression::number(2.0)),
        assign(&far, Expression::number(3.0)),
    ]);
    block.scope = Some(HeapScope::new(["b"]));

    let mut literal = FunctionLiteral::new("f", FunctionKind::Normal);
    literal.scope = Some(HeapScope::new(["a"]));
    literal.body = vec![
        Statement::new(StatementKind::Block(block)),
        assign(&a, Expression::number(4.0)),
    ];

    let script = compile(&literal);
    let array = &script.functions[0];
    assert_eq!(
        opcodes(array),
        vec![
            Opcode::StackCheck,
            Opcode::CreateFunctionContext,
            Opcode::PushContext,
            Opcode::CreateBlockContext,
            Opcode::PushContext,
            Opcode::LdaSmi,
            Opcode::StaCurrentContextSlot,
            Opcode::LdaSmi,
            Opcode::StaContextSlot,
            Opcode::LdaSmi,
            Opcode::StaContextSlot,
            Opcode::PopContext,
            Opcode::LdaSmi,
            Opcode::StaCurrentContextSlot,
            Opcode::LdaUndefined,
            Opcode::Return,
        ]
    );

    let decoded = decode(array);
    assert_eq!(decoded[6].raw_operand(0), 0);
    // Function context, saved in r1 while the block context is current
    assert_eq!(decoded[8].register_operand(0), Register(1));
    assert_eq!(decoded[8].raw_operand(1), 0);
    assert_eq!(decoded[8].raw_operand(2), 0);
    // Two hops resolve through r0, the rest is walked at run time
    assert_eq!(decoded[10].register_operand(0), Register(0));
    assert_eq!(decoded[10].raw_operand(1), 2);
    assert_eq!(decoded[10].raw_operand(2), 3);
    assert_eq!(decoded[13].raw_operand(0), 0);
    assert_eq!(array.frame_size(), 2);
}

#[test]
fn test_context_store_from_script_walks_chain() {
    let outer = Variable::context("outer", VariableMode::Var, 2, 3);
    let literal = FunctionLiteral::script(vec![assign(&outer, Expression::number(1.0))]);
    let script = compile(&literal);
    let array = &script.functions[0];

    let decoded = decode(array);
    let store = decoded.iter().find(|i| i.opcode() == Opcode::StaContextSlot).unwrap();
    assert_eq!(store.register_operand(0), Register::current_context());
    assert_eq!(store.raw_operand(1), 3);
    assert_eq!(store.raw_operand(2), 2);
}
