//! Syntax tree to bytecode generator
//!
//! Single pass, accumulator centric: every expression leaves its value in
//! the accumulator, and values are spilled to temporaries only when a later
//! sub-expression would overwrite the accumulator before they are consumed.

use tern_vm_bytecode::{
    BytecodeArray, CatchPrediction, Constant, GlobalDeclaration, GlobalDeclarationKind, Opcode,
    Register, RegisterList, RuntimeFunction, ScopeInfo, ScopeKind, SharedFunctionInfo,
};

use crate::aliases::OperandAliasTracker;
use crate::ast::{
    BinaryOp, Block, CatchClause, CompareOp, CountOp, Declaration, DeclarationKind, Expression,
    FunctionKind, FunctionLiteral, HeapScope, LanguageMode, Literal, LogicalOp, PropertyKey,
    Statement, StatementId, StatementKind, SwitchCase, UnaryOp, Variable, VariableLocation,
    VariableMode,
};
use crate::builder::BytecodeArrayBuilder;
use crate::config::CompilerConfig;
use crate::context::CompilationContext;
use crate::control_flow::{LoopBuilder, SwitchBuilder};
use crate::error::{CompileError, CompileResult};
use crate::labels::BytecodeLabel;
use crate::register_allocator::RegisterAllocator;
use crate::scope::{context_register_count, ContextScopeStack, ControlScope, ControlScopeStack};

/// Compile `literal` and every function nested in it into `ctx`.
///
/// Returns the literal id the compiled array is installed under.
pub fn compile_function(
    ctx: &mut CompilationContext,
    config: &CompilerConfig,
    literal: &FunctionLiteral,
    nesting_depth: u32,
) -> CompileResult<u32> {
    let literal_id = ctx.reserve_literal();
    let array = BytecodeGenerator::new(ctx, config, literal, nesting_depth).generate()?;
    ctx.install(literal_id, array);
    Ok(literal_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreMode {
    /// Declaration initializer: no hole check, const allowed
    Initialization,
    /// Ordinary assignment
    Assignment,
}

/// Generates the bytecode array of one function
pub struct BytecodeGenerator<'a> {
    ctx: &'a mut CompilationContext,
    config: &'a CompilerConfig,
    literal: &'a FunctionLiteral,
    nesting_depth: u32,
    parameter_count: u32,
    builder: BytecodeArrayBuilder,
    registers: RegisterAllocator<OperandAliasTracker>,
    control_scopes: ControlScopeStack,
    contexts: ContextScopeStack,
    loop_depth: u32,
    expression_depth: u32,
}

impl<'a> BytecodeGenerator<'a> {
    /// Generator for `literal`, nested `nesting_depth` functions deep
    pub fn new(
        ctx: &'a mut CompilationContext,
        config: &'a CompilerConfig,
        literal: &'a FunctionLiteral,
        nesting_depth: u32,
    ) -> Self {
        let parameter_count = literal.parameter_count();
        let context_registers = context_register_count(literal);
        let first_temporary = literal.stack_local_count + context_registers;
        Self {
            ctx,
            config,
            literal,
            nesting_depth,
            parameter_count,
            builder: BytecodeArrayBuilder::new(parameter_count, config.source_positions),
            registers: RegisterAllocator::with_observer(
                first_temporary,
                OperandAliasTracker::default(),
            ),
            control_scopes: ControlScopeStack::new(),
            contexts: ContextScopeStack::new(literal.stack_local_count),
            loop_depth: 0,
            expression_depth: 0,
        }
    }

    /// Generate and verify the array
    pub fn generate(mut self) -> CompileResult<BytecodeArray> {
        if let Err(err) = self.generate_body() {
            self.control_scopes.abandon_all();
            return Err(err);
        }
        debug_assert!(self.control_scopes.is_empty());

        let frame_size = self.registers.maximum_register_count();
        let array = self.builder.to_bytecode_array(frame_size);
        array.verify(self.config.verification);
        tracing::debug!(
            target: "tern::compiler",
            function = self.literal.debug_name(),
            length = array.len(),
            frame_size,
            constants = array.constant_pool().len(),
            handlers = array.handler_table().len(),
            "function compiled"
        );
        Ok(array)
    }

    fn generate_body(&mut self) -> CompileResult<()> {
        let literal = self.literal;
        self.builder.set_statement_position(literal.position);
        self.builder.stack_check();
        if let Some(scope) = &literal.scope {
            self.build_function_context(scope);
        }
        self.visit_declarations(&literal.declarations)?;
        self.compile_statements(&literal.body)?;
        if self.builder.is_reachable() {
            self.builder.load_undefined();
            self.builder.return_();
        }
        Ok(())
    }

    // ==================== Helpers ====================

    fn new_label(&mut self) -> BytecodeLabel {
        self.builder.new_label(self.ctx)
    }

    fn name_constant(&mut self, name: &str) -> u32 {
        self.builder.constant_pool().add_string(name)
    }

    fn parameter_register(&self, index: u32) -> Register {
        Register::from_parameter_index(index + 1, self.parameter_count)
    }

    fn is_strict(&self) -> bool {
        self.literal.language_mode == LanguageMode::Strict
    }

    fn scope_constant(&mut self, kind: ScopeKind, scope: &HeapScope) -> u32 {
        self.builder.constant_pool().add(Constant::Scope(ScopeInfo {
            kind,
            slot_count: scope.slot_count(),
            names: scope.slot_names.clone(),
        }))
    }

    /// Evaluate `expression` into a fresh temporary
    fn compile_to_register(&mut self, expression: &Expression) -> CompileResult<Register> {
        self.compile_expression(expression)?;
        let register = self.registers.new_register();
        self.builder.store_accumulator_in_register(register);
        Ok(register)
    }

    // ==================== Prologue ====================

    fn build_function_context(&mut self, scope: &HeapScope) {
        let index = self.scope_constant(ScopeKind::Function, scope);
        self.builder.create_function_context(index, scope.slot_count());
        self.contexts.enter_function_context(&mut self.builder);

        for (i, parameter) in self.literal.parameters.iter().enumerate() {
            if let VariableLocation::Context { depth: 0, slot } = parameter.location {
                let register = self.parameter_register(i as u32);
                self.builder.load_accumulator_with_register(register);
                self.builder
                    .store_context_slot(Register::current_context(), slot, 0);
            }
        }
    }

    fn visit_declarations(&mut self, declarations: &[Declaration]) -> CompileResult<()> {
        let mut globals = Vec::new();
        for declaration in declarations {
            let variable = &declaration.variable;
            match (&declaration.kind, variable.location) {
                (DeclarationKind::Variable, VariableLocation::Global) => {
                    globals.push(GlobalDeclaration {
                        name: variable.name.clone(),
                        kind: GlobalDeclarationKind::Variable,
                    });
                }
                (DeclarationKind::Function(literal), VariableLocation::Global) => {
                    let literal_id = self.compile_nested(literal)?;
                    globals.push(GlobalDeclaration {
                        name: variable.name.clone(),
                        kind: GlobalDeclarationKind::Function { literal_id },
                    });
                }
                (_, VariableLocation::Unresolved | VariableLocation::Lookup) => {
                    unimplemented!("declaration of dynamically scoped '{}'", variable.name)
                }
                (DeclarationKind::Variable, _) => {
                    if variable.mode.is_lexical() {
                        self.builder.load_the_hole();
                        self.store_variable(variable, StoreMode::Initialization);
                    }
                }
                (DeclarationKind::Function(literal), _) => {
                    self.compile_closure(literal)?;
                    self.store_variable(variable, StoreMode::Initialization);
                }
            }
        }

        if !globals.is_empty() {
            self.build_declare_globals(globals);
        }
        Ok(())
    }

    /// One `DeclareGlobals` call for the whole batch
    fn build_declare_globals(&mut self, globals: Vec<GlobalDeclaration>) {
        let count = globals.len();
        let index = self
            .builder
            .constant_pool()
            .add(Constant::GlobalDeclarations(globals));
        let checkpoint = self.registers.position();
        let args = self.registers.new_register_list(2);
        self.builder.load_constant_pool_entry(index);
        self.builder.store_accumulator_in_register(args.get(0));
        self.builder.load_literal_smi(self.is_strict() as i32);
        self.builder.store_accumulator_in_register(args.get(1));
        self.builder.call_runtime(RuntimeFunction::DeclareGlobals, args);
        self.registers.release(checkpoint);
        tracing::trace!(target: "tern::compiler", count, "batched global declarations");
    }

    // ==================== Nested functions ====================

    fn compile_nested(&mut self, literal: &FunctionLiteral) -> CompileResult<u32> {
        let depth = self.nesting_depth + 1;
        if depth > self.config.max_function_nesting {
            tracing::debug!(
                target: "tern::compiler",
                function = literal.debug_name(),
                depth,
                "function nesting limit reached"
            );
            return Err(CompileError::stack_overflow(literal.debug_name(), depth));
        }
        compile_function(self.ctx, self.config, literal, depth)
    }

    fn compile_closure(&mut self, literal: &FunctionLiteral) -> CompileResult<()> {
        let literal_id = self.compile_nested(literal)?;
        let index = self
            .builder
            .constant_pool()
            .add(Constant::SharedFunction(SharedFunctionInfo {
                name: literal.name.clone(),
                literal_id,
                formal_parameter_count: literal.parameters.len() as u32,
            }));
        let slot = self.builder.new_feedback_slot();
        let flags = (literal.kind == FunctionKind::Arrow) as u8;
        self.builder.create_closure(index, slot, flags);
        Ok(())
    }

    // ==================== Statements ====================

    fn compile_statements(&mut self, statements: &[Statement]) -> CompileResult<()> {
        for statement in statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        if !matches!(statement.kind, StatementKind::Block(_) | StatementKind::Empty) {
            self.builder.set_statement_position(statement.position);
        }

        match &statement.kind {
            StatementKind::Expression(expression) => self.compile_expression(expression),
            StatementKind::VariableDeclaration {
                variable,
                initializer,
            } => self.compile_variable_declaration(variable, initializer.as_ref()),
            StatementKind::Block(block) => self.compile_block(block),
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => self.compile_if_statement(condition, then, otherwise.as_deref()),
            StatementKind::While {
                id,
                condition,
                body,
            } => self.compile_while_statement(*id, condition, body),
            StatementKind::DoWhile {
                id,
                body,
                condition,
            } => self.compile_do_while_statement(*id, body, condition),
            StatementKind::For {
                id,
                init,
                condition,
                update,
                body,
            } => self.compile_for_statement(*id, init.as_deref(), condition.as_ref(), update.as_ref(), body),
            StatementKind::Switch { id, tag, cases } => self.compile_switch_statement(*id, tag, cases),
            StatementKind::Break(target) => {
                self.control_scopes
                    .break_(*target, &mut self.builder, self.ctx, &self.contexts);
                Ok(())
            }
            StatementKind::Continue(target) => {
                self.control_scopes
                    .continue_(*target, &mut self.builder, self.ctx, &self.contexts);
                Ok(())
            }
            StatementKind::Return(value) => {
                match value {
                    Some(value) => self.compile_expression(value)?,
                    None => self.builder.load_undefined(),
                }
                self.builder.return_();
                Ok(())
            }
            StatementKind::Throw(value) => {
                self.compile_expression(value)?;
                self.builder.throw();
                Ok(())
            }
            StatementKind::TryCatch { block, handler } => self.compile_try_catch_statement(block, handler),
            StatementKind::TryFinally { .. } => unimplemented!("try/finally"),
            StatementKind::ForIn { .. } => unimplemented!("for-in"),
            StatementKind::With { .. } => unimplemented!("with statement"),
            StatementKind::Debugger => {
                self.builder.debugger();
                Ok(())
            }
            StatementKind::Empty => Ok(()),
        }
    }

    fn compile_variable_declaration(
        &mut self,
        variable: &Variable,
        initializer: Option<&Expression>,
    ) -> CompileResult<()> {
        match initializer {
            Some(value) => {
                self.compile_expression(value)?;
                self.store_variable(variable, StoreMode::Initialization);
            }
            None if variable.mode.is_lexical() => {
                self.builder.load_undefined();
                self.store_variable(variable, StoreMode::Initialization);
            }
            None => {}
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        match &block.scope {
            Some(scope) => {
                let index = self.scope_constant(ScopeKind::Block, scope);
                self.builder.create_block_context(index);
                self.contexts.enter(&mut self.builder);
                self.visit_declarations(&block.declarations)?;
                self.compile_statements(&block.statements)?;
                self.contexts.exit(&mut self.builder);
            }
            None => {
                self.visit_declarations(&block.declarations)?;
                self.compile_statements(&block.statements)?;
            }
        }
        Ok(())
    }

    fn compile_if_statement(
        &mut self,
        condition: &Expression,
        then: &Statement,
        otherwise: Option<&Statement>,
    ) -> CompileResult<()> {
        let else_label = self.new_label();
        self.compile_jump_if_false(condition, else_label)?;
        self.compile_statement(then)?;
        match otherwise {
            Some(otherwise) => {
                let end = self.new_label();
                self.builder.jump(end);
                self.builder.bind(else_label);
                self.compile_statement(otherwise)?;
                self.builder.bind(end);
            }
            None => self.builder.bind(else_label),
        }
        Ok(())
    }

    /// Bind the loop header and push the loop's control scope. The builder
    /// stays on the control scope stack until [`exit_loop`](Self::exit_loop).
    fn enter_loop(&mut self, id: StatementId) {
        let mut lp = LoopBuilder::new(self.loop_depth);
        lp.loop_header(&mut self.builder, self.ctx);
        self.control_scopes.push(ControlScope::Iteration {
            statement: id,
            builder: lp,
            context_depth: self.contexts.depth(),
        });
    }

    fn compile_loop_condition(&mut self, condition: &Expression) -> CompileResult<()> {
        if is_true_literal(condition) {
            return Ok(());
        }
        self.compile_expression(condition)?;
        self.control_scopes.current_loop().break_if_false(
            &mut self.builder,
            self.ctx,
            !produces_boolean(condition),
        );
        Ok(())
    }

    fn compile_loop_body(&mut self, body: &Statement) -> CompileResult<()> {
        self.loop_depth += 1;
        self.compile_statement(body)?;
        self.loop_depth -= 1;
        Ok(())
    }

    fn set_continue_target(&mut self) {
        self.control_scopes
            .current_loop()
            .set_continue_target(&mut self.builder);
    }

    /// Emit the back-edge, bind the breaks and pop the loop's scope
    fn exit_loop(&mut self) {
        let ControlScope::Iteration { builder: mut lp, .. } = self.control_scopes.pop() else {
            panic!("control scope stack out of sync");
        };
        lp.jump_to_header(&mut self.builder);
        lp.set_break_target(&mut self.builder);
    }

    fn compile_while_statement(
        &mut self,
        id: StatementId,
        condition: &Expression,
        body: &Statement,
    ) -> CompileResult<()> {
        self.enter_loop(id);
        self.compile_loop_condition(condition)?;
        self.compile_loop_body(body)?;
        self.set_continue_target();
        self.exit_loop();
        Ok(())
    }

    fn compile_do_while_statement(
        &mut self,
        id: StatementId,
        body: &Statement,
        condition: &Expression,
    ) -> CompileResult<()> {
        self.enter_loop(id);
        self.compile_loop_body(body)?;
        self.set_continue_target();
        self.compile_loop_condition(condition)?;
        self.exit_loop();
        Ok(())
    }

    fn compile_for_statement(
        &mut self,
        id: StatementId,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        update: Option<&Expression>,
        body: &Statement,
    ) -> CompileResult<()> {
        if let Some(init) = init {
            self.compile_statement(init)?;
        }
        self.enter_loop(id);
        if let Some(condition) = condition {
            self.compile_loop_condition(condition)?;
        }
        self.compile_loop_body(body)?;
        self.set_continue_target();
        if let Some(update) = update {
            self.compile_expression(update)?;
        }
        self.exit_loop();
        Ok(())
    }

    /// Jump table layout when every test is a Smi literal and the values are
    /// dense: `(case_value_base, case index per table entry)`
    fn jump_table_layout(&self, cases: &[SwitchCase]) -> Option<(i32, Vec<Option<usize>>)> {
        let mut values = Vec::new();
        for (index, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                values.push((smi_literal(test)?, index));
            }
        }
        if values.len() < self.config.jump_table_min_cases.max(1) {
            return None;
        }
        let min = values.iter().map(|(v, _)| *v).min()?;
        let max = values.iter().map(|(v, _)| *v).max()?;
        let length = max as i64 - min as i64 + 1;
        if length > 2 * values.len() as i64 {
            return None;
        }
        let mut table = vec![None; length as usize];
        for (value, index) in values {
            let entry = &mut table[(value as i64 - min as i64) as usize];
            // First matching clause wins
            if entry.is_none() {
                *entry = Some(index);
            }
        }
        Some((min, table))
    }

    fn compile_switch_statement(
        &mut self,
        id: StatementId,
        tag: &Expression,
        cases: &[SwitchCase],
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        let sw = SwitchBuilder::new(&mut self.builder, self.ctx, cases.len());
        self.control_scopes.push(ControlScope::Switch {
            statement: id,
            builder: sw,
            context_depth: self.contexts.depth(),
        });

        self.compile_expression(tag)?;
        match self.jump_table_layout(cases) {
            Some((base, table)) => {
                let gap = table.iter().any(Option::is_none).then(|| self.new_label());
                let sw = self.control_scopes.current_switch();
                let targets: Vec<_> = table
                    .iter()
                    .map(|entry| match (entry, gap) {
                        (Some(index), _) => sw.case_label(*index),
                        (None, Some(gap)) => gap,
                        (None, None) => unreachable!("gap entry without gap label"),
                    })
                    .collect();
                self.builder.switch_on_smi(base, &targets);
                if let Some(gap) = gap {
                    self.builder.bind(gap);
                }
            }
            None => {
                let tag_register = self.registers.new_register();
                self.builder.store_accumulator_in_register(tag_register);
                for (index, case) in cases.iter().enumerate() {
                    let Some(test) = &case.test else { continue };
                    self.compile_expression(test)?;
                    let slot = self.builder.new_feedback_slot();
                    self.builder
                        .binary_operation(Opcode::TestEqualStrict, tag_register, slot);
                    self.control_scopes
                        .current_switch()
                        .jump_to_case_if_true(&mut self.builder, index);
                }
            }
        }

        match cases.iter().position(|case| case.test.is_none()) {
            Some(default) => self
                .control_scopes
                .current_switch()
                .jump_to_case(&mut self.builder, default),
            None => self
                .control_scopes
                .current_switch()
                .break_(&mut self.builder, self.ctx),
        }

        for (index, case) in cases.iter().enumerate() {
            self.control_scopes
                .current_switch()
                .set_case_target(&mut self.builder, index);
            self.compile_statements(&case.body)?;
        }

        let ControlScope::Switch { builder: mut sw, .. } = self.control_scopes.pop() else {
            panic!("control scope stack out of sync");
        };
        sw.set_break_target(&mut self.builder);
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_try_catch_statement(
        &mut self,
        block: &Block,
        clause: &CatchClause,
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        let context = self.registers.new_register();
        self.builder
            .move_register(Register::current_context(), context);

        let handler = self.builder.new_handler_entry();
        let done = self.new_label();
        self.builder.mark_try_begin(handler, context);
        self.compile_block(block)?;
        self.builder.mark_try_end(handler);
        self.builder.jump(done);

        // Exception arrives in the accumulator
        self.builder.mark_handler(handler, CatchPrediction::Caught);
        match (&clause.variable, &clause.scope) {
            (Some(_), Some(scope)) => {
                let exception = self.registers.new_register();
                self.builder.store_accumulator_in_register(exception);
                let index = self.scope_constant(ScopeKind::Catch, scope);
                self.builder.create_catch_context(exception, index);
                self.contexts.enter(&mut self.builder);
                self.compile_block(&clause.body)?;
                self.contexts.exit(&mut self.builder);
            }
            (Some(variable), None) => {
                self.store_variable(variable, StoreMode::Initialization);
                self.compile_block(&clause.body)?;
            }
            (None, _) => self.compile_block(&clause.body)?,
        }
        self.builder.bind(done);
        self.registers.release(checkpoint);
        Ok(())
    }

    // ==================== Variables ====================

    fn build_hole_check(&mut self, variable: &Variable) {
        let name = self.name_constant(&variable.name);
        self.builder.throw_reference_error_if_hole(name);
    }

    fn load_variable(&mut self, variable: &Variable, inside_typeof: bool) {
        match variable.location {
            VariableLocation::Local(index) => {
                self.builder
                    .load_accumulator_with_register(Register(index as i32));
            }
            VariableLocation::Parameter(index) => {
                let register = self.parameter_register(index);
                self.builder.load_accumulator_with_register(register);
            }
            VariableLocation::Global | VariableLocation::Unresolved => {
                let name = self.name_constant(&variable.name);
                let slot = self.builder.new_feedback_slot();
                self.builder.load_global(name, slot, inside_typeof);
                return;
            }
            VariableLocation::Context { depth, slot } => {
                let (context, depth) = self.contexts.resolve(depth);
                self.builder.load_context_slot(context, slot, depth);
            }
            VariableLocation::Lookup => {
                let name = self.name_constant(&variable.name);
                self.builder.load_lookup_slot(name, inside_typeof);
                return;
            }
        }
        if variable.mode.is_lexical() {
            self.build_hole_check(variable);
        }
    }

    fn build_const_assign_error(&mut self, variable: &Variable) {
        let checkpoint = self.registers.position();
        let args = self.registers.new_register_list(1);
        let name = self.name_constant(&variable.name);
        self.builder.load_constant_pool_entry(name);
        self.builder.store_accumulator_in_register(args.first());
        self.builder
            .call_runtime(RuntimeFunction::ThrowConstAssignError, args);
        self.registers.release(checkpoint);
    }

    fn store_register(&mut self, register: Register) {
        assert!(
            !self.registers.observer().is_aliased(register),
            "store to {} while it stands in for an operand",
            register
        );
        self.builder.store_accumulator_in_register(register);
    }

    /// Store the accumulator to `variable`
    fn store_variable(&mut self, variable: &Variable, mode: StoreMode) {
        let binding_checked = matches!(
            variable.location,
            VariableLocation::Local(_) | VariableLocation::Parameter(_) | VariableLocation::Context { .. }
        );
        if mode == StoreMode::Assignment && variable.mode.is_lexical() && binding_checked {
            let checkpoint = self.registers.position();
            let value = self.registers.new_register();
            self.builder.store_accumulator_in_register(value);
            self.load_variable(variable, false);
            if variable.mode == VariableMode::Const {
                self.build_const_assign_error(variable);
                self.registers.release(checkpoint);
                return;
            }
            self.builder.load_accumulator_with_register(value);
            self.registers.release(checkpoint);
        }

        match variable.location {
            VariableLocation::Local(index) => self.store_register(Register(index as i32)),
            VariableLocation::Parameter(index) => {
                let register = self.parameter_register(index);
                self.store_register(register);
            }
            VariableLocation::Global | VariableLocation::Unresolved => {
                let name = self.name_constant(&variable.name);
                let slot = self.builder.new_feedback_slot();
                self.builder.store_global(name, slot);
            }
            VariableLocation::Context { depth, slot } => {
                let (context, depth) = self.contexts.resolve(depth);
                self.builder.store_context_slot(context, slot, depth);
            }
            VariableLocation::Lookup => {
                let name = self.name_constant(&variable.name);
                let strict = self.is_strict();
                self.builder.store_lookup_slot(name, strict);
            }
        }
    }

    // ==================== Expressions ====================

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult<()> {
        self.expression_depth += 1;
        if self.expression_depth > self.config.max_expression_depth {
            let depth = self.expression_depth;
            self.expression_depth -= 1;
            return Err(CompileError::stack_overflow(self.literal.debug_name(), depth));
        }
        let result = self.compile_expression_inner(expression);
        self.expression_depth -= 1;
        result
    }

    fn compile_expression_inner(&mut self, expression: &Expression) -> CompileResult<()> {
        match expression {
            Expression::Literal(literal) => self.compile_literal(literal),
            Expression::Variable(variable) => self.load_variable(variable, false),
            Expression::This => {
                let receiver = Register::receiver(self.parameter_count);
                self.builder.load_accumulator_with_register(receiver);
            }
            Expression::NewTarget => {
                self.builder
                    .load_accumulator_with_register(Register::new_target());
            }
            Expression::Assign { op, target, value } => {
                return self.compile_assignment(*op, target, value);
            }
            Expression::Binary { op, left, right } => {
                return self.compile_binary_operation(*op, left, right);
            }
            Expression::Compare { op, left, right } => {
                return self.compile_compare_operation(*op, left, right);
            }
            Expression::Logical { op, left, right } => {
                return self.compile_logical_operation(*op, left, right);
            }
            Expression::Unary { op, operand } => return self.compile_unary_operation(*op, operand),
            Expression::Count { op, prefix, target } => {
                return self.compile_count_operation(*op, *prefix, target);
            }
            Expression::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let else_label = self.new_label();
                let end = self.new_label();
                self.compile_jump_if_false(condition, else_label)?;
                self.compile_expression(then)?;
                self.builder.jump(end);
                self.builder.bind(else_label);
                self.compile_expression(otherwise)?;
                self.builder.bind(end);
            }
            Expression::Property { object, key } => {
                let checkpoint = self.registers.position();
                let object = self.compile_to_register(object)?;
                self.load_property(object, key)?;
                self.registers.release(checkpoint);
            }
            Expression::Call {
                callee,
                arguments,
                position,
            } => return self.compile_call(callee, arguments, *position),
            Expression::New {
                callee,
                arguments,
                position,
            } => return self.compile_new(callee, arguments, *position),
            Expression::CallRuntime {
                function,
                arguments,
            } => {
                if let Some(arity) = function.arity() {
                    assert_eq!(
                        arity as usize,
                        arguments.len(),
                        "%{} takes {} arguments",
                        function.name(),
                        arity
                    );
                }
                let checkpoint = self.registers.position();
                let args = self.registers.new_register_list(arguments.len() as u32);
                self.compile_arguments(arguments, args)?;
                self.builder.call_runtime(*function, args);
                self.registers.release(checkpoint);
            }
            Expression::InvokeIntrinsic {
                intrinsic,
                arguments,
            } => {
                let checkpoint = self.registers.position();
                let args = self.registers.new_register_list(arguments.len() as u32);
                self.compile_arguments(arguments, args)?;
                self.builder.invoke_intrinsic(*intrinsic, args);
                self.registers.release(checkpoint);
            }
            Expression::Object(properties) => return self.compile_object_literal(properties),
            Expression::Array(elements) => return self.compile_array_literal(elements),
            Expression::Function(literal) => return self.compile_closure(literal),
            Expression::Spread(_) => unimplemented!("spread"),
            Expression::Yield(_) => unimplemented!("yield"),
            Expression::Class(_) => unimplemented!("class literal"),
        }
        Ok(())
    }

    fn compile_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Undefined => self.builder.load_undefined(),
            Literal::Null => self.builder.load_null(),
            Literal::Boolean(value) => self.builder.load_boolean(*value),
            Literal::Number(value) => match as_smi(*value) {
                Some(smi) => self.builder.load_literal_smi(smi),
                None => {
                    let index = self.builder.constant_pool().add_number(*value);
                    self.builder.load_constant_pool_entry(index);
                }
            },
            Literal::String(value) => {
                let index = self.name_constant(value);
                self.builder.load_constant_pool_entry(index);
            }
        }
    }

    /// Evaluate `condition` and jump to `label` when it is false
    fn compile_jump_if_false(
        &mut self,
        condition: &Expression,
        label: BytecodeLabel,
    ) -> CompileResult<()> {
        self.compile_expression(condition)?;
        if produces_boolean(condition) {
            self.builder.jump_if_false(label);
        } else {
            self.builder.jump_if_to_boolean_false(label);
        }
        Ok(())
    }

    /// Register holding the left operand of a binary operation. A stack
    /// variable's own register is used when `right` cannot store to it.
    fn operand_register(
        &mut self,
        left: &Expression,
        right: &Expression,
        checkpoint: i32,
    ) -> CompileResult<Register> {
        if let Expression::Variable(variable) = left {
            let register = match variable.location {
                VariableLocation::Local(index) => Some(Register(index as i32)),
                VariableLocation::Parameter(index) => Some(self.parameter_register(index)),
                _ => None,
            };
            if let Some(register) = register
                && !variable.mode.is_lexical()
                && !right.may_assign_to(variable.location)
            {
                self.registers.observer_mut().alias(register, checkpoint);
                return Ok(register);
            }
        }
        self.compile_to_register(left)
    }

    fn compile_binary_operation(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> CompileResult<()> {
        if op == BinaryOp::Add
            && let Some(value) = smi_literal(right)
        {
            self.compile_expression(left)?;
            let slot = self.builder.new_feedback_slot();
            self.builder.add_smi(value, slot);
            return Ok(());
        }

        let checkpoint = self.registers.position();
        let left = self.operand_register(left, right, checkpoint)?;
        self.compile_expression(right)?;
        let slot = self.builder.new_feedback_slot();
        self.builder.binary_operation(binary_opcode(op), left, slot);
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_compare_operation(
        &mut self,
        op: CompareOp,
        left: &Expression,
        right: &Expression,
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        let left = self.operand_register(left, right, checkpoint)?;
        self.compile_expression(right)?;
        let slot = self.builder.new_feedback_slot();
        let (opcode, negate) = compare_opcode(op);
        self.builder.binary_operation(opcode, left, slot);
        if negate {
            self.builder.logical_not(true);
        }
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_logical_operation(
        &mut self,
        op: LogicalOp,
        left: &Expression,
        right: &Expression,
    ) -> CompileResult<()> {
        let end = self.new_label();
        self.compile_expression(left)?;
        match op {
            LogicalOp::And if produces_boolean(left) => self.builder.jump_if_false(end),
            LogicalOp::And => self.builder.jump_if_to_boolean_false(end),
            LogicalOp::Or if produces_boolean(left) => self.builder.jump_if_true(end),
            LogicalOp::Or => self.builder.jump_if_to_boolean_true(end),
            LogicalOp::Nullish => self.builder.jump_if_not_undefined_or_null(end),
        }
        self.compile_expression(right)?;
        self.builder.bind(end);
        Ok(())
    }

    fn compile_unary_operation(&mut self, op: UnaryOp, operand: &Expression) -> CompileResult<()> {
        match op {
            UnaryOp::TypeOf => {
                match operand {
                    Expression::Variable(variable) => self.load_variable(variable, true),
                    _ => self.compile_expression(operand)?,
                }
                self.builder.type_of();
            }
            UnaryOp::Not => {
                self.compile_expression(operand)?;
                self.builder.logical_not(produces_boolean(operand));
            }
            UnaryOp::Void => {
                self.compile_expression(operand)?;
                self.builder.load_undefined();
            }
            UnaryOp::Minus | UnaryOp::Plus | UnaryOp::BitNot => {
                self.compile_expression(operand)?;
                let opcode = match op {
                    UnaryOp::Minus => Opcode::Negate,
                    UnaryOp::Plus => Opcode::ToNumeric,
                    _ => Opcode::BitwiseNot,
                };
                let slot = self.builder.new_feedback_slot();
                self.builder.unary_operation(opcode, slot);
            }
        }
        Ok(())
    }

    /// Increment or decrement the accumulator; for postfix forms the old
    /// numeric value is kept in the returned register
    fn build_count(&mut self, op: CountOp, prefix: bool) -> Option<Register> {
        let old_value = if prefix {
            None
        } else {
            let slot = self.builder.new_feedback_slot();
            self.builder.unary_operation(Opcode::ToNumeric, slot);
            let register = self.registers.new_register();
            self.builder.store_accumulator_in_register(register);
            Some(register)
        };
        let opcode = match op {
            CountOp::Increment => Opcode::Inc,
            CountOp::Decrement => Opcode::Dec,
        };
        let slot = self.builder.new_feedback_slot();
        self.builder.unary_operation(opcode, slot);
        old_value
    }

    fn compile_count_operation(
        &mut self,
        op: CountOp,
        prefix: bool,
        target: &Expression,
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        let old_value = match target {
            Expression::Variable(variable) => {
                self.load_variable(variable, false);
                let old_value = self.build_count(op, prefix);
                self.store_variable(variable, StoreMode::Assignment);
                old_value
            }
            Expression::Property {
                object,
                key: PropertyKey::Named(name),
            } => {
                let object = self.compile_to_register(object)?;
                let name = self.name_constant(name);
                let slot = self.builder.new_feedback_slot();
                self.builder.load_named_property(object, name, slot);
                let old_value = self.build_count(op, prefix);
                let slot = self.builder.new_feedback_slot();
                self.builder.store_named_property(object, name, slot);
                old_value
            }
            Expression::Property {
                object,
                key: PropertyKey::Keyed(key),
            } => {
                let object = self.compile_to_register(object)?;
                let key = self.compile_to_register(key)?;
                let slot = self.builder.new_feedback_slot();
                self.builder.load_accumulator_with_register(key);
                self.builder.load_keyed_property(object, slot);
                let old_value = self.build_count(op, prefix);
                let slot = self.builder.new_feedback_slot();
                self.builder.store_keyed_property(object, key, slot);
                old_value
            }
            _ => panic!("invalid count operation target"),
        };
        if let Some(old_value) = old_value {
            self.builder.load_accumulator_with_register(old_value);
        }
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_assignment(
        &mut self,
        op: Option<BinaryOp>,
        target: &Expression,
        value: &Expression,
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        match target {
            Expression::Variable(variable) => {
                match op {
                    Some(op) => self.compile_binary_operation(op, target, value)?,
                    None => self.compile_expression(value)?,
                }
                self.store_variable(variable, StoreMode::Assignment);
            }
            Expression::Property {
                object,
                key: PropertyKey::Named(name),
            } => {
                let object = self.compile_to_register(object)?;
                let name = self.name_constant(name);
                if let Some(op) = op {
                    let slot = self.builder.new_feedback_slot();
                    self.builder.load_named_property(object, name, slot);
                    let current = self.registers.new_register();
                    self.builder.store_accumulator_in_register(current);
                    self.compile_expression(value)?;
                    let slot = self.builder.new_feedback_slot();
                    self.builder.binary_operation(binary_opcode(op), current, slot);
                } else {
                    self.compile_expression(value)?;
                }
                let slot = self.builder.new_feedback_slot();
                self.builder.store_named_property(object, name, slot);
            }
            Expression::Property {
                object,
                key: PropertyKey::Keyed(key),
            } => {
                let object = self.compile_to_register(object)?;
                let key = self.compile_to_register(key)?;
                if let Some(op) = op {
                    let slot = self.builder.new_feedback_slot();
                    self.builder.load_accumulator_with_register(key);
                    self.builder.load_keyed_property(object, slot);
                    let current = self.registers.new_register();
                    self.builder.store_accumulator_in_register(current);
                    self.compile_expression(value)?;
                    let slot = self.builder.new_feedback_slot();
                    self.builder.binary_operation(binary_opcode(op), current, slot);
                } else {
                    self.compile_expression(value)?;
                }
                let slot = self.builder.new_feedback_slot();
                self.builder.store_keyed_property(object, key, slot);
            }
            _ => panic!("invalid assignment target"),
        }
        self.registers.release(checkpoint);
        Ok(())
    }

    /// acc = object\[key\]
    fn load_property(&mut self, object: Register, key: &PropertyKey) -> CompileResult<()> {
        match key {
            PropertyKey::Named(name) => {
                let name = self.name_constant(name);
                let slot = self.builder.new_feedback_slot();
                self.builder.load_named_property(object, name, slot);
            }
            PropertyKey::Keyed(key) => {
                self.compile_expression(key)?;
                let slot = self.builder.new_feedback_slot();
                self.builder.load_keyed_property(object, slot);
            }
        }
        Ok(())
    }

    fn compile_arguments(&mut self, arguments: &[Expression], list: RegisterList) -> CompileResult<()> {
        debug_assert_eq!(arguments.len() as u32, list.count());
        for (i, argument) in arguments.iter().enumerate() {
            self.compile_expression(argument)?;
            self.builder.store_accumulator_in_register(list.get(i as u32));
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        position: u32,
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        let function = self.registers.new_register();
        match callee {
            Expression::Property { object, key } => {
                // args[0] is the receiver
                let args = self.registers.new_register_list(arguments.len() as u32 + 1);
                self.compile_expression(object)?;
                self.builder.store_accumulator_in_register(args.first());
                self.load_property(args.first(), key)?;
                self.builder.store_accumulator_in_register(function);
                self.compile_arguments(arguments, args.pop_front())?;
                self.builder.set_expression_position(position);
                let slot = self.builder.new_feedback_slot();
                self.builder.call_property(function, args, slot);
            }
            _ => {
                let args = self.registers.new_register_list(arguments.len() as u32);
                self.compile_expression(callee)?;
                self.builder.store_accumulator_in_register(function);
                self.compile_arguments(arguments, args)?;
                self.builder.set_expression_position(position);
                let slot = self.builder.new_feedback_slot();
                self.builder.call_undefined_receiver(function, args, slot);
            }
        }
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_new(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        position: u32,
    ) -> CompileResult<()> {
        let checkpoint = self.registers.position();
        let constructor = self.registers.new_register();
        let args = self.registers.new_register_list(arguments.len() as u32);
        self.compile_expression(callee)?;
        self.builder.store_accumulator_in_register(constructor);
        self.compile_arguments(arguments, args)?;
        // new.target
        self.builder.load_accumulator_with_register(constructor);
        self.builder.set_expression_position(position);
        let slot = self.builder.new_feedback_slot();
        self.builder.construct(constructor, args, slot);
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_object_literal(&mut self, properties: &[(String, Expression)]) -> CompileResult<()> {
        let names = properties
            .iter()
            .map(|(name, _)| name.encode_utf16().collect())
            .collect();
        let index = self
            .builder
            .constant_pool()
            .add(Constant::ObjectBoilerplate(names));
        let slot = self.builder.new_feedback_slot();
        self.builder.create_object_literal(index, slot, 0);
        if properties.is_empty() {
            return Ok(());
        }

        let checkpoint = self.registers.position();
        let object = self.registers.new_register();
        self.builder.store_accumulator_in_register(object);
        for (name, value) in properties {
            self.compile_expression(value)?;
            let name = self.name_constant(name);
            let slot = self.builder.new_feedback_slot();
            self.builder.store_named_property(object, name, slot);
        }
        self.builder.load_accumulator_with_register(object);
        self.registers.release(checkpoint);
        Ok(())
    }

    fn compile_array_literal(&mut self, elements: &[Expression]) -> CompileResult<()> {
        if elements.iter().any(|e| matches!(e, Expression::Spread(_))) {
            unimplemented!("spread elements");
        }
        let index = self
            .builder
            .constant_pool()
            .add(Constant::ArrayBoilerplate(elements.len() as u32));
        let slot = self.builder.new_feedback_slot();
        self.builder.create_array_literal(index, slot, 0);
        if elements.is_empty() {
            return Ok(());
        }

        let checkpoint = self.registers.position();
        let array = self.registers.new_register();
        let key = self.registers.new_register();
        self.builder.store_accumulator_in_register(array);
        for (i, element) in elements.iter().enumerate() {
            self.builder.load_literal_smi(i as i32);
            self.builder.store_accumulator_in_register(key);
            self.compile_expression(element)?;
            let slot = self.builder.new_feedback_slot();
            self.builder.store_keyed_property(array, key, slot);
        }
        self.builder.load_accumulator_with_register(array);
        self.registers.release(checkpoint);
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Exp => Opcode::Exp,
        BinaryOp::BitOr => Opcode::BitwiseOr,
        BinaryOp::BitXor => Opcode::BitwiseXor,
        BinaryOp::BitAnd => Opcode::BitwiseAnd,
        BinaryOp::Shl => Opcode::ShiftLeft,
        BinaryOp::Sar => Opcode::ShiftRight,
        BinaryOp::Shr => Opcode::ShiftRightLogical,
    }
}

/// Compare opcode and whether the result is negated afterwards
fn compare_opcode(op: CompareOp) -> (Opcode, bool) {
    match op {
        CompareOp::Eq => (Opcode::TestEqual, false),
        CompareOp::NotEq => (Opcode::TestEqual, true),
        CompareOp::StrictEq => (Opcode::TestEqualStrict, false),
        CompareOp::StrictNotEq => (Opcode::TestEqualStrict, true),
        CompareOp::Lt => (Opcode::TestLessThan, false),
        CompareOp::Gt => (Opcode::TestGreaterThan, false),
        CompareOp::LtEq => (Opcode::TestLessThanOrEqual, false),
        CompareOp::GtEq => (Opcode::TestGreaterThanOrEqual, false),
        CompareOp::InstanceOf => (Opcode::TestInstanceOf, false),
        CompareOp::In => (Opcode::TestIn, false),
    }
}

/// Whether the expression always evaluates to a boolean
fn produces_boolean(expression: &Expression) -> bool {
    matches!(
        expression,
        Expression::Compare { .. }
            | Expression::Literal(Literal::Boolean(_))
            | Expression::Unary {
                op: UnaryOp::Not,
                ..
            }
    )
}

fn is_true_literal(expression: &Expression) -> bool {
    matches!(expression, Expression::Literal(Literal::Boolean(true)))
}

fn as_smi(value: f64) -> Option<i32> {
    let fits = value.fract() == 0.0 && value >= i32::MIN as f64 && value <= i32::MAX as f64;
    (fits && !(value == 0.0 && value.is_sign_negative())).then_some(value as i32)
}

fn smi_literal(expression: &Expression) -> Option<i32> {
    match expression {
        Expression::Literal(Literal::Number(value)) => as_smi(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_smi() {
        assert_eq!(as_smi(3.0), Some(3));
        assert_eq!(as_smi(-7.0), Some(-7));
        assert_eq!(as_smi(0.5), None);
        assert_eq!(as_smi(-0.0), None);
        assert_eq!(as_smi(f64::NAN), None);
        assert_eq!(as_smi(4294967296.0), None);
    }

    #[test]
    fn test_produces_boolean() {
        let x = Variable::local("x", 0);
        assert!(produces_boolean(&Expression::compare(
            CompareOp::Lt,
            Expression::var(&x),
            Expression::number(1.0)
        )));
        assert!(produces_boolean(&Expression::unary(UnaryOp::Not, Expression::var(&x))));
        assert!(!produces_boolean(&Expression::var(&x)));
    }
}
