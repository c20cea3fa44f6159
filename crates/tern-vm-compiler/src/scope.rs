//! Generator-side scope tracking: break/continue targets and the context chain

use tern_vm_bytecode::Register;

use crate::ast::StatementId;
use crate::builder::BytecodeArrayBuilder;
use crate::context::CompilationContext;
use crate::control_flow::{LoopBuilder, SwitchBuilder};

/// An enclosing statement that `break` or `continue` can target
#[derive(Debug)]
pub enum ControlScope {
    /// `while`, `do-while` or `for`
    Iteration {
        /// The loop statement
        statement: StatementId,
        /// Its control flow
        builder: LoopBuilder,
        /// Context depth when the loop was entered
        context_depth: usize,
    },
    /// `switch`
    Switch {
        /// The switch statement
        statement: StatementId,
        /// Its control flow
        builder: SwitchBuilder,
        /// Context depth when the switch was entered
        context_depth: usize,
    },
}

impl ControlScope {
    fn statement(&self) -> StatementId {
        match self {
            Self::Iteration { statement, .. } | Self::Switch { statement, .. } => *statement,
        }
    }

    fn context_depth(&self) -> usize {
        match self {
            Self::Iteration { context_depth, .. } | Self::Switch { context_depth, .. } => {
                *context_depth
            }
        }
    }

    fn abandon(&mut self) {
        match self {
            Self::Iteration { builder, .. } => builder.abandon(),
            Self::Switch { builder, .. } => builder.abandon(),
        }
    }
}

/// Stack of enclosing control scopes, innermost last
#[derive(Debug, Default)]
pub struct ControlScopeStack {
    scopes: Vec<ControlScope>,
}

impl ControlScopeStack {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a scope
    pub fn push(&mut self, scope: ControlScope) {
        self.scopes.push(scope);
    }

    /// Leave the innermost scope
    pub fn pop(&mut self) -> ControlScope {
        match self.scopes.pop() {
            Some(scope) => scope,
            None => panic!("control scope stack underflow"),
        }
    }

    /// Innermost loop builder
    pub fn current_loop(&mut self) -> &mut LoopBuilder {
        match self.scopes.last_mut() {
            Some(ControlScope::Iteration { builder, .. }) => builder,
            _ => panic!("innermost control scope is not a loop"),
        }
    }

    /// Innermost switch builder
    pub fn current_switch(&mut self) -> &mut SwitchBuilder {
        match self.scopes.last_mut() {
            Some(ControlScope::Switch { builder, .. }) => builder,
            _ => panic!("innermost control scope is not a switch"),
        }
    }

    /// Number of enclosing scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether no scope is open
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    fn find(&mut self, statement: StatementId) -> &mut ControlScope {
        match self.scopes.iter_mut().rev().find(|s| s.statement() == statement) {
            Some(scope) => scope,
            None => panic!("no enclosing control scope for statement {:?}", statement),
        }
    }

    /// `break` out of `statement`, restoring its context first
    pub fn break_(
        &mut self,
        statement: StatementId,
        builder: &mut BytecodeArrayBuilder,
        ctx: &mut CompilationContext,
        contexts: &ContextScopeStack,
    ) {
        let scope = self.find(statement);
        contexts.unwind_to(scope.context_depth(), builder);
        match scope {
            ControlScope::Iteration { builder: lp, .. } => lp.break_(builder, ctx),
            ControlScope::Switch { builder: sw, .. } => sw.break_(builder, ctx),
        }
    }

    /// `continue` the loop `statement`, restoring its context first
    pub fn continue_(
        &mut self,
        statement: StatementId,
        builder: &mut BytecodeArrayBuilder,
        ctx: &mut CompilationContext,
        contexts: &ContextScopeStack,
    ) {
        let scope = self.find(statement);
        contexts.unwind_to(scope.context_depth(), builder);
        match scope {
            ControlScope::Iteration { builder: lp, .. } => lp.continue_(builder, ctx),
            ControlScope::Switch { .. } => {
                panic!("continue targets switch statement {:?}", statement)
            }
        }
    }

    /// Drop every scope without resolving its pending jumps
    pub fn abandon_all(&mut self) {
        for mut scope in self.scopes.drain(..).rev() {
            scope.abandon();
        }
    }
}

/// Tracks which register holds each level of the context chain.
///
/// Level 0 is the context the function was called with. The innermost level
/// always lives in `<context>`; entering a scope saves the current context
/// into the register numbered after the outer level's and makes the new one
/// current, exiting restores it. The function context, once pushed, is never
/// popped.
#[derive(Debug)]
pub struct ContextScopeStack {
    first_register: i32,
    levels: Vec<Register>,
    function_context: bool,
}

impl ContextScopeStack {
    /// Chain holding only the incoming context; save registers start at
    /// `first_register`
    pub fn new(first_register: u32) -> Self {
        Self {
            first_register: first_register as i32,
            levels: vec![Register::current_context()],
            function_context: false,
        }
    }

    /// Number of context levels, the incoming context included
    #[inline]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Make the context in the accumulator current
    pub fn enter(&mut self, builder: &mut BytecodeArrayBuilder) {
        let outer = self.levels.len() - 1;
        let save = Register(self.first_register + outer as i32);
        builder.push_context(save);
        self.levels[outer] = save;
        self.levels.push(Register::current_context());
    }

    /// Enter the function context; it spans the whole activation
    pub fn enter_function_context(&mut self, builder: &mut BytecodeArrayBuilder) {
        assert!(
            self.levels.len() == 1 && !self.function_context,
            "function context must be the first context entered"
        );
        self.enter(builder);
        self.function_context = true;
    }

    /// Restore the outer context
    pub fn exit(&mut self, builder: &mut BytecodeArrayBuilder) {
        let floor = if self.function_context { 2 } else { 1 };
        assert!(self.levels.len() > floor, "context scope exit without matching enter");
        self.levels.pop();
        let outer = self.levels.len() - 1;
        builder.pop_context(self.levels[outer]);
        self.levels[outer] = Register::current_context();
    }

    /// Emit the `PopContext` that makes level `depth - 1` current, for jumps
    /// leaving inner scopes. Compile-time state is unchanged.
    pub fn unwind_to(&self, depth: usize, builder: &mut BytecodeArrayBuilder) {
        assert!(depth >= 1 && depth <= self.levels.len(), "context depth {} out of range", depth);
        if depth < self.levels.len() {
            builder.pop_context(self.levels[depth - 1]);
        }
    }

    /// Register and remaining depth addressing the context `depth` levels out
    /// from the current one
    pub fn resolve(&self, depth: u32) -> (Register, u32) {
        let innermost = self.levels.len() - 1;
        let hops = (depth as usize).min(innermost);
        let register = self.levels[innermost - hops];
        (register, depth - hops as u32)
    }
}

/// Save registers needed by the deepest chain of heap scopes in `literal`,
/// its own function scope included
pub fn context_register_count(literal: &crate::ast::FunctionLiteral) -> u32 {
    use crate::ast::{Statement, StatementKind};

    fn statement_depth(statement: &Statement) -> u32 {
        match &statement.kind {
            StatementKind::Block(block) => block_depth(&block.statements, block.scope.is_some()),
            StatementKind::If {
                then, otherwise, ..
            } => statement_depth(then).max(otherwise.as_deref().map_or(0, statement_depth)),
            StatementKind::While { body, .. }
            | StatementKind::DoWhile { body, .. }
            | StatementKind::ForIn { body, .. }
            | StatementKind::With { body, .. } => statement_depth(body),
            StatementKind::For { init, body, .. } => {
                statement_depth(body).max(init.as_deref().map_or(0, statement_depth))
            }
            StatementKind::Switch { cases, .. } => cases
                .iter()
                .flat_map(|case| case.body.iter())
                .map(statement_depth)
                .max()
                .unwrap_or(0),
            StatementKind::TryCatch { block, handler } => {
                let catch = block_depth(&handler.body.statements, handler.body.scope.is_some())
                    + handler.scope.is_some() as u32;
                block_depth(&block.statements, block.scope.is_some()).max(catch)
            }
            StatementKind::TryFinally { block, finalizer } => {
                block_depth(&block.statements, block.scope.is_some())
                    .max(block_depth(&finalizer.statements, finalizer.scope.is_some()))
            }
            _ => 0,
        }
    }

    fn block_depth(statements: &[Statement], heap_scope: bool) -> u32 {
        heap_scope as u32 + statements.iter().map(statement_depth).max().unwrap_or(0)
    }

    block_depth(&literal.body, literal.scope.is_some())
}
