//! Syntax tree consumed by the bytecode generator
//!
//! The tree arrives fully analysed: every variable reference already carries
//! its storage location, every function literal its frame layout, and every
//! `break`/`continue` the [`StatementId`] of its target.

use tern_vm_bytecode::{IntrinsicId, RuntimeFunction};

/// Identity of a breakable statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u32);

/// Strictness of a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LanguageMode {
    /// Sloppy mode
    #[default]
    Sloppy,
    /// Strict mode
    Strict,
}

/// Kind of function literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Top-level script code
    Script,
    /// Ordinary function
    Normal,
    /// Arrow function
    Arrow,
}

/// Binding mode of a declared variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VariableMode {
    /// `var` or parameter
    #[default]
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
}

impl VariableMode {
    /// Lexical bindings start as the hole and need TDZ checks
    pub fn is_lexical(self) -> bool {
        matches!(self, Self::Let | Self::Const)
    }
}

/// Where a variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    /// Stack local `r{n}`
    Local(u32),
    /// Formal parameter `n` (receiver excluded)
    Parameter(u32),
    /// Declared global
    Global,
    /// Free reference resolved against the global object
    Unresolved,
    /// Context slot `slot`, `depth` contexts out from the innermost one
    Context {
        /// Contexts to walk outward
        depth: u32,
        /// Slot in the target context
        slot: u32,
    },
    /// Dynamic lookup by name
    Lookup,
}

/// A resolved variable reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Source name
    pub name: String,
    /// Binding mode
    pub mode: VariableMode,
    /// Storage
    pub location: VariableLocation,
}

impl Variable {
    /// Variable with the given mode and location
    pub fn new(name: impl Into<String>, mode: VariableMode, location: VariableLocation) -> Self {
        Self {
            name: name.into(),
            mode,
            location,
        }
    }

    /// `var` stack local
    pub fn local(name: impl Into<String>, index: u32) -> Self {
        Self::new(name, VariableMode::Var, VariableLocation::Local(index))
    }

    /// Formal parameter
    pub fn parameter(name: impl Into<String>, index: u32) -> Self {
        Self::new(name, VariableMode::Var, VariableLocation::Parameter(index))
    }

    /// Declared global
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, VariableMode::Var, VariableLocation::Global)
    }

    /// Free reference
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::new(name, VariableMode::Var, VariableLocation::Unresolved)
    }

    /// Context slot
    pub fn context(name: impl Into<String>, mode: VariableMode, depth: u32, slot: u32) -> Self {
        Self::new(name, mode, VariableLocation::Context { depth, slot })
    }

    /// Same variable with another mode
    pub fn with_mode(mut self, mode: VariableMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Heap-allocated bindings of a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapScope {
    /// Names of the context slots, in slot order
    pub slot_names: Vec<String>,
}

impl HeapScope {
    /// Scope with the given slot names
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            slot_names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of context slots
    pub fn slot_count(&self) -> u32 {
        self.slot_names.len() as u32
    }
}

/// What a declaration introduces
#[derive(Debug, Clone)]
pub enum DeclarationKind {
    /// `var`, `let` or `const` binding
    Variable,
    /// Function declaration, hoisted with its closure
    Function(Box<FunctionLiteral>),
}

/// A declaration instantiated on scope entry
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Declared variable
    pub variable: Variable,
    /// Declaration kind
    pub kind: DeclarationKind,
}

impl Declaration {
    /// Variable declaration
    pub fn variable(variable: Variable) -> Self {
        Self {
            variable,
            kind: DeclarationKind::Variable,
        }
    }

    /// Function declaration
    pub fn function(variable: Variable, literal: FunctionLiteral) -> Self {
        Self {
            variable,
            kind: DeclarationKind::Function(Box::new(literal)),
        }
    }
}

/// A function to compile
#[derive(Debug, Clone)]
pub struct FunctionLiteral {
    /// Function name, empty when anonymous
    pub name: String,
    /// Function kind
    pub kind: FunctionKind,
    /// Strictness
    pub language_mode: LanguageMode,
    /// Formal parameters, each `Parameter(i)` or a depth-0 context slot
    pub parameters: Vec<Variable>,
    /// Number of stack locals
    pub stack_local_count: u32,
    /// Function-level heap scope, if any binding is context allocated
    pub scope: Option<HeapScope>,
    /// Declarations hoisted to function entry
    pub declarations: Vec<Declaration>,
    /// Function body
    pub body: Vec<Statement>,
    /// Source position of the function
    pub position: u32,
}

impl FunctionLiteral {
    /// Empty function of the given kind
    pub fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            language_mode: LanguageMode::Sloppy,
            parameters: Vec::new(),
            stack_local_count: 0,
            scope: None,
            declarations: Vec::new(),
            body: Vec::new(),
            position: 0,
        }
    }

    /// Top-level script code
    pub fn script(body: Vec<Statement>) -> Self {
        let mut literal = Self::new("", FunctionKind::Script);
        literal.body = body;
        literal
    }

    /// Parameter count including the receiver
    pub fn parameter_count(&self) -> u32 {
        self.parameters.len() as u32 + 1
    }

    /// Display name for diagnostics
    pub fn debug_name(&self) -> &str {
        if self.name.is_empty() {
            "<anonymous>"
        } else {
            &self.name
        }
    }
}

/// A block, optionally with its own heap scope
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Statements
    pub statements: Vec<Statement>,
    /// Heap scope entered for the block
    pub scope: Option<HeapScope>,
    /// Block-level declarations
    pub declarations: Vec<Declaration>,
}

impl Block {
    /// Block without its own scope
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            statements,
            scope: None,
            declarations: Vec::new(),
        }
    }
}

/// One `case` or `default` clause
#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Case label; `None` for `default`
    pub test: Option<Expression>,
    /// Clause body
    pub body: Vec<Statement>,
}

/// `catch (variable) { body }`
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// Exception binding
    pub variable: Option<Variable>,
    /// Heap scope holding the exception binding
    pub scope: Option<HeapScope>,
    /// Handler body
    pub body: Block,
}

/// A statement with its source position
#[derive(Debug, Clone)]
pub struct Statement {
    /// Statement kind
    pub kind: StatementKind,
    /// Source position
    pub position: u32,
}

/// Statement kinds
#[derive(Debug, Clone)]
pub enum StatementKind {
    /// `expr;`
    Expression(Expression),
    /// Binding initialization `let x = value`
    VariableDeclaration {
        /// Declared variable
        variable: Variable,
        /// Initializer; `undefined` when absent
        initializer: Option<Expression>,
    },
    /// `{ ... }`
    Block(Block),
    /// `if (condition) then else otherwise`
    If {
        /// Condition
        condition: Expression,
        /// Consequent
        then: Box<Statement>,
        /// Alternate
        otherwise: Option<Box<Statement>>,
    },
    /// `while (condition) body`
    While {
        /// Statement identity
        id: StatementId,
        /// Condition
        condition: Expression,
        /// Loop body
        body: Box<Statement>,
    },
    /// `do body while (condition)`
    DoWhile {
        /// Statement identity
        id: StatementId,
        /// Loop body
        body: Box<Statement>,
        /// Condition
        condition: Expression,
    },
    /// `for (init; condition; update) body`
    For {
        /// Statement identity
        id: StatementId,
        /// Initializer
        init: Option<Box<Statement>>,
        /// Condition; absent means forever
        condition: Option<Expression>,
        /// Update expression
        update: Option<Expression>,
        /// Loop body
        body: Box<Statement>,
    },
    /// `switch (tag) { cases }`
    Switch {
        /// Statement identity
        id: StatementId,
        /// Discriminant
        tag: Expression,
        /// Clauses in source order
        cases: Vec<SwitchCase>,
    },
    /// `break`
    Break(StatementId),
    /// `continue`
    Continue(StatementId),
    /// `return value`
    Return(Option<Expression>),
    /// `throw value`
    Throw(Expression),
    /// `try { block } catch { handler }`
    TryCatch {
        /// Protected block
        block: Block,
        /// Handler
        handler: CatchClause,
    },
    /// `try { block } finally { finalizer }`
    TryFinally {
        /// Protected block
        block: Block,
        /// Finalizer
        finalizer: Block,
    },
    /// `for (each in object) body`
    ForIn {
        /// Statement identity
        id: StatementId,
        /// Iteration variable
        each: Variable,
        /// Enumerated object
        object: Expression,
        /// Loop body
        body: Box<Statement>,
    },
    /// `with (object) body`
    With {
        /// Scope object
        object: Expression,
        /// Body
        body: Box<Statement>,
    },
    /// `debugger`
    Debugger,
    /// `;`
    Empty,
}

impl Statement {
    /// Statement at position 0
    pub fn new(kind: StatementKind) -> Self {
        Self { kind, position: 0 }
    }

    /// Same statement at `position`
    pub fn at(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    /// `expr;`
    pub fn expression(expression: Expression) -> Self {
        Self::new(StatementKind::Expression(expression))
    }

    /// `let x = value`, `var x = value`
    pub fn declare(variable: Variable, initializer: Option<Expression>) -> Self {
        Self::new(StatementKind::VariableDeclaration {
            variable,
            initializer,
        })
    }

    /// Scope-less block
    pub fn block(statements: Vec<Statement>) -> Self {
        Self::new(StatementKind::Block(Block::new(statements)))
    }

    /// `if`
    pub fn if_(condition: Expression, then: Statement, otherwise: Option<Statement>) -> Self {
        Self::new(StatementKind::If {
            condition,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    /// `while`
    pub fn while_(id: u32, condition: Expression, body: Statement) -> Self {
        Self::new(StatementKind::While {
            id: StatementId(id),
            condition,
            body: Box::new(body),
        })
    }

    /// `do ... while`
    pub fn do_while(id: u32, body: Statement, condition: Expression) -> Self {
        Self::new(StatementKind::DoWhile {
            id: StatementId(id),
            body: Box::new(body),
            condition,
        })
    }

    /// `for`
    pub fn for_(
        id: u32,
        init: Option<Statement>,
        condition: Option<Expression>,
        update: Option<Expression>,
        body: Statement,
    ) -> Self {
        Self::new(StatementKind::For {
            id: StatementId(id),
            init: init.map(Box::new),
            condition,
            update,
            body: Box::new(body),
        })
    }

    /// `switch`
    pub fn switch(id: u32, tag: Expression, cases: Vec<SwitchCase>) -> Self {
        Self::new(StatementKind::Switch {
            id: StatementId(id),
            tag,
            cases,
        })
    }

    /// `break`
    pub fn break_(target: u32) -> Self {
        Self::new(StatementKind::Break(StatementId(target)))
    }

    /// `continue`
    pub fn continue_(target: u32) -> Self {
        Self::new(StatementKind::Continue(StatementId(target)))
    }

    /// `return`
    pub fn return_(value: Option<Expression>) -> Self {
        Self::new(StatementKind::Return(value))
    }

    /// `throw`
    pub fn throw(value: Expression) -> Self {
        Self::new(StatementKind::Throw(value))
    }
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Boolean(bool),
    /// Number
    Number(f64),
    /// String
    String(String),
}

/// Arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `**`
    Exp,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `&`
    BitAnd,
    /// `<<`
    Shl,
    /// `>>`
    Sar,
    /// `>>>`
    Shr,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNotEq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    LtEq,
    /// `>=`
    GtEq,
    /// `instanceof`
    InstanceOf,
    /// `in`
    In,
}

/// Short-circuit operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Nullish,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Minus,
    /// `+`
    Plus,
    /// `~`
    BitNot,
    /// `typeof`
    TypeOf,
    /// `void`
    Void,
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOp {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// Property key
#[derive(Debug, Clone)]
pub enum PropertyKey {
    /// `obj.name`
    Named(String),
    /// `obj[expr]`
    Keyed(Box<Expression>),
}

/// Expressions
#[derive(Debug, Clone)]
pub enum Expression {
    /// Literal
    Literal(Literal),
    /// Variable reference
    Variable(Variable),
    /// `this`
    This,
    /// `new.target`
    NewTarget,
    /// `target = value` or `target op= value`
    Assign {
        /// Operator of a compound assignment
        op: Option<BinaryOp>,
        /// Variable or property
        target: Box<Expression>,
        /// Assigned value
        value: Box<Expression>,
    },
    /// Arithmetic or bitwise operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// Comparison
    Compare {
        /// Operator
        op: CompareOp,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// `&&`, `||`, `??`
    Logical {
        /// Operator
        op: LogicalOp,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expression>,
    },
    /// `++x`, `x--`
    Count {
        /// Operator
        op: CountOp,
        /// Prefix form
        prefix: bool,
        /// Variable or property
        target: Box<Expression>,
    },
    /// `condition ? then : otherwise`
    Conditional {
        /// Condition
        condition: Box<Expression>,
        /// Value when truthy
        then: Box<Expression>,
        /// Value when falsy
        otherwise: Box<Expression>,
    },
    /// Property load
    Property {
        /// Receiver
        object: Box<Expression>,
        /// Key
        key: PropertyKey,
    },
    /// Function call
    Call {
        /// Callee; a property callee passes its object as receiver
        callee: Box<Expression>,
        /// Arguments
        arguments: Vec<Expression>,
        /// Source position of the call
        position: u32,
    },
    /// `new callee(arguments)`
    New {
        /// Constructor
        callee: Box<Expression>,
        /// Arguments
        arguments: Vec<Expression>,
        /// Source position
        position: u32,
    },
    /// `%Function(arguments)`
    CallRuntime {
        /// Runtime function
        function: RuntimeFunction,
        /// Arguments
        arguments: Vec<Expression>,
    },
    /// `%_Intrinsic(arguments)`
    InvokeIntrinsic {
        /// Intrinsic
        intrinsic: IntrinsicId,
        /// Arguments
        arguments: Vec<Expression>,
    },
    /// Object literal with named properties
    Object(Vec<(String, Expression)>),
    /// Array literal
    Array(Vec<Expression>),
    /// Function expression
    Function(Box<FunctionLiteral>),
    /// `...value`
    Spread(Box<Expression>),
    /// `yield value`
    Yield(Box<Expression>),
    /// `class name { ... }`
    Class(String),
}

impl Expression {
    /// Number literal
    pub fn number(value: f64) -> Self {
        Self::Literal(Literal::Number(value))
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Literal::String(value.into()))
    }

    /// Boolean literal
    pub fn boolean(value: bool) -> Self {
        Self::Literal(Literal::Boolean(value))
    }

    /// `undefined`
    pub fn undefined() -> Self {
        Self::Literal(Literal::Undefined)
    }

    /// Variable reference
    pub fn var(variable: &Variable) -> Self {
        Self::Variable(variable.clone())
    }

    /// `target = value`
    pub fn assign(target: Expression, value: Expression) -> Self {
        Self::Assign {
            op: None,
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// `target op= value`
    pub fn compound_assign(op: BinaryOp, target: Expression, value: Expression) -> Self {
        Self::Assign {
            op: Some(op),
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// Arithmetic or bitwise operation
    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Comparison
    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Short-circuit operation
    pub fn logical(op: LogicalOp, left: Expression, right: Expression) -> Self {
        Self::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary operation
    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// `++`/`--`
    pub fn count(op: CountOp, prefix: bool, target: Expression) -> Self {
        Self::Count {
            op,
            prefix,
            target: Box::new(target),
        }
    }

    /// `obj.name`
    pub fn named_property(object: Expression, name: impl Into<String>) -> Self {
        Self::Property {
            object: Box::new(object),
            key: PropertyKey::Named(name.into()),
        }
    }

    /// `obj[key]`
    pub fn keyed_property(object: Expression, key: Expression) -> Self {
        Self::Property {
            object: Box::new(object),
            key: PropertyKey::Keyed(Box::new(key)),
        }
    }

    /// Call at position 0
    pub fn call(callee: Expression, arguments: Vec<Expression>) -> Self {
        Self::Call {
            callee: Box::new(callee),
            arguments,
            position: 0,
        }
    }

    /// Function expression
    pub fn function(literal: FunctionLiteral) -> Self {
        Self::Function(Box::new(literal))
    }

    /// Whether evaluating the expression can store to `location`
    pub fn may_assign_to(&self, location: VariableLocation) -> bool {
        let targets = |target: &Expression| {
            matches!(target, Expression::Variable(v) if v.location == location)
        };
        match self {
            Self::Literal(_) | Self::Variable(_) | Self::This | Self::NewTarget | Self::Class(_) => {
                false
            }
            // Nested functions cannot reach stack slots
            Self::Function(_) => false,
            Self::Assign { target, value, .. } => {
                targets(target) || target.may_assign_to(location) || value.may_assign_to(location)
            }
            Self::Count { target, .. } => targets(target) || target.may_assign_to(location),
            Self::Binary { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::Logical { left, right, .. } => {
                left.may_assign_to(location) || right.may_assign_to(location)
            }
            Self::Unary { operand, .. } | Self::Spread(operand) | Self::Yield(operand) => {
                operand.may_assign_to(location)
            }
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.may_assign_to(location)
                    || then.may_assign_to(location)
                    || otherwise.may_assign_to(location)
            }
            Self::Property { object, key } => {
                object.may_assign_to(location)
                    || matches!(key, PropertyKey::Keyed(key) if key.may_assign_to(location))
            }
            Self::Call {
                callee, arguments, ..
            }
            | Self::New {
                callee, arguments, ..
            } => callee.may_assign_to(location) || arguments.iter().any(|a| a.may_assign_to(location)),
            Self::CallRuntime { arguments, .. } | Self::InvokeIntrinsic { arguments, .. } | Self::Array(arguments) => {
                arguments.iter().any(|a| a.may_assign_to(location))
            }
            Self::Object(properties) => properties.iter().any(|(_, v)| v.may_assign_to(location)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_may_assign_to() {
        let x = Variable::local("x", 0);
        let y = Variable::local("y", 1);
        let assign_x = Expression::assign(Expression::var(&x), Expression::number(1.0));

        assert!(assign_x.may_assign_to(x.location));
        assert!(!assign_x.may_assign_to(y.location));

        let nested = Expression::binary(
            BinaryOp::Add,
            Expression::var(&y),
            Expression::call(Expression::var(&y), vec![Expression::count(CountOp::Increment, false, Expression::var(&x))]),
        );
        assert!(nested.may_assign_to(x.location));
        assert!(!Expression::var(&x).may_assign_to(x.location));
    }
}
