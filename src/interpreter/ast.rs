use std::sync::Arc;

/// Parsed script: a sequence of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements in source order.
    pub body: Vec<Stmt>,
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let`/`var`/`const` binding.
    Declare {
        /// Bound name.
        name: String,
        /// Optional initialiser.
        init: Option<Expr>,
    },
    /// Named function declaration (hoisted).
    Function(Arc<FunctionDecl>),
    /// `return expr;`
    Return(Option<Expr>),
    /// `if (cond) then else otherwise`
    If {
        /// Condition.
        cond: Expr,
        /// Taken branch.
        then: Box<Stmt>,
        /// Optional else branch.
        otherwise: Option<Box<Stmt>>,
    },
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// `throw expr;`
    Throw(Expr),
    /// Expression evaluated for its value.
    Expr(Expr),
    /// Lone `;`
    Empty,
}

/// Function literal or declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Declared name, if any.
    pub name: Option<String>,
    /// Parameter names.
    pub params: Vec<String>,
    /// Body statements.
    pub body: Vec<Stmt>,
    /// Exact source text of the function.
    pub source: String,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `!x`
    Not,
    /// `typeof x`
    TypeOf,
}

/// Binary operators.
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
    Rem,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `in`
    In,
    /// `instanceof`
    InstanceOf,
}

/// Short-circuit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal.
    Number(f64),
    /// String literal.
    String(String),
    /// `true`/`false`.
    Boolean(bool),
    /// `null`.
    Null,
    /// `undefined`.
    Undefined,
    /// Identifier reference.
    Ident(String),
    /// `this`.
    This,
    /// `[a, b]`
    Array(Vec<Expr>),
    /// `{ key: value }`
    Object(Vec<(String, Expr)>),
    /// `function (...) { ... }`
    Function(Arc<FunctionDecl>),
    /// `object.key` or `object[key]`.
    Member {
        /// Receiver expression.
        object: Box<Expr>,
        /// Property key expression.
        property: Box<Expr>,
    },
    /// `callee(args)`
    Call {
        /// Callee.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// `new callee(args)`
    New {
        /// Constructor.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Short-circuit operation.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `cond ? a : b`
    Conditional {
        /// Condition.
        cond: Box<Expr>,
        /// Value when truthy.
        then: Box<Expr>,
        /// Value when falsy.
        otherwise: Box<Expr>,
    },
    /// `target = value`
    Assign {
        /// Identifier or member target.
        target: Box<Expr>,
        /// Assigned value.
        value: Box<Expr>,
    },
}
