//! Script engine used as the default evaluator.
//!
//! Source text is parsed into a small statement/expression tree and walked by
//! an async interpreter. Everything that must leave the realm (results,
//! errors, console output, requests to the front-end) goes through an
//! [`InterpreterHost`], so the engine itself knows nothing about the wire.

/// Abstract syntax tree definitions for the script language.
pub mod ast;
/// Async tree-walking evaluator.
pub mod eval;
/// Parser for the script language.
pub mod parser;
/// Intrinsic objects and global bindings.
pub mod realm;
/// Lexical scopes.
pub mod scope;
/// Runtime values.
pub mod value;

pub use ast::{Expr, Program, Stmt};
pub use eval::{DEFAULT_MAX_DEPTH, Interpreter};
pub use parser::parse_program;
pub use realm::{Realm, to_json};
pub use scope::Scope;
pub use value::{ObjectKind, ObjectRef, Primitive, Value};

use futures::future::BoxFuture;
use thiserror::Error;

/// Convenience result alias for interpreter operations.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors raised while parsing or evaluating code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Source text could not be parsed.
    #[error("SyntaxError: {0}")]
    Syntax(String),

    /// An unbound identifier was read.
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    /// Operation applied to a value of the wrong type.
    #[error("TypeError: {0}")]
    Type(String),

    /// Numeric argument or recursion depth out of range.
    #[error("RangeError: {0}")]
    Range(String),

    /// A value raised by `throw` or `$$.sendError`.
    #[error("{ename}: {evalue}")]
    Thrown {
        /// Error class name.
        ename: String,
        /// Error message or rendering of the thrown value.
        evalue: String,
    },

    /// A front-end request failed or was abandoned.
    #[error("RequestError: {0}")]
    Request(String),
}

impl EvalError {
    /// Error class name reported on the wire.
    pub fn ename(&self) -> &str {
        match self {
            EvalError::Syntax(_) => "SyntaxError",
            EvalError::Reference(_) => "ReferenceError",
            EvalError::Type(_) => "TypeError",
            EvalError::Range(_) => "RangeError",
            EvalError::Thrown { ename, .. } => ename,
            EvalError::Request(_) => "RequestError",
        }
    }

    /// Error message reported on the wire.
    pub fn evalue(&self) -> String {
        match self {
            EvalError::Reference(name) => format!("{name} is not defined"),
            EvalError::Syntax(msg)
            | EvalError::Type(msg)
            | EvalError::Range(msg)
            | EvalError::Request(msg) => msg.clone(),
            EvalError::Thrown { evalue, .. } => evalue.clone(),
        }
    }

    /// Build the error for a thrown value. Error objects contribute their
    /// `name` and `message`; anything else is reported as `Uncaught`.
    pub fn thrown(value: &Value) -> Self {
        let error_object = value
            .as_object()
            .filter(|object| matches!(object.read().kind, ObjectKind::Error));
        if let Some(object) = error_object {
            let ename = object
                .get("name")
                .map(|v| v.to_display_string())
                .unwrap_or_else(|| "Error".to_string());
            let evalue = object
                .get("message")
                .map(|v| v.to_display_string())
                .unwrap_or_default();
            return EvalError::Thrown { ename, evalue };
        }
        EvalError::Thrown {
            ename: "Uncaught".to_string(),
            evalue: crate::inspect::render(value, crate::inspect::DEFAULT_DEPTH),
        }
    }
}

/// Hooks the evaluator uses to reach the hosting context.
pub trait InterpreterHost: Send + Sync {
    /// Mark the running execution as asynchronous (`$$.async()`).
    fn set_async(&self);
    /// Deliver a result value (`$$.sendResult`, `$$.done`).
    fn send_result(&self, value: Value);
    /// Deliver an error (`$$.sendError`).
    fn send_error(&self, error: EvalError);
    /// Forward console output.
    fn write_stdout(&self, text: String);
    /// Issue a request to the front-end and wait for its reply.
    fn request(&self, payload: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Parses and evaluates source text against a realm.
#[derive(Debug, Clone, Copy)]
pub struct ScriptEngine {
    max_depth: usize,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    /// Create the engine with the default recursion limit.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Create the engine with an explicit recursion limit. Callers raising it
    /// above [`DEFAULT_MAX_DEPTH`] must run evaluation on a larger stack.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Recursion limit handed to each evaluation.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Parse `code` and evaluate it, returning the completion value.
    pub async fn evaluate(
        &self,
        code: &str,
        realm: &Realm,
        host: &dyn InterpreterHost,
    ) -> Result<Value> {
        let program = parse_program(code)?;
        Interpreter::with_max_depth(realm, host, self.max_depth)
            .run(&program)
            .await
    }

    /// Call `function` with `this` bound to `receiver`.
    pub async fn call(
        &self,
        function: Value,
        receiver: Value,
        args: Vec<Value>,
        realm: &Realm,
        host: &dyn InterpreterHost,
    ) -> Result<Value> {
        Interpreter::with_max_depth(realm, host, self.max_depth)
            .call_function(function, receiver, args)
            .await
    }
}
