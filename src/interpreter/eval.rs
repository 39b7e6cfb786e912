use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ast::{BinaryOp, Expr, FunctionDecl, LogicalOp, Program, Stmt, UnaryOp};
use super::realm::{Realm, to_json};
use super::scope::Scope;
use super::value::{
    Function, FunctionBody, KernelOp, MAX_PROTOTYPE_DEPTH, NativeArgs, Object, ObjectKind,
    ObjectRef, Value, check_string_length,
};
use super::{EvalError, InterpreterHost, Result};
use crate::inspect::{self, DEFAULT_DEPTH};

/// Default limit on evaluator recursion: nested statements, expressions
/// and script calls all count against it. Sized to fit a 2 MiB thread stack.
pub const DEFAULT_MAX_DEPTH: usize = 96;

const THIS_BINDING: &str = "this";

enum Flow {
    Normal(Option<Value>),
    Return(Value),
}

/// Evaluates one parsed program against a realm.
///
/// Kernel operations (`$$.*`, `console.log`) are forwarded to the host; a
/// `$$.request` suspends the evaluation until the front-end replies.
pub struct Interpreter<'a> {
    realm: &'a Realm,
    host: &'a dyn InterpreterHost,
    depth: AtomicUsize,
    max_depth: usize,
}

/// One level of evaluator recursion, released on drop.
struct Frame<'a>(&'a AtomicUsize);

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<'a> Interpreter<'a> {
    /// Bind an interpreter to a realm and host.
    pub fn new(realm: &'a Realm, host: &'a dyn InterpreterHost) -> Self {
        Self::with_max_depth(realm, host, DEFAULT_MAX_DEPTH)
    }

    /// Bind an interpreter with an explicit recursion limit.
    pub fn with_max_depth(
        realm: &'a Realm,
        host: &'a dyn InterpreterHost,
        max_depth: usize,
    ) -> Self {
        Self {
            realm,
            host,
            depth: AtomicUsize::new(0),
            max_depth,
        }
    }

    fn enter(&self) -> Result<Frame<'_>> {
        let frame = Frame(&self.depth);
        if self.depth.fetch_add(1, Ordering::SeqCst) >= self.max_depth {
            return Err(EvalError::Range(
                "Maximum call stack size exceeded".to_string(),
            ));
        }
        Ok(frame)
    }

    /// Run a program in the realm's global scope and return the completion
    /// value of its last expression statement.
    pub async fn run(&self, program: &Program) -> Result<Value> {
        let globals = self.realm.globals().clone();
        match self.exec_block(&program.body, &globals).await? {
            Flow::Normal(value) => Ok(value.unwrap_or_default()),
            Flow::Return(_) => Err(EvalError::Syntax("Illegal return statement".to_string())),
        }
    }

    fn hoist(&self, body: &[Stmt], scope: &Scope) {
        for stmt in body {
            if let Stmt::Function(decl) = stmt {
                if let Some(name) = &decl.name {
                    scope.declare(name.clone(), self.closure(decl, scope));
                }
            }
        }
    }

    fn closure(&self, decl: &Arc<FunctionDecl>, scope: &Scope) -> Value {
        let function = Function {
            name: decl.name.clone().unwrap_or_default(),
            arity: decl.params.len(),
            source: decl.source.clone(),
            body: FunctionBody::Script {
                decl: decl.clone(),
                scope: scope.clone(),
            },
        };
        Value::Object(self.realm.new_function(function))
    }

    fn exec_block<'b>(&'b self, body: &'b [Stmt], scope: &'b Scope) -> BoxFuture<'b, Result<Flow>> {
        async move {
            let _frame = self.enter()?;
            self.hoist(body, scope);
            let mut completion = None;
            for stmt in body {
                match self.exec_stmt(stmt, scope).await? {
                    Flow::Normal(Some(value)) => completion = Some(value),
                    Flow::Normal(None) => {}
                    flow @ Flow::Return(_) => return Ok(flow),
                }
            }
            Ok(Flow::Normal(completion))
        }
        .boxed()
    }

    fn exec_stmt<'b>(&'b self, stmt: &'b Stmt, scope: &'b Scope) -> BoxFuture<'b, Result<Flow>> {
        async move {
            let _frame = self.enter()?;
            match stmt {
                Stmt::Declare { name, init } => {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope).await?,
                        None => Value::Undefined,
                    };
                    scope.declare(name.clone(), value);
                    Ok(Flow::Normal(None))
                }
                Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal(None)),
                Stmt::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval(expr, scope).await?,
                        None => Value::Undefined,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval(cond, scope).await?.truthy() {
                        self.exec_stmt(then, scope).await
                    } else if let Some(otherwise) = otherwise {
                        self.exec_stmt(otherwise, scope).await
                    } else {
                        Ok(Flow::Normal(None))
                    }
                }
                Stmt::Block(body) => self.exec_block(body, scope).await,
                Stmt::Throw(expr) => {
                    let value = self.eval(expr, scope).await?;
                    Err(EvalError::thrown(&value))
                }
                Stmt::Expr(expr) => Ok(Flow::Normal(Some(self.eval(expr, scope).await?))),
            }
        }
        .boxed()
    }

    fn eval<'b>(&'b self, expr: &'b Expr, scope: &'b Scope) -> BoxFuture<'b, Result<Value>> {
        async move {
            let _frame = self.enter()?;
            match expr {
                Expr::Number(num) => Ok(Value::Number(*num)),
                Expr::String(text) => Ok(Value::String(text.clone())),
                Expr::Boolean(flag) => Ok(Value::Boolean(*flag)),
                Expr::Null => Ok(Value::Null),
                Expr::Undefined => Ok(Value::Undefined),
                Expr::Ident(name) => scope
                    .lookup(name)
                    .ok_or_else(|| EvalError::Reference(name.clone())),
                Expr::This => Ok(scope.lookup(THIS_BINDING).unwrap_or_default()),
                Expr::Array(items) => {
                    let values = self.eval_list(items, scope).await?;
                    Ok(Value::Object(self.realm.new_array(values)))
                }
                Expr::Object(entries) => {
                    let object = self.realm.new_object();
                    for (key, expr) in entries {
                        let value = self.eval(expr, scope).await?;
                        object.set(key.clone(), value)?;
                    }
                    Ok(Value::Object(object))
                }
                Expr::Function(decl) => Ok(self.closure(decl, scope)),
                Expr::Member { object, property } => {
                    let target = self.eval(object, scope).await?;
                    let key = self.property_key(property, scope).await?;
                    self.realm.get_property(&target, &key)
                }
                Expr::Call { callee, args } => {
                    let (function, this) = match callee.as_ref() {
                        Expr::Member { object, property } => {
                            let target = self.eval(object, scope).await?;
                            let key = self.property_key(property, scope).await?;
                            (self.realm.get_property(&target, &key)?, target)
                        }
                        other => (self.eval(other, scope).await?, Value::Undefined),
                    };
                    let args = self.eval_list(args, scope).await?;
                    if !function.is_callable() {
                        return Err(EvalError::Type(format!(
                            "{} is not a function",
                            describe(callee)
                        )));
                    }
                    self.call(function, this, args).await
                }
                Expr::New { callee, args } => {
                    let constructor = self.eval(callee, scope).await?;
                    let args = self.eval_list(args, scope).await?;
                    self.construct(constructor, args, callee).await
                }
                Expr::Unary { op, operand } => {
                    if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, operand.as_ref()) {
                        let value = scope.lookup(name).unwrap_or_default();
                        return Ok(Value::string(value.type_of()));
                    }
                    let value = self.eval(operand, scope).await?;
                    Ok(match op {
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                        UnaryOp::Not => Value::Boolean(!value.truthy()),
                        UnaryOp::TypeOf => Value::string(value.type_of()),
                    })
                }
                Expr::Binary { op, left, right } => {
                    let left = self.eval(left, scope).await?;
                    let right = self.eval(right, scope).await?;
                    binary(*op, left, right)
                }
                Expr::Logical { op, left, right } => {
                    let left = self.eval(left, scope).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left.truthy(),
                        LogicalOp::Or => left.truthy(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(right, scope).await
                    }
                }
                Expr::Conditional {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval(cond, scope).await?.truthy() {
                        self.eval(then, scope).await
                    } else {
                        self.eval(otherwise, scope).await
                    }
                }
                Expr::Assign { target, value } => match target.as_ref() {
                    Expr::Ident(name) => {
                        let value = self.eval(value, scope).await?;
                        if !scope.assign(name, value.clone()) {
                            self.realm.globals().declare(name.clone(), value.clone());
                        }
                        Ok(value)
                    }
                    Expr::Member { object, property } => {
                        let target = self.eval(object, scope).await?;
                        let key = self.property_key(property, scope).await?;
                        let value = self.eval(value, scope).await?;
                        self.realm.set_property(&target, &key, value.clone())?;
                        Ok(value)
                    }
                    _ => Err(EvalError::Syntax(
                        "Invalid left-hand side in assignment".to_string(),
                    )),
                },
            }
        }
        .boxed()
    }

    async fn eval_list(&self, exprs: &[Expr], scope: &Scope) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(expr, scope).await?);
        }
        Ok(values)
    }

    async fn property_key(&self, property: &Expr, scope: &Scope) -> Result<String> {
        if let Expr::String(key) = property {
            return Ok(key.clone());
        }
        let key = self.eval(property, scope).await?;
        Ok(key.to_primitive().to_display_string())
    }

    /// Call a function value with an explicit receiver.
    pub async fn call_function(&self, function: Value, this: Value, args: Vec<Value>) -> Result<Value> {
        self.call(function, this, args).await
    }

    fn call<'b>(
        &'b self,
        function: Value,
        this: Value,
        args: Vec<Value>,
    ) -> BoxFuture<'b, Result<Value>> {
        async move {
            let _frame = self.enter()?;
            let Some(record) = function.as_object().and_then(ObjectRef::function) else {
                return Err(EvalError::Type(format!(
                    "{} is not a function",
                    function.to_display_string()
                )));
            };
            match record.body {
                FunctionBody::Native(native) => native(NativeArgs {
                    realm: self.realm,
                    this: &this,
                    args: &args,
                    construct: false,
                }),
                FunctionBody::Kernel(op) => self.kernel(op, args).await,
                FunctionBody::Script { decl, scope } => {
                    self.call_script(&decl, &scope, this, args).await
                }
            }
        }
        .boxed()
    }

    async fn call_script(
        &self,
        decl: &FunctionDecl,
        closure: &Scope,
        this: Value,
        args: Vec<Value>,
    ) -> Result<Value> {
        let scope = closure.child();
        scope.declare(THIS_BINDING, this);
        for (index, param) in decl.params.iter().enumerate() {
            scope.declare(param.clone(), args.get(index).cloned().unwrap_or_default());
        }
        self.exec_block(&decl.body, &scope)
            .await
            .map(|flow| match flow {
                Flow::Return(value) => value,
                Flow::Normal(_) => Value::Undefined,
            })
    }

    async fn construct(&self, constructor: Value, args: Vec<Value>, callee: &Expr) -> Result<Value> {
        let not_constructor = || EvalError::Type(format!("{} is not a constructor", describe(callee)));
        let Some(object) = constructor.as_object() else {
            return Err(not_constructor());
        };
        let Some(record) = object.function() else {
            return Err(not_constructor());
        };
        match record.body {
            FunctionBody::Native(native) => native(NativeArgs {
                realm: self.realm,
                this: &Value::Undefined,
                args: &args,
                construct: true,
            }),
            FunctionBody::Kernel(_) => Err(not_constructor()),
            FunctionBody::Script { decl, scope } => {
                let prototype = match object.get("prototype") {
                    Some(Value::Object(prototype)) => prototype,
                    _ => self.realm.object_prototype.clone(),
                };
                let instance = Value::Object(ObjectRef::new(Object::new(
                    ObjectKind::Ordinary,
                    Some(prototype),
                )));
                let result = self.call_script(&decl, &scope, instance.clone(), args).await?;
                Ok(match result {
                    Value::Object(_) => result,
                    _ => instance,
                })
            }
        }
    }

    async fn kernel(&self, op: KernelOp, args: Vec<Value>) -> Result<Value> {
        let first = args.first().cloned().unwrap_or_default();
        match op {
            KernelOp::Async => {
                self.host.set_async();
                Ok(Value::Boolean(true))
            }
            KernelOp::SendResult | KernelOp::Done => {
                self.host.send_result(first);
                Ok(Value::Undefined)
            }
            KernelOp::SendError => {
                self.host.send_error(EvalError::thrown(&first));
                Ok(Value::Undefined)
            }
            KernelOp::Request => {
                let payload = to_json(&first)?.unwrap_or(serde_json::Value::Null);
                let reply = self.host.request(payload).await?;
                Ok(self.realm.from_json(&reply))
            }
            KernelOp::ConsoleLog => {
                let line = args
                    .iter()
                    .map(|arg| match arg {
                        Value::String(text) => text.clone(),
                        other => inspect::render(other, DEFAULT_DEPTH),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                self.host.write_stdout(format!("{line}\n"));
                Ok(Value::Undefined)
            }
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    Ok(match op {
        BinaryOp::Add => {
            let left = left.to_primitive();
            let right = right.to_primitive();
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                let left = left.to_display_string();
                let right = right.to_display_string();
                check_string_length(left.len() + right.len())?;
                Value::String(left + &right)
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Value::Boolean(compare(op, &left, &right))
        }
        BinaryOp::StrictEq => Value::Boolean(left.strict_equals(&right)),
        BinaryOp::StrictNe => Value::Boolean(!left.strict_equals(&right)),
        BinaryOp::Eq => Value::Boolean(left.loose_equals(&right)),
        BinaryOp::Ne => Value::Boolean(!left.loose_equals(&right)),
        BinaryOp::In => {
            let Value::Object(object) = &right else {
                return Err(EvalError::Type(format!(
                    "Cannot use 'in' operator to search for '{}' in {}",
                    left.to_display_string(),
                    right.to_display_string()
                )));
            };
            Value::Boolean(object.has(&left.to_primitive().to_display_string()))
        }
        BinaryOp::InstanceOf => instance_of(&left, &right)?,
    })
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    let left = left.to_primitive();
    let right = right.to_primitive();
    let ordering = match (&left, &right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

fn instance_of(value: &Value, constructor: &Value) -> Result<Value> {
    let Some(constructor) = constructor.as_object().filter(|object| object.is_callable()) else {
        return Err(EvalError::Type(
            "Right-hand side of 'instanceof' is not callable".to_string(),
        ));
    };
    let Some(Value::Object(prototype)) = constructor.get("prototype") else {
        return Err(EvalError::Type(
            "Function has non-object prototype in instanceof check".to_string(),
        ));
    };
    let Value::Object(object) = value else {
        return Ok(Value::Boolean(false));
    };
    let mut visited = Vec::new();
    let mut cursor = object.prototype();
    while let Some(link) = cursor {
        if link.ptr_eq(&prototype) {
            return Ok(Value::Boolean(true));
        }
        if visited.contains(&link.id()) || visited.len() >= MAX_PROTOTYPE_DEPTH {
            break;
        }
        visited.push(link.id());
        cursor = link.prototype();
    }
    Ok(Value::Boolean(false))
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::This => "this".to_string(),
        Expr::Member { object, property } => match property.as_ref() {
            Expr::String(key) => format!("{}.{}", describe(object), key),
            _ => format!("{}[...]", describe(object)),
        },
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::RecordingHost;
    use super::super::{ScriptEngine, parse_program};
    use super::*;

    async fn eval(code: &str) -> (Result<Value>, RecordingHost) {
        let realm = Realm::new();
        let host = RecordingHost::default();
        let result = ScriptEngine::new().evaluate(code, &realm, &host).await;
        (result, host)
    }

    #[tokio::test]
    async fn arithmetic_and_completion_value() {
        let (result, _) = eval("let a = 2; a * 3 + 1").await;
        assert_eq!(result.unwrap(), Value::Number(7.0));
        let (result, _) = eval("'a' + 1 + 2").await;
        assert_eq!(result.unwrap(), Value::string("a12"));
        let (result, _) = eval("let x = 1;").await;
        assert_eq!(result.unwrap(), Value::Undefined);
    }

    #[tokio::test]
    async fn functions_closures_and_recursion() {
        let code = "
            function fact(n) { if (n <= 1) return 1; return n * fact(n - 1); }
            fact(5)
        ";
        let (result, _) = eval(code).await;
        assert_eq!(result.unwrap(), Value::Number(120.0));

        let code = "
            function counter() { let n = 0; return function () { n = n + 1; return n; }; }
            let next = counter(); next(); next()
        ";
        let (result, _) = eval(code).await;
        assert_eq!(result.unwrap(), Value::Number(2.0));
    }

    #[tokio::test]
    async fn constructors_and_instanceof() {
        let code = "
            function Point(x) { this.x = x; }
            let p = new Point(3);
            p instanceof Point && p.x === 3 && !(p instanceof Array)
        ";
        let (result, _) = eval(code).await;
        assert_eq!(result.unwrap(), Value::Boolean(true));
    }

    #[tokio::test]
    async fn runaway_recursion_is_a_range_error() {
        let (result, _) = eval("function f() { return f(); } f()").await;
        assert!(matches!(result, Err(EvalError::Range(_))));
    }

    #[tokio::test]
    async fn depth_limit_is_per_engine_and_released_after_errors() {
        let realm = Realm::new();
        let host = RecordingHost::default();
        let code = "function down(n) { if (n == 0) return 0; return down(n - 1) + 1; }";
        ScriptEngine::new().evaluate(code, &realm, &host).await.unwrap();

        let shallow = ScriptEngine::with_max_depth(24);
        let result = shallow.evaluate("down(40)", &realm, &host).await;
        assert_eq!(
            result.unwrap_err(),
            EvalError::Range("Maximum call stack size exceeded".into())
        );
        let value = shallow.evaluate("down(1)", &realm, &host).await.unwrap();
        assert_eq!(value, Value::Number(1.0));

        let value = ScriptEngine::new().evaluate("down(10)", &realm, &host).await.unwrap();
        assert_eq!(value, Value::Number(10.0));
        let result = ScriptEngine::new().evaluate("down(500)", &realm, &host).await;
        assert!(matches!(result, Err(EvalError::Range(_))));
    }

    #[tokio::test]
    async fn huge_array_lengths_are_range_errors() {
        let invalid = EvalError::Range("Invalid array length".into());
        for code in [
            "new Array(4294967295)",
            "let a = []; a.length = 4e9",
            "let a = []; a[4e9] = 1",
            "new Array(-1)",
        ] {
            let (result, _) = eval(code).await;
            assert_eq!(result.unwrap_err(), invalid, "{code}");
        }

        let (result, _) = eval("let a = [1]; a.length = 3; a.length").await;
        assert_eq!(result.unwrap(), Value::Number(3.0));
    }

    #[tokio::test]
    async fn unbound_names_and_bad_calls() {
        let (result, _) = eval("missing + 1").await;
        assert_eq!(result.unwrap_err(), EvalError::Reference("missing".into()));
        let (result, _) = eval("let o = {}; o.nope()").await;
        assert_eq!(
            result.unwrap_err(),
            EvalError::Type("o.nope is not a function".into())
        );
        let (result, _) = eval("typeof missing").await;
        assert_eq!(result.unwrap(), Value::string("undefined"));
    }

    #[tokio::test]
    async fn throw_reports_error_name_and_message() {
        let (result, _) = eval("throw new Error('boom')").await;
        assert_eq!(
            result.unwrap_err(),
            EvalError::Thrown {
                ename: "Error".into(),
                evalue: "boom".into()
            }
        );
        let (result, _) = eval("throw 5").await;
        assert_eq!(result.unwrap_err().ename(), "Uncaught");
    }

    #[tokio::test]
    async fn kernel_operations_reach_the_host() {
        let (result, host) = eval("$$.async(); console.log('x', 1); $$.sendResult(42)").await;
        assert!(result.is_ok());
        assert!(*host.async_marked.lock());
        assert_eq!(host.stdout.lock().as_slice(), ["x 1\n".to_string()]);
        assert_eq!(host.results.lock().as_slice(), [Value::Number(42.0)]);
    }

    #[tokio::test]
    async fn request_suspends_until_reply() {
        let (result, _) = eval("let r = $$.request({ q: 1 }); r.echo.q").await;
        assert_eq!(result.unwrap(), Value::Number(1.0));
    }

    #[tokio::test]
    async fn globals_persist_across_runs_in_one_realm() {
        let realm = Realm::new();
        let host = RecordingHost::default();
        let engine = ScriptEngine::new();
        engine.evaluate("var total = 10", &realm, &host).await.unwrap();
        let value = engine.evaluate("total + 1", &realm, &host).await.unwrap();
        assert_eq!(value, Value::Number(11.0));
    }

    #[test]
    fn top_level_return_is_rejected() {
        let program = parse_program("return 1").unwrap();
        let realm = Realm::new();
        let host = RecordingHost::default();
        let result = futures::executor::block_on(Interpreter::new(&realm, &host).run(&program));
        assert!(matches!(result, Err(EvalError::Syntax(_))));
    }
}
