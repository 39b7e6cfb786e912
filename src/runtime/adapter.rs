//! Execution adapter
//!
//! The dispatcher never evaluates code itself; it goes through an
//! [`Evaluator`], handing it the target context explicitly.

use futures::future::BoxFuture;
use tracing::debug;

use super::context::Context;
use super::error::KernelResult;
use crate::interpreter::{self, ScriptEngine, Value};

/// Sandboxed-evaluation primitive.
pub trait Evaluator: Send + Sync {
    /// Evaluate `code` against `context` and return its completion value.
    /// The future may suspend, e.g. while waiting for a correlator reply.
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        context: &'a Context,
    ) -> BoxFuture<'a, interpreter::Result<Value>>;

    /// Call a function value from `context` with `this` bound to `receiver`.
    fn call<'a>(
        &'a self,
        function: Value,
        receiver: Value,
        context: &'a Context,
    ) -> BoxFuture<'a, interpreter::Result<Value>>;
}

impl Evaluator for ScriptEngine {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        context: &'a Context,
    ) -> BoxFuture<'a, interpreter::Result<Value>> {
        Box::pin(ScriptEngine::evaluate(self, code, context.realm(), context))
    }

    fn call<'a>(
        &'a self,
        function: Value,
        receiver: Value,
        context: &'a Context,
    ) -> BoxFuture<'a, interpreter::Result<Value>> {
        Box::pin(ScriptEngine::call(
            self,
            function,
            receiver,
            Vec::new(),
            context.realm(),
            context,
        ))
    }
}

/// Result of the value's own `valueOf`, when it is an object with a callable
/// one. Failures inside `valueOf` yield `None`.
pub async fn value_of(evaluator: &dyn Evaluator, value: &Value, context: &Context) -> Option<Value> {
    let object = value.as_object().filter(|object| !object.is_callable())?;
    let method = object.get("valueOf").filter(Value::is_callable)?;
    match evaluator.call(method, value.clone(), context).await {
        Ok(result) => Some(result),
        Err(error) => {
            debug!(%error, "valueOf failed; rendering the object itself");
            None
        }
    }
}

/// Run `code` in `context`, turning evaluation faults into kernel errors.
pub async fn run(evaluator: &dyn Evaluator, code: &str, context: &Context) -> KernelResult<Value> {
    Ok(evaluator.evaluate(code, context).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::ContextConfig;
    use crate::runtime::error::KernelError;
    use crate::runtime::protocol::Outbox;

    #[tokio::test]
    async fn evaluates_in_the_given_context() {
        let (outbox, _frames) = Outbox::channel();
        let first = Context::new("a", ContextConfig::default(), outbox.clone());
        let second = Context::new("b", ContextConfig::default(), outbox);
        let engine = ScriptEngine::new();

        run(&engine, "var x = 1", &first).await.unwrap();
        assert_eq!(run(&engine, "x", &first).await.unwrap(), Value::Number(1.0));
        assert!(matches!(
            run(&engine, "x", &second).await,
            Err(KernelError::Evaluation(_))
        ));
    }

    #[tokio::test]
    async fn value_of_calls_the_objects_own_method() {
        let (outbox, _frames) = Outbox::channel();
        let context = Context::new("a", ContextConfig::default(), outbox);
        let engine = ScriptEngine::new();

        let custom = run(&engine, "({ n: 41, valueOf: function () { return this.n + 1; } })", &context)
            .await
            .unwrap();
        assert_eq!(value_of(&engine, &custom, &context).await, Some(Value::Number(42.0)));

        let failing = run(&engine, "({ valueOf: function () { throw 1; } })", &context)
            .await
            .unwrap();
        assert_eq!(value_of(&engine, &failing, &context).await, None);
        assert_eq!(value_of(&engine, &Value::Number(3.0), &context).await, None);
    }
}
