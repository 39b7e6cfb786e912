//! Evaluation contexts and the registry that owns them.
//!
//! A [`Context`] bundles everything one conversation needs: its id, the
//! per-run `done`/`async` flags, its realm of global bindings, its reply
//! correlator and the capability to write frames to the channel.

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::display::DisplayEncoder;
use super::error::{KernelError, KernelResult};
use super::protocol::{ErrorPayload, Frame, Outbox};
use super::requester::Requester;
use crate::interpreter::{self, EvalError, InterpreterHost, Realm, Value};

/// Per-context settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextConfig {
    /// Deliver run results through the low-level `$$` sender.
    pub await_execution: bool,
}

/// Per-conversation evaluation state.
pub struct Context {
    id: String,
    config: ContextConfig,
    done: AtomicBool,
    async_mode: AtomicBool,
    outbox: Outbox,
    requester: Requester,
    realm: Realm,
    encoder: &'static DisplayEncoder,
}

impl Context {
    /// Create a context writing to `outbox`.
    pub fn new(id: impl Into<String>, config: ContextConfig, outbox: Outbox) -> Self {
        let id = id.into();
        Self {
            requester: Requester::new(id.clone(), outbox.clone()),
            id,
            config,
            done: AtomicBool::new(false),
            async_mode: AtomicBool::new(false),
            outbox,
            realm: Realm::new(),
            encoder: DisplayEncoder::global(),
        }
    }

    /// Context id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Context settings.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Global bindings and intrinsics of this context.
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Reply correlator scoped to this context.
    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// True once a terminal result or error has been sent for the current run.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// True once the running code opted into asynchronous delivery.
    pub fn is_async(&self) -> bool {
        self.async_mode.load(Ordering::SeqCst)
    }

    /// Set or clear asynchronous delivery.
    pub fn set_async_mode(&self, enabled: bool) {
        self.async_mode.store(enabled, Ordering::SeqCst);
    }

    /// Reset the per-run flags. Called before every `run`.
    pub fn begin_run(&self) {
        self.done.store(false, Ordering::SeqCst);
        self.async_mode.store(false, Ordering::SeqCst);
    }

    /// Write a frame to the channel.
    pub fn send(&self, frame: Frame) {
        self.outbox.send(frame);
    }

    /// Send the terminal result of the current run. Dropped when one has
    /// already been sent.
    pub fn send_result(&self, value: &Value) {
        if self.done.swap(true, Ordering::SeqCst) {
            warn!(context = %self.id, "result already sent; dropping");
            return;
        }
        self.write_result(value);
    }

    /// Send the terminal error of the current run. Dropped when a terminal
    /// frame has already been sent.
    pub fn send_error(&self, error: &KernelError) {
        if self.done.swap(true, Ordering::SeqCst) {
            warn!(context = %self.id, %error, "result already sent; dropping error");
            return;
        }
        self.write_error(error);
    }

    /// Low-level `$$` sender.
    pub fn core(&self) -> ContextCore<'_> {
        ContextCore { context: self }
    }

    fn write_result(&self, value: &Value) {
        self.send(Frame::Result {
            id: self.id.clone(),
            mime: self.encoder.encode(value),
        });
    }

    fn write_error(&self, error: &KernelError) {
        self.send(Frame::Error {
            id: self.id.clone(),
            error: ErrorPayload::new(error.ename(), error.evalue()),
        });
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("done", &self.is_done())
            .field("async", &self.is_async())
            .finish_non_exhaustive()
    }
}

/// The `$$` sender: writes unconditionally and marks the run done.
#[derive(Debug, Clone, Copy)]
pub struct ContextCore<'a> {
    context: &'a Context,
}

impl ContextCore<'_> {
    /// Settings of the underlying context.
    pub fn config(&self) -> &ContextConfig {
        &self.context.config
    }

    /// Send a result frame.
    pub fn send_result(&self, value: &Value) {
        self.context.done.store(true, Ordering::SeqCst);
        self.context.write_result(value);
    }

    /// Send an error frame.
    pub fn send_error(&self, error: &KernelError) {
        self.context.done.store(true, Ordering::SeqCst);
        self.context.write_error(error);
    }
}

impl InterpreterHost for Context {
    fn set_async(&self) {
        self.set_async_mode(true);
    }

    fn send_result(&self, value: Value) {
        Context::send_result(self, &value);
    }

    fn send_error(&self, error: EvalError) {
        Context::send_error(self, &KernelError::Evaluation(error));
    }

    fn write_stdout(&self, text: String) {
        self.send(Frame::Stdout {
            id: self.id.clone(),
            text,
        });
    }

    fn request(&self, payload: JsonValue) -> BoxFuture<'_, interpreter::Result<JsonValue>> {
        Box::pin(async move {
            self.requester
                .send(payload)
                .await
                .map_err(|error| EvalError::Request(error.to_string()))
        })
    }
}

/// Looks up or constructs contexts by id.
pub trait ContextManager: Send + Sync {
    /// Return the context for `id`. When it does not exist, `on_missing` runs
    /// first; its error aborts resolution.
    fn resolve(
        &self,
        id: &str,
        on_missing: &dyn Fn() -> KernelResult<()>,
    ) -> KernelResult<Arc<Context>>;
}

/// In-memory context table creating contexts on first use.
pub struct ContextRegistry {
    contexts: RwLock<HashMap<String, Arc<Context>>>,
    defaults: ContextConfig,
    outbox: Outbox,
}

impl ContextRegistry {
    /// Create an empty registry; new contexts get `defaults`.
    pub fn new(defaults: ContextConfig, outbox: Outbox) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            defaults,
            outbox,
        }
    }

    /// Existing context, if any.
    pub fn get(&self, id: &str) -> Option<Arc<Context>> {
        self.contexts.read().get(id).cloned()
    }

    /// Create (or replace) a context with explicit settings.
    pub fn create(&self, id: &str, config: ContextConfig) -> Arc<Context> {
        let context = Arc::new(Context::new(id, config, self.outbox.clone()));
        self.contexts
            .write()
            .insert(id.to_string(), context.clone());
        context
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    /// True when no context exists.
    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

impl ContextManager for ContextRegistry {
    fn resolve(
        &self,
        id: &str,
        on_missing: &dyn Fn() -> KernelResult<()>,
    ) -> KernelResult<Arc<Context>> {
        if let Some(context) = self.get(id) {
            return Ok(context);
        }
        on_missing()?;
        let mut contexts = self.contexts.write();
        let context = contexts
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(context = %id, "creating context");
                Arc::new(Context::new(id, self.defaults, self.outbox.clone()))
            })
            .clone();
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_sender_delivers_once_per_run() {
        let (outbox, mut frames) = Outbox::channel();
        let context = Context::new("c", ContextConfig::default(), outbox);
        context.send_result(&Value::Number(1.0));
        context.send_result(&Value::Number(2.0));
        assert!(context.is_done());
        assert!(matches!(frames.try_recv(), Ok(Frame::Result { .. })));
        assert!(frames.try_recv().is_err());

        context.begin_run();
        assert!(!context.is_done());
        context.core().send_result(&Value::Null);
        context.core().send_result(&Value::Null);
        assert!(frames.try_recv().is_ok());
        assert!(frames.try_recv().is_ok());
    }

    #[test]
    fn registry_runs_fallback_only_for_missing_contexts() {
        let (outbox, _frames) = Outbox::channel();
        let registry = ContextRegistry::new(ContextConfig::default(), outbox);
        let refuse = || -> KernelResult<()> {
            Err(KernelError::MissingContextForReply("c".into()))
        };

        assert!(matches!(
            registry.resolve("c", &refuse),
            Err(KernelError::MissingContextForReply(_))
        ));
        assert!(registry.is_empty());

        let first = registry.resolve("c", &|| Ok(())).unwrap();
        let again = registry.resolve("c", &refuse).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.len(), 1);
    }
}
