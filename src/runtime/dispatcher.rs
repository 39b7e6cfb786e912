//! Message dispatcher
//!
//! Decoded messages are resolved to a context and routed to one of four
//! handlers. Every per-message failure is caught here and written through the
//! context's `$$` error sender; failures that leave no context to notify go
//! to the process fault channel instead.

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::adapter::{self, Evaluator};
use super::context::{Context, ContextManager};
use super::error::{KernelError, KernelResult, ProtocolError};
use super::protocol::{Action, Frame, Message, Outbox};
use crate::inspect;

/// How long in-flight messages may keep running once the inbound side closes.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Routes inbound messages to their handlers.
pub struct Dispatcher {
    contexts: Arc<dyn ContextManager>,
    evaluator: Arc<dyn Evaluator>,
    outbox: Outbox,
    debug: bool,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        contexts: Arc<dyn ContextManager>,
        evaluator: Arc<dyn Evaluator>,
        outbox: Outbox,
    ) -> Self {
        Self {
            contexts,
            evaluator,
            outbox,
            debug: false,
        }
    }

    /// Mirror received messages and faults as `log` frames.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Handle one message. Outcomes are observed only through sent frames.
    pub async fn on_message(&self, message: Message) {
        debug!(
            action = message.action.as_str(),
            context = %message.context_id,
            "received message"
        );
        self.log(|| format!("RECEIVED: {}", message.to_json()));

        let is_reply = message.action == Action::Reply;
        let context_id = message.context_id.clone();
        let on_missing = move || -> KernelResult<()> {
            if is_reply {
                Err(KernelError::MissingContextForReply(context_id.clone()))
            } else {
                Ok(())
            }
        };
        let context = match self.contexts.resolve(&message.context_id, &on_missing) {
            Ok(context) => context,
            Err(error) => {
                self.fault(&error);
                return;
            }
        };

        if let Err(error) = self.route(&message, &context).await {
            debug!(context = %context.id(), %error, "message failed");
            context.core().send_error(&error);
        }
    }

    async fn route(&self, message: &Message, context: &Context) -> KernelResult<()> {
        match &message.action {
            Action::GetAllPropertyNames => self.on_name_request(message.code()?, context).await,
            Action::Inspect => self.on_inspect_request(message.code()?, context).await,
            Action::Run => self.on_run_request(message.code()?, context).await,
            Action::Reply => self.on_reply(message, context),
            Action::Other(name) => Err(KernelError::UnhandledAction(name.clone())),
        }
    }

    /// Evaluate `code` and send the property names of its value.
    pub async fn on_name_request(&self, code: &str, context: &Context) -> KernelResult<()> {
        let value = adapter::run(self.evaluator.as_ref(), code, context).await?;
        context.send(Frame::Names {
            id: context.id().to_string(),
            names: inspect::property_names(context.realm(), &value),
        });
        Ok(())
    }

    /// Evaluate `code` and send an inspection of its value.
    pub async fn on_inspect_request(&self, code: &str, context: &Context) -> KernelResult<()> {
        let value = adapter::run(self.evaluator.as_ref(), code, context).await?;
        let value_of = adapter::value_of(self.evaluator.as_ref(), &value, context).await;
        context.send(Frame::Inspection {
            id: context.id().to_string(),
            inspection: inspect::classify_with_value_of(&value, value_of.as_ref()),
        });
        Ok(())
    }

    /// Evaluate `code` and deliver its value, unless the code already sent a
    /// result or switched to asynchronous delivery. Both flags are read when
    /// the evaluation settles.
    pub async fn on_run_request(&self, code: &str, context: &Context) -> KernelResult<()> {
        context.begin_run();
        let result = adapter::run(self.evaluator.as_ref(), code, context).await?;

        if context.is_done() {
            debug!(context = %context.id(), "result already sent by the code");
            return Ok(());
        }
        if context.is_async() {
            debug!(context = %context.id(), "async mode; leaving delivery to the code");
            return Ok(());
        }

        let core = context.core();
        if core.config().await_execution {
            core.send_result(&result);
        } else {
            context.send_result(&result);
        }
        Ok(())
    }

    /// Resume the request waiting on the message's request id.
    pub fn on_reply(&self, message: &Message, context: &Context) -> KernelResult<()> {
        let request_id = message
            .request_id
            .ok_or_else(|| ProtocolError::Shape("reply without a request id".to_string()))?;
        context
            .requester()
            .receive(request_id, message.body.clone())?;
        Ok(())
    }

    /// Report a fault that cannot be attributed to a context.
    pub fn fault(&self, error: &KernelError) {
        error!(%error, "uncaught fault");
        self.log(|| format!("UNCAUGHTEXCEPTION: {error}"));
        self.outbox.send(Frame::Stderr(error.to_string()));
    }

    /// Drive messages from `inbound` until it closes.
    ///
    /// In-flight messages are polled first; the next message is only taken
    /// once every in-flight one is suspended. After the inbound side closes,
    /// remaining work gets [`DRAIN_TIMEOUT`] to settle.
    pub async fn serve(&self, mut inbound: mpsc::Receiver<Message>) {
        let mut in_flight = FuturesUnordered::new();
        loop {
            tokio::select! {
                biased;
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
                message = inbound.recv() => match message {
                    Some(message) => in_flight.push(self.on_message_guarded(message)),
                    None => break,
                },
            }
        }

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while in_flight.next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(pending = in_flight.len(), "inbound closed; abandoning suspended messages");
        }
    }

    async fn on_message_guarded(&self, message: Message) {
        let context_id = message.context_id.clone();
        let outcome = AssertUnwindSafe(self.on_message(message))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            self.fault(&KernelError::Uncaught(format!(
                "{} (context {context_id})",
                panic_message(panic.as_ref())
            )));
        }
    }

    fn log(&self, line: impl FnOnce() -> String) {
        if self.debug {
            self.outbox.send(Frame::Log(line()));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{self, ScriptEngine, Value};
    use crate::runtime::context::{ContextConfig, ContextRegistry};
    use futures::future::BoxFuture;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn dispatcher() -> (Dispatcher, Arc<ContextRegistry>, UnboundedReceiver<Frame>) {
        let (outbox, frames) = Outbox::channel();
        let registry = Arc::new(ContextRegistry::new(ContextConfig::default(), outbox.clone()));
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(ScriptEngine::new()), outbox);
        (dispatcher, registry, frames)
    }

    fn drain(frames: &mut UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(frame) = frames.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn run_sends_exactly_one_result() {
        let (dispatcher, _, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::new(Action::Run, "1+1", "ctx1"))
            .await;
        let frames = drain(&mut frames);
        assert_eq!(frames.len(), 1);
        let Frame::Result { id, mime } = &frames[0] else {
            panic!("expected a result frame, got {frames:?}");
        };
        assert_eq!(id, "ctx1");
        assert_eq!(mime["text/plain"], "2");
    }

    #[tokio::test]
    async fn async_code_suppresses_the_default_result() {
        let (dispatcher, _, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::new(Action::Run, "$$.async(); 5", "ctx1"))
            .await;
        assert!(drain(&mut frames).is_empty());
    }

    #[tokio::test]
    async fn explicit_send_result_wins_over_completion_value() {
        let (dispatcher, _, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::new(Action::Run, "$$.sendResult('early'); 5", "ctx1"))
            .await;
        let frames = drain(&mut frames);
        assert_eq!(frames.len(), 1);
        let Frame::Result { mime, .. } = &frames[0] else {
            panic!("expected a result frame");
        };
        assert_eq!(mime["text/plain"], "'early'");
    }

    #[tokio::test]
    async fn flags_reset_between_runs() {
        let (dispatcher, _, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::new(Action::Run, "$$.async()", "ctx1"))
            .await;
        dispatcher
            .on_message(Message::new(Action::Run, "3", "ctx1"))
            .await;
        assert_eq!(drain(&mut frames).len(), 1);
    }

    #[tokio::test]
    async fn await_execution_uses_the_low_level_sender() {
        let (dispatcher, registry, mut frames) = dispatcher();
        registry.create(
            "ctx1",
            ContextConfig {
                await_execution: true,
            },
        );
        dispatcher
            .on_message(Message::new(Action::Run, "40 + 2", "ctx1"))
            .await;
        let frames = drain(&mut frames);
        assert!(matches!(&frames[..], [Frame::Result { .. }]));
        assert!(registry.get("ctx1").is_some_and(|c| c.is_done()));
    }

    #[tokio::test]
    async fn evaluation_faults_become_error_frames() {
        let (dispatcher, _, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::new(Action::Inspect, "nope", "ctx1"))
            .await;
        let frames = drain(&mut frames);
        let [Frame::Error { id, error }] = &frames[..] else {
            panic!("expected one error frame, got {frames:?}");
        };
        assert_eq!(id, "ctx1");
        assert_eq!(error.ename, "ReferenceError");
        assert_eq!(error.evalue, "nope is not defined");
    }

    #[tokio::test]
    async fn unknown_actions_are_reported_to_the_context() {
        let (dispatcher, _, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::new(Action::Other("launch".into()), "", "ctx1"))
            .await;
        let frames = drain(&mut frames);
        let [Frame::Error { error, .. }] = &frames[..] else {
            panic!("expected one error frame");
        };
        assert_eq!(error.evalue, "Unhandled action: launch");
    }

    #[tokio::test]
    async fn reply_to_missing_context_goes_to_the_fault_channel() {
        let (dispatcher, registry, mut frames) = dispatcher();
        dispatcher
            .on_message(Message::reply(serde_json::json!(1), "ghost", 7))
            .await;
        let frames = drain(&mut frames);
        assert!(matches!(&frames[..], [Frame::Stderr(text)] if text.contains("missing context")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reply_with_unknown_id_is_an_error() {
        let (dispatcher, registry, mut frames) = dispatcher();
        registry.create("ctx1", ContextConfig::default());
        dispatcher
            .on_message(Message::reply(serde_json::json!(1), "ctx1", 7))
            .await;
        let frames = drain(&mut frames);
        let [Frame::Error { error, .. }] = &frames[..] else {
            panic!("expected one error frame");
        };
        assert_eq!(error.evalue, "Unknown request id: 7");
    }

    struct Panicking;

    fn explode() -> interpreter::Result<Value> {
        panic!("evaluator exploded")
    }

    impl Evaluator for Panicking {
        fn evaluate<'a>(
            &'a self,
            _code: &'a str,
            _context: &'a Context,
        ) -> BoxFuture<'a, interpreter::Result<Value>> {
            Box::pin(async { explode() })
        }

        fn call<'a>(
            &'a self,
            _function: Value,
            _receiver: Value,
            _context: &'a Context,
        ) -> BoxFuture<'a, interpreter::Result<Value>> {
            Box::pin(async { explode() })
        }
    }

    #[tokio::test]
    async fn panics_are_contained_and_reported() {
        let (outbox, mut frames) = Outbox::channel();
        let registry = Arc::new(ContextRegistry::new(ContextConfig::default(), outbox.clone()));
        let dispatcher = Dispatcher::new(registry, Arc::new(Panicking), outbox);
        let (tx, rx) = mpsc::channel(4);
        tx.send(Message::new(Action::Run, "1", "ctx1")).await.unwrap();
        tx.send(Message::new(Action::Run, "2", "ctx2")).await.unwrap();
        drop(tx);
        dispatcher.serve(rx).await;
        let frames = drain(&mut frames);
        assert_eq!(frames.len(), 2);
        assert!(frames
            .iter()
            .all(|frame| matches!(frame, Frame::Stderr(text) if text.contains("evaluator exploded"))));
    }

    #[tokio::test]
    async fn request_round_trip_interleaves_with_later_messages() {
        let (outbox, mut frames) = Outbox::channel();
        let registry = Arc::new(ContextRegistry::new(ContextConfig::default(), outbox.clone()));
        let dispatcher = Dispatcher::new(registry, Arc::new(ScriptEngine::new()), outbox);
        let (tx, rx) = mpsc::channel(4);

        let driver = async {
            tx.send(Message::new(Action::Run, "$$.request('ping') + '!'", "ctx1"))
                .await
                .unwrap();
            let request_id = loop {
                match frames.recv().await {
                    Some(Frame::Request { request_id, .. }) => break request_id,
                    Some(_) => continue,
                    None => panic!("outbox closed"),
                }
            };
            tx.send(Message::reply(serde_json::json!("pong"), "ctx1", request_id))
                .await
                .unwrap();
            let result = frames.recv().await;
            drop(tx);
            result
        };
        let (_, result) = tokio::join!(dispatcher.serve(rx), driver);
        let Some(Frame::Result { mime, .. }) = result else {
            panic!("expected a result frame, got {result:?}");
        };
        assert_eq!(mime["text/plain"], "'pong!'");
    }
}
