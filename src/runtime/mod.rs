//! Kernel runtime and public API
//!
//! This module provides the [`Kernel`] struct that wires the context
//! registry, the default evaluator and the dispatcher together, plus the
//! server configuration they are built from.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

// Submodules
pub mod adapter;
pub mod context;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod protocol;
pub mod requester;

pub use adapter::Evaluator;
pub use context::{Context, ContextConfig, ContextCore, ContextManager, ContextRegistry};
pub use dispatcher::Dispatcher;
pub use display::DisplayEncoder;
pub use error::{ConfigError, KernelError, ProtocolError, RequestError};
pub use protocol::{Action, ErrorPayload, Frame, Message, Outbox};
pub use requester::Requester;

use crate::inspect::DEFAULT_DEPTH;
use crate::interpreter::{DEFAULT_MAX_DEPTH, ScriptEngine};

/// Environment variable that switches on debug mirroring.
pub const DEBUG_ENV: &str = "DEBUG";

/// Stack reserved for everything outside evaluator recursion.
const BASE_STACK_SIZE: usize = 4 << 20;

/// Stack budget per level of evaluator recursion.
const STACK_PER_EVAL_LEVEL: usize = 32 << 10;

/// Configuration for the kernel server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Mirror received messages as `log` frames
    pub debug: bool,

    /// Default `awaitExecution` for newly created contexts
    pub await_execution: bool,

    /// Nesting depth of the text/plain result encoding
    pub inspect_depth: usize,

    /// Recursion limit of the default evaluator
    pub max_eval_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            await_execution: false,
            inspect_depth: DEFAULT_DEPTH,
            max_eval_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from `lookup`. Any non-empty `DEBUG`
    /// value enables debug mode.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(DEBUG_ENV) {
            self.debug = !value.is_empty();
        }
    }

    /// Thread stack size that comfortably holds `max_eval_depth` levels of
    /// evaluator recursion.
    pub fn stack_size(&self) -> usize {
        BASE_STACK_SIZE.saturating_add(self.max_eval_depth.saturating_mul(STACK_PER_EVAL_LEVEL))
    }

    /// Settings given to contexts created on first use.
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            await_execution: self.await_execution,
        }
    }
}

/// The assembled kernel
///
/// Owns the context registry and the dispatcher routing into it.
pub struct Kernel {
    config: ServerConfig,
    contexts: Arc<ContextRegistry>,
    dispatcher: Dispatcher,
}

impl Kernel {
    /// Build a kernel writing frames to `outbox`, evaluating with the
    /// default script engine.
    pub fn new(config: ServerConfig, outbox: Outbox) -> Self {
        let engine = ScriptEngine::with_max_depth(config.max_eval_depth);
        Self::with_evaluator(config, outbox, Arc::new(engine))
    }

    /// Build a kernel with a custom evaluator.
    pub fn with_evaluator(
        config: ServerConfig,
        outbox: Outbox,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        DisplayEncoder::init(config.inspect_depth);
        let contexts = Arc::new(ContextRegistry::new(config.context_config(), outbox.clone()));
        let dispatcher =
            Dispatcher::new(contexts.clone(), evaluator, outbox).with_debug(config.debug);
        Self {
            config,
            contexts,
            dispatcher,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Context registry
    pub fn contexts(&self) -> &Arc<ContextRegistry> {
        &self.contexts
    }

    /// Message dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
