use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::value::Value;

/// Lexical environment: a frame of bindings plus a link to the enclosing scope.
#[derive(Clone)]
pub struct Scope(Arc<RwLock<Frame>>);

struct Frame {
    bindings: HashMap<String, Value>,
    parent: Option<Scope>,
}

impl Scope {
    /// Create a root scope.
    pub fn root() -> Self {
        Self(Arc::new(RwLock::new(Frame {
            bindings: HashMap::new(),
            parent: None,
        })))
    }

    /// Create a scope nested inside `self`.
    pub fn child(&self) -> Self {
        Self(Arc::new(RwLock::new(Frame {
            bindings: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    /// Bind a name in this frame, shadowing outer bindings.
    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.0.write().bindings.insert(name.into(), value);
    }

    /// Resolve a name through the enclosing frames.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let frame = scope.0.read();
            if let Some(value) = frame.bindings.get(name) {
                return Some(value.clone());
            }
            current = frame.parent.clone();
        }
        None
    }

    /// Update the nearest existing binding. Returns false when the name is unbound.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            let mut frame = scope.0.write();
            if let Some(slot) = frame.bindings.get_mut(name) {
                *slot = value;
                return true;
            }
            current = frame.parent.clone();
        }
        false
    }

    /// Names bound directly in this frame.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.read().bindings.keys().cloned().collect();
        names.sort();
        names
    }
}
