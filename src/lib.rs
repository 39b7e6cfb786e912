//! Nel – an out-of-process code evaluation kernel
//!
//! This crate implements the kernel side of an evaluation protocol:
//! - A message dispatcher routing `run`, `inspect`, `getAllPropertyNames` and `reply`
//! - Per-conversation contexts with once-only result delivery
//! - A reply correlator for code that asks the host a question and waits
//! - A value inspector reporting type, constructor chain and property names
//! - A small JavaScript-flavoured interpreter as the default evaluator

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Value inspection and textual rendering
pub mod inspect;

/// Default evaluation backend
pub mod interpreter;

/// Dispatcher, contexts, correlator and wire protocol
pub mod runtime;

/// Line-framed stdio transport
pub mod service;

// Re-export key types for convenience
pub use runtime::{Kernel, ServerConfig};

/// Current version of the nel kernel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the line-framed wire protocol
pub const PROTOCOL_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_dotted_numbers() {
        for version in [VERSION, PROTOCOL_VERSION] {
            let parts: Vec<_> = version.split('.').collect();
            assert_eq!(parts.len(), 3, "{version}");
            assert!(parts.iter().all(|part| part.parse::<u32>().is_ok()), "{version}");
        }
    }
}
