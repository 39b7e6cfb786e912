//! Default display encoder
//!
//! Produces the MIME bundle attached to result frames. Only `text/plain` is
//! produced; the encoder is a process-wide singleton, initialised once at
//! startup and read-only afterwards.

use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use super::protocol::MimeBundle;
use crate::inspect::{DEFAULT_DEPTH, render};
use crate::interpreter::Value;

/// MIME type of the plain-text encoding.
pub const TEXT_PLAIN: &str = "text/plain";

static DISPLAY_ENCODER: OnceLock<DisplayEncoder> = OnceLock::new();

/// Encodes result values for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEncoder {
    depth: usize,
}

impl DisplayEncoder {
    /// Initialise the process-wide encoder. Later calls return the encoder
    /// created by the first one.
    pub fn init(depth: usize) -> &'static DisplayEncoder {
        DISPLAY_ENCODER.get_or_init(|| DisplayEncoder { depth })
    }

    /// The process-wide encoder, initialised with defaults if nobody called
    /// [`DisplayEncoder::init`].
    pub fn global() -> &'static DisplayEncoder {
        Self::init(DEFAULT_DEPTH)
    }

    /// Nesting depth used for rendering.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Encode a value into a MIME bundle.
    pub fn encode(&self, value: &Value) -> MimeBundle {
        let mut bundle = MimeBundle::new();
        bundle.insert(
            TEXT_PLAIN.to_string(),
            JsonValue::String(render(value, self.depth)),
        );
        bundle
    }
}
