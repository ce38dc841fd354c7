//! Base64 codec stage.
//!
//! Encodes on the way into a `CipherValue`, decodes on the way out. Incoming
//! XML base64 is routinely line-wrapped and indented, so decoding strips
//! ASCII whitespace before handing the text to the decoder.

use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::transform::Transform;
use crate::types::Operation;

/// The Base64 encode/decode transform.
pub struct Base64Transform {
    operation: Operation,
}

impl Base64Transform {
    /// Creates the codec with a preset direction: `Encrypt` encodes,
    /// `Decrypt` decodes.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self { operation }
    }
}

impl Transform for Base64Transform {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    fn apply(&mut self, input: Vec<u8>) -> Result<Vec<u8>> {
        match self.operation {
            Operation::Encrypt => Ok(BASE64.encode(&input).into_bytes()),
            Operation::Decrypt => {
                let compact: Vec<u8> = input.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
                BASE64.decode(&compact).map_err(|e| anyhow!("base64 decoding failed: {e}"))
            }
        }
    }
}
