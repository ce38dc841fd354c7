//! Error kinds surfaced by the processor.
//!
//! Failures travel as [`anyhow::Error`] with stage-naming context attached,
//! but every failure carries one of these typed kinds somewhere in its chain
//! so callers and tests can tell a malformed template from a missing key
//! without parsing message strings.

use thiserror::Error;

/// The failure kinds of the encryption core.
///
/// Every kind is fatal to the current operation; the context is not reset
/// and must be discarded by the caller.
#[derive(Debug, Error)]
pub enum EncError {
    /// Missing required child, unexpected extra child, wrong namespace or
    /// element name, invalid `Type` value, or an attempt to reuse a context.
    #[error("structural error: {0}")]
    Structural(String),

    /// Required text content missing or unreadable.
    #[error("invalid node content: {0}")]
    InvalidNodeContent(String),

    /// `EncryptionMethod` missing with no default, or an unknown algorithm.
    #[error("algorithm error: {0}")]
    Algorithm(String),

    /// The resolver returned nothing, or a key not satisfying the
    /// requirement derived from the encryption method.
    #[error("key not found")]
    KeyNotFound,

    /// Any failure reported by the transform pipeline.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A document replacement step failed, e.g. the decrypted fragment did
    /// not reparse in the context of the enclosing document.
    #[error("document mutation failed: {0}")]
    DocumentMutation(String),
}

impl EncError {
    /// Finds the typed kind inside an `anyhow` error, whether it is the
    /// root error or was attached as context along the way.
    #[must_use]
    pub fn of(err: &anyhow::Error) -> Option<&EncError> {
        err.downcast_ref::<EncError>().or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<EncError>()))
    }
}
