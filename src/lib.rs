//! xmlenc - W3C XML Encryption processor.
//!
//! Implements the xmlenc-core processing model: an [`enc::EncryptionContext`]
//! reads an `EncryptedData`/`EncryptedKey` template, wires a transform
//! pipeline out of it (encryption method, optional Base64 codec, optional
//! URI input), resolves the content-encryption key through a key store,
//! drives the pipeline, and writes the result back into the XML tree with
//! element or content replacement semantics.

pub mod app;
pub mod config;
pub mod enc;
pub mod error;
pub mod key;
pub mod secret;
pub mod transform;
pub mod types;
pub mod xml;
