//! `dsig:KeyInfo` resolution and writing.
//!
//! Two permanently distinct contexts drive this module: the read context
//! accepts whatever the encryption method requires, the write context is
//! restricted to public material at construction and never widened. The
//! split exists so an outgoing `KeyInfo` cannot leak secret material no
//! matter what the resolver returned.

use anyhow::{Result, bail};

use crate::config::{NODE_KEY_NAME, NODE_KEY_VALUE, XMLDSIG_NS};
use crate::error::EncError;
use crate::key::{Key, KeyRequirement, KeyStore, KeyType};
use crate::xml::{Document, NodeId};

/// Direction a key-info context operates in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyInfoMode {
    /// Resolving a key out of an incoming `KeyInfo`.
    Read,

    /// Serializing a bound key into an outgoing `KeyInfo`.
    Write,
}

/// Configuration for one direction of `KeyInfo` processing.
#[derive(Clone, Debug)]
pub struct KeyInfoContext {
    pub mode: KeyInfoMode,
    pub requirement: KeyRequirement,
}

impl KeyInfoContext {
    /// A read context; the requirement is narrowed later from the
    /// encryption method.
    #[must_use]
    pub fn read() -> Self {
        Self { mode: KeyInfoMode::Read, requirement: KeyRequirement::any() }
    }

    /// A write context, restricted to public material for its lifetime.
    #[must_use]
    pub fn write() -> Self {
        let mut requirement = KeyRequirement::any();
        requirement.key_type = KeyType::PUBLIC;
        Self { mode: KeyInfoMode::Write, requirement }
    }
}

/// Resolves a key from a `dsig:KeyInfo` subtree.
///
/// Children are visited in document order; the first `dsig:KeyName` whose
/// name the store can satisfy wins. Children this resolver does not
/// understand are skipped, not rejected: another resolver behind the same
/// seam may know them.
pub fn resolve_key_info(doc: &Document, key_info: NodeId, store: &KeyStore, ctx: &KeyInfoContext) -> Result<Option<Key>> {
    if ctx.mode != KeyInfoMode::Read {
        bail!(EncError::Structural("key resolution requires a read context".into()));
    }

    for child in doc.element_children(key_info) {
        if doc.is_element(child, XMLDSIG_NS, NODE_KEY_NAME) {
            let name = doc.text_content(child);
            if let Some(key) = store.find(&name, &ctx.requirement) {
                return Ok(Some(key.clone()));
            }
            tracing::debug!(name = %name, "key name did not resolve");
        } else {
            tracing::debug!(node = doc.display_name(child), "skipping unrecognized KeyInfo child");
        }
    }
    Ok(None)
}

/// Serializes a bound key into a `dsig:KeyInfo` template.
///
/// The template's children say what to emit: a `dsig:KeyName` child is
/// filled with the key name; a `dsig:KeyValue` child demands key material
/// and is refused unless the key is public material; symmetric and private
/// material never leaves through this path.
pub fn write_key_info(doc: &mut Document, key_info: NodeId, key: &Key, ctx: &KeyInfoContext) -> Result<()> {
    if ctx.mode != KeyInfoMode::Write {
        bail!(EncError::Structural("key serialization requires a write context".into()));
    }

    let children: Vec<NodeId> = doc.element_children(key_info).collect();
    for child in children {
        if doc.is_element(child, XMLDSIG_NS, NODE_KEY_NAME) {
            let Some(name) = key.name() else {
                bail!(EncError::InvalidNodeContent("bound key has no name to write into <KeyName>".into()));
            };
            let name = name.to_owned();
            doc.set_text_content(child, &name);
        } else if doc.is_element(child, XMLDSIG_NS, NODE_KEY_VALUE) {
            if !key.key_type().intersects(ctx.requirement.key_type) {
                bail!(EncError::Structural("refusing to serialize non-public key material into <KeyValue>".into()));
            }
            // Public key serialization belongs to the concrete key data
            // implementation; none is in scope for the symmetric algorithm
            // family, so a public key reaching this point is unsupported.
            bail!(EncError::Structural("<KeyValue> serialization is not supported for this key".into()));
        } else {
            tracing::debug!(node = doc.display_name(child), "skipping unrecognized KeyInfo child");
        }
    }
    Ok(())
}
