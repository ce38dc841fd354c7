//! The encryption context.
//!
//! One [`EncryptionContext`] performs exactly one encryption or decryption.
//! It reads an `EncryptedData`/`EncryptedKey` template, wires the transform
//! chain the template describes, resolves the content-encryption key through
//! the key store, drives the chain, and writes the outcome back into the
//! caller's document.
//!
//! # Chain shape
//!
//! After the template is read the chain is, in order:
//!
//! ```text
//! [uri input or base64 decode] -> [reference transforms] -> [method] -> [base64 encode]
//! ```
//!
//! Exactly one of the two Base64 stages can be present: decode at the head
//! when decrypting out of a `CipherValue`, encode at the tail when
//! encrypting into one. Neither appears on the `CipherReference` paths.
//!
//! # Lifecycle
//!
//! Contexts are single use. Every entry point requires a fresh context
//! (no chain result yet, no template strings captured) and any failure is
//! terminal: the context is not reset, the caller discards it. The
//! document is only ever mutated after the chain has fully run, so a
//! failed operation leaves the caller's tree exactly as it was.

use std::io::{self, Write};

use anyhow::{Context, Result, bail, ensure};
use tracing::debug;

use crate::config::{
    ATTR_ENCODING, ATTR_ID, ATTR_MIME_TYPE, ATTR_RECIPIENT, ATTR_TYPE, ATTR_URI, ENC_IDS, NODE_CARRIED_KEY_NAME, NODE_CIPHER_DATA, NODE_CIPHER_REFERENCE, NODE_CIPHER_VALUE,
    NODE_ENCRYPTION_METHOD, NODE_ENCRYPTION_PROPERTIES, NODE_KEY_INFO, NODE_REFERENCE_LIST, NODE_TRANSFORMS, TYPE_CONTENT, TYPE_ELEMENT, XMLDSIG_NS, XMLENC_NS,
};
use crate::error::EncError;
use crate::key::{Key, KeyInfoContext, KeyStore, resolve_key_info, write_key_info};
use crate::transform::{Base64Transform, Transform, TransformChain, TransformUsage};
use crate::types::{Mode, Operation};
use crate::xml::{Document, NodeId};

/// State for one encryption or decryption of one template.
pub struct EncryptionContext {
    mode: Mode,
    operation: Operation,
    store: KeyStore,

    id: Option<String>,
    data_type: Option<String>,
    mime_type: Option<String>,
    encoding: Option<String>,
    recipient: Option<String>,
    carried_key_name: Option<String>,

    enc_method_node: Option<NodeId>,
    key_info_node: Option<NodeId>,
    cipher_value_node: Option<NodeId>,

    supplied_method: Option<Box<dyn Transform>>,
    chain: TransformChain,
    key: Option<Key>,
    key_info_read: KeyInfoContext,
    key_info_write: KeyInfoContext,

    result_base64: bool,
    replaced: bool,
}

impl EncryptionContext {
    /// Creates a context bound to a key store.
    ///
    /// The mode decides which optional template children are recognized;
    /// everything else about the two modes is identical.
    #[must_use]
    pub fn new(mode: Mode, store: KeyStore) -> Self {
        Self {
            mode,
            operation: Operation::Encrypt,
            store,
            id: None,
            data_type: None,
            mime_type: None,
            encoding: None,
            recipient: None,
            carried_key_name: None,
            enc_method_node: None,
            key_info_node: None,
            cipher_value_node: None,
            supplied_method: None,
            chain: TransformChain::new(),
            key: None,
            key_info_read: KeyInfoContext::read(),
            key_info_write: KeyInfoContext::write(),
            result_base64: false,
            replaced: false,
        }
    }

    /// Pre-supplies the encryption method, overriding whatever the template
    /// names. The transform is moved into the context and later into the
    /// chain; ownership is never shared.
    pub fn set_encryption_method(&mut self, transform: Box<dyn Transform>) {
        self.supplied_method = Some(transform);
    }

    /// Pre-supplies the content-encryption key, skipping resolution.
    pub fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    /// Encrypts a caller-supplied byte buffer into the template.
    pub fn encrypt_binary(&mut self, doc: &mut Document, tmpl: NodeId, data: &[u8]) -> Result<()> {
        self.ensure_fresh()?;
        self.operation = Operation::Encrypt;
        doc.register_ids(tmpl, ENC_IDS);

        self.read_template(doc, tmpl).context("reading encryption template")?;
        self.chain.execute_binary(data)?;
        self.write_cipher_data(doc)?;

        debug!(size = data.len(), "binary payload encrypted");
        Ok(())
    }

    /// Encrypts an element of the caller's document into the template and
    /// replaces the element (or its content) with the template.
    pub fn encrypt_xml(&mut self, doc: &mut Document, tmpl: NodeId, target: NodeId) -> Result<()> {
        self.ensure_fresh()?;
        self.operation = Operation::Encrypt;
        doc.register_ids(tmpl, ENC_IDS);

        self.read_template(doc, tmpl).context("reading encryption template")?;

        let replace_content = match self.data_type.as_deref() {
            Some(TYPE_ELEMENT) => false,
            Some(TYPE_CONTENT) => true,
            other => {
                bail!(EncError::Structural(format!("Type \"{}\" does not support node replacement", other.unwrap_or(""))));
            }
        };

        let mut sink = self.chain.output_sink();
        let serialized = if replace_content { doc.dump_children(target, &mut sink) } else { doc.dump_subtree(target, &mut sink) };
        serialized.with_context(|| EncError::Pipeline("serializing the target node into the chain failed".into()))?;
        sink.close()?;

        self.write_cipher_data(doc)?;

        if replace_content {
            doc.replace_children(target, tmpl).with_context(|| EncError::DocumentMutation("replacing element content with the template".into()))?;
        } else {
            doc.replace_node(target, tmpl).with_context(|| EncError::DocumentMutation("replacing the element with the template".into()))?;
        }
        self.replaced = true;

        debug!("xml target encrypted and replaced");
        Ok(())
    }

    /// Encrypts the resource a URI points at into the template.
    pub fn encrypt_uri(&mut self, doc: &mut Document, tmpl: NodeId, uri: &str) -> Result<()> {
        self.ensure_fresh()?;
        self.operation = Operation::Encrypt;
        doc.register_ids(tmpl, ENC_IDS);

        self.chain.set_uri(uri).with_context(|| format!("installing uri input \"{uri}\""))?;
        self.read_template(doc, tmpl).context("reading encryption template")?;
        self.chain.execute()?;
        self.write_cipher_data(doc)?;

        debug!(uri, "uri payload encrypted");
        Ok(())
    }

    /// Decrypts an `EncryptedData`/`EncryptedKey` instance and returns the
    /// recovered bytes. The buffer borrows the chain's output and lives
    /// until the context is dropped.
    pub fn decrypt_to_buffer(&mut self, doc: &mut Document, node: NodeId) -> Result<&[u8]> {
        self.ensure_fresh()?;
        self.operation = Operation::Decrypt;
        doc.register_ids(node, ENC_IDS);

        let root_name = self.mode.node_name();
        self.read_template(doc, node).with_context(|| format!("reading <{root_name}> node"))?;

        if let Some(cipher_value) = self.cipher_value_node {
            let text = doc.text_content(cipher_value);
            ensure!(!text.is_empty(), EncError::InvalidNodeContent("<CipherValue> has no content".into()));
            self.chain.execute_binary(text.as_bytes())?;
        } else {
            self.chain.execute()?;
        }

        debug!("payload decrypted");
        self.chain.result().ok_or_else(|| anyhow::Error::new(EncError::Pipeline("pipeline produced no result".into())))
    }

    /// Decrypts in place: the recovered bytes are reparsed in the context
    /// of the enclosing document and substituted for the encrypted node.
    ///
    /// Returns true when the document was mutated. An unrecognized `Type`
    /// leaves the document untouched; the plaintext stays available through
    /// [`Self::result`].
    pub fn decrypt(&mut self, doc: &mut Document, node: NodeId) -> Result<bool> {
        self.decrypt_to_buffer(doc, node)?;

        match self.data_type.as_deref() {
            Some(TYPE_ELEMENT) | Some(TYPE_CONTENT) => {
                let data = self.chain.result().ok_or_else(|| anyhow::Error::new(EncError::Pipeline("pipeline produced no result".into())))?;
                doc.replace_node_with_fragment(node, data).with_context(|| EncError::DocumentMutation("substituting the decrypted fragment".into()))?;
                self.replaced = true;
                debug!("encrypted node replaced with decrypted fragment");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The chain's final output: ciphertext after an encrypt, plaintext
    /// after a decrypt. `None` until an operation has succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&[u8]> {
        self.chain.result()
    }

    /// True once the caller's document has been mutated.
    #[inline]
    #[must_use]
    pub const fn replaced(&self) -> bool {
        self.replaced
    }

    /// True when the result buffer carries Base64 text rather than raw
    /// bytes, i.e. a Base64 encode stage was appended for a `CipherValue`.
    #[inline]
    #[must_use]
    pub const fn result_base64_encoded(&self) -> bool {
        self.result_base64
    }

    /// The template's `Id` attribute, once read.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The template's `Type` attribute, once read.
    #[must_use]
    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    /// The template's `MimeType` attribute, once read.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// The template's `Encoding` attribute, once read.
    #[must_use]
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// The `Recipient` attribute, `EncryptedKey` mode only.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// The `CarriedKeyName` text, captured verbatim as the document
    /// reports it. `EncryptedKey` mode only.
    #[must_use]
    pub fn carried_key_name(&self) -> Option<&str> {
        self.carried_key_name.as_deref()
    }

    /// Writes a human-readable summary of the context.
    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "= {} {} context", self.mode, self.operation)?;
        writeln!(out, "== status: {}", if self.replaced { "replaced" } else { "not replaced" })?;

        let attrs = [
            ("id", &self.id),
            ("type", &self.data_type),
            ("mime-type", &self.mime_type),
            ("encoding", &self.encoding),
            ("recipient", &self.recipient),
            ("carried-key-name", &self.carried_key_name),
        ];
        for (label, value) in attrs {
            if let Some(value) = value {
                writeln!(out, "== {label}: \"{value}\"")?;
            }
        }

        match self.chain.result() {
            Some(result) if self.result_base64 => writeln!(out, "== result: {}", String::from_utf8_lossy(result))?,
            Some(result) => writeln!(out, "== result: {} bytes", result.len())?,
            None => writeln!(out, "== result: none")?,
        }
        Ok(())
    }

    /// Single-use precondition: no result yet and nothing captured from a
    /// template.
    fn ensure_fresh(&self) -> Result<()> {
        let used = self.chain.result().is_some()
            || self.id.is_some()
            || self.data_type.is_some()
            || self.mime_type.is_some()
            || self.encoding.is_some()
            || self.recipient.is_some()
            || self.carried_key_name.is_some()
            || self.enc_method_node.is_some()
            || self.key_info_node.is_some()
            || self.cipher_value_node.is_some();
        ensure!(!used, EncError::Structural("context has already been used; create a fresh one per operation".into()));
        Ok(())
    }

    /// Reads the template: attributes first, then the children in strict
    /// document order, then the encryption method and key wiring.
    fn read_template(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        self.id = doc.attribute(node, ATTR_ID).map(str::to_owned);
        self.data_type = doc.attribute(node, ATTR_TYPE).map(str::to_owned);
        self.mime_type = doc.attribute(node, ATTR_MIME_TYPE).map(str::to_owned);
        self.encoding = doc.attribute(node, ATTR_ENCODING).map(str::to_owned);
        if self.mode == Mode::EncryptedKey {
            self.recipient = doc.attribute(node, ATTR_RECIPIENT).map(str::to_owned);
        }

        let mut cur = doc.first_element_child(node);

        // optional EncryptionMethod; interpreted after the walk
        if let Some(child) = cur {
            if doc.is_element(child, XMLENC_NS, NODE_ENCRYPTION_METHOD) {
                self.enc_method_node = Some(child);
                cur = doc.next_element_sibling(child);
            }
        }

        // optional KeyInfo; interpreted after the walk
        if let Some(child) = cur {
            if doc.is_element(child, XMLDSIG_NS, NODE_KEY_INFO) {
                self.key_info_node = Some(child);
                cur = doc.next_element_sibling(child);
            }
        }

        // required CipherData
        let cipher_data = match cur {
            Some(child) if doc.is_element(child, XMLENC_NS, NODE_CIPHER_DATA) => child,
            Some(child) => bail!(EncError::Structural(format!("expected <CipherData>, found <{}>", doc.display_name(child)))),
            None => bail!(EncError::Structural("required <CipherData> child is missing".into())),
        };
        self.read_cipher_data(doc, cipher_data).context("reading <CipherData> node")?;
        cur = doc.next_element_sibling(cipher_data);

        // optional EncryptionProperties, ignored
        if let Some(child) = cur {
            if doc.is_element(child, XMLENC_NS, NODE_ENCRYPTION_PROPERTIES) {
                cur = doc.next_element_sibling(child);
            }
        }

        if self.mode == Mode::EncryptedKey {
            // optional ReferenceList, ignored
            if let Some(child) = cur {
                if doc.is_element(child, XMLENC_NS, NODE_REFERENCE_LIST) {
                    cur = doc.next_element_sibling(child);
                }
            }

            // optional CarriedKeyName, captured verbatim
            if let Some(child) = cur {
                if doc.is_element(child, XMLENC_NS, NODE_CARRIED_KEY_NAME) {
                    let name = doc.text_content(child);
                    ensure!(!name.is_empty(), EncError::InvalidNodeContent("<CarriedKeyName> has no content".into()));
                    self.carried_key_name = Some(name);
                    cur = doc.next_element_sibling(child);
                }
            }
        }

        if let Some(extra) = cur {
            bail!(EncError::Structural(format!("unexpected <{}> after the recognized children", doc.display_name(extra))));
        }

        // attach the encryption method: a pre-supplied transform wins over
        // the template's EncryptionMethod node
        if let Some(method) = self.supplied_method.take() {
            self.chain.append_method(method);
        } else if let Some(method_node) = self.enc_method_node {
            self.chain.read_method_node(doc, method_node, TransformUsage::EncryptionMethod, self.operation).context("reading <EncryptionMethod> node")?;
        } else {
            bail!(EncError::Algorithm("encryption method not specified".into()));
        }

        {
            let method = self.chain.method_mut().ok_or_else(|| anyhow::Error::new(EncError::Algorithm("encryption method not specified".into())))?;
            method.set_operation(self.operation);
            let requirement = method.key_requirement().ok_or_else(|| anyhow::Error::new(EncError::Algorithm(format!("transform \"{}\" cannot serve as an encryption method", method.name()))))?;
            self.key_info_read.requirement = requirement;
        }

        // resolve the key unless the caller pre-supplied one
        if self.key.is_none() {
            if let Some(key_info) = self.key_info_node {
                self.key = resolve_key_info(doc, key_info, &self.store, &self.key_info_read).context("reading <KeyInfo> node")?;
            }
        }

        let satisfied = self.key.as_ref().is_some_and(|key| key.matches(&self.key_info_read.requirement));
        if !satisfied {
            bail!(EncError::KeyNotFound);
        }
        if let Some(key) = self.key.as_ref() {
            let method = self.chain.method_mut().ok_or_else(|| anyhow::Error::new(EncError::Algorithm("encryption method not specified".into())))?;
            method.set_key(key).with_context(|| EncError::Pipeline("binding the key to the encryption method failed".into()))?;
        }

        // a CipherValue destination means the ciphertext must be Base64
        if self.operation == Operation::Encrypt && self.cipher_value_node.is_some() {
            self.chain.append(Box::new(Base64Transform::new(Operation::Encrypt)));
            self.result_base64 = true;
        }

        Ok(())
    }

    /// Reads `CipherData`: exactly one of `CipherValue` or
    /// `CipherReference`, nothing after it.
    fn read_cipher_data(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        let mut cur = doc.first_element_child(node);
        let mut recognized = false;

        if let Some(child) = cur {
            if doc.is_element(child, XMLENC_NS, NODE_CIPHER_VALUE) {
                // feeding the node text through the chain needs a leading
                // Base64 decode when decrypting
                if self.operation == Operation::Decrypt {
                    self.chain.prepend(Box::new(Base64Transform::new(Operation::Decrypt)));
                }
                self.cipher_value_node = Some(child);
                recognized = true;
                cur = doc.next_element_sibling(child);
            } else if doc.is_element(child, XMLENC_NS, NODE_CIPHER_REFERENCE) {
                // on encrypt the reference only describes the shape; the
                // caller supplies the plaintext another way
                if self.operation == Operation::Decrypt {
                    self.read_cipher_reference(doc, child).context("reading <CipherReference> node")?;
                }
                recognized = true;
                cur = doc.next_element_sibling(child);
            }
        }

        if let Some(extra) = cur {
            bail!(EncError::Structural(format!("unexpected <{}> inside <CipherData>", doc.display_name(extra))));
        }
        if !recognized {
            bail!(EncError::Structural("<CipherData> holds neither <CipherValue> nor <CipherReference>".into()));
        }
        Ok(())
    }

    /// Reads `CipherReference`: optional URI input plus an optional inline
    /// transform chain.
    fn read_cipher_reference(&mut self, doc: &Document, node: NodeId) -> Result<()> {
        if let Some(uri) = doc.attribute(node, ATTR_URI) {
            self.chain.set_uri(uri).with_context(|| format!("installing CipherReference input \"{uri}\""))?;
        }

        let mut cur = doc.first_element_child(node);
        if let Some(child) = cur {
            if doc.is_element(child, XMLENC_NS, NODE_TRANSFORMS) {
                self.chain.read_transforms_node(doc, child, TransformUsage::DSigTransform, Operation::Decrypt).context("reading <Transforms> node")?;
                cur = doc.next_element_sibling(child);
            }
        }

        if let Some(extra) = cur {
            bail!(EncError::Structural(format!("unexpected <{}> inside <CipherReference>", doc.display_name(extra))));
        }
        Ok(())
    }

    /// Writes the outcome into the template: Base64 ciphertext into
    /// `CipherValue`, then the bound key into `KeyInfo` through the
    /// public-only write context.
    fn write_cipher_data(&mut self, doc: &mut Document) -> Result<()> {
        if let Some(cipher_value) = self.cipher_value_node {
            let result = self.chain.result().ok_or_else(|| anyhow::Error::new(EncError::Pipeline("pipeline produced no result".into())))?;
            let text = std::str::from_utf8(result).map_err(|_| anyhow::Error::new(EncError::Pipeline("pipeline result is not Base64 text".into())))?;
            doc.set_text_content(cipher_value, text);
            self.replaced = true;
        }

        if let Some(key_info) = self.key_info_node {
            let key = self.key.as_ref().ok_or(EncError::KeyNotFound)?;
            write_key_info(doc, key_info, key, &self.key_info_write).context("writing <KeyInfo> node")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{CipherTransform, EncryptionAlgorithm};

    const AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
    const AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

    fn store_with_aes128() -> KeyStore {
        let mut store = KeyStore::new();
        store.insert(Key::symmetric("k1", &[0x11; 16]));
        store
    }

    fn template(algorithm: &str, key_name: &str, type_attr: &str) -> String {
        let type_attr = if type_attr.is_empty() { String::new() } else { format!(" Type=\"{type_attr}\"") };
        format!(
            r#"<enc:EncryptedData{type_attr} xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{algorithm}"/>
  <ds:KeyInfo><ds:KeyName>{key_name}</ds:KeyName></ds:KeyInfo>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
</enc:EncryptedData>"#
        )
    }

    fn cipher_value_text(doc: &Document) -> String {
        let root = doc.root();
        let cipher_data = doc.element_children(root).find(|&c| doc.is_element(c, XMLENC_NS, NODE_CIPHER_DATA)).unwrap();
        let cipher_value = doc.first_element_child(cipher_data).unwrap();
        doc.text_content(cipher_value)
    }

    #[test]
    fn test_binary_roundtrip_aes128_cbc() {
        let mut doc = Document::parse_str(&template(AES128_CBC, "k1", "")).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap();
        assert!(ctx.replaced());
        assert!(ctx.result_base64_encoded());

        let encoded = cipher_value_text(&doc);
        assert!(!encoded.is_empty());
        assert!(encoded.is_ascii());

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let node = doc.root();
        let plaintext = ctx.decrypt_to_buffer(&mut doc, node).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn test_binary_roundtrip_aes256_gcm() {
        let mut store = KeyStore::new();
        store.insert(Key::symmetric("gcm", &[0x42; 32]));

        let mut doc = Document::parse_str(&template(AES256_GCM, "gcm", "")).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store);
        ctx.encrypt_binary(&mut doc, tmpl, b"sealed with gcm").unwrap();

        let mut store = KeyStore::new();
        store.insert(Key::symmetric("gcm", &[0x42; 32]));
        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store);
        let node = doc.root();
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), b"sealed with gcm");
    }

    #[test]
    fn test_xml_element_roundtrip() {
        let mut doc = Document::parse_str(r#"<a><b kind="demo">x<i/>y</b></a>"#).unwrap();
        let original = doc.serialize().unwrap();
        let a = doc.root();
        let b = doc.first_element_child(a).unwrap();

        let tmpl_doc = Document::parse_str(&template(AES128_CBC, "k1", TYPE_ELEMENT)).unwrap();
        let tmpl = doc.import_subtree(&tmpl_doc, tmpl_doc.root());

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_xml(&mut doc, tmpl, b).unwrap();
        assert!(ctx.replaced());

        let children: Vec<NodeId> = doc.element_children(a).collect();
        assert_eq!(children.len(), 1);
        assert!(doc.is_element(children[0], XMLENC_NS, "EncryptedData"));

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        assert!(ctx.decrypt(&mut doc, children[0]).unwrap());

        assert_eq!(doc.serialize().unwrap(), original);
    }

    #[test]
    fn test_xml_content_roundtrip() {
        let mut doc = Document::parse_str("<a><b>x</b></a>").unwrap();
        let a = doc.root();
        let b = doc.first_element_child(a).unwrap();

        let tmpl_doc = Document::parse_str(&template(AES128_CBC, "k1", TYPE_CONTENT)).unwrap();
        let tmpl = doc.import_subtree(&tmpl_doc, tmpl_doc.root());

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_xml(&mut doc, tmpl, b).unwrap();

        let children: Vec<NodeId> = doc.children(b).to_vec();
        assert_eq!(children.len(), 1);
        assert!(doc.is_element(children[0], XMLENC_NS, "EncryptedData"));

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        assert!(ctx.decrypt(&mut doc, children[0]).unwrap());

        assert_eq!(doc.children(b).len(), 1);
        assert_eq!(doc.text_content(b), "x");
    }

    #[test]
    fn test_decrypt_content_replaces_the_encrypted_node_itself() {
        // Content decryption substitutes the EncryptedData node, not the
        // parent's whole child list; siblings survive.
        let mut doc = Document::parse_str("<a><b>x</b></a>").unwrap();
        let b = doc.first_element_child(doc.root()).unwrap();
        let tmpl_doc = Document::parse_str(&template(AES128_CBC, "k1", TYPE_CONTENT)).unwrap();
        let tmpl = doc.import_subtree(&tmpl_doc, tmpl_doc.root());

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_xml(&mut doc, tmpl, b).unwrap();

        let serialized = String::from_utf8(doc.serialize().unwrap()).unwrap();
        let with_sibling = serialized.replacen("<b>", "<b>pre", 1);

        let mut doc = Document::parse_str(&with_sibling).unwrap();
        let b = doc.first_element_child(doc.root()).unwrap();
        let enc_data = doc.first_element_child(b).unwrap();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        assert!(ctx.decrypt(&mut doc, enc_data).unwrap());

        assert_eq!(doc.text_content(b), "prex");
    }

    #[test]
    fn test_cipher_reference_decrypt() {
        let key = Key::symmetric("k1", &[0x11; 16]);
        let mut cipher = CipherTransform::new(EncryptionAlgorithm::Aes128Cbc, Operation::Encrypt);
        cipher.set_key(&key).unwrap();
        let ciphertext = cipher.apply(b"hello".to_vec()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, &ciphertext).unwrap();

        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
  <enc:CipherData><enc:CipherReference URI="file:{}"/></enc:CipherData>
</enc:EncryptedData>"#,
            path.display()
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let node = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), b"hello");
    }

    #[test]
    fn test_cipher_reference_with_base64_transform() {
        let key = Key::symmetric("k1", &[0x11; 16]);
        let mut cipher = CipherTransform::new(EncryptionAlgorithm::Aes128Cbc, Operation::Encrypt);
        cipher.set_key(&key).unwrap();
        let ciphertext = cipher.apply(b"referenced".to_vec()).unwrap();

        let mut encode = Base64Transform::new(Operation::Encrypt);
        let encoded = encode.apply(ciphertext).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cipher.b64");
        std::fs::write(&path, &encoded).unwrap();

        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
  <enc:CipherData>
    <enc:CipherReference URI="file:{}">
      <enc:Transforms>
        <ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#base64"/>
      </enc:Transforms>
    </enc:CipherReference>
  </enc:CipherData>
</enc:EncryptedData>"#,
            path.display()
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let node = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), b"referenced");
    }

    #[test]
    fn test_uri_encrypt_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"bytes behind a uri").unwrap();

        let mut doc = Document::parse_str(&template(AES128_CBC, "k1", "")).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_uri(&mut doc, tmpl, &format!("file:{}", path.display())).unwrap();
        assert!(!cipher_value_text(&doc).is_empty());

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let node = doc.root();
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), b"bytes behind a uri");
    }

    #[test]
    fn test_missing_key_fails_and_leaves_document_untouched() {
        let mut doc = Document::parse_str(&template(AES128_CBC, "unknown", "")).unwrap();
        let before = doc.serialize().unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap_err();

        assert!(matches!(EncError::of(&err), Some(EncError::KeyNotFound)));
        assert_eq!(doc.serialize().unwrap(), before);
        assert!(ctx.result().is_none());
    }

    #[test]
    fn test_missing_cipher_data_is_structural() {
        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let before = doc.serialize().unwrap();
        let tmpl = doc.root();

        // empty store: the failure must come before any key lookup
        let mut ctx = EncryptionContext::new(Mode::EncryptedData, KeyStore::new());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap_err();

        assert!(matches!(EncError::of(&err), Some(EncError::Structural(_))));
        assert_eq!(doc.serialize().unwrap(), before);
    }

    #[test]
    fn test_trailing_sibling_inside_cipher_data_is_structural() {
        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <enc:CipherData><enc:CipherValue/><enc:CipherValue/></enc:CipherData>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let before = doc.serialize().unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap_err();

        assert!(matches!(EncError::of(&err), Some(EncError::Structural(_))));
        assert_eq!(doc.serialize().unwrap(), before);
    }

    #[test]
    fn test_unexpected_trailing_child_is_structural() {
        // CarriedKeyName is only legal in EncryptedKey mode
        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
  <enc:CarriedKeyName>k1</enc:CarriedKeyName>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap_err();
        assert!(matches!(EncError::of(&err), Some(EncError::Structural(_))));
    }

    #[test]
    fn test_context_is_single_use() {
        let mut doc = Document::parse_str(&template(AES128_CBC, "k1", "")).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_binary(&mut doc, tmpl, b"once").unwrap();

        let err = ctx.encrypt_binary(&mut doc, tmpl, b"twice").unwrap_err();
        assert!(matches!(EncError::of(&err), Some(EncError::Structural(_))));
    }

    #[test]
    fn test_encrypted_key_mode_reads_recipient_and_carried_key_name() {
        let xml = format!(
            r#"<enc:EncryptedKey Recipient="bob" xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
  <enc:CarriedKeyName>session  key
</enc:CarriedKeyName>
</enc:EncryptedKey>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedKey, store_with_aes128());
        ctx.encrypt_binary(&mut doc, tmpl, &[0xAA; 24]).unwrap();

        assert_eq!(ctx.recipient(), Some("bob"));
        // captured verbatim: interior whitespace and the trailing newline stay
        assert_eq!(ctx.carried_key_name(), Some("session  key\n"));
    }

    #[test]
    fn test_recipient_ignored_in_encrypted_data_mode() {
        let xml = format!(
            r#"<enc:EncryptedData Recipient="bob" xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_binary(&mut doc, tmpl, b"data").unwrap();
        assert!(ctx.recipient().is_none());
    }

    #[test]
    fn test_decrypt_with_unknown_type_returns_buffer_only() {
        let mut doc = Document::parse_str(&template(AES128_CBC, "k1", "")).unwrap();
        let tmpl = doc.root();
        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_binary(&mut doc, tmpl, b"opaque").unwrap();

        let before = doc.serialize().unwrap();
        let node = doc.root();
        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let replaced = ctx.decrypt(&mut doc, node).unwrap();

        assert!(!replaced);
        assert!(!ctx.replaced());
        assert_eq!(ctx.result(), Some(&b"opaque"[..]));
        assert_eq!(doc.serialize().unwrap(), before);
    }

    #[test]
    fn test_missing_encryption_method_fails() {
        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"data").unwrap_err();

        assert!(matches!(EncError::of(&err), Some(EncError::Algorithm(_))));
        assert!(format!("{err:?}").contains("encryption method not specified"));
    }

    #[test]
    fn test_supplied_method_overrides_template() {
        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.set_encryption_method(Box::new(CipherTransform::new(EncryptionAlgorithm::Aes128Cbc, Operation::Encrypt)));
        ctx.encrypt_binary(&mut doc, tmpl, b"no method node").unwrap();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.set_encryption_method(Box::new(CipherTransform::new(EncryptionAlgorithm::Aes128Cbc, Operation::Decrypt)));
        let node = doc.root();
        assert_eq!(ctx.decrypt_to_buffer(&mut doc, node).unwrap(), b"no method node");
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let mut doc = Document::parse_str(&template("http://www.w3.org/2001/04/xmlenc#tripledes-cbc", "k1", "")).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"data").unwrap_err();
        assert!(matches!(EncError::of(&err), Some(EncError::Algorithm(_))));
    }

    #[test]
    fn test_xml_encrypt_with_invalid_type_is_structural() {
        let mut doc = Document::parse_str("<a><b>x</b></a>").unwrap();
        let before = doc.serialize().unwrap();
        let b = doc.first_element_child(doc.root()).unwrap();

        let tmpl_doc = Document::parse_str(&template(AES128_CBC, "k1", "urn:not-a-type")).unwrap();
        let tmpl = doc.import_subtree(&tmpl_doc, tmpl_doc.root());

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_xml(&mut doc, tmpl, b).unwrap_err();

        assert!(matches!(EncError::of(&err), Some(EncError::Structural(_))));
        assert_eq!(doc.serialize().unwrap(), before);
    }

    #[test]
    fn test_key_value_template_child_never_receives_material() {
        let xml = format!(
            r#"<enc:EncryptedData xmlns:enc="{XMLENC_NS}" xmlns:ds="{XMLDSIG_NS}">
  <enc:EncryptionMethod Algorithm="{AES128_CBC}"/>
  <ds:KeyInfo><ds:KeyName>k1</ds:KeyName><ds:KeyValue/></ds:KeyInfo>
  <enc:CipherData><enc:CipherValue/></enc:CipherData>
</enc:EncryptedData>"#
        );
        let mut doc = Document::parse_str(&xml).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        let err = ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap_err();
        assert!(matches!(EncError::of(&err), Some(EncError::Structural(_))));

        // the KeyValue element stayed empty: no material leaked
        let serialized = String::from_utf8(doc.serialize().unwrap()).unwrap();
        assert!(serialized.contains("<ds:KeyValue/>"));
    }

    #[test]
    fn test_dump_summarizes_the_context() {
        let mut doc = Document::parse_str(&template(AES128_CBC, "k1", TYPE_ELEMENT)).unwrap();
        let tmpl = doc.root();

        let mut ctx = EncryptionContext::new(Mode::EncryptedData, store_with_aes128());
        ctx.encrypt_binary(&mut doc, tmpl, b"hello").unwrap();

        let mut out = Vec::new();
        ctx.dump(&mut out).unwrap();
        let dump = String::from_utf8(out).unwrap();

        assert!(dump.contains("EncryptedData encryption context"));
        assert!(dump.contains("status: replaced"));
        assert!(dump.contains(TYPE_ELEMENT));
    }
}
