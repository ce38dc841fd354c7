//! The transform chain.
//!
//! Owns the ordered stages of one encryption or decryption run and drives
//! them end to end, exactly once. Input is either a caller-supplied buffer,
//! an output sink the caller serializes into, or a URI installed at the
//! head of the chain.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail, ensure};

use crate::config::{ATTR_ALGORITHM, NODE_TRANSFORM, XMLDSIG_NS, XMLENC_NS};
use crate::error::EncError;
use crate::transform::{EncryptionAlgorithm, Transform, TransformUsage};
use crate::types::Operation;
use crate::xml::{Document, NodeId};

/// Ordered chain of transforms plus the optional URI input feeding it.
pub struct TransformChain {
    input: Option<PathBuf>,
    transforms: Vec<Box<dyn Transform>>,
    method: Option<usize>,
    result: Option<Vec<u8>>,
}

impl TransformChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self { input: None, transforms: Vec::new(), method: None, result: None }
    }

    /// Appends a stage at the tail.
    pub fn append(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// Prepends a stage at the head.
    pub fn prepend(&mut self, transform: Box<dyn Transform>) {
        self.transforms.insert(0, transform);
        if let Some(method) = &mut self.method {
            *method += 1;
        }
    }

    /// Appends the encryption-method stage, remembering its position so a
    /// key can be bound to it later.
    pub fn append_method(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
        self.method = Some(self.transforms.len() - 1);
    }

    /// Returns the encryption-method stage, if one was attached.
    pub fn method_mut(&mut self) -> Option<&mut (dyn Transform + '_)> {
        match self.method {
            Some(i) => Some(self.transforms[i].as_mut()),
            None => None,
        }
    }

    /// Installs a URI input at the head of the chain. Supported forms are
    /// `file:` URIs and bare filesystem paths; fetch policy for anything
    /// else is out of scope and rejected.
    pub fn set_uri(&mut self, uri: &str) -> Result<()> {
        ensure!(self.input.is_none(), EncError::Pipeline("chain input is already set".into()));

        let path = if let Some(rest) = uri.strip_prefix("file://") {
            rest
        } else if let Some(rest) = uri.strip_prefix("file:") {
            rest
        } else if uri.contains("://") {
            bail!(EncError::Pipeline(format!("unsupported URI scheme in \"{uri}\"")));
        } else {
            uri
        };
        ensure!(!path.is_empty(), EncError::Pipeline(format!("empty URI \"{uri}\"")));

        self.input = Some(PathBuf::from(path));
        Ok(())
    }

    /// Builds the encryption-method stage from an `EncryptionMethod` node
    /// and attaches it.
    pub fn read_method_node(&mut self, doc: &Document, node: NodeId, usage: TransformUsage, operation: Operation) -> Result<()> {
        let transform = build_transform(doc, node, usage, operation)?;
        self.append_method(transform);
        Ok(())
    }

    /// Reads a `Transforms` node: each `dsig:Transform` child is built with
    /// the given usage and appended in document order.
    pub fn read_transforms_node(&mut self, doc: &Document, node: NodeId, usage: TransformUsage, operation: Operation) -> Result<()> {
        for child in doc.element_children(node) {
            if !doc.is_element(child, XMLDSIG_NS, NODE_TRANSFORM) && !doc.is_element(child, XMLENC_NS, NODE_TRANSFORM) {
                bail!(EncError::Structural(format!("expected <Transform>, found <{}>", doc.display_name(child))));
            }
            let transform = build_transform(doc, child, usage, operation)?;
            self.append(transform);
        }
        Ok(())
    }

    /// Pushes one buffer through every stage in order.
    pub fn execute_binary(&mut self, data: &[u8]) -> Result<()> {
        self.run(data.to_vec())
    }

    /// Reads the URI input and drives the chain from it.
    pub fn execute(&mut self) -> Result<()> {
        let path = self.input.take().ok_or_else(|| EncError::Pipeline("chain has no input to execute from".into()))?;
        let data = std::fs::read(&path).with_context(|| EncError::Pipeline(format!("reading input from {}", path.display())))?;
        self.run(data)
    }

    /// Returns a sink tied to the head of the chain. Bytes written into it
    /// are collected and pushed through the chain when the sink is closed.
    pub fn output_sink(&mut self) -> ChainSink<'_> {
        ChainSink { chain: self, buf: Vec::new() }
    }

    /// The final output of the executed chain.
    #[must_use]
    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }

    fn run(&mut self, data: Vec<u8>) -> Result<()> {
        ensure!(self.result.is_none(), EncError::Pipeline("chain has already been executed".into()));

        let mut buf = data;
        for transform in &mut self.transforms {
            let name = transform.name();
            buf = transform.apply(buf).with_context(|| EncError::Pipeline(format!("transform \"{name}\" failed")))?;
        }
        self.result = Some(buf);
        Ok(())
    }
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink feeding serialized bytes into the head of a chain.
pub struct ChainSink<'a> {
    chain: &'a mut TransformChain,
    buf: Vec<u8>,
}

impl ChainSink<'_> {
    /// Closes the sink and drives the chain over everything written.
    pub fn close(self) -> Result<()> {
        self.chain.run(self.buf)
    }
}

impl Write for ChainSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn build_transform(doc: &Document, node: NodeId, usage: TransformUsage, operation: Operation) -> Result<Box<dyn Transform>> {
    let Some(uri) = doc.attribute(node, ATTR_ALGORITHM) else {
        bail!(EncError::Algorithm(format!("<{}> has no Algorithm attribute", doc.display_name(node))));
    };
    let Ok(algorithm) = uri.parse::<EncryptionAlgorithm>() else {
        bail!(EncError::Algorithm(format!("unknown algorithm \"{uri}\"")));
    };
    if !algorithm.allowed_for(usage) {
        bail!(EncError::Algorithm(format!("algorithm \"{uri}\" is not allowed in this position")));
    }
    Ok(algorithm.build(operation))
}
