//! Building the document tree from `quick-xml` events.

use anyhow::{Context, Result, bail};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::xml::{Attribute, Document, Element, Node, NodeId, NodeKind};

impl Document {
    /// Parses a complete document from a string.
    pub fn parse_str(xml: &str) -> Result<Self> {
        let mut reader = NsReader::from_str(xml);
        let mut doc = Document::empty();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            match reader.read_event().context("malformed XML")? {
                Event::Start(start) => {
                    let id = push_element(&mut doc, &reader, &start)?;
                    attach(&mut doc, &mut stack, &mut root, id)?;
                    stack.push(id);
                }
                Event::Empty(start) => {
                    let id = push_element(&mut doc, &reader, &start)?;
                    attach(&mut doc, &mut stack, &mut root, id)?;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(text) => {
                    let text = text.unescape().context("malformed character data")?;
                    if stack.is_empty() {
                        if !text.trim().is_empty() {
                            bail!("text content outside the root element");
                        }
                    } else {
                        let id = doc.push_node(Node { parent: None, children: Vec::new(), kind: NodeKind::Text(text.into_owned()) });
                        attach(&mut doc, &mut stack, &mut root, id)?;
                    }
                }
                Event::CData(data) => {
                    if !stack.is_empty() {
                        let text = String::from_utf8(data.into_inner().into_owned()).context("CDATA section is not valid UTF-8")?;
                        let id = doc.push_node(Node { parent: None, children: Vec::new(), kind: NodeKind::Text(text) });
                        attach(&mut doc, &mut stack, &mut root, id)?;
                    }
                }
                Event::Comment(comment) => {
                    if !stack.is_empty() {
                        let text = String::from_utf8(comment.into_inner().into_owned()).context("comment is not valid UTF-8")?;
                        let id = doc.push_node(Node { parent: None, children: Vec::new(), kind: NodeKind::Comment(text) });
                        attach(&mut doc, &mut stack, &mut root, id)?;
                    }
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        doc.root = root.context("document holds no root element")?;
        Ok(doc)
    }

    /// Parses a document from raw bytes.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(bytes).context("document is not valid UTF-8")?;
        Self::parse_str(xml)
    }
}

/// Parses a fragment in a given namespace scope: the bytes are wrapped in a
/// synthetic element declaring every in-scope prefix, so prefixes the
/// fragment inherited from its original ancestors still resolve. The
/// returned document's root is the wrapper; its children are the fragment.
pub(crate) fn parse_fragment(bytes: &[u8], scope: &[(String, String)]) -> Result<Document> {
    let body = std::str::from_utf8(bytes).context("fragment is not valid UTF-8")?;

    let mut wrapped = String::with_capacity(body.len() + 64);
    wrapped.push_str("<fragment-scope");
    for (prefix, uri) in scope {
        if prefix.is_empty() {
            wrapped.push_str(" xmlns=\"");
        } else {
            wrapped.push_str(" xmlns:");
            wrapped.push_str(prefix);
            wrapped.push('=');
            wrapped.push('"');
        }
        wrapped.push_str(&escape(uri.as_str()));
        wrapped.push('"');
    }
    wrapped.push('>');
    wrapped.push_str(body);
    wrapped.push_str("</fragment-scope>");

    Document::parse_str(&wrapped)
}

fn push_element<R>(doc: &mut Document, reader: &NsReader<R>, start: &BytesStart<'_>) -> Result<NodeId> {
    let (resolution, local) = reader.resolve_element(start.name());
    let ns = match resolution {
        ResolveResult::Bound(ns) => Some(String::from_utf8(ns.0.to_vec()).context("namespace URI is not valid UTF-8")?),
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            bail!("undeclared namespace prefix {prefix:?}");
        }
    };
    let local = String::from_utf8(local.as_ref().to_vec()).context("element name is not valid UTF-8")?;
    let raw_name = String::from_utf8(start.name().as_ref().to_vec()).context("element name is not valid UTF-8")?;

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.context("malformed attribute")?;
        let raw = String::from_utf8(attr.key.as_ref().to_vec()).context("attribute name is not valid UTF-8")?;
        let local = String::from_utf8(attr.key.local_name().as_ref().to_vec()).context("attribute name is not valid UTF-8")?;
        let value = attr.unescape_value().context("malformed attribute value")?.into_owned();
        attributes.push(Attribute { raw_name: raw, local, value });
    }

    let element = Element { ns, local, raw_name, attributes };
    Ok(doc.push_node(Node { parent: None, children: Vec::new(), kind: NodeKind::Element(element) }))
}

fn attach(doc: &mut Document, stack: &mut [NodeId], root: &mut Option<NodeId>, id: NodeId) -> Result<()> {
    match stack.last() {
        Some(&parent) => {
            doc.nodes[id.0].parent = Some(parent);
            doc.nodes[parent.0].children.push(id);
        }
        None => {
            if matches!(doc.nodes[id.0].kind, NodeKind::Element(_)) {
                if root.is_some() {
                    bail!("more than one root element");
                }
                *root = Some(id);
            }
        }
    }
    Ok(())
}
