//! Serializing the document tree through `quick-xml`.

use std::io::Write;

use anyhow::Result;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::xml::{Document, NodeId, NodeKind};

/// Writes the subtree rooted at `id` into `out`. `extra_ns` carries
/// inherited namespace declarations to add on the subtree root (prefix,
/// URI; empty prefix for the default namespace).
pub(crate) fn write_subtree(doc: &Document, id: NodeId, out: &mut impl Write, extra_ns: &[(String, String)]) -> Result<()> {
    let mut writer = Writer::new(out);
    write_node(doc, id, &mut writer, extra_ns)?;
    Ok(())
}

fn write_node<W: Write>(doc: &Document, id: NodeId, writer: &mut Writer<W>, extra_ns: &[(String, String)]) -> Result<()> {
    match &doc.nodes[id.0].kind {
        NodeKind::Element(el) => {
            let mut start = BytesStart::new(el.raw_name.as_str());
            for attr in &el.attributes {
                start.push_attribute((attr.raw_name.as_str(), attr.value.as_str()));
            }
            for (prefix, uri) in extra_ns {
                if prefix.is_empty() {
                    start.push_attribute(("xmlns", uri.as_str()));
                } else {
                    let name = format!("xmlns:{prefix}");
                    start.push_attribute((name.as_str(), uri.as_str()));
                }
            }

            let children = doc.children(id);
            if children.is_empty() {
                writer.write_event(Event::Empty(start))?;
            } else {
                writer.write_event(Event::Start(start))?;
                for &child in children {
                    write_node(doc, child, writer, &[])?;
                }
                writer.write_event(Event::End(BytesEnd::new(el.raw_name.as_str())))?;
            }
        }
        NodeKind::Text(text) => {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        NodeKind::Comment(text) => {
            writer.write_event(Event::Comment(BytesText::from_escaped(text.as_str())))?;
        }
    }
    Ok(())
}
