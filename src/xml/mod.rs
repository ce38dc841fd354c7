//! Mutable XML document tree for the encryption processor.
//!
//! Parsing and serialization are delegated to `quick-xml`; this module owns
//! the tree shape: an arena of nodes addressed by copyable [`NodeId`]
//! handles. A handle is valid exactly as long as the [`Document`] that
//! issued it, which is the Rust rendering of a borrowed node pointer into a
//! caller-owned tree.
//!
//! # Design
//!
//! - Element names are stored twice: the resolved `(namespace, local)` pair
//!   used for all schema checks, and the raw prefixed name used when the
//!   tree is written back out. `xmlns` attributes stay in the attribute list
//!   verbatim so a subtree serializes the way it was parsed.
//! - Nodes are never removed from the arena. Replacement detaches the old
//!   node, which simply becomes unreachable; ids stay stable for the life of
//!   the document.

use std::io::Write;

use anyhow::{Context, Result, ensure};
use hashbrown::HashMap;

pub mod parse;
pub mod write;

/// Index of a node in its [`Document`] arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) usize);

/// A single attribute, name kept as written.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    /// Name as written in the source, prefix included.
    pub raw_name: String,

    /// Local part of the name.
    pub local: String,

    /// Unescaped attribute value.
    pub value: String,
}

/// Element payload: resolved namespace plus names as written.
#[derive(Clone, Debug)]
pub struct Element {
    /// Resolved namespace URI, if the element is in one.
    pub ns: Option<String>,

    /// Local name.
    pub local: String,

    /// Name as written in the source, prefix included.
    pub raw_name: String,

    /// Attributes in document order, `xmlns` declarations included.
    pub attributes: Vec<Attribute>,
}

impl Element {
    /// Returns the prefix of the raw name, empty for unprefixed elements.
    #[must_use]
    pub fn prefix(&self) -> &str {
        match self.raw_name.split_once(':') {
            Some((prefix, _)) => prefix,
            None => "",
        }
    }

    /// Returns true if the element itself declares the given prefix
    /// (empty string for the default namespace).
    #[must_use]
    pub fn declares_prefix(&self, prefix: &str) -> bool {
        self.attributes.iter().any(|a| {
            if prefix.is_empty() {
                a.raw_name == "xmlns"
            } else {
                a.raw_name.strip_prefix("xmlns:") == Some(prefix)
            }
        })
    }
}

/// Node payload.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Element(Element),
    Text(String),
    Comment(String),
}

pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) kind: NodeKind,
}

/// Arena-backed XML document.
pub struct Document {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    ids: HashMap<String, NodeId>,
}

impl Document {
    /// Returns the root element of the document.
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Returns the payload of a node.
    #[inline]
    #[must_use]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// Returns the parent of a node, `None` for the root and for detached
    /// nodes.
    #[inline]
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Returns the children of a node in document order.
    #[inline]
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Returns the element payload of a node, `None` for text and comments.
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Checks a node against a `(namespace, local name)` pair.
    #[must_use]
    pub fn is_element(&self, id: NodeId, ns: &str, local: &str) -> bool {
        self.element(id).is_some_and(|el| el.local == local && el.ns.as_deref() == Some(ns))
    }

    /// Iterates the element children of a node, skipping text and comments.
    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).iter().copied().filter(|&c| self.element(c).is_some())
    }

    /// Returns the first element child of a node, skipping text and
    /// comments.
    #[must_use]
    pub fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
        self.element_children(id).next()
    }

    /// Returns the next element sibling of a node, skipping text and
    /// comments.
    #[must_use]
    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings[pos + 1..].iter().copied().find(|&c| self.element(c).is_some())
    }

    /// Reads an attribute by local name.
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attributes.iter().find(|a| a.local == name && !a.raw_name.starts_with("xmlns")).map(|a| a.value.as_str())
    }

    /// Returns the concatenated text of the node and its descendants, the
    /// way `xmlNodeGetContent` reports it: verbatim, entity references
    /// already resolved by the parser, no whitespace normalization.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            match &self.nodes[cur.0].kind {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Comment(_) => {}
                NodeKind::Element(_) => {
                    for &child in self.children(cur).iter().rev() {
                        stack.push(child);
                    }
                }
            }
        }
        out
    }

    /// Replaces the children of an element with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        let child = self.push_node(Node { parent: Some(id), children: Vec::new(), kind: NodeKind::Text(text.to_owned()) });
        let old = std::mem::replace(&mut self.nodes[id.0].children, vec![child]);
        for c in old {
            self.nodes[c.0].parent = None;
        }
    }

    /// Replaces `old` with `new` in the tree. `new` is detached from its
    /// current position first; `old` becomes unreachable.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        ensure!(old != new, "cannot replace a node with itself");
        self.detach(new);
        match self.nodes[old.0].parent {
            Some(parent) => {
                let pos = self.nodes[parent.0].children.iter().position(|&c| c == old).context("node is not among its parent's children")?;
                self.nodes[parent.0].children[pos] = new;
                self.nodes[new.0].parent = Some(parent);
                self.nodes[old.0].parent = None;
            }
            None => {
                ensure!(old == self.root, "cannot replace a detached node");
                self.root = new;
            }
        }
        Ok(())
    }

    /// Replaces the children of `node` with the single node `new`.
    pub fn replace_children(&mut self, node: NodeId, new: NodeId) -> Result<()> {
        ensure!(node != new, "cannot nest a node inside itself");
        self.detach(new);
        let old = std::mem::replace(&mut self.nodes[node.0].children, vec![new]);
        for c in old {
            self.nodes[c.0].parent = None;
        }
        self.nodes[new.0].parent = Some(node);
        Ok(())
    }

    /// Replaces `node` with the given bytes reparsed as an XML fragment in
    /// the namespace context of the node's parent. The fragment may contain
    /// any number of top-level nodes unless `node` is the document root, in
    /// which case it must reduce to exactly one element.
    pub fn replace_node_with_fragment(&mut self, node: NodeId, bytes: &[u8]) -> Result<()> {
        let parent = self.parent(node);
        let scope = match parent {
            Some(p) => self.in_scope_namespaces(p),
            None => Vec::new(),
        };
        let fragment = parse::parse_fragment(bytes, &scope).context("reparsing decrypted fragment")?;

        let imported: Vec<NodeId> = fragment.children(fragment.root()).iter().map(|&c| self.import_subtree(&fragment, c)).collect();

        match parent {
            Some(p) => {
                let pos = self.nodes[p.0].children.iter().position(|&c| c == node).context("node is not among its parent's children")?;
                self.nodes[p.0].children.splice(pos..=pos, imported.iter().copied());
                for &c in &imported {
                    self.nodes[c.0].parent = Some(p);
                }
                self.nodes[node.0].parent = None;
            }
            None => {
                ensure!(node == self.root, "cannot replace a detached node");
                let mut elements = imported.iter().copied().filter(|&c| self.element(c).is_some());
                let new_root = elements.next().context("fragment replacing the document root holds no element")?;
                ensure!(elements.next().is_none(), "fragment replacing the document root holds more than one element");
                self.root = new_root;
            }
        }
        Ok(())
    }

    /// Deep-copies a subtree from another document into this one. The copy
    /// is detached; attach it with [`Self::replace_node`] or
    /// [`Self::replace_children`].
    pub fn import_subtree(&mut self, src: &Document, node: NodeId) -> NodeId {
        let kind = src.nodes[node.0].kind.clone();
        let id = self.push_node(Node { parent: None, children: Vec::new(), kind });
        for &child in src.children(node) {
            let imported = self.import_subtree(src, child);
            self.nodes[imported.0].parent = Some(id);
            self.nodes[id.0].children.push(imported);
        }
        id
    }

    /// Serializes the whole document.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write::write_subtree(self, self.root, &mut out, &[])?;
        Ok(out)
    }

    /// Serializes the subtree rooted at `id` into `out`, re-declaring any
    /// in-scope namespace prefixes the subtree uses but does not itself
    /// declare, so the dump stays well-formed on its own.
    pub fn dump_subtree(&self, id: NodeId, out: &mut impl Write) -> Result<()> {
        let inherited = self.inherited_declarations(id);
        write::write_subtree(self, id, out, &inherited)
    }

    /// Serializes each child of `id` in document order into `out`.
    pub fn dump_children(&self, id: NodeId, out: &mut impl Write) -> Result<()> {
        for &child in self.children(id) {
            let inherited = self.inherited_declarations(child);
            write::write_subtree(self, child, out, &inherited)?;
        }
        Ok(())
    }

    /// Walks the subtree rooted at `id` and records every attribute whose
    /// local name is listed in `id_attrs` in the document id index.
    pub fn register_ids(&mut self, id: NodeId, id_attrs: &[&str]) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let NodeKind::Element(el) = &self.nodes[cur.0].kind {
                for attr in &el.attributes {
                    if id_attrs.contains(&attr.local.as_str()) && !attr.raw_name.starts_with("xmlns") {
                        self.ids.insert(attr.value.clone(), cur);
                    }
                }
            }
            stack.extend(self.children(cur).iter().copied());
        }
    }

    /// Looks an element up by registered id value.
    #[must_use]
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    /// Collects the namespace declarations in scope at `id`, innermost
    /// first. The empty prefix stands for the default namespace.
    #[must_use]
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(String, String)> {
        let mut scope: Vec<(String, String)> = Vec::new();
        let mut cur = Some(id);
        while let Some(node) = cur {
            if let NodeKind::Element(el) = &self.nodes[node.0].kind {
                for attr in &el.attributes {
                    let prefix = if attr.raw_name == "xmlns" {
                        Some("")
                    } else {
                        attr.raw_name.strip_prefix("xmlns:")
                    };
                    if let Some(prefix) = prefix {
                        if !scope.iter().any(|(p, _)| p == prefix) {
                            scope.push((prefix.to_owned(), attr.value.clone()));
                        }
                    }
                }
            }
            cur = self.parent(node);
        }
        scope
    }

    /// Returns a display name for diagnostics: the raw element name, or a
    /// `#text` / `#comment` marker.
    #[must_use]
    pub fn display_name(&self, id: NodeId) -> &str {
        match &self.nodes[id.0].kind {
            NodeKind::Element(el) => &el.raw_name,
            NodeKind::Text(_) => "#text",
            NodeKind::Comment(_) => "#comment",
        }
    }

    /// Declarations a standalone dump of `id` needs: prefixes used inside
    /// the subtree that the subtree root does not declare itself, resolved
    /// from the ancestors' scope.
    fn inherited_declarations(&self, id: NodeId) -> Vec<(String, String)> {
        let Some(parent) = self.parent(id) else {
            return Vec::new();
        };
        let scope = self.in_scope_namespaces(parent);
        if scope.is_empty() {
            return Vec::new();
        }

        let mut used: Vec<&str> = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let NodeKind::Element(el) = &self.nodes[cur.0].kind {
                let prefix = el.prefix();
                if !used.contains(&prefix) {
                    used.push(prefix);
                }
                for attr in &el.attributes {
                    if let Some((p, _)) = attr.raw_name.split_once(':') {
                        if p != "xmlns" && !used.contains(&p) {
                            used.push(p);
                        }
                    }
                }
                stack.extend(self.children(cur).iter().copied());
            }
        }

        scope
            .into_iter()
            .filter(|(prefix, _)| {
                let needed = used.contains(&prefix.as_str());
                needed && !self.element(id).is_some_and(|el| el.declares_prefix(prefix))
            })
            .collect()
    }

    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    pub(crate) fn empty() -> Self {
        Self { nodes: Vec::new(), root: NodeId(0), ids: HashMap::new() }
    }
}
