//! The normalized node tree (spec §3).
//!
//! `Comment`, `Doctype`, and `Document`-as-a-node-kind only ever exist
//! transiently while [`crate::parser`] walks the raw HTML5 parse tree; by the
//! time a tree is handed to the diff engine every surviving node is either an
//! [`Element`] or a [`Text`] leaf, which is why `Node` itself only has two
//! variants. [`Document`] is the tree's owning root, not a node kind.

use smallvec::SmallVec;

use crate::attr::Attrs;
use crate::id::StableId;

/// A child node: either an element subtree or a text leaf.
///
/// Order within a `Children` collection is significant and part of a node's
/// identity (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Box<Element>),
    Text(Text),
}

/// Inline-friendly child collection; most elements have a handful of children.
pub type Children = SmallVec<[Node; 8]>;

impl Node {
    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(self, Node::Element(_))
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }

    #[inline]
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    #[inline]
    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    #[inline]
    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Node::Text(t) => Some(t),
            Node::Element(_) => None,
        }
    }

    /// The stable id of this node, if it has one. Text nodes have no id of
    /// their own (spec §3's `Patch` addressing always targets an element —
    /// `SetText` addresses the *parent* element and rewrites its first text
    /// child).
    #[inline]
    pub fn element_id(&self) -> Option<StableId> {
        self.as_element().map(|e| e.stable_id)
    }

    /// True for the `dj-update="ignore"` opt-out marker (spec §4.4): the diff
    /// engine must never descend into a subtree rooted at such an element.
    pub fn is_opt_out(&self) -> bool {
        self.as_element()
            .is_some_and(|e| e.attrs.get("dj-update") == Some("ignore"))
    }
}

/// An element node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lowercase tag name (`div`, `span`, ...).
    pub tag: String,
    /// Attribute map; duplicates are not permitted (spec §3).
    pub attrs: Attrs,
    /// Ordered children.
    pub children: Children,
    /// User-supplied reconciliation key, extracted from `data-key`/`dj-key`.
    pub key: Option<String>,
    /// Identity assigned at parse time, preserved across diffs.
    pub stable_id: StableId,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            children: Children::new(),
            key: None,
            stable_id: StableId::next(),
        }
    }

    /// Builder-style attribute set.
    #[must_use]
    pub fn attr(mut self, k: impl Into<crate::attr::AttrKey>, v: impl Into<crate::attr::AttrValue>) -> Self {
        self.attrs.set(k, v);
        self
    }

    /// Builder-style child append.
    #[must_use]
    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    /// Builder-style text-child append.
    #[must_use]
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.children.push(Node::Text(Text::new(content)));
        self
    }

    /// Whether at least one direct child carries a reconciliation key.
    pub fn has_keyed_children(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.as_element().is_some_and(|e| e.key.is_some()))
    }

    /// Depth-first count of this subtree's elements (including self).
    pub fn element_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|c| match c {
                Node::Element(e) => e.element_count(),
                Node::Text(_) => 0,
            })
            .sum::<usize>()
    }
}

impl From<Element> for Node {
    fn from(e: Element) -> Self {
        Node::Element(Box::new(e))
    }
}

/// A text leaf. Never whitespace-only and never a comment (spec §3 invariants
/// are enforced by [`crate::parser`] before a `Text` node is ever constructed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub content: String,
}

impl Text {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl From<Text> for Node {
    fn from(t: Text) -> Self {
        Node::Text(t)
    }
}

/// The owning root of a tree produced by a single parse/render call.
///
/// A `Document` is created per render; the render controller retains the
/// most recent one as the committed baseline for the next diff (spec §3
/// "Lifecycle").
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    /// Total element count in the tree.
    pub fn element_count(&self) -> usize {
        self.root.element_count()
    }

    /// Find the first element (pre-order) matching `id`.
    pub fn find_by_id(&self, id: StableId) -> Option<&Element> {
        fn walk(e: &Element, id: StableId) -> Option<&Element> {
            if e.stable_id == id {
                return Some(e);
            }
            for c in &e.children {
                if let Node::Element(child) = c {
                    if let Some(found) = walk(child, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(&self.root, id)
    }

    /// Resolve a root-relative child-index path to a node, counting only
    /// surviving (already-filtered) children, matching spec §4.4's addressing
    /// contract. An empty path addresses the root itself.
    pub fn find_by_path(&self, path: &[usize]) -> Option<&Node> {
        let (&first, rest) = path.split_first()?;
        let mut current = self.root.children.get(first)?;
        for &idx in rest {
            current = current.as_element()?.children.get(idx)?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_expected_shape() {
        let el = Element::new("div")
            .attr("class", "x")
            .child(Element::new("span"))
            .text("hi");
        assert_eq!(el.tag, "div");
        assert_eq!(el.attrs.get("class"), Some("x"));
        assert_eq!(el.children.len(), 2);
    }

    #[test]
    fn opt_out_detection() {
        let el: Node = Element::new("div").attr("dj-update", "ignore").into();
        assert!(el.is_opt_out());
        let el2: Node = Element::new("div").into();
        assert!(!el2.is_opt_out());
    }

    #[test]
    fn element_count_counts_only_elements() {
        let el = Element::new("div").child(Element::new("span")).text("hi");
        assert_eq!(el.element_count(), 2);
    }

    #[test]
    fn find_by_path_resolves_nested_child() {
        let doc = Document::new(
            Element::new("div").child(Element::new("p").child(Element::new("span"))),
        );
        let found = doc.find_by_path(&[0, 0]).and_then(Node::as_element).unwrap();
        assert_eq!(found.tag, "span");
        assert!(doc.find_by_path(&[5]).is_none());
    }
}
