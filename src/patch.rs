//! Patch codec (spec §4.4).
//!
//! Defines the wire record shape emitted by the [`crate::diff`] engine and
//! decoded on the client, plus a reference [`DomSink`] used only by this
//! crate's own tests to prove the round-trip law (spec §8: applying
//! `diff(old, new)` to `old` produces `new`) without a real browser DOM.
//!
//! # Path convention
//!
//! `path` is root-relative and counts only surviving (post-filter) children,
//! per spec §4.4. The reactive region's own root element is always
//! addressed as `[0]` — i.e. every path implicitly starts "one level below"
//! an unaddressable container that the region root occupies as its sole
//! child. A child of the root is therefore `[0, n]`, a grandchild `[0, n,
//! m]`, and so on. This is the literal convention spec.md's worked examples
//! use (`path:[0,0,0]` for a `<span>` three levels under the reactive root).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::id::StableId;
use crate::node::{Document, Element, Node, Text};
use crate::serialize::render_element;

/// A single atomic DOM mutation instruction (spec §3's `Patch` variant table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Patch {
    /// Replace the text content of the target's first text-node child.
    SetText {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        text: String,
    },
    /// Set (insert or update) an attribute on the target.
    SetAttr {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        key: String,
        value: String,
    },
    /// Remove an attribute from the target.
    RemoveAttr {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        key: String,
    },
    /// Replace the target element's entire outerHTML with the payload.
    Replace {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        html: String,
    },
    /// Insert a new child (HTML) at `index` under the target parent.
    InsertChild {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        index: usize,
        html: String,
    },
    /// Remove the child at `index` under the target parent.
    RemoveChild {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        index: usize,
    },
    /// Move an existing child (identified by `child_id`) from one index to
    /// another under the target parent.
    MoveChild {
        path: Vec<usize>,
        #[serde(rename = "d")]
        id: StableId,
        from: usize,
        to: usize,
        child_id: StableId,
    },
}

impl Patch {
    /// The path carried by every variant.
    pub fn path(&self) -> &[usize] {
        match self {
            Patch::SetText { path, .. }
            | Patch::SetAttr { path, .. }
            | Patch::RemoveAttr { path, .. }
            | Patch::Replace { path, .. }
            | Patch::InsertChild { path, .. }
            | Patch::RemoveChild { path, .. }
            | Patch::MoveChild { path, .. } => path,
        }
    }

    /// The target/parent stable id carried by every variant.
    pub fn id(&self) -> StableId {
        match self {
            Patch::SetText { id, .. }
            | Patch::SetAttr { id, .. }
            | Patch::RemoveAttr { id, .. }
            | Patch::Replace { id, .. }
            | Patch::InsertChild { id, .. }
            | Patch::RemoveChild { id, .. }
            | Patch::MoveChild { id, .. } => *id,
        }
    }
}

/// Encode a patch list as JSON (the wire format spec §6 mandates:
/// "UTF-8 text with a structured-record format (JSON-compatible)").
pub fn encode(patches: &[Patch]) -> CoreResult<String> {
    serde_json::to_string(patches).map_err(|e| CoreError::PatchApplyFailure(e.to_string()))
}

/// Decode a patch list previously produced by [`encode`].
pub fn decode(json: &str) -> CoreResult<Vec<Patch>> {
    serde_json::from_str(json).map_err(|e| CoreError::PatchApplyFailure(e.to_string()))
}

/// Reference in-memory "DOM" used to validate the round-trip law in tests:
/// applying `diff(old, new)` to `old` must produce a tree structurally equal
/// to `new`. A real client applies the same semantics to a browser DOM
/// (spec §4.4); this sink applies them to our own [`Document`] instead.
pub struct DomSink {
    pub document: Document,
}

impl DomSink {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    /// Apply a full ordered patch sequence. Per spec §7, either the whole
    /// sequence applies or none of it does from the caller's point of view;
    /// this method stops at the first failure and returns the id of the
    /// offending patch.
    pub fn apply_all(&mut self, patches: &[Patch]) -> CoreResult<()> {
        for patch in patches {
            self.apply(patch)?;
        }
        Ok(())
    }

    fn apply(&mut self, patch: &Patch) -> CoreResult<()> {
        match patch {
            Patch::SetText { path, id, text } => {
                let target = self.resolve_mut(path, *id)?;
                set_first_text(target, text);
            }
            Patch::SetAttr { path, id, key, value } => {
                let target = self.resolve_mut(path, *id)?;
                target.attrs.set(key.clone(), value.clone());
            }
            Patch::RemoveAttr { path, id, key } => {
                let target = self.resolve_mut(path, *id)?;
                target.attrs.remove(key);
            }
            Patch::Replace { path, id, html } => {
                let new_node = crate::parser::parse_fragment(html, "dj-replace-wrap")
                    .map_err(|e| CoreError::PatchApplyFailure(e.to_string()))?;
                self.replace_node(path, *id, new_node)?;
            }
            Patch::InsertChild { path, id, index, html } => {
                // `render_subtree` emits either real element markup (always
                // starting with `<`) or bare escaped text for a `Node::Text`
                // payload (spec §4.3/§4.4's sibling-kind-change handling); a
                // text payload must become a text node, not get wrapped and
                // parsed as an element.
                let node = if html.trim_start().starts_with('<') {
                    let new_node = crate::parser::parse_fragment(html, "dj-insert-wrap")
                        .map_err(|e| CoreError::PatchApplyFailure(e.to_string()))?;
                    Node::Element(Box::new(new_node))
                } else {
                    Node::Text(Text::new(html_unescape(html)))
                };
                let parent = self.resolve_mut(path, *id)?;
                let idx = (*index).min(parent.children.len());
                parent.children.insert(idx, node);
            }
            Patch::RemoveChild { path, id, index } => {
                let parent = self.resolve_mut(path, *id)?;
                if *index >= parent.children.len() {
                    return Err(CoreError::PatchApplyFailure(format!(
                        "remove index {index} out of bounds"
                    )));
                }
                parent.children.remove(*index);
            }
            Patch::MoveChild { path, id, from, to, .. } => {
                let parent = self.resolve_mut(path, *id)?;
                if *from >= parent.children.len() {
                    return Err(CoreError::PatchApplyFailure(format!(
                        "move source index {from} out of bounds"
                    )));
                }
                let node = parent.children.remove(*from);
                let to = (*to).min(parent.children.len());
                parent.children.insert(to, node);
            }
        }
        Ok(())
    }

    /// Resolve the target element by id first, falling back to path
    /// traversal, per spec §4.4 ("the client prefers ID lookup and falls
    /// back to path traversal").
    fn resolve_mut(&mut self, path: &[usize], id: StableId) -> CoreResult<&mut Element> {
        if self.document.find_by_id(id).is_some() {
            return find_by_id_mut(&mut self.document.root, id).ok_or_else(|| {
                CoreError::PatchApplyFailure(format!("id {id} vanished between lookup and mutation"))
            });
        }
        find_by_path_mut(&mut self.document.root, path).ok_or_else(|| {
            CoreError::PatchApplyFailure(format!("no element at path {path:?} or id {id}"))
        })
    }

    fn replace_node(&mut self, path: &[usize], id: StableId, new_elem: Element) -> CoreResult<()> {
        // Replace addresses the node itself, so we need its *parent* to
        // splice the new subtree in at the same slot.
        let Some((&last, parent_path)) = path.split_last() else {
            self.document.root = new_elem;
            return Ok(());
        };
        let parent = find_by_path_mut(&mut self.document.root, parent_path).ok_or_else(|| {
            CoreError::PatchApplyFailure(format!("no parent at path {parent_path:?} for replace of {id}"))
        })?;
        if last >= parent.children.len() {
            return Err(CoreError::PatchApplyFailure(format!(
                "replace index {last} out of bounds"
            )));
        }
        parent.children[last] = Node::Element(Box::new(new_elem));
        Ok(())
    }
}

fn set_first_text(elem: &mut Element, text: &str) {
    if let Some(Node::Text(t)) = elem.children.iter_mut().find(|c| c.is_text()) {
        t.content = text.to_string();
    } else {
        elem.children.insert(0, Node::Text(Text::new(text.to_string())));
    }
}

fn find_by_id_mut(elem: &mut Element, id: StableId) -> Option<&mut Element> {
    if elem.stable_id == id {
        return Some(elem);
    }
    for child in elem.children.iter_mut() {
        if let Node::Element(e) = child {
            if let Some(found) = find_by_id_mut(e, id) {
                return Some(found);
            }
        }
    }
    None
}

/// `path` here is the *full* root-relative path (leading `0` included, per
/// the module convention) to the element being addressed.
fn find_by_path_mut<'a>(root: &'a mut Element, path: &[usize]) -> Option<&'a mut Element> {
    let (&first, rest) = path.split_first()?;
    if first != 0 {
        return None;
    }
    let mut current = root;
    for &idx in rest {
        current = current.children.get_mut(idx)?.as_element_mut()?;
    }
    Some(current)
}

/// Render a patch's `Replace`/`InsertChild` subtree payload.
pub(crate) fn render_subtree(node: &Node) -> String {
    match node {
        Node::Element(e) => render_element(e),
        Node::Text(t) => html_escape(&t.content),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Inverse of [`html_escape`]; undoes the replacements in reverse order so an
/// original `&amp;` is never mistaken for a second round of escaping.
fn html_unescape(s: &str) -> String {
    s.replace("&gt;", ">").replace("&lt;", "<").replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_wire_round_trip() {
        let patches = vec![Patch::SetText {
            path: vec![0, 0, 0],
            id: StableId::from_raw(7),
            text: "1".to_string(),
        }];
        let json = encode(&patches).unwrap();
        assert!(json.contains("\"type\":\"SetText\""));
        assert!(json.contains("\"d\":\"7\""));
        let back = decode(&json).unwrap();
        assert_eq!(back, patches);
    }
}
