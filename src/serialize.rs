//! Rendering a [`Node`] tree back out to HTML.
//!
//! Used for the session's initial full-document render, for `Replace`
//! patches, and for `HtmlUpdate` fallback messages (spec §6). Every element
//! gets a `data-dj-id` attribute carrying its [`StableId`] so the client can
//! do id-first patch targeting (spec §4.4).

use std::fmt::Write as _;

use crate::node::{Document, Element, Node};

/// Render a full document, including the `data-dj-id` markers.
pub fn render_document(doc: &Document) -> String {
    render_element(&doc.root)
}

/// Render a single element subtree, including `data-dj-id` markers.
pub fn render_element(el: &Element) -> String {
    let mut out = String::new();
    write_element(el, &mut out);
    out
}

fn write_element(el: &Element, out: &mut String) {
    let _ = write!(out, "<{}", el.tag);
    for (k, v) in el.attrs.iter() {
        let _ = write!(out, " {k}=\"{}\"", escape_attr(v.as_str()));
    }
    if !el.stable_id.is_detached() {
        let _ = write!(out, " data-dj-id=\"{}\"", el.stable_id.to_attr_value());
    }
    if is_void_element(&el.tag) {
        out.push_str(" />");
        return;
    }
    out.push('>');
    for child in &el.children {
        write_node(child, out);
    }
    let _ = write!(out, "</{}>", el.tag);
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(e) => write_element(e, out),
        Node::Text(t) => out.push_str(&escape_text(&t.content)),
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

/// HTML5 void elements: self-closing, never carry children or a closing tag.
fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Element;

    #[test]
    fn renders_attrs_children_and_id_marker() {
        let el = Element::new("div").attr("class", "x").text("hi");
        let html = render_element(&el);
        assert!(html.starts_with("<div class=\"x\" data-dj-id=\""));
        assert!(html.ends_with("hi</div>"));
    }

    #[test]
    fn void_elements_self_close_without_children() {
        let el = Element::new("br");
        let html = render_element(&el);
        assert!(html.ends_with("\" />"));
    }

    #[test]
    fn escapes_text_and_attr_values() {
        let el = Element::new("div").attr("title", "a\"b").text("<script>");
        let html = render_element(&el);
        assert!(html.contains("title=\"a&quot;b\""));
        assert!(html.contains("&lt;script&gt;"));
    }
}
