//! HTML parsing and normalization (spec §4.2).
//!
//! Parses an already-evaluated HTML5 string (template evaluation is a
//! separate concern, see [`crate::template`]) into the normalized tree
//! defined in [`crate::node`]. Built on `html5ever` + `markup5ever_rcdom` —
//! we let html5ever do the actual HTML5 tokenization/tree-construction
//! algorithm and only walk its `RcDom` output once, converting it into our
//! compact `Node` representation and dropping everything the filtering
//! discipline in spec §4.2 says must not survive.

use html5ever::driver::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::error::{CoreError, CoreResult};
use crate::node::{Document, Element, Node, Text};

/// Strip `<!-- ... -->` comments and collapse runs of whitespace that sit
/// between tags, down to a single space.
///
/// Spec §4.2: "before the parser is applied to any template for which a
/// baseline will be established, the caller must strip HTML comments and
/// collapse inter-tag whitespace in the source." This is what makes the
/// server's parse tree, the HTML sent to the client, and the client's own
/// browser-parsed DOM structurally identical, which positional `path`
/// addressing depends on.
pub fn normalize_source(html: &str) -> String {
    let without_comments = strip_comments(html);
    collapse_inter_tag_whitespace(&without_comments)
}

fn strip_comments(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse whitespace runs that occur strictly between `>` and `<` (i.e.
/// between tags) to a single space; whitespace inside text content that sits
/// next to non-whitespace characters is left untouched.
fn collapse_inter_tag_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();
    let mut last_was_tag_close = true; // treat start-of-document like after a tag
    while let Some(c) = chars.next() {
        if c == '>' {
            out.push('>');
            last_was_tag_close = true;
            continue;
        }
        if last_was_tag_close && c.is_whitespace() {
            let mut run = String::new();
            run.push(c);
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                run.push(chars.next().unwrap());
            }
            if chars.peek() != Some(&'<') {
                // This whitespace run butts up against real text rather than
                // the next tag, so it's part of that text node's content and
                // must survive untouched.
                out.push_str(&run);
            }
            last_was_tag_close = false;
            continue;
        }
        last_was_tag_close = false;
        out.push(c);
    }
    out
}

/// Parse an HTML5 document (or fragment body) into a normalized [`Document`].
///
/// Only the elements found inside `<body>` are kept as the tree's logical
/// content; `<html>`/`<head>` wrapper scaffolding inserted by the HTML5 parse
/// algorithm for non-well-formed fragments is not part of the reactive
/// region's tree.
pub fn parse(html: &str) -> CoreResult<Document> {
    let dom = parse_to_rcdom(html)?;
    let body = find_body(&dom.document).ok_or_else(|| {
        CoreError::Parse("no <body> element found after parsing".to_string())
    })?;
    let body_element = convert_element(&body)
        .ok_or_else(|| CoreError::Parse("document body did not produce an element".to_string()))?;
    let root = body_element
        .children
        .into_iter()
        .find_map(|n| match n {
            Node::Element(e) => Some(*e),
            Node::Text(_) => None,
        })
        .ok_or_else(|| CoreError::Parse("document body has no root element".to_string()))?;
    Ok(Document::new(root))
}

fn parse_to_rcdom(html: &str) -> CoreResult<RcDom> {
    let dom = parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .map_err(|e| CoreError::Parse(e.to_string()))?;
    if !dom.errors.is_empty() {
        // html5ever recovers from most malformed input per the HTML5 spec's
        // error-recovery rules, so parse errors are diagnostic, not fatal.
        tracing::debug!(errors = ?dom.errors, "html5ever recovered from parse errors");
    }
    Ok(dom)
}

fn find_body(handle: &Handle) -> Option<Handle> {
    if let NodeData::Element { ref name, .. } = handle.data {
        if name.local.as_ref() == "body" {
            return Some(handle.clone());
        }
    }
    for child in handle.children.borrow().iter() {
        if let Some(found) = find_body(child) {
            return Some(found);
        }
    }
    None
}

/// Convert a single rcdom element (and its subtree) into our `Element`,
/// applying the filtering discipline: comments are dropped, whitespace-only
/// text nodes are dropped, `data-key`/`dj-key` become the element's `key`.
fn convert_element(handle: &Handle) -> Option<Element> {
    let NodeData::Element { ref name, ref attrs, .. } = handle.data else {
        return None;
    };
    let mut element = Element::new(name.local.as_ref());
    for attr in attrs.borrow().iter() {
        element
            .attrs
            .set(attr.name.local.as_ref(), attr.value.as_ref());
    }
    element.key = element
        .attrs
        .get("data-key")
        .or_else(|| element.attrs.get("dj-key"))
        .map(str::to_string);

    for child in handle.children.borrow().iter() {
        if let Some(node) = convert_node(child) {
            element.children.push(node);
        }
    }
    Some(element)
}

fn convert_node(handle: &Handle) -> Option<Node> {
    match &handle.data {
        NodeData::Element { .. } => convert_element(handle).map(|e| Node::Element(Box::new(e))),
        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            if text.chars().all(char::is_whitespace) {
                None
            } else {
                Some(Node::Text(Text::new(text)))
            }
        }
        // Comments, doctypes, processing instructions and the synthetic
        // Document node never survive into the normalized tree (spec §3).
        NodeData::Comment { .. }
        | NodeData::Doctype { .. }
        | NodeData::ProcessingInstruction { .. }
        | NodeData::Document => None,
    }
}

/// Build a detached `RcDom` element handle directly, bypassing full-document
/// parsing. Used by the reference [`crate::template::evaluator`] tests and by
/// callers that already have a fragment of trusted, evaluated HTML and want
/// to parse it as a standalone element rather than hunting for `<body>`.
pub fn parse_fragment(html: &str, context_tag: &str) -> CoreResult<Element> {
    let wrapped = format!("<{context_tag}>{html}</{context_tag}>");
    let doc = parse(&format!("<html><body>{wrapped}</body></html>"))?;
    doc.root
        .children
        .into_iter()
        .find_map(|n| match n {
            Node::Element(e) if e.tag == context_tag => Some(*e),
            _ => None,
        })
        .ok_or_else(|| CoreError::Parse("fragment did not produce an element".to_string()))
}

/// Attribute-name validation helper reused by the reference evaluator when it
/// needs to know whether a dynamically computed attribute key is sane HTML,
/// grounded in the same "restricted surface" philosophy as spec §4.2's
/// closed filter enumeration.
pub fn is_valid_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_comments_and_whitespace_text() {
        let doc = parse("<html><body><div>  <!-- hi -->  <span>x</span>   </div></body></html>")
            .unwrap();
        assert_eq!(doc.root.tag, "div");
        assert_eq!(doc.root.children.len(), 1);
        assert_eq!(doc.root.children[0].as_element().unwrap().tag, "span");
    }

    #[test]
    fn preserves_non_whitespace_text_verbatim() {
        let doc = parse("<html><body><p>  hello   world  </p></body></html>").unwrap();
        let text = doc.root.children[0].as_text().unwrap();
        assert_eq!(text.content, "  hello   world  ");
    }

    #[test]
    fn extracts_key_from_data_key_and_dj_key() {
        let doc = parse("<html><body><ul><li data-key=\"1\">a</li><li dj-key=\"2\">b</li></ul></body></html>").unwrap();
        let li1 = doc.root.children[0].as_element().unwrap();
        let li2 = doc.root.children[1].as_element().unwrap();
        assert_eq!(li1.key.as_deref(), Some("1"));
        assert_eq!(li2.key.as_deref(), Some("2"));
        // the attribute itself must remain in the serialized output too
        assert_eq!(li1.attrs.get("data-key"), Some("1"));
    }

    #[test]
    fn assigns_unique_stable_ids() {
        let doc = parse("<html><body><div><span>a</span><span>b</span></div></body></html>")
            .unwrap();
        let span0 = doc.root.children[0].element_id().unwrap();
        let span1 = doc.root.children[1].element_id().unwrap();
        assert_ne!(span0, span1);
    }

    #[test]
    fn normalize_source_strips_comments_and_collapses_whitespace() {
        let src = "<div>\n  <!-- note -->\n  <span>x</span>\n</div>";
        let normalized = normalize_source(src);
        assert!(!normalized.contains("<!--"));
        assert_eq!(normalized, "<div><span>x</span></div>");
    }

    #[test]
    fn normalize_source_preserves_text_whitespace() {
        let src = "<p>  hi  there  </p>";
        assert_eq!(normalize_source(src), src);
    }
}
