//! The diff engine (spec §4.3).
//!
//! Produces an ordered [`Patch`](crate::patch::Patch) list that turns an old
//! committed [`Document`] into a new one, plus a verdict on whether the
//! change is too large or too deep to express incrementally (in which case
//! the render controller falls back to a full reload, spec §4.3/§4.5).
//!
//! Top-down, per-node-pair comparison: element vs. element recurses,
//! anything else (tag change, text/element kind swap) replaces. Children are
//! reconciled positionally unless any sibling in the list carries a key, in
//! which case keyed reconciliation (§4.3) applies and
//! [`lcs::longest_increasing_subsequence`] finds the minimal set of
//! [`Patch::MoveChild`] patches needed. `dj-update="ignore"` subtrees are
//! never descended into once identified as opt-out (spec §4.4).
//!
//! The module also performs stable-id synchronization as it recurses:
//! whenever a new-side element is judged to be a continuation of an
//! old-side element (same position in the tree after reconciliation), the
//! old element's [`StableId`] is copied onto the new one, so the id an
//! element was first assigned keeps addressing it across any number of
//! renders (spec §3).

pub mod lcs;

use crate::id::StableId;
use crate::node::{Children, Document, Element, Node};
use crate::patch::{render_subtree, Patch};

/// Limits that bound a single diff invocation (spec §4.3's "the diff must
/// not be allowed to run unbounded on pathological input").
#[derive(Debug, Clone, Copy)]
pub struct DiffConfig {
    /// Maximum recursion depth before the diff gives up and asks for a reload.
    pub max_depth: usize,
    /// Maximum number of patches before the diff gives up and asks for a reload.
    pub max_ops: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_ops: 4096,
        }
    }
}

/// Counters describing what a diff run actually did, useful for logging and
/// for the test suite's assertions about which code path fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub elements_compared: usize,
    pub text_nodes_compared: usize,
    pub nodes_kept: usize,
    pub nodes_moved: usize,
    pub nodes_replaced: usize,
    pub text_updates: usize,
    pub attr_updates: usize,
}

/// Outcome of a diff invocation.
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub patches: Vec<Patch>,
    /// Set when the diff could not be completed incrementally; the caller
    /// should fall back to a full re-render (spec §4.3/§4.5).
    pub should_reload: bool,
    pub reload_reason: Option<String>,
    pub stats: DiffStats,
}

impl DiffResult {
    fn reload(reason: impl Into<String>, stats: DiffStats) -> Self {
        Self {
            patches: Vec::new(),
            should_reload: true,
            reload_reason: Some(reason.into()),
            stats,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.patches.is_empty()
    }
}

struct Ctx<'a> {
    patches: Vec<Patch>,
    stats: DiffStats,
    config: &'a DiffConfig,
}

impl Ctx<'_> {
    /// Push a patch and check whether the op budget has been exceeded.
    fn emit(&mut self, patch: Patch) -> Result<(), ()> {
        self.patches.push(patch);
        if self.patches.len() > self.config.max_ops {
            return Err(());
        }
        Ok(())
    }
}

/// Diff `old` against `new`, mutating `new`'s stable ids in place to carry
/// forward identity from matched `old` nodes. The caller commits `new` as
/// the next baseline after this call, so its ids are exactly the ones
/// referenced by the returned patches.
pub fn diff(old: &Document, new: &mut Document, config: &DiffConfig) -> DiffResult {
    let mut ctx = Ctx {
        patches: Vec::new(),
        stats: DiffStats::default(),
        config,
    };
    let mut path = vec![0usize];
    match diff_element(&old.root, &mut new.root, &mut path, 0, &mut ctx) {
        Ok(()) => DiffResult {
            patches: ctx.patches,
            should_reload: false,
            reload_reason: None,
            stats: ctx.stats,
        },
        Err(()) => DiffResult::reload(
            "diff exceeded configured depth/op budget; falling back to full reload",
            ctx.stats,
        ),
    }
}

fn diff_element(
    old: &Element,
    new: &mut Element,
    path: &mut Vec<usize>,
    depth: usize,
    ctx: &mut Ctx<'_>,
) -> Result<(), ()> {
    ctx.stats.elements_compared += 1;
    if depth > ctx.config.max_depth {
        return Err(());
    }

    if old.tag != new.tag {
        ctx.emit(Patch::Replace {
            path: path.clone(),
            id: old.stable_id,
            html: render_subtree(&Node::Element(Box::new(new.clone()))),
        })?;
        ctx.stats.nodes_replaced += 1;
        return Ok(());
    }

    // Continuation of the same logical element: carry the identity forward.
    new.stable_id = old.stable_id;
    ctx.stats.nodes_kept += 1;

    if is_opt_out(old) || is_opt_out(new) {
        return Ok(());
    }

    diff_attrs(old, new, path, ctx)?;
    diff_children(old, new, path, depth, ctx)?;
    Ok(())
}

fn is_opt_out(el: &Element) -> bool {
    el.attrs.get("dj-update") == Some("ignore")
}

fn diff_attrs(old: &Element, new: &Element, path: &[usize], ctx: &mut Ctx<'_>) -> Result<(), ()> {
    for (key, _) in old.attrs.iter() {
        if !new.attrs.has(key) {
            ctx.emit(Patch::RemoveAttr {
                path: path.to_vec(),
                id: new.stable_id,
                key: key.to_string(),
            })?;
            ctx.stats.attr_updates += 1;
        }
    }
    for (key, value) in new.attrs.iter() {
        if old.attrs.get(key) != Some(value.as_str()) {
            ctx.emit(Patch::SetAttr {
                path: path.to_vec(),
                id: new.stable_id,
                key: key.to_string(),
                value: value.to_string(),
            })?;
            ctx.stats.attr_updates += 1;
        }
    }
    Ok(())
}

fn diff_children(
    old: &Element,
    new: &mut Element,
    path: &mut Vec<usize>,
    depth: usize,
    ctx: &mut Ctx<'_>,
) -> Result<(), ()> {
    if old.has_keyed_children() || new.has_keyed_children() {
        diff_children_keyed(old, new, path, depth, ctx)
    } else {
        diff_children_indexed(old, new, path, depth, ctx)
    }
}

fn first_text_index(children: &Children) -> Option<usize> {
    children.iter().position(Node::is_text)
}

/// Positional reconciliation for sibling lists with no keys.
fn diff_children_indexed(
    old: &Element,
    new: &mut Element,
    path: &mut Vec<usize>,
    depth: usize,
    ctx: &mut Ctx<'_>,
) -> Result<(), ()> {
    let parent_id = new.stable_id;
    let common = old.children.len().min(new.children.len());
    let new_first_text = first_text_index(&new.children);

    // Removals at the tail are emitted in descending index order so that
    // client-side index arithmetic never has to account for an
    // already-applied shift (spec §4.3's emission-ordering contract).
    for i in (common..old.children.len()).rev() {
        ctx.emit(Patch::RemoveChild {
            path: path.clone(),
            id: parent_id,
            index: i,
        })?;
    }

    for i in common..new.children.len() {
        ctx.emit(Patch::InsertChild {
            path: path.clone(),
            id: parent_id,
            index: i,
            html: render_subtree(&new.children[i]),
        })?;
    }

    for i in 0..common {
        diff_sibling_pair(
            &old.children[i],
            &mut new.children[i],
            path,
            depth,
            i,
            parent_id,
            new_first_text == Some(i),
            ctx,
        )?;
    }
    Ok(())
}

/// Compare an old/new child occupying the same index once list length and
/// ordering have already been reconciled (shared by both the indexed and
/// keyed paths for matched pairs).
#[allow(clippy::too_many_arguments)]
fn diff_sibling_pair(
    old_child: &Node,
    new_child: &mut Node,
    path: &mut Vec<usize>,
    depth: usize,
    index: usize,
    parent_id: StableId,
    is_first_text_slot: bool,
    ctx: &mut Ctx<'_>,
) -> Result<(), ()> {
    if let (Node::Element(old_el), Node::Element(new_el)) = (old_child, &mut *new_child) {
        path.push(index);
        let result = diff_element(old_el, new_el, path, depth + 1, ctx);
        path.pop();
        return result;
    }
    match (old_child, &*new_child) {
        (Node::Text(old_t), Node::Text(new_t)) => {
            ctx.stats.text_nodes_compared += 1;
            if old_t.content != new_t.content {
                let new_text = new_t.content.clone();
                if is_first_text_slot {
                    ctx.emit(Patch::SetText {
                        path: path.clone(),
                        id: parent_id,
                        text: new_text,
                    })?;
                    ctx.stats.text_updates += 1;
                } else {
                    replace_slot(path, parent_id, index, new_child, ctx)?;
                }
            }
            Ok(())
        }
        _ => replace_slot(path, parent_id, index, new_child, ctx),
    }
}

/// A sibling slot changed kind (text <-> element) between renders: there is
/// no single patch variant for that, so model it as a remove followed by an
/// insert at the same index.
fn replace_slot(
    path: &[usize],
    parent_id: StableId,
    index: usize,
    new_child: &Node,
    ctx: &mut Ctx<'_>,
) -> Result<(), ()> {
    ctx.emit(Patch::RemoveChild {
        path: path.to_vec(),
        id: parent_id,
        index,
    })?;
    ctx.emit(Patch::InsertChild {
        path: path.to_vec(),
        id: parent_id,
        index,
        html: render_subtree(new_child),
    })?;
    ctx.stats.nodes_replaced += 1;
    Ok(())
}

/// A sibling's reconciliation key: either an explicit `data-key`/`dj-key`
/// value, or a positional key scoped to unkeyed siblings only. This is the
/// documented resolution for mixed keyed/unkeyed sibling lists (see
/// SPEC_FULL.md's Open Questions): an unkeyed node never matches a keyed one,
/// and only ever matches another unkeyed node at the same ordinal among
/// unkeyed siblings.
#[derive(Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Explicit(String),
    Unkeyed(usize),
}

fn child_keys(children: &Children) -> Vec<ChildKey> {
    let mut keys = Vec::with_capacity(children.len());
    let mut ordinal = 0usize;
    for child in children {
        match child.as_element().and_then(|e| e.key.clone()) {
            Some(k) => keys.push(ChildKey::Explicit(k)),
            None => {
                keys.push(ChildKey::Unkeyed(ordinal));
                ordinal += 1;
            }
        }
    }
    keys
}

/// Keyed reconciliation: matches children by key across old/new, removes
/// anything that disappeared, inserts anything new, and moves matched
/// children that changed position. [`lcs::longest_increasing_subsequence`]
/// picks the subsequence of matches that are already correctly ordered so
/// only the out-of-order ones get a `MoveChild`.
fn diff_children_keyed(
    old: &Element,
    new: &mut Element,
    path: &mut Vec<usize>,
    depth: usize,
    ctx: &mut Ctx<'_>,
) -> Result<(), ()> {
    let parent_id = new.stable_id;
    let old_keys = child_keys(&old.children);
    let new_keys = child_keys(&new.children);

    let mut old_positions: rustc_hash::FxHashMap<&ChildKey, Vec<usize>> =
        rustc_hash::FxHashMap::default();
    for (i, k) in old_keys.iter().enumerate() {
        old_positions.entry(k).or_default().push(i);
    }

    // matched[new_idx] = Some(old_idx) if that new child continues an old one.
    let mut matched: Vec<Option<usize>> = vec![None; new_keys.len()];
    let mut consumed = vec![false; old_keys.len()];
    for (new_idx, key) in new_keys.iter().enumerate() {
        if let Some(candidates) = old_positions.get_mut(key) {
            if let Some(old_idx) = candidates.pop() {
                matched[new_idx] = Some(old_idx);
                consumed[old_idx] = true;
            }
        }
    }

    // Removed old children, emitted tail-to-head.
    for old_idx in (0..old.children.len()).rev() {
        if !consumed[old_idx] {
            ctx.emit(Patch::RemoveChild {
                path: path.clone(),
                id: parent_id,
                index: old_idx,
            })?;
        }
    }

    // `working` models the client-side array right after the removals above:
    // the surviving old children, still in their old relative order.
    let mut working: Vec<usize> = (0..old.children.len()).filter(|&i| consumed[i]).collect();

    // Positions (into `matched`/new order) that are already in increasing
    // old-index order and therefore never need a move.
    let matched_old_indices: Vec<usize> = matched.iter().filter_map(|m| *m).collect();
    let keep_in_place = lcs::longest_increasing_subsequence(&matched_old_indices);
    let mut lis_cursor = 0usize;

    let new_first_text = first_text_index(&new.children);
    let mut pending_recursions: Vec<(usize, usize)> = Vec::new(); // (old_idx, new_idx)

    for (new_idx, m) in matched.iter().enumerate() {
        match m {
            None => {
                ctx.emit(Patch::InsertChild {
                    path: path.clone(),
                    id: parent_id,
                    index: new_idx,
                    html: render_subtree(&new.children[new_idx]),
                })?;
                working.insert(new_idx.min(working.len()), usize::MAX);
            }
            Some(old_idx) => {
                let keeps_place = keep_in_place.get(lis_cursor).copied().unwrap_or(false);
                lis_cursor += 1;
                // Search the whole array, not just the suffix from `new_idx`
                // onward: an element that needs to move *rightward* (its
                // current position is before `new_idx`) lives earlier in
                // `working`, not later.
                let cur_pos = working.iter().position(|&v| v == *old_idx);
                if !keeps_place {
                    if let Some(from) = cur_pos {
                        if from != new_idx {
                            let child_id = old
                                .children
                                .get(*old_idx)
                                .and_then(Node::element_id)
                                .unwrap_or_default();
                            ctx.emit(Patch::MoveChild {
                                path: path.clone(),
                                id: parent_id,
                                from,
                                to: new_idx,
                                child_id,
                            })?;
                            ctx.stats.nodes_moved += 1;
                            let v = working.remove(from);
                            working.insert(new_idx, v);
                        }
                    }
                }
                pending_recursions.push((*old_idx, new_idx));
            }
        }
    }

    for (old_idx, new_idx) in pending_recursions {
        let is_first_text = new_first_text == Some(new_idx);
        diff_sibling_pair(
            &old.children[old_idx],
            &mut new.children[new_idx],
            path,
            depth,
            new_idx,
            parent_id,
            is_first_text,
            ctx,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::DomSink;

    fn doc(root: Element) -> Document {
        Document::new(root)
    }

    fn counter(n: &str) -> Document {
        doc(Element::new("div")
            .attr("dj-root", "")
            .child(Element::new("p").child(Element::new("span").text(n))))
    }

    #[test]
    fn counter_tick_emits_single_set_text() {
        let old = counter("0");
        let mut new = counter("1");
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert!(!result.should_reload);
        assert_eq!(result.patches.len(), 1);
        assert!(matches!(result.patches[0], Patch::SetText { .. }));
    }

    #[test]
    fn attribute_toggle_emits_set_attr() {
        let old = doc(Element::new("button").attr("class", "btn"));
        let mut new = doc(Element::new("button").attr("class", "btn active"));
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert_eq!(result.patches.len(), 1);
        match &result.patches[0] {
            Patch::SetAttr { value, .. } => assert_eq!(value, "btn active"),
            other => panic!("unexpected patch {other:?}"),
        }
    }

    fn keyed_list(keys: &[&str]) -> Document {
        let mut ul = Element::new("ul");
        for k in keys {
            let mut li = Element::new("li").attr("data-key", *k).text(k.to_string());
            li.key = Some(k.to_string());
            ul = ul.child(li);
        }
        doc(ul)
    }

    #[test]
    fn keyed_list_reorder_produces_only_moves() {
        let old = keyed_list(&["a", "b", "c"]);
        let mut new = keyed_list(&["c", "a", "b"]);
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert!(!result.should_reload);
        assert!(result
            .patches
            .iter()
            .all(|p| matches!(p, Patch::MoveChild { .. })));
        assert!(result.stats.nodes_moved > 0);
    }

    #[test]
    fn keyed_list_left_rotation_moves_and_round_trips_in_order() {
        // Every element must move rightward here (old_idx < new_idx for the
        // element that ends up last), the case the suffix-only search in
        // `diff_children_keyed` used to miss entirely.
        let old = keyed_list(&["a", "b", "c"]);
        let mut new = keyed_list(&["b", "c", "a"]);
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert!(!result.should_reload);
        assert!(result
            .patches
            .iter()
            .any(|p| matches!(p, Patch::MoveChild { .. })));
        let expected = new.clone();

        let mut sink = DomSink::new(old);
        sink.apply_all(&result.patches).unwrap();
        assert_eq!(sink.document.root, expected.root);
        let order: Vec<String> = sink
            .document
            .root
            .children
            .iter()
            .map(|c| c.as_element().unwrap().key.clone().unwrap())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn keyed_list_insert_at_head() {
        let old = keyed_list(&["a", "b"]);
        let mut new = keyed_list(&["z", "a", "b"]);
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert_eq!(
            result
                .patches
                .iter()
                .filter(|p| matches!(p, Patch::InsertChild { .. }))
                .count(),
            1
        );
        assert!(result
            .patches
            .iter()
            .all(|p| !matches!(p, Patch::Replace { .. })));
    }

    #[test]
    fn opt_out_region_is_never_descended() {
        let old = doc(Element::new("div").child(
            Element::new("div")
                .attr("dj-update", "ignore")
                .child(Element::new("span").text("old")),
        ));
        let mut new = doc(Element::new("div").child(
            Element::new("div")
                .attr("dj-update", "ignore")
                .child(Element::new("span").text("new")),
        ));
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert!(result.patches.is_empty());
    }

    #[test]
    fn round_trip_law_holds_for_mixed_changes() {
        let old = doc(Element::new("div").child(
            Element::new("p").attr("class", "a").child(Element::new("span").text("0")),
        ));
        let mut new = doc(Element::new("div").child(
            Element::new("p").attr("class", "b").child(Element::new("span").text("1")),
        ));
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert!(!result.should_reload);
        // `new`'s stable ids are synced to `old`'s continuations in place by
        // `diff`, so the post-diff clone (not a pre-diff one) is what a
        // correctly-applied patch stream should reproduce.
        let expected = new.clone();

        let mut sink = DomSink::new(old);
        sink.apply_all(&result.patches).unwrap();
        assert_eq!(sink.document.root, expected.root);
    }

    #[test]
    fn inserting_a_text_sibling_round_trips() {
        // `{{ msg }}` going from empty to non-empty: a bare Text node is
        // appended next to an existing element sibling. The InsertChild
        // payload is unescaped plain text, not element markup, so it must
        // not be wrapped and parsed as an element by `DomSink`.
        let old = doc(Element::new("div").child(Element::new("span").text("fixed")));
        let mut new = doc(
            Element::new("div")
                .child(Element::new("span").text("fixed"))
                .child(Node::Text(crate::node::Text::new("hi & bye".to_string()))),
        );
        let result = diff(&old, &mut new, &DiffConfig::default());
        assert!(!result.should_reload);
        assert!(result
            .patches
            .iter()
            .any(|p| matches!(p, Patch::InsertChild { .. })));
        let expected = new.clone();

        let mut sink = DomSink::new(old);
        sink.apply_all(&result.patches).unwrap();
        assert_eq!(sink.document.root, expected.root);
        assert!(matches!(sink.document.root.children.last(), Some(Node::Text(t)) if t.content == "hi & bye"));
    }

    #[test]
    fn depth_budget_triggers_reload() {
        fn nested(depth: usize, leaf_text: &str) -> Element {
            let mut el = Element::new("span").text(leaf_text);
            for _ in 0..depth {
                el = Element::new("div").child(el);
            }
            el
        }
        let old = doc(nested(10, "old"));
        let mut new = doc(nested(10, "new"));
        let config = DiffConfig { max_depth: 2, max_ops: 4096 };
        let result = diff(&old, &mut new, &config);
        assert!(result.should_reload);
        assert!(result.patches.is_empty());
    }
}
