//! Template inheritance resolution (spec §4.1).
//!
//! `resolve(root_path)` flattens a child → base inheritance chain into a
//! single canonical source string, with every named block in the base
//! replaced by the child's override when one exists. Resolution is
//! AST-based in the narrow sense that matters here: it locates block
//! *boundaries* structurally (respecting nesting) and otherwise treats
//! everything else in the source as opaque bytes to copy verbatim, so
//! variable placeholders, loops, conditionals and filters a downstream
//! [`evaluator`] understands are never touched by this pass.

pub mod evaluator;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{CoreError, CoreResult};

/// Maximum inheritance chain depth before `resolve` fails explicitly, per
/// SPEC_FULL.md's resolution of the "arbitrary-depth inheritance" open
/// question: support it, but bound it rather than recursing forever on a
/// malformed (non-cyclic but absurdly long) chain.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// External collaborator that locates template source by logical path
/// (spec §6: `load_template(path) → source_string | TemplateNotFound`).
pub trait TemplateLoader: Send + Sync {
    fn load(&self, path: &str) -> CoreResult<String>;
}

/// In-memory loader, mainly for tests and embedded templates.
#[derive(Debug, Default, Clone)]
pub struct MapLoader {
    sources: FxHashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(path.into(), source.into());
        self
    }
}

impl TemplateLoader for MapLoader {
    fn load(&self, path: &str) -> CoreResult<String> {
        self.sources
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::TemplateNotFound(path.to_string()))
    }
}

/// Loader backed by the filesystem, rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: std::path::PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateLoader for FsLoader {
    fn load(&self, path: &str) -> CoreResult<String> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full)
            .map_err(|_| CoreError::TemplateNotFound(path.to_string()))
    }
}

/// Resolution cache: an immutable-read, rarely-written keyed store mapping
/// template path to its resolved canonical source (spec §5 "Shared
/// resources: template source cache").
#[derive(Clone)]
pub struct ResolverCache {
    entries: Arc<RwLock<FxHashMap<String, String>>>,
}

impl Default for ResolverCache {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.entries.read().get(path).cloned()
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.write().remove(path);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn insert(&self, path: &str, source: String) {
        self.entries.write().insert(path.to_string(), source);
    }
}

/// Resolve `root_path` into canonical, inheritance-flattened source.
///
/// Looks up the cache first; on a miss, resolves and populates it. Callers
/// that want to force a reload after a template file changed should
/// [`ResolverCache::invalidate`] first.
#[tracing::instrument(skip(loader, cache))]
pub fn resolve(
    root_path: &str,
    loader: &dyn TemplateLoader,
    cache: &ResolverCache,
) -> CoreResult<String> {
    if let Some(cached) = cache.get(root_path) {
        return Ok(cached);
    }
    let mut visited = Vec::new();
    let resolved = resolve_chain(root_path, loader, &mut visited)?;
    cache.insert(root_path, resolved.clone());
    Ok(resolved)
}

/// Walk the `{% extends %}` chain from `path` up to its base template,
/// collecting every level's blocks along the way, then merge all of them
/// into the base in one pass. Collecting first (rather than merging one
/// level at a time) matters for chains deeper than two: a grandchild's
/// override must still be visible once the intermediate parent's own
/// blocks have already been flattened away.
fn resolve_chain(
    path: &str,
    loader: &dyn TemplateLoader,
    visited: &mut Vec<String>,
) -> CoreResult<String> {
    let mut levels: Vec<Vec<Block>> = Vec::new();
    let mut current = path.to_string();
    let base_source = loop {
        if visited.contains(&current) {
            visited.push(current.clone());
            return Err(CoreError::CircularInheritance(visited.join(" -> ")));
        }
        if visited.len() >= MAX_INHERITANCE_DEPTH {
            return Err(CoreError::CircularInheritance(format!(
                "inheritance chain exceeds maximum depth of {MAX_INHERITANCE_DEPTH} at {current}"
            )));
        }
        visited.push(current.clone());

        let source = loader.load(&current)?;
        levels.push(extract_blocks(&source));
        match extract_extends(&source) {
            Some(parent_path) => current = parent_path,
            None => break source,
        }
    };

    // Nearest-to-leaf definition of a given block name wins; `levels` is
    // ordered leaf-first, so the first insertion for a name is kept.
    let mut overrides: FxHashMap<String, String> = FxHashMap::default();
    for blocks in &levels {
        for block in blocks {
            overrides.entry(block.name.clone()).or_insert_with(|| block.inner.clone());
        }
    }
    Ok(merge_blocks(&base_source, &overrides))
}

/// Scan for a single `{% extends "path" %}` directive. Per spec §4.1 it must
/// sit "at the top of the source"; we accept it anywhere before the first
/// block for robustness but only ever honor the first occurrence.
fn extract_extends(source: &str) -> Option<String> {
    let start = source.find("{% extends ")?;
    let tag_end = source[start..].find("%}")? + start;
    let inner = &source[start + "{% extends ".len()..tag_end];
    let quoted = inner.trim();
    let unquoted = quoted.trim_matches(|c| c == '"' || c == '\'').trim();
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

/// A single `{% block name %}...{% endblock %}` region, boundaries included.
struct Block {
    name: String,
    /// Byte range in the source, `{% block %}` through `{% endblock %}` inclusive.
    span: std::ops::Range<usize>,
    /// Just the inner content, between the open and close tags.
    inner: String,
}

/// Find all top-level (non-nested) named blocks in `source`, tracking
/// nesting depth so a block-inside-a-block doesn't get merged independently
/// of its parent block.
fn extract_blocks(source: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut pos = 0usize;
    while let Some(rel_start) = source[pos..].find("{% block ") {
        let start = pos + rel_start;
        let Some(header_end_rel) = source[start..].find("%}") else {
            break;
        };
        let header_end = start + header_end_rel + 2;
        let name = source[start + "{% block ".len()..header_end - 2].trim().to_string();

        let Some((inner_end, block_end)) = find_matching_endblock(source, header_end) else {
            break;
        };
        blocks.push(Block {
            name,
            span: start..block_end,
            inner: source[header_end..inner_end].to_string(),
        });
        pos = block_end;
    }
    blocks
}

/// Starting just after a `{% block %}` opening tag, find the byte offset of
/// the matching `{% endblock %}`, accounting for nested blocks of the same
/// kind. Returns `(inner_content_end, after_endblock_tag)`.
fn find_matching_endblock(source: &str, from: usize) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut cursor = from;
    loop {
        let next_open = source[cursor..].find("{% block ").map(|i| cursor + i);
        let next_close = source[cursor..].find("{% endblock %}").map(|i| cursor + i);
        match (next_open, next_close) {
            (Some(open), Some(close)) if open < close => {
                depth += 1;
                cursor = open + "{% block ".len();
            }
            (_, Some(close)) => {
                depth -= 1;
                if depth == 0 {
                    return Some((close, close + "{% endblock %}".len()));
                }
                cursor = close + "{% endblock %}".len();
            }
            _ => return None,
        }
    }
}

/// Replace every block in `base` whose name has an entry in `overrides` with
/// that override's content; blocks with no override keep the base's own
/// content. Either way the `{% block %}`/`{% endblock %}` markers themselves
/// are stripped, since nothing downstream of resolution understands them.
fn merge_blocks(base: &str, overrides: &FxHashMap<String, String>) -> String {
    let base_blocks = extract_blocks(base);
    if base_blocks.is_empty() {
        return base.to_string();
    }
    let mut out = String::with_capacity(base.len());
    let mut cursor = 0usize;
    for b in &base_blocks {
        out.push_str(&base[cursor..b.span.start]);
        match overrides.get(&b.name) {
            Some(content) => out.push_str(content),
            None => out.push_str(&b.inner),
        }
        cursor = b.span.end;
    }
    out.push_str(&base[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_no_inheritance_is_identity() {
        let loader = MapLoader::new().with("page.html", "<div>hi</div>");
        let cache = ResolverCache::new();
        let out = resolve("page.html", &loader, &cache).unwrap();
        assert_eq!(out, "<div>hi</div>");
    }

    #[test]
    fn child_overrides_named_block() {
        let loader = MapLoader::new()
            .with(
                "base.html",
                "<div>{% block content %}base content{% endblock %}</div>",
            )
            .with(
                "child.html",
                "{% extends \"base.html\" %}{% block content %}child content{% endblock %}",
            );
        let cache = ResolverCache::new();
        let out = resolve("child.html", &loader, &cache).unwrap();
        assert_eq!(out, "<div>child content</div>");
    }

    #[test]
    fn unnamed_block_in_child_is_kept_from_parent() {
        let loader = MapLoader::new()
            .with(
                "base.html",
                "<div>{% block a %}A{% endblock %}{% block b %}B{% endblock %}</div>",
            )
            .with(
                "child.html",
                "{% extends \"base.html\" %}{% block a %}A2{% endblock %}",
            );
        let cache = ResolverCache::new();
        let out = resolve("child.html", &loader, &cache).unwrap();
        assert_eq!(out, "<div>A2B</div>");
    }

    #[test]
    fn three_level_chain_resolves() {
        let loader = MapLoader::new()
            .with("base.html", "{% block x %}base{% endblock %}")
            .with(
                "mid.html",
                "{% extends \"base.html\" %}{% block x %}mid{% endblock %}",
            )
            .with(
                "child.html",
                "{% extends \"mid.html\" %}{% block x %}child{% endblock %}",
            );
        let cache = ResolverCache::new();
        let out = resolve("child.html", &loader, &cache).unwrap();
        assert_eq!(out, "child");
    }

    #[test]
    fn circular_inheritance_fails() {
        let loader = MapLoader::new()
            .with("a.html", "{% extends \"b.html\" %}")
            .with("b.html", "{% extends \"a.html\" %}");
        let cache = ResolverCache::new();
        let err = resolve("a.html", &loader, &cache).unwrap_err();
        assert!(matches!(err, CoreError::CircularInheritance(_)));
    }

    #[test]
    fn missing_template_fails() {
        let loader = MapLoader::new();
        let cache = ResolverCache::new();
        let err = resolve("missing.html", &loader, &cache).unwrap_err();
        assert!(matches!(err, CoreError::TemplateNotFound(_)));
    }

    #[test]
    fn cache_avoids_second_load() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        struct CountingLoader(AtomicUsize, MapLoader);
        impl TemplateLoader for CountingLoader {
            fn load(&self, path: &str) -> CoreResult<String> {
                self.0.fetch_add(1, Ordering::Relaxed);
                self.1.load(path)
            }
        }
        let loader = CountingLoader(AtomicUsize::new(0), MapLoader::new().with("p.html", "<p>x</p>"));
        let cache = ResolverCache::new();
        resolve("p.html", &loader, &cache).unwrap();
        resolve("p.html", &loader, &cache).unwrap();
        assert_eq!(loader.0.load(Ordering::Relaxed), 1);
    }
}
