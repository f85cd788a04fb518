//! The render controller (spec §4.5): owns the committed baseline tree per
//! session and drives the mount/event cycle with version gating.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{self, DiffConfig};
use crate::error::{CoreError, CoreResult};
use crate::node::Document;
use crate::parser;
use crate::patch::Patch;
use crate::serialize::render_document;
use crate::template::evaluator::{DefaultEvaluator, TemplateEvaluator};
use crate::template::{resolve, ResolverCache, TemplateLoader};

/// Per-session lifecycle state (spec §4.5's state machine table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Live,
    Closed,
}

/// Everything the render controller needs to remember between calls for one
/// session. Exclusively owned by that session (spec §5): never shared.
#[derive(Debug, Clone)]
pub struct RenderSession {
    pub state: SessionState,
    pub baseline: Option<Document>,
    pub version: u64,
    pub template_path: String,
}

impl RenderSession {
    fn uninitialized() -> Self {
        Self {
            state: SessionState::Uninitialized,
            baseline: None,
            version: 0,
            template_path: String::new(),
        }
    }
}

/// Keyed store of live [`RenderSession`]s. Out-of-scope per spec §1 is *how*
/// application state is persisted; this trait only tracks the render
/// controller's own per-session lifecycle bookkeeping.
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Option<RenderSession>;
    fn put(&self, session_id: &str, session: RenderSession);
    fn remove(&self, session_id: &str);
}

/// In-memory reference store, `parking_lot::Mutex`-guarded per spec §5's
/// "single-threaded per session, parallel across sessions" model.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<FxHashMap<String, RenderSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Option<RenderSession> {
        self.sessions.lock().get(session_id).cloned()
    }

    fn put(&self, session_id: &str, session: RenderSession) {
        self.sessions.lock().insert(session_id.to_string(), session);
    }

    fn remove(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }
}

/// The outbound message envelope (spec §6's message table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Mount { html: String, version: u64 },
    Patch { patches: Vec<Patch>, version: u64 },
    HtmlUpdate { html: String, version: u64, reset_on_fallback: bool },
    Error { message: String, recoverable: bool },
}

/// Orchestrates mount/event cycles for sessions backed by a [`SessionStore`].
pub struct RenderController<'a> {
    loader: &'a dyn TemplateLoader,
    cache: ResolverCache,
    debug_mode: bool,
}

impl<'a> RenderController<'a> {
    pub fn new(loader: &'a dyn TemplateLoader) -> Self {
        Self { loader, cache: ResolverCache::new(), debug_mode: false }
    }

    #[must_use]
    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    fn evaluator(&self) -> DefaultEvaluator<'a> {
        DefaultEvaluator::new().with_loader(self.loader, self.cache.clone())
    }

    fn render_tree(&self, template_path: &str, state: &Value) -> CoreResult<Document> {
        let canonical = resolve(template_path, self.loader, &self.cache)?;
        let html = self
            .evaluator()
            .evaluate(&canonical, state)
            .map_err(|e| CoreError::Evaluation(e.to_string()))?;
        let normalized = parser::normalize_source(&html);
        parser::parse(&format!("<html><body>{normalized}</body></html>"))
    }

    fn error_message(&self, err: &CoreError) -> OutboundMessage {
        OutboundMessage::Error {
            message: err.client_message(self.debug_mode),
            recoverable: err.is_recoverable(),
        }
    }

    /// `mount(session, template_path, initial_state) → Mount{html, version}`.
    #[tracing::instrument(skip(self, store, state))]
    pub fn mount(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
        template_path: &str,
        state: &Value,
    ) -> CoreResult<OutboundMessage> {
        let doc = match self.render_tree(template_path, state) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(?err, "mount failed, template not found or resolution error");
                return Err(err);
            }
        };
        let html = render_document(&doc);
        store.put(
            session_id,
            RenderSession {
                state: SessionState::Live,
                baseline: Some(doc),
                version: 1,
                template_path: template_path.to_string(),
            },
        );
        tracing::debug!(session_id, "session mounted");
        Ok(OutboundMessage::Mount { html, version: 1 })
    }

    /// `render_with_diff(session, new_state) → Render{html, patches, version}`.
    ///
    /// Recoverable failures (`Evaluation`, `Parse`) never mutate the stored
    /// baseline; the caller gets an `Error` message and the session stays on
    /// its previous committed tree (spec §4.5/§7).
    #[tracing::instrument(skip(self, store, state))]
    pub fn render_with_diff(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
        state: &Value,
    ) -> CoreResult<OutboundMessage> {
        let session = store
            .get(session_id)
            .ok_or_else(|| CoreError::Evaluation(format!("no session {session_id}")))?;
        if session.state != SessionState::Live {
            return Ok(OutboundMessage::Error {
                message: "session is not live".to_string(),
                recoverable: false,
            });
        }
        let old_doc = session
            .baseline
            .clone()
            .expect("a Live session always has a committed baseline");

        let mut new_doc = match self.render_tree(&session.template_path, state) {
            Ok(doc) => doc,
            Err(err) if err.is_recoverable() => {
                tracing::warn!(?err, "render failed, baseline left untouched");
                return Ok(self.error_message(&err));
            }
            Err(err) => return Err(err),
        };

        let result = diff::diff(&old_doc, &mut new_doc, &DiffConfig::default());
        let next_version = session.version + 1;
        store.put(
            session_id,
            RenderSession {
                state: SessionState::Live,
                baseline: Some(new_doc.clone()),
                version: next_version,
                template_path: session.template_path,
            },
        );

        if result.should_reload {
            tracing::info!(session_id, reason = ?result.reload_reason, "diff fell back to full reload");
            return Ok(OutboundMessage::HtmlUpdate {
                html: render_document(&new_doc),
                version: next_version,
                reset_on_fallback: true,
            });
        }

        tracing::debug!(session_id, patch_count = result.patches.len(), version = next_version, "render committed");
        Ok(OutboundMessage::Patch { patches: result.patches, version: next_version })
    }

    /// `reset(session) → Reset{html, version}`. Forgets the baseline and
    /// re-renders as if mounting, but keeps the version sequence monotonic
    /// (spec §4.5/§8 scenario 6) rather than restarting it at 1.
    #[tracing::instrument(skip(self, store, state))]
    pub fn reset(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
        state: &Value,
    ) -> CoreResult<OutboundMessage> {
        let session = store.get(session_id).unwrap_or_else(RenderSession::uninitialized);
        let doc = self.render_tree(&session.template_path, state)?;
        let html = render_document(&doc);
        let next_version = session.version + 1;
        store.put(
            session_id,
            RenderSession {
                state: SessionState::Live,
                baseline: Some(doc),
                version: next_version,
                template_path: session.template_path,
            },
        );
        tracing::info!(session_id, version = next_version, "session reset");
        Ok(OutboundMessage::HtmlUpdate { html, version: next_version, reset_on_fallback: true })
    }

    pub fn close(&self, store: &dyn SessionStore, session_id: &str) {
        store.remove(session_id);
        tracing::debug!(session_id, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::MapLoader;
    use serde_json::json;

    fn controller(loader: &MapLoader) -> RenderController<'_> {
        RenderController::new(loader)
    }

    #[test]
    fn mount_then_render_counter_tick_produces_one_patch() {
        let loader = MapLoader::new().with(
            "counter.html",
            "<div dj-root><p><span>{{ count }}</span></p></div>",
        );
        let store = InMemorySessionStore::new();
        let ctl = controller(&loader);

        let mount = ctl.mount(&store, "s1", "counter.html", &json!({"count": 0})).unwrap();
        assert!(matches!(mount, OutboundMessage::Mount { version: 1, .. }));

        let rendered = ctl.render_with_diff(&store, "s1", &json!({"count": 1})).unwrap();
        match rendered {
            OutboundMessage::Patch { patches, version } => {
                assert_eq!(version, 2);
                assert_eq!(patches.len(), 1);
                assert!(matches!(patches[0], Patch::SetText { .. }));
            }
            other => panic!("expected Patch, got {other:?}"),
        }
    }

    #[test]
    fn versions_advance_monotonically_across_renders() {
        let loader = MapLoader::new().with("c.html", "<div dj-root><span>{{ n }}</span></div>");
        let store = InMemorySessionStore::new();
        let ctl = controller(&loader);
        ctl.mount(&store, "s1", "c.html", &json!({"n": 0})).unwrap();
        for n in 1..5 {
            let msg = ctl.render_with_diff(&store, "s1", &json!({"n": n})).unwrap();
            let version = match msg {
                OutboundMessage::Patch { version, .. } => version,
                OutboundMessage::HtmlUpdate { version, .. } => version,
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(version, n as u64 + 1);
        }
    }

    #[test]
    fn evaluation_error_does_not_mutate_baseline() {
        let loader = MapLoader::new().with(
            "bad.html",
            "<div dj-root>{% if fail %}{{ x|unknown_filter }}{% endif %}<span>{{ x }}</span></div>",
        );
        let store = InMemorySessionStore::new();
        let ctl = controller(&loader);
        ctl.mount(&store, "s1", "bad.html", &json!({"x": 1, "fail": false}))
            .unwrap();
        let before = store.get("s1").unwrap().version;
        let msg = ctl
            .render_with_diff(&store, "s1", &json!({"x": 1, "fail": true}))
            .unwrap();
        assert!(matches!(msg, OutboundMessage::Error { recoverable: true, .. }));
        assert_eq!(store.get("s1").unwrap().version, before);
    }

    #[test]
    fn reset_continues_monotonic_version_sequence() {
        let loader = MapLoader::new().with("c.html", "<div dj-root><span>{{ n }}</span></div>");
        let store = InMemorySessionStore::new();
        let ctl = controller(&loader);
        ctl.mount(&store, "s1", "c.html", &json!({"n": 0})).unwrap();
        ctl.render_with_diff(&store, "s1", &json!({"n": 1})).unwrap();
        let msg = ctl.reset(&store, "s1", &json!({"n": 2})).unwrap();
        match msg {
            OutboundMessage::HtmlUpdate { version, reset_on_fallback, .. } => {
                assert_eq!(version, 3);
                assert!(reset_on_fallback);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_removes_session() {
        let loader = MapLoader::new().with("c.html", "<div dj-root>x</div>");
        let store = InMemorySessionStore::new();
        let ctl = controller(&loader);
        ctl.mount(&store, "s1", "c.html", &json!({})).unwrap();
        ctl.close(&store, "s1");
        assert!(store.get("s1").is_none());
    }
}
