//! Error taxonomy for the render pipeline.
//!
//! Every stage returns an explicit `Result`; nothing in this crate's own
//! pipeline panics or unwinds on bad input. See spec §7 for the disposition
//! of each variant (which ones abort a render without touching the
//! baseline, which ones force a session reset).

use thiserror::Error;

/// Errors that can occur across the resolve/parse/diff/render pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A template path could not be located by the configured [`TemplateLoader`](crate::template::TemplateLoader).
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The `{% extends %}` chain loops back on itself.
    #[error("circular template inheritance: {0}")]
    CircularInheritance(String),

    /// Template evaluation (variable substitution, filters, control flow)
    /// against a state mapping failed.
    #[error("template evaluation failed: {0}")]
    Evaluation(String),

    /// The evaluated HTML failed to parse into a normalized tree.
    #[error("html parse error: {0}")]
    Parse(String),

    /// The diff engine hit an internal invariant violation (not a recoverable
    /// input problem) and the session must be reset.
    #[error("diff engine failure: {0}")]
    DiffFailure(String),

    /// The client observed a version that was not exactly one greater than
    /// the last it applied.
    #[error("version gap: expected {expected}, got {got}")]
    VersionGap {
        /// The version the client expected next.
        expected: u64,
        /// The version actually received.
        got: u64,
    },

    /// The client could not resolve a patch's target by id or by path.
    #[error("patch application failed: {0}")]
    PatchApplyFailure(String),
}

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether this error leaves the session's committed baseline untouched
    /// (spec §7: "recoverable failures ... do not mutate server-side state").
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::Evaluation(_) | CoreError::Parse(_))
    }

    /// The message shown to the client. In production mode, anything that
    /// isn't already meant for end users collapses to a fixed generic string
    /// so internals never leak into the browser; the real message is still
    /// available server-side via `tracing`.
    pub fn client_message(&self, debug_mode: bool) -> String {
        if debug_mode {
            self.to_string()
        } else {
            "something went wrong while updating the view".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors_dont_touch_baseline() {
        assert!(CoreError::Parse("bad".into()).is_recoverable());
        assert!(CoreError::Evaluation("bad".into()).is_recoverable());
        assert!(!CoreError::DiffFailure("bad".into()).is_recoverable());
    }

    #[test]
    fn production_message_hides_detail() {
        let err = CoreError::Parse("leaked/path/info".into());
        let msg = err.client_message(false);
        assert!(!msg.contains("leaked"));
        assert!(err.client_message(true).contains("leaked"));
    }
}
