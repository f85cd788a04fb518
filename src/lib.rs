//! Core of a server-side reactive rendering pipeline: template inheritance
//! resolution, HTML5 parsing/normalization, VDOM diffing, a JSON patch
//! codec, and the render controller that ties a live session together.
//!
//! ## Modules
//! - [`attr`]: attribute storage shared by every [`node::Element`]
//! - [`id`]: process-scoped stable node identity
//! - [`node`]: the normalized `Node`/`Element`/`Text`/`Document` tree
//! - [`parser`]: HTML5 string → normalized tree
//! - [`serialize`]: normalized tree → HTML string
//! - [`diff`]: tree comparison, producing an ordered patch list
//! - [`patch`]: the wire patch format and its reference apply semantics
//! - [`template`]: inheritance resolution and evaluation of template sources
//! - [`session`]: the render controller and session lifecycle
//! - [`error`]: the crate's error taxonomy

pub mod attr;
pub mod diff;
pub mod error;
pub mod id;
pub mod node;
pub mod parser;
pub mod patch;
pub mod serialize;
pub mod session;
pub mod template;

pub use diff::{diff as diff_documents, DiffConfig, DiffResult, DiffStats};
pub use error::{CoreError, CoreResult};
pub use id::StableId;
pub use node::{Document, Element, Node, Text};
pub use patch::Patch;
pub use session::{RenderController, SessionStore};
