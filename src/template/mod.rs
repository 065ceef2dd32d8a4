//! Jinja-style templates as used in Home Assistant: tokenizing, parsing into a
//! node tree, and rendering against a [`crate::Context`].

pub(crate) mod ast;
mod builtins;
mod dates;
mod engine;
pub(crate) mod eval;
mod expr;
pub mod lexer;
mod parser;
pub(crate) mod render;

pub use builtins::FilterFn;
pub use engine::{RenderOutput, Template, TemplateEngine};
pub use render::MAX_RECURSION;
