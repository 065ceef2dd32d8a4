//! `minihass` renders Home Assistant style Jinja templates and parses HASSIL
//! sentence templates.
//!
//! ```
//! use minihass::{Context, TemplateEngine};
//! use minihass::grammar::{match_sentence, parse_sentence, split_words};
//!
//! let engine = TemplateEngine::new();
//! let result = engine.render("{{ ' Hi ' | trim | upper }}", &Context::new()).unwrap();
//! assert_eq!(result.output, "HI");
//!
//! let sentence = parse_sentence("turn (on|off) [the] {name}").unwrap();
//! let words = split_words("turn off the kitchen");
//! assert!(match_sentence(&sentence, &words).is_complete(words.len()));
//! ```

mod error;
pub mod grammar;
mod interface;
mod template;
mod value;

// Public exports.
pub use error::{
    EvalError, EvalResult, ExpressionErrorReason, ParseError, ParseExpressionError, ParseResult,
    TemplateError, TemplateResult,
};
pub use interface::Context;
pub use template::{FilterFn, MAX_RECURSION, RenderOutput, Template, TemplateEngine, lexer};
pub use value::{Args, Function, Map, NativeFn, Value};
