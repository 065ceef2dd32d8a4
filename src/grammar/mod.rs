//! Sentence templates in the HASSIL syntax used by Home Assistant intents:
//! `[optional]`, `(alternative|choices)`, `(permuted;parts)`, `{list}` slots
//! and `<rule>` references.

mod expression;
mod matcher;
mod parser;
pub mod rules;
mod scanner;
pub mod tokens;

pub use expression::{
    Alternative, Expression, ListReference, Permutation, RuleReference, Sentence, Sequence, TextChunk,
};
pub use matcher::{MatchResult, TraceEntry, TraceStatus, match_expression, match_sentence, split_words};
pub use parser::{ParseOptions, parse_expression, parse_sentence, parse_sentence_with};
pub use rules::{COMMON_EXPANSION_RULES, common_rule};
pub use scanner::{Chunk, ChunkKind, next_chunk};
