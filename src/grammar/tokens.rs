use crate::{
    error::{ExpressionErrorReason, ParseExpressionError, ParseResult},
    grammar::scanner::{ALT_SEP, ChunkKind, PERM_SEP, next_chunk},
};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Text,
    Space,
    Optional,
    Alternative,
    Permutation,
    Slot,
    Rule,
}

/// A top-level piece of a sentence template, for highlighting.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    /// The text between the delimiters, or the trimmed word.
    pub content: String,
    /// The source text the token covers.
    pub raw: String,
}

/// Splits a sentence template into a flat list of top-level tokens.
///
/// Separators outside any group are dropped. A group holding `|` but no `;`
/// is an alternative, a group holding `;` is a permutation, and any other
/// group is plain text.
pub fn tokenize(template: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(chunk) = next_chunk(template, pos)? {
        if chunk.end <= pos {
            return Err(ParseExpressionError {
                chunk: chunk.text,
                start: chunk.start,
                reason: ExpressionErrorReason::NoProgress,
                metadata: None,
            }
            .into());
        }
        let raw = template.get(pos..chunk.end).unwrap_or_default().to_string();
        pos = chunk.end;

        let inner = || {
            let mut chars = chunk.text.chars();
            chars.next();
            chars.next_back();
            chars.as_str().to_string()
        };
        let (kind, content) = match chunk.kind {
            ChunkKind::Word => match chunk.text.trim() {
                "" => (TokenKind::Space, " ".to_string()),
                trimmed => (TokenKind::Text, trimmed.to_string()),
            },
            ChunkKind::Optional => (TokenKind::Optional, inner()),
            ChunkKind::Group => {
                let content = inner();
                let kind = if content.contains(PERM_SEP) {
                    TokenKind::Permutation
                } else if content.contains(ALT_SEP) {
                    TokenKind::Alternative
                } else {
                    TokenKind::Text
                };
                (kind, content)
            }
            ChunkKind::List => (TokenKind::Slot, inner()),
            ChunkKind::Rule => (TokenKind::Rule, inner()),
            ChunkKind::Alternative | ChunkKind::Permutation => continue,
        };
        tokens.push(Token { kind, content, raw });
    }

    Ok(tokens)
}
