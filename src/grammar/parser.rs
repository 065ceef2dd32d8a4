use crate::{
    error::{ExpressionErrorReason, ParseError, ParseExpressionError, ParseResult},
    grammar::{
        expression::{
            Alternative, Expression, ListReference, Permutation, RuleReference, Sentence, Sequence,
            TextChunk,
        },
        scanner::{Chunk, ChunkKind, ESCAPE_CHAR, next_chunk},
    },
};

/// Options for [`parse_sentence_with`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ParseOptions {
    /// Keep the template source on the returned [`Sentence`].
    pub keep_text: bool,
    /// Free-form context attached to expression errors, e.g. the file a
    /// template came from.
    pub metadata: Option<String>,
}

/// Lowercases and collapses runs of whitespace to single spaces.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn remove_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE_CHAR {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn expression_error(chunk: &Chunk, metadata: Option<&str>, reason: ExpressionErrorReason) -> ParseError {
    ParseExpressionError {
        chunk: chunk.text.clone(),
        start: chunk.start,
        reason,
        metadata: metadata.map(str::to_string),
    }
    .into()
}

/// The text between a delimited chunk's opener and closer. Empty bodies are rejected.
fn inner_text<'c>(chunk: &'c Chunk, metadata: Option<&str>) -> ParseResult<&'c str> {
    let mut chars = chunk.text.chars();
    let (Some(_), Some(_)) = (chars.next(), chars.next_back()) else {
        return Err(expression_error(chunk, metadata, ExpressionErrorReason::MalformedDelimiters));
    };
    let inner = chars.as_str();
    if inner.is_empty() {
        return Err(expression_error(chunk, metadata, ExpressionErrorReason::MalformedDelimiters));
    }
    Ok(inner)
}

/// A group while its items are being collected.
enum Group {
    Sequence(Sequence),
    Alternative(Alternative),
    Permutation(Permutation),
}

impl Group {
    fn into_expression(self) -> Expression {
        match self {
            Self::Sequence(seq) => Expression::Sequence(seq),
            Self::Alternative(alt) => Expression::Alternative(alt),
            Self::Permutation(perm) => Expression::Permutation(perm),
        }
    }
}

/// Wraps anything that is not already a sequence so it can be an alternative branch.
fn into_sequence(expression: Expression) -> Sequence {
    match expression {
        Expression::Sequence(seq) => seq,
        other => Sequence { items: vec![other] },
    }
}

/// How deep groups and optionals may nest.
const MAX_GROUP_DEPTH: usize = 128;

fn parse_group(chunk: &Chunk, metadata: Option<&str>, depth: usize) -> ParseResult<Expression> {
    if depth >= MAX_GROUP_DEPTH {
        return Err(expression_error(chunk, metadata, ExpressionErrorReason::TooDeeplyNested));
    }
    if !matches!(chunk.kind, ChunkKind::Group | ChunkKind::Optional) {
        return Err(expression_error(chunk, metadata, ExpressionErrorReason::UnexpectedChunk));
    }
    let inner = inner_text(chunk, metadata)?;
    let offset = chunk.start + 1;
    let mut group = Group::Sequence(Sequence::default());
    let mut pos = 0;

    while let Some(item_chunk) = next_chunk(inner, pos)? {
        if item_chunk.end <= pos {
            return Err(expression_error(chunk, metadata, ExpressionErrorReason::NoProgress));
        }
        pos = item_chunk.end;

        match item_chunk.kind {
            ChunkKind::Alternative => {
                group = match group {
                    Group::Sequence(seq) => Group::Alternative(Alternative {
                        items: vec![seq, Sequence::default()],
                        is_optional: false,
                    }),
                    Group::Alternative(mut alt) => {
                        alt.items.push(Sequence::default());
                        Group::Alternative(alt)
                    }
                    Group::Permutation(_) => {
                        return Err(expression_error(
                            chunk,
                            metadata,
                            ExpressionErrorReason::MixedSeparators,
                        ));
                    }
                };
            }
            ChunkKind::Permutation => {
                group = match group {
                    Group::Sequence(seq) => Group::Permutation(Permutation {
                        items: vec![seq, Sequence::default()],
                    }),
                    Group::Permutation(mut perm) => {
                        perm.items.push(Sequence::default());
                        Group::Permutation(perm)
                    }
                    Group::Alternative(_) => {
                        return Err(expression_error(
                            chunk,
                            metadata,
                            ExpressionErrorReason::MixedSeparators,
                        ));
                    }
                };
            }
            ChunkKind::Word | ChunkKind::Group | ChunkKind::Optional | ChunkKind::List | ChunkKind::Rule => {
                let is_end_of_word = inner
                    .get(item_chunk.end..)
                    .and_then(|rest| rest.chars().next())
                    .is_none_or(char::is_whitespace);
                let item_chunk = Chunk {
                    start: item_chunk.start + offset,
                    end: item_chunk.end + offset,
                    ..item_chunk
                };
                let item = parse_chunk(&item_chunk, metadata, is_end_of_word, depth + 1)?;

                let target = match &mut group {
                    Group::Sequence(seq) => Some(seq),
                    Group::Alternative(alt) => alt.items.last_mut(),
                    Group::Permutation(perm) => perm.items.last_mut(),
                };
                match target {
                    Some(seq) => seq.items.push(item),
                    None => {
                        return Err(expression_error(chunk, metadata, ExpressionErrorReason::UnexpectedChunk));
                    }
                }
            }
        }
    }

    if let Group::Permutation(perm) = &mut group {
        for seq in &mut perm.items {
            seq.items.insert(0, Expression::Text(TextChunk::new(" ")));
            seq.items.push(Expression::Text(TextChunk::new(" ")));
        }
    }

    Ok(group.into_expression())
}

/// Builds the expression tree for a single chunk.
///
/// # Arguments
///
/// * `chunk` - A chunk returned by [`crate::grammar::next_chunk`]
/// * `metadata` - Context attached to any error raised
/// * `is_end_of_word` - Recorded on list references
///
/// # Returns
///
/// * `Ok(Expression)` on success
/// * `Err(ParseError::Expression)` if the chunk is a bare separator or its
///   contents cannot be parsed
pub fn parse_expression(chunk: &Chunk, metadata: Option<&str>, is_end_of_word: bool) -> ParseResult<Expression> {
    parse_chunk(chunk, metadata, is_end_of_word, 0)
}

fn parse_chunk(
    chunk: &Chunk,
    metadata: Option<&str>,
    is_end_of_word: bool,
    depth: usize,
) -> ParseResult<Expression> {
    match chunk.kind {
        ChunkKind::Word => {
            let original_text = remove_escapes(&chunk.text).trim().to_string();
            let text = normalize_text(&original_text);
            Ok(Expression::Text(TextChunk { text, original_text }))
        }
        ChunkKind::Group => parse_group(chunk, metadata, depth),
        ChunkKind::Optional => {
            let mut alternative = match parse_group(chunk, metadata, depth)? {
                Expression::Alternative(alt) => alt,
                other => Alternative {
                    items: vec![into_sequence(other)],
                    is_optional: false,
                },
            };
            alternative.is_optional = true;
            alternative.items.push(Sequence {
                items: vec![Expression::Text(TextChunk::empty())],
            });
            Ok(Expression::Alternative(alternative))
        }
        ChunkKind::List => {
            let name = remove_escapes(inner_text(chunk, metadata)?);
            let (list_name, slot_name) = match name.split_once(':') {
                Some((list, slot)) => (list.to_string(), slot.to_string()),
                None => (name.clone(), name),
            };
            Ok(Expression::List(ListReference {
                list_name,
                slot_name,
                is_end_of_word,
            }))
        }
        ChunkKind::Rule => Ok(Expression::Rule(RuleReference {
            rule_name: remove_escapes(inner_text(chunk, metadata)?),
        })),
        ChunkKind::Alternative | ChunkKind::Permutation => Err(expression_error(
            chunk,
            metadata,
            ExpressionErrorReason::UnexpectedChunk,
        )),
    }
}

/// Parses a sentence template with default options.
///
/// # Examples
///
/// ```
/// use minihass::grammar::{Expression, parse_sentence};
///
/// let sentence = parse_sentence("[the] (light|lights) in {area}").unwrap();
/// assert!(matches!(sentence.expression, Expression::Sequence(_)));
/// assert!(parse_sentence("turn on (the light").is_err());
/// ```
pub fn parse_sentence(text: &str) -> ParseResult<Sentence> {
    parse_sentence_with(text, &ParseOptions::default())
}

/// Parses a sentence template.
///
/// The whole input is treated as the body of one implicit group, so a
/// top-level `a|b` is an alternative. A group that is the only item of the
/// top-level sequence replaces it.
pub fn parse_sentence_with(text: &str, options: &ParseOptions) -> ParseResult<Sentence> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptySentence {
            text: text.to_string(),
        });
    }
    let wrapped = format!("({})", trimmed);

    let chunk = next_chunk(&wrapped, 0)?.ok_or_else(|| ParseError::EmptySentence {
        text: wrapped.clone(),
    })?;
    if chunk.kind != ChunkKind::Group || chunk.start != 0 {
        return Err(ParseError::ExpectedGroup { text: wrapped });
    }
    if chunk.end != wrapped.len() {
        return Err(ParseError::TrailingInput {
            end: chunk.end,
            text: wrapped,
        });
    }

    let expression = match parse_group(&chunk, options.metadata.as_deref(), 0)? {
        Expression::Sequence(mut seq)
            if seq.items.len() == 1 && seq.items.first().is_some_and(Expression::is_group) =>
        {
            match seq.items.pop() {
                Some(only) => only,
                None => Expression::Sequence(seq),
            }
        }
        other => other,
    };

    tracing::debug!(template = %trimmed, "parsed sentence template");
    Ok(Sentence {
        expression,
        text: options.keep_text.then(|| text.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> Expression {
        Expression::Text(TextChunk::new(t))
    }

    fn seq(items: Vec<Expression>) -> Sequence {
        Sequence { items }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_words() {
        let sentence = parse_sentence("Turn ON").unwrap();
        assert_eq!(
            sentence.expression,
            Expression::Sequence(seq(vec![
                Expression::Text(TextChunk {
                    text: "turn".to_string(),
                    original_text: "Turn".to_string(),
                }),
                Expression::Text(TextChunk {
                    text: "on".to_string(),
                    original_text: "ON".to_string(),
                }),
            ]))
        );
        assert_eq!(sentence.text, None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_alternative_unwraps() {
        let sentence = parse_sentence("(on|off)").unwrap();
        assert_eq!(
            sentence.expression,
            Expression::Alternative(Alternative {
                items: vec![seq(vec![text("on")]), seq(vec![text("off")])],
                is_optional: false,
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_optional() {
        let sentence = parse_sentence("[the] light").unwrap();
        assert_eq!(
            sentence.expression,
            Expression::Sequence(seq(vec![
                Expression::Alternative(Alternative {
                    items: vec![seq(vec![text("the")]), seq(vec![text("")])],
                    is_optional: true,
                }),
                text("light"),
            ]))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_permutation_padding() {
        let sentence = parse_sentence("(on;now)").unwrap();
        assert_eq!(
            sentence.expression,
            Expression::Permutation(Permutation {
                items: vec![
                    seq(vec![text(" "), text("on"), text(" ")]),
                    seq(vec![text(" "), text("now"), text(" ")]),
                ],
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_list_and_rule() {
        let sentence = parse_sentence("set {volume:volume_level}% <area>").unwrap();
        let Expression::Sequence(top) = sentence.expression else {
            panic!("expected a sequence");
        };
        assert_eq!(
            top.items,
            vec![
                text("set"),
                Expression::List(ListReference {
                    list_name: "volume".to_string(),
                    slot_name: "volume_level".to_string(),
                    is_end_of_word: false,
                }),
                text("%"),
                Expression::Rule(RuleReference {
                    rule_name: "area".to_string(),
                }),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_list_end_of_word() {
        let sentence = parse_sentence("in {area}").unwrap();
        let Expression::Sequence(top) = sentence.expression else {
            panic!("expected a sequence");
        };
        assert!(matches!(
            top.items.last(),
            Some(Expression::List(ListReference { is_end_of_word: true, .. }))
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escapes_removed() {
        let sentence = parse_sentence("a\\(b").unwrap();
        assert_eq!(
            sentence.expression,
            Expression::Sequence(seq(vec![text("a(b")]))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mixed_separators_rejected() {
        let options = ParseOptions {
            keep_text: false,
            metadata: Some("lights.yaml".to_string()),
        };
        let error = parse_sentence_with("(a|b;c)", &options).unwrap_err();
        let ParseError::Expression(error) = error else {
            panic!("expected an expression error, got {:?}", error);
        };
        assert_eq!(error.reason, ExpressionErrorReason::MixedSeparators);
        assert_eq!(error.chunk, "(a|b;c)");
        assert_eq!(error.metadata.as_deref(), Some("lights.yaml"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_structural_errors() {
        assert!(matches!(parse_sentence("   "), Err(ParseError::EmptySentence { .. })));
        assert!(matches!(parse_sentence("a) (b"), Err(ParseError::TrailingInput { .. })));
        assert!(matches!(parse_sentence("(a"), Err(ParseError::Unterminated { .. })));
        assert!(matches!(parse_sentence("a ()"), Err(ParseError::Expression(_))));
        assert!(matches!(parse_sentence("a ] b"), Err(ParseError::Expression(_))));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}a{}", "(".repeat(20), ")".repeat(20));
        assert!(parse_sentence(&shallow).is_ok());

        let deep = format!("{}a{}", "[".repeat(3000), "]".repeat(3000));
        let error = parse_sentence(&deep).unwrap_err();
        let ParseError::Expression(error) = error else {
            panic!("expected an expression error, got {:?}", error);
        };
        assert_eq!(error.reason, ExpressionErrorReason::TooDeeplyNested);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_keep_text() {
        let options = ParseOptions {
            keep_text: true,
            metadata: None,
        };
        let sentence = parse_sentence_with(" what is {name} ", &options).unwrap();
        assert_eq!(sentence.text.as_deref(), Some(" what is {name} "));
    }
}
