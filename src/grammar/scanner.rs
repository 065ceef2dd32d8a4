use crate::error::{ParseError, ParseResult};

pub(crate) const GROUP_START: char = '(';
pub(crate) const GROUP_END: char = ')';
pub(crate) const OPT_START: char = '[';
pub(crate) const OPT_END: char = ']';
pub(crate) const LIST_START: char = '{';
pub(crate) const LIST_END: char = '}';
pub(crate) const RULE_START: char = '<';
pub(crate) const RULE_END: char = '>';

pub(crate) const WORD_SEP: char = ' ';
pub(crate) const ALT_SEP: char = '|';
pub(crate) const PERM_SEP: char = ';';
pub(crate) const ESCAPE_CHAR: char = '\\';

/// What a chunk is, decided by its first character.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Word,
    /// `(...)`
    Group,
    /// `[...]`
    Optional,
    /// `{...}`
    List,
    /// `<...>`
    Rule,
    /// `|`
    Alternative,
    /// `;`
    Permutation,
}

impl ChunkKind {
    fn peek(c: char) -> Self {
        match c {
            GROUP_START => Self::Group,
            OPT_START => Self::Optional,
            LIST_START => Self::List,
            RULE_START => Self::Rule,
            ALT_SEP => Self::Alternative,
            PERM_SEP => Self::Permutation,
            _ => Self::Word,
        }
    }

    /// The delimiter pair of a delimited chunk and how to describe its closer.
    const fn delimiters(self) -> Option<(char, char, &'static str)> {
        match self {
            Self::Group => Some((GROUP_START, GROUP_END, "group ')'")),
            Self::Optional => Some((OPT_START, OPT_END, "optional ']'")),
            Self::List => Some((LIST_START, LIST_END, "list '}'")),
            Self::Rule => Some((RULE_START, RULE_END, "rule '>'")),
            Self::Word | Self::Alternative | Self::Permutation => None,
        }
    }
}

/// A lexical unit of a sentence template.
///
/// Offsets are byte offsets into the scanned text. For words `end` is where the
/// next chunk begins, past any separating whitespace, while `text` stops at the
/// last character of the word.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub kind: ChunkKind,
}

/// Returns the index just past the closer matching an already consumed opener.
fn find_end_delimiter(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 1usize;
    let mut escaped = false;
    for (i, c) in text.get(start..)?.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == ESCAPE_CHAR {
            escaped = true;
            continue;
        }
        if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(start + i + c.len_utf8());
            }
        } else if c == open {
            depth += 1;
        }
    }
    None
}

/// Returns `(content_end, end)`: where the word's own characters stop and
/// where the next chunk starts.
fn find_end_word(text: &str, start: usize) -> (usize, usize) {
    let rest = text.get(start..).unwrap_or_default();
    let mut escaped = false;
    let mut separator_found = false;
    let mut content_end = start;

    for (i, c) in rest.char_indices() {
        let here = start + i;
        if escaped {
            escaped = false;
            content_end = here + c.len_utf8();
            continue;
        }
        if c == ESCAPE_CHAR {
            escaped = true;
            content_end = here + c.len_utf8();
            continue;
        }
        if i > 0 && c == WORD_SEP {
            separator_found = true;
            continue;
        }
        if separator_found {
            return (content_end, here);
        }
        if ChunkKind::peek(c) != ChunkKind::Word || matches!(c, GROUP_END | OPT_END | LIST_END | RULE_END) {
            return (content_end, here);
        }
        content_end = here + c.len_utf8();
    }
    (content_end, text.len())
}

/// Scans the chunk starting at byte offset `start`.
///
/// # Arguments
///
/// * `text` - The sentence template being scanned
/// * `start` - Byte offset of the chunk's first character
///
/// # Returns
///
/// * `Ok(None)` at the end of the text
/// * `Ok(Some(chunk))` for the next chunk
/// * `Err(ParseError::Unterminated)` if a delimited chunk has no closer
///
/// # Examples
///
/// ```
/// use minihass::grammar::{ChunkKind, next_chunk};
///
/// let chunk = next_chunk("(a\\)b) c", 0).unwrap().unwrap();
/// assert_eq!(chunk.text, "(a\\)b)");
/// assert_eq!(chunk.kind, ChunkKind::Group);
/// ```
pub fn next_chunk(text: &str, start: usize) -> ParseResult<Option<Chunk>> {
    let Some(first) = text.get(start..).and_then(|rest| rest.chars().next()) else {
        return Ok(None);
    };
    let kind = ChunkKind::peek(first);

    let (content_end, end) = match kind.delimiters() {
        Some((open, close, expected)) => {
            let end = find_end_delimiter(text, start + first.len_utf8(), open, close).ok_or_else(|| {
                ParseError::Unterminated {
                    expected: expected.to_string(),
                    start,
                    text: text.to_string(),
                }
            })?;
            (end, end)
        }
        None if kind == ChunkKind::Word => find_end_word(text, start),
        None => {
            let end = start + first.len_utf8();
            (end, end)
        }
    };

    let chunk_text = text.get(start..content_end).unwrap_or_default().to_string();
    tracing::trace!(?kind, start, end, text = %chunk_text, "scanned chunk");
    Ok(Some(Chunk {
        text: chunk_text,
        start,
        end,
        kind,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(text: &str) -> Vec<(String, ChunkKind)> {
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some(chunk) = next_chunk(text, pos).unwrap() {
            pos = chunk.end;
            out.push((chunk.text, chunk.kind));
        }
        out
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_words_drop_separating_space() {
        let chunk = next_chunk("turn  on", 0).unwrap().unwrap();
        assert_eq!(chunk.text, "turn");
        assert_eq!(chunk.end, 6);
        assert_eq!(
            chunks("turn on"),
            vec![
                ("turn".to_string(), ChunkKind::Word),
                ("on".to_string(), ChunkKind::Word)
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_chunk_kinds() {
        assert_eq!(
            chunks("[the] (a|b){area}<name>|;x"),
            vec![
                ("[the]".to_string(), ChunkKind::Optional),
                (" ".to_string(), ChunkKind::Word),
                ("(a|b)".to_string(), ChunkKind::Group),
                ("{area}".to_string(), ChunkKind::List),
                ("<name>".to_string(), ChunkKind::Rule),
                ("|".to_string(), ChunkKind::Alternative),
                (";".to_string(), ChunkKind::Permutation),
                ("x".to_string(), ChunkKind::Word),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_word_stops_at_delimiter() {
        let chunk = next_chunk("light(s)", 0).unwrap().unwrap();
        assert_eq!(chunk.text, "light");
        assert_eq!(chunk.end, 5);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_closer_does_not_end_group() {
        let chunk = next_chunk("(a\\)b)", 0).unwrap().unwrap();
        assert_eq!(chunk.text, "(a\\)b)");
        assert_eq!(chunk.end, 6);

        let escaped_word = next_chunk("a\\|b c", 0).unwrap().unwrap();
        assert_eq!(escaped_word.text, "a\\|b");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_groups() {
        let chunk = next_chunk("((a|b) c) d", 0).unwrap().unwrap();
        assert_eq!(chunk.text, "((a|b) c)");
        assert_eq!(next_chunk("x", 1).unwrap(), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_group() {
        let error = next_chunk("(a (b)", 0).unwrap_err();
        assert_eq!(
            error,
            ParseError::Unterminated {
                expected: "group ')'".to_string(),
                start: 0,
                text: "(a (b)".to_string(),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_leading_space_word() {
        let chunk = next_chunk(" |-", 0).unwrap().unwrap();
        assert_eq!(chunk.text, " ");
        assert_eq!(chunk.end, 1);
        assert_eq!(chunk.kind, ChunkKind::Word);
    }
}
