use std::fmt;

use super::scanner::{
    ALT_SEP, ESCAPE_CHAR, GROUP_END, GROUP_START, LIST_END, LIST_START, OPT_END, OPT_START, PERM_SEP,
    RULE_END, RULE_START,
};

/// A literal piece of a sentence template.
///
/// `text` is lowercased with whitespace collapsed and is what matching
/// compares against; `original_text` keeps the author's spelling for display.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextChunk {
    pub text: String,
    pub original_text: String,
}

impl TextChunk {
    pub fn new<T: Into<String>>(text: T) -> Self {
        let text = text.into();
        Self {
            original_text: text.clone(),
            text,
        }
    }

    /// An empty chunk. It matches without consuming any words.
    pub fn empty() -> Self {
        Self::new("")
    }

    /// True if the chunk matches without consuming input.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Items that must appear in order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Sequence {
    pub items: Vec<Expression>,
}

/// `(a|b)`: one of several sequences. `[a]` is an optional alternative whose
/// last branch is empty.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Alternative {
    pub items: Vec<Sequence>,
    pub is_optional: bool,
}

/// `(a;b)`: sequences that may appear in any order. Every branch is padded
/// with a single-space chunk at each end.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Permutation {
    pub items: Vec<Sequence>,
}

/// `{list}` or `{list:slot}`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListReference {
    pub list_name: String,
    /// Name the matched value is stored under. Defaults to `list_name`.
    pub slot_name: String,
    /// Whether the reference is followed by whitespace or ends its group.
    pub is_end_of_word: bool,
}

/// `<rule>`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleReference {
    pub rule_name: String,
}

/// A node of a parsed sentence template.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Text(TextChunk),
    Sequence(Sequence),
    Alternative(Alternative),
    Permutation(Permutation),
    List(ListReference),
    Rule(RuleReference),
}

impl Expression {
    pub const fn is_group(&self) -> bool {
        matches!(
            self,
            Self::Sequence(_) | Self::Alternative(_) | Self::Permutation(_)
        )
    }
}

/// A parsed sentence template.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sentence {
    pub expression: Expression,
    /// The template source, if it was kept at parse time.
    pub text: Option<String>,
}

fn write_branches(f: &mut fmt::Formatter<'_>, items: &[Sequence], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for item in &self.items {
            if matches!(item, Expression::Text(chunk) if chunk.is_empty()) {
                continue;
            }
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{}", item)?;
        }
        Ok(())
    }
}

const SPECIAL_CHARS: [char; 11] = [
    GROUP_START, GROUP_END, OPT_START, OPT_END, LIST_START, LIST_END, RULE_START, RULE_END, ALT_SEP,
    PERM_SEP, ESCAPE_CHAR,
];

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    for c in text.chars() {
        if SPECIAL_CHARS.contains(&c) {
            write!(f, "{}", ESCAPE_CHAR)?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

/// Renders the expression back in template syntax, normalized.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(chunk) => write_escaped(f, chunk.original_text.trim()),
            Self::Sequence(seq) => write!(f, "({})", seq),
            Self::Alternative(alt) if alt.is_optional => {
                let branches: Vec<Sequence> = alt
                    .items
                    .iter()
                    .filter(|seq| !seq.to_string().is_empty())
                    .cloned()
                    .collect();
                f.write_str("[")?;
                write_branches(f, &branches, "|")?;
                f.write_str("]")
            }
            Self::Alternative(alt) => {
                f.write_str("(")?;
                write_branches(f, &alt.items, "|")?;
                f.write_str(")")
            }
            Self::Permutation(perm) => {
                f.write_str("(")?;
                write_branches(f, &perm.items, ";")?;
                f.write_str(")")
            }
            Self::List(list) if list.slot_name != list.list_name => {
                write!(f, "{{{}:{}}}", list.list_name, list.slot_name)
            }
            Self::List(list) => write!(f, "{{{}}}", list.list_name),
            Self::Rule(rule) => write!(f, "<{}>", rule.rule_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_display_optional() {
        let optional = Expression::Alternative(Alternative {
            items: vec![
                Sequence {
                    items: vec![Expression::Text(TextChunk::new("the"))],
                },
                Sequence {
                    items: vec![Expression::Text(TextChunk::empty())],
                },
            ],
            is_optional: true,
        });
        assert_eq!(optional.to_string(), "[the]");
        assert!(optional.is_group());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_display_escapes_text() {
        let text = Expression::Text(TextChunk::new("a(b|c;d\\e"));
        assert_eq!(text.to_string(), "a\\(b\\|c\\;d\\\\e");
        let text = Expression::Text(TextChunk::new("[x] {y} <z>"));
        assert_eq!(text.to_string(), "\\[x\\] \\{y\\} \\<z\\>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_display_references() {
        let list = Expression::List(ListReference {
            list_name: "volume".to_string(),
            slot_name: "volume_level".to_string(),
            is_end_of_word: true,
        });
        assert_eq!(list.to_string(), "{volume:volume_level}");
        let rule = Expression::Rule(RuleReference {
            rule_name: "area".to_string(),
        });
        assert_eq!(rule.to_string(), "<area>");
        assert!(!rule.is_group());
    }
}
