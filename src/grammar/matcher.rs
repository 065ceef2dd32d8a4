use crate::grammar::expression::{Alternative, Expression, Sentence, Sequence};

/// How a node fared against the input.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TraceStatus {
    Matched,
    Skipped,
    Extracted,
    Fail,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Matched => "Matched",
            Self::Skipped => "Skipped",
            Self::Extracted => "Extracted",
            Self::Fail => "Fail",
        };
        f.write_str(status)
    }
}

/// One step of a match, for display.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceEntry {
    /// The node in template syntax.
    pub node: String,
    pub status: TraceStatus,
    pub note: String,
}

impl TraceEntry {
    fn new<N: Into<String>>(node: &Expression, status: TraceStatus, note: N) -> Self {
        Self {
            node: node.to_string(),
            status,
            note: note.into(),
        }
    }
}

/// Outcome of matching an expression against a word list.
///
/// A failed match never consumes words.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub consumed: usize,
    pub trace: Vec<TraceEntry>,
}

impl MatchResult {
    fn success(consumed: usize, trace: Vec<TraceEntry>) -> Self {
        Self {
            matched: true,
            consumed,
            trace,
        }
    }

    fn failure(trace: Vec<TraceEntry>) -> Self {
        Self {
            matched: false,
            consumed: 0,
            trace,
        }
    }

    /// True if the match succeeded and used every one of `word_count` words.
    pub const fn is_complete(&self, word_count: usize) -> bool {
        self.matched && self.consumed == word_count
    }

    pub fn has_failure(&self) -> bool {
        !self.matched || self.trace.iter().any(|entry| entry.status == TraceStatus::Fail)
    }
}

/// Lowercases input and splits it on whitespace.
pub fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

fn match_sequence(seq: &Sequence, words: &[String], start: usize) -> MatchResult {
    let mut consumed = 0;
    let mut trace = Vec::new();
    for item in &seq.items {
        let result = match_expression(item, words, start + consumed);
        trace.extend(result.trace);
        if !result.matched {
            return MatchResult::failure(trace);
        }
        consumed += result.consumed;
    }
    MatchResult::success(consumed, trace)
}

/// Commits to the first branch that matches. Later failures elsewhere in the
/// tree do not revisit the choice.
fn match_alternative(node: &Expression, alt: &Alternative, words: &[String], start: usize) -> MatchResult {
    for branch in &alt.items {
        let result = match_sequence(branch, words, start);
        if !result.matched {
            continue;
        }
        if result.consumed == 0 && alt.is_optional {
            return MatchResult::success(0, vec![TraceEntry::new(node, TraceStatus::Skipped, "Omitted (allowed)")]);
        }
        return result;
    }

    let note = match words.get(start) {
        Some(word) => format!("No variant matches \"{}\"", word),
        None => "No variant matches the end of the sentence".to_string(),
    };
    MatchResult::failure(vec![TraceEntry::new(node, TraceStatus::Fail, note)])
}

/// Matches `expression` against `words`, starting at index `start`.
///
/// Matching is greedy and never backtracks. Permutations are checked in the
/// order written, list references take any single word, and rule references
/// match without consuming anything.
pub fn match_expression(expression: &Expression, words: &[String], start: usize) -> MatchResult {
    let result = match expression {
        Expression::Text(chunk) => {
            let expected: Vec<&str> = chunk.text.split_whitespace().collect();
            if expected.is_empty() {
                return MatchResult::success(0, Vec::new());
            }
            let actual = words.get(start..).unwrap_or_default();
            let found = expected.len() <= actual.len()
                && expected.iter().zip(actual).all(|(want, got)| *want == got.as_str());
            if found {
                MatchResult::success(
                    expected.len(),
                    vec![TraceEntry::new(
                        expression,
                        TraceStatus::Matched,
                        format!("Literal match: {}", chunk.text),
                    )],
                )
            } else {
                MatchResult::failure(vec![TraceEntry::new(
                    expression,
                    TraceStatus::Fail,
                    format!("Expected \"{}\"", chunk.original_text),
                )])
            }
        }
        Expression::Sequence(seq) => match_sequence(seq, words, start),
        Expression::Alternative(alt) => match_alternative(expression, alt, words, start),
        Expression::Permutation(perm) => {
            let mut consumed = 0;
            let mut trace = Vec::new();
            for branch in &perm.items {
                let result = match_sequence(branch, words, start + consumed);
                trace.extend(result.trace);
                if !result.matched {
                    return MatchResult::failure(trace);
                }
                consumed += result.consumed;
            }
            MatchResult::success(consumed, trace)
        }
        Expression::List(list) => match words.get(start) {
            Some(word) => MatchResult::success(
                1,
                vec![TraceEntry::new(
                    expression,
                    TraceStatus::Extracted,
                    format!("Assigned \"{}\" to {{{}}}", word, list.slot_name),
                )],
            ),
            None => MatchResult::failure(vec![TraceEntry::new(
                expression,
                TraceStatus::Fail,
                "Missing required value for slot",
            )]),
        },
        Expression::Rule(rule) => MatchResult::success(
            0,
            vec![TraceEntry::new(
                expression,
                TraceStatus::Skipped,
                format!("Rule <{}> is not expanded", rule.rule_name),
            )],
        ),
    };
    tracing::trace!(node = %expression, start, matched = result.matched, consumed = result.consumed, "matched node");
    result
}

/// Matches a whole sentence template from the first word.
///
/// # Examples
///
/// ```
/// use minihass::grammar::{match_sentence, parse_sentence, split_words};
///
/// let sentence = parse_sentence("[the] light").unwrap();
/// let words = split_words("The Light");
/// let result = match_sentence(&sentence, &words);
/// assert!(result.is_complete(words.len()));
/// ```
pub fn match_sentence(sentence: &Sentence, words: &[String]) -> MatchResult {
    let result = match_expression(&sentence.expression, words, 0);
    tracing::debug!(
        words = words.len(),
        matched = result.matched,
        consumed = result.consumed,
        "matched sentence"
    );
    result
}
