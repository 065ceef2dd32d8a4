
use fixtures::{generate_random_whitespace, generate_random_whitespace_at_least_one};
use minihass::{
    ParseError,
    grammar::{
        COMMON_EXPANSION_RULES, ChunkKind, Expression, TraceStatus, match_sentence, next_chunk,
        parse_sentence, split_words, tokens::tokenize,
    },
};

fn matches_fully(template: &str, input: &str) -> bool {
    let sentence = parse_sentence(template).unwrap();
    let words = split_words(input);
    match_sentence(&sentence, &words).is_complete(words.len())
}

#[test]
#[ntest::timeout(100)]
fn test_optional_skip() {
    assert!(matches_fully("[the] light", "light"));
    assert!(matches_fully("[the] light", "the light"));

    let sentence = parse_sentence("[the] light").unwrap();
    let result = match_sentence(&sentence, &split_words("a light"));
    assert!(!result.matched);
    assert_eq!(result.consumed, 0);
}

#[test]
#[ntest::timeout(100)]
fn test_alternative_commit() {
    assert!(matches_fully("(on|off)", "on"));
    assert!(matches_fully("(on|off)", "OFF"));

    let sentence = parse_sentence("(on|off)").unwrap();
    let result = match_sentence(&sentence, &split_words("maybe"));
    assert!(!result.matched);
    assert_eq!(result.consumed, 0);
    assert_eq!(
        result
            .trace
            .iter()
            .filter(|entry| entry.status == TraceStatus::Fail)
            .count(),
        1
    );
}

#[test]
#[ntest::timeout(100)]
fn test_escaped_delimiter_balance() {
    let chunk = next_chunk("(a\\)b)", 0).unwrap().unwrap();
    assert_eq!(chunk.kind, ChunkKind::Group);
    assert_eq!(chunk.text, "(a\\)b)");

    let sentence = parse_sentence("(a\\)b|c)").unwrap();
    let Expression::Alternative(alternative) = &sentence.expression else {
        panic!("expected an alternative, got {:?}", sentence.expression);
    };
    assert_eq!(alternative.items.len(), 2);
    assert!(matches_fully("(a\\)b|c)", "a)b"));
}

#[test]
#[ntest::timeout(100)]
fn test_intent_sentence() {
    let template = "(turn|switch) on [the] {name} [in {area}]";
    assert!(matches_fully(template, "Switch on the kitchen"));

    let sentence = parse_sentence(template).unwrap();
    let words = split_words("turn on kitchen in hall");
    let result = match_sentence(&sentence, &words);
    assert!(result.is_complete(words.len()));
    let extracted: Vec<&str> = result
        .trace
        .iter()
        .filter(|entry| entry.status == TraceStatus::Extracted)
        .map(|entry| entry.note.as_str())
        .collect();
    assert_eq!(
        extracted,
        vec!["Assigned \"kitchen\" to {name}", "Assigned \"hall\" to {area}"]
    );
}

#[test]
#[ntest::timeout(100)]
fn test_input_whitespace_is_ignored() {
    let input = format!(
        "{}turn{}on{}the{}light{}",
        generate_random_whitespace(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace(),
    );
    assert!(
        matches_fully("turn on [the] (light|lights)", &input),
        "input was {:?}",
        input
    );
}

#[test]
#[ntest::timeout(100)]
fn test_partial_match_is_not_complete() {
    let sentence = parse_sentence("turn on").unwrap();
    let words = split_words("turn on now");
    let result = match_sentence(&sentence, &words);
    assert!(result.matched);
    assert_eq!(result.consumed, 2);
    assert!(!result.is_complete(words.len()));
}

#[test]
#[ntest::timeout(100)]
fn test_common_rules_parse_and_tokenize() {
    for (name, body) in COMMON_EXPANSION_RULES {
        assert!(parse_sentence(body).is_ok(), "rule <{}> failed to parse", name);
        assert!(tokenize(body).is_ok(), "rule <{}> failed to tokenize", name);
    }
}

#[test]
#[ntest::timeout(100)]
fn test_parse_error_messages() {
    let error = parse_sentence("turn on (the light").unwrap_err();
    assert!(matches!(error, ParseError::Unterminated { .. }));
    assert!(
        error.to_string().starts_with("Unable to find end of group ')'"),
        "unexpected message: {}",
        error
    );

    let error = parse_sentence("(on|off;now)").unwrap_err();
    assert!(
        error
            .to_string()
            .ends_with("alternatives '|' and permutations ';' cannot be mixed in one group"),
        "unexpected message: {}",
        error
    );
}

#[test]
#[ntest::timeout(100)]
fn test_display_reparses_escaped_text() {
    let sentence = parse_sentence("(a\\)b|c) \\[x\\]").unwrap();
    let rendered = sentence.expression.to_string();
    assert!(rendered.contains("a\\)b"), "rendered as {}", rendered);
    assert!(rendered.contains("\\[x\\]"), "rendered as {}", rendered);

    let reparsed = parse_sentence(&rendered).unwrap();
    let words = split_words("a)b [x]");
    assert!(match_sentence(&reparsed, &words).is_complete(words.len()));
}
