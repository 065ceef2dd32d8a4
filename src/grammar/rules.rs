/// Expansion rules shared by the Home Assistant intent sentences, keyed by
/// rule name. Sentences refer to them as `<name>`.
pub const COMMON_EXPANSION_RULES: &[(&str, &str)] = &[
    ("the", "(the|my|our)"),
    ("name", "[<the>] {name}"),
    ("area", "[<the>] {area}"),
    ("floor", "[<the>] {floor} [floor]"),
    ("area_floor", "(<area>|<floor>)"),
    ("in_area_floor", "[<in>] <area_floor>"),
    ("what_is", "(what's|whats|what is|tell me)"),
    ("how_is", "(how is|how's|hows)"),
    ("lockable", "[<the>] (lock|door|window|gate|garage door|shutter)[s]"),
    ("where_is", "(where's|wheres|where is)"),
    ("which", "(which|what) [of <the>]"),
    ("is", "(is|are) [(there|<the>)]"),
    ("are", "<is>"),
    ("any", "(any|some) [of <the>]"),
    ("are_any", "[<are>] <any>"),
    ("how_many", "how many [of <the>]"),
    ("brightness", "{brightness}[([ ]%)| percent]"),
    ("light", "(light|lights|lighting|lamp|lamps)"),
    ("turn", "(turn|switch|change|bring)"),
    ("temp", "(temp|temperature)"),
    ("temperature", "{temperature}[([ ]°)|( degree[s])]"),
    ("open", "(open|raise|lift) [up]"),
    ("close", "(close|shut|lower) [(up|down)]"),
    ("set", "(set|make|change|turn)"),
    ("numeric_value_set", "(set|change|turn [(up|down)]|increase|decrease|make)"),
    ("in", "(in|on|at|of|across|around|throughout)"),
    ("position", "{position}[([ ]%)| percent]"),
    ("volume", "{volume:volume_level}[([ ]%)| percent]"),
    ("currently", "(currently|presently|right now|at the moment)"),
    ("state", "[(present|current)] (state|status)"),
    ("clean", "(vacuum|clean)"),
    ("all", "(all [[of] <the>]|every [single]|each [and every])"),
    ("are_all", "[<are>] <all>"),
    ("home", "(home|house|apartment|flat)"),
    ("everywhere", "(everywhere|all over|[<in>] <the> [(entire|whole)] <home>|[<in>] <all> (room|area|floor)[s])"),
    ("here", "([in] here|[in] (this|<the>) (room|area|space))"),
    ("what_is_the_class_of_name", "(<what_is> the <class> (of|in|from|(indicated|measured) by) <name> [in <area>]|<what_is> <name>['s] <class> [in <area>]|<what_is> <area> <name>['s] <class>)"),
    ("timer_set", "(start|set|create)"),
    ("timer_cancel", "(cancel|stop)"),
    ("timer_duration_seconds", "{timer_seconds:seconds}( |-)second[s]"),
    ("timer_duration_minutes", "({timer_minutes:minutes}( |-)minute[s] [[and] {timer_seconds:seconds}( |-)second[s]])|({timer_minutes:minutes} and [a] {timer_half:seconds} minute[s])|({timer_half:seconds} a minute[s])"),
    ("timer_duration_hours", "({timer_hours:hours}( |-)hour[s] [[and] {timer_minutes:minutes}( |-)minute[s]] [[and] {timer_seconds:seconds}( |-)second[s]])|({timer_hours:hours} and [a] {timer_half:minutes} hour[s])|({timer_half:minutes} an hour[s])"),
    ("timer_duration", "<timer_duration_seconds>|<timer_duration_minutes>|<timer_duration_hours>"),
    ("timer_start_seconds", "{timer_seconds:start_seconds}( |-)second[s]"),
    ("timer_start_minutes", "{timer_minutes:start_minutes}( |-)minute[s] [[and] {timer_seconds:start_seconds}( |-)second[s]]"),
    ("timer_start_hours", "{timer_hours:start_hours}( |-)hour[s] [[and] {timer_minutes:start_minutes}( |-)minute[s]] [[and] {timer_seconds:start_seconds}( |-)second[s]]"),
    ("timer_start", "<timer_start_seconds>|<timer_start_minutes>|<timer_start_hours>"),
    ("fan_speed", "{fan_speed:percentage}[%| percent]"),
];

/// Looks up a common expansion rule by name.
pub fn common_rule(name: &str) -> Option<&'static str> {
    COMMON_EXPANSION_RULES
        .iter()
        .find(|(rule, _)| *rule == name)
        .map(|(_, template)| *template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{matcher::{match_sentence, split_words}, parser::parse_sentence};

    #[test]
    #[ntest::timeout(100)]
    fn test_every_rule_parses() {
        for (name, template) in COMMON_EXPANSION_RULES {
            assert!(
                parse_sentence(template).is_ok(),
                "rule <{}> failed to parse: {}",
                name,
                template
            );
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lookup() {
        assert_eq!(common_rule("the"), Some("(the|my|our)"));
        assert_eq!(common_rule("are"), Some("<is>"));
        assert_eq!(common_rule("missing"), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_rule_matches() {
        let sentence = parse_sentence(common_rule("light").unwrap()).unwrap();
        let words = split_words("Lamps");
        assert!(match_sentence(&sentence, &words).is_complete(words.len()));

        let sentence = parse_sentence(common_rule("currently").unwrap()).unwrap();
        let words = split_words("at the moment");
        assert!(match_sentence(&sentence, &words).is_complete(words.len()));
    }
}
