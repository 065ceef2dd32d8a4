use std::{collections::BTreeMap, rc::Rc};

use crate::{
    error::{EvalError, EvalResult},
    template::dates,
    value::{Args, Function, Map, Value, format_number},
};

/// Signature of a filter: the piped value plus the filter's own arguments.
pub type FilterFn = Rc<dyn Fn(&Value, &Args) -> EvalResult<Value>>;

/// Python/Jinja method names mapped onto the canonical method they invoke.
const METHOD_ALIASES: [(&str, &str); 6] = [
    ("lower", "to_lowercase"),
    ("upper", "to_uppercase"),
    ("strip", "trim"),
    ("index", "index_of"),
    ("strftime", "format"),
    ("replace", "replace"),
];

/// Filters that are also callable as global functions.
const FILTER_FUNCTIONS: [&str; 5] = ["replace", "as_timestamp", "strptime", "timestamp_custom", "weekday"];

pub(crate) fn canonical_method(name: &str) -> &str {
    METHOD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, canonical)| canonical)
}

fn string_arg(args: &Args, index: usize, name: &str) -> Option<String> {
    args.arg(index, name)
        .filter(|v| !v.is_undefined())
        .map(ToString::to_string)
}

fn number_arg(function: &str, args: &Args, index: usize, name: &str) -> EvalResult<f64> {
    match args.arg(index, name) {
        None | Some(Value::Undefined | Value::None) => Ok(0.0),
        Some(value) => value
            .to_f64()
            .or_else(|| value.as_str().and_then(crate::value::parse_number))
            .ok_or_else(|| {
                EvalError::invalid_argument(function, format!("{} must be a number", name))
            }),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Replaces every occurrence of `old`. An empty `old` interleaves `new`
/// between the characters of `text`.
fn replace_all(text: &str, old: &str, new: &str) -> String {
    if old.is_empty() {
        return text
            .chars()
            .map(String::from)
            .collect::<Vec<String>>()
            .join(new);
    }
    text.replace(old, new)
}

/// Longest leading slice of `text` that forms a number: sign, digits, and
/// when `fractional` a decimal point and exponent.
fn numeric_prefix(text: &str, fractional: bool) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let sign = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    if fractional && text.get(sign..).is_some_and(|rest| rest.starts_with("Infinity")) {
        return Some(if bytes.first() == Some(&b'-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }

    let digits_from = |start: usize| bytes.iter().skip(start).take_while(|b| b.is_ascii_digit()).count();
    let integral = digits_from(sign);
    let mut end = sign + integral;
    let mut fraction = 0;
    if fractional && bytes.get(end) == Some(&b'.') {
        fraction = digits_from(end + 1);
        end += 1 + fraction;
    }
    if integral == 0 && fraction == 0 {
        return None;
    }
    if fractional && matches!(bytes.get(end), Some(b'e' | b'E')) {
        let exponent_sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exponent = digits_from(end + 1 + exponent_sign);
        if exponent > 0 {
            end += 1 + exponent_sign + exponent;
        }
    }
    text.get(..end)?.parse().ok()
}

fn to_int(value: &Value, args: &Args) -> EvalResult<Value> {
    let fallback = || args.arg(0, "default").cloned().unwrap_or(Value::Number(0.0));
    let parsed = match value {
        Value::Number(n) => Some(n.trunc()).filter(|n| n.is_finite()),
        other => numeric_prefix(&other.to_string(), false),
    };
    Ok(parsed.map_or_else(fallback, Value::Number))
}

fn to_float(value: &Value, args: &Args) -> EvalResult<Value> {
    let fallback = || args.arg(0, "default").cloned().unwrap_or(Value::Number(0.0));
    let parsed = match value {
        Value::Number(n) => Some(*n),
        other => numeric_prefix(&other.to_string(), true),
    };
    Ok(parsed.filter(|n| !n.is_nan()).map_or_else(fallback, Value::Number))
}

fn length(value: &Value) -> Value {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Map(map) => map.borrow().len(),
        _ => 0,
    };
    Value::from(len)
}

fn join(value: &Value, args: &Args) -> Value {
    let separator = string_arg(args, 0, "separator").unwrap_or_else(|| ", ".to_string());
    match value {
        Value::List(items) => Value::String(
            items
                .borrow()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(&separator),
        ),
        other => other.clone(),
    }
}

/// Coerces a date-like value (datetime, timestamp, or ISO text) into a datetime.
fn to_datetime(value: &Value) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Number(n) => dates::from_timestamp(*n, true),
        Value::String(s) => dates::parse_datetime(s),
        _ => None,
    }
}

fn as_timestamp(value: &Value, args: &Args) -> EvalResult<Value> {
    let timestamp = match value {
        Value::Number(n) => Some(*n),
        other => to_datetime(other).map(|dt| dates::timestamp(&dt)),
    };
    Ok(timestamp.map_or_else(
        || args.arg(0, "default").cloned().unwrap_or(Value::None),
        Value::Number,
    ))
}

fn strptime(value: &Value, args: &Args) -> EvalResult<Value> {
    let format = string_arg(args, 0, "format").unwrap_or_else(|| dates::DEFAULT_FORMAT.to_string());
    match dates::strptime(&value.to_string(), &format) {
        Ok(dt) => Ok(Value::DateTime(dt)),
        Err(error) => args.arg(1, "default").cloned().ok_or(error),
    }
}

fn timestamp_custom(value: &Value, args: &Args) -> EvalResult<Value> {
    let format = string_arg(args, 0, "format").unwrap_or_else(|| dates::DEFAULT_FORMAT.to_string());
    let local = args.arg(1, "local").is_none_or(Value::is_truthy);
    let seconds = value
        .to_f64()
        .or_else(|| value.as_str().and_then(crate::value::parse_number));
    let Some(dt) = seconds.and_then(|s| dates::from_timestamp(s, local)) else {
        return Err(EvalError::invalid_argument(
            "timestamp_custom",
            format!("{} is not a valid timestamp", value.type_name()),
        ));
    };
    dates::format(&dt, &format).map(Value::String)
}

fn weekday(value: &Value) -> EvalResult<Value> {
    let dt = if value.is_nullish() {
        dates::now()
    } else {
        to_datetime(value).ok_or_else(|| {
            EvalError::invalid_argument("weekday", format!("cannot read a date from {}", value.type_name()))
        })?
    };
    Ok(Value::from(dates::weekday(&dt)))
}

fn filter<F>(func: F) -> FilterFn
where
    F: Fn(&Value, &Args) -> EvalResult<Value> + 'static,
{
    Rc::new(func)
}

pub(crate) fn default_filters() -> BTreeMap<String, FilterFn> {
    let filters: [(&str, FilterFn); 18] = [
        ("upper", filter(|v, _| Ok(Value::String(v.to_string().to_uppercase())))),
        ("lower", filter(|v, _| Ok(Value::String(v.to_string().to_lowercase())))),
        ("capitalize", filter(|v, _| Ok(Value::String(capitalize(&v.to_string()))))),
        ("title", filter(|v, _| Ok(Value::String(title(&v.to_string()))))),
        ("trim", filter(|v, _| Ok(Value::String(v.to_string().trim().to_string())))),
        ("length", filter(|v, _| Ok(length(v)))),
        (
            "default",
            filter(|v, args| {
                let empty = v.is_nullish() || v.as_str() == Some("");
                Ok(if empty {
                    args.arg(0, "default_value").cloned().unwrap_or_default()
                } else {
                    v.clone()
                })
            }),
        ),
        ("join", filter(|v, args| Ok(join(v, args)))),
        (
            "replace",
            filter(|v, args| {
                let old = string_arg(args, 0, "old").unwrap_or_default();
                let new = string_arg(args, 1, "new").unwrap_or_default();
                Ok(Value::String(replace_all(&v.to_string(), &old, &new)))
            }),
        ),
        ("as_timestamp", filter(as_timestamp)),
        ("strptime", filter(strptime)),
        ("timestamp_custom", filter(timestamp_custom)),
        ("weekday", filter(|v, _| weekday(v))),
        ("int", filter(to_int)),
        ("float", filter(to_float)),
        ("bool", filter(|v, _| Ok(Value::Bool(v.is_truthy())))),
        ("abs", filter(|v, _| {
            v.to_f64()
                .map(|n| Value::Number(n.abs()))
                .ok_or_else(|| EvalError::invalid_argument("abs", format!("{} is not a number", v.type_name())))
        })),
        (
            "round",
            filter(|v, args| {
                let n = v.to_f64().ok_or_else(|| {
                    EvalError::invalid_argument("round", format!("{} is not a number", v.type_name()))
                })?;
                let precision = number_arg("round", args, 0, "precision")?;
                let factor = 10f64.powf(precision.trunc());
                Ok(Value::Number((n * factor).round() / factor))
            }),
        ),
    ];
    filters
        .into_iter()
        .map(|(name, f)| (name.to_string(), f))
        .collect()
}

fn namespace(args: &Args) -> EvalResult<Value> {
    let mut entries = Map::new();
    if let Some(Value::Map(initial)) = args.get(0) {
        entries.extend(initial.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    entries.extend(args.kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(Value::from(entries))
}

fn timedelta(args: &Args) -> EvalResult<Value> {
    let days = number_arg("timedelta", args, 0, "days")?;
    let hours = number_arg("timedelta", args, 1, "hours")?;
    let minutes = number_arg("timedelta", args, 2, "minutes")?;
    let seconds = number_arg("timedelta", args, 3, "seconds")?;
    Ok(Value::Number(
        (days * 86_400.0 + hours * 3_600.0 + minutes * 60.0 + seconds) * 1000.0,
    ))
}

fn today_at(args: &Args) -> EvalResult<Value> {
    let time = string_arg(args, 0, "time").unwrap_or_else(|| "00:00:00".to_string());
    dates::today_at(&dates::now(), &time).map(Value::DateTime)
}

/// Built-in global functions. `now` is supplied per render.
pub(crate) fn default_globals(filters: &BTreeMap<String, FilterFn>) -> BTreeMap<String, Value> {
    let mut globals = BTreeMap::new();
    globals.insert("namespace".to_string(), Value::from(Function::native("namespace", namespace)));
    globals.insert("timedelta".to_string(), Value::from(Function::native("timedelta", timedelta)));
    globals.insert("today_at".to_string(), Value::from(Function::native("today_at", today_at)));

    for name in FILTER_FUNCTIONS {
        if let Some(f) = filters.get(name) {
            let f = Rc::clone(f);
            let function = Function::native(name, move |args: &Args| {
                let (value, rest) = args.split_first();
                f(&value, &rest)
            });
            globals.insert(name.to_string(), Value::from(function));
        }
    }
    globals
}

fn string_method(text: &str, method: &str, args: &Args) -> Option<EvalResult<Value>> {
    let result = match method {
        "to_lowercase" => Value::String(text.to_lowercase()),
        "to_uppercase" => Value::String(text.to_uppercase()),
        "trim" => Value::String(text.trim().to_string()),
        "lstrip" => Value::String(text.trim_start().to_string()),
        "rstrip" => Value::String(text.trim_end().to_string()),
        "title" => Value::String(title(text)),
        "capitalize" => Value::String(capitalize(text)),
        "replace" => {
            let old = string_arg(args, 0, "old").unwrap_or_default();
            let new = string_arg(args, 1, "new").unwrap_or_default();
            Value::String(replace_all(text, &old, &new))
        }
        "index_of" => {
            let needle = string_arg(args, 0, "value").unwrap_or_default();
            text.find(&needle)
                .map_or(Value::Number(-1.0), |byte| Value::from(text[..byte].chars().count()))
        }
        "split" => match string_arg(args, 0, "sep") {
            Some(sep) if !sep.is_empty() => Value::list(text.split(sep.as_str()).map(Value::from)),
            _ => Value::list(text.split_whitespace().map(Value::from)),
        },
        "startswith" => Value::Bool(text.starts_with(&string_arg(args, 0, "prefix").unwrap_or_default())),
        "endswith" => Value::Bool(text.ends_with(&string_arg(args, 0, "suffix").unwrap_or_default())),
        _ => return None,
    };
    Some(Ok(result))
}

fn map_method(map: &Map, method: &str, args: &Args) -> Option<Value> {
    let result = match method {
        "get" => {
            let key = string_arg(args, 0, "key").unwrap_or_default();
            map.get(&key)
                .cloned()
                .unwrap_or_else(|| args.arg(1, "default").cloned().unwrap_or(Value::None))
        }
        "keys" => Value::list(map.keys().map(|k| Value::from(k.as_str()))),
        "values" => Value::list(map.values().cloned()),
        "items" => Value::list(
            map.iter()
                .map(|(k, v)| Value::list([Value::from(k.as_str()), v.clone()])),
        ),
        _ => return None,
    };
    Some(result)
}

fn datetime_method(
    dt: &chrono::DateTime<chrono::FixedOffset>,
    method: &str,
    args: &Args,
) -> Option<EvalResult<Value>> {
    let result = match method {
        "weekday" => Ok(Value::from(dates::weekday(dt))),
        "isoweekday" => Ok(Value::from(dates::weekday(dt) + 1)),
        "replace" => dates::replace(dt, &args.kwargs).map(Value::DateTime),
        "format" => {
            let format = string_arg(args, 0, "format").unwrap_or_else(|| dates::DEFAULT_FORMAT.to_string());
            dates::format(dt, &format).map(Value::String)
        }
        "isoformat" => Ok(Value::String(dt.to_rfc3339())),
        "timestamp" => Ok(Value::Number(dates::timestamp(dt))),
        _ => return None,
    };
    Some(result)
}

/// Calls a built-in method on `value`. `None` when the type has no such method.
pub(crate) fn call_method(value: &Value, method: &str, args: &Args) -> Option<EvalResult<Value>> {
    let method = canonical_method(method);
    match value {
        Value::String(text) => string_method(text, method, args),
        Value::List(items) if method == "index_of" => {
            let needle = args.get(0).cloned().unwrap_or_default();
            let position = items.borrow().iter().position(|item| item.loose_eq(&needle));
            Some(Ok(position.map_or(Value::Number(-1.0), Value::from)))
        }
        Value::Map(map) => map_method(&map.borrow(), method, args).map(Ok),
        Value::DateTime(dt) => datetime_method(dt, method, args),
        Value::Number(n) if method == "format" => Some(Ok(Value::String(format_number(*n)))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, value: Value, args: Vec<Value>) -> Value {
        let filters = default_filters();
        filters[name](&value, &Args::new(args)).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_filters() {
        assert_eq!(run("upper", Value::from("hi"), vec![]), Value::from("HI"));
        assert_eq!(run("capitalize", Value::from("hELLO"), vec![]), Value::from("HELLO"));
        assert_eq!(
            run("title", Value::from("living ROOM  lamp"), vec![]),
            Value::from("Living Room  Lamp")
        );
        assert_eq!(run("trim", Value::from("  x "), vec![]), Value::from("x"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_default_and_length() {
        assert_eq!(run("default", Value::Undefined, vec![Value::from(5)]), Value::from(5));
        assert_eq!(run("default", Value::from(""), vec![Value::from("d")]), Value::from("d"));
        assert_eq!(run("default", Value::from(0), vec![Value::from(5)]), Value::from(0));
        assert_eq!(run("length", Value::from("héllo"), vec![]), Value::from(5));
        assert_eq!(run("length", Value::Undefined, vec![]), Value::from(0));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_join_and_replace() {
        let list = Value::list([Value::from(1), Value::from("a")]);
        assert_eq!(run("join", list.clone(), vec![]), Value::from("1, a"));
        assert_eq!(run("join", list, vec![Value::from("-")]), Value::from("1-a"));
        assert_eq!(run("join", Value::from(3), vec![]), Value::from(3));
        assert_eq!(
            run("replace", Value::from("a.b.c"), vec![Value::from("."), Value::from("_")]),
            Value::from("a_b_c")
        );
        assert_eq!(
            run("replace", Value::from("abc"), vec![Value::from(""), Value::from("-")]),
            Value::from("a-b-c")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_numeric_parsing() {
        assert_eq!(run("int", Value::from("42abc"), vec![]), Value::from(42));
        assert_eq!(run("int", Value::from(" -7.9"), vec![]), Value::from(-7));
        assert_eq!(run("int", Value::from(3.7), vec![]), Value::from(3));
        assert_eq!(run("int", Value::from("abc"), vec![Value::from(9)]), Value::from(9));
        assert_eq!(run("float", Value::from("2.5e1x"), vec![]), Value::from(25.0));
        assert_eq!(run("float", Value::from(".5"), vec![]), Value::from(0.5));
        assert_eq!(run("float", Value::from("nope"), vec![]), Value::from(0.0));
        assert_eq!(run("bool", Value::from(""), vec![]), Value::from(false));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_timestamp_filters() {
        assert_eq!(
            run("as_timestamp", Value::from("1970-01-01T00:01:00+00:00"), vec![]),
            Value::from(60)
        );
        assert_eq!(run("as_timestamp", Value::from("garbage"), vec![]), Value::None);
        assert_eq!(
            run(
                "timestamp_custom",
                Value::from(0),
                vec![Value::from("%Y-%m-%d %H:%M"), Value::from(false)]
            ),
            Value::from("1970-01-01 00:00")
        );
        assert_eq!(
            run("weekday", Value::from("2024-03-04T12:00:00+00:00"), vec![]),
            Value::from(0)
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_globals() {
        let globals = default_globals(&default_filters());
        let Some(Value::Function(timedelta)) = globals.get("timedelta") else {
            panic!("timedelta is missing");
        };
        let crate::value::FunctionKind::Native(f) = &timedelta.kind else {
            panic!("timedelta should be native");
        };
        let mut args = Args::new(vec![Value::from(1)]);
        args.kwargs.insert("minutes".to_string(), Value::from(30));
        assert_eq!(f(&args).unwrap(), Value::from(88_200_000));
        assert!(globals.contains_key("replace"));
        assert!(globals.contains_key("namespace"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_methods() {
        let text = Value::from("Kitchen Light");
        let lower = call_method(&text, "lower", &Args::default()).unwrap().unwrap();
        assert_eq!(lower, Value::from("kitchen light"));
        let index = call_method(&text, "index", &Args::new(vec![Value::from("Light")]))
            .unwrap()
            .unwrap();
        assert_eq!(index, Value::from(8));
        let map = Value::from(serde_json::json!({"b": 2, "a": 1}));
        let keys = call_method(&map, "keys", &Args::default()).unwrap().unwrap();
        assert_eq!(keys, Value::list([Value::from("a"), Value::from("b")]));
        assert!(call_method(&Value::from(1), "keys", &Args::default()).is_none());
    }
}
