use std::{cell::RefCell, cmp::Ordering, collections::BTreeMap, fmt, rc::Rc};

use chrono::{DateTime, FixedOffset};

use crate::error::EvalResult;
use crate::template::render::Macro;

/// Key/value storage backing [`Value::Map`].
pub type Map = BTreeMap<String, Value>;

/// Signature of a native function callable from templates.
pub type NativeFn = Rc<dyn Fn(&Args) -> EvalResult<Value>>;

/// A dynamically typed template value.
///
/// Lists and maps are shared handles: cloning a `Value::Map` clones the
/// handle, so `{% set ns.count = ... %}` is visible through every reference
/// to the same map. This is what makes the `namespace()` pattern work across
/// loop iterations.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    None,
    Bool(bool),
    Number(f64),
    String(String),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Map>>),
    DateTime(DateTime<FixedOffset>),
    Function(Function),
}

/// A callable value: either a native function or a template macro.
#[derive(Clone)]
pub struct Function {
    pub(crate) name: String,
    pub(crate) kind: FunctionKind,
}

#[derive(Clone)]
pub(crate) enum FunctionKind {
    Native(NativeFn),
    Macro(Rc<Macro>),
}

impl Function {
    pub fn native<N, F>(name: N, func: F) -> Self
    where
        N: Into<String>,
        F: Fn(&Args) -> EvalResult<Value> + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Native(Rc::new(func)),
        }
    }

    pub(crate) fn from_macro(name: &str, mac: Rc<Macro>) -> Self {
        Self {
            name: name.to_string(),
            kind: FunctionKind::Macro(mac),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FunctionKind::Native(_) => "native",
            FunctionKind::Macro(_) => "macro",
        };
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Arguments passed to a function, filter, or method call.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            kwargs: BTreeMap::new(),
        }
    }

    /// Positional argument `index`, if supplied.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Positional argument `index`, falling back to the keyword argument `name`.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.kwargs.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.kwargs.is_empty()
    }

    /// Splits off the first positional argument, used to call a filter as a function.
    pub(crate) fn split_first(&self) -> (Value, Self) {
        let mut positional = self.positional.iter();
        let first = positional.next().cloned().unwrap_or_default();
        (
            first,
            Self {
                positional: positional.cloned().collect(),
                kwargs: self.kwargs.clone(),
            },
        )
    }
}

impl Value {
    pub fn list<I: IntoIterator<Item = Self>>(items: I) -> Self {
        Self::List(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    pub fn map<I: IntoIterator<Item = (String, Self)>>(entries: I) -> Self {
        Self::Map(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::None => "none",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::DateTime(_) => "datetime",
            Self::Function(_) => "function",
        }
    }

    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Undefined or none.
    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::None)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::None => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Map(map) => !map.borrow().is_empty(),
            Self::DateTime(_) | Self::Function(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// A snapshot of the list items, if this is a list.
    pub fn as_list(&self) -> Option<Vec<Self>> {
        match self {
            Self::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    /// Numeric view used by arithmetic: numbers and booleans.
    pub(crate) fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Attribute lookup on a map key.
    pub fn get_key(&self, key: &str) -> Option<Self> {
        match self {
            Self::Map(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::None | Self::Function(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.borrow().iter().map(Self::to_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
        }
    }

    /// Loose equality: undefined equals none, numeric strings equal the
    /// numbers they spell and booleans compare as 0/1.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined | Self::None, Self::Undefined | Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Number(n), Self::String(s)) | (Self::String(s), Self::Number(n)) => {
                parse_number(s).is_some_and(|parsed| parsed == *n)
            }
            (Self::Bool(b), Self::Number(n)) | (Self::Number(n), Self::Bool(b)) => {
                f64::from(u8::from(*b)) == *n
            }
            (Self::List(a), Self::List(b)) => {
                Rc::ptr_eq(a, b) || {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
                }
            }
            (Self::Map(a), Self::Map(b)) => {
                Rc::ptr_eq(a, b) || {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.iter()
                            .zip(b.iter())
                            .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
                }
            }
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.name == b.name,
            _ => false,
        }
    }

    /// Ordering for `<`, `>`, `<=` and `>=`. `None` when the operands cannot be ordered.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Number(a), Self::String(s)) => parse_number(s).and_then(|b| a.partial_cmp(&b)),
            (Self::String(s), Self::Number(b)) => parse_number(s).and_then(|a| a.partial_cmp(b)),
            _ => None,
        }
    }
}

/// Parses a complete numeric literal such as `"42"` or `"-1.5e3"`.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty()
        || !text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    text.parse().ok()
}

/// Formats a number the way JavaScript's `String(n)` does for common values.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        #[allow(clippy::cast_possible_truncation, reason = "checked to be integral and in range")]
        let integral = n as i64;
        return serde_json::Value::from(integral);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Renders a value into template output.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined | Self::None => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => f.write_str(&self.to_json().to_string()),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%:z")),
            Self::Function(func) => write!(f, "<function {}>", func.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Number(n) => write!(f, "Number({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::List(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Self::Map(map) => f.debug_map().entries(map.borrow().iter()).finish(),
            Self::DateTime(dt) => write!(f, "DateTime({})", dt.to_rfc3339()),
            Self::Function(func) => write!(f, "{:?}", func),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => *a.borrow() == *b.borrow(),
            (Self::Map(a), Self::Map(b)) => *a.borrow() == *b.borrow(),
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss, reason = "template numbers are f64")]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<usize> for Value {
    #[allow(clippy::cast_precision_loss, reason = "template numbers are f64")]
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(value)))
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Map(Rc::new(RefCell::new(value)))
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTime(value)
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Self::Function(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::list(items.into_iter().map(Self::from)),
            serde_json::Value::Object(entries) => {
                Self::map(entries.into_iter().map(|(k, v)| (k, Self::from(v))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_display_collections_as_json() {
        let value = Value::from(serde_json::json!({"b": [1, 2.5, null], "a": "x"}));
        assert_eq!(value.to_string(), r#"{"a":"x","b":[1,2.5,null]}"#);
        assert_eq!(Value::Undefined.to_string(), "");
        assert_eq!(Value::None.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::list(Vec::new()).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::from(vec![Value::None]).is_truthy());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loose_equality() {
        assert!(Value::Undefined.loose_eq(&Value::None));
        assert!(Value::from(1).loose_eq(&Value::from("1")));
        assert!(Value::from(true).loose_eq(&Value::from(1)));
        assert!(!Value::from("a").loose_eq(&Value::from(0)));
        assert!(Value::from(vec![Value::from(1)]).loose_eq(&Value::from(vec![Value::from("1")])));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compare() {
        assert_eq!(Value::from(1).compare(&Value::from(2)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from("10").compare(&Value::from(9)), Some(Ordering::Greater));
        assert_eq!(Value::from(1).compare(&Value::Undefined), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_shared_map_handle() {
        let map = Value::map([("v".to_string(), Value::from(1))]);
        let alias = map.clone();
        if let Value::Map(inner) = &alias {
            inner.borrow_mut().insert("v".to_string(), Value::from(2));
        }
        assert_eq!(map.get_key("v"), Some(Value::from(2)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_args_split_first() {
        let args = Args::new(vec![Value::from("a"), Value::from("b")]);
        let (first, rest) = args.split_first();
        assert_eq!(first, Value::from("a"));
        assert_eq!(rest.positional, vec![Value::from("b")]);
        assert_eq!(rest.arg(3, "missing"), None);

        let (first, rest) = Args::default().split_first();
        assert!(first.is_undefined());
        assert!(rest.is_empty());
    }
}
