use std::{cmp::Ordering, rc::Rc};

use crate::{
    error::{EvalError, EvalResult},
    template::{
        ast::{BinOp, CallArgs, CmpOp, Expr},
        builtins, dates,
        render::{Scope, State},
    },
    value::{Args, FunctionKind, Map, Value},
};

/// A whole, non-negative `f64` as a list position.
pub(crate) fn list_position(n: f64) -> Option<usize> {
    if n.fract() != 0.0 || n < 0.0 || n > 9_007_199_254_740_992.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked")]
    let position = n as usize;
    Some(position)
}

/// Resolves a possibly negative index against a sequence of `len` items.
fn resolve_index(n: f64, len: usize) -> Option<usize> {
    if n < 0.0 {
        list_position(-n).and_then(|back| len.checked_sub(back))
    } else {
        list_position(n)
    }
    .filter(|position| *position < len)
}

fn undefined_access(property: &str, base: &Value) -> EvalError {
    EvalError::UndefinedAccess {
        property: property.to_string(),
        base: if base.is_undefined() { "undefined" } else { "null" }.to_string(),
    }
}

/// `value.name`
pub(crate) fn get_attr(value: &Value, name: &str) -> EvalResult<Value> {
    let numeric = crate::value::parse_number(name);
    let found = match value {
        Value::Undefined | Value::None => return Err(undefined_access(name, value)),
        Value::Map(map) => map.borrow().get(name).cloned(),
        Value::List(items) => {
            let items = items.borrow();
            if name == "length" {
                Some(Value::from(items.len()))
            } else {
                numeric
                    .and_then(|n| resolve_index(n, items.len()))
                    .and_then(|i| items.get(i).cloned())
            }
        }
        Value::String(text) => {
            if name == "length" {
                Some(Value::from(text.chars().count()))
            } else {
                numeric
                    .and_then(|n| resolve_index(n, text.chars().count()))
                    .and_then(|i| text.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
            }
        }
        Value::DateTime(dt) => dates::component(dt, name),
        Value::Bool(_) | Value::Number(_) | Value::Function(_) => None,
    };
    Ok(found.unwrap_or_default())
}

/// `value[index]`
pub(crate) fn get_index(value: &Value, index: &Value) -> EvalResult<Value> {
    match (value, index) {
        (Value::Undefined | Value::None, _) => Err(undefined_access(&index.to_string(), value)),
        (Value::List(_) | Value::String(_), Value::Number(n)) => {
            get_attr(value, &crate::value::format_number(*n))
        }
        (_, Value::String(name)) => get_attr(value, name),
        (Value::Map(map), key) => Ok(map.borrow().get(&key.to_string()).cloned().unwrap_or_default()),
        _ => Ok(Value::Undefined),
    }
}

fn number_operands(op: BinOp, left: &Value, right: &Value) -> EvalResult<(f64, f64)> {
    match (left.to_f64(), right.to_f64()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(EvalError::unsupported(op.symbol(), left.type_name(), right.type_name())),
    }
}

/// Longest string that `string * number` may build.
const MAX_REPEAT_LEN: usize = 1 << 24;

/// Arithmetic on two values.
pub(crate) fn binary(op: BinOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::String(_), _) | (BinOp::Add, _, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", left, right)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::from(items))
        }
        (BinOp::Add, Value::DateTime(dt), Value::Number(ms)) => {
            dates::add_millis(dt, *ms).map(Value::DateTime)
        }
        (BinOp::Sub, Value::DateTime(dt), Value::Number(ms)) => {
            dates::add_millis(dt, -ms).map(Value::DateTime)
        }
        (BinOp::Sub, Value::DateTime(a), Value::DateTime(b)) => {
            Ok(Value::Number(dates::diff_millis(a, b)))
        }
        (BinOp::Mul, Value::String(text), Value::Number(n))
        | (BinOp::Mul, Value::Number(n), Value::String(text)) => {
            let count = list_position(n.trunc().max(0.0)).unwrap_or(usize::MAX);
            match text.len().checked_mul(count) {
                Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::String(text.repeat(count))),
                _ => Err(EvalError::invalid_argument(
                    "*",
                    format!("repeated string would exceed {} bytes", MAX_REPEAT_LEN),
                )),
            }
        }
        (BinOp::Div, _, _) => {
            let (l, r) = number_operands(op, left, right)?;
            if r == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Number(l / r))
        }
        _ => {
            let (l, r) = number_operands(op, left, right)?;
            let result = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
            };
            Ok(Value::Number(result))
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> EvalResult<bool> {
    let ordered = |check: fn(Ordering) -> bool| {
        left.compare(right)
            .map(check)
            .ok_or_else(|| EvalError::unsupported(op.symbol(), left.type_name(), right.type_name()))
    };
    match op {
        CmpOp::Eq => Ok(left.loose_eq(right)),
        CmpOp::Ne => Ok(!left.loose_eq(right)),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::Le => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::Ge => ordered(Ordering::is_ge),
    }
}

impl State<'_> {
    /// Looks a bare name up: scope chain, then globals, then macros.
    fn resolve(&self, name: &str, scope: &Scope) -> Value {
        if let Some(value) = scope.lookup(name) {
            return value;
        }
        if name == "now" {
            return Value::DateTime(self.now);
        }
        if let Some(value) = self.engine.globals.get(name) {
            return value.clone();
        }
        self.engine
            .macros
            .borrow()
            .get(name)
            .map(|definition| {
                Value::Function(crate::value::Function::from_macro(name, Rc::clone(definition)))
            })
            .unwrap_or_default()
    }

    fn eval_args(&mut self, args: &CallArgs, scope: &Rc<Scope>) -> EvalResult<Args> {
        let mut evaluated = Args::default();
        for arg in &args.positional {
            evaluated.positional.push(self.eval(arg, scope)?);
        }
        for (name, arg) in &args.keyword {
            let value = self.eval(arg, scope)?;
            evaluated.kwargs.insert(name.clone(), value);
        }
        Ok(evaluated)
    }

    /// Calls a value. Non-callable values called without arguments evaluate to themselves.
    fn call_value(&mut self, callee: Value, args: &Args) -> EvalResult<Value> {
        match callee {
            Value::Function(function) => match &function.kind {
                FunctionKind::Native(native) => native(args),
                FunctionKind::Macro(definition) => self.call_macro(definition, args),
            },
            other if args.is_empty() => Ok(other),
            other => Err(EvalError::NotCallable {
                type_name: other.type_name().to_string(),
            }),
        }
    }

    fn call_method(
        &mut self,
        object: &Expr,
        method: &str,
        args: &CallArgs,
        scope: &Rc<Scope>,
    ) -> EvalResult<Value> {
        let target = self.eval(object, scope)?;
        if target.is_nullish() {
            return Err(undefined_access(method, &target));
        }
        let args = self.eval_args(args, scope)?;

        if let Some(Value::Function(function)) = target.get_key(method) {
            return self.call_value(Value::Function(function), &args);
        }
        if let Some(result) = builtins::call_method(&target, method, &args) {
            return result;
        }
        match get_attr(&target, method)? {
            Value::Undefined => Err(EvalError::UnknownMethod {
                method: method.to_string(),
                type_name: target.type_name().to_string(),
            }),
            attribute => self.call_value(attribute, &args),
        }
    }

    fn apply_filter(
        &mut self,
        value: &Expr,
        name: &str,
        args: &CallArgs,
        scope: &Rc<Scope>,
    ) -> EvalResult<Value> {
        let input = self.eval(value, scope)?;
        let args = self.eval_args(args, scope)?;
        let filter = self
            .engine
            .filters
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::FilterNotFound {
                name: name.to_string(),
            })?;
        filter(&input, &args)
    }

    fn test(&mut self, value: &Expr, name: &str, scope: &Rc<Scope>) -> EvalResult<bool> {
        let value = match name {
            // Definedness never fails on the value under test.
            "defined" | "undefined" => match self.eval(value, scope) {
                Ok(value) => value,
                Err(error @ EvalError::RecursionLimit { .. }) => return Err(error),
                Err(_) => Value::Undefined,
            },
            _ => self.eval(value, scope)?,
        };
        match name {
            "defined" => Ok(!value.is_undefined()),
            "undefined" => Ok(value.is_undefined()),
            "none" => Ok(value.is_nullish()),
            "number" => Ok(matches!(value, Value::Number(_))),
            "string" => Ok(matches!(value, Value::String(_))),
            _ => Err(EvalError::UnknownTest {
                name: name.to_string(),
            }),
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => Ok(self.resolve(name, scope)),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::from(values))
            }
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = self.eval(key, scope)?.to_string();
                    let value = self.eval(value, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::from(map))
            }
            Expr::Attr { object, name } => {
                let object = self.eval(object, scope)?;
                get_attr(&object, name)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                get_index(&object, &index)
            }
            Expr::Call { callee, args } => match callee.as_ref() {
                Expr::Attr { object, name } => self.call_method(object, name, args, scope),
                other => {
                    let callee = self.eval(other, scope)?;
                    let args = self.eval_args(args, scope)?;
                    self.call_value(callee, &args)
                }
            },
            Expr::Filter { value, name, args } => self.apply_filter(value, name, args, scope),
            Expr::Neg(inner) => {
                let value = self.eval(inner, scope)?;
                value.to_f64().map(|n| Value::Number(-n)).ok_or_else(|| {
                    EvalError::invalid_argument("unary -", format!("cannot negate {}", value.type_name()))
                })
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, scope)?.is_truthy())),
            Expr::And(left, right) => {
                let result = self.eval(left, scope)?.is_truthy() && self.eval(right, scope)?.is_truthy();
                Ok(Value::Bool(result))
            }
            Expr::Or(left, right) => {
                let result = self.eval(left, scope)?.is_truthy() || self.eval(right, scope)?.is_truthy();
                Ok(Value::Bool(result))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                binary(*op, &left, &right)
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                compare(*op, &left, &right).map(Value::Bool)
            }
            Expr::Test {
                value,
                name,
                negated,
            } => {
                let result = self.test(value, name, scope)?;
                Ok(Value::Bool(result != *negated))
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition, scope)?.is_truthy() {
                    self.eval(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, scope)
                } else {
                    Ok(Value::Undefined)
                }
            }
        }
    }
}
