use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use chrono::{DateTime, FixedOffset};

use crate::{
    error::{EvalError, TemplateError, TemplateResult},
    template::{
        ast::{AstNode, Block, Compiled, Expr},
        engine::TemplateEngine,
    },
    value::{Args, Map, Value},
};

/// Nested macro calls allowed before rendering is aborted.
pub const MAX_RECURSION: usize = 64;
/// How deep lists and maps may nest inside a value stored with `set`.
const MAX_VALUE_DEPTH: usize = 256;

/// A variable scope. Lookups walk outwards through the parents, writes always
/// land in the scope they are made in.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    vars: RefCell<BTreeMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root(vars: BTreeMap<String, Value>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(vars),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(BTreeMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    pub fn set<N: Into<String>>(&self, name: N, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }
}

/// A macro registered by a `{% macro %}` definition.
///
/// The body is shared with the parsed template, and calls evaluate in a fresh
/// child of the scope the macro was defined in.
#[derive(Debug)]
pub(crate) struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<Block>,
    pub closure: Rc<Scope>,
}

/// Mutable state of one render: collected soft errors, the macro call depth
/// and any pending right trim.
pub(crate) struct State<'e> {
    pub engine: &'e TemplateEngine,
    pub errors: Vec<String>,
    pub depth: usize,
    /// Set by an executed `-}}` or `-%}` until the next text is emitted.
    pub trim_next: bool,
    /// Fixed for the whole render so every `now` agrees.
    pub now: DateTime<FixedOffset>,
}

fn trim_end_in_place(out: &mut String) {
    let len = out.trim_end().len();
    out.truncate(len);
}

/// The name at the root of an assignment target such as `ns.items[0]`.
fn target_root(target: &Expr) -> &str {
    match target {
        Expr::Name(name) => name,
        Expr::Attr { object, .. } | Expr::Index { object, .. } => target_root(object),
        _ => "",
    }
}

impl<'e> State<'e> {
    pub fn new(engine: &'e TemplateEngine, now: DateTime<FixedOffset>) -> Self {
        Self {
            engine,
            errors: Vec::new(),
            depth: 0,
            trim_next: false,
            now,
        }
    }

    /// Evaluates a compiled expression, recording any failure as a soft error.
    /// Only the recursion limit escapes.
    fn eval_soft(&mut self, compiled: &Compiled, scope: &Rc<Scope>) -> TemplateResult<Option<Value>> {
        let result = match &compiled.expr {
            Ok(expr) => self.eval(expr, scope),
            Err(error) => Err(error.clone()),
        };
        match result {
            Ok(value) => Ok(Some(value)),
            Err(EvalError::RecursionLimit { name, limit }) => {
                Err(TemplateError::RecursionLimit { name, limit })
            }
            Err(reason) => {
                self.report(TemplateError::Evaluation {
                    line: compiled.loc.line,
                    column: compiled.loc.column,
                    expr: compiled.source.clone(),
                    reason,
                });
                Ok(None)
            }
        }
    }

    fn report(&mut self, error: TemplateError) {
        tracing::debug!(%error, "template error");
        self.errors.push(error.to_string());
    }

    /// Renders a block body into its own buffer, honouring a `-%}` on the
    /// opening tag and a `{%-` on the closing tag.
    pub fn render_block(&mut self, block: &Block, scope: &Rc<Scope>) -> TemplateResult<String> {
        let mut out = String::new();
        self.trim_next |= block.trim_start;
        self.render_nodes(&block.nodes, scope, &mut out)?;
        if block.trim_end {
            trim_end_in_place(&mut out);
        }
        Ok(out)
    }

    pub fn render_nodes(
        &mut self,
        nodes: &[AstNode],
        scope: &Rc<Scope>,
        out: &mut String,
    ) -> TemplateResult<()> {
        for node in nodes {
            match node {
                AstNode::Constant { data } => {
                    if std::mem::take(&mut self.trim_next) {
                        out.push_str(data.trim_start());
                    } else {
                        out.push_str(data);
                    }
                }
                AstNode::Variable {
                    expr,
                    trim_left,
                    trim_right,
                } => {
                    // A failed expression leaves the surrounding whitespace alone.
                    if let Some(value) = self.eval_soft(expr, scope)? {
                        if *trim_left {
                            trim_end_in_place(out);
                        }
                        out.push_str(&value.to_string());
                        self.trim_next |= *trim_right;
                    }
                }
                AstNode::If {
                    trim_left,
                    branches,
                    else_body,
                    trim_after,
                } => {
                    if *trim_left {
                        trim_end_in_place(out);
                    }
                    // Only a body closed by `endif` runs into its right trim.
                    let mut reached_end = false;
                    let mut taken = false;
                    for (index, branch) in branches.iter().enumerate() {
                        let condition = self.eval_soft(&branch.condition, scope)?;
                        if condition.is_some_and(|value| value.is_truthy()) {
                            out.push_str(&self.render_block(&branch.body, scope)?);
                            taken = true;
                            reached_end = else_body.is_none() && index + 1 == branches.len();
                            break;
                        }
                    }
                    if let (false, Some(body)) = (taken, else_body) {
                        out.push_str(&self.render_block(body, scope)?);
                        reached_end = true;
                    }
                    self.trim_next |= reached_end && *trim_after;
                }
                AstNode::For {
                    trim_left,
                    variable,
                    iterable,
                    body,
                    trim_after,
                } => {
                    if *trim_left {
                        trim_end_in_place(out);
                    }
                    let items = self
                        .eval_soft(iterable, scope)?
                        .and_then(|value| value.as_list())
                        .unwrap_or_default();
                    self.render_loop(variable, &items, body, scope, out)?;
                    self.trim_next |= !items.is_empty() && *trim_after;
                }
                AstNode::Set {
                    trim_left,
                    trim_right,
                    target,
                    value,
                } => {
                    if *trim_left {
                        trim_end_in_place(out);
                    }
                    self.trim_next |= *trim_right;
                    if let Some(value) = self.eval_soft(value, scope)? {
                        self.assign(target, value, scope)?;
                    }
                }
                AstNode::Macro {
                    trim_left,
                    name,
                    params,
                    body,
                    trim_after,
                } => {
                    if *trim_left {
                        trim_end_in_place(out);
                    }
                    tracing::debug!(name = %name, params = params.len(), "registering macro");
                    let definition = Macro {
                        name: name.clone(),
                        params: params.clone(),
                        body: Rc::clone(body),
                        closure: Rc::clone(scope),
                    };
                    self.engine
                        .macros
                        .borrow_mut()
                        .insert(name.clone(), Rc::new(definition));
                    self.trim_next |= *trim_after;
                }
                AstNode::Invalid { error } => self.report(error.clone()),
            }
        }
        Ok(())
    }

    fn render_loop(
        &mut self,
        variable: &str,
        items: &[Value],
        body: &Block,
        scope: &Rc<Scope>,
        out: &mut String,
    ) -> TemplateResult<()> {
        let length = items.len();
        for (index, item) in items.iter().enumerate() {
            let loop_scope = Scope::child(scope);
            loop_scope.set(variable, item.clone());
            let info: Map = [
                ("index", Value::from(index + 1)),
                ("index0", Value::from(index)),
                ("revindex", Value::from(length - index)),
                ("revindex0", Value::from(length - index - 1)),
                ("first", Value::Bool(index == 0)),
                ("last", Value::Bool(index + 1 == length)),
                ("length", Value::from(length)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            loop_scope.set("loop", Value::from(info));
            out.push_str(&self.render_block(body, &loop_scope)?);
        }
        Ok(())
    }

    /// `{% set %}`: plain names bind in the current scope, dotted and indexed
    /// targets write through to the map or list they resolve to.
    fn assign(&mut self, target: &Compiled, value: Value, scope: &Rc<Scope>) -> TemplateResult<()> {
        let Ok(target_expr) = &target.expr else {
            return Ok(());
        };
        let (object, key) = match target_expr {
            Expr::Name(name) => {
                scope.set(name.as_str(), value);
                return Ok(());
            }
            Expr::Attr { object, name } => (object, Value::from(name.as_str())),
            Expr::Index { object, index } => match self.eval(index, scope) {
                Ok(key) => (object, key),
                Err(EvalError::RecursionLimit { name, limit }) => {
                    return Err(TemplateError::RecursionLimit { name, limit });
                }
                Err(_) => (object, Value::Undefined),
            },
            _ => return Ok(()),
        };

        let container = match self.eval(object, scope) {
            Err(EvalError::RecursionLimit { name, limit }) => {
                return Err(TemplateError::RecursionLimit { name, limit });
            }
            Err(_) => Value::Undefined,
            Ok(container) => container,
        };
        if holds(&value, &container, 0) {
            self.report(TemplateError::Evaluation {
                line: target.loc.line,
                column: target.loc.column,
                expr: target.source.clone(),
                reason: EvalError::invalid_argument("set", "a value cannot contain itself"),
            });
            return Ok(());
        }
        let stored = match &container {
            Value::Map(map) if !key.is_undefined() => {
                map.borrow_mut().insert(key.to_string(), value);
                true
            }
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                match key.as_number().and_then(crate::template::eval::list_position) {
                    Some(position) if position < len => {
                        if let Some(slot) = items.get_mut(position) {
                            *slot = value;
                        }
                        true
                    }
                    Some(position) if position == len => {
                        items.push(value);
                        true
                    }
                    _ => false,
                }
            }
            _ => false,
        };
        if !stored {
            self.report(TemplateError::Assignment {
                line: target.loc.line,
                column: target.loc.column,
                target: target_root(target_expr).to_string(),
            });
        }
        Ok(())
    }

    /// Invokes a macro with positional or keyword arguments. Parameters that
    /// were not supplied are bound to undefined.
    pub fn call_macro(&mut self, definition: &Macro, args: &Args) -> Result<Value, EvalError> {
        if self.depth >= MAX_RECURSION {
            return Err(EvalError::RecursionLimit {
                name: definition.name.clone(),
                limit: MAX_RECURSION,
            });
        }

        let scope = Scope::child(&definition.closure);
        for (index, param) in definition.params.iter().enumerate() {
            let value = args.arg(index, param).cloned().unwrap_or_default();
            scope.set(param.as_str(), value);
        }

        // A trim pending at the call site belongs to the text after the call.
        let pending = std::mem::take(&mut self.trim_next);
        self.depth += 1;
        let rendered = self.render_block(&definition.body, &scope);
        self.depth -= 1;
        self.trim_next = pending;

        match rendered {
            Ok(text) => Ok(Value::String(text)),
            Err(TemplateError::RecursionLimit { name, limit }) => {
                Err(EvalError::RecursionLimit { name, limit })
            }
            Err(other) => Err(EvalError::invalid_argument(
                definition.name.as_str(),
                other.to_string(),
            )),
        }
    }
}

/// True when `value` is `container` or reaches it through nested lists and
/// maps. Values nested past `MAX_VALUE_DEPTH` count as a match.
fn holds(value: &Value, container: &Value, depth: usize) -> bool {
    if depth > MAX_VALUE_DEPTH {
        return true;
    }
    match (value, container) {
        (Value::Map(a), Value::Map(b)) if Rc::ptr_eq(a, b) => return true,
        (Value::List(a), Value::List(b)) if Rc::ptr_eq(a, b) => return true,
        _ => {}
    }
    match value {
        Value::Map(map) => map
            .borrow()
            .values()
            .any(|item| holds(item, container, depth + 1)),
        Value::List(items) => items
            .borrow()
            .iter()
            .any(|item| holds(item, container, depth + 1)),
        _ => false,
    }
}
