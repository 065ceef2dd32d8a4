use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::{
    error::{EvalResult, TemplateResult},
    interface::Context,
    template::{
        ast::AstNode,
        builtins::{self, FilterFn},
        dates,
        expr::parse_expression,
        parser::parse,
        render::{Macro, Scope, State},
    },
    value::{Args, Function, Value},
};

/// The result of rendering a template.
///
/// Rendering keeps going past most problems: each one is recorded as a
/// message in `errors` and the offending tag or expression produces no output.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderOutput {
    pub output: String,
    pub errors: Vec<String>,
}

impl RenderOutput {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A Template is template source parsed once, ready to be rendered many times.
///
/// # Example
///
/// ```rust
/// use minihass::{Context, Template, TemplateEngine};
///
/// let template = Template::new("Hello, {{ name | title }}!");
/// let engine = TemplateEngine::new();
///
/// let mut context = Context::new();
/// context.insert("name", "world");
///
/// let result = engine.render_template(&template, &context).unwrap();
/// assert_eq!(result.output, "Hello, World!");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct Template {
    content: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) nodes: Rc<[AstNode]>,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            content: String,
        }

        // The node tree is rebuilt from the source.
        let helper = TemplateHelper::deserialize(deserializer)?;
        Ok(Template::new(helper.content))
    }
}

impl Template {
    /// Parses template source.
    ///
    /// Parsing never fails: malformed tags and expressions are kept in the
    /// tree and reported each time a render reaches them.
    pub fn new<T: Into<String>>(content: T) -> Self {
        let content = content.into();
        let nodes = parse(&content).into();
        Self { content, nodes }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

/// `TemplateEngine` renders Jinja-style templates against a [`Context`].
///
/// The engine owns the filter table, the global functions and values, and the
/// macro table. Macros registered by one render stay available to the renders
/// that follow.
///
/// # Examples
///
/// ```
/// use minihass::{Context, TemplateEngine, Value};
///
/// let engine = TemplateEngine::new();
/// let mut context = Context::new();
/// context.insert("lights", vec![Value::from("kitchen"), Value::from("hall")]);
///
/// let result = engine
///     .render("{% for l in lights %}{{ l | upper }}{% if not loop.last %}, {% endif %}{% endfor %}", &context)
///     .unwrap();
/// assert_eq!(result.output, "KITCHEN, HALL");
/// assert!(result.errors.is_empty());
/// ```
pub struct TemplateEngine {
    pub(crate) filters: BTreeMap<String, FilterFn>,
    pub(crate) globals: BTreeMap<String, Value>,
    pub(crate) macros: RefCell<BTreeMap<String, Rc<Macro>>>,
}

impl TemplateEngine {
    /// Creates an engine with the built-in filters and globals.
    pub fn new() -> Self {
        let filters = builtins::default_filters();
        let globals = builtins::default_globals(&filters);
        Self {
            filters,
            globals,
            macros: RefCell::new(BTreeMap::new()),
        }
    }

    /// Registers a filter, replacing any existing filter of the same name.
    ///
    /// # Arguments
    ///
    /// * `name` - The name used after `|` in templates
    /// * `filter` - Receives the piped value and the filter's arguments
    ///
    /// # Examples
    ///
    /// ```
    /// use minihass::{Context, TemplateEngine, Value};
    ///
    /// let mut engine = TemplateEngine::new();
    /// engine.add_filter("double", |value, _args| {
    ///     Ok(Value::from(value.as_number().unwrap_or_default() * 2.0))
    /// });
    ///
    /// let result = engine.render("{{ 21 | double }}", &Context::new()).unwrap();
    /// assert_eq!(result.output, "42");
    /// ```
    pub fn add_filter<N, F>(&mut self, name: N, filter: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&Value, &Args) -> EvalResult<Value> + 'static,
    {
        self.filters.insert(name.into(), Rc::new(filter));
        self
    }

    /// Registers a global function callable by name from templates.
    pub fn add_function<N, F>(&mut self, name: N, function: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&Args) -> EvalResult<Value> + 'static,
    {
        let name = name.into();
        let function = Function::native(name.clone(), function);
        self.globals.insert(name, Value::Function(function));
        self
    }

    /// Registers a global value. Context variables of the same name take precedence.
    pub fn add_global<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Names of the macros registered so far, in sorted order.
    pub fn macro_names(&self) -> Vec<String> {
        self.macros.borrow().keys().cloned().collect()
    }

    pub fn has_filter<N: AsRef<str>>(&self, name: N) -> bool {
        self.filters.contains_key(name.as_ref())
    }

    /// Parses and renders template source.
    ///
    /// # Arguments
    ///
    /// * `source` - The template source
    /// * `context` - Root variables visible to the template
    ///
    /// # Returns
    ///
    /// * `Ok(RenderOutput)` with the output text and any soft errors
    /// * `Err(TemplateError::RecursionLimit)` if macro calls nest deeper than
    ///   [`crate::MAX_RECURSION`]
    ///
    /// # Examples
    ///
    /// ```
    /// use minihass::{Context, TemplateEngine};
    ///
    /// let engine = TemplateEngine::new();
    /// let result = engine.render("{{ 1 + 2 }}{{ missing.prop }}", &Context::new()).unwrap();
    /// assert_eq!(result.output, "3");
    /// assert_eq!(result.errors.len(), 1);
    /// ```
    pub fn render<S: AsRef<str>>(&self, source: S, context: &Context) -> TemplateResult<RenderOutput> {
        let template = Template::new(source.as_ref());
        self.render_template(&template, context)
    }

    /// Renders a pre-parsed template.
    pub fn render_template(&self, template: &Template, context: &Context) -> TemplateResult<RenderOutput> {
        tracing::debug!(len = template.content.len(), "rendering template");
        let scope = Scope::root(context.variables().clone());
        let mut state = State::new(self, dates::now());
        let mut output = String::new();
        state.render_nodes(&template.nodes, &scope, &mut output)?;
        tracing::debug!(errors = state.errors.len(), "render finished");

        Ok(RenderOutput {
            output,
            errors: state.errors,
        })
    }

    /// Evaluates a single expression against a context.
    ///
    /// # Examples
    ///
    /// ```
    /// use minihass::{Context, TemplateEngine, Value};
    ///
    /// let engine = TemplateEngine::new();
    /// let value = engine.evaluate("'on' if 3 > 2 else 'off'", &Context::new()).unwrap();
    /// assert_eq!(value, Value::from("on"));
    /// ```
    pub fn evaluate<S: AsRef<str>>(&self, expr: S, context: &Context) -> EvalResult<Value> {
        let expr = parse_expression(expr.as_ref())?;
        let scope = Scope::root(context.variables().clone());
        let mut state = State::new(self, dates::now());
        state.eval(&expr, &scope)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("macros", &self.macro_names())
            .finish()
    }
}
