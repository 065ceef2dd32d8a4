use std::rc::Rc;

use crate::error::{EvalError, TemplateError};
use crate::template::lexer::Location;
use crate::value::Value;

/// An expression as written in the template, compiled once at parse time.
///
/// Syntax errors are kept rather than raised so they surface as soft render
/// errors each time the owning node is reached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Compiled {
    pub source: String,
    pub loc: Location,
    pub expr: Result<Expr, EvalError>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AstNode {
    /// A constant block of text from the template.
    Constant { data: String },
    /// `{{ expr }}`
    Variable {
        expr: Compiled,
        trim_left: bool,
        trim_right: bool,
    },
    /// `if` with any number of `elif` branches and an optional `else`.
    /// `trim_after` is the right-trim marker of `endif`.
    If {
        trim_left: bool,
        branches: Vec<Branch>,
        else_body: Option<Block>,
        trim_after: bool,
    },
    /// A For loop.
    For {
        trim_left: bool,
        variable: String,
        iterable: Compiled,
        body: Block,
        trim_after: bool,
    },
    /// `set target = value`
    Set {
        trim_left: bool,
        trim_right: bool,
        target: Compiled,
        value: Compiled,
    },
    /// A macro definition. The body is shared with every registered copy.
    Macro {
        trim_left: bool,
        name: String,
        params: Vec<String>,
        body: Rc<Block>,
        trim_after: bool,
    },
    /// A statement that could not be parsed, reported when execution reaches it.
    Invalid { error: TemplateError },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Branch {
    pub condition: Compiled,
    pub body: Block,
}

/// The nodes between an opening tag and the tag that closed it.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Block {
    pub nodes: Vec<AstNode>,
    /// The opening tag carried a `-%}` marker.
    pub trim_start: bool,
    /// The closing tag carried a `{%-` marker.
    pub trim_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct CallArgs {
    pub positional: Vec<Expr>,
    pub keyword: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Attr {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: CallArgs,
    },
    Filter {
        value: Box<Expr>,
        name: String,
        args: CallArgs,
    },
    Neg(Box<Expr>),
    /// Conditional NOT
    Not(Box<Expr>),
    /// Conditional AND
    And(Box<Expr>, Box<Expr>),
    /// Conditional OR
    Or(Box<Expr>, Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `value is [not] name`
    Test {
        value: Box<Expr>,
        name: String,
        negated: bool,
    },
    /// `then if condition else otherwise`
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}
