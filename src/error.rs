pub type TemplateResult<T> = std::result::Result<T, TemplateError>;
pub type EvalResult<T> = std::result::Result<T, EvalError>;
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Why a single template expression could not be evaluated.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvalError {
    /// The expression text is not valid expression syntax.
    Syntax {
        position: usize,
        message: String,
    },
    UndefinedAccess {
        property: String,
        base: String,
    },
    FilterNotFound {
        name: String,
    },
    UnknownTest {
        name: String,
    },
    UnknownMethod {
        method: String,
        type_name: String,
    },
    NotCallable {
        type_name: String,
    },
    UnsupportedOperand {
        operator: String,
        left: String,
        right: String,
    },
    DivisionByZero,
    InvalidArgument {
        function: String,
        message: String,
    },
    RecursionLimit {
        name: String,
        limit: usize,
    },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax { position, message } => {
                write!(f, "Syntax error at offset {}: {}", position, message)
            }
            Self::UndefinedAccess { property, base } => {
                write!(f, "Cannot read property \"{}\" of {}", property, base)
            }
            Self::FilterNotFound { name } => write!(f, "Filter \"{}\" not found", name),
            Self::UnknownTest { name } => write!(f, "Unknown test \"{}\"", name),
            Self::UnknownMethod { method, type_name } => {
                write!(f, "Unknown method \"{}\" on {}", method, type_name)
            }
            Self::NotCallable { type_name } => write!(f, "Value of type {} is not callable", type_name),
            Self::UnsupportedOperand {
                operator,
                left,
                right,
            } => write!(
                f,
                "Unsupported operand types for {}: {} and {}",
                operator, left, right
            ),
            Self::DivisionByZero => write!(f, "Division by zero"),
            Self::InvalidArgument { function, message } => {
                write!(f, "Invalid argument to {}: {}", function, message)
            }
            Self::RecursionLimit { name, limit } => write!(
                f,
                "Macro \"{}\" exceeded the recursion limit of {}",
                name, limit
            ),
        }
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub(crate) fn invalid_argument<F: Into<String>, M: Into<String>>(function: F, message: M) -> Self {
        Self::InvalidArgument {
            function: function.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(operator: &str, left: &str, right: &str) -> Self {
        Self::UnsupportedOperand {
            operator: operator.to_string(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}

/// Errors produced while rendering a template.
///
/// Everything except [`TemplateError::RecursionLimit`] is reported softly:
/// the message lands in [`crate::RenderOutput::errors`] and rendering carries
/// on with the next token.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateError {
    UnknownTag {
        line: usize,
        column: usize,
        tag: String,
    },
    UnexpectedTag {
        line: usize,
        column: usize,
        tag: String,
    },
    InvalidStatement {
        line: usize,
        column: usize,
        statement: String,
    },
    Evaluation {
        line: usize,
        column: usize,
        expr: String,
        reason: EvalError,
    },
    Assignment {
        line: usize,
        column: usize,
        target: String,
    },
    RecursionLimit {
        name: String,
        limit: usize,
    },
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTag { line, column, tag } => write!(
                f,
                "[Line {}, Col {}] Syntax Error: Unknown tag \"{{% {} %}}\"",
                line, column, tag
            ),
            Self::UnexpectedTag { line, column, tag } => write!(
                f,
                "[Line {}, Col {}] Syntax Error: Unexpected tag \"{{% {} %}}\"",
                line, column, tag
            ),
            Self::InvalidStatement {
                line,
                column,
                statement,
            } => write!(
                f,
                "[Line {}, Col {}] Syntax Error: Invalid {} syntax",
                line, column, statement
            ),
            Self::Evaluation {
                line,
                column,
                expr,
                reason,
            } => write!(
                f,
                "[Line {}, Col {}] Evaluation failed for \"{}\": {}",
                line, column, expr, reason
            ),
            Self::Assignment {
                line,
                column,
                target,
            } => write!(
                f,
                "[Line {}, Col {}] Cannot set property of undefined \"{}\"",
                line, column, target
            ),
            Self::RecursionLimit { name, limit } => write!(
                f,
                "Rendering aborted: macro \"{}\" exceeded the recursion limit of {}",
                name, limit
            ),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Evaluation { reason, .. } => Some(reason),
            Self::UnknownTag { .. }
            | Self::UnexpectedTag { .. }
            | Self::InvalidStatement { .. }
            | Self::Assignment { .. }
            | Self::RecursionLimit { .. } => None,
        }
    }
}

/// Why a grammar chunk could not be turned into an expression.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExpressionErrorReason {
    /// The chunk kind cannot appear where it was found.
    UnexpectedChunk,
    /// Scanning the group made no progress.
    NoProgress,
    /// `|` and `;` were both used directly inside one group.
    MixedSeparators,
    /// A delimited chunk is missing its delimiters or is empty.
    MalformedDelimiters,
    /// Groups and optionals nest deeper than the parser allows.
    TooDeeplyNested,
}

impl std::fmt::Display for ExpressionErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedChunk => write!(f, "unexpected chunk"),
            Self::NoProgress => write!(f, "unable to make progress"),
            Self::MixedSeparators => {
                write!(f, "alternatives '|' and permutations ';' cannot be mixed in one group")
            }
            Self::MalformedDelimiters => write!(f, "malformed delimiters"),
            Self::TooDeeplyNested => write!(f, "groups nested too deeply"),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseExpressionError {
    pub chunk: String,
    pub start: usize,
    pub reason: ExpressionErrorReason,
    pub metadata: Option<String>,
}

impl std::fmt::Display for ParseExpressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error in chunk {:?} at index {}", self.chunk, self.start)?;
        if let Some(metadata) = &self.metadata {
            write!(f, " ({})", metadata)?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl std::error::Error for ParseExpressionError {}

/// Errors raised by the sentence template parser. There is no partial result.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseError {
    Unterminated {
        /// Describes the missing closer, e.g. "group ')'".
        expected: String,
        start: usize,
        text: String,
    },
    EmptySentence {
        text: String,
    },
    ExpectedGroup {
        text: String,
    },
    TrailingInput {
        end: usize,
        text: String,
    },
    Expression(ParseExpressionError),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unterminated {
                expected,
                start,
                text,
            } => write!(
                f,
                "Unable to find end of {} from index {} in: {}",
                expected, start, text
            ),
            Self::EmptySentence { text } => write!(f, "Unexpected empty chunk in: {}", text),
            Self::ExpectedGroup { text } => write!(f, "Expected (group) in: {}", text),
            Self::TrailingInput { end, text } => {
                write!(f, "Expected chunk to end at index {} in: {}", end, text)
            }
            Self::Expression(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Expression(error) => Some(error),
            Self::Unterminated { .. }
            | Self::EmptySentence { .. }
            | Self::ExpectedGroup { .. }
            | Self::TrailingInput { .. } => None,
        }
    }
}

impl From<ParseExpressionError> for ParseError {
    fn from(error: ParseExpressionError) -> Self {
        Self::Expression(error)
    }
}
