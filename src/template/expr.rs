use crate::{
    error::{EvalError, EvalResult},
    template::ast::{BinOp, CallArgs, CmpOp, Expr},
    value::Value,
};

/// Punctuation recognised by the expression lexer, two-character operators first.
const PUNCTUATION: [&str; 21] = [
    "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "(", ")", "[", "]", "{", "}", ",", ".",
    ":", "|", "=",
];

/// Words with a grammatical meaning; they can never name a variable.
const KEYWORDS: [&str; 6] = ["and", "or", "not", "is", "if", "else"];

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    tok: Tok,
    /// Byte offset into the expression source.
    offset: usize,
}

fn syntax_error<M: Into<String>>(position: usize, message: M) -> EvalError {
    EvalError::Syntax {
        position,
        message: message.into(),
    }
}

fn lex(source: &str) -> EvalResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' || c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, next)) = chars.next() {
                match next {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, 'r')) => value.push('\r'),
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    },
                    q if q == c => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(syntax_error(offset, "Unterminated string literal"));
            }
            tokens.push(Spanned {
                tok: Tok::Str(value),
                offset,
            });
            continue;
        }

        if c.is_ascii_digit() {
            let rest = &source[offset..];
            let len = number_length(rest);
            let text = &rest[..len];
            let number = text
                .parse::<f64>()
                .map_err(|_| syntax_error(offset, format!("Invalid number \"{}\"", text)))?;
            tokens.push(Spanned {
                tok: Tok::Number(number),
                offset,
            });
            while chars.peek().is_some_and(|&(i, _)| i < offset + len) {
                chars.next();
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, next)) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    ident.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Spanned {
                tok: Tok::Ident(ident),
                offset,
            });
            continue;
        }

        let rest = &source[offset..];
        let Some(&punct) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) else {
            return Err(syntax_error(offset, format!("Unexpected character '{}'", c)));
        };
        tokens.push(Spanned {
            tok: Tok::Punct(punct),
            offset,
        });
        for _ in 0..punct.len() {
            chars.next();
        }
    }

    Ok(tokens)
}

/// Length in bytes of the numeric literal at the start of `text`.
/// A `.` only continues the number when a digit follows, so `items.0.name` works.
fn number_length(text: &str) -> usize {
    let bytes = text.as_bytes();
    let digits = |from: usize| {
        bytes
            .iter()
            .skip(from)
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut len = digits(0);
    if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
        len += 1 + digits(len + 1);
    }
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(len + 1), Some(b'+' | b'-')));
        let exponent = digits(len + 1 + sign);
        if exponent > 0 {
            len += 1 + sign + exponent;
        }
    }
    len
}

/// How deep groups, prefix operators and operator chains may nest.
const MAX_NESTING: usize = 128;

struct ExprParser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Offset reported for errors at the end of input.
    end: usize,
    /// Nesting of the node being parsed, bounded by `MAX_NESTING`.
    depth: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(name)) if name == keyword)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct)
    }

    fn consume_punct(&mut self, punct: &str) -> bool {
        if self.peek_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> EvalResult<()> {
        if self.consume_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", punct)))
        }
    }

    fn unexpected(&self, expected: &str) -> EvalError {
        let found = match self.peek() {
            Some(Tok::Number(n)) => crate::value::format_number(*n),
            Some(Tok::Str(s)) => format!("'{}'", s),
            Some(Tok::Ident(name)) => name.clone(),
            Some(Tok::Punct(p)) => (*p).to_string(),
            None => "end of expression".to_string(),
        };
        syntax_error(
            self.offset(),
            format!("Expected {}, found {}", expected, found),
        )
    }

    /// Enters one more level of nesting.
    fn nest(&mut self) -> EvalResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(syntax_error(self.offset(), "Expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect_ident(&mut self, what: &str) -> EvalResult<String> {
        match self.peek() {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn parse_ternary(&mut self) -> EvalResult<Expr> {
        let depth = self.depth;
        self.nest()?;
        let result = self.parse_conditional();
        self.depth = depth;
        result
    }

    /// `value if condition [else otherwise]`
    fn parse_conditional(&mut self) -> EvalResult<Expr> {
        let value = self.parse_test()?;
        if !self.consume_keyword("if") {
            return Ok(value);
        }
        let condition = self.parse_test()?;
        let otherwise = if self.consume_keyword("else") {
            Some(Box::new(self.parse_ternary()?))
        } else {
            None
        };
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then: Box::new(value),
            otherwise,
        })
    }

    /// `value is [not] name`
    fn parse_test(&mut self) -> EvalResult<Expr> {
        let mut value = self.parse_not()?;
        while self.consume_keyword("is") {
            self.nest()?;
            let negated = self.consume_keyword("not");
            let name = self.expect_ident("a test name")?;
            value = Expr::Test {
                value: Box::new(value),
                name,
                negated,
            };
        }
        Ok(value)
    }

    /// A leading `not` applies to the whole `or` chain after it.
    fn parse_not(&mut self) -> EvalResult<Expr> {
        if self.consume_keyword("not") {
            self.nest()?;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_and()?;
        while self.consume_keyword("or") {
            self.nest()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_and_operand()?;
        while self.consume_keyword("and") {
            self.nest()?;
            let right = self.parse_and_operand()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_operand(&mut self) -> EvalResult<Expr> {
        if self.consume_keyword("not") {
            self.nest()?;
            return Ok(Expr::Not(Box::new(self.parse_and_operand()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> EvalResult<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Tok::Punct("==")) => CmpOp::Eq,
            Some(Tok::Punct("!=")) => CmpOp::Ne,
            Some(Tok::Punct("<=")) => CmpOp::Le,
            Some(Tok::Punct(">=")) => CmpOp::Ge,
            Some(Tok::Punct("<")) => CmpOp::Lt,
            Some(Tok::Punct(">")) => CmpOp::Gt,
            _ => return Ok(left),
        };
        self.pos += 1;
        self.nest()?;
        let right = self.parse_compare()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Punct("+")) => BinOp::Add,
                Some(Tok::Punct("-")) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            self.nest()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Punct("*")) => BinOp::Mul,
                Some(Tok::Punct("/")) => BinOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            self.nest()?;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> EvalResult<Expr> {
        if self.consume_punct("-") {
            self.nest()?;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_filtered()
    }

    fn parse_filtered(&mut self) -> EvalResult<Expr> {
        let mut value = self.parse_postfix()?;
        while self.consume_punct("|") {
            self.nest()?;
            let name = self.expect_ident("a filter name")?;
            let args = if self.consume_punct("(") {
                self.parse_call_args()?
            } else {
                CallArgs::default()
            };
            value = Expr::Filter {
                value: Box::new(value),
                name,
                args,
            };
        }
        Ok(value)
    }

    fn parse_postfix(&mut self) -> EvalResult<Expr> {
        let mut value = self.parse_primary()?;
        loop {
            if self.peek_punct(".") || self.peek_punct("[") || self.peek_punct("(") {
                self.nest()?;
            }
            if self.consume_punct(".") {
                let name = match self.peek() {
                    Some(Tok::Ident(name)) => name.clone(),
                    Some(Tok::Number(n)) => crate::value::format_number(*n),
                    _ => return Err(self.unexpected("an attribute name")),
                };
                self.pos += 1;
                value = Expr::Attr {
                    object: Box::new(value),
                    name,
                };
            } else if self.consume_punct("[") {
                let index = self.parse_ternary()?;
                self.expect_punct("]")?;
                value = Expr::Index {
                    object: Box::new(value),
                    index: Box::new(index),
                };
            } else if self.consume_punct("(") {
                let args = self.parse_call_args()?;
                value = Expr::Call {
                    callee: Box::new(value),
                    args,
                };
            } else {
                return Ok(value);
            }
        }
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn parse_call_args(&mut self) -> EvalResult<CallArgs> {
        let mut args = CallArgs::default();
        while !self.consume_punct(")") {
            let is_keyword = matches!(self.peek(), Some(Tok::Ident(_)))
                && matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.tok),
                    Some(Tok::Punct("="))
                );
            if is_keyword {
                let name = self.expect_ident("an argument name")?;
                self.pos += 1;
                let value = self.parse_ternary()?;
                args.keyword.push((name, value));
            } else {
                args.positional.push(self.parse_ternary()?);
            }
            if !self.consume_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        let offset = self.offset();
        match self.advance() {
            Some(Tok::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" | "null" => Ok(Expr::Literal(Value::None)),
                keyword if KEYWORDS.contains(&keyword) => Err(syntax_error(
                    offset,
                    format!("Unexpected keyword \"{}\"", keyword),
                )),
                _ => Ok(Expr::Name(name)),
            },
            Some(Tok::Punct("(")) => {
                let inner = self.parse_ternary()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Tok::Punct("[")) => {
                let mut items = Vec::new();
                while !self.consume_punct("]") {
                    items.push(self.parse_ternary()?);
                    if !self.consume_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Tok::Punct("{")) => {
                let mut entries = Vec::new();
                while !self.consume_punct("}") {
                    let key = self.parse_ternary()?;
                    self.expect_punct(":")?;
                    let value = self.parse_ternary()?;
                    entries.push((key, value));
                    if !self.consume_punct(",") {
                        self.expect_punct("}")?;
                        break;
                    }
                }
                Ok(Expr::Map(entries))
            }
            Some(Tok::Punct(p)) => Err(syntax_error(offset, format!("Unexpected '{}'", p))),
            None => Err(syntax_error(offset, "Unexpected end of expression")),
        }
    }
}

/// Parses a template expression such as `user.name | upper if user else 'guest'`.
pub(crate) fn parse_expression(source: &str) -> EvalResult<Expr> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(syntax_error(0, "Expected an expression"));
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        end: source.len(),
        depth: 0,
    };
    let expr = parser.parse_ternary()?;
    if parser.peek().is_some() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Number(n)))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_arithmetic_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Add,
                left: num(1.0),
                right: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    left: num(2.0),
                    right: num(3.0),
                }),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_subtraction_is_left_associative() {
        let expr = parse_expression("10 - 4 - 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Sub,
                left: Box::new(Expr::Binary {
                    op: BinOp::Sub,
                    left: num(10.0),
                    right: num(4.0),
                }),
                right: num(3.0),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_leading_not_captures_or_chain() {
        let expr = parse_expression("not a or b").unwrap();
        assert_eq!(
            expr,
            Expr::Not(Box::new(Expr::Or(name("a"), name("b"))))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_not_inside_and_operand() {
        let expr = parse_expression("a and not b").unwrap();
        assert_eq!(expr, Expr::And(name("a"), Box::new(Expr::Not(name("b")))));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ternary_without_else() {
        let expr = parse_expression("'yes' if flag").unwrap();
        assert!(matches!(expr, Expr::Ternary { otherwise: None, .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_ternary_in_else() {
        let expr = parse_expression("1 if a else 2 if b else 3").unwrap();
        let Expr::Ternary { otherwise, .. } = expr else {
            panic!("expected a ternary");
        };
        assert!(matches!(
            otherwise.as_deref(),
            Some(Expr::Ternary {
                otherwise: Some(_),
                ..
            })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filter_chain_with_args() {
        let expr = parse_expression("name | default('x') | upper").unwrap();
        let Expr::Filter { value, name, args } = expr else {
            panic!("expected a filter");
        };
        assert_eq!(name, "upper");
        assert!(args.positional.is_empty());
        assert!(matches!(*value, Expr::Filter { ref name, ref args, .. }
            if name == "default" && args.positional.len() == 1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_keyword_arguments() {
        let expr = parse_expression("timedelta(hours=1, minutes=30)").unwrap();
        let Expr::Call { args, .. } = expr else {
            panic!("expected a call");
        };
        assert_eq!(args.keyword.len(), 2);
        assert_eq!(args.keyword[0].0, "hours");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_postfix_chain() {
        let expr = parse_expression("items.0.name").unwrap();
        assert_eq!(
            expr,
            Expr::Attr {
                object: Box::new(Expr::Attr {
                    object: name("items"),
                    name: "0".to_string(),
                }),
                name: "name".to_string(),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_is_test() {
        let expr = parse_expression("x is not defined").unwrap();
        assert!(matches!(expr, Expr::Test { negated: true, ref name, .. } if name == "defined"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literals() {
        assert_eq!(
            parse_expression("'it\\'s'").unwrap(),
            Expr::Literal(Value::from("it's"))
        );
        assert_eq!(parse_expression("None").unwrap(), Expr::Literal(Value::None));
        assert_eq!(parse_expression("1.5e2").unwrap(), *num(150.0));
        let map = parse_expression("{'a': 1, 'b': [1, 2]}").unwrap();
        assert!(matches!(map, Expr::Map(ref entries) if entries.len() == 2));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse_expression(&shallow), Ok(Expr::Literal(Value::Number(1.0))));

        let deep = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(matches!(
            parse_expression(&deep),
            Err(EvalError::Syntax { ref message, .. }) if message == "Expression nested too deeply"
        ));
        let negations = format!("{}x", "not ".repeat(1000));
        assert!(parse_expression(&negations).is_err());
        let sum = vec!["1"; 1000].join(" + ");
        assert!(parse_expression(&sum).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_syntax_errors() {
        assert!(matches!(
            parse_expression("1 +"),
            Err(EvalError::Syntax { position: 3, .. })
        ));
        assert!(parse_expression("").is_err());
        assert!(parse_expression("'open").is_err());
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("a $ b").is_err());
        assert!(parse_expression("and").is_err());
    }
}
