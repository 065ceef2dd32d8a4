use std::rc::Rc;

use crate::{
    error::TemplateError,
    template::{
        ast::{AstNode, Block, Branch, Compiled, Expr},
        expr::parse_expression,
        lexer::{Location, Token, tokenize},
    },
};

/// The tag that ended a block body.
struct ClosingTag {
    command: String,
    raw: String,
    trim_left: bool,
    trim_right: bool,
    loc: Location,
}

/// Trim markers and position of a tag that opens a statement.
#[derive(Debug, Clone, Copy)]
struct OpeningTag {
    trim_left: bool,
    trim_right: bool,
    loc: Location,
}

/// Tags that only make sense as the end of a block.
const CLOSING_TAGS: [&str; 5] = ["elif", "else", "endif", "endfor", "endmacro"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn compile(source: &str, loc: Location) -> Compiled {
    Compiled {
        source: source.to_string(),
        loc,
        expr: parse_expression(source),
    }
}

fn invalid(statement: &str, loc: Location) -> AstNode {
    AstNode::Invalid {
        error: TemplateError::InvalidStatement {
            line: loc.line,
            column: loc.column,
            statement: statement.to_string(),
        },
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Text after the leading command word of a tag.
fn tag_argument<'a>(raw: &'a str, command: &str) -> &'a str {
    raw.strip_prefix(command).unwrap_or(raw).trim()
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    /// Parses nodes until one of `closers` or the end of the token stream.
    /// An unterminated block simply runs to the end.
    fn parse_block(&mut self, closers: &[&str]) -> (Block, Option<ClosingTag>) {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            match token {
                Token::Text { value, .. } => nodes.push(AstNode::Constant { data: value }),
                Token::Var {
                    expr,
                    trim_left,
                    trim_right,
                    loc,
                } => nodes.push(AstNode::Variable {
                    expr: compile(&expr, loc),
                    trim_left,
                    trim_right,
                }),
                Token::Tag {
                    command,
                    raw,
                    trim_left,
                    trim_right,
                    loc,
                } => {
                    if closers.contains(&command.as_str()) {
                        let closer = ClosingTag {
                            command,
                            raw,
                            trim_left,
                            trim_right,
                            loc,
                        };
                        let block = Block {
                            nodes,
                            trim_start: false,
                            trim_end: closer.trim_left,
                        };
                        return (block, Some(closer));
                    }
                    let tag = OpeningTag {
                        trim_left,
                        trim_right,
                        loc,
                    };
                    let node = match command.as_str() {
                        "if" => self.parse_if(&raw, tag),
                        "for" => self.parse_for(&raw, tag),
                        "set" => parse_set(&raw, tag),
                        "macro" => self.parse_macro(&raw, tag),
                        closing if CLOSING_TAGS.contains(&closing) => AstNode::Invalid {
                            error: TemplateError::UnexpectedTag {
                                line: loc.line,
                                column: loc.column,
                                tag: command,
                            },
                        },
                        _ => AstNode::Invalid {
                            error: TemplateError::UnknownTag {
                                line: loc.line,
                                column: loc.column,
                                tag: command,
                            },
                        },
                    };
                    nodes.push(node);
                }
            }
        }

        (
            Block {
                nodes,
                trim_start: false,
                trim_end: false,
            },
            None,
        )
    }

    /// Parses a block body opened by a tag with the given right-trim marker.
    /// Returns the body and the right-trim marker of the tag that closed it.
    fn parse_body(&mut self, trim_start: bool, closers: &[&str]) -> (Block, Option<ClosingTag>) {
        let (mut body, closer) = self.parse_block(closers);
        body.trim_start = trim_start;
        (body, closer)
    }

    fn parse_if(&mut self, raw: &str, tag: OpeningTag) -> AstNode {
        let mut branches = Vec::new();
        let mut condition = compile(tag_argument(raw, "if"), tag.loc);
        let mut trim_start = tag.trim_right;
        let mut else_body = None;
        let mut trim_after = false;

        loop {
            let (body, closer) = self.parse_body(trim_start, &["elif", "else", "endif"]);
            branches.push(Branch { condition, body });
            match closer {
                Some(closer) if closer.command == "elif" => {
                    condition = compile(tag_argument(&closer.raw, "elif"), closer.loc);
                    trim_start = closer.trim_right;
                }
                Some(closer) if closer.command == "else" => {
                    let (body, end) = self.parse_body(closer.trim_right, &["endif"]);
                    else_body = Some(body);
                    trim_after = end.is_some_and(|end| end.trim_right);
                    break;
                }
                Some(closer) => {
                    trim_after = closer.trim_right;
                    break;
                }
                None => break,
            }
        }

        AstNode::If {
            trim_left: tag.trim_left,
            branches,
            else_body,
            trim_after,
        }
    }

    fn parse_for(&mut self, raw: &str, tag: OpeningTag) -> AstNode {
        let (body, closer) = self.parse_body(tag.trim_right, &["endfor"]);
        let loc = tag.loc;

        let Some((variable, iterable)) = tag_argument(raw, "for").split_once(" in ") else {
            return invalid("for loop", loc);
        };
        let (variable, iterable) = (variable.trim(), iterable.trim());
        if !is_identifier(variable) || iterable.is_empty() {
            return invalid("for loop", loc);
        }

        AstNode::For {
            trim_left: tag.trim_left,
            variable: variable.to_string(),
            iterable: compile(iterable, loc),
            body,
            trim_after: closer.is_some_and(|closer| closer.trim_right),
        }
    }

    fn parse_macro(&mut self, raw: &str, tag: OpeningTag) -> AstNode {
        let (body, closer) = self.parse_body(tag.trim_right, &["endmacro"]);
        let loc = tag.loc;

        let signature = tag_argument(raw, "macro");
        let Some((name, rest)) = signature.split_once('(') else {
            return invalid("macro", loc);
        };
        let name = name.trim();
        let Some(params) = rest.trim_end().strip_suffix(')') else {
            return invalid("macro", loc);
        };
        let params: Vec<String> = params
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if !is_identifier(name) || !params.iter().all(|p| is_identifier(p)) {
            return invalid("macro", loc);
        }

        AstNode::Macro {
            trim_left: tag.trim_left,
            name: name.to_string(),
            params,
            body: Rc::new(body),
            trim_after: closer.is_some_and(|closer| closer.trim_right),
        }
    }
}

/// `set target = value`, where the target is a name optionally followed by
/// attribute or index accesses.
fn parse_set(raw: &str, tag: OpeningTag) -> AstNode {
    let loc = tag.loc;
    let Some((target, value)) = tag_argument(raw, "set").split_once('=') else {
        return invalid("set", loc);
    };
    let target = compile(target.trim(), loc);
    let assignable = matches!(
        target.expr,
        Ok(Expr::Name(_) | Expr::Attr { .. } | Expr::Index { .. })
    );
    if !assignable || value.trim().is_empty() {
        return invalid("set", loc);
    }

    AstNode::Set {
        trim_left: tag.trim_left,
        trim_right: tag.trim_right,
        target,
        value: compile(value.trim(), loc),
    }
}

/// Parses template source into the node tree executed by the renderer.
pub(crate) fn parse(source: &str) -> Vec<AstNode> {
    let mut parser = Parser::new(tokenize(source));
    let (block, _) = parser.parse_block(&[]);
    block.nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(data: &str) -> AstNode {
        AstNode::Constant {
            data: data.to_string(),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_only() {
        assert_eq!(parse("plain text"), vec![constant("plain text")]);
        assert!(parse("").is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if_elif_else() {
        let nodes = parse("{% if a %}A{% elif b %}B{% else %}C{% endif %}after");
        assert_eq!(nodes.len(), 2);
        let AstNode::If {
            branches,
            else_body,
            ..
        } = &nodes[0]
        else {
            panic!("expected if, got {:?}", nodes[0]);
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[1].condition.source, "b");
        assert_eq!(branches[1].body.nodes, vec![constant("B")]);
        assert_eq!(else_body.as_ref().map(|b| b.nodes.clone()), Some(vec![constant("C")]));
        assert_eq!(nodes[1], constant("after"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_blocks() {
        let nodes = parse("{% for x in xs %}{% if x %}{{ x }}{% endif %}{% endfor %}");
        let AstNode::For { variable, body, .. } = &nodes[0] else {
            panic!("expected for");
        };
        assert_eq!(variable, "x");
        assert!(matches!(body.nodes[0], AstNode::If { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_closing_trim_marks_body() {
        let nodes = parse("{% for x in xs %} {{ x }} {%- endfor %}");
        let AstNode::For { body, .. } = &nodes[0] else {
            panic!("expected for");
        };
        assert!(body.trim_end);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_right_trim_markers_recorded() {
        let nodes = parse("{% if a -%} x {% else -%} y {% endif -%} z");
        let AstNode::If {
            branches,
            else_body,
            trim_after,
            ..
        } = &nodes[0]
        else {
            panic!("expected if");
        };
        assert!(branches[0].body.trim_start);
        assert!(else_body.as_ref().is_some_and(|body| body.trim_start));
        assert!(*trim_after);
        assert_eq!(nodes[1], constant(" z"));

        let nodes = parse("{% for x in xs %}{{ x -}}{% endfor %}");
        let AstNode::For { body, trim_after, .. } = &nodes[0] else {
            panic!("expected for");
        };
        assert!(!body.trim_start);
        assert!(!*trim_after);
        assert!(matches!(body.nodes[0], AstNode::Variable { trim_right: true, .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unterminated_block_runs_to_end() {
        let nodes = parse("{% if a %}never closed");
        let AstNode::If { branches, .. } = &nodes[0] else {
            panic!("expected if");
        };
        assert_eq!(branches[0].body.nodes, vec![constant("never closed")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_stray_and_unknown_tags() {
        let nodes = parse("{% endif %}{% include 'x' %}");
        assert!(matches!(
            &nodes[0],
            AstNode::Invalid {
                error: TemplateError::UnexpectedTag { tag, .. }
            } if tag == "endif"
        ));
        assert!(matches!(
            &nodes[1],
            AstNode::Invalid {
                error: TemplateError::UnknownTag { tag, .. }
            } if tag == "include"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_invalid_for_skips_body() {
        let nodes = parse("{% for in %}body{% endfor %}tail");
        assert_eq!(nodes.len(), 2);
        assert!(matches!(
            &nodes[0],
            AstNode::Invalid {
                error: TemplateError::InvalidStatement { statement, .. }
            } if statement == "for loop"
        ));
        assert_eq!(nodes[1], constant("tail"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_set_targets() {
        let nodes = parse("{% set ns.total = a == b %}");
        let AstNode::Set { target, value, .. } = &nodes[0] else {
            panic!("expected set");
        };
        assert_eq!(target.source, "ns.total");
        assert_eq!(value.source, "a == b");
        assert!(matches!(parse("{% set 1 = 2 %}")[0], AstNode::Invalid { .. }));
        assert!(matches!(parse("{% set x %}")[0], AstNode::Invalid { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_macro_signature() {
        let nodes = parse("{% macro greet(name, greeting) %}hi{% endmacro %}");
        let AstNode::Macro { name, params, .. } = &nodes[0] else {
            panic!("expected macro");
        };
        assert_eq!(name, "greet");
        assert_eq!(params, &vec!["name".to_string(), "greeting".to_string()]);
        assert!(matches!(
            parse("{% macro broken %}x{% endmacro %}")[0],
            AstNode::Invalid { .. }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_expression_errors_are_deferred() {
        let nodes = parse("{{ 1 + }}");
        let AstNode::Variable { expr, .. } = &nodes[0] else {
            panic!("expected variable");
        };
        assert!(expr.expr.is_err());
    }
}
