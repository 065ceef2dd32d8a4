/// A 1-based position in the template source.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// One lexical unit of template source.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// Literal output text.
    Text { value: String, loc: Location },
    /// `{{ expr }}`
    Var {
        expr: String,
        trim_left: bool,
        trim_right: bool,
        loc: Location,
    },
    /// `{% command ... %}`
    Tag {
        command: String,
        raw: String,
        trim_left: bool,
        trim_right: bool,
        loc: Location,
    },
}

impl Token {
    pub const fn loc(&self) -> Location {
        match self {
            Self::Text { loc, .. } | Self::Var { loc, .. } | Self::Tag { loc, .. } => *loc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimited {
    Var,
    Tag,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    tokens: Vec<Token>,
    text: String,
    text_loc: Location,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            tokens: Vec::new(),
            text: String::new(),
            text_loc: Location::default(),
        }
    }

    #[inline]
    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.input[self.line_start_pos..self.pos].chars().count() + 1,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    /// Advances to byte offset `end`, keeping line tracking correct across
    /// newlines in the consumed range.
    fn advance_to(&mut self, end: usize) {
        for (offset, c) in self.input[self.pos..end].char_indices() {
            if c == '\n' {
                self.line += 1;
                self.line_start_pos = self.pos + offset + 1;
            }
        }
        self.pos = end;
    }

    /// Finds the byte offset of `close` at or after `from`, ignoring closers
    /// that sit inside a quoted string. Falls back to a plain search when the
    /// quotes never balance.
    fn find_close(&self, from: usize, close: &str, skip_strings: bool) -> Option<usize> {
        if skip_strings {
            let bytes = self.input.as_bytes();
            let mut quote: Option<u8> = None;
            let mut i = from;
            while i < bytes.len() {
                let b = bytes[i];
                match quote {
                    Some(q) => {
                        if b == b'\\' {
                            i += 1;
                        } else if b == q {
                            quote = None;
                        }
                    }
                    None => {
                        if b == b'\'' || b == b'"' {
                            quote = Some(b);
                        } else if self.input[i..].starts_with(close) {
                            return Some(i);
                        }
                    }
                }
                i += 1;
            }
        }
        self.input[from..].find(close).map(|offset| from + offset)
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let value = std::mem::take(&mut self.text);
        self.tokens.push(Token::Text {
            value,
            loc: self.text_loc,
        });
    }

    fn push_text(&mut self, end: usize) {
        if self.text.is_empty() {
            self.text_loc = self.location();
        }
        self.text.push_str(&self.input[self.pos..end]);
        self.advance_to(end);
    }

    /// Consumes plain text up to the next `{`. A `{` that did not open a
    /// valid construct is consumed as text.
    fn lex_text(&mut self) {
        let start = if self.peek("{") { self.pos + 1 } else { self.pos };
        let end = self.input[start..]
            .find('{')
            .map_or(self.input.len(), |offset| start + offset);
        self.push_text(end);
    }

    fn skip_comment(&mut self) -> bool {
        match self.find_close(self.pos + 2, "#}", false) {
            Some(close) => {
                self.advance_to(close + 2);
                true
            }
            None => false,
        }
    }

    fn lex_delimited(&mut self, kind: Delimited) -> bool {
        let close_delim = match kind {
            Delimited::Var => "}}",
            Delimited::Tag => "%}",
        };
        let inner_start = self.pos + 2;
        let Some(close) = self.find_close(inner_start, close_delim, true) else {
            return false;
        };

        let loc = self.location();
        let mut inner = &self.input[inner_start..close];
        let trim_left = inner.starts_with('-');
        if trim_left {
            inner = &inner[1..];
        }
        let trim_right = inner.ends_with('-');
        if trim_right {
            inner = &inner[..inner.len() - 1];
        }
        let content = inner.trim().to_string();

        self.flush_text();
        let token = match kind {
            Delimited::Var => Token::Var {
                expr: content,
                trim_left,
                trim_right,
                loc,
            },
            Delimited::Tag => {
                let command = content
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                Token::Tag {
                    command,
                    raw: content,
                    trim_left,
                    trim_right,
                    loc,
                }
            }
        };
        self.tokens.push(token);
        self.advance_to(close + close_delim.len());
        true
    }

    fn finish(mut self) -> Vec<Token> {
        self.flush_text();
        self.tokens
    }
}

/// Splits template source into text, variable, and tag tokens.
///
/// Comments are dropped and unterminated delimiters are kept as plain text.
/// Trim markers are only recorded; the renderer applies them when the tag runs.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(input);
    while !lexer.eof() {
        let consumed = if lexer.peek("{#") {
            lexer.skip_comment()
        } else if lexer.peek("{{") {
            lexer.lex_delimited(Delimited::Var)
        } else if lexer.peek("{%") {
            lexer.lex_delimited(Delimited::Tag)
        } else {
            false
        };
        if !consumed {
            lexer.lex_text();
        }
    }
    lexer.finish()
}
