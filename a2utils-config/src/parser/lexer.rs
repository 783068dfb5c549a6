//! Lexer for Apache configuration files
//!
//! Apache syntax is line oriented:
//! - One directive per logical line, `\` at end of line continues it
//! - `#` starts a comment only as the first non-blank character
//! - `<Name args>` opens a section, `</Name>` closes it
//! - Arguments are bare words, "double" or 'single' quoted strings
//!
//! Lines are classified here; the arguments of each line go through a
//! `logos` tokenizer.

use logos::{Logos, Span};
use std::fmt;

/// Byte range in the source, used for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub start: usize,
    pub end: usize,
}

impl From<Span> for Location {
    fn from(span: Span) -> Self {
        Self {
            start: span.start,
            end: span.end,
        }
    }
}

/// A token with its location in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Location,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: impl Into<Location>) -> Self {
        Self {
            value,
            span: span.into(),
        }
    }
}

/// Argument tokens inside one logical line
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f\r]+")]
pub enum Token {
    /// Double quoted string: "..."
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1], '"')
    })]
    DoubleQuoted(String),

    /// Single quoted string: '...'
    #[regex(r"'([^'\\]|\\.)*'", |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1], '\'')
    })]
    SingleQuoted(String),

    /// Bare word. Quotes only open a string at the start of a word,
    /// so `expr=%{X}"y"` stays one word like in Apache.
    #[regex(r#"[^ \t\f\r\n"'][^ \t\f\r\n]*"#, |lex| lex.slice().to_string())]
    Word(String),
}

impl Token {
    /// The argument value with quotes removed
    pub fn into_value(self) -> String {
        match self {
            Token::DoubleQuoted(s) | Token::SingleQuoted(s) | Token::Word(s) => s,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::DoubleQuoted(s) => write!(f, "\"{}\"", s),
            Token::SingleQuoted(s) => write!(f, "'{}'", s),
            Token::Word(s) => write!(f, "{}", s),
        }
    }
}

/// Unescape a quoted argument. Only the quote char and backslash are
/// escapes; other backslashes are kept (regexes rely on them).
fn unescape_string(s: &str, quote: char) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if next == quote || next == '\\' => {
                    result.push(next);
                    chars.next();
                }
                _ => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Lexer error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("Unterminated quoted string at line {line}")]
    UnterminatedQuote { line: usize, position: usize },

    #[error("Section tag is not closed with '>' at line {line}")]
    UnclosedTag { line: usize, span: Location },

    #[error("Empty section name at line {line}")]
    EmptySection { line: usize, span: Location },
}

impl LexError {
    /// Source range the error points at
    pub fn span(&self) -> Location {
        match self {
            LexError::UnterminatedQuote { position, .. } => Location {
                start: *position,
                end: position + 1,
            },
            LexError::UnclosedTag { span, .. } | LexError::EmptySection { span, .. } => *span,
        }
    }

    /// 1-based line of the error
    pub fn line(&self) -> usize {
        match self {
            LexError::UnterminatedQuote { line, .. }
            | LexError::UnclosedTag { line, .. }
            | LexError::EmptySection { line, .. } => *line,
        }
    }
}

/// Tokenize the arguments of a single logical line.
///
/// `base` is the byte offset of `text` in the file, `line` its line number.
pub fn tokenize(text: &str, base: usize, line: usize) -> Result<Vec<Spanned<Token>>, LexError> {
    let mut tokens = Vec::new();

    for (result, span) in Token::lexer(text).spanned() {
        match result {
            Ok(token) => tokens.push(Spanned::new(
                token,
                Location {
                    start: base + span.start,
                    end: base + span.end,
                },
            )),
            // Bare words match everything else, so only a dangling quote fails
            Err(()) => {
                return Err(LexError::UnterminatedQuote {
                    line,
                    position: base + span.start,
                });
            }
        }
    }

    Ok(tokens)
}

/// Classified logical line
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Blank,
    Comment(String),
    Directive { name: String, args: Vec<String> },
    SectionOpen { name: String, args: Vec<String> },
    SectionClose { name: String },
}

/// A logical line (continuations joined) with its position
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub kind: LineKind,
    /// First physical line, 1-based
    pub line: usize,
    /// Last physical line, 1-based
    pub end_line: usize,
    /// Byte range of the physical lines, without the final newline
    pub span: Location,
}

/// Split a source file into classified logical lines
pub fn lex(source: &str) -> Result<Vec<Line>, LexError> {
    let mut lines = Vec::new();
    let mut offset = 0;
    let mut line_no = 0;

    let mut pending = String::new();
    let mut pending_start = 0;
    let mut pending_line = 0;

    for physical in source.split_inclusive('\n') {
        line_no += 1;
        let start = offset;
        offset += physical.len();

        let content = physical.trim_end_matches(['\n', '\r']);
        if pending.is_empty() {
            pending_start = start;
            pending_line = line_no;
        }

        if let Some(joined) = content.strip_suffix('\\') {
            pending.push_str(joined);
            continue;
        }
        pending.push_str(content);

        let span = Location {
            start: pending_start,
            end: start + content.len(),
        };
        let kind = classify(&pending, pending_start, pending_line, span)?;
        lines.push(Line {
            kind,
            line: pending_line,
            end_line: line_no,
            span,
        });
        pending.clear();
    }

    // Trailing continuation at end of file
    if !pending.is_empty() {
        let span = Location {
            start: pending_start,
            end: source.len(),
        };
        let kind = classify(&pending, pending_start, pending_line, span)?;
        lines.push(Line {
            kind,
            line: pending_line,
            end_line: line_no,
            span,
        });
    }

    Ok(lines)
}

fn classify(text: &str, base: usize, line: usize, span: Location) -> Result<LineKind, LexError> {
    let trimmed = text.trim_start();
    let indent = text.len() - trimmed.len();
    let trimmed = trimmed.trim_end();

    if trimmed.is_empty() {
        return Ok(LineKind::Blank);
    }

    if let Some(comment) = trimmed.strip_prefix('#') {
        return Ok(LineKind::Comment(comment.to_string()));
    }

    if let Some(rest) = trimmed.strip_prefix("</") {
        let name = rest
            .strip_suffix('>')
            .ok_or(LexError::UnclosedTag { line, span })?
            .trim();
        if name.is_empty() {
            return Err(LexError::EmptySection { line, span });
        }
        return Ok(LineKind::SectionClose {
            name: name.to_string(),
        });
    }

    if let Some(rest) = trimmed.strip_prefix('<') {
        let inner = rest
            .strip_suffix('>')
            .ok_or(LexError::UnclosedTag { line, span })?;
        let name_len = inner
            .find(|c: char| c.is_whitespace())
            .unwrap_or(inner.len());
        let name = &inner[..name_len];
        if name.is_empty() {
            return Err(LexError::EmptySection { line, span });
        }
        // +1 for '<'
        let args_base = base + indent + 1 + name_len;
        let args = tokenize(&inner[name_len..], args_base, line)?
            .into_iter()
            .map(|t| t.value.into_value())
            .collect();
        return Ok(LineKind::SectionOpen {
            name: name.to_string(),
            args,
        });
    }

    let mut tokens = tokenize(trimmed, base + indent, line)?
        .into_iter()
        .map(|t| t.value.into_value());
    let name = tokens.next().unwrap_or_default();
    Ok(LineKind::Directive {
        name,
        args: tokens.collect(),
    })
}
