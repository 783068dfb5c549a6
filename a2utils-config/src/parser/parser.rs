//! Apache configuration parser
//!
//! Builds the node tree from lexed lines, matching section open and close
//! tags with a recursive descent over the line list.

use crate::parser::ast::*;
use crate::parser::lexer::{lex, LexError, Line, LineKind, Location};
use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Parser error types
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Lexer error: {0}")]
    Lex(#[from] LexError),

    #[error("Unexpected </{name}> at line {line}: no section is open")]
    UnexpectedClose {
        name: String,
        line: usize,
        span: Location,
    },

    #[error("Mismatched </{found}> at line {line}: expected </{expected}> (opened at line {opened})")]
    MismatchedSection {
        expected: String,
        found: String,
        opened: usize,
        line: usize,
        span: Location,
    },

    #[error("Section <{name}> opened at line {line} is never closed")]
    UnclosedSection {
        name: String,
        line: usize,
        span: Location,
    },
}

impl ParseError {
    /// Source range the error points at
    pub fn span(&self) -> Location {
        match self {
            ParseError::Lex(e) => e.span(),
            ParseError::UnexpectedClose { span, .. }
            | ParseError::MismatchedSection { span, .. }
            | ParseError::UnclosedSection { span, .. } => *span,
        }
    }

    /// 1-based line of the error
    pub fn line(&self) -> usize {
        match self {
            ParseError::Lex(e) => e.line(),
            ParseError::UnexpectedClose { line, .. }
            | ParseError::MismatchedSection { line, .. }
            | ParseError::UnclosedSection { line, .. } => *line,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ParseError::Lex(LexError::UnterminatedQuote { .. }) => "quote opened here",
            ParseError::Lex(_) => "malformed section tag",
            ParseError::UnexpectedClose { .. } => "nothing to close",
            ParseError::MismatchedSection { .. } => "does not match the open section",
            ParseError::UnclosedSection { .. } => "opened here",
        }
    }

    /// Render the error with the offending source line
    pub fn report(&self, file: &str, source: &str) -> String {
        let span = self.span();
        let start = char_offset(source, span.start);
        let end = char_offset(source, span.end).max(start + 1);
        let id = file.to_string();

        let mut out = Vec::new();
        let written = Report::build(ReportKind::Error, (id.clone(), start..end))
            .with_config(Config::default().with_color(false))
            .with_message(self.to_string())
            .with_label(Label::new((id.clone(), start..end)).with_message(self.label()))
            .finish()
            .write((id, Source::from(source.to_string())), &mut out);

        match written {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => format!("{}: {}", file, self),
        }
    }
}

/// ariadne counts characters, spans are bytes
fn char_offset(source: &str, byte: usize) -> usize {
    let byte = byte.min(source.len());
    source
        .char_indices()
        .take_while(|(i, _)| *i < byte)
        .count()
}

type ParseResult<T> = Result<T, ParseError>;

/// Parser state
pub struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

impl Parser {
    /// Create a new parser from source text
    pub fn new(source: &str) -> ParseResult<Self> {
        let lines = lex(source)?;
        Ok(Self { lines, pos: 0 })
    }

    /// Parse the whole file
    pub fn parse(&mut self) -> ParseResult<Vec<Node>> {
        let (nodes, _) = self.parse_block(None)?;
        Ok(nodes)
    }

    /// Parse nodes until the close tag of `open` (or EOF at top level)
    fn parse_block(&mut self, open: Option<&Line>) -> ParseResult<(Vec<Node>, Option<Line>)> {
        let mut nodes = Vec::new();

        while let Some(line) = self.advance() {
            match line.kind {
                LineKind::Blank => {
                    nodes.push(Node::new(NodeKind::Blank, line.line, line.end_line, line.span));
                }
                LineKind::Comment(text) => {
                    nodes.push(Node::new(NodeKind::Comment(text), line.line, line.end_line, line.span));
                }
                LineKind::Directive { name, args } => {
                    let directive = Directive::new(name).with_args(args);
                    nodes.push(Node::new(
                        NodeKind::Directive(directive),
                        line.line,
                        line.end_line,
                        line.span,
                    ));
                }
                LineKind::SectionOpen { ref name, ref args } => {
                    let directive = Directive::new(name.clone()).with_args(args.clone());
                    let (children, close) = self.parse_block(Some(&line))?;
                    // parse_block only returns without a close line at top level
                    let close = close.unwrap_or_else(|| line.clone());
                    nodes.push(Node::new(
                        NodeKind::Directive(directive.with_block(Block::new(children))),
                        line.line,
                        close.end_line,
                        Location {
                            start: line.span.start,
                            end: close.span.end,
                        },
                    ));
                }
                LineKind::SectionClose { ref name } => {
                    let Some(open) = open else {
                        return Err(ParseError::UnexpectedClose {
                            name: name.clone(),
                            line: line.line,
                            span: line.span,
                        });
                    };
                    let expected = section_name(open);
                    if !expected.eq_ignore_ascii_case(name) {
                        return Err(ParseError::MismatchedSection {
                            expected: expected.to_string(),
                            found: name.clone(),
                            opened: open.line,
                            line: line.line,
                            span: line.span,
                        });
                    }
                    return Ok((nodes, Some(line)));
                }
            }
        }

        if let Some(open) = open {
            return Err(ParseError::UnclosedSection {
                name: section_name(open).to_string(),
                line: open.line,
                span: open.span,
            });
        }

        Ok((nodes, None))
    }

    fn advance(&mut self) -> Option<Line> {
        let line = self.lines.get(self.pos).cloned();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }
}

fn section_name(line: &Line) -> &str {
    match &line.kind {
        LineKind::SectionOpen { name, .. } => name,
        _ => "",
    }
}

/// Parse Apache configuration source into nodes
pub fn parse(source: &str) -> ParseResult<Vec<Node>> {
    Parser::new(source)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(node: &Node) -> &Directive {
        node.as_directive().expect("directive")
    }

    #[test]
    fn test_parse_vhost() {
        let source = r#"
<VirtualHost *:80>
    ServerName example.com
    ServerAlias www.example.com
    DocumentRoot "/var/www/example"
</VirtualHost>
"#;
        let nodes = parse(source).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind, NodeKind::Blank);

        let vhost = directive(&nodes[1]);
        assert!(vhost.is("virtualhost"));
        assert_eq!(vhost.args, vec!["*:80"]);
        assert_eq!((nodes[1].line, nodes[1].end_line), (2, 6));

        let block = vhost.block.as_ref().unwrap();
        let body: Vec<&Directive> = block.directives().collect();
        assert_eq!(body.len(), 3);
        assert_eq!(body[2].args, vec!["/var/www/example"]);
        assert_eq!(block.nodes[0].line, 3);
    }

    #[test]
    fn test_nested_sections_case_insensitive() {
        let source = "<IfModule mod_ssl.c>\n<virtualhost *:443>\nSSLEngine on\n</VirtualHost>\n</ifmodule>\n";
        let nodes = parse(source).unwrap();
        let ifmodule = directive(&nodes[0]);
        let inner = ifmodule.block.as_ref().unwrap();
        let vhost = inner.directives().next().unwrap();
        assert!(vhost.is("VirtualHost"));
        assert_eq!(vhost.block.as_ref().unwrap().directives().count(), 1);
        assert_eq!(nodes[0].end_line, 5);
    }

    #[test]
    fn test_mismatched_section() {
        let err = parse("<VirtualHost *:80>\n<Directory />\n</VirtualHost>\n").unwrap_err();
        match err {
            ParseError::MismatchedSection {
                expected,
                found,
                opened,
                line,
                ..
            } => {
                assert_eq!(expected, "Directory");
                assert_eq!(found, "VirtualHost");
                assert_eq!(opened, 2);
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unclosed_section() {
        let err = parse("Listen 80\n<VirtualHost *:80>\nServerName a\n").unwrap_err();
        assert!(matches!(err, ParseError::UnclosedSection { line: 2, .. }));
    }

    #[test]
    fn test_unexpected_close() {
        let err = parse("</VirtualHost>\n").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedClose { line: 1, .. }));
    }

    #[test]
    fn test_report_shows_file_and_message() {
        let source = "Listen 80\n</Directory>\n";
        let err = parse(source).unwrap_err();
        let report = err.report("sites-enabled/bad.conf", source);
        assert!(report.contains("sites-enabled/bad.conf"));
        assert!(report.contains("no section is open"));
    }
}
