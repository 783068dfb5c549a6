//! AST for Apache configuration
//!
//! A file is a list of nodes. A node is a directive, a comment or a blank
//! line. Sections (`<VirtualHost *:80> ... </VirtualHost>`) are directives
//! that carry a block.

use crate::parser::lexer::Location;
use serde::Serialize;

/// Index of a file inside a [`ConfigTree`](crate::ConfigTree)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(pub usize);

/// A node with its position in the file
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    /// First line, 1-based (0 for generated nodes)
    pub line: usize,
    /// Last line; for sections the line of the closing tag
    pub end_line: usize,
    pub span: Location,
}

impl Node {
    pub fn new(kind: NodeKind, line: usize, end_line: usize, span: Location) -> Self {
        Self {
            kind,
            line,
            end_line,
            span,
        }
    }

    /// Node without a source position, used when generating config
    pub fn generated(kind: NodeKind) -> Self {
        Self::new(kind, 0, 0, Location::default())
    }

    pub fn as_directive(&self) -> Option<&Directive> {
        match &self.kind {
            NodeKind::Directive(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_directive_mut(&mut self) -> Option<&mut Directive> {
        match &mut self.kind {
            NodeKind::Directive(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Directive(Directive),
    /// Comment text after `#`
    Comment(String),
    Blank,
}

/// A directive: name, arguments and an optional nested block
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Directive name as written (compare with [`Directive::is`])
    pub name: String,

    /// Arguments, quotes removed
    pub args: Vec<String>,

    /// Section body for `<Name ...>` directives
    pub block: Option<Block>,

    /// Files pulled in by `Include`/`IncludeOptional`, filled by the loader
    pub includes: Vec<FileId>,
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            block: None,
            includes: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.block = Some(block);
        self
    }

    /// Case-insensitive name comparison
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn is_section(&self) -> bool {
        self.block.is_some()
    }

    pub fn is_include(&self) -> bool {
        self.is("Include") || self.is("IncludeOptional")
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Arguments joined with single spaces
    pub fn args_joined(&self) -> String {
        self.args.join(" ")
    }
}

/// Section body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
}

impl Block {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Directives directly inside this block
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.nodes.iter().filter_map(Node::as_directive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_case_insensitive_name() {
        let d = Directive::new("ServerAlias").with_args(["www.example.com", "example.org"]);
        assert!(d.is("serveralias"));
        assert!(!d.is_section());
        assert_eq!(d.arg(1), Some("example.org"));
        assert_eq!(d.args_joined(), "www.example.com example.org");
    }

    #[test]
    fn test_block_directives_skip_comments() {
        let block = Block::new(vec![
            Node::generated(NodeKind::Comment(" note".to_string())),
            Node::generated(NodeKind::Directive(Directive::new("ServerName").with_args(["a"]))),
            Node::generated(NodeKind::Blank),
        ]);
        let names: Vec<&str> = block.directives().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ServerName"]);
    }

    #[test]
    fn test_include_detection() {
        assert!(Directive::new("includeoptional").is_include());
        assert!(Directive::new("Include").is_include());
        assert!(!Directive::new("IncludeFoo").is_include());
    }
}
