//! Apache configuration writer
//!
//! ✍️ Two ways out:
//! - [`render`] serializes nodes in a canonical layout (new files, `--dump`)
//! - [`Editor`] changes single lines of an existing file and leaves every
//!   other byte alone

use crate::loader::ConfigTree;
use crate::parser::{parse, Directive, Node, NodeKind, ParseError};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INDENT: &str = "    ";

/// Serialize nodes with 4-space indentation per section level
pub fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    render_into(&mut out, nodes, 0);
    out
}

fn render_into(out: &mut String, nodes: &[Node], depth: usize) {
    let indent = INDENT.repeat(depth);
    for node in nodes {
        match &node.kind {
            NodeKind::Blank => out.push('\n'),
            NodeKind::Comment(text) => {
                let _ = writeln!(out, "{}#{}", indent, text);
            }
            NodeKind::Directive(d) => match &d.block {
                Some(block) => {
                    let _ = writeln!(out, "{}<{}>", indent, directive_line(d));
                    render_into(out, &block.nodes, depth + 1);
                    let _ = writeln!(out, "{}</{}>", indent, d.name);
                }
                None => {
                    let _ = writeln!(out, "{}{}", indent, directive_line(d));
                }
            },
        }
    }
}

/// Serialize a loaded tree with every include expanded in place.
///
/// Include lines become comments followed by the included files.
pub fn render_tree(tree: &ConfigTree) -> String {
    let mut out = String::new();
    render_expanded(&mut out, tree, &tree.root().nodes, 0);
    out
}

fn render_expanded(out: &mut String, tree: &ConfigTree, nodes: &[Node], depth: usize) {
    let indent = INDENT.repeat(depth);
    for node in nodes {
        match &node.kind {
            NodeKind::Directive(d) if d.is_include() => {
                let _ = writeln!(out, "{}# {}", indent, directive_line(d));
                for id in &d.includes {
                    let file = tree.file(*id);
                    let _ = writeln!(out, "{}# file: {}", indent, file.path.display());
                    render_expanded(out, tree, &file.nodes, depth);
                }
            }
            NodeKind::Directive(d) if d.is_section() => {
                let _ = writeln!(out, "{}<{}>", indent, directive_line(d));
                if let Some(block) = &d.block {
                    render_expanded(out, tree, &block.nodes, depth + 1);
                }
                let _ = writeln!(out, "{}</{}>", indent, d.name);
            }
            _ => render_into(out, std::slice::from_ref(node), depth),
        }
    }
}

/// `Name arg1 "arg 2"` without indentation
pub fn directive_line(directive: &Directive) -> String {
    let mut line = directive.name.clone();
    for arg in &directive.args {
        line.push(' ');
        line.push_str(&quote_arg(arg));
    }
    line
}

/// Quote an argument when apache would otherwise split or misread it
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg.starts_with(['"', '\''])
        || arg.chars().any(|c| c.is_whitespace());
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Editor error types
#[derive(Debug, Error)]
pub enum EditError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No <VirtualHost> starts at line {line} of {}", .path.display())]
    NoVhost { path: PathBuf, line: usize },

    #[error("Edit produced invalid configuration: {0}")]
    Invalid(#[from] ParseError),
}

/// Line-based editor for one configuration file
#[derive(Debug, Clone)]
pub struct Editor {
    path: PathBuf,
    /// Physical lines including their line endings
    lines: Vec<String>,
    newline: &'static str,
}

impl Editor {
    /// Read `path` for editing
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EditError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| EditError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_source(path, &source))
    }

    pub fn from_source(path: impl Into<PathBuf>, source: &str) -> Self {
        let newline = if source.contains("\r\n") { "\r\n" } else { "\n" };
        Self {
            path: path.into(),
            lines: source.split_inclusive('\n').map(str::to_string).collect(),
            newline,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current text
    pub fn source(&self) -> String {
        self.lines.concat()
    }

    /// Add `directive` as the last line of the vhost starting at `vhost_line`
    pub fn add_directive(&mut self, vhost_line: usize, directive: &Directive) -> Result<(), EditError> {
        let vhost = self.find_vhost(vhost_line)?;
        let indent = self.body_indent(&vhost);
        let text = format!("{}{}{}", indent, directive_line(directive), self.newline);

        self.ensure_trailing_newline(vhost.end_line - 1);
        self.lines.insert(vhost.end_line - 1, text);
        tracing::debug!("➕ {}:{} {}", self.path.display(), vhost.end_line, directive.name);
        Ok(())
    }

    /// Replace the first top-level directive with the same name, or add it
    pub fn set_directive(&mut self, vhost_line: usize, directive: &Directive) -> Result<(), EditError> {
        let vhost = self.find_vhost(vhost_line)?;
        let existing = top_level(&vhost)
            .find(|n| n.as_directive().is_some_and(|d| d.is(&directive.name) && !d.is_section()))
            .map(|n| (n.line, n.end_line));

        let Some((line, end_line)) = existing else {
            return self.add_directive(vhost_line, directive);
        };

        let indent = leading_whitespace(&self.lines[line - 1]).to_string();
        let ending = line_ending(&self.lines[end_line - 1]).to_string();
        let text = format!("{}{}{}", indent, directive_line(directive), ending);
        self.lines.drain(line - 1..end_line);
        self.lines.insert(line - 1, text);
        tracing::debug!("✏️ {}:{} {}", self.path.display(), line, directive.name);
        Ok(())
    }

    /// Remove every top-level directive named `name`; returns how many
    pub fn remove_directive(&mut self, vhost_line: usize, name: &str) -> Result<usize, EditError> {
        let vhost = self.find_vhost(vhost_line)?;
        let ranges: Vec<(usize, usize)> = top_level(&vhost)
            .filter(|n| n.as_directive().is_some_and(|d| d.is(name) && !d.is_section()))
            .map(|n| (n.line, n.end_line))
            .collect();

        // Bottom-up so earlier line numbers stay valid
        for (line, end_line) in ranges.iter().rev() {
            self.lines.drain(line - 1..*end_line);
        }
        tracing::debug!("➖ {} removed {} x {}", self.path.display(), ranges.len(), name);
        Ok(ranges.len())
    }

    /// Validate and write the file atomically.
    ///
    /// Symlinks are resolved first so that editing through
    /// `sites-enabled` changes the target, not the link.
    pub fn save(&self) -> Result<(), EditError> {
        let source = self.source();
        parse(&source)?;

        let target = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = target.with_file_name(format!(".{}.a2utils.tmp", file_name));

        let io = |source| EditError::Io {
            path: target.clone(),
            source,
        };
        std::fs::write(&tmp, &source).map_err(io)?;
        if let Ok(meta) = std::fs::metadata(&target) {
            std::fs::set_permissions(&tmp, meta.permissions()).map_err(io)?;
        }
        std::fs::rename(&tmp, &target).map_err(io)?;

        tracing::info!("💾 Saved {}", target.display());
        Ok(())
    }

    fn find_vhost(&self, line: usize) -> Result<Node, EditError> {
        let nodes = parse(&self.source())?;
        find_section_at(&nodes, line)
            .filter(|n| n.as_directive().is_some_and(|d| d.is("VirtualHost")))
            .cloned()
            .ok_or_else(|| EditError::NoVhost {
                path: self.path.clone(),
                line,
            })
    }

    /// Indentation for new lines inside `vhost`
    fn body_indent(&self, vhost: &Node) -> String {
        if let Some(first) = top_level(vhost).find(|n| n.as_directive().is_some()) {
            return leading_whitespace(&self.lines[first.line - 1]).to_string();
        }
        format!("{}{}", leading_whitespace(&self.lines[vhost.line - 1]), INDENT)
    }

    /// The line before an insertion point must end with a newline
    fn ensure_trailing_newline(&mut self, index: usize) {
        if index > 0 {
            if let Some(prev) = self.lines.get_mut(index - 1) {
                if !prev.ends_with('\n') {
                    prev.push_str(self.newline);
                }
            }
        }
    }
}

fn top_level(section: &Node) -> impl Iterator<Item = &Node> {
    section
        .as_directive()
        .and_then(|d| d.block.as_ref())
        .map(|b| b.nodes.iter())
        .into_iter()
        .flatten()
}

fn find_section_at(nodes: &[Node], line: usize) -> Option<&Node> {
    for node in nodes {
        let Some(block) = node.as_directive().and_then(|d| d.block.as_ref()) else {
            continue;
        };
        if node.line == line {
            return Some(node);
        }
        if node.line < line && line <= node.end_line {
            return find_section_at(&block.nodes, line);
        }
    }
    None
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}
