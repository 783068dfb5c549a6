//! Configuration tree loader
//!
//! Loads the root config and every file reachable through `Include` and
//! `IncludeOptional`, in the order apache reads them.

use crate::parser::{parse, Directive, FileId, Node, NodeKind, ParseError, VariableResolver};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Loader error types
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {}: {error}", .path.display())]
    Parse {
        path: PathBuf,
        text: String,
        #[source]
        error: ParseError,
    },

    #[error("{}:{line}: Include target {pattern} does not exist", .file.display())]
    MissingInclude {
        pattern: String,
        file: PathBuf,
        line: usize,
    },

    #[error("{}:{line}: Include of {} creates a cycle", .file.display(), .path.display())]
    IncludeCycle {
        path: PathBuf,
        file: PathBuf,
        line: usize,
    },

    #[error("{}:{line}: Bad Include pattern {pattern}: {message}", .file.display())]
    BadPattern {
        pattern: String,
        message: String,
        file: PathBuf,
        line: usize,
    },
}

impl LoadError {
    /// Human readable report; parse errors include the source snippet
    pub fn report(&self) -> String {
        match self {
            LoadError::Parse { path, text, error } => error.report(&path.display().to_string(), text),
            other => other.to_string(),
        }
    }
}

/// One loaded file
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub source: String,
    pub nodes: Vec<Node>,
}

/// A directive visited in effective order
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    pub file: FileId,
    pub node: &'a Node,
    pub directive: &'a Directive,
    /// Section nesting depth relative to the walk start
    pub depth: usize,
}

/// All files of an apache configuration
#[derive(Debug, Clone)]
pub struct ConfigTree {
    files: Vec<ConfigFile>,
    server_root: PathBuf,
    variables: VariableResolver,
}

impl ConfigTree {
    /// Load `root` and everything it includes
    pub fn load(root: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::load_with(root.as_ref(), true)
    }

    /// Load a single file without following includes
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::load_with(path.as_ref(), false)
    }

    fn load_with(root: &Path, follow: bool) -> Result<Self, LoadError> {
        let config_dir = root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // apache falls back to the environment for undefined ${VAR}
        let mut loader = Loader {
            files: Vec::new(),
            stack: Vec::new(),
            server_root: config_dir.clone(),
            config_dir,
            variables: VariableResolver::with_env(),
            follow,
        };
        loader.load_path(root, None)?;

        tracing::debug!("📄 Loaded {} file(s) from {}", loader.files.len(), root.display());
        Ok(Self {
            files: loader.files,
            server_root: loader.server_root,
            variables: loader.variables,
        })
    }

    /// Parse in-memory source as a single file (no includes)
    pub fn from_source(path: impl Into<PathBuf>, source: &str) -> Result<Self, LoadError> {
        let path = path.into();
        let nodes = parse(source).map_err(|error| LoadError::Parse {
            path: path.clone(),
            text: source.to_string(),
            error,
        })?;
        let server_root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self {
            files: vec![ConfigFile {
                path,
                source: source.to_string(),
                nodes,
            }],
            server_root,
            variables: VariableResolver::new(),
        })
    }

    pub fn root(&self) -> &ConfigFile {
        &self.files[0]
    }

    pub fn files(&self) -> &[ConfigFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> &ConfigFile {
        &self.files[id.0]
    }

    /// `ServerRoot` in effect at the end of loading
    pub fn server_root(&self) -> &Path {
        &self.server_root
    }

    /// Variables defined while loading
    pub fn variables(&self) -> &VariableResolver {
        &self.variables
    }

    /// Whether `path` was loaded (compared canonically)
    pub fn contains_file(&self, path: &Path) -> bool {
        let Ok(wanted) = std::fs::canonicalize(path) else {
            return false;
        };
        self.files
            .iter()
            .any(|f| std::fs::canonicalize(&f.path).is_ok_and(|p| p == wanted))
    }

    /// Canonical paths of all loaded files
    pub fn canonical_paths(&self) -> HashSet<PathBuf> {
        self.files
            .iter()
            .filter_map(|f| std::fs::canonicalize(&f.path).ok())
            .collect()
    }

    /// Every directive in effective order, includes expanded in place
    pub fn walk(&self) -> Vec<Entry<'_>> {
        let mut out = Vec::new();
        if !self.files.is_empty() {
            self.walk_nodes(FileId(0), &self.files[0].nodes, 0, &mut out);
        }
        out
    }

    /// Walk a node list (e.g. a section body) in effective order
    pub fn walk_nodes<'a>(&'a self, file: FileId, nodes: &'a [Node], depth: usize, out: &mut Vec<Entry<'a>>) {
        for node in nodes {
            let NodeKind::Directive(directive) = &node.kind else {
                continue;
            };
            out.push(Entry {
                file,
                node,
                directive,
                depth,
            });
            for id in &directive.includes {
                self.walk_nodes(*id, &self.file(*id).nodes, depth, out);
            }
            if let Some(block) = &directive.block {
                self.walk_nodes(file, &block.nodes, depth + 1, out);
            }
        }
    }

    /// Sections named `name` anywhere in the tree (not nested inside each
    /// other), in effective order
    pub fn sections(&self, name: &str) -> Vec<Entry<'_>> {
        let mut out = Vec::new();
        if !self.files.is_empty() {
            self.find_sections(FileId(0), &self.files[0].nodes, name, 0, &mut out);
        }
        out
    }

    fn find_sections<'a>(&'a self, file: FileId, nodes: &'a [Node], name: &str, depth: usize, out: &mut Vec<Entry<'a>>) {
        for node in nodes {
            let NodeKind::Directive(directive) = &node.kind else {
                continue;
            };
            if directive.is(name) && directive.is_section() {
                out.push(Entry {
                    file,
                    node,
                    directive,
                    depth,
                });
                continue;
            }
            for id in &directive.includes {
                self.find_sections(*id, &self.file(*id).nodes, name, depth, out);
            }
            if let Some(block) = &directive.block {
                self.find_sections(file, &block.nodes, name, depth + 1, out);
            }
        }
    }
}

struct Loader {
    files: Vec<ConfigFile>,
    /// Canonical paths of the files currently being loaded
    stack: Vec<PathBuf>,
    server_root: PathBuf,
    /// Directory of the root file; a relative ServerRoot is taken from here
    config_dir: PathBuf,
    variables: VariableResolver,
    follow: bool,
}

/// Where an include was requested, for error messages
struct Origin<'a> {
    file: &'a Path,
    line: usize,
}

impl Loader {
    fn load_path(&mut self, path: &Path, origin: Option<&Origin<'_>>) -> Result<FileId, LoadError> {
        let canonical = std::fs::canonicalize(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if self.stack.contains(&canonical) {
            let (file, line) = origin
                .map(|o| (o.file.to_path_buf(), o.line))
                .unwrap_or_else(|| (path.to_path_buf(), 0));
            return Err(LoadError::IncludeCycle {
                path: path.to_path_buf(),
                file,
                line,
            });
        }

        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut nodes = parse(&source).map_err(|error| LoadError::Parse {
            path: path.to_path_buf(),
            text: source.clone(),
            error,
        })?;

        tracing::trace!("Parsed {}", path.display());

        let id = FileId(self.files.len());
        self.files.push(ConfigFile {
            path: path.to_path_buf(),
            source,
            nodes: Vec::new(),
        });

        self.stack.push(canonical);
        let expanded = self.expand(path, &mut nodes);
        self.stack.pop();
        expanded?;

        self.files[id.0].nodes = nodes;
        Ok(id)
    }

    /// Apply ServerRoot/Define and load includes, recursing into sections
    fn expand(&mut self, path: &Path, nodes: &mut [Node]) -> Result<(), LoadError> {
        for node in nodes.iter_mut() {
            let line = node.line;
            let Some(directive) = node.as_directive_mut() else {
                continue;
            };

            if directive.is("ServerRoot") {
                if let Some(root) = directive.arg(0) {
                    let root = PathBuf::from(self.variables.substitute(root));
                    self.server_root = self.config_dir.join(root);
                }
            } else if directive.is("Define") {
                if let Some(name) = directive.arg(0) {
                    self.variables.define(name, directive.arg(1));
                }
            } else if directive.is("UnDefine") {
                if let Some(name) = directive.arg(0) {
                    self.variables.undefine(name);
                }
            } else if directive.is_include() && self.follow {
                let optional = directive.is("IncludeOptional");
                let origin = Origin { file: path, line };
                for arg in directive.args.clone() {
                    for target in self.resolve_targets(&arg, optional, &origin)? {
                        let id = self.load_path(&target, Some(&origin))?;
                        directive.includes.push(id);
                    }
                }
            }

            if let Some(block) = &mut directive.block {
                self.expand(path, &mut block.nodes)?;
            }
        }
        Ok(())
    }

    /// Files an Include argument refers to, in apache's order
    fn resolve_targets(&self, arg: &str, optional: bool, origin: &Origin<'_>) -> Result<Vec<PathBuf>, LoadError> {
        let substituted = self.variables.substitute(arg);
        let raw = PathBuf::from(&substituted);
        let target = if raw.is_absolute() {
            raw
        } else {
            self.server_root.join(raw)
        };
        let pattern = target.to_string_lossy().into_owned();

        if pattern.contains(['*', '?', '[']) {
            let entries = glob::glob(&pattern).map_err(|e| LoadError::BadPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
                file: origin.file.to_path_buf(),
                line: origin.line,
            })?;

            let mut files = Vec::new();
            for entry in entries.flatten() {
                if entry.is_dir() {
                    files.extend(dir_files(&entry));
                } else {
                    files.push(entry);
                }
            }
            files.sort();

            if files.is_empty() && !optional {
                return Err(LoadError::MissingInclude {
                    pattern,
                    file: origin.file.to_path_buf(),
                    line: origin.line,
                });
            }
            return Ok(files);
        }

        if target.is_dir() {
            return Ok(dir_files(&target));
        }
        if target.exists() {
            return Ok(vec![target]);
        }
        if optional {
            tracing::debug!("Skipping missing optional include {}", pattern);
            return Ok(Vec::new());
        }

        Err(LoadError::MissingInclude {
            pattern,
            file: origin.file.to_path_buf(),
            line: origin.line,
        })
    }
}

/// Regular files of a directory, recursively, sorted
fn dir_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(dir_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}
