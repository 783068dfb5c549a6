//! Queries over a loaded configuration
//!
//! Directive lookups, vhost filters and `{placeholder}` formatting used by
//! `a2conf`.

use crate::loader::ConfigTree;
use crate::vhost::{normalize_host, VirtualHost};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

/// Arguments of every directive named in `names`, in effective order
pub fn directive_values(tree: &ConfigTree, names: &[String]) -> Vec<String> {
    tree.walk()
        .into_iter()
        .filter(|e| names.iter().any(|n| e.directive.is(n)))
        .map(|e| e.directive.args_joined())
        .collect()
}

/// Arguments of directives named in `names` inside the given vhosts
pub fn vhost_directive_values(vhosts: &[VirtualHost], names: &[String]) -> Vec<String> {
    vhosts
        .iter()
        .flat_map(|v| v.directives.iter())
        .filter(|d| names.iter().any(|n| d.is(n)))
        .map(|d| d.args_joined())
        .collect()
}

/// Selects virtual hosts
#[derive(Debug, Clone, Default)]
pub struct VhostFilter {
    /// Host name served by the vhost
    pub name: Option<String>,

    /// `(directive, value)`: vhost must have the directive; with a value,
    /// one of its arguments must match (case-insensitive)
    pub directives: Vec<(String, Option<String>)>,

    /// Vhost must NOT have these directives
    pub undef: Vec<String>,

    /// Invert the whole match
    pub neg: bool,
}

impl VhostFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_directive(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.directives.push((name.into(), value));
        self
    }

    pub fn with_undef(mut self, name: impl Into<String>) -> Self {
        self.undef.push(name.into());
        self
    }

    pub fn negated(mut self) -> Self {
        self.neg = !self.neg;
        self
    }

    pub fn matches(&self, vhost: &VirtualHost) -> bool {
        let name_ok = self.name.as_deref().is_none_or(|n| vhost.has_name(n));

        let directives_ok = self.directives.iter().all(|(name, value)| match value {
            None => vhost.first(name).is_some(),
            Some(value) => vhost.all(name).any(|d| {
                d.args.iter().any(|a| a.eq_ignore_ascii_case(value))
                    || d.args_joined().eq_ignore_ascii_case(value)
            }),
        });

        let undef_ok = self.undef.iter().all(|name| vhost.first(name).is_none());

        (name_ok && directives_ok && undef_ok) != self.neg
    }

    pub fn apply(&self, vhosts: Vec<VirtualHost>) -> Vec<VirtualHost> {
        vhosts.into_iter().filter(|v| self.matches(v)).collect()
    }
}

/// Expand `{placeholders}` in `template` for `vhost`.
///
/// Known names: `vhostargs`, `servername`, `serveralias`, `names`, `file`,
/// `line`, `port`, `enabled`. Any other name is looked up as a directive;
/// missing directives expand to an empty string.
pub fn format_vhost(template: &str, vhost: &VirtualHost) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| placeholder(&caps[1], vhost))
        .into_owned()
}

fn placeholder(name: &str, vhost: &VirtualHost) -> String {
    match name.to_ascii_lowercase().as_str() {
        "vhostargs" => vhost.vhost_args(),
        "servername" => vhost
            .server_name
            .as_deref()
            .map(normalize_host)
            .unwrap_or_default(),
        "serveralias" => vhost.aliases.join(" "),
        "names" => vhost.names().join(" "),
        "file" => vhost.file.display().to_string(),
        "line" => vhost.line.to_string(),
        "port" => vhost.port().to_string(),
        "enabled" => vhost.enabled.to_string(),
        other => vhost.first(other).map(|d| d.args_joined()).unwrap_or_default(),
    }
}

/// Drop repeated lines, keeping the first occurrence
pub fn uniq(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines.into_iter().filter(|l| seen.insert(l.clone())).collect()
}
