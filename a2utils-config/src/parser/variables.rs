//! Variable resolution for Apache configuration
//!
//! Handles `${NAME}` references to variables set with `Define`.

use std::collections::HashMap;

/// Variable resolver
#[derive(Debug, Default, Clone)]
pub struct VariableResolver {
    /// Variables from `Define NAME value`
    pub defines: HashMap<String, String>,

    /// Fall back to the process environment (apache's envvars) for
    /// names that were never defined
    pub use_env: bool,
}

impl VariableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that also consults the environment
    pub fn with_env() -> Self {
        Self {
            defines: HashMap::new(),
            use_env: true,
        }
    }

    /// `Define NAME [value]`
    pub fn define(&mut self, name: &str, value: Option<&str>) {
        self.defines
            .insert(name.to_string(), value.unwrap_or_default().to_string());
    }

    /// `UnDefine NAME`
    pub fn undefine(&mut self, name: &str) {
        self.defines.remove(name);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    /// Resolve a single variable name
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(value) = self.defines.get(name) {
            return Some(value.clone());
        }
        if self.use_env {
            return std::env::var(name).ok();
        }
        None
    }

    /// Replace `${NAME}` references. Unknown names are left untouched so
    /// the text still shows what apache would complain about.
    pub fn substitute(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.resolve(name) {
                        Some(value) => result.push_str(&value),
                        None => result.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        result.push_str(rest);
        result
    }
}
