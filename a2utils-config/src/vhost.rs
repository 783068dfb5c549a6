//! Virtual host model
//!
//! 🌐 Extracts `<VirtualHost>` sections from a loaded tree into a flat,
//! queryable structure.

use crate::loader::{ConfigTree, Entry};
use serde::Serialize;
use std::path::PathBuf;

/// A directive inside a vhost, flattened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VhostDirective {
    pub name: String,
    pub args: Vec<String>,
    /// File the directive is written in (differs for included files)
    pub file: PathBuf,
    pub line: usize,
    pub end_line: usize,
    /// 0 for the vhost body, 1+ inside nested sections
    pub depth: usize,
}

impl VhostDirective {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn args_joined(&self) -> String {
        self.args.join(" ")
    }
}

/// 🌐 One `<VirtualHost>` block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualHost {
    /// Defining file
    pub file: PathBuf,
    /// Line of `<VirtualHost ...>`
    pub line: usize,
    /// Line of `</VirtualHost>`
    pub end_line: usize,
    /// Address:port bindings from the section tag
    pub addresses: Vec<String>,
    pub server_name: Option<String>,
    pub aliases: Vec<String>,
    pub document_root: Option<PathBuf>,
    pub ssl: bool,
    pub certificate: Option<PathBuf>,
    pub certificate_key: Option<PathBuf>,
    /// Whether the defining file is reachable from the root config
    pub enabled: bool,
    pub directives: Vec<VhostDirective>,
}

impl VirtualHost {
    /// Build from a `<VirtualHost>` entry of `tree`
    pub fn from_entry(tree: &ConfigTree, entry: &Entry<'_>) -> Self {
        let mut walked = Vec::new();
        if let Some(block) = &entry.directive.block {
            tree.walk_nodes(entry.file, &block.nodes, 0, &mut walked);
        }

        let directives: Vec<VhostDirective> = walked
            .iter()
            .filter(|e| !e.directive.is_section())
            .map(|e| VhostDirective {
                name: e.directive.name.clone(),
                args: e.directive.args.clone(),
                file: tree.file(e.file).path.clone(),
                line: e.node.line,
                end_line: e.node.end_line,
                depth: e.depth,
            })
            .collect();

        let vars = tree.variables();
        let first_arg = |name: &str| {
            directives
                .iter()
                .find(|d| d.is(name))
                .and_then(|d| d.args.first())
                .map(|a| vars.substitute(a))
        };

        let server_name = first_arg("ServerName");
        let document_root = first_arg("DocumentRoot").map(PathBuf::from);
        let certificate = first_arg("SSLCertificateFile").map(PathBuf::from);
        let certificate_key = first_arg("SSLCertificateKeyFile").map(PathBuf::from);

        let aliases = directives
            .iter()
            .filter(|d| d.is("ServerAlias"))
            .flat_map(|d| d.args.iter().cloned())
            .collect();

        let addresses: Vec<String> = entry.directive.args.clone();
        let ssl_engine = directives
            .iter()
            .any(|d| d.is("SSLEngine") && d.args.first().is_some_and(|a| a.eq_ignore_ascii_case("on")));
        let ssl = ssl_engine || addresses.iter().any(|a| address_port(a) == Some(443));

        Self {
            file: tree.file(entry.file).path.clone(),
            line: entry.node.line,
            end_line: entry.node.end_line,
            addresses,
            server_name,
            aliases,
            document_root,
            ssl,
            certificate,
            certificate_key,
            enabled: true,
            directives,
        }
    }

    /// ServerName then aliases, normalized and without duplicates
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for raw in self.server_name.iter().chain(self.aliases.iter()) {
            let name = normalize_host(raw);
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Whether this vhost answers for `host` (case-insensitive, `*.` wildcards)
    pub fn has_name(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.names().iter().any(|name| host_matches(name, &host))
    }

    /// Ports from the address list (`*:80`, `[::]:443`, ...)
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Vec::new();
        for port in self.addresses.iter().filter_map(|a| address_port(a)) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    /// First port, defaulting to 443 for ssl and 80 otherwise
    pub fn port(&self) -> u16 {
        self.ports()
            .first()
            .copied()
            .unwrap_or(if self.ssl { 443 } else { 80 })
    }

    pub fn is_ssl(&self) -> bool {
        self.ssl
    }

    /// First directive named `name` (any depth)
    pub fn first(&self, name: &str) -> Option<&VhostDirective> {
        self.directives.iter().find(|d| d.is(name))
    }

    /// All directives named `name` (any depth)
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VhostDirective> + 'a {
        self.directives.iter().filter(move |d| d.is(name))
    }

    /// Section tag arguments as written
    pub fn vhost_args(&self) -> String {
        self.addresses.join(" ")
    }

    /// Short label for messages: `name:port` or `file:line`
    pub fn label(&self) -> String {
        match &self.server_name {
            Some(name) => format!("{}:{}", normalize_host(name), self.port()),
            None => format!("{}:{}", self.file.display(), self.line),
        }
    }
}

impl ConfigTree {
    /// All virtual hosts in effective order
    pub fn vhosts(&self) -> Vec<VirtualHost> {
        self.sections("VirtualHost")
            .iter()
            .map(|entry| VirtualHost::from_entry(self, entry))
            .collect()
    }

    /// Virtual hosts serving `host`, optionally only on `port`
    pub fn find_vhosts(&self, host: &str, port: Option<u16>) -> Vec<VirtualHost> {
        self.vhosts()
            .into_iter()
            .filter(|v| v.has_name(host))
            .filter(|v| port.is_none_or(|p| v.ports().contains(&p) || (v.ports().is_empty() && v.port() == p)))
            .collect()
    }
}

/// Strip scheme and port, lowercase: `https://Example.com:443` → `example.com`
pub fn normalize_host(raw: &str) -> String {
    let host = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let host = host.split('/').next().unwrap_or(host);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// `pattern` may start with `*.` matching exactly one label
fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .strip_suffix(suffix)
            .and_then(|label| label.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty() && !label.contains('.')),
        None => false,
    }
}

/// Port of a vhost address; `*` or missing port gives `None`
pub fn address_port(address: &str) -> Option<u16> {
    let (_, port) = address.rsplit_once(':')?;
    // bare IPv6 without brackets has no port
    if address.starts_with('[') && !address.contains("]:") {
        return None;
    }
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(source: &str) -> ConfigTree {
        ConfigTree::from_source("/etc/apache2/sites-available/test.conf", source).unwrap()
    }

    const SITE: &str = r#"
<VirtualHost *:80>
    ServerName Example.com
    ServerAlias www.example.com *.cdn.example.com
    DocumentRoot /var/www/example
</VirtualHost>

<IfModule mod_ssl.c>
<VirtualHost *:443 [::]:443>
    ServerName https://example.com:443
    ServerAlias www.example.com
    DocumentRoot /var/www/example
    SSLEngine on
    SSLCertificateFile /etc/letsencrypt/live/example.com/fullchain.pem
    SSLCertificateKeyFile /etc/letsencrypt/live/example.com/privkey.pem
    <Directory /var/www/example>
        AllowOverride All
    </Directory>
</VirtualHost>
</IfModule>
"#;

    #[test]
    fn test_extract_vhosts() {
        let vhosts = tree(SITE).vhosts();
        assert_eq!(vhosts.len(), 2);

        let http = &vhosts[0];
        assert_eq!(http.line, 2);
        assert_eq!(http.end_line, 6);
        assert_eq!(http.addresses, vec!["*:80"]);
        assert_eq!(http.names(), vec!["example.com", "www.example.com", "*.cdn.example.com"]);
        assert_eq!(http.document_root, Some(PathBuf::from("/var/www/example")));
        assert!(!http.is_ssl());
        assert_eq!(http.port(), 80);

        let https = &vhosts[1];
        assert!(https.is_ssl());
        assert_eq!(https.ports(), vec![443]);
        assert_eq!(https.names(), vec!["example.com", "www.example.com"]);
        assert_eq!(
            https.certificate,
            Some(PathBuf::from("/etc/letsencrypt/live/example.com/fullchain.pem"))
        );
        let allow = https.first("allowoverride").unwrap();
        assert_eq!(allow.depth, 1);
        assert_eq!(allow.args, vec!["All"]);
    }

    #[test]
    fn test_has_name_and_wildcards() {
        let vhosts = tree(SITE).vhosts();
        let http = &vhosts[0];
        assert!(http.has_name("EXAMPLE.com"));
        assert!(http.has_name("img.cdn.example.com"));
        assert!(!http.has_name("a.b.cdn.example.com"));
        assert!(!http.has_name("cdn.example.com"));
        assert!(!http.has_name("example.org"));
    }

    #[test]
    fn test_find_vhosts_by_port() {
        let t = tree(SITE);
        assert_eq!(t.find_vhosts("www.example.com", None).len(), 2);
        let https = t.find_vhosts("www.example.com", Some(443));
        assert_eq!(https.len(), 1);
        assert!(https[0].is_ssl());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("https://Example.com:8443/path"), "example.com");
        assert_eq!(normalize_host("example.com."), "example.com");
        assert_eq!(normalize_host("[::1]"), "[::1]");
    }

    #[test]
    fn test_address_port() {
        assert_eq!(address_port("*:80"), Some(80));
        assert_eq!(address_port("[::]:443"), Some(443));
        assert_eq!(address_port("10.0.0.1"), None);
        assert_eq!(address_port("*"), None);
    }

    #[test]
    fn test_ports_keep_first_seen_order() {
        let vhosts = tree("<VirtualHost *:80 *:443 [::]:80>\nServerName mixed.test\n</VirtualHost>\n").vhosts();
        assert_eq!(vhosts[0].ports(), vec![80, 443]);
        assert_eq!(vhosts[0].port(), 80);
    }

    #[test]
    fn test_vhost_without_server_name() {
        let vhosts = tree("<VirtualHost _default_:443>\nSSLEngine On\n</VirtualHost>\n").vhosts();
        assert_eq!(vhosts[0].names(), Vec::<String>::new());
        assert!(vhosts[0].is_ssl());
        assert_eq!(vhosts[0].label(), "/etc/apache2/sites-available/test.conf:1");
    }
}
