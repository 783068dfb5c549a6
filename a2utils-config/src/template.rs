//! Generated virtual hosts for `a2vhost create`

use crate::parser::{Block, Directive, Node, NodeKind};
use crate::writer::render;
use std::path::PathBuf;

/// Location certbot's webroot plugin writes to; kept out of the https redirect
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Certificate directives for an https vhost
#[derive(Debug, Clone, PartialEq)]
pub struct SslFiles {
    pub certificate: PathBuf,
    pub key: PathBuf,
    /// e.g. `/etc/letsencrypt/options-ssl-apache.conf`
    pub include: Option<PathBuf>,
}

/// 🏗️ Description of a vhost to generate
#[derive(Debug, Clone, PartialEq)]
pub struct VhostTemplate {
    /// First name is the ServerName, the rest become ServerAlias
    pub names: Vec<String>,
    pub document_root: PathBuf,
    pub port: u16,
    pub ssl: Option<SslFiles>,
    /// Redirect everything except ACME challenges to https
    pub redirect_https: bool,
    /// Extra directives appended to the body
    pub extra: Vec<Directive>,
}

impl VhostTemplate {
    pub fn new<I, S>(names: I, document_root: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            document_root: document_root.into(),
            port: 80,
            ssl: None,
            redirect_https: false,
            extra: Vec::new(),
        }
    }

    /// Switch to port 443 with the given certificate files
    pub fn https(mut self, ssl: SslFiles) -> Self {
        self.port = 443;
        self.ssl = Some(ssl);
        self
    }

    pub fn with_redirect(mut self) -> Self {
        self.redirect_https = true;
        self
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.extra.push(directive);
        self
    }

    /// The `<VirtualHost>` section as a single node
    pub fn to_node(&self) -> Node {
        let mut body = Vec::new();
        let mut push = |d: Directive| body.push(Node::generated(NodeKind::Directive(d)));

        if let Some((first, rest)) = self.names.split_first() {
            push(Directive::new("ServerName").with_args([first.as_str()]));
            if !rest.is_empty() {
                push(Directive::new("ServerAlias").with_args(rest.iter().map(String::as_str)));
            }
        }
        push(Directive::new("DocumentRoot").with_args([self.document_root.display().to_string()]));

        if let Some(ssl) = &self.ssl {
            push(Directive::new("SSLEngine").with_args(["on"]));
            push(Directive::new("SSLCertificateFile").with_args([ssl.certificate.display().to_string()]));
            push(Directive::new("SSLCertificateKeyFile").with_args([ssl.key.display().to_string()]));
            if let Some(include) = &ssl.include {
                push(Directive::new("Include").with_args([include.display().to_string()]));
            }
        }

        if self.redirect_https {
            push(Directive::new("RewriteEngine").with_args(["On"]));
            push(Directive::new("RewriteCond").with_args([
                "%{REQUEST_URI}".to_string(),
                format!("!^{}", ACME_CHALLENGE_PREFIX),
            ]));
            push(Directive::new("RewriteRule").with_args([
                "^".to_string(),
                "https://%{HTTP_HOST}%{REQUEST_URI}".to_string(),
                "[R=301,L]".to_string(),
            ]));
        }

        for directive in &self.extra {
            push(directive.clone());
        }

        let section = Directive::new("VirtualHost")
            .with_args([format!("*:{}", self.port)])
            .with_block(Block::new(body));
        Node::generated(NodeKind::Directive(section))
    }

    pub fn render(&self) -> String {
        render(std::slice::from_ref(&self.to_node()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ConfigTree;

    #[test]
    fn test_plain_vhost() {
        let text = VhostTemplate::new(["example.com", "www.example.com"], "/var/www/virtual/example.com")
            .render();
        assert_eq!(
            text,
            "<VirtualHost *:80>\n    ServerName example.com\n    ServerAlias www.example.com\n    DocumentRoot /var/www/virtual/example.com\n</VirtualHost>\n"
        );
    }

    #[test]
    fn test_https_vhost_parses_back() {
        let text = VhostTemplate::new(["example.com"], "/var/www/example")
            .https(SslFiles {
                certificate: "/etc/letsencrypt/live/example.com/fullchain.pem".into(),
                key: "/etc/letsencrypt/live/example.com/privkey.pem".into(),
                include: Some("/etc/letsencrypt/options-ssl-apache.conf".into()),
            })
            .render();

        let tree = ConfigTree::from_source("/tmp/example.com.conf", &text).unwrap();
        let vhosts = tree.vhosts();
        assert_eq!(vhosts.len(), 1);
        assert!(vhosts[0].is_ssl());
        assert_eq!(vhosts[0].port(), 443);
        assert_eq!(vhosts[0].names(), vec!["example.com"]);
        assert_eq!(
            vhosts[0].certificate_key,
            Some(PathBuf::from("/etc/letsencrypt/live/example.com/privkey.pem"))
        );
        assert!(vhosts[0].first("Include").is_some());
    }

    #[test]
    fn test_redirect_keeps_challenge_reachable() {
        let template = VhostTemplate::new(["example.com"], "/var/www/example").with_redirect();
        let text = template.render();
        assert!(text.contains("RewriteCond %{REQUEST_URI} !^/.well-known/acme-challenge/\n"));
        assert!(text.contains("RewriteRule ^ https://%{HTTP_HOST}%{REQUEST_URI} [R=301,L]\n"));

        let tree = ConfigTree::from_source("/tmp/a.conf", &text).unwrap();
        let vhost = &tree.vhosts()[0];
        assert_eq!(vhost.port(), 80);
        assert_eq!(vhost.first("RewriteEngine").unwrap().args, vec!["On"]);
    }

    #[test]
    fn test_extra_directives_are_quoted() {
        let text = VhostTemplate::new(["a.test"], "/srv/a")
            .with_directive(Directive::new("ErrorLog").with_args(["/var/log/apache2/a error.log"]))
            .render();
        assert!(text.contains("    ErrorLog \"/var/log/apache2/a error.log\"\n"));
    }
}
