//! Apache2 configuration toolkit
//!
//! Parses Apache 2.4 configuration files, follows `Include` chains the way
//! httpd does, exposes `<VirtualHost>` sections as a queryable model and
//! edits files in place without touching unrelated lines.
//!
//! # Example
//!
//! ```rust,ignore
//! use a2utils_config::ConfigTree;
//!
//! let tree = ConfigTree::load("/etc/apache2/apache2.conf")?;
//! for vhost in tree.find_vhosts("example.com", Some(443)) {
//!     println!("{} {:?}", vhost.label(), vhost.document_root);
//! }
//! ```

pub mod loader;
pub mod parser;
pub mod query;
pub mod sites;
pub mod template;
pub mod vhost;
pub mod writer;

pub use loader::{ConfigFile, ConfigTree, Entry, LoadError};
pub use parser::{
    lex, parse, tokenize, Block, Directive, FileId, LexError, Node, NodeKind, ParseError,
    VariableResolver,
};
pub use query::{format_vhost, VhostFilter};
pub use sites::{Change, SiteFile, SiteLocation, Sites, SitesError};
pub use template::{SslFiles, VhostTemplate};
pub use vhost::{normalize_host, VhostDirective, VirtualHost};
pub use writer::{render, render_tree, EditError, Editor};

use std::path::Path;

/// Load `root` with its includes and return every virtual host
pub fn load_vhosts(root: impl AsRef<Path>) -> Result<Vec<VirtualHost>, LoadError> {
    Ok(ConfigTree::load(root)?.vhosts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_vhosts_through_includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sites-enabled")).unwrap();
        fs::write(
            dir.path().join("apache2.conf"),
            "IncludeOptional sites-enabled/*.conf\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sites-enabled/a.conf"),
            "<VirtualHost *:80>\n  ServerName a.test\n</VirtualHost>\n",
        )
        .unwrap();

        let vhosts = load_vhosts(dir.path().join("apache2.conf")).unwrap();
        assert_eq!(vhosts.len(), 1);
        assert_eq!(vhosts[0].names(), vec!["a.test"]);
        assert!(vhosts[0].file.ends_with("sites-enabled/a.conf"));
    }

    #[test]
    fn test_vhost_serializes_to_json() {
        let tree = ConfigTree::from_source(
            "/etc/apache2/sites-enabled/a.conf",
            "<VirtualHost *:443>\nServerName a.test\nSSLEngine on\n</VirtualHost>\n",
        )
        .unwrap();
        let json = serde_json::to_value(tree.vhosts()).unwrap();
        assert_eq!(json[0]["server_name"], "a.test");
        assert_eq!(json[0]["ssl"], true);
        assert_eq!(json[0]["addresses"][0], "*:443");
        assert_eq!(json[0]["directives"][1]["name"], "SSLEngine");
    }
}
