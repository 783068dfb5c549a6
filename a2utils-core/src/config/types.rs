//! Settings type definitions
//!
//! These types represent the runtime settings shared by all a2utils tools.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root settings for a2utils
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Apache layout and control
    pub apache: ApacheSettings,

    /// Defaults for newly created vhosts
    pub vhost: VhostSettings,

    /// Certbot / Let's Encrypt integration
    pub certbot: CertbotSettings,

    /// okerr monitoring integration
    pub okerr: OkerrSettings,

    /// Remote access over SSH
    pub ssh: SshSettings,
}

/// Apache paths and control commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApacheSettings {
    /// Root configuration file (`apache2.conf`)
    pub root_config: PathBuf,

    /// Directory holding all site definitions
    pub sites_available: PathBuf,

    /// Directory of symlinks to enabled sites
    pub sites_enabled: PathBuf,

    /// Control binary used for `configtest`
    pub ctl: String,

    /// Command used to reload apache after a change
    pub reload_command: Vec<String>,
}

impl Default for ApacheSettings {
    fn default() -> Self {
        Self {
            root_config: PathBuf::from("/etc/apache2/apache2.conf"),
            sites_available: PathBuf::from("/etc/apache2/sites-available"),
            sites_enabled: PathBuf::from("/etc/apache2/sites-enabled"),
            ctl: "apache2ctl".to_string(),
            reload_command: vec![
                "systemctl".to_string(),
                "reload".to_string(),
                "apache2".to_string(),
            ],
        }
    }
}

/// Defaults for `a2vhost create`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VhostSettings {
    /// Parent directory of document roots (`<basedir>/<servername>`)
    pub basedir: PathBuf,

    /// Owner (`user[:group]`) applied to new document roots
    pub owner: Option<String>,
}

impl Default for VhostSettings {
    fn default() -> Self {
        Self {
            basedir: PathBuf::from("/var/www/virtual"),
            owner: None,
        }
    }
}

/// Certbot settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CertbotSettings {
    /// certbot executable
    pub binary: String,

    /// Let's Encrypt state directory
    pub letsencrypt_dir: PathBuf,

    /// Registration email; `None` registers without email
    pub email: Option<String>,

    /// Certificates with fewer days left are reported
    pub renew_days: i64,

    /// Addresses considered local; detected from interfaces when empty
    pub local_ips: Vec<String>,
}

impl Default for CertbotSettings {
    fn default() -> Self {
        Self {
            binary: "certbot".to_string(),
            letsencrypt_dir: PathBuf::from("/etc/letsencrypt"),
            email: None,
            renew_days: 20,
            local_ips: Vec::new(),
        }
    }
}

/// okerr settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OkerrSettings {
    /// okerr server base URL
    pub url: String,

    /// Project text id
    pub textid: Option<String>,

    /// Project secret
    pub secret: Option<String>,

    /// Indicator name prefix
    pub prefix: String,

    /// Indicator policy
    pub policy: String,

    /// Tags attached to created indicators
    pub tags: Vec<String>,
}

impl Default for OkerrSettings {
    fn default() -> Self {
        Self {
            url: "https://cp.okerr.com/".to_string(),
            textid: None,
            secret: None,
            prefix: String::new(),
            policy: "Default".to_string(),
            tags: Vec::new(),
        }
    }
}

/// SSH settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SshSettings {
    /// Extra options passed to every `ssh`/`scp` invocation
    pub options: Vec<String>,
}
