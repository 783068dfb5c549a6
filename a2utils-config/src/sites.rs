//! sites-available / sites-enabled management
//!
//! 🔗 A site is enabled when its file is reachable from the root config.
//! Enabling links it into sites-enabled; both operations re-load the tree
//! afterwards and roll back when the result disagrees.

use crate::loader::{ConfigTree, LoadError};
use crate::vhost::VirtualHost;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Site management errors
#[derive(Debug, Error)]
pub enum SitesError {
    #[error("💥 IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("🔍 No site matches '{0}'")]
    NotFound(String),

    #[error("⚠️ '{name}' matches several sites: {}", .candidates.join(", "))]
    Ambiguous { name: String, candidates: Vec<String> },

    #[error("⚠️ {} exists and is not a link to {}", .link.display(), .target.display())]
    Conflict { link: PathBuf, target: PathBuf },

    #[error("❌ {} was linked but is not included by {}", .path.display(), .root.display())]
    NotReachable { path: PathBuf, root: PathBuf },

    #[error("❌ {} is still included by {} after unlinking", .path.display(), .root.display())]
    StillReachable { path: PathBuf, root: PathBuf },

    #[error("⚠️ {} is a regular file, not a link; move it to sites-available to manage it", .0.display())]
    NotALink(PathBuf),
}

type SitesResult<T> = Result<T, SitesError>;

/// Where a listed site file lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteLocation {
    Available,
    /// In sites-enabled without a counterpart in sites-available
    EnabledOnly,
}

/// One site file with its vhosts
#[derive(Debug, Clone, Serialize)]
pub struct SiteFile {
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub location: SiteLocation,
    pub vhosts: Vec<VirtualHost>,
}

/// Result of enable/disable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Changed,
    Unchanged,
}

/// Debian style site layout
#[derive(Debug, Clone)]
pub struct Sites {
    root_config: PathBuf,
    available: PathBuf,
    enabled: PathBuf,
}

impl Sites {
    pub fn new(root_config: impl Into<PathBuf>, available: impl Into<PathBuf>, enabled: impl Into<PathBuf>) -> Self {
        Self {
            root_config: root_config.into(),
            available: available.into(),
            enabled: enabled.into(),
        }
    }

    pub fn root_config(&self) -> &Path {
        &self.root_config
    }

    pub fn available_dir(&self) -> &Path {
        &self.available
    }

    pub fn enabled_dir(&self) -> &Path {
        &self.enabled
    }

    /// Load the full tree from the root config
    pub fn tree(&self) -> SitesResult<ConfigTree> {
        Ok(ConfigTree::load(&self.root_config)?)
    }

    /// All site files with their enabled state
    pub fn list(&self) -> SitesResult<Vec<SiteFile>> {
        let reachable = self.tree()?.canonical_paths();
        let mut sites = Vec::new();
        let mut seen = HashSet::new();

        for path in conf_files(&self.available)? {
            let canonical = canonicalize(&path)?;
            let enabled = reachable.contains(&canonical);
            seen.insert(canonical);
            sites.push(self.site_file(path, enabled, SiteLocation::Available)?);
        }

        for path in conf_files(&self.enabled)? {
            // Dangling links cannot be parsed; skip them
            let Ok(canonical) = std::fs::canonicalize(&path) else {
                tracing::warn!("⚠️ Dangling link {}", path.display());
                continue;
            };
            if seen.contains(&canonical) {
                continue;
            }
            let enabled = reachable.contains(&canonical);
            sites.push(self.site_file(path, enabled, SiteLocation::EnabledOnly)?);
        }

        Ok(sites)
    }

    fn site_file(&self, path: PathBuf, enabled: bool, location: SiteLocation) -> SitesResult<SiteFile> {
        let mut vhosts = ConfigTree::load_file(&path)?.vhosts();
        for vhost in &mut vhosts {
            vhost.enabled = enabled;
        }
        Ok(SiteFile {
            name: file_name(&path),
            path,
            enabled,
            location,
            vhosts,
        })
    }

    /// Find the sites-available file for a name, file name or served host
    pub fn resolve_name(&self, arg: &str) -> SitesResult<PathBuf> {
        for candidate in [self.available.join(arg), self.available.join(format!("{}.conf", arg))] {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        let mut matches = Vec::new();
        for path in conf_files(&self.available)? {
            let serves = ConfigTree::load_file(&path)?
                .vhosts()
                .iter()
                .any(|v| v.has_name(arg));
            if serves {
                matches.push(path);
            }
        }

        match matches.len() {
            0 => Err(SitesError::NotFound(arg.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(SitesError::Ambiguous {
                name: arg.to_string(),
                candidates: matches.iter().map(|p| file_name(p)).collect(),
            }),
        }
    }

    /// Whether a site file is reachable from the root config
    pub fn is_enabled(&self, path: &Path) -> SitesResult<bool> {
        Ok(self.tree()?.contains_file(path))
    }

    /// 🔗 Link a site into sites-enabled and verify it is now included
    pub fn enable(&self, arg: &str) -> SitesResult<Change> {
        let site = self.resolve_name(arg)?;
        if self.is_enabled(&site)? {
            tracing::info!("{} is already enabled", file_name(&site));
            return Ok(Change::Unchanged);
        }

        let link = self.enabled.join(file_name(&site));
        let target = relative_path(&canonicalize(&self.enabled)?, &canonicalize(&site)?);

        if std::fs::symlink_metadata(&link).is_ok() {
            return Err(SitesError::Conflict { link, target });
        }

        tracing::info!("🔗 {} -> {}", link.display(), target.display());
        std::os::unix::fs::symlink(&target, &link).map_err(|source| SitesError::Io {
            path: link.clone(),
            source,
        })?;

        let reachable = match self.tree() {
            Ok(tree) => tree.contains_file(&site),
            Err(e) => {
                let _ = std::fs::remove_file(&link);
                return Err(e);
            }
        };
        if !reachable {
            let _ = std::fs::remove_file(&link);
            return Err(SitesError::NotReachable {
                path: site,
                root: self.root_config.clone(),
            });
        }

        Ok(Change::Changed)
    }

    /// ✂️ Remove links to a site and verify it is no longer included
    pub fn disable(&self, arg: &str) -> SitesResult<Change> {
        let site = self.resolve_name(arg).or_else(|e| match e {
            // Links that only exist in sites-enabled can be disabled too
            SitesError::NotFound(_) => self.resolve_enabled_only(arg).ok_or(e),
            other => Err(other),
        })?;

        if !self.is_enabled(&site)? {
            tracing::info!("{} is already disabled", file_name(&site));
            return Ok(Change::Unchanged);
        }
        if self.is_plain_enabled_file(&site) {
            return Err(SitesError::NotALink(site));
        }

        let wanted = canonicalize(&site)?;
        let mut removed = Vec::new();
        for link in self.links_to(&wanted)? {
            let target = std::fs::read_link(&link).map_err(|source| SitesError::Io {
                path: link.clone(),
                source,
            })?;
            std::fs::remove_file(&link).map_err(|source| SitesError::Io {
                path: link.clone(),
                source,
            })?;
            tracing::info!("✂️ Removed {}", link.display());
            removed.push((link, target));
        }

        let still = self.tree().map(|t| t.contains_file(&site));
        if !matches!(still, Ok(false)) {
            for (link, target) in &removed {
                let _ = std::os::unix::fs::symlink(target, link);
            }
            still?;
            return Err(SitesError::StillReachable {
                path: site,
                root: self.root_config.clone(),
            });
        }

        Ok(Change::Changed)
    }

    /// A real file living in sites-enabled; there is no link to remove
    fn is_plain_enabled_file(&self, site: &Path) -> bool {
        let is_link = std::fs::symlink_metadata(site).is_ok_and(|m| m.file_type().is_symlink());
        let in_enabled = match (site.parent().map(std::fs::canonicalize), std::fs::canonicalize(&self.enabled)) {
            (Some(Ok(parent)), Ok(enabled)) => parent == enabled,
            _ => false,
        };
        !is_link && in_enabled
    }

    fn resolve_enabled_only(&self, arg: &str) -> Option<PathBuf> {
        [self.enabled.join(arg), self.enabled.join(format!("{}.conf", arg))]
            .into_iter()
            .find(|p| p.is_file())
    }

    /// Entries of sites-enabled that resolve to `wanted`
    fn links_to(&self, wanted: &Path) -> SitesResult<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.enabled).map_err(|source| SitesError::Io {
            path: self.enabled.clone(),
            source,
        })?;
        let mut links: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| std::fs::symlink_metadata(p).is_ok_and(|m| m.file_type().is_symlink()))
            .filter(|p| std::fs::canonicalize(p).is_ok_and(|c| c == wanted))
            .collect();
        links.sort();
        Ok(links)
    }
}

/// `*.conf` entries of a directory, sorted; a missing directory is empty
fn conf_files(dir: &Path) -> SitesResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SitesError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    files.sort();
    Ok(files)
}

fn canonicalize(path: &Path) -> SitesResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|source| SitesError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Path of `to` relative to directory `from` (both absolute)
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for part in &to[common..] {
        rel.push(part.as_os_str());
    }
    rel
}
