//! a2vhost - manage apache virtual hosts
//!
//! 🌐 Lists, creates, enables and disables sites and edits directives inside
//! existing vhosts. Every change is followed by `apache2ctl -t` and a reload;
//! a failing config test rolls the change back.

use a2utils::CommonArgs;
use a2utils_config::{
    ConfigTree, Directive, Editor, Sites, SslFiles, VhostTemplate, VirtualHost,
};
use a2utils_config::sites::Change;
use a2utils_core::{Apache, Settings};
use a2utils_tls::certbot::live_paths;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Manage apache2 virtual hosts
#[derive(Parser, Debug)]
#[command(name = "a2vhost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Do not test and reload apache after a change
    #[arg(long, global = true)]
    no_reload: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List sites and their vhosts
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Enable a site (file name or host name)
    Enable { name: String },

    /// Disable a site (file name or host name)
    Disable { name: String },

    /// Create a site for NAMES (first is the ServerName)
    Create {
        #[arg(required = true)]
        names: Vec<String>,

        /// Parent of the document root (default from settings)
        #[arg(long)]
        basedir: Option<PathBuf>,

        /// Also create a :443 vhost using the Let's Encrypt certificate
        #[arg(long)]
        https: bool,

        /// Redirect http to https (ACME challenges stay on http)
        #[arg(long)]
        redirect: bool,
    },

    /// Set a directive in every vhost serving HOST (replaces the first one)
    Set {
        host: String,
        directive: String,
        #[arg(required = true)]
        args: Vec<String>,

        /// Only the vhost on this port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Append a directive to every vhost serving HOST
    Add {
        host: String,
        directive: String,
        #[arg(required = true)]
        args: Vec<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Remove a directive from every vhost serving HOST
    Remove {
        host: String,
        directive: String,

        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.common.init_logging();
    let settings = cli.common.load_settings()?;

    let sites = Sites::new(
        &settings.apache.root_config,
        &settings.apache.sites_available,
        &settings.apache.sites_enabled,
    );
    let apache = (!cli.no_reload).then(|| Apache::new(&settings.apache));

    match cli.command {
        Commands::List { json } => list(&sites, json)?,

        Commands::Enable { name } => {
            if sites.enable(&name)? == Change::Unchanged {
                println!("{} is already enabled", name);
                return Ok(ExitCode::SUCCESS);
            }
            if let Err(e) = apply(apache.as_ref()) {
                sites.disable(&name).context("rolling back enable")?;
                return Err(e).context("site enabled but apache rejected it; link removed");
            }
            println!("✅ enabled {}", name);
        }

        Commands::Disable { name } => {
            if sites.disable(&name)? == Change::Unchanged {
                println!("{} is already disabled", name);
                return Ok(ExitCode::SUCCESS);
            }
            if let Err(e) = apply(apache.as_ref()) {
                sites.enable(&name).context("rolling back disable")?;
                return Err(e).context("apache rejected the config without the site; link restored");
            }
            println!("✅ disabled {}", name);
        }

        Commands::Create {
            names,
            basedir,
            https,
            redirect,
        } => {
            let basedir = basedir.unwrap_or_else(|| settings.vhost.basedir.clone());
            let path = create(&settings, &sites, &names, &basedir, https, redirect)?;
            println!("📄 wrote {}", path.display());

            sites.enable(&names[0])?;
            if let Err(e) = apply(apache.as_ref()) {
                sites.disable(&names[0]).context("rolling back create")?;
                return Err(e).context(format!("{} left disabled", path.display()));
            }
            println!("✅ created and enabled {}", names[0]);
        }

        Commands::Set {
            host,
            directive,
            args,
            port,
        } => {
            let directive = Directive::new(directive).with_args(args);
            let count = edit_vhosts(&sites, apache.as_ref(), &host, port, |editor, vhost| {
                editor.set_directive(vhost.line, &directive)
            })?;
            println!("✏️ updated {} vhost(s)", count);
        }

        Commands::Add {
            host,
            directive,
            args,
            port,
        } => {
            let directive = Directive::new(directive).with_args(args);
            let count = edit_vhosts(&sites, apache.as_ref(), &host, port, |editor, vhost| {
                editor.add_directive(vhost.line, &directive)
            })?;
            println!("➕ updated {} vhost(s)", count);
        }

        Commands::Remove { host, directive, port } => {
            let count = edit_vhosts(&sites, apache.as_ref(), &host, port, |editor, vhost| {
                editor.remove_directive(vhost.line, &directive).map(|_| ())
            })?;
            println!("➖ updated {} vhost(s)", count);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Test and reload when a controller is given
fn apply(apache: Option<&Apache>) -> anyhow::Result<()> {
    if let Some(apache) = apache {
        apache.test_and_reload()?;
    }
    Ok(())
}

fn list(sites: &Sites, json: bool) -> anyhow::Result<()> {
    let listed = sites.list()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    for site in &listed {
        let state = if site.enabled { "enabled " } else { "disabled" };
        println!("{} {}", state, site.path.display());
        for vhost in &site.vhosts {
            println!("    {} {}", vhost.vhost_args(), vhost.names().join(" "));
        }
    }
    Ok(())
}

/// Write the new site file and its document root
fn create(
    settings: &Settings,
    sites: &Sites,
    names: &[String],
    basedir: &Path,
    https: bool,
    redirect: bool,
) -> anyhow::Result<PathBuf> {
    let tree = sites.tree()?;
    for name in names {
        if let Some(existing) = tree.find_vhosts(name, None).first() {
            bail!("{} is already served by {}:{}", name, existing.file.display(), existing.line);
        }
    }

    let primary = &names[0];
    let path = sites.available_dir().join(format!("{}.conf", primary));
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let docroot = basedir.join(primary);
    std::fs::create_dir_all(&docroot)
        .with_context(|| format!("creating {}", docroot.display()))?;
    if let Some(owner) = &settings.vhost.owner {
        a2utils_core::apache::run(&[
            "chown".to_string(),
            owner.clone(),
            docroot.display().to_string(),
        ])?;
    }

    let mut http = VhostTemplate::new(names.iter().cloned(), &docroot);
    if redirect {
        http = http.with_redirect();
    }
    let mut text = http.render();

    if https {
        let live = live_paths(&settings.certbot.letsencrypt_dir, primary);
        if !live.fullchain.exists() {
            bail!(
                "no certificate at {}; create the http site first and run a2certbot --create --domain {}",
                live.fullchain.display(),
                primary
            );
        }
        let options = settings.certbot.letsencrypt_dir.join("options-ssl-apache.conf");
        let ssl = VhostTemplate::new(names.iter().cloned(), &docroot).https(SslFiles {
            certificate: live.fullchain,
            key: live.privkey,
            include: options.exists().then_some(options),
        });
        text.push('\n');
        text.push_str(&ssl.render());
    }

    // Parse back before writing anything apache will read
    ConfigTree::from_source(&path, &text).map_err(|e| anyhow::anyhow!(e.report()))?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Apply `edit` to every vhost serving `host`, then test and reload.
/// All touched files are restored when the config test fails.
fn edit_vhosts<F>(
    sites: &Sites,
    apache: Option<&Apache>,
    host: &str,
    port: Option<u16>,
    mut edit: F,
) -> anyhow::Result<usize>
where
    F: FnMut(&mut Editor, &VirtualHost) -> Result<(), a2utils_config::EditError>,
{
    let tree = sites.tree()?;
    let vhosts = tree.find_vhosts(host, port);
    if vhosts.is_empty() {
        bail!("no vhost serves {}", host);
    }

    // A file reachable through several links or includes is edited once
    let mut by_file: BTreeMap<PathBuf, Vec<&VirtualHost>> = BTreeMap::new();
    for vhost in &vhosts {
        let file = std::fs::canonicalize(&vhost.file)
            .with_context(|| format!("resolving {}", vhost.file.display()))?;
        let in_file = by_file.entry(file).or_default();
        if !in_file.iter().any(|v| v.line == vhost.line) {
            in_file.push(vhost);
        }
    }
    let count = by_file.values().map(Vec::len).sum();

    let mut originals = Vec::new();
    for (file, mut in_file) in by_file {
        let mut editor = Editor::open(&file)?;
        originals.push(Editor::open(&file)?);
        // Bottom-up so earlier vhosts keep their line numbers
        in_file.sort_by_key(|v| std::cmp::Reverse(v.line));
        for vhost in in_file {
            edit(&mut editor, vhost)?;
        }
        editor.save()?;
    }

    if let Err(e) = apply(apache) {
        for original in &originals {
            original.save().context("restoring original file")?;
        }
        return Err(e).context("apache rejected the edit; files restored");
    }
    Ok(count)
}
