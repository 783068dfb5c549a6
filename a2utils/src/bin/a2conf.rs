//! a2conf - query apache configuration
//!
//! Prints directive values, matching vhosts or the whole configuration with
//! includes expanded.

use a2utils::CommonArgs;
use a2utils_config::query::{self, VhostFilter};
use a2utils_config::{render_tree, ConfigTree, VirtualHost};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_VHFMT: &str = "{vhostargs} {servername} {file}:{line}";

/// Query apache2 configuration
#[derive(Parser, Debug)]
#[command(name = "a2conf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Root config file (default from settings)
    config: Option<PathBuf>,

    /// Print the configuration with includes expanded
    #[arg(long)]
    dump: bool,

    /// Print values of these directives
    #[arg(long, num_args = 1.., value_name = "DIRECTIVE")]
    cmd: Vec<String>,

    /// Only vhosts serving this host name
    #[arg(long, value_name = "NAME")]
    vhost: Option<String>,

    /// Only vhosts having DIRECTIVE, or DIRECTIVE with VALUE (case-insensitive)
    #[arg(long, value_name = "DIRECTIVE[=VALUE]")]
    filter: Option<String>,

    /// Only vhosts NOT having these directives
    #[arg(long, num_args = 1.., value_name = "DIRECTIVE")]
    undef: Vec<String>,

    /// Invert the vhost selection
    #[arg(long)]
    neg: bool,

    /// Print each selected vhost with this format, e.g. "{servername} {documentroot}"
    #[arg(long, value_name = "FORMAT")]
    vhfmt: Option<String>,

    /// Drop repeated output lines
    #[arg(long)]
    uniq: bool,

    /// Print selected vhosts as JSON
    #[arg(long)]
    json: bool,

    /// Only check that the configuration loads
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn selects_vhosts(&self) -> bool {
        self.vhost.is_some() || self.filter.is_some() || !self.undef.is_empty() || self.neg
    }

    fn vhost_filter(&self) -> VhostFilter {
        let mut filter = VhostFilter::new();
        if let Some(name) = &self.vhost {
            filter = filter.with_name(name);
        }
        if let Some(arg) = &self.filter {
            filter = match arg.split_once('=') {
                Some((directive, value)) => filter.with_directive(directive, Some(value.to_string())),
                None => filter.with_directive(arg, None),
            };
        }
        for directive in &self.undef {
            filter = filter.with_undef(directive);
        }
        if self.neg {
            filter = filter.negated();
        }
        filter
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.common.init_logging();
    let settings = cli.common.load_settings()?;

    let root = cli.config.clone().unwrap_or(settings.apache.root_config);
    let tree = match ConfigTree::load(&root) {
        Ok(tree) => tree,
        Err(e) => {
            eprint!("{}", e.report());
            return Ok(ExitCode::FAILURE);
        }
    };

    if cli.check {
        println!("✅ {}: {} file(s) loaded", root.display(), tree.files().len());
        return Ok(ExitCode::SUCCESS);
    }

    if cli.dump {
        print!("{}", render_tree(&tree));
        return Ok(ExitCode::SUCCESS);
    }

    let vhosts = cli.vhost_filter().apply(tree.vhosts());

    if cli.json {
        let json = serde_json::to_string_pretty(&vhosts).context("serializing vhosts")?;
        println!("{}", json);
        return Ok(ExitCode::SUCCESS);
    }

    let lines = output_lines(&cli, &tree, &vhosts);
    let lines = if cli.uniq { query::uniq(lines) } else { lines };
    for line in &lines {
        println!("{}", line);
    }

    // A query that matched nothing is a failure for shell scripts
    let matched = !lines.is_empty() || (!cli.selects_vhosts() && cli.cmd.is_empty());
    Ok(if matched { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn output_lines(cli: &Cli, tree: &ConfigTree, vhosts: &[VirtualHost]) -> Vec<String> {
    if !cli.cmd.is_empty() {
        return if cli.selects_vhosts() {
            query::vhost_directive_values(vhosts, &cli.cmd)
        } else {
            query::directive_values(tree, &cli.cmd)
        };
    }

    let format = cli.vhfmt.as_deref().unwrap_or(DEFAULT_VHFMT);
    vhosts
        .iter()
        .map(|v| query::format_vhost(format, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_filter_from_args() {
        let cli = Cli::parse_from(["a2conf", "x.conf", "--filter", "SSLEngine=on", "--undef", "Redirect"]);
        let filter = cli.vhost_filter();
        assert_eq!(filter.directives, vec![("SSLEngine".to_string(), Some("on".to_string()))]);
        assert_eq!(filter.undef, vec!["Redirect"]);
        assert!(cli.selects_vhosts());

        let cli = Cli::parse_from(["a2conf", "--cmd", "Listen", "ServerRoot"]);
        assert_eq!(cli.cmd, vec!["Listen", "ServerRoot"]);
        assert!(!cli.selects_vhosts());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_filter_leaves_config_positional() {
        let cli = Cli::parse_from(["a2conf", "--filter", "SSLEngine", "x.conf"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.conf")));
        assert_eq!(cli.vhost_filter().directives, vec![("SSLEngine".to_string(), None)]);

        // Only the first '=' separates the value
        let cli = Cli::parse_from(["a2conf", "--filter", "RewriteCond=%{HTTPS}=on"]);
        assert_eq!(
            cli.vhost_filter().directives,
            vec![("RewriteCond".to_string(), Some("%{HTTPS}=on".to_string()))]
        );
    }
}
