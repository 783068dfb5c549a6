//! a2okerr - create okerr indicators for apache sites

use a2utils::okerr::{indicators_for, IndicatorOptions};
use a2utils::{CommonArgs, OkerrClient};
use a2utils_config::ConfigTree;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// Create okerr monitoring indicators for every https site
#[derive(Parser, Debug)]
#[command(name = "a2okerr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Root config file (default from settings)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Indicator name prefix, e.g. "web1:"
    #[arg(long)]
    prefix: Option<String>,

    /// Also create httpstatus indicators for http-only vhosts
    #[arg(long)]
    http: bool,

    /// Indicator policy
    #[arg(long)]
    policy: Option<String>,

    /// Tag for created indicators (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// okerr server URL
    #[arg(long)]
    url: Option<String>,

    /// okerr project textid
    #[arg(long)]
    textid: Option<String>,

    /// okerr project secret
    #[arg(long)]
    secret: Option<String>,

    /// Alert this many days before certificate expiry
    #[arg(long)]
    days: Option<i64>,

    /// Print indicators instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Print indicators as JSON and exit
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.common.init_logging();
    let settings = cli.common.load_settings()?;
    let okerr = settings.okerr;

    let root = cli.config.unwrap_or(settings.apache.root_config);
    let tree = ConfigTree::load(&root).map_err(|e| anyhow::anyhow!(e.report()))?;

    let tags = if cli.tags.is_empty() { okerr.tags } else { cli.tags };
    let options = IndicatorOptions {
        prefix: cli.prefix.unwrap_or(okerr.prefix),
        policy: cli.policy.unwrap_or(okerr.policy),
        tags,
        http: cli.http,
        days: cli.days.unwrap_or(settings.certbot.renew_days),
    };
    let indicators = indicators_for(&tree.vhosts(), &options);
    tracing::info!("📈 {} indicator(s) from {}", indicators.len(), root.display());

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&indicators)?);
        return Ok(ExitCode::SUCCESS);
    }

    let url = cli.url.unwrap_or(okerr.url);
    let client = if cli.dry_run {
        OkerrClient::offline(&url)
    } else {
        OkerrClient::new(&url, cli.textid.or(okerr.textid), cli.secret.or(okerr.secret))
            .context("use --textid or set okerr.textid in settings")?
    };

    let errors = client.update_all(&indicators).await;
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("{}", error);
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
