//! a2certbot - Let's Encrypt for local apache vhosts
//!
//! 🩺 Without arguments every vhost using a certbot certificate is
//! diagnosed, so renewals do not fail silently. With `--domain` the http
//! vhost of that name is checked and, with `--create`, a certificate is
//! requested through certbot's webroot plugin.

use a2utils::CommonArgs;
use a2utils_config::{ConfigTree, VirtualHost};
use a2utils_core::config::CertbotSettings;
use a2utils_tls::certbot::{is_letsencrypt_path, lineage_of};
use a2utils_tls::{probe, Authenticator, CertInfo, CertbotRequest, Diagnoser, Problem};
use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Diagnose and request Let's Encrypt certificates for apache vhosts
#[derive(Parser, Debug)]
#[command(name = "a2certbot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Root config file (default from settings)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only check (or create) the certificate for this host
    #[arg(short, long)]
    domain: Option<String>,

    /// Request the certificate when the checks pass (needs --domain)
    #[arg(long, requires = "domain")]
    create: bool,

    /// Pass --dry-run to certbot
    #[arg(long)]
    dry_run: bool,

    /// Use the Let's Encrypt staging server
    #[arg(long)]
    staging: bool,

    /// Registration email (default from settings)
    #[arg(long)]
    email: Option<String>,

    /// Report certificates expiring within this many days
    #[arg(long)]
    days: Option<i64>,

    /// List vhosts with certbot certificates and exit
    #[arg(long)]
    list: bool,

    /// Seconds to wait for each challenge request
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.common.init_logging();
    let settings = cli.common.load_settings()?;
    let certbot = settings.certbot.clone();

    let root = cli.config.clone().unwrap_or(settings.apache.root_config);
    let tree = ConfigTree::load(&root).map_err(|e| anyhow::anyhow!(e.report()))?;
    let vhosts = tree.vhosts();

    if cli.list {
        list(&vhosts, &certbot);
        return Ok(ExitCode::SUCCESS);
    }

    let local = match probe::local_addresses(&certbot.local_ips).await {
        Ok(local) => local,
        Err(e) => {
            tracing::warn!("⚠️ {}; skipping the local address check", e);
            Vec::new()
        }
    };
    let client = probe::http_client(Duration::from_secs(cli.timeout))?;
    let diagnoser = Diagnoser::new(client, local).renew_days(cli.days.unwrap_or(certbot.renew_days));

    match &cli.domain {
        Some(domain) => check_domain(&cli, &certbot, &diagnoser, &vhosts, domain).await,
        None => check_all(&certbot, &diagnoser, &vhosts).await,
    }
}

/// Vhosts whose certificate lives under the letsencrypt directory
fn letsencrypt_vhosts<'a>(vhosts: &'a [VirtualHost], certbot: &CertbotSettings) -> Vec<&'a VirtualHost> {
    vhosts
        .iter()
        .filter(|v| {
            v.certificate
                .as_deref()
                .is_some_and(|c| is_letsencrypt_path(c, &certbot.letsencrypt_dir))
        })
        .collect()
}

fn list(vhosts: &[VirtualHost], certbot: &CertbotSettings) {
    for vhost in letsencrypt_vhosts(vhosts, certbot) {
        let Some(cert) = &vhost.certificate else {
            continue;
        };
        let days = match CertInfo::from_pem_file(cert) {
            Ok(info) => format!("{} days", info.days_left()),
            Err(e) => e.to_string(),
        };
        println!("{} {} ({})", vhost.label(), cert.display(), days);
    }
}

/// The port 80 vhost answering for `name`, which certbot's webroot relies on
fn http_vhost<'a>(vhosts: &'a [VirtualHost], name: &str) -> Option<&'a VirtualHost> {
    vhosts
        .iter()
        .find(|v| v.has_name(name) && !v.is_ssl() && v.port() == 80)
}

fn report(label: &str, problems: &[Problem]) {
    for problem in problems {
        println!("❌ {}: {}", label, problem);
    }
}

async fn check_all(
    certbot: &CertbotSettings,
    diagnoser: &Diagnoser,
    vhosts: &[VirtualHost],
) -> anyhow::Result<ExitCode> {
    let mut failed = 0;
    let targets = letsencrypt_vhosts(vhosts, certbot);
    for https in &targets {
        let label = https.label();
        let mut problems = diagnoser.check_certificate(https);

        let primary = https.names().into_iter().next().unwrap_or_default();
        match http_vhost(vhosts, &primary) {
            Some(http) => problems.extend(diagnoser.check_vhost(http).await),
            None => tracing::warn!("{}: no http vhost, renewal must use another authenticator", label),
        }

        if problems.is_empty() {
            println!("✅ {}", label);
        } else {
            report(&label, &problems);
            failed += 1;
        }
    }

    tracing::info!("🩺 {} vhost(s) checked, {} with problems", targets.len(), failed);
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn check_domain(
    cli: &Cli,
    certbot: &CertbotSettings,
    diagnoser: &Diagnoser,
    vhosts: &[VirtualHost],
    domain: &str,
) -> anyhow::Result<ExitCode> {
    let Some(http) = http_vhost(vhosts, domain) else {
        bail!("no http (port 80) vhost serves {}", domain);
    };

    let mut problems = diagnoser.check_vhost(http).await;
    let https: Vec<&VirtualHost> = vhosts.iter().filter(|v| v.is_ssl() && v.has_name(domain)).collect();
    for vhost in &https {
        // A missing certificate is what --create is for
        problems.extend(
            diagnoser
                .check_certificate(vhost)
                .into_iter()
                .filter(|p| !matches!(p, Problem::CertMissing { .. })),
        );
    }

    if !problems.is_empty() {
        report(&http.label(), &problems);
        return Ok(ExitCode::FAILURE);
    }
    println!("✅ {}", http.label());

    let Some(docroot) = http.document_root.clone() else {
        bail!("{} has no DocumentRoot", http.label());
    };
    let names: Vec<String> = http.names().into_iter().filter(|n| !n.starts_with("*.")).collect();
    let cert_name = https
        .iter()
        .find_map(|v| v.certificate.as_deref().and_then(|c| lineage_of(c, &certbot.letsencrypt_dir)))
        .or_else(|| names.first().cloned())
        .unwrap_or_else(|| domain.to_string());

    let request = CertbotRequest::new(names, Authenticator::Webroot(docroot))
        .binary(&certbot.binary)
        .email(cli.email.clone().or(certbot.email.clone()))
        .staging(cli.staging)
        .dry_run(cli.dry_run)
        .cert_name(cert_name);

    if !cli.create {
        println!("{}", request.command_line()?);
        return Ok(ExitCode::SUCCESS);
    }

    let output = request.run().await.context("certbot failed")?;
    print!("{}", output);
    Ok(ExitCode::SUCCESS)
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
    fn test_create_requires_domain() {
        assert!(Cli::try_parse_from(["a2certbot", "--create"]).is_err());
        assert!(Cli::try_parse_from(["a2certbot", "--create", "-d", "example.com"]).is_ok());
    }

    #[test]
    fn test_selects_letsencrypt_and_http_vhosts() {
        let tree = ConfigTree::from_source(
            "/etc/apache2/sites-enabled/x.conf",
            "<VirtualHost *:80>\nServerName a.test\n</VirtualHost>\n\
             <VirtualHost *:443>\nServerName a.test\nSSLCertificateFile /etc/letsencrypt/live/a.test/fullchain.pem\n</VirtualHost>\n\
             <VirtualHost *:443>\nServerName b.test\nSSLCertificateFile /etc/ssl/certs/b.pem\n</VirtualHost>\n",
        )
        .unwrap();
        let vhosts = tree.vhosts();
        let certbot = CertbotSettings::default();

        let le = letsencrypt_vhosts(&vhosts, &certbot);
        assert_eq!(le.len(), 1);
        assert_eq!(le[0].label(), "a.test:443");
        assert_eq!(http_vhost(&vhosts, "a.test").map(|v| v.line), Some(1));
        assert!(http_vhost(&vhosts, "b.test").is_none());
    }
}
