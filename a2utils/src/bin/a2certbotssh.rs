//! a2certbotssh - Let's Encrypt for vhosts on a remote host
//!
//! 🔑 certbot runs here in manual mode. Its auth and cleanup hooks call this
//! binary again, which places the HTTP-01 challenge into the remote document
//! root over ssh. The issued certificate is then copied to the remote host.

use a2utils::CommonArgs;
use a2utils_core::Settings;
use a2utils_tls::certbot::live_paths;
use a2utils_tls::ssh::shell_quote;
use a2utils_tls::{
    Authenticator, CertbotRequest, ChallengeDeployer, ChallengeFile, SshDeployer, SshTarget,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Request a Let's Encrypt certificate for a vhost on a remote apache host
#[derive(Parser, Debug)]
#[command(name = "a2certbotssh")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Remote host, `[user@]host[:port]`
    #[arg(required = true)]
    host: Option<String>,

    /// Host name of the remote vhost
    #[arg(required = true)]
    domain: Option<String>,

    /// Root apache config on the remote host
    #[arg(long, default_value = "/etc/apache2/apache2.conf")]
    remote_config: String,

    /// Remote document root; looked up with a2conf on the remote host when omitted
    #[arg(long)]
    docroot: Option<String>,

    /// Remote directory for the issued files (default /etc/ssl/a2certbotssh/DOMAIN)
    #[arg(long)]
    dest_dir: Option<String>,

    /// Test and reload the remote apache afterwards
    #[arg(long)]
    reload: bool,

    /// Pass --dry-run to certbot and copy nothing
    #[arg(long)]
    dry_run: bool,

    /// Use the Let's Encrypt staging server
    #[arg(long)]
    staging: bool,

    /// Registration email (default from settings)
    #[arg(long)]
    email: Option<String>,

    /// ssh identity file
    #[arg(short, long, global = true)]
    identity: Option<PathBuf>,

    #[command(subcommand)]
    hook: Option<Hook>,
}

/// Entry points for certbot's `--manual-*-hook`
#[derive(Subcommand, Debug)]
enum Hook {
    #[command(hide = true)]
    AuthHook { host: String, docroot: String },

    #[command(hide = true)]
    CleanupHook { host: String, docroot: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli.common.init_logging();
    let settings = cli.common.load_settings()?;

    if let Some(hook) = &cli.hook {
        run_hook(&settings, hook, cli.identity.as_deref()).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let (Some(host), Some(domain)) = (&cli.host, &cli.domain) else {
        bail!("HOST and DOMAIN are required");
    };
    let target = ssh_target(&settings, host, cli.identity.as_deref())?;

    let (docroot, names) = match &cli.docroot {
        Some(docroot) => (docroot.clone(), vec![domain.clone()]),
        None => remote_vhost(&target, &cli.remote_config, domain).await?,
    };
    println!("🌐 {} on {}: {} ({})", domain, target.destination(), docroot, names.join(" "));

    let hooks = manual_hooks(host, &docroot, &passthrough(&cli))?;
    let request = CertbotRequest::new(names, hooks)
        .binary(&settings.certbot.binary)
        .email(cli.email.clone().or(settings.certbot.email.clone()))
        .staging(cli.staging)
        .dry_run(cli.dry_run)
        .cert_name(domain.clone());
    let lineage = request.lineage().unwrap_or(domain).to_string();

    let output = request.run().await.context("certbot failed")?;
    print!("{}", output);
    if cli.dry_run {
        return Ok(ExitCode::SUCCESS);
    }

    let dest = cli
        .dest_dir
        .clone()
        .unwrap_or_else(|| format!("/etc/ssl/a2certbotssh/{}", domain));
    let live = live_paths(&settings.certbot.letsencrypt_dir, &lineage);
    upload(&target, &dest, &live.fullchain, &live.privkey).await?;

    println!("SSLCertificateFile {}/fullchain.pem", dest);
    println!("SSLCertificateKeyFile {}/privkey.pem", dest);

    if cli.reload {
        let ctl = format!("{} -t", shell_quote(&settings.apache.ctl));
        let reload: Vec<String> = settings.apache.reload_command.iter().map(|a| shell_quote(a)).collect();
        target
            .run(&format!("{} && {}", ctl, reload.join(" ")))
            .await
            .context("remote apache reload failed")?;
        println!("🔄 reloaded apache on {}", target.destination());
    }
    Ok(ExitCode::SUCCESS)
}

fn ssh_target(settings: &Settings, host: &str, identity: Option<&Path>) -> anyhow::Result<SshTarget> {
    let mut target: SshTarget = host.parse()?;
    target = target.with_options(settings.ssh.options.iter().cloned());
    if let Some(identity) = identity {
        target = target.with_identity(identity);
    }
    Ok(target)
}

/// Flags the hook processes need to reach the same host the same way
fn passthrough(cli: &Cli) -> Vec<String> {
    let mut flags = Vec::new();
    if let Some(settings) = &cli.common.settings {
        flags.push("--settings".to_string());
        flags.push(settings.display().to_string());
    }
    if let Some(identity) = &cli.identity {
        flags.push("--identity".to_string());
        flags.push(identity.display().to_string());
    }
    flags
}

/// Hook commands calling this binary back
fn manual_hooks(host: &str, docroot: &str, flags: &[String]) -> anyhow::Result<Authenticator> {
    let exe = std::env::current_exe().context("locating a2certbotssh")?;
    let exe = shell_quote(&exe.display().to_string());
    let mut tail = vec![shell_quote(host), shell_quote(docroot)];
    tail.extend(flags.iter().map(|f| shell_quote(f)));
    let tail = tail.join(" ");
    let hook = |name: &str| format!("{} {} {}", exe, name, tail);
    Ok(Authenticator::Manual {
        auth_hook: hook("auth-hook"),
        cleanup_hook: hook("cleanup-hook"),
    })
}

/// certbot exports the challenge in `CERTBOT_TOKEN` / `CERTBOT_VALIDATION`
async fn run_hook(settings: &Settings, hook: &Hook, identity: Option<&Path>) -> anyhow::Result<()> {
    let token = std::env::var("CERTBOT_TOKEN").context("CERTBOT_TOKEN is not set")?;
    let validation = std::env::var("CERTBOT_VALIDATION").unwrap_or_default();
    let challenge = ChallengeFile::new(token, validation)?;

    match hook {
        Hook::AuthHook { host, docroot } => {
            let deployer = SshDeployer::new(ssh_target(settings, host, identity)?, docroot.clone());
            deployer.deploy(&challenge).await?;
            tracing::info!("🧩 challenge placed at {}:{}", host, deployer.path_for(&challenge));
        }
        Hook::CleanupHook { host, docroot } => {
            let deployer = SshDeployer::new(ssh_target(settings, host, identity)?, docroot.clone());
            deployer.cleanup(&challenge).await?;
        }
    }
    Ok(())
}

const REMOTE_VHFMT: &str = "{port}|{documentroot}|{names}";

/// Document root and names of the remote port 80 vhost, via remote a2conf
async fn remote_vhost(target: &SshTarget, config: &str, domain: &str) -> anyhow::Result<(String, Vec<String>)> {
    let command = format!(
        "a2conf {} --vhost {} --vhfmt {}",
        shell_quote(config),
        shell_quote(domain),
        shell_quote(REMOTE_VHFMT)
    );
    let output = target
        .run(&command)
        .await
        .context("looking up the vhost with a2conf on the remote host (or pass --docroot)")?;
    match parse_remote_vhosts(&String::from_utf8_lossy(&output)) {
        Some(found) => Ok(found),
        None => bail!("no port 80 vhost with a DocumentRoot serves {} on {}", domain, target.destination()),
    }
}

fn parse_remote_vhosts(output: &str) -> Option<(String, Vec<String>)> {
    output.lines().find_map(|line| {
        let mut parts = line.splitn(3, '|');
        let port = parts.next()?;
        let docroot = parts.next()?;
        let names = parts.next()?;
        if port != "80" || docroot.is_empty() {
            return None;
        }
        let names = names
            .split_whitespace()
            .filter(|n| !n.starts_with("*."))
            .map(str::to_string)
            .collect();
        Some((docroot.to_string(), names))
    })
}

async fn upload(target: &SshTarget, dest: &str, fullchain: &Path, privkey: &Path) -> anyhow::Result<()> {
    target
        .run(&format!("mkdir -p {} && chmod 700 {}", shell_quote(dest), shell_quote(dest)))
        .await?;
    target.copy_to(fullchain, &format!("{}/fullchain.pem", dest)).await?;
    target.copy_to(privkey, &format!("{}/privkey.pem", dest)).await?;
    println!("📦 copied certificate to {}:{}", target.destination(), dest);
    Ok(())
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
    fn test_parse_main_and_hook_forms() {
        let cli = Cli::parse_from(["a2certbotssh", "root@web1", "example.com", "--reload"]);
        assert_eq!(cli.host.as_deref(), Some("root@web1"));
        assert_eq!(cli.domain.as_deref(), Some("example.com"));
        assert!(cli.reload);
        assert!(cli.hook.is_none());

        let cli = Cli::parse_from(["a2certbotssh", "auth-hook", "web1", "/var/www/x"]);
        assert!(matches!(cli.hook, Some(Hook::AuthHook { ref host, .. }) if host == "web1"));

        assert!(Cli::try_parse_from(["a2certbotssh", "web1"]).is_err());
    }

    #[test]
    fn test_parse_remote_vhosts() {
        let output = "443|/var/www/example|example.com www.example.com\n80|/var/www/example|example.com www.example.com *.example.com\n";
        let (docroot, names) = parse_remote_vhosts(output).unwrap();
        assert_eq!(docroot, "/var/www/example");
        assert_eq!(names, vec!["example.com", "www.example.com"]);

        assert!(parse_remote_vhosts("80||example.com\n").is_none());
    }

    #[test]
    fn test_manual_hooks_call_back() {
        let Authenticator::Manual { auth_hook, cleanup_hook } =
            manual_hooks("root@web1", "/var/www/my site", &[]).unwrap()
        else {
            panic!("expected manual authenticator");
        };
        assert!(auth_hook.ends_with(" auth-hook root@web1 '/var/www/my site'"));
        assert!(cleanup_hook.ends_with(" cleanup-hook root@web1 '/var/www/my site'"));
    }

    #[test]
    fn test_hook_flags_follow_subcommand() {
        let cli = Cli::parse_from(["a2certbotssh", "web1", "example.com", "-i", "/root/.ssh/le", "--settings", "/etc/a2.toml"]);
        let flags = passthrough(&cli);
        assert_eq!(flags, vec!["--settings", "/etc/a2.toml", "--identity", "/root/.ssh/le"]);

        let mut argv = vec!["a2certbotssh".to_string(), "auth-hook".to_string(), "web1".to_string(), "/var/www".to_string()];
        argv.extend(flags);
        let cli = Cli::parse_from(argv);
        assert!(matches!(cli.hook, Some(Hook::AuthHook { .. })));
        assert_eq!(cli.identity, Some(PathBuf::from("/root/.ssh/le")));
        assert_eq!(cli.common.settings, Some(PathBuf::from("/etc/a2.toml")));
    }
}
