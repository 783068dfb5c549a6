//! Network probes: DNS, local addresses and challenge fetches

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("🔍 Cannot resolve {name}: {source}")]
    Dns {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("🔍 {0} has no address")]
    NoAddress(String),

    #[error("💥 Cannot list local addresses: {0}")]
    LocalAddresses(String),

    #[error("⚠️ Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("🌐 GET {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("🌐 GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("🌐 GET {url} returned unexpected content '{got}'")]
    Mismatch { url: String, got: String },
}

/// 🔍 Addresses of `name` from the system resolver, without duplicates
pub async fn resolve(name: &str) -> Result<Vec<IpAddr>, ProbeError> {
    let resolved = tokio::net::lookup_host((name, 80))
        .await
        .map_err(|source| ProbeError::Dns {
            name: name.to_string(),
            source,
        })?;

    let mut addresses = Vec::new();
    for socket in resolved {
        if !addresses.contains(&socket.ip()) {
            addresses.push(socket.ip());
        }
    }
    if addresses.is_empty() {
        return Err(ProbeError::NoAddress(name.to_string()));
    }
    Ok(addresses)
}

/// Addresses of this host: the configured list, or `ip -o addr` output
pub async fn local_addresses(configured: &[String]) -> Result<Vec<IpAddr>, ProbeError> {
    if !configured.is_empty() {
        return configured
            .iter()
            .map(|a| a.parse().map_err(|_| ProbeError::InvalidAddress(a.clone())))
            .collect();
    }

    let output = tokio::process::Command::new("ip")
        .args(["-o", "addr", "show"])
        .output()
        .await
        .map_err(|e| ProbeError::LocalAddresses(e.to_string()))?;
    if !output.status.success() {
        return Err(ProbeError::LocalAddresses(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(parse_ip_addr(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ip -o addr show`: `2: eth0    inet 10.0.0.5/24 brd ...`
pub fn parse_ip_addr(output: &str) -> Vec<IpAddr> {
    let mut addresses = Vec::new();
    for line in output.lines() {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word != "inet" && word != "inet6" {
                continue;
            }
            let parsed = words
                .next()
                .and_then(|cidr| cidr.split('/').next())
                .and_then(|ip| ip.parse::<IpAddr>().ok());
            if let Some(ip) = parsed {
                if !addresses.contains(&ip) {
                    addresses.push(ip);
                }
            }
            break;
        }
    }
    addresses
}

/// Client for challenge probes.
///
/// Follows redirects and ignores certificate errors on https targets, like
/// the ACME validation servers do.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .user_agent(concat!("a2utils/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ProbeError::Http {
            url: String::new(),
            source,
        })
}

/// 🌐 GET `url` and compare the trimmed body with `expected`
pub async fn fetch_challenge(client: &reqwest::Client, url: &str, expected: &str) -> Result<(), ProbeError> {
    let http_error = |source| ProbeError::Http {
        url: url.to_string(),
        source,
    };

    let response = client.get(url).send().await.map_err(http_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(http_error)?;
    let got = body.trim();
    if got != expected.trim() {
        return Err(ProbeError::Mismatch {
            url: url.to_string(),
            got: got.chars().take(80).collect(),
        });
    }
    Ok(())
}
