//! okerr monitoring indicators
//!
//! 📈 One indicator per served name: `sslcert` for https vhosts (certificate
//! expiry), `httpstatus` for plain http vhosts. Indicators are created or
//! updated through okerr's `/update` form endpoint.

use a2utils_config::{VhostDirective, VirtualHost};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

/// okerr errors
#[derive(Debug, Error)]
pub enum OkerrError {
    #[error("⚠️ okerr project textid is not set")]
    MissingTextId,

    #[error("🌐 POST {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("❌ okerr rejected '{name}' with status {status}: {body}")]
    Rejected { name: String, status: u16, body: String },
}

/// 📈 An indicator to create on the okerr server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Indicator {
    pub name: String,
    /// Check method, e.g. `sslcert`
    pub method: String,
    /// Method arguments in the order they are sent
    pub args: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub policy: String,
    pub desc: String,
}

impl Indicator {
    /// Certificate expiry check for `host:port`
    pub fn sslcert(prefix: &str, host: &str, port: u16, days: i64) -> Self {
        Self {
            name: format!("{}{}", prefix, host),
            method: "sslcert".to_string(),
            args: vec![
                ("host".to_string(), host.to_string()),
                ("port".to_string(), port.to_string()),
                ("days".to_string(), days.to_string()),
            ],
            tags: Vec::new(),
            policy: String::new(),
            desc: format!("SSL certificate of {}", host),
        }
    }

    /// HTTP status check for `url`
    pub fn httpstatus(prefix: &str, host: &str, url: &str, status: u16) -> Self {
        Self {
            name: format!("{}{}", prefix, host),
            method: "httpstatus".to_string(),
            args: vec![
                ("url".to_string(), url.to_string()),
                ("status".to_string(), status.to_string()),
            ],
            tags: Vec::new(),
            policy: String::new(),
            desc: format!("HTTP status of {}", url),
        }
    }

    /// `method|key=value|...` as okerr expects it
    pub fn method_spec(&self) -> String {
        let mut spec = self.method.clone();
        for (key, value) in &self.args {
            spec.push('|');
            spec.push_str(key);
            spec.push('=');
            spec.push_str(value);
        }
        spec
    }
}

/// What to build indicators for
#[derive(Debug, Clone)]
pub struct IndicatorOptions {
    pub prefix: String,
    pub policy: String,
    pub tags: Vec<String>,
    /// Also create `httpstatus` indicators for non-ssl vhosts
    pub http: bool,
    /// Alert this many days before certificate expiry
    pub days: i64,
}

impl Default for IndicatorOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            policy: "Default".to_string(),
            tags: Vec::new(),
            http: false,
            days: 20,
        }
    }
}

/// Indicators for every name of the given vhosts, first vhost wins per name
pub fn indicators_for(vhosts: &[VirtualHost], options: &IndicatorOptions) -> Vec<Indicator> {
    let mut seen = HashSet::new();
    let mut indicators = Vec::new();

    for vhost in vhosts {
        if !vhost.is_ssl() && !options.http {
            continue;
        }
        for host in vhost.names() {
            if host.starts_with("*.") {
                continue;
            }
            let mut indicator = if vhost.is_ssl() {
                Indicator::sslcert(&options.prefix, &host, vhost.port(), options.days)
            } else {
                let url = match vhost.port() {
                    80 => format!("http://{}/", host),
                    port => format!("http://{}:{}/", host, port),
                };
                Indicator::httpstatus(&options.prefix, &host, &url, expected_status(vhost))
            };
            if !seen.insert(indicator.name.clone()) {
                continue;
            }
            indicator.policy = options.policy.clone();
            indicator.tags = options.tags.clone();
            indicators.push(indicator);
        }
    }
    indicators
}

/// Status a plain `GET /` is answered with
fn expected_status(vhost: &VirtualHost) -> u16 {
    vhost
        .directives
        .iter()
        .filter(|d| d.depth == 0)
        .find_map(root_redirect)
        .unwrap_or(200)
}

/// Redirect status when `d` redirects requests for `/`
fn root_redirect(d: &VhostDirective) -> Option<u16> {
    let args = d.args.as_slice();
    if d.is("RewriteRule") {
        let pattern = args.first()?;
        let status = args.get(2).and_then(|flags| rewrite_redirect_flag(flags))?;
        return (!pattern.starts_with('!') && pattern_matches_root(pattern)).then_some(status);
    }
    if d.is("RedirectPermanent") {
        return (args.first()? == "/").then_some(301);
    }
    if d.is("RedirectTemp") {
        return (args.first()? == "/").then_some(302);
    }

    let is_match = d.is("RedirectMatch");
    if !is_match && !d.is("Redirect") {
        return None;
    }
    // Optional leading status, 302 when omitted
    let (status, rest) = match args.first().and_then(|a| redirect_status(a)) {
        Some(status) => (status, &args[1..]),
        None => (302, args),
    };
    let path = rest.first()?;
    let hits_root = if is_match { pattern_matches_root(path) } else { path == "/" };
    hits_root.then_some(status)
}

/// `permanent`, `temp`, `seeother`, `gone` or a numeric status
fn redirect_status(arg: &str) -> Option<u16> {
    match arg.to_ascii_lowercase().as_str() {
        "permanent" => Some(301),
        "temp" => Some(302),
        "seeother" => Some(303),
        "gone" => Some(410),
        other if other.len() == 3 => other.parse().ok(),
        _ => None,
    }
}

/// Status of the `R`/`redirect` flag in `[L,R=301]`, if present
fn rewrite_redirect_flag(flags: &str) -> Option<u16> {
    let flags = flags.strip_prefix('[')?.strip_suffix(']')?;
    flags.split(',').find_map(|flag| {
        let (name, value) = match flag.trim().split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag.trim(), None),
        };
        if !name.eq_ignore_ascii_case("r") && !name.eq_ignore_ascii_case("redirect") {
            return None;
        }
        match value {
            Some(value) => redirect_status(value),
            None => Some(302),
        }
    })
}

fn pattern_matches_root(pattern: &str) -> bool {
    regex::Regex::new(pattern).is_ok_and(|re| re.is_match("/"))
}

/// 📮 Posts indicators to an okerr server
#[derive(Debug, Clone)]
pub struct OkerrClient {
    client: reqwest::Client,
    url: String,
    textid: String,
    secret: Option<String>,
    dry_run: bool,
}

impl OkerrClient {
    pub fn new(url: &str, textid: Option<String>, secret: Option<String>) -> Result<Self, OkerrError> {
        let textid = textid.filter(|t| !t.is_empty()).ok_or(OkerrError::MissingTextId)?;
        Ok(Self {
            client: reqwest::Client::new(),
            url: format!("{}/update", url.trim_end_matches('/')),
            textid,
            secret,
            dry_run: false,
        })
    }

    /// Client for `--dry-run`: prints indicators, needs no project
    pub fn offline(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/update", url.trim_end_matches('/')),
            textid: String::new(),
            secret: None,
            dry_run: true,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn update_url(&self) -> &str {
        &self.url
    }

    /// Form fields for one indicator
    pub fn form(&self, indicator: &Indicator) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("textid", self.textid.clone()),
            ("name", indicator.name.clone()),
            ("status", "OK".to_string()),
            ("method", indicator.method_spec()),
            ("policy", indicator.policy.clone()),
            ("tags", indicator.tags.join(",")),
            ("desc", indicator.desc.clone()),
            ("details", "created by a2okerr".to_string()),
        ];
        if let Some(secret) = &self.secret {
            form.push(("secret", secret.clone()));
        }
        form
    }

    /// 📮 Create or update one indicator
    pub async fn update(&self, indicator: &Indicator) -> Result<(), OkerrError> {
        if self.dry_run {
            println!("{} {}", indicator.name, indicator.method_spec());
            return Ok(());
        }

        tracing::info!("📮 Updating {} ({})", indicator.name, indicator.method);
        let response = self
            .client
            .post(&self.url)
            .form(&self.form(indicator))
            .send()
            .await
            .map_err(|source| OkerrError::Http {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OkerrError::Rejected {
                name: indicator.name.clone(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(())
    }

    /// Update every indicator, returning the failures
    pub async fn update_all(&self, indicators: &[Indicator]) -> Vec<OkerrError> {
        let mut errors = Vec::new();
        for indicator in indicators {
            if let Err(e) = self.update(indicator).await {
                tracing::warn!("{}", e);
                errors.push(e);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2utils_config::ConfigTree;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SITES: &str = r#"
<VirtualHost *:80>
    ServerName example.com
    ServerAlias www.example.com
    Redirect permanent / https://example.com/
</VirtualHost>
<VirtualHost *:443>
    ServerName example.com
    ServerAlias www.example.com *.example.com
    SSLEngine on
</VirtualHost>
<VirtualHost *:8080>
    ServerName plain.test
</VirtualHost>
"#;

    fn vhosts() -> Vec<VirtualHost> {
        ConfigTree::from_source("/etc/apache2/sites-enabled/x.conf", SITES)
            .unwrap()
            .vhosts()
    }

    #[test]
    fn test_ssl_indicators_only_by_default() {
        let options = IndicatorOptions {
            prefix: "web1:".to_string(),
            tags: vec!["apache".to_string()],
            ..Default::default()
        };
        let indicators = indicators_for(&vhosts(), &options);
        let names: Vec<&str> = indicators.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["web1:example.com", "web1:www.example.com"]);
        assert_eq!(indicators[0].method_spec(), "sslcert|host=example.com|port=443|days=20");
        assert_eq!(indicators[0].tags, vec!["apache"]);
        assert_eq!(indicators[0].policy, "Default");
    }

    #[test]
    fn test_http_indicators() {
        let options = IndicatorOptions {
            http: true,
            ..Default::default()
        };
        let indicators = indicators_for(&vhosts(), &options);
        // http vhost comes first and claims the names
        assert_eq!(indicators[0].method_spec(), "httpstatus|url=http://example.com/|status=301");
        let plain = indicators.iter().find(|i| i.name == "plain.test").unwrap();
        assert_eq!(plain.method_spec(), "httpstatus|url=http://plain.test:8080/|status=200");
        assert_eq!(indicators.len(), 3);
    }

    fn http_status_of(body: &str) -> String {
        let source = format!("<VirtualHost *:80>\nServerName t.test\n{}\n</VirtualHost>\n", body);
        let vhosts = ConfigTree::from_source("/etc/apache2/sites-enabled/t.conf", &source)
            .unwrap()
            .vhosts();
        let options = IndicatorOptions {
            http: true,
            ..Default::default()
        };
        indicators_for(&vhosts, &options)[0].method_spec()
    }

    #[test]
    fn test_redirect_status_follows_apache_defaults() {
        assert!(http_status_of("Redirect / https://t.test/").ends_with("|status=302"));
        assert!(http_status_of("Redirect 301 / https://t.test/").ends_with("|status=301"));
        assert!(http_status_of("Redirect seeother / https://t.test/").ends_with("|status=303"));
        assert!(http_status_of("RedirectPermanent / https://t.test/").ends_with("|status=301"));
        assert!(http_status_of("RedirectMatch permanent ^/(.*)$ https://t.test/$1").ends_with("|status=301"));
    }

    #[test]
    fn test_redirect_of_other_paths_keeps_200() {
        assert!(http_status_of("Redirect permanent /old /new").ends_with("|status=200"));
        assert!(http_status_of("RedirectMatch ^/blog/(.*) /news/$1").ends_with("|status=200"));
        assert!(http_status_of("<Location /x>\nRedirect / /y\n</Location>").ends_with("|status=200"));
    }

    #[test]
    fn test_rewrite_redirect_flags() {
        let rule = |flags: &str| http_status_of(&format!("RewriteEngine On\nRewriteRule ^ https://%{{HTTP_HOST}}%{{REQUEST_URI}} {}", flags));
        assert!(rule("[R,L]").ends_with("|status=302"));
        assert!(rule("[R=302]").ends_with("|status=302"));
        assert!(rule("[L,R=301]").ends_with("|status=301"));
        assert!(rule("[L]").ends_with("|status=200"));
        assert!(http_status_of("RewriteRule ^/old$ /new [R=301]").ends_with("|status=200"));
    }

    #[test]
    fn test_offline_client_prints_without_project() {
        let client = OkerrClient::offline("https://cp.okerr.com");
        assert_eq!(client.update_url(), "https://cp.okerr.com/update");
        assert!(client.dry_run);
    }

    #[test]
    fn test_client_requires_textid() {
        assert!(matches!(
            OkerrClient::new("https://cp.okerr.com/", None, None),
            Err(OkerrError::MissingTextId)
        ));
        let client = OkerrClient::new("https://cp.okerr.com/", Some("proj".to_string()), None).unwrap();
        assert_eq!(client.update_url(), "https://cp.okerr.com/update");
    }

    #[test]
    fn test_form_fields() {
        let client = OkerrClient::new("http://okerr.local", Some("proj".to_string()), Some("s3cret".to_string())).unwrap();
        let indicator = Indicator::sslcert("", "a.test", 443, 10);
        let form = client.form(&indicator);
        assert!(form.contains(&("textid", "proj".to_string())));
        assert!(form.contains(&("method", "sslcert|host=a.test|port=443|days=10".to_string())));
        assert!(form.contains(&("secret", "s3cret".to_string())));
        assert!(form.contains(&("status", "OK".to_string())));
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if body.len() >= length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok", status);
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}/", addr), handle)
    }

    #[tokio::test]
    async fn test_update_posts_form() {
        let (url, handle) = serve_once("200 OK").await;
        let client = OkerrClient::new(&url, Some("proj".to_string()), None)
            .unwrap()
            .with_client(local_client());
        client.update(&Indicator::sslcert("", "a.test", 443, 20)).await.unwrap();

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /update HTTP/1.1"));
        assert!(request.contains("textid=proj"));
        assert!(request.contains("name=a.test"));
        assert!(request.contains("method=sslcert%7Chost%3Da.test%7Cport%3D443%7Cdays%3D20"));
    }

    #[tokio::test]
    async fn test_update_rejected() {
        let (url, _handle) = serve_once("400 Bad Request").await;
        let client = OkerrClient::new(&url, Some("proj".to_string()), None)
            .unwrap()
            .with_client(local_client());
        let errors = client.update_all(&[Indicator::sslcert("", "a.test", 443, 20)]).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], OkerrError::Rejected { status: 400, body, .. } if body == "ok"));
    }
}
